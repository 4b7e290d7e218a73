//! External capability providers and the registry of fallback chains.
//!
//! Each provider wraps one external capability (speech synthesis, image
//! generation, lip-sync rendering) behind a uniform invoke/failure
//! contract so the orchestrator can retry, fall through, or abort without
//! knowing anything provider-specific.

mod image;
mod lipsync;
mod retry;
mod tts;

pub use image::{ImageProvider, ImageStyle};
pub use lipsync::LipsyncRenderer;
pub use retry::{calculate_backoff, invoke_with_retry, RetryPolicy};
pub use tts::SpeechProvider;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;

/// A capability the pipeline can be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Text to speech: text in, audio artifact out.
    Tts,
    /// Image generation: prompt in, image artifact out.
    Image,
    /// Lip-synced (or still-frame) video: image + audio in, video out.
    LipsyncVideo,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Tts => write!(f, "tts"),
            Capability::Image => write!(f, "image"),
            Capability::LipsyncVideo => write!(f, "lipsync-video"),
        }
    }
}

/// Classified failure kinds shared by every adapter.
///
/// The kind decides the orchestrator's next move: retry the same provider,
/// fall through to the next one, or abort the whole chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The payload itself was rejected. Not retryable; aborts the chain.
    BadInput,
    /// Missing or invalid credential. A configuration problem, not retried.
    Auth,
    /// Connection reset, timeout, bad gateway. Retryable.
    TransientNetwork,
    /// Remote capacity or rate-limit signal. Retryable.
    Unavailable,
    /// A spawned external tool exited non-zero or produced garbage.
    ProcessError,
    /// Bounded execution exceeded its deadline.
    TimedOut,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::BadInput => write!(f, "bad input"),
            FailureKind::Auth => write!(f, "auth"),
            FailureKind::TransientNetwork => write!(f, "transient network error"),
            FailureKind::Unavailable => write!(f, "unavailable"),
            FailureKind::ProcessError => write!(f, "process error"),
            FailureKind::TimedOut => write!(f, "timed out"),
        }
    }
}

/// A classified provider failure with a human-readable detail.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct ProviderFailure {
    pub kind: FailureKind,
    pub detail: String,
}

impl ProviderFailure {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn bad_input(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::BadInput, detail)
    }

    pub fn auth(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::Auth, detail)
    }

    pub fn transient(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::TransientNetwork, detail)
    }

    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::Unavailable, detail)
    }

    pub fn process_error(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::ProcessError, detail)
    }

    pub fn timed_out(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::TimedOut, detail)
    }

    /// Whether retrying the same provider can plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            FailureKind::TransientNetwork | FailureKind::Unavailable
        )
    }
}

/// Classify a reqwest transport error into a provider failure.
///
/// Connection failures, timeouts, and interrupted body transfers are
/// transient; anything else is reported as the remote being unavailable.
pub(crate) fn classify_transport_error(err: &reqwest::Error) -> ProviderFailure {
    if err.is_connect() || err.is_timeout() || err.is_body() {
        return ProviderFailure::transient(err.to_string());
    }
    if let Some(status) = err.status() {
        if status.as_u16() == 502 || status.as_u16() == 504 {
            return ProviderFailure::transient(err.to_string());
        }
    }
    ProviderFailure::unavailable(err.to_string())
}

/// Classify a non-2xx HTTP status into a provider failure.
pub(crate) fn classify_status(status: reqwest::StatusCode, body: &str) -> ProviderFailure {
    let detail = format!("status {}: {}", status, body);
    match status.as_u16() {
        401 | 403 => ProviderFailure::auth(detail),
        429 | 503 => ProviderFailure::unavailable(detail),
        502 | 504 => ProviderFailure::transient(detail),
        400 | 415 | 422 => ProviderFailure::bad_input(detail),
        _ => ProviderFailure::unavailable(detail),
    }
}

/// The payload a provider is invoked with, already validated and resolved
/// by the orchestrator.
#[derive(Debug)]
pub enum ProviderInput<'a> {
    /// Speech synthesis input.
    Text {
        text: &'a str,
        language: &'a str,
        voice_id: Option<&'a str>,
        slow: bool,
    },
    /// Image generation input.
    Prompt {
        prompt: &'a str,
        resolution: Option<(u32, u32)>,
    },
    /// Lip-sync rendering input. `face` is a baseline video clip.
    Render {
        face: &'a Path,
        audio: &'a Path,
        timeout: std::time::Duration,
    },
}

/// Uniform contract every external capability is wrapped behind.
///
/// `invoke` writes its output to `dest` and classifies every failure; it
/// never panics for expected failure modes.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Stable name used for attribution and logging.
    fn name(&self) -> &str;

    /// The capability this provider serves.
    fn capability(&self) -> Capability;

    async fn invoke(
        &self,
        input: &ProviderInput<'_>,
        dest: &Path,
    ) -> Result<(), ProviderFailure>;
}

/// Ordered fallback chains per capability, built once at process start.
///
/// Descriptors whose credential is absent are simply omitted from the
/// chain rather than discovered via a runtime failure.
#[derive(Default)]
pub struct ProviderRegistry {
    chains: HashMap<Capability, Vec<Arc<dyn Provider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a provider to the end of its capability's chain. Chain order
    /// is priority order; earlier providers are tried first.
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.chains
            .entry(provider.capability())
            .or_default()
            .push(provider);
    }

    /// The fallback chain for a capability, in priority order.
    pub fn chain(&self, capability: Capability) -> &[Arc<dyn Provider>] {
        self.chains
            .get(&capability)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Build the registry from static configuration.
    ///
    /// Each descriptor's credential env var is read once, here. A missing
    /// credential omits that descriptor from the chain with an info log.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new();

        let mut tts: Vec<_> = config.tts.iter().collect();
        tts.sort_by_key(|d| d.priority);
        for descriptor in tts {
            match std::env::var(&descriptor.api_key_env) {
                Ok(key) if !key.is_empty() => {
                    registry.register(Arc::new(SpeechProvider::new(
                        descriptor.name.clone(),
                        descriptor.base_url.clone(),
                        key,
                        descriptor.voice.clone(),
                    )));
                }
                _ => {
                    log::info!(
                        "tts provider '{}' disabled: {} not set",
                        descriptor.name,
                        descriptor.api_key_env
                    );
                }
            }
        }

        let mut image: Vec<_> = config.image.iter().collect();
        image.sort_by_key(|d| d.priority);
        for descriptor in image {
            match std::env::var(&descriptor.api_key_env) {
                Ok(key) if !key.is_empty() => {
                    registry.register(Arc::new(ImageProvider::new(
                        descriptor.name.clone(),
                        descriptor.base_url.clone(),
                        key,
                        descriptor.style,
                    )));
                }
                _ => {
                    log::info!(
                        "image provider '{}' disabled: {} not set",
                        descriptor.name,
                        descriptor.api_key_env
                    );
                }
            }
        }

        if let Some(lipsync) = &config.lipsync {
            registry.register(Arc::new(LipsyncRenderer::from_config(lipsync)));
        }

        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeProvider {
        name: String,
        capability: Capability,
    }

    #[async_trait::async_trait]
    impl Provider for FakeProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn capability(&self) -> Capability {
            self.capability
        }

        async fn invoke(
            &self,
            _input: &ProviderInput<'_>,
            _dest: &Path,
        ) -> Result<(), ProviderFailure> {
            Ok(())
        }
    }

    fn fake(name: &str, capability: Capability) -> Arc<dyn Provider> {
        Arc::new(FakeProvider {
            name: name.to_string(),
            capability,
        })
    }

    #[test]
    fn test_capability_display() {
        assert_eq!(Capability::Tts.to_string(), "tts");
        assert_eq!(Capability::Image.to_string(), "image");
        assert_eq!(Capability::LipsyncVideo.to_string(), "lipsync-video");
    }

    #[test]
    fn test_failure_display_includes_kind_and_detail() {
        let failure = ProviderFailure::unavailable("remote busy");
        assert_eq!(failure.to_string(), "unavailable: remote busy");
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(ProviderFailure::transient("x").is_retryable());
        assert!(ProviderFailure::unavailable("x").is_retryable());
        assert!(!ProviderFailure::bad_input("x").is_retryable());
        assert!(!ProviderFailure::auth("x").is_retryable());
        assert!(!ProviderFailure::process_error("x").is_retryable());
        assert!(!ProviderFailure::timed_out("x").is_retryable());
    }

    #[test]
    fn test_classify_status_auth() {
        let failure = classify_status(reqwest::StatusCode::UNAUTHORIZED, "no key");
        assert_eq!(failure.kind, FailureKind::Auth);
        let failure = classify_status(reqwest::StatusCode::FORBIDDEN, "denied");
        assert_eq!(failure.kind, FailureKind::Auth);
    }

    #[test]
    fn test_classify_status_unavailable() {
        let failure = classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert_eq!(failure.kind, FailureKind::Unavailable);
        let failure = classify_status(reqwest::StatusCode::SERVICE_UNAVAILABLE, "warming up");
        assert_eq!(failure.kind, FailureKind::Unavailable);
    }

    #[test]
    fn test_classify_status_bad_input() {
        let failure = classify_status(reqwest::StatusCode::BAD_REQUEST, "bad payload");
        assert_eq!(failure.kind, FailureKind::BadInput);
        let failure = classify_status(reqwest::StatusCode::UNPROCESSABLE_ENTITY, "bad json");
        assert_eq!(failure.kind, FailureKind::BadInput);
    }

    #[test]
    fn test_classify_status_transient_gateways() {
        let failure = classify_status(reqwest::StatusCode::BAD_GATEWAY, "");
        assert_eq!(failure.kind, FailureKind::TransientNetwork);
        let failure = classify_status(reqwest::StatusCode::GATEWAY_TIMEOUT, "");
        assert_eq!(failure.kind, FailureKind::TransientNetwork);
    }

    #[test]
    fn test_registry_chain_preserves_registration_order() {
        let mut registry = ProviderRegistry::new();
        registry.register(fake("primary", Capability::Tts));
        registry.register(fake("secondary", Capability::Tts));
        registry.register(fake("painter", Capability::Image));

        let chain = registry.chain(Capability::Tts);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].name(), "primary");
        assert_eq!(chain[1].name(), "secondary");
        assert_eq!(registry.chain(Capability::Image).len(), 1);
    }

    #[test]
    fn test_registry_empty_chain_for_unregistered_capability() {
        let registry = ProviderRegistry::new();
        assert!(registry.chain(Capability::LipsyncVideo).is_empty());
    }

    #[test]
    fn test_from_config_omits_descriptors_without_credentials() {
        let mut config = Config::default();
        config.tts.push(crate::config::TtsDescriptor {
            name: "enabled".to_string(),
            base_url: "https://speech.example".to_string(),
            api_key_env: "CLIPFORGE_TEST_KEY_SET".to_string(),
            voice: None,
            priority: 0,
        });
        config.tts.push(crate::config::TtsDescriptor {
            name: "disabled".to_string(),
            base_url: "https://speech.example".to_string(),
            api_key_env: "CLIPFORGE_TEST_KEY_UNSET".to_string(),
            voice: None,
            priority: 1,
        });

        std::env::set_var("CLIPFORGE_TEST_KEY_SET", "secret");
        std::env::remove_var("CLIPFORGE_TEST_KEY_UNSET");

        let registry = ProviderRegistry::from_config(&config);
        let chain = registry.chain(Capability::Tts);
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].name(), "enabled");

        std::env::remove_var("CLIPFORGE_TEST_KEY_SET");
    }

    #[test]
    fn test_from_config_orders_chain_by_priority() {
        let mut config = Config::default();
        config.image.push(crate::config::ImageDescriptor {
            name: "backup".to_string(),
            base_url: "https://img.example/b".to_string(),
            api_key_env: "CLIPFORGE_TEST_IMG_KEY".to_string(),
            style: ImageStyle::Inline,
            priority: 5,
        });
        config.image.push(crate::config::ImageDescriptor {
            name: "preferred".to_string(),
            base_url: "https://img.example/a".to_string(),
            api_key_env: "CLIPFORGE_TEST_IMG_KEY".to_string(),
            style: ImageStyle::Linked,
            priority: 1,
        });

        std::env::set_var("CLIPFORGE_TEST_IMG_KEY", "secret");

        let registry = ProviderRegistry::from_config(&config);
        let chain = registry.chain(Capability::Image);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].name(), "preferred");
        assert_eq!(chain[1].name(), "backup");

        std::env::remove_var("CLIPFORGE_TEST_IMG_KEY");
    }
}
