//! Fallback orchestration across provider chains.
//!
//! One `run` call owns one pipeline run end to end: validate the request,
//! mint a run id and scratch space, coerce media kinds through the
//! conversion stage where needed, walk the capability's provider chain in
//! strict priority order, and hand back a structured result. Intermediate
//! files never outlive the run, whatever the exit path.

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::artifact::{MediaKind, PipelineArtifact};
use super::cache::MediaCache;
use super::convert::{self, StillFrameConverter};
use super::scratch::{self, ScratchDir, TempArtifact};
use super::{CapabilityRequest, RequestPayload};
use crate::config::Config;
use crate::paths::{PathError, PathResolver};
use crate::providers::{
    invoke_with_retry, Capability, FailureKind, ProviderFailure, ProviderInput,
    ProviderRegistry, RetryPolicy,
};

/// Error kinds surfaced to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadInput,
    Auth,
    TransientNetwork,
    Unavailable,
    ProcessError,
    TimedOut,
    AllProvidersExhausted,
}

impl From<FailureKind> for ErrorKind {
    fn from(kind: FailureKind) -> Self {
        match kind {
            FailureKind::BadInput => ErrorKind::BadInput,
            FailureKind::Auth => ErrorKind::Auth,
            FailureKind::TransientNetwork => ErrorKind::TransientNetwork,
            FailureKind::Unavailable => ErrorKind::Unavailable,
            FailureKind::ProcessError => ErrorKind::ProcessError,
            FailureKind::TimedOut => ErrorKind::TimedOut,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::BadInput => write!(f, "bad input"),
            ErrorKind::Auth => write!(f, "auth"),
            ErrorKind::TransientNetwork => write!(f, "transient network error"),
            ErrorKind::Unavailable => write!(f, "unavailable"),
            ErrorKind::ProcessError => write!(f, "process error"),
            ErrorKind::TimedOut => write!(f, "timed out"),
            ErrorKind::AllProvidersExhausted => write!(f, "all providers exhausted"),
        }
    }
}

/// One provider's recorded failure within a run.
#[derive(Debug, Clone)]
pub struct ProviderAttempt {
    pub provider: String,
    pub kind: FailureKind,
    pub detail: String,
}

impl ProviderAttempt {
    fn new(provider: &str, failure: &ProviderFailure) -> Self {
        Self {
            provider: provider.to_string(),
            kind: failure.kind,
            detail: failure.detail.clone(),
        }
    }
}

/// Structured pipeline error: a kind, a human-readable message, and the
/// per-provider breakdown. Never a raw panic or stack trace.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct PipelineError {
    pub kind: ErrorKind,
    pub message: String,
    pub attempts: Vec<ProviderAttempt>,
}

impl PipelineError {
    fn from_failure(failure: ProviderFailure, attempts: Vec<ProviderAttempt>) -> Self {
        Self {
            kind: failure.kind.into(),
            message: failure.detail,
            attempts,
        }
    }

    fn process(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::ProcessError,
            message: message.into(),
            attempts: Vec::new(),
        }
    }
}

/// A successful run: the final artifact, who served it, and the URL
/// fragment the web layer exposes it under.
#[derive(Debug)]
pub struct PipelineOutput {
    pub artifact: PipelineArtifact,
    pub served_by: String,
    pub public_url: String,
}

pub type PipelineResult = Result<PipelineOutput, PipelineError>;

/// The fallback orchestrator. Built once at startup; holds only read-only
/// state, so it is freely shared across concurrent requests.
pub struct Orchestrator {
    registry: ProviderRegistry,
    converter: StillFrameConverter,
    cache: Option<MediaCache>,
    retry: RetryPolicy,
    resolver: PathResolver,
    output_dir: PathBuf,
    scratch_parent: PathBuf,
    public_base: String,
    default_timeout_secs: u64,
    frame_rate: u32,
}

impl Orchestrator {
    pub fn new(registry: ProviderRegistry, config: &Config) -> Self {
        let media_root = config.paths.media_root();
        let cache = if config.cache.enabled {
            let dir = config
                .cache
                .dir
                .clone()
                .unwrap_or_else(|| media_root.join("cache"));
            Some(MediaCache::new(dir, config.cache.max_size_mb))
        } else {
            None
        };

        Self {
            registry,
            converter: StillFrameConverter::new(config.pipeline.encoder_bin.clone())
                .with_min_output_bytes(config.pipeline.min_output_bytes),
            cache,
            retry: config.retry.policy(),
            resolver: PathResolver::new(media_root.clone()),
            output_dir: media_root.join(&config.paths.output_dir),
            scratch_parent: media_root.join(&config.paths.scratch_dir),
            public_base: config.paths.public_base.clone(),
            default_timeout_secs: config.pipeline.timeout_seconds,
            frame_rate: config.pipeline.frame_rate,
        }
    }

    /// Run one capability request through to a structured result.
    pub async fn run(&self, request: &CapabilityRequest) -> PipelineResult {
        let request = self.resolve_request(request)?;
        if let Err(failure) = request.validate() {
            log::warn!("rejecting request: {}", failure);
            return Err(PipelineError::from_failure(failure, Vec::new()));
        }

        let run_id = scratch::run_id(&request.seed());
        log::info!(
            "pipeline run {} started for capability '{}'",
            run_id,
            request.capability
        );

        match request.capability {
            Capability::Tts => {
                self.run_provider_chain(&request, &run_id, MediaKind::Audio)
                    .await
            }
            Capability::Image => {
                self.run_provider_chain(&request, &run_id, MediaKind::Image)
                    .await
            }
            Capability::LipsyncVideo => self.run_video(&request, &run_id).await,
        }
    }

    /// Resolve file-based payload paths against the media root before
    /// validation. Escaping relative paths are bad input, not an internal
    /// error.
    fn resolve_request(
        &self,
        request: &CapabilityRequest,
    ) -> Result<CapabilityRequest, PipelineError> {
        let mut resolved = request.clone();
        if let RequestPayload::Media { image, audio } = &request.payload {
            let image = self.resolver.resolve(image).map_err(map_path_error)?;
            let audio = self.resolver.resolve(audio).map_err(map_path_error)?;
            resolved.payload = RequestPayload::Media { image, audio };
        }
        Ok(resolved)
    }

    fn effective_timeout(&self, request: &CapabilityRequest) -> Duration {
        Duration::from_secs(
            request
                .options
                .timeout_seconds
                .unwrap_or(self.default_timeout_secs),
        )
    }

    fn final_path(&self, run_id: &str, kind: MediaKind) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", run_id, kind.extension()))
    }

    fn output(&self, artifact: PipelineArtifact, served_by: &str) -> PipelineOutput {
        let file_name = artifact
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let public_url = format!("{}/{}", self.public_base.trim_end_matches('/'), file_name);
        PipelineOutput {
            artifact,
            served_by: served_by.to_string(),
            public_url,
        }
    }

    /// Try to answer a deterministic request from the cache. Returns
    /// `None` (and logs) on any miss or copy problem so the provider
    /// chain still gets its chance.
    fn serve_cached(
        &self,
        request: &CapabilityRequest,
        run_id: &str,
        kind: MediaKind,
    ) -> Option<PipelineOutput> {
        if !request.options.use_cache {
            return None;
        }
        let cache = self.cache.as_ref()?;
        let fingerprint = request.cache_fingerprint()?;
        let hit = cache.get(request.capability, &fingerprint, kind)?;

        let dest = self.final_path(run_id, kind);
        if let Err(e) = self.resolver.ensure_parent(&dest) {
            log::warn!("cannot stage cached result: {}", e);
            return None;
        }
        if let Err(e) = std::fs::copy(&hit, &dest) {
            log::warn!("failed to copy cached result {:?}: {}", hit, e);
            return None;
        }
        match PipelineArtifact::probe(kind, &dest, "cache") {
            Ok(artifact) => {
                log::info!("run {} served from cache", run_id);
                Some(self.output(artifact, "cache"))
            }
            Err(e) => {
                log::warn!("cached result unusable: {}", e);
                None
            }
        }
    }

    fn store_cached(&self, request: &CapabilityRequest, kind: MediaKind, path: &Path) {
        if !request.options.use_cache {
            return;
        }
        if let (Some(cache), Some(fingerprint)) = (&self.cache, request.cache_fingerprint()) {
            if let Err(e) = cache.store(request.capability, &fingerprint, kind, path) {
                log::warn!("failed to cache result {:?}: {}", path, e);
            }
        }
    }

    /// Walk a network-provider chain (speech, image) in priority order.
    async fn run_provider_chain(
        &self,
        request: &CapabilityRequest,
        run_id: &str,
        kind: MediaKind,
    ) -> PipelineResult {
        if let Some(output) = self.serve_cached(request, run_id, kind) {
            return Ok(output);
        }

        let chain = self.registry.chain(request.capability);
        if chain.is_empty() {
            return Err(PipelineError {
                kind: ErrorKind::Unavailable,
                message: format!(
                    "no providers configured for capability '{}'",
                    request.capability
                ),
                attempts: Vec::new(),
            });
        }

        let dest = self.final_path(run_id, kind);
        self.resolver
            .ensure_parent(&dest)
            .map_err(|e| PipelineError::process(e.to_string()))?;
        // Guards the half-written file a failing chain can leave behind.
        let pending = TempArtifact::track(dest.clone());

        let input = provider_input(request).ok_or_else(|| PipelineError {
            kind: ErrorKind::BadInput,
            message: "file-based payloads take the video path".to_string(),
            attempts: Vec::new(),
        })?;
        let mut attempts: Vec<ProviderAttempt> = Vec::new();

        for provider in chain {
            match invoke_with_retry(provider.as_ref(), &input, &dest, &self.retry).await {
                Ok(()) => match PipelineArtifact::probe(kind, &dest, provider.name()) {
                    Ok(artifact) => {
                        let final_path = pending.release();
                        self.store_cached(request, kind, &final_path);
                        log::info!(
                            "run {} served by provider '{}'",
                            run_id,
                            provider.name()
                        );
                        return Ok(self.output(artifact, provider.name()));
                    }
                    Err(failure) => {
                        log::warn!(
                            "provider '{}' reported success but {}",
                            provider.name(),
                            failure
                        );
                        attempts.push(ProviderAttempt::new(provider.name(), &failure));
                    }
                },
                Err(failure) if failure.kind == FailureKind::BadInput => {
                    // Alternates would choke on the same payload; stop now.
                    log::warn!(
                        "provider '{}' rejected the payload, aborting chain: {}",
                        provider.name(),
                        failure
                    );
                    return Err(PipelineError::from_failure(failure, attempts));
                }
                Err(failure) => {
                    log::warn!(
                        "provider '{}' failed, falling through: {}",
                        provider.name(),
                        failure
                    );
                    attempts.push(ProviderAttempt::new(provider.name(), &failure));
                }
            }
        }

        Err(exhausted(attempts))
    }

    /// Video assembly: baseline still-frame clip, optionally pushed
    /// through the lip-sync renderer chain.
    async fn run_video(&self, request: &CapabilityRequest, run_id: &str) -> PipelineResult {
        let (image, audio) = match &request.payload {
            RequestPayload::Media { image, audio } => (image.clone(), audio.clone()),
            _ => {
                return Err(PipelineError {
                    kind: ErrorKind::BadInput,
                    message: "video assembly needs an image and an audio file".to_string(),
                    attempts: Vec::new(),
                })
            }
        };

        // Everything this run writes before its final artifact lives here
        // and dies with the guard, timeouts included.
        let scratch = ScratchDir::create(&self.scratch_parent, run_id)
            .map_err(|e| PipelineError::process(format!("cannot create scratch dir: {}", e)))?;

        let baseline_path = scratch.file("baseline.mp4");
        let baseline = self
            .converter
            .image_plus_audio_to_video(&image, &audio, None, self.frame_rate, &baseline_path)
            .await
            .map_err(|f| PipelineError::from_failure(f, Vec::new()))?;

        if !request.options.lip_sync {
            let final_path = self.final_path(run_id, MediaKind::Video);
            self.resolver
                .ensure_parent(&final_path)
                .map_err(|e| PipelineError::process(e.to_string()))?;
            let artifact = promote(baseline, &final_path)?;
            log::info!("run {} served by stage '{}'", run_id, convert::STAGE_NAME);
            return Ok(self.output(artifact, convert::STAGE_NAME));
        }

        let chain = self.registry.chain(Capability::LipsyncVideo);
        if chain.is_empty() {
            return Err(PipelineError {
                kind: ErrorKind::Unavailable,
                message: "no lip-sync renderer configured".to_string(),
                attempts: Vec::new(),
            });
        }

        let timeout = self.effective_timeout(request);
        let render_path = scratch.file("render.mp4");
        let input = ProviderInput::Render {
            face: baseline.path(),
            audio: &audio,
            timeout,
        };
        let mut attempts: Vec<ProviderAttempt> = Vec::new();

        for provider in chain {
            match invoke_with_retry(provider.as_ref(), &input, &render_path, &self.retry).await
            {
                Ok(()) => {
                    match PipelineArtifact::probe(MediaKind::Video, &render_path, provider.name())
                    {
                        Ok(rendered) => {
                            let final_path = self.final_path(run_id, MediaKind::Video);
                            self.resolver
                                .ensure_parent(&final_path)
                                .map_err(|e| PipelineError::process(e.to_string()))?;
                            let artifact = promote(rendered, &final_path)?;
                            log::info!(
                                "run {} served by renderer '{}'",
                                run_id,
                                provider.name()
                            );
                            return Ok(self.output(artifact, provider.name()));
                        }
                        Err(failure) => {
                            log::warn!(
                                "renderer '{}' reported success but {}",
                                provider.name(),
                                failure
                            );
                            attempts.push(ProviderAttempt::new(provider.name(), &failure));
                        }
                    }
                }
                Err(failure) if failure.kind == FailureKind::BadInput => {
                    log::warn!(
                        "renderer '{}' rejected the payload, aborting chain: {}",
                        provider.name(),
                        failure
                    );
                    return Err(PipelineError::from_failure(failure, attempts));
                }
                Err(failure) => {
                    log::warn!(
                        "renderer '{}' failed, falling through: {}",
                        provider.name(),
                        failure
                    );
                    attempts.push(ProviderAttempt::new(provider.name(), &failure));
                }
            }
        }

        Err(exhausted(attempts))
    }
}

/// Build the provider input for network capabilities. Media payloads take
/// the renderer path instead, which builds its own `Render` input.
fn provider_input(request: &CapabilityRequest) -> Option<ProviderInput<'_>> {
    match &request.payload {
        RequestPayload::Text(text) => Some(ProviderInput::Text {
            text,
            language: &request.options.language,
            voice_id: request.options.voice_id.as_deref(),
            slow: request.options.slow,
        }),
        RequestPayload::Prompt(prompt) => Some(ProviderInput::Prompt {
            prompt,
            resolution: request.options.resolution,
        }),
        RequestPayload::Media { .. } => None,
    }
}

/// Move a finished artifact from scratch into the output directory.
fn promote(
    artifact: PipelineArtifact,
    final_path: &Path,
) -> Result<PipelineArtifact, PipelineError> {
    let source = artifact.path().to_path_buf();
    if std::fs::rename(&source, final_path).is_err() {
        // Rename fails across filesystems; fall back to copy + remove.
        std::fs::copy(&source, final_path).map_err(|e| {
            PipelineError::process(format!(
                "cannot move artifact {:?} into place: {}",
                source, e
            ))
        })?;
        if let Err(e) = std::fs::remove_file(&source) {
            log::warn!("failed to remove promoted source {:?}: {}", source, e);
        }
    }
    Ok(artifact.relocated(final_path.to_path_buf()))
}

/// Collapse a fully failed chain into the caller-facing error.
///
/// A single-provider chain keeps its distinct failure kind (a lone
/// renderer timeout surfaces as `TimedOut`); longer chains collapse into
/// `AllProvidersExhausted` with the per-provider breakdown.
fn exhausted(attempts: Vec<ProviderAttempt>) -> PipelineError {
    if attempts.len() == 1 {
        let only = &attempts[0];
        return PipelineError {
            kind: only.kind.into(),
            message: format!("provider '{}' failed: {}", only.provider, only.detail),
            attempts,
        };
    }

    let breakdown = attempts
        .iter()
        .map(|a| format!("{} ({})", a.provider, a.kind))
        .collect::<Vec<_>>()
        .join(", ");
    PipelineError {
        kind: ErrorKind::AllProvidersExhausted,
        message: format!("every provider failed: {}", breakdown),
        attempts,
    }
}

fn map_path_error(error: PathError) -> PipelineError {
    let message = error.to_string();
    match error {
        PathError::OutsideRoot { .. } => PipelineError {
            kind: ErrorKind::BadInput,
            message,
            attempts: Vec::new(),
        },
        PathError::CreateDir { .. } => PipelineError::process(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(provider: &str, kind: FailureKind) -> ProviderAttempt {
        ProviderAttempt {
            provider: provider.to_string(),
            kind,
            detail: "detail".to_string(),
        }
    }

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::BadInput.to_string(), "bad input");
        assert_eq!(ErrorKind::TimedOut.to_string(), "timed out");
        assert_eq!(
            ErrorKind::AllProvidersExhausted.to_string(),
            "all providers exhausted"
        );
    }

    #[test]
    fn test_single_attempt_keeps_distinct_kind() {
        let error = exhausted(vec![attempt("wav2lip", FailureKind::TimedOut)]);
        assert_eq!(error.kind, ErrorKind::TimedOut);
        assert!(error.message.contains("wav2lip"));
        assert_eq!(error.attempts.len(), 1);
    }

    #[test]
    fn test_multiple_attempts_collapse_into_exhausted() {
        let error = exhausted(vec![
            attempt("primary", FailureKind::TransientNetwork),
            attempt("secondary", FailureKind::Unavailable),
        ]);
        assert_eq!(error.kind, ErrorKind::AllProvidersExhausted);
        assert!(error.message.contains("primary (transient network error)"));
        assert!(error.message.contains("secondary (unavailable)"));
        assert_eq!(error.attempts.len(), 2);
    }

    #[test]
    fn test_outside_root_maps_to_bad_input() {
        let error = map_path_error(PathError::OutsideRoot {
            path: PathBuf::from("../x"),
            root: PathBuf::from("/srv"),
        });
        assert_eq!(error.kind, ErrorKind::BadInput);
    }

    #[test]
    fn test_pipeline_error_display() {
        let error = PipelineError {
            kind: ErrorKind::Unavailable,
            message: "no providers configured for capability 'tts'".to_string(),
            attempts: Vec::new(),
        };
        assert_eq!(
            error.to_string(),
            "unavailable: no providers configured for capability 'tts'"
        );
    }
}
