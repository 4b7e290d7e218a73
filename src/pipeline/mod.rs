//! The media pipeline: request types, stages, and the fallback
//! orchestrator that wires them together.

pub mod artifact;
pub mod bounded;
pub mod cache;
pub mod convert;
pub mod orchestrator;
pub mod scratch;

pub use artifact::{MediaKind, PipelineArtifact};
pub use bounded::{run_with_timeout, BoundedOutcome, RunState};
pub use cache::MediaCache;
pub use convert::StillFrameConverter;
pub use orchestrator::{
    ErrorKind, Orchestrator, PipelineError, PipelineOutput, PipelineResult, ProviderAttempt,
};
pub use scratch::{with_scoped_artifact, ScratchDir, TempArtifact};

use std::path::PathBuf;

use crate::providers::{Capability, ProviderFailure};

/// The payload of one capability request.
#[derive(Debug, Clone)]
pub enum RequestPayload {
    /// Text to speak.
    Text(String),
    /// Prompt to render an image from.
    Prompt(String),
    /// Source files for video assembly.
    Media { image: PathBuf, audio: PathBuf },
}

/// Recognized per-request options. Anything not set falls back to config.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// ISO language code for speech synthesis.
    pub language: String,
    /// Provider-specific voice identifier.
    pub voice_id: Option<String>,
    /// Target image resolution.
    pub resolution: Option<(u32, u32)>,
    /// Whether video assembly should run the lip-sync renderer.
    pub lip_sync: bool,
    /// Slow down synthesized speech.
    pub slow: bool,
    /// Hard deadline for bounded renders; must be positive when given.
    pub timeout_seconds: Option<u64>,
    /// Whether the generated-media cache may answer this request.
    pub use_cache: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            voice_id: None,
            resolution: None,
            lip_sync: false,
            slow: false,
            timeout_seconds: None,
            use_cache: true,
        }
    }
}

/// One inbound capability request. Immutable once dispatched.
#[derive(Debug, Clone)]
pub struct CapabilityRequest {
    pub capability: Capability,
    pub payload: RequestPayload,
    pub options: RequestOptions,
}

impl CapabilityRequest {
    pub fn tts(text: impl Into<String>) -> Self {
        Self {
            capability: Capability::Tts,
            payload: RequestPayload::Text(text.into()),
            options: RequestOptions::default(),
        }
    }

    pub fn image(prompt: impl Into<String>) -> Self {
        Self {
            capability: Capability::Image,
            payload: RequestPayload::Prompt(prompt.into()),
            options: RequestOptions::default(),
        }
    }

    pub fn video(image: PathBuf, audio: PathBuf) -> Self {
        Self {
            capability: Capability::LipsyncVideo,
            payload: RequestPayload::Media { image, audio },
            options: RequestOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// Validate the request before any provider is involved.
    ///
    /// # Errors
    ///
    /// Returns a `BadInput` failure for empty payloads, payloads that do
    /// not fit the capability, missing/empty/mistyped input files, or a
    /// zero timeout.
    pub fn validate(&self) -> Result<(), ProviderFailure> {
        if self.options.timeout_seconds == Some(0) {
            return Err(ProviderFailure::bad_input(
                "timeout_seconds must be positive",
            ));
        }

        match (self.capability, &self.payload) {
            (Capability::Tts, RequestPayload::Text(text)) => {
                if text.trim().is_empty() {
                    return Err(ProviderFailure::bad_input("no text provided"));
                }
            }
            (Capability::Image, RequestPayload::Prompt(prompt)) => {
                if prompt.trim().is_empty() {
                    return Err(ProviderFailure::bad_input("no prompt provided"));
                }
            }
            (Capability::LipsyncVideo, RequestPayload::Media { image, audio }) => {
                artifact::validate_input(MediaKind::Image, image)?;
                artifact::validate_input(MediaKind::Audio, audio)?;
            }
            (capability, payload) => {
                return Err(ProviderFailure::bad_input(format!(
                    "payload {:?} does not fit capability '{}'",
                    payload, capability
                )));
            }
        }
        Ok(())
    }

    /// Cache fingerprint for deterministic capabilities; `None` for
    /// file-based payloads, which are not cached.
    pub fn cache_fingerprint(&self) -> Option<String> {
        match &self.payload {
            RequestPayload::Text(text) => Some(format!(
                "{}|{}|{}|{}",
                text,
                self.options.language,
                self.options.voice_id.as_deref().unwrap_or(""),
                self.options.slow
            )),
            RequestPayload::Prompt(prompt) => Some(format!(
                "{}|{}",
                prompt,
                self.options
                    .resolution
                    .map(|(w, h)| format!("{}x{}", w, h))
                    .unwrap_or_default()
            )),
            RequestPayload::Media { .. } => None,
        }
    }

    /// Opaque bytes seeding this request's run id.
    pub(crate) fn seed(&self) -> Vec<u8> {
        match &self.payload {
            RequestPayload::Text(text) => text.as_bytes().to_vec(),
            RequestPayload::Prompt(prompt) => prompt.as_bytes().to_vec(),
            RequestPayload::Media { image, audio } => {
                let mut seed = image.display().to_string().into_bytes();
                seed.extend_from_slice(audio.display().to_string().as_bytes());
                seed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::FailureKind;

    #[test]
    fn test_empty_text_is_bad_input() {
        let request = CapabilityRequest::tts("   ");
        let result = request.validate();
        match result {
            Err(failure) => assert_eq!(failure.kind, FailureKind::BadInput),
            Ok(_) => panic!("expected BadInput"),
        }
    }

    #[test]
    fn test_empty_prompt_is_bad_input() {
        let request = CapabilityRequest::image("");
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_missing_media_files_are_bad_input() {
        let request = CapabilityRequest::video(
            PathBuf::from("/nonexistent/face.png"),
            PathBuf::from("/nonexistent/voice.mp3"),
        );
        let result = request.validate();
        match result {
            Err(failure) => assert_eq!(failure.kind, FailureKind::BadInput),
            Ok(_) => panic!("expected BadInput"),
        }
    }

    #[test]
    fn test_zero_timeout_is_bad_input() {
        let mut request = CapabilityRequest::tts("hello");
        request.options.timeout_seconds = Some(0);
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_mismatched_payload_is_bad_input() {
        let request = CapabilityRequest {
            capability: Capability::Tts,
            payload: RequestPayload::Prompt("a cat".to_string()),
            options: RequestOptions::default(),
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_valid_tts_request_passes() {
        let request = CapabilityRequest::tts("Hello world");
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_cache_fingerprint_tracks_options() {
        let mut a = CapabilityRequest::tts("hello");
        let b = CapabilityRequest::tts("hello");
        assert_eq!(a.cache_fingerprint(), b.cache_fingerprint());

        a.options.language = "fr".to_string();
        assert_ne!(a.cache_fingerprint(), b.cache_fingerprint());
    }

    #[test]
    fn test_media_payload_has_no_fingerprint() {
        let request = CapabilityRequest::video(
            PathBuf::from("face.png"),
            PathBuf::from("voice.mp3"),
        );
        assert!(request.cache_fingerprint().is_none());
    }
}
