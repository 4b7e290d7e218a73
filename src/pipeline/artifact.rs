//! Media artifacts produced and consumed by pipeline stages.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::providers::ProviderFailure;

/// Recognized audio file extensions for input validation.
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "ogg", "flac"];

/// Recognized image file extensions for input validation.
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp"];

/// Recognized video file extensions for input validation.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "webm", "mkv", "avi"];

/// The media kind of a pipeline artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Image,
    Video,
}

impl MediaKind {
    /// Canonical extension for artifacts the pipeline itself produces.
    pub fn extension(&self) -> &'static str {
        match self {
            MediaKind::Audio => "mp3",
            MediaKind::Image => "png",
            MediaKind::Video => "mp4",
        }
    }

    /// Whether a path's extension is plausible for this kind.
    pub fn matches_path(&self, path: &Path) -> bool {
        let ext = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => ext.to_lowercase(),
            None => return false,
        };
        let known = match self {
            MediaKind::Audio => AUDIO_EXTENSIONS,
            MediaKind::Image => IMAGE_EXTENSIONS,
            MediaKind::Video => VIDEO_EXTENSIONS,
        };
        known.contains(&ext.as_str())
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Image => write!(f, "image"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// A media file produced by one pipeline stage.
///
/// Owned by the pipeline run that created it until it is handed to the
/// caller (finals) or removed by the lifecycle manager (intermediates).
#[derive(Debug, Clone)]
pub struct PipelineArtifact {
    kind: MediaKind,
    path: PathBuf,
    size_bytes: u64,
    created_at: SystemTime,
    stage: String,
}

impl PipelineArtifact {
    /// Probe a freshly produced file into an artifact.
    ///
    /// # Errors
    ///
    /// Returns a `ProcessError` failure if the file is missing or empty;
    /// a stage that reported success but produced nothing is a broken
    /// external tool, not bad input.
    pub fn probe(
        kind: MediaKind,
        path: &Path,
        stage: impl Into<String>,
    ) -> Result<Self, ProviderFailure> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            ProviderFailure::process_error(format!(
                "stage output missing at {}: {}",
                path.display(),
                e
            ))
        })?;
        if metadata.len() == 0 {
            return Err(ProviderFailure::process_error(format!(
                "stage output at {} is empty",
                path.display()
            )));
        }

        Ok(Self {
            kind,
            path: path.to_path_buf(),
            size_bytes: metadata.len(),
            created_at: metadata.created().unwrap_or_else(|_| SystemTime::now()),
            stage: stage.into(),
        })
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Name of the stage that produced this artifact.
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Rebind the artifact to a new location after a rename.
    pub(crate) fn relocated(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }
}

/// Validate a caller-supplied input file before any external call is made.
///
/// # Errors
///
/// Returns a `BadInput` failure if the file is missing, empty, or its
/// extension does not match the expected media kind.
pub fn validate_input(kind: MediaKind, path: &Path) -> Result<(), ProviderFailure> {
    let metadata = std::fs::metadata(path).map_err(|_| {
        ProviderFailure::bad_input(format!("{} file not found: {}", kind, path.display()))
    })?;
    if !metadata.is_file() {
        return Err(ProviderFailure::bad_input(format!(
            "{} path is not a file: {}",
            kind,
            path.display()
        )));
    }
    if metadata.len() == 0 {
        return Err(ProviderFailure::bad_input(format!(
            "{} file is empty: {}",
            kind,
            path.display()
        )));
    }
    if !kind.matches_path(path) {
        return Err(ProviderFailure::bad_input(format!(
            "{} has an unrecognized {} extension",
            path.display(),
            kind
        )));
    }
    Ok(())
}
