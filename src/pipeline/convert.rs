//! Still-image + audio to baseline video conversion.
//!
//! Produces a clip that shows the image on every frame, muxed with the
//! audio track. Used both as the non-lip-sync video path and to coerce an
//! image into the video input the lip-sync renderer requires.

use std::path::{Path, PathBuf};

use super::artifact::{validate_input, MediaKind, PipelineArtifact};
use crate::providers::ProviderFailure;

/// Stage name used for artifact attribution.
pub const STAGE_NAME: &str = "still-frame";

/// Renders below this size are treated as truncated.
const DEFAULT_MIN_OUTPUT_BYTES: u64 = 1024;

/// How much trailing stderr to keep in a process failure detail.
const STDERR_TAIL: usize = 400;

/// Last `STDERR_TAIL` bytes of stderr, snapped to a char boundary.
fn stderr_tail(stderr: &str) -> &str {
    let mut start = stderr.len().saturating_sub(STDERR_TAIL);
    while start < stderr.len() && !stderr.is_char_boundary(start) {
        start += 1;
    }
    &stderr[start..]
}

/// Converts a still image plus an audio track into a baseline video via an
/// external ffmpeg-style encoder, invoked with a structured argument list.
pub struct StillFrameConverter {
    program: PathBuf,
    min_output_bytes: u64,
}

impl StillFrameConverter {
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            min_output_bytes: DEFAULT_MIN_OUTPUT_BYTES,
        }
    }

    pub fn with_min_output_bytes(mut self, floor: u64) -> Self {
        self.min_output_bytes = floor;
        self
    }

    /// The encoder argument list. Pure data; nothing here passes through a
    /// shell.
    fn build_args(
        image: &Path,
        audio: &Path,
        duration_secs: Option<f64>,
        frame_rate: u32,
        dest: &Path,
    ) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-loop".to_string(),
            "1".to_string(),
            "-framerate".to_string(),
            frame_rate.to_string(),
            "-i".to_string(),
            image.display().to_string(),
            "-i".to_string(),
            audio.display().to_string(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-tune".to_string(),
            "stillimage".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-shortest".to_string(),
        ];
        if let Some(duration) = duration_secs {
            args.push("-t".to_string());
            args.push(format!("{:.3}", duration));
        }
        args.push(dest.display().to_string());
        args
    }

    /// Render the baseline clip to `dest`.
    ///
    /// Both inputs are validated before the encoder is spawned; a bad
    /// input never costs a subprocess. When `duration_secs` is `None` the
    /// clip ends with the audio track.
    ///
    /// # Errors
    ///
    /// `BadInput` for invalid inputs; `ProcessError` when the encoder
    /// cannot be spawned, exits non-zero, or produces a truncated file.
    pub async fn image_plus_audio_to_video(
        &self,
        image: &Path,
        audio: &Path,
        duration_secs: Option<f64>,
        frame_rate: u32,
        dest: &Path,
    ) -> Result<PipelineArtifact, ProviderFailure> {
        validate_input(MediaKind::Image, image)?;
        validate_input(MediaKind::Audio, audio)?;

        let args = Self::build_args(image, audio, duration_secs, frame_rate, dest);
        log::info!(
            "rendering baseline clip: {} -> {:?}",
            self.program.display(),
            dest
        );

        let output = tokio::process::Command::new(&self.program)
            .args(&args)
            .output()
            .await
            .map_err(|e| {
                ProviderFailure::process_error(format!(
                    "failed to spawn {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProviderFailure::process_error(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr_tail(&stderr)
            )));
        }

        let artifact = PipelineArtifact::probe(MediaKind::Video, dest, STAGE_NAME)?;
        if artifact.size_bytes() < self.min_output_bytes {
            return Err(ProviderFailure::process_error(format!(
                "render at {} is {} bytes, below the {} byte floor; treating as truncated",
                dest.display(),
                artifact.size_bytes(),
                self.min_output_bytes
            )));
        }

        log::info!(
            "baseline clip ready at {:?} ({} bytes)",
            dest,
            artifact.size_bytes()
        );
        Ok(artifact)
    }
}
