//! Lip-sync rendering via an external inference executable.
//!
//! The renderer is a long-running black box with a fixed CLI contract:
//! checkpoint, face clip, audio track, output path, plus frame rate and
//! padding. It is always invoked through the bounded execution wrapper
//! with the request's timeout, and the child is killed when abandoned.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::AsyncWriteExt;

use super::{Capability, Provider, ProviderFailure, ProviderInput};
use crate::config::LipsyncConfig;
use crate::pipeline::artifact::{validate_input, MediaKind};
use crate::pipeline::bounded::{run_with_timeout, BoundedOutcome};

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

/// Subprocess adapter for the external lip-sync renderer.
pub struct LipsyncRenderer {
    name: String,
    program: PathBuf,
    checkpoint: PathBuf,
    checkpoint_url: Option<String>,
    frame_rate: u32,
    pads: [i32; 4],
    min_output_bytes: u64,
}

impl LipsyncRenderer {
    pub fn new(name: String, program: PathBuf, checkpoint: PathBuf) -> Self {
        Self {
            name,
            program,
            checkpoint,
            checkpoint_url: None,
            frame_rate: 25,
            pads: [0, 10, 0, 0],
            min_output_bytes: DEFAULT_MIN_OUTPUT_BYTES,
        }
    }

    pub fn from_config(config: &LipsyncConfig) -> Self {
        Self {
            name: config.name.clone(),
            program: config.renderer_bin.clone(),
            checkpoint: config.checkpoint.clone(),
            checkpoint_url: config.checkpoint_url.clone(),
            frame_rate: config.frame_rate,
            pads: config.pads,
            min_output_bytes: config.min_output_bytes,
        }
    }

    /// The renderer argument list. Pure data; nothing here passes through
    /// a shell.
    fn build_args(&self, face: &Path, audio: &Path, dest: &Path) -> Vec<String> {
        vec![
            "--checkpoint_path".to_string(),
            self.checkpoint.display().to_string(),
            "--face".to_string(),
            face.display().to_string(),
            "--audio".to_string(),
            audio.display().to_string(),
            "--outfile".to_string(),
            dest.display().to_string(),
            "--fps".to_string(),
            self.frame_rate.to_string(),
            "--pads".to_string(),
            self.pads[0].to_string(),
            self.pads[1].to_string(),
            self.pads[2].to_string(),
            self.pads[3].to_string(),
        ]
    }

    /// Download the model checkpoint if it is missing and a source URL is
    /// configured. A checkpoint already on disk is never re-fetched.
    pub async fn ensure_checkpoint(&self) -> Result<(), ProviderFailure> {
        if self.checkpoint.exists() {
            return Ok(());
        }
        let url = self.checkpoint_url.as_ref().ok_or_else(|| {
            ProviderFailure::process_error(format!(
                "renderer checkpoint missing at {} and no download URL configured",
                self.checkpoint.display()
            ))
        })?;

        log::info!(
            "downloading renderer checkpoint from {} to {:?}",
            url,
            self.checkpoint
        );
        if let Some(parent) = self.checkpoint.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ProviderFailure::process_error(e.to_string()))?;
        }

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderFailure::process_error(e.to_string()))?;
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| super::classify_transport_error(&e))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(super::classify_status(status, &body));
        }

        let mut file = tokio::fs::File::create(&self.checkpoint)
            .await
            .map_err(|e| ProviderFailure::process_error(e.to_string()))?;
        let mut stream = response.bytes_stream();

        use futures_util::StreamExt;
        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| super::classify_transport_error(&e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| ProviderFailure::process_error(e.to_string()))?;
        }
        file.flush()
            .await
            .map_err(|e| ProviderFailure::process_error(e.to_string()))?;

        log::info!("renderer checkpoint ready at {:?}", self.checkpoint);
        Ok(())
    }
}

#[async_trait::async_trait]
impl Provider for LipsyncRenderer {
    fn name(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> Capability {
        Capability::LipsyncVideo
    }

    async fn invoke(
        &self,
        input: &ProviderInput<'_>,
        dest: &Path,
    ) -> Result<(), ProviderFailure> {
        let (face, audio, timeout) = match input {
            ProviderInput::Render {
                face,
                audio,
                timeout,
            } => (*face, *audio, *timeout),
            other => {
                return Err(ProviderFailure::bad_input(format!(
                    "lip-sync renderer got a non-render payload: {:?}",
                    other
                )))
            }
        };

        validate_input(MediaKind::Video, face)?;
        validate_input(MediaKind::Audio, audio)?;
        self.ensure_checkpoint().await?;

        let program = self.program.clone();
        let args = self.build_args(face, audio, dest);
        log::info!(
            "spawning lip-sync renderer '{}' (deadline {:?})",
            self.name,
            timeout
        );

        let outcome = run_with_timeout(&self.name, timeout, async move {
            tokio::process::Command::new(&program)
                .args(&args)
                // A worker abandoned on timeout must not leave an orphaned
                // renderer chewing GPU/CPU behind it.
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| {
                    ProviderFailure::process_error(format!(
                        "failed to spawn {}: {}",
                        program.display(),
                        e
                    ))
                })
        })
        .await;

        let output = match outcome {
            BoundedOutcome::Completed(output) => output,
            BoundedOutcome::Failed(failure) => return Err(failure),
            BoundedOutcome::TimedOut => {
                return Err(ProviderFailure::timed_out(format!(
                    "renderer '{}' exceeded its {:?} deadline",
                    self.name, timeout
                )))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProviderFailure::process_error(format!(
                "renderer '{}' exited with {}: {}",
                self.name,
                output.status,
                stderr_tail(&stderr)
            )));
        }

        let rendered = std::fs::metadata(dest).map_err(|e| {
            ProviderFailure::process_error(format!(
                "renderer '{}' reported success but wrote nothing at {}: {}",
                self.name,
                dest.display(),
                e
            ))
        })?;
        if rendered.len() < self.min_output_bytes {
            return Err(ProviderFailure::process_error(format!(
                "renderer output at {} is {} bytes, below the {} byte floor",
                dest.display(),
                rendered.len(),
                self.min_output_bytes
            )));
        }

        log::info!(
            "lip-sync render from '{}' written to {:?} ({} bytes)",
            self.name,
            dest,
            rendered.len()
        );
        Ok(())
    }
}
