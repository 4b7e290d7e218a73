//! Configuration file handling for clipforge.
//!
//! Loads configuration from `~/.config/clipforge/config.toml` or a custom
//! path. Provider credentials are environment-sourced (via `.env` in the
//! binary) and are read exactly once, at registry construction; nothing
//! re-reads the environment at call time.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::providers::{ImageStyle, RetryPolicy};

/// Configuration file structure for clipforge.
/// Loaded from ~/.config/clipforge/config.toml (or custom path via --config).
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub tts: Vec<TtsDescriptor>,
    #[serde(default)]
    pub image: Vec<ImageDescriptor>,
    #[serde(default)]
    pub lipsync: Option<LipsyncConfig>,
}

/// Where artifacts live on disk and how they are addressed publicly.
#[derive(Debug, Deserialize)]
pub struct PathsConfig {
    /// Project root all relative paths resolve against.
    #[serde(default)]
    pub media_root: Option<PathBuf>,
    /// Final artifacts, relative to the media root.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    /// Per-run scratch space, relative to the media root.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: String,
    /// URL prefix the surrounding web layer serves output files under.
    #[serde(default = "default_public_base")]
    pub public_base: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            media_root: None,
            output_dir: default_output_dir(),
            scratch_dir: default_scratch_dir(),
            public_base: default_public_base(),
        }
    }
}

impl PathsConfig {
    /// The media root, defaulting to a per-user data directory.
    pub fn media_root(&self) -> PathBuf {
        self.media_root.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("clipforge")
        })
    }
}

/// Per-provider retry tuning.
#[derive(Debug, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff_base: std::time::Duration::from_millis(self.backoff_base_ms),
            backoff_max: std::time::Duration::from_millis(self.backoff_max_ms),
        }
    }
}

/// Pipeline-wide tuning.
#[derive(Debug, Deserialize)]
pub struct PipelineConfig {
    /// Default hard deadline for bounded renders, overridable per request.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Frame rate for baseline still-frame clips.
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    /// Outputs below this size are treated as truncated renders.
    #[serde(default = "default_min_output_bytes")]
    pub min_output_bytes: u64,
    /// Encoder binary used by the still-frame conversion stage.
    #[serde(default = "default_encoder_bin")]
    pub encoder_bin: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            frame_rate: default_frame_rate(),
            min_output_bytes: default_min_output_bytes(),
            encoder_bin: default_encoder_bin(),
        }
    }
}

/// Generated-media cache settings.
#[derive(Debug, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Cache directory; defaults to `<media root>/cache`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_cache_max_size_mb")]
    pub max_size_mb: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            max_size_mb: default_cache_max_size_mb(),
        }
    }
}

/// One speech-synthesis provider descriptor. Static configuration; never
/// mutated at runtime.
#[derive(Debug, Deserialize)]
pub struct TtsDescriptor {
    pub name: String,
    pub base_url: String,
    /// Env var holding the bearer credential; read once at startup.
    pub api_key_env: String,
    #[serde(default)]
    pub voice: Option<String>,
    /// Lower tries first; ties keep file order.
    #[serde(default)]
    pub priority: u32,
}

/// One image-generation provider descriptor.
#[derive(Debug, Deserialize)]
pub struct ImageDescriptor {
    pub name: String,
    pub base_url: String,
    pub api_key_env: String,
    #[serde(default = "default_image_style")]
    pub style: ImageStyle,
    #[serde(default)]
    pub priority: u32,
}

/// Lip-sync renderer descriptor. The executable and checkpoint locations
/// are configuration, never hard-coded.
#[derive(Debug, Deserialize)]
pub struct LipsyncConfig {
    #[serde(default = "default_lipsync_name")]
    pub name: String,
    #[serde(default = "default_renderer_bin")]
    pub renderer_bin: PathBuf,
    #[serde(default = "default_checkpoint")]
    pub checkpoint: PathBuf,
    /// Where to fetch the checkpoint from when missing on disk.
    #[serde(default)]
    pub checkpoint_url: Option<String>,
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    /// Face padding: top, bottom, left, right.
    #[serde(default = "default_pads")]
    pub pads: [i32; 4],
    #[serde(default = "default_min_output_bytes")]
    pub min_output_bytes: u64,
}

fn default_output_dir() -> String {
    "output".to_string()
}

fn default_scratch_dir() -> String {
    "work".to_string()
}

fn default_public_base() -> String {
    "/media".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    8_000
}

fn default_timeout_seconds() -> u64 {
    120
}

fn default_frame_rate() -> u32 {
    25
}

fn default_min_output_bytes() -> u64 {
    1024
}

fn default_encoder_bin() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_cache_max_size_mb() -> u64 {
    512
}

fn default_image_style() -> ImageStyle {
    ImageStyle::Inline
}

fn default_lipsync_name() -> String {
    "wav2lip".to_string()
}

fn default_renderer_bin() -> PathBuf {
    PathBuf::from("wav2lip-infer")
}

fn default_checkpoint() -> PathBuf {
    PathBuf::from("models/wav2lip.pth")
}

fn default_pads() -> [i32; 4] {
    [0, 10, 0, 0]
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a file path.
    /// Returns default config if the file doesn't exist.
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(PathBuf::from).unwrap_or_else(default_path);

        if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io {
                path: path.clone(),
                source: e,
            })?;
            let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.clone(),
                source: e,
            })?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Get the default config file path.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("clipforge").join("config.toml"))
        .unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config/clipforge/config.toml")
        })
}
