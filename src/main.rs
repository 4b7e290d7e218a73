use std::path::PathBuf;

use clap::{Parser, Subcommand};

use clipforge::config::Config;
use clipforge::pipeline::{CapabilityRequest, Orchestrator, RequestOptions};
use clipforge::providers::ProviderRegistry;

/// Parse and validate resolution (WIDTHxHEIGHT format)
fn parse_resolution(s: &str) -> Result<(u32, u32), String> {
    let parts: Vec<&str> = s.split('x').collect();
    if parts.len() != 2 {
        return Err(format!(
            "Invalid resolution format '{}'. Use WIDTHxHEIGHT (e.g., 1024x1024)",
            s
        ));
    }
    let width: u32 = parts[0]
        .parse()
        .map_err(|_| format!("Invalid width '{}' in resolution", parts[0]))?;
    let height: u32 = parts[1]
        .parse()
        .map_err(|_| format!("Invalid height '{}' in resolution", parts[1]))?;
    if width == 0 || height == 0 {
        return Err("Resolution width and height must be greater than 0".to_string());
    }
    Ok((width, height))
}

/// Parse and validate a render timeout in seconds (must be positive)
fn parse_timeout(s: &str) -> Result<u64, String> {
    let secs: u64 = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number of seconds", s))?;
    if secs == 0 {
        return Err("Timeout must be greater than 0 seconds".to_string());
    }
    Ok(secs)
}

/// clipforge: media pipeline for speech, images, and lip-synced video
#[derive(Parser)]
#[command(name = "clipforge")]
#[command(version, about = "Generate speech, images, and lip-synced video via external providers")]
#[command(after_help = "EXAMPLES:
    # Synthesize speech
    clipforge speak \"Hello world\" --language en

    # Generate an image
    clipforge imagine \"a lighthouse at dusk\" --resolution 1024x1024

    # Assemble a still-frame video
    clipforge video --image face.png --audio voice.mp3

    # Lip-synced video with a 60s render deadline
    clipforge video --image face.png --audio voice.mp3 --lip-sync --timeout 60

ENVIRONMENT:
    Provider credentials are read from the env vars named in the config
    file (and from .env). Providers without a credential are skipped.")]
struct Cli {
    /// Path to a config file (default: ~/.config/clipforge/config.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synthesize speech from text
    Speak {
        /// The text to speak
        text: String,
        /// ISO language code
        #[arg(long, default_value = "en")]
        language: String,
        /// Provider-specific voice identifier
        #[arg(long)]
        voice: Option<String>,
        /// Slow down the synthesized speech
        #[arg(long)]
        slow: bool,
        /// Bypass the generated-media cache
        #[arg(long)]
        no_cache: bool,
    },

    /// Generate an image from a text prompt
    Imagine {
        /// The prompt describing the image
        prompt: String,
        /// Target resolution (WIDTHxHEIGHT)
        #[arg(long, value_parser = parse_resolution)]
        resolution: Option<(u32, u32)>,
        /// Bypass the generated-media cache
        #[arg(long)]
        no_cache: bool,
    },

    /// Assemble a video from a still image and an audio track
    Video {
        /// Path to the face/source image
        #[arg(long)]
        image: PathBuf,
        /// Path to the audio track
        #[arg(long)]
        audio: PathBuf,
        /// Run the external lip-sync renderer
        #[arg(long)]
        lip_sync: bool,
        /// Hard deadline for the render, in seconds
        #[arg(long, value_parser = parse_timeout)]
        timeout: Option<u64>,
    },
}

fn build_request(command: Commands) -> CapabilityRequest {
    match command {
        Commands::Speak {
            text,
            language,
            voice,
            slow,
            no_cache,
        } => CapabilityRequest::tts(text).with_options(RequestOptions {
            language,
            voice_id: voice,
            slow,
            use_cache: !no_cache,
            ..RequestOptions::default()
        }),
        Commands::Imagine {
            prompt,
            resolution,
            no_cache,
        } => CapabilityRequest::image(prompt).with_options(RequestOptions {
            resolution,
            use_cache: !no_cache,
            ..RequestOptions::default()
        }),
        Commands::Video {
            image,
            audio,
            lip_sync,
            timeout,
        } => CapabilityRequest::video(image, audio).with_options(RequestOptions {
            lip_sync,
            timeout_seconds: timeout,
            ..RequestOptions::default()
        }),
    }
}

fn run_request(config: Config, request: CapabilityRequest) -> Result<(), String> {
    let registry = ProviderRegistry::from_config(&config);
    let orchestrator = Orchestrator::new(registry, &config);

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to create async runtime: {}", e))?;

    let result = rt.block_on(orchestrator.run(&request));
    match result {
        Ok(output) => {
            println!("Artifact: {}", output.artifact.path().display());
            println!("URL:      {}", output.public_url);
            println!(
                "Served by {} ({} bytes)",
                output.served_by,
                output.artifact.size_bytes()
            );
            Ok(())
        }
        Err(error) => {
            let mut message = error.to_string();
            for attempt in &error.attempts {
                message.push_str(&format!(
                    "\n  {} -> {}: {}",
                    attempt.provider, attempt.kind, attempt.detail
                ));
            }
            Err(message)
        }
    }
}

/// Load .env before anything reads provider credentials.
/// Does not override existing environment variables.
fn load_env() {
    // dotenv::dotenv() returns Err if .env doesn't exist, which is fine
    let _ = dotenv::dotenv();
}

fn main() {
    load_env();

    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    let request = build_request(cli.command);
    if let Err(e) = run_request(config, request) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resolution_valid() {
        assert_eq!(parse_resolution("1024x1024").unwrap(), (1024, 1024));
        assert_eq!(parse_resolution("512x256").unwrap(), (512, 256));
    }

    #[test]
    fn test_parse_resolution_rejects_garbage() {
        assert!(parse_resolution("1024").is_err());
        assert!(parse_resolution("ax b").is_err());
        assert!(parse_resolution("0x100").is_err());
    }

    #[test]
    fn test_parse_timeout_rejects_zero() {
        assert!(parse_timeout("0").is_err());
        assert_eq!(parse_timeout("30").unwrap(), 30);
    }

    #[test]
    fn test_build_speak_request() {
        let request = build_request(Commands::Speak {
            text: "Hello".to_string(),
            language: "fr".to_string(),
            voice: Some("narrator-2".to_string()),
            slow: true,
            no_cache: true,
        });
        assert_eq!(request.options.language, "fr");
        assert_eq!(request.options.voice_id.as_deref(), Some("narrator-2"));
        assert!(request.options.slow);
        assert!(!request.options.use_cache);
    }

    #[test]
    fn test_build_video_request_carries_timeout() {
        let request = build_request(Commands::Video {
            image: PathBuf::from("face.png"),
            audio: PathBuf::from("voice.mp3"),
            lip_sync: true,
            timeout: Some(60),
        });
        assert!(request.options.lip_sync);
        assert_eq!(request.options.timeout_seconds, Some(60));
    }
}
