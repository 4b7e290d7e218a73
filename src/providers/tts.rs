//! HTTP speech-synthesis provider.

use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use tokio::io::AsyncWriteExt;

use super::{
    classify_status, classify_transport_error, Capability, Provider, ProviderFailure,
    ProviderInput,
};

/// Default timeout for HTTP requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default connection timeout (10 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Request body for speech synthesis.
#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    language: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice: Option<&'a str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    slow: bool,
}

/// Speech synthesis over a bearer-authenticated HTTP endpoint.
///
/// A 2xx response with an `audio/*` content-type is success; the body is
/// streamed to the destination file without buffering it in memory.
pub struct SpeechProvider {
    name: String,
    base_url: String,
    api_key: String,
    voice: Option<String>,
    http_client: reqwest::Client,
}

impl SpeechProvider {
    pub fn new(name: String, base_url: String, api_key: String, voice: Option<String>) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            name,
            base_url,
            api_key,
            voice,
            http_client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait::async_trait]
impl Provider for SpeechProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> Capability {
        Capability::Tts
    }

    async fn invoke(
        &self,
        input: &ProviderInput<'_>,
        dest: &Path,
    ) -> Result<(), ProviderFailure> {
        let (text, language, voice_id, slow) = match input {
            ProviderInput::Text {
                text,
                language,
                voice_id,
                slow,
            } => (*text, *language, *voice_id, *slow),
            other => {
                return Err(ProviderFailure::bad_input(format!(
                    "speech provider got a non-text payload: {:?}",
                    other
                )))
            }
        };

        let body = SpeechRequest {
            text,
            language,
            voice: voice_id.or(self.voice.as_deref()),
            slow,
        };

        log::info!("requesting speech synthesis from '{}'", self.name);
        let response = self
            .http_client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(classify_status(status, &error_text));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.starts_with("audio") {
            return Err(ProviderFailure::unavailable(format!(
                "'{}' returned a non-audio response ({})",
                self.name, content_type
            )));
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ProviderFailure::process_error(e.to_string()))?;
        }

        // Stream the body to disk rather than buffering the whole clip.
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| ProviderFailure::process_error(e.to_string()))?;
        let mut stream = response.bytes_stream();

        use futures_util::StreamExt;
        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| classify_transport_error(&e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| ProviderFailure::process_error(e.to_string()))?;
        }
        file.flush()
            .await
            .map_err(|e| ProviderFailure::process_error(e.to_string()))?;

        log::info!("speech synthesis from '{}' written to {:?}", self.name, dest);
        Ok(())
    }
}
