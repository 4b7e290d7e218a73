//! HTTP image-generation providers.
//!
//! Two response conventions exist among hosted image endpoints: *inline*
//! endpoints answer with the image bytes directly, *linked* endpoints
//! answer with JSON carrying a result URL that must then be downloaded.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use super::{
    classify_status, classify_transport_error, Capability, Provider, ProviderFailure,
    ProviderInput,
};

/// Default timeout for HTTP requests (60 seconds; image models are slow).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default connection timeout (10 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Which response convention an image endpoint follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageStyle {
    /// Response body is the image bytes.
    Inline,
    /// Response is JSON with a URL to the generated image.
    Linked,
}

/// Request body for inline-style endpoints.
#[derive(Debug, Serialize)]
struct InlineRequest<'a> {
    inputs: &'a str,
}

/// Request body for linked-style endpoints.
#[derive(Debug, Serialize)]
struct LinkedRequest<'a> {
    prompt: &'a str,
    n: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<String>,
}

/// Response from linked-style endpoints.
#[derive(Debug, Deserialize)]
struct LinkedResponse {
    data: Vec<LinkedImage>,
}

#[derive(Debug, Deserialize)]
struct LinkedImage {
    url: String,
}

/// Image generation over a bearer-authenticated HTTP endpoint.
pub struct ImageProvider {
    name: String,
    base_url: String,
    api_key: String,
    style: ImageStyle,
    http_client: reqwest::Client,
}

impl ImageProvider {
    pub fn new(name: String, base_url: String, api_key: String, style: ImageStyle) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            name,
            base_url,
            api_key,
            style,
            http_client,
        }
    }

    pub fn style(&self) -> ImageStyle {
        self.style
    }

    async fn generate_inline(
        &self,
        prompt: &str,
        dest: &Path,
    ) -> Result<(), ProviderFailure> {
        let response = self
            .http_client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&InlineRequest { inputs: prompt })
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
        if !content_type.starts_with("image") {
            return Err(ProviderFailure::unavailable(format!(
                "'{}' returned a non-image response ({})",
                self.name, content_type
            )));
        }

        write_stream(response, dest).await
    }

    async fn generate_linked(
        &self,
        prompt: &str,
        resolution: Option<(u32, u32)>,
        dest: &Path,
    ) -> Result<(), ProviderFailure> {
        let body = LinkedRequest {
            prompt,
            n: 1,
            size: resolution.map(|(w, h)| format!("{}x{}", w, h)),
        };

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

        let parsed: LinkedResponse = response
            .json()
            .await
            .map_err(|e| ProviderFailure::unavailable(format!("malformed response: {}", e)))?;
        let image_url = parsed
            .data
            .first()
            .map(|img| img.url.clone())
            .ok_or_else(|| {
                ProviderFailure::unavailable(format!("'{}' returned no images", self.name))
            })?;

        log::debug!("downloading generated image from {}", image_url);
        let download = self
            .http_client
            .get(&image_url)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        if !download.status().is_success() {
            let status = download.status();
            let error_text = download
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(classify_status(status, &error_text));
        }

        write_stream(download, dest).await
    }
}

/// Stream a response body to disk, creating parent directories first.
async fn write_stream(response: reqwest::Response, dest: &Path) -> Result<(), ProviderFailure> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ProviderFailure::process_error(e.to_string()))?;
    }

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
    Ok(())
}

#[async_trait::async_trait]
impl Provider for ImageProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> Capability {
        Capability::Image
    }

    async fn invoke(
        &self,
        input: &ProviderInput<'_>,
        dest: &Path,
    ) -> Result<(), ProviderFailure> {
        let (prompt, resolution) = match input {
            ProviderInput::Prompt { prompt, resolution } => (*prompt, *resolution),
            other => {
                return Err(ProviderFailure::bad_input(format!(
                    "image provider got a non-prompt payload: {:?}",
                    other
                )))
            }
        };

        log::info!("requesting image generation from '{}'", self.name);
        match self.style {
            ImageStyle::Inline => self.generate_inline(prompt, dest).await,
            ImageStyle::Linked => self.generate_linked(prompt, resolution, dest).await,
        }?;

        log::info!("image from '{}' written to {:?}", self.name, dest);
        Ok(())
    }
}
