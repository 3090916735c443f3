//! Image generation and resizing.
//!
//! Generation posts to the images endpoint and returns the payload as a
//! PNG data URI. The endpoint rate-limits aggressively, so HTTP 429 is
//! retried with exponential backoff before surfacing as
//! [`CollabError::RateLimited`]. Resizing is done locally: decode the data
//! URI, exact-resize, re-encode as PNG.

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use quill_core::collab::{CollabError, GeneratedImage, ImageModel, ImageRequest};

use crate::OPENAI_API_BASE;

const RATE_LIMIT_ATTEMPTS: u32 = 4;
const BACKOFF_BASE: Duration = Duration::from_secs(1);

const PNG_URI_PREFIX: &str = "data:image/png;base64,";

/// Image model backed by the image generations endpoint.
#[derive(Clone)]
pub struct ImagesClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl ImagesClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: OPENAI_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn try_generate(&self, request: &ImageRequest) -> Result<GeneratedImage, CollabError> {
        let body = ImagesRequest {
            model: &request.model,
            prompt: &request.prompt,
            n: 1,
            response_format: "b64_json",
        };

        let response = self
            .http
            .post(format!("{}/images/generations", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CollabError::Http(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CollabError::RateLimited);
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CollabError::Http(format!("HTTP {status}: {detail}")));
        }

        let reply: ImagesResponse = response
            .json()
            .await
            .map_err(|e| CollabError::Malformed(e.to_string()))?;
        let payload = reply
            .data
            .into_iter()
            .next()
            .ok_or_else(|| CollabError::Malformed("reply carried no images".into()))?;

        Ok(GeneratedImage {
            data_uri: format!("{PNG_URI_PREFIX}{}", payload.b64_json),
            cost: None,
        })
    }
}

#[async_trait]
impl ImageModel for ImagesClient {
    async fn generate(&self, request: &ImageRequest) -> Result<GeneratedImage, CollabError> {
        let mut delay = BACKOFF_BASE;
        for attempt in 1..=RATE_LIMIT_ATTEMPTS {
            match self.try_generate(request).await {
                Err(CollabError::RateLimited) if attempt < RATE_LIMIT_ATTEMPTS => {
                    tracing::warn!(attempt, ?delay, "image endpoint rate limited, backing off");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                other => return other,
            }
        }
        Err(CollabError::RateLimited)
    }

    async fn resize(
        &self,
        data_uri: &str,
        width: u32,
        height: u32,
    ) -> Result<String, CollabError> {
        resize_data_uri(data_uri, width, height)
    }
}

/// Decode a base64 image data URI, exact-resize, re-encode as a PNG URI.
pub fn resize_data_uri(data_uri: &str, width: u32, height: u32) -> Result<String, CollabError> {
    let encoded = data_uri
        .split_once(";base64,")
        .map(|(_, rest)| rest)
        .ok_or_else(|| CollabError::Malformed("not a base64 image data uri".into()))?;
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| CollabError::Malformed(format!("image payload does not decode: {e}")))?;
    let decoded = image::load_from_memory(&bytes)
        .map_err(|e| CollabError::Malformed(format!("image payload does not parse: {e}")))?;

    let resized = decoded.resize_exact(width, height, image::imageops::FilterType::Lanczos3);
    let mut out = Cursor::new(Vec::new());
    resized
        .write_to(&mut out, image::ImageFormat::Png)
        .map_err(|e| CollabError::Execution(format!("png encoding failed: {e}")))?;

    Ok(format!("{PNG_URI_PREFIX}{}", BASE64.encode(out.into_inner())))
}

// ---- wire format ----

#[derive(Serialize)]
struct ImagesRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    response_format: &'static str,
}

#[derive(Deserialize)]
struct ImagesResponse {
    data: Vec<ImagePayload>,
}

#[derive(Deserialize)]
struct ImagePayload {
    b64_json: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker_uri(width: u32, height: u32) -> String {
        let img = image::RgbaImage::from_fn(width, height, |x, y| {
            if (x + y) % 2 == 0 {
                image::Rgba([255, 255, 255, 255])
            } else {
                image::Rgba([0, 0, 0, 255])
            }
        });
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        format!("{PNG_URI_PREFIX}{}", BASE64.encode(out.into_inner()))
    }

    #[test]
    fn test_resize_produces_exact_dimensions() {
        let uri = checker_uri(4, 4);
        let resized = resize_data_uri(&uri, 2, 3).unwrap();
        assert!(resized.starts_with(PNG_URI_PREFIX));

        let bytes = BASE64
            .decode(resized.strip_prefix(PNG_URI_PREFIX).unwrap())
            .unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.width(), 2);
        assert_eq!(decoded.height(), 3);
    }

    #[test]
    fn test_resize_rejects_non_data_uris() {
        assert!(matches!(
            resize_data_uri("https://example.com/a.png", 1, 1),
            Err(CollabError::Malformed(_))
        ));
        assert!(matches!(
            resize_data_uri("data:image/png;base64,@@@", 1, 1),
            Err(CollabError::Malformed(_))
        ));
    }
}
