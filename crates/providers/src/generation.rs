//! The image generation collaborator.

use std::fmt;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use fanout_core::retry::{is_retryable_status, is_transient_message};
use serde::{Deserialize, Serialize};

/// One generation call: a single image for a single model.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub model_id: String,
    pub width: u32,
    pub height: u32,
    pub reference_image_url: Option<String>,
}

/// An image as returned by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum GeneratedImage {
    /// Provider-hosted result, to be downloaded.
    Url { url: String },
    /// Inline payload, optionally with a `data:<mime>;base64,` prefix.
    Base64 { b64_json: String },
}

impl GeneratedImage {
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url { url: url.into() }
    }

    pub fn base64(data: impl Into<String>) -> Self {
        Self::Base64 {
            b64_json: data.into(),
        }
    }
}

/// Decoded inline image bytes plus the MIME type when the payload named one.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Decode a base64 payload, accepting an optional data-URL prefix.
pub fn decode_base64_image(data: &str) -> Result<DecodedImage, base64::DecodeError> {
    let (content_type, payload) = match data.strip_prefix("data:") {
        Some(rest) => match rest.split_once(',') {
            Some((meta, payload)) => (
                meta.trim_end_matches(";base64").to_string(),
                payload,
            ),
            None => ("image/png".to_string(), rest),
        },
        None => ("image/png".to_string(), data),
    };
    let bytes = STANDARD.decode(payload.trim())?;
    Ok(DecodedImage {
        bytes,
        content_type,
    })
}

/// A successful provider response.
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    pub images: Vec<GeneratedImage>,
    /// Model that actually served the request.
    pub model_id: String,
}

/// Failure reported by a provider or the transport in front of it.
#[derive(Debug, Clone)]
pub struct ProviderError {
    /// HTTP status, when the failure came with one.
    pub status: Option<u16>,
    pub message: String,
}

impl ProviderError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Transient failures are worth another call: 429/5xx statuses, or
    /// connection-reset and timeout messages.
    pub fn is_retryable(&self) -> bool {
        self.status.is_some_and(is_retryable_status) || is_transient_message(&self.message)
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(code) => write!(f, "provider error ({code}): {}", self.message),
            None => write!(f, "provider error: {}", self.message),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        let message = if e.is_timeout() {
            format!("request timed out: {e}")
        } else {
            e.to_string()
        };
        Self {
            status: e.status().map(|s| s.as_u16()),
            message,
        }
    }
}

/// Text-to-image provider.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest)
        -> Result<GenerationOutput, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_by_status_or_message() {
        assert!(ProviderError::new(Some(503), "unavailable").is_retryable());
        assert!(ProviderError::new(Some(429), "slow down").is_retryable());
        assert!(!ProviderError::new(Some(400), "bad prompt").is_retryable());
        assert!(ProviderError::new(None, "socket hang up").is_retryable());
        assert!(!ProviderError::new(None, "content policy").is_retryable());
    }

    #[test]
    fn display_includes_status() {
        assert_eq!(
            ProviderError::new(Some(500), "boom").to_string(),
            "provider error (500): boom"
        );
        assert_eq!(ProviderError::new(None, "boom").to_string(), "provider error: boom");
    }

    #[test]
    fn decodes_plain_and_data_url_payloads() {
        let plain = decode_base64_image("aGVsbG8=").unwrap();
        assert_eq!(plain.bytes, b"hello");
        assert_eq!(plain.content_type, "image/png");

        let data_url = decode_base64_image("data:image/webp;base64,aGVsbG8=").unwrap();
        assert_eq!(data_url.bytes, b"hello");
        assert_eq!(data_url.content_type, "image/webp");

        assert!(decode_base64_image("***").is_err());
    }

    #[test]
    fn images_deserialize_from_either_shape() {
        let images: Vec<GeneratedImage> = serde_json::from_value(serde_json::json!([
            {"url": "https://cdn.example/a.png"},
            {"b64_json": "aGVsbG8="}
        ]))
        .unwrap();
        assert_eq!(images[0], GeneratedImage::url("https://cdn.example/a.png"));
        assert_eq!(images[1], GeneratedImage::base64("aGVsbG8="));
    }
}
