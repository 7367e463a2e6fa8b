//! Generic HTTP generation provider.
//!
//! Each provider is reached at `POST {base_url}/generate` with a bearer key
//! and a JSON body `{prompt, model, width, height, reference_image_url}`. The
//! response is `{model?, images: [{url} | {b64_json}]}`. Provider-specific
//! payload shapes are expected to sit behind a gateway speaking this format.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use fanout_core::pricing::{known_providers, provider_for_model};
use serde::Deserialize;

use crate::generation::{
    GeneratedImage, GenerationOutput, GenerationRequest, ImageGenerator, ProviderError,
};

/// Transport-level ceiling; the engine applies its own, usually shorter,
/// per-call timeout on top.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// Key used for models whose provider is unknown or unconfigured.
const DEFAULT_PROVIDER: &str = "default";

/// One provider endpoint.
#[derive(Debug, Clone)]
pub struct ProviderEndpoint {
    pub base_url: String,
    pub api_key: Option<String>,
}

/// Provider endpoints keyed by provider name.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    pub endpoints: HashMap<String, ProviderEndpoint>,
}

impl ProviderConfig {
    /// Load configuration from environment variables.
    ///
    /// For every provider in the rate table (and for `default`):
    ///
    /// | Variable                  | Required | Default |
    /// |---------------------------|----------|---------|
    /// | `PROVIDER_<NAME>_URL`     | no       | none    |
    /// | `PROVIDER_<NAME>_API_KEY` | no       | none    |
    ///
    /// `<NAME>` is the upper-cased provider name, e.g. `PROVIDER_OPENAI_URL`.
    /// A provider without a URL falls back to `PROVIDER_DEFAULT_URL`.
    pub fn from_env() -> Self {
        let mut endpoints = HashMap::new();
        for name in known_providers().into_iter().chain([DEFAULT_PROVIDER]) {
            let upper = name.to_ascii_uppercase();
            if let Ok(base_url) = std::env::var(format!("PROVIDER_{upper}_URL")) {
                endpoints.insert(
                    name.to_string(),
                    ProviderEndpoint {
                        base_url,
                        api_key: std::env::var(format!("PROVIDER_{upper}_API_KEY")).ok(),
                    },
                );
            }
        }
        Self { endpoints }
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Endpoint serving `model_id`.
    pub fn endpoint_for(&self, model_id: &str) -> Option<&ProviderEndpoint> {
        provider_for_model(model_id)
            .and_then(|p| self.endpoints.get(p))
            .or_else(|| self.endpoints.get(DEFAULT_PROVIDER))
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    model: Option<String>,
    #[serde(default)]
    images: Vec<GeneratedImage>,
}

/// [`ImageGenerator`] over HTTP, routing each model to its provider.
pub struct HttpImageGenerator {
    client: reqwest::Client,
    config: ProviderConfig,
}

impl HttpImageGenerator {
    pub fn new(config: ProviderConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl ImageGenerator for HttpImageGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationOutput, ProviderError> {
        let endpoint = self.config.endpoint_for(&request.model_id).ok_or_else(|| {
            ProviderError::new(
                None,
                format!("no provider configured for model '{}'", request.model_id),
            )
        })?;

        let body = serde_json::json!({
            "prompt": request.prompt,
            "model": request.model_id,
            "width": request.width,
            "height": request.height,
            "reference_image_url": request.reference_image_url,
        });

        let mut builder = self
            .client
            .post(format!("{}/generate", endpoint.base_url.trim_end_matches('/')))
            .json(&body);
        if let Some(key) = &endpoint.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::new(Some(status.as_u16()), text));
        }

        let parsed: GenerateResponse = response.json().await?;
        if parsed.images.is_empty() {
            return Err(ProviderError::new(None, "provider returned no images"));
        }

        Ok(GenerationOutput {
            images: parsed.images,
            model_id: parsed.model.unwrap_or_else(|| request.model_id.clone()),
        })
    }
}
