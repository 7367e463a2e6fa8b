//! Call-level retry with jittered exponential backoff.
//!
//! [`with_backoff`] retries any provider operation whose error is
//! [`ProviderError::is_retryable`]; terminal errors return immediately.
//! [`RetryingGenerator`] applies it to every [`ImageGenerator::generate`].

use std::future::Future;

use async_trait::async_trait;
use fanout_core::retry::BackoffConfig;

use crate::generation::{GenerationOutput, GenerationRequest, ImageGenerator, ProviderError};

/// Run `op` until it succeeds, fails terminally, or `config.max_attempts`
/// attempts have been made.
pub async fn with_backoff<T, F, Fut>(config: &BackoffConfig, mut op: F) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && e.is_retryable() => {
                let delay = config.delay_for_attempt(attempt);
                tracing::warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Provider call failed, retrying",
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Wraps a generator with [`with_backoff`].
pub struct RetryingGenerator<G> {
    inner: G,
    config: BackoffConfig,
}

impl<G> RetryingGenerator<G> {
    pub fn new(inner: G, config: BackoffConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl<G: ImageGenerator> ImageGenerator for RetryingGenerator<G> {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationOutput, ProviderError> {
        with_backoff(&self.config, || self.inner.generate(request)).await
    }
}
