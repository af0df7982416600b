//! Transport abstraction for model invocation

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use moneyez_ai::{Context, LlmProvider, Message, Model, Result, collect_message};
use tokio_util::sync::CancellationToken;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Sends a request context to a model and returns its complete reply
#[async_trait]
pub trait Transport: Send + Sync {
    async fn run(&self, context: Context, cancel: CancellationToken) -> Result<Message>;
}

/// Direct provider transport with retry on transient failures
pub struct ProviderTransport {
    provider: Arc<dyn LlmProvider>,
    model: Model,
    retry_config: RetryConfig,
}

impl ProviderTransport {
    /// Create a new provider transport
    pub fn new(provider: Arc<dyn LlmProvider>, model: Model) -> Self {
        Self {
            provider,
            model,
            retry_config: RetryConfig::default(),
        }
    }

    /// Set retry configuration
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    /// The model this transport calls
    pub fn model(&self) -> &Model {
        &self.model
    }

    async fn attempt(&self, context: &Context) -> Result<Message> {
        let stream = self.provider.stream(&self.model, context).await?;
        collect_message(stream).await
    }
}

#[async_trait]
impl Transport for ProviderTransport {
    async fn run(&self, context: Context, cancel: CancellationToken) -> Result<Message> {
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(moneyez_ai::Error::Aborted);
            }

            let result = tokio::select! {
                result = self.attempt(&context) => result,
                _ = cancel.cancelled() => return Err(moneyez_ai::Error::Aborted),
            };

            match result {
                Ok(message) => return Ok(message),
                Err(e) if e.is_retryable() && attempt < self.retry_config.max_retries => {
                    let delay = self.retry_config.delay_for_attempt(attempt);
                    tracing::warn!(
                        "Request failed (attempt {}/{}): {}. Retrying in {:?}...",
                        attempt + 1,
                        self.retry_config.max_retries + 1,
                        e,
                        delay
                    );
                    attempt += 1;
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(moneyez_ai::Error::Aborted),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}
