//! OpenAI-compatible remote embedding provider.
//!
//! Splits input into batches of `batch_size`, runs at most `concurrent`
//! batches in flight behind a semaphore, and gates each HTTP attempt on
//! a token-bucket rate limiter. Transient failures (timeouts, 429, 5xx)
//! are retried with exponential backoff; other HTTP errors abort the
//! batch immediately. The first failing batch fails the whole call and
//! outstanding batches are dropped.
//!
//! The credential is read from `OPENAI_API_KEY`; it never appears in
//! configuration files.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::config::EmbeddingConfig;
use crate::embedder::{check_batch, Embedder};
use crate::error::{SemangoError, SemangoResult};
use crate::index::vector::l2_normalize;

/// Environment variable holding the provider credential.
const API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

/// Remote embedder against an OpenAI-compatible `/embeddings` endpoint.
#[derive(Debug)]
pub struct RemoteEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimensions: usize,
    batch_size: usize,
    semaphore: Arc<Semaphore>,
    limiter: Option<DefaultDirectRateLimiter>,
    max_retries: u32,
    retry_base: Duration,
}

impl RemoteEmbedder {
    /// Build a remote embedder from configuration.
    ///
    /// Fails when the credential environment variable is unset.
    pub fn new(config: &EmbeddingConfig) -> SemangoResult<Self> {
        Self::with_api_key(config, std::env::var(API_KEY_ENV).ok())
    }

    /// Build with an explicit credential (None means unset).
    fn with_api_key(config: &EmbeddingConfig, api_key: Option<String>) -> SemangoResult<Self> {
        let api_key = api_key.ok_or_else(|| SemangoError::Config {
            details: format!("{API_KEY_ENV} is not set but embedding.provider is \"openai\""),
        })?;

        let limiter = NonZeroU32::new(config.qps).map(|qps| {
            RateLimiter::direct(Quota::per_second(qps))
        });

        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()?,
            endpoint: format!("{}/embeddings", config.api_base.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            dimensions: config.dimensions,
            batch_size: config.batch_size,
            semaphore: Arc::new(Semaphore::new(config.concurrent)),
            limiter,
            max_retries: config.max_retries,
            retry_base: Duration::from_millis(config.retry_base_ms),
        })
    }

    /// Backoff before retry `attempt` (1-based): `base * 2^(attempt-1)`.
    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_base * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    async fn embed_batch(&self, batch: &[String]) -> SemangoResult<Vec<Vec<f32>>> {
        // The permit is held across retries: `concurrent` bounds batches
        // in flight, not HTTP attempts.
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| SemangoError::Internal(format!("semaphore closed: {e}")))?;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if let Some(limiter) = &self.limiter {
                limiter.until_ready().await;
            }

            match self.request_once(batch).await {
                Ok(vectors) => return Ok(vectors),
                Err(RequestError::Fatal(err)) => return Err(err),
                Err(RequestError::Transient(message)) => {
                    if attempt > self.max_retries {
                        return Err(SemangoError::embed(format!(
                            "batch failed after {attempt} attempts: {message}"
                        )));
                    }
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "transient embedding failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn request_once(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, RequestError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": batch,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RequestError::Transient(format!("transport: {e}")))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(RequestError::Transient(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(RequestError::Fatal(SemangoError::embed(format!(
                "provider rejected batch: HTTP {status}"
            ))));
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| RequestError::Transient(format!("response body: {e}")))?;

        let mut items = parsed.data;
        items.sort_by_key(|item| item.index);
        let mut vectors: Vec<Vec<f32>> = items.into_iter().map(|item| item.embedding).collect();
        for v in &mut vectors {
            l2_normalize(v);
        }
        check_batch(&vectors, batch.len(), self.dimensions).map_err(RequestError::Fatal)?;
        Ok(vectors)
    }
}

enum RequestError {
    /// Worth retrying: timeouts, rate limits, server errors.
    Transient(String),
    /// Not worth retrying: bad request, auth failure, contract violation.
    Fatal(SemangoError),
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    async fn embed(&self, texts: &[String]) -> SemangoResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let futures = texts
            .chunks(self.batch_size)
            .map(|batch| self.embed_batch(batch));

        // try_join_all resolves in input order and drops the remaining
        // futures on the first error, which is the cancellation contract.
        let batches = futures_util::future::try_join_all(futures).await?;
        let vectors: Vec<Vec<f32>> = batches.into_iter().flatten().collect();
        check_batch(&vectors, texts.len(), self.dimensions)?;
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedder_with(config: &EmbeddingConfig) -> RemoteEmbedder {
        RemoteEmbedder::with_api_key(config, Some("test-key".into())).expect("build embedder")
    }

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let mut config = EmbeddingConfig::default();
        config.retry_base_ms = 500;
        let embedder = embedder_with(&config);
        assert_eq!(embedder.backoff(1), Duration::from_millis(500));
        assert_eq!(embedder.backoff(2), Duration::from_millis(1000));
        assert_eq!(embedder.backoff(3), Duration::from_millis(2000));
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        let err = RemoteEmbedder::with_api_key(&EmbeddingConfig::default(), None).unwrap_err();
        assert!(matches!(err, SemangoError::Config { .. }));
    }

    #[test]
    fn test_endpoint_joins_without_double_slash() {
        let mut config = EmbeddingConfig::default();
        config.api_base = "https://example.test/v1/".into();
        let embedder = embedder_with(&config);
        assert_eq!(embedder.endpoint, "https://example.test/v1/embeddings");
    }

    #[test]
    fn test_response_items_sorted_by_index() {
        let raw = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]},
            ]
        });
        let parsed: EmbeddingsResponse = serde_json::from_value(raw).expect("parse");
        let mut items = parsed.data;
        items.sort_by_key(|i| i.index);
        assert_eq!(items[0].embedding, vec![1.0, 0.0]);
        assert_eq!(items[1].embedding, vec![0.0, 1.0]);
    }
}
