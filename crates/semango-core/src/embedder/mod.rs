//! Embedding backends.
//!
//! The [`Embedder`] capability maps a list of texts to one unit-length
//! vector each, preserving input order. Two implementations exist:
//!
//! - [`remote::RemoteEmbedder`] -- OpenAI-compatible `/v1/embeddings`
//!   API with batching, a concurrency cap, a QPS token bucket, and
//!   per-batch retry with exponential backoff.
//! - [`local::LocalEmbedder`] -- ONNX inference via `ort` with a
//!   `tokenizers` tokenizer, pooling per the model's pooling config,
//!   and L2 normalization.
//!
//! Both are safe for concurrent callers; batching and rate limiting are
//! shared across calls.

pub mod local;
pub mod remote;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{EmbeddingConfig, EmbeddingProvider};
use crate::error::{SemangoError, SemangoResult};

/// Capability of embedding texts into fixed-dimension unit vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed `texts`, returning exactly `texts.len()` vectors of length
    /// [`Embedder::dimension`], in input order. Fails with the first
    /// error encountered; outstanding work is cancelled.
    async fn embed(&self, texts: &[String]) -> SemangoResult<Vec<Vec<f32>>>;

    /// Output dimensionality of every produced vector.
    fn dimension(&self) -> usize;
}

/// Build the configured embedding backend.
pub fn build_embedder(config: &EmbeddingConfig) -> SemangoResult<Arc<dyn Embedder>> {
    match config.provider {
        EmbeddingProvider::Openai => Ok(Arc::new(remote::RemoteEmbedder::new(config)?)),
        EmbeddingProvider::Local => Ok(Arc::new(local::LocalEmbedder::new(config)?)),
    }
}

/// Verify an embedding batch result against the caller's expectations.
///
/// Shared by both backends so the order/length contract is enforced in
/// one place.
fn check_batch(
    vectors: &[Vec<f32>],
    expected_count: usize,
    expected_dim: usize,
) -> SemangoResult<()> {
    if vectors.len() != expected_count {
        return Err(SemangoError::embed(format!(
            "provider returned {} vectors for {} inputs",
            vectors.len(),
            expected_count
        )));
    }
    for (i, v) in vectors.iter().enumerate() {
        if v.len() != expected_dim {
            return Err(SemangoError::embed(format!(
                "vector {i} has dimension {}, expected {expected_dim}",
                v.len()
            )));
        }
    }
    Ok(())
}
