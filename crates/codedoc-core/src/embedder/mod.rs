//! Embedding client with provider fallback.
//!
//! Converts batches of strings to unit-length vectors of a fixed
//! dimension. Providers sit behind the [`EmbeddingProvider`] trait so
//! tests can substitute deterministic fakes; the HTTP implementation
//! speaks the OpenAI-compatible `/embeddings` protocol.
//!
//! ## Fallback and dimensionality
//!
//! The primary provider is tried first. On an unrecoverable provider
//! error (auth failure, protocol violation, rate limit that survives the
//! caller's retry budget) the client falls back to the secondary. The
//! collection commits to the first successful vector's dimension; a
//! provider producing a different dimension is rejected, so a fallback
//! can only serve a codebase it is dimension-compatible with.
//!
//! Transient failures are NOT retried here — call-sites wrap
//! `embed_batch` in [`crate::retry::run_with_retry`] with their own
//! policy. When that policy's budget runs out, the call-site makes one
//! last attempt through `embed_batch_after_budget`, which treats a
//! still-rate-limited primary as unrecoverable and routes to the
//! fallback.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::config::{EmbeddingConfig, EmbeddingProviderConfig};
use crate::error::{CodedocError, CodedocResult};

/// A source of embedding vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name, for logging and error attribution.
    fn name(&self) -> &str;

    /// Embed a batch of texts, preserving order and length.
    async fn embed_batch(&self, texts: &[String]) -> CodedocResult<Vec<Vec<f32>>>;
}

// ---------------------------------------------------------------------------
// HTTP provider
// ---------------------------------------------------------------------------

/// OpenAI-compatible `/embeddings` endpoint.
pub struct HttpEmbeddingProvider {
    name: String,
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    inflight: Arc<Semaphore>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

impl HttpEmbeddingProvider {
    /// Build a provider from its config section.
    pub fn new(name: &str, config: &EmbeddingProviderConfig, max_concurrent: usize) -> Self {
        Self {
            name: name.to_string(),
            client: reqwest::Client::new(),
            endpoint: format!("{}/embeddings", config.endpoint.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            inflight: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn embed_batch(&self, texts: &[String]) -> CodedocResult<Vec<Vec<f32>>> {
        let _permit = self
            .inflight
            .acquire()
            .await
            .map_err(|e| CodedocError::Internal(format!("embedding semaphore closed: {e}")))?;

        let mut request = self.client.post(&self.endpoint).json(&serde_json::json!({
            "model": self.model,
            "input": texts,
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();

        if status.as_u16() == 429 {
            let body = response.text().await.unwrap_or_default();
            return Err(CodedocError::RateLimited {
                provider: self.name.clone(),
                message: body,
            });
        }
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(CodedocError::ProviderUnavailable {
                provider: self.name.clone(),
                message: format!("{status}: {body}"),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CodedocError::ProviderProtocol {
                provider: self.name.clone(),
                message: format!("{status}: {body}"),
            });
        }

        let mut parsed: EmbeddingResponse = response.json().await?;
        if parsed.data.len() != texts.len() {
            return Err(CodedocError::ProviderProtocol {
                provider: self.name.clone(),
                message: format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    parsed.data.len()
                ),
            });
        }

        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

// ---------------------------------------------------------------------------
// Client with fallback + dimension commitment
// ---------------------------------------------------------------------------

/// Embedding client wrapping a primary and optional fallback provider.
pub struct EmbeddingClient {
    primary: Arc<dyn EmbeddingProvider>,
    fallback: Option<Arc<dyn EmbeddingProvider>>,
    /// Dimension the collection has committed to (0 = uncommitted).
    committed_dim: AtomicUsize,
    /// Batch size negotiated with the provider.
    batch_size: usize,
}

impl EmbeddingClient {
    /// Build the client from config. Returns an error when no primary
    /// provider is configured.
    pub fn from_config(config: &EmbeddingConfig) -> CodedocResult<Self> {
        let primary_cfg = config.primary.as_ref().ok_or_else(|| CodedocError::Config {
            details: "embedding.primary endpoint is not configured".into(),
        })?;
        let primary: Arc<dyn EmbeddingProvider> = Arc::new(HttpEmbeddingProvider::new(
            "embedding-primary",
            primary_cfg,
            config.max_concurrent,
        ));
        let fallback: Option<Arc<dyn EmbeddingProvider>> = config.fallback.as_ref().map(|cfg| {
            Arc::new(HttpEmbeddingProvider::new(
                "embedding-fallback",
                cfg,
                config.max_concurrent,
            )) as Arc<dyn EmbeddingProvider>
        });
        Ok(Self::new(primary, fallback, config.batch_size))
    }

    /// Build the client from explicit providers (test substitution).
    pub fn new(
        primary: Arc<dyn EmbeddingProvider>,
        fallback: Option<Arc<dyn EmbeddingProvider>>,
        batch_size: usize,
    ) -> Self {
        Self {
            primary,
            fallback,
            committed_dim: AtomicUsize::new(0),
            batch_size: batch_size.max(1),
        }
    }

    /// The negotiated batch size.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// The committed vector dimension, once known.
    pub fn dimension(&self) -> Option<usize> {
        match self.committed_dim.load(Ordering::Acquire) {
            0 => None,
            d => Some(d),
        }
    }

    /// Embed one batch: order-preserving, length-matched, unit-length.
    ///
    /// Transient errors propagate for the caller's retry loop; terminal
    /// primary errors trigger the fallback provider.
    pub async fn embed_batch(&self, texts: &[String]) -> CodedocResult<Vec<Vec<f32>>> {
        self.embed_batch_inner(texts, false).await
    }

    /// Embed one batch after the caller's retry budget for the primary
    /// is spent: a transient primary failure no longer propagates for
    /// another retry, it routes to the fallback provider like any other
    /// unrecoverable error.
    pub async fn embed_batch_after_budget(
        &self,
        texts: &[String],
    ) -> CodedocResult<Vec<Vec<f32>>> {
        self.embed_batch_inner(texts, true).await
    }

    async fn embed_batch_inner(
        &self,
        texts: &[String],
        budget_exhausted: bool,
    ) -> CodedocResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let vectors = match self.primary.embed_batch(texts).await {
            Ok(vectors) => self.check_dimension(vectors)?,
            Err(e) if e.is_transient() && !budget_exhausted => return Err(e),
            Err(e) => {
                let Some(fallback) = &self.fallback else {
                    return Err(e);
                };
                tracing::warn!(
                    primary = self.primary.name(),
                    fallback = fallback.name(),
                    error = %e,
                    "primary embedding provider failed, using fallback"
                );
                let vectors = fallback.embed_batch(texts).await?;
                self.check_dimension(vectors)?
            }
        };

        if vectors.len() != texts.len() {
            return Err(CodedocError::ProviderProtocol {
                provider: self.primary.name().to_string(),
                message: format!("batch length mismatch: {} != {}", vectors.len(), texts.len()),
            });
        }

        Ok(vectors.into_iter().map(normalize).collect())
    }

    /// Embed a single query string.
    pub async fn embed_one(&self, text: &str) -> CodedocResult<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| CodedocError::Internal("provider returned empty batch".into()))
    }

    /// Enforce the committed dimension, committing on first success.
    fn check_dimension(&self, vectors: Vec<Vec<f32>>) -> CodedocResult<Vec<Vec<f32>>> {
        let Some(first) = vectors.first() else {
            return Ok(vectors);
        };
        let dim = first.len();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
            return Err(CodedocError::DimensionMismatch {
                expected: dim,
                actual: bad.len(),
            });
        }

        match self
            .committed_dim
            .compare_exchange(0, dim, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(vectors),
            Err(committed) if committed == dim => Ok(vectors),
            Err(committed) => Err(CodedocError::DimensionMismatch {
                expected: committed,
                actual: dim,
            }),
        }
    }
}

/// Scale a vector to unit length. Zero vectors pass through unchanged.
fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    /// Deterministic fake provider producing fixed-dimension vectors.
    struct FakeProvider {
        name: &'static str,
        dim: usize,
        calls: AtomicU32,
        fail_with: Option<fn() -> CodedocError>,
    }

    impl FakeProvider {
        fn ok(name: &'static str, dim: usize) -> Self {
            Self { name, dim, calls: AtomicU32::new(0), fail_with: None }
        }

        fn failing(name: &'static str, f: fn() -> CodedocError) -> Self {
            Self { name, dim: 0, calls: AtomicU32::new(0), fail_with: Some(f) }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FakeProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn embed_batch(&self, texts: &[String]) -> CodedocResult<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(f) = self.fail_with {
                return Err(f());
            }
            Ok(texts
                .iter()
                .enumerate()
                .map(|(i, _)| {
                    let mut v = vec![0.0; self.dim];
                    v[i % self.dim] = 1.0 + i as f32;
                    v
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_embed_batch_preserves_order_and_normalizes() {
        let client = EmbeddingClient::new(Arc::new(FakeProvider::ok("p", 8)), None, 100);
        let texts: Vec<String> = (0..3).map(|i| format!("text {i}")).collect();
        let vectors = client.embed_batch(&texts).await.expect("embed");
        assert_eq!(vectors.len(), 3);
        for v in &vectors {
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-5);
        }
        assert_eq!(client.dimension(), Some(8));
    }

    #[tokio::test]
    async fn test_terminal_primary_error_uses_fallback() {
        let primary = Arc::new(FakeProvider::failing("p", || CodedocError::ProviderProtocol {
            provider: "p".into(),
            message: "401".into(),
        }));
        let fallback = Arc::new(FakeProvider::ok("f", 4));
        let client = EmbeddingClient::new(primary, Some(fallback.clone()), 100);

        let vectors = client.embed_batch(&["x".to_string()]).await.expect("fallback");
        assert_eq!(vectors[0].len(), 4);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rate_limited_primary_falls_back_once_budget_is_spent() {
        let primary = Arc::new(FakeProvider::failing("p", || CodedocError::RateLimited {
            provider: "p".into(),
            message: "429".into(),
        }));
        let fallback = Arc::new(FakeProvider::ok("f", 4));
        let client = EmbeddingClient::new(primary, Some(fallback.clone()), 100);

        // Inside the retry budget the error propagates so the caller's
        // backoff loop can re-attempt the primary.
        let result = client.embed_batch(&["x".to_string()]).await;
        assert!(matches!(result, Err(CodedocError::RateLimited { .. })));
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);

        // Once the budget is exhausted the same rate limit is
        // unrecoverable and the fallback serves the batch.
        let vectors = client
            .embed_batch_after_budget(&["x".to_string()])
            .await
            .expect("fallback serves the batch");
        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors[0].len(), 4);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dimension_commitment_rejects_mismatched_provider() {
        // A collection already committed to 8 dimensions rejects a
        // provider that produces 4.
        let client = EmbeddingClient::new(Arc::new(FakeProvider::ok("p4", 4)), None, 100);
        client.committed_dim.store(8, Ordering::Release);
        let result = client.embed_batch(&["a".to_string()]).await;
        assert!(matches!(
            result,
            Err(CodedocError::DimensionMismatch { expected: 8, actual: 4 })
        ));
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let client = EmbeddingClient::new(Arc::new(FakeProvider::ok("p", 8)), None, 100);
        let vectors = client.embed_batch(&[]).await.expect("empty");
        assert!(vectors.is_empty());
        assert_eq!(client.dimension(), None);
    }
}
