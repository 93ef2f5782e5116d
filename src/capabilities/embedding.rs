//! 4.C Embedding Service: a capability mapping strings to fixed-dimension, L2-normalized
//! dense vectors. Narrow interface, swappable at construction time (design notes §9).

use crate::config::settings::EmbeddingConfig;
use crate::error::{CoreError, CoreResult};
use crate::utils::limiters::Limiters;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embeds a single string. Deterministic for a fixed model.
    async fn embed(&self, text: &str) -> CoreResult<Vec<f32>>;

    /// Embeds a batch of strings, parallelized internally up to the service's own
    /// concurrency limit. A single failing item fails the whole batch (4.C: "ingestion
    /// batches are retried whole").
    async fn embed_batch(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

/// An OpenAI-compatible `/v1/embeddings` backed embedding provider: a hosted service
/// or a local inference server speaking the same wire format, retried with bounded
/// backoff on transient failure.
pub struct HttpEmbeddingProvider {
    client: Client,
    base_url: String,
    model: String,
    dimension: usize,
    limiters: Arc<Limiters>,
    timeout: Duration,
}

impl HttpEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig, limiters: Arc<Limiters>, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            dimension: config.dimension,
            limiters,
            timeout,
        }
    }

    async fn call_once(&self, text: &str) -> CoreResult<Vec<f32>> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let request = EmbeddingRequest { input: text, model: &self.model };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| CoreError::new(crate::error::ErrorKind::ModelTransient, e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::new(
                crate::error::ErrorKind::ModelTransient,
                format!("embedding backend returned {status}: {body}"),
            ));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| CoreError::backend_unavailable(format!("malformed embedding response: {e}")))?;

        let first = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::backend_unavailable("embedding backend returned no data"))?;

        if first.embedding.len() != self.dimension {
            return Err(CoreError::fatal(format!(
                "embedding dimension mismatch: expected {}, got {}",
                self.dimension,
                first.embedding.len()
            )));
        }

        Ok(l2_normalize(first.embedding))
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> CoreResult<Vec<f32>> {
        let (_permit, wait) =
            Limiters::acquire_timed(self.limiters.embedding.clone(), self.limiters.acquire_timeout, "embedding")
                .await?;
        debug!(wait_ms = wait.as_millis() as u64, op = "embedding", "wait_queue");

        let start = Instant::now();
        const MAX_ATTEMPTS: u32 = 3;
        let mut last_err = None;
        for attempt in 1..=MAX_ATTEMPTS {
            match tokio::time::timeout(self.timeout, self.call_once(text)).await {
                Ok(Ok(v)) => {
                    debug!(exec_ms = start.elapsed().as_millis() as u64, op = "embedding", attempt, "exec");
                    return Ok(v);
                }
                Ok(Err(e)) if e.kind == crate::error::ErrorKind::Fatal => return Err(e),
                Ok(Err(e)) => last_err = Some(e),
                Err(_) => last_err = Some(CoreError::new(crate::error::ErrorKind::ModelTransient, "embedding call timed out")),
            }
            if attempt < MAX_ATTEMPTS {
                warn!(attempt, "embedding call failed, retrying");
                tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
            }
        }
        Err(CoreError::backend_unavailable(
            last_err.map(|e| e.message).unwrap_or_else(|| "embedding backend unavailable".into()),
        ))
    }

    async fn embed_batch(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        use futures::future::join_all;
        let futures = texts.iter().map(|t| self.embed(t));
        let results = join_all(futures).await;
        results.into_iter().collect()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
