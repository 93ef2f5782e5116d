//! 4.D Reranker Service: given a query and N candidate texts, returns a
//! relevance-ordered permutation with scores. The teacher has no dedicated
//! cross-encoder backend (its `rerank_enabled` flag instead toggles a lexical+vector
//! hybrid SQL search) so this capability is new, grounded in the same
//! HTTP-client-with-retry-timeout shape as the embedding provider.

use crate::config::settings::RerankerConfig;
use crate::error::{CoreError, CoreResult};
use crate::utils::limiters::Limiters;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[async_trait]
pub trait Reranker: Send + Sync {
    /// Returns up to `top_n` (index, score) pairs into `candidates`, ordered by
    /// descending relevance score, ties broken by ascending original index.
    async fn rerank(&self, query: &str, candidates: &[String], top_n: usize) -> CoreResult<Vec<(usize, f32)>>;
}

/// Identity fallback used when the reranker is disabled or its backend fails:
/// preserves dense-retrieval order, truncated to `top_n`.
pub fn identity_order(candidate_count: usize, top_n: usize) -> Vec<(usize, f32)> {
    (0..candidate_count.min(top_n)).map(|i| (i, 0.0)).collect()
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    documents: &'a [String],
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Debug, Deserialize)]
struct RerankResult {
    index: usize,
    relevance_score: f32,
}

pub struct HttpReranker {
    client: Client,
    base_url: String,
    model: String,
    limiters: Arc<Limiters>,
    timeout: Duration,
}

impl HttpReranker {
    pub fn new(config: &RerankerConfig, limiters: Arc<Limiters>, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            limiters,
            timeout,
        }
    }

    async fn call_once(&self, query: &str, candidates: &[String]) -> CoreResult<Vec<RerankResult>> {
        let url = format!("{}/v1/rerank", self.base_url);
        let request = RerankRequest { query, documents: candidates, model: &self.model };

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
                format!("reranker backend returned {status}: {body}"),
            ));
        }

        let parsed: RerankResponse = response
            .json()
            .await
            .map_err(|e| CoreError::backend_unavailable(format!("malformed rerank response: {e}")))?;
        Ok(parsed.results)
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(&self, query: &str, candidates: &[String], top_n: usize) -> CoreResult<Vec<(usize, f32)>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let (_permit, wait) =
            Limiters::acquire_timed(self.limiters.reranker.clone(), self.limiters.acquire_timeout, "reranker")
                .await?;
        debug!(wait_ms = wait.as_millis() as u64, op = "reranker", "wait_queue");

        let start = Instant::now();
        const MAX_ATTEMPTS: u32 = 3;
        let mut last_err = None;
        for attempt in 1..=MAX_ATTEMPTS {
            match tokio::time::timeout(self.timeout, self.call_once(query, candidates)).await {
                Ok(Ok(mut results)) => {
                    debug!(exec_ms = start.elapsed().as_millis() as u64, op = "reranker", attempt, "exec");
                    results.sort_by(|a, b| {
                        b.relevance_score
                            .partial_cmp(&a.relevance_score)
                            .unwrap_or(std::cmp::Ordering::Equal)
                            .then_with(|| a.index.cmp(&b.index))
                    });
                    return Ok(results.into_iter().take(top_n).map(|r| (r.index, r.relevance_score)).collect());
                }
                Ok(Err(e)) => last_err = Some(e),
                Err(_) => last_err = Some(CoreError::new(crate::error::ErrorKind::ModelTransient, "rerank call timed out")),
            }
            if attempt < MAX_ATTEMPTS {
                warn!(attempt, "rerank call failed, retrying");
                tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
            }
        }
        Err(CoreError::new(
            crate::error::ErrorKind::ModelFallback,
            last_err.map(|e| e.message).unwrap_or_else(|| "reranker backend unavailable".into()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_order_truncates_and_preserves_order() {
        let order = identity_order(10, 3);
        assert_eq!(order, vec![(0, 0.0), (1, 0.0), (2, 0.0)]);
    }

    #[test]
    fn identity_order_handles_fewer_candidates_than_top_n() {
        let order = identity_order(2, 5);
        assert_eq!(order, vec![(0, 0.0), (1, 0.0)]);
    }
}
