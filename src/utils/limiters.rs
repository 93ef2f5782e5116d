use crate::config::settings::LimitsConfig;
use crate::error::CoreError;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounded concurrency per external capability, so that a burst of requests cannot
/// overwhelm the embedding/reranker/generator backends or the store connection pool.
/// One semaphore per suspension point named in the concurrency model.
#[derive(Clone)]
pub struct Limiters {
    pub embedding: Arc<Semaphore>,
    pub reranker: Arc<Semaphore>,
    pub generator: Arc<Semaphore>,
    pub store: Arc<Semaphore>,
    pub acquire_timeout: Duration,
}

impl Limiters {
    pub fn new(cfg: &LimitsConfig) -> Self {
        Self {
            embedding: Arc::new(Semaphore::new(cfg.embedding_concurrency.max(1))),
            reranker: Arc::new(Semaphore::new(cfg.reranker_concurrency.max(1))),
            generator: Arc::new(Semaphore::new(cfg.generator_concurrency.max(1))),
            store: Arc::new(Semaphore::new(cfg.store_concurrency.max(1))),
            acquire_timeout: Duration::from_millis(cfg.acquire_timeout_ms.max(1)),
        }
    }

    pub async fn acquire_timed(
        sem: Arc<Semaphore>,
        acquire_timeout: Duration,
        op: &'static str,
    ) -> Result<(OwnedSemaphorePermit, Duration), CoreError> {
        let start = Instant::now();

        let permit = tokio::time::timeout(acquire_timeout, sem.acquire_owned())
            .await
            .map_err(|_| CoreError::backend_unavailable(format!("limiter acquire timeout for op={op}")))?
            .map_err(|_| CoreError::fatal(format!("semaphore closed for op={op}")))?;

        Ok((permit, start.elapsed()))
    }
}
