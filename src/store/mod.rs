//! 4.E Vector Store: persists `(id, vector, payload)` points in named collections,
//! with ANN search and filtered scroll. Treated by the rest of the core as a
//! black-box behind the [`VectorStore`] trait; `postgres` provides one concrete
//! realization, `memory` an in-process fake for tests.

pub mod memory;
pub mod postgres;

use crate::error::CoreResult;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

pub type Payload = HashMap<String, Value>;

#[derive(Debug, Clone)]
pub struct Point {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Payload,
}

#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: Payload,
}

/// Payload-equality filter: every clause must match (logical AND). An empty filter
/// matches every point in the collection.
#[derive(Debug, Clone, Default)]
pub struct Filter(pub Vec<(String, Value)>);

impl Filter {
    pub fn eq(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter(vec![(key.into(), value.into())])
    }

    pub fn and(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.push((key.into(), value.into()));
        self
    }

    pub fn matches(&self, payload: &Payload) -> bool {
        self.0.iter().all(|(k, v)| payload.get(k) == Some(v))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distance {
    Cosine,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Idempotent creation: a second call with the same name and dimension is a
    /// no-op; a second call with a different dimension is a `Fatal` configuration
    /// error.
    async fn ensure_collection(&self, collection: &str, dimension: usize, distance: Distance) -> CoreResult<()>;

    /// Writes `points` atomically: every point's vector and payload land together, or
    /// none do.
    async fn upsert(&self, collection: &str, points: Vec<Point>) -> CoreResult<()>;

    /// ANN search ordered by descending cosine similarity, optionally filtered on
    /// payload equality. Returns fewer than `k` results when the collection holds
    /// fewer matching points — never an error.
    async fn search(
        &self,
        collection: &str,
        query_vector: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> CoreResult<Vec<ScoredPoint>>;

    /// Metadata-filtered exact listing; vectors are not returned.
    async fn scroll(
        &self,
        collection: &str,
        filter: &Filter,
        limit: usize,
        offset: Option<usize>,
    ) -> CoreResult<Vec<(String, Payload)>>;

    /// Deletes every point matching `filter`, returning the number removed.
    async fn delete(&self, collection: &str, filter: &Filter) -> CoreResult<u64>;

    /// Deletes exactly the points named by `ids`, returning the number actually
    /// removed (an id with no matching point simply doesn't count). Used where a
    /// caller has already decided which individual points are stale and a
    /// payload-equality `Filter` would be too coarse.
    async fn delete_by_ids(&self, collection: &str, ids: &[String]) -> CoreResult<u64>;

    /// Removes the collection entirely.
    async fn drop_collection(&self, collection: &str) -> CoreResult<()>;

    async fn count(&self, collection: &str, filter: Option<&Filter>) -> CoreResult<u64>;
}
