//! 4.H Retrieval Engine: two-stage dense recall + cross-encoder rerank over the
//! document collection. Grounded in the teacher's `rag_service.rs` retrieval path
//! (embed -> timed search -> build context) generalized to the capability traits
//! instead of a Postgres-specific repository, and simplified to a single-collection,
//! no-user-scoping model per the data model in spec.md §3.

use crate::capabilities::{EmbeddingProvider, Reranker};
use crate::error::CoreResult;
use crate::store::{Filter, Payload, VectorStore};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub content: String,
    pub score: f32,
    pub payload: Payload,
}

#[derive(Debug, Clone, Default)]
pub struct RetrievalMetadata {
    /// Set when the reranker failed or is disabled and stage 1's dense order was
    /// returned unchanged (truncated to `top_n`), per 4.D's fallback contract.
    pub order_only: bool,
}

pub struct RetrievalEngine {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    reranker: Option<Arc<dyn Reranker>>,
    documents_collection: String,
    top_k: usize,
    top_n: usize,
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        reranker: Option<Arc<dyn Reranker>>,
        documents_collection: String,
        top_k: usize,
        top_n: usize,
    ) -> Self {
        Self { store, embedder, reranker, documents_collection, top_k, top_n }
    }

    /// Runs stage 1 (dense recall) then stage 2 (cross-encoder rerank) over an
    /// already-normalized query. A query with zero non-whitespace characters never
    /// reaches the store or an embedding call — 4.H: "return empty result without
    /// calling either model."
    pub async fn retrieve(&self, normalized_query: &str) -> CoreResult<(Vec<RetrievedChunk>, RetrievalMetadata)> {
        if normalized_query.trim().is_empty() {
            return Ok((Vec::new(), RetrievalMetadata::default()));
        }

        let start = Instant::now();
        let query_vector = self.embedder.embed(normalized_query).await?;
        debug!(exec_ms = start.elapsed().as_millis() as u64, op = "embed_query", "exec");

        let start = Instant::now();
        let candidates = self
            .store
            .search(&self.documents_collection, &query_vector, self.top_k, None::<&Filter>)
            .await?;
        debug!(exec_ms = start.elapsed().as_millis() as u64, op = "search", candidates = candidates.len(), "exec");

        if candidates.is_empty() {
            return Ok((Vec::new(), RetrievalMetadata::default()));
        }

        let reranker = match &self.reranker {
            Some(r) => r,
            None => {
                let order = crate::capabilities::reranker::identity_order(candidates.len(), self.top_n);
                return Ok((self.apply_order(&candidates, &order), RetrievalMetadata { order_only: true }));
            }
        };

        let texts: Vec<String> = candidates.iter().map(|c| c.payload.get("content").and_then(|v| v.as_str()).unwrap_or("").to_string()).collect();

        let start = Instant::now();
        match reranker.rerank(normalized_query, &texts, self.top_n).await {
            Ok(order) => {
                debug!(exec_ms = start.elapsed().as_millis() as u64, op = "rerank", "exec");
                Ok((self.apply_order(&candidates, &order), RetrievalMetadata::default()))
            }
            Err(_) => {
                // 4.D: on backend failure, fall back to the original dense order,
                // flagged `order_only` in the result metadata.
                let order = crate::capabilities::reranker::identity_order(candidates.len(), self.top_n);
                Ok((self.apply_order(&candidates, &order), RetrievalMetadata { order_only: true }))
            }
        }
    }

    fn apply_order(&self, candidates: &[crate::store::ScoredPoint], order: &[(usize, f32)]) -> Vec<RetrievedChunk> {
        order
            .iter()
            .filter_map(|(idx, score)| {
                candidates.get(*idx).map(|c| RetrievedChunk {
                    content: c.payload.get("content").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                    score: *score,
                    payload: c.payload.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryVectorStore;
    use crate::store::{Distance, Point};
    use async_trait::async_trait;
    use serde_json::json;

    struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, text: &str) -> CoreResult<Vec<f32>> {
            // Deterministic stand-in: longer overlap with "مصر" nudges the vector.
            if text.contains('م') {
                Ok(vec![1.0, 0.0])
            } else {
                Ok(vec![0.0, 1.0])
            }
        }
        fn dimension(&self) -> usize {
            2
        }
    }

    async fn seeded_store() -> Arc<dyn VectorStore> {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        store.ensure_collection("docs", 2, Distance::Cosine).await.unwrap();
        store
            .upsert(
                "docs",
                vec![
                    Point {
                        id: "1".into(),
                        vector: vec![1.0, 0.0],
                        payload: [("content".to_string(), json!("القاهرة هي عاصمة مصر"))].into_iter().collect(),
                    },
                    Point {
                        id: "2".into(),
                        vector: vec![0.0, 1.0],
                        payload: [("content".to_string(), json!("unrelated english text"))].into_iter().collect(),
                    },
                ],
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn empty_query_short_circuits_without_store_or_embedder() {
        let engine = RetrievalEngine::new(
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(FixedEmbedder),
            None,
            "docs".into(),
            10,
            3,
        );
        let (results, meta) = engine.retrieve("   ").await.unwrap();
        assert!(results.is_empty());
        assert!(!meta.order_only);
    }

    #[tokio::test]
    async fn zero_documents_returns_empty_not_error() {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        store.ensure_collection("docs", 2, Distance::Cosine).await.unwrap();
        let engine = RetrievalEngine::new(store, Arc::new(FixedEmbedder), None, "docs".into(), 10, 3);
        let (results, _) = engine.retrieve("مصر").await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn no_reranker_configured_is_order_only_dense_order() {
        let store = seeded_store().await;
        let engine = RetrievalEngine::new(store, Arc::new(FixedEmbedder), None, "docs".into(), 10, 3);
        let (results, meta) = engine.retrieve("مصر").await.unwrap();
        assert!(meta.order_only);
        assert_eq!(results[0].content, "القاهرة هي عاصمة مصر");
    }
}
