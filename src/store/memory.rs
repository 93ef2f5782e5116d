//! An in-process fake `VectorStore`, used to test the pipeline/router/retrieval
//! layers without a database, per design notes §9 ("tests assemble a core with fakes
//! for each capability").

use super::{Distance, Filter, Payload, Point, ScoredPoint, VectorStore};
use crate::error::{CoreError, CoreResult};
use crate::utils::cosine_similarity;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

struct Collection {
    dimension: usize,
    points: HashMap<String, (Vec<f32>, Payload)>,
}

#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn ensure_collection(&self, collection: &str, dimension: usize, _distance: Distance) -> CoreResult<()> {
        let mut collections = self.collections.write();
        match collections.get(collection) {
            Some(existing) if existing.dimension != dimension => Err(CoreError::fatal(format!(
                "collection {collection} already exists with dimension {}, requested {}",
                existing.dimension, dimension
            ))),
            Some(_) => Ok(()),
            None => {
                collections.insert(collection.to_string(), Collection { dimension, points: HashMap::new() });
                Ok(())
            }
        }
    }

    async fn upsert(&self, collection: &str, points: Vec<Point>) -> CoreResult<()> {
        let mut collections = self.collections.write();
        let entry = collections
            .get_mut(collection)
            .ok_or_else(|| CoreError::not_found(format!("collection {collection} does not exist")))?;
        for p in points {
            if p.vector.len() != entry.dimension {
                return Err(CoreError::fatal(format!(
                    "point {} has dimension {}, collection {collection} expects {}",
                    p.id,
                    p.vector.len(),
                    entry.dimension
                )));
            }
            entry.points.insert(p.id, (p.vector, p.payload));
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query_vector: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> CoreResult<Vec<ScoredPoint>> {
        let collections = self.collections.read();
        let entry = match collections.get(collection) {
            Some(e) => e,
            None => return Ok(Vec::new()),
        };

        let mut scored: Vec<ScoredPoint> = entry
            .points
            .iter()
            .filter(|(_, (_, payload))| filter.map(|f| f.matches(payload)).unwrap_or(true))
            .map(|(id, (vector, payload))| ScoredPoint {
                id: id.clone(),
                score: cosine_similarity(query_vector, vector).unwrap_or(0.0),
                payload: payload.clone(),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: &Filter,
        limit: usize,
        offset: Option<usize>,
    ) -> CoreResult<Vec<(String, Payload)>> {
        let collections = self.collections.read();
        let entry = match collections.get(collection) {
            Some(e) => e,
            None => return Ok(Vec::new()),
        };

        let mut matching: Vec<(String, Payload)> = entry
            .points
            .iter()
            .filter(|(_, (_, payload))| filter.matches(payload))
            .map(|(id, (_, payload))| (id.clone(), payload.clone()))
            .collect();
        matching.sort_by(|a, b| a.0.cmp(&b.0));

        let start = offset.unwrap_or(0);
        Ok(matching.into_iter().skip(start).take(limit).collect())
    }

    async fn delete(&self, collection: &str, filter: &Filter) -> CoreResult<u64> {
        let mut collections = self.collections.write();
        let entry = match collections.get_mut(collection) {
            Some(e) => e,
            None => return Ok(0),
        };
        let before = entry.points.len();
        entry.points.retain(|_, (_, payload)| !filter.matches(payload));
        Ok((before - entry.points.len()) as u64)
    }

    async fn delete_by_ids(&self, collection: &str, ids: &[String]) -> CoreResult<u64> {
        let mut collections = self.collections.write();
        let entry = match collections.get_mut(collection) {
            Some(e) => e,
            None => return Ok(0),
        };
        let id_set: std::collections::HashSet<&String> = ids.iter().collect();
        let before = entry.points.len();
        entry.points.retain(|id, _| !id_set.contains(id));
        Ok((before - entry.points.len()) as u64)
    }

    async fn drop_collection(&self, collection: &str) -> CoreResult<()> {
        self.collections.write().remove(collection);
        Ok(())
    }

    async fn count(&self, collection: &str, filter: Option<&Filter>) -> CoreResult<u64> {
        let collections = self.collections.read();
        let entry = match collections.get(collection) {
            Some(e) => e,
            None => return Ok(0),
        };
        let count = entry
            .points
            .values()
            .filter(|(_, payload)| filter.map(|f| f.matches(payload)).unwrap_or(true))
            .count();
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(session_id: &str) -> Payload {
        let mut p = Payload::new();
        p.insert("session_id".to_string(), json!(session_id));
        p
    }

    #[tokio::test]
    async fn ensure_collection_is_idempotent() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("docs", 4, Distance::Cosine).await.unwrap();
        store.ensure_collection("docs", 4, Distance::Cosine).await.unwrap();
    }

    #[tokio::test]
    async fn dimension_mismatch_on_reensure_is_fatal() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("docs", 4, Distance::Cosine).await.unwrap();
        let err = store.ensure_collection("docs", 8, Distance::Cosine).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Fatal);
    }

    #[tokio::test]
    async fn search_filters_by_payload_equality() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("mem", 2, Distance::Cosine).await.unwrap();
        store
            .upsert(
                "mem",
                vec![
                    Point { id: "1".into(), vector: vec![1.0, 0.0], payload: payload("s1") },
                    Point { id: "2".into(), vector: vec![1.0, 0.0], payload: payload("s2") },
                ],
            )
            .await
            .unwrap();

        let filter = Filter::eq("session_id", "s1");
        let results = store.search("mem", &[1.0, 0.0], 10, Some(&filter)).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "1");
    }

    #[tokio::test]
    async fn count_and_delete_respect_filter() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("mem", 2, Distance::Cosine).await.unwrap();
        store
            .upsert(
                "mem",
                vec![
                    Point { id: "1".into(), vector: vec![1.0, 0.0], payload: payload("s1") },
                    Point { id: "2".into(), vector: vec![1.0, 0.0], payload: payload("s1") },
                    Point { id: "3".into(), vector: vec![1.0, 0.0], payload: payload("s2") },
                ],
            )
            .await
            .unwrap();

        let filter = Filter::eq("session_id", "s1");
        assert_eq!(store.count("mem", Some(&filter)).await.unwrap(), 2);
        let deleted = store.delete("mem", &filter).await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.count("mem", None).await.unwrap(), 1);
    }
}
