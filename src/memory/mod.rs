//! 4.F Conversation Memory: session-scoped message history persisted in the same
//! vector store used for documents, in a dedicated collection with dummy vectors.

use crate::error::CoreResult;
use crate::store::{Distance, Filter, Payload, Point, VectorStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Operates over the `conversation_memory` collection, separate from the document
/// collection (disjoint id spaces, 3. Data Model invariant). A message is a point
/// whose vector is a fixed dummy of the collection's dimension — the store requires
/// one — and whose payload carries `{session_id, role, content, timestamp}`.
#[derive(Clone)]
pub struct ConversationMemory {
    store: Arc<dyn VectorStore>,
    collection: String,
    dimension: usize,
}

impl ConversationMemory {
    pub fn new(store: Arc<dyn VectorStore>, collection: String, dimension: usize) -> Self {
        Self { store, collection, dimension }
    }

    pub async fn ensure_collection(&self) -> CoreResult<()> {
        self.store.ensure_collection(&self.collection, self.dimension, Distance::Cosine).await
    }

    fn dummy_vector(&self) -> Vec<f32> {
        vec![0.0; self.dimension]
    }

    /// Assigns a new unique id and the current server timestamp.
    pub async fn append(&self, session_id: &str, role: Role, content: &str) -> CoreResult<()> {
        let timestamp = Utc::now();
        let payload: Payload = [
            ("session_id".to_string(), json!(session_id)),
            ("role".to_string(), json!(role.as_str())),
            ("content".to_string(), json!(content)),
            ("timestamp".to_string(), json!(timestamp.to_rfc3339())),
        ]
        .into_iter()
        .collect();

        let point = Point { id: uuid::Uuid::new_v4().to_string(), vector: self.dummy_vector(), payload };
        self.store.upsert(&self.collection, vec![point]).await
    }

    /// Scrolls for `session_id = s`, sorts ascending by timestamp, and returns the
    /// most recent `limit` messages in chronological order.
    pub async fn history(&self, session_id: &str, limit: usize) -> CoreResult<Vec<Message>> {
        let filter = Filter::eq("session_id", session_id);
        // Over-fetch to allow a correct "most recent N" cut after ascending sort;
        // the store's own scroll order is not guaranteed to match ours.
        let rows = self.store.scroll(&self.collection, &filter, usize::MAX.min(100_000), None).await?;

        let mut messages: Vec<Message> = rows
            .into_iter()
            .filter_map(|(_, payload)| payload_to_message(&payload))
            .collect();
        messages.sort_by_key(|m| m.timestamp);

        if messages.len() > limit {
            let start = messages.len() - limit;
            messages = messages.split_off(start);
        }
        Ok(messages)
    }

    pub async fn clear(&self, session_id: &str) -> CoreResult<u64> {
        let filter = Filter::eq("session_id", session_id);
        self.store.delete(&self.collection, &filter).await
    }

    /// Deletes points with `timestamp + max_age < now`. Point-level, not
    /// session-level: a session with one stale first turn and a fresh last turn keeps
    /// the fresh messages.
    pub async fn sweep(&self, max_age: chrono::Duration) -> CoreResult<u64> {
        let cutoff = Utc::now() - max_age;
        let filter = Filter::default();
        let rows = self.store.scroll(&self.collection, &filter, 1_000_000, None).await?;

        let expired_ids: Vec<String> = rows
            .iter()
            .filter_map(|(id, payload)| {
                let message = payload_to_message(payload)?;
                (message.timestamp < cutoff).then(|| id.clone())
            })
            .collect();

        if expired_ids.is_empty() {
            return Ok(0);
        }
        self.store.delete_by_ids(&self.collection, &expired_ids).await
    }
}

fn payload_to_message(payload: &Payload) -> Option<Message> {
    let role = Role::parse(payload.get("role")?.as_str()?)?;
    let content = payload.get("content")?.as_str()?.to_string();
    let timestamp = DateTime::parse_from_rfc3339(payload.get("timestamp")?.as_str()?)
        .ok()?
        .with_timezone(&Utc);
    Some(Message { role, content, timestamp })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryVectorStore;

    async fn memory() -> ConversationMemory {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let memory = ConversationMemory::new(store, "conversation_memory".to_string(), 4);
        memory.ensure_collection().await.unwrap();
        memory
    }

    #[tokio::test]
    async fn history_is_empty_for_unknown_session() {
        let memory = memory().await;
        let history = memory.history("unknown", 10).await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn append_then_history_reconstructs_order() {
        let memory = memory().await;
        memory.append("s1", Role::User, "hello").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        memory.append("s1", Role::Assistant, "hi there").await.unwrap();

        let history = memory.history("s1", 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn history_respects_limit_keeping_most_recent() {
        let memory = memory().await;
        for i in 0..5 {
            memory.append("s1", Role::User, &format!("message {i}")).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        let history = memory.history("s1", 2).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "message 4");
    }

    #[tokio::test]
    async fn clear_then_history_is_empty() {
        let memory = memory().await;
        memory.append("s1", Role::User, "hi").await.unwrap();
        let deleted = memory.clear("s1").await.unwrap();
        assert_eq!(deleted, 1);
        assert!(memory.history("s1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sweep_deletes_only_expired_points_not_whole_session() {
        let memory = memory().await;
        memory.append("s1", Role::User, "an old first turn").await.unwrap();

        // Back-date the first point directly so it is older than `max_age` without
        // waiting in real time; the second point keeps its natural, fresh timestamp.
        {
            let store = memory.store.clone();
            let rows = store.scroll(&memory.collection, &Filter::eq("session_id", "s1"), 10, None).await.unwrap();
            let (id, mut payload) = rows.into_iter().next().unwrap();
            let stale = Utc::now() - chrono::Duration::hours(48);
            payload.insert("timestamp".to_string(), json!(stale.to_rfc3339()));
            store
                .upsert(&memory.collection, vec![Point { id, vector: memory.dummy_vector(), payload }])
                .await
                .unwrap();
        }
        memory.append("s1", Role::Assistant, "a fresh reply").await.unwrap();

        let deleted = memory.sweep(chrono::Duration::hours(24)).await.unwrap();
        assert_eq!(deleted, 1);

        let history = memory.history("s1", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "a fresh reply");
    }

    #[tokio::test]
    async fn different_sessions_are_independent() {
        let memory = memory().await;
        memory.append("s1", Role::User, "a").await.unwrap();
        memory.append("s2", Role::User, "b").await.unwrap();
        assert_eq!(memory.history("s1", 10).await.unwrap().len(), 1);
        assert_eq!(memory.history("s2", 10).await.unwrap().len(), 1);
    }
}
