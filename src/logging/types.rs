use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Activity type categories emitted by the pipeline (4.J) at each stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    QueryReceived,
    AnswerReturned,
    RetrievalExecuted,
    RetrievalSkipped,
    RerankFallback,
    GeneratorError,
    StoreError,
    SessionCleared,
    MemorySwept,
    IngestionCompleted,
    IngestionFailed,
}

impl ActivityType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::QueryReceived => "query_received",
            Self::AnswerReturned => "answer_returned",
            Self::RetrievalExecuted => "retrieval_executed",
            Self::RetrievalSkipped => "retrieval_skipped",
            Self::RerankFallback => "rerank_fallback",
            Self::GeneratorError => "generator_error",
            Self::StoreError => "store_error",
            Self::SessionCleared => "session_cleared",
            Self::MemorySwept => "memory_swept",
            Self::IngestionCompleted => "ingestion_completed",
            Self::IngestionFailed => "ingestion_failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Success,
    Error,
    Warning,
    Info,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

/// One activity log entry. `session_id` is the opaque caller-supplied session
/// identifier (3. Data Model); there is no user/auth concept in this core, so
/// unlike the teacher's relational `user_id`/`ip_address`/`user_agent` fields, this
/// entry carries only what the library itself observes.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    pub session_id: String,
    pub activity_type: ActivityType,
    pub activity_status: ActivityStatus,

    pub query_type: Option<String>,
    pub message_content: Option<String>,
    pub response_content: Option<String>,

    pub token_count: Option<i32>,
    pub chunks_retrieved: Option<i32>,
    pub order_only: Option<bool>,

    pub processing_time_ms: Option<i32>,

    pub error_message: Option<String>,
    pub error_type: Option<String>,

    pub created_at: DateTime<Utc>,

    pub custom_fields: Option<HashMap<String, Value>>,
}

impl ActivityLog {
    pub fn builder(session_id: impl Into<String>, activity_type: ActivityType) -> ActivityLogBuilder {
        ActivityLogBuilder::new(session_id, activity_type)
    }
}

pub struct ActivityLogBuilder {
    log: ActivityLog,
}

impl ActivityLogBuilder {
    pub fn new(session_id: impl Into<String>, activity_type: ActivityType) -> Self {
        Self {
            log: ActivityLog {
                session_id: session_id.into(),
                activity_type,
                activity_status: ActivityStatus::Success,
                query_type: None,
                message_content: None,
                response_content: None,
                token_count: None,
                chunks_retrieved: None,
                order_only: None,
                processing_time_ms: None,
                error_message: None,
                error_type: None,
                created_at: Utc::now(),
                custom_fields: None,
            },
        }
    }

    pub fn status(mut self, status: ActivityStatus) -> Self {
        self.log.activity_status = status;
        self
    }

    pub fn query_type(mut self, query_type: impl Into<String>) -> Self {
        self.log.query_type = Some(query_type.into());
        self
    }

    pub fn message(mut self, content: impl Into<String>) -> Self {
        self.log.message_content = Some(content.into());
        self
    }

    pub fn response(mut self, content: impl Into<String>) -> Self {
        self.log.response_content = Some(content.into());
        self
    }

    pub fn token_count(mut self, count: i32) -> Self {
        self.log.token_count = Some(count);
        self
    }

    pub fn chunks_retrieved(mut self, count: i32) -> Self {
        self.log.chunks_retrieved = Some(count);
        self
    }

    pub fn order_only(mut self, order_only: bool) -> Self {
        self.log.order_only = Some(order_only);
        self
    }

    pub fn processing_time(mut self, ms: i32) -> Self {
        self.log.processing_time_ms = Some(ms);
        self
    }

    pub fn error(mut self, message: impl Into<String>, error_type: impl Into<String>) -> Self {
        self.log.error_message = Some(message.into());
        self.log.error_type = Some(error_type.into());
        self.log.activity_status = ActivityStatus::Error;
        self
    }

    pub fn custom(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.log.custom_fields.get_or_insert_with(HashMap::new).insert(key.to_string(), value.into());
        self
    }

    pub fn build(self) -> ActivityLog {
        self.log
    }
}
