use crate::handlers::ApiError;
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub text: String,
    pub session_id: String,
    #[serde(default = "default_use_rag")]
    pub use_rag: bool,
}

fn default_use_rag() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct SourceResponse {
    pub content: String,
    pub score: f32,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<SourceResponse>,
    pub query_type: &'static str,
    pub session_id: String,
    pub processing_time_ms: u64,
}

pub async fn query_handler(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let result = state.core.query(&req.text, &req.session_id, req.use_rag).await?;

    Ok(Json(QueryResponse {
        answer: result.answer,
        sources: result
            .sources
            .into_iter()
            .map(|s| SourceResponse { content: s.content, score: s.score, metadata: s.metadata })
            .collect(),
        query_type: result.query_type.as_str(),
        session_id: result.session_id,
        processing_time_ms: result.processing_time_ms,
    }))
}
