use crate::handlers::ApiError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub role: &'static str,
    pub content: String,
    pub timestamp: String,
}

pub async fn history_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<Vec<MessageResponse>>, ApiError> {
    let messages = state.core.history(&session_id, params.limit).await?;
    Ok(Json(
        messages
            .into_iter()
            .map(|m| MessageResponse {
                role: match m.role {
                    rag_core::memory::Role::User => "user",
                    rag_core::memory::Role::Assistant => "assistant",
                },
                content: m.content,
                timestamp: m.timestamp.to_rfc3339(),
            })
            .collect(),
    ))
}

#[derive(Debug, Serialize)]
pub struct ClearHistoryResponse {
    pub deleted: u64,
}

pub async fn clear_history_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ClearHistoryResponse>, ApiError> {
    let deleted = state.core.clear_history(&session_id).await?;
    Ok(Json(ClearHistoryResponse { deleted }))
}
