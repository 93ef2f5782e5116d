use crate::handlers::ApiError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct CollectionInfoResponse {
    pub count: u64,
    pub dimension: usize,
    pub distance: &'static str,
}

pub async fn collection_info_handler(
    State(state): State<AppState>,
    Path(collection_name): Path<String>,
) -> Result<Json<CollectionInfoResponse>, ApiError> {
    let info = state.core.collection_info(&collection_name).await?;
    Ok(Json(CollectionInfoResponse { count: info.count, dimension: info.dimension, distance: info.distance }))
}
