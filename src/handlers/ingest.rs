use crate::handlers::ApiError;
use crate::state::AppState;
use axum::extract::{Multipart, State};
use axum::Json;
use rag_core::capabilities::vision::VisionMode;
use rag_core::error::CoreError;
use rag_core::ingestion::SourceFormat;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct IngestTextsRequest {
    pub texts: Vec<String>,
    #[serde(default)]
    pub metadatas: Vec<Option<serde_json::Value>>,
    pub document_type: Option<SourceFormat>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub documents: usize,
    pub chunks: usize,
    pub processing_time_ms: u64,
}

impl From<rag_core::pipeline::IngestResult> for IngestResponse {
    fn from(r: rag_core::pipeline::IngestResult) -> Self {
        Self { documents: r.documents, chunks: r.chunks, processing_time_ms: r.processing_time_ms }
    }
}

pub async fn ingest_texts_handler(
    State(state): State<AppState>,
    Json(req): Json<IngestTextsRequest>,
) -> Result<Json<IngestResponse>, ApiError> {
    let result = state.core.ingest_texts(req.texts, req.metadatas, req.document_type).await?;
    Ok(Json(result.into()))
}

/// Accepts one `file` field plus an optional `metadata` field (a JSON object as
/// text) in a multipart body — the same shape the teacher's upload handler used,
/// generalized from a fixed `document_id` form-field set to the procedure surface's
/// free-form `custom_metadata`.
pub async fn ingest_file_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<IngestResponse>, ApiError> {
    let mut filename = None;
    let mut declared_mime = None;
    let mut bytes = None;
    let mut custom_metadata = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| CoreError::validation(e.to_string()))? {
        match field.name() {
            Some("file") => {
                filename = field.file_name().map(str::to_string);
                declared_mime = field.content_type().map(str::to_string);
                bytes = Some(field.bytes().await.map_err(|e| CoreError::validation(e.to_string()))?.to_vec());
            }
            Some("metadata") => {
                let text = field.text().await.map_err(|e| CoreError::validation(e.to_string()))?;
                custom_metadata = serde_json::from_str(&text).ok();
            }
            _ => {}
        }
    }

    let bytes = bytes.ok_or_else(|| CoreError::validation("multipart body missing a \"file\" field"))?;
    let filename = filename.unwrap_or_else(|| "upload".to_string());

    let result = state
        .core
        .ingest_file(bytes, &filename, declared_mime.as_deref(), custom_metadata, VisionMode::Auto)
        .await?;
    Ok(Json(result.into()))
}
