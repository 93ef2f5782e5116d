pub mod collections;
pub mod health;
pub mod history;
pub mod ingest;
pub mod query;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rag_core::error::{CoreError, ErrorKind};
use serde_json::json;

/// Maps the procedure-surface error taxonomy onto HTTP status, mirroring the
/// `exit_code` mapping `rag_core::error` already defines for the CLI surface.
pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::ResourceExceeded => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::BackendUnavailable | ErrorKind::ModelTransient | ErrorKind::Store => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorKind::Extraction => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::ModelFallback | ErrorKind::Fatal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.message }))).into_response()
    }
}
