use rag_core::api::RagCore;
use std::sync::Arc;

/// Shared application state for the HTTP binary. The library crate (`rag_core`)
/// knows nothing of axum; this is the thin seam between the two.
#[derive(Clone)]
pub struct AppState {
    pub core: Arc<RagCore>,
}
