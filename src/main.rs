//! Thin HTTP binary mounting the library's procedure surface (`rag_core::api`)
//! behind axum. Every route is a direct, untransformed call into
//! `rag_core::api::RagCore` — no business logic lives in this crate. Authentication,
//! IP allow-listing, and request signing are presentation-layer concerns spec.md §1
//! treats as external collaborators and are not carried into this binary.

mod handlers;
mod state;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use rag_core::api::RagCore;
use rag_core::config::Settings;
use state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info,rag_core=debug".to_string()))
        .with_target(true)
        .json()
        .init();

    info!("loading configuration");
    let settings = Settings::load()?;

    let host = settings.server.host.clone();
    let port = settings.server.port;
    let max_batch_size_bytes = settings.rag.max_batch_size_bytes as usize;

    info!("constructing core");
    let core = RagCore::new(settings).await?;
    let state = AppState { core: Arc::new(core) };

    let app = build_router(state).layer(DefaultBodyLimit::max(max_batch_size_bytes));

    let addr = SocketAddr::from((host.parse::<std::net::IpAddr>()?, port));
    info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness_check))
        .route("/api/query", post(handlers::query::query_handler))
        .route("/api/ingest/texts", post(handlers::ingest::ingest_texts_handler))
        .route("/api/ingest/file", post(handlers::ingest::ingest_file_handler))
        .route("/api/history/{session_id}", get(handlers::history::history_handler))
        .route("/api/history/{session_id}", delete(handlers::history::clear_history_handler))
        .route("/api/collections/{name}", get(handlers::collections::collection_info_handler))
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default().include_headers(false)))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
