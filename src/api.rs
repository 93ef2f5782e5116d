//! 4.L Core API Surface: the named procedures a presentation layer calls. Assembles
//! every capability and the store from [`Settings`] once at construction (design
//! notes §9: "no hidden process-wide singletons"), then dispatches to
//! [`crate::pipeline::Pipeline`] and [`crate::ingestion`].

use crate::capabilities::embedding::HttpEmbeddingProvider;
use crate::capabilities::generator::{self, Generator, OpenAiCompatibleGenerator};
use crate::capabilities::reranker::HttpReranker;
use crate::capabilities::vision::{HttpVisionLlm, VisionLlm, VisionMode};
use crate::capabilities::{EmbeddingProvider, Reranker};
use crate::config::settings::{GeneratorBackend, Settings};
use crate::error::{CoreError, CoreResult};
use crate::ingestion::SourceFormat;
use crate::logging::{ActivityLog, ActivityLogger, ActivityStatus, ActivityType, LoggerConfig};
use crate::memory::{ConversationMemory, Message};
use crate::pipeline::{self, IngestDocument, IngestResult, Pipeline, QueryResult};
use crate::retrieval::RetrievalEngine;
use crate::store::postgres::PostgresVectorStore;
use crate::store::{Distance, VectorStore};
use crate::utils::limiters::Limiters;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

pub struct RagCore {
    pipeline: Pipeline,
    vision: Option<Arc<dyn VisionLlm>>,
    store: Arc<dyn VectorStore>,
    documents_collection: String,
    embedding_dimension: usize,
    max_file_size_bytes: u64,
    max_batch_size_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionInfo {
    pub count: u64,
    pub dimension: usize,
    pub distance: &'static str,
}

impl RagCore {
    /// Builds every capability and the store from `settings`, ensures both
    /// collections exist, and returns a ready-to-use core. Fails fast (design notes
    /// §9, 4.I) if the configured store is unreachable.
    pub async fn new(settings: Settings) -> CoreResult<Self> {
        let limiters = Arc::new(Limiters::new(&settings.limits));

        let store: Arc<dyn VectorStore> = Arc::new(
            PostgresVectorStore::connect(&settings.store.url, settings.store.pool_max_size, settings.store.pool_timeout_seconds)
                .await?,
        );
        store
            .ensure_collection(&settings.store.documents_collection, settings.embedding.dimension, Distance::Cosine)
            .await?;
        store
            .ensure_collection(&settings.store.memory_collection, settings.embedding.dimension, Distance::Cosine)
            .await?;

        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HttpEmbeddingProvider::new(
            &settings.embedding,
            limiters.clone(),
            Duration::from_secs(settings.limits.embedding_timeout_seconds),
        ));

        let reranker: Option<Arc<dyn Reranker>> = if settings.reranker.enabled {
            Some(Arc::new(HttpReranker::new(
                &settings.reranker,
                limiters.clone(),
                Duration::from_secs(settings.limits.rerank_timeout_seconds),
            )))
        } else {
            None
        };

        let generator: Arc<dyn Generator> = build_generator(&settings, limiters.clone()).await?;

        let vision: Option<Arc<dyn VisionLlm>> = if settings.vision.enabled {
            Some(Arc::new(HttpVisionLlm::new(
                settings.vision.base_url.clone(),
                settings.vision.model.clone(),
                Duration::from_secs(settings.limits.vision_timeout_seconds),
            )))
        } else {
            None
        };

        let memory = ConversationMemory::new(store.clone(), settings.store.memory_collection.clone(), settings.embedding.dimension);
        memory.ensure_collection().await?;

        let retrieval = RetrievalEngine::new(
            store.clone(),
            embedder.clone(),
            reranker,
            settings.store.documents_collection.clone(),
            settings.rag.retrieval_top_k,
            settings.rag.reranker_top_n,
        );

        let logging_pool = PgPoolOptions::new()
            .max_connections(settings.logging.pool_max_size)
            .connect(&settings.store.url)
            .await?;
        ActivityLogger::ensure_table(&logging_pool).await.map_err(|e| CoreError::fatal(format!("activity log bootstrap failed: {e}")))?;
        let logger = ActivityLogger::new(
            logging_pool,
            LoggerConfig {
                queue_capacity: settings.logging.queue_capacity,
                batch_size: settings.logging.batch_size,
                batch_timeout_ms: settings.logging.batch_timeout_ms,
                worker_count: settings.logging.worker_count,
            },
        );

        spawn_memory_sweeper(memory.clone(), settings.rag.memory_ttl_hours, logger.clone());

        let pipeline = Pipeline::new(
            memory,
            retrieval,
            embedder,
            generator,
            store.clone(),
            settings.store.documents_collection.clone(),
            settings.rag.clone(),
            settings.prompts.clone(),
            logger,
        );

        Ok(Self {
            pipeline,
            vision,
            store,
            documents_collection: settings.store.documents_collection,
            embedding_dimension: settings.embedding.dimension,
            max_file_size_bytes: settings.rag.max_file_size_bytes,
            max_batch_size_bytes: settings.rag.max_batch_size_bytes,
        })
    }

    /// `query`: 4.J query flow. `use_rag = false` bypasses retrieval even for a
    /// `rag`-classified query.
    pub async fn query(&self, text: &str, session_id: &str, use_rag: bool) -> CoreResult<QueryResult> {
        self.pipeline.query(text, session_id, use_rag).await
    }

    /// `ingest_texts`: ingests caller-supplied raw strings, skipping format
    /// detection entirely — `document_type` picks the chunker's treatment when
    /// `Some`, otherwise each text is chunked as plain prose.
    pub async fn ingest_texts(
        &self,
        texts: Vec<String>,
        metadatas: Vec<Option<serde_json::Value>>,
        document_type: Option<SourceFormat>,
    ) -> CoreResult<IngestResult> {
        if texts.is_empty() {
            return Err(CoreError::validation("ingest_texts requires at least one text"));
        }

        let documents: Vec<IngestDocument> = texts
            .into_iter()
            .enumerate()
            .map(|(i, content)| IngestDocument {
                source_name: format!("text#{i}"),
                file_hash: Some(pipeline::file_hash(content.as_bytes())),
                content: crate::ingestion::ExtractedContent::PlainText(content),
                source_format: document_type.unwrap_or(SourceFormat::Text),
                custom_metadata: metadatas.get(i).cloned().flatten(),
            })
            .collect();

        self.pipeline.ingest(documents).await
    }

    /// `ingest_file`: detects format, extracts, then ingests. Enforces the
    /// per-file size limit before extraction (4.K).
    pub async fn ingest_file(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        declared_mime: Option<&str>,
        custom_metadata: Option<serde_json::Value>,
        image_mode: VisionMode,
    ) -> CoreResult<IngestResult> {
        crate::ingestion::check_file_size(bytes.len() as u64, self.max_file_size_bytes)?;
        crate::ingestion::check_batch_size(bytes.len() as u64, self.max_batch_size_bytes)?;

        let vision_ref = self.vision.as_deref();
        let mut documents = pipeline::extract_upload(declared_mime, &bytes, filename, vision_ref, image_mode).await?;

        if let Some(metadata) = custom_metadata {
            for doc in documents.iter_mut() {
                doc.custom_metadata = Some(metadata.clone());
            }
        }

        self.pipeline.ingest(documents).await
    }

    /// `history`: chronological message list for `session_id`, empty for an unknown
    /// session (never an error).
    pub async fn history(&self, session_id: &str, limit: usize) -> CoreResult<Vec<Message>> {
        self.pipeline.history(session_id, limit).await
    }

    /// `clear_history`: deletes every message for `session_id`.
    pub async fn clear_history(&self, session_id: &str) -> CoreResult<u64> {
        self.pipeline.clear_history(session_id).await
    }

    /// `collection_info`: point count, dimension, and distance metric for a named
    /// collection. `not-found` if the collection has never been created.
    pub async fn collection_info(&self, collection_name: &str) -> CoreResult<CollectionInfo> {
        if collection_name != self.documents_collection {
            let count = self.store.count(collection_name, None).await;
            return match count {
                Ok(count) => Ok(CollectionInfo { count, dimension: self.embedding_dimension, distance: "cosine" }),
                Err(_) => Err(CoreError::not_found(format!("collection not found: {collection_name}"))),
            };
        }
        let count = self.store.count(collection_name, None).await?;
        Ok(CollectionInfo { count, dimension: self.embedding_dimension, distance: "cosine" })
    }
}

/// Background TTL reaper for conversation memory (4.F: "messages older than
/// `memory_ttl_hours` are eligible for deletion"). Runs independently of the
/// request path on a fixed hourly tick, same spawn-and-forget shape as
/// `ActivityLogger`'s own worker loop.
fn spawn_memory_sweeper(memory: ConversationMemory, ttl_hours: i64, logger: ActivityLogger) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;
            match memory.sweep(chrono::Duration::hours(ttl_hours)).await {
                Ok(deleted) => {
                    logger.log_async(
                        ActivityLog::builder("system", ActivityType::MemorySwept)
                            .status(ActivityStatus::Info)
                            .chunks_retrieved(deleted as i32)
                            .build(),
                    );
                }
                Err(e) => error!(error = %e, "memory sweep failed"),
            }
        }
    });
}

/// Constructs the configured generator backend and, for a locally hosted server,
/// health-checks it before the core is considered ready (4.I: local-server
/// misconfiguration fails fast at startup rather than on the first query). A hosted
/// API or Gemini endpoint is not health-checked here — an outage there is transient
/// and already handled by `Generator::generate`'s own retry loop.
async fn build_generator(settings: &Settings, limiters: Arc<Limiters>) -> CoreResult<Arc<dyn Generator>> {
    match settings.generator.backend {
        GeneratorBackend::LocalVisionLlmServer => {
            let generator = OpenAiCompatibleGenerator::new(&settings.generator, limiters);
            generator.health_check().await?;
            Ok(Arc::new(generator))
        }
        GeneratorBackend::OpenAiCompatibleHosted | GeneratorBackend::OpenRouter => {
            Ok(Arc::new(OpenAiCompatibleGenerator::new(&settings.generator, limiters)))
        }
        GeneratorBackend::Gemini => Ok(Arc::new(generator::gemini_generator(&settings.generator, limiters))),
    }
}
