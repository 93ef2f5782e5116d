//! 4.J RAG Pipeline: composes the normalizer, router, memory, retrieval engine, and
//! generator into the two end-to-end flows — query and ingest. Grounded in the
//! teacher's `rag_service.rs` orchestration (search -> build_structured_context ->
//! generate) and `query_analyzer.rs`'s routing, generalized to the capability-trait
//! seams instead of a Postgres-specific repository.

use crate::capabilities::generator::{self, Generator};
use crate::capabilities::EmbeddingProvider;
use crate::config::settings::{PromptsConfig, RagConfig};
use crate::error::{CoreError, CoreResult};
use crate::ingestion::formats;
use crate::ingestion::{ExtractedContent, SourceFormat};
use crate::logging::{ActivityLog, ActivityLogger, ActivityStatus, ActivityType};
use crate::memory::{ConversationMemory, Message as MemMessage, Role as MemRole};
use crate::retrieval::RetrievalEngine;
use crate::router::{self, QueryType};
use crate::store::{Filter, Point, VectorStore};
use crate::text::chunker::{self, Block, Chunk};
use crate::text::normalizer::normalize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RetrievedSource {
    pub content: String,
    pub score: f32,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub answer: String,
    pub sources: Vec<RetrievedSource>,
    pub query_type: QueryType,
    pub session_id: String,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone)]
pub struct IngestDocument {
    pub source_name: String,
    pub content: ExtractedContent,
    pub source_format: SourceFormat,
    pub file_hash: Option<String>,
    pub custom_metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct IngestResult {
    pub documents: usize,
    pub chunks: usize,
    pub processing_time_ms: u64,
}

pub struct Pipeline {
    memory: ConversationMemory,
    retrieval: RetrievalEngine,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn Generator>,
    store: Arc<dyn VectorStore>,
    documents_collection: String,
    rag: RagConfig,
    prompts: PromptsConfig,
    logger: ActivityLogger,
}

impl Pipeline {
    pub fn new(
        memory: ConversationMemory,
        retrieval: RetrievalEngine,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn Generator>,
        store: Arc<dyn VectorStore>,
        documents_collection: String,
        rag: RagConfig,
        prompts: PromptsConfig,
        logger: ActivityLogger,
    ) -> Self {
        Self { memory, retrieval, embedder, generator, store, documents_collection, rag, prompts, logger }
    }

    /// `query(text, session_id)` — 4.J query flow. Steps 1-5 run in strict order;
    /// step 5 (memory append) is best-effort and never alters the returned answer.
    /// `use_rag = false` forces a `rag`-classified query through the no-retrieval
    /// `simple` path instead — the caller's opt-out from 4.L's procedure surface.
    pub async fn query(&self, text: &str, session_id: &str, use_rag: bool) -> CoreResult<QueryResult> {
        let start = Instant::now();
        let normalized = normalize(text);

        if normalized.trim().is_empty() {
            return Ok(QueryResult {
                answer: "لم أفهم سؤالك، هل يمكنك كتابته بشكل مختلف؟".to_string(),
                sources: Vec::new(),
                query_type: QueryType::Simple,
                session_id: session_id.to_string(),
                processing_time_ms: start.elapsed().as_millis() as u64,
            });
        }

        let history = self.memory.history(session_id, self.rag.max_history).await.unwrap_or_else(|e| {
            warn!(error = %e, "failed to load conversation history, proceeding without it");
            Vec::new()
        });

        let route = router::classify(&normalized, self.rag.simple_route_max_tokens);
        debug!(query_type = route.as_str(), session_id, "exec");
        self.logger.log_async(
            ActivityLog::builder(session_id, ActivityType::QueryReceived)
                .query_type(route.as_str())
                .message(normalized.clone())
                .build(),
        );

        let dispatched = match route {
            QueryType::Greeting => Ok((self.greeting_reply(), Vec::new())),
            QueryType::Simple => self.simple_reply(&normalized, &history).await.map(|a| (a, Vec::new())),
            QueryType::Calculator => Ok((self.calculator_reply(&normalized), Vec::new())),
            QueryType::Rag if use_rag => self.rag_reply(session_id, &normalized, &history).await,
            QueryType::Rag => self.simple_reply(&normalized, &history).await.map(|a| (a, Vec::new())),
        };

        // The user-turn memory append is committed whether or not the route
        // succeeded; a failed generation still happened from the caller's side.
        if let Err(e) = self.memory.append(session_id, MemRole::User, text).await {
            warn!(error = %e, session_id, "failed to append user message to memory");
        }

        let (answer, sources) = match dispatched {
            Ok(pair) => pair,
            Err(e) => {
                let activity = match e.kind {
                    crate::error::ErrorKind::Store => ActivityType::StoreError,
                    _ => ActivityType::GeneratorError,
                };
                self.logger.log_async(
                    ActivityLog::builder(session_id, activity)
                        .query_type(route.as_str())
                        .error(e.message.clone(), format!("{:?}", e.kind))
                        .processing_time(start.elapsed().as_millis() as i32)
                        .build(),
                );
                return Err(e);
            }
        };

        if let Err(e) = self.memory.append(session_id, MemRole::Assistant, &answer).await {
            warn!(error = %e, session_id, "failed to append assistant message to memory");
        }

        self.logger.log_async(
            ActivityLog::builder(session_id, ActivityType::AnswerReturned)
                .query_type(route.as_str())
                .response(answer.clone())
                .token_count(crate::utils::tokens::estimate_tokens(&answer) as i32)
                .chunks_retrieved(sources.len() as i32)
                .processing_time(start.elapsed().as_millis() as i32)
                .build(),
        );

        Ok(QueryResult {
            answer,
            sources,
            query_type: route,
            session_id: session_id.to_string(),
            processing_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn greeting_reply(&self) -> String {
        "أهلاً بك! كيف يمكنني مساعدتك اليوم؟".to_string()
    }

    async fn simple_reply(&self, normalized: &str, history: &[MemMessage]) -> CoreResult<String> {
        let mut messages = vec![generator::Message { role: generator::Role::System, content: self.prompts.system_prompt.clone() }];
        messages.extend(history.iter().map(to_generator_message));
        messages.push(generator::Message { role: generator::Role::User, content: normalized.to_string() });
        self.generator.generate(&messages).await
    }

    fn calculator_reply(&self, normalized: &str) -> String {
        match evaluate_arithmetic(normalized) {
            Ok(value) => format_number(value),
            Err(_) => "تعذر حساب هذا التعبير.".to_string(),
        }
    }

    async fn rag_reply(
        &self,
        session_id: &str,
        normalized: &str,
        history: &[MemMessage],
    ) -> CoreResult<(String, Vec<RetrievedSource>)> {
        let (chunks, metadata) = self.retrieval.retrieve(normalized).await?;

        if chunks.is_empty() {
            self.logger.log_async(
                ActivityLog::builder(session_id, ActivityType::RetrievalSkipped)
                    .status(ActivityStatus::Info)
                    .build(),
            );
            let mut messages =
                vec![generator::Message { role: generator::Role::System, content: self.prompts.system_prompt.clone() }];
            messages.extend(history.iter().map(to_generator_message));
            messages.push(generator::Message { role: generator::Role::User, content: normalized.to_string() });
            let answer = self.generator.generate(&messages).await?;
            return Ok((answer, Vec::new()));
        }

        self.logger.log_async(
            ActivityLog::builder(session_id, ActivityType::RetrievalExecuted)
                .chunks_retrieved(chunks.len() as i32)
                .order_only(metadata.order_only)
                .build(),
        );
        if metadata.order_only {
            self.logger.log_async(
                ActivityLog::builder(session_id, ActivityType::RerankFallback)
                    .status(ActivityStatus::Warning)
                    .build(),
            );
        }

        let formatted_context = format_context(&chunks);
        let mut messages = vec![generator::Message {
            role: generator::Role::System,
            content: format!("{}\n\n{formatted_context}", self.prompts.system_prompt),
        }];
        messages.extend(history.iter().map(to_generator_message));
        messages.push(generator::Message { role: generator::Role::User, content: normalized.to_string() });

        let answer = self.generator.generate(&messages).await?;

        let sources = chunks
            .into_iter()
            .map(|c| RetrievedSource { content: c.content, score: c.score, metadata: json!(c.payload) })
            .collect();

        Ok((answer, sources))
    }

    /// `ingest(documents)` — 4.J ingestion flow. Per-chunk embedding failure fails
    /// the whole batch; partial ingestion is never exposed.
    pub async fn ingest(&self, documents: Vec<IngestDocument>) -> CoreResult<IngestResult> {
        let start = Instant::now();
        let result = self.ingest_inner(&documents).await;

        match &result {
            Ok(r) => self.logger.log_async(
                ActivityLog::builder("system", ActivityType::IngestionCompleted)
                    .chunks_retrieved(r.chunks as i32)
                    .processing_time(start.elapsed().as_millis() as i32)
                    .custom("documents", r.documents as i64)
                    .build(),
            ),
            Err(e) => self.logger.log_async(
                ActivityLog::builder("system", ActivityType::IngestionFailed)
                    .error(e.message.clone(), format!("{:?}", e.kind))
                    .processing_time(start.elapsed().as_millis() as i32)
                    .build(),
            ),
        }

        result
    }

    async fn ingest_inner(&self, documents: &[IngestDocument]) -> CoreResult<IngestResult> {
        let start = Instant::now();
        let mut points = Vec::new();
        let mut chunk_count = 0usize;

        for doc in documents {
            if self.rag.dedup_by_hash {
                if let Some(hash) = &doc.file_hash {
                    let filter = Filter::eq("file_hash", hash.as_str());
                    let existing = self.store.count(&self.documents_collection, Some(&filter)).await.unwrap_or(0);
                    if existing > 0 {
                        debug!(source_name = %doc.source_name, "skipping duplicate document by file hash");
                        continue;
                    }
                }
            } else if doc.file_hash.is_some() {
                warn!(source_name = %doc.source_name, "re-ingesting a file whose hash may already exist (dedup disabled)");
            }

            let chunks = chunk_document(&doc.content, self.rag.chunk_size, self.rag.chunk_overlap);
            let embedded = self.embed_chunks(&doc.source_name, doc, &chunks).await?;
            chunk_count += embedded.len();
            points.extend(embedded);
        }

        if !points.is_empty() {
            self.store.upsert(&self.documents_collection, points).await?;
        }

        Ok(IngestResult {
            documents: documents.len(),
            chunks: chunk_count,
            processing_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn embed_chunks(&self, source_name: &str, doc: &IngestDocument, chunks: &[Chunk]) -> CoreResult<Vec<Point>> {
        let mut points = Vec::with_capacity(chunks.len());
        let now = chrono::Utc::now().to_rfc3339();

        let contents: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embedder.embed_batch(&contents).await?;

        for (chunk, vector) in chunks.iter().zip(vectors) {
            let mut payload: crate::store::Payload = [
                ("content".to_string(), json!(chunk.content)),
                ("source_name".to_string(), json!(source_name)),
                ("source_format".to_string(), json!(doc.source_format.as_str())),
                ("chunk_index".to_string(), json!(chunk.chunk_index)),
                ("total_chunks".to_string(), json!(chunk.total_chunks)),
                ("content_type".to_string(), json!(format!("{:?}", chunk.content_type))),
                ("ingestion_timestamp".to_string(), json!(now)),
            ]
            .into_iter()
            .collect();

            if let Some(hash) = &doc.file_hash {
                payload.insert("file_hash".to_string(), json!(hash));
            }
            if let Some(header) = &chunk.section_header {
                payload.insert("section_header".to_string(), json!(header));
            }
            if let Some(meta) = &chunk.format_metadata {
                payload.insert("format_metadata".to_string(), meta.clone());
            }
            if let Some(custom) = &doc.custom_metadata {
                payload.insert("custom_metadata".to_string(), custom.clone());
            }

            points.push(Point { id: Uuid::new_v4().to_string(), vector, payload });
        }
        Ok(points)
    }

    pub async fn history(&self, session_id: &str, limit: usize) -> CoreResult<Vec<MemMessage>> {
        self.memory.history(session_id, limit).await
    }

    pub async fn clear_history(&self, session_id: &str) -> CoreResult<u64> {
        let deleted = self.memory.clear(session_id).await?;
        self.logger.log_async(
            ActivityLog::builder(session_id, ActivityType::SessionCleared)
                .chunks_retrieved(deleted as i32)
                .build(),
        );
        Ok(deleted)
    }
}

fn to_generator_message(m: &MemMessage) -> generator::Message {
    generator::Message {
        role: match m.role {
            MemRole::User => generator::Role::User,
            MemRole::Assistant => generator::Role::Assistant,
        },
        content: m.content.clone(),
    }
}

/// Formats retrieved chunks into an XML-tagged context block, grouped by source
/// document with an explicit separator and a source marker per chunk (4.J: "explicit
/// separators and source markers").
fn format_context(chunks: &[crate::retrieval::RetrievedChunk]) -> String {
    use std::fmt::Write;
    let mut out = String::from("المصادر المتاحة:\n\n");
    for (i, chunk) in chunks.iter().enumerate() {
        let source = chunk.payload.get("source_name").and_then(|v| v.as_str()).unwrap_or("unknown");
        let _ = writeln!(
            out,
            "<source id=\"{}\" name=\"{}\" relevance=\"{:.3}\">\n{}\n</source>\n",
            i + 1,
            source,
            chunk.score,
            chunk.content.trim()
        );
    }
    out
}

/// Computes the SHA-256 hash of raw document bytes for the `file_hash` attribute
/// (3. Data Model).
pub fn file_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Dispatches a raw upload through format detection and extraction (4.K), producing
/// zero or more [`IngestDocument`]s ready for [`Pipeline::ingest`].
pub async fn extract_upload(
    declared_mime: Option<&str>,
    bytes: &[u8],
    filename: &str,
    vision: Option<&dyn crate::capabilities::vision::VisionLlm>,
    vision_mode: crate::capabilities::vision::VisionMode,
) -> CoreResult<Vec<IngestDocument>> {
    let format = crate::ingestion::detect_format(declared_mime, bytes, filename);
    let hash = file_hash(bytes);

    match format {
        SourceFormat::JsonFirecrawl => Ok(formats::extract_json_firecrawl(bytes)?
            .into_iter()
            .map(|d| extracted_to_ingest(d, SourceFormat::JsonFirecrawl, Some(hash.clone())))
            .collect()),
        SourceFormat::JsonGeneric => Ok(formats::extract_json_generic(bytes)?
            .into_iter()
            .map(|d| extracted_to_ingest(d, SourceFormat::JsonGeneric, Some(hash.clone())))
            .collect()),
        SourceFormat::Image => {
            let vision = vision.ok_or_else(|| CoreError::validation("image ingestion requires a configured vision-LLM adapter"))?;
            let blocks = formats::extract_image(bytes, vision, vision_mode).await?;
            Ok(vec![IngestDocument {
                source_name: filename.to_string(),
                content: ExtractedContent::Blocks(blocks),
                source_format: format,
                file_hash: Some(hash),
                custom_metadata: None,
            }])
        }
        SourceFormat::Pdf => {
            let blocks = formats::extract_pdf(bytes)?;
            Ok(vec![IngestDocument {
                source_name: filename.to_string(),
                content: ExtractedContent::Blocks(blocks),
                source_format: format,
                file_hash: Some(hash),
                custom_metadata: None,
            }])
        }
        SourceFormat::Html => {
            let blocks = formats::extract_html(bytes)?;
            Ok(vec![IngestDocument {
                source_name: filename.to_string(),
                content: ExtractedContent::Blocks(blocks),
                source_format: format,
                file_hash: Some(hash),
                custom_metadata: None,
            }])
        }
        SourceFormat::Markdown => {
            let blocks = formats::extract_markdown(bytes)?;
            Ok(vec![IngestDocument {
                source_name: filename.to_string(),
                content: ExtractedContent::Blocks(blocks),
                source_format: format,
                file_hash: Some(hash),
                custom_metadata: None,
            }])
        }
        SourceFormat::Docx => {
            let blocks = formats::extract_docx(bytes)?;
            Ok(vec![IngestDocument {
                source_name: filename.to_string(),
                content: ExtractedContent::Blocks(blocks),
                source_format: format,
                file_hash: Some(hash),
                custom_metadata: None,
            }])
        }
        SourceFormat::Text => {
            let text = formats::extract_text(bytes)?;
            Ok(vec![IngestDocument {
                source_name: filename.to_string(),
                content: ExtractedContent::PlainText(text),
                source_format: format,
                file_hash: Some(hash),
                custom_metadata: None,
            }])
        }
    }
}

fn extracted_to_ingest(doc: crate::ingestion::ExtractedDocument, format: SourceFormat, hash: Option<String>) -> IngestDocument {
    IngestDocument { source_name: doc.source_name, content: doc.content, source_format: format, file_hash: hash, custom_metadata: None }
}

/// Picks the chunker 4.B names for `content`'s shape: plain text goes through the
/// sentence-aware chunker, pre-tagged blocks (from any format-specific extractor) go
/// through the structure-aware chunker so `section_header`/`format_metadata` survive
/// into the stored payload.
fn chunk_document(content: &ExtractedContent, chunk_size: usize, chunk_overlap: usize) -> Vec<Chunk> {
    match content {
        ExtractedContent::PlainText(text) => {
            let normalized = normalize(text);
            chunker::chunk_sentence_aware(&normalized, chunk_size, chunk_overlap)
        }
        ExtractedContent::Blocks(blocks) => {
            let normalized_blocks: Vec<Block> =
                blocks.iter().map(|b| Block { text: normalize(&b.text), ..b.clone() }).collect();
            chunker::chunk_structure_aware(&normalized_blocks, chunk_size, chunk_overlap)
        }
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Safely evaluates the bounded arithmetic subgrammar the router already validated
/// (digits, Arabic-Indic digits, `+ - * /`, parentheses, whitespace). Recursive-descent,
/// no external crate, no `eval`.
fn evaluate_arithmetic(expr: &str) -> CoreResult<f64> {
    let normalized_digits: String = expr
        .chars()
        .map(|c| match c {
            '٠'..='٩' => char::from_digit(c as u32 - '٠' as u32, 10).unwrap_or(c),
            other => other,
        })
        .collect();

    for verb in ["احسب", "calculate", "compute"] {
        if let Some(rest) = normalized_digits.trim().strip_prefix(verb) {
            return evaluate_arithmetic(rest.trim());
        }
    }

    let mut parser = ArithmeticParser { chars: normalized_digits.chars().filter(|c| !c.is_whitespace()).collect(), pos: 0 };
    let value = parser.parse_expr()?;
    if parser.pos != parser.chars.len() {
        return Err(CoreError::validation("trailing characters in arithmetic expression"));
    }
    Ok(value)
}

struct ArithmeticParser {
    chars: Vec<char>,
    pos: usize,
}

impl ArithmeticParser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn parse_expr(&mut self) -> CoreResult<f64> {
        let mut value = self.parse_term()?;
        loop {
            match self.peek() {
                Some('+') => {
                    self.pos += 1;
                    value += self.parse_term()?;
                }
                Some('-') => {
                    self.pos += 1;
                    value -= self.parse_term()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn parse_term(&mut self) -> CoreResult<f64> {
        let mut value = self.parse_factor()?;
        loop {
            match self.peek() {
                Some('*') => {
                    self.pos += 1;
                    value *= self.parse_factor()?;
                }
                Some('/') => {
                    self.pos += 1;
                    let divisor = self.parse_factor()?;
                    if divisor == 0.0 {
                        return Err(CoreError::validation("division by zero"));
                    }
                    value /= divisor;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn parse_factor(&mut self) -> CoreResult<f64> {
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let value = self.parse_expr()?;
                if self.peek() != Some(')') {
                    return Err(CoreError::validation("unbalanced parentheses"));
                }
                self.pos += 1;
                Ok(value)
            }
            Some('-') => {
                self.pos += 1;
                Ok(-self.parse_factor()?)
            }
            _ => self.parse_number(),
        }
    }

    fn parse_number(&mut self) -> CoreResult<f64> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '.') {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(CoreError::validation("expected a number in arithmetic expression"));
        }
        let slice: String = self.chars[start..self.pos].iter().collect();
        slice.parse::<f64>().map_err(|_| CoreError::validation(format!("invalid number literal: {slice}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluates_basic_arithmetic() {
        assert_eq!(evaluate_arithmetic("1 + 1").unwrap(), 2.0);
        assert_eq!(evaluate_arithmetic("12 * 4").unwrap(), 48.0);
        assert_eq!(evaluate_arithmetic("(2+3)*4").unwrap(), 20.0);
    }

    #[test]
    fn evaluates_arabic_indic_digits() {
        assert_eq!(evaluate_arithmetic("٢+٣").unwrap(), 5.0);
    }

    #[test]
    fn strips_leading_calculator_verb() {
        assert_eq!(evaluate_arithmetic("احسب 12 * 4").unwrap(), 48.0);
    }

    #[test]
    fn rejects_division_by_zero() {
        assert!(evaluate_arithmetic("1 / 0").is_err());
    }

    #[test]
    fn format_number_drops_trailing_zero_for_integers() {
        assert_eq!(format_number(2.0), "2");
        assert_eq!(format_number(2.5), "2.5");
    }
}
