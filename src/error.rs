//! Stable, boundary-facing error taxonomy.
//!
//! Internal modules propagate with `anyhow::Result`; anything that crosses the
//! procedure surface (`crate::api`) is converted into a [`CoreError`], which carries a
//! stable [`ErrorKind`] plus a human-readable message. No panics or raw `anyhow::Error`
//! escape the core boundary.

use thiserror::Error;

/// The error kinds from the error handling design, used to decide retry policy and
/// to map onto the procedure-surface exit taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input. Never retried, surfaced immediately.
    Validation,
    /// Corrupted or unparseable file. Per-file; does not poison a batch.
    Extraction,
    /// Timeout, connection refused, or 5xx from a model backend. Retried with bounded
    /// backoff before becoming `BackendUnavailable`.
    ModelTransient,
    /// A capability degraded gracefully (reranker skipped, vision-LLM unavailable).
    ModelFallback,
    /// Vector store timeout or error. Retried once before becoming `BackendUnavailable`.
    Store,
    /// Misconfiguration, raised at startup only.
    Fatal,
    /// Requested resource does not exist.
    NotFound,
    /// Input exceeded a configured limit (file size, batch size).
    ResourceExceeded,
    /// Persistent failure of a model or store backend after retries are exhausted.
    BackendUnavailable,
}

impl ErrorKind {
    /// The exit-code taxonomy from the external interfaces section:
    /// `0 success; 2 validation; 3 not-found; 4 backend-unavailable; 5 resource-exceeded; 1 unknown`.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::Validation => 2,
            ErrorKind::NotFound => 3,
            ErrorKind::BackendUnavailable | ErrorKind::ModelTransient | ErrorKind::Store => 4,
            ErrorKind::ResourceExceeded => 5,
            ErrorKind::Extraction | ErrorKind::ModelFallback | ErrorKind::Fatal => 1,
        }
    }
}

#[derive(Error, Debug)]
#[error("{kind:?}: {message}")]
pub struct CoreError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn resource_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceExceeded, message)
    }

    pub fn backend_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BackendUnavailable, message)
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Store, message)
    }

    pub fn extraction(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Extraction, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    pub fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }
}

/// Converts a lower-level store/network error into a `Store`-kind `CoreError`, the
/// shape every `VectorStore` call boundary uses.
impl From<sqlx::Error> for CoreError {
    fn from(e: sqlx::Error) -> Self {
        CoreError::store(e.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
