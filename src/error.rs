//! Error types for the code-intelligence engine.
//!
//! The taxonomy separates file-local failures (recovered internally and
//! surfaced as diagnostics), transaction-local failures (batch rollback),
//! and engine-level failures (propagated to the caller). No panics cross
//! the public API.

use crate::types::SymbolId;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Schema mismatch or missing index revision. The caller must rebuild.
    #[error(
        "Index is stale: found schema version {found}, engine expects {expected}. A full rebuild is required."
    )]
    StaleIndex { found: u32, expected: u32 },

    /// Per-file or global cap was hit. The store is consistent; ingest is
    /// partial.
    #[error("Capacity exceeded: {reason}")]
    CapacityExceeded { reason: String },

    #[error("Embedding or vector index unavailable: {reason}")]
    VectorUnavailable { reason: String },

    #[error("Symbol '{name}' not found in the index")]
    SymbolNotFound { name: String },

    #[error("File '{path}' not found in the index")]
    FileNotFound { path: PathBuf },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation deadline expired")]
    Timeout,

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },
}

/// Errors specific to parsing operations. Always confined to one file; the
/// scanner attaches the offending path when it builds a diagnostic.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Failed to initialize {language} parser: {reason}")]
    ParserInit { language: String, reason: String },

    #[error("{language} source is not syntactically valid")]
    Syntax { language: String },

    #[error("Source is not valid UTF-8")]
    InvalidUtf8,
}

/// Errors specific to the persistent store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Transaction failed and was rolled back: {cause}")]
    TransactionFailed { cause: String },

    #[error("Vector index error: {0}")]
    VectorIndex(String),

    #[error("Embedding dimension mismatch: index has {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Malformed full-text query: {0}")]
    MalformedQuery(String),

    #[error("No stored row for symbol {id:?}")]
    SymbolRowMissing { id: SymbolId },

    #[error("Snippet source '{path}' is missing on disk: {source}")]
    SnippetSourceMissing {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Non-fatal condition raised by a resolver pass. Recorded per class or per
/// import; the pass continues.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ResolverWarning {
    pub file: String,
    pub subject: String,
    pub message: String,
}

impl ResolverWarning {
    pub fn new(
        file: impl Into<String>,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            subject: subject.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ResolverWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}: {}", self.file, self.subject, self.message)
    }
}

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result alias for parse operations.
pub type ParseResult<T> = Result<T, ParseError>;
