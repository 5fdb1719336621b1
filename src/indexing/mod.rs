//! Ingest: the scanner-to-store leg of the pipeline, plus incremental
//! updates.

pub mod incremental;
pub mod pipeline;
pub mod writer;

pub use incremental::{ChangeSet, UpdateReport, detect_changes, update};
pub use pipeline::{ingest, ingest_files};
pub use writer::BatchedWriter;

use crate::scanner::Diagnostic;
use serde::{Deserialize, Serialize};

/// Structured outcome of one ingest run.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    /// Files whose rows were (re)written.
    pub files_indexed: usize,
    /// Files skipped because their content hash matched the index.
    pub files_unchanged: usize,
    /// Files skipped entirely (byte cap, unreadable).
    pub files_skipped: usize,
    /// New symbol rows inserted.
    pub symbols_stored: usize,
    /// Rows collapsed into existing ones by the uniqueness index.
    pub duplicates_collapsed: usize,
    pub parse_failures: usize,
    /// Files truncated at the per-file symbol cap.
    pub truncations: usize,
    /// Batches rolled back (the stream continued).
    pub batches_failed: usize,
    pub embeddings_written: usize,
    /// The global symbol cap stopped the stream.
    pub capacity_reached: bool,
    pub cancelled: bool,
    /// VCS revision recorded with this ingest, when available.
    pub revision: Option<String>,
    pub diagnostics: Vec<Diagnostic>,
}
