//! The batched writer: the single mutation path into the store.
//!
//! Each batch of scanned files commits in one transaction. Inside it,
//! every file's old rows are deleted first, then the fresh rows land in
//! chunked inserts, so readers either see a file's previous ingest or its
//! current one, never a mix. A failing batch rolls back alone; the stream
//! carries on with the next batch.

use crate::config::Settings;
use crate::embedding::Embedder;
use crate::error::{EngineResult, StoreResult};
use crate::scanner::{Diagnostic, DiagnosticKind, FileResult, ScanOutcome, hash_str};
use crate::store::{FileMeta, SymbolStore};
use crate::symbol::NewSymbol;
use crate::types::{SymbolId, VectorId};
use std::collections::HashSet;

use super::IngestReport;

/// Texts embedded per embedder call.
const EMBED_CHUNK: usize = 32;

/// Counters gathered inside one batch transaction; merged into the report
/// only when the batch commits.
#[derive(Debug, Default)]
struct BatchTally {
    files_indexed: usize,
    files_unchanged: usize,
    files_skipped: usize,
    symbols_stored: usize,
    duplicates_collapsed: usize,
    parse_failures: usize,
    truncations: usize,
    diagnostics: Vec<Diagnostic>,
    capacity_reached: bool,
    orphaned_vectors: HashSet<u32>,
    relinked_vectors: HashSet<u32>,
    embed_queue: Vec<(SymbolId, String, String)>,
}

/// Writes scan outcomes into the store, one transaction per batch.
pub struct BatchedWriter<'a> {
    store: &'a SymbolStore,
    settings: &'a Settings,
    embedder: Option<&'a dyn Embedder>,
}

impl<'a> BatchedWriter<'a> {
    pub fn new(
        store: &'a SymbolStore,
        settings: &'a Settings,
        embedder: Option<&'a dyn Embedder>,
    ) -> Self {
        Self {
            store,
            settings,
            embedder,
        }
    }

    /// Write one batch. Returns `false` when the global symbol cap was
    /// reached and the stream should terminate (the batch itself is
    /// committed first, so the store stays consistent).
    pub fn write_batch(
        &self,
        batch: &[ScanOutcome],
        report: &mut IngestReport,
    ) -> EngineResult<bool> {
        let chunk_rows = self.settings.indexing.chunk_rows;
        let cap = self.settings.indexing.max_total_symbols as u64;
        let embed_enabled = self.embedder.is_some();

        let outcome: StoreResult<BatchTally> = self.store.with_txn(|txn| {
            let mut tally = BatchTally::default();

            for scan in batch {
                let result = match scan {
                    ScanOutcome::Unchanged { .. } => {
                        tally.files_unchanged += 1;
                        continue;
                    }
                    ScanOutcome::Skipped(diagnostic) => {
                        tally.files_skipped += 1;
                        tally.diagnostics.push(diagnostic.clone());
                        continue;
                    }
                    ScanOutcome::Scanned(result) => result,
                };

                let stored = txn.symbol_count()?;
                if stored >= cap {
                    tally.capacity_reached = true;
                    break;
                }
                let remaining = (cap - stored) as usize;

                self.write_file(txn, result, remaining, chunk_rows, embed_enabled, &mut tally)?;

                if tally.capacity_reached {
                    break;
                }
            }
            Ok(tally)
        });

        let tally = match outcome {
            Ok(tally) => tally,
            Err(e) => {
                // Rolled back; the stream continues with the next batch.
                report.batches_failed += 1;
                report.diagnostics.push(Diagnostic::new(
                    "",
                    DiagnosticKind::BatchFailed,
                    e.to_string(),
                ));
                tracing::warn!(error = %e, "batch rolled back");
                return Ok(true);
            }
        };

        report.files_indexed += tally.files_indexed;
        report.files_unchanged += tally.files_unchanged;
        report.files_skipped += tally.files_skipped;
        report.symbols_stored += tally.symbols_stored;
        report.duplicates_collapsed += tally.duplicates_collapsed;
        report.parse_failures += tally.parse_failures;
        report.truncations += tally.truncations;
        report.diagnostics.extend(tally.diagnostics);

        // Vectors whose symbols did not survive the batch are orphans now
        // that the transaction committed.
        let orphans: HashSet<u32> = tally
            .orphaned_vectors
            .difference(&tally.relinked_vectors)
            .copied()
            .collect();
        if !orphans.is_empty() {
            if let Err(e) = self.store.vectors().remove(&orphans) {
                tracing::warn!(error = %e, "orphan vector removal failed");
            }
        }

        self.embed_pending(&tally.embed_queue, report);

        if tally.capacity_reached {
            report.capacity_reached = true;
            report.diagnostics.push(Diagnostic::new(
                "",
                DiagnosticKind::GlobalCapReached,
                format!(
                    "global cap of {} symbols reached; ingest stopped",
                    self.settings.indexing.max_total_symbols
                ),
            ));
            return Ok(false);
        }
        Ok(true)
    }

    /// Per-file replacement inside the batch transaction: capture the old
    /// embedding rows, delete, reinsert, re-link unchanged embeddings.
    fn write_file(
        &self,
        txn: &crate::store::StoreTxn<'_>,
        result: &FileResult,
        remaining: usize,
        chunk_rows: usize,
        embed_enabled: bool,
        tally: &mut BatchTally,
    ) -> StoreResult<()> {
        let path = result.path.to_string_lossy().to_string();

        let snapshot = txn.file_embedding_snapshot(&path)?;
        tally.orphaned_vectors.extend(txn.delete_file(&path)?);

        let file_id = txn.upsert_file(&FileMeta {
            path: path.clone(),
            language: result.language,
            content_hash: result.content_hash.clone(),
            size: result.size,
            mtime: result.mtime,
            revision: None,
        })?;

        let mut symbols: &[NewSymbol] = &result.parsed.symbols;
        if symbols.len() > remaining {
            symbols = &symbols[..remaining];
            tally.capacity_reached = true;
        }

        let written = txn.write_symbols_batch(file_id, symbols, chunk_rows)?;
        txn.write_imports_batch(file_id, &result.parsed.imports, chunk_rows)?;
        txn.write_calls_batch(file_id, &result.parsed.calls, chunk_rows)?;
        txn.write_bases_batch(file_id, &result.parsed.bases, chunk_rows)?;
        txn.write_bindings_batch(file_id, &result.parsed.bindings, chunk_rows)?;

        for (symbol, id) in symbols.iter().zip(written.ids.iter()) {
            let mut text = String::with_capacity(128);
            text.push_str(&symbol.name);
            text.push(' ');
            text.push_str(&symbol.qualified_name);
            if let Some(signature) = &symbol.signature {
                text.push(' ');
                text.push_str(signature);
            }
            if let Some(doc) = &symbol.doc {
                text.push(' ');
                text.push_str(doc);
            }
            txn.index_symbol_text(*id, &text)?;

            let input = embedding_input(symbol);
            let input_hash = hash_str(&input);
            let identity = (
                symbol.name.to_string(),
                symbol.kind.as_str().to_string(),
                symbol.span.start_line,
                symbol.span.end_line,
            );
            match snapshot.get(&identity) {
                Some((vector_id, old_hash)) if *old_hash == input_hash => {
                    if let Some(vector_id) = VectorId::new(*vector_id) {
                        txn.upsert_embedding(*id, vector_id, &input_hash)?;
                        tally.relinked_vectors.insert(vector_id.value());
                    }
                }
                _ => {
                    if embed_enabled {
                        tally.embed_queue.push((*id, input, input_hash));
                    }
                }
            }
        }

        tally.files_indexed += 1;
        tally.symbols_stored += written.inserted;
        tally.duplicates_collapsed += written.duplicates;
        for diagnostic in &result.diagnostics {
            match diagnostic.kind {
                DiagnosticKind::ParseFailure => tally.parse_failures += 1,
                DiagnosticKind::SymbolCapTruncated => tally.truncations += 1,
                _ => {}
            }
        }
        tally.diagnostics.extend(result.diagnostics.iter().cloned());
        Ok(())
    }

    /// Embed queued inputs and persist vectors. Embedding failures degrade
    /// to a diagnostic; the symbol rows are already committed.
    fn embed_pending(&self, queue: &[(SymbolId, String, String)], report: &mut IngestReport) {
        let Some(embedder) = self.embedder else {
            return;
        };
        if queue.is_empty() {
            return;
        }

        for chunk in queue.chunks(EMBED_CHUNK) {
            let texts: Vec<&str> = chunk.iter().map(|(_, input, _)| input.as_str()).collect();
            let vectors = match embedder.embed(&texts) {
                Ok(vectors) => vectors,
                Err(e) => {
                    report.diagnostics.push(Diagnostic::new(
                        "",
                        DiagnosticKind::VectorUnavailable,
                        e.to_string(),
                    ));
                    tracing::warn!(error = %e, "embedding batch failed");
                    return;
                }
            };

            let assigned: StoreResult<Vec<(VectorId, Vec<f32>)>> = self.store.with_txn(|txn| {
                let mut assigned = Vec::with_capacity(chunk.len());
                for ((symbol_id, _, input_hash), vector) in chunk.iter().zip(vectors) {
                    let vector_id = txn.next_vector_id()?;
                    txn.upsert_embedding(*symbol_id, vector_id, input_hash)?;
                    assigned.push((vector_id, vector));
                }
                Ok(assigned)
            });

            match assigned {
                Ok(entries) => {
                    if let Err(e) = self.store.vectors().upsert_batch(&entries) {
                        report.diagnostics.push(Diagnostic::new(
                            "",
                            DiagnosticKind::VectorUnavailable,
                            e.to_string(),
                        ));
                        return;
                    }
                    report.embeddings_written += entries.len();
                }
                Err(e) => {
                    report.diagnostics.push(Diagnostic::new(
                        "",
                        DiagnosticKind::VectorUnavailable,
                        e.to_string(),
                    ));
                    return;
                }
            }
        }
    }
}

/// Text whose hash decides embedding staleness. Mirrors
/// [`crate::symbol::Symbol::embedding_input`] for parsed symbols.
fn embedding_input(symbol: &NewSymbol) -> String {
    let mut text = String::with_capacity(128);
    text.push_str(&symbol.qualified_name);
    if let Some(signature) = &symbol.signature {
        text.push('\n');
        text.push_str(signature);
    }
    if let Some(doc) = &symbol.doc {
        text.push('\n');
        text.push_str(doc);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::{Language, ParsedFile};
    use crate::symbol::NewSymbol;
    use crate::types::{LineSpan, SymbolKind};
    use tempfile::TempDir;

    fn scanned(path: &str, hash: &str, symbols: Vec<NewSymbol>) -> ScanOutcome {
        ScanOutcome::Scanned(Box::new(FileResult {
            path: path.into(),
            language: Language::Python,
            content_hash: hash.to_string(),
            size: 10,
            mtime: 0,
            parsed: ParsedFile {
                symbols,
                ..Default::default()
            },
            diagnostics: Vec::new(),
        }))
    }

    fn symbol(name: &str, start: u32) -> NewSymbol {
        NewSymbol::new(name, name, SymbolKind::Function, LineSpan::new(start, start + 1))
    }

    #[test]
    fn test_batch_replaces_per_file() {
        let temp = TempDir::new().unwrap();
        let (store, _) = SymbolStore::open(temp.path()).unwrap();
        let settings = Settings::default();
        let writer = BatchedWriter::new(&store, &settings, None);

        let mut report = IngestReport::default();
        writer
            .write_batch(
                &[scanned("/p/a.py", "h1", vec![symbol("old_one", 1), symbol("old_two", 5)])],
                &mut report,
            )
            .unwrap();
        assert_eq!(store.symbol_count().unwrap(), 2);

        // Re-ingest with different contents: old rows vanish atomically.
        writer
            .write_batch(
                &[scanned("/p/a.py", "h2", vec![symbol("new_one", 1)])],
                &mut report,
            )
            .unwrap();
        assert_eq!(store.symbol_count().unwrap(), 1);
        let remaining = store.symbols_in_file("/p/a.py").unwrap();
        assert_eq!(remaining[0].name.as_ref(), "new_one");
    }

    #[test]
    fn test_global_cap_stops_stream() {
        let temp = TempDir::new().unwrap();
        let (store, _) = SymbolStore::open(temp.path()).unwrap();
        let mut settings = Settings::default();
        settings.indexing.max_total_symbols = 3;
        let writer = BatchedWriter::new(&store, &settings, None);

        let mut report = IngestReport::default();
        let keep_going = writer
            .write_batch(
                &[
                    scanned("/p/a.py", "h", vec![symbol("f1", 1), symbol("f2", 5)]),
                    scanned("/p/b.py", "h", vec![symbol("f3", 1), symbol("f4", 5)]),
                    scanned("/p/c.py", "h", vec![symbol("f5", 1)]),
                ],
                &mut report,
            )
            .unwrap();

        assert!(!keep_going);
        assert!(report.capacity_reached);
        // Exactly the cap, not one more.
        assert_eq!(store.symbol_count().unwrap(), 3);
        assert!(report
            .diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::GlobalCapReached));
    }

    #[test]
    fn test_embeddings_written_and_reused() {
        use crate::embedding::HashEmbedder;

        let temp = TempDir::new().unwrap();
        let (store, _) = SymbolStore::open(temp.path()).unwrap();
        let settings = Settings::default();
        let embedder = HashEmbedder::default();
        let writer = BatchedWriter::new(&store, &settings, Some(&embedder));

        let make = || {
            scanned(
                "/p/a.py",
                "h1",
                vec![NewSymbol::new(
                    "login",
                    "login",
                    SymbolKind::Function,
                    LineSpan::new(1, 2),
                )
                .with_doc("Authenticate the user")],
            )
        };

        let mut report = IngestReport::default();
        writer.write_batch(&[make()], &mut report).unwrap();
        assert_eq!(report.embeddings_written, 1);
        assert_eq!(store.vectors().len().unwrap(), 1);

        // Unchanged input keeps its vector: nothing new is written.
        let mut second = IngestReport::default();
        writer.write_batch(&[make()], &mut second).unwrap();
        assert_eq!(second.embeddings_written, 0);
        assert_eq!(store.vectors().len().unwrap(), 1);
    }

    #[test]
    fn test_changed_doc_refreshes_embedding() {
        use crate::embedding::HashEmbedder;

        let temp = TempDir::new().unwrap();
        let (store, _) = SymbolStore::open(temp.path()).unwrap();
        let settings = Settings::default();
        let embedder = HashEmbedder::default();
        let writer = BatchedWriter::new(&store, &settings, Some(&embedder));

        let make = |doc: &str| {
            scanned(
                "/p/a.py",
                "h1",
                vec![NewSymbol::new(
                    "login",
                    "login",
                    SymbolKind::Function,
                    LineSpan::new(1, 2),
                )
                .with_doc(doc)],
            )
        };

        let mut report = IngestReport::default();
        writer.write_batch(&[make("v1")], &mut report).unwrap();
        let mut second = IngestReport::default();
        writer.write_batch(&[make("v2")], &mut second).unwrap();

        assert_eq!(second.embeddings_written, 1);
        // Old vector was orphaned and dropped; one live vector remains.
        assert_eq!(store.vectors().len().unwrap(), 1);
    }

    #[test]
    fn test_unchanged_outcome_counts() {
        let temp = TempDir::new().unwrap();
        let (store, _) = SymbolStore::open(temp.path()).unwrap();
        let settings = Settings::default();
        let writer = BatchedWriter::new(&store, &settings, None);

        let mut report = IngestReport::default();
        writer
            .write_batch(
                &[ScanOutcome::Unchanged {
                    path: "/p/a.py".into(),
                }],
                &mut report,
            )
            .unwrap();
        assert_eq!(report.files_unchanged, 1);
        assert_eq!(report.files_indexed, 0);
    }
}
