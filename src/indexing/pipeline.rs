//! The ingest pipeline: parallel parsing funneled into the single writer.
//!
//! Files are processed in discovery order, batch by batch. A producer
//! thread parses each batch on a rayon pool (one parser per worker thread,
//! reused across files) and sends the completed batch through a bounded
//! channel, so parsing of batch N+1 overlaps with writing of batch N while
//! memory stays bounded by one batch per side.

use crate::cancel::CancellationToken;
use crate::config::Settings;
use crate::embedding::Embedder;
use crate::error::{EngineError, EngineResult};
use crate::parsing::{Language, LanguageParser, create_parser};
use crate::scanner::{Diagnostic, DiagnosticKind, ScanOutcome, Scanner};
use crate::store::SymbolStore;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use super::IngestReport;
use super::writer::BatchedWriter;

thread_local! {
    static PARSERS: RefCell<HashMap<Language, Box<dyn LanguageParser>>> =
        RefCell::new(HashMap::new());
}

/// Parse one file with this worker thread's cached parser.
fn scan_with_cached_parser(
    scanner: &Scanner,
    path: &PathBuf,
    language: Language,
    known_hash: Option<&str>,
) -> ScanOutcome {
    PARSERS.with(|cell| {
        let mut parsers = cell.borrow_mut();
        let parser = match parsers.entry(language) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => match create_parser(language) {
                Ok(parser) => entry.insert(parser),
                Err(e) => {
                    return ScanOutcome::Skipped(Diagnostic::new(
                        path.to_string_lossy(),
                        DiagnosticKind::ParseFailure,
                        e.to_string(),
                    ));
                }
            },
        };
        scanner.scan_file(path, parser.as_mut(), known_hash)
    })
}

/// Run a full ingest of `root` into the store.
pub fn ingest(
    store: &SymbolStore,
    settings: &Arc<Settings>,
    embedder: Option<&dyn Embedder>,
    root: &std::path::Path,
    cancel: &CancellationToken,
) -> EngineResult<IngestReport> {
    let scanner = Scanner::new(Arc::clone(settings));
    let files = scanner.discover(root);
    ingest_files(store, settings, embedder, &files, cancel)
}

/// Ingest an explicit file list (used by the incremental layer).
pub fn ingest_files(
    store: &SymbolStore,
    settings: &Arc<Settings>,
    embedder: Option<&dyn Embedder>,
    files: &[PathBuf],
    cancel: &CancellationToken,
) -> EngineResult<IngestReport> {
    let scanner = Scanner::new(Arc::clone(settings));
    let allowlist = settings.extension_allowlist();
    let batch_size = settings.indexing.batch_size.max(1);

    // Hashes of already-indexed files, for the unchanged fast path.
    let known_hashes: HashMap<String, String> = store
        .list_files()?
        .into_iter()
        .map(|f| (f.meta.path.clone(), f.meta.content_hash))
        .collect();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(settings.indexing.parallel_threads.max(1))
        .build()
        .map_err(|e| EngineError::Config {
            reason: format!("cannot build parser pool: {e}"),
        })?;

    let mut report = IngestReport::default();
    let writer = BatchedWriter::new(store, settings, embedder);

    let span = tracing::info_span!("ingest", files = files.len());
    let _guard = span.enter();

    std::thread::scope(|scope| -> EngineResult<()> {
        let (sender, receiver) = crossbeam_channel::bounded::<Vec<ScanOutcome>>(1);

        let producer_cancel = cancel.clone();
        let producer = scope.spawn(move || {
            for chunk in files.chunks(batch_size) {
                if producer_cancel.is_cancelled() {
                    return;
                }
                let batch: Vec<ScanOutcome> = pool.install(|| {
                    use rayon::prelude::*;
                    chunk
                        .par_iter()
                        .map(|path| {
                            let Some(language) = path
                                .extension()
                                .and_then(|e| e.to_str())
                                .and_then(|ext| allowlist.get(&ext.to_lowercase()))
                                .and_then(|key| Language::parse(key))
                            else {
                                return ScanOutcome::Skipped(Diagnostic::new(
                                    path.to_string_lossy(),
                                    DiagnosticKind::ParseFailure,
                                    "no parser registered for extension",
                                ));
                            };
                            let known = known_hashes
                                .get(&*path.to_string_lossy())
                                .map(String::as_str);
                            scan_with_cached_parser(&scanner, path, language, known)
                        })
                        .collect()
                });
                if sender.send(batch).is_err() {
                    return;
                }
            }
        });

        let mut write_error = None;
        while let Ok(batch) = receiver.recv() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            match writer.write_batch(&batch, &mut report) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    write_error = Some(e);
                    break;
                }
            }
        }

        // Unblock the producer before joining it.
        drop(receiver);
        let _ = producer.join();
        match write_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    })?;

    if cancel.is_cancelled() && !report.cancelled {
        report.cancelled = true;
    }

    tracing::info!(
        indexed = report.files_indexed,
        unchanged = report.files_unchanged,
        symbols = report.symbols_stored,
        failures = report.parse_failures,
        "ingest complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn settings() -> Arc<Settings> {
        let mut settings = Settings::default();
        settings.indexing.parallel_threads = 2;
        settings.indexing.batch_size = 2;
        Arc::new(settings)
    }

    #[test]
    fn test_ingest_project() {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("project");
        fs::create_dir_all(project.join("pkg")).unwrap();
        fs::write(
            project.join("pkg/auth.py"),
            "class AuthHandler:\n    def login(self):\n        pass\n",
        )
        .unwrap();
        fs::write(
            project.join("main.py"),
            "from pkg.auth import AuthHandler\n\n\ndef main():\n    handler = AuthHandler()\n    handler.login()\n",
        )
        .unwrap();
        fs::write(project.join("util.go"), "package util\n\nfunc Helper() int {\n\treturn 1\n}\n").unwrap();

        let store_dir = temp.path().join("store");
        let (store, _) = SymbolStore::open(&store_dir).unwrap();

        let report = ingest(
            &store,
            &settings(),
            None,
            &project,
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(report.files_indexed, 3);
        assert_eq!(report.parse_failures, 0);
        assert!(report.symbols_stored >= 4);

        let symbols = store.find_symbols("AuthHandler", true, None).unwrap();
        assert_eq!(symbols.len(), 1);
    }

    #[test]
    fn test_reingest_skips_unchanged() {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("project");
        fs::create_dir_all(&project).unwrap();
        fs::write(project.join("a.py"), "def f():\n    pass\n").unwrap();

        let store_dir = temp.path().join("store");
        let (store, _) = SymbolStore::open(&store_dir).unwrap();
        let settings = settings();

        let first = ingest(&store, &settings, None, &project, &CancellationToken::new()).unwrap();
        assert_eq!(first.files_indexed, 1);

        let second = ingest(&store, &settings, None, &project, &CancellationToken::new()).unwrap();
        assert_eq!(second.files_indexed, 0);
        assert_eq!(second.files_unchanged, 1);
    }

    #[test]
    fn test_cancellation_before_write() {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("project");
        fs::create_dir_all(&project).unwrap();
        for i in 0..10 {
            fs::write(project.join(format!("f{i}.py")), "def f():\n    pass\n").unwrap();
        }

        let store_dir = temp.path().join("store");
        let (store, _) = SymbolStore::open(&store_dir).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = ingest(&store, &settings(), None, &project, &cancel).unwrap();
        assert!(report.cancelled);
        assert_eq!(store.symbol_count().unwrap(), 0);
    }
}
