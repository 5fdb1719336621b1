//! Import resolution: ties each import statement to the project file and
//! symbol it names, when they exist in the index.
//!
//! Resolution order per import name:
//! 1. Module-path → file-path translation by language convention, then a
//!    short-name lookup restricted to that file (`import_trace`, 1.0).
//! 2. Project-wide short-name lookup; accepted only when exactly one
//!    candidate exists (`heuristic_unique`, 0.6).
//!
//! Standard-library and third-party imports resolve to nothing and are
//! left untouched; that is not an error.

use crate::error::StoreResult;
use crate::parsing::{Language, MODULE_SCOPE};
use crate::store::{StoredImport, SymbolReference, SymbolStore};
use crate::types::{RefKind, ResolutionMethod};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Outcome counters for one import-resolution pass.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ImportResolution {
    pub imports_seen: usize,
    pub files_resolved: usize,
    pub symbols_resolved: usize,
    pub heuristic_resolved: usize,
    pub unresolved: usize,
}

/// Resolve imports for `files` (or the whole index when `None`).
///
/// Idempotent: references are upserted under their uniqueness key and
/// import targets are plain column updates.
pub fn resolve_imports(
    store: &SymbolStore,
    files: Option<&[String]>,
) -> StoreResult<ImportResolution> {
    let imports = match files {
        Some(paths) => store.imports_in_files(paths)?,
        None => store.all_imports()?,
    };

    // Path lookup table for module-path translation.
    let known_files: Vec<String> = store
        .list_files()?
        .into_iter()
        .map(|f| f.meta.path)
        .collect();

    let mut report = ImportResolution::default();
    let mut references = Vec::new();
    let mut target_updates: Vec<(i64, String, Option<String>)> = Vec::new();

    for stored in &imports {
        report.imports_seen += 1;
        let target_file = resolve_module_file(stored, &known_files);

        let names: Vec<String> = if stored.import.names.is_empty() {
            Vec::new()
        } else {
            stored.import.names.clone()
        };

        let mut resolved_any = false;
        if let Some(target_file) = &target_file {
            report.files_resolved += 1;

            if names.is_empty() {
                // Whole-module import: record the file target only.
                target_updates.push((stored.id, target_file.clone(), None));
                resolved_any = true;
            }

            for name in &names {
                let symbols = store.find_symbols(name, true, Some(target_file))?;
                if let Some(symbol) = symbols.first() {
                    report.symbols_resolved += 1;
                    resolved_any = true;
                    target_updates.push((stored.id, target_file.clone(), Some(name.clone())));
                    references.push(import_reference(
                        stored,
                        symbol,
                        1.0,
                        ResolutionMethod::ImportTrace,
                    ));
                } else {
                    target_updates.push((stored.id, target_file.clone(), None));
                }
            }
        } else {
            // No file target; a unique project-wide name still counts,
            // with lowered confidence.
            for name in &names {
                let symbols = store.find_symbols(name, true, None)?;
                if symbols.len() == 1 {
                    let symbol = &symbols[0];
                    report.heuristic_resolved += 1;
                    resolved_any = true;
                    target_updates.push((
                        stored.id,
                        symbol.file_path.to_string(),
                        Some(name.clone()),
                    ));
                    references.push(import_reference(
                        stored,
                        symbol,
                        0.6,
                        ResolutionMethod::HeuristicUnique,
                    ));
                }
            }
        }

        if !resolved_any {
            report.unresolved += 1;
        }
    }

    store.with_txn(|txn| {
        for (import_id, file, symbol) in &target_updates {
            txn.set_import_target(*import_id, file, symbol.as_deref())?;
        }
        txn.write_references_batch(&references)?;
        Ok(())
    })?;

    tracing::debug!(
        seen = report.imports_seen,
        resolved = report.symbols_resolved,
        heuristic = report.heuristic_resolved,
        unresolved = report.unresolved,
        "import resolution pass complete"
    );
    Ok(report)
}

fn import_reference(
    stored: &StoredImport,
    symbol: &crate::symbol::Symbol,
    confidence: f32,
    method: ResolutionMethod,
) -> SymbolReference {
    SymbolReference {
        source_file: stored.file_path.clone(),
        source_line: stored.import.line,
        source_symbol: MODULE_SCOPE.to_string(),
        kind: RefKind::Import,
        target_file: Some(symbol.file_path.to_string()),
        target_symbol: Some(symbol.name.to_string()),
        target_kind: Some(symbol.kind),
        confidence,
        resolution_method: method,
    }
}

/// Translate a module path into the index file it names, if any.
fn resolve_module_file(stored: &StoredImport, known_files: &[String]) -> Option<String> {
    let module = &stored.import.module_path;
    let importer_dir = Path::new(&stored.file_path)
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_default();

    // Relative imports anchor at the importer's directory.
    let relative = module.starts_with('.');
    let mut anchor = importer_dir.clone();
    if relative {
        let mut dots = 0usize;
        match stored.language {
            Language::Python => {
                dots = module.chars().take_while(|c| *c == '.').count();
            }
            _ => {
                let mut rest = module.as_str();
                while let Some(stripped) = rest.strip_prefix("../") {
                    dots += 1;
                    rest = stripped;
                }
            }
        }
        for _ in 0..dots.saturating_sub(1) {
            if let Some(parent) = anchor.parent() {
                anchor = parent.to_path_buf();
            }
        }
    }

    for candidate in stored.language.module_path_candidates(module) {
        // Go candidates name a package directory.
        if candidate.ends_with('/') {
            let package = candidate.trim_end_matches('/');
            let hit = known_files.iter().find(|path| {
                Path::new(path)
                    .parent()
                    .and_then(|p| p.file_name())
                    .and_then(|n| n.to_str())
                    == Some(package)
                    && path.as_str() != stored.file_path
            });
            if let Some(hit) = hit {
                return Some(hit.clone());
            }
            continue;
        }

        if relative {
            let joined = anchor.join(&candidate);
            let joined = joined.to_string_lossy().to_string();
            if let Some(hit) = known_files.iter().find(|path| **path == joined) {
                return Some(hit.clone());
            }
            continue;
        }

        // Absolute module paths match by suffix against the project tree.
        let suffixed = format!("/{candidate}");
        if let Some(hit) = known_files
            .iter()
            .find(|path| path.ends_with(&suffixed) || **path == candidate)
        {
            return Some(hit.clone());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FileMeta;
    use crate::symbol::NewSymbol;
    use crate::types::{LineSpan, SymbolKind};
    use crate::parsing::NewImport;
    use tempfile::TempDir;

    fn setup() -> (TempDir, SymbolStore) {
        let temp = TempDir::new().unwrap();
        let (store, _) = SymbolStore::open(temp.path()).unwrap();
        (temp, store)
    }

    fn add_file(store: &SymbolStore, path: &str, language: Language) {
        store
            .with_txn(|txn| {
                txn.upsert_file(&FileMeta {
                    path: path.to_string(),
                    language,
                    content_hash: "h".to_string(),
                    size: 1,
                    mtime: 0,
                    revision: None,
                })?;
                Ok(())
            })
            .unwrap();
    }

    fn add_symbol(store: &SymbolStore, path: &str, name: &str, kind: SymbolKind) {
        store
            .with_txn(|txn| {
                let file = txn.upsert_file(&FileMeta {
                    path: path.to_string(),
                    language: Language::Python,
                    content_hash: "h".to_string(),
                    size: 1,
                    mtime: 0,
                    revision: None,
                })?;
                txn.write_symbols_batch(
                    file,
                    &[NewSymbol::new(name, name, kind, LineSpan::new(1, 5))],
                    1000,
                )?;
                Ok(())
            })
            .unwrap();
    }

    fn add_import(store: &SymbolStore, path: &str, import: NewImport) {
        store
            .with_txn(|txn| {
                let file = txn.upsert_file(&FileMeta {
                    path: path.to_string(),
                    language: Language::Python,
                    content_hash: "h".to_string(),
                    size: 1,
                    mtime: 0,
                    revision: None,
                })?;
                txn.write_imports_batch(file, &[import.clone()], 1000)?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_import_trace_resolution() {
        let (_temp, store) = setup();
        add_symbol(&store, "/proj/pkg/auth.py", "AuthHandler", SymbolKind::Class);
        add_import(
            &store,
            "/proj/main.py",
            NewImport::module("pkg.auth", 1).with_names(vec!["AuthHandler".to_string()]),
        );

        let report = resolve_imports(&store, None).unwrap();
        assert_eq!(report.symbols_resolved, 1);

        let imports = store.imports_in_file("/proj/main.py").unwrap();
        assert_eq!(imports[0].target_file.as_deref(), Some("/proj/pkg/auth.py"));
        assert_eq!(imports[0].target_symbol.as_deref(), Some("AuthHandler"));

        let refs = store.references_from("/proj/main.py", None).unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].kind, RefKind::Import);
        assert_eq!(refs[0].confidence, 1.0);
        assert_eq!(refs[0].resolution_method, ResolutionMethod::ImportTrace);
    }

    #[test]
    fn test_unique_candidate_heuristic() {
        let (_temp, store) = setup();
        add_symbol(&store, "/proj/lib/handlers.py", "RareHandler", SymbolKind::Class);
        // Module path does not translate, but the name is unique.
        add_import(
            &store,
            "/proj/main.py",
            NewImport::module("vendored.bundle", 1).with_names(vec!["RareHandler".to_string()]),
        );

        let report = resolve_imports(&store, None).unwrap();
        assert_eq!(report.heuristic_resolved, 1);

        let refs = store.references_from("/proj/main.py", None).unwrap();
        assert_eq!(refs[0].confidence, 0.6);
        assert_eq!(refs[0].resolution_method, ResolutionMethod::HeuristicUnique);
    }

    #[test]
    fn test_external_imports_stay_unresolved() {
        let (_temp, store) = setup();
        add_file(&store, "/proj/main.py", Language::Python);
        add_import(
            &store,
            "/proj/main.py",
            NewImport::module("os", 1),
        );

        let report = resolve_imports(&store, None).unwrap();
        assert_eq!(report.unresolved, 1);
        assert!(store.references_from("/proj/main.py", None).unwrap().is_empty());
    }

    #[test]
    fn test_idempotent_rerun() {
        let (_temp, store) = setup();
        add_symbol(&store, "/proj/pkg/auth.py", "AuthHandler", SymbolKind::Class);
        add_import(
            &store,
            "/proj/main.py",
            NewImport::module("pkg.auth", 1).with_names(vec!["AuthHandler".to_string()]),
        );

        resolve_imports(&store, None).unwrap();
        resolve_imports(&store, None).unwrap();

        let refs = store.references_from("/proj/main.py", None).unwrap();
        assert_eq!(refs.len(), 1);
    }
}
