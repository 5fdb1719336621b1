//! Incremental updates: VCS-diff driven change detection with a
//! content-hash fallback, surgical re-ingest, and closure-restricted
//! resolver reruns.

use crate::cancel::CancellationToken;
use crate::config::Settings;
use crate::embedding::Embedder;
use crate::error::EngineResult;
use crate::resolve::{ResolveReport, run_passes};
use crate::scanner::Scanner;
use crate::store::SymbolStore;
use crate::types::SymbolKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::IngestReport;
use super::pipeline::{ingest, ingest_files};

/// Files that changed since the index's recorded revision.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ChangeSet {
    pub added: Vec<PathBuf>,
    /// Modified paths with the changed line ranges (start, line_count)
    /// when the diff provides them.
    pub modified: Vec<(PathBuf, Vec<(u32, u32)>)>,
    pub deleted: Vec<PathBuf>,
    /// Working-copy revision the set was computed against, when a
    /// repository exists.
    pub revision: Option<String>,
    /// Detection fell back to content hashes (no repository, or no
    /// recorded revision).
    pub hash_fallback: bool,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    pub fn changed_count(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }
}

/// Report of one `update` call.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct UpdateReport {
    pub changes: ChangeSet,
    /// The change ratio crossed the threshold and a full rebuild ran
    /// instead of a surgical update.
    pub full_rebuild: bool,
    /// Qualified names of symbols intersecting the changed line ranges
    /// (downstream invalidation hint; re-parse is always whole-file).
    pub affected_symbols: Vec<String>,
    pub ingest: IngestReport,
    pub resolve: Option<ResolveReport>,
    pub revision: Option<String>,
}

/// Compute the set of added / modified / deleted files under `root`.
///
/// With a repository and a recorded revision, the set comes from a
/// tree-to-workdir diff (untracked files included, ignore rules applied).
/// Otherwise every discovered file is hashed and compared to the index.
pub fn detect_changes(
    store: &SymbolStore,
    settings: &Arc<Settings>,
    root: &Path,
) -> EngineResult<ChangeSet> {
    let scanner = Scanner::new(Arc::clone(settings));
    let recorded = store.get_meta("index_revision")?;

    if let Some(change_set) = git_changes(root, recorded.as_deref(), &scanner)? {
        return Ok(change_set);
    }
    hash_changes(store, &scanner, root)
}

/// Diff against the recorded revision via git2. Returns `None` when no
/// repository is found or the recorded revision does not resolve, so the
/// caller can fall back to hashing.
fn git_changes(
    root: &Path,
    recorded: Option<&str>,
    scanner: &Scanner,
) -> EngineResult<Option<ChangeSet>> {
    let Ok(repo) = git2::Repository::discover(root) else {
        return Ok(None);
    };
    let Some(recorded) = recorded else {
        return Ok(None);
    };
    let Ok(object) = repo.revparse_single(recorded) else {
        tracing::warn!(recorded, "recorded revision no longer resolves");
        return Ok(None);
    };
    let Ok(tree) = object.peel_to_tree() else {
        return Ok(None);
    };

    let workdir = repo.workdir().map(Path::to_path_buf).unwrap_or_default();

    let mut options = git2::DiffOptions::new();
    options
        .include_untracked(true)
        .recurse_untracked_dirs(true)
        .include_typechange(false);

    let diff = repo
        .diff_tree_to_workdir_with_index(Some(&tree), Some(&mut options))
        .map_err(|e| crate::error::EngineError::Config {
            reason: format!("git diff failed: {e}"),
        })?;

    let mut change_set = ChangeSet {
        revision: head_revision(&repo),
        ..Default::default()
    };
    let mut hunks: HashMap<PathBuf, Vec<(u32, u32)>> = HashMap::new();

    diff.foreach(
        &mut |delta, _| {
            let status = delta.status();
            let new_path = delta.new_file().path().map(|p| workdir.join(p));
            let old_path = delta.old_file().path().map(|p| workdir.join(p));
            match status {
                git2::Delta::Added | git2::Delta::Untracked => {
                    if let Some(path) = new_path {
                        if scanner.accepts(&path) {
                            change_set.added.push(path);
                        }
                    }
                }
                git2::Delta::Modified => {
                    if let Some(path) = new_path {
                        if scanner.accepts(&path) {
                            change_set.modified.push((path, Vec::new()));
                        }
                    }
                }
                git2::Delta::Deleted => {
                    if let Some(path) = old_path {
                        if scanner.accepts(&path) {
                            change_set.deleted.push(path);
                        }
                    }
                }
                git2::Delta::Renamed => {
                    if let Some(path) = old_path {
                        if scanner.accepts(&path) {
                            change_set.deleted.push(path);
                        }
                    }
                    if let Some(path) = delta.new_file().path().map(|p| workdir.join(p)) {
                        if scanner.accepts(&path) {
                            change_set.added.push(path);
                        }
                    }
                }
                _ => {}
            }
            true
        },
        None,
        Some(&mut |delta, hunk| {
            if let Some(path) = delta.new_file().path().map(|p| workdir.join(p)) {
                hunks
                    .entry(path)
                    .or_default()
                    .push((hunk.new_start(), hunk.new_lines()));
            }
            true
        }),
        None,
    )
    .map_err(|e| crate::error::EngineError::Config {
        reason: format!("git diff walk failed: {e}"),
    })?;

    for (path, ranges) in &mut change_set.modified {
        if let Some(found) = hunks.remove(path.as_path()) {
            *ranges = found;
        }
    }

    change_set.added.sort();
    change_set.added.dedup();
    change_set.deleted.sort();
    change_set.deleted.dedup();
    change_set.modified.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(Some(change_set))
}

fn head_revision(repo: &git2::Repository) -> Option<String> {
    repo.head()
        .ok()?
        .peel_to_commit()
        .ok()
        .map(|c| c.id().to_string())
}

/// Content-hash comparison between disk and index.
fn hash_changes(
    store: &SymbolStore,
    scanner: &Scanner,
    root: &Path,
) -> EngineResult<ChangeSet> {
    let indexed: HashMap<String, String> = store
        .list_files()?
        .into_iter()
        .map(|f| (f.meta.path.clone(), f.meta.content_hash))
        .collect();

    let mut change_set = ChangeSet {
        hash_fallback: true,
        ..Default::default()
    };
    let mut seen = BTreeSet::new();

    for path in scanner.discover(root) {
        let key = path.to_string_lossy().to_string();
        seen.insert(key.clone());
        match indexed.get(&key) {
            None => change_set.added.push(path),
            Some(stored_hash) => {
                let Ok(bytes) = std::fs::read(&path) else {
                    continue;
                };
                if crate::scanner::hash_bytes(&bytes) != *stored_hash {
                    change_set.modified.push((path, Vec::new()));
                }
            }
        }
    }

    for key in indexed.keys() {
        // Only paths under this root are this update's concern.
        if !seen.contains(key) && Path::new(key).starts_with(root) {
            change_set.deleted.push(PathBuf::from(key));
        }
    }
    change_set.deleted.sort();

    Ok(change_set)
}

/// Apply an incremental update.
pub fn update(
    store: &SymbolStore,
    settings: &Arc<Settings>,
    embedder: Option<&dyn Embedder>,
    root: &Path,
    cancel: &CancellationToken,
) -> EngineResult<UpdateReport> {
    let changes = detect_changes(store, settings, root)?;
    let mut report = UpdateReport {
        revision: changes.revision.clone(),
        changes: changes.clone(),
        ..Default::default()
    };

    if changes.is_empty() {
        return Ok(report);
    }

    let indexed_files = store.file_count()? as f64;
    let ratio = if indexed_files > 0.0 {
        changes.changed_count() as f64 / indexed_files
    } else {
        1.0
    };

    // Affected-symbol reporting from the modified line ranges, computed
    // against the pre-update store.
    for (path, ranges) in &changes.modified {
        if ranges.is_empty() {
            continue;
        }
        let path_str = path.to_string_lossy();
        for symbol in store.symbols_in_file(&path_str)? {
            let touched = ranges.iter().any(|(start, count)| {
                let end = start + count.saturating_sub(1).max(0);
                symbol.span.start_line <= end && *start <= symbol.span.end_line
            });
            if touched {
                report
                    .affected_symbols
                    .push(symbol.qualified_name.to_string());
            }
        }
    }

    if ratio > settings.indexing.rebuild_threshold {
        tracing::info!(ratio, "change ratio over threshold; full reparse");
        report.full_rebuild = true;
        report.ingest = ingest(store, settings, embedder, root, cancel)?;
        // Files deleted from disk still need their rows dropped.
        remove_deleted(store, &changes.deleted)?;
        report.resolve = Some(run_passes(store, settings, None)?);
    } else {
        // Closure first: it references pre-update graph state.
        let closure = changed_closure(store, &changes)?;

        remove_deleted(store, &changes.deleted)?;

        let to_ingest: Vec<PathBuf> = changes
            .added
            .iter()
            .cloned()
            .chain(changes.modified.iter().map(|(p, _)| p.clone()))
            .collect();
        report.ingest = ingest_files(store, settings, embedder, &to_ingest, cancel)?;

        // Invalidate and recompute references for the closure.
        let closure_vec: Vec<String> = closure.into_iter().collect();
        store.with_txn(|txn| txn.clear_references_from(&closure_vec))?;
        report.resolve = Some(run_passes(store, settings, Some(&closure_vec))?);
    }

    if let Some(revision) = &changes.revision {
        store.set_meta("index_revision", revision)?;
    }

    Ok(report)
}

fn remove_deleted(store: &SymbolStore, deleted: &[PathBuf]) -> EngineResult<()> {
    if deleted.is_empty() {
        return Ok(());
    }
    let orphans = store.with_txn(|txn| {
        let mut all = Vec::new();
        for path in deleted {
            all.extend(txn.delete_file(&path.to_string_lossy())?);
        }
        Ok(all)
    })?;
    if !orphans.is_empty() {
        store
            .vectors()
            .remove(&orphans.into_iter().collect())
            .ok();
    }
    Ok(())
}

/// The changed closure: the changed files plus every file that imports,
/// inherits from, or calls into one of them.
fn changed_closure(store: &SymbolStore, changes: &ChangeSet) -> EngineResult<BTreeSet<String>> {
    let mut changed: Vec<String> = changes
        .added
        .iter()
        .chain(changes.modified.iter().map(|(p, _)| p))
        .chain(changes.deleted.iter())
        .map(|p| p.to_string_lossy().to_string())
        .collect();
    changed.sort();

    let mut closure: BTreeSet<String> = changed.iter().cloned().collect();
    closure.extend(store.importers_of(&changed)?);
    closure.extend(store.files_referencing(&changed)?);

    // Classes declared in changed files pull in their derivers.
    let mut class_names = Vec::new();
    for path in &changed {
        for symbol in store.symbols_in_file(path)? {
            if symbol.kind == SymbolKind::Class || symbol.kind == SymbolKind::Interface {
                class_names.push(symbol.name.to_string());
            }
        }
    }
    closure.extend(store.files_deriving(&class_names)?);

    // Deleted files cannot be re-resolved.
    for deleted in &changes.deleted {
        closure.remove(&deleted.to_string_lossy().to_string());
    }
    Ok(closure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn settings() -> Arc<Settings> {
        let mut settings = Settings::default();
        settings.indexing.parallel_threads = 2;
        Arc::new(settings)
    }

    fn write_and_index(project: &Path, store: &SymbolStore, settings: &Arc<Settings>) {
        ingest(store, settings, None, project, &CancellationToken::new()).unwrap();
    }

    #[test]
    fn test_hash_fallback_detects_changes() {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("project");
        fs::create_dir_all(&project).unwrap();
        fs::write(project.join("a.py"), "def f():\n    pass\n").unwrap();
        fs::write(project.join("b.py"), "def g():\n    pass\n").unwrap();

        let (store, _) = SymbolStore::open(&temp.path().join("store")).unwrap();
        let settings = settings();
        write_and_index(&project, &store, &settings);

        // Modify one, add one, delete one.
        fs::write(project.join("a.py"), "def f2():\n    pass\n").unwrap();
        fs::write(project.join("c.py"), "def h():\n    pass\n").unwrap();
        fs::remove_file(project.join("b.py")).unwrap();

        let changes = detect_changes(&store, &settings, &project).unwrap();
        assert!(changes.hash_fallback);
        assert_eq!(changes.added.len(), 1);
        assert_eq!(changes.modified.len(), 1);
        assert_eq!(changes.deleted.len(), 1);
    }

    #[test]
    fn test_update_applies_changes() {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("project");
        fs::create_dir_all(&project).unwrap();
        fs::write(project.join("a.py"), "def step():\n    pass\n").unwrap();

        let (store, _) = SymbolStore::open(&temp.path().join("store")).unwrap();
        let settings = settings();
        write_and_index(&project, &store, &settings);
        assert_eq!(store.find_symbols("step", true, None).unwrap().len(), 1);

        fs::write(project.join("a.py"), "def apply():\n    pass\n").unwrap();
        let report = update(
            &store,
            &settings,
            None,
            &project,
            &CancellationToken::new(),
        )
        .unwrap();

        // One file changed out of one indexed: ratio 1.0 forces rebuild;
        // either path must land in the same final state.
        assert!(report.full_rebuild || report.ingest.files_indexed == 1);
        assert!(store.find_symbols("step", true, None).unwrap().is_empty());
        assert_eq!(store.find_symbols("apply", true, None).unwrap().len(), 1);
    }

    #[test]
    fn test_no_changes_is_noop() {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("project");
        fs::create_dir_all(&project).unwrap();
        fs::write(project.join("a.py"), "def f():\n    pass\n").unwrap();

        let (store, _) = SymbolStore::open(&temp.path().join("store")).unwrap();
        let settings = settings();
        write_and_index(&project, &store, &settings);

        let report = update(
            &store,
            &settings,
            None,
            &project,
            &CancellationToken::new(),
        )
        .unwrap();
        assert!(report.changes.is_empty());
        assert!(!report.full_rebuild);
    }
}
