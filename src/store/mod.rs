//! Persistent, transactional storage for the data model.
//!
//! One SQLite database (WAL) holds files, symbols, imports, calls, parse
//! facts, the resolution graph and the FTS posting lists; the vector index
//! is a sibling artifact file managed through [`VectorIndex`]. A single
//! writer mutates the database inside explicit transactions; readers
//! observe the last committed state.
//!
//! Deduplication relies on the uniqueness index over
//! `(file_id, name, kind, start_line, end_line)` with `INSERT OR IGNORE`;
//! readers additionally dedupe by the same key as defense in depth.

pub mod fts;
pub mod schema;
pub mod snippet;
pub mod vector;

pub use schema::{MigrationOutcome, SCHEMA_VERSION};
pub use snippet::Snippet;
pub use vector::VectorIndex;

use crate::error::{StoreError, StoreResult};
use crate::parsing::{BaseRef, BindingSource, Language, NewImport, NewMethodCall, TypeBinding};
use crate::symbol::{NewSymbol, Symbol};
use crate::types::{FileId, LineSpan, RefKind, ResolutionMethod, SymbolId, SymbolKind, VectorId};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

/// Database file name inside the store directory.
pub const DB_FILE: &str = "cerberus.db";
/// Vector index file name inside the store directory.
pub const VECTOR_FILE: &str = "vectors.bin";

/// Rows fetched per cursor page.
const CURSOR_PAGE: usize = 256;

/// Metadata for a file row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub path: String,
    pub language: Language,
    pub content_hash: String,
    pub size: u64,
    pub mtime: i64,
    pub revision: Option<String>,
}

/// A stored file row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub id: FileId,
    pub meta: FileMeta,
}

/// A stored import row, joined with its owning file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImport {
    pub id: i64,
    pub file_path: String,
    pub language: Language,
    pub import: NewImport,
    pub target_file: Option<String>,
    pub target_symbol: Option<String>,
}

/// A stored method-call row, joined with its owning file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCall {
    pub id: i64,
    pub file_path: String,
    pub caller: String,
    pub method_name: String,
    pub receiver: Option<String>,
    pub receiver_type: Option<String>,
    pub line: u32,
    pub column: u32,
}

/// A stored base-class fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBase {
    pub file_path: String,
    pub class_name: String,
    pub line: u32,
    pub base_name: String,
    pub position: u32,
}

/// A stored type binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBinding {
    pub file_path: String,
    pub scope: String,
    pub name: String,
    pub type_name: String,
    pub source: BindingSource,
    pub line: u32,
}

/// An edge in the resolution graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolReference {
    pub source_file: String,
    pub source_line: u32,
    pub source_symbol: String,
    pub kind: RefKind,
    pub target_file: Option<String>,
    pub target_symbol: Option<String>,
    pub target_kind: Option<SymbolKind>,
    pub confidence: f32,
    pub resolution_method: ResolutionMethod,
}

impl SymbolReference {
    pub fn is_resolved(&self) -> bool {
        self.target_file.is_some() && self.target_symbol.is_some()
    }
}

/// Result of one symbol batch write.
#[derive(Debug, Default, Clone)]
pub struct SymbolBatchResult {
    pub ids: Vec<SymbolId>,
    pub inserted: usize,
    pub duplicates: usize,
}

/// Filter for symbol queries. Everything is optional; an empty filter
/// streams the whole table.
#[derive(Debug, Default, Clone)]
pub struct SymbolFilter {
    pub name: Option<String>,
    pub exact_name: bool,
    pub kind: Option<SymbolKind>,
    pub file: Option<String>,
    pub limit: Option<usize>,
}

/// Aggregate counts for reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub files: u64,
    pub symbols: u64,
    pub references: u64,
    pub embeddings: u64,
}

/// The persistent store.
pub struct SymbolStore {
    conn: Mutex<Connection>,
    vectors: VectorIndex,
    dir: PathBuf,
}

impl SymbolStore {
    /// Open or create the store under `dir`. Runs forward migrations;
    /// a schema with no forward path reports `RebuildRequired` and leaves
    /// the database untouched.
    pub fn open(dir: &Path) -> StoreResult<(Self, MigrationOutcome)> {
        std::fs::create_dir_all(dir)?;
        let db_path = dir.join(DB_FILE);
        let mut conn = Connection::open(&db_path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_millis(5000))?;

        let outcome = schema::migrate(&mut conn)?;

        let store = Self {
            conn: Mutex::new(conn),
            vectors: VectorIndex::open(dir.join(VECTOR_FILE)),
            dir: dir.to_path_buf(),
        };
        Ok((store, outcome))
    }

    /// Delete all persisted state and reopen fresh.
    pub fn rebuild(dir: &Path) -> StoreResult<Self> {
        for name in [DB_FILE, VECTOR_FILE] {
            let path = dir.join(name);
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
        }
        // WAL side files.
        for suffix in ["-wal", "-shm"] {
            let path = dir.join(format!("{DB_FILE}{suffix}"));
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
        }
        let (store, _) = Self::open(dir)?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn vectors(&self) -> &VectorIndex {
        &self.vectors
    }

    /// Run `f` inside a write transaction: commit on `Ok`, roll back on
    /// `Err`. An uncommitted rusqlite transaction also rolls back when
    /// dropped, so unwinding paths release cleanly too.
    pub fn with_txn<T>(&self, f: impl FnOnce(&StoreTxn) -> StoreResult<T>) -> StoreResult<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let txn = StoreTxn { tx };
        match f(&txn) {
            Ok(value) => {
                txn.tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                // Dropping the transaction rolls it back.
                drop(txn);
                Err(e)
            }
        }
    }

    // ----- file reads -------------------------------------------------

    pub fn get_file(&self, path: &str) -> StoreResult<Option<StoredFile>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, path, language, content_hash, size, mtime, revision
                 FROM files WHERE path = ?1",
                [path],
                file_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn list_files(&self) -> StoreResult<Vec<StoredFile>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, path, language, content_hash, size, mtime, revision
             FROM files ORDER BY path ASC",
        )?;
        let rows = stmt.query_map([], file_from_row)?;
        let mut files = Vec::new();
        for row in rows {
            files.push(row?);
        }
        Ok(files)
    }

    pub fn file_count(&self) -> StoreResult<u64> {
        let conn = self.conn.lock();
        Ok(conn.query_row("SELECT COUNT(*) FROM files", [], |r| r.get(0))?)
    }

    pub fn symbol_count(&self) -> StoreResult<u64> {
        let conn = self.conn.lock();
        Ok(conn.query_row("SELECT COUNT(*) FROM symbols", [], |r| r.get(0))?)
    }

    pub fn stats(&self) -> StoreResult<StoreStats> {
        let conn = self.conn.lock();
        let files = conn.query_row("SELECT COUNT(*) FROM files", [], |r| r.get(0))?;
        let symbols = conn.query_row("SELECT COUNT(*) FROM symbols", [], |r| r.get(0))?;
        let references =
            conn.query_row("SELECT COUNT(*) FROM symbol_references", [], |r| r.get(0))?;
        let embeddings = conn.query_row("SELECT COUNT(*) FROM embeddings_map", [], |r| r.get(0))?;
        Ok(StoreStats {
            files,
            symbols,
            references,
            embeddings,
        })
    }

    // ----- symbol reads -----------------------------------------------

    pub fn get_symbol(&self, id: SymbolId) -> StoreResult<Option<Symbol>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!("{SYMBOL_SELECT} WHERE s.id = ?1"),
                [id.value() as i64],
                symbol_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Find symbols by name, exact or substring, deduplicated by the
    /// uniqueness key and ordered by (path, start_line).
    pub fn find_symbols(
        &self,
        name: &str,
        exact: bool,
        file_hint: Option<&str>,
    ) -> StoreResult<Vec<Symbol>> {
        let conn = self.conn.lock();
        let (clause, pattern) = if exact {
            ("s.name = ?1".to_string(), name.to_string())
        } else {
            (
                "s.name LIKE ?1 ESCAPE '\\'".to_string(),
                format!("%{}%", escape_like(name)),
            )
        };
        let sql = format!(
            "{SYMBOL_SELECT} WHERE {clause}
               AND (?2 IS NULL OR f.path = ?2)
             ORDER BY f.path ASC, s.start_line ASC, s.id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![pattern, file_hint], symbol_from_row)?;
        let mut symbols = Vec::new();
        for row in rows {
            symbols.push(row?);
        }
        Ok(dedupe_symbols(symbols))
    }

    pub fn symbols_in_file(&self, path: &str) -> StoreResult<Vec<Symbol>> {
        let conn = self.conn.lock();
        let sql = format!(
            "{SYMBOL_SELECT} WHERE f.path = ?1 ORDER BY s.start_line ASC, s.id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([path], symbol_from_row)?;
        let mut symbols = Vec::new();
        for row in rows {
            symbols.push(row?);
        }
        Ok(dedupe_symbols(symbols))
    }

    /// Streaming symbol query. The cursor pages by id, so memory stays
    /// bounded regardless of result size.
    pub fn query_symbols(&self, filter: SymbolFilter) -> SymbolCursor<'_> {
        SymbolCursor {
            store: self,
            filter,
            last_id: 0,
            yielded: 0,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    fn page_symbols(
        &self,
        filter: &SymbolFilter,
        after_id: i64,
        page: usize,
    ) -> StoreResult<Vec<(i64, Symbol)>> {
        let conn = self.conn.lock();
        let name_pattern = filter.name.as_ref().map(|n| {
            if filter.exact_name {
                n.clone()
            } else {
                format!("%{}%", escape_like(n))
            }
        });
        let name_clause = if filter.exact_name {
            "s.name = ?2"
        } else {
            "s.name LIKE ?2 ESCAPE '\\'"
        };
        let sql = format!(
            "{SYMBOL_SELECT} WHERE s.id > ?1
               AND (?2 IS NULL OR {name_clause})
               AND (?3 IS NULL OR s.kind = ?3)
               AND (?4 IS NULL OR f.path = ?4)
             ORDER BY s.id ASC LIMIT ?5"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                after_id,
                name_pattern,
                filter.kind.map(|k| k.as_str()),
                filter.file,
                page as i64
            ],
            |row| {
                let id: i64 = row.get(0)?;
                Ok((id, symbol_from_row(row)?))
            },
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ----- parse-fact reads -------------------------------------------

    pub fn imports_in_files(&self, paths: &[String]) -> StoreResult<Vec<StoredImport>> {
        let mut out = Vec::new();
        for path in paths {
            out.extend(self.imports_in_file(path)?);
        }
        Ok(out)
    }

    pub fn imports_in_file(&self, path: &str) -> StoreResult<Vec<StoredImport>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT i.id, f.path, f.language, i.module_path, i.names, i.alias, i.line,
                    i.is_glob, i.target_file, i.target_symbol
             FROM imports i JOIN files f ON f.id = i.file_id
             WHERE f.path = ?1 ORDER BY i.line ASC, i.id ASC",
        )?;
        let rows = stmt.query_map([path], import_from_row)?;
        let mut imports = Vec::new();
        for row in rows {
            imports.push(row?);
        }
        Ok(imports)
    }

    pub fn all_imports(&self) -> StoreResult<Vec<StoredImport>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT i.id, f.path, f.language, i.module_path, i.names, i.alias, i.line,
                    i.is_glob, i.target_file, i.target_symbol
             FROM imports i JOIN files f ON f.id = i.file_id
             ORDER BY f.path ASC, i.line ASC, i.id ASC",
        )?;
        let rows = stmt.query_map([], import_from_row)?;
        let mut imports = Vec::new();
        for row in rows {
            imports.push(row?);
        }
        Ok(imports)
    }

    /// Files that import one of `paths` (by resolved target).
    pub fn importers_of(&self, paths: &[String]) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut out = HashSet::new();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT f.path FROM imports i JOIN files f ON f.id = i.file_id
             WHERE i.target_file = ?1",
        )?;
        for path in paths {
            let rows = stmt.query_map([path], |row| row.get::<_, String>(0))?;
            for row in rows {
                out.insert(row?);
            }
        }
        let mut sorted: Vec<String> = out.into_iter().collect();
        sorted.sort();
        Ok(sorted)
    }

    pub fn calls_in_file(&self, path: &str) -> StoreResult<Vec<StoredCall>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT c.id, f.path, c.caller, c.method_name, c.receiver, c.receiver_type,
                    c.line, c.col
             FROM method_calls c JOIN files f ON f.id = c.file_id
             WHERE f.path = ?1 ORDER BY c.line ASC, c.col ASC, c.id ASC",
        )?;
        let rows = stmt.query_map([path], call_from_row)?;
        let mut calls = Vec::new();
        for row in rows {
            calls.push(row?);
        }
        Ok(calls)
    }

    pub fn calls_by_method(&self, method_name: &str) -> StoreResult<Vec<StoredCall>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT c.id, f.path, c.caller, c.method_name, c.receiver, c.receiver_type,
                    c.line, c.col
             FROM method_calls c JOIN files f ON f.id = c.file_id
             WHERE c.method_name = ?1 ORDER BY f.path ASC, c.line ASC, c.id ASC",
        )?;
        let rows = stmt.query_map([method_name], call_from_row)?;
        let mut calls = Vec::new();
        for row in rows {
            calls.push(row?);
        }
        Ok(calls)
    }

    pub fn bases_in_file(&self, path: &str) -> StoreResult<Vec<StoredBase>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT f.path, b.class_name, b.line, b.base_name, b.position
             FROM class_bases b JOIN files f ON f.id = b.file_id
             WHERE f.path = ?1 ORDER BY b.class_name ASC, b.position ASC",
        )?;
        let rows = stmt.query_map([path], base_from_row)?;
        let mut bases = Vec::new();
        for row in rows {
            bases.push(row?);
        }
        Ok(bases)
    }

    pub fn all_bases(&self) -> StoreResult<Vec<StoredBase>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT f.path, b.class_name, b.line, b.base_name, b.position
             FROM class_bases b JOIN files f ON f.id = b.file_id
             ORDER BY f.path ASC, b.class_name ASC, b.position ASC",
        )?;
        let rows = stmt.query_map([], base_from_row)?;
        let mut bases = Vec::new();
        for row in rows {
            bases.push(row?);
        }
        Ok(bases)
    }

    /// Files whose classes inherit from a class named in `class_names`.
    pub fn files_deriving(&self, class_names: &[String]) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut out = HashSet::new();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT f.path FROM class_bases b JOIN files f ON f.id = b.file_id
             WHERE b.base_name = ?1",
        )?;
        for name in class_names {
            let rows = stmt.query_map([name], |row| row.get::<_, String>(0))?;
            for row in rows {
                out.insert(row?);
            }
        }
        let mut sorted: Vec<String> = out.into_iter().collect();
        sorted.sort();
        Ok(sorted)
    }

    pub fn bindings_in_file(&self, path: &str) -> StoreResult<Vec<StoredBinding>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT f.path, t.scope, t.name, t.type_name, t.source, t.line
             FROM type_bindings t JOIN files f ON f.id = t.file_id
             WHERE f.path = ?1 ORDER BY t.line ASC, t.id ASC",
        )?;
        let rows = stmt.query_map([path], binding_from_row)?;
        let mut bindings = Vec::new();
        for row in rows {
            bindings.push(row?);
        }
        Ok(bindings)
    }

    // ----- reference reads --------------------------------------------

    pub fn references_from(
        &self,
        source_file: &str,
        source_symbol: Option<&str>,
    ) -> StoreResult<Vec<SymbolReference>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT source_file, source_line, source_symbol, kind, target_file,
                    target_symbol, target_kind, confidence, resolution_method
             FROM symbol_references
             WHERE source_file = ?1 AND (?2 IS NULL OR source_symbol = ?2)
             ORDER BY confidence DESC, source_line ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![source_file, source_symbol], reference_from_row)?;
        let mut references = Vec::new();
        for row in rows {
            references.push(row?);
        }
        order_references(&mut references);
        Ok(references)
    }

    pub fn references_to(
        &self,
        target_file: &str,
        target_symbol: &str,
    ) -> StoreResult<Vec<SymbolReference>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT source_file, source_line, source_symbol, kind, target_file,
                    target_symbol, target_kind, confidence, resolution_method
             FROM symbol_references
             WHERE target_file = ?1 AND target_symbol = ?2
             ORDER BY confidence DESC, source_file ASC, source_line ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![target_file, target_symbol], reference_from_row)?;
        let mut references = Vec::new();
        for row in rows {
            references.push(row?);
        }
        order_references(&mut references);
        Ok(references)
    }

    /// Source files holding references into any of `paths`.
    pub fn files_referencing(&self, paths: &[String]) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut out = HashSet::new();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT source_file FROM symbol_references WHERE target_file = ?1",
        )?;
        for path in paths {
            let rows = stmt.query_map([path], |row| row.get::<_, String>(0))?;
            for row in rows {
                out.insert(row?);
            }
        }
        let mut sorted: Vec<String> = out.into_iter().collect();
        sorted.sort();
        Ok(sorted)
    }

    // ----- FTS --------------------------------------------------------

    /// BM25-ranked full-text search over symbol metadata. Returns up to
    /// `k` `(symbol_id, score)` pairs, highest first, ties broken by id.
    pub fn fts_search(&self, query: &str, k: usize, k1: f32, b: f32) -> StoreResult<Vec<(SymbolId, f32)>> {
        let query_terms = fts::tokenize(query);
        if query_terms.is_empty() {
            return Err(StoreError::MalformedQuery(format!(
                "no searchable terms in '{query}'"
            )));
        }

        // Query-side term multiplicity weights repeated terms.
        let mut term_counts: std::collections::HashMap<String, u32> = Default::default();
        for term in query_terms {
            *term_counts.entry(term).or_insert(0) += 1;
        }

        let conn = self.conn.lock();
        let doc_count: u64 = conn.query_row("SELECT COUNT(*) FROM fts_documents", [], |r| r.get(0))?;
        if doc_count == 0 {
            return Ok(Vec::new());
        }
        let avg_len: f64 = conn
            .query_row("SELECT AVG(length) FROM fts_documents", [], |r| r.get(0))
            .unwrap_or(0.0);

        let mut scores: std::collections::HashMap<i64, f32> = Default::default();
        let mut df_stmt =
            conn.prepare("SELECT COUNT(*) FROM fts_postings WHERE term = ?1")?;
        let mut postings_stmt = conn.prepare(
            "SELECT p.symbol_id, p.tf, d.length
             FROM fts_postings p JOIN fts_documents d ON d.symbol_id = p.symbol_id
             WHERE p.term = ?1",
        )?;

        for (term, qtf) in &term_counts {
            let df: u64 = df_stmt.query_row([term], |r| r.get(0))?;
            if df == 0 {
                continue;
            }
            let rows = postings_stmt.query_map([term], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)? as u32,
                    row.get::<_, i64>(2)? as u32,
                ))
            })?;
            for row in rows {
                let (symbol_id, tf, doc_len) = row?;
                let contribution =
                    fts::bm25_term_score(tf, df, doc_len, doc_count, avg_len as f32, k1, b);
                *scores.entry(symbol_id).or_insert(0.0) += contribution * *qtf as f32;
            }
        }

        let mut ranked: Vec<(SymbolId, f32)> = scores
            .into_iter()
            .filter_map(|(id, score)| SymbolId::new(id as u32).map(|sid| (sid, score)))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.value().cmp(&b.0.value()))
        });
        ranked.truncate(k);
        Ok(ranked)
    }

    // ----- embeddings -------------------------------------------------

    pub fn embedding_for_symbol(
        &self,
        symbol_id: SymbolId,
    ) -> StoreResult<Option<(VectorId, String)>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT vector_id, input_hash FROM embeddings_map WHERE symbol_id = ?1",
                [symbol_id.value() as i64],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)? as u32,
                        row.get::<_, String>(1)?,
                    ))
                },
            )
            .optional()?;
        Ok(row.and_then(|(vid, hash)| VectorId::new(vid).map(|v| (v, hash))))
    }

    /// Map vector ids back to their symbols, preserving order. Vectors
    /// without a live symbol map to `None` (they are orphans pending
    /// removal).
    pub fn symbols_for_vectors(&self, ids: &[VectorId]) -> StoreResult<Vec<Option<SymbolId>>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT symbol_id FROM embeddings_map WHERE vector_id = ?1")?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let symbol: Option<i64> = stmt
                .query_row([id.value() as i64], |row| row.get(0))
                .optional()?;
            out.push(symbol.and_then(|s| SymbolId::new(s as u32)));
        }
        Ok(out)
    }

    /// Vector ids with no surviving symbol row.
    pub fn orphan_vector_ids(&self, known: &[u32]) -> StoreResult<HashSet<u32>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT 1 FROM embeddings_map WHERE vector_id = ?1 LIMIT 1")?;
        let mut orphans = HashSet::new();
        for id in known {
            let live: Option<i64> = stmt.query_row([*id as i64], |row| row.get(0)).optional()?;
            if live.is_none() {
                orphans.insert(*id);
            }
        }
        Ok(orphans)
    }

    // ----- snippets ---------------------------------------------------

    /// Materialize a symbol's source range from disk.
    pub fn get_snippet(&self, symbol_id: SymbolId, padding: u32) -> StoreResult<Snippet> {
        let symbol = self
            .get_symbol(symbol_id)?
            .ok_or(StoreError::SymbolRowMissing { id: symbol_id })?;
        snippet::load_snippet(Path::new(symbol.file_path.as_ref()), symbol.span, padding)
    }

    // ----- meta -------------------------------------------------------

    pub fn get_meta(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )?;
        Ok(())
    }
}

/// Write handle scoped to one transaction. Dropping without commit rolls
/// back; [`SymbolStore::with_txn`] owns the commit decision.
pub struct StoreTxn<'conn> {
    tx: rusqlite::Transaction<'conn>,
}

impl StoreTxn<'_> {
    /// Insert or replace a file row; idempotent on path.
    pub fn upsert_file(&self, meta: &FileMeta) -> StoreResult<FileId> {
        self.tx.execute(
            "INSERT INTO files (path, language, content_hash, size, mtime, revision)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(path) DO UPDATE SET
                 language = excluded.language,
                 content_hash = excluded.content_hash,
                 size = excluded.size,
                 mtime = excluded.mtime,
                 revision = excluded.revision",
            params![
                meta.path,
                meta.language.config_key(),
                meta.content_hash,
                meta.size as i64,
                meta.mtime,
                meta.revision
            ],
        )?;
        let id: i64 = self
            .tx
            .query_row("SELECT id FROM files WHERE path = ?1", [&meta.path], |r| {
                r.get(0)
            })?;
        FileId::new(id as u32).ok_or_else(|| StoreError::TransactionFailed {
            cause: "file id overflow".to_string(),
        })
    }

    /// Cascade-delete everything `path` owns and unresolve references that
    /// targeted it. Returns the vector ids orphaned by the delete so the
    /// caller can drop them from the vector index after commit.
    pub fn delete_file(&self, path: &str) -> StoreResult<Vec<u32>> {
        let mut orphaned = Vec::new();
        {
            let mut stmt = self.tx.prepare(
                "SELECT e.vector_id FROM embeddings_map e
                 JOIN symbols s ON s.id = e.symbol_id
                 JOIN files f ON f.id = s.file_id
                 WHERE f.path = ?1",
            )?;
            let rows = stmt.query_map([path], |row| row.get::<_, i64>(0))?;
            for row in rows {
                orphaned.push(row? as u32);
            }
        }

        self.tx.execute("DELETE FROM files WHERE path = ?1", [path])?;
        self.tx.execute(
            "DELETE FROM symbol_references WHERE source_file = ?1",
            [path],
        )?;
        // References into the deleted file become unresolved; rows whose
        // unresolved twin already exists are dropped instead.
        self.tx.execute(
            "UPDATE OR IGNORE symbol_references
             SET target_file = '', target_symbol = '', target_kind = NULL
             WHERE target_file = ?1",
            [path],
        )?;
        self.tx.execute(
            "DELETE FROM symbol_references WHERE target_file = ?1",
            [path],
        )?;
        Ok(orphaned)
    }

    /// Insert symbols in chunks, deduplicating per the uniqueness index.
    /// Returns the ids in input order (existing rows resolve to their
    /// original id).
    pub fn write_symbols_batch(
        &self,
        file_id: FileId,
        symbols: &[NewSymbol],
        chunk_rows: usize,
    ) -> StoreResult<SymbolBatchResult> {
        let mut result = SymbolBatchResult::default();
        let chunk_rows = chunk_rows.max(1);

        let mut insert = self.tx.prepare(
            "INSERT OR IGNORE INTO symbols
                 (file_id, name, qualified_name, kind, start_line, end_line,
                  signature, doc, parent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        let mut lookup = self.tx.prepare(
            "SELECT id FROM symbols
             WHERE file_id = ?1 AND name = ?2 AND kind = ?3
               AND start_line = ?4 AND end_line = ?5",
        )?;

        for chunk in symbols.chunks(chunk_rows) {
            for symbol in chunk {
                let changed = insert.execute(params![
                    file_id.value() as i64,
                    symbol.name.as_ref(),
                    symbol.qualified_name.as_ref(),
                    symbol.kind.as_str(),
                    symbol.span.start_line,
                    symbol.span.end_line,
                    symbol.signature.as_deref(),
                    symbol.doc.as_deref(),
                    symbol.parent.as_deref(),
                ])?;
                if changed > 0 {
                    result.inserted += 1;
                } else {
                    result.duplicates += 1;
                }
                let id: i64 = lookup.query_row(
                    params![
                        file_id.value() as i64,
                        symbol.name.as_ref(),
                        symbol.kind.as_str(),
                        symbol.span.start_line,
                        symbol.span.end_line,
                    ],
                    |r| r.get(0),
                )?;
                let id = SymbolId::new(id as u32).ok_or_else(|| StoreError::TransactionFailed {
                    cause: "symbol id overflow".to_string(),
                })?;
                result.ids.push(id);
            }
        }
        Ok(result)
    }

    pub fn write_imports_batch(
        &self,
        file_id: FileId,
        imports: &[NewImport],
        chunk_rows: usize,
    ) -> StoreResult<()> {
        let mut stmt = self.tx.prepare(
            "INSERT INTO imports (file_id, module_path, names, alias, line, is_glob)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for chunk in imports.chunks(chunk_rows.max(1)) {
            for import in chunk {
                let names = serde_json::to_string(&import.names)
                    .map_err(|e| StoreError::TransactionFailed { cause: e.to_string() })?;
                stmt.execute(params![
                    file_id.value() as i64,
                    import.module_path,
                    names,
                    import.alias,
                    import.line,
                    import.is_glob as i64,
                ])?;
            }
        }
        Ok(())
    }

    pub fn write_calls_batch(
        &self,
        file_id: FileId,
        calls: &[NewMethodCall],
        chunk_rows: usize,
    ) -> StoreResult<()> {
        let mut stmt = self.tx.prepare(
            "INSERT INTO method_calls (file_id, caller, method_name, receiver, line, col)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for chunk in calls.chunks(chunk_rows.max(1)) {
            for call in chunk {
                stmt.execute(params![
                    file_id.value() as i64,
                    call.caller,
                    call.method_name,
                    call.receiver,
                    call.line,
                    call.column,
                ])?;
            }
        }
        Ok(())
    }

    pub fn write_bases_batch(
        &self,
        file_id: FileId,
        bases: &[BaseRef],
        chunk_rows: usize,
    ) -> StoreResult<()> {
        let mut stmt = self.tx.prepare(
            "INSERT INTO class_bases (file_id, class_name, line, base_name, position)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for chunk in bases.chunks(chunk_rows.max(1)) {
            for (position, base) in chunk.iter().enumerate() {
                stmt.execute(params![
                    file_id.value() as i64,
                    base.class_name,
                    base.line,
                    base.base_name,
                    position as i64,
                ])?;
            }
        }
        Ok(())
    }

    pub fn write_bindings_batch(
        &self,
        file_id: FileId,
        bindings: &[TypeBinding],
        chunk_rows: usize,
    ) -> StoreResult<()> {
        let mut stmt = self.tx.prepare(
            "INSERT INTO type_bindings (file_id, scope, name, type_name, source, line)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for chunk in bindings.chunks(chunk_rows.max(1)) {
            for binding in chunk {
                stmt.execute(params![
                    file_id.value() as i64,
                    binding.scope,
                    binding.name,
                    binding.type_name,
                    binding_source_str(binding.source),
                    binding.line,
                ])?;
            }
        }
        Ok(())
    }

    /// Upsert resolution edges. When two derivations agree on a target the
    /// stored confidence is the maximum; disagreeing targets coexist as
    /// separate rows under the uniqueness key.
    pub fn write_references_batch(&self, references: &[SymbolReference]) -> StoreResult<()> {
        let mut stmt = self.tx.prepare(
            "INSERT INTO symbol_references
                 (source_file, source_line, source_symbol, kind, target_file,
                  target_symbol, target_kind, confidence, resolution_method)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(source_file, source_line, source_symbol, kind,
                         target_file, target_symbol)
             DO UPDATE SET
                 confidence = MAX(confidence, excluded.confidence),
                 resolution_method = CASE
                     WHEN excluded.confidence > confidence
                     THEN excluded.resolution_method
                     ELSE resolution_method
                 END",
        )?;
        for reference in references {
            stmt.execute(params![
                reference.source_file,
                reference.source_line,
                reference.source_symbol,
                reference.kind.as_str(),
                reference.target_file.as_deref().unwrap_or(""),
                reference.target_symbol.as_deref().unwrap_or(""),
                reference.target_kind.map(|k| k.as_str()),
                reference.confidence as f64,
                reference.resolution_method.as_str(),
            ])?;
        }
        Ok(())
    }

    /// Drop all references whose source is one of `paths` (before a
    /// resolver recomputes them).
    pub fn clear_references_from(&self, paths: &[String]) -> StoreResult<()> {
        let mut stmt = self
            .tx
            .prepare("DELETE FROM symbol_references WHERE source_file = ?1")?;
        for path in paths {
            stmt.execute([path])?;
        }
        Ok(())
    }

    /// Replace the FTS document for one symbol.
    pub fn index_symbol_text(&self, symbol_id: SymbolId, text: &str) -> StoreResult<()> {
        let id = symbol_id.value() as i64;
        self.tx
            .execute("DELETE FROM fts_postings WHERE symbol_id = ?1", [id])?;
        let (frequencies, total) = fts::term_frequencies(text);
        self.tx.execute(
            "INSERT INTO fts_documents (symbol_id, length) VALUES (?1, ?2)
             ON CONFLICT(symbol_id) DO UPDATE SET length = excluded.length",
            params![id, total],
        )?;
        let mut stmt = self
            .tx
            .prepare("INSERT INTO fts_postings (term, symbol_id, tf) VALUES (?1, ?2, ?3)")?;
        for (term, tf) in frequencies {
            stmt.execute(params![term, id, tf])?;
        }
        Ok(())
    }

    pub fn set_call_receiver_type(&self, call_id: i64, receiver_type: &str) -> StoreResult<()> {
        self.tx.execute(
            "UPDATE method_calls SET receiver_type = ?1 WHERE id = ?2",
            params![receiver_type, call_id],
        )?;
        Ok(())
    }

    pub fn set_import_target(
        &self,
        import_id: i64,
        target_file: &str,
        target_symbol: Option<&str>,
    ) -> StoreResult<()> {
        self.tx.execute(
            "UPDATE imports SET target_file = ?1, target_symbol = ?2 WHERE id = ?3",
            params![target_file, target_symbol, import_id],
        )?;
        Ok(())
    }

    /// Embedding rows for a file keyed by symbol identity, captured before
    /// a delete so unchanged symbols can keep their vectors on re-ingest.
    pub fn file_embedding_snapshot(
        &self,
        path: &str,
    ) -> StoreResult<std::collections::HashMap<(String, String, u32, u32), (u32, String)>> {
        let mut stmt = self.tx.prepare(
            "SELECT s.name, s.kind, s.start_line, s.end_line, e.vector_id, e.input_hash
             FROM embeddings_map e
             JOIN symbols s ON s.id = e.symbol_id
             JOIN files f ON f.id = s.file_id
             WHERE f.path = ?1",
        )?;
        let rows = stmt.query_map([path], |row| {
            Ok((
                (
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)? as u32,
                    row.get::<_, i64>(3)? as u32,
                ),
                (row.get::<_, i64>(4)? as u32, row.get::<_, String>(5)?),
            ))
        })?;
        let mut map = std::collections::HashMap::new();
        for row in rows {
            let (key, value) = row?;
            map.insert(key, value);
        }
        Ok(map)
    }

    pub fn upsert_embedding(
        &self,
        symbol_id: SymbolId,
        vector_id: VectorId,
        input_hash: &str,
    ) -> StoreResult<()> {
        self.tx.execute(
            "INSERT INTO embeddings_map (symbol_id, vector_id, input_hash)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(symbol_id) DO UPDATE SET
                 vector_id = excluded.vector_id,
                 input_hash = excluded.input_hash",
            params![symbol_id.value() as i64, vector_id.value() as i64, input_hash],
        )?;
        Ok(())
    }

    /// Allocate the next vector id from the meta counter.
    pub fn next_vector_id(&self) -> StoreResult<VectorId> {
        let current: Option<String> = self
            .tx
            .query_row(
                "SELECT value FROM meta WHERE key = 'vector_counter'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let next = current
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0)
            + 1;
        self.tx.execute(
            "INSERT INTO meta (key, value) VALUES ('vector_counter', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [next.to_string()],
        )?;
        VectorId::new(next).ok_or_else(|| StoreError::TransactionFailed {
            cause: "vector id overflow".to_string(),
        })
    }

    pub fn set_meta(&self, key: &str, value: &str) -> StoreResult<()> {
        self.tx.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )?;
        Ok(())
    }

    pub fn symbol_count(&self) -> StoreResult<u64> {
        Ok(self
            .tx
            .query_row("SELECT COUNT(*) FROM symbols", [], |r| r.get(0))?)
    }
}

/// Streaming symbol cursor; see [`SymbolStore::query_symbols`].
pub struct SymbolCursor<'s> {
    store: &'s SymbolStore,
    filter: SymbolFilter,
    last_id: i64,
    yielded: usize,
    buffer: VecDeque<(i64, Symbol)>,
    exhausted: bool,
}

impl Iterator for SymbolCursor<'_> {
    type Item = Symbol;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(limit) = self.filter.limit {
            if self.yielded >= limit {
                return None;
            }
        }
        if self.buffer.is_empty() && !self.exhausted {
            match self.store.page_symbols(&self.filter, self.last_id, CURSOR_PAGE) {
                Ok(page) => {
                    if page.len() < CURSOR_PAGE {
                        self.exhausted = true;
                    }
                    if let Some((id, _)) = page.last() {
                        self.last_id = *id;
                    }
                    self.buffer.extend(page);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "symbol cursor page failed");
                    self.exhausted = true;
                }
            }
        }
        let (_, symbol) = self.buffer.pop_front()?;
        self.yielded += 1;
        Some(symbol)
    }
}

const SYMBOL_SELECT: &str = "SELECT s.id, s.name, s.qualified_name, s.kind, s.start_line, \
     s.end_line, s.signature, s.doc, s.parent, f.path, f.language \
     FROM symbols s JOIN files f ON f.id = s.file_id";

fn symbol_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Symbol> {
    let id: i64 = row.get(0)?;
    let name: String = row.get(1)?;
    let qualified: String = row.get(2)?;
    let kind: String = row.get(3)?;
    let start_line: i64 = row.get(4)?;
    let end_line: i64 = row.get(5)?;
    let signature: Option<String> = row.get(6)?;
    let doc: Option<String> = row.get(7)?;
    let parent: Option<String> = row.get(8)?;
    let path: String = row.get(9)?;
    let language: String = row.get(10)?;

    Ok(Symbol {
        id: SymbolId::new(id as u32).ok_or(rusqlite::Error::IntegralValueOutOfRange(0, id))?,
        name: name.into(),
        qualified_name: qualified.into(),
        kind: SymbolKind::parse(&kind).unwrap_or(SymbolKind::Function),
        file_path: path.into(),
        span: LineSpan::new(start_line.max(1) as u32, end_line.max(start_line.max(1)) as u32),
        signature: signature.map(Into::into),
        doc: doc.map(Into::into),
        parent: parent.map(Into::into),
        language: Language::parse(&language).unwrap_or(Language::Python),
    })
}

fn file_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredFile> {
    let id: i64 = row.get(0)?;
    let path: String = row.get(1)?;
    let language: String = row.get(2)?;
    let content_hash: String = row.get(3)?;
    let size: i64 = row.get(4)?;
    let mtime: i64 = row.get(5)?;
    let revision: Option<String> = row.get(6)?;
    Ok(StoredFile {
        id: FileId::new(id as u32).ok_or(rusqlite::Error::IntegralValueOutOfRange(0, id))?,
        meta: FileMeta {
            path,
            language: Language::parse(&language).unwrap_or(Language::Python),
            content_hash,
            size: size as u64,
            mtime,
            revision,
        },
    })
}

fn import_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredImport> {
    let id: i64 = row.get(0)?;
    let file_path: String = row.get(1)?;
    let language: String = row.get(2)?;
    let module_path: String = row.get(3)?;
    let names_json: String = row.get(4)?;
    let alias: Option<String> = row.get(5)?;
    let line: i64 = row.get(6)?;
    let is_glob: i64 = row.get(7)?;
    let target_file: Option<String> = row.get(8)?;
    let target_symbol: Option<String> = row.get(9)?;

    let names: Vec<String> = serde_json::from_str(&names_json).unwrap_or_default();
    let mut import = NewImport::module(module_path, line as u32).with_names(names);
    if let Some(alias) = alias {
        import = import.with_alias(alias);
    }
    if is_glob != 0 {
        import = import.glob();
    }
    Ok(StoredImport {
        id,
        file_path,
        language: Language::parse(&language).unwrap_or(Language::Python),
        import,
        target_file,
        target_symbol,
    })
}

fn call_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredCall> {
    Ok(StoredCall {
        id: row.get(0)?,
        file_path: row.get(1)?,
        caller: row.get(2)?,
        method_name: row.get(3)?,
        receiver: row.get(4)?,
        receiver_type: row.get(5)?,
        line: row.get::<_, i64>(6)? as u32,
        column: row.get::<_, i64>(7)? as u32,
    })
}

fn base_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredBase> {
    Ok(StoredBase {
        file_path: row.get(0)?,
        class_name: row.get(1)?,
        line: row.get::<_, i64>(2)? as u32,
        base_name: row.get(3)?,
        position: row.get::<_, i64>(4)? as u32,
    })
}

fn binding_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredBinding> {
    let source: String = row.get(4)?;
    Ok(StoredBinding {
        file_path: row.get(0)?,
        scope: row.get(1)?,
        name: row.get(2)?,
        type_name: row.get(3)?,
        source: binding_source_parse(&source),
        line: row.get::<_, i64>(5)? as u32,
    })
}

fn reference_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SymbolReference> {
    let kind: String = row.get(3)?;
    let target_file: String = row.get(4)?;
    let target_symbol: String = row.get(5)?;
    let target_kind: Option<String> = row.get(6)?;
    let method: String = row.get(8)?;
    Ok(SymbolReference {
        source_file: row.get(0)?,
        source_line: row.get::<_, i64>(1)? as u32,
        source_symbol: row.get(2)?,
        kind: RefKind::parse(&kind).unwrap_or(RefKind::MethodCall),
        target_file: if target_file.is_empty() {
            None
        } else {
            Some(target_file)
        },
        target_symbol: if target_symbol.is_empty() {
            None
        } else {
            Some(target_symbol)
        },
        target_kind: target_kind.as_deref().and_then(SymbolKind::parse),
        confidence: row.get::<_, f64>(7)? as f32,
        resolution_method: ResolutionMethod::parse(&method)
            .unwrap_or(ResolutionMethod::Heuristic),
    })
}

fn binding_source_str(source: BindingSource) -> &'static str {
    match source {
        BindingSource::Annotation => "annotation",
        BindingSource::Constructor => "constructor",
        BindingSource::Parameter => "parameter",
        BindingSource::Return => "return",
    }
}

fn binding_source_parse(s: &str) -> BindingSource {
    match s {
        "constructor" => BindingSource::Constructor,
        "parameter" => BindingSource::Parameter,
        "return" => BindingSource::Return,
        _ => BindingSource::Annotation,
    }
}

/// Reader ordering for references: descending confidence, then the
/// resolution-method trust ranking, keeping the SQL (line, id) order for
/// full ties.
fn order_references(references: &mut [SymbolReference]) {
    references.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.resolution_method
                    .priority()
                    .cmp(&a.resolution_method.priority())
            })
    });
}

/// Escape LIKE metacharacters; queries pair this with `ESCAPE '\'`.
fn escape_like(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Reader-side dedup by the uniqueness key, keeping the first (lowest id)
/// occurrence.
fn dedupe_symbols(symbols: Vec<Symbol>) -> Vec<Symbol> {
    let mut seen = HashSet::new();
    symbols
        .into_iter()
        .filter(|s| {
            seen.insert((
                s.file_path.clone(),
                s.name.clone(),
                s.kind,
                s.span.start_line,
                s.span.end_line,
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, SymbolStore) {
        let temp = TempDir::new().unwrap();
        let (store, outcome) = SymbolStore::open(temp.path()).unwrap();
        assert_eq!(outcome, MigrationOutcome::Current);
        (temp, store)
    }

    fn sample_file(path: &str) -> FileMeta {
        FileMeta {
            path: path.to_string(),
            language: Language::Python,
            content_hash: "h0".to_string(),
            size: 10,
            mtime: 0,
            revision: None,
        }
    }

    fn sample_symbol(name: &str, start: u32, end: u32) -> NewSymbol {
        NewSymbol::new(name, name, SymbolKind::Class, LineSpan::new(start, end))
    }

    #[test]
    fn test_upsert_file_is_idempotent() {
        let (_temp, store) = open_store();
        let first = store
            .with_txn(|txn| txn.upsert_file(&sample_file("/p/a.py")))
            .unwrap();
        let second = store
            .with_txn(|txn| txn.upsert_file(&sample_file("/p/a.py")))
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(store.file_count().unwrap(), 1);
    }

    #[test]
    fn test_symbol_uniqueness_collapses_reinsert() {
        let (_temp, store) = open_store();
        let result = store
            .with_txn(|txn| {
                let file_id = txn.upsert_file(&sample_file("/p/a.py"))?;
                let batch = vec![sample_symbol("Foo", 10, 20), sample_symbol("Foo", 10, 20)];
                txn.write_symbols_batch(file_id, &batch, 1000)
            })
            .unwrap();
        assert_eq!(result.inserted, 1);
        assert_eq!(result.duplicates, 1);
        assert_eq!(result.ids[0], result.ids[1]);
        assert_eq!(store.symbol_count().unwrap(), 1);
    }

    #[test]
    fn test_distinct_spans_are_distinct_rows() {
        let (_temp, store) = open_store();
        store
            .with_txn(|txn| {
                let file_id = txn.upsert_file(&sample_file("/p/a.py"))?;
                let batch = vec![sample_symbol("step", 1, 2), sample_symbol("step", 5, 6)];
                txn.write_symbols_batch(file_id, &batch, 1000)
            })
            .unwrap();
        assert_eq!(store.symbol_count().unwrap(), 2);
    }

    #[test]
    fn test_delete_file_cascades() {
        let (_temp, store) = open_store();
        store
            .with_txn(|txn| {
                let file_id = txn.upsert_file(&sample_file("/p/a.py"))?;
                let batch = txn.write_symbols_batch(
                    file_id,
                    &[sample_symbol("Foo", 1, 5)],
                    1000,
                )?;
                txn.write_imports_batch(
                    file_id,
                    &[NewImport::module("os", 1)],
                    1000,
                )?;
                txn.write_calls_batch(
                    file_id,
                    &[NewMethodCall::new("<module>", "run", 3, 0)],
                    1000,
                )?;
                txn.index_symbol_text(batch.ids[0], "Foo class handler")?;
                txn.write_references_batch(&[SymbolReference {
                    source_file: "/p/a.py".to_string(),
                    source_line: 3,
                    source_symbol: "<module>".to_string(),
                    kind: RefKind::MethodCall,
                    target_file: Some("/p/b.py".to_string()),
                    target_symbol: Some("run".to_string()),
                    target_kind: Some(SymbolKind::Function),
                    confidence: 0.9,
                    resolution_method: ResolutionMethod::ImportTrace,
                }])?;
                Ok(())
            })
            .unwrap();

        store.with_txn(|txn| txn.delete_file("/p/a.py")).unwrap();

        assert_eq!(store.file_count().unwrap(), 0);
        assert_eq!(store.symbol_count().unwrap(), 0);
        assert!(store.imports_in_file("/p/a.py").unwrap().is_empty());
        assert!(store.calls_in_file("/p/a.py").unwrap().is_empty());
        assert!(store.references_from("/p/a.py", None).unwrap().is_empty());
        // FTS rows cascaded with the symbol.
        assert!(store.fts_search("handler", 10, 1.5, 0.75).unwrap().is_empty());
    }

    #[test]
    fn test_delete_target_unresolves_references() {
        let (_temp, store) = open_store();
        store
            .with_txn(|txn| {
                txn.upsert_file(&sample_file("/p/a.py"))?;
                txn.upsert_file(&sample_file("/p/b.py"))?;
                txn.write_references_batch(&[SymbolReference {
                    source_file: "/p/a.py".to_string(),
                    source_line: 3,
                    source_symbol: "main".to_string(),
                    kind: RefKind::MethodCall,
                    target_file: Some("/p/b.py".to_string()),
                    target_symbol: Some("helper".to_string()),
                    target_kind: Some(SymbolKind::Function),
                    confidence: 1.0,
                    resolution_method: ResolutionMethod::ImportTrace,
                }])?;
                Ok(())
            })
            .unwrap();

        store.with_txn(|txn| txn.delete_file("/p/b.py")).unwrap();

        let refs = store.references_from("/p/a.py", None).unwrap();
        assert_eq!(refs.len(), 1);
        assert!(!refs[0].is_resolved());
    }

    #[test]
    fn test_reference_confidence_is_monotone() {
        let (_temp, store) = open_store();
        let reference = |confidence: f32, method: ResolutionMethod| SymbolReference {
            source_file: "/p/a.py".to_string(),
            source_line: 3,
            source_symbol: "main".to_string(),
            kind: RefKind::MethodCall,
            target_file: Some("/p/b.py".to_string()),
            target_symbol: Some("helper".to_string()),
            target_kind: None,
            confidence,
            resolution_method: method,
        };

        store
            .with_txn(|txn| {
                txn.write_references_batch(&[reference(0.5, ResolutionMethod::Heuristic)])
            })
            .unwrap();
        store
            .with_txn(|txn| {
                txn.write_references_batch(&[reference(0.9, ResolutionMethod::TypeAnnotation)])
            })
            .unwrap();
        // A weaker derivation later must not lower the stored confidence.
        store
            .with_txn(|txn| {
                txn.write_references_batch(&[reference(0.5, ResolutionMethod::Heuristic)])
            })
            .unwrap();

        let refs = store.references_from("/p/a.py", None).unwrap();
        assert_eq!(refs.len(), 1);
        assert!((refs[0].confidence - 0.9).abs() < 1e-6);
        assert_eq!(refs[0].resolution_method, ResolutionMethod::TypeAnnotation);
    }

    #[test]
    fn test_disagreeing_targets_coexist() {
        let (_temp, store) = open_store();
        let reference = |target: &str, confidence: f32| SymbolReference {
            source_file: "/p/a.py".to_string(),
            source_line: 3,
            source_symbol: "main".to_string(),
            kind: RefKind::MethodCall,
            target_file: Some("/p/b.py".to_string()),
            target_symbol: Some(target.to_string()),
            target_kind: None,
            confidence,
            resolution_method: ResolutionMethod::Heuristic,
        };
        store
            .with_txn(|txn| {
                txn.write_references_batch(&[reference("first", 0.5), reference("second", 0.8)])
            })
            .unwrap();

        let refs = store.references_from("/p/a.py", None).unwrap();
        assert_eq!(refs.len(), 2);
        // Readers see descending confidence.
        assert!(refs[0].confidence >= refs[1].confidence);
        assert_eq!(refs[0].target_symbol.as_deref(), Some("second"));
    }

    #[test]
    fn test_fts_search_ranks_by_bm25() {
        let (_temp, store) = open_store();
        store
            .with_txn(|txn| {
                let file_id = txn.upsert_file(&sample_file("/p/a.py"))?;
                let batch = txn.write_symbols_batch(
                    file_id,
                    &[
                        sample_symbol("AuthHandler", 1, 10),
                        sample_symbol("DataLoader", 12, 20),
                        sample_symbol("AuthToken", 22, 30),
                    ],
                    1000,
                )?;
                txn.index_symbol_text(batch.ids[0], "AuthHandler handles user auth login")?;
                txn.index_symbol_text(batch.ids[1], "DataLoader loads rows from disk")?;
                txn.index_symbol_text(batch.ids[2], "AuthToken auth token")?;
                Ok(batch)
            })
            .unwrap();

        let hits = store.fts_search("auth", 10, 1.5, 0.75).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].1 > 0.0);

        // CamelCase query splits into subwords and still matches.
        let hits = store.fts_search("AuthHandler", 10, 1.5, 0.75).unwrap();
        assert!(!hits.is_empty());

        // No searchable terms is a malformed query.
        assert!(matches!(
            store.fts_search("!!!", 10, 1.5, 0.75),
            Err(StoreError::MalformedQuery(_))
        ));
    }

    #[test]
    fn test_rollback_on_error() {
        let (_temp, store) = open_store();
        let result: StoreResult<()> = store.with_txn(|txn| {
            txn.upsert_file(&sample_file("/p/a.py"))?;
            Err(StoreError::TransactionFailed {
                cause: "boom".to_string(),
            })
        });
        assert!(result.is_err());
        assert_eq!(store.file_count().unwrap(), 0);
    }

    #[test]
    fn test_symbol_cursor_pages_and_limits() {
        let (_temp, store) = open_store();
        store
            .with_txn(|txn| {
                let file_id = txn.upsert_file(&sample_file("/p/a.py"))?;
                let symbols: Vec<NewSymbol> = (1..=600)
                    .map(|i| {
                        NewSymbol::new(
                            format!("f{i}"),
                            format!("f{i}"),
                            SymbolKind::Function,
                            LineSpan::new(i, i),
                        )
                    })
                    .collect();
                txn.write_symbols_batch(file_id, &symbols, 1000)?;
                Ok(())
            })
            .unwrap();

        let all: Vec<Symbol> = store.query_symbols(SymbolFilter::default()).collect();
        assert_eq!(all.len(), 600);

        let limited: Vec<Symbol> = store
            .query_symbols(SymbolFilter {
                limit: Some(5),
                ..Default::default()
            })
            .collect();
        assert_eq!(limited.len(), 5);

        let filtered: Vec<Symbol> = store
            .query_symbols(SymbolFilter {
                name: Some("f599".to_string()),
                exact_name: true,
                ..Default::default()
            })
            .collect();
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn test_meta_round_trip() {
        let (_temp, store) = open_store();
        store.set_meta("index_revision", "abc123").unwrap();
        assert_eq!(
            store.get_meta("index_revision").unwrap().as_deref(),
            Some("abc123")
        );
        assert_eq!(store.get_meta("missing").unwrap(), None);
    }

    #[test]
    fn test_vector_id_counter() {
        let (_temp, store) = open_store();
        let first = store.with_txn(|txn| txn.next_vector_id()).unwrap();
        let second = store.with_txn(|txn| txn.next_vector_id()).unwrap();
        assert_eq!(first.value() + 1, second.value());
    }

    #[test]
    fn test_get_snippet_reads_from_disk() {
        let (temp, store) = open_store();
        let src = temp.path().join("a.py");
        std::fs::write(&src, "def foo():\n    return 1\n").unwrap();

        let ids = store
            .with_txn(|txn| {
                let mut meta = sample_file(src.to_str().unwrap());
                meta.language = Language::Python;
                let file_id = txn.upsert_file(&meta)?;
                txn.write_symbols_batch(
                    file_id,
                    &[NewSymbol::new("foo", "foo", SymbolKind::Function, LineSpan::new(1, 2))],
                    1000,
                )
            })
            .unwrap();

        let snippet = store.get_snippet(ids.ids[0], 0).unwrap();
        assert_eq!(snippet.start_line, 1);
        assert!(snippet.content.contains("def foo()"));
    }
}
