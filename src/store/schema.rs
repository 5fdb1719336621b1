//! SQLite schema and forward migrations.
//!
//! The connection runs WAL with foreign keys on, so deleting a file row
//! cascades through symbols, imports, calls, parse facts, FTS postings and
//! embedding mappings in one statement. Symbol references key on file
//! *paths* rather than row ids because a reference must survive as
//! "unresolved" when its target file disappears; their cleanup is explicit
//! in `delete_file`.
//!
//! Unresolved reference targets are stored as empty strings, not NULL, so
//! the uniqueness index can see them (SQLite treats NULLs as distinct).

use crate::error::{StoreError, StoreResult};
use rusqlite::Connection;

/// Schema version the engine expects on open.
pub const SCHEMA_VERSION: u32 = 3;

pub(crate) const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS files (
    id           INTEGER PRIMARY KEY,
    path         TEXT NOT NULL UNIQUE,
    language     TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    size         INTEGER NOT NULL,
    mtime        INTEGER NOT NULL,
    revision     TEXT
);

CREATE TABLE IF NOT EXISTS symbols (
    id             INTEGER PRIMARY KEY,
    file_id        INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
    name           TEXT NOT NULL,
    qualified_name TEXT NOT NULL,
    kind           TEXT NOT NULL,
    start_line     INTEGER NOT NULL,
    end_line       INTEGER NOT NULL,
    signature      TEXT,
    doc            TEXT,
    parent         TEXT,
    UNIQUE(file_id, name, kind, start_line, end_line)
);
CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(name);
CREATE INDEX IF NOT EXISTS idx_symbols_kind ON symbols(kind);
CREATE INDEX IF NOT EXISTS idx_symbols_file ON symbols(file_id);
CREATE INDEX IF NOT EXISTS idx_symbols_parent ON symbols(parent);

CREATE TABLE IF NOT EXISTS imports (
    id            INTEGER PRIMARY KEY,
    file_id       INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
    module_path   TEXT NOT NULL,
    names         TEXT NOT NULL,
    alias         TEXT,
    line          INTEGER NOT NULL,
    is_glob       INTEGER NOT NULL DEFAULT 0,
    target_file   TEXT,
    target_symbol TEXT
);
CREATE INDEX IF NOT EXISTS idx_imports_file ON imports(file_id);

CREATE TABLE IF NOT EXISTS method_calls (
    id            INTEGER PRIMARY KEY,
    file_id       INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
    caller        TEXT NOT NULL,
    method_name   TEXT NOT NULL,
    receiver      TEXT,
    receiver_type TEXT,
    line          INTEGER NOT NULL,
    col           INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_calls_file ON method_calls(file_id);
CREATE INDEX IF NOT EXISTS idx_calls_method ON method_calls(method_name);

CREATE TABLE IF NOT EXISTS class_bases (
    id         INTEGER PRIMARY KEY,
    file_id    INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
    class_name TEXT NOT NULL,
    line       INTEGER NOT NULL,
    base_name  TEXT NOT NULL,
    position   INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_bases_file ON class_bases(file_id);
CREATE INDEX IF NOT EXISTS idx_bases_class ON class_bases(class_name);
CREATE INDEX IF NOT EXISTS idx_bases_base ON class_bases(base_name);

CREATE TABLE IF NOT EXISTS type_bindings (
    id        INTEGER PRIMARY KEY,
    file_id   INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
    scope     TEXT NOT NULL,
    name      TEXT NOT NULL,
    type_name TEXT NOT NULL,
    source    TEXT NOT NULL,
    line      INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_bindings_file ON type_bindings(file_id);

CREATE TABLE IF NOT EXISTS symbol_references (
    id                INTEGER PRIMARY KEY,
    source_file       TEXT NOT NULL,
    source_line       INTEGER NOT NULL,
    source_symbol     TEXT NOT NULL,
    kind              TEXT NOT NULL,
    target_file       TEXT NOT NULL DEFAULT '',
    target_symbol     TEXT NOT NULL DEFAULT '',
    target_kind       TEXT,
    confidence        REAL NOT NULL,
    resolution_method TEXT NOT NULL,
    UNIQUE(source_file, source_line, source_symbol, kind, target_file, target_symbol)
);
CREATE INDEX IF NOT EXISTS idx_refs_source ON symbol_references(source_file, source_symbol);
CREATE INDEX IF NOT EXISTS idx_refs_target ON symbol_references(target_file, target_symbol);

CREATE TABLE IF NOT EXISTS embeddings_map (
    symbol_id  INTEGER PRIMARY KEY REFERENCES symbols(id) ON DELETE CASCADE,
    vector_id  INTEGER NOT NULL UNIQUE,
    input_hash TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS fts_documents (
    symbol_id INTEGER PRIMARY KEY REFERENCES symbols(id) ON DELETE CASCADE,
    length    INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS fts_postings (
    term      TEXT NOT NULL,
    symbol_id INTEGER NOT NULL REFERENCES symbols(id) ON DELETE CASCADE,
    tf        INTEGER NOT NULL,
    PRIMARY KEY (term, symbol_id)
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS idx_postings_symbol ON fts_postings(symbol_id);
"#;

/// Create all tables on a fresh database and stamp the schema version.
pub(crate) fn initialize(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(CREATE_TABLES)?;
    conn.execute(
        "INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

/// Stored schema version, if any. A database without the meta table is
/// fresh.
pub(crate) fn stored_version(conn: &Connection) -> StoreResult<Option<u32>> {
    let has_meta: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='meta')",
        [],
        |row| row.get(0),
    )?;
    if !has_meta {
        return Ok(None);
    }
    let version: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;
    Ok(version.and_then(|v| v.parse().ok()))
}

/// Outcome of opening a store with an existing schema.
#[derive(Debug, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Schema already current.
    Current,
    /// One or more forward migrations ran.
    Migrated { from: u32 },
    /// No forward path; the caller must rebuild.
    RebuildRequired { found: u32 },
}

/// Compare the stored version against [`SCHEMA_VERSION`] and run forward
/// migrations inside a single transaction. Versions with no migration path
/// (or from the future) mark the store for rebuild.
pub(crate) fn migrate(conn: &mut Connection) -> StoreResult<MigrationOutcome> {
    let Some(found) = stored_version(conn)? else {
        initialize(conn)?;
        return Ok(MigrationOutcome::Current);
    };

    if found == SCHEMA_VERSION {
        // Idempotent: fills in any table added by CREATE IF NOT EXISTS.
        initialize(conn)?;
        return Ok(MigrationOutcome::Current);
    }
    if found > SCHEMA_VERSION || found < 2 {
        return Ok(MigrationOutcome::RebuildRequired { found });
    }

    let tx = conn.transaction().map_err(StoreError::Database)?;
    let mut version = found;
    while version < SCHEMA_VERSION {
        match version {
            // v2 predates per-file VCS revisions.
            2 => {
                tx.execute_batch("ALTER TABLE files ADD COLUMN revision TEXT;")?;
            }
            other => {
                return Ok(MigrationOutcome::RebuildRequired { found: other });
            }
        }
        version += 1;
    }
    tx.execute(
        "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [SCHEMA_VERSION.to_string()],
    )?;
    tx.commit()?;
    Ok(MigrationOutcome::Migrated { from: found })
}
