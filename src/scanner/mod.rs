//! File discovery and per-file scanning.
//!
//! The walker honors VCS ignore files plus configured exclude patterns and
//! prunes excluded subtrees without descending. Scanning a file reads it
//! once, hashes the bytes, enforces the byte and symbol caps, and hands the
//! result downstream; nothing is retained after the handoff.

use crate::config::Settings;
use crate::error::ParseError;
use crate::parsing::{Language, LanguageParser, ParsedFile};
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Per-file or per-batch condition worth reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub path: String,
    pub kind: DiagnosticKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    ParseFailure,
    FileTooLarge,
    SymbolCapTruncated,
    GlobalCapReached,
    BatchFailed,
    VectorUnavailable,
    ResolverWarning,
}

impl Diagnostic {
    pub fn new(path: impl Into<String>, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Parsed contents and metadata of one scanned file.
#[derive(Debug, Clone)]
pub struct FileResult {
    pub path: PathBuf,
    pub language: Language,
    pub content_hash: String,
    pub size: u64,
    pub mtime: i64,
    pub parsed: ParsedFile,
    pub diagnostics: Vec<Diagnostic>,
}

/// Outcome of scanning a single path.
#[derive(Debug)]
pub enum ScanOutcome {
    /// File parsed (possibly with an empty result on syntax errors).
    Scanned(Box<FileResult>),
    /// Content hash matches the index; nothing to re-parse.
    Unchanged { path: PathBuf },
    /// File skipped entirely (over the byte cap, unreadable).
    Skipped(Diagnostic),
}

/// Walks directories and scans files per the configured rules.
pub struct Scanner {
    settings: Arc<Settings>,
}

impl Scanner {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }

    /// Discover all indexable files under `root`, in deterministic (sorted)
    /// order.
    pub fn discover(&self, root: &Path) -> Vec<PathBuf> {
        let allowlist = self.settings.extension_allowlist();

        let mut builder = WalkBuilder::new(root);
        builder
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .follow_links(false)
            .require_git(false);

        // Configured exclude patterns, applied as override exclusions so
        // matching subtrees are pruned before stat.
        let mut override_builder = ignore::overrides::OverrideBuilder::new(root);
        for pattern in &self.settings.indexing.ignore_patterns {
            if let Err(e) = override_builder.add(&format!("!{pattern}")) {
                tracing::warn!(pattern = %pattern, error = %e, "invalid ignore pattern");
            }
        }
        if let Ok(overrides) = override_builder.build() {
            builder.overrides(overrides);
        }

        let mut files: Vec<PathBuf> = builder
            .build()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
            .filter_map(|entry| {
                let path = entry.path();
                let ext = path.extension()?.to_str()?.to_lowercase();
                if allowlist.contains_key(&ext) {
                    Some(path.to_path_buf())
                } else {
                    None
                }
            })
            .collect();

        files.sort();
        files
    }

    /// Whether `path` would be picked up by `discover` (used by the
    /// incremental layer to filter untracked files).
    pub fn accepts(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.settings
            .extension_allowlist()
            .contains_key(&ext.to_lowercase())
    }

    /// Read, hash and parse one file, enforcing the per-file caps.
    ///
    /// When `known_hash` matches the file's current content hash, parsing
    /// is skipped and `Unchanged` is returned. The parser must match the
    /// file's language; the caller owns parser reuse across files.
    pub fn scan_file(
        &self,
        path: &Path,
        parser: &mut dyn LanguageParser,
        known_hash: Option<&str>,
    ) -> ScanOutcome {
        let display = path.to_string_lossy().to_string();

        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) => {
                return ScanOutcome::Skipped(Diagnostic::new(
                    display,
                    DiagnosticKind::ParseFailure,
                    format!("cannot stat: {e}"),
                ));
            }
        };

        let size = metadata.len();
        let max_bytes = self.settings.indexing.max_file_bytes;
        if size > max_bytes {
            return ScanOutcome::Skipped(Diagnostic::new(
                display,
                DiagnosticKind::FileTooLarge,
                format!("{size} bytes exceeds the {max_bytes}-byte cap"),
            ));
        }

        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                return ScanOutcome::Skipped(Diagnostic::new(
                    display,
                    DiagnosticKind::ParseFailure,
                    format!("cannot read: {e}"),
                ));
            }
        };

        let content_hash = hash_bytes(&bytes);
        if known_hash == Some(content_hash.as_str()) {
            return ScanOutcome::Unchanged {
                path: path.to_path_buf(),
            };
        }
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let mut diagnostics = Vec::new();
        let parsed = match String::from_utf8(bytes) {
            Ok(code) => match parser.parse(&code) {
                Ok(parsed) => parsed,
                Err(e) => {
                    diagnostics.push(Diagnostic::new(
                        display.clone(),
                        DiagnosticKind::ParseFailure,
                        e.to_string(),
                    ));
                    ParsedFile::default()
                }
            },
            Err(_) => {
                diagnostics.push(Diagnostic::new(
                    display.clone(),
                    DiagnosticKind::ParseFailure,
                    ParseError::InvalidUtf8.to_string(),
                ));
                ParsedFile::default()
            }
        };

        let mut parsed = parsed;
        let cap = self.settings.indexing.max_symbols_per_file;
        if parsed.symbols.len() > cap {
            // Truncation is deterministic: symbols arrive in source order.
            parsed.symbols.truncate(cap);
            diagnostics.push(Diagnostic::new(
                display,
                DiagnosticKind::SymbolCapTruncated,
                format!("truncated to the per-file cap of {cap} symbols"),
            ));
        }

        ScanOutcome::Scanned(Box::new(FileResult {
            path: path.to_path_buf(),
            language: parser.language(),
            content_hash,
            size,
            mtime,
            parsed,
            diagnostics,
        }))
    }
}

/// Hex-encoded SHA-256 of a byte slice. Stable across reads of identical
/// bytes, which is all change detection needs.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Hash of an arbitrary string (used for embedding staleness).
pub fn hash_str(text: &str) -> String {
    hash_bytes(text.as_bytes())
}
