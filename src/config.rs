//! Configuration for the engine.
//!
//! Layered the same way on every surface:
//! - Built-in defaults
//! - TOML configuration file (`.cerberus/settings.toml`)
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Variables are prefixed with `CERBERUS_` and use double underscores to
//! separate nesting levels:
//! - `CERBERUS_INDEXING__PARALLEL_THREADS=8` sets `indexing.parallel_threads`
//! - `CERBERUS_RETRIEVAL__FINAL_K=20` sets `retrieval.final_k`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema.
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub indexing: IndexingConfig,

    /// Language-specific settings keyed by config name ("python", "go", ...).
    #[serde(default = "default_languages")]
    pub languages: HashMap<String, LanguageConfig>,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default)]
    pub context: ContextConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexingConfig {
    /// Number of parallel parser threads.
    #[serde(default = "default_parallel_threads")]
    pub parallel_threads: usize,

    /// Files per write transaction.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Rows per insert statement inside a batch.
    #[serde(default = "default_chunk_rows")]
    pub chunk_rows: usize,

    /// Files larger than this are skipped with a diagnostic.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,

    /// Symbols beyond this per-file cap are truncated with a diagnostic.
    #[serde(default = "default_max_symbols_per_file")]
    pub max_symbols_per_file: usize,

    /// Hard ceiling on stored symbols; ingest stops gracefully when hit.
    #[serde(default = "default_max_total_symbols")]
    pub max_total_symbols: usize,

    /// Glob patterns excluded in addition to VCS ignore rules.
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,

    /// Fraction of changed files above which `update` falls back to a full
    /// rebuild.
    #[serde(default = "default_rebuild_threshold")]
    pub rebuild_threshold: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LanguageConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// File extensions mapped to this language.
    #[serde(default)]
    pub extensions: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetrievalConfig {
    /// Candidates fetched per retrieval method before fusion.
    #[serde(default = "default_k_per_method")]
    pub k_per_method: usize,

    /// Results returned after fusion and dedup.
    #[serde(default = "default_final_k")]
    pub final_k: usize,

    /// BM25 term-frequency saturation.
    #[serde(default = "default_bm25_k1")]
    pub bm25_k1: f32,

    /// BM25 length normalization.
    #[serde(default = "default_bm25_b")]
    pub bm25_b: f32,

    /// Rank offset in reciprocal rank fusion.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ResolverConfig {
    /// Maximum depth of C3 linearization before a class is reported.
    #[serde(default = "default_max_mro_depth")]
    pub max_mro_depth: usize,

    /// Default traversal depth for call graphs.
    #[serde(default = "default_call_graph_depth")]
    pub call_graph_depth: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ContextConfig {
    /// Default token budget for assembled context payloads.
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,

    /// Characters-per-token estimate used when no tokenizer is supplied.
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,

    /// Padding lines around the target implementation.
    #[serde(default = "default_snippet_padding")]
    pub snippet_padding: u32,

    /// How many inheritance levels of skeletonized bases to include.
    #[serde(default = "default_base_depth")]
    pub base_depth: usize,
}

fn default_version() -> u32 {
    1
}
fn default_parallel_threads() -> usize {
    num_cpus::get()
}
fn default_batch_size() -> usize {
    100
}
fn default_chunk_rows() -> usize {
    1000
}
fn default_max_file_bytes() -> u64 {
    1_048_576
}
fn default_max_symbols_per_file() -> usize {
    2000
}
fn default_max_total_symbols() -> usize {
    1_000_000
}
fn default_rebuild_threshold() -> f64 {
    0.3
}
fn default_k_per_method() -> usize {
    20
}
fn default_final_k() -> usize {
    10
}
fn default_bm25_k1() -> f32 {
    1.5
}
fn default_bm25_b() -> f32 {
    0.75
}
fn default_rrf_k() -> f32 {
    60.0
}
fn default_max_mro_depth() -> usize {
    50
}
fn default_call_graph_depth() -> usize {
    10
}
fn default_token_budget() -> usize {
    4000
}
fn default_chars_per_token() -> usize {
    4
}
fn default_snippet_padding() -> u32 {
    2
}
fn default_base_depth() -> usize {
    2
}
fn default_true() -> bool {
    true
}
fn default_ignore_patterns() -> Vec<String> {
    vec![
        "node_modules/**".to_string(),
        "target/**".to_string(),
        "dist/**".to_string(),
        "vendor/**".to_string(),
        "__pycache__/**".to_string(),
        ".git/**".to_string(),
        "*.min.js".to_string(),
    ]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            indexing: IndexingConfig::default(),
            languages: default_languages(),
            retrieval: RetrievalConfig::default(),
            resolver: ResolverConfig::default(),
            context: ContextConfig::default(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            parallel_threads: default_parallel_threads(),
            batch_size: default_batch_size(),
            chunk_rows: default_chunk_rows(),
            max_file_bytes: default_max_file_bytes(),
            max_symbols_per_file: default_max_symbols_per_file(),
            max_total_symbols: default_max_total_symbols(),
            ignore_patterns: default_ignore_patterns(),
            rebuild_threshold: default_rebuild_threshold(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k_per_method: default_k_per_method(),
            final_k: default_final_k(),
            bm25_k1: default_bm25_k1(),
            bm25_b: default_bm25_b(),
            rrf_k: default_rrf_k(),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_mro_depth: default_max_mro_depth(),
            call_graph_depth: default_call_graph_depth(),
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            chars_per_token: default_chars_per_token(),
            snippet_padding: default_snippet_padding(),
            base_depth: default_base_depth(),
        }
    }
}

fn default_languages() -> HashMap<String, LanguageConfig> {
    let mut langs = HashMap::new();

    langs.insert(
        "python".to_string(),
        LanguageConfig {
            enabled: true,
            extensions: vec!["py".to_string(), "pyi".to_string()],
        },
    );
    langs.insert(
        "javascript".to_string(),
        LanguageConfig {
            enabled: true,
            extensions: vec![
                "js".to_string(),
                "jsx".to_string(),
                "mjs".to_string(),
                "cjs".to_string(),
            ],
        },
    );
    langs.insert(
        "typescript".to_string(),
        LanguageConfig {
            enabled: true,
            extensions: vec!["ts".to_string(), "tsx".to_string(), "mts".to_string()],
        },
    );
    langs.insert(
        "go".to_string(),
        LanguageConfig {
            enabled: true,
            extensions: vec!["go".to_string()],
        },
    );

    langs
}

impl Settings {
    /// Load configuration from defaults, the nearest workspace config file,
    /// and `CERBERUS_` environment variables.
    pub fn load() -> Result<Self, figment::Error> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(".cerberus/settings.toml"));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still applying defaults and
    /// environment overrides.
    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("CERBERUS_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
    }

    /// Walk ancestors of the current directory looking for `.cerberus/`.
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;
        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(".cerberus");
            if config_dir.is_dir() {
                return Some(config_dir.join("settings.toml"));
            }
        }
        None
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> Result<(), crate::EngineError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| crate::EngineError::Config {
                reason: format!("cannot create '{}': {e}", parent.display()),
            })?;
        }
        let toml_string = toml::to_string_pretty(self).map_err(|e| crate::EngineError::Config {
            reason: e.to_string(),
        })?;
        std::fs::write(path, toml_string).map_err(|e| crate::EngineError::Config {
            reason: format!("cannot write '{}': {e}", path.display()),
        })?;
        Ok(())
    }

    /// All enabled file extensions mapped to their language config key.
    pub fn extension_allowlist(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        for (name, config) in &self.languages {
            if !config.enabled {
                continue;
            }
            for ext in &config.extensions {
                map.insert(ext.to_lowercase(), name.clone());
            }
        }
        map
    }
}
