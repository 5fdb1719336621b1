//! Query classification: route a query to the retrieval mix that suits it.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// How a search blends its BM25 and vector components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    Keyword,
    Semantic,
    Balanced,
}

impl QueryMode {
    /// Weight of the BM25 component in weighted fusion.
    pub fn bm25_weight(&self) -> f32 {
        match self {
            QueryMode::Keyword => 0.7,
            QueryMode::Balanced => 0.5,
            QueryMode::Semantic => 0.3,
        }
    }
}

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    // CamelCase, snake_case or dotted identifiers: AuthHandler,
    // parse_config, auth.login.
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").unwrap()
});

static INTERROGATIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(how|what|where|when|why|which|who|does|do|is|are|can|should)\b").unwrap()
});

/// Heuristic classification; callers may override with an explicit mode.
pub fn classify(query: &str) -> QueryMode {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return QueryMode::Balanced;
    }
    if INTERROGATIVE.is_match(trimmed) {
        return QueryMode::Semantic;
    }
    if IDENTIFIER.is_match(trimmed) {
        return QueryMode::Keyword;
    }
    let tokens = trimmed.split_whitespace().count();
    if tokens <= 3 {
        QueryMode::Keyword
    } else {
        QueryMode::Semantic
    }
}
