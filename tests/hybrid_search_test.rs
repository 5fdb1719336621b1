//! Hybrid search: dedup across components, deterministic ordering, and
//! graceful degradation without a vector index.

use cerberus::{Engine, FusionMethod, HashEmbedder, MatchType, QueryMode, Settings};
use std::fs;
use tempfile::TempDir;

fn project(temp: &TempDir) -> std::path::PathBuf {
    let project = temp.path().join("project");
    fs::create_dir_all(&project).unwrap();

    let mut auth = String::new();
    for _ in 0..119 {
        auth.push_str("# padding\n");
    }
    auth.push_str("class AuthHandler:\n    \"\"\"Authenticates users and issues session tokens.\"\"\"\n\n");
    for i in 0..28 {
        auth.push_str(&format!("    def step{i}(self):\n        pass\n"));
    }
    fs::write(project.join("auth.py"), auth).unwrap();

    fs::write(
        project.join("data.py"),
        "class DataLoader:\n    \"\"\"Loads rows from the on-disk cache.\"\"\"\n\n    def load(self):\n        pass\n",
    )
    .unwrap();
    project
}

fn engine_with_embedder(temp: &TempDir) -> Engine {
    let mut settings = Settings::default();
    settings.indexing.parallel_threads = 2;
    Engine::open(&temp.path().join("store"), settings)
        .unwrap()
        .with_embedder(Box::new(HashEmbedder::default()))
}

#[test]
fn test_balanced_search_dedups_and_marks_both() {
    let temp = TempDir::new().unwrap();
    let project = project(&temp);
    let engine = engine_with_embedder(&temp);
    engine.index(&project).unwrap();

    let outcome = engine
        .search("auth", Some(QueryMode::Balanced), Some(5), None)
        .unwrap();
    assert!(!outcome.degraded);

    let auth_hits: Vec<_> = outcome
        .hits
        .iter()
        .filter(|h| h.name == "AuthHandler")
        .collect();
    assert_eq!(auth_hits.len(), 1, "one entry per symbol, ever");

    let hit = auth_hits[0];
    assert_eq!(hit.match_type, MatchType::Both);
    assert_eq!(hit.start_line, 120);

    // RRF: the fused score is the sum of both contributions, so it is
    // never below either one.
    let bm25_rank_contribution = hit.bm25_score.map(|_| 1.0 / 61.0).unwrap_or(0.0);
    assert!(hit.fused_score >= bm25_rank_contribution - 1e-6);
}

#[test]
fn test_search_is_deterministic() {
    let temp = TempDir::new().unwrap();
    let project = project(&temp);
    let engine = engine_with_embedder(&temp);
    engine.index(&project).unwrap();

    let run = |query: &str| {
        engine
            .search(query, Some(QueryMode::Balanced), Some(10), None)
            .unwrap()
            .hits
            .iter()
            .map(|h| (h.symbol_id, h.file.clone(), h.start_line))
            .collect::<Vec<_>>()
    };

    for query in ["auth", "loads rows", "session tokens"] {
        assert_eq!(run(query), run(query), "unstable ranking for '{query}'");
    }
}

#[test]
fn test_semantic_degrades_without_embedder() {
    let temp = TempDir::new().unwrap();
    let project = project(&temp);

    let mut settings = Settings::default();
    settings.indexing.parallel_threads = 2;
    let engine = Engine::open(&temp.path().join("store"), settings).unwrap();
    engine.index(&project).unwrap();

    let outcome = engine
        .search("auth", Some(QueryMode::Semantic), None, None)
        .unwrap();
    assert!(outcome.degraded);
    assert!(!outcome.hits.is_empty(), "BM25 results still flow");

    // Keyword mode is unaffected.
    let keyword = engine
        .search("AuthHandler", Some(QueryMode::Keyword), None, None)
        .unwrap();
    assert!(!keyword.degraded);
    assert_eq!(keyword.hits[0].name, "AuthHandler");
}

#[test]
fn test_weighted_fusion_selectable() {
    let temp = TempDir::new().unwrap();
    let project = project(&temp);
    let engine = engine_with_embedder(&temp);
    engine.index(&project).unwrap();

    let outcome = engine
        .search(
            "authenticates users",
            Some(QueryMode::Semantic),
            Some(5),
            Some(FusionMethod::Weighted),
        )
        .unwrap();
    assert!(!outcome.hits.is_empty());
    assert_eq!(outcome.hits[0].name, "AuthHandler");
}

#[test]
fn test_camel_case_query_reaches_subwords() {
    let temp = TempDir::new().unwrap();
    let project = project(&temp);
    let engine = engine_with_embedder(&temp);
    engine.index(&project).unwrap();

    // Tokenizer splits the stored name, so the subword matches too.
    let outcome = engine
        .search("handler", Some(QueryMode::Keyword), None, None)
        .unwrap();
    assert!(outcome.hits.iter().any(|h| h.name == "AuthHandler"));
}

#[test]
fn test_final_k_truncates() {
    let temp = TempDir::new().unwrap();
    let project = project(&temp);
    let engine = engine_with_embedder(&temp);
    engine.index(&project).unwrap();

    let outcome = engine
        .search("step", Some(QueryMode::Keyword), Some(3), None)
        .unwrap();
    assert!(outcome.hits.len() <= 3);
}
