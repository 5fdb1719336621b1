//! Hybrid retrieval: BM25 and vector search, fused, deduplicated, and
//! lazily materialized.
//!
//! The retriever holds only query-scoped buffers. Snippets are loaded for
//! the final top-k alone; candidates that fuse out are never read from
//! disk.

pub mod classifier;
pub mod fusion;

pub use classifier::{QueryMode, classify};
pub use fusion::FusionMethod;

use crate::cancel::Deadline;
use crate::config::RetrievalConfig;
use crate::embedding::Embedder;
use crate::error::{EngineResult, StoreError};
use crate::store::{Snippet, SymbolStore};
use crate::symbol::Symbol;
use crate::types::{SymbolId, SymbolKind};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Which component(s) produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Keyword,
    Semantic,
    Both,
}

/// One ranked search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub symbol_id: SymbolId,
    pub file: String,
    pub start_line: u32,
    pub end_line: u32,
    pub kind: SymbolKind,
    pub name: String,
    pub bm25_score: Option<f32>,
    pub vector_score: Option<f32>,
    pub fused_score: f32,
    pub match_type: MatchType,
    /// Materialized only for the final top-k.
    pub snippet: Option<Snippet>,
}

/// Search results plus degradation flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub hits: Vec<SearchHit>,
    /// Vector component was unavailable; results are BM25-only.
    pub degraded: bool,
    /// The deadline expired; results cover only the completed phases.
    pub partial: bool,
    pub mode: Option<QueryMode>,
}

/// Query-scoped retriever.
pub struct Retriever<'a> {
    store: &'a SymbolStore,
    config: &'a RetrievalConfig,
    embedder: Option<&'a dyn Embedder>,
}

impl<'a> Retriever<'a> {
    pub fn new(
        store: &'a SymbolStore,
        config: &'a RetrievalConfig,
        embedder: Option<&'a dyn Embedder>,
    ) -> Self {
        Self {
            store,
            config,
            embedder,
        }
    }

    /// Run a hybrid search.
    ///
    /// `mode` overrides the classifier; `final_k` overrides the configured
    /// result count. Ties in fused scores break by (path, start_line) so
    /// rankings are reproducible on the same snapshot.
    pub fn search(
        &self,
        query: &str,
        mode: Option<QueryMode>,
        final_k: Option<usize>,
        fusion_method: FusionMethod,
        deadline: Option<Deadline>,
    ) -> EngineResult<SearchOutcome> {
        let mode = mode.unwrap_or_else(|| classify(query));
        let final_k = final_k.unwrap_or(self.config.final_k);
        let k_per_method = self.config.k_per_method;

        let mut outcome = SearchOutcome {
            mode: Some(mode),
            ..Default::default()
        };

        // Keyword component.
        let bm25: Vec<(SymbolId, f32)> = self.store.fts_search(
            query,
            k_per_method,
            self.config.bm25_k1,
            self.config.bm25_b,
        )?;

        if deadline.is_some_and(|d| d.expired()) {
            outcome.partial = true;
            outcome.hits = self.finalize(&bm25, &[], fusion_method, mode, final_k)?;
            return Ok(outcome);
        }

        // Semantic component. Keyword mode still blends vectors when they
        // are available, but their absence only degrades the other modes.
        let vector: Vec<(SymbolId, f32)> = match self.vector_candidates(query, k_per_method) {
            Ok(candidates) => candidates,
            Err(reason) => {
                if mode != QueryMode::Keyword {
                    tracing::debug!(reason, "vector search degraded to BM25-only");
                    outcome.degraded = true;
                }
                Vec::new()
            }
        };

        outcome.hits = self.finalize(&bm25, &vector, fusion_method, mode, final_k)?;
        Ok(outcome)
    }

    /// Embed the query and search the vector index; any failure reports a
    /// degradation reason instead of an error.
    fn vector_candidates(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<(SymbolId, f32)>, &'static str> {
        let embedder = self.embedder.ok_or("no embedder configured")?;
        if !self.store.vectors().is_available() {
            return Err("vector index not built");
        }
        let embedded = embedder.embed(&[query]).map_err(|_| "embedding failed")?;
        let query_vector = embedded.into_iter().next().ok_or("empty embedding")?;

        let (vector_ids, distances) = self
            .store
            .vectors()
            .search(&query_vector, k)
            .map_err(|_| "vector index search failed")?;
        let symbol_ids = self
            .store
            .symbols_for_vectors(&vector_ids)
            .map_err(|_| "vector id mapping failed")?;

        Ok(symbol_ids
            .into_iter()
            .zip(distances)
            .filter_map(|(symbol, distance)| symbol.map(|id| (id, distance)))
            .collect())
    }

    /// Fuse, dedupe by the uniqueness key, order deterministically, cut to
    /// `final_k`, and materialize snippets for the survivors.
    fn finalize(
        &self,
        bm25: &[(SymbolId, f32)],
        vector: &[(SymbolId, f32)],
        fusion_method: FusionMethod,
        mode: QueryMode,
        final_k: usize,
    ) -> EngineResult<Vec<SearchHit>> {
        let fused: HashMap<SymbolId, f32> = match fusion_method {
            FusionMethod::ReciprocalRank => {
                let bm25_ids: Vec<SymbolId> = bm25.iter().map(|(id, _)| *id).collect();
                let vector_ids: Vec<SymbolId> = vector.iter().map(|(id, _)| *id).collect();
                fusion::reciprocal_rank(&[&bm25_ids, &vector_ids], self.config.rrf_k)
            }
            FusionMethod::Weighted => fusion::weighted(bm25, vector, mode.bm25_weight()),
        };

        let bm25_scores: HashMap<SymbolId, f32> = bm25.iter().copied().collect();
        let vector_scores: HashMap<SymbolId, f32> = vector.iter().copied().collect();

        // Resolve symbol rows; candidates whose row vanished are dropped.
        let mut candidates: Vec<(Symbol, f32)> = Vec::new();
        for (symbol_id, fused_score) in fused {
            if let Some(symbol) = self.store.get_symbol(symbol_id)? {
                candidates.push((symbol, fused_score));
            }
        }

        // Deterministic order before dedup: best score first, then path
        // and line.
        candidates.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.file_path.cmp(&b.0.file_path))
                .then_with(|| a.0.span.start_line.cmp(&b.0.span.start_line))
        });

        // Dedup by the uniqueness key, keeping the max-score occurrence.
        let mut seen = HashSet::new();
        let mut hits = Vec::new();
        for (symbol, fused_score) in candidates {
            let key = (
                symbol.file_path.clone(),
                symbol.name.clone(),
                symbol.kind,
                symbol.span.start_line,
                symbol.span.end_line,
            );
            if !seen.insert(key) {
                continue;
            }

            let bm25_score = bm25_scores.get(&symbol.id).copied();
            let vector_score = vector_scores.get(&symbol.id).copied();
            let match_type = match (bm25_score.is_some(), vector_score.is_some()) {
                (true, true) => MatchType::Both,
                (false, true) => MatchType::Semantic,
                _ => MatchType::Keyword,
            };

            hits.push(SearchHit {
                symbol_id: symbol.id,
                file: symbol.file_path.to_string(),
                start_line: symbol.span.start_line,
                end_line: symbol.span.end_line,
                kind: symbol.kind,
                name: symbol.name.to_string(),
                bm25_score,
                vector_score,
                fused_score,
                match_type,
                snippet: None,
            });
            if hits.len() == final_k {
                break;
            }
        }

        // Lazy loading: only survivors touch the disk.
        for hit in &mut hits {
            match self.store.get_snippet(hit.symbol_id, 0) {
                Ok(snippet) => hit.snippet = Some(snippet),
                Err(StoreError::SnippetSourceMissing { path, .. }) => {
                    tracing::debug!(path = %path.display(), "snippet source missing");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::embedding::HashEmbedder;
    use crate::store::FileMeta;
    use crate::symbol::NewSymbol;
    use crate::types::LineSpan;
    use crate::parsing::Language;
    use tempfile::TempDir;

    const TEXTS: [&str; 2] = [
        "AuthHandler Handles user authentication and login",
        "load_data Load rows from disk",
    ];

    /// Two symbols, both FTS-indexed and embedded.
    fn seeded_store() -> (TempDir, SymbolStore) {
        let temp = TempDir::new().unwrap();
        let (store, _) = SymbolStore::open(temp.path()).unwrap();

        let src = temp.path().join("auth.py");
        std::fs::write(
            &src,
            "class AuthHandler:\n    def login(self):\n        pass\n\n\ndef load_data():\n    pass\n",
        )
        .unwrap();
        let path = src.to_string_lossy().to_string();

        let vector_entries = store
            .with_txn(|txn| {
                let file = txn.upsert_file(&FileMeta {
                    path: path.clone(),
                    language: Language::Python,
                    content_hash: "h".to_string(),
                    size: 1,
                    mtime: 0,
                    revision: None,
                })?;
                let batch = txn.write_symbols_batch(
                    file,
                    &[
                        NewSymbol::new(
                            "AuthHandler",
                            "AuthHandler",
                            SymbolKind::Class,
                            LineSpan::new(1, 3),
                        )
                        .with_doc("Handles user authentication and login"),
                        NewSymbol::new(
                            "load_data",
                            "load_data",
                            SymbolKind::Function,
                            LineSpan::new(6, 7),
                        )
                        .with_doc("Load rows from disk"),
                    ],
                    1000,
                )?;
                let mut entries = Vec::new();
                for (i, text) in TEXTS.iter().enumerate() {
                    txn.index_symbol_text(batch.ids[i], text)?;
                    let vector_id = txn.next_vector_id()?;
                    txn.upsert_embedding(batch.ids[i], vector_id, "hash")?;
                    entries.push((vector_id, *text));
                }
                Ok(entries)
            })
            .unwrap();

        let embedder = HashEmbedder::default();
        let batch: Vec<_> = vector_entries
            .into_iter()
            .map(|(vector_id, text)| {
                (vector_id, embedder.embed(&[text]).unwrap().remove(0))
            })
            .collect();
        store.vectors().upsert_batch(&batch).unwrap();

        (temp, store)
    }

    #[test]
    fn test_hybrid_search_dedup_and_match_type() {
        let (_temp, store) = seeded_store();
        let settings = Settings::default();
        let embedder = HashEmbedder::default();
        let retriever = Retriever::new(&store, &settings.retrieval, Some(&embedder));

        let outcome = retriever
            .search(
                "auth",
                Some(QueryMode::Balanced),
                Some(5),
                FusionMethod::ReciprocalRank,
                None,
            )
            .unwrap();

        assert!(!outcome.degraded);
        let auth_hits: Vec<&SearchHit> = outcome
            .hits
            .iter()
            .filter(|h| h.name == "AuthHandler")
            .collect();
        // Dedup: the symbol appears once even though both components
        // returned it.
        assert_eq!(auth_hits.len(), 1);
        assert_eq!(auth_hits[0].match_type, MatchType::Both);
        assert!(auth_hits[0].bm25_score.is_some());
        assert!(auth_hits[0].vector_score.is_some());

        // The top hit carries its snippet; it was materialized lazily.
        assert!(outcome.hits[0].snippet.is_some());
    }

    #[test]
    fn test_degrades_without_embedder() {
        let (_temp, store) = seeded_store();
        let settings = Settings::default();
        let retriever = Retriever::new(&store, &settings.retrieval, None);

        let outcome = retriever
            .search(
                "auth",
                Some(QueryMode::Semantic),
                None,
                FusionMethod::ReciprocalRank,
                None,
            )
            .unwrap();
        assert!(outcome.degraded);
        assert!(!outcome.hits.is_empty());
        assert!(outcome.hits.iter().all(|h| h.vector_score.is_none()));
    }

    #[test]
    fn test_keyword_mode_unaffected_by_missing_vectors() {
        let (_temp, store) = seeded_store();
        let settings = Settings::default();
        let retriever = Retriever::new(&store, &settings.retrieval, None);

        let outcome = retriever
            .search(
                "AuthHandler",
                Some(QueryMode::Keyword),
                None,
                FusionMethod::ReciprocalRank,
                None,
            )
            .unwrap();
        assert!(!outcome.degraded);
        assert!(!outcome.hits.is_empty());
    }

    #[test]
    fn test_deterministic_ordering() {
        let (_temp, store) = seeded_store();
        let settings = Settings::default();
        let embedder = HashEmbedder::default();
        let retriever = Retriever::new(&store, &settings.retrieval, Some(&embedder));

        let run = || {
            retriever
                .search(
                    "data handler",
                    Some(QueryMode::Balanced),
                    None,
                    FusionMethod::ReciprocalRank,
                    None,
                )
                .unwrap()
                .hits
                .iter()
                .map(|h| (h.symbol_id, h.file.clone(), h.start_line))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_weighted_fusion_mode() {
        let (_temp, store) = seeded_store();
        let settings = Settings::default();
        let embedder = HashEmbedder::default();
        let retriever = Retriever::new(&store, &settings.retrieval, Some(&embedder));

        let outcome = retriever
            .search(
                "authentication login",
                Some(QueryMode::Semantic),
                None,
                FusionMethod::Weighted,
                None,
            )
            .unwrap();
        assert!(!outcome.hits.is_empty());
        assert_eq!(outcome.hits[0].name, "AuthHandler");
    }

    #[test]
    fn test_expired_deadline_returns_partial() {
        let (_temp, store) = seeded_store();
        let settings = Settings::default();
        let embedder = HashEmbedder::default();
        let retriever = Retriever::new(&store, &settings.retrieval, Some(&embedder));

        let outcome = retriever
            .search(
                "auth",
                Some(QueryMode::Balanced),
                None,
                FusionMethod::ReciprocalRank,
                Some(Deadline::after(std::time::Duration::ZERO)),
            )
            .unwrap();
        assert!(outcome.partial);
        // BM25 phase completed; hits are keyword-only.
        assert!(outcome.hits.iter().all(|h| h.vector_score.is_none()));
    }
}
