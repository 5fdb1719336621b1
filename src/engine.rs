//! The engine: the narrow API external collaborators consume.
//!
//! One `Engine` owns one store directory. All operations are synchronous;
//! server layers wrap them in their own concurrency model. Errors follow
//! the crate taxonomy and never panic across this boundary.

use crate::blueprint::{Blueprint, Overlay};
use crate::cancel::{CancellationToken, Deadline};
use crate::config::Settings;
use crate::context::{ContextAssembler, ContextOptions, ContextPayload};
use crate::embedding::Embedder;
use crate::error::{EngineError, EngineResult, ResolverWarning, StoreError};
use crate::indexing::{IngestReport, UpdateReport};
use crate::parsing::{Language, Skeleton, create_parser};
use crate::resolve::{
    CallGraph, Direction, InheritanceResolver, ResolveReport, run_passes, traverse,
};
use crate::retrieve::{FusionMethod, QueryMode, Retriever, SearchOutcome};
use crate::store::{
    MigrationOutcome, Snippet, StoreStats, SymbolFilter, SymbolStore, schema,
};
use crate::symbol::Symbol;
use crate::types::{LineSpan, SymbolId};
use std::path::Path;
use std::sync::Arc;

/// A handle to one index.
pub struct Engine {
    store: SymbolStore,
    settings: Arc<Settings>,
    embedder: Option<Box<dyn Embedder>>,
}

impl Engine {
    /// Open (or initialize) the store under `store_dir`.
    ///
    /// Runs forward schema migrations when possible. A store whose schema
    /// has no forward path returns [`EngineError::StaleIndex`]; the caller
    /// decides whether to [`Engine::rebuild`].
    pub fn open(store_dir: &Path, settings: Settings) -> EngineResult<Self> {
        let (store, outcome) = SymbolStore::open(store_dir)?;
        match outcome {
            MigrationOutcome::Current => {}
            MigrationOutcome::Migrated { from } => {
                tracing::info!(from, to = schema::SCHEMA_VERSION, "schema migrated");
            }
            MigrationOutcome::RebuildRequired { found } => {
                return Err(EngineError::StaleIndex {
                    found,
                    expected: schema::SCHEMA_VERSION,
                });
            }
        }
        Ok(Self {
            store,
            settings: Arc::new(settings),
            embedder: None,
        })
    }

    /// Wipe the persisted state and open fresh. The recovery path for
    /// [`EngineError::StaleIndex`].
    pub fn rebuild(store_dir: &Path, settings: Settings) -> EngineResult<Self> {
        let store = SymbolStore::rebuild(store_dir)?;
        Ok(Self {
            store,
            settings: Arc::new(settings),
            embedder: None,
        })
    }

    /// Attach an embedder; without one, semantic retrieval degrades to
    /// BM25-only.
    pub fn with_embedder(mut self, embedder: Box<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Flush and release. Dropping the engine has the same effect; this
    /// exists so callers can make the point in time explicit.
    pub fn close(self) {}

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Direct store access for collaborators layered on the engine.
    pub fn store(&self) -> &SymbolStore {
        &self.store
    }

    // ----- ingest -----------------------------------------------------

    /// Full (or resumed) ingest of `root`, followed by the resolver
    /// passes over the whole index.
    pub fn index(&self, root: &Path) -> EngineResult<IngestReport> {
        self.index_with_cancel(root, &CancellationToken::new())
    }

    pub fn index_with_cancel(
        &self,
        root: &Path,
        cancel: &CancellationToken,
    ) -> EngineResult<IngestReport> {
        let mut report =
            crate::indexing::ingest(&self.store, &self.settings, self.embedder.as_deref(), root, cancel)?;
        if report.cancelled {
            return Ok(report);
        }

        run_passes(&self.store, &self.settings, None)?;

        if let Some(revision) = working_revision(root) {
            self.store.set_meta("index_revision", &revision)?;
            report.revision = Some(revision);
        }
        Ok(report)
    }

    /// Incremental update per the recorded revision (or content hashes).
    pub fn update(&self, root: &Path) -> EngineResult<UpdateReport> {
        self.update_with_cancel(root, &CancellationToken::new())
    }

    pub fn update_with_cancel(
        &self,
        root: &Path,
        cancel: &CancellationToken,
    ) -> EngineResult<UpdateReport> {
        crate::indexing::update(&self.store, &self.settings, self.embedder.as_deref(), root, cancel)
    }

    /// Re-run the resolver passes over the whole index.
    pub fn resolve(&self) -> EngineResult<ResolveReport> {
        Ok(run_passes(&self.store, &self.settings, None)?)
    }

    // ----- queries ----------------------------------------------------

    /// Hybrid search. `mode` and `fusion` default to the classifier and
    /// reciprocal rank fusion.
    pub fn search(
        &self,
        query: &str,
        mode: Option<QueryMode>,
        k: Option<usize>,
        fusion: Option<FusionMethod>,
    ) -> EngineResult<SearchOutcome> {
        self.search_with_deadline(query, mode, k, fusion, None)
    }

    pub fn search_with_deadline(
        &self,
        query: &str,
        mode: Option<QueryMode>,
        k: Option<usize>,
        fusion: Option<FusionMethod>,
        deadline: Option<Deadline>,
    ) -> EngineResult<SearchOutcome> {
        let retriever = Retriever::new(
            &self.store,
            &self.settings.retrieval,
            self.embedder.as_deref(),
        );
        retriever.search(query, mode, k, fusion.unwrap_or_default(), deadline)
    }

    /// Look symbols up by name. Deduplication by the uniqueness key is
    /// guaranteed; an empty result is `SymbolNotFound`.
    pub fn get_symbol(
        &self,
        name: &str,
        exact: bool,
        file_hint: Option<&str>,
    ) -> EngineResult<Vec<Symbol>> {
        let symbols = self.store.find_symbols(name, exact, file_hint)?;
        if symbols.is_empty() {
            return Err(EngineError::SymbolNotFound {
                name: name.to_string(),
            });
        }
        Ok(symbols)
    }

    /// Stream symbols matching a filter.
    pub fn query_symbols(&self, filter: SymbolFilter) -> impl Iterator<Item = Symbol> + '_ {
        self.store.query_symbols(filter)
    }

    /// Materialize a symbol's source range.
    pub fn snippet(&self, symbol_id: SymbolId, padding: u32) -> EngineResult<Snippet> {
        match self.store.get_snippet(symbol_id, padding) {
            Ok(snippet) => Ok(snippet),
            Err(StoreError::SymbolRowMissing { id }) => Err(EngineError::SymbolNotFound {
                name: format!("symbol #{}", id.value()),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Structural view of a file with optional overlays.
    pub fn blueprint(&self, path: &Path, overlays: &[Overlay]) -> EngineResult<Blueprint> {
        crate::blueprint::build(&self.store, &path.to_string_lossy(), overlays)
    }

    /// Body-elided rendering of a file. Symbols named in
    /// `preserve_symbols` keep their full bodies.
    pub fn skeletonize(&self, path: &Path, preserve_symbols: &[String]) -> EngineResult<Skeleton> {
        let language =
            Language::from_path(path).ok_or_else(|| EngineError::FileNotFound {
                path: path.to_path_buf(),
            })?;
        let code = std::fs::read_to_string(path).map_err(|source| EngineError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;

        let mut preserve: Vec<LineSpan> = Vec::new();
        if !preserve_symbols.is_empty() {
            let path_str = path.to_string_lossy();
            for symbol in self.store.symbols_in_file(&path_str)? {
                if preserve_symbols.iter().any(|n| n == symbol.name.as_ref()) {
                    preserve.push(symbol.span);
                }
            }
        }

        let mut parser = create_parser(language)?;
        Ok(parser.skeletonize_preserving(&code, &preserve)?)
    }

    /// Call-graph traversal from a symbol. `symbol` may be a plain name
    /// or `Class.method`, in which case the method resolves through the
    /// MRO first.
    pub fn call_graph(
        &self,
        symbol: &str,
        direction: Direction,
        max_depth: Option<usize>,
    ) -> EngineResult<CallGraph> {
        self.call_graph_with_cancel(symbol, direction, max_depth, &CancellationToken::new())
    }

    pub fn call_graph_with_cancel(
        &self,
        symbol: &str,
        direction: Direction,
        max_depth: Option<usize>,
        cancel: &CancellationToken,
    ) -> EngineResult<CallGraph> {
        let max_depth = max_depth.unwrap_or(self.settings.resolver.call_graph_depth);
        let target = self.resolve_symbol_spec(symbol)?;
        traverse(
            &self.store,
            &target.file_path,
            &target.name,
            direction,
            max_depth,
            cancel,
        )
    }

    /// Token-budgeted context payload for a symbol.
    pub fn context(
        &self,
        symbol: &str,
        budget: Option<usize>,
        include_callers: bool,
        include_callees: bool,
    ) -> EngineResult<ContextPayload> {
        let target = self.resolve_symbol_spec(symbol)?;
        let mut options = ContextOptions::from_settings(&self.settings);
        if let Some(budget) = budget {
            options.budget = budget;
        }
        options.include_callers = include_callers;
        options.include_callees = include_callees;

        ContextAssembler::new(&self.store, &self.settings).assemble(&target, &options)
    }

    /// Context assembly with full option control.
    pub fn context_with_options(
        &self,
        symbol: &str,
        options: &ContextOptions,
    ) -> EngineResult<ContextPayload> {
        let target = self.resolve_symbol_spec(symbol)?;
        ContextAssembler::new(&self.store, &self.settings).assemble(&target, options)
    }

    /// Method Resolution Order of a class.
    pub fn mro(&self, class_name: &str) -> EngineResult<Result<Vec<String>, ResolverWarning>> {
        let resolver =
            InheritanceResolver::new(&self.store, self.settings.resolver.max_mro_depth);
        Ok(resolver.mro(class_name)?)
    }

    /// Classes transitively deriving from `class_name`.
    pub fn descendants(&self, class_name: &str) -> EngineResult<Vec<String>> {
        let resolver =
            InheritanceResolver::new(&self.store, self.settings.resolver.max_mro_depth);
        Ok(resolver.descendants(class_name)?)
    }

    /// Aggregate index counts.
    pub fn stats(&self) -> EngineResult<StoreStats> {
        Ok(self.store.stats()?)
    }

    /// Turn `name` or `Class.method` into a stored symbol, walking the
    /// MRO for the dotted form.
    fn resolve_symbol_spec(&self, spec: &str) -> EngineResult<Symbol> {
        if let Some((class_name, method)) = spec.rsplit_once('.') {
            let resolver =
                InheritanceResolver::new(&self.store, self.settings.resolver.max_mro_depth);
            if let Some(symbol) = resolver.resolve_method(class_name, method)? {
                return Ok(symbol);
            }
        }

        self.store
            .find_symbols(spec, true, None)?
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::SymbolNotFound {
                name: spec.to_string(),
            })
    }
}

/// Current working-copy revision of `root`, when it sits in a repository.
fn working_revision(root: &Path) -> Option<String> {
    let repo = git2::Repository::discover(root).ok()?;
    repo.head()
        .ok()?
        .peel_to_commit()
        .ok()
        .map(|commit| commit.id().to_string())
}
