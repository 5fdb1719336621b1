//! Post-parse resolution passes.
//!
//! All passes read store cursors and write `SymbolReference` batches in
//! their own transactions. They are idempotent and order-independent:
//! re-running a pass over the same files never duplicates edges, because
//! references upsert under their uniqueness key.

pub mod call_graph;
pub mod imports;
pub mod inheritance;
pub mod types;

pub use call_graph::{CallGraph, CallGraphEdge, CallGraphNode, Direction, traverse};
pub use imports::{ImportResolution, resolve_imports};
pub use inheritance::{InheritanceResolution, InheritanceResolver, c3_linearize};
pub use types::{TypeResolution, track_types};

use crate::config::Settings;
use crate::error::StoreResult;
use crate::store::SymbolStore;
use serde::{Deserialize, Serialize};

/// Combined report of one full resolver sweep.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ResolveReport {
    pub imports: ImportResolution,
    pub types: TypeResolution,
    pub inheritance: InheritanceResolution,
}

/// Run all three passes over `files` (or everything), in dependency
/// order: imports feed both later passes.
pub fn run_passes(
    store: &SymbolStore,
    settings: &Settings,
    files: Option<&[String]>,
) -> StoreResult<ResolveReport> {
    let imports = resolve_imports(store, files)?;
    let inheritance =
        InheritanceResolver::new(store, settings.resolver.max_mro_depth).run(files)?;
    let types = track_types(store, settings, files)?;
    Ok(ResolveReport {
        imports,
        types,
        inheritance,
    })
}
