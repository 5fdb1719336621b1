//! Structural blueprints: a file's declaration tree plus optional
//! overlays (dependencies, complexity, churn, import cycles).

use crate::error::{EngineError, EngineResult};
use crate::parsing::Language;
use crate::store::SymbolStore;
use crate::types::{LineSpan, SymbolId, SymbolKind};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Optional analyses layered onto a blueprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Overlay {
    Deps,
    Complexity,
    Churn,
    Cycles,
}

/// One declaration in the tree; methods nest under their class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlueprintSymbol {
    pub id: SymbolId,
    pub name: String,
    pub kind: SymbolKind,
    pub span: LineSpan,
    pub signature: Option<String>,
    pub doc: Option<String>,
    /// Branch-count approximation; present with the complexity overlay.
    pub complexity: Option<u32>,
    pub children: Vec<BlueprintSymbol>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlueprintOverlays {
    /// Imported modules with their resolved internal targets.
    pub deps: Option<Vec<String>>,
    /// Commits that touched this file (requires a repository).
    pub churn: Option<u32>,
    /// Import cycles through this file, as file-path chains.
    pub cycles: Option<Vec<Vec<String>>>,
}

/// Structural view of one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    pub path: String,
    pub language: Language,
    pub symbols: Vec<BlueprintSymbol>,
    pub overlays: BlueprintOverlays,
}

/// Build a blueprint for `path` from stored rows.
pub fn build(
    store: &SymbolStore,
    path: &str,
    overlays: &[Overlay],
) -> EngineResult<Blueprint> {
    let file = store
        .get_file(path)?
        .ok_or_else(|| EngineError::FileNotFound {
            path: path.into(),
        })?;

    let symbols = store.symbols_in_file(path)?;
    let want_complexity = overlays.contains(&Overlay::Complexity);
    let source = if want_complexity {
        std::fs::read_to_string(path).ok()
    } else {
        None
    };

    // Top level first, then attach methods to their parent class.
    let mut roots: Vec<BlueprintSymbol> = Vec::new();
    let mut children: Vec<(String, BlueprintSymbol)> = Vec::new();
    for symbol in &symbols {
        let entry = BlueprintSymbol {
            id: symbol.id,
            name: symbol.name.to_string(),
            kind: symbol.kind,
            span: symbol.span,
            signature: symbol.signature.as_deref().map(String::from),
            doc: symbol.doc.as_deref().map(String::from),
            complexity: source
                .as_deref()
                .map(|text| branch_complexity(text, symbol.span)),
            children: Vec::new(),
        };
        match &symbol.parent {
            Some(parent) => children.push((parent.to_string(), entry)),
            None => roots.push(entry),
        }
    }
    for (parent_name, child) in children {
        // Span containment picks the right parent when names repeat;
        // Go methods live outside their type's span, so fall back to the
        // name alone.
        let parent = roots
            .iter()
            .position(|r| r.name == parent_name && r.span.contains_line(child.span.start_line))
            .or_else(|| roots.iter().position(|r| r.name == parent_name));
        match parent {
            Some(index) => roots[index].children.push(child),
            None => roots.push(child),
        }
    }

    let mut result = BlueprintOverlays::default();
    if overlays.contains(&Overlay::Deps) {
        let mut deps = Vec::new();
        for import in store.imports_in_file(path)? {
            match &import.target_file {
                Some(target) => deps.push(format!("{} -> {target}", import.import.module_path)),
                None => deps.push(format!("{} [external]", import.import.module_path)),
            }
        }
        result.deps = Some(deps);
    }
    if overlays.contains(&Overlay::Churn) {
        result.churn = churn(path);
    }
    if overlays.contains(&Overlay::Cycles) {
        result.cycles = Some(import_cycles(store, path)?);
    }

    Ok(Blueprint {
        path: path.to_string(),
        language: file.meta.language,
        symbols: roots,
        overlays: result,
    })
}

/// Decision-point count over a line span: 1 + branching keywords. A rough
/// cyclomatic stand-in that needs no per-language AST work.
fn branch_complexity(source: &str, span: LineSpan) -> u32 {
    const KEYWORDS: [&str; 11] = [
        "if ", "elif ", "else if", "for ", "while ", "case ", "except", "catch", " && ", " || ",
        "?",
    ];
    let mut count = 1u32;
    for (index, line) in source.lines().enumerate() {
        let line_number = index as u32 + 1;
        if !span.contains_line(line_number) {
            continue;
        }
        for keyword in KEYWORDS {
            count += line.matches(keyword).count() as u32;
        }
    }
    count
}

/// Commits touching `path`, bounded to keep the overlay cheap.
fn churn(path: &str) -> Option<u32> {
    const MAX_COMMITS: usize = 500;

    let repo = git2::Repository::discover(Path::new(path).parent()?).ok()?;
    let workdir = repo.workdir()?;
    let relative = Path::new(path).strip_prefix(workdir).ok()?;

    let mut walk = repo.revwalk().ok()?;
    walk.push_head().ok()?;

    let mut touched = 0u32;
    for oid in walk.take(MAX_COMMITS) {
        let Ok(oid) = oid else { break };
        let Ok(commit) = repo.find_commit(oid) else {
            continue;
        };
        let Ok(tree) = commit.tree() else { continue };
        let current = tree.get_path(relative).ok().map(|e| e.id());
        let parent = commit
            .parent(0)
            .ok()
            .and_then(|p| p.tree().ok())
            .and_then(|t| t.get_path(relative).ok().map(|e| e.id()));
        if current != parent {
            touched += 1;
        }
    }
    Some(touched)
}

/// Cycles in the resolved import graph that pass through `path`.
fn import_cycles(store: &SymbolStore, path: &str) -> EngineResult<Vec<Vec<String>>> {
    // File-level dependency edges from resolved imports.
    let mut edges: HashMap<String, HashSet<String>> = HashMap::new();
    for import in store.all_imports()? {
        if let Some(target) = &import.target_file {
            if target != &import.file_path {
                edges
                    .entry(import.file_path.clone())
                    .or_default()
                    .insert(target.clone());
            }
        }
    }

    let mut cycles = Vec::new();
    let mut stack = vec![(path.to_string(), vec![path.to_string()])];
    let mut seen_cycles: HashSet<Vec<String>> = HashSet::new();

    while let Some((current, trail)) = stack.pop() {
        let Some(neighbors) = edges.get(&current) else {
            continue;
        };
        let mut sorted: Vec<&String> = neighbors.iter().collect();
        sorted.sort();
        for next in sorted {
            if next == path && trail.len() > 1 {
                let mut cycle = trail.clone();
                cycle.push(path.to_string());
                if seen_cycles.insert(cycle.clone()) {
                    cycles.push(cycle);
                }
                continue;
            }
            if trail.contains(next) {
                continue;
            }
            let mut extended = trail.clone();
            extended.push(next.clone());
            stack.push((next.clone(), extended));
        }
    }

    cycles.sort();
    Ok(cycles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::NewImport;
    use crate::store::FileMeta;
    use crate::symbol::NewSymbol;
    use tempfile::TempDir;

    fn seed_file(store: &SymbolStore, path: &str, symbols: Vec<NewSymbol>) {
        store
            .with_txn(|txn| {
                let file = txn.upsert_file(&FileMeta {
                    path: path.to_string(),
                    language: Language::Python,
                    content_hash: "h".to_string(),
                    size: 1,
                    mtime: 0,
                    revision: None,
                })?;
                txn.write_symbols_batch(file, &symbols, 1000)?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_blueprint_nests_methods() {
        let temp = TempDir::new().unwrap();
        let (store, _) = SymbolStore::open(temp.path()).unwrap();
        seed_file(
            &store,
            "/p/a.py",
            vec![
                NewSymbol::new("Foo", "Foo", SymbolKind::Class, LineSpan::new(45, 51)),
                NewSymbol::new("bar", "Foo.bar", SymbolKind::Method, LineSpan::new(46, 48))
                    .with_parent("Foo"),
                NewSymbol::new("standalone", "standalone", SymbolKind::Function, LineSpan::new(60, 62)),
            ],
        );

        let blueprint = build(&store, "/p/a.py", &[]).unwrap();
        assert_eq!(blueprint.symbols.len(), 2);
        let class = blueprint.symbols.iter().find(|s| s.name == "Foo").unwrap();
        assert_eq!(class.span, LineSpan::new(45, 51));
        assert_eq!(class.children.len(), 1);
        assert_eq!(class.children[0].name, "bar");
    }

    #[test]
    fn test_missing_file_errors() {
        let temp = TempDir::new().unwrap();
        let (store, _) = SymbolStore::open(temp.path()).unwrap();
        assert!(matches!(
            build(&store, "/missing.py", &[]),
            Err(EngineError::FileNotFound { .. })
        ));
    }

    #[test]
    fn test_deps_overlay() {
        let temp = TempDir::new().unwrap();
        let (store, _) = SymbolStore::open(temp.path()).unwrap();
        store
            .with_txn(|txn| {
                let file = txn.upsert_file(&FileMeta {
                    path: "/p/a.py".to_string(),
                    language: Language::Python,
                    content_hash: "h".to_string(),
                    size: 1,
                    mtime: 0,
                    revision: None,
                })?;
                txn.write_imports_batch(file, &[NewImport::module("os", 1)], 1000)?;
                Ok(())
            })
            .unwrap();

        let blueprint = build(&store, "/p/a.py", &[Overlay::Deps]).unwrap();
        let deps = blueprint.overlays.deps.unwrap();
        assert_eq!(deps, vec!["os [external]".to_string()]);
    }

    #[test]
    fn test_cycles_overlay() {
        let temp = TempDir::new().unwrap();
        let (store, _) = SymbolStore::open(temp.path()).unwrap();
        // a -> b -> a
        store
            .with_txn(|txn| {
                let a = txn.upsert_file(&FileMeta {
                    path: "/p/a.py".to_string(),
                    language: Language::Python,
                    content_hash: "h".to_string(),
                    size: 1,
                    mtime: 0,
                    revision: None,
                })?;
                let b = txn.upsert_file(&FileMeta {
                    path: "/p/b.py".to_string(),
                    language: Language::Python,
                    content_hash: "h".to_string(),
                    size: 1,
                    mtime: 0,
                    revision: None,
                })?;
                txn.write_imports_batch(a, &[NewImport::module("b", 1)], 1000)?;
                txn.write_imports_batch(b, &[NewImport::module("a", 1)], 1000)?;
                Ok(())
            })
            .unwrap();
        // Mark the imports as resolved.
        let imports = store.all_imports().unwrap();
        store
            .with_txn(|txn| {
                for import in &imports {
                    let target = if import.file_path == "/p/a.py" {
                        "/p/b.py"
                    } else {
                        "/p/a.py"
                    };
                    txn.set_import_target(import.id, target, None)?;
                }
                Ok(())
            })
            .unwrap();

        let blueprint = build(&store, "/p/a.py", &[Overlay::Cycles]).unwrap();
        let cycles = blueprint.overlays.cycles.unwrap();
        assert_eq!(cycles.len(), 1);
        assert_eq!(
            cycles[0],
            vec!["/p/a.py", "/p/b.py", "/p/a.py"]
        );
    }

    #[test]
    fn test_branch_complexity() {
        let source = "def f(x):\n    if x:\n        return 1\n    for i in x:\n        pass\n    return 0\n";
        assert_eq!(branch_complexity(source, LineSpan::new(1, 6)), 3);
        // Outside the span nothing counts.
        assert_eq!(branch_complexity(source, LineSpan::new(6, 6)), 1);
    }
}
