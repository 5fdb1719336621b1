//! Query-time call-graph traversal.
//!
//! The graph is never materialized; BFS walks the flat reference table
//! with an explicit visited set. Nodes on a back-edge are tagged as cycle
//! entries instead of being expanded again.

use crate::cancel::CancellationToken;
use crate::error::{EngineError, EngineResult};
use crate::store::SymbolStore;
use crate::types::RefKind;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Callees reachable from the root.
    Forward,
    /// Callers that reach the root.
    Reverse,
}

/// A node in the traversed graph, keyed by (file, symbol).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallGraphNode {
    pub file: String,
    pub symbol: String,
    pub depth: usize,
    /// Reached again through a back-edge.
    pub cycle: bool,
}

/// A traversed edge with the confidence of its underlying reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallGraphEdge {
    pub from_file: String,
    pub from_symbol: String,
    pub to_file: String,
    pub to_symbol: String,
    pub line: u32,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallGraph {
    pub root_file: String,
    pub root_symbol: String,
    pub direction: Direction,
    pub nodes: Vec<CallGraphNode>,
    pub edges: Vec<CallGraphEdge>,
    /// Traversal hit the depth limit before exhausting the graph.
    pub truncated: bool,
}

/// BFS over `method_call` references from `(file, symbol)`.
pub fn traverse(
    store: &SymbolStore,
    file: &str,
    symbol: &str,
    direction: Direction,
    max_depth: usize,
    cancel: &CancellationToken,
) -> EngineResult<CallGraph> {
    let mut graph = CallGraph {
        root_file: file.to_string(),
        root_symbol: symbol.to_string(),
        direction,
        nodes: Vec::new(),
        edges: Vec::new(),
        truncated: false,
    };

    let mut visited: HashSet<(String, String)> = HashSet::new();
    let mut queue: VecDeque<(String, String, usize)> = VecDeque::new();

    visited.insert((file.to_string(), symbol.to_string()));
    graph.nodes.push(CallGraphNode {
        file: file.to_string(),
        symbol: symbol.to_string(),
        depth: 0,
        cycle: false,
    });
    queue.push_back((file.to_string(), symbol.to_string(), 0));

    while let Some((current_file, current_symbol, depth)) = queue.pop_front() {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        if depth >= max_depth {
            graph.truncated = true;
            continue;
        }

        let references = match direction {
            Direction::Forward => store.references_from(&current_file, Some(&current_symbol))?,
            Direction::Reverse => store.references_to(&current_file, &current_symbol)?,
        };

        for reference in references {
            if reference.kind != RefKind::MethodCall {
                continue;
            }
            let (next_file, next_symbol) = match direction {
                Direction::Forward => {
                    let (Some(f), Some(s)) = (
                        reference.target_file.clone(),
                        reference.target_symbol.clone(),
                    ) else {
                        continue;
                    };
                    (f, s)
                }
                Direction::Reverse => {
                    (reference.source_file.clone(), reference.source_symbol.clone())
                }
            };

            let (edge_from, edge_to) = match direction {
                Direction::Forward => (
                    (current_file.clone(), current_symbol.clone()),
                    (next_file.clone(), next_symbol.clone()),
                ),
                Direction::Reverse => (
                    (next_file.clone(), next_symbol.clone()),
                    (current_file.clone(), current_symbol.clone()),
                ),
            };
            graph.edges.push(CallGraphEdge {
                from_file: edge_from.0,
                from_symbol: edge_from.1,
                to_file: edge_to.0,
                to_symbol: edge_to.1,
                line: reference.source_line,
                confidence: reference.confidence,
            });

            let key = (next_file.clone(), next_symbol.clone());
            if visited.contains(&key) {
                // Tag, never expand: cycles terminate here.
                if let Some(node) = graph
                    .nodes
                    .iter_mut()
                    .find(|n| n.file == next_file && n.symbol == next_symbol)
                {
                    node.cycle = true;
                }
                continue;
            }
            visited.insert(key);
            graph.nodes.push(CallGraphNode {
                file: next_file.clone(),
                symbol: next_symbol.clone(),
                depth: depth + 1,
                cycle: false,
            });
            queue.push_back((next_file, next_symbol, depth + 1));
        }
    }

    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FileMeta, SymbolReference};
    use crate::types::ResolutionMethod;
    use crate::parsing::Language;
    use tempfile::TempDir;

    fn setup() -> (TempDir, SymbolStore) {
        let temp = TempDir::new().unwrap();
        let (store, _) = SymbolStore::open(temp.path()).unwrap();
        store
            .with_txn(|txn| {
                txn.upsert_file(&FileMeta {
                    path: "/p/a.py".to_string(),
                    language: Language::Python,
                    content_hash: "h".to_string(),
                    size: 1,
                    mtime: 0,
                    revision: None,
                })?;
                Ok(())
            })
            .unwrap();
        (temp, store)
    }

    fn edge(store: &SymbolStore, from: &str, to: &str, line: u32) {
        store
            .with_txn(|txn| {
                txn.write_references_batch(&[SymbolReference {
                    source_file: "/p/a.py".to_string(),
                    source_line: line,
                    source_symbol: from.to_string(),
                    kind: RefKind::MethodCall,
                    target_file: Some("/p/a.py".to_string()),
                    target_symbol: Some(to.to_string()),
                    target_kind: None,
                    confidence: 1.0,
                    resolution_method: ResolutionMethod::ImportTrace,
                }])
            })
            .unwrap();
    }

    #[test]
    fn test_forward_traversal() {
        let (_temp, store) = setup();
        edge(&store, "main", "helper", 1);
        edge(&store, "helper", "leaf", 2);

        let graph = traverse(
            &store,
            "/p/a.py",
            "main",
            Direction::Forward,
            10,
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.edges.len(), 2);
        assert!(!graph.truncated);
        let leaf = graph.nodes.iter().find(|n| n.symbol == "leaf").unwrap();
        assert_eq!(leaf.depth, 2);
    }

    #[test]
    fn test_reverse_traversal() {
        let (_temp, store) = setup();
        edge(&store, "main", "helper", 1);
        edge(&store, "other", "helper", 2);

        let graph = traverse(
            &store,
            "/p/a.py",
            "helper",
            Direction::Reverse,
            10,
            &CancellationToken::new(),
        )
        .unwrap();

        let callers: Vec<&str> = graph
            .nodes
            .iter()
            .filter(|n| n.depth == 1)
            .map(|n| n.symbol.as_str())
            .collect();
        assert!(callers.contains(&"main"));
        assert!(callers.contains(&"other"));
    }

    #[test]
    fn test_cycle_is_tagged_not_expanded() {
        let (_temp, store) = setup();
        edge(&store, "a", "b", 1);
        edge(&store, "b", "a", 2);

        let graph = traverse(
            &store,
            "/p/a.py",
            "a",
            Direction::Forward,
            10,
            &CancellationToken::new(),
        )
        .unwrap();

        // Two nodes, the root tagged as a cycle entry, traversal finished.
        assert_eq!(graph.nodes.len(), 2);
        let root = graph.nodes.iter().find(|n| n.symbol == "a").unwrap();
        assert!(root.cycle);
    }

    #[test]
    fn test_depth_limit_truncates() {
        let (_temp, store) = setup();
        for i in 0..5 {
            edge(&store, &format!("f{i}"), &format!("f{}", i + 1), i + 1);
        }

        let graph = traverse(
            &store,
            "/p/a.py",
            "f0",
            Direction::Forward,
            2,
            &CancellationToken::new(),
        )
        .unwrap();
        assert!(graph.truncated);
        assert!(graph.nodes.iter().all(|n| n.depth <= 2));
    }

    #[test]
    fn test_cancellation() {
        let (_temp, store) = setup();
        edge(&store, "main", "helper", 1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = traverse(&store, "/p/a.py", "main", Direction::Forward, 10, &cancel);
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }
}
