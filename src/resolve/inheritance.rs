//! Inheritance resolution: `inherits` edges, C3 linearization, descendant
//! queries, and MRO-aware method lookup.
//!
//! Linearization works over base-class *names* gathered at parse time, so
//! it is language-neutral: single inheritance degenerates to a plain
//! chain, Python multiple inheritance gets the full C3 merge. Cycles and
//! merge failures are reported once per class and never halt the pass.

use crate::error::{ResolverWarning, StoreResult};
use crate::store::{StoredBase, SymbolReference, SymbolStore};
use crate::symbol::Symbol;
use crate::types::{RefKind, ResolutionMethod, SymbolKind};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// Outcome counters for one inheritance pass.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct InheritanceResolution {
    pub classes_seen: usize,
    pub edges_resolved: usize,
    pub edges_external: usize,
    pub warnings: Vec<ResolverWarning>,
}

/// Inheritance resolver bound to one store.
pub struct InheritanceResolver<'a> {
    store: &'a SymbolStore,
    max_depth: usize,
}

impl<'a> InheritanceResolver<'a> {
    pub fn new(store: &'a SymbolStore, max_depth: usize) -> Self {
        Self { store, max_depth }
    }

    /// Emit `inherits` references for classes declared in `files` (or the
    /// whole index). Resolved bases carry confidence 1.0; external bases
    /// are recorded unresolved at 0.7.
    pub fn run(&self, files: Option<&[String]>) -> StoreResult<InheritanceResolution> {
        let bases = match files {
            Some(paths) => {
                let mut all = Vec::new();
                for path in paths {
                    all.extend(self.store.bases_in_file(path)?);
                }
                all
            }
            None => self.store.all_bases()?,
        };

        let mut report = InheritanceResolution::default();
        let mut references = Vec::new();
        let mut classes = HashSet::new();

        for base in &bases {
            classes.insert((base.file_path.clone(), base.class_name.clone()));

            match self.resolve_base(base)? {
                Some(target) => {
                    report.edges_resolved += 1;
                    references.push(SymbolReference {
                        source_file: base.file_path.clone(),
                        source_line: base.line,
                        source_symbol: base.class_name.clone(),
                        kind: RefKind::Inherits,
                        target_file: Some(target.file_path.to_string()),
                        target_symbol: Some(target.name.to_string()),
                        target_kind: Some(target.kind),
                        confidence: 1.0,
                        resolution_method: if target.file_path.as_ref() == base.file_path {
                            ResolutionMethod::Syntactic
                        } else {
                            ResolutionMethod::ImportTrace
                        },
                    });
                }
                None => {
                    report.edges_external += 1;
                    references.push(SymbolReference {
                        source_file: base.file_path.clone(),
                        source_line: base.line,
                        source_symbol: base.class_name.clone(),
                        kind: RefKind::Inherits,
                        target_file: None,
                        target_symbol: Some(base.base_name.clone()),
                        target_kind: None,
                        confidence: 0.7,
                        resolution_method: ResolutionMethod::Heuristic,
                    });
                }
            }
        }

        report.classes_seen = classes.len();

        // Linearize every touched class so cycles surface here, not at
        // query time.
        let bases_map = self.project_bases_map()?;
        for (file, class) in &classes {
            if let Err(warning) = c3_linearize(class, &bases_map, self.max_depth) {
                report
                    .warnings
                    .push(ResolverWarning::new(file.clone(), class.clone(), warning));
            }
        }

        self.store
            .with_txn(|txn| txn.write_references_batch(&references))?;

        tracing::debug!(
            classes = report.classes_seen,
            resolved = report.edges_resolved,
            external = report.edges_external,
            warnings = report.warnings.len(),
            "inheritance pass complete"
        );
        Ok(report)
    }

    /// Find the class symbol a base reference names: same file first, then
    /// the importer's resolved imports, then a unique project-wide match.
    fn resolve_base(&self, base: &StoredBase) -> StoreResult<Option<Symbol>> {
        let name = base
            .base_name
            .rsplit('.')
            .next()
            .unwrap_or(&base.base_name);

        let same_file = self.store.find_symbols(name, true, Some(&base.file_path))?;
        if let Some(symbol) = same_file.into_iter().find(|s| s.kind.is_class_like()) {
            return Ok(Some(symbol));
        }

        for import in self.store.imports_in_file(&base.file_path)? {
            if let (Some(target_file), true) = (
                &import.target_file,
                import.import.names.iter().any(|n| n == name)
                    || import.import.local_name() == name,
            ) {
                let found = self.store.find_symbols(name, true, Some(target_file))?;
                if let Some(symbol) = found.into_iter().find(|s| s.kind.is_class_like()) {
                    return Ok(Some(symbol));
                }
            }
        }

        let global = self.store.find_symbols(name, true, None)?;
        let class_like: Vec<Symbol> = global
            .into_iter()
            .filter(|s| s.kind.is_class_like())
            .collect();
        if class_like.len() == 1 {
            return Ok(Some(class_like.into_iter().next().unwrap()));
        }
        Ok(None)
    }

    /// Method Resolution Order for a class, by name.
    pub fn mro(&self, class_name: &str) -> StoreResult<Result<Vec<String>, ResolverWarning>> {
        let bases_map = self.project_bases_map()?;
        Ok(c3_linearize(class_name, &bases_map, self.max_depth)
            .map_err(|msg| ResolverWarning::new("", class_name, msg)))
    }

    /// All classes that transitively inherit from `class_name`.
    pub fn descendants(&self, class_name: &str) -> StoreResult<Vec<String>> {
        let mut derived_by: HashMap<String, Vec<String>> = HashMap::new();
        for base in self.store.all_bases()? {
            let key = base
                .base_name
                .rsplit('.')
                .next()
                .unwrap_or(&base.base_name)
                .to_string();
            derived_by.entry(key).or_default().push(base.class_name);
        }

        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([class_name.to_string()]);
        let mut out = Vec::new();
        while let Some(current) = queue.pop_front() {
            if let Some(children) = derived_by.get(&current) {
                for child in children {
                    if seen.insert(child.clone()) {
                        out.push(child.clone());
                        queue.push_back(child.clone());
                    }
                }
            }
        }
        out.sort();
        Ok(out)
    }

    /// Look a method up along the MRO: the first class in the
    /// linearization that defines `method` wins.
    pub fn resolve_method(&self, class_name: &str, method: &str) -> StoreResult<Option<Symbol>> {
        let chain = match self.mro(class_name)? {
            Ok(chain) => chain,
            Err(_) => vec![class_name.to_string()],
        };
        for class in chain {
            let candidates = self.store.find_symbols(method, true, None)?;
            if let Some(symbol) = candidates
                .into_iter()
                .find(|s| s.kind == SymbolKind::Method && s.parent.as_deref() == Some(&class))
            {
                return Ok(Some(symbol));
            }
        }
        Ok(None)
    }

    fn project_bases_map(&self) -> StoreResult<HashMap<String, Vec<String>>> {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for base in self.store.all_bases()? {
            let short = base
                .base_name
                .rsplit('.')
                .next()
                .unwrap_or(&base.base_name)
                .to_string();
            map.entry(base.class_name).or_default().push(short);
        }
        Ok(map)
    }
}

/// C3 linearization: `L(C) = C + merge(L(B1), ..., L(Bn), [B1, ..., Bn])`.
///
/// Classes without recorded bases (externals) linearize to themselves.
/// Returns an error message on cycles, merge conflicts, or depth overflow.
pub fn c3_linearize(
    class_name: &str,
    bases_map: &HashMap<String, Vec<String>>,
    max_depth: usize,
) -> Result<Vec<String>, String> {
    let mut visiting = HashSet::new();
    linearize_inner(class_name, bases_map, max_depth, 0, &mut visiting)
}

fn linearize_inner(
    class_name: &str,
    bases_map: &HashMap<String, Vec<String>>,
    max_depth: usize,
    depth: usize,
    visiting: &mut HashSet<String>,
) -> Result<Vec<String>, String> {
    if depth > max_depth {
        return Err(format!("inheritance deeper than {max_depth} levels"));
    }
    if !visiting.insert(class_name.to_string()) {
        return Err(format!("inheritance cycle through '{class_name}'"));
    }

    let bases = bases_map.get(class_name).cloned().unwrap_or_default();
    let result = if bases.is_empty() {
        Ok(vec![class_name.to_string()])
    } else {
        let mut sequences: Vec<VecDeque<String>> = Vec::new();
        for base in &bases {
            let chain = linearize_inner(base, bases_map, max_depth, depth + 1, visiting)?;
            sequences.push(chain.into());
        }
        sequences.push(bases.iter().cloned().collect());

        let mut merged = vec![class_name.to_string()];
        merge(&mut sequences, &mut merged)
            .map_err(|head| format!("cannot linearize '{class_name}': '{head}' is inconsistent"))?;
        Ok(merged)
    };

    visiting.remove(class_name);
    result
}

/// The C3 merge step: repeatedly take the first head that appears in no
/// sequence tail.
fn merge(sequences: &mut Vec<VecDeque<String>>, out: &mut Vec<String>) -> Result<(), String> {
    loop {
        sequences.retain(|s| !s.is_empty());
        if sequences.is_empty() {
            return Ok(());
        }

        let mut chosen: Option<String> = None;
        for sequence in sequences.iter() {
            let head = &sequence[0];
            let in_tail = sequences
                .iter()
                .any(|other| other.iter().skip(1).any(|item| item == head));
            if !in_tail {
                chosen = Some(head.clone());
                break;
            }
        }

        match chosen {
            Some(head) => {
                out.push(head.clone());
                for sequence in sequences.iter_mut() {
                    if sequence.front() == Some(&head) {
                        sequence.pop_front();
                    }
                }
            }
            None => {
                let head = sequences[0][0].clone();
                return Err(head);
            }
        }
    }
}
