//! Token-budgeted context assembly.
//!
//! Sections are added strictly in priority order — target, imports,
//! skeletonized bases, callers, callees — and assembly stops before the
//! first section that would overflow the budget. The emitted section set
//! is therefore always a prefix of the priority list, and growing the
//! budget can only extend it.

use crate::config::Settings;
use crate::error::{EngineError, EngineResult};
use crate::parsing::create_parser;
use crate::resolve::InheritanceResolver;
use crate::store::SymbolStore;
use crate::symbol::Symbol;
use crate::types::RefKind;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Separator line prefix; consumers split on this.
pub const SECTION_MARKER: &str = "=== SECTION:";

/// Options for one assembly call.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// Token budget for the whole payload, header included.
    pub budget: usize,
    pub include_bases: bool,
    pub include_callers: bool,
    pub include_callees: bool,
    /// Padding lines around the target implementation.
    pub padding: u32,
    /// Inheritance levels of skeletonized bases.
    pub base_depth: usize,
    /// Tokens-per-text estimator; `None` uses the 4-chars-per-token
    /// approximation.
    pub tokenizer: Option<fn(&str) -> usize>,
}

impl ContextOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            budget: settings.context.token_budget,
            include_bases: true,
            include_callers: false,
            include_callees: false,
            padding: settings.context.snippet_padding,
            base_depth: settings.context.base_depth,
            tokenizer: None,
        }
    }
}

/// One labeled section of the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSection {
    pub label: String,
    pub content: String,
}

/// The assembled artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextPayload {
    pub file: String,
    pub target: String,
    pub compression_ratio: f32,
    pub included_sections: Vec<String>,
    pub sections: Vec<ContextSection>,
    /// Full textual artifact: header plus separator-delimited sections.
    pub text: String,
    pub token_estimate: usize,
}

pub struct ContextAssembler<'a> {
    store: &'a SymbolStore,
    settings: &'a Settings,
}

impl<'a> ContextAssembler<'a> {
    pub fn new(store: &'a SymbolStore, settings: &'a Settings) -> Self {
        Self { store, settings }
    }

    pub fn assemble(
        &self,
        target: &Symbol,
        options: &ContextOptions,
    ) -> EngineResult<ContextPayload> {
        let estimate = |text: &str| match options.tokenizer {
            Some(tokenizer) => tokenizer(text),
            None => text.len().div_ceil(4),
        };

        // Build candidate sections in priority order, then take the
        // longest prefix that fits.
        let mut candidates: Vec<ContextSection> = Vec::new();
        let mut skeleton_lines = 0u32;
        let mut original_lines = 0u32;

        let snippet = self
            .store
            .get_snippet(target.id, options.padding)
            .map_err(EngineError::from)?;
        candidates.push(ContextSection {
            label: "target".to_string(),
            content: format!(
                "{}:{}-{}\n{}",
                snippet.path, snippet.start_line, snippet.end_line, snippet.content
            ),
        });

        let imports = self.imports_section(target)?;
        if !imports.is_empty() {
            candidates.push(ContextSection {
                label: "imports".to_string(),
                content: imports,
            });
        }

        if options.include_bases {
            if let Some((content, skel, orig)) =
                self.bases_section(target, options.base_depth)?
            {
                skeleton_lines += skel;
                original_lines += orig;
                candidates.push(ContextSection {
                    label: "bases".to_string(),
                    content,
                });
            }
        }

        if options.include_callers {
            if let Some(content) = self.reference_section(target, true)? {
                candidates.push(ContextSection {
                    label: "callers".to_string(),
                    content,
                });
            }
        }

        if options.include_callees {
            if let Some(content) = self.reference_section(target, false)? {
                candidates.push(ContextSection {
                    label: "callees".to_string(),
                    content,
                });
            }
        }

        let compression_ratio = if original_lines == 0 {
            1.0
        } else {
            skeleton_lines as f32 / original_lines as f32
        };

        // Budgeted prefix selection.
        let header = |sections: &[String]| {
            format!(
                "=== CONTEXT: {} ===\nfile: {}\ntarget: {}\ncompression_ratio: {:.2}\nsections: {}\n",
                target.name,
                target.file_path,
                target.qualified_name,
                compression_ratio,
                sections.join(",")
            )
        };

        let mut included: Vec<ContextSection> = Vec::new();
        let mut labels: Vec<String> = Vec::new();
        for section in candidates {
            let mut trial_labels = labels.clone();
            trial_labels.push(section.label.clone());
            let mut trial_text = header(&trial_labels);
            for included_section in included.iter().chain(std::iter::once(&section)) {
                trial_text.push_str(&format!(
                    "{SECTION_MARKER} {} ===\n{}\n",
                    included_section.label, included_section.content
                ));
            }
            if estimate(&trial_text) > options.budget {
                break;
            }
            labels = trial_labels;
            included.push(section);
        }

        let mut text = header(&labels);
        for section in &included {
            text.push_str(&format!(
                "{SECTION_MARKER} {} ===\n{}\n",
                section.label, section.content
            ));
        }
        let token_estimate = estimate(&text);

        Ok(ContextPayload {
            file: target.file_path.to_string(),
            target: target.qualified_name.to_string(),
            compression_ratio,
            included_sections: labels,
            sections: included,
            text,
            token_estimate,
        })
    }

    /// Imports of the target's file, annotated with their resolved
    /// internal targets where known.
    fn imports_section(&self, target: &Symbol) -> EngineResult<String> {
        let imports = self.store.imports_in_file(&target.file_path)?;
        let mut lines = Vec::new();
        for import in imports {
            let names = if import.import.names.is_empty() {
                String::new()
            } else {
                format!(" ({})", import.import.names.join(", "))
            };
            match &import.target_file {
                Some(resolved) => {
                    lines.push(format!("{}{names} -> {resolved}", import.import.module_path))
                }
                None => lines.push(format!("{}{names} [external]", import.import.module_path)),
            }
        }
        Ok(lines.join("\n"))
    }

    /// Skeletonized base classes up to `depth` levels, following the MRO.
    /// Returns the section plus (skeleton, original) line counts.
    fn bases_section(
        &self,
        target: &Symbol,
        depth: usize,
    ) -> EngineResult<Option<(String, u32, u32)>> {
        let class_name = match target.kind {
            k if k.is_class_like() => Some(target.name.to_string()),
            _ => target.parent.as_ref().map(|p| p.to_string()),
        };
        let Some(class_name) = class_name else {
            return Ok(None);
        };

        let resolver =
            InheritanceResolver::new(self.store, self.settings.resolver.max_mro_depth);
        let chain = match resolver.mro(&class_name)? {
            Ok(chain) => chain,
            Err(_) => vec![class_name.clone()],
        };

        let mut parts = Vec::new();
        let mut skeleton_lines = 0u32;
        let mut original_lines = 0u32;
        let mut seen = HashSet::new();

        for base_name in chain.iter().skip(1).take(depth) {
            if !seen.insert(base_name.clone()) {
                continue;
            }
            let candidates = self.store.find_symbols(base_name, true, None)?;
            let Some(base) = candidates.into_iter().find(|s| s.kind.is_class_like()) else {
                parts.push(format!("# {base_name}: external, not indexed"));
                continue;
            };
            let snippet = match self.store.get_snippet(base.id, 0) {
                Ok(snippet) => snippet,
                Err(_) => continue,
            };
            original_lines += snippet.content.lines().count() as u32;

            let skeleton_text = create_parser(base.language)
                .ok()
                .and_then(|mut parser| parser.skeletonize(&snippet.content).ok());
            match skeleton_text {
                Some(skeleton) => {
                    skeleton_lines += skeleton.skeleton_lines;
                    parts.push(format!(
                        "# {} ({}:{})\n{}",
                        base.name, base.file_path, base.span.start_line, skeleton.text
                    ));
                }
                None => {
                    skeleton_lines += snippet.content.lines().count() as u32;
                    parts.push(format!(
                        "# {} ({}:{})\n{}",
                        base.name, base.file_path, base.span.start_line, snippet.content
                    ));
                }
            }
        }

        if parts.is_empty() {
            return Ok(None);
        }
        Ok(Some((parts.join("\n\n"), skeleton_lines, original_lines)))
    }

    /// Direct callers (reverse) or callees (forward) of the target.
    fn reference_section(&self, target: &Symbol, callers: bool) -> EngineResult<Option<String>> {
        let references = if callers {
            self.store
                .references_to(&target.file_path, &target.name)?
        } else {
            self.store
                .references_from(&target.file_path, Some(target.name.as_ref()))?
        };

        let mut lines = Vec::new();
        for reference in references {
            if reference.kind != RefKind::MethodCall {
                continue;
            }
            if callers {
                lines.push(format!(
                    "{}:{} {} (confidence {:.2})",
                    reference.source_file,
                    reference.source_line,
                    reference.source_symbol,
                    reference.confidence
                ));
            } else if let (Some(file), Some(symbol)) =
                (&reference.target_file, &reference.target_symbol)
            {
                lines.push(format!(
                    "{file} {symbol} (confidence {:.2})",
                    reference.confidence
                ));
            }
        }
        if lines.is_empty() {
            return Ok(None);
        }
        Ok(Some(lines.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::{Language, NewImport};
    use crate::store::FileMeta;
    use crate::symbol::NewSymbol;
    use crate::types::{LineSpan, SymbolKind};
    use tempfile::TempDir;

    fn seeded() -> (TempDir, SymbolStore, Symbol) {
        let temp = TempDir::new().unwrap();
        let (store, _) = SymbolStore::open(temp.path()).unwrap();

        let src = temp.path().join("handlers.py");
        std::fs::write(
            &src,
            "import os\n\n\nclass Base:\n    def shared(self):\n        return 1\n\n\nclass Handler(Base):\n    def run(self):\n        return self.shared()\n",
        )
        .unwrap();
        let path = src.to_string_lossy().to_string();

        store
            .with_txn(|txn| {
                let file = txn.upsert_file(&FileMeta {
                    path: path.clone(),
                    language: Language::Python,
                    content_hash: "h".to_string(),
                    size: 1,
                    mtime: 0,
                    revision: None,
                })?;
                txn.write_symbols_batch(
                    file,
                    &[
                        NewSymbol::new("Base", "Base", SymbolKind::Class, LineSpan::new(4, 6)),
                        NewSymbol::new("Handler", "Handler", SymbolKind::Class, LineSpan::new(9, 11)),
                    ],
                    1000,
                )?;
                txn.write_imports_batch(file, &[NewImport::module("os", 1)], 1000)?;
                txn.write_bases_batch(
                    file,
                    &[crate::parsing::BaseRef {
                        class_name: "Handler".to_string(),
                        line: 9,
                        base_name: "Base".to_string(),
                    }],
                    1000,
                )?;
                Ok(())
            })
            .unwrap();

        let handler = store.find_symbols("Handler", true, None).unwrap().remove(0);
        (temp, store, handler)
    }

    #[test]
    fn test_assembly_order_and_header() {
        let (_temp, store, handler) = seeded();
        let settings = Settings::default();
        let assembler = ContextAssembler::new(&store, &settings);

        let payload = assembler
            .assemble(&handler, &ContextOptions::from_settings(&settings))
            .unwrap();

        assert_eq!(payload.included_sections[0], "target");
        assert!(payload.text.starts_with("=== CONTEXT: Handler ==="));
        assert!(payload.text.contains("class Handler(Base)"));
        // Base arrives skeletonized: signature kept, body elided.
        assert!(payload.included_sections.contains(&"bases".to_string()));
        assert!(payload.text.contains("def shared(self):"));
        assert!(!payload.text.contains("return 1"));
    }

    #[test]
    fn test_budget_prefix_property() {
        let (_temp, store, handler) = seeded();
        let settings = Settings::default();
        let assembler = ContextAssembler::new(&store, &settings);

        let mut options = ContextOptions::from_settings(&settings);
        let full = assembler.assemble(&handler, &options).unwrap();

        // Shrink the budget step by step: the section list must always be
        // a prefix of the full list, and never grow when the budget
        // shrinks.
        let mut previous_len = full.included_sections.len();
        for budget in [400, 120, 60, 30, 5] {
            options.budget = budget;
            let payload = assembler.assemble(&handler, &options).unwrap();
            assert!(
                full.included_sections
                    .starts_with(&payload.included_sections),
                "sections {:?} are not a prefix of {:?} at budget {budget}",
                payload.included_sections,
                full.included_sections,
            );
            assert!(payload.included_sections.len() <= previous_len);
            previous_len = payload.included_sections.len();
        }

        // A tiny budget emits the header alone.
        options.budget = 1;
        let minimal = assembler.assemble(&handler, &options).unwrap();
        assert!(minimal.included_sections.is_empty());
    }

    #[test]
    fn test_custom_tokenizer() {
        let (_temp, store, handler) = seeded();
        let settings = Settings::default();
        let assembler = ContextAssembler::new(&store, &settings);

        let mut options = ContextOptions::from_settings(&settings);
        options.tokenizer = Some(|text| text.split_whitespace().count());
        options.budget = 10_000;
        let payload = assembler.assemble(&handler, &options).unwrap();
        assert_eq!(payload.token_estimate, payload.text.split_whitespace().count());
    }

    #[test]
    fn test_callers_section_optional() {
        let (_temp, store, handler) = seeded();
        let settings = Settings::default();
        let assembler = ContextAssembler::new(&store, &settings);

        let mut options = ContextOptions::from_settings(&settings);
        options.include_callers = true;
        let payload = assembler.assemble(&handler, &options).unwrap();
        // No caller references recorded; the section is omitted entirely.
        assert!(!payload.included_sections.contains(&"callers".to_string()));
    }
}
