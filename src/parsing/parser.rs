//! Language parser trait and the per-file facts parsers emit.
//!
//! All analysis is syntactic: parsers walk a tree-sitter AST and never
//! consult anything beyond the file's own bytes. Everything a later pass
//! needs (imports, call sites, base classes, type bindings) is captured
//! here so resolvers can run from store cursors alone.

use crate::error::ParseResult;
use crate::parsing::skeleton::Skeleton;
use crate::parsing::{Language, NewImport, NewMethodCall};
use crate::symbol::NewSymbol;
use serde::{Deserialize, Serialize};
use tree_sitter::Node;

/// Scope name used for facts recorded at module level.
pub const MODULE_SCOPE: &str = "<module>";

/// A base-class reference extracted from a class-like declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseRef {
    /// Name of the deriving class.
    pub class_name: String,
    /// Line of the deriving class's declaration.
    pub line: u32,
    /// Base name exactly as written (may be dotted, e.g. `abc.ABC`).
    pub base_name: String,
}

/// Where a type binding came from. Mirrors the inference ladder the type
/// tracker walks, in descending confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingSource {
    /// `x: T` at the nearest enclosing declaration.
    Annotation,
    /// `x = T(...)` or a composite literal.
    Constructor,
    /// Annotated function parameter.
    Parameter,
    /// Declared return type of the enclosing function.
    Return,
}

/// A variable-name → type-name fact scoped to one function (or the module).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeBinding {
    /// Enclosing function or method name, or [`MODULE_SCOPE`].
    pub scope: String,
    pub name: String,
    pub type_name: String,
    pub source: BindingSource,
    pub line: u32,
}

/// Everything a parser extracts from a single file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedFile {
    pub symbols: Vec<NewSymbol>,
    pub imports: Vec<NewImport>,
    pub calls: Vec<NewMethodCall>,
    pub bases: Vec<BaseRef>,
    pub bindings: Vec<TypeBinding>,
}

/// Common interface for all language parsers.
///
/// Parsers are stateful (they own a tree-sitter `Parser`) and are reused
/// across files by the parse pool, one instance per worker thread.
pub trait LanguageParser: Send {
    /// The language this parser handles.
    fn language(&self) -> Language;

    /// Parse source code and extract all per-file facts.
    ///
    /// Syntactically invalid sources return `ParseError::Syntax`; the
    /// caller converts that into an empty result plus a diagnostic.
    fn parse(&mut self, code: &str) -> ParseResult<ParsedFile>;

    /// Produce a body-elided rendering of the source.
    fn skeletonize(&mut self, code: &str) -> ParseResult<Skeleton> {
        self.skeletonize_preserving(code, &[])
    }

    /// Like [`LanguageParser::skeletonize`], but keeps the full bodies of
    /// declarations covered by `preserve` spans.
    fn skeletonize_preserving(
        &mut self,
        code: &str,
        preserve: &[crate::types::LineSpan],
    ) -> ParseResult<Skeleton>;
}

/// Create a parser for the given language.
pub fn create_parser(language: Language) -> ParseResult<Box<dyn LanguageParser>> {
    match language {
        Language::Python => Ok(Box::new(crate::parsing::python::PythonParser::new()?)),
        Language::JavaScript => Ok(Box::new(
            crate::parsing::javascript::JavaScriptParser::new()?,
        )),
        Language::TypeScript => Ok(Box::new(
            crate::parsing::typescript::TypeScriptParser::new()?,
        )),
        Language::Go => Ok(Box::new(crate::parsing::go::GoParser::new()?)),
    }
}

/// Maximum recursion depth for AST traversal.
///
/// Protects against pathologically nested sources (huge literal
/// initializers, generated code). Subtrees past the limit are skipped.
pub const MAX_AST_DEPTH: usize = 500;

/// Depth guard called at the top of every recursive extraction step.
#[inline]
pub(crate) fn check_recursion_depth(depth: usize, node: Node) -> bool {
    if depth > MAX_AST_DEPTH {
        tracing::warn!(
            line = node.start_position().row + 1,
            "maximum AST depth exceeded, skipping subtree"
        );
        return false;
    }
    true
}

/// 1-based start line of a node.
#[inline]
pub(crate) fn start_line(node: Node) -> u32 {
    node.start_position().row as u32 + 1
}

/// 1-based inclusive end line of a node.
#[inline]
pub(crate) fn end_line(node: Node) -> u32 {
    let pos = node.end_position();
    // A node ending at column 0 stopped at the previous line's newline.
    if pos.column == 0 && pos.row > 0 {
        pos.row as u32
    } else {
        pos.row as u32 + 1
    }
}

/// Node text as a &str slice of the source.
#[inline]
pub(crate) fn node_text<'a>(node: Node, code: &'a str) -> &'a str {
    node.utf8_text(code.as_bytes()).unwrap_or("")
}

/// Text from the start of `node` up to (exclusive) `stop_byte`, trimmed.
/// Used to cut signatures off at the body.
pub(crate) fn text_before<'a>(node: Node, stop_byte: usize, code: &'a str) -> &'a str {
    let start = node.start_byte().min(code.len());
    let stop = stop_byte.clamp(start, code.len());
    code[start..stop].trim_end_matches([':', '{', ' ', '\t', '\n', '\r'])
}

/// Collapse internal whitespace runs so multi-line signatures store as one
/// line.
pub(crate) fn flatten_signature(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !last_was_space && !out.is_empty() {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(ch);
            last_was_space = false;
        }
    }
    out.trim_end().to_string()
}
