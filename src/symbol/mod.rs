//! Symbol records.
//!
//! `NewSymbol` is what a parser emits: a located declaration without an
//! identifier. `Symbol` is the stored form the engine hands back to callers,
//! with the id the store assigned and the owning file path attached.

use crate::parsing::Language;
use crate::types::{CompactString, LineSpan, SymbolId, SymbolKind};
use serde::{Deserialize, Serialize};

/// A parsed declaration, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSymbol {
    pub name: CompactString,
    /// Dotted path within the file/module, e.g. `auth.AuthHandler.login`.
    pub qualified_name: CompactString,
    pub kind: SymbolKind,
    pub span: LineSpan,
    pub signature: Option<Box<str>>,
    pub doc: Option<Box<str>>,
    /// Enclosing class name for methods.
    pub parent: Option<CompactString>,
}

impl NewSymbol {
    pub fn new(
        name: impl Into<CompactString>,
        qualified_name: impl Into<CompactString>,
        kind: SymbolKind,
        span: LineSpan,
    ) -> Self {
        Self {
            name: name.into(),
            qualified_name: qualified_name.into(),
            kind,
            span,
            signature: None,
            doc: None,
            parent: None,
        }
    }

    pub fn with_signature(mut self, signature: impl Into<Box<str>>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn with_doc(mut self, doc: impl Into<Box<str>>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn with_parent(mut self, parent: impl Into<CompactString>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// The identity key from the store's uniqueness index, minus the file
    /// path (which the parser does not know).
    pub fn identity(&self) -> (&str, SymbolKind, u32, u32) {
        (&self.name, self.kind, self.span.start_line, self.span.end_line)
    }
}

/// A stored declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub id: SymbolId,
    pub name: CompactString,
    pub qualified_name: CompactString,
    pub kind: SymbolKind,
    pub file_path: Box<str>,
    pub span: LineSpan,
    pub signature: Option<Box<str>>,
    pub doc: Option<Box<str>>,
    pub parent: Option<CompactString>,
    pub language: Language,
}

impl Symbol {
    /// The deduplication key: (file_path, name, kind, start_line, end_line).
    pub fn identity(&self) -> (&str, &str, SymbolKind, u32, u32) {
        (
            &self.file_path,
            &self.name,
            self.kind,
            self.span.start_line,
            self.span.end_line,
        )
    }

    /// Text the embedder sees for this symbol. Hashing this detects when the
    /// embedding needs refreshing.
    pub fn embedding_input(&self) -> String {
        let mut text = String::with_capacity(128);
        text.push_str(&self.qualified_name);
        if let Some(sig) = &self.signature {
            text.push('\n');
            text.push_str(sig);
        }
        if let Some(doc) = &self.doc {
            text.push('\n');
            text.push_str(doc);
        }
        text
    }
}
