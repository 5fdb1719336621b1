//! Core identifier and location types shared across the engine.
//!
//! Identifiers are `NonZeroU32` newtypes so that `Option<SymbolId>` costs no
//! extra space. Line spans are 1-based with an inclusive end line, matching
//! what editors and agents expect.

use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;

/// Identifier of a stored symbol. Assigned by the store on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolId(NonZeroU32);

/// Identifier of an indexed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId(NonZeroU32);

/// Identifier of a vector in the vector index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VectorId(NonZeroU32);

impl SymbolId {
    pub fn new(value: u32) -> Option<Self> {
        NonZeroU32::new(value).map(Self)
    }

    pub fn value(&self) -> u32 {
        self.0.get()
    }
}

impl FileId {
    pub fn new(value: u32) -> Option<Self> {
        NonZeroU32::new(value).map(Self)
    }

    pub fn value(&self) -> u32 {
        self.0.get()
    }
}

impl VectorId {
    pub fn new(value: u32) -> Option<Self> {
        NonZeroU32::new(value).map(Self)
    }

    pub fn value(&self) -> u32 {
        self.0.get()
    }
}

/// A 1-based, end-inclusive range of source lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineSpan {
    pub start_line: u32,
    pub end_line: u32,
}

impl LineSpan {
    pub fn new(start_line: u32, end_line: u32) -> Self {
        debug_assert!(start_line >= 1, "line spans are 1-based");
        debug_assert!(end_line >= start_line);
        Self {
            start_line,
            end_line,
        }
    }

    /// Number of source lines covered by this span.
    pub fn line_count(&self) -> u32 {
        self.end_line - self.start_line + 1
    }

    pub fn contains_line(&self, line: u32) -> bool {
        line >= self.start_line && line <= self.end_line
    }
}

/// The declaration kinds the engine indexes.
///
/// Module-scope variables are indexed; locals are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Interface,
    Enum,
    Variable,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
            SymbolKind::Class => "class",
            SymbolKind::Interface => "interface",
            SymbolKind::Enum => "enum",
            SymbolKind::Variable => "variable",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "function" => Some(SymbolKind::Function),
            "method" => Some(SymbolKind::Method),
            "class" => Some(SymbolKind::Class),
            "interface" => Some(SymbolKind::Interface),
            "enum" => Some(SymbolKind::Enum),
            "variable" => Some(SymbolKind::Variable),
            _ => None,
        }
    }

    /// Kinds that can appear on the left side of an `inherits` edge.
    pub fn is_class_like(&self) -> bool {
        matches!(self, SymbolKind::Class | SymbolKind::Interface)
    }
}

/// Edge kinds in the resolution graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    MethodCall,
    InstanceOf,
    Inherits,
    TypeAnnotation,
    ReturnType,
    Import,
}

impl RefKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefKind::MethodCall => "method_call",
            RefKind::InstanceOf => "instance_of",
            RefKind::Inherits => "inherits",
            RefKind::TypeAnnotation => "type_annotation",
            RefKind::ReturnType => "return_type",
            RefKind::Import => "import",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "method_call" => Some(RefKind::MethodCall),
            "instance_of" => Some(RefKind::InstanceOf),
            "inherits" => Some(RefKind::Inherits),
            "type_annotation" => Some(RefKind::TypeAnnotation),
            "return_type" => Some(RefKind::ReturnType),
            "import" => Some(RefKind::Import),
            _ => None,
        }
    }
}

/// How a reference target was derived. Readers break confidence ties by
/// descending `priority()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    ImportTrace,
    TypeAnnotation,
    ClassInstantiation,
    ParameterInference,
    HeuristicUnique,
    Heuristic,
    Syntactic,
}

impl ResolutionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionMethod::ImportTrace => "import_trace",
            ResolutionMethod::TypeAnnotation => "type_annotation",
            ResolutionMethod::ClassInstantiation => "class_instantiation",
            ResolutionMethod::ParameterInference => "parameter_inference",
            ResolutionMethod::HeuristicUnique => "heuristic_unique",
            ResolutionMethod::Heuristic => "heuristic",
            ResolutionMethod::Syntactic => "syntactic",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "import_trace" => Some(ResolutionMethod::ImportTrace),
            "type_annotation" => Some(ResolutionMethod::TypeAnnotation),
            "class_instantiation" => Some(ResolutionMethod::ClassInstantiation),
            "parameter_inference" => Some(ResolutionMethod::ParameterInference),
            "heuristic_unique" => Some(ResolutionMethod::HeuristicUnique),
            "heuristic" => Some(ResolutionMethod::Heuristic),
            "syntactic" => Some(ResolutionMethod::Syntactic),
            _ => None,
        }
    }

    /// Tie-break priority: import_trace > type_annotation >
    /// class_instantiation > parameter_inference > heuristic.
    pub fn priority(&self) -> u8 {
        match self {
            ResolutionMethod::ImportTrace => 6,
            ResolutionMethod::TypeAnnotation => 5,
            ResolutionMethod::ClassInstantiation => 4,
            ResolutionMethod::ParameterInference => 3,
            ResolutionMethod::HeuristicUnique => 2,
            ResolutionMethod::Heuristic => 1,
            ResolutionMethod::Syntactic => 0,
        }
    }
}

/// Compact owned string used for symbol names and signatures.
pub type CompactString = Box<str>;

pub fn compact_string(s: &str) -> CompactString {
    s.into()
}

/// Clamp a derived confidence into the valid [0, 1] range.
pub fn clamp_confidence(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}
