//! Syntactic parsing: per-language symbol, import and call extraction,
//! plus skeletonization.

pub mod go;
pub mod import;
pub mod javascript;
pub mod language;
pub mod method_call;
pub mod parser;
pub mod python;
pub mod skeleton;
pub mod typescript;

pub use import::NewImport;
pub use language::Language;
pub use method_call::NewMethodCall;
pub use parser::{
    BaseRef, BindingSource, LanguageParser, MODULE_SCOPE, ParsedFile, TypeBinding, create_parser,
};
pub use skeleton::Skeleton;
