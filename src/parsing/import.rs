//! Import statements as parsers see them: module path, imported names,
//! optional alias. Resolution to target files and symbols happens later.

use serde::{Deserialize, Serialize};

/// An import statement extracted from one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewImport {
    /// The module path exactly as written: `pkg.auth`, `./auth`,
    /// `"net/http"` without quotes.
    pub module_path: String,
    /// Names imported from the module. Empty for whole-module imports.
    pub names: Vec<String>,
    /// Alias, when the statement binds one (`import x as y`,
    /// `import * as ns`).
    pub alias: Option<String>,
    /// Line of the import statement.
    pub line: u32,
    /// Glob import (`from x import *`).
    pub is_glob: bool,
}

impl NewImport {
    pub fn module(module_path: impl Into<String>, line: u32) -> Self {
        Self {
            module_path: module_path.into(),
            names: Vec::new(),
            alias: None,
            line,
            is_glob: false,
        }
    }

    pub fn with_names(mut self, names: Vec<String>) -> Self {
        self.names = names;
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn glob(mut self) -> Self {
        self.is_glob = true;
        self
    }

    /// The name this import binds in the importing file's scope: the alias
    /// when present, otherwise the last path segment.
    pub fn local_name(&self) -> &str {
        if let Some(alias) = &self.alias {
            return alias;
        }
        self.module_path
            .rsplit(['.', '/'])
            .next()
            .unwrap_or(&self.module_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_name_prefers_alias() {
        let import = NewImport::module("numpy", 1).with_alias("np");
        assert_eq!(import.local_name(), "np");
    }

    #[test]
    fn test_local_name_last_segment() {
        assert_eq!(NewImport::module("pkg.auth", 1).local_name(), "auth");
        assert_eq!(NewImport::module("net/http", 1).local_name(), "http");
    }

    #[test]
    fn test_builder() {
        let import = NewImport::module("pkg.auth", 3)
            .with_names(vec!["AuthHandler".to_string(), "login".to_string()]);
        assert_eq!(import.names.len(), 2);
        assert!(!import.is_glob);
    }
}
