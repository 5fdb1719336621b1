//! Language detection and enumeration.

use serde::{Deserialize, Serialize};

/// Languages the engine parses. Adding a language means adding a variant
/// here and a parser in this module's dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Go,
}

impl Language {
    /// Detect language from a file extension (lowercased).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "py" | "pyi" => Some(Language::Python),
            "js" | "jsx" | "mjs" | "cjs" => Some(Language::JavaScript),
            "ts" | "tsx" | "mts" | "cts" => Some(Language::TypeScript),
            "go" => Some(Language::Go),
            _ => None,
        }
    }

    /// Detect language from a file path.
    pub fn from_path(path: &std::path::Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// Default file extensions for this language.
    pub fn extensions(&self) -> &[&str] {
        match self {
            Language::Python => &["py", "pyi"],
            Language::JavaScript => &["js", "jsx", "mjs", "cjs"],
            Language::TypeScript => &["ts", "tsx", "mts", "cts"],
            Language::Go => &["go"],
        }
    }

    /// Configuration key for this language.
    pub fn config_key(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Go => "go",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "python" => Some(Language::Python),
            "javascript" => Some(Language::JavaScript),
            "typescript" => Some(Language::TypeScript),
            "go" => Some(Language::Go),
            _ => None,
        }
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Language::Python => "Python",
            Language::JavaScript => "JavaScript",
            Language::TypeScript => "TypeScript",
            Language::Go => "Go",
        }
    }

    /// Translate a module path from an import statement into candidate file
    /// paths relative to the project root, per this language's conventions.
    ///
    /// `from pkg.auth import X` → `pkg/auth.py`, `pkg/auth/__init__.py`;
    /// `import { X } from "./auth"` → `auth.ts`, `auth/index.ts`, ...
    pub fn module_path_candidates(&self, module_path: &str) -> Vec<String> {
        match self {
            Language::Python => {
                let rel = module_path.trim_start_matches('.').replace('.', "/");
                vec![format!("{rel}.py"), format!("{rel}/__init__.py")]
            }
            Language::JavaScript => {
                let rel = module_path.trim_start_matches("./").trim_end_matches('/');
                vec![
                    format!("{rel}.js"),
                    format!("{rel}.jsx"),
                    format!("{rel}.mjs"),
                    format!("{rel}/index.js"),
                ]
            }
            Language::TypeScript => {
                let rel = module_path.trim_start_matches("./").trim_end_matches('/');
                vec![
                    format!("{rel}.ts"),
                    format!("{rel}.tsx"),
                    format!("{rel}/index.ts"),
                    format!("{rel}.js"),
                ]
            }
            // Go imports name packages (directories); every .go file in the
            // package directory is a candidate, which the resolver handles
            // by matching the directory prefix.
            Language::Go => {
                let rel = module_path.rsplit('/').next().unwrap_or(module_path);
                vec![format!("{rel}/")]
            }
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
