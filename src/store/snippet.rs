//! On-demand snippet materialization.
//!
//! Snippets are never persisted; the store reads the owning file from disk
//! each time, so a snippet always reflects what is currently on disk.

use crate::error::{StoreError, StoreResult};
use crate::types::LineSpan;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A materialized range of source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snippet {
    pub path: String,
    /// 1-based first line included.
    pub start_line: u32,
    /// 1-based last line included.
    pub end_line: u32,
    pub content: String,
}

/// Read `span` (± `padding` lines, clamped to the file) from disk.
pub fn load_snippet(path: &Path, span: LineSpan, padding: u32) -> StoreResult<Snippet> {
    let text =
        std::fs::read_to_string(path).map_err(|source| StoreError::SnippetSourceMissing {
            path: path.to_path_buf(),
            source,
        })?;

    let lines: Vec<&str> = text.lines().collect();
    let total = lines.len() as u32;
    if total == 0 {
        return Ok(Snippet {
            path: path.to_string_lossy().to_string(),
            start_line: 0,
            end_line: 0,
            content: String::new(),
        });
    }

    let start = span.start_line.saturating_sub(padding).max(1);
    let end = span.end_line.saturating_add(padding).min(total);
    let start = start.min(end);

    let content = lines[(start as usize - 1)..(end as usize)].join("\n");
    Ok(Snippet {
        path: path.to_string_lossy().to_string(),
        start_line: start,
        end_line: end,
        content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_with_padding() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.py");
        fs::write(&path, "l1\nl2\nl3\nl4\nl5\nl6\n").unwrap();

        let snippet = load_snippet(&path, LineSpan::new(3, 4), 1).unwrap();
        assert_eq!(snippet.start_line, 2);
        assert_eq!(snippet.end_line, 5);
        assert_eq!(snippet.content, "l2\nl3\nl4\nl5");
    }

    #[test]
    fn test_padding_clamps_to_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.py");
        fs::write(&path, "l1\nl2\nl3\n").unwrap();

        let snippet = load_snippet(&path, LineSpan::new(1, 3), 10).unwrap();
        assert_eq!(snippet.start_line, 1);
        assert_eq!(snippet.end_line, 3);
    }

    #[test]
    fn test_missing_file() {
        let result = load_snippet(Path::new("/nonexistent/a.py"), LineSpan::new(1, 1), 0);
        assert!(matches!(result, Err(StoreError::SnippetSourceMissing { .. })));
    }
}
