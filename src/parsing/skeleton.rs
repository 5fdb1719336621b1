//! Skeleton rendering: source text with function bodies elided.
//!
//! Parsers collect `Elision` byte ranges (one per function body, minus the
//! docstring for Python) and this module splices them out, replacing each
//! with a language-appropriate placeholder. Signatures, decorators,
//! docstrings, type annotations and constant initializers all survive
//! because they sit outside the elided ranges.

use serde::{Deserialize, Serialize};

/// A body-elided rendering of one source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skeleton {
    pub text: String,
    pub original_lines: u32,
    pub skeleton_lines: u32,
    /// `skeleton_lines / original_lines`.
    pub compression_ratio: f32,
}

/// One byte range to remove, with its replacement text.
#[derive(Debug, Clone)]
pub(crate) struct Elision {
    pub start_byte: usize,
    pub end_byte: usize,
    pub placeholder: String,
}

fn count_lines(text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }
    let newlines = text.bytes().filter(|&b| b == b'\n').count() as u32;
    if text.ends_with('\n') {
        newlines
    } else {
        newlines + 1
    }
}

/// Like [`render`], but keeps the bodies of symbols whose spans cover an
/// elision's starting line.
pub(crate) fn render_preserving(
    code: &str,
    elisions: Vec<Elision>,
    preserve: &[crate::types::LineSpan],
) -> Skeleton {
    if preserve.is_empty() {
        return render(code, elisions);
    }
    let kept = elisions
        .into_iter()
        .filter(|elision| {
            let line = line_of_byte(code, elision.start_byte);
            !preserve.iter().any(|span| span.contains_line(line))
        })
        .collect();
    render(code, kept)
}

/// 1-based line number of a byte offset.
fn line_of_byte(code: &str, byte: usize) -> u32 {
    let clamped = byte.min(code.len());
    code.as_bytes()[..clamped]
        .iter()
        .filter(|&&b| b == b'\n')
        .count() as u32
        + 1
}

/// Splice elisions out of the source. Overlapping or nested ranges keep the
/// outermost one; ranges are applied in source order.
pub(crate) fn render(code: &str, mut elisions: Vec<Elision>) -> Skeleton {
    elisions.sort_by_key(|e| (e.start_byte, std::cmp::Reverse(e.end_byte)));

    let mut text = String::with_capacity(code.len() / 2);
    let mut cursor = 0usize;
    for elision in &elisions {
        if elision.start_byte < cursor {
            // Nested inside an already-elided body.
            continue;
        }
        let start = elision.start_byte.min(code.len());
        let end = elision.end_byte.clamp(start, code.len());
        text.push_str(&code[cursor..start]);
        text.push_str(&elision.placeholder);
        cursor = end;
    }
    text.push_str(&code[cursor.min(code.len())..]);

    let original_lines = count_lines(code);
    let skeleton_lines = count_lines(&text);
    let compression_ratio = if original_lines == 0 {
        1.0
    } else {
        skeleton_lines as f32 / original_lines as f32
    };

    Skeleton {
        text,
        original_lines,
        skeleton_lines,
        compression_ratio,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_no_elisions() {
        let code = "const X = 1;\n";
        let skeleton = render(code, Vec::new());
        assert_eq!(skeleton.text, code);
        assert_eq!(skeleton.original_lines, 1);
        assert_eq!(skeleton.compression_ratio, 1.0);
    }

    #[test]
    fn test_render_single_elision() {
        let code = "fn main() {\n    work();\n    more();\n}\n";
        let body_start = code.find('{').unwrap();
        let body_end = code.rfind('}').unwrap() + 1;
        let skeleton = render(
            code,
            vec![Elision {
                start_byte: body_start,
                end_byte: body_end,
                placeholder: "{ ... }".to_string(),
            }],
        );
        assert_eq!(skeleton.text, "fn main() { ... }\n");
        assert_eq!(skeleton.original_lines, 4);
        assert_eq!(skeleton.skeleton_lines, 1);
        assert!(skeleton.compression_ratio < 0.5);
    }

    #[test]
    fn test_nested_elisions_keep_outermost() {
        let code = "outer { inner { x } }";
        let skeleton = render(
            code,
            vec![
                Elision {
                    start_byte: 6,
                    end_byte: 21,
                    placeholder: "{ ... }".to_string(),
                },
                Elision {
                    start_byte: 14,
                    end_byte: 19,
                    placeholder: "{ ... }".to_string(),
                },
            ],
        );
        assert_eq!(skeleton.text, "outer { ... }");
    }

    #[test]
    fn test_count_lines_trailing_newline() {
        assert_eq!(count_lines(""), 0);
        assert_eq!(count_lines("a"), 1);
        assert_eq!(count_lines("a\n"), 1);
        assert_eq!(count_lines("a\nb"), 2);
        assert_eq!(count_lines("a\nb\n"), 2);
    }
}
