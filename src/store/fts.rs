//! Full-text indexing primitives: the code-aware tokenizer and BM25.
//!
//! The tokenizer splits identifiers on camelCase, PascalCase, snake_case
//! and digit boundaries with a small state machine (Rust's `regex` crate
//! has no lookahead, which the equivalent regex would need):
//!
//! - `HTMLParser`     → `html`, `parser`
//! - `parseXMLStream` → `parse`, `xml`, `stream`
//! - `user_service`   → `user`, `service`
//!
//! Scoring is Okapi BM25 with k1 and b taken from the retrieval config.

use std::collections::HashMap;

/// Split text into lowercased subword tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    let bytes = text.as_bytes();
    let len = bytes.len();
    let mut tokens = Vec::new();
    let mut pos = 0usize;

    while pos < len {
        while pos < len && !bytes[pos].is_ascii_alphanumeric() {
            pos += 1;
        }
        if pos >= len {
            break;
        }

        let start = pos;
        let first = bytes[pos];
        pos += 1;

        if first.is_ascii_uppercase() {
            if pos < len && bytes[pos].is_ascii_lowercase() {
                // Uppercase + lowercase run: a PascalCase word.
                while pos < len && bytes[pos].is_ascii_lowercase() {
                    pos += 1;
                }
            } else {
                // Uppercase run like "HTML" in "HTMLParser": stop before an
                // uppercase that starts the next PascalCase word.
                while pos < len && bytes[pos].is_ascii_uppercase() {
                    if pos + 1 < len && bytes[pos + 1].is_ascii_lowercase() {
                        break;
                    }
                    pos += 1;
                }
            }
        } else if first.is_ascii_lowercase() {
            while pos < len && bytes[pos].is_ascii_lowercase() {
                pos += 1;
            }
        } else {
            while pos < len && bytes[pos].is_ascii_digit() {
                pos += 1;
            }
        }

        // Input is ASCII alphanumeric in this range, so always valid UTF-8.
        if let Ok(token) = std::str::from_utf8(&bytes[start..pos]) {
            tokens.push(token.to_ascii_lowercase());
        }
    }

    tokens
}

/// Term frequencies plus total token count for one document.
pub fn term_frequencies(text: &str) -> (HashMap<String, u32>, u32) {
    let tokens = tokenize(text);
    let total = tokens.len() as u32;
    let mut frequencies = HashMap::new();
    for token in tokens {
        *frequencies.entry(token).or_insert(0) += 1;
    }
    (frequencies, total)
}

/// BM25 term score contribution.
///
/// `idf * tf * (k1 + 1) / (tf + k1 * (1 - b + b * dl / avgdl))` with the
/// non-negative idf variant `ln(1 + (N - df + 0.5) / (df + 0.5))`.
#[allow(clippy::too_many_arguments)]
pub fn bm25_term_score(
    tf: u32,
    df: u64,
    doc_len: u32,
    doc_count: u64,
    avg_doc_len: f32,
    k1: f32,
    b: f32,
) -> f32 {
    if tf == 0 || df == 0 || doc_count == 0 {
        return 0.0;
    }
    let idf = (1.0 + (doc_count as f32 - df as f32 + 0.5) / (df as f32 + 0.5)).ln();
    let tf = tf as f32;
    let norm = if avg_doc_len > 0.0 {
        doc_len as f32 / avg_doc_len
    } else {
        1.0
    };
    idf * (tf * (k1 + 1.0)) / (tf + k1 * (1.0 - b + b * norm))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_camel_case() {
        assert_eq!(tokenize("parseXMLStream"), vec!["parse", "xml", "stream"]);
        assert_eq!(tokenize("HTMLParser"), vec!["html", "parser"]);
        assert_eq!(tokenize("AuthHandler"), vec!["auth", "handler"]);
    }

    #[test]
    fn test_tokenize_snake_case() {
        assert_eq!(tokenize("user_service"), vec!["user", "service"]);
        assert_eq!(tokenize("__init__"), vec!["init"]);
    }

    #[test]
    fn test_tokenize_mixed_punctuation() {
        assert_eq!(
            tokenize("def login(self, user: str) -> bool"),
            vec!["def", "login", "self", "user", "str", "bool"]
        );
    }

    #[test]
    fn test_tokenize_digits() {
        assert_eq!(tokenize("sha256sum v2"), vec!["sha", "256", "sum", "v", "2"]);
    }

    #[test]
    fn test_term_frequencies() {
        let (freq, total) = term_frequencies("auth auth handler");
        assert_eq!(total, 3);
        assert_eq!(freq["auth"], 2);
        assert_eq!(freq["handler"], 1);
    }

    #[test]
    fn test_bm25_rare_terms_score_higher() {
        // Same tf and length; the rarer term wins.
        let rare = bm25_term_score(1, 1, 10, 1000, 10.0, 1.5, 0.75);
        let common = bm25_term_score(1, 900, 10, 1000, 10.0, 1.5, 0.75);
        assert!(rare > common);
        assert!(common > 0.0);
    }

    #[test]
    fn test_bm25_tf_saturates() {
        let single = bm25_term_score(1, 10, 10, 1000, 10.0, 1.5, 0.75);
        let many = bm25_term_score(10, 10, 10, 1000, 10.0, 1.5, 0.75);
        let very_many = bm25_term_score(100, 10, 10, 1000, 10.0, 1.5, 0.75);
        assert!(many > single);
        // Diminishing returns: the step from 10 to 100 is smaller than
        // 1 to 10.
        assert!(very_many - many < many - single);
    }

    #[test]
    fn test_bm25_zero_cases() {
        assert_eq!(bm25_term_score(0, 5, 10, 100, 10.0, 1.5, 0.75), 0.0);
        assert_eq!(bm25_term_score(3, 0, 10, 100, 10.0, 1.5, 0.75), 0.0);
        assert_eq!(bm25_term_score(3, 5, 10, 0, 10.0, 1.5, 0.75), 0.0);
    }
}
