//! Deterministic text normalization shared by indexing and querying.
//!
//! # Algorithm
//!
//! 1. Decompose to NFD and drop combining marks (strips diacritics).
//! 2. Lower-case.
//! 3. Replace every run of non-alphanumeric characters with one space.
//! 4. Trim.
//!
//! [`normalize_batch`] produces exactly the same output as mapping
//! [`normalize`] over the input, but runs across the rayon pool for large
//! columns.
//!
//! # Example
//!
//! ```rust
//! use catalog_search_core::normalize::{normalize, tokenize};
//!
//! assert_eq!(normalize("  Lápis HB-2 (Faber)  "), "lapis hb 2 faber");
//! assert_eq!(tokenize("Caneta de Gel", true), vec!["caneta", "gel"]);
//! ```

use rayon::prelude::*;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Columns shorter than this are normalized on the calling thread.
const PARALLEL_THRESHOLD: usize = 2048;

/// Portuguese function words removed by [`tokenize`] on request.
pub const STOPWORDS: &[&str] = &[
    "a", "o", "as", "os", "um", "uma", "uns", "umas", "de", "da", "do", "das", "dos", "e", "em",
    "no", "na", "nos", "nas", "ao", "aos", "com", "para", "por", "pra", "pelo", "pela", "que",
    "ou", "se",
];

/// Normalize a single text. Empty input yields an empty string.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;

    for c in text.nfd() {
        if is_combining_mark(c) {
            continue;
        }
        if c.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.extend(c.to_lowercase());
        } else {
            pending_space = true;
        }
    }

    out
}

/// Normalize an optional text; `None` yields an empty string.
pub fn normalize_opt(text: Option<&str>) -> String {
    text.map(normalize).unwrap_or_default()
}

/// Normalize a whole column, preserving order.
pub fn normalize_batch<S>(texts: &[S]) -> Vec<String>
where
    S: AsRef<str> + Sync,
{
    if texts.len() < PARALLEL_THRESHOLD {
        texts.iter().map(|t| normalize(t.as_ref())).collect()
    } else {
        texts.par_iter().map(|t| normalize(t.as_ref())).collect()
    }
}

/// Split normalized text into tokens, optionally dropping stopwords.
pub fn tokenize(text: &str, remove_stopwords: bool) -> Vec<String> {
    normalize(text)
        .split(' ')
        .filter(|t| !t.is_empty())
        .filter(|t| !remove_stopwords || !is_stopword(t))
        .map(str::to_string)
        .collect()
}

/// Tokenize a whole column, preserving order.
pub fn tokenize_batch<S>(texts: &[S], remove_stopwords: bool) -> Vec<Vec<String>>
where
    S: AsRef<str> + Sync,
{
    if texts.len() < PARALLEL_THRESHOLD {
        texts
            .iter()
            .map(|t| tokenize(t.as_ref(), remove_stopwords))
            .collect()
    } else {
        texts
            .par_iter()
            .map(|t| tokenize(t.as_ref(), remove_stopwords))
            .collect()
    }
}

pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token)
}

/// True when the normalized `needle` appears in the normalized `haystack`
/// as a whole-token sequence.
pub fn contains_phrase(haystack: &str, needle: &str) -> bool {
    let needle = normalize(needle);
    if needle.is_empty() {
        return false;
    }
    let haystack = normalize(haystack);
    format!(" {} ", haystack).contains(&format!(" {} ", needle))
}
