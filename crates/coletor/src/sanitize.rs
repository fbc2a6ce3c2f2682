//! Name normalization and helpers for keeping span attributes short.

use std::path::Path;

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Upper-cases, strips accents and collapses whitespace.
///
/// `"  São João  del-Rei "` → `"SAO JOAO DEL-REI"`
pub fn normalize_name(raw: &str) -> String {
    let stripped: String = raw.nfd().filter(|c| !is_combining_mark(*c)).collect();
    stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// File stem for a municipality: normalized, spaces become underscores and
/// characters that are unsafe in file names are dropped.
///
/// `"BELO HORIZONTE"` → `"BELO_HORIZONTE"`
pub fn file_stem(municipality: &str) -> String {
    normalize_name(municipality)
        .chars()
        .filter_map(|c| match c {
            ' ' => Some('_'),
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => None,
            c if c.is_control() => None,
            c => Some(c),
        })
        .collect()
}

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}
