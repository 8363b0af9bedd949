//! Query analysis: normalisation and filter extraction.
//!
//! Pulls explicit metadata filters out of natural-language cues so the
//! retrieval engine can pre-filter the dense query: "in Python" becomes
//! a language filter, "in auth.py" a file filter. No external calls.

use std::sync::LazyLock;

use regex::Regex;

use crate::retrieval::QueryFilters;
use crate::types::Language;

#[allow(clippy::expect_used)]
static FILE_CUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([\w./-]+\.(?:py|pyi|js|jsx|mjs|cjs|ts|tsx|rs|go|java))\b")
        .expect("static file-cue pattern must compile")
});

const LANGUAGE_CUES: &[(&str, Language)] = &[
    ("python", Language::Python),
    ("javascript", Language::JavaScript),
    ("typescript", Language::TypeScript),
    ("rust", Language::Rust),
    ("golang", Language::Go),
    (" go ", Language::Go),
    ("java", Language::Java),
];

/// Collapse whitespace in the raw query.
pub fn normalize(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract metadata filters from natural-language cues.
pub fn extract_filters(query: &str) -> QueryFilters {
    let lower = format!(" {} ", query.to_lowercase());
    let mut filters = QueryFilters::default();

    // File cue wins over language cue: "in auth.py" implies the language
    // anyway, and a path filter is stricter.
    if let Some(captures) = FILE_CUE.captures(query) {
        if let Some(m) = captures.get(1) {
            filters.file_path = Some(m.as_str().to_string());
        }
    }

    if filters.file_path.is_none() {
        for (cue, language) in LANGUAGE_CUES {
            // "java" would also match "javascript"; demand a standalone word.
            let padded = format!(" {} ", cue.trim());
            if lower.contains(&padded) {
                filters.language = Some(*language);
                break;
            }
        }
    }

    filters
}
