//! Citation validation.
//!
//! Parses `[path:start-end]` citations out of generated text and keeps
//! only those that refer to a retrieved chunk: the file must match and
//! the cited line range must lie inside the chunk's range. Fabricated
//! citations are silently discarded.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::{Citation, RetrievedChunk};

#[allow(clippy::expect_used)]
static CITATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[?([\w./-]+\.[A-Za-z0-9]+):(\d+)(?:\s*-\s*(\d+))?\]?")
        .expect("static citation pattern must compile")
});

/// Extract citations from generated text and match them against the
/// retrieval set. Returns surviving citations in order of first
/// appearance, deduplicated, with confidence and snippet attached from
/// the backing chunk.
pub fn validate_citations(text: &str, retrieved: &[RetrievedChunk]) -> Vec<Citation> {
    let mut citations: Vec<Citation> = Vec::new();

    for captures in CITATION.captures_iter(text) {
        let Some(path) = captures.get(1).map(|m| m.as_str()) else {
            continue;
        };
        let Some(start) = captures.get(2).and_then(|m| m.as_str().parse::<u32>().ok()) else {
            continue;
        };
        let end = captures
            .get(3)
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .unwrap_or(start);
        if start > end {
            continue;
        }

        let Some(backing) = retrieved.iter().find(|r| {
            paths_match(&r.chunk.file_path, path)
                && r.chunk.line_start <= start
                && end <= r.chunk.line_end
        }) else {
            tracing::debug!(path, start, end, "discarding unmatched citation");
            continue;
        };

        let citation = Citation {
            file_path: backing.chunk.file_path.clone(),
            line_start: start,
            line_end: end,
            confidence: Some(backing.score as f32),
            snippet: Some(backing.snippet.clone()),
        };
        if !citations
            .iter()
            .any(|c| c.file_path == citation.file_path && c.line_start == start && c.line_end == end)
        {
            citations.push(citation);
        }
    }

    citations
}

/// A cited path matches a chunk path exactly or as a suffix
/// (`auth.py` matches `src/auth.py`).
fn paths_match(chunk_path: &str, cited: &str) -> bool {
    if chunk_path == cited {
        return true;
    }
    chunk_path
        .strip_suffix(cited)
        .is_some_and(|prefix| prefix.ends_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{chunk_id, Chunk, ChunkKind, Language};
    use uuid::Uuid;

    fn retrieved(path: &str, start: u32, end: u32) -> RetrievedChunk {
        let cb = Uuid::new_v4();
        RetrievedChunk {
            chunk: Chunk {
                id: chunk_id(cb, path, start, end, ChunkKind::Function),
                codebase_id: cb,
                file_path: path.to_string(),
                line_start: start,
                line_end: end,
                kind: ChunkKind::Function,
                name: "f".into(),
                language: Language::Python,
                content: "def f(): pass".into(),
                dependencies: Vec::new(),
                docstring: None,
                parent_class: None,
                token_count: 4,
            },
            score: 0.9,
            dense_score: 0.9,
            sparse_score: 0.5,
            snippet: "def f(): pass".into(),
        }
    }

    #[test]
    fn test_valid_citation_survives() {
        let pool = vec![retrieved("a.py", 1, 10)];
        let citations = validate_citations("The function foo [a.py:1-10] returns 1.", &pool);
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].file_path, "a.py");
        assert_eq!(citations[0].line_start, 1);
        assert_eq!(citations[0].line_end, 10);
        assert!(citations[0].confidence.is_some());
    }

    #[test]
    fn test_subrange_citation_survives() {
        let pool = vec![retrieved("a.py", 1, 50)];
        let citations = validate_citations("see [a.py:10-20]", &pool);
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].line_start, 10);
    }

    #[test]
    fn test_unknown_file_discarded() {
        let pool = vec![retrieved("a.py", 1, 10)];
        let citations = validate_citations("see [other.py:1-5]", &pool);
        assert!(citations.is_empty());
    }

    #[test]
    fn test_out_of_range_discarded() {
        let pool = vec![retrieved("a.py", 1, 10)];
        let citations = validate_citations("see [a.py:5-20]", &pool);
        assert!(citations.is_empty());
    }

    #[test]
    fn test_bare_path_and_single_line_forms() {
        let pool = vec![retrieved("src/auth.py", 1, 40)];
        let citations = validate_citations("defined at auth.py:12 and src/auth.py:20-25", &pool);
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].file_path, "src/auth.py");
        assert_eq!(citations[0].line_start, 12);
        assert_eq!(citations[0].line_end, 12);
    }

    #[test]
    fn test_duplicates_collapsed() {
        let pool = vec![retrieved("a.py", 1, 10)];
        let citations = validate_citations("[a.py:1-10] and again [a.py:1-10]", &pool);
        assert_eq!(citations.len(), 1);
    }

    #[test]
    fn test_empty_pool_discards_everything() {
        let citations = validate_citations("[a.py:1-10]", &[]);
        assert!(citations.is_empty());
    }
}
