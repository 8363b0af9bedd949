//! AST parsing subsystem using tree-sitter.
//!
//! This module provides language-agnostic AST parsing with per-language
//! structural extractors. Each supported language registers an analyzer
//! that maps tree-sitter AST nodes to code regions the chunker consumes.
//!
//! ## Architecture
//!
//! ```text
//! Source File -> Language Detection -> tree-sitter Grammar
//!            -> Parse -> CST
//!            -> Region Extraction -> ParsedFile { regions, imports }
//! ```
//!
//! The parser is error-tolerant: on syntax errors it extracts the regions
//! that did parse, discards invalid subtrees, and never aborts the file.
//! It is stateless and safe to invoke from multiple threads.

pub mod languages;
pub mod registry;

use std::path::Path;

use crate::error::{CodedocError, CodedocResult};
use crate::types::{ChunkKind, Language};

/// A structural region extracted from an AST.
#[derive(Debug, Clone)]
pub struct CodeRegion {
    /// What kind of construct this is.
    pub kind: ChunkKind,
    /// Symbolic name (function identifier, class name).
    pub name: String,
    /// Starting line (1-indexed).
    pub line_start: u32,
    /// Ending line (1-indexed, inclusive).
    pub line_end: u32,
    /// Raw source slice of this region.
    pub content: String,
    /// Extracted doc comment, if present.
    pub docstring: Option<String>,
    /// Enclosing class name, for methods.
    pub parent_class: Option<String>,
}

/// Parser output for one file.
#[derive(Debug, Clone, Default)]
pub struct ParsedFile {
    /// Structural regions in source order.
    pub regions: Vec<CodeRegion>,
    /// Import paths referenced by the file.
    pub imports: Vec<String>,
}

/// Trait that each language analyzer must implement.
pub trait LanguageAnalyzer: Send + Sync {
    /// The language this analyzer handles.
    fn language(&self) -> Language;

    /// Returns the tree-sitter grammar for this analyzer.
    fn grammar(&self) -> tree_sitter::Language;

    /// Extract structural regions from a parsed tree.
    ///
    /// Implementations must skip `ERROR` subtrees so that a partially
    /// invalid file still yields its valid regions.
    fn extract_regions(&self, tree: &tree_sitter::Tree, source: &str) -> Vec<CodeRegion>;

    /// Extract import paths for dependency metadata.
    fn extract_imports(&self, tree: &tree_sitter::Tree, source: &str) -> Vec<String>;
}

/// Parse a source file and extract its structural regions and imports.
pub fn parse_source(
    file_path: &Path,
    source: &str,
    language: Language,
) -> CodedocResult<ParsedFile> {
    let registry = registry::global_registry();

    let analyzer = registry
        .get(language)
        .ok_or_else(|| CodedocError::Parse {
            path: file_path.to_path_buf(),
            message: format!("no analyzer registered for language: {language}"),
        })?;

    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&analyzer.grammar())
        .map_err(|e| CodedocError::Parse {
            path: file_path.to_path_buf(),
            message: format!("failed to set tree-sitter language: {e}"),
        })?;

    let tree = parser.parse(source, None).ok_or_else(|| CodedocError::Parse {
        path: file_path.to_path_buf(),
        message: "tree-sitter returned None (parse timeout or cancellation)".into(),
    })?;

    if tree.root_node().has_error() {
        tracing::debug!(
            path = %file_path.display(),
            "syntax errors present, extracting valid regions only"
        );
    }

    Ok(ParsedFile {
        regions: analyzer.extract_regions(&tree, source),
        imports: analyzer.extract_imports(&tree, source),
    })
}

// ---------------------------------------------------------------------------
// Helpers shared by the language analyzers
// ---------------------------------------------------------------------------

/// Get the text content of a tree-sitter node.
pub(crate) fn node_text<'a>(node: tree_sitter::Node<'_>, source: &'a str) -> &'a str {
    source.get(node.start_byte()..node.end_byte()).unwrap_or("")
}

/// 1-indexed starting line of a node.
pub(crate) fn line_start(node: tree_sitter::Node<'_>) -> u32 {
    node.start_position().row as u32 + 1
}

/// 1-indexed ending line of a node.
pub(crate) fn line_end(node: tree_sitter::Node<'_>) -> u32 {
    node.end_position().row as u32 + 1
}

/// Collect the contiguous run of comment lines immediately above `node`,
/// filtered by a per-language prefix (e.g. `///` for Rust doc comments,
/// `//` for Go).
///
/// Returns the comment text with the prefix stripped from each line.
pub(crate) fn preceding_comment_doc(
    node: tree_sitter::Node<'_>,
    source: &str,
    prefix: &str,
) -> Option<String> {
    let mut lines: Vec<String> = Vec::new();
    // The next comment must end on the line directly above this one.
    let mut expected_line = line_start(node);
    let mut cursor = node.prev_sibling();

    while let Some(sibling) = cursor {
        if !sibling.kind().contains("comment") || line_end(sibling) + 1 != expected_line {
            break;
        }
        let text = node_text(sibling, source).trim_start();
        if !text.starts_with(prefix) {
            break;
        }
        lines.push(text.strip_prefix(prefix).unwrap_or(text).trim().to_string());
        expected_line = line_start(sibling);
        cursor = sibling.prev_sibling();
    }

    if lines.is_empty() {
        None
    } else {
        lines.reverse();
        Some(lines.join("\n"))
    }
}

/// Extract the documentation body from a single block comment
/// (`/** … */` Javadoc / JSDoc style).
pub(crate) fn clean_block_comment(raw: &str) -> String {
    raw.trim()
        .trim_start_matches("/**")
        .trim_start_matches("/*")
        .trim_end_matches("*/")
        .lines()
        .map(|l| l.trim().trim_start_matches('*').trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_source_unknown_language_returns_error() {
        let result = parse_source(Path::new("test.xyz"), "hello world", Language::Unknown);
        assert!(result.is_err());
    }

    #[test]
    fn test_clean_block_comment() {
        let raw = "/**\n * Adds two numbers.\n * @param a first\n */";
        let cleaned = clean_block_comment(raw);
        assert!(cleaned.contains("Adds two numbers."));
        assert!(!cleaned.contains("/**"));
        assert!(!cleaned.contains("*/"));
    }
}
