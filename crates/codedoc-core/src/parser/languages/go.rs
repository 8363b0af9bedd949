//! Go structural extractor.
//!
//! Extracts functions, methods (with their receiver type as the parent),
//! struct and interface type declarations, and imports. Go doc comments
//! (`//` lines directly above a declaration) become the docstring.

use crate::parser::{
    line_end, line_start, node_text, preceding_comment_doc, CodeRegion, LanguageAnalyzer,
};
use crate::types::{ChunkKind, Language};

/// Analyzer for Go source files.
pub struct GoAnalyzer;

impl LanguageAnalyzer for GoAnalyzer {
    fn language(&self) -> Language {
        Language::Go
    }

    fn grammar(&self) -> tree_sitter::Language {
        tree_sitter_go::LANGUAGE.into()
    }

    fn extract_regions(&self, tree: &tree_sitter::Tree, source: &str) -> Vec<CodeRegion> {
        let mut regions = Vec::new();
        let root = tree.root_node();
        let mut cursor = root.walk();

        for child in root.children(&mut cursor) {
            if child.is_error() {
                continue;
            }
            match child.kind() {
                "function_declaration" => {
                    if let Some(region) = function_region(child, source, None) {
                        regions.push(region);
                    }
                }
                "method_declaration" => {
                    let receiver = receiver_type(child, source);
                    if let Some(region) = function_region(child, source, receiver.as_deref()) {
                        regions.push(region);
                    }
                }
                "type_declaration" => {
                    extract_types(child, source, &mut regions);
                }
                _ => {}
            }
        }

        regions
    }

    fn extract_imports(&self, tree: &tree_sitter::Tree, source: &str) -> Vec<String> {
        let mut imports = Vec::new();
        let root = tree.root_node();
        let mut cursor = root.walk();

        for child in root.children(&mut cursor) {
            if child.kind() != "import_declaration" {
                continue;
            }
            collect_import_specs(child, source, &mut imports);
        }

        imports.sort();
        imports.dedup();
        imports
    }
}

fn function_region(
    node: tree_sitter::Node<'_>,
    source: &str,
    parent_class: Option<&str>,
) -> Option<CodeRegion> {
    let name_node = node.child_by_field_name("name")?;
    Some(CodeRegion {
        kind: if parent_class.is_some() {
            ChunkKind::Method
        } else {
            ChunkKind::Function
        },
        name: node_text(name_node, source).to_string(),
        line_start: line_start(node),
        line_end: line_end(node),
        content: node_text(node, source).to_string(),
        docstring: preceding_comment_doc(node, source, "//"),
        parent_class: parent_class.map(str::to_string),
    })
}

/// `func (s *Server) Run()` -> `Server`.
fn receiver_type(node: tree_sitter::Node<'_>, source: &str) -> Option<String> {
    let receiver = node.child_by_field_name("receiver")?;
    let mut cursor = receiver.walk();
    for param in receiver.children(&mut cursor) {
        if param.kind() != "parameter_declaration" {
            continue;
        }
        if let Some(ty) = param.child_by_field_name("type") {
            let raw = node_text(ty, source);
            let cleaned = raw
                .trim_start_matches('*')
                .split('[')
                .next()
                .unwrap_or(raw)
                .trim();
            if !cleaned.is_empty() {
                return Some(cleaned.to_string());
            }
        }
    }
    None
}

/// Extract struct and interface specs from a `type` declaration.
fn extract_types(node: tree_sitter::Node<'_>, source: &str, regions: &mut Vec<CodeRegion>) {
    let mut cursor = node.walk();
    for spec in node.children(&mut cursor) {
        if spec.kind() != "type_spec" {
            continue;
        }
        let Some(name_node) = spec.child_by_field_name("name") else {
            continue;
        };
        let kind = match spec.child_by_field_name("type").map(|t| t.kind()) {
            Some("struct_type") | Some("interface_type") => ChunkKind::Class,
            _ => ChunkKind::Other,
        };
        regions.push(CodeRegion {
            kind,
            name: node_text(name_node, source).to_string(),
            line_start: line_start(node),
            line_end: line_end(node),
            content: node_text(node, source).to_string(),
            docstring: preceding_comment_doc(node, source, "//"),
            parent_class: None,
        });
    }
}

fn collect_import_specs(node: tree_sitter::Node<'_>, source: &str, imports: &mut Vec<String>) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "import_spec" => {
                if let Some(path) = child.child_by_field_name("path") {
                    let raw = node_text(path, source).trim_matches('"');
                    if !raw.is_empty() {
                        imports.push(raw.to_string());
                    }
                }
            }
            "import_spec_list" => {
                collect_import_specs(child, source, imports);
            }
            _ => {}
        }
    }
}
