//! Rust structural extractor.
//!
//! Extracts functions, structs, enums, traits, impl blocks (whose
//! functions become methods of the implemented type), and `use`
//! declarations. `///` doc comments directly above an item become the
//! region docstring.

use crate::parser::{
    line_end, line_start, node_text, preceding_comment_doc, CodeRegion, LanguageAnalyzer,
};
use crate::types::{ChunkKind, Language};

/// Analyzer for Rust source files.
pub struct RustAnalyzer;

impl LanguageAnalyzer for RustAnalyzer {
    fn language(&self) -> Language {
        Language::Rust
    }

    fn grammar(&self) -> tree_sitter::Language {
        tree_sitter_rust::LANGUAGE.into()
    }

    fn extract_regions(&self, tree: &tree_sitter::Tree, source: &str) -> Vec<CodeRegion> {
        let mut regions = Vec::new();
        walk_items(tree.root_node(), source, &mut regions);
        regions
    }

    fn extract_imports(&self, tree: &tree_sitter::Tree, source: &str) -> Vec<String> {
        let mut imports = Vec::new();
        collect_uses(tree.root_node(), source, &mut imports);
        imports.sort();
        imports.dedup();
        imports
    }
}

fn walk_items(node: tree_sitter::Node<'_>, source: &str, regions: &mut Vec<CodeRegion>) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.is_error() {
            continue;
        }
        match child.kind() {
            "function_item" => {
                if let Some(region) = named_region(child, source, ChunkKind::Function, None) {
                    regions.push(region);
                }
            }
            "struct_item" | "enum_item" | "trait_item" | "union_item" => {
                if let Some(region) = named_region(child, source, ChunkKind::Class, None) {
                    regions.push(region);
                }
            }
            "impl_item" => {
                extract_impl(child, source, regions);
            }
            "mod_item" => {
                // Inline modules: recurse into the body for nested items.
                if let Some(body) = child.child_by_field_name("body") {
                    walk_items(body, source, regions);
                }
            }
            _ => {}
        }
    }
}

/// Extract an impl block's functions as methods of the implemented type.
fn extract_impl(node: tree_sitter::Node<'_>, source: &str, regions: &mut Vec<CodeRegion>) {
    let type_name = node
        .child_by_field_name("type")
        .map(|t| strip_generics(node_text(t, source)))
        .unwrap_or_default();

    let Some(body) = node.child_by_field_name("body") else {
        return;
    };

    let mut cursor = body.walk();
    for member in body.children(&mut cursor) {
        if member.is_error() || member.kind() != "function_item" {
            continue;
        }
        let parent = if type_name.is_empty() {
            None
        } else {
            Some(type_name.as_str())
        };
        if let Some(region) = named_region(member, source, ChunkKind::Method, parent) {
            regions.push(region);
        }
    }
}

fn named_region(
    node: tree_sitter::Node<'_>,
    source: &str,
    kind: ChunkKind,
    parent_class: Option<&str>,
) -> Option<CodeRegion> {
    let name_node = node.child_by_field_name("name")?;
    Some(CodeRegion {
        kind,
        name: node_text(name_node, source).to_string(),
        line_start: line_start(node),
        line_end: line_end(node),
        content: node_text(node, source).to_string(),
        docstring: preceding_comment_doc(node, source, "///"),
        parent_class: parent_class.map(str::to_string),
    })
}

fn collect_uses(node: tree_sitter::Node<'_>, source: &str, imports: &mut Vec<String>) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "use_declaration" => {
                if let Some(argument) = child.child_by_field_name("argument") {
                    let raw = node_text(argument, source);
                    // `std::io::{Read, Write}` -> `std::io`
                    let path = raw.split("::{").next().unwrap_or(raw).trim();
                    if !path.is_empty() {
                        imports.push(path.to_string());
                    }
                }
            }
            "mod_item" => {
                if let Some(body) = child.child_by_field_name("body") {
                    collect_uses(body, source, imports);
                }
            }
            _ => {}
        }
    }
}

/// `Foo<T>` -> `Foo`.
fn strip_generics(type_text: &str) -> String {
    type_text
        .split('<')
        .next()
        .unwrap_or(type_text)
        .trim()
        .to_string()
}
