//! JavaScript structural extractor.
//!
//! Handles function declarations, arrow functions bound to `const`/`let`,
//! classes with methods, `export` wrappers, and ES module imports.
//! JSDoc blocks (`/** … */`) directly above a declaration become the
//! region docstring.

use crate::parser::{
    clean_block_comment, line_end, line_start, node_text, CodeRegion, LanguageAnalyzer,
};
use crate::types::{ChunkKind, Language};

/// Analyzer for JavaScript source files.
pub struct JavaScriptAnalyzer;

impl LanguageAnalyzer for JavaScriptAnalyzer {
    fn language(&self) -> Language {
        Language::JavaScript
    }

    fn grammar(&self) -> tree_sitter::Language {
        tree_sitter_javascript::LANGUAGE.into()
    }

    fn extract_regions(&self, tree: &tree_sitter::Tree, source: &str) -> Vec<CodeRegion> {
        let mut regions = Vec::new();
        walk_program(tree.root_node(), source, &mut regions);
        regions
    }

    fn extract_imports(&self, tree: &tree_sitter::Tree, source: &str) -> Vec<String> {
        extract_es_imports(tree.root_node(), source)
    }
}

/// Walk top-level statements, unwrapping `export` declarations.
pub(super) fn walk_program(
    node: tree_sitter::Node<'_>,
    source: &str,
    regions: &mut Vec<CodeRegion>,
) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.is_error() {
            continue;
        }
        let (decl, span) = if child.kind() == "export_statement" {
            match child.child_by_field_name("declaration") {
                Some(decl) => (decl, child),
                None => continue,
            }
        } else {
            (child, child)
        };

        match decl.kind() {
            "function_declaration" | "generator_function_declaration" => {
                if let Some(region) = function_region(decl, span, source, None) {
                    regions.push(region);
                }
            }
            "class_declaration" => {
                class_region(decl, span, source, regions);
            }
            "lexical_declaration" | "variable_declaration" => {
                arrow_regions(decl, span, source, regions);
            }
            _ => {}
        }
    }
}

/// Extract a named function declaration.
pub(super) fn function_region(
    decl: tree_sitter::Node<'_>,
    span: tree_sitter::Node<'_>,
    source: &str,
    parent_class: Option<&str>,
) -> Option<CodeRegion> {
    let name_node = decl.child_by_field_name("name")?;
    Some(CodeRegion {
        kind: if parent_class.is_some() {
            ChunkKind::Method
        } else {
            ChunkKind::Function
        },
        name: node_text(name_node, source).to_string(),
        line_start: line_start(span),
        line_end: line_end(span),
        content: node_text(span, source).to_string(),
        docstring: jsdoc_above(span, source),
        parent_class: parent_class.map(str::to_string),
    })
}

/// Extract a class and its methods.
pub(super) fn class_region(
    decl: tree_sitter::Node<'_>,
    span: tree_sitter::Node<'_>,
    source: &str,
    regions: &mut Vec<CodeRegion>,
) {
    let Some(name_node) = decl.child_by_field_name("name") else {
        return;
    };
    let name = node_text(name_node, source).to_string();

    regions.push(CodeRegion {
        kind: ChunkKind::Class,
        name: name.clone(),
        line_start: line_start(span),
        line_end: line_end(span),
        content: node_text(span, source).to_string(),
        docstring: jsdoc_above(span, source),
        parent_class: None,
    });

    if let Some(body) = decl.child_by_field_name("body") {
        let mut cursor = body.walk();
        for member in body.children(&mut cursor) {
            if member.kind() != "method_definition" {
                continue;
            }
            let Some(method_name) = member.child_by_field_name("name") else {
                continue;
            };
            regions.push(CodeRegion {
                kind: ChunkKind::Method,
                name: node_text(method_name, source).to_string(),
                line_start: line_start(member),
                line_end: line_end(member),
                content: node_text(member, source).to_string(),
                docstring: jsdoc_above(member, source),
                parent_class: Some(name.clone()),
            });
        }
    }
}

/// Extract `const f = (…) => …` style function bindings.
pub(super) fn arrow_regions(
    decl: tree_sitter::Node<'_>,
    span: tree_sitter::Node<'_>,
    source: &str,
    regions: &mut Vec<CodeRegion>,
) {
    let mut cursor = decl.walk();
    for declarator in decl.children(&mut cursor) {
        if declarator.kind() != "variable_declarator" {
            continue;
        }
        let Some(value) = declarator.child_by_field_name("value") else {
            continue;
        };
        if value.kind() != "arrow_function" && value.kind() != "function_expression" {
            continue;
        }
        let Some(name_node) = declarator.child_by_field_name("name") else {
            continue;
        };
        regions.push(CodeRegion {
            kind: ChunkKind::Function,
            name: node_text(name_node, source).to_string(),
            line_start: line_start(span),
            line_end: line_end(span),
            content: node_text(span, source).to_string(),
            docstring: jsdoc_above(span, source),
            parent_class: None,
        });
    }
}

/// Collect ES module import sources (`import … from "path"`).
pub(super) fn extract_es_imports(node: tree_sitter::Node<'_>, source: &str) -> Vec<String> {
    let mut imports = Vec::new();
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() != "import_statement" {
            continue;
        }
        if let Some(src_node) = child.child_by_field_name("source") {
            let raw = node_text(src_node, source);
            let path = raw.trim_matches(|c| c == '"' || c == '\'' || c == '`');
            if !path.is_empty() {
                imports.push(path.to_string());
            }
        }
    }
    imports.sort();
    imports.dedup();
    imports
}

/// JSDoc block directly above a node.
pub(super) fn jsdoc_above(node: tree_sitter::Node<'_>, source: &str) -> Option<String> {
    let sibling = node.prev_sibling()?;
    if !sibling.kind().contains("comment") || line_end(sibling) + 1 != line_start(node) {
        return None;
    }
    let text = node_text(sibling, source);
    if !text.starts_with("/**") {
        return None;
    }
    Some(clean_block_comment(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;
    use std::path::Path;

    fn parse_js(source: &str) -> Vec<CodeRegion> {
        parse_source(Path::new("test.js"), source, Language::JavaScript)
            .expect("parse should succeed")
            .regions
    }

    #[test]
    fn test_function_declaration() {
        let src = "function add(a, b) {\n  return a + b;\n}\n";
        let regions = parse_js(src);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].name, "add");
        assert_eq!(regions[0].kind, ChunkKind::Function);
    }

    #[test]
    fn test_exported_function() {
        let src = "export function handler(req) {\n  return req;\n}\n";
        let regions = parse_js(src);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].name, "handler");
        assert!(regions[0].content.starts_with("export"));
    }

    #[test]
    fn test_arrow_function_binding() {
        let src = "const greet = (name) => `hi ${name}`;\n";
        let regions = parse_js(src);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].name, "greet");
        assert_eq!(regions[0].kind, ChunkKind::Function);
    }

    #[test]
    fn test_class_with_methods() {
        let src = "class Store {\n  get(key) {\n    return this.map[key];\n  }\n  set(key, v) {\n    this.map[key] = v;\n  }\n}\n";
        let regions = parse_js(src);

        let class = regions.iter().find(|r| r.name == "Store");
        assert_eq!(class.expect("class").kind, ChunkKind::Class);

        let get = regions.iter().find(|r| r.name == "get").expect("get");
        assert_eq!(get.kind, ChunkKind::Method);
        assert_eq!(get.parent_class.as_deref(), Some("Store"));
    }

    #[test]
    fn test_jsdoc_becomes_docstring() {
        let src = "/**\n * Adds two numbers.\n */\nfunction add(a, b) {\n  return a + b;\n}\n";
        let regions = parse_js(src);
        assert_eq!(
            regions[0].docstring.as_deref(),
            Some("Adds two numbers.")
        );
    }

    #[test]
    fn test_imports() {
        let src = "import fs from 'fs';\nimport { join } from \"path\";\nfunction f() {}\n";
        let parsed = parse_source(Path::new("test.js"), src, Language::JavaScript)
            .expect("parse should succeed");
        assert_eq!(parsed.imports, vec!["fs".to_string(), "path".to_string()]);
    }
}
