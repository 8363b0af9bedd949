//! TypeScript structural extractor.
//!
//! Shares the ECMAScript extraction helpers with the JavaScript analyzer
//! and adds the TypeScript-only declaration forms: interfaces, enums,
//! type aliases, and abstract classes.

use super::javascript::{
    arrow_regions, class_region, extract_es_imports, function_region, jsdoc_above,
};
use crate::parser::{line_end, line_start, node_text, CodeRegion, LanguageAnalyzer};
use crate::types::{ChunkKind, Language};

/// Analyzer for TypeScript source files.
pub struct TypeScriptAnalyzer;

impl LanguageAnalyzer for TypeScriptAnalyzer {
    fn language(&self) -> Language {
        Language::TypeScript
    }

    fn grammar(&self) -> tree_sitter::Language {
        tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
    }

    fn extract_regions(&self, tree: &tree_sitter::Tree, source: &str) -> Vec<CodeRegion> {
        let mut regions = Vec::new();
        walk_ts(tree.root_node(), source, &mut regions);
        regions
    }

    fn extract_imports(&self, tree: &tree_sitter::Tree, source: &str) -> Vec<String> {
        extract_es_imports(tree.root_node(), source)
    }
}

fn walk_ts(node: tree_sitter::Node<'_>, source: &str, regions: &mut Vec<CodeRegion>) {
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
            "class_declaration" | "abstract_class_declaration" => {
                class_region(decl, span, source, regions);
            }
            "lexical_declaration" | "variable_declaration" => {
                arrow_regions(decl, span, source, regions);
            }
            // Interfaces and enums are type containers; chunk them whole.
            "interface_declaration" | "enum_declaration" => {
                if let Some(region) = named_type_region(decl, span, source, ChunkKind::Class) {
                    regions.push(region);
                }
            }
            "type_alias_declaration" => {
                if let Some(region) = named_type_region(decl, span, source, ChunkKind::Other) {
                    regions.push(region);
                }
            }
            _ => {}
        }
    }
}

fn named_type_region(
    decl: tree_sitter::Node<'_>,
    span: tree_sitter::Node<'_>,
    source: &str,
    kind: ChunkKind,
) -> Option<CodeRegion> {
    let name_node = decl.child_by_field_name("name")?;
    Some(CodeRegion {
        kind,
        name: node_text(name_node, source).to_string(),
        line_start: line_start(span),
        line_end: line_end(span),
        content: node_text(span, source).to_string(),
        docstring: jsdoc_above(span, source),
        parent_class: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;
    use std::path::Path;

    fn parse_ts(source: &str) -> Vec<CodeRegion> {
        parse_source(Path::new("test.ts"), source, Language::TypeScript)
            .expect("parse should succeed")
            .regions
    }

    #[test]
    fn test_typed_function() {
        let src = "export function sum(a: number, b: number): number {\n  return a + b;\n}\n";
        let regions = parse_ts(src);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].name, "sum");
        assert_eq!(regions[0].kind, ChunkKind::Function);
    }

    #[test]
    fn test_interface_chunked_as_class() {
        let src = "interface User {\n  id: string;\n  name: string;\n}\n";
        let regions = parse_ts(src);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].name, "User");
        assert_eq!(regions[0].kind, ChunkKind::Class);
    }

    #[test]
    fn test_enum_and_type_alias() {
        let src = "enum Color { Red, Green }\ntype Id = string | number;\n";
        let regions = parse_ts(src);
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].kind, ChunkKind::Class);
        assert_eq!(regions[1].name, "Id");
        assert_eq!(regions[1].kind, ChunkKind::Other);
    }

    #[test]
    fn test_class_methods_carry_parent() {
        let src = "class Api {\n  async fetch(url: string): Promise<string> {\n    return url;\n  }\n}\n";
        let regions = parse_ts(src);
        let method = regions.iter().find(|r| r.name == "fetch").expect("fetch");
        assert_eq!(method.parent_class.as_deref(), Some("Api"));
    }

    #[test]
    fn test_imports() {
        let src = "import { Component } from '@angular/core';\n";
        let parsed = parse_source(Path::new("test.ts"), src, Language::TypeScript)
            .expect("parse should succeed");
        assert_eq!(parsed.imports, vec!["@angular/core".to_string()]);
    }
}
