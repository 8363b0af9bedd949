//! Java structural extractor.
//!
//! Extracts classes, interfaces, enums, their methods and constructors,
//! and import declarations. Javadoc blocks become docstrings.

use crate::parser::{
    clean_block_comment, line_end, line_start, node_text, CodeRegion, LanguageAnalyzer,
};
use crate::types::{ChunkKind, Language};

/// Analyzer for Java source files.
pub struct JavaAnalyzer;

impl LanguageAnalyzer for JavaAnalyzer {
    fn language(&self) -> Language {
        Language::Java
    }

    fn grammar(&self) -> tree_sitter::Language {
        tree_sitter_java::LANGUAGE.into()
    }

    fn extract_regions(&self, tree: &tree_sitter::Tree, source: &str) -> Vec<CodeRegion> {
        let mut regions = Vec::new();
        let root = tree.root_node();
        let mut cursor = root.walk();

        for child in root.children(&mut cursor) {
            if child.is_error() {
                continue;
            }
            if matches!(
                child.kind(),
                "class_declaration" | "interface_declaration" | "enum_declaration"
            ) {
                extract_type(child, source, &mut regions);
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
            let raw = node_text(child, source);
            let path = raw
                .trim_start_matches("import")
                .trim_start_matches(" static")
                .trim()
                .trim_end_matches(';')
                .trim_end_matches(".*")
                .trim_end_matches('.')
                .to_string();
            if !path.is_empty() {
                imports.push(path);
            }
        }

        imports.sort();
        imports.dedup();
        imports
    }
}

/// Extract a type declaration, its members, and nested types.
fn extract_type(node: tree_sitter::Node<'_>, source: &str, regions: &mut Vec<CodeRegion>) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    let name = node_text(name_node, source).to_string();

    regions.push(CodeRegion {
        kind: ChunkKind::Class,
        name: name.clone(),
        line_start: line_start(node),
        line_end: line_end(node),
        content: node_text(node, source).to_string(),
        docstring: javadoc_above(node, source),
        parent_class: None,
    });

    let Some(body) = node.child_by_field_name("body") else {
        return;
    };

    let mut cursor = body.walk();
    for member in body.children(&mut cursor) {
        if member.is_error() {
            continue;
        }
        match member.kind() {
            "method_declaration" | "constructor_declaration" => {
                let Some(method_name) = member.child_by_field_name("name") else {
                    continue;
                };
                regions.push(CodeRegion {
                    kind: ChunkKind::Method,
                    name: node_text(method_name, source).to_string(),
                    line_start: line_start(member),
                    line_end: line_end(member),
                    content: node_text(member, source).to_string(),
                    docstring: javadoc_above(member, source),
                    parent_class: Some(name.clone()),
                });
            }
            "class_declaration" | "interface_declaration" | "enum_declaration" => {
                extract_type(member, source, regions);
            }
            _ => {}
        }
    }
}

/// Javadoc block directly above a node.
fn javadoc_above(node: tree_sitter::Node<'_>, source: &str) -> Option<String> {
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

    fn parse_java(source: &str) -> Vec<CodeRegion> {
        parse_source(Path::new("Test.java"), source, Language::Java)
            .expect("parse should succeed")
            .regions
    }

    #[test]
    fn test_class_with_methods() {
        let src = "public class Calculator {\n    /**\n     * Adds two numbers.\n     */\n    public int add(int a, int b) {\n        return a + b;\n    }\n\n    public Calculator() {}\n}\n";
        let regions = parse_java(src);

        let class = regions.iter().find(|r| r.name == "Calculator" && r.kind == ChunkKind::Class);
        assert!(class.is_some(), "should find the class");

        let add = regions.iter().find(|r| r.name == "add").expect("add");
        assert_eq!(add.kind, ChunkKind::Method);
        assert_eq!(add.parent_class.as_deref(), Some("Calculator"));
        assert_eq!(add.docstring.as_deref(), Some("Adds two numbers."));

        let ctor = regions
            .iter()
            .find(|r| r.name == "Calculator" && r.kind == ChunkKind::Method);
        assert!(ctor.is_some(), "constructor should be a method");
    }

    #[test]
    fn test_interface_and_enum() {
        let src = "interface Shape {\n    double area();\n}\n\nenum Color { RED, GREEN }\n";
        let regions = parse_java(src);

        let shape = regions.iter().find(|r| r.name == "Shape").expect("Shape");
        assert_eq!(shape.kind, ChunkKind::Class);

        let color = regions.iter().find(|r| r.name == "Color").expect("Color");
        assert_eq!(color.kind, ChunkKind::Class);
    }

    #[test]
    fn test_nested_class() {
        let src = "public class Outer {\n    static class Inner {\n        void run() {}\n    }\n}\n";
        let regions = parse_java(src);
        assert!(regions.iter().any(|r| r.name == "Inner"));
        let run = regions.iter().find(|r| r.name == "run").expect("run");
        assert_eq!(run.parent_class.as_deref(), Some("Inner"));
    }

    #[test]
    fn test_imports() {
        let src = "import java.util.List;\nimport java.io.*;\n\nclass A {}\n";
        let parsed = parse_source(Path::new("A.java"), src, Language::Java)
            .expect("parse should succeed");
        assert_eq!(
            parsed.imports,
            vec!["java.io".to_string(), "java.util.List".to_string()]
        );
    }
}
