//! Python structural extractor.
//!
//! Extracts functions, classes, methods, decorators, imports, and
//! docstrings from Python source files using tree-sitter.
//!
//! ## Python AST Node Types (tree-sitter-python)
//!
//! - `function_definition` -> Function / Method
//! - `class_definition` -> Class
//! - `decorated_definition` -> wraps function/class with decorators
//! - `import_statement`, `import_from_statement` -> imports
//! - `expression_statement > string` (first child of body) -> docstring

use crate::parser::{line_end, line_start, node_text, CodeRegion, LanguageAnalyzer};
use crate::types::{ChunkKind, Language};

/// Analyzer for Python source files.
pub struct PythonAnalyzer;

impl LanguageAnalyzer for PythonAnalyzer {
    fn language(&self) -> Language {
        Language::Python
    }

    fn grammar(&self) -> tree_sitter::Language {
        tree_sitter_python::LANGUAGE.into()
    }

    fn extract_regions(&self, tree: &tree_sitter::Tree, source: &str) -> Vec<CodeRegion> {
        let mut regions = Vec::new();
        self.walk(tree.root_node(), source, None, &mut regions);
        regions
    }

    fn extract_imports(&self, tree: &tree_sitter::Tree, source: &str) -> Vec<String> {
        let mut imports = Vec::new();
        let root = tree.root_node();
        let mut cursor = root.walk();

        for child in root.children(&mut cursor) {
            match child.kind() {
                // `import foo` or `import foo.bar as baz`
                "import_statement" => {
                    let mut inner = child.walk();
                    for name_node in child.children(&mut inner) {
                        match name_node.kind() {
                            "dotted_name" => {
                                imports.push(node_text(name_node, source).to_string());
                            }
                            "aliased_import" => {
                                if let Some(n) = name_node.child_by_field_name("name") {
                                    imports.push(node_text(n, source).to_string());
                                }
                            }
                            _ => {}
                        }
                    }
                }
                // `from foo.bar import baz`
                "import_from_statement" => {
                    if let Some(module) = child.child_by_field_name("module_name") {
                        let path = node_text(module, source);
                        if !path.is_empty() {
                            imports.push(path.to_string());
                        }
                    }
                }
                _ => {}
            }
        }

        imports.sort();
        imports.dedup();
        imports
    }
}

impl PythonAnalyzer {
    /// Recursively walk the AST, tracking the enclosing class name.
    fn walk(
        &self,
        node: tree_sitter::Node<'_>,
        source: &str,
        enclosing_class: Option<&str>,
        regions: &mut Vec<CodeRegion>,
    ) {
        let mut cursor = node.walk();

        for child in node.children(&mut cursor) {
            if child.is_error() {
                continue;
            }
            match child.kind() {
                "function_definition" => {
                    if let Some(region) =
                        self.extract_function(child, child, source, enclosing_class)
                    {
                        regions.push(region);
                    }
                }
                "class_definition" => {
                    self.extract_class(child, child, source, regions);
                }
                "decorated_definition" => {
                    // Span includes the decorators; the definition is inside.
                    let mut inner = child.walk();
                    for def in child.children(&mut inner) {
                        match def.kind() {
                            "function_definition" => {
                                if let Some(region) =
                                    self.extract_function(def, child, source, enclosing_class)
                                {
                                    regions.push(region);
                                }
                            }
                            "class_definition" => {
                                self.extract_class(def, child, source, regions);
                            }
                            _ => {}
                        }
                    }
                }
                _ => {
                    // Recurse into compound statements (if/for/try blocks)
                    // that may contain definitions.
                    if child.child_count() > 0
                        && child.kind() != "expression_statement"
                        && enclosing_class.is_none()
                    {
                        self.walk(child, source, None, regions);
                    }
                }
            }
        }
    }

    /// Extract a function or method. `span` is the node whose text becomes
    /// the region content (the `decorated_definition` when decorated).
    fn extract_function(
        &self,
        def: tree_sitter::Node<'_>,
        span: tree_sitter::Node<'_>,
        source: &str,
        enclosing_class: Option<&str>,
    ) -> Option<CodeRegion> {
        let name_node = def.child_by_field_name("name")?;
        let name = node_text(name_node, source).to_string();

        Some(CodeRegion {
            kind: if enclosing_class.is_some() {
                ChunkKind::Method
            } else {
                ChunkKind::Function
            },
            name,
            line_start: line_start(span),
            line_end: line_end(span),
            content: node_text(span, source).to_string(),
            docstring: self.extract_docstring(def, source),
            parent_class: enclosing_class.map(str::to_string),
        })
    }

    /// Extract a class region, then its methods.
    fn extract_class(
        &self,
        def: tree_sitter::Node<'_>,
        span: tree_sitter::Node<'_>,
        source: &str,
        regions: &mut Vec<CodeRegion>,
    ) {
        let Some(name_node) = def.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, source).to_string();

        regions.push(CodeRegion {
            kind: ChunkKind::Class,
            name: name.clone(),
            line_start: line_start(span),
            line_end: line_end(span),
            content: node_text(span, source).to_string(),
            docstring: self.extract_docstring(def, source),
            parent_class: None,
        });

        if let Some(body) = def.child_by_field_name("body") {
            self.walk(body, source, Some(&name), regions);
        }
    }

    /// Extract the docstring from the first statement of a body block.
    fn extract_docstring(&self, node: tree_sitter::Node<'_>, source: &str) -> Option<String> {
        let body = node.child_by_field_name("body")?;
        let first_stmt = body.child(0)?;

        if first_stmt.kind() != "expression_statement" {
            return None;
        }

        let expr = first_stmt.child(0)?;
        if expr.kind() != "string" && expr.kind() != "concatenated_string" {
            return None;
        }

        Some(clean_docstring(node_text(expr, source)))
    }
}

/// Strip triple quotes and normalize whitespace.
fn clean_docstring(raw: &str) -> String {
    let trimmed = raw.trim();
    let stripped = trimmed
        .strip_prefix("\"\"\"")
        .or_else(|| trimmed.strip_prefix("'''"))
        .unwrap_or(trimmed);
    let stripped = stripped
        .strip_suffix("\"\"\"")
        .or_else(|| stripped.strip_suffix("'''"))
        .unwrap_or(stripped);
    stripped.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;
    use std::path::Path;

    fn parse_python(source: &str) -> Vec<CodeRegion> {
        parse_source(Path::new("test.py"), source, Language::Python)
            .expect("parse should succeed")
            .regions
    }

    #[test]
    fn test_simple_function() {
        let src = r#"
def hello(name):
    """Greet someone."""
    print(f"Hello, {name}!")
"#;
        let regions = parse_python(src);
        assert_eq!(regions.len(), 1);

        let func = &regions[0];
        assert_eq!(func.name, "hello");
        assert_eq!(func.kind, ChunkKind::Function);
        assert_eq!(func.docstring.as_deref(), Some("Greet someone."));
        assert!(func.parent_class.is_none());
    }

    #[test]
    fn test_class_with_methods() {
        let src = r#"
class UserService:
    """Service for managing users."""

    def __init__(self, db):
        self.db = db

    def get_user(self, user_id):
        """Retrieve a user by ID."""
        return self.db.find(user_id)
"#;
        let regions = parse_python(src);

        let class = regions.iter().find(|r| r.name == "UserService");
        assert!(class.is_some(), "should find UserService class");
        let class = class.expect("class exists");
        assert_eq!(class.kind, ChunkKind::Class);
        assert_eq!(
            class.docstring.as_deref(),
            Some("Service for managing users.")
        );

        let method = regions.iter().find(|r| r.name == "get_user");
        let method = method.expect("get_user exists");
        assert_eq!(method.kind, ChunkKind::Method);
        assert_eq!(method.parent_class.as_deref(), Some("UserService"));
        assert_eq!(method.docstring.as_deref(), Some("Retrieve a user by ID."));
    }

    #[test]
    fn test_decorated_function_includes_decorator_span() {
        let src = r#"
@app.route("/api/users")
def list_users():
    """List all users."""
    pass
"#;
        let regions = parse_python(src);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].name, "list_users");
        assert!(regions[0].content.starts_with("@app.route"));
        assert_eq!(regions[0].line_start, 2);
    }

    #[test]
    fn test_imports() {
        let src = "import os\nimport numpy as np\nfrom collections import OrderedDict\n";
        let parsed = parse_source(Path::new("test.py"), src, Language::Python)
            .expect("parse should succeed");
        assert!(parsed.imports.contains(&"os".to_string()));
        assert!(parsed.imports.contains(&"numpy".to_string()));
        assert!(parsed.imports.contains(&"collections".to_string()));
    }

    #[test]
    fn test_line_numbers() {
        let src = "def first():\n    pass\n\ndef second():\n    pass\n";
        let regions = parse_python(src);
        assert_eq!(regions.len(), 2);

        assert_eq!(regions[0].line_start, 1);
        assert_eq!(regions[0].line_end, 2);
        assert_eq!(regions[1].line_start, 4);
        assert_eq!(regions[1].line_end, 5);
    }

    #[test]
    fn test_syntax_error_keeps_valid_regions() {
        let src = "def good():\n    return 1\n\ndef broken(:\n";
        let regions = parse_python(src);
        assert!(regions.iter().any(|r| r.name == "good"));
    }

    #[test]
    fn test_empty_file() {
        assert!(parse_python("").is_empty());
    }

    #[test]
    fn test_clean_docstring() {
        assert_eq!(clean_docstring(r#""""hello""""#), "hello");
        assert_eq!(clean_docstring("'''hello'''"), "hello");
        assert_eq!(clean_docstring("\"\"\"  spaced  \"\"\""), "spaced");
    }
}
