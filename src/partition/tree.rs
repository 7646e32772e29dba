//! Generic tree-sitter partitioner for the non-primary grammars, plus the
//! syntax-tree helpers shared with the native analyzer.

use tree_sitter::{Node, Tree};

use crate::lang::registry::create_parser;
use crate::lang::Language;
use crate::partition::{
    BlockAssembler, BlockKind, BlockSpan, PartitionResult, Partitioner, StrategyError,
    StrategyKind, StrategyResult,
};

/// Node kinds that add a branch to the complexity score.
pub(crate) const BRANCH_KINDS: &[&str] = &[
    "if_statement",
    "elif_clause",
    "if_expression",
    "for_statement",
    "for_in_statement",
    "for_expression",
    "for_in_clause",
    "if_clause",
    "while_statement",
    "while_expression",
    "loop_expression",
    "do_statement",
    "except_clause",
    "catch_clause",
    "case_clause",
    "switch_case",
    "expression_case",
    "type_case",
    "communication_case",
    "match_arm",
    "conditional_expression",
    "ternary_expression",
    "boolean_operator",
];

/// Parse `content` with the grammar for `language`.
pub(crate) fn parse_tree(
    file_path: &str,
    content: &str,
    language: Language,
) -> StrategyResult<Tree> {
    let mut parser = create_parser(language, file_path)
        .map_err(|err| StrategyError::parse(err.to_string()))?;
    parser
        .parse(content, None)
        .ok_or_else(|| StrategyError::parse("parser returned no tree"))
}

/// 1-based inclusive line range of a node.
///
/// A node that ends at column 0 of a later row stops on the previous line.
pub(crate) fn node_line_range(node: &Node) -> (usize, usize) {
    let start = node.start_position();
    let end = node.end_position();
    let end_row = if end.column == 0 && end.row > start.row {
        end.row - 1
    } else {
        end.row
    };
    (start.row + 1, end_row + 1)
}

/// Bytes covered by top-level ERROR nodes (or the whole file when the root is one).
pub(crate) fn error_coverage(root: &Node) -> usize {
    if root.is_error() {
        return root.end_byte() - root.start_byte();
    }
    let mut cursor = root.walk();
    root.children(&mut cursor)
        .filter(|child| child.is_error())
        .map(|child| child.end_byte() - child.start_byte())
        .sum()
}

/// Fail the tier when ERROR nodes cover more than half the input.
pub(crate) fn check_error_budget(root: &Node, content: &str) -> StrategyResult<()> {
    let broken = error_coverage(root);
    if broken * 2 > content.len() {
        return Err(StrategyError::parse(format!(
            "syntax errors cover {broken} of {} bytes",
            content.len()
        )));
    }
    Ok(())
}

/// 1 + number of branching nodes under `node`.
///
/// Walks with a cursor so nesting depth never grows the call stack.
pub(crate) fn complexity(node: &Node) -> f64 {
    let mut branches = 0usize;
    let mut cursor = node.walk();
    loop {
        let current = cursor.node();
        if current.is_named() && BRANCH_KINDS.contains(&current.kind()) {
            branches += 1;
        }
        if cursor.goto_first_child() {
            continue;
        }
        while !cursor.goto_next_sibling() {
            if !cursor.goto_parent() {
                return 1.0 + branches as f64;
            }
        }
    }
}

/// Text of a node's field, if present and valid UTF-8.
pub(crate) fn field_text<'s>(node: &Node, field: &str, source: &'s str) -> Option<&'s str> {
    node.child_by_field_name(field)
        .and_then(|child| child.utf8_text(source.as_bytes()).ok())
}

/// Accumulates top-level spans, grouping runs of imports and of
/// unclassified statements.
#[derive(Default)]
pub(crate) struct SpanCollector {
    spans: Vec<BlockSpan>,
    imports: Option<(usize, usize)>,
    other: Option<(usize, usize)>,
}

impl SpanCollector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_import(&mut self, start: usize, end: usize) {
        self.flush_other();
        self.imports = Some(match self.imports {
            Some((s, e)) => (s, e.max(end)),
            None => (start, end),
        });
    }

    pub(crate) fn push_other(&mut self, start: usize, end: usize) {
        self.flush_imports();
        self.other = Some(match self.other {
            Some((s, e)) => (s, e.max(end)),
            None => (start, end),
        });
    }

    pub(crate) fn push_span(&mut self, span: BlockSpan) {
        self.flush_imports();
        self.flush_other();
        self.spans.push(span);
    }

    fn flush_imports(&mut self) {
        if let Some((start, end)) = self.imports.take() {
            self.spans
                .push(BlockSpan::new(start, end, BlockKind::Section).named("imports"));
        }
    }

    fn flush_other(&mut self) {
        if let Some((start, end)) = self.other.take() {
            self.spans.push(BlockSpan::new(start, end, BlockKind::Mixed));
        }
    }

    pub(crate) fn finish(mut self) -> Vec<BlockSpan> {
        self.flush_imports();
        self.flush_other();
        self.spans
    }
}

/// How a top-level node maps onto a block.
enum NodeRole {
    Definition(BlockKind),
    Import,
    Other,
}

/// Tree-sitter partitioner for JavaScript, TypeScript, Rust, Go and C++.
pub struct TreeSitterPartitioner {
    overlap_lines: usize,
}

impl TreeSitterPartitioner {
    pub fn new(overlap_lines: usize) -> Self {
        Self { overlap_lines }
    }

    fn role(language: Language, kind: &str) -> NodeRole {
        use BlockKind::*;
        match (language, kind) {
            (Language::JavaScript | Language::TypeScript, kind) => match kind {
                "function_declaration" | "generator_function_declaration" => {
                    NodeRole::Definition(Function)
                }
                "class_declaration"
                | "abstract_class_declaration"
                | "interface_declaration"
                | "enum_declaration"
                | "type_alias_declaration" => NodeRole::Definition(Class),
                "module" | "internal_module" => NodeRole::Definition(Section),
                "import_statement" => NodeRole::Import,
                _ => NodeRole::Other,
            },
            (Language::Rust, kind) => match kind {
                "function_item" | "macro_definition" => NodeRole::Definition(Function),
                "struct_item" | "enum_item" | "trait_item" | "impl_item" | "union_item" => {
                    NodeRole::Definition(Class)
                }
                "mod_item" => NodeRole::Definition(Section),
                "use_declaration" | "extern_crate_declaration" => NodeRole::Import,
                _ => NodeRole::Other,
            },
            (Language::Go, kind) => match kind {
                "function_declaration" | "method_declaration" => NodeRole::Definition(Function),
                "type_declaration" => NodeRole::Definition(Class),
                "import_declaration" => NodeRole::Import,
                _ => NodeRole::Other,
            },
            (Language::Cpp, kind) => match kind {
                "function_definition" => NodeRole::Definition(Function),
                "class_specifier" | "struct_specifier" | "enum_specifier" | "union_specifier" => {
                    NodeRole::Definition(Class)
                }
                "namespace_definition" => NodeRole::Definition(Section),
                "preproc_include" | "using_declaration" => NodeRole::Import,
                _ => NodeRole::Other,
            },
            _ => NodeRole::Other,
        }
    }

    /// Look through wrappers (`export`, `template`) to the declaration they carry.
    fn unwrap_declaration<'t>(language: Language, node: Node<'t>) -> Node<'t> {
        match (language, node.kind()) {
            (Language::JavaScript | Language::TypeScript, "export_statement") => node
                .child_by_field_name("declaration")
                .unwrap_or(node),
            (Language::Cpp, "template_declaration") => {
                let mut cursor = node.walk();
                let inner = node
                    .named_children(&mut cursor)
                    .filter(|child| child.kind() != "template_parameter_list")
                    .last();
                inner.unwrap_or(node)
            }
            _ => node,
        }
    }

    /// `const f = () => ...` style definitions.
    fn is_function_binding(node: &Node) -> bool {
        if !matches!(node.kind(), "lexical_declaration" | "variable_declaration") {
            return false;
        }
        let mut cursor = node.walk();
        let result = node.named_children(&mut cursor).any(|declarator| {
            declarator
                .child_by_field_name("value")
                .map(|value| {
                    matches!(
                        value.kind(),
                        "arrow_function" | "function_expression" | "function" | "generator_function"
                    )
                })
                .unwrap_or(false)
        });
        result
    }

    fn definition_name(node: &Node, source: &str) -> Option<String> {
        if let Some(name) = field_text(node, "name", source) {
            return Some(name.to_string());
        }

        match node.kind() {
            "impl_item" => field_text(node, "type", source).map(str::to_string),
            "type_declaration" | "lexical_declaration" | "variable_declaration" => {
                let mut cursor = node.walk();
                let first = node.named_children(&mut cursor).next();
                first.and_then(|spec| field_text(&spec, "name", source).map(str::to_string))
            }
            "function_definition" => {
                let mut declarator = node.child_by_field_name("declarator");
                while let Some(current) = declarator {
                    match current.kind() {
                        "identifier" | "field_identifier" | "qualified_identifier"
                        | "destructor_name" | "operator_name" => {
                            return current
                                .utf8_text(source.as_bytes())
                                .ok()
                                .map(str::to_string);
                        }
                        _ => declarator = current.child_by_field_name("declarator"),
                    }
                }
                None
            }
            _ => None,
        }
    }
}

impl Partitioner for TreeSitterPartitioner {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Tree
    }

    fn supports(&self, language: Language) -> bool {
        matches!(
            language,
            Language::JavaScript
                | Language::TypeScript
                | Language::Rust
                | Language::Go
                | Language::Cpp
        )
    }

    fn partition(
        &self,
        file_path: &str,
        content: &str,
        language: Language,
    ) -> StrategyResult<PartitionResult> {
        if !self.supports(language) {
            return Err(StrategyError::unavailable(language));
        }
        if content.trim().is_empty() {
            return Err(StrategyError::Empty);
        }

        let tree = parse_tree(file_path, content, language)?;
        let root = tree.root_node();
        check_error_budget(&root, content)?;

        let mut collector = SpanCollector::new();
        let mut cursor = root.walk();
        for outer in root.named_children(&mut cursor) {
            let (start, end) = node_line_range(&outer);
            let node = Self::unwrap_declaration(language, outer);

            let role = if Self::is_function_binding(&node) {
                NodeRole::Definition(BlockKind::Function)
            } else {
                Self::role(language, node.kind())
            };

            match role {
                NodeRole::Definition(kind) => {
                    let mut span = BlockSpan::new(start, end, kind)
                        .with_complexity(complexity(&node))
                        .with_metadata("node_kind", serde_json::json!(node.kind()));
                    if let Some(name) = Self::definition_name(&node, content) {
                        span = span.named(name);
                    }
                    if outer.kind() == "export_statement" {
                        span = span.with_metadata("exported", serde_json::json!(true));
                    }
                    collector.push_span(span);
                }
                NodeRole::Import => collector.push_import(start, end),
                NodeRole::Other => collector.push_other(start, end),
            }
        }

        let spans = collector.finish();
        if spans.is_empty() {
            return Err(StrategyError::Empty);
        }

        let assembler = BlockAssembler::new(content, StrategyKind::Tree, self.overlap_lines);
        let blocks = assembler.assemble(spans);
        Ok(PartitionResult::new(
            file_path,
            language,
            StrategyKind::Tree,
            blocks,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partition(path: &str, content: &str, language: Language) -> PartitionResult {
        TreeSitterPartitioner::new(0)
            .partition(path, content, language)
            .unwrap()
    }

    #[test]
    fn test_python_is_not_supported() {
        let partitioner = TreeSitterPartitioner::new(0);
        assert!(!partitioner.supports(Language::Python));
        assert!(matches!(
            partitioner.partition("a.py", "x = 1", Language::Python),
            Err(StrategyError::Unavailable { .. })
        ));
    }

    #[test]
    fn test_rust_items() {
        let content = "use std::fmt;\nuse std::io;\n\nstruct Point {\n    x: i32,\n}\n\nimpl Point {\n    fn new() -> Self {\n        Point { x: 0 }\n    }\n}\n\nfn main() {\n    if true {}\n}\n";
        let result = partition("main.rs", content, Language::Rust);

        let names: Vec<_> = result.blocks.iter().map(|b| b.name.clone()).collect();
        assert_eq!(
            names,
            vec![
                Some("imports".to_string()),
                Some("Point".to_string()),
                Some("Point".to_string()),
                Some("main".to_string()),
            ]
        );
        assert_eq!(result.blocks[1].kind, BlockKind::Class);
        assert_eq!(result.blocks[3].kind, BlockKind::Function);
        assert_eq!(result.blocks[3].complexity, Some(2.0));
        assert_eq!(result.reconstruct(), content);
    }

    #[test]
    fn test_javascript_exports_and_arrow_functions() {
        let content = "import x from './x';\n\nexport function a() {}\n\nconst b = () => 1;\n\nexport class C {}\n";
        let result = partition("mod.js", content, Language::JavaScript);

        let functions: Vec<_> = result
            .blocks
            .iter()
            .filter(|b| b.kind == BlockKind::Function)
            .filter_map(|b| b.name.as_deref())
            .collect();
        assert_eq!(functions, vec!["a", "b"]);

        let class = result
            .blocks
            .iter()
            .find(|b| b.kind == BlockKind::Class)
            .unwrap();
        assert_eq!(class.name.as_deref(), Some("C"));
        assert_eq!(class.metadata.get("exported"), Some(&serde_json::json!(true)));
    }

    #[test]
    fn test_go_declarations() {
        let content = "package main\n\nimport \"fmt\"\n\ntype Server struct{}\n\nfunc (s *Server) Run() {\n\tfmt.Println(1)\n}\n";
        let result = partition("main.go", content, Language::Go);

        assert!(result
            .blocks
            .iter()
            .any(|b| b.kind == BlockKind::Class && b.name.as_deref() == Some("Server")));
        assert!(result
            .blocks
            .iter()
            .any(|b| b.kind == BlockKind::Function && b.name.as_deref() == Some("Run")));
        assert_eq!(result.reconstruct(), content);
    }

    #[test]
    fn test_node_line_range_is_one_based() {
        let tree = parse_tree("a.rs", "fn a() {}\nfn b() {}\n", Language::Rust).unwrap();
        let root = tree.root_node();
        let mut cursor = root.walk();
        let ranges: Vec<_> = root
            .named_children(&mut cursor)
            .map(|n| node_line_range(&n))
            .collect();
        assert_eq!(ranges, vec![(1, 1), (2, 2)]);
    }
}
