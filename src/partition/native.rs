//! Native deep analyzer for Python, the primary language.
//!
//! Top-level functions, classes and decorated definitions become blocks; runs
//! of import statements become a single `imports` section and any other
//! statements are grouped into `mixed` blocks. Classes longer than
//! `max_block_lines` are split into a header block plus one block per method.

use tree_sitter::Node;

use crate::lang::Language;
use crate::partition::tree::{
    check_error_budget, complexity, field_text, node_line_range, parse_tree, SpanCollector,
};
use crate::partition::{
    BlockAssembler, BlockKind, BlockSpan, PartitionResult, Partitioner, StrategyError,
    StrategyKind, StrategyResult,
};

const IMPORT_KINDS: &[&str] = &[
    "import_statement",
    "import_from_statement",
    "future_import_statement",
];

pub struct NativePythonPartitioner {
    overlap_lines: usize,
    max_block_lines: usize,
}

impl NativePythonPartitioner {
    pub fn new(overlap_lines: usize, max_block_lines: usize) -> Self {
        Self {
            overlap_lines,
            max_block_lines,
        }
    }

    /// The definition a (possibly decorated) node carries.
    fn definition<'t>(node: Node<'t>) -> Option<Node<'t>> {
        match node.kind() {
            "function_definition" | "class_definition" => Some(node),
            "decorated_definition" => node.child_by_field_name("definition"),
            _ => None,
        }
    }

    fn decorator_count(node: &Node) -> usize {
        if node.kind() != "decorated_definition" {
            return 0;
        }
        let mut cursor = node.walk();
        let count = node
            .named_children(&mut cursor)
            .filter(|child| child.kind() == "decorator")
            .count();
        count
    }

    fn function_span(outer: &Node, function: &Node, source: &str, name: String) -> BlockSpan {
        let (start, end) = node_line_range(outer);
        let is_async = function
            .utf8_text(source.as_bytes())
            .map(|text| text.starts_with("async"))
            .unwrap_or(false);

        let mut span = BlockSpan::new(start, end, BlockKind::Function)
            .named(name)
            .with_complexity(complexity(function));
        if is_async {
            span = span.with_metadata("async", serde_json::json!(true));
        }
        let decorators = Self::decorator_count(outer);
        if decorators > 0 {
            span = span.with_metadata("decorators", serde_json::json!(decorators));
        }
        span
    }

    /// Method nodes (decorated or not) in a class body, with their definitions.
    fn methods<'t>(class: &Node<'t>) -> Vec<(Node<'t>, Node<'t>)> {
        let Some(body) = class.child_by_field_name("body") else {
            return Vec::new();
        };
        let mut cursor = body.walk();
        let methods = body
            .named_children(&mut cursor)
            .filter_map(|child| {
                Self::definition(child)
                    .filter(|def| def.kind() == "function_definition")
                    .map(|def| (child, def))
            })
            .collect();
        methods
    }

    fn push_class(
        &self,
        collector: &mut SpanCollector,
        outer: &Node,
        class: &Node,
        source: &str,
    ) {
        let (start, end) = node_line_range(outer);
        let class_name = field_text(class, "name", source)
            .unwrap_or("<anonymous>")
            .to_string();
        let methods = Self::methods(class);
        let line_count = end - start + 1;

        if line_count <= self.max_block_lines || methods.is_empty() {
            let mut span = BlockSpan::new(start, end, BlockKind::Class)
                .named(class_name)
                .with_complexity(complexity(class))
                .with_metadata("methods", serde_json::json!(methods.len()));
            let decorators = Self::decorator_count(outer);
            if decorators > 0 {
                span = span.with_metadata("decorators", serde_json::json!(decorators));
            }
            collector.push_span(span);
            return;
        }

        let (first_method_start, _) = node_line_range(&methods[0].0);
        let header_end = first_method_start.saturating_sub(1).max(start);
        collector.push_span(
            BlockSpan::new(start, header_end, BlockKind::Class)
                .named(class_name.clone())
                .with_metadata("methods", serde_json::json!(methods.len()))
                .with_metadata("split", serde_json::json!(true)),
        );

        for (method_outer, method) in &methods {
            let method_name = field_text(method, "name", source).unwrap_or("<anonymous>");
            let span = Self::function_span(
                method_outer,
                method,
                source,
                format!("{class_name}.{method_name}"),
            )
            .with_metadata("parent_class", serde_json::json!(class_name));
            collector.push_span(span);
        }
    }
}

impl Partitioner for NativePythonPartitioner {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Native
    }

    fn supports(&self, language: Language) -> bool {
        language == Language::Python
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

        let tree = parse_tree(file_path, content, Language::Python)?;
        let root = tree.root_node();
        check_error_budget(&root, content)?;

        let mut collector = SpanCollector::new();
        let mut cursor = root.walk();
        for node in root.named_children(&mut cursor) {
            let (start, end) = node_line_range(&node);

            if IMPORT_KINDS.contains(&node.kind()) {
                collector.push_import(start, end);
                continue;
            }

            match Self::definition(node) {
                Some(def) if def.kind() == "function_definition" => {
                    let name = field_text(&def, "name", content)
                        .unwrap_or("<anonymous>")
                        .to_string();
                    collector.push_span(Self::function_span(&node, &def, content, name));
                }
                Some(def) => self.push_class(&mut collector, &node, &def, content),
                None => collector.push_other(start, end),
            }
        }

        let spans = collector.finish();
        if spans.is_empty() {
            return Err(StrategyError::Empty);
        }

        let assembler = BlockAssembler::new(content, StrategyKind::Native, self.overlap_lines);
        let blocks = assembler.assemble(spans);
        Ok(PartitionResult::new(
            file_path,
            language,
            StrategyKind::Native,
            blocks,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODULE: &str = r#"import os
import sys
from typing import List

CONSTANT = 1


@cached
def helper(x):
    if x:
        return 1
    elif x is None:
        return 2
    return 3


class Widget:
    size = 3

    def grow(self):
        for _ in range(3):
            self.size += 1

    async def shrink(self):
        pass


main = helper(2)
"#;

    fn blocks(max_block_lines: usize) -> PartitionResult {
        NativePythonPartitioner::new(2, max_block_lines)
            .partition("widget.py", MODULE, Language::Python)
            .unwrap()
    }

    #[test]
    fn test_top_level_blocks() {
        let result = blocks(200);
        let summary: Vec<_> = result
            .blocks
            .iter()
            .map(|b| (b.kind, b.name.clone()))
            .collect();

        assert_eq!(
            summary,
            vec![
                (BlockKind::Section, Some("imports".to_string())),
                (BlockKind::Mixed, None),
                (BlockKind::Function, Some("helper".to_string())),
                (BlockKind::Class, Some("Widget".to_string())),
                (BlockKind::Mixed, None),
            ]
        );
        assert_eq!(result.strategy_used, StrategyKind::Native);
        assert_eq!(result.reconstruct(), MODULE);
    }

    #[test]
    fn test_decorated_function_metadata() {
        let result = blocks(200);
        let helper = &result.blocks[2];

        assert!(helper.content.starts_with("@cached"));
        assert_eq!(helper.complexity, Some(3.0));
        assert_eq!(helper.metadata.get("decorators"), Some(&serde_json::json!(1)));
    }

    #[test]
    fn test_large_class_split_per_method() {
        let result = blocks(5);
        let names: Vec<_> = result
            .blocks
            .iter()
            .filter_map(|b| b.name.as_deref())
            .collect();

        assert!(names.contains(&"Widget"));
        assert!(names.contains(&"Widget.grow"));
        assert!(names.contains(&"Widget.shrink"));

        let shrink = result
            .blocks
            .iter()
            .find(|b| b.name.as_deref() == Some("Widget.shrink"))
            .unwrap();
        assert_eq!(shrink.metadata.get("async"), Some(&serde_json::json!(true)));
        assert_eq!(result.reconstruct(), MODULE);
    }

    #[test]
    fn test_empty_input_is_empty_error() {
        let partitioner = NativePythonPartitioner::new(0, 200);
        assert_eq!(
            partitioner
                .partition("e.py", "  \n\n", Language::Python)
                .unwrap_err(),
            StrategyError::Empty
        );
    }

    #[test]
    fn test_other_languages_unavailable() {
        let partitioner = NativePythonPartitioner::new(0, 200);
        assert!(matches!(
            partitioner.partition("a.rs", "fn a() {}", Language::Rust),
            Err(StrategyError::Unavailable { .. })
        ));
    }
}
