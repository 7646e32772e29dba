//! Regex/heuristic partitioner.
//!
//! Each language has a small set of line-anchored definition patterns. A
//! definition's extent is found by brace matching or, for indentation-scoped
//! languages, by indentation; nested definitions are absorbed by their parent
//! during block assembly.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::lang::Language;
use crate::partition::{
    BlockAssembler, BlockKind, BlockSpan, PartitionResult, Partitioner, StrategyError,
    StrategyKind, StrategyResult,
};

/// How the end of a definition is located.
#[derive(Debug, Clone, Copy)]
enum EndRule {
    /// Balanced `{` / `}`
    Braces,
    /// Deeper indentation, optionally closed by a keyword at the same indent
    Indent { closing: Option<&'static str> },
}

struct DefinitionPattern {
    regex: Regex,
    kind: BlockKind,
}

struct LanguagePatterns {
    definitions: Vec<DefinitionPattern>,
    /// Lines (decorators, attributes) that belong to the definition below them
    prefix: Option<Regex>,
    end_rule: EndRule,
    /// Captured names that are really control-flow keywords
    reserved: &'static [&'static str],
}

const C_FAMILY_RESERVED: &[&str] = &[
    "if", "while", "for", "switch", "return", "sizeof", "catch", "else", "do", "new",
];

fn compile(pattern: &str) -> Option<Regex> {
    Regex::new(pattern).ok()
}

fn definitions(specs: &[(&str, BlockKind)]) -> Vec<DefinitionPattern> {
    specs
        .iter()
        .filter_map(|(pattern, kind)| {
            compile(pattern).map(|regex| DefinitionPattern { regex, kind: *kind })
        })
        .collect()
}

const JS_DEFINITIONS: &[(&str, BlockKind)] = &[
    (
        r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\*?\s+(?P<name>[\w$]+)",
        BlockKind::Function,
    ),
    (
        r"^\s*(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+(?P<name>[\w$]+)",
        BlockKind::Class,
    ),
    (
        r"^\s*(?:export\s+)?(?:const|let|var)\s+(?P<name>[\w$]+)\s*=\s*(?:async\s+)?(?:function\b|\([^)]*\)\s*=>|[\w$]+\s*=>)",
        BlockKind::Function,
    ),
];

const TS_EXTRA_DEFINITIONS: &[(&str, BlockKind)] = &[
    (
        r"^\s*(?:export\s+)?(?:declare\s+)?interface\s+(?P<name>\w+)",
        BlockKind::Class,
    ),
    (
        r"^\s*(?:export\s+)?(?:declare\s+)?(?:const\s+)?enum\s+(?P<name>\w+)",
        BlockKind::Class,
    ),
    (
        r"^\s*(?:export\s+)?(?:declare\s+)?namespace\s+(?P<name>[\w.]+)",
        BlockKind::Section,
    ),
];

const C_DEFINITIONS: &[(&str, BlockKind)] = &[
    (
        r"^(?:static\s+|inline\s+|extern\s+)*[A-Za-z_][\w\s\*]*?[\s\*](?P<name>[A-Za-z_]\w*)\s*\([^;]*$",
        BlockKind::Function,
    ),
    (
        r"^(?:typedef\s+)?(?:struct|union|enum)\s+(?P<name>\w+)\s*\{?\s*$",
        BlockKind::Class,
    ),
];

const CPP_EXTRA_DEFINITIONS: &[(&str, BlockKind)] = &[
    (
        r"^(?:template\s*<[^>]*>\s*)?(?:[\w:<>,\*&\s]+?[\s\*&])?(?P<name>[\w:~]+::[\w~]+)\s*\([^;]*$",
        BlockKind::Function,
    ),
    (
        r"^\s*(?:template\s*<[^>]*>\s*)?(?:class|struct)\s+(?P<name>\w+)[^;]*$",
        BlockKind::Class,
    ),
    (r"^\s*namespace\s+(?P<name>[\w:]+)\s*\{?", BlockKind::Section),
];

static PATTERNS: Lazy<HashMap<Language, LanguagePatterns>> = Lazy::new(|| {
    let mut table = HashMap::new();

    table.insert(
        Language::Python,
        LanguagePatterns {
            definitions: definitions(&[
                (r"^(\s*)(?:async\s+)?def\s+(?P<name>\w+)", BlockKind::Function),
                (r"^(\s*)class\s+(?P<name>\w+)", BlockKind::Class),
            ]),
            prefix: compile(r"^\s*@"),
            end_rule: EndRule::Indent { closing: None },
            reserved: &[],
        },
    );

    table.insert(
        Language::JavaScript,
        LanguagePatterns {
            definitions: definitions(JS_DEFINITIONS),
            prefix: compile(r"^\s*@\w"),
            end_rule: EndRule::Braces,
            reserved: &[],
        },
    );

    let mut ts_specs: Vec<(&str, BlockKind)> = JS_DEFINITIONS.to_vec();
    ts_specs.extend_from_slice(TS_EXTRA_DEFINITIONS);
    table.insert(
        Language::TypeScript,
        LanguagePatterns {
            definitions: definitions(&ts_specs),
            prefix: compile(r"^\s*@\w"),
            end_rule: EndRule::Braces,
            reserved: &[],
        },
    );

    table.insert(
        Language::Rust,
        LanguagePatterns {
            definitions: definitions(&[
                (
                    r#"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?(?:extern\s+"[^"]*"\s+)?fn\s+(?P<name>\w+)"#,
                    BlockKind::Function,
                ),
                (
                    r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:struct|enum|trait|union)\s+(?P<name>\w+)",
                    BlockKind::Class,
                ),
                (
                    r"^\s*(?:unsafe\s+)?impl(?:<[^>]*>)?\s+(?:[\w:<>, ]+\s+for\s+)?(?P<name>\w+)",
                    BlockKind::Class,
                ),
                (
                    r"^\s*(?:pub(?:\([^)]*\))?\s+)?mod\s+(?P<name>\w+)\s*\{",
                    BlockKind::Section,
                ),
            ]),
            prefix: compile(r"^\s*#\["),
            end_rule: EndRule::Braces,
            reserved: &[],
        },
    );

    table.insert(
        Language::Go,
        LanguagePatterns {
            definitions: definitions(&[
                (
                    r"^func\s+(?:\([^)]*\)\s*)?(?P<name>\w+)",
                    BlockKind::Function,
                ),
                (
                    r"^type\s+(?P<name>\w+)\s+(?:struct|interface)\b",
                    BlockKind::Class,
                ),
            ]),
            prefix: None,
            end_rule: EndRule::Braces,
            reserved: &[],
        },
    );

    table.insert(
        Language::Java,
        LanguagePatterns {
            definitions: definitions(&[
                (
                    r"^\s*(?:(?:public|protected|private|static|final|abstract|sealed|strictfp)\s+)*(?:class|interface|enum|record|@interface)\s+(?P<name>\w+)",
                    BlockKind::Class,
                ),
                (
                    r"^\s*(?:(?:public|protected|private|static|final|abstract|synchronized|native|default)\s+)+(?:<[^>]+>\s+)?[\w<>\[\],.? ]+\s+(?P<name>\w+)\s*\(",
                    BlockKind::Function,
                ),
            ]),
            prefix: compile(r"^\s*@\w"),
            end_rule: EndRule::Braces,
            reserved: C_FAMILY_RESERVED,
        },
    );

    table.insert(
        Language::C,
        LanguagePatterns {
            definitions: definitions(C_DEFINITIONS),
            prefix: None,
            end_rule: EndRule::Braces,
            reserved: C_FAMILY_RESERVED,
        },
    );

    let mut cpp_specs: Vec<(&str, BlockKind)> = CPP_EXTRA_DEFINITIONS.to_vec();
    cpp_specs.extend_from_slice(C_DEFINITIONS);
    table.insert(
        Language::Cpp,
        LanguagePatterns {
            definitions: definitions(&cpp_specs),
            prefix: compile(r"^\s*template\s*<[^>]*>\s*$"),
            end_rule: EndRule::Braces,
            reserved: C_FAMILY_RESERVED,
        },
    );

    table.insert(
        Language::CSharp,
        LanguagePatterns {
            definitions: definitions(&[
                (
                    r"^\s*(?:(?:public|protected|private|internal|static|sealed|abstract|partial|readonly)\s+)*(?:class|interface|struct|enum|record)\s+(?P<name>\w+)",
                    BlockKind::Class,
                ),
                (
                    r"^\s*namespace\s+(?P<name>[\w.]+)",
                    BlockKind::Section,
                ),
                (
                    r"^\s*(?:(?:public|protected|private|internal|static|virtual|override|abstract|async|sealed|extern)\s+)+[\w<>\[\],.? ]+\s+(?P<name>\w+)\s*\(",
                    BlockKind::Function,
                ),
            ]),
            prefix: compile(r"^\s*\[\w"),
            end_rule: EndRule::Braces,
            reserved: C_FAMILY_RESERVED,
        },
    );

    table.insert(
        Language::Ruby,
        LanguagePatterns {
            definitions: definitions(&[
                (r"^\s*def\s+(?P<name>[\w.?!=]+)", BlockKind::Function),
                (r"^\s*(?:class|module)\s+(?P<name>[\w:]+)", BlockKind::Class),
            ]),
            prefix: None,
            end_rule: EndRule::Indent {
                closing: Some("end"),
            },
            reserved: &[],
        },
    );

    table.insert(
        Language::Php,
        LanguagePatterns {
            definitions: definitions(&[
                (
                    r"^\s*(?:(?:public|private|protected|static|abstract|final)\s+)*function\s+(?P<name>\w+)",
                    BlockKind::Function,
                ),
                (
                    r"^\s*(?:abstract\s+|final\s+)?(?:class|interface|trait|enum)\s+(?P<name>\w+)",
                    BlockKind::Class,
                ),
            ]),
            prefix: compile(r"^\s*#\["),
            end_rule: EndRule::Braces,
            reserved: &[],
        },
    );

    table.insert(
        Language::Shell,
        LanguagePatterns {
            definitions: definitions(&[
                (
                    r"^\s*function\s+(?P<name>[\w-]+)",
                    BlockKind::Function,
                ),
                (r"^\s*(?P<name>[\w-]+)\s*\(\)", BlockKind::Function),
            ]),
            prefix: None,
            end_rule: EndRule::Braces,
            reserved: &[],
        },
    );

    table
});

fn indentation(line: &str) -> usize {
    line.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

/// Net change in bracket depth for `chars`.
fn bracket_delta(line: &str, open: char, close: char) -> i64 {
    line.chars().fold(0, |depth, c| {
        if c == open {
            depth + 1
        } else if c == close {
            depth - 1
        } else {
            depth
        }
    })
}

/// Regex-driven partitioner.
pub struct PatternPartitioner {
    overlap_lines: usize,
}

impl PatternPartitioner {
    pub fn new(overlap_lines: usize) -> Self {
        Self { overlap_lines }
    }

    /// Last line (0-based) of every brace-delimited definition in `starts`
    /// (ascending), found in one forward pass.
    ///
    /// A definition closes on the first line, at or after its first `{`,
    /// where the brace depth falls back to the depth it started at. One that
    /// reaches a `;` line before any `{` is a declaration and ends there.
    fn brace_ends(lines: &[&str], starts: &[usize]) -> Vec<usize> {
        let last = lines.len().saturating_sub(1);
        let mut ends = vec![last; starts.len()];
        // (definition index, depth before its first line)
        let mut unopened: Vec<(usize, i64)> = Vec::new();
        let mut open: Vec<(usize, i64)> = Vec::new();
        let mut next_start = starts.iter().copied().enumerate().peekable();
        let mut depth: i64 = 0;

        for (idx, line) in lines.iter().enumerate() {
            while let Some((def, _)) = next_start.next_if(|(_, start)| *start == idx) {
                unopened.push((def, depth));
            }

            let has_open = line.contains('{');
            depth += bracket_delta(line, '{', '}');

            if has_open {
                // depth at open time is above every baseline already on the
                // stack, so pushing in ascending baseline order keeps it sorted
                unopened.sort_by_key(|(_, baseline)| *baseline);
                for (def, baseline) in unopened.drain(..) {
                    if depth <= baseline {
                        ends[def] = idx;
                    } else {
                        open.push((def, baseline));
                    }
                }
            } else if line.trim_end().ends_with(';') {
                for (def, _) in unopened.drain(..) {
                    ends[def] = idx;
                }
            }

            while let Some(&(def, baseline)) = open.last() {
                if depth > baseline {
                    break;
                }
                ends[def] = idx;
                open.pop();
            }
        }
        ends
    }

    /// Last line (0-based) of an indentation-scoped definition starting at `start`.
    fn indent_end(lines: &[&str], start: usize, closing: Option<&str>) -> usize {
        let base = indentation(lines[start]);
        let mut parens = bracket_delta(lines[start], '(', ')');
        let mut end = start;

        for (idx, line) in lines.iter().enumerate().skip(start + 1) {
            if parens > 0 {
                parens += bracket_delta(line, '(', ')');
                end = idx;
                continue;
            }
            if line.trim().is_empty() {
                continue;
            }
            let indent = indentation(line);
            if indent > base {
                end = idx;
                continue;
            }
            if let Some(keyword) = closing {
                let trimmed = line.trim();
                if indent == base
                    && (trimmed == keyword || trimmed.starts_with(&format!("{keyword} ")))
                {
                    end = idx;
                }
            }
            break;
        }
        end
    }

    fn find_spans(patterns: &LanguagePatterns, lines: &[&str]) -> Vec<BlockSpan> {
        let definitions: Vec<(usize, BlockKind, String)> = lines
            .iter()
            .enumerate()
            .filter_map(|(idx, line)| {
                patterns.definitions.iter().find_map(|def| {
                    let caps = def.regex.captures(line)?;
                    let name = caps.name("name")?.as_str();
                    if patterns.reserved.contains(&name) {
                        return None;
                    }
                    Some((idx, def.kind, name.to_string()))
                })
            })
            .collect();

        let ends = match patterns.end_rule {
            EndRule::Braces => {
                let starts: Vec<usize> = definitions.iter().map(|(idx, _, _)| *idx).collect();
                Self::brace_ends(lines, &starts)
            }
            EndRule::Indent { closing } => definitions
                .iter()
                .map(|(idx, _, _)| Self::indent_end(lines, *idx, closing))
                .collect(),
        };

        definitions
            .into_iter()
            .zip(ends)
            .map(|((idx, kind, name), end)| {
                let mut start = idx;
                if let Some(prefix) = &patterns.prefix {
                    while start > 0 && prefix.is_match(lines[start - 1]) {
                        start -= 1;
                    }
                }
                BlockSpan::new(start + 1, end + 1, kind)
                    .named(name)
                    .with_metadata("indent", serde_json::json!(indentation(lines[idx])))
            })
            .collect()
    }
}

impl Partitioner for PatternPartitioner {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Pattern
    }

    fn supports(&self, language: Language) -> bool {
        PATTERNS.contains_key(&language)
    }

    fn partition(
        &self,
        file_path: &str,
        content: &str,
        language: Language,
    ) -> StrategyResult<PartitionResult> {
        let Some(patterns) = PATTERNS.get(&language) else {
            return Err(StrategyError::unavailable(language));
        };

        let lines: Vec<&str> = content.lines().collect();
        let spans = Self::find_spans(patterns, &lines);
        if spans.is_empty() {
            return Err(StrategyError::Empty);
        }

        let assembler = BlockAssembler::new(content, StrategyKind::Pattern, self.overlap_lines);
        let blocks = assembler.assemble(spans);
        Ok(PartitionResult::new(
            file_path,
            language,
            StrategyKind::Pattern,
            blocks,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named_blocks(content: &str, language: Language) -> Vec<(BlockKind, String)> {
        PatternPartitioner::new(0)
            .partition("file", content, language)
            .unwrap()
            .blocks
            .into_iter()
            .filter_map(|b| b.name.map(|name| (b.kind, name)))
            .collect()
    }

    #[test]
    fn test_python_indentation_and_decorators() {
        let content = "import os\n\n@decorator\ndef a(\n    x,\n):\n    return x\n\nclass B:\n    def c(self):\n        pass\n\nprint(a(1))\n";
        let result = PatternPartitioner::new(0)
            .partition("m.py", content, Language::Python)
            .unwrap();

        let named: Vec<_> = result
            .blocks
            .iter()
            .filter_map(|b| b.name.as_deref())
            .collect();
        // c is absorbed by B
        assert_eq!(named, vec!["a", "B"]);

        let a = result.blocks.iter().find(|b| b.name.as_deref() == Some("a")).unwrap();
        assert_eq!(a.location.start_line, 3);
        assert!(a.content.contains("return x"));
        assert_eq!(result.reconstruct(), content);
    }

    #[test]
    fn test_brace_matching() {
        let content = "package main\n\nfunc a() {\n\tif x {\n\t}\n}\n\ntype T struct {\n\tX int\n}\n";
        let blocks = PatternPartitioner::new(0)
            .partition("a.go", content, Language::Go)
            .unwrap()
            .blocks;

        let a = blocks.iter().find(|b| b.name.as_deref() == Some("a")).unwrap();
        assert_eq!((a.location.start_line, a.location.end_line), (3, 7));
        let t = blocks.iter().find(|b| b.name.as_deref() == Some("T")).unwrap();
        assert_eq!(t.kind, BlockKind::Class);
    }

    #[test]
    fn test_ruby_closing_keyword() {
        let content = "class Foo\n  def bar\n    1\n  end\nend\n\nputs Foo.new.bar\n";
        let blocks = PatternPartitioner::new(0)
            .partition("a.rb", content, Language::Ruby)
            .unwrap()
            .blocks;

        assert_eq!(blocks[0].name.as_deref(), Some("Foo"));
        assert_eq!(blocks[0].location.end_line, 6);
        assert_eq!(blocks[1].kind, BlockKind::Mixed);
    }

    #[test]
    fn test_c_skips_control_flow() {
        let content = "#include <stdio.h>\n\nint main(void)\n{\n    if (x) {\n    }\n    return 0;\n}\n";
        assert_eq!(
            named_blocks(content, Language::C),
            vec![(BlockKind::Function, "main".to_string())]
        );
    }

    #[test]
    fn test_java_class_and_methods_absorbed() {
        let content = "public class Greeter {\n    @Override\n    public String toString() {\n        return \"hi\";\n    }\n}\n";
        assert_eq!(
            named_blocks(content, Language::Java),
            vec![(BlockKind::Class, "Greeter".to_string())]
        );
    }

    #[test]
    fn test_unavailable_and_empty() {
        let partitioner = PatternPartitioner::new(0);
        assert!(matches!(
            partitioner.partition("a.md", "# hi", Language::Markdown),
            Err(StrategyError::Unavailable { .. })
        ));
        assert_eq!(
            partitioner
                .partition("a.py", "x = 1\ny = 2\n", Language::Python)
                .unwrap_err(),
            StrategyError::Empty
        );
    }

    #[test]
    fn test_brace_ends_nesting_and_declarations() {
        let lines = [
            "class A {",
            "  void f();",
            "  void g() {",
            "  }",
            "}",
            "int h();",
            "int k()",
            "{",
            "}",
        ];
        assert_eq!(
            PatternPartitioner::brace_ends(&lines, &[0, 1, 2, 5, 6]),
            vec![4, 1, 3, 5, 8]
        );
        assert_eq!(PatternPartitioner::brace_ends(&["fn open() {"], &[0]), vec![0]);
    }

    #[test]
    fn test_many_brace_definitions() {
        let content: String = (0..5_000)
            .map(|i| format!("fn f{i}() {{\n    if x {{ y(); }}\n}}\n"))
            .collect();
        let blocks = PatternPartitioner::new(0)
            .partition("big.rs", &content, Language::Rust)
            .unwrap()
            .blocks;

        assert_eq!(blocks.len(), 5_000);
        let last = blocks.last().unwrap();
        assert_eq!(last.name.as_deref(), Some("f4999"));
        assert_eq!((last.location.start_line, last.location.end_line), (14_998, 15_000));
    }
}
