//! Import statement extraction.
//!
//! Python goes through a tree-sitter walk that sees imports at any nesting
//! depth; when the tree cannot be built it falls back to a line scan. Every
//! other language is scanned with per-language patterns over the whole buffer.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;
use tree_sitter::Node;

use crate::core::location::LocationTracker;
use crate::imports::RawImport;
use crate::lang::registry::create_parser;
use crate::lang::Language;

static PY_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*import\s+([\w.]+(?:\s+as\s+\w+)?(?:\s*,\s*[\w.]+(?:\s+as\s+\w+)?)*)").expect("valid import pattern"));
static PY_FROM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*from\s+(\.*)([\w.]*)\s+import\s+(.+)$").expect("valid import pattern"));

static JS_FROM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^\s*(?:import|export)\b[^;'"]*?\bfrom\s*['"]([^'"]+)['"]"#).expect("valid import pattern")
});
static JS_SIDE_EFFECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^\s*import\s*['"]([^'"]+)['"]"#).expect("valid import pattern"));
static JS_REQUIRE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\b(?:require|import)\s*\(\s*['"]([^'"]+)['"]\s*\)"#).expect("valid import pattern")
});

static GO_SINGLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^\s*import\s+(?:[\w.]+\s+)?"([^"]+)""#).expect("valid import pattern"));
static GO_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?ms)^\s*import\s*\((.*?)\)").expect("valid import pattern"));
static GO_SPEC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^\s*(?:[\w.]+\s+)?"([^"]+)""#).expect("valid import pattern"));

static RUST_USE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?use\s+((?:::)?[\w]+(?:::\w+)*)").expect("valid import pattern")
});
static RUST_MOD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?mod\s+(\w+)\s*;").expect("valid import pattern"));
static RUST_EXTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*extern\s+crate\s+(\w+)").expect("valid import pattern"));

static C_INCLUDE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^\s*#\s*include\s*([<"])([^>"]+)[>"]"#).expect("valid import pattern"));
static JAVA_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*import\s+(?:static\s+)?([\w.]+(?:\.\*)?)\s*;").expect("valid import pattern"));
static RUBY_REQUIRE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^\s*(require|require_relative|load)\s*\(?\s*['"]([^'"]+)['"]"#).expect("valid import pattern")
});

/// Split a `./a/b` or `../../a` path into (level, rest).
pub fn split_relative_path(spec: &str) -> (usize, String) {
    let mut level = 0;
    let mut rest = spec;
    if let Some(stripped) = rest.strip_prefix("./") {
        level = 1;
        rest = stripped;
    }
    while let Some(stripped) = rest.strip_prefix("../") {
        level = level.max(1) + 1;
        rest = stripped;
    }
    if rest == ".." {
        level = level.max(1) + 1;
        rest = "";
    } else if rest == "." {
        level = level.max(1);
        rest = "";
    }
    (level, rest.to_string())
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ImportExtractor;

impl ImportExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Ordered imports of `content`.
    pub fn extract(&self, path: &Path, content: &str, language: Language) -> Vec<RawImport> {
        match language {
            Language::Python => match self.extract_python_tree(path, content) {
                Some(imports) => imports,
                None => {
                    debug!(file = %path.display(), "Import tree walk unavailable, scanning lines");
                    self.extract_python_lines(content)
                }
            },
            Language::JavaScript | Language::TypeScript => self.extract_javascript(content),
            Language::Go => self.extract_go(content),
            Language::Rust => self.extract_rust(content),
            Language::C | Language::Cpp => self.extract_includes(content),
            Language::Java => scan(&JAVA_IMPORT, content, |caps| {
                caps.get(1).map(|m| RawImport::new(m.as_str(), 0, 0))
            }),
            Language::Ruby => scan(&RUBY_REQUIRE, content, |caps| {
                let spec = caps.get(2)?.as_str();
                if caps.get(1).map(|m| m.as_str()) == Some("require_relative") {
                    let (level, rest) = split_relative_path(spec);
                    Some(RawImport::new(rest, level.max(1), 0))
                } else {
                    let (level, rest) = split_relative_path(spec);
                    Some(RawImport::new(rest, level, 0))
                }
            }),
            _ => Vec::new(),
        }
    }

    /// Tree-sitter walk over every import statement; `None` when no tree is
    /// available or the tree is mostly errors.
    pub fn extract_python_tree(&self, path: &Path, content: &str) -> Option<Vec<RawImport>> {
        let mut parser = create_parser(Language::Python, &path.display().to_string()).ok()?;
        let tree = parser.parse(content, None)?;
        let root = tree.root_node();
        if root.has_error() && crate::partition::tree::error_coverage(&root) * 2 > content.len() {
            return None;
        }

        let mut imports = Vec::new();
        collect_python_imports(root, content, &mut imports);
        Some(imports)
    }

    /// Line-scan fallback for Python.
    pub fn extract_python_lines(&self, content: &str) -> Vec<RawImport> {
        let import_re = &*PY_IMPORT;
        let from_re = &*PY_FROM;

        let lines: Vec<&str> = content.lines().collect();
        let mut imports = Vec::new();
        let mut idx = 0;
        while idx < lines.len() {
            let line = strip_comment(lines[idx]);
            let line_no = idx + 1;
            idx += 1;

            if let Some(caps) = from_re.captures(line) {
                let level = caps.get(1).map(|m| m.as_str().len()).unwrap_or(0);
                let module = caps.get(2).map(|m| m.as_str()).unwrap_or("").to_string();
                let mut names = caps.get(3).map(|m| m.as_str()).unwrap_or("").to_string();

                // Parenthesised or backslash-continued name lists
                let opens_paren = names.contains('(') && !names.contains(')');
                let mut continued = names.trim_end().ends_with('\\');
                while (opens_paren && !names.contains(')') || continued) && idx < lines.len() {
                    names.push(' ');
                    names.push_str(strip_comment(lines[idx]));
                    continued = lines[idx].trim_end().ends_with('\\');
                    idx += 1;
                }

                for (name, alias) in split_names(&names) {
                    let mut raw = RawImport::new(module.clone(), level, line_no)
                        .with_name(name)
                        .with_statement(lines[line_no - 1].trim());
                    if let Some(alias) = alias {
                        raw = raw.with_alias(alias);
                    }
                    imports.push(raw);
                }
                continue;
            }

            if let Some(caps) = import_re.captures(line) {
                let list = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                for (module, alias) in split_names(list) {
                    let mut raw = RawImport::new(module, 0, line_no).with_statement(line.trim());
                    if let Some(alias) = alias {
                        raw = raw.with_alias(alias);
                    }
                    imports.push(raw);
                }
            }
        }
        imports
    }

    fn extract_javascript(&self, content: &str) -> Vec<RawImport> {
        let tracker = LocationTracker::new(content);
        let mut found: Vec<(usize, RawImport)> = Vec::new();

        for regex in [&*JS_FROM, &*JS_SIDE_EFFECT, &*JS_REQUIRE] {
            for caps in regex.captures_iter(content) {
                let (Some(whole), Some(spec)) = (caps.get(0), caps.get(1)) else {
                    continue;
                };
                if found.iter().any(|(offset, _)| *offset == spec.start()) {
                    continue;
                }
                let line = tracker.line_of_byte(spec.start());
                let (level, rest) = split_relative_path(spec.as_str());
                let module = if level > 0 { rest } else { spec.as_str().to_string() };
                found.push((
                    spec.start(),
                    RawImport::new(module, level, line)
                        .with_statement(first_line(whole.as_str())),
                ));
            }
        }

        found.sort_by_key(|(offset, _)| *offset);
        found.into_iter().map(|(_, raw)| raw).collect()
    }

    fn extract_go(&self, content: &str) -> Vec<RawImport> {
        let tracker = LocationTracker::new(content);
        let mut found: Vec<(usize, RawImport)> = Vec::new();

        for block in GO_BLOCK.captures_iter(content) {
            let Some(body) = block.get(1) else {
                continue;
            };
            for spec in GO_SPEC.captures_iter(body.as_str()) {
                if let Some(path) = spec.get(1) {
                    let offset = body.start() + path.start();
                    let line = tracker.line_of_byte(offset);
                    found.push((
                        offset,
                        RawImport::new(path.as_str(), 0, line)
                            .with_statement(tracker.line_text(line).trim()),
                    ));
                }
            }
        }

        for caps in GO_SINGLE.captures_iter(content) {
            if let Some(path) = caps.get(1) {
                if found.iter().any(|(offset, _)| *offset == path.start()) {
                    continue;
                }
                let line = tracker.line_of_byte(path.start());
                found.push((
                    path.start(),
                    RawImport::new(path.as_str(), 0, line)
                        .with_statement(tracker.line_text(line).trim()),
                ));
            }
        }

        found.sort_by_key(|(offset, _)| *offset);
        found.into_iter().map(|(_, raw)| raw).collect()
    }

    fn extract_rust(&self, content: &str) -> Vec<RawImport> {
        let tracker = LocationTracker::new(content);
        let mut found: Vec<(usize, RawImport)> = Vec::new();

        for (regex, level) in [(&*RUST_USE, 0), (&*RUST_MOD, 1), (&*RUST_EXTERN, 0)] {
            for caps in regex.captures_iter(content) {
                if let Some(path) = caps.get(1) {
                    let line = tracker.line_of_byte(path.start());
                    found.push((
                        path.start(),
                        RawImport::new(path.as_str().trim_start_matches("::"), level, line)
                            .with_statement(tracker.line_text(line).trim()),
                    ));
                }
            }
        }

        found.sort_by_key(|(offset, _)| *offset);
        found.into_iter().map(|(_, raw)| raw).collect()
    }

    fn extract_includes(&self, content: &str) -> Vec<RawImport> {
        scan(&C_INCLUDE, content, |caps| {
            let quoted = caps.get(1)?.as_str() == "\"";
            let header = caps.get(2)?.as_str();
            if quoted {
                let (level, rest) = split_relative_path(header);
                Some(RawImport::new(rest, level.max(1), 0))
            } else {
                Some(RawImport::new(header, 0, 0))
            }
        })
    }
}

/// Run `regex` over `content`, building one import per match; line and
/// statement are filled in from the match position.
fn scan<F>(regex: &Regex, content: &str, build: F) -> Vec<RawImport>
where
    F: Fn(&regex::Captures<'_>) -> Option<RawImport>,
{
    let tracker = LocationTracker::new(content);
    regex
        .captures_iter(content)
        .filter_map(|caps| {
            let start = caps.get(0)?.start();
            let mut raw = build(&caps)?;
            let line = tracker.line_of_byte(start + leading_whitespace(&content[start..]));
            raw.line = line;
            raw.statement = tracker.line_text(line).trim().to_string();
            Some(raw)
        })
        .collect()
}

fn leading_whitespace(text: &str) -> usize {
    text.len() - text.trim_start().len()
}

fn first_line(text: &str) -> &str {
    text.trim().lines().next().unwrap_or("").trim()
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

/// Split `a, b as c, (d)` into `(name, alias)` pairs.
fn split_names(list: &str) -> Vec<(String, Option<String>)> {
    list.replace(['(', ')', '\\'], " ")
        .split(',')
        .filter_map(|item| {
            let mut parts = item.split_whitespace();
            let name = parts.next()?;
            let alias = match (parts.next(), parts.next()) {
                (Some("as"), Some(alias)) => Some(alias.to_string()),
                _ => None,
            };
            Some((name.to_string(), alias))
        })
        .collect()
}

fn node_text<'s>(node: &Node, source: &'s str) -> &'s str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

/// (name, alias) of a `dotted_name` or `aliased_import` node.
fn imported_name(node: &Node, source: &str) -> Option<(String, Option<String>)> {
    match node.kind() {
        "dotted_name" | "identifier" => Some((node_text(node, source).to_string(), None)),
        "aliased_import" => {
            let name = node.child_by_field_name("name")?;
            let alias = node
                .child_by_field_name("alias")
                .map(|alias| node_text(&alias, source).to_string());
            Some((node_text(&name, source).to_string(), alias))
        }
        _ => None,
    }
}

const IMPORT_NODE_KINDS: &[&str] = &[
    "import_statement",
    "import_from_statement",
    "future_import_statement",
];

/// Walk the tree with a cursor, recording every import statement. Import
/// nodes are not descended into.
fn collect_python_imports(root: Node, source: &str, out: &mut Vec<RawImport>) {
    let mut cursor = root.walk();
    loop {
        let recorded = record_python_import(cursor.node(), source, out);
        if !recorded && cursor.goto_first_child() {
            continue;
        }
        while !cursor.goto_next_sibling() {
            if !cursor.goto_parent() {
                return;
            }
        }
    }
}

/// Push the imports of `node` when it is an import statement.
fn record_python_import(node: Node, source: &str, out: &mut Vec<RawImport>) -> bool {
    if !IMPORT_NODE_KINDS.contains(&node.kind()) {
        return false;
    }
    let line = node.start_position().row + 1;
    let statement = first_line(node_text(&node, source)).to_string();

    match node.kind() {
        "import_statement" => {
            let mut cursor = node.walk();
            for child in node.children_by_field_name("name", &mut cursor) {
                if let Some((module, alias)) = imported_name(&child, source) {
                    let mut raw = RawImport::new(module, 0, line).with_statement(statement.clone());
                    if let Some(alias) = alias {
                        raw = raw.with_alias(alias);
                    }
                    out.push(raw);
                }
            }
            true
        }
        "import_from_statement" | "future_import_statement" => {
            let (level, module) = if node.kind() == "future_import_statement" {
                (0, "__future__".to_string())
            } else {
                let written = node
                    .child_by_field_name("module_name")
                    .map(|m| node_text(&m, source))
                    .unwrap_or("");
                let level = written.chars().take_while(|c| *c == '.').count();
                (level, written[level..].trim().to_string())
            };

            let mut names = Vec::new();
            let mut cursor = node.walk();
            for child in node.children_by_field_name("name", &mut cursor) {
                if let Some(pair) = imported_name(&child, source) {
                    names.push(pair);
                }
            }
            let mut cursor = node.walk();
            if node
                .children(&mut cursor)
                .any(|child| child.kind() == "wildcard_import")
            {
                names.push(("*".to_string(), None));
            }

            for (name, alias) in names {
                let mut raw = RawImport::new(module.clone(), level, line)
                    .with_name(name)
                    .with_statement(statement.clone());
                if let Some(alias) = alias {
                    raw = raw.with_alias(alias);
                }
                out.push(raw);
            }
            true
        }
        _ => false,
    }
}
