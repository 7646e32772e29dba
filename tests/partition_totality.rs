//! Property-based tests for the partition cascade
//!
//! Whatever the input, `partition_file` must return at least one block, and
//! the blocks must reconstruct the input exactly.

use std::path::Path;

use proptest::prelude::*;
use strata::core::config::PartitionConfig;
use strata::imports::ImportExtractor;
use strata::lang::{Language, LanguageRegistry};
use strata::partition::StrategyKind;

const FILE_NAMES: &[&str] = &[
    "module.py", "lib.rs", "app.js", "view.tsx", "main.go", "Main.java", "notes.md", "data.txt",
    "noext",
];

fn file_name() -> impl Strategy<Value = &'static str> {
    prop::sample::select(FILE_NAMES)
}

fn identifier() -> impl Strategy<Value = String> {
    "[a-z_][a-z0-9_]{0,12}"
}

// Roughly Python-shaped text, sometimes truncated mid-statement
fn python_source() -> impl Strategy<Value = String> {
    let statement = prop_oneof![
        identifier().prop_map(|name| format!("import {name}\n")),
        (identifier(), identifier()).prop_map(|(m, n)| format!("from .{m} import {n}\n")),
        identifier().prop_map(|name| format!("def {name}(x):\n    if x:\n        return x\n    return None\n")),
        (identifier(), 0..4usize).prop_map(|(name, methods)| {
            let body: String = (0..methods)
                .map(|i| format!("    def method_{i}(self):\n        pass\n"))
                .collect();
            format!("class {name}:\n{body}    pass\n")
        }),
        Just("\n\n".to_string()),
        Just("def broken(:\n".to_string()),
        Just("    ))) ]]\n".to_string()),
    ];
    (prop::collection::vec(statement, 0..12), any::<u8>()).prop_map(|(parts, cut)| {
        let text: String = parts.concat();
        let mut cut = text.len().saturating_sub(cut as usize % 8);
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text[..cut].to_string()
    })
}

fn registry() -> LanguageRegistry {
    LanguageRegistry::new(&PartitionConfig::default())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn arbitrary_text_always_partitions(name in file_name(), content in "\\PC{0,400}") {
        let result = registry().partition_file(Path::new(name), Some(&content), None);
        prop_assert!(!result.blocks.is_empty());
        prop_assert_eq!(result.reconstruct(), content);
    }

    #[test]
    fn arbitrary_bytes_always_partition(name in file_name(), bytes in prop::collection::vec(any::<u8>(), 0..400)) {
        let content = String::from_utf8_lossy(&bytes).into_owned();
        let result = registry().partition_file(Path::new(name), Some(&content), None);
        prop_assert!(!result.blocks.is_empty());
        prop_assert_eq!(result.reconstruct(), content);
    }

    #[test]
    fn python_like_source_reconstructs(content in python_source()) {
        let result = registry().partition_file(Path::new("module.py"), Some(&content), None);
        prop_assert!(!result.blocks.is_empty());

        let mut blocks: Vec<_> = result.blocks.iter().collect();
        blocks.sort_by_key(|b| b.location.start_byte);
        let rebuilt: String = blocks.iter().map(|b| b.location.extract_content(&content)).collect();
        prop_assert_eq!(rebuilt, content.clone());

        for block in &result.blocks {
            prop_assert!(block.location.start_line <= block.location.end_line);
            prop_assert!(block.location.end_line <= block.location.total_lines);
        }
    }
}

#[test]
fn empty_input_yields_single_empty_block() {
    for name in FILE_NAMES {
        let result = registry().partition_file(Path::new(name), Some(""), None);
        assert_eq!(result.blocks.len(), 1, "{name}");
        assert!(result.blocks[0].content.is_empty());
    }
}

fn deeply_nested_python(depth: usize) -> String {
    format!(
        "import os\n\ndef build():\n    if os.sep:\n        from json import dumps\n    return {}{}\n",
        "[".repeat(depth),
        "]".repeat(depth)
    )
}

#[test]
fn deep_nesting_partitions_without_exhausting_the_stack() {
    let handle = std::thread::spawn(|| {
        let content = deeply_nested_python(100_000);
        let result = registry().partition_file(Path::new("deep.py"), Some(&content), None);
        (result, content)
    });
    let (result, content) = handle.join().expect("partition thread must not die");

    assert_eq!(result.strategy_used, StrategyKind::Native);
    assert_eq!(result.reconstruct(), content);
    let build = result
        .blocks
        .iter()
        .find(|b| b.name.as_deref() == Some("build"))
        .unwrap();
    assert_eq!(build.complexity, Some(2.0));
}

#[test]
fn deep_nesting_import_extraction_finds_nested_imports() {
    let handle = std::thread::spawn(|| {
        let content = deeply_nested_python(100_000);
        ImportExtractor::new().extract(Path::new("deep.py"), &content, Language::Python)
    });
    let imports = handle.join().expect("extraction thread must not die");

    let modules: Vec<_> = imports.iter().map(|i| i.module.as_str()).collect();
    assert_eq!(modules, vec!["os", "json"]);
}
