//! Language tags and detection from file paths and content.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use aho_corasick::AhoCorasick;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Language tag attached to every partition result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Rust,
    Go,
    Cpp,
    C,
    Java,
    CSharp,
    Ruby,
    Php,
    Shell,
    Markdown,
    Text,
    Unknown,
}

impl Language {
    /// Canonical lower-case tag.
    pub fn name(self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Rust => "rust",
            Language::Go => "go",
            Language::Cpp => "cpp",
            Language::C => "c",
            Language::Java => "java",
            Language::CSharp => "csharp",
            Language::Ruby => "ruby",
            Language::Php => "php",
            Language::Shell => "shell",
            Language::Markdown => "markdown",
            Language::Text => "text",
            Language::Unknown => "unknown",
        }
    }

    /// Parse a tag or common alias (`py`, `ts`, `c++`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        let language = match name.trim().to_ascii_lowercase().as_str() {
            "python" | "py" | "pyw" => Language::Python,
            "javascript" | "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "typescript" | "ts" | "tsx" => Language::TypeScript,
            "rust" | "rs" => Language::Rust,
            "go" | "golang" => Language::Go,
            "cpp" | "c++" | "cxx" | "cplusplus" => Language::Cpp,
            "c" => Language::C,
            "java" => Language::Java,
            "csharp" | "c#" | "cs" => Language::CSharp,
            "ruby" | "rb" => Language::Ruby,
            "php" => Language::Php,
            "shell" | "sh" | "bash" | "zsh" => Language::Shell,
            "markdown" | "md" => Language::Markdown,
            "text" | "txt" => Language::Text,
            "unknown" => Language::Unknown,
            _ => return None,
        };
        Some(language)
    }

    /// Whether this is the primary analysis target with a native analyzer.
    pub fn is_primary(self) -> bool {
        self == Language::Python
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Metadata describing one recognised language.
#[derive(Debug, Clone, Copy)]
pub struct LanguageInfo {
    pub language: Language,
    /// Human-friendly display name.
    pub display_name: &'static str,
    /// File extensions (without leading dots).
    pub extensions: &'static [&'static str],
    /// Syntax indicator strings used for content scoring.
    pub indicators: &'static [&'static str],
}

const REGISTERED_LANGUAGES: &[LanguageInfo] = &[
    LanguageInfo {
        language: Language::Python,
        display_name: "Python",
        extensions: &["py", "pyi", "pyw"],
        indicators: &[
            "def ", "import ", "from ", "self.", "elif ", "__init__", "print(", "None", "lambda ",
        ],
    },
    LanguageInfo {
        language: Language::JavaScript,
        display_name: "JavaScript",
        extensions: &["js", "jsx", "mjs", "cjs"],
        indicators: &[
            "function ", "const ", "let ", "=>", "require(", "console.log", "module.exports",
            "undefined",
        ],
    },
    LanguageInfo {
        language: Language::TypeScript,
        display_name: "TypeScript",
        extensions: &["ts", "tsx", "mts", "cts"],
        indicators: &[
            "interface ", ": string", ": number", ": boolean", "export type ", "implements ",
            "readonly ",
        ],
    },
    LanguageInfo {
        language: Language::Rust,
        display_name: "Rust",
        extensions: &["rs"],
        indicators: &["fn ", "let mut ", "impl ", "pub fn", "use std::", "::new(", "&mut ", "match "],
    },
    LanguageInfo {
        language: Language::Go,
        display_name: "Go",
        extensions: &["go"],
        indicators: &["func ", "package ", ":= ", "fmt.", "go func", "chan ", "defer "],
    },
    LanguageInfo {
        language: Language::Cpp,
        display_name: "C++",
        extensions: &["cpp", "cxx", "cc", "c++", "hpp", "hxx", "hh"],
        indicators: &["#include", "std::", "namespace ", "template<", "template <", "cout", "nullptr"],
    },
    LanguageInfo {
        language: Language::C,
        display_name: "C",
        extensions: &["c", "h"],
        indicators: &["#include", "printf(", "malloc(", "int main(", "sizeof(", "struct ", "#define "],
    },
    LanguageInfo {
        language: Language::Java,
        display_name: "Java",
        extensions: &["java"],
        indicators: &[
            "public class ", "private ", "System.out", "import java.", "extends ", "@Override",
            "void ",
        ],
    },
    LanguageInfo {
        language: Language::CSharp,
        display_name: "C#",
        extensions: &["cs"],
        indicators: &["using System", "namespace ", "Console.Write", "{ get;", "public void ", "var "],
    },
    LanguageInfo {
        language: Language::Ruby,
        display_name: "Ruby",
        extensions: &["rb", "rake", "gemspec"],
        indicators: &["def ", "end\n", "require '", "puts ", "elsif ", "attr_accessor", " do |"],
    },
    LanguageInfo {
        language: Language::Php,
        display_name: "PHP",
        extensions: &["php", "phtml"],
        indicators: &["<?php", "$this->", "echo ", "function ", "namespace ", "public function"],
    },
    LanguageInfo {
        language: Language::Shell,
        display_name: "Shell",
        extensions: &["sh", "bash", "zsh", "ksh"],
        indicators: &["#!/bin/", "echo ", "fi\n", "then\n", "esac", "$(", "done\n"],
    },
    LanguageInfo {
        language: Language::Markdown,
        display_name: "Markdown",
        extensions: &["md", "markdown", "mdx"],
        indicators: &["\n# ", "\n## ", "```", "](", "- [ ]", "**"],
    },
    LanguageInfo {
        language: Language::Text,
        display_name: "Plain text",
        extensions: &["txt", "text", "rst", "log"],
        indicators: &[],
    },
];

/// Return every language this build recognises.
pub fn registered_languages() -> &'static [LanguageInfo] {
    REGISTERED_LANGUAGES
}

/// Look up a language by extension (with or without a leading dot).
pub fn language_for_extension(ext: &str) -> Option<Language> {
    let target = ext.trim_start_matches('.');
    REGISTERED_LANGUAGES
        .iter()
        .find(|info| {
            info.extensions
                .iter()
                .any(|candidate| candidate.eq_ignore_ascii_case(target))
        })
        .map(|info| info.language)
}

/// Language implied by the file's extension, if any.
pub fn language_for_path(path: &Path) -> Option<Language> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(language_for_extension)
}

/// Indicator automaton plus, per pattern, the languages it scores for.
struct IndicatorIndex {
    automaton: AhoCorasick,
    owners: Vec<Vec<Language>>,
}

static INDICATORS: Lazy<Option<IndicatorIndex>> = Lazy::new(|| {
    let mut patterns: Vec<&'static str> = Vec::new();
    let mut owners: Vec<Vec<Language>> = Vec::new();
    let mut positions: HashMap<&'static str, usize> = HashMap::new();

    for info in REGISTERED_LANGUAGES {
        for indicator in info.indicators.iter().copied() {
            let idx = *positions.entry(indicator).or_insert_with(|| {
                patterns.push(indicator);
                owners.push(Vec::new());
                patterns.len() - 1
            });
            owners[idx].push(info.language);
        }
    }

    AhoCorasick::new(&patterns)
        .ok()
        .map(|automaton| IndicatorIndex { automaton, owners })
});

/// Count overlapping indicator hits per language.
pub fn keyword_scores(content: &str) -> HashMap<Language, usize> {
    let mut scores = HashMap::new();
    let Some(index) = INDICATORS.as_ref() else {
        return scores;
    };

    for hit in index.automaton.find_overlapping_iter(content) {
        for language in &index.owners[hit.pattern().as_usize()] {
            *scores.entry(*language).or_insert(0) += 1;
        }
    }
    scores
}

/// Pick a language from content alone.
///
/// The highest score wins when it reaches `min_score`; a tie for first place
/// or no score at the threshold yields [`Language::Unknown`].
pub fn detect_from_content(content: &str, min_score: usize) -> Language {
    if let Some(language) = detect_from_shebang(content) {
        return language;
    }

    let scores = keyword_scores(content);
    let mut ranked: Vec<(Language, usize)> = scores.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    match ranked.as_slice() {
        [] => Language::Unknown,
        [(language, score)] => {
            if *score >= min_score {
                *language
            } else {
                Language::Unknown
            }
        }
        [(language, score), (_, runner_up), ..] => {
            if *score >= min_score && score > runner_up {
                *language
            } else {
                Language::Unknown
            }
        }
    }
}

fn detect_from_shebang(content: &str) -> Option<Language> {
    let first = content.lines().next()?;
    let interpreter = first.strip_prefix("#!")?;
    let interpreter = interpreter.trim();
    if interpreter.contains("python") {
        Some(Language::Python)
    } else if interpreter.contains("node") {
        Some(Language::JavaScript)
    } else if interpreter.contains("ruby") {
        Some(Language::Ruby)
    } else if interpreter.contains("php") {
        Some(Language::Php)
    } else if ["sh", "bash", "zsh", "ksh", "dash"].iter().any(|shell| {
        interpreter.ends_with(&format!("/{shell}")) || interpreter.ends_with(&format!(" {shell}"))
    }) {
        Some(Language::Shell)
    } else {
        None
    }
}

/// Extension lookup first, then content scoring.
pub fn detect_language(path: &Path, content: Option<&str>, min_score: usize) -> Language {
    if let Some(language) = language_for_path(path) {
        return language;
    }
    match content {
        Some(content) if !content.trim().is_empty() => detect_from_content(content, min_score),
        _ => Language::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_lookup() {
        assert_eq!(language_for_path(Path::new("pkg/mod.py")), Some(Language::Python));
        assert_eq!(language_for_path(Path::new("App.TSX")), Some(Language::TypeScript));
        assert_eq!(language_for_path(Path::new("lib.rs")), Some(Language::Rust));
        assert_eq!(language_for_path(Path::new("notes.md")), Some(Language::Markdown));
        assert_eq!(language_for_path(Path::new("Makefile")), None);
    }

    #[test]
    fn test_extension_wins_over_content() {
        let detected = detect_language(Path::new("a.go"), Some("def f(self):\n  pass\n"), 3);
        assert_eq!(detected, Language::Go);
    }

    #[test]
    fn test_content_scoring_python() {
        let content = "def foo(self):\n    import os\n    return self.x\n\ndef bar():\n    pass\n";
        assert_eq!(detect_language(Path::new("script"), Some(content), 3), Language::Python);
    }

    #[test]
    fn test_content_scoring_rust() {
        let content = "use std::fmt;\n\npub fn main() {\n    let mut x = 1;\n}\n";
        assert_eq!(detect_from_content(content, 3), Language::Rust);
    }

    #[test]
    fn test_below_threshold_is_unknown() {
        assert_eq!(detect_from_content("hello world", 3), Language::Unknown);
        assert_eq!(detect_from_content("def x", 3), Language::Unknown);
    }

    #[test]
    fn test_tie_is_unknown() {
        // "def " scores for Python and Ruby alike
        assert_eq!(detect_from_content("def a\ndef b\ndef c\n", 3), Language::Unknown);
    }

    #[test]
    fn test_shebang() {
        assert_eq!(detect_from_content("#!/usr/bin/env python3\nx = 1\n", 3), Language::Python);
        assert_eq!(detect_from_content("#!/bin/bash\nls\n", 3), Language::Shell);
    }

    #[test]
    fn test_from_name_aliases() {
        assert_eq!(Language::from_name("py"), Some(Language::Python));
        assert_eq!(Language::from_name("C++"), Some(Language::Cpp));
        assert_eq!(Language::from_name("klingon"), None);
        assert_eq!(Language::CSharp.name(), "csharp");
    }
}
