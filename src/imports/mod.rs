//! Import extraction, classification and resolution.
//!
//! [`ImportAnalyzer`] chains the three stages for one file and produces the
//! [`FileAnalysis`] payload that the traversal records and the cache stores.

pub mod classifier;
pub mod extractor;
pub mod resolver;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::lang::{detect_language, Language};

pub use classifier::ImportClassifier;
pub use extractor::ImportExtractor;
pub use resolver::ImportResolver;

/// Classification tag of an import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportKind {
    /// Leading dots or `./` / `../` style paths
    Relative,
    /// First segment found under the project root
    Local,
    /// Part of the language's standard library
    Standard,
    /// Everything else
    External,
}

impl ImportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ImportKind::Relative => "relative",
            ImportKind::Local => "local",
            ImportKind::Standard => "standard",
            ImportKind::External => "external",
        }
    }

    /// Whether the import can point at a file inside the project.
    pub fn is_project(self) -> bool {
        matches!(self, ImportKind::Relative | ImportKind::Local)
    }
}

impl fmt::Display for ImportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An import exactly as the extractor found it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawImport {
    /// Module or path without leading dots (`pkg.sub`, `c`, `utils/io`)
    pub module: String,
    /// Relative level: 0 = absolute, 1 = `.` or `./`, 2 = `..` or `../`, ...
    pub level: usize,
    /// Imported symbol for `from M import S` forms
    pub name: Option<String>,
    /// Local alias (`as X`)
    pub alias: Option<String>,
    /// 1-based line of the statement
    pub line: usize,
    /// Statement text (first line only)
    pub statement: String,
}

impl RawImport {
    pub fn new(module: impl Into<String>, level: usize, line: usize) -> Self {
        Self {
            module: module.into(),
            level,
            name: None,
            alias: None,
            line,
            statement: String::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_statement(mut self, statement: impl Into<String>) -> Self {
        self.statement = statement.into();
        self
    }

    /// Module as written in Python syntax (`..c`, `.`, `os.path`).
    pub fn written(&self) -> String {
        format!("{}{}", ".".repeat(self.level), self.module)
    }

    /// Key identifying this import within its file (module plus symbol).
    pub fn key(&self) -> String {
        match &self.name {
            Some(name) => format!("{}:{}", self.written(), name),
            None => self.written(),
        }
    }
}

/// A classified, possibly resolved import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRecord {
    /// Module or path name as written
    pub module: String,
    /// Imported symbol, for `from M import S`
    pub name: Option<String>,
    /// Whether a target file was found
    pub resolved: bool,
    /// Target file when resolved
    pub resolved_path: Option<PathBuf>,
    pub is_relative: bool,
    pub level: usize,
    pub kind: ImportKind,
    /// 1-based originating line
    pub line: usize,
    /// Originating statement text
    pub statement: String,
}

impl ImportRecord {
    pub fn from_raw(raw: &RawImport, kind: ImportKind, resolved_path: Option<PathBuf>) -> Self {
        Self {
            module: raw.written(),
            name: raw.name.clone(),
            resolved: resolved_path.is_some(),
            resolved_path,
            is_relative: raw.level > 0,
            level: raw.level,
            kind,
            line: raw.line,
            statement: raw.statement.clone(),
        }
    }

    /// Identifier used by the broken-dependency handler.
    pub fn key(&self) -> String {
        match &self.name {
            Some(name) => format!("{}:{}", self.module, name),
            None => self.module.clone(),
        }
    }
}

/// Imports of one file: the payload the cache stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAnalysis {
    pub path: PathBuf,
    pub language: Language,
    pub imports: Vec<ImportRecord>,
}

impl FileAnalysis {
    /// Distinct resolved targets, in import order.
    pub fn dependencies(&self) -> Vec<PathBuf> {
        let mut seen = std::collections::HashSet::new();
        self.imports
            .iter()
            .filter_map(|record| record.resolved_path.clone())
            .filter(|path| seen.insert(path.clone()))
            .collect()
    }
}

/// Extract → classify → resolve for a single file.
pub struct ImportAnalyzer {
    extractor: ImportExtractor,
    classifier: ImportClassifier,
    resolver: ImportResolver,
    min_keyword_score: usize,
}

impl ImportAnalyzer {
    pub fn new(
        classifier: ImportClassifier,
        resolver: ImportResolver,
        min_keyword_score: usize,
    ) -> Self {
        Self {
            extractor: ImportExtractor::new(),
            classifier,
            resolver,
            min_keyword_score,
        }
    }

    pub fn classifier(&self) -> &ImportClassifier {
        &self.classifier
    }

    pub fn resolver(&self) -> &ImportResolver {
        &self.resolver
    }

    /// Analyze `content` as the text of `path`.
    pub fn analyze(&self, path: &Path, content: &str) -> FileAnalysis {
        let language = detect_language(path, Some(content), self.min_keyword_score);
        if language == Language::Python {
            self.resolver.prime(path, content);
        }
        let imports = self
            .extractor
            .extract(path, content, language)
            .iter()
            .map(|raw| {
                let kind = self.classifier.classify(raw, language);
                let (kind, resolved) = match kind {
                    kind if kind.is_project() => (kind, self.resolver.resolve(raw, path, language)),
                    // found only through a sys.path addition or an extra search path
                    ImportKind::External if language == Language::Python => {
                        match self.resolver.resolve_on_added_paths(raw, path) {
                            Some(found) => (ImportKind::Local, Some(found)),
                            None => (ImportKind::External, None),
                        }
                    }
                    kind => (kind, None),
                };
                ImportRecord::from_raw(raw, kind, resolved)
            })
            .collect();

        FileAnalysis {
            path: path.to_path_buf(),
            language,
            imports,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::LocalHeuristic;
    use std::fs;
    use tempfile::TempDir;

    fn analyzer(root: &Path) -> ImportAnalyzer {
        ImportAnalyzer::new(
            ImportClassifier::new(root, LocalHeuristic::MarkerOrSource, Vec::new()),
            ImportResolver::new(root, Vec::new(), true),
            3,
        )
    }

    #[test]
    fn test_records_carry_kind_and_resolution() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("pkg")).unwrap();
        fs::write(root.join("pkg/__init__.py"), "").unwrap();
        fs::write(root.join("pkg/util.py"), "").unwrap();
        let main = root.join("main.py");
        let content = "import os\nimport requests\nfrom pkg import util\nfrom .missing import x\n";
        fs::write(&main, content).unwrap();

        let analysis = analyzer(&root).analyze(&main, content);
        assert_eq!(analysis.language, Language::Python);

        let kinds: Vec<ImportKind> = analysis.imports.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ImportKind::Standard,
                ImportKind::External,
                ImportKind::Local,
                ImportKind::Relative
            ]
        );
        assert_eq!(analysis.imports[2].resolved_path, Some(root.join("pkg/util.py")));
        assert!(!analysis.imports[3].resolved);
        assert_eq!(analysis.imports[3].module, ".missing");
        assert_eq!(analysis.dependencies(), vec![root.join("pkg/util.py")]);
    }

    #[test]
    fn test_sys_path_addition_makes_import_local() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("lib")).unwrap();
        fs::write(root.join("lib/helper.py"), "").unwrap();
        let main = root.join("main.py");
        let content = "import os\nimport sys\nsys.path.insert(0, os.path.join(os.path.dirname(__file__), \"lib\"))\nimport helper\n";
        fs::write(&main, content).unwrap();

        let analysis = analyzer(&root).analyze(&main, content);
        let helper = analysis
            .imports
            .iter()
            .find(|r| r.module == "helper")
            .unwrap();
        assert_eq!(helper.kind, ImportKind::Local);
        assert_eq!(helper.resolved_path, Some(root.join("lib/helper.py")));
    }

    #[test]
    fn test_record_keys() {
        let raw = RawImport::new("c", 2, 1).with_name("thing");
        assert_eq!(raw.written(), "..c");
        assert_eq!(raw.key(), "..c:thing");
        let record = ImportRecord::from_raw(&raw, ImportKind::Relative, None);
        assert_eq!(record.key(), "..c:thing");
        assert!(record.is_relative);
    }
}
