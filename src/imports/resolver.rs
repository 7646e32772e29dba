//! Import resolution: map a classified import to a concrete file.
//!
//! Relative imports walk up from the importing file's directory; absolute ones
//! are tried against each search path in order: paths the importing file adds
//! to `sys.path`, then the project root, then configured extras. Python package
//! markers are scanned for re-exports so `from pkg import Symbol` can land on
//! the submodule that defines `Symbol`.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::core::file_utils::{normalize_path, FileReader};
use crate::imports::classifier::source_extensions;
use crate::imports::{ImportExtractor, RawImport};
use crate::lang::{language_for_path, Language};

const PYTHON_MARKER: &str = "__init__.py";
const JS_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs"];

static SYS_PATH_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*sys\.path\.(?:insert\s*\(\s*[^,]+,|append\s*\()\s*(.+)\)\s*$")
        .expect("valid sys.path pattern")
});
static ASSIGNMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([A-Za-z_]\w*)\s*=\s*(.+?)\s*$").expect("valid assignment pattern"));
static STRING_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"['"]([^'"]*)['"]"#).expect("valid literal pattern"));
static PARENTS_INDEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.parents\[(\d+)\]").expect("valid parents pattern"));
static PARENT_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.parent\b").expect("valid parent pattern"));
static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Za-z_]\w*\b").expect("valid identifier pattern"));

/// Symbol name → (relative level, originating module) exported by a package marker.
pub type ReexportMap = HashMap<String, (usize, String)>;

/// Resolves imports to files, memoising every lookup for the run.
pub struct ImportResolver {
    project_root: PathBuf,
    extra_search_paths: Vec<PathBuf>,
    detect_mutations: bool,
    extractor: ImportExtractor,
    resolutions: DashMap<(PathBuf, String), Option<PathBuf>>,
    inferred_paths: DashMap<PathBuf, Arc<Vec<PathBuf>>>,
    reexports: DashMap<PathBuf, Arc<ReexportMap>>,
}

impl ImportResolver {
    pub fn new(
        project_root: impl Into<PathBuf>,
        extra_search_paths: Vec<PathBuf>,
        detect_mutations: bool,
    ) -> Self {
        Self {
            project_root: project_root.into(),
            extra_search_paths,
            detect_mutations,
            extractor: ImportExtractor::new(),
            resolutions: DashMap::new(),
            inferred_paths: DashMap::new(),
            reexports: DashMap::new(),
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Record the search paths `path` adds, from already-read content.
    pub fn prime(&self, path: &Path, content: &str) {
        if !self.detect_mutations {
            return;
        }
        let inferred = infer_search_paths(path, content, &self.project_root);
        if !inferred.is_empty() {
            debug!(file = %path.display(), paths = ?inferred, "Inferred sys.path additions");
        }
        self.inferred_paths
            .insert(path.to_path_buf(), Arc::new(inferred));
    }

    /// Absolute-import search paths for `importing_file`, in lookup order.
    pub fn search_paths(&self, importing_file: &Path) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = Vec::new();
        if self.detect_mutations && language_for_path(importing_file) == Some(Language::Python) {
            let inferred = match self.inferred_paths.get(importing_file) {
                Some(entry) => Arc::clone(entry.value()),
                None => {
                    let content = FileReader::read_lossy(importing_file).unwrap_or_default();
                    let inferred =
                        Arc::new(infer_search_paths(importing_file, &content, &self.project_root));
                    self.inferred_paths
                        .insert(importing_file.to_path_buf(), Arc::clone(&inferred));
                    inferred
                }
            };
            paths.extend(inferred.iter().cloned());
        }
        paths.push(self.project_root.clone());
        paths.extend(self.extra_search_paths.iter().cloned());

        let mut seen = std::collections::HashSet::new();
        paths.retain(|p| seen.insert(p.clone()));
        paths
    }

    /// Target file of `import` as written in `importing_file`, or `None`.
    pub fn resolve(
        &self,
        import: &RawImport,
        importing_file: &Path,
        language: Language,
    ) -> Option<PathBuf> {
        let key = (importing_file.to_path_buf(), import.key());
        if let Some(cached) = self.resolutions.get(&key) {
            return cached.clone();
        }

        let resolved = self
            .resolve_uncached(import, importing_file, language)
            .map(|path| normalize_path(&path));
        debug!(
            file = %importing_file.display(),
            import = %import.key(),
            resolved = ?resolved,
            "Resolved import"
        );
        self.resolutions.insert(key, resolved.clone());
        resolved
    }

    /// Python absolute import looked up only on the paths added beyond the
    /// project root: inferred `sys.path` mutations and configured extras.
    pub fn resolve_on_added_paths(
        &self,
        import: &RawImport,
        importing_file: &Path,
    ) -> Option<PathBuf> {
        if import.level > 0 {
            return None;
        }
        let name = import.name.as_deref().filter(|n| *n != "*");
        self.search_paths(importing_file)
            .iter()
            .filter(|root| **root != self.project_root)
            .find_map(|root| self.resolve_python_in(root, &import.module, name))
            .map(|path| normalize_path(&path))
    }

    /// Drop every memoised lookup.
    pub fn invalidate(&self) {
        self.resolutions.clear();
        self.inferred_paths.clear();
        self.reexports.clear();
    }

    /// Re-exports declared by a package marker, cached per path.
    pub fn reexports(&self, marker: &Path) -> Arc<ReexportMap> {
        if let Some(map) = self.reexports.get(marker) {
            return Arc::clone(map.value());
        }

        let mut map = ReexportMap::new();
        if let Ok(content) = FileReader::read_lossy(marker) {
            for raw in self.extractor.extract(marker, &content, Language::Python) {
                let Some(name) = raw.name.as_deref() else {
                    continue;
                };
                if name == "*" {
                    continue;
                }
                let exported = raw.alias.clone().unwrap_or_else(|| name.to_string());
                // `from . import sub` exports the submodule itself
                let module = if raw.module.is_empty() {
                    name.to_string()
                } else {
                    raw.module.clone()
                };
                map.insert(exported, (raw.level, module));
            }
        }

        let map = Arc::new(map);
        self.reexports
            .insert(marker.to_path_buf(), Arc::clone(&map));
        map
    }

    fn resolve_uncached(
        &self,
        import: &RawImport,
        importing_file: &Path,
        language: Language,
    ) -> Option<PathBuf> {
        let name = import.name.as_deref().filter(|n| *n != "*");
        match language {
            Language::Python => {
                if import.level > 0 {
                    let base = ancestor(importing_file, import.level)?;
                    self.resolve_python_in(&base, &import.module, name)
                } else {
                    self.search_paths(importing_file)
                        .iter()
                        .find_map(|root| self.resolve_python_in(root, &import.module, name))
                }
            }
            Language::JavaScript | Language::TypeScript => {
                if import.level > 0 {
                    let base = ancestor(importing_file, import.level)?;
                    script_file(&base.join(&import.module))
                } else {
                    self.search_paths(importing_file)
                        .iter()
                        .find_map(|root| script_file(&root.join(&import.module)))
                }
            }
            Language::Rust => self.resolve_rust(import, importing_file),
            _ => {
                let extensions = source_extensions(language);
                let candidates = |base: &Path| {
                    let target = base.join(&import.module);
                    if target.is_file() {
                        return Some(target);
                    }
                    extensions
                        .iter()
                        .map(|ext| with_suffix(&target, ext))
                        .find(|p| p.is_file())
                };
                if import.level > 0 {
                    candidates(&ancestor(importing_file, import.level)?)
                } else if language == Language::Java {
                    let relative = import.module.replace('.', "/");
                    self.search_paths(importing_file)
                        .iter()
                        .map(|root| with_suffix(&root.join(&relative), "java"))
                        .find(|p| p.is_file())
                } else {
                    None
                }
            }
        }
    }

    /// `from <base>/<module> import <name>` in lookup order: the submodule
    /// `module.name`, a re-export of `name` from the package marker, then the
    /// module itself. A trailing capitalised segment is treated as a symbol and
    /// dropped when nothing matches.
    fn resolve_python_in(&self, base: &Path, module: &str, name: Option<&str>) -> Option<PathBuf> {
        let segments: Vec<&str> = module.split('.').filter(|s| !s.is_empty()).collect();
        let module_dir = segments.iter().fold(base.to_path_buf(), |dir, s| dir.join(s));

        if let Some(name) = name {
            if let Some(found) = python_module_file(&module_dir.join(name)) {
                return Some(found);
            }
            let marker = module_dir.join(PYTHON_MARKER);
            if marker.is_file() {
                if let Some(found) = self.resolve_reexport(&marker, name) {
                    return Some(found);
                }
            }
        }

        if segments.is_empty() {
            let marker = base.join(PYTHON_MARKER);
            return marker.is_file().then_some(marker);
        }
        if let Some(found) = python_module_file(&module_dir) {
            return Some(found);
        }

        let last = segments.last().copied().unwrap_or("");
        if segments.len() > 1 && last.chars().next().is_some_and(char::is_uppercase) {
            let parent = segments[..segments.len() - 1].join(".");
            return self.resolve_python_in(base, &parent, None);
        }
        None
    }

    fn resolve_reexport(&self, marker: &Path, name: &str) -> Option<PathBuf> {
        let map = self.reexports(marker);
        let (level, origin) = map.get(name)?;
        let package_dir = marker.parent()?;

        if *level > 0 {
            let base = ancestor(marker, *level)?;
            let target = origin.split('.').fold(base, |dir, s| dir.join(s));
            return python_module_file(&target);
        }
        let relative = origin.replace('.', "/");
        self.search_paths(marker)
            .iter()
            .map(|root| root.join(&relative))
            .chain(std::iter::once(package_dir.join(&relative)))
            .find_map(|target| python_module_file(&target))
    }

    fn resolve_rust(&self, import: &RawImport, importing_file: &Path) -> Option<PathBuf> {
        let parent = importing_file.parent()?;
        let stem = importing_file.file_stem()?.to_str()?;
        let module_dir = if matches!(stem, "mod" | "lib" | "main") {
            parent.to_path_buf()
        } else {
            parent.join(stem)
        };

        if import.level > 0 {
            return rust_module_file(&module_dir.join(&import.module));
        }

        let mut segments: Vec<&str> = import.module.split("::").filter(|s| !s.is_empty()).collect();
        let base = match segments.first().copied() {
            Some("crate") => crate_root(importing_file, &self.project_root),
            Some("self") => module_dir,
            Some("super") => module_dir.parent()?.to_path_buf(),
            _ => return None,
        };
        segments.remove(0);

        // Longest prefix that names a module file
        (1..=segments.len()).rev().find_map(|len| {
            let target = segments[..len].iter().fold(base.clone(), |dir, s| dir.join(s));
            rust_module_file(&target)
        })
    }
}

/// Directory reached by walking up `level - 1` times from the file's own
/// directory (`level` 1 is the file's package).
fn ancestor(file: &Path, level: usize) -> Option<PathBuf> {
    let mut dir = file.parent()?.to_path_buf();
    for _ in 1..level {
        dir = dir.parent()?.to_path_buf();
    }
    Some(dir)
}

fn with_suffix(path: &Path, ext: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

fn python_module_file(target: &Path) -> Option<PathBuf> {
    let file = with_suffix(target, "py");
    if file.is_file() {
        return Some(file);
    }
    let marker = target.join(PYTHON_MARKER);
    marker.is_file().then_some(marker)
}

fn script_file(target: &Path) -> Option<PathBuf> {
    if target.is_file() {
        return Some(target.to_path_buf());
    }
    JS_EXTENSIONS
        .iter()
        .map(|ext| with_suffix(target, ext))
        .chain(JS_EXTENSIONS.iter().map(|ext| target.join(format!("index.{ext}"))))
        .find(|p| p.is_file())
}

fn rust_module_file(target: &Path) -> Option<PathBuf> {
    let file = with_suffix(target, "rs");
    if file.is_file() {
        return Some(file);
    }
    let nested = target.join("mod.rs");
    nested.is_file().then_some(nested)
}

/// Directory holding `lib.rs` or `main.rs` above `file`, bounded by the root.
fn crate_root(file: &Path, project_root: &Path) -> PathBuf {
    for dir in file.ancestors().skip(1) {
        if dir.join("lib.rs").is_file() || dir.join("main.rs").is_file() {
            return dir.to_path_buf();
        }
        if dir == project_root {
            break;
        }
    }
    project_root.join("src")
}

/// Search paths a Python file adds through `sys.path.insert` / `append`.
///
/// Understands string literals, `os.path.dirname(__file__)` chains,
/// `Path(__file__).parent` / `.parents[N]` chains, joins with literal
/// segments, and variables assigned from any of those. Relative literals are
/// taken relative to the project root.
pub fn infer_search_paths(file: &Path, content: &str, project_root: &Path) -> Vec<PathBuf> {
    if !content.contains("sys.path") {
        return Vec::new();
    }

    let mut variables: HashMap<String, PathBuf> = HashMap::new();
    let mut found: Vec<PathBuf> = Vec::new();
    for line in content.lines() {
        let line = line.split('#').next().unwrap_or("");

        if let Some(caps) = SYS_PATH_CALL.captures(line) {
            let expr = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            if let Some(path) = evaluate_path(expr, file, project_root, &variables) {
                if !found.contains(&path) {
                    found.push(path);
                }
            }
            continue;
        }

        if let Some(caps) = ASSIGNMENT.captures(line) {
            let (Some(name), Some(expr)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            if let Some(path) = evaluate_path(expr.as_str(), file, project_root, &variables) {
                variables.insert(name.as_str().to_string(), path);
            }
        }
    }
    found
}

fn evaluate_path(
    expr: &str,
    file: &Path,
    project_root: &Path,
    variables: &HashMap<String, PathBuf>,
) -> Option<PathBuf> {
    let expr = expr.trim().trim_end_matches(')').trim();
    let literals: Vec<&str> = STRING_LITERAL
        .captures_iter(expr)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();

    let base = if expr.contains("__file__") {
        let dirname_calls = expr.matches("dirname(").count();
        let parents = if dirname_calls > 0 {
            dirname_calls
        } else {
            let indexed: usize = PARENTS_INDEX
                .captures_iter(expr)
                .filter_map(|caps| caps.get(1)?.as_str().parse::<usize>().ok())
                .map(|n| n + 1)
                .sum();
            indexed + PARENT_ATTR.find_iter(expr).count()
        };
        let mut base = file.to_path_buf();
        for _ in 0..parents {
            base = base.parent()?.to_path_buf();
        }
        base
    } else if let Some(var) = IDENTIFIER
        .find_iter(expr)
        .find_map(|m| variables.get(m.as_str()))
    {
        var.clone()
    } else {
        let (first, rest) = literals.split_first()?;
        let start = Path::new(first);
        let mut base = if start.is_absolute() {
            start.to_path_buf()
        } else {
            project_root.join(start)
        };
        for segment in rest {
            base.push(segment);
        }
        return Some(normalize_path(&base));
    };

    let mut path = base;
    for segment in literals {
        path.push(segment);
    }
    Some(normalize_path(&path))
}
