//! Import classification: relative, local, standard or external.

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use tracing::debug;

use crate::core::config::LocalHeuristic;
use crate::imports::{ImportKind, RawImport};
use crate::lang::{language_for_path, registered_languages, Language};

/// Top-level modules shipped with CPython 3.
static PYTHON_STDLIB: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "__future__", "_thread", "abc", "aifc", "argparse", "array", "ast", "asynchat",
        "asyncio", "asyncore", "atexit", "audioop", "base64", "bdb", "binascii", "bisect",
        "builtins", "bz2", "calendar", "cgi", "cgitb", "chunk", "cmath", "cmd", "code",
        "codecs", "codeop", "collections", "colorsys", "compileall", "concurrent",
        "configparser", "contextlib", "contextvars", "copy", "copyreg", "cProfile", "crypt",
        "csv", "ctypes", "curses", "dataclasses", "datetime", "dbm", "decimal", "difflib",
        "dis", "doctest", "email", "encodings", "ensurepip", "enum", "errno", "faulthandler",
        "fcntl", "filecmp", "fileinput", "fnmatch", "fractions", "ftplib", "functools", "gc",
        "getopt", "getpass", "gettext", "glob", "graphlib", "grp", "gzip", "hashlib", "heapq",
        "hmac", "html", "http", "imaplib", "imghdr", "importlib", "inspect", "io",
        "ipaddress", "itertools", "json", "keyword", "lib2to3", "linecache", "locale",
        "logging", "lzma", "mailbox", "marshal", "math", "mimetypes", "mmap", "modulefinder",
        "msvcrt", "multiprocessing", "netrc", "numbers", "operator", "optparse", "os",
        "pathlib", "pdb", "pickle", "pickletools", "pipes", "pkgutil", "platform", "plistlib",
        "poplib", "posix", "pprint", "profile", "pstats", "pty", "pwd", "py_compile",
        "pyclbr", "pydoc", "queue", "quopri", "random", "re", "readline", "reprlib",
        "resource", "rlcompleter", "runpy", "sched", "secrets", "select", "selectors",
        "shelve", "shlex", "shutil", "signal", "site", "smtplib", "socket", "socketserver",
        "sqlite3", "ssl", "stat", "statistics", "string", "stringprep", "struct",
        "subprocess", "symtable", "sys", "sysconfig", "syslog", "tabnanny", "tarfile",
        "tempfile", "termios", "textwrap", "threading", "time", "timeit", "tkinter", "token",
        "tokenize", "tomllib", "trace", "traceback", "tracemalloc", "tty", "turtle", "types",
        "typing", "unicodedata", "unittest", "urllib", "uuid", "venv", "warnings", "wave",
        "weakref", "webbrowser", "winreg", "wsgiref", "xml", "xmlrpc", "zipapp", "zipfile",
        "zipimport", "zlib", "zoneinfo",
    ]
    .into_iter()
    .collect()
});

/// Node.js core modules.
static NODE_BUILTINS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "assert", "async_hooks", "buffer", "child_process", "cluster", "console", "crypto",
        "dgram", "dns", "events", "fs", "http", "http2", "https", "module", "net", "os",
        "path", "perf_hooks", "process", "querystring", "readline", "stream",
        "string_decoder", "timers", "tls", "tty", "url", "util", "v8", "vm", "worker_threads",
        "zlib",
    ]
    .into_iter()
    .collect()
});

/// Package marker that makes a directory importable, per language.
fn package_markers(language: Language) -> &'static [&'static str] {
    match language {
        Language::Python => &["__init__.py"],
        Language::JavaScript | Language::TypeScript => {
            &["package.json", "index.js", "index.ts", "index.tsx"]
        }
        Language::Rust => &["mod.rs"],
        _ => &[],
    }
}

/// Source extensions registered for `language`.
pub(crate) fn source_extensions(language: Language) -> &'static [&'static str] {
    registered_languages()
        .iter()
        .find(|info| info.language == language)
        .map(|info| info.extensions)
        .unwrap_or(&[])
}

/// Tags imports, caching per-name decisions for the lifetime of a run.
pub struct ImportClassifier {
    project_root: PathBuf,
    heuristic: LocalHeuristic,
    vendored: HashSet<String>,
    cache: DashMap<(Language, String), ImportKind>,
}

impl ImportClassifier {
    pub fn new(
        project_root: impl Into<PathBuf>,
        heuristic: LocalHeuristic,
        vendored_directories: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            project_root: project_root.into(),
            heuristic,
            vendored: vendored_directories.into_iter().collect(),
            cache: DashMap::new(),
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Classify one import as seen from a file of `language`.
    pub fn classify(&self, import: &RawImport, language: Language) -> ImportKind {
        if import.level > 0 {
            return ImportKind::Relative;
        }

        let first = first_segment(&import.module, language);
        if first.is_empty() {
            return ImportKind::External;
        }

        let key = (language, first.to_string());
        if let Some(kind) = self.cache.get(&key) {
            return *kind;
        }

        let kind = self.classify_absolute(&import.module, first, language);
        debug!(module = %import.module, %language, kind = %kind, "Classified import");
        self.cache.insert(key, kind);
        kind
    }

    /// Number of distinct names classified so far.
    pub fn cached_names(&self) -> usize {
        self.cache.len()
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    fn classify_absolute(&self, module: &str, first: &str, language: Language) -> ImportKind {
        match language {
            Language::Rust => match first {
                "std" | "core" | "alloc" | "proc_macro" | "test" => ImportKind::Standard,
                "crate" | "self" | "super" => ImportKind::Local,
                _ => self.local_or(first, language, ImportKind::External),
            },
            Language::Go => {
                if !first.contains('.') {
                    ImportKind::Standard
                } else {
                    self.local_or(first, language, ImportKind::External)
                }
            }
            Language::JavaScript | Language::TypeScript => {
                if module.starts_with("node:") || NODE_BUILTINS.contains(first) {
                    ImportKind::Standard
                } else {
                    self.local_or(first, language, ImportKind::External)
                }
            }
            Language::Java => {
                if first == "java" || first == "javax" {
                    ImportKind::Standard
                } else {
                    self.local_or(first, language, ImportKind::External)
                }
            }
            // Angle-bracket includes; quoted ones arrive as relative
            Language::C | Language::Cpp => ImportKind::Standard,
            _ => self.local_or(first, language, {
                if language == Language::Python && PYTHON_STDLIB.contains(first) {
                    ImportKind::Standard
                } else {
                    ImportKind::External
                }
            }),
        }
    }

    /// `Local` when `first` names a project package, else `otherwise`.
    ///
    /// Local detection takes precedence over the standard-library set so a
    /// project module shadowing a stdlib name resolves to the project.
    fn local_or(&self, first: &str, language: Language, otherwise: ImportKind) -> ImportKind {
        if self.vendored.contains(first) {
            return ImportKind::External;
        }
        if self.is_local(first, language) {
            ImportKind::Local
        } else {
            otherwise
        }
    }

    fn is_local(&self, first: &str, language: Language) -> bool {
        let extensions = source_extensions(language);
        if extensions
            .iter()
            .any(|ext| self.project_root.join(format!("{first}.{ext}")).is_file())
        {
            return true;
        }

        let dir = self.project_root.join(first);
        if !dir.is_dir() {
            return false;
        }
        if package_markers(language)
            .iter()
            .any(|marker| dir.join(marker).is_file())
        {
            return true;
        }
        match self.heuristic {
            LocalHeuristic::MarkerOnly => false,
            LocalHeuristic::MarkerOrSource => contains_source(&dir, language),
        }
    }
}

fn first_segment(module: &str, language: Language) -> &str {
    let module = module.strip_prefix("node:").unwrap_or(module);
    let separator: &[char] = match language {
        Language::Rust => &[':'],
        Language::Go | Language::JavaScript | Language::TypeScript | Language::C | Language::Cpp => {
            &['/']
        }
        _ => &['.', '/'],
    };
    // Scoped npm packages keep their scope
    if module.starts_with('@') {
        if let Some(idx) = module.find('/') {
            return match module[idx + 1..].find('/') {
                Some(next) => &module[..idx + 1 + next],
                None => module,
            };
        }
    }
    module.split(separator).next().unwrap_or("")
}

/// Directory levels below a candidate directory searched for sources.
const SOURCE_SCAN_DEPTH: usize = 4;
/// Directory entries examined before giving up on a candidate directory.
const SOURCE_SCAN_BUDGET: usize = 10_000;

/// Whether `dir` holds at least one source file of `language` within
/// [`SOURCE_SCAN_DEPTH`] levels. Symlinked directories are not followed.
fn contains_source(dir: &Path, language: Language) -> bool {
    let mut pending = VecDeque::from([(dir.to_path_buf(), 0usize)]);
    let mut examined = 0usize;
    while let Some((current, depth)) = pending.pop_front() {
        let Ok(entries) = fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            examined += 1;
            if examined > SOURCE_SCAN_BUDGET {
                return false;
            }
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let path = entry.path();
            if file_type.is_dir() {
                if depth < SOURCE_SCAN_DEPTH {
                    pending.push_back((path, depth + 1));
                }
            } else if language_for_path(&path) == Some(language) {
                return true;
            }
        }
    }
    false
}
