//! End-to-end import analysis over throwaway projects

use std::fs;
use std::path::{Path, PathBuf};

use strata::core::broken_deps::BrokenStatus;
use strata::imports::ImportKind;
use strata::{AnalysisEngine, AnalysisOptions, StrataConfig};
use tempfile::TempDir;

fn write(root: &Path, name: &str, content: &str) -> PathBuf {
    let path = root.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

fn project() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap();
    (dir, root)
}

fn engine(root: &Path) -> AnalysisEngine {
    AnalysisEngine::new(StrataConfig::default().with_project_root(root)).unwrap()
}

/// `pkg/a.py` imports `.b`, which imports `..c`; `c.py` does not exist.
fn relative_chain(root: &Path) -> PathBuf {
    write(root, "pkg/__init__.py", "");
    write(root, "pkg/b.py", "from ..c import thing\n");
    write(root, "pkg/a.py", "from .b import helper\n")
}

#[test]
fn test_relative_chain_with_missing_target() {
    let (_dir, root) = project();
    let a = relative_chain(&root);
    let b = root.join("pkg/b.py");

    let report = engine(&root)
        .analyze_imports(&[a.clone()], AnalysisOptions::default())
        .unwrap();

    let visited: Vec<&Path> = report.files.iter().map(|f| f.path.as_path()).collect();
    assert_eq!(visited, vec![a.as_path(), b.as_path()]);
    assert_eq!(report.file(&b).unwrap().depth, 1);

    let a_import = &report.file(&a).unwrap().imports[0];
    assert_eq!(a_import.kind, ImportKind::Relative);
    assert_eq!(a_import.resolved_path.as_deref(), Some(b.as_path()));

    let c_import = &report.file(&b).unwrap().imports[0];
    assert_eq!(c_import.module, "..c");
    assert_eq!(c_import.level, 2);
    assert!(!c_import.resolved);

    assert_eq!(report.edges.len(), 1);
    assert_eq!(report.statistics.unresolved_imports, 1);
    assert_eq!(report.statistics.relative_imports, 2);
    assert!(report.cycles.is_empty());
}

#[test]
fn test_max_depth_zero_records_but_does_not_follow() {
    let (_dir, root) = project();
    let a = relative_chain(&root);

    let report = engine(&root)
        .analyze_imports(
            &[a.clone()],
            AnalysisOptions {
                max_depth: Some(0),
                ..AnalysisOptions::default()
            },
        )
        .unwrap();

    assert_eq!(report.files.len(), 1);
    let only = &report.files[0];
    assert_eq!(only.path, a);
    assert_eq!(only.imports.len(), 1);
    assert!(only.imports[0].resolved);
    assert!(report.edges.is_empty());
    assert_eq!(report.statistics.max_depth_reached, 0);
}

#[test]
fn test_cycle_found_once_from_any_entry() {
    let (_dir, root) = project();
    let a = write(&root, "a.py", "import b\n");
    let b = write(&root, "b.py", "import c\n");
    let c = write(&root, "c.py", "import a\n");
    let expected = vec![a.clone(), b.clone(), c.clone(), a.clone()];

    for entry in [&a, &b, &c] {
        let report = engine(&root)
            .analyze_imports(&[entry.clone()], AnalysisOptions::default())
            .unwrap();
        assert_eq!(report.cycles, vec![expected.clone()], "entry {}", entry.display());
        assert_eq!(report.statistics.cycle_count, 1);
        assert_eq!(report.statistics.files_analyzed, 3);
    }
}

#[test]
fn test_parallel_entries_share_one_graph() {
    let (_dir, root) = project();
    let a = write(&root, "a.py", "import shared\n");
    let b = write(&root, "b.py", "import shared\n");
    let shared = write(&root, "shared.py", "import json\n");

    let report = engine(&root)
        .analyze_imports(&[a, b], AnalysisOptions::default())
        .unwrap();

    assert_eq!(report.files.len(), 3);
    assert_eq!(report.file(&shared).unwrap().depth, 1);
    assert_eq!(report.edges.len(), 2);
    assert_eq!(report.statistics.standard_imports, 1);
}

#[test]
fn test_transitive_change_forces_reanalysis() {
    let (_dir, root) = project();
    let a = write(&root, "a.py", "import b\n");
    write(&root, "b.py", "import c\n");
    let c = write(&root, "c.py", "VALUE = 1\n");
    let engine = engine(&root);
    let entries = [a.clone()];

    let first = engine.analyze_imports(&entries, AnalysisOptions::default()).unwrap();
    assert_eq!(first.statistics.cache_misses, 3);

    let second = engine.analyze_imports(&entries, AnalysisOptions::default()).unwrap();
    assert_eq!(second.statistics.cache_hits, 3);
    let stored_hash = engine.cache().entry(&a).unwrap().import_hash;

    fs::write(&c, "VALUE = 2\n").unwrap();
    assert_ne!(engine.cache().import_hash(&a), stored_hash);

    let third = engine.analyze_imports(&entries, AnalysisOptions::default()).unwrap();
    assert_eq!(third.statistics.cache_hits, 0);
    assert_eq!(third.statistics.cache_misses, 3);
    assert!(third.files.iter().all(|f| !f.from_cache));
}

#[test]
fn test_broken_dependency_becomes_permanent() {
    let (_dir, root) = project();
    let a = write(&root, "a.py", "import b\n");
    fs::write(root.join("b.py"), [0u8, 159, 146, 150, 0, 0]).unwrap();

    let mut config = StrataConfig::default()
        .with_project_root(&root)
        .without_cache();
    config.broken_dependencies.max_retries = 2;
    let engine = AnalysisEngine::new(config).unwrap();
    let broken = engine.broken_dependencies();

    for attempt in 1..=2 {
        let report = engine
            .analyze_imports(&[a.clone()], AnalysisOptions::default())
            .unwrap();
        assert!(report.file(&a).unwrap().degraded);
        assert_eq!(broken.status(&a, "b"), Some(BrokenStatus::Active));
        assert_eq!(broken.get(&a, "b").unwrap().retry_count, attempt);
    }

    let report = engine
        .analyze_imports(&[a.clone()], AnalysisOptions::default())
        .unwrap();
    assert_eq!(broken.status(&a, "b"), Some(BrokenStatus::PermanentFailure));
    assert!(report.warnings.iter().any(|w| w.contains("permanent failure")));
    assert_eq!(report.statistics.degraded_files, 2);

    engine
        .analyze_imports(&[a.clone()], AnalysisOptions::default())
        .unwrap();
    assert_eq!(broken.get(&a, "b").unwrap().retry_count, 3);
    assert_eq!(engine.retry_broken_dependencies().attempted, 0);
}

#[test]
fn test_permanent_failure_falls_back_to_cached_analysis() {
    let (_dir, root) = project();
    let a = write(&root, "a.py", "import b\n");
    let b = write(&root, "b.py", "import json\n");

    let mut config = StrataConfig::default().with_project_root(&root);
    config.broken_dependencies.max_retries = 1;
    let engine = AnalysisEngine::new(config).unwrap();

    engine
        .analyze_imports(&[a.clone()], AnalysisOptions::default())
        .unwrap();

    fs::write(&b, [0u8, 0, 255, 254]).unwrap();
    let retrying = engine
        .analyze_imports(&[a.clone()], AnalysisOptions::default())
        .unwrap();
    assert!(retrying.file(&b).unwrap().imports.is_empty());

    let fallback = engine
        .analyze_imports(&[a.clone()], AnalysisOptions::default())
        .unwrap();
    let b_node = fallback.file(&b).unwrap();
    assert!(b_node.from_cache);
    assert_eq!(b_node.imports[0].module, "json");
    assert!(fallback.file(&a).unwrap().degraded);
}

#[test]
fn test_missing_entries_are_rejected() {
    let (_dir, root) = project();
    let result = engine(&root).analyze_imports(&[root.join("nope.py")], AnalysisOptions::default());
    assert!(result.is_err());
}

#[test]
fn test_default_root_does_not_leak_between_runs() {
    let (_dir, root) = project();
    write(&root, "main.py", "import json\n");
    let run = write(&root, "tool/run.py", "import helpers\n");
    write(&root, "tool/helpers.py", "VALUE = 1\n");

    let summarize = |engine: &AnalysisEngine| {
        let report = engine
            .analyze_imports(&[run.clone()], AnalysisOptions::default())
            .unwrap();
        let import = report.file(&run).unwrap().imports[0].clone();
        (import.kind, import.resolved, report.files.len())
    };

    let fresh = summarize(&AnalysisEngine::new(StrataConfig::default()).unwrap());
    assert_eq!(fresh, (ImportKind::Local, true, 2));

    let reused = AnalysisEngine::new(StrataConfig::default()).unwrap();
    reused
        .analyze_imports(&[root.join("main.py")], AnalysisOptions::default())
        .unwrap();
    assert_eq!(summarize(&reused), fresh);
}
