//! File-system watcher that keeps the import cache honest between runs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use crate::core::errors::{Result, StrataError};
use crate::core::file_utils::canonicalize_path;
use crate::io::cache::ImportCache;

/// Invalidates cache entries as files change under the watched roots.
pub struct CacheWatcher {
    watcher: RecommendedWatcher,
    roots: Vec<PathBuf>,
}

impl CacheWatcher {
    /// Create a watcher with no roots yet. Events for `ignored` paths (the
    /// cache's own persistence files) never touch the cache.
    pub fn start(cache: Arc<ImportCache>, ignored: Vec<PathBuf>) -> Result<Self> {
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    apply_event(&cache, &event, &ignored);
                }
                Err(err) => warn!(reason = %err, "File watcher error"),
            },
            NotifyConfig::default(),
        )
        .map_err(|e| StrataError::internal(format!("Failed to create watcher: {e}")))?;

        Ok(Self {
            watcher,
            roots: Vec::new(),
        })
    }

    /// Watch `root` recursively. Returns `false` when an existing root
    /// already covers it.
    pub fn watch(&mut self, root: &Path) -> Result<bool> {
        if self.roots.iter().any(|known| root.starts_with(known)) {
            return Ok(false);
        }
        self.watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| {
                StrataError::internal(format!("Failed to watch {}: {e}", root.display()))
            })?;
        debug!(root = %root.display(), "Watching for cache invalidation");
        self.roots.push(root.to_path_buf());
        Ok(true)
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

/// Apply one change event to `cache`; returns the number of entries dropped.
///
/// An edited or removed file is dropped together with every entry that
/// imports it. A created file also drops the entries holding an unresolved
/// import it could now satisfy.
pub fn apply_event(cache: &ImportCache, event: &Event, ignored: &[PathBuf]) -> usize {
    let paths = event
        .paths
        .iter()
        .filter(|path| !ignored.iter().any(|skip| skip == *path));

    match event.kind {
        EventKind::Modify(_) | EventKind::Remove(_) => {
            paths.map(|path| invalidate_path(cache, path)).sum()
        }
        EventKind::Create(_) => paths
            .map(|path| {
                let mut dropped = invalidate_path(cache, path);
                if let Some(name) = importable_name(path) {
                    for importer in cache.unresolved_importers(&name) {
                        dropped += cache.invalidate_with_dependents(&importer);
                    }
                }
                dropped
            })
            .sum(),
        _ => 0,
    }
}

fn invalidate_path(cache: &ImportCache, path: &Path) -> usize {
    let mut dropped = cache.invalidate_with_dependents(path);
    let canonical = canonicalize_path(path);
    if canonical != path {
        dropped += cache.invalidate_with_dependents(&canonical);
    }
    dropped
}

/// Module name a new path makes importable: the file stem, or the package
/// directory name for `__init__` files.
fn importable_name(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    if stem == "__init__" || stem == "index" || stem == "mod" {
        let parent = path.parent()?.file_name()?.to_str()?;
        return Some(parent.to_string());
    }
    Some(stem.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imports::{FileAnalysis, ImportKind, ImportRecord, RawImport};
    use crate::lang::Language;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};
    use std::fs;
    use tempfile::TempDir;

    fn cached(cache: &ImportCache, path: &Path, imports: Vec<ImportRecord>) {
        cache
            .get_or_analyze(path, false, |_| FileAnalysis {
                path: path.to_path_buf(),
                language: Language::Python,
                imports,
            })
            .unwrap();
    }

    fn local(module: &str, target: Option<&Path>) -> ImportRecord {
        ImportRecord::from_raw(
            &RawImport::new(module, 0, 1),
            ImportKind::Local,
            target.map(Path::to_path_buf),
        )
    }

    #[test]
    fn test_modify_invalidates_file_and_importers() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.py");
        let b = dir.path().join("b.py");
        let c = dir.path().join("c.py");
        fs::write(&a, "import b\n").unwrap();
        fs::write(&b, "y = 1\n").unwrap();
        fs::write(&c, "z = 1\n").unwrap();

        let cache = ImportCache::new(3600, 8);
        cached(&cache, &a, vec![local("b", Some(&b))]);
        cached(&cache, &b, Vec::new());
        cached(&cache, &c, Vec::new());

        let dropped = apply_event(
            &cache,
            &Event::new(EventKind::Modify(ModifyKind::Any)).add_path(b.clone()),
            &[],
        );
        assert_eq!(dropped, 2);
        assert!(cache.peek(&a).is_none());
        assert!(cache.peek(&b).is_none());
        assert!(cache.peek(&c).is_some());
    }

    #[test]
    fn test_create_drops_only_matching_unresolved_importers() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.py");
        let other = dir.path().join("other.py");
        fs::write(&a, "import fresh\n").unwrap();
        fs::write(&other, "import elsewhere\n").unwrap();

        let cache = ImportCache::new(3600, 8);
        cached(&cache, &a, vec![local("fresh", None)]);
        cached(&cache, &other, vec![local("elsewhere", None)]);

        apply_event(
            &cache,
            &Event::new(EventKind::Create(CreateKind::File)).add_path(dir.path().join("fresh.py")),
            &[],
        );
        assert!(cache.peek(&a).is_none());
        assert!(cache.peek(&other).is_some());
    }

    #[test]
    fn test_cache_persistence_files_are_ignored() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.py");
        fs::write(&a, "x = 1\n").unwrap();
        let persist = dir.path().join("cache.json");
        let ignored = vec![ImportCache::temp_path_for(&persist), persist.clone()];

        let cache = ImportCache::new(3600, 8);
        cached(&cache, &a, Vec::new());
        let temp = ImportCache::temp_path_for(&persist);
        for event in [
            Event::new(EventKind::Create(CreateKind::File)).add_path(temp.clone()),
            Event::new(EventKind::Remove(RemoveKind::File)).add_path(temp),
            Event::new(EventKind::Create(CreateKind::File)).add_path(persist),
        ] {
            assert_eq!(apply_event(&cache, &event, &ignored), 0);
        }
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_watcher_registers_each_distinct_root() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let cache = Arc::new(ImportCache::new(3600, 8));
        let mut watcher = CacheWatcher::start(cache, Vec::new()).unwrap();

        assert!(watcher.watch(first.path()).unwrap());
        assert!(watcher.watch(second.path()).unwrap());
        let nested = first.path().join("pkg");
        fs::create_dir_all(&nested).unwrap();
        assert!(!watcher.watch(&nested).unwrap());
        assert_eq!(
            watcher.roots(),
            &[first.path().to_path_buf(), second.path().to_path_buf()]
        );
    }
}
