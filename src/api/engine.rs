//! Main analysis engine implementation.
//!
//! [`AnalysisEngine`] is the per-run context object: it owns the language
//! registry, the import cache and the broken-dependency handler, so
//! concurrent engines never share hidden state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::api::results::{DependencyEdge, FileImports, ImportAnalysisReport, ImportStatistics};
use crate::api::storage::{NullStorage, StorageSink};
use crate::core::broken_deps::BrokenDependencyHandler;
use crate::core::config::StrataConfig;
use crate::core::errors::{Result, StrataError};
use crate::core::file_utils::{canonicalize_path, FileReader};
use crate::graph::{DependencyTraversal, TraversalOptions};
use crate::imports::{ImportAnalyzer, ImportClassifier, ImportResolver};
use crate::io::cache::ImportCache;
use crate::io::watcher::CacheWatcher;
use crate::lang::{Language, LanguageRegistry};
use crate::partition::PartitionResult;

/// Per-call overrides for [`AnalysisEngine::analyze_imports`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisOptions {
    /// Overrides `imports.max_depth` when set
    pub max_depth: Option<usize>,
    /// Ignore cached analyses for this run
    pub refresh: bool,
}

/// Outcome of [`AnalysisEngine::retry_broken_dependencies`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySummary {
    pub attempted: usize,
    pub resolved: Vec<(PathBuf, String)>,
    pub still_broken: Vec<(PathBuf, String)>,
}

/// Main analysis engine
pub struct AnalysisEngine {
    config: StrataConfig,
    registry: LanguageRegistry,
    cache: Arc<ImportCache>,
    broken: BrokenDependencyHandler,
    storage: Arc<dyn StorageSink>,
    watcher: Mutex<Option<CacheWatcher>>,
}

impl AnalysisEngine {
    /// Create a new engine, loading the persisted cache when configured.
    pub fn new(config: StrataConfig) -> Result<Self> {
        info!("Initializing strata analysis engine");
        config.validate()?;

        let cache = Arc::new(ImportCache::from_config(
            &config.cache,
            config.imports.max_hash_depth,
        ));
        if config.cache.enabled {
            if let Some(persist) = &config.cache.persist_path {
                let loaded = cache.load(persist);
                debug!(path = %persist.display(), entries = loaded, "Loaded persisted import cache");
            }
        }

        Ok(Self {
            registry: LanguageRegistry::new(&config.partition),
            broken: BrokenDependencyHandler::new(&config.broken_dependencies),
            storage: Arc::new(NullStorage),
            watcher: Mutex::new(None),
            cache,
            config,
        })
    }

    /// Route run summaries to `storage`.
    pub fn with_storage(mut self, storage: Arc<dyn StorageSink>) -> Self {
        self.storage = storage;
        self
    }

    pub fn config(&self) -> &StrataConfig {
        &self.config
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ImportCache> {
        &self.cache
    }

    pub fn broken_dependencies(&self) -> &BrokenDependencyHandler {
        &self.broken
    }

    /// Partition one file through the fallback cascade. Never fails.
    pub fn partition_file(
        &self,
        path: impl AsRef<Path>,
        content: Option<&str>,
        language: Option<Language>,
    ) -> PartitionResult {
        self.registry.partition_file(path.as_ref(), content, language)
    }

    /// Analyze the imports reachable from `entries`.
    ///
    /// Missing entry files are reported as warnings; the call only fails when
    /// none of them exist.
    pub fn analyze_imports(
        &self,
        entries: &[PathBuf],
        options: AnalysisOptions,
    ) -> Result<ImportAnalysisReport> {
        let started = Instant::now();

        let mut warnings = Vec::new();
        let mut entry_files: Vec<PathBuf> = Vec::new();
        for entry in entries {
            if entry.is_file() {
                let canonical = canonicalize_path(entry);
                if !entry_files.contains(&canonical) {
                    entry_files.push(canonical);
                }
            } else {
                warn!(file = %entry.display(), "Entry file does not exist");
                warnings.push(format!("Entry file does not exist: {}", entry.display()));
            }
        }
        if entry_files.is_empty() {
            return Err(StrataError::validation_field(
                "No entry files exist",
                "entries",
            ));
        }

        let project_root = self.project_root_for(&entry_files);
        info!(
            entries = entry_files.len(),
            root = %project_root.display(),
            "Starting import analysis"
        );
        self.ensure_watcher(&project_root);

        let analyzer = self.analyzer_for(&project_root);
        let traversal_options = TraversalOptions {
            max_depth: options.max_depth.or(self.config.imports.max_depth),
            parallel: self.config.imports.parallel,
            refresh: options.refresh,
        };

        let before = self.cache.stats();
        let traversal = DependencyTraversal::new(&analyzer, &self.broken, traversal_options);
        let outcome = if self.config.cache.enabled {
            traversal.with_cache(&self.cache).run(&entry_files)
        } else {
            traversal.run(&entry_files)
        };
        let after = self.cache.stats();

        let graph = outcome.graph;
        warnings.extend(outcome.warnings);

        let cycles = graph.detect_cycles();
        let mut statistics = ImportStatistics::from_graph(&graph, cycles.len());
        statistics.cache_hits = after.hits.saturating_sub(before.hits);
        statistics.cache_misses = after.misses.saturating_sub(before.misses);
        statistics.duration_ms = started.elapsed().as_millis() as u64;

        let files = graph
            .nodes()
            .map(|node| FileImports {
                path: node.path.clone(),
                language: node.language,
                depth: node.depth,
                imports: node.imports.clone(),
                degraded: node.degraded,
                from_cache: node.from_cache,
            })
            .collect();
        let edges = graph
            .edges()
            .into_iter()
            .map(|(from, to)| DependencyEdge { from, to })
            .collect();

        let report = ImportAnalysisReport {
            entry_files,
            files,
            edges,
            cycles,
            statistics,
            warnings,
            broken_dependencies: self.broken.entries(),
        };

        info!(
            files = report.statistics.files_analyzed,
            imports = report.statistics.total_imports,
            cycles = report.statistics.cycle_count,
            duration_ms = report.statistics.duration_ms,
            "Import analysis completed"
        );

        self.persist_cache();
        self.store_summary(&report);
        Ok(report)
    }

    /// Re-check every broken pair whose backoff has elapsed.
    ///
    /// The importing file is re-analyzed and the import's target re-read; a
    /// readable target resolves the pair, anything else counts as another
    /// failure.
    pub fn retry_broken_dependencies(&self) -> RetrySummary {
        let due = self.broken.due_for_retry(Utc::now());
        let mut summary = RetrySummary::default();
        if due.is_empty() {
            return summary;
        }

        let mut analyzers: HashMap<PathBuf, ImportAnalyzer> = HashMap::new();
        for (file, import) in due {
            summary.attempted += 1;
            let root = self.project_root_for(std::slice::from_ref(&file));
            let analyzer = analyzers
                .entry(root.clone())
                .or_insert_with(|| self.analyzer_for(&root));

            match retry_pair(analyzer, &file, &import) {
                Ok(()) => {
                    self.broken.record_success(&file, &import);
                    summary.resolved.push((file, import));
                }
                Err(reason) => {
                    self.broken.record_failure(&file, &import, &reason);
                    summary.still_broken.push((file, import));
                }
            }
        }

        info!(
            attempted = summary.attempted,
            resolved = summary.resolved.len(),
            "Retried broken dependencies"
        );
        summary
    }

    /// Drop one cached analysis, or all of them.
    pub fn invalidate_cache(&self, path: Option<&Path>) {
        match path {
            Some(path) => self.cache.invalidate(Some(&canonicalize_path(path))),
            None => self.cache.invalidate(None),
        }
    }

    /// Write the cache to `cache.persist_path`; a no-op when none is set.
    pub fn save_cache(&self) -> Result<()> {
        match &self.config.cache.persist_path {
            Some(path) => self.cache.save(path),
            None => Ok(()),
        }
    }

    /// The configured root, else one derived from `files` alone.
    fn project_root_for(&self, files: &[PathBuf]) -> PathBuf {
        match &self.config.imports.project_root {
            Some(root) => canonicalize_path(root),
            None => default_project_root(files),
        }
    }

    /// Fresh classifier and resolver caches for each run.
    fn analyzer_for(&self, project_root: &Path) -> ImportAnalyzer {
        let imports = &self.config.imports;
        ImportAnalyzer::new(
            ImportClassifier::new(
                project_root,
                imports.local_heuristic,
                imports.vendored_directories.iter().cloned(),
            ),
            ImportResolver::new(
                project_root,
                imports.extra_search_paths.clone(),
                imports.detect_search_path_mutations,
            ),
            self.config.partition.min_keyword_score,
        )
    }

    /// Watch `root`, starting the watcher on first use. Each distinct root
    /// is registered once.
    fn ensure_watcher(&self, root: &Path) {
        if !(self.config.cache.enabled && self.config.cache.watch) {
            return;
        }
        let mut slot = self.watcher.lock();
        if slot.is_none() {
            let ignored = self
                .config
                .cache
                .persist_path
                .iter()
                .flat_map(|path| {
                    let target = canonical_target(path);
                    [ImportCache::temp_path_for(&target), target]
                })
                .collect();
            match CacheWatcher::start(Arc::clone(&self.cache), ignored) {
                Ok(started) => *slot = Some(started),
                Err(err) => {
                    warn!(reason = %err, "Could not start cache watcher");
                    return;
                }
            }
        }
        if let Some(watcher) = slot.as_mut() {
            if let Err(err) = watcher.watch(root) {
                warn!(root = %root.display(), reason = %err, "Could not watch project root");
            }
        }
    }

    /// Roots the cache watcher currently covers.
    pub fn watched_roots(&self) -> Vec<PathBuf> {
        self.watcher
            .lock()
            .as_ref()
            .map(|watcher| watcher.roots().to_vec())
            .unwrap_or_default()
    }

    fn persist_cache(&self) {
        if !self.config.cache.enabled {
            return;
        }
        if let Err(err) = self.save_cache() {
            warn!(reason = %err, "Failed to persist import cache");
        }
    }

    fn store_summary(&self, report: &ImportAnalysisReport) {
        let stats = &report.statistics;
        let entry_files: Vec<String> = report
            .entry_files
            .iter()
            .map(|path| path.display().to_string())
            .collect();
        let metadata: HashMap<String, serde_json::Value> = HashMap::from([
            ("kind".to_string(), json!("import_analysis")),
            ("entry_files".to_string(), json!(entry_files)),
            ("files_analyzed".to_string(), json!(stats.files_analyzed)),
            ("total_imports".to_string(), json!(stats.total_imports)),
            ("cycle_count".to_string(), json!(stats.cycle_count)),
            ("degraded_files".to_string(), json!(stats.degraded_files)),
            ("duration_ms".to_string(), json!(stats.duration_ms)),
            ("created_at".to_string(), json!(Utc::now().to_rfc3339())),
        ]);

        match self.storage.create_node(&report.summary_line(), &metadata) {
            Ok(id) => debug!(node = %id, "Stored analysis summary"),
            Err(err) => warn!(reason = %err, "Failed to store analysis summary"),
        }
    }
}

/// Common ancestor of the entries' directories, lifted above any enclosing
/// Python package so the outermost package is importable by name.
pub fn default_project_root(files: &[PathBuf]) -> PathBuf {
    let mut dirs = files
        .iter()
        .map(|file| file.parent().map(Path::to_path_buf).unwrap_or_default());
    let Some(mut root) = dirs.next() else {
        return PathBuf::from(".");
    };
    for dir in dirs {
        while !dir.starts_with(&root) {
            match root.parent() {
                Some(parent) => root = parent.to_path_buf(),
                None => break,
            }
        }
    }
    while root.join("__init__.py").is_file() {
        match root.parent() {
            Some(parent) => root = parent.to_path_buf(),
            None => break,
        }
    }
    if root.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        root
    }
}

/// `path` with its parent canonicalized, for files that may not exist yet.
fn canonical_target(path: &Path) -> PathBuf {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => {
            let parent = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            canonicalize_path(parent).join(name)
        }
        _ => canonicalize_path(path),
    }
}

fn retry_pair(analyzer: &ImportAnalyzer, file: &Path, import: &str) -> std::result::Result<(), String> {
    let content = FileReader::read_to_string(file).map_err(|e| e.to_string())?;
    let analysis = analyzer.analyze(file, &content);
    let record = analysis
        .imports
        .iter()
        .find(|record| record.key() == import)
        .ok_or_else(|| format!("import '{import}' no longer present"))?;
    let target = record
        .resolved_path
        .as_ref()
        .ok_or_else(|| format!("import '{import}' does not resolve"))?;
    FileReader::read_to_string(target)
        .map(|_| ())
        .map_err(|e| e.to_string())
}
