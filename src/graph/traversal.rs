//! Work-queue traversal from entry files over resolved imports.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::core::broken_deps::{BrokenDependencyHandler, RetryDecision};
use crate::core::errors::{Result, StrataError};
use crate::core::file_utils::FileReader;
use crate::graph::{DependencyGraph, FileNode};
use crate::imports::{FileAnalysis, ImportAnalyzer};
use crate::io::cache::ImportCache;
use crate::lang::{language_for_path, Language};

#[derive(Debug, Clone, Copy, Default)]
pub struct TraversalOptions {
    /// Entry files are depth 0; files deeper than this are not analyzed
    pub max_depth: Option<usize>,
    /// Walk each entry file on its own worker
    pub parallel: bool,
    /// Bypass cached analyses
    pub refresh: bool,
}

#[derive(Debug, Default)]
pub struct TraversalOutcome {
    pub graph: DependencyGraph,
    pub warnings: Vec<String>,
}

/// A file waiting to be analyzed, with the import that led to it.
struct Pending {
    path: PathBuf,
    depth: usize,
    via: Option<(PathBuf, String)>,
}

pub struct DependencyTraversal<'a> {
    analyzer: &'a ImportAnalyzer,
    broken: &'a BrokenDependencyHandler,
    cache: Option<&'a ImportCache>,
    options: TraversalOptions,
}

impl<'a> DependencyTraversal<'a> {
    pub fn new(
        analyzer: &'a ImportAnalyzer,
        broken: &'a BrokenDependencyHandler,
        options: TraversalOptions,
    ) -> Self {
        Self {
            analyzer,
            broken,
            cache: None,
            options,
        }
    }

    pub fn with_cache(mut self, cache: &'a ImportCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Walk every entry file. In parallel mode each entry gets its own
    /// visited set and the per-entry graphs are unioned in entry order.
    pub fn run(&self, entries: &[PathBuf]) -> TraversalOutcome {
        let mut outcome = if self.options.parallel && entries.len() > 1 {
            let parts: Vec<TraversalOutcome> = entries
                .par_iter()
                .map(|entry| self.walk(std::slice::from_ref(entry)))
                .collect();

            let mut merged = TraversalOutcome::default();
            for part in parts {
                merged.graph.merge(part.graph);
                for warning in part.warnings {
                    if !merged.warnings.contains(&warning) {
                        merged.warnings.push(warning);
                    }
                }
            }
            merged
        } else {
            self.walk(entries)
        };

        let flags: Vec<(PathBuf, bool)> = outcome
            .graph
            .nodes()
            .map(|node| (node.path.clone(), node.degraded || self.broken.is_degraded(&node.path)))
            .collect();
        for (path, degraded) in flags {
            outcome.graph.set_degraded(&path, degraded);
        }

        if let Some(cache) = self.cache {
            for node in outcome.graph.nodes().filter(|node| !node.from_cache) {
                cache.refresh_import_hash(&node.path);
            }
        }
        outcome
    }

    fn within_depth(&self, depth: usize) -> bool {
        self.options.max_depth.map_or(true, |max| depth <= max)
    }

    fn walk(&self, entries: &[PathBuf]) -> TraversalOutcome {
        let mut graph = DependencyGraph::new();
        let mut warnings = Vec::new();
        let mut visited: HashSet<PathBuf> = HashSet::new();
        let mut queue: VecDeque<Pending> = entries
            .iter()
            .map(|path| Pending {
                path: path.clone(),
                depth: 0,
                via: None,
            })
            .collect();

        while let Some(item) = queue.pop_front() {
            if visited.contains(&item.path) || !self.within_depth(item.depth) {
                continue;
            }
            visited.insert(item.path.clone());

            let (analysis, from_cache) = match self.load(&item.path) {
                Ok(loaded) => {
                    if let Some((importer, key)) = &item.via {
                        self.broken.record_success(importer, key);
                    }
                    loaded
                }
                Err(err) => match self.recover(&item, &err, &mut warnings) {
                    Some(stale) => (stale, true),
                    None => {
                        graph.add_file(FileNode {
                            language: language_for_path(&item.path).unwrap_or(Language::Unknown),
                            path: item.path,
                            imports: Vec::new(),
                            depth: item.depth,
                            degraded: true,
                            from_cache: false,
                        });
                        continue;
                    }
                },
            };

            let next_depth = item.depth + 1;
            let follow = self.within_depth(next_depth);
            let mut discovered = Vec::new();
            for record in &analysis.imports {
                let Some(target) = &record.resolved_path else {
                    continue;
                };
                if follow && graph.add_edge(&item.path, target) {
                    discovered.push(Pending {
                        path: target.clone(),
                        depth: next_depth,
                        via: Some((item.path.clone(), record.key())),
                    });
                }
            }

            debug!(
                file = %item.path.display(),
                depth = item.depth,
                imports = analysis.imports.len(),
                from_cache,
                "Analyzed file"
            );
            graph.add_file(FileNode {
                path: item.path,
                language: analysis.language,
                imports: analysis.imports,
                depth: item.depth,
                degraded: false,
                from_cache,
            });
            queue.extend(discovered);
        }

        TraversalOutcome { graph, warnings }
    }

    fn load(&self, path: &Path) -> Result<(FileAnalysis, bool)> {
        match self.cache {
            Some(cache) => cache.get_or_analyze(path, self.options.refresh, |content| {
                self.analyzer.analyze(path, content)
            }),
            None => {
                let content = FileReader::read_to_string(path)?;
                Ok((self.analyzer.analyze(path, &content), false))
            }
        }
    }

    /// Route a read failure through the broken-dependency handler; returns
    /// stale cached data once the pair is a permanent failure.
    fn recover(
        &self,
        item: &Pending,
        err: &StrataError,
        warnings: &mut Vec<String>,
    ) -> Option<FileAnalysis> {
        let Some((importer, key)) = &item.via else {
            warn!(file = %item.path.display(), reason = %err, "Could not analyze entry file");
            warnings.push(format!("Could not analyze {}: {err}", item.path.display()));
            return None;
        };

        match self.broken.record_failure(importer, key, &err.to_string()) {
            RetryDecision::RetryLater { delay } => {
                warnings.push(format!(
                    "Broken dependency '{key}' of {} ({err}); retry in {}s",
                    importer.display(),
                    delay.as_secs()
                ));
                None
            }
            RetryDecision::UseFallback => {
                let stale = self.cache.and_then(|cache| cache.peek(&item.path));
                let fallback = if stale.is_some() {
                    "using cached analysis"
                } else {
                    "no cached analysis available"
                };
                warnings.push(format!(
                    "Broken dependency '{key}' of {} is a permanent failure ({err}); {fallback}",
                    importer.display()
                ));
                stale
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{BrokenDependencyConfig, LocalHeuristic};
    use crate::imports::{ImportClassifier, ImportResolver};
    use std::fs;
    use tempfile::TempDir;

    fn analyzer(root: &Path) -> ImportAnalyzer {
        ImportAnalyzer::new(
            ImportClassifier::new(root, LocalHeuristic::MarkerOrSource, Vec::new()),
            ImportResolver::new(root, Vec::new(), true),
            3,
        )
    }

    fn project() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::write(root.join("a.py"), "import b\nimport os\n").unwrap();
        fs::write(root.join("b.py"), "import c\n").unwrap();
        fs::write(root.join("c.py"), "import a\n").unwrap();
        fs::write(root.join("d.py"), "import c\n").unwrap();
        (dir, root)
    }

    #[test]
    fn test_walk_records_depths_and_edges() {
        let (_dir, root) = project();
        let analyzer = analyzer(&root);
        let broken = BrokenDependencyHandler::new(&BrokenDependencyConfig::default());
        let outcome = DependencyTraversal::new(&analyzer, &broken, TraversalOptions::default())
            .run(&[root.join("a.py")]);

        let graph = &outcome.graph;
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.node(&root.join("c.py")).unwrap().depth, 2);
        assert_eq!(graph.edge_count(), 3);
        assert_eq!(graph.detect_cycles().len(), 1);
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_depth_limit_stops_following() {
        let (_dir, root) = project();
        let analyzer = analyzer(&root);
        let broken = BrokenDependencyHandler::new(&BrokenDependencyConfig::default());
        let options = TraversalOptions {
            max_depth: Some(1),
            ..TraversalOptions::default()
        };
        let outcome = DependencyTraversal::new(&analyzer, &broken, options).run(&[root.join("a.py")]);

        let paths: Vec<_> = outcome.graph.nodes().map(|n| n.path.clone()).collect();
        assert_eq!(paths, vec![root.join("a.py"), root.join("b.py")]);
        assert_eq!(outcome.graph.edge_count(), 1);
        let b = outcome.graph.node(&root.join("b.py")).unwrap();
        assert_eq!(b.imports[0].resolved_path, Some(root.join("c.py")));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let (_dir, root) = project();
        let entries = vec![root.join("a.py"), root.join("d.py")];
        let broken = BrokenDependencyHandler::new(&BrokenDependencyConfig::default());

        let sequential_analyzer = analyzer(&root);
        let sequential = DependencyTraversal::new(
            &sequential_analyzer,
            &broken,
            TraversalOptions::default(),
        )
        .run(&entries);

        let parallel_analyzer = analyzer(&root);
        let parallel = DependencyTraversal::new(
            &parallel_analyzer,
            &broken,
            TraversalOptions {
                parallel: true,
                ..TraversalOptions::default()
            },
        )
        .run(&entries);

        let depths = |outcome: &TraversalOutcome| {
            let mut all: Vec<(PathBuf, usize)> = outcome
                .graph
                .nodes()
                .map(|n| (n.path.clone(), n.depth))
                .collect();
            all.sort();
            all
        };
        assert_eq!(depths(&sequential), depths(&parallel));
        assert_eq!(
            sequential.graph.detect_cycles(),
            parallel.graph.detect_cycles()
        );
        assert_eq!(depths(&parallel)[3], (root.join("d.py"), 0));
    }
}
