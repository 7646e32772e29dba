//! Import analysis results returned to callers.
//!
//! Everything here is plain serialisable data; rendering is left to the
//! consumer.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::broken_deps::BrokenDependencyInfo;
use crate::graph::DependencyGraph;
use crate::imports::{ImportKind, ImportRecord};
use crate::lang::Language;

/// Imports of one analyzed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileImports {
    pub path: PathBuf,
    pub language: Language,
    /// Distance from the nearest entry file
    pub depth: usize,
    pub imports: Vec<ImportRecord>,
    pub degraded: bool,
    pub from_cache: bool,
}

/// A resolved `from` imports `to` edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: PathBuf,
    pub to: PathBuf,
}

/// Aggregate counters for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportStatistics {
    pub files_analyzed: usize,
    pub total_imports: usize,
    pub local_imports: usize,
    pub relative_imports: usize,
    pub external_imports: usize,
    pub standard_imports: usize,
    pub unresolved_imports: usize,
    pub max_depth_reached: usize,
    pub duration_ms: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cycle_count: usize,
    pub degraded_files: usize,
}

impl ImportStatistics {
    /// Count imports and depths over a finished graph.
    pub fn from_graph(graph: &DependencyGraph, cycle_count: usize) -> Self {
        let mut stats = Self {
            files_analyzed: graph.len(),
            max_depth_reached: graph.max_depth(),
            cycle_count,
            ..Self::default()
        };

        for node in graph.nodes() {
            if node.degraded {
                stats.degraded_files += 1;
            }
            for record in &node.imports {
                stats.total_imports += 1;
                match record.kind {
                    ImportKind::Local => stats.local_imports += 1,
                    ImportKind::Relative => stats.relative_imports += 1,
                    ImportKind::External => stats.external_imports += 1,
                    ImportKind::Standard => stats.standard_imports += 1,
                }
                if record.kind.is_project() && !record.resolved {
                    stats.unresolved_imports += 1;
                }
            }
        }
        stats
    }
}

/// Full result of [`AnalysisEngine::analyze_imports`](crate::api::engine::AnalysisEngine::analyze_imports).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportAnalysisReport {
    pub entry_files: Vec<PathBuf>,
    /// Analyzed files in discovery order
    pub files: Vec<FileImports>,
    pub edges: Vec<DependencyEdge>,
    /// Closed paths: the first file is repeated at the end
    pub cycles: Vec<Vec<PathBuf>>,
    pub statistics: ImportStatistics,
    pub warnings: Vec<String>,
    pub broken_dependencies: Vec<BrokenDependencyInfo>,
}

impl ImportAnalysisReport {
    pub fn file(&self, path: &std::path::Path) -> Option<&FileImports> {
        self.files.iter().find(|file| file.path == path)
    }

    pub fn has_cycles(&self) -> bool {
        !self.cycles.is_empty()
    }

    /// Short one-line description, used for the storage summary.
    pub fn summary_line(&self) -> String {
        let stats = &self.statistics;
        format!(
            "{} files, {} imports ({} local, {} relative, {} standard, {} external, {} unresolved), {} cycles, max depth {}",
            stats.files_analyzed,
            stats.total_imports,
            stats.local_imports,
            stats.relative_imports,
            stats.standard_imports,
            stats.external_imports,
            stats.unresolved_imports,
            stats.cycle_count,
            stats.max_depth_reached,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::FileNode;
    use crate::imports::RawImport;

    fn record(kind: ImportKind, resolved: Option<PathBuf>) -> ImportRecord {
        ImportRecord::from_raw(&RawImport::new("m", 0, 1), kind, resolved)
    }

    #[test]
    fn test_statistics_count_kinds_and_unresolved() {
        let mut graph = DependencyGraph::new();
        graph.add_file(FileNode {
            path: PathBuf::from("/p/a.py"),
            language: Language::Python,
            imports: vec![
                record(ImportKind::Local, Some(PathBuf::from("/p/b.py"))),
                record(ImportKind::Relative, None),
                record(ImportKind::Standard, None),
                record(ImportKind::External, None),
            ],
            depth: 0,
            degraded: false,
            from_cache: false,
        });
        graph.add_file(FileNode {
            path: PathBuf::from("/p/b.py"),
            language: Language::Python,
            imports: Vec::new(),
            depth: 1,
            degraded: true,
            from_cache: false,
        });

        let stats = ImportStatistics::from_graph(&graph, 0);
        assert_eq!(stats.files_analyzed, 2);
        assert_eq!(stats.total_imports, 4);
        assert_eq!(stats.local_imports, 1);
        assert_eq!(stats.relative_imports, 1);
        assert_eq!(stats.standard_imports, 1);
        assert_eq!(stats.external_imports, 1);
        assert_eq!(stats.unresolved_imports, 1);
        assert_eq!(stats.max_depth_reached, 1);
        assert_eq!(stats.degraded_files, 1);
    }
}
