//! File-level dependency graph and cycle detection.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};

use crate::imports::ImportRecord;
use crate::lang::Language;

/// An analyzed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    pub path: PathBuf,
    pub language: Language,
    pub imports: Vec<ImportRecord>,
    /// First-discovery distance from an entry file
    pub depth: usize,
    /// At least one broken dependency is being tolerated
    pub degraded: bool,
    /// Imports were served from the analysis cache
    pub from_cache: bool,
}

/// Directed file → imported-file graph.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: DiGraph<PathBuf, ()>,
    indices: HashMap<PathBuf, NodeIndex>,
    nodes: IndexMap<PathBuf, FileNode>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an analyzed file. The first recorded node for a path is kept,
    /// so a file's depth never changes on re-discovery; returns whether the
    /// node was new.
    pub fn add_file(&mut self, node: FileNode) -> bool {
        if self.nodes.contains_key(&node.path) {
            return false;
        }
        self.index_of(&node.path);
        self.nodes.insert(node.path.clone(), node);
        true
    }

    /// Add `from → to` when `to` exists on disk; returns whether an edge is
    /// present afterwards.
    pub fn add_edge(&mut self, from: &Path, to: &Path) -> bool {
        if !to.is_file() {
            return false;
        }
        self.link(from, to);
        true
    }

    fn link(&mut self, from: &Path, to: &Path) {
        let a = self.index_of(from);
        let b = self.index_of(to);
        self.graph.update_edge(a, b, ());
    }

    fn index_of(&mut self, path: &Path) -> NodeIndex {
        if let Some(&idx) = self.indices.get(path) {
            return idx;
        }
        let idx = self.graph.add_node(path.to_path_buf());
        self.indices.insert(path.to_path_buf(), idx);
        idx
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.nodes.contains_key(path)
    }

    pub fn node(&self, path: &Path) -> Option<&FileNode> {
        self.nodes.get(path)
    }

    pub fn set_degraded(&mut self, path: &Path, degraded: bool) {
        if let Some(node) = self.nodes.get_mut(path) {
            node.degraded = degraded;
        }
    }

    /// Analyzed files in discovery order.
    pub fn nodes(&self) -> impl Iterator<Item = &FileNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Edges in insertion order.
    pub fn edges(&self) -> Vec<(PathBuf, PathBuf)> {
        self.graph
            .raw_edges()
            .iter()
            .map(|edge| {
                (
                    self.graph[edge.source()].clone(),
                    self.graph[edge.target()].clone(),
                )
            })
            .collect()
    }

    /// Files `path` imports.
    pub fn dependencies(&self, path: &Path) -> Vec<PathBuf> {
        self.neighbors(path, Direction::Outgoing)
    }

    /// Files importing `path`.
    pub fn dependents(&self, path: &Path) -> Vec<PathBuf> {
        self.neighbors(path, Direction::Incoming)
    }

    fn neighbors(&self, path: &Path, direction: Direction) -> Vec<PathBuf> {
        let Some(&idx) = self.indices.get(path) else {
            return Vec::new();
        };
        let mut out: Vec<PathBuf> = self
            .graph
            .neighbors_directed(idx, direction)
            .map(|n| self.graph[n].clone())
            .collect();
        out.sort();
        out
    }

    pub fn max_depth(&self) -> usize {
        self.nodes.values().map(|n| n.depth).max().unwrap_or(0)
    }

    /// Union `other` into this graph. For files present in both, the smaller
    /// depth is kept so parallel and sequential traversal agree.
    pub fn merge(&mut self, other: DependencyGraph) {
        let edges = other.edges();
        for (path, node) in other.nodes {
            match self.nodes.get_mut(&path) {
                Some(existing) => {
                    existing.depth = existing.depth.min(node.depth);
                    existing.degraded |= node.degraded;
                }
                None => {
                    self.add_file(node);
                }
            }
        }
        for (from, to) in edges {
            self.link(&from, &to);
        }
    }

    /// Cycles found by a depth-first search with a recursion stack.
    ///
    /// A back edge to a node on the stack yields the stack slice from that
    /// node, closed by repeating it. Start nodes and neighbours are visited in
    /// path order and each cycle is rotated to begin at its smallest path, so
    /// the result does not depend on insertion order.
    pub fn detect_cycles(&self) -> Vec<Vec<PathBuf>> {
        let mut order: Vec<NodeIndex> = self.graph.node_indices().collect();
        order.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));

        let mut visited: HashSet<NodeIndex> = HashSet::new();
        let mut seen: HashSet<Vec<NodeIndex>> = HashSet::new();
        let mut cycles: Vec<Vec<PathBuf>> = Vec::new();

        for &start in &order {
            if visited.contains(&start) {
                continue;
            }

            let mut stack: Vec<NodeIndex> = vec![start];
            let mut on_stack: HashSet<NodeIndex> = HashSet::from([start]);
            let mut pending: Vec<Vec<NodeIndex>> = vec![self.sorted_successors(start)];
            visited.insert(start);

            while let Some(successors) = pending.last_mut() {
                let Some(next) = successors.pop() else {
                    pending.pop();
                    if let Some(done) = stack.pop() {
                        on_stack.remove(&done);
                    }
                    continue;
                };

                if on_stack.contains(&next) {
                    let from = stack.iter().position(|&n| n == next).unwrap_or(0);
                    let cycle = canonical_rotation(&stack[from..], |n| &self.graph[n]);
                    if seen.insert(cycle.clone()) {
                        let mut closed: Vec<PathBuf> =
                            cycle.iter().map(|&n| self.graph[n].clone()).collect();
                        closed.push(self.graph[cycle[0]].clone());
                        cycles.push(closed);
                    }
                } else if visited.insert(next) {
                    stack.push(next);
                    on_stack.insert(next);
                    pending.push(self.sorted_successors(next));
                }
            }
        }

        cycles.sort();
        cycles
    }

    /// Successors in reverse path order, so popping yields ascending order.
    fn sorted_successors(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut successors: Vec<NodeIndex> = self.graph.neighbors(idx).collect();
        successors.sort_by(|a, b| self.graph[*b].cmp(&self.graph[*a]));
        successors.dedup();
        successors
    }
}

fn canonical_rotation<'g, F>(cycle: &[NodeIndex], path_of: F) -> Vec<NodeIndex>
where
    F: Fn(NodeIndex) -> &'g PathBuf,
{
    let start = (0..cycle.len())
        .min_by(|&a, &b| path_of(cycle[a]).cmp(path_of(cycle[b])))
        .unwrap_or(0);
    cycle[start..].iter().chain(&cycle[..start]).copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn node(path: &Path, depth: usize) -> FileNode {
        FileNode {
            path: path.to_path_buf(),
            language: Language::Python,
            imports: Vec::new(),
            depth,
            degraded: false,
            from_cache: false,
        }
    }

    fn files(dir: &TempDir, names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|name| {
                let path = dir.path().join(name);
                fs::write(&path, "").unwrap();
                path
            })
            .collect()
    }

    #[test]
    fn test_edges_require_existing_target() {
        let dir = TempDir::new().unwrap();
        let paths = files(&dir, &["a.py", "b.py"]);
        let mut graph = DependencyGraph::new();

        assert!(graph.add_edge(&paths[0], &paths[1]));
        assert!(graph.add_edge(&paths[0], &paths[1]));
        assert!(!graph.add_edge(&paths[0], &dir.path().join("missing.py")));
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.dependencies(&paths[0]), vec![paths[1].clone()]);
        assert_eq!(graph.dependents(&paths[1]), vec![paths[0].clone()]);
    }

    #[test]
    fn test_first_depth_is_kept() {
        let mut graph = DependencyGraph::new();
        let path = Path::new("/p/a.py");
        assert!(graph.add_file(node(path, 2)));
        assert!(!graph.add_file(node(path, 1)));
        assert_eq!(graph.node(path).unwrap().depth, 2);
    }

    #[test]
    fn test_three_node_cycle_found_once_from_any_start() {
        let dir = TempDir::new().unwrap();
        let p = files(&dir, &["a.py", "b.py", "c.py", "d.py"]);

        for rotation in 0..3 {
            let mut graph = DependencyGraph::new();
            let ring = [&p[0], &p[1], &p[2]];
            for i in 0..3 {
                let from = ring[(i + rotation) % 3];
                let to = ring[(i + rotation + 1) % 3];
                graph.add_edge(from, to);
            }
            graph.add_edge(&p[3], &p[0]);

            let cycles = graph.detect_cycles();
            assert_eq!(cycles.len(), 1);
            assert_eq!(
                cycles[0],
                vec![p[0].clone(), p[1].clone(), p[2].clone(), p[0].clone()]
            );
        }
    }

    #[test]
    fn test_acyclic_and_self_loop() {
        let dir = TempDir::new().unwrap();
        let p = files(&dir, &["a.py", "b.py"]);
        let mut graph = DependencyGraph::new();
        graph.add_edge(&p[0], &p[1]);
        assert!(graph.detect_cycles().is_empty());

        graph.add_edge(&p[1], &p[1]);
        assert_eq!(graph.detect_cycles(), vec![vec![p[1].clone(), p[1].clone()]]);
    }

    #[test]
    fn test_merge_keeps_smallest_depth() {
        let dir = TempDir::new().unwrap();
        let p = files(&dir, &["a.py", "b.py"]);

        let mut left = DependencyGraph::new();
        left.add_file(node(&p[0], 0));
        left.add_file(node(&p[1], 1));
        left.add_edge(&p[0], &p[1]);

        let mut right = DependencyGraph::new();
        right.add_file(node(&p[1], 0));

        left.merge(right);
        assert_eq!(left.len(), 2);
        assert_eq!(left.node(&p[1]).unwrap().depth, 0);
        assert_eq!(left.edges(), vec![(p[0].clone(), p[1].clone())]);
    }
}
