//! Dependency graph construction, traversal and cycle detection.

pub mod dependency;
pub mod traversal;

pub use dependency::{DependencyGraph, FileNode};
pub use traversal::{DependencyTraversal, TraversalOptions, TraversalOutcome};
