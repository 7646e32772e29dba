//! # Strata: Fault-Tolerant Code Partitioning and Import Analysis
//!
//! This library turns source files into located, typed blocks and turns sets
//! of entry files into resolved, cycle-aware dependency graphs:
//!
//! - **Partitioning**: a five-tier fallback cascade (native Python analyzer,
//!   tree-sitter, regex patterns, text heuristics, emergency chunking) that
//!   always produces at least one block
//! - **Language Detection**: extension lookup with keyword scoring fallback
//! - **Import Analysis**: extraction, classification and resolution of
//!   relative and absolute imports, including `sys.path` mutations and
//!   package re-exports
//! - **Dependency Graphs**: depth-limited traversal, parallel across entry
//!   files, with cycle detection
//! - **Caching**: per-file analyses keyed by content and import-subtree hashes
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        API Layer                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Core         │  Partition   │  Imports    │  Graph & I/O   │
//! │               │              │             │                │
//! │ • Config      │ • Native     │ • Extractor │ • Dependency   │
//! │ • Errors      │ • Tree       │ • Classifier│ • Traversal    │
//! │ • Location    │ • Pattern    │ • Resolver  │ • Cache        │
//! │ • Broken deps │ • Text/Emerg.│             │ • Watcher      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//! use strata::{AnalysisEngine, AnalysisOptions, StrataConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = AnalysisEngine::new(StrataConfig::default().with_max_depth(3))?;
//!
//!     let partition = engine.partition_file("src/app.py", None, None);
//!     println!("{} blocks via {}", partition.blocks.len(), partition.strategy_used);
//!
//!     let report = engine.analyze_imports(&[PathBuf::from("src/app.py")], AnalysisOptions::default())?;
//!     println!("{}", report.summary_line());
//!     Ok(())
//! }
//! ```

#![warn(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

// Core infrastructure shared by every component
pub mod core {
    //! Configuration, errors, file access, locations and broken-dependency
    //! bookkeeping.

    pub mod broken_deps;
    pub mod config;
    pub mod errors;
    pub mod file_utils;
    pub mod location;
}

// Partition strategies and the block data model
pub mod partition;

// Language detection and the partitioner cascade
pub mod lang;

// Import extraction, classification and resolution
pub mod imports;

// Dependency graph and traversal
pub mod graph;

// Import cache and change watcher
pub mod io;

// Public API and engine interface
pub mod api {
    //! High-level API and engine interface.

    pub mod engine;
    pub mod results;
    pub mod storage;
}

// Re-export primary types for convenience
pub use api::engine::{AnalysisEngine, AnalysisOptions};
pub use api::results::{ImportAnalysisReport, ImportStatistics};
pub use api::storage::{MemoryStorage, NullStorage, StorageSink};
pub use core::config::StrataConfig;
pub use core::errors::{Result, StrataError, StrataResultExt};
pub use lang::Language;
pub use partition::{PartitionBlock, PartitionResult, StrategyKind};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
