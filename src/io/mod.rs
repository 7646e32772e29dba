//! Caching infrastructure for import analysis.
//!
//! - **cache**: per-file analyses keyed by content hash and import-subtree
//!   hash, with TTL expiry and JSON persistence
//! - **watcher**: file-system events that invalidate cache entries

pub mod cache;
pub mod watcher;

pub use cache::{CacheEntry, CacheStats, ImportCache};
pub use watcher::CacheWatcher;
