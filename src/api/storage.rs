//! Storage collaborator boundary.
//!
//! The engine hands analysis summaries to a [`StorageSink`] and never waits on
//! or fails because of the outcome.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;

use crate::core::errors::Result;

/// Something that can persist a node of content plus metadata.
pub trait StorageSink: Send + Sync {
    /// Persist a node; returns the backend's identifier for it.
    fn create_node(&self, content: &str, metadata: &HashMap<String, Value>) -> Result<String>;
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullStorage;

impl StorageSink for NullStorage {
    fn create_node(&self, _content: &str, _metadata: &HashMap<String, Value>) -> Result<String> {
        Ok(String::new())
    }
}

/// A node held by [`MemoryStorage`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredNode {
    pub id: String,
    pub content: String,
    pub metadata: HashMap<String, Value>,
}

/// Keeps nodes in memory, in creation order.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    nodes: Mutex<Vec<StoredNode>>,
    next_id: AtomicU64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> Vec<StoredNode> {
        self.nodes.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.lock().is_empty()
    }
}

impl StorageSink for MemoryStorage {
    fn create_node(&self, content: &str, metadata: &HashMap<String, Value>) -> Result<String> {
        let id = format!("node-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.nodes.lock().push(StoredNode {
            id: id.clone(),
            content: content.to_string(),
            metadata: metadata.clone(),
        });
        Ok(id)
    }
}
