//! Per-file import analysis cache keyed by content and import-subtree hashes.
//!
//! An entry is served only while the file's own hash, the composite hash of
//! everything it transitively imports, and its age all check out. Each path
//! has its own slot mutex so two workers never analyze and overwrite the same
//! entry at once; the composite hash reads a separate dependency index and
//! never takes another slot's lock.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::core::config::CacheConfig;
use crate::core::errors::{Result, StrataError, StrataResultExt};
use crate::core::file_utils::{content_hash, file_hash, FileReader};
use crate::imports::{FileAnalysis, ImportKind};

const CACHE_FORMAT_VERSION: u32 = 1;
/// Largest TTL chrono can represent in milliseconds.
const MAX_TTL_SECONDS: u64 = (i64::MAX / 1000) as u64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub own_hash: String,
    pub import_hash: String,
    pub created_at: DateTime<Utc>,
    pub result: FileAnalysis,
}

/// On-disk layout.
#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    entries: BTreeMap<PathBuf, CacheEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

type Slot = Arc<Mutex<Option<CacheEntry>>>;

pub struct ImportCache {
    slots: DashMap<PathBuf, Slot>,
    dependencies: DashMap<PathBuf, Vec<PathBuf>>,
    ttl: chrono::Duration,
    max_hash_depth: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ImportCache {
    pub fn new(ttl_seconds: u64, max_hash_depth: usize) -> Self {
        Self {
            slots: DashMap::new(),
            dependencies: DashMap::new(),
            ttl: chrono::Duration::seconds(ttl_seconds.min(MAX_TTL_SECONDS) as i64),
            max_hash_depth: max_hash_depth.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheConfig, max_hash_depth: usize) -> Self {
        Self::new(config.ttl_seconds, max_hash_depth)
    }

    fn slot(&self, path: &Path) -> Slot {
        Arc::clone(
            self.slots
                .entry(path.to_path_buf())
                .or_insert_with(|| Arc::new(Mutex::new(None)))
                .value(),
        )
    }

    /// Cached analysis of `path` when still valid, else a fresh one from
    /// `analyze`. The flag is `true` for a cache hit. Fails only when the file
    /// cannot be read.
    pub fn get_or_analyze<F>(&self, path: &Path, refresh: bool, analyze: F) -> Result<(FileAnalysis, bool)>
    where
        F: FnOnce(&str) -> FileAnalysis,
    {
        let content = FileReader::read_to_string(path)?;
        let own_hash = content_hash(content.as_bytes());

        let slot = self.slot(path);
        let mut guard = slot.lock();

        if !refresh {
            if let Some(entry) = guard.as_ref() {
                if self.is_valid(path, entry, &own_hash) {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(file = %path.display(), "Import cache hit");
                    return Ok((entry.result.clone(), true));
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(file = %path.display(), refresh, "Import cache miss");
        let result = analyze(&content);
        self.dependencies
            .insert(path.to_path_buf(), result.dependencies());
        let import_hash = self.import_hash(path);

        *guard = Some(CacheEntry {
            own_hash,
            import_hash,
            created_at: Utc::now(),
            result: result.clone(),
        });
        Ok((result, false))
    }

    fn is_valid(&self, path: &Path, entry: &CacheEntry, own_hash: &str) -> bool {
        if entry.own_hash != own_hash {
            return false;
        }
        if Utc::now() - entry.created_at >= self.ttl {
            debug!(file = %path.display(), "Import cache entry expired");
            return false;
        }
        self.import_hash(path) == entry.import_hash
    }

    /// Composite hash over the current content hashes of every file reachable
    /// from `path` through recorded dependencies, up to `max_hash_depth`
    /// levels. Unreadable files hash as missing.
    pub fn import_hash(&self, path: &Path) -> String {
        let mut seen: HashSet<PathBuf> = HashSet::from([path.to_path_buf()]);
        let mut members: Vec<PathBuf> = Vec::new();
        let mut frontier: VecDeque<(PathBuf, usize)> = VecDeque::from([(path.to_path_buf(), 0)]);

        while let Some((current, level)) = frontier.pop_front() {
            if level >= self.max_hash_depth {
                continue;
            }
            let deps = self
                .dependencies
                .get(&current)
                .map(|entry| entry.value().clone())
                .unwrap_or_default();
            for dep in deps {
                if seen.insert(dep.clone()) {
                    members.push(dep.clone());
                    frontier.push_back((dep, level + 1));
                }
            }
        }

        members.sort();
        let mut hasher = Sha256::new();
        for member in &members {
            hasher.update(member.to_string_lossy().as_bytes());
            hasher.update([0]);
            let hash = file_hash(member).unwrap_or_else(|| "missing".to_string());
            hasher.update(hash.as_bytes());
            hasher.update([b'\n']);
        }
        format!("{:x}", hasher.finalize())
    }

    /// Recompute the stored composite hash of `path`. Called once the files
    /// it imports have been analyzed too, so the hash covers the whole
    /// subtree instead of only the imports known at write time.
    pub fn refresh_import_hash(&self, path: &Path) {
        let Some(slot) = self.slots.get(path).map(|s| Arc::clone(s.value())) else {
            return;
        };
        let import_hash = self.import_hash(path);
        let mut guard = slot.lock();
        if let Some(entry) = guard.as_mut() {
            entry.import_hash = import_hash;
        }
    }

    /// Last stored analysis of `path`, valid or not.
    pub fn peek(&self, path: &Path) -> Option<FileAnalysis> {
        let slot = self.slots.get(path).map(|s| Arc::clone(s.value()))?;
        let guard = slot.lock();
        guard.as_ref().map(|entry| entry.result.clone())
    }

    pub fn entry(&self, path: &Path) -> Option<CacheEntry> {
        let slot = self.slots.get(path).map(|s| Arc::clone(s.value()))?;
        let guard = slot.lock();
        guard.clone()
    }

    /// Drop one entry, or every entry when `path` is `None`.
    pub fn invalidate(&self, path: Option<&Path>) {
        match path {
            Some(path) => {
                self.slots.remove(path);
                self.dependencies.remove(path);
                debug!(file = %path.display(), "Invalidated import cache entry");
            }
            None => {
                self.slots.clear();
                self.dependencies.clear();
                debug!("Cleared import cache");
            }
        }
    }

    /// Drop `path` and every entry that transitively imports it. Returns the
    /// number of paths dropped.
    pub fn invalidate_with_dependents(&self, path: &Path) -> usize {
        let mut affected: HashSet<PathBuf> = HashSet::from([path.to_path_buf()]);
        let mut frontier = vec![path.to_path_buf()];
        while let Some(current) = frontier.pop() {
            for entry in self.dependencies.iter() {
                if entry.value().contains(&current) && affected.insert(entry.key().clone()) {
                    frontier.push(entry.key().clone());
                }
            }
        }

        let mut dropped = 0;
        for affected_path in &affected {
            if self.slots.remove(affected_path).is_some() {
                dropped += 1;
            }
            self.dependencies.remove(affected_path);
        }
        debug!(file = %path.display(), dropped, "Invalidated import cache entry and dependents");
        dropped
    }

    /// Cached files holding a non-stdlib unresolved import whose last module
    /// segment, or imported symbol, is `name`.
    pub fn unresolved_importers(&self, name: &str) -> Vec<PathBuf> {
        self.snapshot()
            .into_iter()
            .filter(|(_, entry)| {
                entry.result.imports.iter().any(|record| {
                    !record.resolved
                        && record.kind != ImportKind::Standard
                        && (last_segment(&record.module) == name
                            || record.name.as_deref() == Some(name))
                })
            })
            .map(|(path, _)| path)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits(),
            misses: self.misses(),
        }
    }

    fn snapshot(&self) -> BTreeMap<PathBuf, CacheEntry> {
        let slots: Vec<(PathBuf, Slot)> = self
            .slots
            .iter()
            .map(|item| (item.key().clone(), Arc::clone(item.value())))
            .collect();
        slots
            .into_iter()
            .filter_map(|(path, slot)| {
                let entry = slot.lock().clone()?;
                Some((path, entry))
            })
            .collect()
    }

    /// Sibling file `save` writes before renaming over `path`.
    pub fn temp_path_for(path: &Path) -> PathBuf {
        path.with_extension("tmp")
    }

    /// Write every entry to `path` as JSON, through a temporary file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                StrataError::io(
                    format!("Failed to create cache directory: {}", parent.display()),
                    e,
                )
            })?;
        }

        let file = CacheFile {
            version: CACHE_FORMAT_VERSION,
            entries: self.snapshot(),
        };
        let content = serde_json::to_string_pretty(&file).map_json_err("cache serialization")?;

        let temp_path = Self::temp_path_for(path);
        fs::write(&temp_path, content).map_err(|e| {
            StrataError::io(
                format!("Failed to write cache file: {}", temp_path.display()),
                e,
            )
        })?;
        fs::rename(&temp_path, path).map_err(|e| {
            StrataError::io(format!("Failed to rename cache file: {}", path.display()), e)
        })?;

        info!(entries = file.entries.len(), path = %path.display(), "Saved import cache");
        Ok(())
    }

    /// Load entries from `path`. A missing file loads nothing; an unreadable
    /// or corrupt one is logged and ignored. Returns the number of entries
    /// loaded.
    pub fn load(&self, path: &Path) -> usize {
        if !path.exists() {
            return 0;
        }
        match Self::read_file(path) {
            Ok(file) => {
                let count = file.entries.len();
                for (file_path, entry) in file.entries {
                    self.dependencies
                        .insert(file_path.clone(), entry.result.dependencies());
                    self.slots
                        .insert(file_path, Arc::new(Mutex::new(Some(entry))));
                }
                info!(entries = count, path = %path.display(), "Loaded import cache");
                count
            }
            Err(err) => {
                warn!(path = %path.display(), reason = %err, "Ignoring unreadable import cache");
                0
            }
        }
    }

    fn read_file(path: &Path) -> Result<CacheFile> {
        let content = fs::read_to_string(path).map_err(|e| {
            StrataError::io(format!("Failed to read cache file: {}", path.display()), e)
        })?;
        let file: CacheFile = serde_json::from_str(&content).map_json_err("cache file content")?;
        if file.version != CACHE_FORMAT_VERSION {
            return Err(StrataError::cache(
                format!("Unsupported cache format version {}", file.version),
                path,
            ));
        }
        Ok(file)
    }
}

fn last_segment(module: &str) -> &str {
    module
        .rsplit(|c| c == '.' || c == '/' || c == ':')
        .find(|segment| !segment.is_empty())
        .unwrap_or("")
}
