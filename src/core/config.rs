//! Configuration types and management for strata.
//!
//! One [`StrataConfig`] is built per run and handed to the
//! [`AnalysisEngine`](crate::api::engine::AnalysisEngine); nothing in the crate
//! reads configuration from global state.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, StrataError};

/// Main configuration for the strata engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrataConfig {
    /// Partitioning cascade settings
    #[serde(default)]
    pub partition: PartitionConfig,

    /// Import extraction, classification and traversal settings
    #[serde(default)]
    pub imports: ImportConfig,

    /// Import analysis cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Broken-dependency retry policy
    #[serde(default)]
    pub broken_dependencies: BrokenDependencyConfig,
}

impl StrataConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            StrataError::io(format!("Failed to read config file: {}", path.display()), e)
        })?;

        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn to_yaml_file(&self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        let content = serde_yaml::to_string(self)?;
        std::fs::write(&path, content).map_err(|e| {
            StrataError::io(
                format!("Failed to write config file: {}", path.display()),
                e,
            )
        })
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.partition.validate()?;
        self.imports.validate()?;
        self.cache.validate()?;
        self.broken_dependencies.validate()?;
        Ok(())
    }

    /// Set the project root used for import classification and resolution
    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.imports.project_root = Some(root.into());
        self
    }

    /// Limit the dependency traversal depth
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.imports.max_depth = Some(depth);
        self
    }

    /// Disable the import analysis cache
    pub fn without_cache(mut self) -> Self {
        self.cache.enabled = false;
        self
    }
}

/// Settings for the partition cascade
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    /// Lines of surrounding text captured in each block's context windows
    pub overlap_lines: usize,

    /// Native-analyzer classes longer than this are split per method
    pub max_block_lines: usize,

    /// Target size of merged paragraph chunks in the textual partitioner
    pub text_target_lines: usize,

    /// Minimum keyword score for content-based language detection
    pub min_keyword_score: usize,

    /// Emergency partitioner tuning
    pub emergency: EmergencyConfig,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            overlap_lines: 3,
            max_block_lines: 200,
            text_target_lines: 40,
            min_keyword_score: 3,
            emergency: EmergencyConfig::default(),
        }
    }
}

impl PartitionConfig {
    fn validate(&self) -> Result<()> {
        if self.max_block_lines == 0 {
            return Err(StrataError::config_field(
                "max_block_lines must be greater than 0",
                "partition.max_block_lines",
            ));
        }
        if self.text_target_lines == 0 {
            return Err(StrataError::config_field(
                "text_target_lines must be greater than 0",
                "partition.text_target_lines",
            ));
        }
        if self.min_keyword_score == 0 {
            return Err(StrataError::config_field(
                "min_keyword_score must be greater than 0",
                "partition.min_keyword_score",
            ));
        }
        self.emergency.validate()
    }
}

/// Tuning for the last-resort chunker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmergencyConfig {
    /// Inputs with at most this many lines are emitted verbatim as one block
    pub tiny_input_lines: usize,

    /// Inputs with at most this many bytes are emitted verbatim as one block
    pub tiny_input_bytes: usize,

    /// Approximate number of characters per chunk for average-density text
    pub target_chunk_chars: usize,

    /// Lower bound on lines per chunk
    pub min_chunk_lines: usize,

    /// Upper bound on lines per chunk
    pub max_chunk_lines: usize,
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            tiny_input_lines: 10,
            tiny_input_bytes: 512,
            target_chunk_chars: 2000,
            min_chunk_lines: 5,
            max_chunk_lines: 150,
        }
    }
}

impl EmergencyConfig {
    fn validate(&self) -> Result<()> {
        if self.min_chunk_lines == 0 || self.min_chunk_lines > self.max_chunk_lines {
            return Err(StrataError::config_field(
                "min_chunk_lines must be in 1..=max_chunk_lines",
                "partition.emergency.min_chunk_lines",
            ));
        }
        if self.target_chunk_chars == 0 {
            return Err(StrataError::config_field(
                "target_chunk_chars must be greater than 0",
                "partition.emergency.target_chunk_chars",
            ));
        }
        Ok(())
    }
}

/// How a top-level directory qualifies as a local package.
///
/// The default mirrors the long-standing behaviour: a directory counts when it
/// holds a package marker or any source file. That can misclassify vendored
/// third-party code, so it is a tunable rather than a fixed rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalHeuristic {
    /// Package marker or at least one source file
    #[default]
    MarkerOrSource,
    /// Package marker only
    MarkerOnly,
}

/// Import analysis settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Project root; defaults to the directory of the first entry file
    pub project_root: Option<PathBuf>,

    /// Additional absolute-import search paths, tried after the project root
    pub extra_search_paths: Vec<PathBuf>,

    /// Maximum traversal depth (entry files are depth 0)
    pub max_depth: Option<usize>,

    /// Traverse independent entry files on worker threads
    pub parallel: bool,

    /// Local-package heuristic
    pub local_heuristic: LocalHeuristic,

    /// Top-level directory names always classified as external
    pub vendored_directories: Vec<String>,

    /// Infer extra search paths from `sys.path` mutations in importing files
    pub detect_search_path_mutations: bool,

    /// Maximum levels followed when computing a composite import hash
    pub max_hash_depth: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            project_root: None,
            extra_search_paths: Vec::new(),
            max_depth: None,
            parallel: true,
            local_heuristic: LocalHeuristic::default(),
            vendored_directories: Vec::new(),
            detect_search_path_mutations: true,
            max_hash_depth: 8,
        }
    }
}

impl ImportConfig {
    fn validate(&self) -> Result<()> {
        if self.max_hash_depth == 0 {
            return Err(StrataError::config_field(
                "max_hash_depth must be greater than 0",
                "imports.max_hash_depth",
            ));
        }
        if let Some(root) = &self.project_root {
            if root.as_os_str().is_empty() {
                return Err(StrataError::config_field(
                    "project_root must not be empty",
                    "imports.project_root",
                ));
            }
        }
        Ok(())
    }
}

/// Import analysis cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Serve per-file analyses from the cache
    pub enabled: bool,

    /// Entries older than this are invalid regardless of hash match
    pub ttl_seconds: u64,

    /// Optional JSON file the cache is loaded from and saved to
    pub persist_path: Option<PathBuf>,

    /// Invalidate entries on file-system change events
    pub watch: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: 3600,
            persist_path: None,
            watch: false,
        }
    }
}

impl CacheConfig {
    fn validate(&self) -> Result<()> {
        if self.ttl_seconds == 0 {
            return Err(StrataError::config_field(
                "ttl_seconds must be greater than 0",
                "cache.ttl_seconds",
            ));
        }
        Ok(())
    }
}

/// Retry policy for imports whose targets cannot be read or parsed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokenDependencyConfig {
    /// Failures tolerated before a pair becomes a permanent failure
    pub max_retries: u32,

    /// Fixed delay before a broken pair is retried
    pub backoff_seconds: u64,
}

impl Default for BrokenDependencyConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_seconds: 30,
        }
    }
}

impl BrokenDependencyConfig {
    fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(StrataError::config_field(
                "max_retries must be greater than 0",
                "broken_dependencies.max_retries",
            ));
        }
        Ok(())
    }
}
