//! Error types for the strata library.
//!
//! Partitioning never surfaces errors to callers: tier failures are recorded
//! on the [`PartitionResult`](crate::partition::PartitionResult) instead. The
//! types here cover the remaining fallible surfaces: configuration, cache
//! persistence, file access, grammar setup and caller-supplied entry files.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Main result type for strata operations.
pub type Result<T> = std::result::Result<T, StrataError>;

#[derive(Error, Debug)]
pub enum StrataError {
    /// File reads, cache persistence and config files
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: io::Error,
    },

    /// A configuration value failed validation
    #[error("Configuration error in {field}: {message}")]
    Config { message: String, field: String },

    /// A grammar could not be loaded into a parser
    #[error("Parse error in {language} ({file_path}): {message}")]
    Parse {
        language: String,
        file_path: String,
        message: String,
    },

    /// Persisted cache file that cannot be used
    #[error("Cache error in {}: {message}", path.display())]
    Cache { message: String, path: PathBuf },

    /// JSON or YAML (de)serialization
    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Caller input that cannot be analyzed
    #[error("Validation error in {field}: {message}")]
    Validation { message: String, field: String },

    /// Watcher setup and other runtime failures
    #[error("Internal error: {message}")]
    Internal { message: String },

    /// No grammar exists for the requested language
    #[error("Unsupported: {message}")]
    Unsupported { message: String },
}

impl StrataError {
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Configuration error naming the offending field (`cache.ttl_seconds`)
    pub fn config_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            field: field.into(),
        }
    }

    pub fn parse(
        language: impl Into<String>,
        file_path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Parse {
            language: language.into(),
            file_path: file_path.into(),
            message: message.into(),
        }
    }

    pub fn cache(message: impl Into<String>, path: &Path) -> Self {
        Self::Cache {
            message: message.into(),
            path: path.to_path_buf(),
        }
    }

    /// Validation error naming the offending input
    pub fn validation_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: field.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }
}

impl From<serde_yaml::Error> for StrataError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization {
            message: format!("YAML: {err}"),
            source: Box::new(err),
        }
    }
}

/// Conversion for JSON errors, labelled with what was being (de)serialized.
pub trait StrataResultExt<T> {
    fn map_json_err(self, what: &str) -> Result<T>;
}

impl<T> StrataResultExt<T> for std::result::Result<T, serde_json::Error> {
    fn map_json_err(self, what: &str) -> Result<T> {
        self.map_err(|err| StrataError::Serialization {
            message: format!("{what}: {err}"),
            source: Box::new(err),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_field_names_the_field() {
        let err = StrataError::config_field("must be positive", "cache.ttl_seconds");
        assert_eq!(
            err.to_string(),
            "Configuration error in cache.ttl_seconds: must be positive"
        );
    }

    #[test]
    fn test_cache_error_display_includes_path() {
        let err = StrataError::cache("unsupported format version 9", Path::new("/tmp/imports.json"));
        assert!(err.to_string().contains("/tmp/imports.json"));
    }

    #[test]
    fn test_map_json_err() {
        let result = serde_json::from_str::<i32>("{").map_json_err("cache file content");
        match result {
            Err(StrataError::Serialization { message, .. }) => {
                assert!(message.starts_with("cache file content"));
            }
            other => panic!("Expected Serialization error, got {other:?}"),
        }
    }

    #[test]
    fn test_yaml_error_converts() {
        let err: StrataError = serde_yaml::from_str::<Vec<i32>>("{ not: [a list")
            .unwrap_err()
            .into();
        assert!(matches!(err, StrataError::Serialization { .. }));
    }
}
