//! File utilities for safe and robust file operations.
//!
//! Reading with UTF-8 fallback, binary detection, content hashing and lexical
//! path normalisation shared by the partitioner, resolver and cache.

use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::core::errors::{Result, StrataError};

/// Files larger than this are treated as binary and never parsed.
const MAX_TEXT_FILE_BYTES: u64 = 10 * 1024 * 1024;

/// Safe file reading with UTF-8 validation and fallback handling
pub struct FileReader;

impl FileReader {
    /// Read a file to string, handling non-UTF-8 files gracefully
    pub fn read_to_string(file_path: &Path) -> Result<String> {
        if Self::is_likely_binary(file_path)? {
            return Err(StrataError::validation_field(
                format!("File appears to be binary: {}", file_path.display()),
                file_path.display().to_string(),
            ));
        }

        match fs::read_to_string(file_path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                let bytes = fs::read(file_path)
                    .map_err(|err| StrataError::io("Failed to read file as bytes", err))?;
                warn!(
                    "File contained invalid UTF-8, converted with lossy encoding: {}",
                    file_path.display()
                );
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
            Err(e) => Err(StrataError::io(
                format!("Failed to read file: {}", file_path.display()),
                e,
            )),
        }
    }

    /// Read raw bytes and decode them lossily, for callers that must accept
    /// binary input (the partition cascade never refuses a file).
    pub fn read_lossy(file_path: &Path) -> Result<String> {
        let bytes = fs::read(file_path).map_err(|e| {
            StrataError::io(format!("Failed to read file: {}", file_path.display()), e)
        })?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Check if a file is likely to be binary based on extension and content sampling
    pub fn is_likely_binary(file_path: &Path) -> Result<bool> {
        if let Some(extension) = file_path.extension().and_then(|ext| ext.to_str()) {
            let binary_extensions = [
                "zip", "tar", "gz", "bz2", "xz", "7z", "png", "jpg", "jpeg", "gif", "bmp",
                "ico", "webp", "mp3", "mp4", "wav", "pdf", "exe", "dll", "so", "dylib", "bin",
                "pyc", "pyo", "class", "o", "a", "sqlite", "db", "woff", "woff2", "ttf",
            ];

            if binary_extensions
                .iter()
                .any(|&ext| extension.eq_ignore_ascii_case(ext))
            {
                return Ok(true);
            }
        }

        let metadata = fs::metadata(file_path)
            .map_err(|e| StrataError::io("Failed to read file metadata", e))?;

        if metadata.len() > MAX_TEXT_FILE_BYTES {
            return Ok(true);
        }

        let sample_size = std::cmp::min(1024, metadata.len() as usize);
        if sample_size == 0 {
            return Ok(false);
        }

        let mut buffer = vec![0u8; sample_size];
        let mut file = fs::File::open(file_path)
            .map_err(|e| StrataError::io("Failed to open file for sampling", e))?;
        file.read_exact(&mut buffer)
            .map_err(|e| StrataError::io("Failed to read file sample", e))?;

        Ok(looks_binary(&buffer))
    }
}

/// More than 1% NUL bytes in a sample marks content as binary.
pub fn looks_binary(sample: &[u8]) -> bool {
    if sample.is_empty() {
        return false;
    }
    let null_bytes = sample.iter().filter(|&&b| b == 0).count();
    (null_bytes as f64 / sample.len() as f64) * 100.0 > 1.0
}

/// Hex-encoded SHA-256 of `content`.
pub fn content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Hash a file's bytes; `None` when it cannot be read.
pub fn file_hash(path: &Path) -> Option<String> {
    fs::read(path).ok().map(|bytes| content_hash(&bytes))
}

/// Collapse `.` and `..` components without touching the file system.
///
/// `..` at the root of an absolute path is dropped; on a relative path with
/// nothing left to pop it is kept so the result stays meaningful.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }

    if out.is_empty() {
        return PathBuf::from(".");
    }
    out.iter().map(|c| c.as_os_str()).collect()
}

/// Canonicalize when possible, otherwise normalise lexically.
pub fn canonicalize_path(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| normalize_path(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_path_collapses_parent_dirs() {
        assert_eq!(
            normalize_path(Path::new("/a/b/../c/./d.py")),
            PathBuf::from("/a/c/d.py")
        );
        assert_eq!(normalize_path(Path::new("/../x")), PathBuf::from("/x"));
        assert_eq!(normalize_path(Path::new("../x")), PathBuf::from("../x"));
        assert_eq!(normalize_path(Path::new("a/..")), PathBuf::from("."));
    }

    #[test]
    fn test_content_hash_is_stable() {
        let a = content_hash(b"import os\n");
        let b = content_hash(b"import os\n");
        let c = content_hash(b"import sys\n");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_binary_detection() {
        assert!(looks_binary(&[0, 0, 0, 1, 2, 3]));
        assert!(!looks_binary(b"plain text"));
        assert!(!looks_binary(&[]));
    }

    #[test]
    fn test_read_lossy_accepts_invalid_utf8() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("weird.txt");
        fs::write(&path, [b'a', 0xff, b'b']).unwrap();

        let content = FileReader::read_lossy(&path).unwrap();
        assert!(content.starts_with('a'));
        assert!(content.ends_with('b'));

        let via_reader = FileReader::read_to_string(&path).unwrap();
        assert_eq!(via_reader, content);
    }

    #[test]
    fn test_binary_extension_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("module.pyc");
        fs::write(&path, b"\0\0\0").unwrap();
        assert!(FileReader::read_to_string(&path).is_err());
    }
}
