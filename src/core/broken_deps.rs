//! Retry/backoff bookkeeping for imports whose targets cannot be read.
//!
//! Every (importing file, import) pair that fails gets a record. While the pair
//! is within its retry budget the caller is told to retry later and the file
//! is marked degraded; once the budget is spent the pair becomes a permanent
//! failure and the caller falls back to cached or partial data. A file leaves
//! degraded mode only when each of its broken imports has been confirmed
//! resolvable again.
//!
//! Within one episode a pair only moves forward: active, then resolved or
//! permanent failure. A resolved pair that fails again does not move back;
//! its record is closed and replaced by a new episode that starts at active.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::config::BrokenDependencyConfig;

/// Lifecycle of a broken (file, import) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokenStatus {
    Active,
    Resolved,
    PermanentFailure,
}

impl fmt::Display for BrokenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BrokenStatus::Active => "active",
            BrokenStatus::Resolved => "resolved",
            BrokenStatus::PermanentFailure => "permanent_failure",
        };
        f.write_str(label)
    }
}

/// One entry of a pair's attempt log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub at: DateTime<Utc>,
    pub succeeded: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokenDependencyInfo {
    pub file: PathBuf,
    pub import: String,
    pub first_seen: DateTime<Utc>,
    pub last_attempt: DateTime<Utc>,
    /// 1 for the first episode, incremented each time a resolved pair breaks
    /// again
    pub episode: u32,
    /// Failures recorded in this episode, the first one included
    pub retry_count: u32,
    pub status: BrokenStatus,
    pub history: Vec<AttemptRecord>,
}

/// What the caller should do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Still within the retry budget; try again after `delay`
    RetryLater { delay: Duration },
    /// Budget exhausted; use cached or partial data instead
    UseFallback,
}

type PairKey = (PathBuf, String);

pub struct BrokenDependencyHandler {
    max_retries: u32,
    backoff: Duration,
    entries: Mutex<HashMap<PairKey, BrokenDependencyInfo>>,
}

impl BrokenDependencyHandler {
    pub fn new(config: &BrokenDependencyConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: Duration::from_secs(config.backoff_seconds),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn record_failure(&self, file: &Path, import: &str, reason: &str) -> RetryDecision {
        self.record_failure_at(file, import, reason, Utc::now())
    }

    /// Record a failed attempt at `now`.
    ///
    /// The first failure opens the record with `retry_count` 1. Each further
    /// failure increments it; passing `max_retries` flips the pair to
    /// permanent failure. A permanent pair is not counted or retried again.
    pub fn record_failure_at(
        &self,
        file: &Path,
        import: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        let mut entries = self.entries.lock();
        let key = (file.to_path_buf(), import.to_string());
        let attempt = AttemptRecord {
            at: now,
            succeeded: false,
            reason: Some(reason.to_string()),
        };

        let opened = |episode| BrokenDependencyInfo {
            file: file.to_path_buf(),
            import: import.to_string(),
            first_seen: now,
            last_attempt: now,
            episode,
            retry_count: 0,
            status: BrokenStatus::Active,
            history: Vec::new(),
        };
        let info = entries.entry(key).or_insert_with(|| opened(1));

        match info.status {
            BrokenStatus::PermanentFailure => return RetryDecision::UseFallback,
            BrokenStatus::Resolved => {
                info!(file = %file.display(), import, episode = info.episode + 1, "Resolved dependency broke again");
                *info = opened(info.episode + 1);
            }
            BrokenStatus::Active => {}
        }

        info.retry_count += 1;
        info.last_attempt = now;
        info.history.push(attempt);

        if info.retry_count > self.max_retries {
            info.status = BrokenStatus::PermanentFailure;
            warn!(
                file = %file.display(),
                import,
                retries = info.retry_count,
                reason,
                "Broken dependency marked as permanent failure"
            );
            RetryDecision::UseFallback
        } else {
            warn!(
                file = %file.display(),
                import,
                retries = info.retry_count,
                reason,
                "Broken dependency, will retry"
            );
            RetryDecision::RetryLater {
                delay: self.backoff,
            }
        }
    }

    /// Confirm that `import` of `file` is resolvable; returns whether a record
    /// existed.
    pub fn record_success(&self, file: &Path, import: &str) -> bool {
        let mut entries = self.entries.lock();
        let Some(info) = entries.get_mut(&(file.to_path_buf(), import.to_string())) else {
            return false;
        };
        if info.status != BrokenStatus::Resolved {
            info!(file = %file.display(), import, previous = %info.status, "Broken dependency resolved");
        }
        let now = Utc::now();
        info.status = BrokenStatus::Resolved;
        info.last_attempt = now;
        info.history.push(AttemptRecord {
            at: now,
            succeeded: true,
            reason: None,
        });
        true
    }

    pub fn status(&self, file: &Path, import: &str) -> Option<BrokenStatus> {
        self.get(file, import).map(|info| info.status)
    }

    pub fn get(&self, file: &Path, import: &str) -> Option<BrokenDependencyInfo> {
        self.entries
            .lock()
            .get(&(file.to_path_buf(), import.to_string()))
            .cloned()
    }

    /// Whether `file` has any pair not yet confirmed resolvable.
    pub fn is_degraded(&self, file: &Path) -> bool {
        self.entries
            .lock()
            .values()
            .any(|info| info.file == file && info.status != BrokenStatus::Resolved)
    }

    /// Files currently in degraded mode, sorted.
    pub fn degraded_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self
            .entries
            .lock()
            .values()
            .filter(|info| info.status != BrokenStatus::Resolved)
            .map(|info| info.file.clone())
            .collect();
        files.sort();
        files.dedup();
        files
    }

    /// Active pairs whose backoff has elapsed at `now`.
    pub fn due_for_retry(&self, now: DateTime<Utc>) -> Vec<(PathBuf, String)> {
        let backoff = chrono::Duration::from_std(self.backoff).unwrap_or(chrono::Duration::zero());
        let mut due: Vec<(PathBuf, String)> = self
            .entries
            .lock()
            .values()
            .filter(|info| info.status == BrokenStatus::Active && info.last_attempt + backoff <= now)
            .map(|info| (info.file.clone(), info.import.clone()))
            .collect();
        due.sort();
        due
    }

    /// Snapshot of every record, sorted by (file, import).
    pub fn entries(&self) -> Vec<BrokenDependencyInfo> {
        let mut all: Vec<BrokenDependencyInfo> = self.entries.lock().values().cloned().collect();
        all.sort_by(|a, b| (&a.file, &a.import).cmp(&(&b.file, &b.import)));
        all
    }

    /// Drop resolved records; returns how many were removed.
    pub fn gc(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, info| info.status != BrokenStatus::Resolved);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler(max_retries: u32) -> BrokenDependencyHandler {
        BrokenDependencyHandler::new(&BrokenDependencyConfig {
            max_retries,
            backoff_seconds: 30,
        })
    }

    #[test]
    fn test_backoff_then_permanent_failure() {
        let handler = handler(2);
        let file = Path::new("/p/a.py");

        let first = handler.record_failure(file, "b", "unreadable");
        assert_eq!(
            first,
            RetryDecision::RetryLater {
                delay: Duration::from_secs(30)
            }
        );
        assert_eq!(handler.get(file, "b").unwrap().retry_count, 1);
        assert!(handler.is_degraded(file));

        assert!(matches!(
            handler.record_failure(file, "b", "unreadable"),
            RetryDecision::RetryLater { .. }
        ));
        assert_eq!(handler.record_failure(file, "b", "unreadable"), RetryDecision::UseFallback);
        assert_eq!(handler.status(file, "b"), Some(BrokenStatus::PermanentFailure));

        // no further counting or scheduling
        assert_eq!(handler.record_failure(file, "b", "unreadable"), RetryDecision::UseFallback);
        let info = handler.get(file, "b").unwrap();
        assert_eq!(info.retry_count, 3);
        assert_eq!(info.history.len(), 3);
        assert!(handler.due_for_retry(Utc::now() + chrono::Duration::hours(1)).is_empty());
    }

    #[test]
    fn test_degraded_until_every_import_resolves() {
        let handler = handler(3);
        let file = Path::new("/p/a.py");
        handler.record_failure(file, "b", "missing");
        handler.record_failure(file, "c", "missing");

        assert!(handler.record_success(file, "b"));
        assert!(handler.is_degraded(file));
        assert_eq!(handler.degraded_files(), vec![PathBuf::from("/p/a.py")]);

        handler.record_success(file, "c");
        assert!(!handler.is_degraded(file));
        assert!(!handler.record_success(file, "zzz"));

        assert_eq!(handler.gc(), 2);
        assert!(handler.is_empty());
    }

    #[test]
    fn test_due_for_retry_honours_backoff() {
        let handler = handler(3);
        let now = Utc::now();
        handler.record_failure_at(Path::new("/p/a.py"), "b", "missing", now);

        assert!(handler.due_for_retry(now + chrono::Duration::seconds(10)).is_empty());
        assert_eq!(
            handler.due_for_retry(now + chrono::Duration::seconds(30)),
            vec![(PathBuf::from("/p/a.py"), "b".to_string())]
        );
    }

    #[test]
    fn test_failure_after_resolution_starts_new_episode() {
        let handler = handler(1);
        let file = Path::new("/p/a.py");
        handler.record_failure(file, "b", "missing");
        handler.record_success(file, "b");
        assert_eq!(handler.get(file, "b").unwrap().episode, 1);

        assert!(matches!(
            handler.record_failure(file, "b", "missing"),
            RetryDecision::RetryLater { .. }
        ));
        let info = handler.get(file, "b").unwrap();
        assert_eq!(info.episode, 2);
        assert_eq!(info.status, BrokenStatus::Active);
        assert_eq!(info.retry_count, 1);
        assert_eq!(info.history.len(), 1);
    }
}
