//! # Eviction Engine
//!
//! Decides which cache entries to delete and deletes them.
//!
//! A reconciliation pass runs exactly one of two strategies:
//!
//! - **Size pass** when the cache is over budget: entries are visited oldest
//!   first (stable, so ties keep enumeration order) and deleted until the
//!   running total fits the limit.
//! - **Age pass** otherwise: every entry last modified before `now - max_age`
//!   is deleted.
//!
//! The active entry is never deleted. Deletions run one at a time so the
//! totals reported in events always match what is on disk.

use crate::cache::inventory::{total_bytes, CacheEntry};
use crate::cache::key::CacheKey;
use bridge_traits::storage::FileSystemAccess;
use chrono::{DateTime, Utc};
use core_runtime::events::{bytes_to_mb, format_timestamp, CacheEvent, EventSink};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Budget applied by one reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    pub limit_bytes: u64,
    pub max_age: Duration,
    pub now: DateTime<Utc>,
}

impl EvictionPolicy {
    fn max_age_days(&self) -> u32 {
        u32::try_from(self.max_age.as_secs() / 86_400).unwrap_or(u32::MAX)
    }

    /// Entries last modified before this instant are expired. `None` when the
    /// age reaches back before the representable range.
    fn expiration(&self) -> Option<DateTime<Utc>> {
        chrono::Duration::from_std(self.max_age)
            .ok()
            .and_then(|age| self.now.checked_sub_signed(age))
    }
}

/// A deletion that did not happen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvictionFailure {
    pub key: CacheKey,
    pub error: String,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub deleted: Vec<CacheEntry>,
    pub kept_because_active: Option<CacheKey>,
    pub failures: Vec<EvictionFailure>,
    pub limit_exceeded: bool,
    pub total_before: u64,
    pub total_after: u64,
}

impl ReconcileReport {
    pub fn deleted_keys(&self) -> Vec<&CacheKey> {
        self.deleted.iter().map(|e| &e.key).collect()
    }

    pub fn bytes_freed(&self) -> u64 {
        self.total_before.saturating_sub(self.total_after)
    }
}

/// Outcome of clearing the whole cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    pub deleted: Vec<CacheEntry>,
    pub kept_because_active: Option<CacheKey>,
    pub failures: Vec<EvictionFailure>,
    pub total_after: u64,
}

/// Applies eviction decisions through the file system bridge.
#[derive(Clone)]
pub struct EvictionEngine {
    fs: Arc<dyn FileSystemAccess>,
    events: Arc<EventSink>,
}

impl EvictionEngine {
    pub fn new(fs: Arc<dyn FileSystemAccess>, events: Arc<EventSink>) -> Self {
        Self { fs, events }
    }

    /// Run one reconciliation pass over `entries`.
    ///
    /// Never fails as a whole: per-entry deletion errors are recorded in the
    /// report and emitted as `cache-operation-failure`.
    pub async fn reconcile(
        &self,
        entries: Vec<CacheEntry>,
        policy: &EvictionPolicy,
        active: Option<&CacheKey>,
    ) -> ReconcileReport {
        let total = total_bytes(&entries);
        let mut report = ReconcileReport {
            total_before: total,
            total_after: total,
            ..Default::default()
        };

        if total > policy.limit_bytes {
            self.size_pass(entries, policy, active, &mut report).await;
        } else {
            self.age_pass(entries, policy, active, &mut report).await;
        }

        if !report.deleted.is_empty() || !report.failures.is_empty() {
            info!(
                deleted = report.deleted.len(),
                failures = report.failures.len(),
                total_before = report.total_before,
                total_after = report.total_after,
                "Reconciliation pass finished"
            );
        }

        report
    }

    async fn size_pass(
        &self,
        mut entries: Vec<CacheEntry>,
        policy: &EvictionPolicy,
        active: Option<&CacheKey>,
        report: &mut ReconcileReport,
    ) {
        report.limit_exceeded = true;
        warn!(
            total = report.total_after,
            limit = policy.limit_bytes,
            "Cache size exceeds limit"
        );
        self.events.emit(CacheEvent::CacheLimitExceeded {
            total_cache_size_mb: bytes_to_mb(report.total_after),
            cache_limit_mb: bytes_to_mb(policy.limit_bytes),
        });

        entries.sort_by_key(|e| e.last_modified);

        for entry in entries {
            if report.total_after <= policy.limit_bytes {
                break;
            }

            if Some(&entry.key) == active {
                self.skip_active(&entry, policy, report);
                continue;
            }

            self.delete(entry, policy, false, report).await;
        }

        if report.total_after > policy.limit_bytes {
            warn!(
                total = report.total_after,
                limit = policy.limit_bytes,
                "Cache still over limit after evicting every removable entry"
            );
        }
    }

    async fn age_pass(
        &self,
        entries: Vec<CacheEntry>,
        policy: &EvictionPolicy,
        active: Option<&CacheKey>,
        report: &mut ReconcileReport,
    ) {
        let Some(expiration) = policy.expiration() else {
            return;
        };

        for entry in entries {
            if entry.last_modified >= expiration {
                continue;
            }

            if Some(&entry.key) == active {
                self.skip_active(&entry, policy, report);
                continue;
            }

            self.delete(entry, policy, true, report).await;
        }
    }

    fn skip_active(
        &self,
        entry: &CacheEntry,
        policy: &EvictionPolicy,
        report: &mut ReconcileReport,
    ) {
        report.kept_because_active = Some(entry.key.clone());
        self.report_active_skip(entry, report.total_after, policy.limit_bytes);
    }

    fn report_active_skip(&self, entry: &CacheEntry, total_bytes: u64, limit_bytes: u64) {
        debug!(file = entry.key.as_str(), "Skipping deletion of active entry");
        self.events.emit(CacheEvent::CacheOperationFailure {
            url: Some(entry.local_path.display().to_string()),
            error_message: "Skipping deletion of active entry".to_string(),
            total_cache_size_mb: bytes_to_mb(total_bytes),
            cache_limit_mb: bytes_to_mb(limit_bytes),
        });
    }

    async fn delete(
        &self,
        entry: CacheEntry,
        policy: &EvictionPolicy,
        is_old_cache: bool,
        report: &mut ReconcileReport,
    ) {
        match self
            .remove_file(&entry, report.total_after, policy.limit_bytes)
            .await
        {
            Ok(()) => {
                report.total_after = report.total_after.saturating_sub(entry.size_bytes);
                debug!(
                    file = entry.key.as_str(),
                    size = entry.size_bytes,
                    is_old_cache,
                    "Evicted cache entry"
                );
                self.events.emit(CacheEvent::CacheCleared {
                    url: entry.local_path.display().to_string(),
                    file_size_mb: bytes_to_mb(entry.size_bytes),
                    total_cache_size_mb: bytes_to_mb(report.total_after),
                    cache_limit_mb: bytes_to_mb(policy.limit_bytes),
                    max_cache_age_days: policy.max_age_days(),
                    is_old_cache,
                    cached_timestamp: format_timestamp(entry.last_modified),
                });
                report.deleted.push(entry);
            }
            Err(failure) => report.failures.push(failure),
        }
    }

    /// Delete every entry except the active one.
    ///
    /// Emits one `cache-operation-failure` for the skipped active entry, one
    /// per failed deletion, and a final `all-cache-cleared`.
    pub async fn clear(
        &self,
        entries: Vec<CacheEntry>,
        limit_bytes: u64,
        active: Option<&CacheKey>,
    ) -> ClearReport {
        let mut report = ClearReport {
            total_after: total_bytes(&entries),
            ..Default::default()
        };

        for entry in entries {
            if Some(&entry.key) == active {
                self.report_active_skip(&entry, report.total_after, limit_bytes);
                report.kept_because_active = Some(entry.key);
                continue;
            }

            match self
                .remove_file(&entry, report.total_after, limit_bytes)
                .await
            {
                Ok(()) => {
                    report.total_after = report.total_after.saturating_sub(entry.size_bytes);
                    report.deleted.push(entry);
                }
                Err(failure) => report.failures.push(failure),
            }
        }

        info!(
            cleared = report.deleted.len(),
            failures = report.failures.len(),
            "Cleared cache"
        );
        self.events.emit(CacheEvent::AllCacheCleared {
            entries_cleared: report.deleted.len(),
            total_cache_size_mb: bytes_to_mb(report.total_after),
            cache_limit_mb: bytes_to_mb(limit_bytes),
        });

        report
    }

    /// Delete one file. A file that is already gone counts as deleted.
    async fn remove_file(
        &self,
        entry: &CacheEntry,
        total_bytes: u64,
        limit_bytes: u64,
    ) -> Result<(), EvictionFailure> {
        match self.fs.delete_file(&entry.local_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => {
                warn!(file = entry.key.as_str(), error = %e, "Failed to delete cache entry");
                self.events.emit(CacheEvent::CacheOperationFailure {
                    url: Some(entry.local_path.display().to_string()),
                    error_message: format!("Failed to delete cache entry: {}", e),
                    total_cache_size_mb: bytes_to_mb(total_bytes),
                    cache_limit_mb: bytes_to_mb(limit_bytes),
                });
                Err(EvictionFailure {
                    key: entry.key.clone(),
                    error: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::storage::{DynAsyncWrite, FileMetadata};
    use chrono::TimeZone;
    use core_runtime::events::ChannelObserver;
    use mockall::mock;
    use std::path::{Path, PathBuf};
    use tokio::sync::mpsc;

    const MB: u64 = 1024 * 1024;

    mock! {
        pub Fs {}

        #[async_trait]
        impl FileSystemAccess for Fs {
            async fn get_cache_directory(&self) -> BridgeResult<PathBuf>;
            async fn exists(&self, path: &Path) -> BridgeResult<bool>;
            async fn metadata(&self, path: &Path) -> BridgeResult<FileMetadata>;
            async fn create_dir_all(&self, path: &Path) -> BridgeResult<()>;
            async fn list_directory(&self, path: &Path) -> BridgeResult<Vec<PathBuf>>;
            async fn delete_file(&self, path: &Path) -> BridgeResult<()>;
            async fn rename(&self, from: &Path, to: &Path) -> BridgeResult<()>;
            async fn open_write_stream(&self, path: &Path) -> BridgeResult<Box<DynAsyncWrite>>;
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn entry(name: &str, size_mb: u64, age_hours: i64) -> CacheEntry {
        CacheEntry {
            key: CacheKey::from_file_name(name),
            local_path: PathBuf::from("/cache").join(name),
            size_bytes: size_mb * MB,
            last_modified: now() - chrono::Duration::hours(age_hours),
        }
    }

    fn policy(limit_mb: u64, max_age_days: u64) -> EvictionPolicy {
        EvictionPolicy {
            limit_bytes: limit_mb * MB,
            max_age: Duration::from_secs(max_age_days * 86_400),
            now: now(),
        }
    }

    fn permissive_fs() -> MockFs {
        let mut fs = MockFs::new();
        fs.expect_delete_file().returning(|_| Ok(()));
        fs
    }

    fn engine(fs: MockFs) -> (EvictionEngine, mpsc::Receiver<CacheEvent>) {
        let events = Arc::new(EventSink::new());
        let (observer, rx) = ChannelObserver::new(64);
        events.register_observer(Arc::new(observer));
        (EvictionEngine::new(Arc::new(fs), events), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<CacheEvent>) -> Vec<CacheEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_size_pass_deletes_oldest_first() {
        let (engine, mut rx) = engine(permissive_fs());
        let entries = vec![entry("e3", 200, 1), entry("e1", 200, 3), entry("e2", 200, 2)];

        let report = engine
            .reconcile(entries, &policy(500, 30), None)
            .await;

        assert!(report.limit_exceeded);
        assert_eq!(report.deleted_keys(), vec![&CacheKey::from_file_name("e1")]);
        assert_eq!(report.total_before, 600 * MB);
        assert_eq!(report.total_after, 400 * MB);
        assert_eq!(report.bytes_freed(), 200 * MB);

        let names: Vec<_> = drain(&mut rx).iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["cache-limit-exceeded", "cache-cleared"]);
    }

    #[tokio::test]
    async fn test_size_pass_skips_active_entry() {
        let (engine, mut rx) = engine(permissive_fs());
        let entries = vec![entry("e1", 200, 3), entry("e2", 200, 2), entry("e3", 200, 1)];
        let active = CacheKey::from_file_name("e1");

        let report = engine
            .reconcile(entries, &policy(500, 30), Some(&active))
            .await;

        assert_eq!(report.deleted_keys(), vec![&CacheKey::from_file_name("e2")]);
        assert_eq!(report.kept_because_active, Some(active));
        assert_eq!(report.total_after, 400 * MB);

        let events = drain(&mut rx);
        assert_eq!(events[1].name(), "cache-operation-failure");
        assert_eq!(events[2].name(), "cache-cleared");
    }

    #[tokio::test]
    async fn test_size_pass_stops_when_only_active_remains() {
        let (engine, _rx) = engine(permissive_fs());
        let entries = vec![entry("big", 900, 5), entry("small", 50, 1)];
        let active = CacheKey::from_file_name("big");

        let report = engine
            .reconcile(entries, &policy(500, 30), Some(&active))
            .await;

        assert_eq!(report.deleted.len(), 1);
        assert_eq!(report.total_after, 900 * MB);
        assert!(report.failures.is_empty());
    }

    #[tokio::test]
    async fn test_equal_timestamps_keep_enumeration_order() {
        let (engine, _rx) = engine(permissive_fs());
        let entries = vec![entry("first", 300, 2), entry("second", 300, 2)];

        let report = engine.reconcile(entries, &policy(500, 30), None).await;

        assert_eq!(report.deleted_keys(), vec![&CacheKey::from_file_name("first")]);
    }

    #[tokio::test]
    async fn test_age_pass_only_when_within_budget() {
        let (engine, mut rx) = engine(permissive_fs());
        let entries = vec![entry("old", 10, 48), entry("fresh", 10, 2)];

        let report = engine.reconcile(entries, &policy(500, 1), None).await;

        assert!(!report.limit_exceeded);
        assert_eq!(report.deleted_keys(), vec![&CacheKey::from_file_name("old")]);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            CacheEvent::CacheCleared {
                is_old_cache,
                max_cache_age_days,
                cached_timestamp,
                ..
            } => {
                assert!(*is_old_cache);
                assert_eq!(*max_cache_age_days, 1);
                assert_eq!(cached_timestamp, "2025-02-27 12:00:00");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_size_pass_excludes_age_pass() {
        let (engine, _rx) = engine(permissive_fs());
        // Everything is older than one day, but only enough is removed to fit
        let entries = vec![
            entry("big1", 300, 24 * 10),
            entry("big2", 300, 24 * 5),
            entry("small", 1, 24 * 2),
        ];

        let report = engine.reconcile(entries, &policy(500, 1), None).await;

        assert!(report.limit_exceeded);
        assert_eq!(report.deleted_keys(), vec![&CacheKey::from_file_name("big1")]);
        assert_eq!(report.total_after, 301 * MB);
    }

    #[tokio::test]
    async fn test_active_entry_survives_age_pass() {
        let (engine, mut rx) = engine(permissive_fs());
        let active = CacheKey::from_file_name("old");

        let report = engine
            .reconcile(vec![entry("old", 1, 24 * 90)], &policy(500, 30), Some(&active))
            .await;

        assert!(report.deleted.is_empty());
        assert_eq!(report.kept_because_active, Some(active));

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            CacheEvent::CacheOperationFailure {
                url,
                total_cache_size_mb,
                cache_limit_mb,
                ..
            } => {
                assert!(url.as_deref().unwrap().ends_with("old"));
                assert_eq!(*total_cache_size_mb, 1.0);
                assert_eq!(*cache_limit_mb, 500.0);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_deletion_failure_does_not_abort_pass() {
        let mut fs = MockFs::new();
        fs.expect_delete_file()
            .withf(|path| path.ends_with("e1"))
            .returning(|_| Err(BridgeError::OperationFailed("permission denied".into())));
        fs.expect_delete_file()
            .withf(|path| !path.ends_with("e1"))
            .returning(|_| Ok(()));
        let (engine, mut rx) = engine(fs);

        let entries = vec![entry("e1", 200, 3), entry("e2", 200, 2), entry("e3", 200, 1)];
        let report = engine.reconcile(entries, &policy(500, 30), None).await;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].key, CacheKey::from_file_name("e1"));
        assert_eq!(report.deleted_keys(), vec![&CacheKey::from_file_name("e2")]);
        assert_eq!(report.total_after, 400 * MB);

        let names: Vec<_> = drain(&mut rx).iter().map(|e| e.name()).collect();
        assert_eq!(
            names,
            vec![
                "cache-limit-exceeded",
                "cache-operation-failure",
                "cache-cleared"
            ]
        );
    }

    #[tokio::test]
    async fn test_clear_skips_active_and_reports() {
        let (engine, mut rx) = engine(permissive_fs());
        let active = CacheKey::from_file_name("b");
        let entries = vec![entry("a", 1, 1), entry("b", 2, 1), entry("c", 3, 1)];

        let report = engine.clear(entries, 500 * MB, Some(&active)).await;

        assert_eq!(report.deleted.len(), 2);
        assert_eq!(report.kept_because_active, Some(active));
        assert_eq!(report.total_after, 2 * MB);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].name(), "cache-operation-failure");
        assert_eq!(
            events[1],
            CacheEvent::AllCacheCleared {
                entries_cleared: 2,
                total_cache_size_mb: 2.0,
                cache_limit_mb: 500.0,
            }
        );
    }

    #[tokio::test]
    async fn test_missing_file_counts_as_deleted() {
        let mut fs = MockFs::new();
        fs.expect_delete_file().returning(|_| {
            Err(BridgeError::Io(std::io::Error::from(
                std::io::ErrorKind::NotFound,
            )))
        });
        let (engine, _rx) = engine(fs);

        let report = engine.clear(vec![entry("gone", 1, 1)], 500 * MB, None).await;

        assert_eq!(report.deleted.len(), 1);
        assert!(report.failures.is_empty());
    }
}
