//! # Media Cache Manager
//!
//! Serves media from the cache directory or fetches it and populates the
//! cache while the caller consumes the bytes.
//!
//! The manager is a cheap `Clone` handle; every clone shares the same
//! configuration, active marker, transfer registry and event sink.
//!
//! ## Concurrency
//!
//! - Reconciliation passes and `clear_all` are serialized by one async mutex.
//!   Configuration and the active marker are read after acquiring it.
//! - A cache hit takes the same mutex while it checks the file and marks it
//!   active, so a running pass can never delete the entry it is handing out.
//! - At most one transfer per identifier is in flight. Later callers join it
//!   through a [`TransferWatcher`].

use crate::cache::config::{days_to_duration, mb_to_bytes, CacheConfig};
use crate::cache::eviction::{ClearReport, EvictionEngine, EvictionPolicy, ReconcileReport};
use crate::cache::inventory::{total_bytes, Inventory};
use crate::cache::key::{CacheKey, KeyMapper};
use crate::cache::stats::CacheStats;
use crate::cache::transfer::{
    self, discard_staging, CachedFile, TransferHandles, TransferJob, TransferStatus,
    TransferStream, TransferWatcher,
};
use crate::error::{CacheError, Result};
use bridge_traits::http::{DownloadStream, HttpClient};
use bridge_traits::storage::FileSystemAccess;
use bridge_traits::time::Clock;
use core_runtime::config::CoreConfig;
use core_runtime::events::{bytes_to_mb, format_timestamp, CacheEvent, EventObserver, EventSink};
use core_runtime::logging::{redact_url, strip_path};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

/// What the caller should play.
#[derive(Debug)]
pub enum PlayableContent {
    /// Caching is disabled; play straight from the source.
    Remote { url: String },

    /// The asset is on disk.
    Cached(CachedFile),

    /// A new transfer was started; bytes arrive on the stream while they are
    /// written to the cache.
    Streaming(TransferStream),

    /// Another caller already started this transfer.
    InFlight(TransferWatcher),
}

#[derive(Debug, Clone)]
struct ActiveEntry {
    identifier: String,
    key: CacheKey,
}

/// Disk-backed cache for large media assets.
#[derive(Clone)]
pub struct MediaCacheManager {
    config: Arc<RwLock<CacheConfig>>,
    keys: KeyMapper,
    inventory: Inventory,
    engine: EvictionEngine,
    fs: Arc<dyn FileSystemAccess>,
    http: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
    events: Arc<EventSink>,
    active: Arc<RwLock<Option<ActiveEntry>>>,
    transfers: Arc<Mutex<HashMap<CacheKey, watch::Receiver<TransferStatus>>>>,
    reconcile_lock: Arc<tokio::sync::Mutex<()>>,
}

impl MediaCacheManager {
    /// Create a manager for `config.cache_directory`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidConfig`] if the configuration does not
    /// validate.
    pub fn new(
        config: CacheConfig,
        fs: Arc<dyn FileSystemAccess>,
        http: Arc<dyn HttpClient>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate().map_err(CacheError::InvalidConfig)?;

        let events = Arc::new(EventSink::new());
        let keys = KeyMapper::new(config.cache_directory.clone());
        let inventory = Inventory::new(fs.clone(), config.cache_directory.clone());
        let engine = EvictionEngine::new(fs.clone(), events.clone());

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            keys,
            inventory,
            engine,
            fs,
            http,
            clock,
            events,
            active: Arc::new(RwLock::new(None)),
            transfers: Arc::new(Mutex::new(HashMap::new())),
            reconcile_lock: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    /// Create a manager from the runtime configuration and its bridges.
    pub fn from_core_config(core: &CoreConfig) -> Result<Self> {
        Self::new(
            CacheConfig::from(core),
            core.file_system.clone(),
            core.http_client.clone(),
            core.clock.clone(),
        )
    }

    /// Prepare the cache directory for use.
    ///
    /// Creates the directory, removes staging files left behind by transfers
    /// that never finished, and runs one reconciliation pass.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<ReconcileReport> {
        let root = self.keys.root().to_path_buf();
        self.fs.create_dir_all(&root).await.map_err(|e| {
            error!(dir = ?root, error = %e, "Failed to create cache directory");
            e
        })?;

        self.purge_staging().await;

        let report = self.reconcile().await;
        info!(dir = ?root, total = report.total_after, "Media cache initialized");
        Ok(report)
    }

    // ========================================================================
    // Playback
    // ========================================================================

    /// Decide how `identifier` should be played.
    ///
    /// A cache hit marks the entry active until [`release_active`] is called
    /// or another hit replaces it. A miss starts a transfer, or joins the one
    /// already running for the same identifier.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidIdentifier`] for identifiers that are not
    /// absolute URLs, or the source error when a new transfer cannot be
    /// opened. A failed open is also reported as `cache-failure`.
    ///
    /// [`release_active`]: Self::release_active
    #[instrument(skip(self, identifier), fields(url = %redact_url(identifier)))]
    pub async fn resolve_for_playback(
        &self,
        identifier: &str,
        caching_enabled: bool,
    ) -> Result<PlayableContent> {
        if !caching_enabled {
            debug!("Caching disabled; serving from source");
            self.events.emit(CacheEvent::CachingDisabled {
                url: identifier.to_string(),
            });
            return Ok(PlayableContent::Remote {
                url: identifier.to_string(),
            });
        }

        let key = self.keys.key_for(identifier)?;
        let destination = self.keys.path_for_key(&key);

        if let Some(file) = self.claim_cached(identifier, &key, &destination).await {
            let total = self.inventory.total_size().await;
            info!(size = file.size_bytes, "Serving from cache");
            self.events.emit(CacheEvent::VideoPlaybackFromCache {
                url: identifier.to_string(),
                file_size_mb: bytes_to_mb(file.size_bytes),
                total_cache_size_mb: bytes_to_mb(total),
                cache_limit_mb: bytes_to_mb(self.size_limit_bytes()),
            });
            return Ok(PlayableContent::Cached(file));
        }

        let (stall_timeout, buffer_chunks) = {
            let config = self.config.read();
            (config.stall_timeout, config.stream_buffer_chunks)
        };

        let (mut stream, job) = {
            let mut transfers = self.transfers.lock();
            if let Some(existing) = transfers.get(&key) {
                debug!("Joining in-flight transfer");
                return Ok(PlayableContent::InFlight(TransferWatcher::new(
                    existing.clone(),
                )));
            }

            let TransferHandles {
                stream,
                job,
                status,
            } = transfer::prepare(
                identifier,
                self.keys.staging_path(&key),
                stall_timeout,
                buffer_chunks,
            );
            transfers.insert(key.clone(), status);
            (stream, job)
        };

        let total = self.inventory.total_size().await;
        info!("Cache miss; starting transfer");
        self.events.emit(CacheEvent::CachingInitiated {
            url: identifier.to_string(),
            total_cache_size_mb: bytes_to_mb(total),
            cache_limit_mb: bytes_to_mb(self.size_limit_bytes()),
        });

        let source = match job.open(self.http.as_ref()).await {
            Ok(source) => source,
            Err(e) => {
                self.finish_failed(&job, &key, &e).await;
                return Err(e);
            }
        };
        stream.set_content_length(source.content_length);

        let manager = self.clone();
        tokio::spawn(async move {
            manager.run_transfer(job, source, key, destination).await;
        });

        Ok(PlayableContent::Streaming(stream))
    }

    /// Check the destination and mark it active under the reconcile lock.
    async fn claim_cached(
        &self,
        identifier: &str,
        key: &CacheKey,
        destination: &Path,
    ) -> Option<CachedFile> {
        let _guard = self.reconcile_lock.lock().await;

        let entry = self.inventory.entry_at(destination).await?;
        *self.active.write() = Some(ActiveEntry {
            identifier: identifier.to_string(),
            key: key.clone(),
        });

        Some(CachedFile {
            path: entry.local_path,
            size_bytes: entry.size_bytes,
        })
    }

    async fn run_transfer(
        self,
        job: TransferJob,
        source: DownloadStream,
        key: CacheKey,
        destination: PathBuf,
    ) {
        let outcome = match job.copy_to_staging(self.fs.as_ref(), source).await {
            Ok(size) => self.commit(&job.staging_path, &destination, size).await,
            Err(e) => Err(e),
        };

        let file = match outcome {
            Ok(file) => file,
            Err(e) => {
                self.finish_failed(&job, &key, &e).await;
                return;
            }
        };

        job.status.send_replace(TransferStatus::Completed(file.clone()));
        self.transfers.lock().remove(&key);

        let total = self.inventory.total_size().await;
        info!(
            url = %redact_url(&job.identifier),
            size = file.size_bytes,
            "Transfer cached"
        );
        self.events.emit(CacheEvent::CacheSuccess {
            url: job.identifier.clone(),
            file_size_mb: bytes_to_mb(file.size_bytes),
            total_cache_size_mb: bytes_to_mb(total),
            cache_limit_mb: bytes_to_mb(self.size_limit_bytes()),
            cached_timestamp: format_timestamp(self.clock.now()),
        });

        self.reconcile().await;
    }

    /// Move a finished staging file into place.
    async fn commit(&self, staging: &Path, destination: &Path, size: u64) -> Result<CachedFile> {
        if self.fs.exists(destination).await? {
            let shown = destination.to_string_lossy();
            debug!(
                file = strip_path(&shown),
                "Entry appeared during transfer; keeping it"
            );
            discard_staging(self.fs.as_ref(), staging).await;
            let size_bytes = match self.fs.metadata(destination).await {
                Ok(metadata) => metadata.size,
                Err(_) => size,
            };
            return Ok(CachedFile {
                path: destination.to_path_buf(),
                size_bytes,
            });
        }

        self.fs.rename(staging, destination).await?;
        Ok(CachedFile {
            path: destination.to_path_buf(),
            size_bytes: size,
        })
    }

    async fn finish_failed(&self, job: &TransferJob, key: &CacheKey, error: &CacheError) {
        discard_staging(self.fs.as_ref(), &job.staging_path).await;

        let status = match error {
            CacheError::Cancelled => TransferStatus::Cancelled,
            other => TransferStatus::Failed(other.to_string()),
        };
        job.status.send_replace(status);
        self.transfers.lock().remove(key);

        let total = self.inventory.total_size().await;
        warn!(
            url = %redact_url(&job.identifier),
            error = %error,
            "Transfer failed; nothing cached"
        );
        self.events.emit(CacheEvent::CacheFailure {
            url: job.identifier.clone(),
            error_message: error.to_string(),
            total_cache_size_mb: bytes_to_mb(total),
            cache_limit_mb: bytes_to_mb(self.size_limit_bytes()),
        });
    }

    async fn purge_staging(&self) {
        if !self.transfers.lock().is_empty() {
            debug!("Transfers in flight; leaving staging directory alone");
            return;
        }

        let staging_dir = self.keys.staging_dir();
        let files = match self.fs.list_directory(&staging_dir).await {
            Ok(files) => files,
            Err(e) if e.is_not_found() => return,
            Err(e) => {
                warn!(dir = ?staging_dir, error = %e, "Failed to list staging directory");
                return;
            }
        };

        if !files.is_empty() {
            info!(count = files.len(), "Removing stale staging files");
        }
        for file in files {
            discard_staging(self.fs.as_ref(), &file).await;
        }
    }

    // ========================================================================
    // Eviction
    // ========================================================================

    /// Run one reconciliation pass against the current configuration.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> ReconcileReport {
        let _guard = self.reconcile_lock.lock().await;

        let policy = {
            let config = self.config.read();
            EvictionPolicy {
                limit_bytes: config.max_cache_size_bytes,
                max_age: config.max_age,
                now: self.clock.now(),
            }
        };
        let active = self.active_key();

        let entries = self.inventory.list().await;
        self.engine
            .reconcile(entries, &policy, active.as_ref())
            .await
    }

    /// Delete every cached file except the active one.
    #[instrument(skip(self))]
    pub async fn clear_all(&self) -> ClearReport {
        let _guard = self.reconcile_lock.lock().await;

        let limit = self.size_limit_bytes();
        let active = self.active_key();

        let entries = self.inventory.list().await;
        let report = self.engine.clear(entries, limit, active.as_ref()).await;
        info!(
            deleted = report.deleted.len(),
            failures = report.failures.len(),
            "Cleared media cache"
        );
        report
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    /// Snapshot of the current configuration.
    pub fn config(&self) -> CacheConfig {
        self.config.read().clone()
    }

    pub fn size_limit_mb(&self) -> u64 {
        self.config.read().max_cache_size_mb()
    }

    pub fn size_limit_bytes(&self) -> u64 {
        self.config.read().max_cache_size_bytes
    }

    /// Set the size limit in megabytes and reconcile.
    pub async fn set_size_limit_mb(&self, mb: u64) -> Result<ReconcileReport> {
        let bytes = mb_to_bytes(mb).ok_or_else(|| {
            CacheError::InvalidConfig(format!("Size limit of {} MB is too large", mb))
        })?;
        self.set_size_limit_bytes(bytes).await
    }

    /// Set the size limit in bytes and reconcile.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidConfig`] for a zero limit.
    pub async fn set_size_limit_bytes(&self, bytes: u64) -> Result<ReconcileReport> {
        if bytes == 0 {
            return Err(CacheError::InvalidConfig(
                "Size limit must be greater than 0".to_string(),
            ));
        }

        self.config.write().max_cache_size_bytes = bytes;
        info!(limit = bytes, "Cache size limit updated");
        Ok(self.reconcile().await)
    }

    pub fn max_age(&self) -> Duration {
        self.config.read().max_age
    }

    /// Set the maximum entry age and reconcile.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidConfig`] for a zero age.
    pub async fn set_max_age(&self, max_age: Duration) -> Result<ReconcileReport> {
        if max_age.is_zero() {
            return Err(CacheError::InvalidConfig(
                "Maximum age must be greater than 0".to_string(),
            ));
        }

        self.config.write().max_age = max_age;
        info!(max_age_secs = max_age.as_secs(), "Cache maximum age updated");
        Ok(self.reconcile().await)
    }

    pub async fn set_max_age_days(&self, days: u32) -> Result<ReconcileReport> {
        self.set_max_age(days_to_duration(days)).await
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn is_cached(&self, identifier: &str) -> Result<bool> {
        Ok(self.cached_path(identifier).await?.is_some())
    }

    /// Local path of the cached file, if present.
    pub async fn cached_path(&self, identifier: &str) -> Result<Option<PathBuf>> {
        let path = self.keys.path(identifier)?;
        Ok(self.inventory.entry_at(&path).await.map(|e| e.local_path))
    }

    /// Clear the active marker if it belongs to `identifier`.
    ///
    /// Returns `true` when the marker was cleared.
    pub fn release_active(&self, identifier: &str) -> bool {
        let mut active = self.active.write();
        match active.as_ref() {
            Some(entry) if entry.identifier == identifier => {
                debug!(url = %redact_url(identifier), "Released active entry");
                *active = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_active(&self, identifier: &str) -> bool {
        self.active
            .read()
            .as_ref()
            .is_some_and(|entry| entry.identifier == identifier)
    }

    pub fn active_identifier(&self) -> Option<String> {
        self.active.read().as_ref().map(|e| e.identifier.clone())
    }

    fn active_key(&self) -> Option<CacheKey> {
        self.active.read().as_ref().map(|e| e.key.clone())
    }

    pub fn in_flight_count(&self) -> usize {
        self.transfers.lock().len()
    }

    /// Compute statistics from a fresh directory scan.
    pub async fn cache_stats(&self) -> CacheStats {
        let entries = self.inventory.list().await;
        let config = self.config();

        CacheStats {
            entry_count: entries.len(),
            total_bytes: total_bytes(&entries),
            limit_bytes: config.max_cache_size_bytes,
            max_age_days: config.max_age_days(),
            active_key: self.active_key(),
            in_flight_transfers: self.in_flight_count(),
            calculated_at: self.clock.now().timestamp(),
        }
    }

    pub fn key_mapper(&self) -> &KeyMapper {
        &self.keys
    }

    // ========================================================================
    // Observers
    // ========================================================================

    /// Install the observer, returning the one it replaces.
    pub fn register_observer(
        &self,
        observer: Arc<dyn EventObserver>,
    ) -> Option<Arc<dyn EventObserver>> {
        self.events.register_observer(observer)
    }

    pub fn unregister_observer(&self) -> Option<Arc<dyn EventObserver>> {
        self.events.unregister_observer()
    }

    pub fn events(&self) -> Arc<EventSink> {
        self.events.clone()
    }
}
