//! Series persistence.
//!
//! Entries are JSON arrays of the candle and volume shapes, stored under
//! `candles_{symbol}_{interval}` and `volumes_{symbol}_{interval}`. Every
//! failure on this path is logged and counted, then treated as a miss.

use crate::error::{SeriesError, SeriesResult};
use crate::store::SeriesStore;
use async_trait::async_trait;
use mdstream_core::{Candle, TimeKeyed, Volume};
use mdstream_telemetry::Metrics;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

pub fn candles_key(symbol: &str, interval: &str) -> String {
    format!("candles_{}_{}", symbol, interval)
}

pub fn volumes_key(symbol: &str, interval: &str) -> String {
    format!("volumes_{}_{}", symbol, interval)
}

/// Key/value storage for serialized series.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn read(&self, key: &str) -> SeriesResult<Option<String>>;
    async fn write(&self, key: &str, value: String) -> SeriesResult<()>;
}

/// One `{key}.json` file per entry under a directory.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

#[async_trait]
impl CacheBackend for FileCache {
    async fn read(&self, key: &str) -> SeriesResult<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, key: &str, value: String) -> SeriesResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

/// In-process backend, mostly for tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    pub fn insert(&self, key: &str, value: impl Into<String>) {
        self.entries.lock().insert(key.to_string(), value.into());
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn read(&self, key: &str) -> SeriesResult<Option<String>> {
        Ok(self.get(key))
    }

    async fn write(&self, key: &str, value: String) -> SeriesResult<()> {
        self.insert(key, value);
        Ok(())
    }
}

/// Cache for one `(symbol, interval)` series pair.
pub struct SeriesCache {
    backend: Arc<dyn CacheBackend>,
    candles_key: String,
    volumes_key: String,
    flush_interval: Duration,
    last_flush: Option<Instant>,
    dirty: bool,
}

impl SeriesCache {
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        symbol: &str,
        interval: &str,
        flush_interval: Duration,
    ) -> Self {
        Self {
            backend,
            candles_key: candles_key(symbol, interval),
            volumes_key: volumes_key(symbol, interval),
            flush_interval,
            last_flush: None,
            dirty: false,
        }
    }

    /// Restore cached series into `store`.
    ///
    /// Returns the number of bars restored. Missing, corrupt or
    /// inconsistent entries leave `store` empty.
    pub async fn load(&self, store: &mut SeriesStore) -> usize {
        let candles = match self.read_validated(&self.candles_key, validate_candles).await {
            Some(c) => c,
            None => return 0,
        };
        let volumes = match self.read_validated(&self.volumes_key, validate_volumes).await {
            Some(v) => v,
            None => return 0,
        };
        if !store.restore(candles, volumes) {
            Metrics::cache_error("restore");
            return 0;
        }
        debug!(key = %self.candles_key, bars = store.len(), "Restored cached series");
        store.len()
    }

    async fn read_validated<T>(
        &self,
        key: &str,
        validate: fn(&[T]) -> Result<(), String>,
    ) -> Option<Vec<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let raw = match self.backend.read(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "Cache read failed");
                Metrics::cache_error("read");
                return None;
            }
        };
        let parsed = serde_json::from_str::<Vec<T>>(&raw)
            .map_err(SeriesError::from)
            .and_then(|records| {
                validate(&records)
                    .map(|_| records)
                    .map_err(|reason| SeriesError::InvalidCache {
                        key: key.to_string(),
                        reason,
                    })
            });
        match parsed {
            Ok(records) => Some(records),
            Err(e) => {
                warn!(key, error = %e, "Discarding cached series");
                Metrics::cache_error("validate");
                None
            }
        }
    }

    /// Write `store` unless the last write was less than the flush interval
    /// ago. `force` bypasses the throttle. Returns whether a write happened.
    pub async fn persist(&mut self, store: &SeriesStore, force: bool) -> bool {
        let now = Instant::now();
        let due = self
            .last_flush
            .map_or(true, |last| now.duration_since(last) >= self.flush_interval);
        if !force && !due {
            self.dirty = true;
            return false;
        }
        self.last_flush = Some(now);
        self.dirty = false;
        if let Err(e) = self.write(store).await {
            warn!(key = %self.candles_key, error = %e, "Cache write failed");
            Metrics::cache_error("write");
        }
        true
    }

    /// Write pending changes if the throttle window has passed.
    pub async fn flush_if_due(&mut self, store: &SeriesStore) -> bool {
        if !self.dirty {
            return false;
        }
        self.persist(store, false).await
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    async fn write(&self, store: &SeriesStore) -> SeriesResult<()> {
        let candles = serde_json::to_string(&store.candles().to_vec())?;
        let volumes = serde_json::to_string(&store.volumes().to_vec())?;
        self.backend.write(&self.candles_key, candles).await?;
        self.backend.write(&self.volumes_key, volumes).await?;
        Ok(())
    }
}

impl std::fmt::Debug for SeriesCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeriesCache")
            .field("candles_key", &self.candles_key)
            .field("flush_interval", &self.flush_interval)
            .field("dirty", &self.dirty)
            .finish()
    }
}

fn validate_ascending<T: TimeKeyed>(records: &[T]) -> Result<(), String> {
    match records.windows(2).find(|w| w[0].time() >= w[1].time()) {
        Some(w) => Err(format!("time {} not after {}", w[1].time(), w[0].time())),
        None => Ok(()),
    }
}

fn validate_candles(candles: &[Candle]) -> Result<(), String> {
    if let Some(bad) = candles.iter().find(|c| !c.is_well_formed()) {
        return Err(format!("malformed candle at {}", bad.time));
    }
    validate_ascending(candles)
}

fn validate_volumes(volumes: &[Volume]) -> Result<(), String> {
    if let Some(bad) = volumes.iter().find(|v| !v.value.is_finite() || v.value < 0.0) {
        return Err(format!("invalid volume at {}", bad.time));
    }
    validate_ascending(volumes)
}
