//! Durable, file-backed key-value store for one cache partition
//!
//! Every partition keeps its entries in memory and mirrors them to
//! `<cache_dir>/<partition>.json` on each mutation. The file is replaced
//! atomically (write to a temporary sibling, then rename) so a crash right
//! after `set` returns never leaves a half-written partition behind.

use crate::cache::{
    clock::SharedClock,
    config::{CacheConfig, CacheToggle},
    entry::CacheEntry,
    types::{CacheKey, CacheStats, CacheValue, Counters, Partition, VERSION_RECORD_KEY},
};
use crate::error::{CacheError, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Persistent cache partition with per-entry TTL and hit/miss statistics
///
/// - Reads of expired entries count as misses and purge the entry from disk
/// - Writes are flushed before returning; flush failures are logged only
/// - The shared [`CacheToggle`] is consulted on every `get`/`set`
pub struct DurableStore {
    partition: Partition,
    path: PathBuf,
    config: CacheConfig,
    clock: SharedClock,
    store: RwLock<StoreState>,
}

/// Internal partition state
struct StoreState {
    entries: HashMap<CacheKey, CacheEntry>,
    counters: Counters,
    /// Bumped by `clear`; writes computed under an older generation are dropped
    generation: u64,
}

impl DurableStore {
    /// Open (or create) the partition under `config.cache_dir`
    ///
    /// A missing file yields an empty store. A corrupt or unreadable file is
    /// logged and also yields an empty store.
    pub fn open(partition: Partition, config: &CacheConfig, clock: SharedClock) -> Self {
        let path = config.partition_path(partition);
        let now = clock.now_ms();

        let mut entries = match load_entries(&path) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    "Cache partition {} at {} is unreadable, starting empty: {}",
                    partition,
                    path.display(),
                    e
                );
                HashMap::new()
            }
        };

        let loaded = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        debug!(
            "Opened cache partition {} ({} entries, {} expired on load)",
            partition,
            entries.len(),
            loaded - entries.len()
        );

        Self {
            partition,
            path,
            config: config.clone(),
            clock,
            store: RwLock::new(StoreState {
                entries,
                counters: Counters::default(),
                generation: 0,
            }),
        }
    }

    /// Which partition this store backs
    pub fn partition(&self) -> Partition {
        self.partition
    }

    /// Backing file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The caching switch this store obeys
    pub fn toggle(&self) -> &CacheToggle {
        &self.config.enabled
    }

    /// Get a fresh value, or `None` if absent, expired or caching is disabled
    pub async fn get(&self, key: &str) -> Option<CacheValue> {
        self.lookup(key, |value| Some(value.clone())).await
    }

    /// Typed `get`; a payload that no longer decodes as `T` is treated as absent
    /// and counted as a miss
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.lookup(key, |value| match T::deserialize(value) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!(
                    "Cached value at {}/{} has an unexpected shape, ignoring: {}",
                    self.partition, key, e
                );
                None
            }
        })
        .await
    }

    /// Counted lookup: a hit only when the entry is fresh and `decode` accepts it
    async fn lookup<T>(
        &self,
        key: &str,
        decode: impl FnOnce(&CacheValue) -> Option<T>,
    ) -> Option<T> {
        if !self.config.enabled.is_enabled() || is_reserved(key) {
            return None;
        }

        let now = self.clock.now_ms();
        let mut store = self.store.write().await;

        match store.entries.get(key).map(|entry| entry.is_expired(now)) {
            Some(true) => {
                debug!("Cache entry expired: {}/{}", self.partition, key);
                store.entries.remove(key);
                store.counters.misses += 1;
                self.flush(&store);
                None
            }
            Some(false) => {
                let decoded = store.entries.get(key).and_then(|entry| decode(&entry.data));
                if decoded.is_some() {
                    store.counters.hits += 1;
                    debug!("Cache hit: {}/{}", self.partition, key);
                } else {
                    store.counters.misses += 1;
                }
                decoded
            }
            None => {
                store.counters.misses += 1;
                debug!("Cache miss: {}/{}", self.partition, key);
                None
            }
        }
    }

    /// `true` iff `get` would return a value; counted once, like `get`
    pub async fn has(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }

    /// Store a value for `ttl_seconds`, overwriting any previous entry
    pub async fn set(&self, key: impl Into<CacheKey>, value: CacheValue, ttl_seconds: u64) {
        self.insert(key.into(), value, ttl_seconds, None).await;
    }

    /// Current generation; changes whenever the partition is cleared
    pub(crate) async fn generation(&self) -> u64 {
        self.store.read().await.generation
    }

    /// `set`, unless the partition was cleared since `generation` was read
    ///
    /// Returns whether the value was stored.
    pub(crate) async fn set_if_generation(
        &self,
        key: impl Into<CacheKey>,
        value: CacheValue,
        ttl_seconds: u64,
        generation: u64,
    ) -> bool {
        self.insert(key.into(), value, ttl_seconds, Some(generation))
            .await
    }

    async fn insert(
        &self,
        key: CacheKey,
        value: CacheValue,
        ttl_seconds: u64,
        expected_generation: Option<u64>,
    ) -> bool {
        if !self.config.enabled.is_enabled() {
            return false;
        }
        if is_reserved(&key) {
            warn!("Refusing to overwrite reserved cache key {}/{}", self.partition, key);
            return false;
        }

        let entry = CacheEntry::new(value, self.clock.now_ms(), ttl_seconds);
        let mut store = self.store.write().await;

        if let Some(expected) = expected_generation {
            if expected != store.generation {
                debug!(
                    "Dropping stale write to {}/{}: partition cleared while computing",
                    self.partition, key
                );
                return false;
            }
        }

        debug!(
            "Writing cache entry {}/{} (ttl {}s)",
            self.partition, key, ttl_seconds
        );
        store.entries.insert(key, entry);
        store.counters.writes += 1;
        self.flush(&store);
        true
    }

    /// Store a value with the configured default TTL
    pub async fn set_default(&self, key: impl Into<CacheKey>, value: CacheValue) {
        let ttl = self.config.ttl_with_jitter();
        self.set(key, value, ttl).await;
    }

    /// Remove an entry; no-op if absent
    pub async fn delete(&self, key: &str) -> bool {
        if is_reserved(key) {
            return false;
        }

        let mut store = self.store.write().await;

        if store.entries.remove(key).is_some() {
            debug!("Removed cache entry: {}/{}", self.partition, key);
            self.flush(&store);
            true
        } else {
            false
        }
    }

    /// Drop every entry, reset statistics and re-create the backing file
    pub async fn clear(&self) {
        let mut store = self.store.write().await;

        let count = store.entries.len();
        store.entries = HashMap::new();
        store.counters = Counters::default();
        store.generation += 1;

        if let Err(e) = recreate_file(&self.path) {
            warn!(
                "Failed to re-create cache file {}: {}",
                self.path.display(),
                e
            );
        }

        info!("Cleared {} entries from cache partition {}", count, self.partition);
    }

    /// Remove all expired entries, returning how many were dropped
    pub async fn cleanup_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut store = self.store.write().await;

        let before = store.entries.len();
        store.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - store.entries.len();

        if removed > 0 {
            self.flush(&store);
            debug!(
                "Cleaned up {} expired entries from {}",
                removed, self.partition
            );
        }

        removed
    }

    /// Get-or-compute
    ///
    /// Returns the cached value when fresh; otherwise awaits `compute`, stores
    /// its result for `ttl_seconds` and returns it. Concurrent misses on the
    /// same key are not coalesced: each caller runs `compute` and the last
    /// write wins. Errors from `compute` are returned and nothing is stored.
    /// A result computed across a `clear` is returned but not stored.
    pub async fn wrap<T, F, Fut>(&self, key: &str, compute: F, ttl_seconds: u64) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(cached) = self.get_as::<T>(key).await {
            return Ok(cached);
        }

        let generation = self.generation().await;
        let computed = compute().await?;

        match serde_json::to_value(&computed) {
            Ok(value) => {
                self.set_if_generation(key, value, ttl_seconds, generation)
                    .await;
            }
            Err(e) => warn!(
                "Computed value for {}/{} is not serializable, not caching: {}",
                self.partition, key, e
            ),
        }

        Ok(computed)
    }

    /// Statistics snapshot; `size` counts live entries only
    pub async fn stats(&self) -> CacheStats {
        let now = self.clock.now_ms();
        let store = self.store.read().await;
        let size = store
            .entries
            .iter()
            .filter(|(key, entry)| !is_reserved(key) && !entry.is_expired(now))
            .count();
        CacheStats::from_counters(store.counters, size)
    }

    /// Number of live entries
    pub async fn len(&self) -> usize {
        self.stats().await.size
    }

    /// Check if the partition holds no live entries
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Read a reserved entry, ignoring the toggle and the counters
    pub(crate) async fn peek(&self, key: &str) -> Option<CacheValue> {
        let now = self.clock.now_ms();
        let store = self.store.read().await;
        store
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.data.clone())
    }

    /// Write a reserved entry, ignoring the toggle and the counters
    pub(crate) async fn put_untracked(&self, key: &str, value: CacheValue, ttl_seconds: u64) {
        let entry = CacheEntry::new(value, self.clock.now_ms(), ttl_seconds);
        let mut store = self.store.write().await;
        store.entries.insert(key.to_string(), entry);
        self.flush(&store);
    }

    /// Internal: mirror the in-memory map to disk, logging failures
    fn flush(&self, store: &StoreState) {
        if let Err(e) = persist_entries(&self.path, &store.entries) {
            warn!(
                "Failed to persist cache partition {} to {}: {}",
                self.partition,
                self.path.display(),
                e
            );
        }
    }
}

fn is_reserved(key: &str) -> bool {
    key == VERSION_RECORD_KEY
}

fn load_entries(path: &Path) -> Result<HashMap<CacheKey, CacheEntry>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(e.into()),
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(HashMap::new());
    }

    Ok(serde_json::from_slice(&bytes)?)
}

fn persist_entries(path: &Path, entries: &HashMap<CacheKey, CacheEntry>) -> Result<()> {
    let bytes = serde_json::to_vec(entries)?;
    write_atomic(path, &bytes)
}

fn recreate_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    persist_entries(path, &HashMap::new())
}

/// Write to a unique temporary sibling, fsync, then rename over `path`
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .ok_or_else(|| CacheError::Other(format!("{} has no file name", path.display())))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(format!(".{}.tmp", Uuid::new_v4().simple()));
    let tmp_path = parent.join(tmp_name);

    let result = (|| -> io::Result<()> {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp_path, path)
    })();

    if let Err(e) = result {
        if let Err(remove_err) = fs::remove_file(&tmp_path) {
            if remove_err.kind() != io::ErrorKind::NotFound {
                debug!(
                    "Failed to remove temporary file {}: {}",
                    tmp_path.display(),
                    remove_err
                );
            }
        }
        return Err(e.into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn open_store(dir: &Path, clock: Arc<ManualClock>) -> DurableStore {
        let config = CacheConfig::in_dir(dir);
        DurableStore::open(Partition::Components, &config, clock)
    }

    #[tokio::test]
    async fn test_basic_set_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path(), Arc::new(ManualClock::new(0)));

        store.set("a", json!({"x": 1}), 5).await;

        assert_eq!(store.get("a").await, Some(json!({"x": 1})));
        assert!(store.has("a").await);

        let stats = store.stats().await;
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.size, 1);
    }

    #[tokio::test]
    async fn test_cache_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path(), Arc::new(ManualClock::new(0)));

        assert_eq!(store.get("nonexistent").await, None);
        assert!(!store.has("nonexistent").await);

        let stats = store.stats().await;
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.hit_rate, "0.00%");
    }

    #[tokio::test]
    async fn test_ttl_expiration_purges_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let store = open_store(dir.path(), clock.clone());

        store.set("a", json!({"x": 1}), 5).await;
        clock.advance(Duration::from_secs(6));

        assert_eq!(store.get("a").await, None);
        assert_eq!(store.stats().await.misses, 1);

        let on_disk: HashMap<String, CacheEntry> =
            serde_json::from_slice(&fs::read(store.path()).unwrap()).unwrap();
        assert!(!on_disk.contains_key("a"));
    }

    #[tokio::test]
    async fn test_expired_entries_are_not_counted_in_size() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let store = open_store(dir.path(), clock.clone());

        store.set("short", json!(1), 1).await;
        store.set("long", json!(2), 100).await;
        clock.advance(Duration::from_secs(2));

        assert_eq!(store.stats().await.size, 1);
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(0));

        {
            let store = open_store(dir.path(), clock.clone());
            store.set("web:button:default", json!({"tag": "md-filled-button"}), 60).await;
        }

        let reopened = open_store(dir.path(), clock);
        assert_eq!(
            reopened.get("web:button:default").await,
            Some(json!({"tag": "md-filled-button"}))
        );
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("components.json"), b"{ this is not json").unwrap();

        let store = open_store(dir.path(), Arc::new(ManualClock::new(0)));
        assert!(store.is_empty().await);

        store.set("k", json!("v"), 10).await;
        assert_eq!(store.get("k").await, Some(json!("v")));
    }

    #[tokio::test]
    async fn test_clear_resets_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path(), Arc::new(ManualClock::new(0)));

        store.set("key1", json!(1), 60).await;
        store.set("key2", json!(2), 60).await;
        store.get("key1").await;
        store.get("missing").await;

        store.clear().await;

        let stats = store.stats().await;
        assert_eq!((stats.hits, stats.misses, stats.writes, stats.size), (0, 0, 0, 0));
        assert_eq!(stats.hit_rate, "0%");
        assert!(store.path().exists());

        let reopened = open_store(dir.path(), Arc::new(ManualClock::new(0)));
        assert!(reopened.is_empty().await);
    }

    #[tokio::test]
    async fn test_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path(), Arc::new(ManualClock::new(0)));

        store.set("key1", json!("value1"), 60).await;

        assert!(store.delete("key1").await);
        assert!(!store.delete("key1").await);
        assert_eq!(store.get("key1").await, None);
    }

    #[tokio::test]
    async fn test_disabled_toggle_bypasses_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path(), Arc::new(ManualClock::new(0)));

        store.set("key1", json!("value1"), 60).await;
        store.toggle().set_enabled(false);

        assert_eq!(store.get("key1").await, None);
        store.set("key2", json!("value2"), 60).await;

        store.toggle().set_enabled(true);
        assert_eq!(store.get("key1").await, Some(json!("value1")));
        assert_eq!(store.get("key2").await, None);
    }

    #[tokio::test]
    async fn test_wrap_computes_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path(), Arc::new(ManualClock::new(0)));
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let value: String = store
                .wrap(
                    "k",
                    || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok("fetched".to_string())
                    },
                    10,
                )
                .await
                .unwrap();
            assert_eq!(value, "fetched");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = store.stats().await;
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test]
    async fn test_wrap_does_not_store_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path(), Arc::new(ManualClock::new(0)));

        let result: Result<String> = store
            .wrap("k", || async { Err(CacheError::Http("offline".into())) }, 10)
            .await;

        assert!(result.is_err());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_reserved_entries_are_untracked() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path(), Arc::new(ManualClock::new(0)));

        store
            .put_untracked(VERSION_RECORD_KEY, json!({"version": "1.0.0"}), 60)
            .await;
        assert_eq!(
            store.peek(VERSION_RECORD_KEY).await,
            Some(json!({"version": "1.0.0"}))
        );

        let stats = store.stats().await;
        assert_eq!((stats.hits, stats.misses, stats.writes, stats.size), (0, 0, 0, 0));
    }

    #[tokio::test]
    async fn test_clear_during_compute_drops_stale_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(open_store(dir.path(), Arc::new(ManualClock::new(0))));
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let pending = tokio::spawn({
            let store = store.clone();
            async move {
                store
                    .wrap(
                        "web:button:default",
                        move || async move {
                            let _ = started_tx.send(());
                            let _ = release_rx.await;
                            Ok("pre-invalidation".to_string())
                        },
                        3600,
                    )
                    .await
            }
        });

        started_rx.await.unwrap();
        store.clear().await;
        release_tx.send(()).unwrap();

        assert_eq!(pending.await.unwrap().unwrap(), "pre-invalidation");
        assert_eq!(store.get("web:button:default").await, None);
        assert_eq!(store.stats().await.writes, 0);

        // Computations started after the clear are cached normally
        let value: String = store
            .wrap("web:button:default", || async { Ok("fresh".to_string()) }, 3600)
            .await
            .unwrap();
        assert_eq!(value, "fresh");
        assert_eq!(store.get("web:button:default").await, Some(json!("fresh")));
    }

    #[tokio::test]
    async fn test_undecodable_payload_counts_as_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path(), Arc::new(ManualClock::new(0)));
        store.set("k", json!({"legacy": true}), 60).await;

        assert_eq!(store.get_as::<String>("k").await, None);
        let stats = store.stats().await;
        assert_eq!((stats.hits, stats.misses), (0, 1));

        let value: String = store
            .wrap("k", || async { Ok("recomputed".to_string()) }, 60)
            .await
            .unwrap();
        assert_eq!(value, "recomputed");

        let stats = store.stats().await;
        assert_eq!((stats.hits, stats.misses), (0, 2));
        assert_eq!(store.get_as::<String>("k").await.as_deref(), Some("recomputed"));
    }

    #[tokio::test]
    async fn test_reserved_key_hidden_from_public_api() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path(), Arc::new(ManualClock::new(0)));
        let record = json!({"version": "1.0.0", "lastChecked": 0});
        store.put_untracked(VERSION_RECORD_KEY, record.clone(), 60).await;

        assert_eq!(store.get(VERSION_RECORD_KEY).await, None);
        assert!(!store.has(VERSION_RECORD_KEY).await);
        store.set(VERSION_RECORD_KEY, json!("overwritten"), 60).await;
        assert!(!store.delete(VERSION_RECORD_KEY).await);

        assert_eq!(store.peek(VERSION_RECORD_KEY).await, Some(record));
        let stats = store.stats().await;
        assert_eq!((stats.hits, stats.misses, stats.writes, stats.size), (0, 0, 0, 0));
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let store = open_store(dir.path(), clock.clone());

        store.set("key1", json!(1), 1).await;
        store.set("key2", json!(2), 1).await;
        store.set("key3", json!(3), 60).await;
        clock.advance(Duration::from_secs(5));

        assert_eq!(store.cleanup_expired().await, 2);
        assert_eq!(store.len().await, 1);
    }
}
