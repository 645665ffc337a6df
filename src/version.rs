//! Cache version management and upstream freshness checks
//!
//! [`CacheVersionManager`] owns the version record stored under
//! [`VERSION_RECORD_KEY`] in the `components` partition and is the only
//! component that clears partitions wholesale.
//!
//! Decision order for every check:
//! 1. no record: invalidate everything, stamp a fresh record
//! 2. record written by another build version: invalidate, stamp
//! 3. last upstream check younger than the interval: nothing to do
//! 4. otherwise compare the upstream fingerprint; invalidate on change
//!
//! Upstream failures never invalidate anything. They only advance
//! `lastChecked`, so the next attempt waits for the following interval.

use crate::cache::{CacheSet, PartitionStats, SharedClock, VERSION_RECORD_KEY};
use crate::upstream::{FingerprintChecker, FingerprintOutcome};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Cache format version compiled into this build
pub const CACHE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default minimum time between two upstream checks
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60 * 60);

// The record is rewritten at least once per check interval; the TTL only
// bounds how long an abandoned cache directory keeps it.
const VERSION_RECORD_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// The persisted version record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionRecord {
    pub version: String,
    /// Milliseconds since the Unix epoch
    pub last_checked: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_commit_sha: Option<String>,
}

impl VersionRecord {
    pub fn new(version: impl Into<String>, last_checked: i64, git_commit_sha: Option<String>) -> Self {
        Self {
            version: version.into(),
            last_checked,
            git_commit_sha,
        }
    }
}

/// What a version check decided
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionCheck {
    /// No record existed; cache invalidated and record created
    Initialized,
    /// Record came from a different build; cache invalidated
    VersionMismatch { found: String },
    /// Checked recently, nothing done
    Fresh,
    /// Upstream moved; cache invalidated
    UpstreamChanged,
    /// Upstream unchanged (or first fingerprint recorded)
    UpstreamUnchanged,
    /// Upstream could not be queried; cache kept
    UpstreamUnavailable,
}

impl VersionCheck {
    /// Whether this check invalidated the cache
    pub fn invalidated(&self) -> bool {
        matches!(
            self,
            VersionCheck::Initialized
                | VersionCheck::VersionMismatch { .. }
                | VersionCheck::UpstreamChanged
        )
    }
}

/// Read-only health report
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheHealth {
    /// Version in the stored record, if any
    pub version: Option<String>,
    /// Version compiled into this build
    pub build_version: String,
    pub last_checked: Option<DateTime<Utc>>,
    /// Human-readable age of `last_checked`
    pub time_since_check: String,
    /// Whether the check interval has elapsed
    pub needs_check: bool,
    pub upstream_fingerprint: Option<String>,
    pub stats: PartitionStats,
}

/// Decides when the cache is stale and invalidates it
pub struct CacheVersionManager {
    caches: CacheSet,
    checker: FingerprintChecker,
    clock: SharedClock,
    check_interval: Duration,
    build_version: String,
}

impl CacheVersionManager {
    pub fn new(caches: CacheSet, checker: FingerprintChecker, clock: SharedClock) -> Self {
        Self {
            caches,
            checker,
            clock,
            check_interval: DEFAULT_CHECK_INTERVAL,
            build_version: CACHE_VERSION.to_string(),
        }
    }

    /// Override the upstream check interval
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Override the version compared against the stored record
    pub fn with_build_version(mut self, version: impl Into<String>) -> Self {
        self.build_version = version.into();
        self
    }

    pub fn caches(&self) -> &CacheSet {
        &self.caches
    }

    pub fn build_version(&self) -> &str {
        &self.build_version
    }

    /// Run the check; `true` when the cache was invalidated by this call
    pub async fn check_cache_version(&self) -> bool {
        self.check().await.invalidated()
    }

    /// Run the check and report which branch was taken
    pub async fn check(&self) -> VersionCheck {
        self.run_check(false).await
    }

    /// Like [`check`](Self::check) but ignores the check interval
    pub async fn force_check(&self) -> VersionCheck {
        self.run_check(true).await
    }

    /// Scheduler hook; identical to [`check`](Self::check)
    pub async fn tick(&self) -> VersionCheck {
        self.check().await
    }

    async fn run_check(&self, force: bool) -> VersionCheck {
        let now = self.clock.now_ms();

        let Some(record) = self.read_record().await else {
            info!("No cache version record found, initializing cache");
            self.purge_partitions().await;
            self.write_record(&VersionRecord::new(&self.build_version, now, None))
                .await;
            return VersionCheck::Initialized;
        };

        if record.version != self.build_version {
            info!(
                "Cache version changed ({} -> {}), invalidating all caches",
                record.version, self.build_version
            );
            self.purge_partitions().await;
            self.write_record(&VersionRecord::new(&self.build_version, now, None))
                .await;
            return VersionCheck::VersionMismatch {
                found: record.version,
            };
        }

        let elapsed = now.saturating_sub(record.last_checked);
        if !force && elapsed <= self.interval_millis() {
            debug!(
                "Upstream check not due ({}ms since last check)",
                elapsed
            );
            return VersionCheck::Fresh;
        }

        let outcome = self.checker.compare(record.git_commit_sha.as_deref()).await;
        let checked_at = self.clock.now_ms().max(record.last_checked);

        match outcome {
            Ok(FingerprintOutcome::Changed { current, .. }) => {
                info!("Upstream repositories changed, invalidating all caches");
                self.purge_partitions().await;
                self.write_record(&VersionRecord::new(
                    &self.build_version,
                    checked_at,
                    Some(current),
                ))
                .await;
                VersionCheck::UpstreamChanged
            }
            Ok(FingerprintOutcome::Unchanged { current }) => {
                debug!("Upstream repositories unchanged");
                self.write_record(&VersionRecord {
                    last_checked: checked_at,
                    git_commit_sha: Some(current),
                    ..record
                })
                .await;
                VersionCheck::UpstreamUnchanged
            }
            Err(e) => {
                warn!("Upstream check failed, keeping cached data: {}", e);
                self.write_record(&VersionRecord {
                    last_checked: checked_at,
                    ..record
                })
                .await;
                VersionCheck::UpstreamUnavailable
            }
        }
    }

    /// Clear all three partitions
    ///
    /// The version record survives a manual invalidation, so the next check
    /// does not mistake the emptied cache for a first run.
    pub async fn invalidate_all_caches(&self) {
        let record = self.read_record().await;
        self.purge_partitions().await;
        if let Some(record) = record {
            self.write_record(&record).await;
        }
        info!("All caches invalidated");
    }

    /// Remove the cached default variant of one component
    ///
    /// Returns whether an entry was removed.
    pub async fn invalidate_component(&self, name: &str, framework: &str) -> bool {
        let key = component_cache_key(framework, name);
        let removed = self.caches.components().delete(&key).await;
        info!(
            "Invalidated component cache {} ({})",
            key,
            if removed { "removed" } else { "not cached" }
        );
        removed
    }

    /// Current record, age and statistics
    pub async fn cache_health(&self) -> CacheHealth {
        let now = self.clock.now_ms();
        let record = self.read_record().await;

        let (version, last_checked, time_since_check, needs_check, upstream_fingerprint) =
            match record {
                Some(record) => {
                    let elapsed = now.saturating_sub(record.last_checked);
                    (
                        Some(record.version),
                        Utc.timestamp_millis_opt(record.last_checked).single(),
                        format_elapsed(elapsed),
                        elapsed > self.interval_millis(),
                        record.git_commit_sha,
                    )
                }
                None => (None, None, "never".to_string(), true, None),
            };

        CacheHealth {
            version,
            build_version: self.build_version.clone(),
            last_checked,
            time_since_check,
            needs_check,
            upstream_fingerprint,
            stats: self.caches.stats().await,
        }
    }

    /// The stored record, if present and well-formed
    pub async fn read_record(&self) -> Option<VersionRecord> {
        let value = self.caches.components().peek(VERSION_RECORD_KEY).await?;
        match serde_json::from_value(value) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Ignoring malformed cache version record: {}", e);
                None
            }
        }
    }

    async fn write_record(&self, record: &VersionRecord) {
        match serde_json::to_value(record) {
            Ok(value) => {
                self.caches
                    .components()
                    .put_untracked(VERSION_RECORD_KEY, value, VERSION_RECORD_TTL_SECS)
                    .await
            }
            Err(e) => warn!("Failed to serialize cache version record: {}", e),
        }
    }

    async fn purge_partitions(&self) {
        self.caches.clear_all().await;
    }

    fn interval_millis(&self) -> i64 {
        i64::try_from(self.check_interval.as_millis()).unwrap_or(i64::MAX)
    }
}

/// Key under which providers cache a component's default variant
pub fn component_cache_key(framework: &str, name: &str) -> String {
    format!("{}:{}:default", framework, name)
}

/// Periodically run [`CacheVersionManager::tick`]
///
/// The first tick fires after one `period`; run the startup check yourself.
pub fn spawn_version_watch(manager: Arc<CacheVersionManager>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Starting cache version watch (period: {:?})", period);

        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let outcome = manager.tick().await;
            debug!("Cache version watch tick: {:?}", outcome);
        }
    })
}

/// Human-readable rendering of an age in milliseconds
pub fn format_elapsed(elapsed_ms: i64) -> String {
    let secs = elapsed_ms.max(0) / 1000;
    let (days, hours, minutes) = (secs / 86_400, (secs % 86_400) / 3600, (secs % 3600) / 60);

    if days > 0 {
        format!("{}d {}h ago", days, hours)
    } else if hours > 0 {
        format!("{}h {}m ago", hours, minutes)
    } else if minutes > 0 {
        format!("{}m ago", minutes)
    } else {
        format!("{}s ago", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, Clock, ManualClock};
    use crate::error::{CacheError, Result};
    use crate::upstream::{RevisionSource, UpstreamRepo};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Revision source whose answer can be changed between checks
    struct ScriptedSource {
        revision: Mutex<Option<String>>,
        calls: Mutex<usize>,
    }

    impl ScriptedSource {
        fn new(revision: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                revision: Mutex::new(revision.map(str::to_string)),
                calls: Mutex::new(0),
            })
        }

        fn set(&self, revision: Option<&str>) {
            *self.revision.lock().unwrap() = revision.map(str::to_string);
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl RevisionSource for ScriptedSource {
        async fn latest_revision(&self, repo: &UpstreamRepo) -> Result<String> {
            *self.calls.lock().unwrap() += 1;
            self.revision
                .lock()
                .unwrap()
                .as_ref()
                .map(|rev| format!("{}-{}", repo.name, rev))
                .ok_or_else(|| CacheError::Http("network unreachable".to_string()))
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        clock: Arc<ManualClock>,
        source: Arc<ScriptedSource>,
        manager: CacheVersionManager,
    }

    fn fixture(revision: Option<&str>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let source = ScriptedSource::new(revision);
        let caches = CacheSet::open(&CacheConfig::in_dir(dir.path()), clock.clone());
        let manager = CacheVersionManager::new(
            caches,
            FingerprintChecker::new(source.clone()),
            clock.clone(),
        );
        Fixture {
            _dir: dir,
            clock,
            source,
            manager,
        }
    }

    #[tokio::test]
    async fn test_first_check_initializes() {
        let f = fixture(Some("r1"));

        assert_eq!(f.manager.check().await, VersionCheck::Initialized);

        let record = f.manager.read_record().await.unwrap();
        assert_eq!(record.version, CACHE_VERSION);
        assert_eq!(record.last_checked, f.clock.now_ms());
        assert_eq!(record.git_commit_sha, None);
        assert_eq!(f.source.calls(), 0);
    }

    #[tokio::test]
    async fn test_second_check_within_interval_is_noop() {
        let f = fixture(Some("r1"));

        assert!(f.manager.check_cache_version().await);
        f.manager.caches().docs().set("k", json!(1), 600).await;
        assert!(!f.manager.check_cache_version().await);

        assert_eq!(f.manager.caches().docs().len().await, 1);
        assert_eq!(f.source.calls(), 0);
    }

    #[tokio::test]
    async fn test_first_fingerprint_is_recorded_without_invalidation() {
        let f = fixture(Some("r1"));
        f.manager.check().await;
        f.manager.caches().icons().set("k", json!(1), 86_400).await;

        f.clock.advance(Duration::from_secs(3601));
        assert_eq!(f.manager.check().await, VersionCheck::UpstreamUnchanged);

        let record = f.manager.read_record().await.unwrap();
        assert_eq!(
            record.git_commit_sha.as_deref(),
            Some("material-web-r1flutter-r1")
        );
        assert_eq!(f.manager.caches().icons().len().await, 1);
    }

    #[tokio::test]
    async fn test_upstream_change_invalidates() {
        let f = fixture(Some("r1"));
        f.manager.check().await;
        f.clock.advance(Duration::from_secs(3601));
        f.manager.check().await;

        f.manager.caches().docs().set("k", json!(1), 86_400).await;
        f.source.set(Some("r2"));
        f.clock.advance(Duration::from_secs(3601));

        assert_eq!(f.manager.check().await, VersionCheck::UpstreamChanged);
        assert!(f.manager.caches().docs().is_empty().await);

        let record = f.manager.read_record().await.unwrap();
        assert_eq!(
            record.git_commit_sha.as_deref(),
            Some("material-web-r2flutter-r2")
        );
        assert_eq!(record.last_checked, f.clock.now_ms());
    }

    #[tokio::test]
    async fn test_network_failure_advances_last_checked_only() {
        let f = fixture(None);
        f.manager.check().await;
        f.manager.caches().docs().set("k", json!(1), 86_400).await;
        f.clock.advance(Duration::from_secs(3601));

        assert_eq!(f.manager.check().await, VersionCheck::UpstreamUnavailable);
        assert_eq!(f.manager.caches().docs().len().await, 1);

        let record = f.manager.read_record().await.unwrap();
        assert_eq!(record.last_checked, f.clock.now_ms());

        // Not retried until the next interval
        assert_eq!(f.manager.check().await, VersionCheck::Fresh);
    }

    #[tokio::test]
    async fn test_version_mismatch_wins_over_interval() {
        let f = fixture(Some("r1"));
        f.manager.check().await;
        f.manager.caches().icons().set("k", json!(1), 86_400).await;

        let upgraded = CacheVersionManager::new(
            f.manager.caches().clone(),
            FingerprintChecker::new(f.source.clone()),
            f.clock.clone(),
        )
        .with_build_version("99.0.0");

        assert_eq!(
            upgraded.check().await,
            VersionCheck::VersionMismatch {
                found: CACHE_VERSION.to_string()
            }
        );
        assert!(upgraded.caches().icons().is_empty().await);
        assert_eq!(upgraded.read_record().await.unwrap().version, "99.0.0");
    }

    #[tokio::test]
    async fn test_manual_invalidation_keeps_record() {
        let f = fixture(Some("r1"));
        f.manager.check().await;
        f.manager.caches().components().set("web:button:default", json!(1), 600).await;

        f.manager.invalidate_all_caches().await;

        assert!(f.manager.caches().components().is_empty().await);
        assert!(f.manager.read_record().await.is_some());
        assert_eq!(f.manager.check().await, VersionCheck::Fresh);
    }

    #[tokio::test]
    async fn test_invalidate_component_removes_single_key() {
        let f = fixture(Some("r1"));
        let components = f.manager.caches().components();
        components.set("web:button:default", json!(1), 600).await;
        components.set("web:card:default", json!(2), 600).await;

        assert!(f.manager.invalidate_component("button", "web").await);
        assert!(!f.manager.invalidate_component("button", "web").await);

        assert!(!components.has("web:button:default").await);
        assert!(components.has("web:card:default").await);
    }

    #[tokio::test]
    async fn test_cache_health() {
        let f = fixture(Some("r1"));

        let health = f.manager.cache_health().await;
        assert_eq!(health.version, None);
        assert!(health.needs_check);
        assert_eq!(health.time_since_check, "never");

        f.manager.check().await;
        f.clock.advance(Duration::from_secs(125));

        let health = f.manager.cache_health().await;
        assert_eq!(health.version.as_deref(), Some(CACHE_VERSION));
        assert_eq!(health.time_since_check, "2m ago");
        assert!(!health.needs_check);

        f.clock.advance(Duration::from_secs(3600));
        assert!(f.manager.cache_health().await.needs_check);
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(42_000), "42s ago");
        assert_eq!(format_elapsed(5 * 60_000), "5m ago");
        assert_eq!(format_elapsed((3 * 3600 + 12 * 60) * 1000), "3h 12m ago");
        assert_eq!(format_elapsed((2 * 86_400 + 4 * 3600) * 1000), "2d 4h ago");
        assert_eq!(format_elapsed(-5), "0s ago");
    }

    #[test]
    fn test_component_cache_key() {
        assert_eq!(component_cache_key("flutter", "chip"), "flutter:chip:default");
    }
}
