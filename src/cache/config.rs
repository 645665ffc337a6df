//! Configuration for the cache system

use crate::error::{CacheError, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable toggling the cache on or off
pub const ENV_CACHE_ENABLED: &str = "MATERIAL3_CACHE_ENABLED";
/// Environment variable overriding the cache directory
pub const ENV_CACHE_DIR: &str = "MATERIAL3_CACHE_DIR";
/// Environment variable overriding the default TTL (seconds)
pub const ENV_CACHE_TTL_SECS: &str = "MATERIAL3_CACHE_TTL_SECS";

/// Process-wide caching switch
///
/// Cloned handles share the same flag, so a configuration reload flips every
/// store at once. Stores read it on every `get`/`set`.
#[derive(Debug, Clone)]
pub struct CacheToggle(Arc<AtomicBool>);

impl CacheToggle {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Relaxed);
    }
}

impl Default for CacheToggle {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Configuration for the persistent cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding one JSON file per partition
    pub cache_dir: PathBuf,

    /// TTL used by `set_default`
    pub default_ttl: Duration,

    /// TTL jitter factor (0.0 - 1.0) applied by `set_default`
    pub ttl_jitter: f64,

    /// Interval for the background expiry sweep
    pub cleanup_interval: Duration,

    /// Minimum time between two upstream fingerprint checks
    pub check_interval: Duration,

    /// Shared caching switch
    pub enabled: CacheToggle,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            // 1 hour default TTL
            default_ttl: Duration::from_secs(3600),
            ttl_jitter: 0.0,
            // Sweep every 5 minutes
            cleanup_interval: Duration::from_secs(300),
            check_interval: Duration::from_secs(3600),
            enabled: CacheToggle::default(),
        }
    }
}

/// `<user config dir>/material3-mcp/cache`, falling back to the temp dir
pub fn default_cache_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("material3-mcp")
        .join("cache")
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Default configuration rooted at `dir`
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            cache_dir: dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Load from the environment (and a `.env` file if present)
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = Self::default();

        if let Ok(dir) = std::env::var(ENV_CACHE_DIR) {
            if !dir.trim().is_empty() {
                config.cache_dir = PathBuf::from(dir);
            }
        }

        if let Ok(raw) = std::env::var(ENV_CACHE_TTL_SECS) {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                CacheError::Config(format!("{} must be an integer, got {:?}", ENV_CACHE_TTL_SECS, raw))
            })?;
            config.default_ttl = Duration::from_secs(secs);
        }

        if let Some(enabled) = enabled_from_env() {
            config.enabled.set_enabled(enabled);
        }

        config.validate()?;
        info!(
            "Cache configuration loaded (dir: {}, enabled: {})",
            config.cache_dir.display(),
            config.enabled.is_enabled()
        );
        Ok(config)
    }

    /// Re-read the enabled flag from the environment
    ///
    /// Returns the value now in effect.
    pub fn reload_enabled_from_env(&self) -> bool {
        if let Some(enabled) = enabled_from_env() {
            if enabled != self.enabled.is_enabled() {
                info!("Caching {} by configuration reload", if enabled { "enabled" } else { "disabled" });
            }
            self.enabled.set_enabled(enabled);
        }
        self.enabled.is_enabled()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.ttl_jitter < 0.0 || self.ttl_jitter > 1.0 {
            return Err(CacheError::Config(
                "ttl_jitter must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.default_ttl.is_zero() {
            return Err(CacheError::Config(
                "default_ttl must be greater than 0".to_string(),
            ));
        }

        if self.cleanup_interval.is_zero() {
            return Err(CacheError::Config(
                "cleanup_interval must be greater than 0".to_string(),
            ));
        }

        if self.check_interval.is_zero() {
            return Err(CacheError::Config(
                "check_interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Default TTL in whole seconds with jitter applied
    pub fn ttl_with_jitter(&self) -> u64 {
        let base_secs = self.default_ttl.as_secs_f64();
        if self.ttl_jitter == 0.0 {
            return self.default_ttl.as_secs();
        }

        let jitter_range = base_secs * self.ttl_jitter;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        (base_secs + jitter).max(1.0).round() as u64
    }

    /// Path of the backing file for a partition
    pub fn partition_path(&self, partition: crate::cache::Partition) -> PathBuf {
        self.cache_dir.join(format!("{}.json", partition.as_str()))
    }
}

fn enabled_from_env() -> Option<bool> {
    let raw = std::env::var(ENV_CACHE_ENABLED).ok()?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        other => {
            warn!("Ignoring unrecognised {} value: {:?}", ENV_CACHE_ENABLED, other);
            None
        }
    }
}

/// Builder for cache configuration with validation
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    cache_dir: Option<PathBuf>,
    default_ttl: Option<Duration>,
    ttl_jitter: Option<f64>,
    cleanup_interval: Option<Duration>,
    check_interval: Option<Duration>,
    enabled: Option<CacheToggle>,
}

impl CacheConfigBuilder {
    /// Set the directory holding partition files
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Set default TTL for cache entries
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Set TTL jitter factor (0.0 - 1.0)
    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    /// Set cleanup interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    /// Set the upstream check interval
    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = Some(interval);
        self
    }

    /// Start enabled or disabled
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(CacheToggle::new(enabled));
        self
    }

    /// Share an existing toggle
    pub fn toggle(mut self, toggle: CacheToggle) -> Self {
        self.enabled = Some(toggle);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            cache_dir: self.cache_dir.unwrap_or(defaults.cache_dir),
            default_ttl: self.default_ttl.unwrap_or(defaults.default_ttl),
            ttl_jitter: self.ttl_jitter.unwrap_or(defaults.ttl_jitter),
            cleanup_interval: self.cleanup_interval.unwrap_or(defaults.cleanup_interval),
            check_interval: self.check_interval.unwrap_or(defaults.check_interval),
            enabled: self.enabled.unwrap_or(defaults.enabled),
        }
    }
}
