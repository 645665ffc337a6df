//! # Persistent, partitioned cache
//!
//! Durable key-value storage in front of the Material 3 providers.
//!
//! ## Features
//!
//! - **Three partitions**: `components`, `icons` and `docs`, each with its own
//!   file and its own hit/miss/write counters
//! - **TTL-Based Expiration**: entries expire `ttl` seconds after they were
//!   written; expired entries read as absent and are purged
//! - **Durable Writes**: every mutation is flushed to disk atomically
//! - **Get-or-Compute**: [`DurableStore::wrap`] memoizes provider fetches
//! - **Runtime Toggle**: a shared [`CacheToggle`] disables reads and writes
//!
//! ## Example
//!
//! ```rust
//! use material3_cache::cache::{CacheConfig, CacheSet, SystemClock};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let dir = tempfile::tempdir()?;
//! let caches = CacheSet::open(&CacheConfig::in_dir(dir.path()), Arc::new(SystemClock));
//!
//! caches.components().set("web:button:default", json!({"tag": "md-filled-button"}), 3600).await;
//!
//! if let Some(value) = caches.components().get("web:button:default").await {
//!     println!("Cache hit: {}", value);
//! }
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod entry;
pub mod partitions;
pub mod store;
pub mod types;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{default_cache_dir, CacheConfig, CacheConfigBuilder, CacheToggle};
pub use entry::CacheEntry;
pub use partitions::{start_auto_cleanup, CacheSet, PartitionStats};
pub use store::DurableStore;
pub use types::{CacheKey, CacheStats, CacheValue, Partition, VERSION_RECORD_KEY};
