//! # Material 3 cache (material3-cache)
//!
//! Persistent caching and upstream freshness tracking for a Material Design 3
//! MCP server.
//!
//! ## Features
//!
//! - Three durable cache partitions (`components`, `icons`, `docs`) with
//!   per-entry TTL and hit/miss statistics
//! - Get-or-compute memoization of provider fetches
//! - Cache versioning: entries written by another build are discarded
//! - Upstream change detection against the material-web and Flutter
//!   repositories, at most once per check interval
//! - A `cache_health` MCP tool for inspection and manual invalidation
//!
//! ## Getting Started
//!
//! ```no_run
//! use material3_cache::CacheRuntime;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = CacheRuntime::from_env().await?;
//!
//!     let button = runtime.provider().get_component("button", "web").await?;
//!     println!("{} bytes of source", button.code.len());
//!
//!     let status = runtime
//!         .cache_health_tool()
//!         .call(json!({"action": "status"}))
//!         .await?;
//!     println!("{}", status.recommendation);
//!     Ok(())
//! }
//! ```
//!
//! ## Cache Versioning
//!
//! On startup and then on every tick of the version watch the
//! [`CacheVersionManager`] decides whether cached data is still trustworthy:
//!
//! ```no_run
//! use material3_cache::{CacheVersionManager, VersionCheck};
//!
//! async fn refresh(manager: &CacheVersionManager) {
//!     match manager.check().await {
//!         VersionCheck::UpstreamChanged => println!("upstream moved, cache cleared"),
//!         VersionCheck::UpstreamUnavailable => println!("offline, keeping cache"),
//!         other => println!("{:?}", other),
//!     }
//! }
//! ```

pub mod cache;
pub mod error;
pub mod http;
pub mod providers;
pub mod runtime;
pub mod tools;
pub mod upstream;
pub mod version;

// Re-export main types for convenience
pub use cache::{
    CacheConfig, CacheConfigBuilder, CacheEntry, CacheKey, CacheSet, CacheStats, CacheToggle,
    CacheValue, Clock, DurableStore, ManualClock, Partition, PartitionStats, SystemClock,
};
pub use error::{CacheError, Result};
pub use http::{HttpClient, HttpConfig};
pub use providers::{ComponentSource, ComponentSourceProvider, Framework};
pub use runtime::{CacheRuntime, CacheRuntimeBuilder};
pub use tools::{CacheHealthTool, ToolDefinition, ToolOutput};
pub use upstream::{FingerprintChecker, GitHubRevisionSource, RevisionSource, UpstreamRepo};
pub use version::{CacheHealth, CacheVersionManager, VersionCheck, VersionRecord, CACHE_VERSION};
