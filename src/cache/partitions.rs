//! The three cache partitions, opened and managed together

use crate::cache::{
    clock::SharedClock,
    config::CacheConfig,
    store::DurableStore,
    types::{CacheStats, Partition},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Per-partition statistics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionStats {
    pub components: CacheStats,
    pub icons: CacheStats,
    pub docs: CacheStats,
}

impl PartitionStats {
    /// Live entries across all partitions
    pub fn total_size(&self) -> usize {
        self.components.size + self.icons.size + self.docs.size
    }
}

/// Handles to the `components`, `icons` and `docs` stores
///
/// Cloning is cheap and every clone points at the same stores, so the set is
/// built once at startup and handed to providers and the version manager.
#[derive(Clone)]
pub struct CacheSet {
    components: Arc<DurableStore>,
    icons: Arc<DurableStore>,
    docs: Arc<DurableStore>,
}

impl CacheSet {
    /// Open all three partitions under `config.cache_dir`
    pub fn open(config: &CacheConfig, clock: SharedClock) -> Self {
        info!(
            "Opening cache partitions in {}",
            config.cache_dir.display()
        );

        Self {
            components: Arc::new(DurableStore::open(
                Partition::Components,
                config,
                clock.clone(),
            )),
            icons: Arc::new(DurableStore::open(Partition::Icons, config, clock.clone())),
            docs: Arc::new(DurableStore::open(Partition::Docs, config, clock)),
        }
    }

    /// Store backing `partition`
    pub fn partition(&self, partition: Partition) -> &Arc<DurableStore> {
        match partition {
            Partition::Components => &self.components,
            Partition::Icons => &self.icons,
            Partition::Docs => &self.docs,
        }
    }

    pub fn components(&self) -> &Arc<DurableStore> {
        &self.components
    }

    pub fn icons(&self) -> &Arc<DurableStore> {
        &self.icons
    }

    pub fn docs(&self) -> &Arc<DurableStore> {
        &self.docs
    }

    /// Clear every partition
    pub(crate) async fn clear_all(&self) {
        for partition in Partition::ALL {
            self.partition(partition).clear().await;
        }
    }

    /// Statistics for every partition
    pub async fn stats(&self) -> PartitionStats {
        PartitionStats {
            components: self.components.stats().await,
            icons: self.icons.stats().await,
            docs: self.docs.stats().await,
        }
    }

    /// Sweep expired entries from every partition
    pub async fn cleanup_expired(&self) -> usize {
        let mut removed = 0;
        for partition in Partition::ALL {
            removed += self.partition(partition).cleanup_expired().await;
        }
        removed
    }
}

/// Background task sweeping expired entries every `interval`
pub async fn start_auto_cleanup(caches: CacheSet, interval: Duration) {
    info!("Starting automatic cache cleanup task (interval: {:?})", interval);

    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately; skip it so the sweep runs after one interval.
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let removed = caches.cleanup_expired().await;
        if removed > 0 {
            debug!("Auto cleanup removed {} expired entries", removed);
        }
    }
}
