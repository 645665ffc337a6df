//! Core type definitions for the cache system

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Cache key type - caller-constructed, e.g. `web:button:default`
pub type CacheKey = String;

/// Cache value type - any JSON-serializable payload
pub type CacheValue = serde_json::Value;

/// Reserved key of the cache version record in the `components` partition
///
/// Reserved entries are bookkeeping, not cached data: they are excluded from
/// `size` and never touch the hit/miss/write counters.
pub const VERSION_RECORD_KEY: &str = "cache:version";

/// Independent cache namespaces, each backed by its own file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    /// Component metadata and source code
    Components,

    /// Icon catalogue data
    Icons,

    /// Documentation, tokens and accessibility guidance
    Docs,
}

impl Partition {
    /// All partitions in a stable order
    pub const ALL: [Partition; 3] = [Partition::Components, Partition::Icons, Partition::Docs];

    /// Name used for the backing file and in reports
    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Components => "components",
            Partition::Icons => "icons",
            Partition::Docs => "docs",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Partition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "components" => Ok(Partition::Components),
            "icons" => Ok(Partition::Icons),
            "docs" => Ok(Partition::Docs),
            other => Err(format!("unknown cache partition: {}", other)),
        }
    }
}

/// Running counters for one partition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Counters {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
}

/// Snapshot of a partition's performance, as reported to callers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Lookups that returned a fresh value
    pub hits: u64,

    /// Lookups that found nothing or an expired entry
    pub misses: u64,

    /// Successful writes since the last clear
    pub writes: u64,

    /// `hits / (hits + misses)` formatted as a percentage
    pub hit_rate: String,

    /// Number of live (non-expired) entries
    pub size: usize,
}

impl CacheStats {
    pub(crate) fn from_counters(counters: Counters, size: usize) -> Self {
        Self {
            hits: counters.hits,
            misses: counters.misses,
            writes: counters.writes,
            hit_rate: format_hit_rate(counters.hits, counters.misses),
            size,
        }
    }

    /// Total number of lookups
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, misses: {}, writes: {}, hit_rate: {}, size: {} }}",
            self.hits, self.misses, self.writes, self.hit_rate, self.size
        )
    }
}

fn format_hit_rate(hits: u64, misses: u64) -> String {
    let total = hits + misses;
    if total == 0 {
        return "0%".to_string();
    }
    format!("{:.2}%", (hits as f64 / total as f64) * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_formatting() {
        let stats = CacheStats::from_counters(
            Counters {
                hits: 2,
                misses: 1,
                writes: 0,
            },
            0,
        );
        assert_eq!(stats.hit_rate, "66.67%");
        assert_eq!(stats.lookups(), 3);
    }

    #[test]
    fn test_hit_rate_without_lookups() {
        let stats = CacheStats::from_counters(Counters::default(), 4);
        assert_eq!(stats.hit_rate, "0%");
        assert_eq!(stats.size, 4);
    }

    #[test]
    fn test_stats_serialize_camel_case() {
        let stats = CacheStats::from_counters(
            Counters {
                hits: 1,
                misses: 0,
                writes: 1,
            },
            1,
        );
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["hitRate"], "100.00%");
        assert_eq!(json["writes"], 1);
    }

    #[test]
    fn test_partition_names() {
        assert_eq!(Partition::Components.to_string(), "components");
        assert_eq!("icons".parse::<Partition>().unwrap(), Partition::Icons);
        assert!("fonts".parse::<Partition>().is_err());
        assert_eq!(Partition::ALL.len(), 3);
    }
}
