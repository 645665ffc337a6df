//! Cache entry management with TTL support

use crate::cache::types::CacheValue;
use serde::{Deserialize, Serialize};

/// A persisted cache entry: `{ data, timestamp, ttl }` on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The cached payload
    pub data: CacheValue,

    /// Write time, milliseconds since the Unix epoch
    pub timestamp: i64,

    /// Time-to-live in seconds
    pub ttl: u64,
}

impl CacheEntry {
    /// Create a new entry written at `now_ms`
    pub fn new(data: CacheValue, now_ms: i64, ttl_seconds: u64) -> Self {
        Self {
            data,
            timestamp: now_ms,
            ttl: ttl_seconds,
        }
    }

    /// An entry is expired once strictly more than `ttl` seconds have passed
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms.saturating_sub(self.timestamp) > self.ttl_millis()
    }

    /// Milliseconds left before expiry, `None` once expired
    pub fn remaining_millis(&self, now_ms: i64) -> Option<i64> {
        if self.is_expired(now_ms) {
            None
        } else {
            Some(self.timestamp.saturating_add(self.ttl_millis()) - now_ms)
        }
    }

    /// Age of the entry in milliseconds
    pub fn age_millis(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.timestamp).max(0)
    }

    fn ttl_millis(&self) -> i64 {
        i64::try_from(self.ttl)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000)
    }
}
