/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Cache Model
//!
//! Stored cache entries for device command output and the per-command cache
//! metadata reported back on job results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored cache value, keyed by the `(device_host, command)` fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Raw device output as captured by the transport session.
    pub raw_output: String,
    /// When the entry was written.
    pub cached_at: DateTime<Utc>,
    /// TTL the entry was stored with, after clamping to the server maximum.
    pub ttl_s: u64,
}

impl CacheEntry {
    /// Seconds elapsed since the entry was written.
    pub fn age_seconds(&self, now: DateTime<Utc>) -> f64 {
        (now - self.cached_at).num_milliseconds() as f64 / 1000.0
    }
}

/// Per-command cache outcome reported in `result.meta.cache`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheStatus {
    /// Served from cache without touching the device.
    Hit,
    /// Not cached; executed on the device and stored.
    Miss,
    /// Lookup skipped by request; executed and overwritten.
    Refresh,
    /// Caching disabled for the request; executed and not stored.
    Bypass,
}

/// Cache bookkeeping for a single command in a job result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMeta {
    pub cache_status: CacheStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_seconds: Option<f64>,
}

impl CacheMeta {
    pub fn hit(entry: &CacheEntry, now: DateTime<Utc>) -> Self {
        Self {
            cache_status: CacheStatus::Hit,
            cached_at: Some(entry.cached_at),
            age_seconds: Some(entry.age_seconds(now)),
        }
    }

    pub fn of(status: CacheStatus) -> Self {
        Self {
            cache_status: status,
            cached_at: None,
            age_seconds: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn age_is_measured_from_write_time() {
        let now = Utc::now();
        let entry = CacheEntry {
            raw_output: "out".into(),
            cached_at: now - Duration::seconds(90),
            ttl_s: 300,
        };
        let age = entry.age_seconds(now);
        assert!((age - 90.0).abs() < 0.01);
    }

    #[test]
    fn status_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&CacheStatus::Bypass).unwrap(),
            "\"BYPASS\""
        );
        assert_eq!(
            serde_json::to_string(&CacheStatus::Refresh).unwrap(),
            "\"REFRESH\""
        );
    }

    #[test]
    fn hit_meta_carries_age() {
        let now = Utc::now();
        let entry = CacheEntry {
            raw_output: "out".into(),
            cached_at: now - Duration::seconds(10),
            ttl_s: 60,
        };
        let meta = CacheMeta::hit(&entry, now);
        assert_eq!(meta.cache_status, CacheStatus::Hit);
        assert!(meta.age_seconds.unwrap() >= 10.0);
    }
}
