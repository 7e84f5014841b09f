/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Fingerprinted response cache for device command output.
//!
//! Keys are `<prefix>:<host>:<fingerprint>` where the fingerprint is the
//! SHA-256 of the normalized host and command text separated by a NUL byte.
//! Keeping the host in the key makes per-device invalidation a pattern
//! delete. Entries expire through Redis TTLs; nothing is ever cached for a
//! failed command.

use crate::{Result, Store};
use chrono::Utc;
use redis::AsyncCommands;
use sha2::{Digest, Sha256};
use tom_models::CacheEntry;
use tracing::{debug, warn};

/// Normalizes an identifier the way cache keys expect: surrounding
/// whitespace trimmed, inner runs collapsed, lowercased.
fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Stable fingerprint of a `(device_host, command)` pair.
pub fn fingerprint(host: &str, command: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(host).as_bytes());
    hasher.update([0u8]);
    hasher.update(normalize(command).as_bytes());
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Requested TTLs are clamped to the configured maximum, never rejected.
pub fn clamp_ttl(requested: Option<u64>, default_ttl: u64, max_ttl: u64) -> u64 {
    requested.unwrap_or(default_ttl).min(max_ttl)
}

/// Response cache operations over the shared store.
pub struct CacheStore<'a> {
    pub(crate) store: &'a Store,
}

impl CacheStore<'_> {
    fn prefix(&self) -> &str {
        &self.store.settings.cache.key_prefix
    }

    fn enabled(&self) -> bool {
        self.store.settings.cache.enabled
    }

    /// Full Redis key for a device/command pair.
    pub fn key_for(&self, host: &str, command: &str) -> String {
        format!(
            "{}:{}:{}",
            self.prefix(),
            normalize(host),
            fingerprint(host, command)
        )
    }

    /// Looks up a cached entry. Returns `None` when caching is disabled,
    /// the entry is missing, or the stored value fails to decode.
    pub async fn get(&self, host: &str, command: &str) -> Result<Option<CacheEntry>> {
        if !self.enabled() {
            return Ok(None);
        }
        let key = self.key_for(host, command);
        let mut conn = self.store.conn.clone();
        let raw: Option<String> = conn.get(&key).await?;
        let Some(raw) = raw else {
            debug!(key = %key, "cache miss");
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(key = %key, "undecodable cache entry, treating as miss: {}", e);
                Ok(None)
            }
        }
    }

    /// Stores a successful command output. The TTL is clamped to the
    /// configured maximum.
    pub async fn put(
        &self,
        host: &str,
        command: &str,
        raw_output: &str,
        requested_ttl: Option<u64>,
    ) -> Result<()> {
        if !self.enabled() {
            return Ok(());
        }
        let cache_cfg = &self.store.settings.cache;
        let ttl = clamp_ttl(requested_ttl, cache_cfg.default_ttl, cache_cfg.max_ttl);
        let entry = CacheEntry {
            raw_output: raw_output.to_string(),
            cached_at: Utc::now(),
            ttl_s: ttl,
        };
        let key = self.key_for(host, command);
        let mut conn = self.store.conn.clone();
        conn.set_ex::<_, _, ()>(&key, serde_json::to_string(&entry)?, ttl)
            .await?;
        debug!(key = %key, ttl, "cache set");
        Ok(())
    }

    /// Deletes every cached entry for a device. Returns the number removed.
    pub async fn invalidate_device(&self, host: &str) -> Result<usize> {
        self.delete_pattern(&format!("{}:{}:*", self.prefix(), normalize(host)))
            .await
    }

    /// Deletes every cached entry. Returns the number removed.
    pub async fn clear_all(&self) -> Result<usize> {
        self.delete_pattern(&format!("{}:*", self.prefix())).await
    }

    /// Lists cache keys (prefix stripped), optionally scoped to one device.
    pub async fn list_keys(&self, host: Option<&str>) -> Result<Vec<String>> {
        if !self.enabled() {
            return Ok(Vec::new());
        }
        let pattern = match host {
            Some(host) => format!("{}:{}:*", self.prefix(), normalize(host)),
            None => format!("{}:*", self.prefix()),
        };
        let mut conn = self.store.conn.clone();
        let keys: Vec<String> = conn.keys(&pattern).await?;
        let strip = self.prefix().len() + 1;
        Ok(keys
            .into_iter()
            .map(|k| k.chars().skip(strip).collect())
            .collect())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<usize> {
        if !self.enabled() {
            return Ok(0);
        }
        let mut conn = self.store.conn.clone();
        let keys: Vec<String> = conn.keys(pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let deleted: usize = conn.del(&keys).await?;
        debug!(pattern = %pattern, deleted, "cache invalidated");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_normalized() {
        let a = fingerprint("Rtr1.Example.Net", "show  version");
        let b = fingerprint("rtr1.example.net", "show version");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn fingerprint_separates_host_and_command() {
        // "ab" + "c" must not collide with "a" + "bc"
        assert_ne!(fingerprint("ab", "c"), fingerprint("a", "bc"));
    }

    #[test]
    fn different_commands_fingerprint_differently() {
        assert_ne!(
            fingerprint("rtr1", "show version"),
            fingerprint("rtr1", "show ip int brief")
        );
    }

    #[test]
    fn ttl_is_clamped_not_rejected() {
        assert_eq!(clamp_ttl(None, 300, 3600), 300);
        assert_eq!(clamp_ttl(Some(60), 300, 3600), 60);
        assert_eq!(clamp_ttl(Some(86_400), 300, 3600), 3600);
    }
}
