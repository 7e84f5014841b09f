/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Per-device concurrency gate.
//!
//! A device lease is a single Redis key written with `SET NX PX`: at most one
//! holder per device key across the whole worker fleet. Contending acquirers
//! retry with jittered exponential backoff until their wait budget runs out,
//! which surfaces as a gating error (transient, for retry accounting).
//! Release and renewal compare the stored holder id in a Lua script so a
//! lease reclaimed after TTL expiry can never be freed or extended by its
//! previous owner.

use crate::{keys, Result, Store};
use chrono::{DateTime, Utc};
use rand::Rng;
use redis::Script;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Deletes the lease key only when the holder still matches.
const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Extends the lease TTL only when the holder still matches.
const RENEW_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

/// The gate could not be acquired within the caller's wait budget.
#[derive(Debug, Error)]
#[error("device {device_key} busy: lease not acquired within {waited_ms} ms")]
pub struct GatingError {
    pub device_key: String,
    pub waited_ms: u64,
}

/// An acquired device lease. Logical ownership token only — dropping it does
/// not release the key; callers release explicitly on every exit path.
#[derive(Debug, Clone)]
pub struct Lease {
    pub device_key: String,
    pub holder_id: String,
    pub acquired_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl Lease {
    /// Renewal cadence: half the TTL, so one missed tick still leaves slack.
    pub fn renew_interval(&self) -> Duration {
        self.ttl / 2
    }
}

/// Backoff before the nth retry of a contended acquisition: 500 ms doubling
/// to a 5 s cap, with ±25% jitter.
pub fn gate_backoff(attempt: u32, jitter: f64) -> Duration {
    debug_assert!((-1.0..=1.0).contains(&jitter));
    let base_ms = 500u64.saturating_mul(1 << attempt.min(6));
    let capped = base_ms.min(5_000) as f64;
    let jittered = capped * (1.0 + 0.25 * jitter);
    Duration::from_millis(jittered.max(0.0) as u64)
}

/// Device lease operations over the shared store.
pub struct LeaseStore<'a> {
    pub(crate) store: &'a Store,
}

impl LeaseStore<'_> {
    /// Attempts to acquire the lease for `device_key`, waiting up to
    /// `max_wait` across retries.
    pub async fn acquire(
        &self,
        device_key: &str,
        holder_id: &str,
        ttl: Duration,
        max_wait: Duration,
    ) -> Result<std::result::Result<Lease, GatingError>> {
        let key = keys::device_lease(device_key);
        let started = tokio::time::Instant::now();
        let mut attempt = 0u32;

        loop {
            if self.try_set(&key, holder_id, ttl).await? {
                debug!(device_key, holder_id, "device lease acquired");
                return Ok(Ok(Lease {
                    device_key: device_key.to_string(),
                    holder_id: holder_id.to_string(),
                    acquired_at: Utc::now(),
                    ttl,
                }));
            }

            let jitter: f64 = rand::thread_rng().gen_range(-1.0..=1.0);
            let backoff = gate_backoff(attempt, jitter);
            attempt += 1;

            if started.elapsed() + backoff >= max_wait {
                let waited_ms = started.elapsed().as_millis() as u64;
                warn!(device_key, waited_ms, "gave up waiting for device lease");
                return Ok(Err(GatingError {
                    device_key: device_key.to_string(),
                    waited_ms,
                }));
            }
            tokio::time::sleep(backoff).await;
        }
    }

    /// Releases a lease. Idempotent: releasing an unheld or reclaimed lease
    /// is a no-op.
    pub async fn release(&self, lease: &Lease) -> Result<()> {
        let mut conn = self.store.conn.clone();
        let deleted: i64 = Script::new(RELEASE_SCRIPT)
            .key(keys::device_lease(&lease.device_key))
            .arg(&lease.holder_id)
            .invoke_async(&mut conn)
            .await?;
        if deleted == 0 {
            debug!(device_key = %lease.device_key, "lease already released or reclaimed");
        }
        Ok(())
    }

    /// Refreshes the lease TTL. Returns `false` when the lease was lost
    /// (reclaimed after expiry), in which case the holder must abort its
    /// command with a transient error.
    pub async fn renew(&self, lease: &Lease) -> Result<bool> {
        let mut conn = self.store.conn.clone();
        let extended: i64 = Script::new(RENEW_SCRIPT)
            .key(keys::device_lease(&lease.device_key))
            .arg(&lease.holder_id)
            .arg(lease.ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;
        Ok(extended == 1)
    }

    async fn try_set(&self, key: &str, holder_id: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.store.conn.clone();
        let outcome: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(holder_id)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(outcome.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_half_a_second() {
        assert_eq!(gate_backoff(0, 0.0), Duration::from_millis(500));
        assert_eq!(gate_backoff(1, 0.0), Duration::from_millis(1000));
        assert_eq!(gate_backoff(2, 0.0), Duration::from_millis(2000));
        assert_eq!(gate_backoff(3, 0.0), Duration::from_millis(4000));
    }

    #[test]
    fn backoff_caps_at_five_seconds() {
        assert_eq!(gate_backoff(4, 0.0), Duration::from_millis(5000));
        assert_eq!(gate_backoff(20, 0.0), Duration::from_millis(5000));
    }

    #[test]
    fn jitter_stays_within_a_quarter() {
        let low = gate_backoff(0, -1.0);
        let high = gate_backoff(0, 1.0);
        assert_eq!(low, Duration::from_millis(375));
        assert_eq!(high, Duration::from_millis(625));
    }

    #[test]
    fn renewal_runs_at_half_ttl() {
        let lease = Lease {
            device_key: "rtr1:22".into(),
            holder_id: "job-1".into(),
            acquired_at: Utc::now(),
            ttl: Duration::from_secs(120),
        };
        assert_eq!(lease.renew_interval(), Duration::from_secs(60));
    }
}
