/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Operational telemetry shared between the workers and the controller's
//! monitoring endpoints: worker heartbeats, the failed-command stream and
//! per-device execution counters.

use crate::{keys, Result, Store};
use chrono::Utc;
use redis::streams::StreamRangeReply;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Heartbeat document each worker refreshes under a TTL'd key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHeartbeat {
    pub worker_id: String,
    pub hostname: String,
    pub pid: u32,
    pub version: String,
    pub timestamp: i64,
    pub active_jobs: usize,
}

/// A worker's health as derived from its last heartbeat.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub id: String,
    pub status: &'static str,
    pub seconds_since_heartbeat: i64,
    pub hostname: String,
    pub pid: u32,
    pub version: String,
    pub active_jobs: usize,
}

/// Heartbeat age thresholds: under a minute is healthy, under three is
/// stale, beyond that unhealthy.
pub fn health_from_age(seconds: i64) -> &'static str {
    if seconds < 60 {
        "healthy"
    } else if seconds < 180 {
        "stale"
    } else {
        "unhealthy"
    }
}

/// One failed command execution, appended to the failure stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub job_id: String,
    pub worker_id: String,
    pub device: String,
    pub command: String,
    pub error_kind: String,
    pub message: String,
    pub timestamp: i64,
}

/// Per-device execution counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceStats {
    pub success: u64,
    pub failure: u64,
    pub last_seen: Option<i64>,
}

/// Cap on the failure stream length; old entries are trimmed on append.
const FAILED_STREAM_MAXLEN: usize = 1_000;

/// Operational telemetry over the shared store.
pub struct OpsStore<'a> {
    pub(crate) store: &'a Store,
}

impl OpsStore<'_> {
    /// Writes the worker heartbeat with a TTL of the liveness window.
    pub async fn record_worker_heartbeat(&self, heartbeat: &WorkerHeartbeat) -> Result<()> {
        let mut conn = self.store.conn.clone();
        conn.set_ex::<_, _, ()>(
            keys::worker_heartbeat(&heartbeat.worker_id),
            serde_json::to_string(heartbeat)?,
            self.store.settings.worker.worker_liveness_s,
        )
        .await?;
        Ok(())
    }

    /// Lists workers with a live (or recently expired) heartbeat key.
    pub async fn list_workers(&self) -> Result<Vec<WorkerStatus>> {
        let mut conn = self.store.conn.clone();
        let heartbeat_keys: Vec<String> = conn.keys(keys::WORKER_HEARTBEAT_PATTERN).await?;
        let now = Utc::now().timestamp();
        let mut workers = Vec::new();

        for key in heartbeat_keys {
            let raw: Option<String> = conn.get(&key).await?;
            let Some(raw) = raw else { continue };
            let heartbeat: WorkerHeartbeat = match serde_json::from_str(&raw) {
                Ok(hb) => hb,
                Err(e) => {
                    warn!(key = %key, "invalid worker heartbeat: {}", e);
                    continue;
                }
            };
            let age = now - heartbeat.timestamp;
            workers.push(WorkerStatus {
                id: heartbeat.worker_id,
                status: health_from_age(age),
                seconds_since_heartbeat: age,
                hostname: heartbeat.hostname,
                pid: heartbeat.pid,
                version: heartbeat.version,
                active_jobs: heartbeat.active_jobs,
            });
        }
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(workers)
    }

    /// Appends to the failed-command stream, trimming to the cap.
    pub async fn record_failure(&self, record: &FailureRecord) -> Result<()> {
        let mut conn = self.store.conn.clone();
        let fields: Vec<(&str, String)> = vec![
            ("job_id", record.job_id.clone()),
            ("worker_id", record.worker_id.clone()),
            ("device", record.device.clone()),
            ("command", record.command.clone()),
            ("error_kind", record.error_kind.clone()),
            ("message", record.message.clone()),
            ("timestamp", record.timestamp.to_string()),
        ];
        conn.xadd_maxlen::<_, _, _, _, ()>(
            keys::FAILED_STREAM,
            redis::streams::StreamMaxlen::Approx(FAILED_STREAM_MAXLEN),
            "*",
            &fields,
        )
        .await?;
        Ok(())
    }

    /// Most recent failures, newest first, optionally filtered by device
    /// and/or error kind.
    pub async fn recent_failures(
        &self,
        limit: usize,
        device: Option<&str>,
        error_kind: Option<&str>,
    ) -> Result<Vec<FailureRecord>> {
        let mut conn = self.store.conn.clone();
        // Over-read to leave room for filtering.
        let reply: StreamRangeReply = redis::cmd("XREVRANGE")
            .arg(keys::FAILED_STREAM)
            .arg("+")
            .arg("-")
            .arg("COUNT")
            .arg(limit * 2)
            .query_async(&mut conn)
            .await?;

        let mut records = Vec::new();
        for entry in reply.ids {
            let field = |name: &str| -> String {
                entry
                    .map
                    .get(name)
                    .and_then(|v| match v {
                        redis::Value::Data(bytes) => String::from_utf8(bytes.clone()).ok(),
                        _ => None,
                    })
                    .unwrap_or_default()
            };
            let record = FailureRecord {
                job_id: field("job_id"),
                worker_id: field("worker_id"),
                device: field("device"),
                command: field("command"),
                error_kind: field("error_kind"),
                message: field("message"),
                timestamp: field("timestamp").parse().unwrap_or(0),
            };
            if let Some(device) = device {
                if !record.device.eq_ignore_ascii_case(device) {
                    continue;
                }
            }
            if let Some(kind) = error_kind {
                if !record.error_kind.eq_ignore_ascii_case(kind) {
                    continue;
                }
            }
            records.push(record);
            if records.len() >= limit {
                break;
            }
        }
        Ok(records)
    }

    /// Bumps the per-device success/failure counters.
    pub async fn record_device_result(&self, device: &str, success: bool) -> Result<()> {
        let mut conn = self.store.conn.clone();
        let key = keys::device_stats(device);
        let field = if success { "success" } else { "failure" };
        conn.hincr::<_, _, _, ()>(&key, field, 1).await?;
        conn.hset::<_, _, _, ()>(&key, "last_seen", Utc::now().timestamp())
            .await?;
        Ok(())
    }

    /// Per-device counters for the monitoring API.
    pub async fn device_stats(&self) -> Result<BTreeMap<String, DeviceStats>> {
        let mut conn = self.store.conn.clone();
        let stat_keys: Vec<String> = conn.keys(keys::DEVICE_STATS_PATTERN).await?;
        let mut stats = BTreeMap::new();
        for key in stat_keys {
            let device = key
                .strip_prefix("tom:stats:device:")
                .unwrap_or(&key)
                .to_string();
            let fields: BTreeMap<String, String> = conn.hgetall(&key).await?;
            let parse = |name: &str| fields.get(name).and_then(|v| v.parse().ok());
            let parse_i64 = |name: &str| fields.get(name).and_then(|v| v.parse().ok());
            stats.insert(
                device,
                DeviceStats {
                    success: parse("success").unwrap_or(0),
                    failure: parse("failure").unwrap_or(0),
                    last_seen: parse_i64("last_seen"),
                },
            );
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_thresholds() {
        assert_eq!(health_from_age(0), "healthy");
        assert_eq!(health_from_age(59), "healthy");
        assert_eq!(health_from_age(60), "stale");
        assert_eq!(health_from_age(179), "stale");
        assert_eq!(health_from_age(180), "unhealthy");
    }

    #[test]
    fn heartbeat_round_trips() {
        let hb = WorkerHeartbeat {
            worker_id: "w-1".into(),
            hostname: "host-a".into(),
            pid: 42,
            version: "0.1.0".into(),
            timestamp: 1_700_000_000,
            active_jobs: 2,
        };
        let json = serde_json::to_string(&hb).unwrap();
        let back: WorkerHeartbeat = serde_json::from_str(&json).unwrap();
        assert_eq!(back.worker_id, "w-1");
        assert_eq!(back.active_jobs, 2);
    }
}
