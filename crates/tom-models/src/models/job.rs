/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Job Model
//!
//! The unit of work flowing between the controller and the workers.
//!
//! ## Status Flow
//!
//! ```text
//! NEW ──enqueue──▶ QUEUED ──fetch──▶ ACTIVE ─┬─complete──▶ COMPLETE
//!                     ▲                      ├─fail (transient, budget left) ─▶ QUEUED
//!                     └──────────────────────┤
//!                                            ├─fail (fatal or budget spent) ─▶ FAILED
//!                                            └─abort ──▶ ABORTED
//! ```
//!
//! NEW exists only inside the enqueue operation; every externally observable
//! lifecycle starts at QUEUED. COMPLETE, FAILED and ABORTED are terminal and
//! transitions are monotone: the store refuses to move a terminal job.

use crate::models::cache::CacheMeta;
use crate::models::device::{AdapterKind, CredentialRef};
use crate::models::errors::JobError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Job lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    New,
    Queued,
    Active,
    Complete,
    Failed,
    Aborted,
}

impl JobStatus {
    /// Whether the job can never change state again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::Failed | JobStatus::Aborted
        )
    }

    /// Whether `next` is a legal successor state under the lifecycle diagram.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::New, JobStatus::Queued) => true,
            (JobStatus::Queued, JobStatus::Active) => true,
            // Supervisor sweep may requeue a stalled ACTIVE job.
            (JobStatus::Active, JobStatus::Queued) => true,
            (JobStatus::Active, JobStatus::Complete) => true,
            (JobStatus::Active, JobStatus::Failed) => true,
            (JobStatus::Active, JobStatus::Aborted) => true,
            // Cooperative abort can land before any worker picks the job up.
            (JobStatus::Queued, JobStatus::Aborted) => true,
            (JobStatus::Failed, JobStatus::Aborted) => true,
            _ => false,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobStatus::New => "NEW",
            JobStatus::Queued => "QUEUED",
            JobStatus::Active => "ACTIVE",
            JobStatus::Complete => "COMPLETE",
            JobStatus::Failed => "FAILED",
            JobStatus::Aborted => "ABORTED",
        }
    }
}

/// What the worker is being asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Execute the payload's command list over SSH.
    SendCommands,
    /// Enumerate credential ids from the worker's credential plugin.
    ListCredentials,
}

/// Everything a worker needs to execute a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    pub host: String,
    pub port: u16,
    pub adapter: AdapterKind,
    pub adapter_driver: String,
    pub commands: Vec<String>,
    pub credential: CredentialRef,
    #[serde(default)]
    pub adapter_options: BTreeMap<String, serde_json::Value>,
    /// Remaining retry budget; decremented on each transient failure.
    pub retries_remaining: u32,
    /// Upper bound on waiting for the device lease.
    pub max_queue_wait_s: u64,
    /// Per-job execution timeout.
    pub timeout_s: u64,
    pub use_cache: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_ttl: Option<u64>,
    pub cache_refresh: bool,
}

/// Per-command parsing controls for multi-command requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub command: String,
    #[serde(default)]
    pub parse: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parser: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default)]
    pub include_raw: bool,
}

/// Request-time bookkeeping preserved for retrieval-time operations,
/// primarily so a completed job can be re-parsed on a later poll without
/// re-resolving the device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub parse: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parser: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default)]
    pub include_raw: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command_specs: Vec<CommandSpec>,
}

/// Result metadata attached alongside command output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMeta {
    /// Per-command cache outcome, keyed by command text.
    #[serde(default)]
    pub cache: BTreeMap<String, CacheMeta>,
}

/// Output of a completed job.
///
/// `data` maps command text to output (raw text, or a parsed structure once
/// the controller has applied a template). The map preserves the declared
/// command order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub data: serde_json::Map<String, serde_json::Value>,
    pub meta: ResultMeta,
}

/// The full job envelope as stored in Redis and snapshotted to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    /// Number of times a worker has picked the job up.
    pub attempts: u32,
    pub payload: JobPayload,
    #[serde(default)]
    pub metadata: JobMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer_id: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acquired_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Builds a NEW job envelope ready for `enqueue`.
    pub fn new(kind: JobKind, payload: JobPayload, metadata: JobMetadata) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            kind,
            status: JobStatus::New,
            attempts: 0,
            payload,
            metadata,
            result: None,
            error: None,
            consumer_id: None,
            enqueued_at: Utc::now(),
            acquired_at: None,
        }
    }

    /// Raw output for one command, when the job completed and the command
    /// produced a plain string.
    pub fn command_output(&self, command: &str) -> Option<&str> {
        self.result
            .as_ref()
            .and_then(|r| r.data.get(command))
            .and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> JobPayload {
        JobPayload {
            host: "rtr1.example.net".into(),
            port: 22,
            adapter: AdapterKind::Ssh2,
            adapter_driver: "cisco_ios".into(),
            commands: vec!["show version".into()],
            credential: CredentialRef::Stored {
                credential_id: "lab".into(),
            },
            adapter_options: BTreeMap::new(),
            retries_remaining: 3,
            max_queue_wait_s: 300,
            timeout_s: 30,
            use_cache: false,
            cache_ttl: None,
            cache_refresh: false,
        }
    }

    #[test]
    fn lifecycle_edges_match_the_state_diagram() {
        use JobStatus::*;
        assert!(New.can_transition_to(Queued));
        assert!(Queued.can_transition_to(Active));
        assert!(Active.can_transition_to(Complete));
        assert!(Active.can_transition_to(Failed));
        assert!(Active.can_transition_to(Queued));
        assert!(Active.can_transition_to(Aborted));
        assert!(Failed.can_transition_to(Aborted));

        // No resurrection of terminal jobs.
        assert!(!Complete.can_transition_to(Active));
        assert!(!Complete.can_transition_to(Queued));
        assert!(!Aborted.can_transition_to(Queued));
        assert!(!Failed.can_transition_to(Active));
        // No skipping the queue.
        assert!(!New.can_transition_to(Active));
        assert!(!Queued.can_transition_to(Complete));
    }

    #[test]
    fn terminal_states_are_exactly_three() {
        use JobStatus::*;
        for s in [New, Queued, Active] {
            assert!(!s.is_terminal());
        }
        for s in [Complete, Failed, Aborted] {
            assert!(s.is_terminal());
        }
    }

    #[test]
    fn envelope_round_trips_through_json() {
        let job = Job::new(JobKind::SendCommands, payload(), JobMetadata::default());
        let json = serde_json::to_string(&job).unwrap();
        let back: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(back, job);
        assert!(json.contains("\"NEW\""));
    }

    #[test]
    fn result_data_preserves_declared_order() {
        let mut result = JobResult::default();
        for cmd in ["show version", "show ip int brief", "show arp"] {
            result
                .data
                .insert(cmd.to_string(), serde_json::Value::String("out".into()));
        }
        let keys: Vec<_> = result.data.keys().cloned().collect();
        assert_eq!(keys, ["show version", "show ip int brief", "show arp"]);
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.find("show version").unwrap() < json.find("show arp").unwrap());
    }

    #[test]
    fn command_output_reads_plain_strings_only() {
        let mut job = Job::new(JobKind::SendCommands, payload(), JobMetadata::default());
        let mut result = JobResult::default();
        result.data.insert(
            "show version".into(),
            serde_json::Value::String("IOS 15.2".into()),
        );
        result
            .data
            .insert("show arp".into(), serde_json::json!([{"ip": "10.0.0.1"}]));
        job.result = Some(result);
        assert_eq!(job.command_output("show version"), Some("IOS 15.2"));
        assert_eq!(job.command_output("show arp"), None);
        assert_eq!(job.command_output("show clock"), None);
    }
}
