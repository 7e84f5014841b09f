/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Per-job execution pipeline.
//!
//! For a command job: partition the command list against the cache, and if
//! anything missed, resolve the credential, take the device lease, open one
//! transport session and execute every miss in declared order, caching each
//! success as it lands. Hits and fresh output merge back in declared order.
//!
//! The lease and the session are owned by one scope that releases them on
//! every exit path. Abort requests are honored at the checkpoints between
//! phases and between commands; a lost lease aborts the run with a
//! transient classification so the retry budget decides what happens next.

use crate::adapters::{build_adapter, AdapterError, SessionSpec};
use crate::credentials::{CredentialError, CredentialStore};
use crate::metrics;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tom_models::{
    CacheEntry, CacheMeta, CacheStatus, Credential, CredentialRef, ErrorKind, Job, JobError,
    JobKind, JobResult, JobStatus, RetryHint,
};
use tom_store::leases::Lease;
use tom_store::ops::FailureRecord;
use tom_store::Store;
use tom_utils::Settings;
use tracing::{debug, info, warn};

/// A classified execution failure, ready for `fail(...)`.
#[derive(Debug)]
pub struct ExecError {
    pub error: JobError,
    pub hint: RetryHint,
}

impl ExecError {
    fn new(kind: ErrorKind, hint: RetryHint, message: impl Into<String>) -> Self {
        Self {
            error: JobError::new(kind, message),
            hint,
        }
    }
}

impl From<AdapterError> for ExecError {
    fn from(err: AdapterError) -> Self {
        Self::new(err.kind(), err.retry_hint(), err.to_string())
    }
}

impl From<CredentialError> for ExecError {
    fn from(err: CredentialError) -> Self {
        match err {
            // A dangling credential reference cannot be fixed by retrying.
            CredentialError::NotFound(_) => {
                Self::new(ErrorKind::AuthFailure, RetryHint::Fatal, err.to_string())
            }
            CredentialError::Backend(_) => {
                Self::new(ErrorKind::TransportError, RetryHint::Transient, err.to_string())
            }
        }
    }
}

impl From<tom_store::StoreError> for ExecError {
    fn from(err: tom_store::StoreError) -> Self {
        Self::new(ErrorKind::Internal, RetryHint::Transient, err.to_string())
    }
}

/// How one command interacts with the cache.
#[derive(Debug, PartialEq)]
pub enum CommandPlan {
    /// Serve the stored entry; the device is not contacted.
    Hit(CacheEntry),
    /// Execute on the device, then store with the given status.
    Execute(CacheStatus),
}

/// Pure cache partition: one plan per command, in declared order.
pub fn plan_cache(
    use_cache: bool,
    cache_refresh: bool,
    lookups: Vec<Option<CacheEntry>>,
) -> Vec<CommandPlan> {
    lookups
        .into_iter()
        .map(|entry| {
            if !use_cache {
                CommandPlan::Execute(CacheStatus::Bypass)
            } else if cache_refresh {
                CommandPlan::Execute(CacheStatus::Refresh)
            } else {
                match entry {
                    Some(entry) => CommandPlan::Hit(entry),
                    None => CommandPlan::Execute(CacheStatus::Miss),
                }
            }
        })
        .collect()
}

pub struct Executor {
    pub store: Store,
    pub credentials: Arc<dyn CredentialStore>,
    pub settings: Settings,
    pub worker_id: String,
}

impl Executor {
    /// Runs a fetched job to completion, reporting the outcome to the store.
    pub async fn execute(&self, job: Job) {
        let timer = metrics::JOB_DURATION_SECONDS
            .with_label_values(&[&job.payload.adapter.to_string()])
            .start_timer();

        let outcome = match job.kind {
            JobKind::SendCommands => self.run_commands(&job).await,
            JobKind::ListCredentials => self.run_list_credentials().await,
        };
        timer.observe_duration();

        match outcome {
            Ok(result) => {
                if let Err(e) = self.store.jobs().complete(&job.job_id, result).await {
                    warn!(job_id = %job.job_id, "failed to record completion: {}", e);
                }
                metrics::JOBS_PROCESSED_TOTAL
                    .with_label_values(&["complete"])
                    .inc();
                self.record_device_result(&job, true).await;
            }
            Err(exec_err) => {
                self.record_failure(&job, &exec_err).await;
                match self
                    .store
                    .jobs()
                    .fail(&job.job_id, exec_err.error, exec_err.hint)
                    .await
                {
                    Ok(updated) => {
                        let label = match updated.status {
                            JobStatus::Queued => "requeued",
                            JobStatus::Aborted => "aborted",
                            _ => "failed",
                        };
                        metrics::JOBS_PROCESSED_TOTAL.with_label_values(&[label]).inc();
                    }
                    Err(e) => warn!(job_id = %job.job_id, "failed to record failure: {}", e),
                }
                self.record_device_result(&job, false).await;
            }
        }
    }

    async fn run_list_credentials(&self) -> Result<JobResult, ExecError> {
        let ids = self.credentials.list_ids().await?;
        let mut result = JobResult::default();
        result
            .data
            .insert("credentials".to_string(), serde_json::json!(ids));
        Ok(result)
    }

    async fn run_commands(&self, job: &Job) -> Result<JobResult, ExecError> {
        let payload = &job.payload;
        self.abort_checkpoint(job).await?;

        // Phase 1: cache partition. Lookup happens before any lease work so
        // an all-hit request never touches the gate.
        let mut lookups = Vec::with_capacity(payload.commands.len());
        for command in &payload.commands {
            let entry = if payload.use_cache && !payload.cache_refresh {
                self.store.cache().get(&payload.host, command).await?
            } else {
                None
            };
            lookups.push(entry);
        }
        let plans = plan_cache(payload.use_cache, payload.cache_refresh, lookups);

        let misses: Vec<&String> = payload
            .commands
            .iter()
            .zip(&plans)
            .filter(|(_, plan)| matches!(plan, CommandPlan::Execute(_)))
            .map(|(command, _)| command)
            .collect();

        let now = Utc::now();
        let mut result = JobResult::default();

        if misses.is_empty() {
            info!(job_id = %job.job_id, "all commands served from cache");
            for (command, plan) in payload.commands.iter().zip(&plans) {
                if let CommandPlan::Hit(entry) = plan {
                    result.data.insert(
                        command.clone(),
                        serde_json::Value::String(entry.raw_output.clone()),
                    );
                    result
                        .meta
                        .cache
                        .insert(command.clone(), CacheMeta::hit(entry, now));
                }
            }
            return Ok(result);
        }

        self.abort_checkpoint(job).await?;

        // Phase 2: credential, lease, session.
        let credential = self.resolve_credential(&payload.credential).await?;
        let device_key = format!("{}:{}", payload.host, payload.port);
        let lease_ttl = Duration::from_secs(
            self.settings.worker.lease_ttl_s.max(payload.timeout_s),
        );
        let lease = self
            .store
            .leases()
            .acquire(
                &device_key,
                &job.job_id,
                lease_ttl,
                Duration::from_secs(payload.max_queue_wait_s),
            )
            .await?
            .map_err(|gating| {
                ExecError::new(ErrorKind::GatingError, RetryHint::Transient, gating.to_string())
            })?;

        metrics::ACTIVE_LEASES.with_label_values(&[&payload.host]).inc();
        let lease_lost = Arc::new(AtomicBool::new(false));
        let keeper = self.spawn_lease_keeper(job.job_id.clone(), lease.clone(), lease_lost.clone());

        let run = self
            .run_in_session(job, &credential, &plans, lease_lost.clone())
            .await;

        // Every exit path releases the lease and stops the keeper.
        keeper.abort();
        if let Err(e) = self.store.leases().release(&lease).await {
            warn!(device = %device_key, "lease release failed: {}", e);
        }
        metrics::ACTIVE_LEASES.with_label_values(&[&payload.host]).dec();

        let mut executed = run?;

        // Phase 3: merge hits and fresh output in declared order.
        for (command, plan) in payload.commands.iter().zip(&plans) {
            match plan {
                CommandPlan::Hit(entry) => {
                    result.data.insert(
                        command.clone(),
                        serde_json::Value::String(entry.raw_output.clone()),
                    );
                    result
                        .meta
                        .cache
                        .insert(command.clone(), CacheMeta::hit(entry, now));
                }
                CommandPlan::Execute(status) => {
                    let output = executed.remove(command.as_str()).unwrap_or_default();
                    result
                        .data
                        .insert(command.clone(), serde_json::Value::String(output));
                    result
                        .meta
                        .cache
                        .insert(command.clone(), CacheMeta::of(*status));
                }
            }
        }
        Ok(result)
    }

    /// Executes every planned miss inside one transport session.
    async fn run_in_session(
        &self,
        job: &Job,
        credential: &Credential,
        plans: &[CommandPlan],
        lease_lost: Arc<AtomicBool>,
    ) -> Result<std::collections::HashMap<String, String>, ExecError> {
        let payload = &job.payload;
        let spec = SessionSpec {
            host: payload.host.clone(),
            port: payload.port,
            driver: payload.adapter_driver.clone(),
            options: payload.adapter_options.clone(),
        };
        let adapter = build_adapter(payload.adapter);
        let mut session = adapter.open(&spec, credential).await?;

        let command_timeout = Duration::from_secs(payload.timeout_s);
        let mut executed = std::collections::HashMap::new();
        let mut failure: Option<ExecError> = None;

        for (command, plan) in payload.commands.iter().zip(plans) {
            let CommandPlan::Execute(status) = plan else {
                continue;
            };
            if lease_lost.load(Ordering::Relaxed) {
                failure = Some(ExecError::new(
                    ErrorKind::GatingError,
                    RetryHint::Transient,
                    format!("device lease for {} lost during execution", payload.host),
                ));
                break;
            }
            if let Err(e) = self.abort_checkpoint(job).await {
                failure = Some(e);
                break;
            }

            match session.send(command, command_timeout).await {
                Ok(output) => {
                    metrics::COMMANDS_EXECUTED_TOTAL
                        .with_label_values(&[&payload.adapter.to_string(), "ok"])
                        .inc();
                    // Successful output is cached even if a later command in
                    // the same session fails.
                    if *status != CacheStatus::Bypass {
                        if let Err(e) = self
                            .store
                            .cache()
                            .put(&payload.host, command, &output, payload.cache_ttl)
                            .await
                        {
                            warn!(command = %command, "cache store failed: {}", e);
                        }
                    }
                    executed.insert(command.clone(), output);
                }
                Err(e) => {
                    metrics::COMMANDS_EXECUTED_TOTAL
                        .with_label_values(&[&payload.adapter.to_string(), "error"])
                        .inc();
                    failure = Some(e.into());
                    break;
                }
            }
        }

        session.close().await;
        match failure {
            Some(err) => Err(err),
            None => Ok(executed),
        }
    }

    async fn resolve_credential(
        &self,
        reference: &CredentialRef,
    ) -> Result<Credential, ExecError> {
        match reference {
            CredentialRef::Inline { username, password } => {
                Ok(Credential::new(username.clone(), password.clone()))
            }
            CredentialRef::Stored { credential_id } => {
                Ok(self.credentials.get(credential_id).await?)
            }
        }
    }

    /// Fails the run when a cooperative abort landed on the job.
    async fn abort_checkpoint(&self, job: &Job) -> Result<(), ExecError> {
        let snapshot = self.store.jobs().poll(&job.job_id).await?;
        if matches!(snapshot, Some(j) if j.status == JobStatus::Aborted) {
            debug!(job_id = %job.job_id, "abort observed at checkpoint");
            return Err(ExecError::new(
                ErrorKind::Internal,
                RetryHint::Fatal,
                "job aborted by request",
            ));
        }
        Ok(())
    }

    /// Heartbeats at half the renewal cadence and renews the lease at
    /// half-TTL. A failed renewal raises the lost flag and stops.
    fn spawn_lease_keeper(
        &self,
        job_id: String,
        lease: Lease,
        lease_lost: Arc<AtomicBool>,
    ) -> tokio::task::JoinHandle<()> {
        let store = self.store.clone();
        tokio::spawn(async move {
            let tick = lease.renew_interval() / 2;
            let mut ticks = 0u64;
            let mut interval = tokio::time::interval(tick);
            interval.tick().await; // first tick is immediate
            loop {
                interval.tick().await;
                ticks += 1;
                if let Err(e) = store.jobs().heartbeat(&job_id).await {
                    warn!(job_id = %job_id, "heartbeat failed: {}", e);
                }
                if ticks % 2 == 0 {
                    match store.leases().renew(&lease).await {
                        Ok(true) => {}
                        Ok(false) => {
                            warn!(device = %lease.device_key, "lease lost at renewal");
                            lease_lost.store(true, Ordering::Relaxed);
                            break;
                        }
                        Err(e) => {
                            warn!(device = %lease.device_key, "lease renewal errored: {}", e);
                        }
                    }
                }
            }
        })
    }

    async fn record_failure(&self, job: &Job, exec_err: &ExecError) {
        let record = FailureRecord {
            job_id: job.job_id.clone(),
            worker_id: self.worker_id.clone(),
            device: job.payload.host.clone(),
            command: job.payload.commands.join("; "),
            error_kind: exec_err.error.kind.label().to_string(),
            message: exec_err.error.message.clone(),
            timestamp: Utc::now().timestamp(),
        };
        if let Err(e) = self.store.ops().record_failure(&record).await {
            warn!("failed to record failure stream entry: {}", e);
        }
    }

    async fn record_device_result(&self, job: &Job, success: bool) {
        if job.kind != JobKind::SendCommands || job.payload.host.is_empty() {
            return;
        }
        if let Err(e) = self
            .store
            .ops()
            .record_device_result(&job.payload.host, success)
            .await
        {
            warn!("failed to record device stats: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(output: &str) -> CacheEntry {
        CacheEntry {
            raw_output: output.to_string(),
            cached_at: Utc::now(),
            ttl_s: 300,
        }
    }

    #[test]
    fn cache_disabled_bypasses_everything() {
        let plans = plan_cache(false, false, vec![Some(entry("a")), None]);
        assert!(matches!(plans[0], CommandPlan::Execute(CacheStatus::Bypass)));
        assert!(matches!(plans[1], CommandPlan::Execute(CacheStatus::Bypass)));
    }

    #[test]
    fn refresh_skips_lookup_but_executes() {
        let plans = plan_cache(true, true, vec![None, None]);
        assert!(matches!(plans[0], CommandPlan::Execute(CacheStatus::Refresh)));
    }

    #[test]
    fn partial_hits_split_the_command_list() {
        // a cached, b not, c cached: exactly one command executes.
        let plans = plan_cache(true, false, vec![Some(entry("a")), None, Some(entry("c"))]);
        assert!(matches!(plans[0], CommandPlan::Hit(_)));
        assert!(matches!(plans[1], CommandPlan::Execute(CacheStatus::Miss)));
        assert!(matches!(plans[2], CommandPlan::Hit(_)));

        let to_execute = plans
            .iter()
            .filter(|p| matches!(p, CommandPlan::Execute(_)))
            .count();
        assert_eq!(to_execute, 1);
    }

    #[test]
    fn credential_not_found_is_fatal() {
        let err: ExecError = CredentialError::NotFound("lab".into()).into();
        assert_eq!(err.hint, RetryHint::Fatal);
        assert_eq!(err.error.kind, ErrorKind::AuthFailure);
    }

    #[test]
    fn adapter_errors_carry_their_classification() {
        let err: ExecError = AdapterError::Timeout("read".into()).into();
        assert_eq!(err.hint, RetryHint::Transient);
        assert_eq!(err.error.kind, ErrorKind::TimeoutError);

        let err: ExecError = AdapterError::Auth("denied".into()).into();
        assert_eq!(err.hint, RetryHint::Fatal);
    }
}
