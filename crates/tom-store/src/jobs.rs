/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Job lifecycle and queue coordination.
//!
//! ## Durability
//!
//! `enqueue` writes the job envelope before pushing the id onto the queue, so
//! a controller crash between the two operations leaves a pollable (if never
//! executed) job rather than a queued id with no envelope.
//!
//! ## Stalled Job Detection
//!
//! Executing workers refresh `tom:job:heartbeat:<id>` with a TTL equal to the
//! worker liveness window. The supervisor sweep walks the ACTIVE set and
//! requeues any job whose heartbeat key has expired, decrementing its retry
//! budget; a job with no budget left fails terminally instead.

use crate::{keys, Result, Store, StoreError};
use chrono::Utc;
use redis::AsyncCommands;
use std::time::Duration;
use tom_models::{ErrorKind, Job, JobError, JobResult, JobStatus, RetryHint};
use tracing::{debug, error, info, warn};

/// Backoff applied before a transiently-failed job is pushed back onto the
/// queue. Grows with the attempt count so a flapping device does not spin.
pub fn requeue_backoff(attempts: u32) -> Duration {
    let ms = 500u64.saturating_mul(1 << attempts.min(4));
    Duration::from_millis(ms.min(5_000))
}

/// Polling backoff for `wait`: 50 ms doubling to a 1 s ceiling.
pub fn wait_backoff(iteration: u32) -> Duration {
    let ms = 50u64.saturating_mul(1 << iteration.min(10));
    Duration::from_millis(ms.min(1_000))
}

/// What `fail` decided to do with a job.
#[derive(Debug, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Transient failure with budget left: back onto the queue.
    Requeued { retries_remaining: u32 },
    /// Fatal failure or spent budget: terminal FAILED.
    Failed,
}

/// Pure retry decision, factored out of `fail` so the accounting is testable
/// without a running Redis.
pub fn failure_outcome(retries_remaining: u32, hint: RetryHint) -> FailureOutcome {
    match hint {
        RetryHint::Fatal => FailureOutcome::Failed,
        RetryHint::Transient if retries_remaining == 0 => FailureOutcome::Failed,
        RetryHint::Transient => FailureOutcome::Requeued {
            retries_remaining: retries_remaining - 1,
        },
    }
}

/// Job lifecycle operations over the shared store.
pub struct JobsStore<'a> {
    pub(crate) store: &'a Store,
}

impl JobsStore<'_> {
    /// Persists a NEW job and makes it visible to workers.
    ///
    /// The envelope write happens before the queue push; see the module notes
    /// on durability.
    pub async fn enqueue(&self, mut job: Job) -> Result<Job> {
        if !job.status.can_transition_to(JobStatus::Queued) {
            return Err(StoreError::IllegalTransition {
                job_id: job.job_id,
                from: job.status.label(),
                to: JobStatus::Queued.label(),
            });
        }
        job.status = JobStatus::Queued;

        let mut conn = self.store.conn.clone();
        let envelope = serde_json::to_string(&job)?;
        conn.set::<_, _, ()>(keys::job(&job.job_id), envelope).await?;
        conn.lpush::<_, _, ()>(keys::QUEUE, &job.job_id).await?;
        debug!(job_id = %job.job_id, "job enqueued");
        Ok(job)
    }

    /// Blocking pull from the queue.
    ///
    /// Returns `None` when the timeout elapses without work, or when the
    /// popped id turned out to be stale (envelope gone or job aborted while
    /// queued) — callers simply loop.
    pub async fn fetch(&self, consumer_id: &str, timeout: Duration) -> Result<Option<Job>> {
        let mut conn = self.store.conn.clone();
        let popped: Option<(String, String)> =
            conn.brpop(keys::QUEUE, timeout.as_secs_f64()).await?;
        let Some((_, job_id)) = popped else {
            return Ok(None);
        };

        let Some(mut job) = self.poll(&job_id).await? else {
            warn!(job_id = %job_id, "queued id without envelope, dropping");
            return Ok(None);
        };

        if job.status != JobStatus::Queued {
            // Aborted (or otherwise finished) while waiting in the queue.
            debug!(job_id = %job_id, status = job.status.label(), "skipping non-queued job");
            return Ok(None);
        }

        job.status = JobStatus::Active;
        job.attempts += 1;
        job.consumer_id = Some(consumer_id.to_string());
        job.acquired_at = Some(Utc::now());
        self.save(&job).await?;
        conn.sadd::<_, _, ()>(keys::ACTIVE_SET, &job.job_id).await?;
        self.heartbeat(&job.job_id).await?;
        Ok(Some(job))
    }

    /// ACTIVE → COMPLETE. A second call on a terminal job is a no-op.
    pub async fn complete(&self, job_id: &str, result: JobResult) -> Result<Job> {
        let mut job = self.load(job_id).await?;
        if job.status.is_terminal() {
            return Ok(job);
        }
        if !job.status.can_transition_to(JobStatus::Complete) {
            return Err(StoreError::IllegalTransition {
                job_id: job.job_id,
                from: job.status.label(),
                to: JobStatus::Complete.label(),
            });
        }
        job.status = JobStatus::Complete;
        job.result = Some(result);
        job.error = None;
        self.save(&job).await?;
        self.clear_active(&job.job_id).await?;
        info!(job_id = %job.job_id, attempts = job.attempts, "job complete");
        Ok(job)
    }

    /// Records a failure, requeuing transient failures while budget remains.
    pub async fn fail(&self, job_id: &str, err: JobError, hint: RetryHint) -> Result<Job> {
        let mut job = self.load(job_id).await?;
        if job.status.is_terminal() {
            return Ok(job);
        }

        match failure_outcome(job.payload.retries_remaining, hint) {
            FailureOutcome::Failed => {
                job.status = JobStatus::Failed;
                job.error = Some(err.clone());
                self.save(&job).await?;
                self.clear_active(&job.job_id).await?;
                warn!(job_id = %job.job_id, kind = %err.kind, "job failed terminally: {}", err.message);
            }
            FailureOutcome::Requeued { retries_remaining } => {
                job.payload.retries_remaining = retries_remaining;
                job.status = JobStatus::Queued;
                job.consumer_id = None;
                job.acquired_at = None;
                self.save(&job).await?;
                self.clear_active(&job.job_id).await?;
                info!(
                    job_id = %job.job_id,
                    retries_remaining,
                    "transient failure, requeuing: {}", err.message
                );
                self.requeue_after(&job.job_id, requeue_backoff(job.attempts));
            }
        }
        Ok(job)
    }

    /// Signals cooperative cancellation. The executing worker honors the new
    /// status at its next checkpoint.
    pub async fn abort(&self, job_id: &str) -> Result<Job> {
        let mut job = self.load(job_id).await?;
        if job.status == JobStatus::Aborted || job.status == JobStatus::Complete {
            return Ok(job);
        }
        if !job.status.can_transition_to(JobStatus::Aborted) {
            return Err(StoreError::IllegalTransition {
                job_id: job.job_id,
                from: job.status.label(),
                to: JobStatus::Aborted.label(),
            });
        }
        job.status = JobStatus::Aborted;
        self.save(&job).await?;
        self.clear_active(&job.job_id).await?;
        info!(job_id = %job.job_id, "job aborted");
        Ok(job)
    }

    /// Idempotent snapshot read.
    pub async fn poll(&self, job_id: &str) -> Result<Option<Job>> {
        let mut conn = self.store.conn.clone();
        let envelope: Option<String> = conn.get(keys::job(job_id)).await?;
        match envelope {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Read-through polling with exponential backoff until the job reaches a
    /// terminal state or the deadline expires. Deadline expiry returns the
    /// last (non-terminal) snapshot; the job itself is untouched.
    pub async fn wait(&self, job_id: &str, deadline: Duration) -> Result<Option<Job>> {
        let started = tokio::time::Instant::now();
        let mut iteration = 0u32;
        loop {
            let snapshot = self.poll(job_id).await?;
            match &snapshot {
                Some(job) if job.status.is_terminal() => return Ok(snapshot),
                None => return Ok(None),
                Some(_) => {}
            }
            let backoff = wait_backoff(iteration);
            iteration += 1;
            if started.elapsed() + backoff >= deadline {
                return Ok(snapshot);
            }
            tokio::time::sleep(backoff).await;
        }
    }

    /// Publishes a liveness tick for an ACTIVE job. The key's TTL is the
    /// worker liveness window; an expired key marks the job as stalled.
    pub async fn heartbeat(&self, job_id: &str) -> Result<()> {
        let mut conn = self.store.conn.clone();
        conn.set_ex::<_, _, ()>(
            keys::job_heartbeat(job_id),
            Utc::now().timestamp(),
            self.store.settings.worker.worker_liveness_s,
        )
        .await?;
        Ok(())
    }

    /// Supervisor sweep: requeue ACTIVE jobs whose heartbeat has expired.
    /// Returns the number of jobs rescued or failed.
    pub async fn sweep_stalled(&self) -> Result<usize> {
        let mut conn = self.store.conn.clone();
        let active: Vec<String> = conn.smembers(keys::ACTIVE_SET).await?;
        let mut swept = 0usize;

        for job_id in active {
            let alive: bool = conn.exists(keys::job_heartbeat(&job_id)).await?;
            if alive {
                continue;
            }
            let Some(job) = self.poll(&job_id).await? else {
                conn.srem::<_, _, ()>(keys::ACTIVE_SET, &job_id).await?;
                continue;
            };
            if job.status != JobStatus::Active {
                conn.srem::<_, _, ()>(keys::ACTIVE_SET, &job_id).await?;
                continue;
            }
            warn!(job_id = %job_id, "worker heartbeat expired, reclaiming job");
            let err = JobError::new(
                ErrorKind::TimeoutError,
                "worker heartbeat expired before the job finished",
            );
            self.fail(&job_id, err, RetryHint::Transient).await?;
            swept += 1;
        }
        Ok(swept)
    }

    async fn load(&self, job_id: &str) -> Result<Job> {
        self.poll(job_id)
            .await?
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))
    }

    async fn save(&self, job: &Job) -> Result<()> {
        let mut conn = self.store.conn.clone();
        let envelope = serde_json::to_string(job)?;
        conn.set::<_, _, ()>(keys::job(&job.job_id), envelope).await?;
        Ok(())
    }

    async fn clear_active(&self, job_id: &str) -> Result<()> {
        let mut conn = self.store.conn.clone();
        conn.srem::<_, _, ()>(keys::ACTIVE_SET, job_id).await?;
        conn.del::<_, ()>(keys::job_heartbeat(job_id)).await?;
        Ok(())
    }

    /// Pushes the id back onto the queue after the given backoff, without
    /// holding up the caller.
    fn requeue_after(&self, job_id: &str, backoff: Duration) {
        let mut conn = self.store.conn.clone();
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            if let Err(e) = conn.lpush::<_, _, ()>(keys::QUEUE, &job_id).await {
                error!(job_id = %job_id, "failed to requeue job: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_backoff_doubles_and_caps_at_one_second() {
        let ms: Vec<u64> = (0..7).map(|i| wait_backoff(i).as_millis() as u64).collect();
        assert_eq!(ms, vec![50, 100, 200, 400, 800, 1000, 1000]);
    }

    #[test]
    fn requeue_backoff_grows_and_caps() {
        assert_eq!(requeue_backoff(0), Duration::from_millis(500));
        assert_eq!(requeue_backoff(1), Duration::from_millis(1000));
        assert_eq!(requeue_backoff(4), Duration::from_millis(5000));
        assert_eq!(requeue_backoff(30), Duration::from_millis(5000));
    }

    #[test]
    fn fatal_failures_skip_the_retry_budget() {
        assert_eq!(failure_outcome(5, RetryHint::Fatal), FailureOutcome::Failed);
    }

    #[test]
    fn transient_failure_with_zero_budget_is_terminal() {
        assert_eq!(
            failure_outcome(0, RetryHint::Transient),
            FailureOutcome::Failed
        );
    }

    #[test]
    fn transient_failure_decrements_budget() {
        assert_eq!(
            failure_outcome(3, RetryHint::Transient),
            FailureOutcome::Requeued {
                retries_remaining: 2
            }
        );
    }
}
