/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Credential enumeration.
//!
//! - `GET /api/credentials` - list credential ids (names only)
//!
//! The controller has no credential-plugin access of its own; the listing is
//! routed through the queue as a control job so the answer always comes from
//! whatever plugin the workers actually run with. Secret values never leave
//! the worker.

use crate::api::JobResponse;
use crate::error::ApiError;
use crate::metrics;
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use std::time::Duration;
use tom_models::{
    AdapterKind, CredentialRef, ErrorKind, Job, JobKind, JobMetadata, JobPayload, JobStatus,
};
use tracing::info;

/// Creates and returns a router for credential endpoints.
pub fn routes() -> Router<AppState> {
    Router::new().route("/credentials", get(list_credentials))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_timeout() -> u64 {
    30
}

/// Control-job payload: the command fields are unused by this job kind.
fn control_payload() -> JobPayload {
    JobPayload {
        host: String::new(),
        port: 0,
        adapter: AdapterKind::Ssh2,
        adapter_driver: String::new(),
        commands: Vec::new(),
        credential: CredentialRef::Stored {
            credential_id: String::new(),
        },
        adapter_options: Default::default(),
        retries_remaining: 0,
        max_queue_wait_s: 0,
        timeout_s: default_timeout(),
        use_cache: false,
        cache_ttl: None,
        cache_refresh: false,
    }
}

async fn list_credentials(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<JobResponse>, ApiError> {
    info!("listing credential ids via worker");

    let job = Job::new(
        JobKind::ListCredentials,
        control_payload(),
        JobMetadata::default(),
    );
    let job = state.store.jobs().enqueue(job).await?;
    metrics::JOBS_ENQUEUED_TOTAL
        .with_label_values(&["list_credentials", "-"])
        .inc();

    let snapshot = state
        .store
        .jobs()
        .wait(&job.job_id, Duration::from_secs(query.timeout))
        .await?
        .unwrap_or(job);

    match snapshot.status {
        JobStatus::Complete => Ok(Json(JobResponse::from_job(&snapshot))),
        JobStatus::Failed => {
            let detail = snapshot
                .error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| "credential listing failed".to_string());
            Err(ApiError::internal(format!(
                "failed to list credentials: {}",
                detail
            )))
        }
        _ => Err(ApiError::new(
            ErrorKind::TimeoutError,
            format!("credential listing timed out after {}s", query.timeout),
        )),
    }
}
