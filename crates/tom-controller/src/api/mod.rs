/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! API surface of the Tom controller.
//!
//! Everything under `/api` passes through the authentication middleware;
//! `/metrics` lives outside the prefix and is intentionally unauthenticated
//! so a scraper needs no credentials. Handlers return either a
//! [`JobResponse`] JSON envelope or, in raw-output mode, plain text.

pub mod cache;
pub mod credentials;
pub mod device;
pub mod inventory;
pub mod jobs;
pub mod monitoring;
pub mod raw;
pub mod templates;

use crate::auth::{auth_middleware, AuthContext};
use crate::metrics;
use crate::state::AppState;
use axum::extract::{Extension, MatchedPath, Request};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tom_models::{Job, JobError, JobMetadata, JobResult, JobStatus};

/// The envelope returned for job-producing endpoints and job polls.
#[derive(Debug, Clone, Serialize)]
pub struct JobResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JobMetadata>,
    /// Structured output, present when parsing was requested and succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed: Option<serde_json::Value>,
}

impl JobResponse {
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.job_id.clone(),
            status: job.status,
            attempts: job.attempts,
            result: job.result.clone(),
            error: job.error.clone(),
            metadata: Some(job.metadata.clone()),
            parsed: None,
        }
    }

    pub fn with_parsed(mut self, parsed: serde_json::Value) -> Self {
        self.parsed = Some(parsed);
        self
    }
}

/// Records request count and latency for every matched route.
async fn track_metrics(request: Request, next: Next) -> Response {
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let method = request.method().as_str().to_string();

    let timer = metrics::HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[&path, &method])
        .start_timer();
    let response = next.run(request).await;
    timer.observe_duration();

    metrics::HTTP_REQUESTS_TOTAL
        .with_label_values(&[&path, &method, response.status().as_str()])
        .inc();
    response
}

/// Authentication details for the calling principal, custom claims included.
async fn debug_auth(Extension(ctx): Extension<AuthContext>) -> Json<serde_json::Value> {
    let (all_claims, custom_claims) = match &ctx.claims {
        Some(claims) => (
            serde_json::to_value(claims).unwrap_or_default(),
            serde_json::Value::Object(claims.custom_claims()),
        ),
        None => (serde_json::Value::Null, serde_json::Value::Null),
    };
    Json(serde_json::json!({
        "method": ctx.method,
        "user": ctx.user,
        "provider": ctx.provider,
        "all_claims": all_claims,
        "custom_claims": custom_claims,
    }))
}

async fn export_metrics() -> Response {
    metrics::encode_metrics().into_response()
}

/// Builds the full application router.
pub fn configure_routes(state: AppState) -> Router {
    let api = Router::new()
        .route("/auth/debug", get(debug_auth))
        .merge(device::routes())
        .merge(raw::routes())
        .merge(jobs::routes())
        .merge(inventory::routes())
        .merge(templates::routes())
        .merge(credentials::routes())
        .merge(cache::routes())
        .merge(monitoring::routes())
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest("/api", api)
        .route("/metrics", get(export_metrics))
        .layer(middleware::from_fn(track_metrics))
        .with_state(state)
}
