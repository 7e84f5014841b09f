/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Monitoring endpoints, backed by the operational telemetry the workers
//! publish into the shared store.
//!
//! - `GET /api/monitoring/workers` - worker fleet health from heartbeats
//! - `GET /api/monitoring/failed_commands` - recent failure stream
//! - `GET /api/monitoring/device_stats` - per-device success/failure counts

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

/// Creates and returns a router for monitoring endpoints.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/monitoring/workers", get(workers))
        .route("/monitoring/failed_commands", get(failed_commands))
        .route("/monitoring/device_stats", get(device_stats))
}

async fn workers(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let workers = state.store.ops().list_workers().await?;
    Ok(Json(serde_json::json!({
        "total": workers.len(),
        "workers": workers,
    })))
}

#[derive(Debug, Deserialize)]
pub struct FailuresQuery {
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

async fn failed_commands(
    State(state): State<AppState>,
    Query(query): Query<FailuresQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let failures = state
        .store
        .ops()
        .recent_failures(
            query.limit,
            query.device.as_deref(),
            query.error_type.as_deref(),
        )
        .await?;
    Ok(Json(serde_json::json!({
        "count": failures.len(),
        "failures": failures,
    })))
}

async fn device_stats(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let stats = state.store.ops().device_stats().await?;
    Ok(Json(serde_json::json!({ "devices": stats })))
}
