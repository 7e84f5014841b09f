/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Inventory-bypassing execution endpoints.
//!
//! - `POST /api/raw/send_ssh2` - execute over the blocking transport family
//! - `POST /api/raw/send_russh` - execute over the async transport family
//!
//! The caller supplies host, driver and credentials inline instead of an
//! inventory name. Everything downstream (queue, gate, cache) behaves
//! exactly as for inventory-resolved jobs.

use crate::api::device::{
    build_credential, execute_device_job, validate_commands, ExecOptions,
};
use crate::api::JobResponse;
use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use std::collections::BTreeMap;
use tom_models::{AdapterKind, DeviceDescriptor, JobMetadata};
use tracing::info;

/// Creates and returns a router for raw execution endpoints.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/raw/send_ssh2", post(send_ssh2))
        .route("/raw/send_russh", post(send_russh))
}

fn default_port() -> u16 {
    22
}

fn default_timeout() -> u64 {
    10
}

fn default_retries() -> u32 {
    3
}

fn default_max_queue_wait() -> u64 {
    300
}

/// Request body for the raw endpoints.
#[derive(Debug, Deserialize)]
pub struct RawSendRequest {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Vendor/OS driver key, e.g. "cisco_ios".
    pub driver: String,
    pub commands: Vec<String>,
    #[serde(default)]
    pub credential_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub adapter_options: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub wait: bool,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub use_cache: bool,
    #[serde(default)]
    pub cache_ttl: Option<u64>,
    #[serde(default)]
    pub cache_refresh: bool,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_max_queue_wait")]
    pub max_queue_wait: u64,
}

async fn send_ssh2(
    State(state): State<AppState>,
    Json(body): Json<RawSendRequest>,
) -> Result<Json<JobResponse>, ApiError> {
    send_raw(state, AdapterKind::Ssh2, body).await
}

async fn send_russh(
    State(state): State<AppState>,
    Json(body): Json<RawSendRequest>,
) -> Result<Json<JobResponse>, ApiError> {
    send_raw(state, AdapterKind::Russh, body).await
}

async fn send_raw(
    state: AppState,
    adapter: AdapterKind,
    body: RawSendRequest,
) -> Result<Json<JobResponse>, ApiError> {
    info!(host = %body.host, adapter = %adapter, "raw command request");

    if body.host.trim().is_empty() {
        return Err(ApiError::validation("host must not be empty"));
    }
    validate_commands(&body.commands)?;

    let descriptor = DeviceDescriptor {
        host: body.host.clone(),
        port: body.port,
        adapter,
        adapter_driver: body.driver.clone(),
        credential_id: body.credential_id.clone().unwrap_or_default(),
        adapter_options: body.adapter_options.clone(),
    };

    if body.credential_id.is_none() && (body.username.is_none() || body.password.is_none()) {
        return Err(ApiError::validation(
            "raw requests need either credential_id or username+password",
        ));
    }
    let credential =
        build_credential(&descriptor, body.username.as_deref(), body.password.as_deref())?;

    let metadata = JobMetadata {
        device_name: None,
        device_type: Some(body.driver.clone()),
        commands: body.commands.clone(),
        ..JobMetadata::default()
    };
    let opts = ExecOptions {
        wait: body.wait,
        timeout: body.timeout,
        use_cache: body.use_cache,
        cache_ttl: body.cache_ttl,
        cache_refresh: body.cache_refresh,
        retries: body.retries,
        max_queue_wait: body.max_queue_wait,
    };

    let job = execute_device_job(
        &state,
        &descriptor,
        body.commands.clone(),
        credential,
        metadata,
        &opts,
    )
    .await?;
    Ok(Json(JobResponse::from_job(&job)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults_are_async_and_modest() {
        let body: RawSendRequest = serde_json::from_value(serde_json::json!({
            "host": "10.0.0.1",
            "driver": "cisco_ios",
            "commands": ["show version"],
            "credential_id": "lab"
        }))
        .unwrap();
        assert!(!body.wait);
        assert_eq!(body.port, 22);
        assert_eq!(body.timeout, 10);
        assert_eq!(body.retries, 3);
        assert_eq!(body.max_queue_wait, 300);
    }
}
