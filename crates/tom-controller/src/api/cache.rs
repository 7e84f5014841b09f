/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Cache administration endpoints.
//!
//! - `GET /api/cache` - list keys, optionally for one device
//! - `GET /api/cache/stats` - summary counters
//! - `DELETE /api/cache` - clear everything
//! - `DELETE /api/cache/:device` - invalidate one device
//!
//! There is no implicit invalidation anywhere else; failed commands are
//! simply never cached.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::info;

/// Creates and returns a router for cache endpoints.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/cache", get(list_keys).delete(clear_all))
        .route("/cache/stats", get(stats))
        .route("/cache/:device", delete(invalidate_device))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub device: Option<String>,
}

async fn list_keys(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let keys = state.store.cache().list_keys(query.device.as_deref()).await?;
    Ok(Json(serde_json::json!({
        "device_filter": query.device,
        "count": keys.len(),
        "keys": keys,
    })))
}

async fn stats(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let keys = state.store.cache().list_keys(None).await?;
    let mut per_device: BTreeMap<String, usize> = BTreeMap::new();
    for key in &keys {
        // Keys are "<device>:<fingerprint>" after prefix stripping.
        let device = key.rsplit_once(':').map(|(d, _)| d).unwrap_or(key.as_str());
        *per_device.entry(device.to_string()).or_default() += 1;
    }
    let cache = &state.settings.cache;
    Ok(Json(serde_json::json!({
        "enabled": cache.enabled,
        "total_entries": keys.len(),
        "devices_cached": per_device.len(),
        "entries_per_device": per_device,
        "default_ttl": cache.default_ttl,
        "max_ttl": cache.max_ttl,
        "key_prefix": cache.key_prefix,
    })))
}

async fn invalidate_device(
    State(state): State<AppState>,
    Path(device): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = state.store.cache().invalidate_device(&device).await?;
    info!(device = %device, deleted, "cache invalidated for device");
    Ok(Json(serde_json::json!({
        "device": device,
        "deleted_count": deleted,
    })))
}

async fn clear_all(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = state.store.cache().clear_all().await?;
    info!(deleted, "cache cleared");
    Ok(Json(serde_json::json!({ "deleted_count": deleted })))
}
