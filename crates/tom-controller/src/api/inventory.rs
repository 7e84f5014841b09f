/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Inventory inspection endpoints.
//!
//! - `GET /api/inventory/:name` - one resolved descriptor
//! - `GET /api/inventory/export` - filtered descriptor list
//! - `GET /api/inventory/export/raw` - plugin-native records
//! - `GET /api/inventory/fields` - fields usable in inline filters
//! - `GET /api/inventory/filters` - predefined named filters
//!
//! Inline filters arrive as query parameters (`?adapter_driver=^cisco`);
//! every pair is a field to case-insensitive regex mapping, combined with
//! AND. A `filter=<name>` parameter selects a named filter instead and
//! overrides any inline pairs. The configured `controller.inventory_filter`
//! is ANDed on top of whichever request-level source applies.

use crate::error::ApiError;
use crate::inventory::InventoryFilter;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use std::collections::BTreeMap;
use tom_models::DeviceDescriptor;
use tracing::debug;

/// Creates and returns a router for inventory endpoints.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/inventory/export", get(export_devices))
        .route("/inventory/export/raw", get(export_raw))
        .route("/inventory/fields", get(filterable_fields))
        .route("/inventory/filters", get(named_filters))
        .route("/inventory/:name", get(get_device))
}

/// Resolves the query string into a compiled filter. The reserved `filter`
/// key names a predefined filter and wins over inline pairs; the configured
/// process-wide filter is ANDed in either way.
fn filter_from_query(
    state: &AppState,
    mut params: BTreeMap<String, String>,
) -> Result<InventoryFilter, ApiError> {
    let configured = InventoryFilter::compile(&state.settings.controller.inventory_filter)
        .map_err(ApiError::from_inventory)?;

    let requested = if let Some(name) = params.remove("filter") {
        let fields = state
            .inventory
            .resolve_named_filter(&name)
            .ok_or_else(|| ApiError::not_found(format!("named filter '{}' not found", name)))?;
        debug!(filter = %name, "using named filter");
        InventoryFilter::compile(&fields).map_err(ApiError::from_inventory)?
    } else {
        InventoryFilter::compile(&params).map_err(ApiError::from_inventory)?
    };

    Ok(configured.and(requested))
}

async fn get_device(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<DeviceDescriptor>, ApiError> {
    let descriptor = state
        .inventory
        .get_device(&name)
        .await
        .map_err(ApiError::from_inventory)?;
    Ok(Json(descriptor))
}

async fn export_devices(
    State(state): State<AppState>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Result<Json<Vec<DeviceDescriptor>>, ApiError> {
    let filter = filter_from_query(&state, params)?;
    let devices = state
        .inventory
        .list_devices(&filter)
        .await
        .map_err(ApiError::from_inventory)?;
    Ok(Json(devices))
}

async fn export_raw(
    State(state): State<AppState>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Result<Json<Vec<serde_json::Value>>, ApiError> {
    let filter = filter_from_query(&state, params)?;
    let records = state
        .inventory
        .list_raw(&filter)
        .await
        .map_err(ApiError::from_inventory)?;
    Ok(Json(records))
}

async fn filterable_fields(
    State(state): State<AppState>,
) -> Json<BTreeMap<String, String>> {
    Json(state.inventory.filterable_fields())
}

async fn named_filters(State(state): State<AppState>) -> Json<BTreeMap<String, String>> {
    Json(state.inventory.named_filters())
}
