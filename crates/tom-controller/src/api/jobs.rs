/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Job snapshot and control endpoints.
//!
//! - `GET /api/job/:id` - snapshot, optionally parsing stored output
//! - `DELETE /api/job/:id` - cooperative abort
//!
//! Parsing on retrieval is what makes asynchronous parse workflows possible:
//! the raw output and the device platform both live on the job, so a
//! completed job can be re-parsed with different templates at any time
//! without touching the device again.

use crate::api::JobResponse;
use crate::error::ApiError;
use crate::parsing::{self, ParseRequest, ParserKind};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use std::str::FromStr;
use tom_models::JobStatus;
use tracing::{info, warn};

/// Creates and returns a router for job endpoints.
pub fn routes() -> Router<AppState> {
    Router::new().route("/job/:id", get(get_job).delete(abort_job))
}

#[derive(Debug, Deserialize)]
pub struct JobQuery {
    #[serde(default)]
    pub parse: bool,
    #[serde(default)]
    pub parser: Option<String>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub include_raw: bool,
}

async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<JobQuery>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state
        .store
        .jobs()
        .poll(&job_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("job {} not found", job_id)))?;
    info!(job_id = %job_id, status = job.status.label(), "job status check");

    let mut response = JobResponse::from_job(&job);

    if query.parse {
        if job.status != JobStatus::Complete {
            // Nothing to parse yet; the raw envelope still goes back.
            warn!(job_id = %job_id, status = job.status.label(), "parse requested on a job without results");
            return Ok(Json(response));
        }

        let parser_name = query
            .parser
            .clone()
            .or_else(|| job.metadata.parser.clone())
            .unwrap_or_else(|| "textfsm".to_string());
        let parser = ParserKind::from_str(&parser_name).map_err(ApiError::from_parse)?;
        let platform = job.metadata.device_type.clone();

        let mut parsed = serde_json::Map::new();
        if let Some(result) = &job.result {
            for (command, value) in &result.data {
                let Some(raw) = value.as_str() else {
                    parsed.insert(command.clone(), value.clone());
                    continue;
                };
                let outcome = parsing::parse_output(
                    &state.settings,
                    parser,
                    &ParseRequest {
                        raw_output: raw,
                        platform: platform.as_deref(),
                        command: Some(command),
                        template: query.template.as_deref(),
                        inline_template: None,
                        include_raw: query.include_raw,
                    },
                )
                .map_err(ApiError::from_parse)?;
                parsed.insert(
                    command.clone(),
                    serde_json::to_value(&outcome).unwrap_or_default(),
                );
            }
        }
        response = response.with_parsed(serde_json::Value::Object(parsed));
    }

    Ok(Json(response))
}

async fn abort_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state.store.jobs().abort(&job_id).await?;
    info!(job_id = %job_id, "abort requested");
    Ok(Json(JobResponse::from_job(&job)))
}
