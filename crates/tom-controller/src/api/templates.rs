/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Template inspection and test-parse endpoints.
//!
//! - `GET /api/templates/textfsm` / `GET /api/templates/ttp` - listings
//! - `GET /api/templates/match` - which template would be chosen for a
//!   (platform, command) pair, per engine
//! - `POST /api/parse/test` - parse arbitrary text against a template
//!   without touching a device

use crate::error::ApiError;
use crate::parsing::{self, ParseRequest, ParserKind, TemplateListing, TemplateSource};
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Creates and returns a router for template endpoints.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/templates/textfsm", get(list_textfsm))
        .route("/templates/ttp", get(list_ttp))
        .route("/templates/match", get(match_template))
        .route("/parse/test", post(test_parse))
}

async fn list_textfsm(State(state): State<AppState>) -> Json<TemplateListing> {
    Json(parsing::list_templates(&state.settings, ParserKind::Textfsm))
}

async fn list_ttp(State(state): State<AppState>) -> Json<TemplateListing> {
    Json(parsing::list_templates(&state.settings, ParserKind::Ttp))
}

#[derive(Debug, Deserialize)]
pub struct MatchQuery {
    pub command: String,
    #[serde(default)]
    pub device_type: Option<String>,
    /// Inventory device name; when present it wins over `device_type`.
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub parser: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TemplateMatch {
    pub template_name: String,
    pub source: TemplateSource,
    pub parser: &'static str,
}

#[derive(Debug, Serialize)]
pub struct TemplateMatchResponse {
    pub device_type: String,
    pub command: String,
    pub matches: Vec<TemplateMatch>,
}

async fn match_template(
    State(state): State<AppState>,
    Query(query): Query<MatchQuery>,
) -> Result<Json<TemplateMatchResponse>, ApiError> {
    let device_type = match &query.device {
        Some(device) => {
            let descriptor = state
                .inventory
                .get_device(device)
                .await
                .map_err(ApiError::from_inventory)?;
            descriptor.adapter_driver
        }
        None => query.device_type.clone().ok_or_else(|| {
            ApiError::validation("either 'device_type' or 'device' is required")
        })?,
    };

    let engines: Vec<ParserKind> = match &query.parser {
        Some(name) => vec![ParserKind::from_str(name).map_err(ApiError::from_parse)?],
        None => vec![ParserKind::Textfsm, ParserKind::Ttp],
    };

    let mut matches = Vec::new();
    for engine in engines {
        if let Some((name, source)) =
            parsing::find_template(&state.settings, engine, &device_type, &query.command)
        {
            matches.push(TemplateMatch {
                template_name: name,
                source,
                parser: engine.name(),
            });
        }
    }

    Ok(Json(TemplateMatchResponse {
        device_type,
        command: query.command,
        matches,
    }))
}

#[derive(Debug, Deserialize)]
pub struct TestParseRequest {
    pub raw_output: String,
    #[serde(default = "default_parser")]
    pub parser: String,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub template_text: Option<String>,
    #[serde(default)]
    pub device_type: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub include_raw: bool,
}

fn default_parser() -> String {
    "textfsm".to_string()
}

async fn test_parse(
    State(state): State<AppState>,
    Json(body): Json<TestParseRequest>,
) -> Result<Json<parsing::ParseOutcome>, ApiError> {
    let parser = ParserKind::from_str(&body.parser).map_err(ApiError::from_parse)?;
    let outcome = parsing::parse_output(
        &state.settings,
        parser,
        &ParseRequest {
            raw_output: &body.raw_output,
            platform: body.device_type.as_deref(),
            command: body.command.as_deref(),
            template: body.template.as_deref(),
            inline_template: body.template_text.as_deref(),
            include_raw: body.include_raw,
        },
    )
    .map_err(ApiError::from_parse)?;
    Ok(Json(outcome))
}
