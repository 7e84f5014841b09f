/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Handles API routes and logic for inventory-resolved device commands.
//!
//! ## Endpoints
//!
//! - `POST /api/device/:name/send_command` - single command, sync or async
//! - `POST /api/device/:name/send_commands` - multi-command, simple strings
//!   or per-command specs
//!
//! By default both return a [`JobResponse`] envelope. With `wait=true` the
//! controller polls until the job finishes or the request timeout expires;
//! with `raw_output=true` (requires `wait=true`) the envelope is dropped and
//! the body is plain text, multi-command outputs separated by
//! `### <command> ###` delimiter lines.

use crate::api::JobResponse;
use crate::error::ApiError;
use crate::metrics;
use crate::parsing::{self, ParseRequest, ParserKind};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tom_models::{
    CommandSpec, CredentialRef, DeviceDescriptor, ErrorKind, Job, JobKind, JobMetadata,
    JobPayload, JobResult, JobStatus,
};
use tracing::{error, info};

/// Creates and returns a router for device command endpoints.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/device/:name/send_command", post(send_command))
        .route("/device/:name/send_commands", post(send_commands))
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

fn default_parser() -> String {
    "textfsm".to_string()
}

/// Request body for the single-command endpoint.
#[derive(Debug, Deserialize)]
pub struct SendCommandRequest {
    pub command: String,
    #[serde(default)]
    pub wait: bool,
    #[serde(default)]
    pub raw_output: bool,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub use_cache: bool,
    #[serde(default)]
    pub cache_ttl: Option<u64>,
    #[serde(default)]
    pub cache_refresh: bool,
    #[serde(default)]
    pub parse: bool,
    #[serde(default = "default_parser")]
    pub parser: String,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub include_raw: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_max_queue_wait")]
    pub max_queue_wait: u64,
}

/// One command in a multi-command request: either a bare string or a
/// [`CommandSpec`] with per-command parsing controls.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CommandInput {
    Simple(String),
    Spec(CommandSpec),
}

/// Request body for the multi-command endpoint.
#[derive(Debug, Deserialize)]
pub struct SendCommandsRequest {
    pub commands: Vec<CommandInput>,
    #[serde(default)]
    pub wait: bool,
    #[serde(default)]
    pub raw_output: bool,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub use_cache: bool,
    #[serde(default)]
    pub cache_ttl: Option<u64>,
    #[serde(default)]
    pub cache_refresh: bool,
    #[serde(default)]
    pub parse: bool,
    #[serde(default = "default_parser")]
    pub parser: String,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub include_raw: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_max_queue_wait")]
    pub max_queue_wait: u64,
}

/// Normalizes mixed command inputs into full specs. A spec overrides the
/// request-level parse settings wholly: it is taken exactly as written, with
/// nothing backfilled from the request. Bare strings inherit the
/// request-level settings.
pub fn normalize_commands(
    inputs: &[CommandInput],
    parse: bool,
    parser: &str,
    template: Option<&str>,
    include_raw: bool,
) -> Vec<CommandSpec> {
    inputs
        .iter()
        .map(|input| match input {
            CommandInput::Simple(command) => CommandSpec {
                command: command.clone(),
                parse,
                parser: Some(parser.to_string()),
                template: template.map(|t| t.to_string()),
                include_raw,
            },
            CommandInput::Spec(spec) => spec.clone(),
        })
        .collect()
}

/// Validates the command list and inline credential combination shared by
/// both endpoints.
pub fn validate_commands(commands: &[String]) -> Result<(), ApiError> {
    if commands.is_empty() {
        return Err(ApiError::validation("commands list must not be empty"));
    }
    for command in commands {
        if command.trim().is_empty() {
            return Err(ApiError::validation("command text must not be empty"));
        }
        if command.contains('\0') {
            return Err(ApiError::validation("command text contains a NUL byte"));
        }
    }
    Ok(())
}

/// Builds the credential reference: inline when the caller supplied both
/// halves, the device's stored credential otherwise.
pub fn build_credential(
    descriptor: &DeviceDescriptor,
    username: Option<&str>,
    password: Option<&str>,
) -> Result<CredentialRef, ApiError> {
    match (username, password) {
        (Some(username), Some(password)) => Ok(CredentialRef::Inline {
            username: username.to_string(),
            password: password.to_string(),
        }),
        (None, None) => Ok(CredentialRef::Stored {
            credential_id: descriptor.credential_id.clone(),
        }),
        _ => Err(ApiError::validation(
            "username and password must be supplied together",
        )),
    }
}

pub(crate) struct ExecOptions {
    pub wait: bool,
    pub timeout: u64,
    pub use_cache: bool,
    pub cache_ttl: Option<u64>,
    pub cache_refresh: bool,
    pub retries: u32,
    pub max_queue_wait: u64,
}

/// Enqueues a command job and, in sync mode, waits for it. The returned job
/// is the freshest snapshot available.
pub(crate) async fn execute_device_job(
    state: &AppState,
    descriptor: &DeviceDescriptor,
    commands: Vec<String>,
    credential: CredentialRef,
    metadata: JobMetadata,
    opts: &ExecOptions,
) -> Result<Job, ApiError> {
    let payload = JobPayload {
        host: descriptor.host.clone(),
        port: descriptor.port,
        adapter: descriptor.adapter,
        adapter_driver: descriptor.adapter_driver.clone(),
        commands,
        credential,
        adapter_options: descriptor.adapter_options.clone(),
        retries_remaining: opts.retries,
        max_queue_wait_s: opts.max_queue_wait,
        timeout_s: opts.timeout,
        use_cache: opts.use_cache,
        cache_ttl: opts.cache_ttl,
        cache_refresh: opts.cache_refresh,
    };

    let job = Job::new(JobKind::SendCommands, payload, metadata);
    let job = state.store.jobs().enqueue(job).await?;
    metrics::JOBS_ENQUEUED_TOTAL
        .with_label_values(&["send_commands", &descriptor.adapter.to_string()])
        .inc();
    info!(job_id = %job.job_id, host = %descriptor.host, "job enqueued");

    if !opts.wait {
        return Ok(job);
    }

    let deadline = Duration::from_secs(opts.timeout);
    let snapshot = state.store.jobs().wait(&job.job_id, deadline).await?;
    Ok(snapshot.unwrap_or(job))
}

/// Converts a finished (or still-running) sync-mode job into the HTTP
/// timeout contract: a non-terminal job after the deadline is a 504, and the
/// job keeps running for later polls.
fn require_terminal(job: &Job, timeout: u64) -> Result<(), ApiError> {
    if job.status.is_terminal() {
        return Ok(());
    }
    Err(ApiError::new(
        ErrorKind::TimeoutError,
        format!(
            "job {} still {} after {}s; poll /api/job/{} for the result",
            job.job_id,
            job.status.label(),
            timeout,
            job.job_id
        ),
    ))
}

/// Plain-text body for raw-output mode.
pub fn format_raw_output(job: &Job, commands: &[String]) -> String {
    if commands.len() == 1 {
        return job.command_output(&commands[0]).unwrap_or_default().to_string();
    }
    commands
        .iter()
        .map(|command| {
            format!(
                "### {} ###\n{}",
                command,
                job.command_output(command).unwrap_or_default()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn raw_failure_response(job: &Job) -> Response {
    let detail = job
        .error
        .as_ref()
        .map(|e| e.message.clone())
        .unwrap_or_else(|| "command execution failed".to_string());
    let kind = job.error.as_ref().map(|e| e.kind).unwrap_or(ErrorKind::Internal);
    ApiError::new(kind, detail).into_plain_response()
}

async fn send_command(
    State(state): State<AppState>,
    Path(device_name): Path<String>,
    Json(body): Json<SendCommandRequest>,
) -> Result<Response, ApiError> {
    let raw_mode = body.raw_output;
    match send_command_inner(state, device_name, body).await {
        Ok(response) => Ok(response),
        // Raw-output mode drops the JSON envelope even for errors.
        Err(e) if raw_mode => Ok(e.into_plain_response()),
        Err(e) => Err(e),
    }
}

async fn send_command_inner(
    state: AppState,
    device_name: String,
    body: SendCommandRequest,
) -> Result<Response, ApiError> {
    info!(device = %device_name, "device command request");

    if body.raw_output && !body.wait {
        return Err(ApiError::validation("raw_output requires wait=true"));
    }
    validate_commands(std::slice::from_ref(&body.command))?;

    let descriptor = state
        .inventory
        .get_device(&device_name)
        .await
        .map_err(ApiError::from_inventory)?;
    let credential =
        build_credential(&descriptor, body.username.as_deref(), body.password.as_deref())?;

    let metadata = JobMetadata {
        device_name: Some(device_name.clone()),
        device_type: Some(descriptor.adapter_driver.clone()),
        commands: vec![body.command.clone()],
        parse: body.parse,
        parser: Some(body.parser.clone()),
        template: body.template.clone(),
        include_raw: body.include_raw,
        command_specs: Vec::new(),
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
        vec![body.command.clone()],
        credential,
        metadata,
        &opts,
    )
    .await?;

    if !body.wait {
        return Ok(Json(JobResponse::from_job(&job)).into_response());
    }

    if body.raw_output {
        if job.status == JobStatus::Failed {
            return Ok(raw_failure_response(&job));
        }
        require_terminal(&job, body.timeout)?;
        return Ok(format_raw_output(&job, std::slice::from_ref(&body.command)).into_response());
    }

    require_terminal(&job, body.timeout)?;
    let mut response = JobResponse::from_job(&job);

    if body.parse && job.status == JobStatus::Complete {
        let raw = job.command_output(&body.command).unwrap_or_default();
        let parser = ParserKind::from_str(&body.parser).map_err(ApiError::from_parse)?;
        let outcome = parsing::parse_output(
            &state.settings,
            parser,
            &ParseRequest {
                raw_output: raw,
                platform: Some(&descriptor.adapter_driver),
                command: Some(&body.command),
                template: body.template.as_deref(),
                inline_template: None,
                include_raw: body.include_raw,
            },
        )
        .map_err(ApiError::from_parse)?;
        response = response.with_parsed(outcome.parsed);
    }

    Ok(Json(response).into_response())
}

async fn send_commands(
    State(state): State<AppState>,
    Path(device_name): Path<String>,
    Json(body): Json<SendCommandsRequest>,
) -> Result<Response, ApiError> {
    let raw_mode = body.raw_output;
    match send_commands_inner(state, device_name, body).await {
        Ok(response) => Ok(response),
        Err(e) if raw_mode => Ok(e.into_plain_response()),
        Err(e) => Err(e),
    }
}

async fn send_commands_inner(
    state: AppState,
    device_name: String,
    body: SendCommandsRequest,
) -> Result<Response, ApiError> {
    info!(device = %device_name, count = body.commands.len(), "device commands request");

    if body.raw_output && !body.wait {
        return Err(ApiError::validation("raw_output requires wait=true"));
    }

    let specs = normalize_commands(
        &body.commands,
        body.parse,
        &body.parser,
        body.template.as_deref(),
        body.include_raw,
    );
    let commands: Vec<String> = specs.iter().map(|s| s.command.clone()).collect();
    validate_commands(&commands)?;

    let descriptor = state
        .inventory
        .get_device(&device_name)
        .await
        .map_err(ApiError::from_inventory)?;
    let credential =
        build_credential(&descriptor, body.username.as_deref(), body.password.as_deref())?;

    let metadata = JobMetadata {
        device_name: Some(device_name.clone()),
        device_type: Some(descriptor.adapter_driver.clone()),
        commands: commands.clone(),
        parse: body.parse,
        parser: Some(body.parser.clone()),
        template: body.template.clone(),
        include_raw: body.include_raw,
        command_specs: specs.clone(),
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

    let job =
        execute_device_job(&state, &descriptor, commands.clone(), credential, metadata, &opts)
            .await?;

    if !body.wait {
        return Ok(Json(JobResponse::from_job(&job)).into_response());
    }

    if body.raw_output {
        if job.status == JobStatus::Failed {
            return Ok(raw_failure_response(&job));
        }
        require_terminal(&job, body.timeout)?;
        return Ok(format_raw_output(&job, &commands).into_response());
    }

    require_terminal(&job, body.timeout)?;
    let mut response = JobResponse::from_job(&job);

    if job.status == JobStatus::Complete && specs.iter().any(|s| s.parse) {
        let mut parsed = serde_json::Map::new();
        for spec in specs.iter().filter(|s| s.parse) {
            let Some(raw) = job.command_output(&spec.command) else {
                continue;
            };
            let parser_name = spec.parser.as_deref().unwrap_or("textfsm");
            let parser = ParserKind::from_str(parser_name).map_err(ApiError::from_parse)?;
            match parsing::parse_output(
                &state.settings,
                parser,
                &ParseRequest {
                    raw_output: raw,
                    platform: Some(&descriptor.adapter_driver),
                    command: Some(&spec.command),
                    template: spec.template.as_deref(),
                    inline_template: None,
                    include_raw: spec.include_raw,
                },
            ) {
                Ok(outcome) => {
                    parsed.insert(
                        spec.command.clone(),
                        serde_json::to_value(&outcome).unwrap_or_default(),
                    );
                }
                Err(e) => {
                    // One bad template must not hide the other commands.
                    error!(command = %spec.command, "parse failed: {}", e);
                    parsed.insert(
                        spec.command.clone(),
                        serde_json::json!({"error": e.kind().label(), "detail": e.to_string()}),
                    );
                }
            }
        }
        response = response.with_parsed(serde_json::Value::Object(parsed));
    }

    Ok(Json(response).into_response())
}

impl ApiError {
    pub(crate) fn from_inventory(err: crate::inventory::InventoryError) -> Self {
        use crate::inventory::InventoryError;
        match err {
            InventoryError::NotFound(name) => {
                ApiError::not_found(format!("device '{}' not found in inventory", name))
            }
            InventoryError::InvalidFilter(msg) => ApiError::validation(msg),
            other => ApiError::internal(other.to_string()),
        }
    }

    pub(crate) fn from_parse(err: crate::parsing::ParseError) -> Self {
        ApiError::new(err.kind(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> DeviceDescriptor {
        serde_json::from_value(serde_json::json!({
            "host": "10.0.0.1",
            "adapter": "ssh2",
            "adapter_driver": "cisco_ios",
            "credential_id": "lab"
        }))
        .unwrap()
    }

    #[test]
    fn empty_command_lists_are_rejected() {
        assert!(validate_commands(&[]).is_err());
        assert!(validate_commands(&["".to_string()]).is_err());
        assert!(validate_commands(&["show version".to_string()]).is_ok());
    }

    #[test]
    fn nul_bytes_are_rejected() {
        assert!(validate_commands(&["show\0version".to_string()]).is_err());
    }

    #[test]
    fn inline_credentials_need_both_halves() {
        let d = descriptor();
        assert!(build_credential(&d, Some("admin"), None).is_err());
        assert!(build_credential(&d, None, Some("pw")).is_err());

        let stored = build_credential(&d, None, None).unwrap();
        assert!(matches!(stored, CredentialRef::Stored { credential_id } if credential_id == "lab"));

        let inline = build_credential(&d, Some("admin"), Some("pw")).unwrap();
        assert!(matches!(inline, CredentialRef::Inline { .. }));
    }

    #[test]
    fn simple_commands_inherit_request_settings() {
        let inputs = vec![CommandInput::Simple("show version".into())];
        let specs = normalize_commands(&inputs, true, "ttp", Some("tpl.ttp"), true);
        assert_eq!(specs[0].command, "show version");
        assert!(specs[0].parse);
        assert_eq!(specs[0].parser.as_deref(), Some("ttp"));
        assert_eq!(specs[0].template.as_deref(), Some("tpl.ttp"));
        assert!(specs[0].include_raw);
    }

    #[test]
    fn spec_commands_override_request_settings_wholly() {
        let inputs = vec![CommandInput::Spec(CommandSpec {
            command: "show run".into(),
            parse: false,
            parser: None,
            template: None,
            include_raw: false,
        })];
        let specs = normalize_commands(&inputs, true, "ttp", Some("request.textfsm"), true);
        // Nothing from the request level leaks into a per-command spec.
        assert!(!specs[0].parse);
        assert_eq!(specs[0].parser, None);
        assert_eq!(specs[0].template, None);
        assert!(!specs[0].include_raw);
    }

    #[test]
    fn mixed_command_inputs_deserialize() {
        let json = serde_json::json!({
            "commands": [
                "show version",
                {"command": "show run", "parse": false}
            ],
            "wait": true
        });
        let body: SendCommandsRequest = serde_json::from_value(json).unwrap();
        assert_eq!(body.commands.len(), 2);
        assert!(matches!(body.commands[0], CommandInput::Simple(_)));
        assert!(matches!(body.commands[1], CommandInput::Spec(_)));
    }

    #[test]
    fn raw_output_joins_with_delimiters() {
        let mut job = Job::new(
            JobKind::SendCommands,
            JobPayload {
                host: "10.0.0.1".into(),
                port: 22,
                adapter: tom_models::AdapterKind::Ssh2,
                adapter_driver: "cisco_ios".into(),
                commands: vec!["a".into(), "b".into()],
                credential: CredentialRef::Stored {
                    credential_id: "lab".into(),
                },
                adapter_options: Default::default(),
                retries_remaining: 0,
                max_queue_wait_s: 1,
                timeout_s: 1,
                use_cache: false,
                cache_ttl: None,
                cache_refresh: false,
            },
            JobMetadata::default(),
        );
        let mut result = JobResult::default();
        result.data.insert("a".into(), serde_json::Value::String("out-a".into()));
        result.data.insert("b".into(), serde_json::Value::String("out-b".into()));
        job.result = Some(result);

        let single = format_raw_output(&job, &["a".to_string()]);
        assert_eq!(single, "out-a");

        let multi = format_raw_output(&job, &["a".to_string(), "b".to_string()]);
        assert_eq!(multi, "### a ###\nout-a\n\n### b ###\nout-b");
    }
}
