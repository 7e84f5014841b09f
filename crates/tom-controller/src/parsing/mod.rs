/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Parser dispatch.
//!
//! Two engines transform raw device output into structured records:
//! the record-oriented engine ("textfsm" templates, which also ship a
//! bundled library) and the hierarchical engine ("ttp" templates, custom
//! or inline only). Template selection precedence, in order:
//!
//! 1. Explicit template filename from the request
//! 2. Inline template text (hierarchical engine only)
//! 3. Custom index in the configured template directory
//! 4. Bundled built-in index (record engine only)
//!
//! Custom templates shadow bundled ones only when named explicitly; the two
//! indexes are never merged. Index files are re-read on every parse call so
//! template edits take effect without a restart.

pub mod index;
pub mod textfsm;
pub mod ttp;

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tom_models::ErrorKind;
use tom_utils::Settings;
use tracing::{debug, info};

/// Bundled record-engine template library, compiled into the binary.
const BUILTIN_TEXTFSM_INDEX: &str = include_str!("../../templates/builtin/textfsm/index");
const BUILTIN_TEXTFSM_TEMPLATES: &[(&str, &str)] = &[
    (
        "cisco_ios_show_version.textfsm",
        include_str!("../../templates/builtin/textfsm/cisco_ios_show_version.textfsm"),
    ),
    (
        "cisco_ios_show_ip_interface_brief.textfsm",
        include_str!("../../templates/builtin/textfsm/cisco_ios_show_ip_interface_brief.textfsm"),
    ),
    (
        "arista_eos_show_version.textfsm",
        include_str!("../../templates/builtin/textfsm/arista_eos_show_version.textfsm"),
    ),
];

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("template not found: {0}")]
    TemplateNotFound(String),
    #[error("template syntax error: {0}")]
    Syntax(String),
    #[error("parsing failed: {0}")]
    Failed(String),
}

impl ParseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ParseError::TemplateNotFound(_) => ErrorKind::TemplateNotFound,
            ParseError::Syntax(_) | ParseError::Failed(_) => ErrorKind::ParseError,
        }
    }
}

/// The two supported engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserKind {
    Textfsm,
    Ttp,
}

impl ParserKind {
    pub fn name(&self) -> &'static str {
        match self {
            ParserKind::Textfsm => "textfsm",
            ParserKind::Ttp => "ttp",
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            ParserKind::Textfsm => ".textfsm",
            ParserKind::Ttp => ".ttp",
        }
    }
}

impl FromStr for ParserKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "textfsm" => Ok(ParserKind::Textfsm),
            "ttp" => Ok(ParserKind::Ttp),
            other => Err(ParseError::Failed(format!(
                "parser '{}' not supported; use 'textfsm' or 'ttp'",
                other
            ))),
        }
    }
}

/// Where the selected template came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateSource {
    Explicit,
    Inline,
    Custom,
    Builtin,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateMetadata {
    pub template_source: TemplateSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_name: Option<String>,
}

/// The parse response envelope.
#[derive(Debug, Serialize)]
pub struct ParseOutcome {
    pub parsed: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    #[serde(rename = "_metadata")]
    pub metadata: TemplateMetadata,
}

/// Everything a parse call needs.
#[derive(Debug, Default)]
pub struct ParseRequest<'a> {
    pub raw_output: &'a str,
    pub platform: Option<&'a str>,
    pub command: Option<&'a str>,
    pub template: Option<&'a str>,
    pub inline_template: Option<&'a str>,
    pub include_raw: bool,
}

/// A resolved template ready to run.
struct ResolvedTemplate {
    content: String,
    source: TemplateSource,
    name: Option<String>,
}

/// Main parsing entry point, used by the device endpoints, the job endpoint
/// and the template test endpoint.
pub fn parse_output(
    settings: &Settings,
    parser: ParserKind,
    request: &ParseRequest<'_>,
) -> Result<ParseOutcome, ParseError> {
    let resolved = resolve_template(settings, parser, request)?;
    if let Some(name) = &resolved.name {
        info!(
            parser = parser.name(),
            template = %name,
            source = ?resolved.source,
            "parsing with template"
        );
    }

    let parsed = match parser {
        ParserKind::Textfsm => {
            let template = textfsm::TextFsmTemplate::parse(&resolved.content)?;
            serde_json::Value::Array(
                template
                    .run(request.raw_output)?
                    .into_iter()
                    .map(serde_json::Value::Object)
                    .collect(),
            )
        }
        ParserKind::Ttp => {
            let template = ttp::TtpTemplate::parse(&resolved.content)?;
            template.run(request.raw_output)?
        }
    };

    Ok(ParseOutcome {
        parsed,
        raw: request.include_raw.then(|| request.raw_output.to_string()),
        metadata: TemplateMetadata {
            template_source: resolved.source,
            template_name: resolved.name,
        },
    })
}

fn resolve_template(
    settings: &Settings,
    parser: ParserKind,
    request: &ParseRequest<'_>,
) -> Result<ResolvedTemplate, ParseError> {
    // 1. Explicit filename.
    if let Some(name) = request.template {
        let filename = with_extension(name, parser);
        let content = read_named_template(settings, parser, &filename)?;
        return Ok(ResolvedTemplate {
            content,
            source: TemplateSource::Explicit,
            name: Some(filename),
        });
    }

    // 2. Inline template text, hierarchical engine only.
    if let Some(text) = request.inline_template {
        if parser != ParserKind::Ttp {
            return Err(ParseError::Failed(
                "inline templates are only supported by the ttp parser".into(),
            ));
        }
        return Ok(ResolvedTemplate {
            content: text.to_string(),
            source: TemplateSource::Inline,
            name: None,
        });
    }

    // 3./4. Index discovery by (platform, command).
    let (Some(platform), Some(command)) = (request.platform, request.command) else {
        return Err(ParseError::Failed(
            "either a template or (platform + command) is required for parsing".into(),
        ));
    };
    match discover_template(settings, parser, platform, command) {
        Some(resolved) => Ok(resolved),
        None => Err(ParseError::TemplateNotFound(format!(
            "no {} template found for platform={}, command={}",
            parser.name(),
            platform,
            command
        ))),
    }
}

/// Index-driven discovery: custom index first, then the bundled index for
/// the record engine. Used by the parse path and `/templates/match`.
pub fn find_template(
    settings: &Settings,
    parser: ParserKind,
    platform: &str,
    command: &str,
) -> Option<(String, TemplateSource)> {
    discover_template(settings, parser, platform, command)
        .map(|r| (r.name.unwrap_or_default(), r.source))
}

fn discover_template(
    settings: &Settings,
    parser: ParserKind,
    platform: &str,
    command: &str,
) -> Option<ResolvedTemplate> {
    let custom_dir = custom_dir(settings, parser);

    // Custom index in the configured directory.
    if let Ok(index_content) = std::fs::read_to_string(custom_dir.join("index")) {
        let entries = index::parse_index(&index_content);
        if let Some(entry) = index::lookup(&entries, platform, command, ".*") {
            match std::fs::read_to_string(custom_dir.join(&entry.template)) {
                Ok(content) => {
                    return Some(ResolvedTemplate {
                        content,
                        source: TemplateSource::Custom,
                        name: Some(entry.template.clone()),
                    });
                }
                Err(e) => {
                    debug!(template = %entry.template, "custom template in index not readable: {}", e);
                }
            }
        }
    }

    // Bundled index, record engine only.
    if parser == ParserKind::Textfsm {
        let entries = index::parse_index(BUILTIN_TEXTFSM_INDEX);
        if let Some(entry) = index::lookup(&entries, platform, command, ".*") {
            if let Some((_, content)) = BUILTIN_TEXTFSM_TEMPLATES
                .iter()
                .find(|(name, _)| *name == entry.template)
            {
                return Some(ResolvedTemplate {
                    content: content.to_string(),
                    source: TemplateSource::Builtin,
                    name: Some(entry.template.clone()),
                });
            }
        }
    }
    None
}

fn read_named_template(
    settings: &Settings,
    parser: ParserKind,
    filename: &str,
) -> Result<String, ParseError> {
    let custom = custom_dir(settings, parser).join(filename);
    if let Ok(content) = std::fs::read_to_string(&custom) {
        debug!(path = %custom.display(), "using custom template");
        return Ok(content);
    }
    if parser == ParserKind::Textfsm {
        if let Some((_, content)) = BUILTIN_TEXTFSM_TEMPLATES
            .iter()
            .find(|(name, _)| *name == filename)
        {
            return Ok(content.to_string());
        }
    }
    Err(ParseError::TemplateNotFound(filename.to_string()))
}

fn custom_dir(settings: &Settings, parser: ParserKind) -> PathBuf {
    match parser {
        ParserKind::Textfsm => Path::new(&settings.controller.textfsm_template_dir).to_path_buf(),
        ParserKind::Ttp => Path::new(&settings.controller.ttp_template_dir).to_path_buf(),
    }
}

fn with_extension(name: &str, parser: ParserKind) -> String {
    if name.ends_with(parser.extension()) {
        name.to_string()
    } else {
        format!("{}{}", name, parser.extension())
    }
}

/// Template listings for the HTTP surface.
#[derive(Debug, Serialize)]
pub struct TemplateListing {
    pub custom: Vec<String>,
    pub builtin: Vec<String>,
}

pub fn list_templates(settings: &Settings, parser: ParserKind) -> TemplateListing {
    let mut custom: Vec<String> = std::fs::read_dir(custom_dir(settings, parser))
        .map(|entries| {
            entries
                .flatten()
                .filter_map(|e| e.file_name().into_string().ok())
                .filter(|name| name.ends_with(parser.extension()))
                .collect()
        })
        .unwrap_or_default();
    custom.sort();

    let builtin = match parser {
        ParserKind::Textfsm => BUILTIN_TEXTFSM_TEMPLATES
            .iter()
            .map(|(name, _)| name.to_string())
            .collect(),
        ParserKind::Ttp => Vec::new(),
    };
    TemplateListing { custom, builtin }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOW_VERSION_OUTPUT: &str = "\
Cisco IOS Software, C2960 Software (C2960-LANBASEK9-M), Version 15.0(2)SE4
ROM: Bootstrap program is C2960 boot loader
rtr1 uptime is 2 weeks, 3 days
Last reload reason: power-on
Configuration register is 0x2102
";

    fn settings_with_dirs(textfsm_dir: &str, ttp_dir: &str) -> Settings {
        let mut settings = Settings::new(None).unwrap();
        settings.controller.textfsm_template_dir = textfsm_dir.to_string();
        settings.controller.ttp_template_dir = ttp_dir.to_string();
        settings
    }

    fn bare_settings() -> Settings {
        settings_with_dirs("/nonexistent/textfsm", "/nonexistent/ttp")
    }

    #[test]
    fn builtin_index_resolves_by_platform_and_command() {
        let settings = bare_settings();
        let request = ParseRequest {
            raw_output: SHOW_VERSION_OUTPUT,
            platform: Some("cisco_ios"),
            command: Some("show version"),
            ..Default::default()
        };
        let outcome = parse_output(&settings, ParserKind::Textfsm, &request).unwrap();
        assert_eq!(outcome.metadata.template_source, TemplateSource::Builtin);
        assert_eq!(
            outcome.metadata.template_name.as_deref(),
            Some("cisco_ios_show_version.textfsm")
        );
        let records = outcome.parsed.as_array().unwrap();
        assert_eq!(records[0]["version"], "15.0(2)SE4");
        assert_eq!(records[0]["hostname"], "rtr1");
        assert!(outcome.raw.is_none());
    }

    #[test]
    fn explicit_template_beats_discovery() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("my_version.textfsm"),
            "Value V (\\S+)\n\nStart\n  ^.*Version ${V} -> Record\n",
        )
        .unwrap();
        let settings = settings_with_dirs(dir.path().to_str().unwrap(), "/nonexistent");

        let request = ParseRequest {
            raw_output: SHOW_VERSION_OUTPUT,
            platform: Some("cisco_ios"),
            command: Some("show version"),
            template: Some("my_version"),
            ..Default::default()
        };
        let outcome = parse_output(&settings, ParserKind::Textfsm, &request).unwrap();
        assert_eq!(outcome.metadata.template_source, TemplateSource::Explicit);
        assert_eq!(
            outcome.metadata.template_name.as_deref(),
            Some("my_version.textfsm")
        );
    }

    #[test]
    fn custom_index_beats_builtin_index() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("index"),
            "Template, Hostname, Platform, Command\nlocal.textfsm, .*, cisco_ios, show version\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("local.textfsm"),
            "Value HOST (\\S+)\n\nStart\n  ^${HOST} uptime is -> Record\n",
        )
        .unwrap();
        let settings = settings_with_dirs(dir.path().to_str().unwrap(), "/nonexistent");

        let (name, source) =
            find_template(&settings, ParserKind::Textfsm, "cisco_ios", "show version").unwrap();
        assert_eq!(source, TemplateSource::Custom);
        assert_eq!(name, "local.textfsm");
    }

    #[test]
    fn explicit_name_prefers_the_custom_file_over_the_bundled_one() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("cisco_ios_show_version.textfsm"),
            "Value SHADOW (\\S+)\n\nStart\n  ^shadow ${SHADOW} -> Record\n",
        )
        .unwrap();
        let settings = settings_with_dirs(dir.path().to_str().unwrap(), "/nonexistent");

        let request = ParseRequest {
            raw_output: "shadow yes\n",
            template: Some("cisco_ios_show_version.textfsm"),
            ..Default::default()
        };
        let outcome = parse_output(&settings, ParserKind::Textfsm, &request).unwrap();
        assert_eq!(outcome.parsed.as_array().unwrap()[0]["shadow"], "yes");
    }

    #[test]
    fn missing_templates_are_template_not_found() {
        let settings = bare_settings();
        let request = ParseRequest {
            raw_output: "x",
            platform: Some("unknown_os"),
            command: Some("show nothing"),
            ..Default::default()
        };
        let err = parse_output(&settings, ParserKind::Textfsm, &request).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TemplateNotFound);

        let err = parse_output(
            &settings,
            ParserKind::Textfsm,
            &ParseRequest {
                raw_output: "x",
                template: Some("does_not_exist"),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TemplateNotFound);
    }

    #[test]
    fn inline_templates_are_hierarchical_engine_only() {
        let settings = bare_settings();
        let request = ParseRequest {
            raw_output: "version 4.21.3F\n",
            inline_template: Some("version {{ v }}\n"),
            ..Default::default()
        };
        let outcome = parse_output(&settings, ParserKind::Ttp, &request).unwrap();
        assert_eq!(outcome.metadata.template_source, TemplateSource::Inline);
        assert_eq!(outcome.parsed["v"], "4.21.3F");

        assert!(parse_output(&settings, ParserKind::Textfsm, &request).is_err());
    }

    #[test]
    fn include_raw_echoes_the_input() {
        let settings = bare_settings();
        let request = ParseRequest {
            raw_output: SHOW_VERSION_OUTPUT,
            platform: Some("cisco_ios"),
            command: Some("show version"),
            include_raw: true,
            ..Default::default()
        };
        let outcome = parse_output(&settings, ParserKind::Textfsm, &request).unwrap();
        assert_eq!(outcome.raw.as_deref(), Some(SHOW_VERSION_OUTPUT));
    }

    #[test]
    fn hierarchical_engine_has_no_builtin_library() {
        let settings = bare_settings();
        assert!(find_template(&settings, ParserKind::Ttp, "cisco_ios", "show version").is_none());
        let listing = list_templates(&settings, ParserKind::Ttp);
        assert!(listing.builtin.is_empty());
    }

    #[test]
    fn parser_kind_parses_config_strings() {
        assert_eq!(ParserKind::from_str("textfsm").unwrap(), ParserKind::Textfsm);
        assert_eq!(ParserKind::from_str("TTP").unwrap(), ParserKind::Ttp);
        assert!(ParserKind::from_str("jinja").is_err());
    }
}
