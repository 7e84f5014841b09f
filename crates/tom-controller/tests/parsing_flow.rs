/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! End-to-end template resolution and parsing, driven the way the device and
//! job endpoints drive it: custom directories on disk, bundled fallbacks,
//! and both engines.

use tom_controller::parsing::{
    find_template, list_templates, parse_output, ParseRequest, ParserKind, TemplateSource,
};
use tom_utils::Settings;

const IOS_SHOW_VERSION: &str = "\
Cisco IOS Software, C2960 Software (C2960-LANBASEK9-M), Version 15.0(2)SE4
ROM: Bootstrap program is C2960 boot loader
lab-sw1 uptime is 1 week, 2 days
Last reload reason: power-on
Configuration register is 0xF
";

fn settings(textfsm_dir: &str, ttp_dir: &str) -> Settings {
    let mut settings = Settings::new(None).unwrap();
    settings.controller.textfsm_template_dir = textfsm_dir.to_string();
    settings.controller.ttp_template_dir = ttp_dir.to_string();
    settings
}

#[test]
fn bundled_library_parses_ios_output_with_abbreviated_commands() {
    let settings = settings("/nonexistent", "/nonexistent");
    for command in ["show version", "sh ver"] {
        let outcome = parse_output(
            &settings,
            ParserKind::Textfsm,
            &ParseRequest {
                raw_output: IOS_SHOW_VERSION,
                platform: Some("cisco_ios"),
                command: Some(command),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(outcome.metadata.template_source, TemplateSource::Builtin);
        let records = outcome.parsed.as_array().unwrap();
        assert_eq!(records[0]["hostname"], "lab-sw1");
        assert_eq!(records[0]["config_register"], "0xF");
    }
}

#[test]
fn custom_directory_overrides_discovery_and_lists() {
    let textfsm_dir = tempfile::tempdir().unwrap();
    std::fs::write(
        textfsm_dir.path().join("index"),
        "Template, Hostname, Platform, Command\n\
         lab_uptime.textfsm, .*, cisco_ios, show version\n",
    )
    .unwrap();
    std::fs::write(
        textfsm_dir.path().join("lab_uptime.textfsm"),
        "Value Required HOST (\\S+)\nValue UPTIME (.+)\n\nStart\n  ^${HOST} uptime is ${UPTIME} -> Record\n",
    )
    .unwrap();
    let settings = settings(textfsm_dir.path().to_str().unwrap(), "/nonexistent");

    let (name, source) =
        find_template(&settings, ParserKind::Textfsm, "cisco_ios", "show version").unwrap();
    assert_eq!(source, TemplateSource::Custom);
    assert_eq!(name, "lab_uptime.textfsm");

    let outcome = parse_output(
        &settings,
        ParserKind::Textfsm,
        &ParseRequest {
            raw_output: IOS_SHOW_VERSION,
            platform: Some("cisco_ios"),
            command: Some("show version"),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(outcome.metadata.template_source, TemplateSource::Custom);
    assert_eq!(outcome.parsed.as_array().unwrap()[0]["uptime"], "1 week, 2 days");

    let listing = list_templates(&settings, ParserKind::Textfsm);
    assert_eq!(listing.custom, vec!["lab_uptime.textfsm".to_string()]);
    assert!(listing
        .builtin
        .contains(&"cisco_ios_show_version.textfsm".to_string()));
}

#[test]
fn hierarchical_engine_resolves_from_its_own_index() {
    let ttp_dir = tempfile::tempdir().unwrap();
    std::fs::write(
        ttp_dir.path().join("index"),
        "Template, Hostname, Platform, Command\n\
         eos_version.ttp, .*, arista_eos, show version\n",
    )
    .unwrap();
    std::fs::write(
        ttp_dir.path().join("eos_version.ttp"),
        "<group name=\"version\">\nSoftware image version: {{ version }}\n</group>\n",
    )
    .unwrap();
    let settings = settings("/nonexistent", ttp_dir.path().to_str().unwrap());

    let outcome = parse_output(
        &settings,
        ParserKind::Ttp,
        &ParseRequest {
            raw_output: "Software image version: 4.21.3F\n",
            platform: Some("arista_eos"),
            command: Some("show version"),
            include_raw: true,
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(outcome.metadata.template_source, TemplateSource::Custom);
    assert_eq!(outcome.parsed["version"]["version"], "4.21.3F");
    assert!(outcome.raw.is_some());
}

#[test]
fn envelope_serializes_with_metadata_key() {
    let settings = settings("/nonexistent", "/nonexistent");
    let outcome = parse_output(
        &settings,
        ParserKind::Ttp,
        &ParseRequest {
            raw_output: "version 1.0\n",
            inline_template: Some("version {{ v }}\n"),
            ..Default::default()
        },
    )
    .unwrap();
    let json = serde_json::to_value(&outcome).unwrap();
    assert_eq!(json["_metadata"]["template_source"], "inline");
    assert_eq!(json["parsed"]["v"], "1.0");
}
