/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Record-oriented template engine.
//!
//! Templates declare a set of values (one regex per field) followed by named
//! states whose rules match input lines and drive record emission:
//!
//! ```text
//! Value VERSION (\S+)
//! Value Required HOSTNAME (\S+)
//!
//! Start
//!   ^${HOSTNAME} uptime is
//!   ^.*Software.*Version ${VERSION} -> Record
//! ```
//!
//! Supported value options: `Required`, `Filldown`, `List`. Supported rule
//! actions: `Record`, `NoRecord`, `Clear`, `Clearall`, `Next` (default),
//! `Continue`, `Error`, and a state-name transition, combined as
//! `Line.Record State`. Output is a list of records keyed by the lowercased
//! value names. A partial row at end of input is emitted when its required
//! values are filled.

use crate::parsing::ParseError;
use regex::Regex;
use serde_json::{Map, Value as Json};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineAction {
    Next,
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordAction {
    None,
    Record,
    NoRecord,
    Clear,
    Clearall,
}

#[derive(Debug, Clone)]
struct ValueDef {
    name: String,
    required: bool,
    filldown: bool,
    list: bool,
}

#[derive(Debug)]
struct Rule {
    regex: Regex,
    line: LineAction,
    record: RecordAction,
    next_state: Option<String>,
    error: bool,
}

/// A compiled template.
#[derive(Debug)]
pub struct TextFsmTemplate {
    values: Vec<ValueDef>,
    states: HashMap<String, Vec<Rule>>,
}

#[derive(Debug, Clone, PartialEq)]
enum Slot {
    Empty,
    One(String),
    Many(Vec<String>),
}

impl TextFsmTemplate {
    /// Compiles template source.
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        let mut values = Vec::new();
        let mut regexes: HashMap<String, String> = HashMap::new();
        let mut states: HashMap<String, Vec<Rule>> = HashMap::new();
        let mut current_state: Option<String> = None;

        for raw_line in source.lines() {
            let line = raw_line.trim_end();
            if line.trim().is_empty() || line.trim_start().starts_with('#') {
                continue;
            }

            if let Some(rest) = line.strip_prefix("Value ") {
                let (def, regex) = parse_value_line(rest)?;
                regexes.insert(def.name.clone(), regex);
                values.push(def);
                continue;
            }

            if !line.starts_with(' ') {
                // State label.
                let name = line.trim().to_string();
                states.entry(name.clone()).or_default();
                current_state = Some(name);
                continue;
            }

            let state = current_state.as_ref().ok_or_else(|| {
                ParseError::Syntax("rule line before any state label".to_string())
            })?;
            let rule = parse_rule_line(line.trim(), &regexes)?;
            states.get_mut(state).expect("state exists").push(rule);
        }

        if !states.contains_key("Start") {
            return Err(ParseError::Syntax("template has no Start state".into()));
        }
        Ok(Self { values, states })
    }

    /// Runs the template over raw input and returns the emitted records.
    pub fn run(&self, input: &str) -> Result<Vec<Map<String, Json>>, ParseError> {
        let mut records: Vec<Map<String, Json>> = Vec::new();
        let mut row: HashMap<&str, Slot> = self
            .values
            .iter()
            .map(|v| (v.name.as_str(), Slot::Empty))
            .collect();
        let mut state = "Start".to_string();

        'lines: for line in input.lines() {
            // A Continue action resumes matching at the following rule.
            let mut rule_start = 0usize;
            loop {
                let rules = self
                    .states
                    .get(&state)
                    .ok_or_else(|| ParseError::Syntax(format!("unknown state '{}'", state)))?;

                let mut matched = None;
                for (idx, rule) in rules.iter().enumerate().skip(rule_start) {
                    if let Some(caps) = rule.regex.captures(line) {
                        matched = Some((idx, rule, caps));
                        break;
                    }
                }

                let Some((idx, rule, caps)) = matched else {
                    continue 'lines;
                };
                if rule.error {
                    return Err(ParseError::Failed(format!(
                        "template error state reached on line: {}",
                        line
                    )));
                }

                for value in &self.values {
                    if let Some(m) = caps.name(&value.name) {
                        let slot = row.get_mut(value.name.as_str()).expect("slot exists");
                        if value.list {
                            match slot {
                                Slot::Many(items) => items.push(m.as_str().to_string()),
                                _ => *slot = Slot::Many(vec![m.as_str().to_string()]),
                            }
                        } else {
                            *slot = Slot::One(m.as_str().to_string());
                        }
                    }
                }

                match rule.record {
                    RecordAction::Record => self.emit(&mut records, &mut row),
                    RecordAction::Clear => self.clear(&mut row, false),
                    RecordAction::Clearall => self.clear(&mut row, true),
                    RecordAction::NoRecord | RecordAction::None => {}
                }
                if let Some(next) = &rule.next_state {
                    state = next.clone();
                }
                match rule.line {
                    LineAction::Next => continue 'lines,
                    LineAction::Continue => {
                        rule_start = idx + 1;
                        continue;
                    }
                }
            }
        }

        // Implicit record at end of input.
        self.emit(&mut records, &mut row);
        Ok(records)
    }

    /// Value names in declaration order, lowercased, as used in records.
    pub fn header(&self) -> Vec<String> {
        self.values.iter().map(|v| v.name.to_lowercase()).collect()
    }

    fn emit<'a>(&'a self, records: &mut Vec<Map<String, Json>>, row: &mut HashMap<&'a str, Slot>) {
        let any_set = self
            .values
            .iter()
            .any(|v| !matches!(row[v.name.as_str()], Slot::Empty));
        let required_ok = self
            .values
            .iter()
            .filter(|v| v.required)
            .all(|v| !matches!(row[v.name.as_str()], Slot::Empty));
        if any_set && required_ok {
            let mut record = Map::new();
            for value in &self.values {
                let json = match &row[value.name.as_str()] {
                    Slot::Empty => {
                        if value.list {
                            Json::Array(Vec::new())
                        } else {
                            Json::String(String::new())
                        }
                    }
                    Slot::One(s) => Json::String(s.clone()),
                    Slot::Many(items) => {
                        Json::Array(items.iter().cloned().map(Json::String).collect())
                    }
                };
                record.insert(value.name.to_lowercase(), json);
            }
            records.push(record);
        }
        self.clear(row, false);
    }

    fn clear<'a>(&'a self, row: &mut HashMap<&'a str, Slot>, include_filldown: bool) {
        for value in &self.values {
            if value.filldown && !include_filldown {
                continue;
            }
            row.insert(value.name.as_str(), Slot::Empty);
        }
    }
}

fn parse_value_line(rest: &str) -> Result<(ValueDef, String), ParseError> {
    let open = rest
        .find('(')
        .ok_or_else(|| ParseError::Syntax(format!("value without regex: {}", rest)))?;
    let close = rest
        .rfind(')')
        .filter(|c| *c > open)
        .ok_or_else(|| ParseError::Syntax(format!("unterminated value regex: {}", rest)))?;
    let regex = rest[open + 1..close].to_string();

    let head: Vec<&str> = rest[..open].split_whitespace().collect();
    let (name, options) = match head.as_slice() {
        [name] => (*name, ""),
        [options, name] => (*name, *options),
        _ => {
            return Err(ParseError::Syntax(format!(
                "malformed value declaration: {}",
                rest
            )))
        }
    };

    let mut def = ValueDef {
        name: name.to_string(),
        required: false,
        filldown: false,
        list: false,
    };
    for option in options.split(',').filter(|o| !o.is_empty()) {
        match option {
            "Required" => def.required = true,
            "Filldown" => def.filldown = true,
            "List" => def.list = true,
            // Key affects nothing in this engine's output shape.
            "Key" => {}
            other => {
                return Err(ParseError::Syntax(format!(
                    "unsupported value option '{}'",
                    other
                )))
            }
        }
    }
    Ok((def, regex))
}

fn parse_rule_line(line: &str, regexes: &HashMap<String, String>) -> Result<Rule, ParseError> {
    let (pattern, action) = match line.split_once(" -> ") {
        Some((p, a)) => (p.trim(), a.trim()),
        None => (line, ""),
    };
    if !pattern.starts_with('^') {
        return Err(ParseError::Syntax(format!(
            "rule pattern must start with '^': {}",
            pattern
        )));
    }

    let substituted = substitute_values(pattern, regexes);
    let regex = Regex::new(&substituted)
        .map_err(|e| ParseError::Syntax(format!("bad rule regex '{}': {}", pattern, e)))?;

    let mut rule = Rule {
        regex,
        line: LineAction::Next,
        record: RecordAction::None,
        next_state: None,
        error: false,
    };

    for token in action.split_whitespace() {
        for part in token.split('.') {
            match part {
                "" => {}
                "Next" => rule.line = LineAction::Next,
                "Continue" => rule.line = LineAction::Continue,
                "Record" => rule.record = RecordAction::Record,
                "NoRecord" => rule.record = RecordAction::NoRecord,
                "Clear" => rule.record = RecordAction::Clear,
                "Clearall" => rule.record = RecordAction::Clearall,
                "Error" => rule.error = true,
                state => rule.next_state = Some(state.to_string()),
            }
        }
    }
    if rule.line == LineAction::Continue && rule.next_state.is_some() {
        return Err(ParseError::Syntax(
            "Continue rules cannot change state".into(),
        ));
    }
    Ok(rule)
}

/// Replaces `${NAME}` and `$NAME` references with named capture groups.
fn substitute_values(pattern: &str, regexes: &HashMap<String, String>) -> String {
    let mut out = String::new();
    let mut chars = pattern.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        // "$$" is a literal dollar.
        if matches!(chars.peek(), Some((_, '$'))) {
            chars.next();
            out.push('$');
            continue;
        }
        let rest = &pattern[i + 1..];
        let (name, consumed) = if let Some(stripped) = rest.strip_prefix('{') {
            match stripped.find('}') {
                Some(end) => (&stripped[..end], end + 2),
                None => {
                    out.push('$');
                    continue;
                }
            }
        } else {
            let end = rest
                .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
                .unwrap_or(rest.len());
            (&rest[..end], end)
        };
        match regexes.get(name) {
            Some(value_re) => {
                out.push_str(&format!("(?P<{}>{})", name, value_re));
                for _ in 0..consumed {
                    chars.next();
                }
            }
            None => out.push('$'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOW_VERSION: &str = "\
Value VERSION (\\S+)
Value HOSTNAME (\\S+)
Value UPTIME (.+)

Start
  ^.*Software.*Version ${VERSION},
  ^${HOSTNAME} uptime is ${UPTIME} -> Record
";

    const OUTPUT: &str = "\
Cisco IOS Software, C2960 Software (C2960-LANBASEK9-M), Version 15.0(2)SE4,
rtr1 uptime is 2 weeks, 3 days
";

    #[test]
    fn extracts_records_from_device_output() {
        let template = TextFsmTemplate::parse(SHOW_VERSION).unwrap();
        let records = template.run(OUTPUT).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["version"], "15.0(2)SE4");
        assert_eq!(records[0]["hostname"], "rtr1");
        assert_eq!(records[0]["uptime"], "2 weeks, 3 days");
    }

    #[test]
    fn keys_are_lowercased_value_names() {
        let template = TextFsmTemplate::parse(SHOW_VERSION).unwrap();
        assert_eq!(template.header(), vec!["version", "hostname", "uptime"]);
    }

    #[test]
    fn record_per_row_tables() {
        let template = TextFsmTemplate::parse(
            "Value INTF (\\S+)\nValue STATUS (\\S+)\n\nStart\n  ^${INTF}\\s+${STATUS} -> Record\n",
        )
        .unwrap();
        let records = template
            .run("Gi0/1 up\nGi0/2 down\nGi0/3 up\n")
            .unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1]["intf"], "Gi0/2");
        assert_eq!(records[1]["status"], "down");
    }

    #[test]
    fn required_values_gate_emission() {
        let template = TextFsmTemplate::parse(
            "Value Required INTF (\\S+)\nValue DESC (.+)\n\nStart\n  ^desc (?:${DESC}) -> Record\n  ^intf ${INTF} -> Record\n",
        )
        .unwrap();
        // Only the line with the required value produces a record.
        let records = template.run("desc lonely description\nintf Gi0/1\n").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["intf"], "Gi0/1");
    }

    #[test]
    fn filldown_persists_across_records() {
        let template = TextFsmTemplate::parse(
            "Value Filldown CHASSIS (\\S+)\nValue Required PORT (\\S+)\n\nStart\n  ^chassis ${CHASSIS}\n  ^port ${PORT} -> Record\n",
        )
        .unwrap();
        let records = template
            .run("chassis sw1\nport 1\nport 2\n")
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["chassis"], "sw1");
        assert_eq!(records[1]["chassis"], "sw1");
    }

    #[test]
    fn list_values_accumulate() {
        let template = TextFsmTemplate::parse(
            "Value List MEMBER (\\S+)\nValue Required GROUP (\\S+)\n\nStart\n  ^member ${MEMBER}\n  ^group ${GROUP} -> Record\n",
        )
        .unwrap();
        let records = template.run("member a\nmember b\ngroup g1\n").unwrap();
        assert_eq!(records[0]["member"], serde_json::json!(["a", "b"]));
    }

    #[test]
    fn state_transitions_switch_rule_sets() {
        let template = TextFsmTemplate::parse(
            "Value NAME (\\S+)\n\nStart\n  ^--- begin --- -> Body\n\nBody\n  ^name ${NAME} -> Record\n",
        )
        .unwrap();
        let records = template
            .run("name ignored\n--- begin ---\nname captured\n")
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["name"], "captured");
    }

    #[test]
    fn continue_rules_keep_matching_the_same_line() {
        let template = TextFsmTemplate::parse(
            "Value A (\\S+)\nValue B (\\S+)\n\nStart\n  ^${A} -> Continue\n  ^\\S+ ${B} -> Record\n",
        )
        .unwrap();
        let records = template.run("left right\n").unwrap();
        assert_eq!(records[0]["a"], "left");
        assert_eq!(records[0]["b"], "right");
    }

    #[test]
    fn error_action_fails_the_parse() {
        let template = TextFsmTemplate::parse(
            "Value A (\\S+)\n\nStart\n  ^% Invalid -> Error\n  ^${A} -> Record\n",
        )
        .unwrap();
        assert!(template.run("% Invalid input detected\n").is_err());
    }

    #[test]
    fn templates_without_start_are_rejected() {
        assert!(TextFsmTemplate::parse("Value A (\\S+)\n\nBody\n  ^${A}\n").is_err());
    }
}
