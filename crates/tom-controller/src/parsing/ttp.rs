/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Hierarchical template engine.
//!
//! Templates are example-shaped text with `{{ name }}` placeholders, grouped
//! into nested `<group>` blocks that become nested structures in the output:
//!
//! ```text
//! <group name="interfaces">
//! interface {{ name }}
//!  description {{ description | ORPHRASE }}
//!  ip address {{ ip }} {{ mask }}
//! </group>
//! ```
//!
//! Each template line compiles to a regex: literal text is matched verbatim
//! (whitespace-insensitively at the edges), `{{ name }}` captures one token,
//! `{{ name | ORPHRASE }}` captures a phrase. A group's first line starts a
//! new record; subsequent lines fill it. A group emits an object for a single
//! record or an array for several, and nested groups attach under their name.

use crate::parsing::ParseError;
use regex::Regex;
use serde_json::{Map, Value as Json};

#[derive(Debug)]
struct LinePattern {
    regex: Regex,
    names: Vec<String>,
}

#[derive(Debug, Default)]
struct Group {
    name: Option<String>,
    patterns: Vec<LinePattern>,
    children: Vec<Group>,
}

/// A compiled hierarchical template.
#[derive(Debug)]
pub struct TtpTemplate {
    root: Group,
}

impl TtpTemplate {
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        let mut stack: Vec<Group> = vec![Group::default()];

        for raw_line in source.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with("##") {
                continue;
            }
            if let Some(name) = parse_group_open(line)? {
                stack.push(Group {
                    name,
                    ..Group::default()
                });
                continue;
            }
            if line == "</group>" {
                let group = stack
                    .pop()
                    .ok_or_else(|| ParseError::Syntax("unbalanced </group>".into()))?;
                let parent = stack
                    .last_mut()
                    .ok_or_else(|| ParseError::Syntax("unbalanced </group>".into()))?;
                parent.children.push(group);
                continue;
            }
            let pattern = compile_line(line)?;
            stack
                .last_mut()
                .expect("stack never empty")
                .patterns
                .push(pattern);
        }

        if stack.len() != 1 {
            return Err(ParseError::Syntax("unclosed <group> block".into()));
        }
        Ok(Self {
            root: stack.pop().expect("root group"),
        })
    }

    /// Runs the template over raw input, producing the nested structure.
    pub fn run(&self, input: &str) -> Result<Json, ParseError> {
        let lines: Vec<&str> = input.lines().map(str::trim).collect();
        Ok(run_group(&self.root, &lines))
    }
}

fn parse_group_open(line: &str) -> Result<Option<Option<String>>, ParseError> {
    if !line.starts_with("<group") || !line.ends_with('>') || line.starts_with("</") {
        return Ok(None);
    }
    let inner = &line[6..line.len() - 1];
    let inner = inner.trim();
    if inner.is_empty() {
        return Ok(Some(None));
    }
    let name = inner
        .strip_prefix("name")
        .map(str::trim_start)
        .and_then(|rest| rest.strip_prefix('='))
        .map(str::trim_start)
        .and_then(|rest| rest.strip_prefix('"'))
        .and_then(|rest| rest.strip_suffix('"'))
        .ok_or_else(|| ParseError::Syntax(format!("malformed group tag: {}", line)))?;
    Ok(Some(Some(name.to_string())))
}

fn compile_line(line: &str) -> Result<LinePattern, ParseError> {
    let mut pattern = String::from("^");
    let mut names = Vec::new();
    let mut rest = line;

    while let Some(start) = rest.find("{{") {
        pattern.push_str(&escape_literal(&rest[..start]));
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| ParseError::Syntax(format!("unterminated placeholder in: {}", line)))?;
        let spec = after[..end].trim();
        let (name, matcher) = match spec.split_once('|') {
            Some((name, matcher)) => (name.trim(), matcher.trim()),
            None => (spec, ""),
        };
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ParseError::Syntax(format!(
                "invalid placeholder name '{}' in: {}",
                name, line
            )));
        }
        let capture = match matcher {
            "" => r"\S+",
            // A phrase: one or more space-separated tokens.
            "ORPHRASE" => r"\S+(?: \S+)*",
            other => {
                return Err(ParseError::Syntax(format!(
                    "unsupported matcher '{}' in: {}",
                    other, line
                )))
            }
        };
        pattern.push_str(&format!("(?P<{}>{})", name, capture));
        names.push(name.to_string());
        rest = &after[end + 2..];
    }
    pattern.push_str(&escape_literal(rest));
    pattern.push('$');

    let regex = Regex::new(&pattern)
        .map_err(|e| ParseError::Syntax(format!("bad template line '{}': {}", line, e)))?;
    Ok(LinePattern { regex, names })
}

/// Escapes literal template text, collapsing whitespace runs into `\s+`.
fn escape_literal(text: &str) -> String {
    let mut out = String::new();
    let mut in_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push_str(r"\s+");
                in_space = true;
            }
        } else {
            in_space = false;
            out.push_str(&regex::escape(&c.to_string()));
        }
    }
    out
}

fn run_group(group: &Group, lines: &[&str]) -> Json {
    let mut records: Vec<Map<String, Json>> = Vec::new();
    let mut current = Map::new();

    for line in lines {
        for (idx, pattern) in group.patterns.iter().enumerate() {
            let Some(caps) = pattern.regex.captures(line) else {
                continue;
            };
            if idx == 0 && !current.is_empty() {
                records.push(std::mem::take(&mut current));
            }
            for name in &pattern.names {
                if let Some(m) = caps.name(name) {
                    current.insert(name.clone(), Json::String(m.as_str().to_string()));
                }
            }
            break;
        }
    }
    if !current.is_empty() {
        records.push(current);
    }

    let mut base = match records.len() {
        0 => Json::Object(Map::new()),
        1 => Json::Object(records.into_iter().next().expect("one record")),
        _ => Json::Array(records.into_iter().map(Json::Object).collect()),
    };

    for child in &group.children {
        let value = run_group(child, lines);
        let key = child.name.clone().unwrap_or_else(|| "group".to_string());
        match &mut base {
            Json::Object(map) => {
                map.insert(key, value);
            }
            Json::Array(items) => {
                // Nested groups attach to the final record of the parent.
                if let Some(Json::Object(last)) = items.last_mut() {
                    last.insert(key, value);
                }
            }
            _ => {}
        }
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = r#"
hostname {{ hostname }}
<group name="interfaces">
interface {{ name }}
description {{ description | ORPHRASE }}
ip address {{ ip }} {{ mask }}
</group>
"#;

    const OUTPUT: &str = "\
hostname rtr1
interface GigabitEthernet0/1
 description uplink to core
 ip address 10.0.0.1 255.255.255.0
interface GigabitEthernet0/2
 description access port
 ip address 10.0.1.1 255.255.255.0
";

    #[test]
    fn builds_nested_structures() {
        let template = TtpTemplate::parse(TEMPLATE).unwrap();
        let result = template.run(OUTPUT).unwrap();
        assert_eq!(result["hostname"], "rtr1");
        let interfaces = result["interfaces"].as_array().unwrap();
        assert_eq!(interfaces.len(), 2);
        assert_eq!(interfaces[0]["name"], "GigabitEthernet0/1");
        assert_eq!(interfaces[0]["description"], "uplink to core");
        assert_eq!(interfaces[1]["ip"], "10.0.1.1");
    }

    #[test]
    fn single_record_groups_are_objects() {
        let template =
            TtpTemplate::parse("<group name=\"version\">\nversion {{ v }}\n</group>\n").unwrap();
        let result = template.run("version 4.21.3F\n").unwrap();
        assert_eq!(result["version"]["v"], "4.21.3F");
    }

    #[test]
    fn orphrase_captures_multi_word_values() {
        let template = TtpTemplate::parse("banner {{ text | ORPHRASE }}\n").unwrap();
        let result = template.run("banner welcome to the lab\n").unwrap();
        assert_eq!(result["text"], "welcome to the lab");
    }

    #[test]
    fn unbalanced_groups_are_rejected() {
        assert!(TtpTemplate::parse("<group name=\"a\">\nx {{ y }}\n").is_err());
        assert!(TtpTemplate::parse("x {{ y }}\n</group>\n").is_err());
    }

    #[test]
    fn unsupported_matchers_are_rejected() {
        assert!(TtpTemplate::parse("x {{ y | MACRO }}\n").is_err());
    }

    #[test]
    fn non_matching_input_yields_empty_structure() {
        let template = TtpTemplate::parse("version {{ v }}\n").unwrap();
        let result = template.run("nothing relevant here\n").unwrap();
        assert_eq!(result, serde_json::json!({}));
    }
}
