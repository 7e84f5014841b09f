/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Template index files.
//!
//! An index is a CSV document with the header `Template, Hostname, Platform,
//! Command`. Every field is a regular expression; `Hostname` defaults to
//! `.*`. Lookups match platform and command case-insensitively and return
//! the first matching row in file order. Command patterns support the
//! `[[optional]]` shorthand, where `sh[[ow]]` expands to `sh(o(w)?)?`.

use regex::RegexBuilder;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub template: String,
    pub hostname: String,
    pub platform: String,
    pub command: String,
}

/// Parses an index document. Comment lines (`#`) and blank lines are
/// skipped; rows with fewer columns than the header are dropped.
pub fn parse_index(content: &str) -> Vec<IndexEntry> {
    let mut lines = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'));

    let Some(header) = lines.next() else {
        return Vec::new();
    };
    let columns: Vec<String> = header
        .split(',')
        .map(|c| c.trim().to_lowercase())
        .collect();
    let position = |name: &str| columns.iter().position(|c| c == name);
    let (Some(t_col), Some(p_col), Some(c_col)) = (
        position("template"),
        position("platform"),
        position("command"),
    ) else {
        warn!("index header missing required columns: {}", header);
        return Vec::new();
    };
    let h_col = position("hostname");

    let mut entries = Vec::new();
    for line in lines {
        // The command column is last in well-formed indexes and may contain
        // commas, so split into at most one field per column.
        let fields: Vec<&str> = line.splitn(columns.len(), ',').map(str::trim).collect();
        if fields.len() < columns.len() {
            warn!("skipping short index row: {}", line);
            continue;
        }
        entries.push(IndexEntry {
            template: fields[t_col].to_string(),
            hostname: h_col
                .map(|i| fields[i].to_string())
                .filter(|h| !h.is_empty())
                .unwrap_or_else(|| ".*".to_string()),
            platform: fields[p_col].to_string(),
            command: fields[c_col].to_string(),
        });
    }
    entries
}

/// Expands the `[[optional]]` shorthand into nested optional groups:
/// `abc[[xyz]]` becomes `abc(x(y(z)?)?)?`.
pub fn expand_optional(pattern: &str) -> String {
    let mut out = String::new();
    let mut rest = pattern;
    while let Some(start) = rest.find("[[") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("]]") {
            Some(end) => {
                let content = &after[..end];
                out.push_str(&nested_optional(content));
                rest = &after[end + 2..];
            }
            None => {
                // Unterminated marker; keep the text as-is.
                out.push_str(&rest[start..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

fn nested_optional(content: &str) -> String {
    let chars: Vec<char> = content.chars().collect();
    let Some((last, init)) = chars.split_last() else {
        return String::new();
    };
    let mut inner = last.to_string();
    for c in init.iter().rev() {
        inner = format!("{}({})?", c, inner);
    }
    format!("({})?", inner)
}

fn matches_ci(pattern: &str, text: &str, anchored_full: bool) -> bool {
    let wrapped = if anchored_full {
        format!("^(?:{})$", pattern)
    } else {
        format!("^(?:{})", pattern)
    };
    match RegexBuilder::new(&wrapped).case_insensitive(true).build() {
        Ok(re) => re.is_match(text),
        Err(e) => {
            warn!("invalid regex in template index '{}': {}", pattern, e);
            false
        }
    }
}

/// First entry matching the platform, command and hostname, in file order.
pub fn lookup<'a>(
    entries: &'a [IndexEntry],
    platform: &str,
    command: &str,
    hostname: &str,
) -> Option<&'a IndexEntry> {
    entries.iter().find(|entry| {
        matches_ci(&entry.platform, platform, true)
            && matches_ci(&entry.hostname, hostname, false)
            && matches_ci(&expand_optional(&entry.command), command, false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX: &str = "\
Template, Hostname, Platform, Command
cisco_ios_show_version.textfsm, .*, cisco_ios, sh[[ow]] ver[[sion]]
cisco_ios_show_ip_interface_brief.textfsm, .*, cisco_ios, sh[[ow]] ip int[[erface]] br[[ief]]
arista_eos_show_version.textfsm, .*, arista_eos, sh[[ow]] ver[[sion]]
";

    #[test]
    fn parses_rows_in_order() {
        let entries = parse_index(INDEX);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].template, "cisco_ios_show_version.textfsm");
        assert_eq!(entries[0].hostname, ".*");
    }

    #[test]
    fn expands_optional_shorthand() {
        assert_eq!(expand_optional("sh[[ow]]"), "sh(o(w)?)?");
        assert_eq!(expand_optional("plain"), "plain");
        assert_eq!(expand_optional("a[[b]] c[[d]]"), "a(b)? c(d)?");
    }

    #[test]
    fn lookup_honors_abbreviations_and_case() {
        let entries = parse_index(INDEX);
        for command in ["show version", "sh ver", "SH VERSION", "show ver"] {
            let hit = lookup(&entries, "cisco_ios", command, "rtr1").unwrap();
            assert_eq!(hit.template, "cisco_ios_show_version.textfsm");
        }
    }

    #[test]
    fn lookup_is_first_match_wins() {
        let entries = parse_index(
            "Template, Hostname, Platform, Command\n\
             first.textfsm, .*, cisco_ios, show version\n\
             second.textfsm, .*, cisco_ios, show v.*\n",
        );
        let hit = lookup(&entries, "cisco_ios", "show version", "rtr1").unwrap();
        assert_eq!(hit.template, "first.textfsm");
    }

    #[test]
    fn platform_must_match_fully() {
        let entries = parse_index(INDEX);
        assert!(lookup(&entries, "cisco_iosxe", "show version", "rtr1").is_none());
        assert!(lookup(&entries, "arista_eos", "show version", "sw1").is_some());
    }

    #[test]
    fn comments_and_blanks_are_skipped() {
        let entries = parse_index(
            "# a comment\n\nTemplate, Hostname, Platform, Command\n# another\nx.textfsm, .*, p, c\n",
        );
        assert_eq!(entries.len(), 1);
    }
}
