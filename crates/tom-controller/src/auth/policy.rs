/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Access policy for authenticated principals.
//!
//! Precedence: exact user allowlist, then email-domain allowlist, then regex
//! patterns (matched against both the canonical user and the email-like
//! identifier). Any match grants access; when every list is empty, all
//! authenticated principals are permitted. Matching is case-insensitive
//! throughout.

use regex::RegexBuilder;
use tom_utils::config::Controller;
use tracing::warn;

#[derive(Debug, Default)]
pub struct AccessPolicy {
    allowed_users: Vec<String>,
    allowed_domains: Vec<String>,
    allowed_user_regex: Vec<regex::Regex>,
}

impl AccessPolicy {
    pub fn from_settings(controller: &Controller) -> Self {
        Self::new(
            &controller.allowed_users,
            &controller.allowed_domains,
            &controller.allowed_user_regex,
        )
    }

    pub fn new(users: &[String], domains: &[String], patterns: &[String]) -> Self {
        let allowed_user_regex = patterns
            .iter()
            .filter_map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| warn!("ignoring invalid allowed_user_regex '{}': {}", p, e))
                    .ok()
            })
            .collect();
        Self {
            allowed_users: users.iter().map(|u| u.to_lowercase()).collect(),
            allowed_domains: domains.iter().map(|d| d.to_lowercase()).collect(),
            allowed_user_regex,
        }
    }

    /// Whether any rule is configured at all.
    pub fn is_restrictive(&self) -> bool {
        !(self.allowed_users.is_empty()
            && self.allowed_domains.is_empty()
            && self.allowed_user_regex.is_empty())
    }

    /// Evaluates the policy for a principal.
    ///
    /// `user` is the canonical identifier the provider extracted;
    /// `email_like` is the first email-shaped claim, used for domain rules.
    pub fn permits(&self, user: &str, email_like: Option<&str>) -> bool {
        if !self.is_restrictive() {
            return true;
        }
        let canonical = user.to_lowercase();

        if self.allowed_users.contains(&canonical) {
            return true;
        }

        if let Some(email) = email_like {
            if let Some((_, domain)) = email.rsplit_once('@') {
                if self.allowed_domains.contains(&domain.to_lowercase()) {
                    return true;
                }
            }
        }

        self.allowed_user_regex.iter().any(|re| {
            re.is_match(&canonical)
                || email_like.map(|email| re.is_match(email)).unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(users: &[&str], domains: &[&str], patterns: &[&str]) -> AccessPolicy {
        let to_vec = |xs: &[&str]| xs.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        AccessPolicy::new(&to_vec(users), &to_vec(domains), &to_vec(patterns))
    }

    #[test]
    fn empty_policy_permits_everyone() {
        let p = policy(&[], &[], &[]);
        assert!(p.permits("anyone@anywhere.net", Some("anyone@anywhere.net")));
        assert!(!p.is_restrictive());
    }

    #[test]
    fn exact_user_match_is_case_insensitive() {
        let p = policy(&["Alice@Company.com"], &[], &[]);
        assert!(p.permits("alice@company.com", None));
        assert!(!p.permits("bob@company.com", None));
    }

    #[test]
    fn domain_allowlist_uses_the_email_claim() {
        let p = policy(&[], &["company.com"], &[]);
        assert!(p.permits("alice@company.com", Some("alice@company.com")));
        assert!(!p.permits("external@other.com", Some("external@other.com")));
        // Without an email-like claim the domain rule cannot grant.
        assert!(!p.permits("subject-id-only", None));
    }

    #[test]
    fn regex_matches_user_or_email() {
        let p = policy(&[], &[], &["^svc-.*"]);
        assert!(p.permits("svc-backup", None));
        assert!(p.permits("SVC-RESTORE", None));
        assert!(!p.permits("alice", None));
    }

    #[test]
    fn invalid_regex_is_dropped_not_fatal() {
        let p = policy(&["alice"], &[], &["([unclosed"]);
        assert!(p.permits("alice", None));
        assert!(!p.permits("bob", None));
    }
}
