/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Typed token claims.
//!
//! Well-known fields get struct members; anything else lands in the flattened
//! `extra` map so the debug endpoint can surface custom claims without the
//! validators caring about them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Claims registered by the standard or commonly issued by the supported
/// providers. Unknown claims are preserved in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Claims {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Audience: a single string or an array, depending on the provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upn: Option<String>,
    /// Google hosted-domain claim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
    /// Entra tenant id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tid: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Claim names excluded from the custom-claims view on the debug endpoint.
const STANDARD_CLAIMS: &[&str] = &[
    "iss", "sub", "aud", "exp", "iat", "nbf", "jti", "at_hash", "nonce", "auth_time",
];

impl Claims {
    /// First email-shaped identifier among the identity claims, used for
    /// domain-based access rules.
    pub fn email_like(&self) -> Option<&str> {
        [
            self.email.as_deref(),
            self.preferred_username.as_deref(),
            self.upn.as_deref(),
        ]
        .into_iter()
        .flatten()
        .find(|v| v.contains('@'))
    }

    /// Non-standard claims for the debug endpoint.
    pub fn custom_claims(&self) -> Map<String, Value> {
        self.extra
            .iter()
            .filter(|(k, _)| !STANDARD_CLAIMS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_claims_are_preserved() {
        let json = serde_json::json!({
            "iss": "https://accounts.google.com",
            "sub": "1234",
            "email": "alice@company.com",
            "department": "netops",
            "nonce": "xyz",
        });
        let claims: Claims = serde_json::from_value(json).unwrap();
        assert_eq!(claims.email.as_deref(), Some("alice@company.com"));
        assert_eq!(claims.extra["department"], "netops");

        let custom = claims.custom_claims();
        assert!(custom.contains_key("department"));
        assert!(!custom.contains_key("nonce"));
    }

    #[test]
    fn email_like_prefers_the_email_claim() {
        let claims = Claims {
            email: Some("alice@company.com".into()),
            preferred_username: Some("alice".into()),
            ..Default::default()
        };
        assert_eq!(claims.email_like(), Some("alice@company.com"));

        let claims = Claims {
            preferred_username: Some("bob@company.com".into()),
            ..Default::default()
        };
        assert_eq!(claims.email_like(), Some("bob@company.com"));

        let claims = Claims {
            sub: Some("opaque-subject".into()),
            ..Default::default()
        };
        assert_eq!(claims.email_like(), None);
    }
}
