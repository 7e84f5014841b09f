/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! The closed set of supported identity providers.
//!
//! Providers differ only in which claims they require and which claim names
//! the user identifier prefers; everything else (discovery, JWKS, signature
//! and audience checks) is shared by the validator.

use crate::auth::claims::Claims;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown JWT provider kind '{0}'")]
    UnknownKind(String),
    #[error("invalid claims: {0}")]
    InvalidClaims(String),
}

/// Supported provider kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Duo,
    Google,
    Entra,
}

impl ProviderKind {
    /// Factory keyed on the configuration string. "azure" and "azuread" are
    /// accepted aliases for Entra.
    pub fn from_config(kind: &str) -> Result<Self, ProviderError> {
        match kind.to_lowercase().as_str() {
            "duo" => Ok(ProviderKind::Duo),
            "google" => Ok(ProviderKind::Google),
            "entra" | "azure" | "azuread" => Ok(ProviderKind::Entra),
            other => Err(ProviderError::UnknownKind(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::Duo => "duo",
            ProviderKind::Google => "google",
            ProviderKind::Entra => "entra",
        }
    }

    /// Provider-specific claim checks, applied after signature validation.
    pub fn validate_claims(
        &self,
        claims: &Claims,
        tenant_id: Option<&str>,
    ) -> Result<(), ProviderError> {
        match self {
            // Duo access tokens carry only `sub`; id tokens add identity
            // claims. Both shapes are acceptable.
            ProviderKind::Duo => Ok(()),
            ProviderKind::Google => {
                if claims.email.is_none() {
                    return Err(ProviderError::InvalidClaims(
                        "missing email claim in Google token".into(),
                    ));
                }
                if claims.email_verified == Some(false) {
                    tracing::warn!(
                        "email not verified for Google user: {}",
                        claims.email.as_deref().unwrap_or("<unknown>")
                    );
                }
                Ok(())
            }
            ProviderKind::Entra => {
                if let (Some(expected), Some(actual)) = (tenant_id, claims.tid.as_deref()) {
                    if expected != actual {
                        return Err(ProviderError::InvalidClaims(format!(
                            "token tenant {} does not match configured tenant {}",
                            actual, expected
                        )));
                    }
                }
                Ok(())
            }
        }
    }

    /// Canonical user identifier for policy evaluation and logging.
    pub fn user_identifier(&self, claims: &Claims) -> String {
        let candidates: &[Option<&str>] = match self {
            ProviderKind::Duo => &[
                claims.preferred_username.as_deref(),
                claims.email.as_deref(),
            ],
            ProviderKind::Google => &[claims.email.as_deref()],
            ProviderKind::Entra => &[
                claims.preferred_username.as_deref(),
                claims.upn.as_deref(),
                claims.email.as_deref(),
            ],
        };
        candidates
            .iter()
            .flatten()
            .next()
            .map(|s| s.to_string())
            .or_else(|| claims.sub.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_accepts_aliases() {
        assert_eq!(ProviderKind::from_config("duo").unwrap(), ProviderKind::Duo);
        assert_eq!(
            ProviderKind::from_config("AzureAD").unwrap(),
            ProviderKind::Entra
        );
        assert!(ProviderKind::from_config("okta").is_err());
    }

    #[test]
    fn google_requires_an_email_claim() {
        let claims = Claims {
            sub: Some("1234".into()),
            ..Default::default()
        };
        assert!(ProviderKind::Google.validate_claims(&claims, None).is_err());

        let claims = Claims {
            email: Some("alice@company.com".into()),
            ..Default::default()
        };
        assert!(ProviderKind::Google.validate_claims(&claims, None).is_ok());
    }

    #[test]
    fn entra_checks_the_tenant_when_configured() {
        let claims = Claims {
            tid: Some("tenant-b".into()),
            ..Default::default()
        };
        assert!(ProviderKind::Entra
            .validate_claims(&claims, Some("tenant-a"))
            .is_err());
        assert!(ProviderKind::Entra
            .validate_claims(&claims, Some("tenant-b"))
            .is_ok());
        assert!(ProviderKind::Entra.validate_claims(&claims, None).is_ok());
    }

    #[test]
    fn user_identifier_falls_back_to_sub() {
        let claims = Claims {
            sub: Some("opaque".into()),
            ..Default::default()
        };
        assert_eq!(ProviderKind::Duo.user_identifier(&claims), "opaque");

        let claims = Claims {
            upn: Some("bob@corp.example".into()),
            ..Default::default()
        };
        assert_eq!(
            ProviderKind::Entra.user_identifier(&claims),
            "bob@corp.example"
        );
    }
}
