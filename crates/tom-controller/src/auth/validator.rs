/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! JWT validation against an OIDC provider.
//!
//! At startup each configured provider is resolved through OIDC discovery
//! (well-known document -> issuer + JWKS URI) and its signing keys are
//! fetched. Incoming tokens are routed to the validator whose issuer matches
//! the token's (unverified) `iss` claim, then verified for signature,
//! audience, expiry (with configured leeway) and provider-specific claims.

use crate::auth::claims::Claims;
use crate::auth::providers::{ProviderError, ProviderKind};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;
use tom_utils::config::JwtProvider;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("OIDC discovery failed: {0}")]
    Discovery(String),
    #[error("JWKS fetch failed: {0}")]
    JwksFetch(String),
    #[error("token is malformed")]
    Malformed,
    #[error("no provider matches token issuer {0:?}")]
    UnknownIssuer(Option<String>),
    #[error("no signing key matches the token's kid")]
    UnknownKey,
    #[error("token validation failed: {0}")]
    Validation(#[from] jsonwebtoken::errors::Error),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// The OIDC well-known document fields Tom consumes.
#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    issuer: String,
    jwks_uri: String,
}

/// One JSON Web Key as served by the provider's JWKS endpoint.
#[derive(Debug, Clone, Deserialize)]
struct Jwk {
    #[serde(default)]
    kid: Option<String>,
    kty: String,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

/// A validated-at-startup provider ready to verify tokens.
pub struct JwtValidator {
    pub kind: ProviderKind,
    pub issuer: String,
    audiences: Vec<String>,
    tenant_id: Option<String>,
    leeway_s: u64,
    keys: Vec<Jwk>,
}

/// Reads the `iss` claim without verifying the signature, to route the token
/// to the right validator. Never trusted for anything else.
pub fn peek_issuer(token: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let value: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    value.get("iss")?.as_str().map(|s| s.to_string())
}

impl JwtValidator {
    /// Resolves a configured provider through OIDC discovery and loads its
    /// signing keys.
    pub async fn discover(
        config: &JwtProvider,
        require_https: bool,
        leeway_s: u64,
        http: &reqwest::Client,
    ) -> Result<Self, JwtError> {
        let kind = ProviderKind::from_config(&config.kind)?;

        if require_https && !config.discovery_url.starts_with("https://") {
            return Err(JwtError::Discovery(format!(
                "discovery URL for {} is not https: {}",
                kind, config.discovery_url
            )));
        }

        let document: DiscoveryDocument = http
            .get(&config.discovery_url)
            .send()
            .await
            .map_err(|e| JwtError::Discovery(e.to_string()))?
            .json()
            .await
            .map_err(|e| JwtError::Discovery(e.to_string()))?;

        let jwks: JwkSet = http
            .get(&document.jwks_uri)
            .send()
            .await
            .map_err(|e| JwtError::JwksFetch(e.to_string()))?
            .json()
            .await
            .map_err(|e| JwtError::JwksFetch(e.to_string()))?;

        let audiences = config
            .audience
            .clone()
            .unwrap_or_else(|| vec![config.client_id.clone()]);

        info!(
            provider = kind.name(),
            issuer = %document.issuer,
            keys = jwks.keys.len(),
            "JWT provider resolved"
        );

        Ok(Self {
            kind,
            issuer: document.issuer,
            audiences,
            tenant_id: config.tenant_id.clone(),
            leeway_s,
            keys: jwks.keys,
        })
    }

    /// Verifies a token and returns its claims plus the canonical user.
    pub fn validate(&self, token: &str) -> Result<(Claims, String), JwtError> {
        let header = decode_header(token).map_err(|_| JwtError::Malformed)?;

        let key = self
            .keys
            .iter()
            .filter(|k| k.kty == "RSA")
            .find(|k| match (&header.kid, &k.kid) {
                (Some(want), Some(have)) => want == have,
                // A provider with a single key may omit kids entirely.
                (None, _) => true,
                (Some(_), None) => false,
            })
            .ok_or(JwtError::UnknownKey)?;

        let (n, e) = match (&key.n, &key.e) {
            (Some(n), Some(e)) => (n, e),
            _ => return Err(JwtError::UnknownKey),
        };
        let decoding_key = DecodingKey::from_rsa_components(n, e)?;

        let mut validation = Validation::new(header.alg);
        if !matches!(header.alg, Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512) {
            // Only RSA signatures are expected from the supported providers.
            validation = Validation::new(Algorithm::RS256);
        }
        validation.leeway = self.leeway_s;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&self.audiences);

        let data = decode::<Claims>(token, &decoding_key, &validation)?;
        let claims = data.claims;

        self.kind
            .validate_claims(&claims, self.tenant_id.as_deref())?;
        let user = self.kind.user_identifier(&claims);
        debug!(provider = self.kind.name(), "token validated");
        Ok((claims, user))
    }
}

/// Routes a token to the validator whose issuer matches and validates it.
pub fn validate_against(
    validators: &[JwtValidator],
    token: &str,
) -> Result<(Claims, String, ProviderKind), JwtError> {
    let issuer = peek_issuer(token);
    let validator = validators
        .iter()
        .find(|v| Some(v.issuer.as_str()) == issuer.as_deref())
        .ok_or_else(|| JwtError::UnknownIssuer(issuer.clone()))?;

    match validator.validate(token) {
        Ok((claims, user)) => Ok((claims, user, validator.kind)),
        Err(e) => {
            warn!(provider = validator.kind.name(), "JWT validation failed: {}", e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peek_issuer_reads_the_unverified_payload() {
        // header/payload/signature, each base64url without padding
        let payload = URL_SAFE_NO_PAD.encode(r#"{"iss":"https://accounts.google.com"}"#);
        let token = format!("eyJhbGciOiJSUzI1NiJ9.{}.sig", payload);
        assert_eq!(
            peek_issuer(&token).as_deref(),
            Some("https://accounts.google.com")
        );
    }

    #[test]
    fn peek_issuer_tolerates_garbage() {
        assert_eq!(peek_issuer("not-a-token"), None);
        assert_eq!(peek_issuer("a.!!!.c"), None);
        let payload = URL_SAFE_NO_PAD.encode(r#"{"sub":"nobody"}"#);
        assert_eq!(peek_issuer(&format!("h.{}.s", payload)), None);
    }

    #[test]
    fn jwk_set_deserializes_google_shaped_documents() {
        let json = r#"{
            "keys": [
                {"kty": "RSA", "kid": "abc", "n": "modulus", "e": "AQAB", "alg": "RS256", "use": "sig"},
                {"kty": "EC", "kid": "def", "crv": "P-256", "x": "x", "y": "y"}
            ]
        }"#;
        let set: JwkSet = serde_json::from_str(json).unwrap();
        assert_eq!(set.keys.len(), 2);
        assert_eq!(set.keys[0].kid.as_deref(), Some("abc"));
        assert!(set.keys[0].n.is_some());
    }
}
