/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Secret-vault credential store (KV v2 HTTP API).
//!
//! A credential id maps to a secret at `<mount>/data/<id>` holding
//! `username` and `password` keys. The vault token comes from configuration
//! and is sent as a request header, never logged.

use crate::credentials::{CredentialError, CredentialStore};
use async_trait::async_trait;
use serde::Deserialize;
use tom_models::Credential;
use tom_utils::Settings;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct KvReadResponse {
    data: KvReadOuter,
}

#[derive(Debug, Deserialize)]
struct KvReadOuter {
    data: KvPair,
}

#[derive(Debug, Deserialize)]
struct KvPair {
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct KvListResponse {
    data: KvListKeys,
}

#[derive(Debug, Deserialize)]
struct KvListKeys {
    keys: Vec<String>,
}

pub struct VaultCredentialStore {
    http: reqwest::Client,
    addr: String,
    token: String,
    mount: String,
}

impl VaultCredentialStore {
    pub fn new(settings: &Settings) -> Result<Self, CredentialError> {
        let addr = settings
            .worker
            .vault_addr
            .clone()
            .ok_or_else(|| CredentialError::Backend("vault_addr is not configured".into()))?;
        let token = settings
            .worker
            .vault_token
            .clone()
            .ok_or_else(|| CredentialError::Backend("vault_token is not configured".into()))?;
        Ok(Self {
            http: reqwest::Client::new(),
            addr: addr.trim_end_matches('/').to_string(),
            token,
            mount: settings.worker.vault_mount.clone(),
        })
    }
}

#[async_trait]
impl CredentialStore for VaultCredentialStore {
    async fn get(&self, credential_id: &str) -> Result<Credential, CredentialError> {
        let url = format!("{}/v1/{}/data/{}", self.addr, self.mount, credential_id);
        debug!(credential_id, "reading credential from vault");

        let response = self
            .http
            .get(&url)
            .header("X-Vault-Token", &self.token)
            .send()
            .await
            .map_err(|e| CredentialError::Backend(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(CredentialError::NotFound(credential_id.to_string()));
        }
        let body: KvReadResponse = response
            .error_for_status()
            .map_err(|e| CredentialError::Backend(e.to_string()))?
            .json()
            .await
            .map_err(|e| CredentialError::Backend(format!("malformed vault response: {}", e)))?;

        Ok(Credential::new(body.data.data.username, body.data.data.password))
    }

    async fn list_ids(&self) -> Result<Vec<String>, CredentialError> {
        let url = format!("{}/v1/{}/metadata?list=true", self.addr, self.mount);
        let body: KvListResponse = self
            .http
            .get(&url)
            .header("X-Vault-Token", &self.token)
            .send()
            .await
            .map_err(|e| CredentialError::Backend(e.to_string()))?
            .error_for_status()
            .map_err(|e| CredentialError::Backend(e.to_string()))?
            .json()
            .await
            .map_err(|e| CredentialError::Backend(format!("malformed vault response: {}", e)))?;
        Ok(body.data.keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kv_v2_response_shapes_deserialize() {
        let read: KvReadResponse = serde_json::from_str(
            r#"{"data": {"data": {"username": "admin", "password": "pw"}, "metadata": {"version": 2}}}"#,
        )
        .unwrap();
        assert_eq!(read.data.data.username, "admin");

        let list: KvListResponse =
            serde_json::from_str(r#"{"data": {"keys": ["lab", "backup"]}}"#).unwrap();
        assert_eq!(list.data.keys.len(), 2);
    }
}
