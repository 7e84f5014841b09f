/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! File-backed credential store.
//!
//! ```yaml
//! lab:
//!   username: admin
//!   password: changeme
//! ```

use crate::credentials::{CredentialError, CredentialStore};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tom_models::Credential;
use tracing::info;

pub struct YamlCredentialStore {
    entries: BTreeMap<String, Credential>,
}

impl YamlCredentialStore {
    pub fn load(path: &str) -> Result<Self, CredentialError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CredentialError::Backend(format!("cannot read {}: {}", path, e)))?;
        let store = Self::from_str(&raw)?;
        info!(path, entries = store.entries.len(), "yaml credential store loaded");
        Ok(store)
    }

    pub fn from_str(raw: &str) -> Result<Self, CredentialError> {
        let entries: BTreeMap<String, Credential> = serde_yaml::from_str(raw)
            .map_err(|e| CredentialError::Backend(format!("invalid credential yaml: {}", e)))?;
        Ok(Self { entries })
    }
}

#[async_trait]
impl CredentialStore for YamlCredentialStore {
    async fn get(&self, credential_id: &str) -> Result<Credential, CredentialError> {
        self.entries
            .get(credential_id)
            .cloned()
            .ok_or_else(|| CredentialError::NotFound(credential_id.to_string()))
    }

    async fn list_ids(&self) -> Result<Vec<String>, CredentialError> {
        Ok(self.entries.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CREDENTIALS: &str = "\
lab:
  username: admin
  password: changeme
backup:
  username: svc-backup
  password: s3cret
";

    #[tokio::test]
    async fn resolves_pairs_by_id() {
        let store = YamlCredentialStore::from_str(CREDENTIALS).unwrap();
        let cred = store.get("lab").await.unwrap();
        assert_eq!(cred.username, "admin");
        assert_eq!(cred.password, "changeme");
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let store = YamlCredentialStore::from_str(CREDENTIALS).unwrap();
        assert!(matches!(
            store.get("nope").await,
            Err(CredentialError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn listing_exposes_names_only() {
        let store = YamlCredentialStore::from_str(CREDENTIALS).unwrap();
        let ids = store.list_ids().await.unwrap();
        assert_eq!(ids, vec!["backup".to_string(), "lab".to_string()]);
    }
}
