/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Credential plugins.
//!
//! A credential store resolves credential ids into username/password pairs
//! at execution time. Plugins are compiled in and selected by name at
//! startup. Secret values exist only in worker memory while a transport
//! session is open; they are never logged, cached or put on the queue.

pub mod vault;
pub mod yaml;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tom_models::Credential;
use tom_utils::Settings;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential '{0}' not found")]
    NotFound(String),
    #[error("credential backend error: {0}")]
    Backend(String),
}

/// Capability set every credential plugin provides.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Resolves a credential id into a secret pair.
    async fn get(&self, credential_id: &str) -> Result<Credential, CredentialError>;

    /// Lists known credential ids. Names only; never values.
    async fn list_ids(&self) -> Result<Vec<String>, CredentialError>;
}

/// Constructs the configured credential plugin.
pub fn build_credential_store(
    settings: &Settings,
) -> Result<Arc<dyn CredentialStore>, CredentialError> {
    match settings.worker.credential_plugin.as_str() {
        "yaml" => Ok(Arc::new(yaml::YamlCredentialStore::load(
            &settings.worker.credential_file,
        )?)),
        "vault" => Ok(Arc::new(vault::VaultCredentialStore::new(settings)?)),
        other => Err(CredentialError::Backend(format!(
            "unknown credential plugin '{}'",
            other
        ))),
    }
}
