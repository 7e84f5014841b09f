/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Tom Config Module
//!
//! Common configuration framework for the Tom crates.
//!
//! # Variable Naming Convention
//!
//! - Struct fields use snake_case (e.g. `redis`, `log_level`)
//! - Environment variables use SCREAMING_SNAKE_CASE prefixed with "TOM__"
//!   (e.g. `TOM__REDIS__HOST`, `TOM__CONTROLLER__PORT`)
//! - Configuration file keys use snake_case (e.g. `redis.host`)
//!
//! # Configuration Overriding
//!
//! Values are loaded and overridden in the following order (later sources
//! take precedence):
//!
//! 1. Default values from the embedded `default.toml` file
//! 2. Values from an optional external configuration file (if provided)
//! 3. Environment variables
//!
//! Both process roles (controller, worker) deserialize the same `Settings`
//! document and read the sections they need.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::BTreeMap;

// Include the default settings file as a string constant
const DEFAULT_SETTINGS: &str = include_str!("../default.toml");

/// Represents the main settings structure for the application
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Redis transport configuration
    pub redis: Redis,
    /// Logging configuration
    pub log: Log,
    /// Controller configuration
    pub controller: Controller,
    /// Response cache configuration
    pub cache: Cache,
    /// Worker configuration
    pub worker: Worker,
}

/// Redis connection settings, shared by both roles.
#[derive(Debug, Deserialize, Clone)]
pub struct Redis {
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Legacy token auth: password for the default user.
    pub auth_token: Option<String>,
    pub tls: bool,
}

impl Redis {
    /// Builds the connection URL the `redis` crate understands.
    ///
    /// Token auth uses the default user with an empty username, so the ':'
    /// is included even when no username is configured.
    pub fn url(&self) -> String {
        let scheme = if self.tls { "rediss" } else { "redis" };
        let password = self.password.as_deref().or(self.auth_token.as_deref());
        let auth = match password {
            Some(password) => format!("{}:{}@", self.username.as_deref().unwrap_or(""), password),
            None => String::new(),
        };
        format!(
            "{}://{}{}:{}/{}",
            scheme, auth, self.host, self.port, self.db
        )
    }
}

/// Represents the logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Log {
    /// Log level (e.g., "info", "debug", "warn", "error")
    pub level: String,
    /// Log output format: "text" or "json"
    pub format: String,
}

/// A JWT provider entry, validated via OIDC discovery.
#[derive(Debug, Deserialize, Clone)]
pub struct JwtProvider {
    /// Provider kind: "duo", "google" or "entra".
    pub kind: String,
    pub discovery_url: String,
    pub client_id: String,
    /// Accepted audiences; defaults to the client id.
    pub audience: Option<Vec<String>>,
    /// Entra tenant id, when applicable.
    pub tenant_id: Option<String>,
}

/// Represents the controller configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Controller {
    pub host: String,
    pub port: u16,
    /// Inventory plugin selection: "yaml" or "netbox".
    pub inventory_type: String,
    pub inventory_file: String,
    /// Process-wide inventory filter (field name to case-insensitive regex).
    /// ANDed with whatever filter a request supplies; a request's named
    /// filter replaces its inline filters but never this one.
    #[serde(default)]
    pub inventory_filter: BTreeMap<String, String>,
    pub netbox_url: Option<String>,
    pub netbox_token: Option<String>,
    /// Authentication mode: "none", "api_key", "jwt" or "hybrid".
    pub auth_mode: String,
    /// API keys in "key:user" form.
    pub api_keys: Vec<String>,
    /// Headers inspected for API keys, in order.
    pub api_key_headers: Vec<String>,
    pub jwt_providers: Vec<JwtProvider>,
    pub jwt_require_https: bool,
    pub jwt_leeway_s: u64,
    pub allowed_users: Vec<String>,
    pub allowed_domains: Vec<String>,
    pub allowed_user_regex: Vec<String>,
    pub textfsm_template_dir: String,
    pub ttp_template_dir: String,
    /// Interval for the stalled-job supervisor sweep.
    pub sweep_interval_s: u64,
}

impl Controller {
    /// API keys split into (key, user) pairs; malformed entries are dropped.
    pub fn api_key_users(&self) -> Vec<(String, String)> {
        self.api_keys
            .iter()
            .filter_map(|entry| {
                entry
                    .split_once(':')
                    .map(|(key, user)| (key.to_string(), user.to_string()))
            })
            .collect()
    }
}

/// Represents the response cache configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Cache {
    pub enabled: bool,
    pub default_ttl: u64,
    pub max_ttl: u64,
    pub key_prefix: String,
}

/// Represents the worker configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Worker {
    /// Credential plugin selection: "yaml" or "vault".
    pub credential_plugin: String,
    pub credential_file: String,
    pub vault_addr: Option<String>,
    pub vault_token: Option<String>,
    pub vault_mount: String,
    /// ACTIVE jobs whose heartbeat is older than this are requeued.
    pub worker_liveness_s: u64,
    pub lease_ttl_s: u64,
    pub shutdown_grace_s: u64,
    pub max_concurrent_jobs: usize,
    pub fetch_timeout_s: u64,
    pub heartbeat_interval_s: u64,
    /// Health/metrics HTTP port; disabled when unset.
    pub health_port: Option<u16>,
}

impl Settings {
    /// Creates a new `Settings` instance
    ///
    /// # Arguments
    ///
    /// * `file` - An optional path to a configuration file
    ///
    /// # Returns
    ///
    /// Returns a `Result` containing the `Settings` instance or a `ConfigError`
    pub fn new(file: Option<String>) -> Result<Self, ConfigError> {
        // Start with default settings from the embedded TOML file
        let mut s = Config::builder()
            .add_source(File::from_str(DEFAULT_SETTINGS, config::FileFormat::Toml));

        // If a configuration file is provided, add it as a source
        s = match file {
            Some(x) => s.add_source(File::with_name(x.as_str())),
            None => s,
        };

        // Add environment variables as a source, prefixed with "TOM" and using "__" as a separator
        s = s.add_source(Environment::with_prefix("TOM").separator("__"));

        // Build the configuration
        let settings = s.build()?;

        // Deserialize the configuration into a Settings instance
        settings.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default_values() {
        let settings = Settings::new(None).unwrap();

        assert_eq!(settings.redis.host, "localhost");
        assert_eq!(settings.redis.port, 6379);
        assert_eq!(settings.controller.port, 8020);
        assert_eq!(settings.controller.auth_mode, "none");
        assert!(settings.controller.inventory_filter.is_empty());
        assert_eq!(settings.cache.max_ttl, 3600);
        assert_eq!(settings.worker.credential_plugin, "yaml");
        assert_eq!(settings.worker.lease_ttl_s, 120);
    }

    #[test]
    fn test_redis_url_without_auth() {
        let settings = Settings::new(None).unwrap();
        assert_eq!(settings.redis.url(), "redis://localhost:6379/0");
    }

    #[test]
    fn test_redis_url_with_token_auth() {
        let mut settings = Settings::new(None).unwrap();
        settings.redis.auth_token = Some("s3cret".into());
        // Token auth is the default user with an empty username
        assert_eq!(settings.redis.url(), "redis://:s3cret@localhost:6379/0");

        settings.redis.username = Some("tom".into());
        settings.redis.password = Some("p".into());
        settings.redis.tls = true;
        assert_eq!(settings.redis.url(), "rediss://tom:p@localhost:6379/0");
    }

    #[test]
    fn test_api_key_users_parsing() {
        let mut settings = Settings::new(None).unwrap();
        settings.controller.api_keys = vec![
            "abc123:alice".into(),
            "def456:bob".into(),
            "malformed-entry".into(),
        ];
        let pairs = settings.controller.api_key_users();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0], ("abc123".to_string(), "alice".to_string()));
    }
}
