/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Tom Store
//!
//! Redis-backed shared state for the Tom broker: the job queue and lifecycle,
//! the response cache, per-device leases and operational telemetry. Redis is
//! the single source of truth for job state — neither process role keeps a
//! mirror beyond transient request scope.
//!
//! The [`Store`] hands out per-concern accessors (`jobs()`, `cache()`,
//! `leases()`, `ops()`); each accessor borrows the store and multiplexes over
//! one shared connection manager.

pub mod cache;
pub mod jobs;
pub mod keys;
pub mod leases;
pub mod ops;

use redis::aio::ConnectionManager;
use thiserror::Error;
use tom_utils::Settings;

/// Errors produced by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("envelope encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("job {0} not found")]
    JobNotFound(String),
    #[error("illegal transition for job {job_id}: {from} -> {to}")]
    IllegalTransition {
        job_id: String,
        from: &'static str,
        to: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Shared access to the Redis-backed state.
///
/// Cloning is cheap; the connection manager multiplexes a single connection
/// and reconnects on failure.
#[derive(Clone)]
pub struct Store {
    pub(crate) conn: ConnectionManager,
    pub(crate) settings: Settings,
}

impl Store {
    /// Connects to Redis using the configured URL.
    pub async fn connect(settings: &Settings) -> Result<Self> {
        let client = redis::Client::open(settings.redis.url())?;
        let conn = client.get_connection_manager().await?;
        Ok(Self {
            conn,
            settings: settings.clone(),
        })
    }

    pub fn jobs(&self) -> jobs::JobsStore<'_> {
        jobs::JobsStore { store: self }
    }

    pub fn cache(&self) -> cache::CacheStore<'_> {
        cache::CacheStore { store: self }
    }

    pub fn leases(&self) -> leases::LeaseStore<'_> {
        leases::LeaseStore { store: self }
    }

    pub fn ops(&self) -> ops::OpsStore<'_> {
        ops::OpsStore { store: self }
    }
}
