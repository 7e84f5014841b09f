/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Tom Models
//!
//! Shared data model for the Tom network automation broker: job envelopes and
//! their lifecycle, device descriptors, credential references, cache metadata
//! and the error taxonomy spoken between the controller, the workers and the
//! HTTP clients.

pub mod models;

pub use models::cache::{CacheEntry, CacheMeta, CacheStatus};
pub use models::device::{AdapterKind, Credential, CredentialRef, DeviceDescriptor};
pub use models::errors::{ErrorKind, JobError, RetryHint};
pub use models::job::{
    CommandSpec, Job, JobKind, JobMetadata, JobPayload, JobResult, JobStatus, ResultMeta,
};
