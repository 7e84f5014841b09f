/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Tom Worker
//!
//! The executing half of the Tom broker: pulls jobs off the shared queue,
//! resolves credentials through the configured plugin, takes the per-device
//! lease, drives the SSH transport, feeds the response cache and reports
//! results back through the store.

pub mod adapters;
pub mod credentials;
pub mod executor;
pub mod metrics;
pub mod runner;
