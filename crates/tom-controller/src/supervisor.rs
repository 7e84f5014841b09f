/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Background tasks for the Tom Controller.
//!
//! The supervisor sweep is what turns a dead worker into a retried job
//! instead of a silently lost one: it periodically scans the ACTIVE set for
//! jobs whose liveness heartbeat has expired and pushes them back through
//! the failure path (transient, so the retry budget decides their fate).

use crate::metrics;
use std::time::Duration;
use tokio::time::interval;
use tom_store::Store;
use tracing::{error, info};

/// Configuration for the stalled-job sweep.
pub struct SupervisorConfig {
    /// How often to run the sweep (in seconds).
    pub interval_seconds: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 15,
        }
    }
}

/// Starts the stalled-job supervisor sweep.
///
/// # Arguments
/// * `store` - The shared store
/// * `config` - Configuration for the sweep task
pub fn start_supervisor_sweep(store: Store, config: SupervisorConfig) {
    info!(
        "Starting supervisor sweep (interval: {}s)",
        config.interval_seconds
    );

    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(config.interval_seconds));

        loop {
            ticker.tick().await;

            match store.jobs().sweep_stalled().await {
                Ok(swept) => {
                    if swept > 0 {
                        info!("Reclaimed {} stalled jobs", swept);
                        metrics::JOBS_SWEPT_TOTAL.add(swept as i64);
                    }
                }
                Err(e) => {
                    error!("Supervisor sweep failed: {:?}", e);
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SupervisorConfig::default();
        assert_eq!(config.interval_seconds, 15);
    }
}
