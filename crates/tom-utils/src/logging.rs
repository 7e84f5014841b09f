/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Tom Logging Module
//!
//! Tracing initialization shared by the controller and worker binaries.
//! The level comes from `RUST_LOG` when set, otherwise from the configured
//! log level; output is a text or JSON fmt layer.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Error type for logging initialization
#[derive(Debug)]
pub enum LoggingError {
    /// Failed to set the global subscriber
    SubscriberError(String),
}

impl std::fmt::Display for LoggingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoggingError::SubscriberError(e) => write!(f, "Subscriber error: {}", e),
        }
    }
}

impl std::error::Error for LoggingError {}

/// Initialize the tracing subscriber.
///
/// # Arguments
/// * `log_level` - Log level filter string (e.g., "info", "debug")
/// * `log_format` - Log format ("text" or "json")
pub fn init(log_level: &str, log_format: &str) -> Result<(), LoggingError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if log_format.eq_ignore_ascii_case("json") {
        subscriber
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| LoggingError::SubscriberError(e.to_string()))?;
    } else {
        subscriber
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| LoggingError::SubscriberError(e.to_string()))?;
    }

    Ok(())
}

/// Re-export tracing macros for convenience
pub mod prelude {
    pub use tracing::{debug, error, info, trace, warn};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent_enough_for_tests() {
        // A second init fails because a global subscriber is already set;
        // the first call (whichever test wins) must succeed.
        let first = init("info", "text");
        let second = init("debug", "json");
        assert!(first.is_ok() || second.is_err());
    }
}
