/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Transport adapters.
//!
//! Two SSH families sit behind one capability set: the blocking libssh2
//! family (driven through `spawn_blocking`) and the native async family.
//! A driver profile keyed on the vendor/OS string supplies the session
//! preamble (pager off) and the error banners that mark a command as
//! rejected by the device.

pub mod russh;
pub mod ssh2;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tom_models::{AdapterKind, Credential, ErrorKind, RetryHint};

#[derive(Debug, Error)]
pub enum AdapterError {
    /// Hostname did not resolve.
    #[error("cannot resolve host: {0}")]
    Resolve(String),
    /// Connection-level failure (TCP, handshake, channel).
    #[error("transport error: {0}")]
    Transport(String),
    /// The device rejected the credentials.
    #[error("authentication rejected: {0}")]
    Auth(String),
    /// An operation exceeded its timeout.
    #[error("timed out: {0}")]
    Timeout(String),
    /// The device's error banner flagged the command as invalid.
    #[error("command rejected by device: {0}")]
    CommandRejected(String),
}

impl AdapterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AdapterError::Auth(_) => ErrorKind::AuthFailure,
            AdapterError::Timeout(_) => ErrorKind::TimeoutError,
            _ => ErrorKind::TransportError,
        }
    }

    pub fn retry_hint(&self) -> RetryHint {
        match self {
            // Hard denials and bad commands will not improve with retries.
            AdapterError::Auth(_) | AdapterError::Resolve(_) | AdapterError::CommandRejected(_) => {
                RetryHint::Fatal
            }
            AdapterError::Transport(_) | AdapterError::Timeout(_) => RetryHint::Transient,
        }
    }
}

/// Connection parameters handed to an adapter.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub host: String,
    pub port: u16,
    pub driver: String,
    pub options: BTreeMap<String, serde_json::Value>,
}

/// An open device session. `close` is idempotent.
#[async_trait]
pub trait Session: Send {
    async fn send(&mut self, command: &str, timeout: Duration) -> Result<String, AdapterError>;
    async fn close(&mut self);
}

/// A transport family.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(
        &self,
        spec: &SessionSpec,
        credential: &Credential,
    ) -> Result<Box<dyn Session>, AdapterError>;
}

/// Constructs the adapter for a transport family.
pub fn build_adapter(kind: AdapterKind) -> Box<dyn Transport> {
    match kind {
        AdapterKind::Ssh2 => Box::new(ssh2::Ssh2Transport),
        AdapterKind::Russh => Box::new(russh::RusshTransport),
    }
}

/// Per-platform session behavior.
#[derive(Debug, Clone, Copy)]
pub struct DriverProfile {
    pub key: &'static str,
    /// Commands issued right after login, before any job command.
    pub preamble: &'static [&'static str],
    /// Output prefixes that mark a command as rejected by the device.
    pub error_markers: &'static [&'static str],
}

const DRIVERS: &[DriverProfile] = &[
    DriverProfile {
        key: "cisco_ios",
        preamble: &["terminal length 0", "terminal width 511"],
        error_markers: &["% Invalid input", "% Incomplete command", "% Ambiguous command"],
    },
    DriverProfile {
        key: "cisco_iosxe",
        preamble: &["terminal length 0", "terminal width 511"],
        error_markers: &["% Invalid input", "% Incomplete command", "% Ambiguous command"],
    },
    DriverProfile {
        key: "cisco_nxos",
        preamble: &["terminal length 0"],
        error_markers: &["% Invalid command", "ERROR: "],
    },
    DriverProfile {
        key: "cisco_iosxr",
        preamble: &["terminal length 0", "terminal width 511"],
        error_markers: &["% Invalid input", "% Incomplete command"],
    },
    DriverProfile {
        key: "arista_eos",
        preamble: &["terminal length 0", "terminal width 32767"],
        error_markers: &["% Invalid input", "% Incomplete command"],
    },
    DriverProfile {
        key: "juniper_junos",
        preamble: &["set cli screen-length 0", "set cli screen-width 511"],
        error_markers: &["syntax error", "unknown command"],
    },
];

const GENERIC_DRIVER: DriverProfile = DriverProfile {
    key: "generic",
    preamble: &[],
    error_markers: &[],
};

/// Profile for a driver key; unknown keys get the bare generic profile.
pub fn driver_profile(key: &str) -> DriverProfile {
    DRIVERS
        .iter()
        .find(|d| d.key.eq_ignore_ascii_case(key))
        .copied()
        .unwrap_or(GENERIC_DRIVER)
}

/// Checks output against the driver's error banners.
pub fn check_output(profile: &DriverProfile, command: &str, output: &str) -> Result<(), AdapterError> {
    for marker in profile.error_markers {
        if output.contains(marker) {
            return Err(AdapterError::CommandRejected(format!(
                "'{}': {}",
                command,
                output.lines().find(|l| l.contains(marker)).unwrap_or(marker)
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_drivers_have_pager_preambles() {
        assert!(driver_profile("cisco_ios")
            .preamble
            .contains(&"terminal length 0"));
        assert!(driver_profile("juniper_junos")
            .preamble
            .contains(&"set cli screen-length 0"));
    }

    #[test]
    fn unknown_drivers_fall_back_to_generic() {
        let profile = driver_profile("mystery_os");
        assert_eq!(profile.key, "generic");
        assert!(profile.preamble.is_empty());
    }

    #[test]
    fn error_banners_reject_commands_fatally() {
        let profile = driver_profile("cisco_ios");
        let err = check_output(
            &profile,
            "show versoin",
            "% Invalid input detected at '^' marker.",
        )
        .unwrap_err();
        assert_eq!(err.retry_hint(), RetryHint::Fatal);
        assert_eq!(err.kind(), ErrorKind::TransportError);
    }

    #[test]
    fn clean_output_passes() {
        let profile = driver_profile("cisco_ios");
        assert!(check_output(&profile, "show version", "Cisco IOS Software...").is_ok());
    }

    #[test]
    fn classification_follows_the_taxonomy() {
        assert_eq!(
            AdapterError::Auth("denied".into()).retry_hint(),
            RetryHint::Fatal
        );
        assert_eq!(
            AdapterError::Resolve("no such host".into()).retry_hint(),
            RetryHint::Fatal
        );
        assert_eq!(
            AdapterError::Transport("reset".into()).retry_hint(),
            RetryHint::Transient
        );
        assert_eq!(
            AdapterError::Timeout("read".into()).retry_hint(),
            RetryHint::Transient
        );
        assert_eq!(AdapterError::Auth("x".into()).kind(), ErrorKind::AuthFailure);
        assert_eq!(
            AdapterError::Timeout("x".into()).kind(),
            ErrorKind::TimeoutError
        );
    }
}
