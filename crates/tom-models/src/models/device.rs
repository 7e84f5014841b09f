/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Device Model
//!
//! Resolved connection descriptors produced by inventory plugins and the
//! credential material workers hand to transport adapters. Descriptors are
//! produced on demand and never persisted; credentials live only in worker
//! memory for the duration of a transport session.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The two supported SSH transport families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    /// Blocking libssh2 sessions driven off the async runtime.
    Ssh2,
    /// Native async SSH sessions.
    Russh,
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterKind::Ssh2 => f.write_str("ssh2"),
            AdapterKind::Russh => f.write_str("russh"),
        }
    }
}

fn default_port() -> u16 {
    22
}

/// Resolved connection information for one device.
///
/// Yielded by the active inventory plugin; a device name that resolves at all
/// must resolve completely (a missing host is an inventory error, not a
/// descriptor with a blank field).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// DNS name or IP address.
    pub host: String,
    /// SSH port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Transport family to connect with.
    pub adapter: AdapterKind,
    /// Vendor/OS key routed to the adapter (e.g. "cisco_ios").
    pub adapter_driver: String,
    /// Credential store reference resolved by the worker at execution time.
    pub credential_id: String,
    /// Free-form options passed through to the transport.
    #[serde(default)]
    pub adapter_options: BTreeMap<String, serde_json::Value>,
}

impl DeviceDescriptor {
    /// The lease key for this device. Port is included so two managed
    /// endpoints behind one bastion host gate independently.
    pub fn device_key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A username/password pair handed to a transport adapter.
///
/// The Debug representation redacts the password so credential values cannot
/// leak through error context or log fields.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How the worker obtains the credential for a job.
///
/// `Stored` is the normal path: the worker's credential plugin resolves the
/// id at execution time, so no secret transits the queue. `Inline` is only
/// produced when the caller explicitly supplied a username/password pair.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialRef {
    Stored { credential_id: String },
    Inline { username: String, password: String },
}

impl fmt::Debug for CredentialRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialRef::Stored { credential_id } => f
                .debug_struct("Stored")
                .field("credential_id", credential_id)
                .finish(),
            CredentialRef::Inline { username, .. } => f
                .debug_struct("Inline")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_defaults_port_22() {
        let yaml = r#"
host: 10.0.0.1
adapter: ssh2
adapter_driver: cisco_ios
credential_id: lab
"#;
        let d: DeviceDescriptor = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(d.port, 22);
        assert_eq!(d.adapter, AdapterKind::Ssh2);
        assert_eq!(d.device_key(), "10.0.0.1:22");
    }

    #[test]
    fn credential_debug_redacts_password() {
        let cred = Credential::new("admin", "hunter2");
        let rendered = format!("{:?}", cred);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn inline_ref_debug_redacts_password() {
        let r = CredentialRef::Inline {
            username: "admin".into(),
            password: "hunter2".into(),
        };
        let rendered = format!("{:?}", r);
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn credential_ref_is_tagged() {
        let r = CredentialRef::Stored {
            credential_id: "lab".into(),
        };
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["type"], "stored");
        assert_eq!(json["credential_id"], "lab");
    }
}
