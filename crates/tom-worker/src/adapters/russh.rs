/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Async transport family, backed by russh.
//!
//! One exec channel per command; output is drained until the channel closes
//! or the per-command timeout fires. Host keys are accepted as presented —
//! managed-network devices rotate keys too often for pinning to be useful
//! here, and the credential never leaves the session.

use crate::adapters::{
    check_output, driver_profile, AdapterError, Session, SessionSpec, Transport,
};
use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use std::sync::Arc;
use std::time::Duration;
use tom_models::Credential;
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

pub struct RusshTransport;

struct AcceptingHandler;

#[async_trait]
impl client::Handler for AcceptingHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

pub struct RusshSession {
    handle: Option<Handle<AcceptingHandler>>,
    spec: SessionSpec,
}

#[async_trait]
impl Transport for RusshTransport {
    async fn open(
        &self,
        spec: &SessionSpec,
        credential: &Credential,
    ) -> Result<Box<dyn Session>, AdapterError> {
        let config = Arc::new(client::Config::default());
        let address = (spec.host.as_str(), spec.port);

        let connect = client::connect(config, address, AcceptingHandler);
        let mut handle = tokio::time::timeout(CONNECT_TIMEOUT, connect)
            .await
            .map_err(|_| AdapterError::Timeout(format!("connecting to {}", spec.host)))?
            .map_err(|e| AdapterError::Transport(format!("connect {}: {}", spec.host, e)))?;

        let authenticated = handle
            .authenticate_password(&credential.username, &credential.password)
            .await
            .map_err(|e| AdapterError::Transport(format!("auth exchange: {}", e)))?;
        if !authenticated {
            return Err(AdapterError::Auth(format!(
                "password rejected for user '{}'",
                credential.username
            )));
        }
        debug!(host = %spec.host, "russh session established");

        let mut session = RusshSession {
            handle: Some(handle),
            spec: spec.clone(),
        };

        let profile = driver_profile(&spec.driver);
        for command in profile.preamble {
            session.send(command, CONNECT_TIMEOUT).await?;
        }
        Ok(Box::new(session))
    }
}

impl RusshSession {
    async fn exec(&mut self, command: &str, timeout: Duration) -> Result<String, AdapterError> {
        let handle = self
            .handle
            .as_mut()
            .ok_or_else(|| AdapterError::Transport("session already closed".into()))?;

        let mut channel = handle
            .channel_open_session()
            .await
            .map_err(|e| AdapterError::Transport(format!("channel: {}", e)))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| AdapterError::Transport(format!("exec: {}", e)))?;

        let mut output = String::new();
        let drain = async {
            loop {
                match channel.wait().await {
                    Some(ChannelMsg::Data { ref data }) => {
                        output.push_str(&String::from_utf8_lossy(data));
                    }
                    Some(ChannelMsg::ExtendedData { ref data, .. }) => {
                        output.push_str(&String::from_utf8_lossy(data));
                    }
                    Some(ChannelMsg::ExitStatus { .. }) => {}
                    Some(_) => {}
                    None => break,
                }
            }
        };
        tokio::time::timeout(timeout, drain)
            .await
            .map_err(|_| AdapterError::Timeout(format!("reading output of '{}'", command)))?;
        Ok(output)
    }
}

#[async_trait]
impl Session for RusshSession {
    async fn send(&mut self, command: &str, timeout: Duration) -> Result<String, AdapterError> {
        let output = self.exec(command, timeout).await?;
        let profile = driver_profile(&self.spec.driver);
        check_output(&profile, command, &output)?;
        Ok(output)
    }

    async fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle
                .disconnect(Disconnect::ByApplication, "shutting down", "en")
                .await
                .ok();
            debug!(host = %self.spec.host, "russh session closed");
        }
    }
}
