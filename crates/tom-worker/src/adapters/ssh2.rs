/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Blocking transport family, backed by libssh2.
//!
//! Every libssh2 call blocks, so connection setup and each command run
//! inside `spawn_blocking`; the async executor only ever awaits the join
//! handle. One exec channel is opened per command, which keeps prompt
//! handling out of the picture entirely.

use crate::adapters::{
    check_output, driver_profile, AdapterError, Session, SessionSpec, Transport,
};
use async_trait::async_trait;
use ssh2::Session as RawSession;
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tom_models::Credential;
use tracing::debug;

/// Connect-phase timeout; command timeouts are per-send.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

pub struct Ssh2Transport;

pub struct Ssh2Session {
    raw: Arc<Mutex<RawSession>>,
    spec: SessionSpec,
    closed: bool,
}

fn connect_blocking(
    spec: &SessionSpec,
    credential: &Credential,
) -> Result<RawSession, AdapterError> {
    let addr = format!("{}:{}", spec.host, spec.port)
        .to_socket_addrs()
        .map_err(|e| AdapterError::Resolve(format!("{}: {}", spec.host, e)))?
        .next()
        .ok_or_else(|| AdapterError::Resolve(format!("{} resolved to nothing", spec.host)))?;

    let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
        .map_err(|e| AdapterError::Transport(format!("connect {}: {}", addr, e)))?;

    let mut session =
        RawSession::new().map_err(|e| AdapterError::Transport(e.to_string()))?;
    session.set_tcp_stream(stream);
    session
        .handshake()
        .map_err(|e| AdapterError::Transport(format!("handshake: {}", e)))?;
    session
        .userauth_password(&credential.username, &credential.password)
        .map_err(|e| AdapterError::Auth(e.to_string()))?;
    if !session.authenticated() {
        return Err(AdapterError::Auth("authentication incomplete".into()));
    }
    Ok(session)
}

fn exec_blocking(
    raw: &Arc<Mutex<RawSession>>,
    command: &str,
    timeout: Duration,
) -> Result<String, AdapterError> {
    let session = raw.lock().expect("ssh2 session lock poisoned");
    session.set_timeout(timeout.as_millis() as u32);

    let mut channel = session
        .channel_session()
        .map_err(|e| AdapterError::Transport(format!("channel: {}", e)))?;
    channel
        .exec(command)
        .map_err(|e| AdapterError::Transport(format!("exec: {}", e)))?;

    let mut output = String::new();
    channel.read_to_string(&mut output).map_err(|e| {
        if e.kind() == std::io::ErrorKind::TimedOut || e.kind() == std::io::ErrorKind::WouldBlock {
            AdapterError::Timeout(format!("reading output of '{}'", command))
        } else {
            AdapterError::Transport(format!("read: {}", e))
        }
    })?;
    channel.wait_close().ok();
    Ok(output)
}

#[async_trait]
impl Transport for Ssh2Transport {
    async fn open(
        &self,
        spec: &SessionSpec,
        credential: &Credential,
    ) -> Result<Box<dyn Session>, AdapterError> {
        let spec_owned = spec.clone();
        let credential = credential.clone();
        let raw = tokio::task::spawn_blocking(move || connect_blocking(&spec_owned, &credential))
            .await
            .map_err(|e| AdapterError::Transport(format!("join: {}", e)))??;
        debug!(host = %spec.host, "ssh2 session established");

        let mut session = Ssh2Session {
            raw: Arc::new(Mutex::new(raw)),
            spec: spec.clone(),
            closed: false,
        };

        // Pager off before any job command.
        let profile = driver_profile(&spec.driver);
        for command in profile.preamble {
            session.send(command, CONNECT_TIMEOUT).await?;
        }
        Ok(Box::new(session))
    }
}

#[async_trait]
impl Session for Ssh2Session {
    async fn send(&mut self, command: &str, timeout: Duration) -> Result<String, AdapterError> {
        let raw = Arc::clone(&self.raw);
        let command_owned = command.to_string();
        let output =
            tokio::task::spawn_blocking(move || exec_blocking(&raw, &command_owned, timeout))
                .await
                .map_err(|e| AdapterError::Transport(format!("join: {}", e)))??;

        let profile = driver_profile(&self.spec.driver);
        check_output(&profile, command, &output)?;
        Ok(output)
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let raw = Arc::clone(&self.raw);
        let _ = tokio::task::spawn_blocking(move || {
            let session = raw.lock().expect("ssh2 session lock poisoned");
            session.disconnect(None, "shutting down", None).ok();
        })
        .await;
        debug!(host = %self.spec.host, "ssh2 session closed");
    }
}
