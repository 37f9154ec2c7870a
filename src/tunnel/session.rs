// ABOUTME: One authenticated SSH connection plus its remote-forwarded listener.
// ABOUTME: Forwarded channels arrive through the russh handler and are handed out by accept().

use super::auth::AuthMethods;
use super::error::{Error, Result};
use crate::config::{HostKeyPolicy, HostPort, TunnelConfig};
use russh::client::{self, Config, Handle, Msg};
use russh::keys::known_hosts::{check_known_hosts, check_known_hosts_path};
use russh::keys::ssh_key;
use russh::{Channel, ChannelStream, Disconnect};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Missed keepalives tolerated before the connection is considered dead.
const KEEPALIVE_MAX: usize = 3;

/// Forwarded channels that may wait for `accept` when no connection limit is set.
const DEFAULT_BACKLOG: usize = 1024;

/// A logical connection delivered through the remote listener.
pub type ForwardedStream = ChannelStream<Msg>;

struct Forwarded {
    stream: ForwardedStream,
    originator: String,
}

/// SSH client handler for russh.
pub(crate) struct TunnelHandler {
    host: String,
    port: u16,
    host_keys: HostKeyPolicy,
    incoming: mpsc::Sender<Forwarded>,
}

/// Queue between the russh handler and `accept`, sized by the connection limit.
///
/// With a bounded dispatcher the accept loop stops pulling while all slots are
/// busy, so at most `limit` forwarded channels wait here; further ones are refused.
fn backlog<T>(limit: Option<usize>) -> (mpsc::Sender<T>, mpsc::Receiver<T>) {
    mpsc::channel(limit.unwrap_or(DEFAULT_BACKLOG).max(1))
}

impl TunnelHandler {
    fn new(
        server: &HostPort,
        host_keys: HostKeyPolicy,
        incoming: mpsc::Sender<Forwarded>,
    ) -> Self {
        Self {
            host: server.host().to_string(),
            port: server.port(),
            host_keys,
            incoming,
        }
    }

    fn check_known_hosts(
        &self,
        path: Option<&PathBuf>,
        server_public_key: &ssh_key::PublicKey,
    ) -> bool {
        let check_result = match path {
            Some(path) => check_known_hosts_path(&self.host, self.port, server_public_key, path),
            None => check_known_hosts(&self.host, self.port, server_public_key),
        };

        match check_result {
            Ok(true) => true,
            Ok(false) => {
                tracing::warn!(
                    "Host key for {}:{} not found in known_hosts",
                    self.host,
                    self.port
                );
                false
            }
            Err(russh::keys::Error::KeyChanged { .. }) => {
                tracing::warn!(
                    "Host key for {}:{} has changed since it was recorded in known_hosts",
                    self.host,
                    self.port
                );
                false
            }
            Err(e) => {
                tracing::warn!("Failed to read known_hosts: {}", e);
                false
            }
        }
    }
}

impl client::Handler for TunnelHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        match &self.host_keys {
            HostKeyPolicy::AcceptAny => Ok(true),
            HostKeyPolicy::KnownHosts { path } => {
                Ok(self.check_known_hosts(path.as_ref(), server_public_key))
            }
        }
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut client::Session,
    ) -> std::result::Result<(), Self::Error> {
        tracing::debug!(
            "Forwarded connection from {}:{} to {}:{}",
            originator_address,
            originator_port,
            connected_address,
            connected_port
        );

        // Never block the session task here; the accept loop picks it up.
        match self.incoming.try_reserve() {
            Ok(slot) => slot.send(Forwarded {
                stream: channel.into_stream(),
                originator: format!("{originator_address}:{originator_port}"),
            }),
            Err(TrySendError::Full(())) => {
                tracing::warn!(
                    "Refusing connection from {}:{}: accept backlog is full",
                    originator_address,
                    originator_port
                );
                close_refused(channel).await;
            }
            Err(TrySendError::Closed(())) => {
                tracing::debug!("Dropping forwarded connection: session is closing");
                close_refused(channel).await;
            }
        }
        Ok(())
    }
}

/// An authenticated SSH session with one active remote listener.
///
/// `accept` is single-consumer: it takes `&mut self`, so only the owning
/// loop can pull connections from it.
pub struct TunnelSession {
    handle: Handle<TunnelHandler>,
    incoming: mpsc::Receiver<Forwarded>,
    server: HostPort,
    exposed: HostPort,
    request_timeout: Duration,
    closed: bool,
}

impl std::fmt::Debug for TunnelSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelSession")
            .field("server", &self.server)
            .field("exposed", &self.exposed)
            .field("closed", &self.closed)
            .field("handle", &"<russh::Handle>")
            .finish()
    }
}

impl TunnelSession {
    /// Dial the SSH server, authenticate and request the remote listener.
    pub async fn open(config: &TunnelConfig, auth: AuthMethods) -> Result<Self> {
        let exposed = config.exposed_host();
        if config.exposed_port == 0 {
            return Err(Error::RemoteListenRejected {
                address: exposed.to_string(),
                reason: "port must be between 1 and 65535".to_string(),
            });
        }

        let russh_config = Config {
            inactivity_timeout: None,
            keepalive_interval: Some(config.timeouts.keepalive),
            keepalive_max: KEEPALIVE_MAX,
            nodelay: true,
            ..Default::default()
        };

        let (tx, rx) = backlog(config.max_connections);
        let handler = TunnelHandler::new(&config.ssh_server, config.host_keys.clone(), tx);
        let server = config.ssh_server.clone();
        let connect_timeout = config.timeouts.connect;

        let connect = client::connect(
            Arc::new(russh_config),
            (server.host(), server.port()),
            handler,
        );
        let mut handle = match tokio::time::timeout(connect_timeout, connect).await {
            Err(_) => {
                return Err(Error::Connection(format!(
                    "timed out connecting to {server} after {connect_timeout:?}"
                )));
            }
            Ok(Err(russh::Error::UnknownKey)) => {
                return Err(Error::HostKeyRejected(server.to_string()));
            }
            Ok(Err(e)) => return Err(Error::Connection(format!("{server}: {e}"))),
            Ok(Ok(handle)) => handle,
        };

        match tokio::time::timeout(connect_timeout, auth.authenticate(&mut handle)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                disconnect(&handle).await;
                return Err(e);
            }
            Err(_) => {
                disconnect(&handle).await;
                return Err(Error::AuthUnavailable(format!(
                    "authentication timed out after {connect_timeout:?}"
                )));
            }
        }

        let request =
            handle.tcpip_forward(config.exposed_bind.clone(), u32::from(config.exposed_port));
        let rejection = match tokio::time::timeout(connect_timeout, request).await {
            Ok(Ok(_)) => None,
            Ok(Err(russh::Error::RequestDenied)) => {
                Some("denied by server (port in use or forwarding disallowed)".to_string())
            }
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("no reply within {connect_timeout:?}")),
        };
        if let Some(reason) = rejection {
            disconnect(&handle).await;
            return Err(Error::RemoteListenRejected {
                address: exposed.to_string(),
                reason,
            });
        }

        tracing::info!("Listening on {} via {}", exposed, server);

        Ok(Self {
            handle,
            incoming: rx,
            server,
            exposed,
            request_timeout: connect_timeout,
            closed: false,
        })
    }

    /// Wait for the next client on the remote listener.
    ///
    /// Fails with [`Error::SessionBroken`] once the SSH connection is gone or
    /// the session has been closed.
    pub async fn accept(&mut self) -> Result<ForwardedStream> {
        if self.closed {
            return Err(Error::SessionBroken("session closed".to_string()));
        }

        match self.incoming.recv().await {
            Some(forwarded) => {
                tracing::debug!("Accepted connection from {}", forwarded.originator);
                Ok(forwarded.stream)
            }
            None => Err(Error::SessionBroken(format!(
                "connection to {} lost",
                self.server
            ))),
        }
    }

    /// Release the remote listener and close the SSH connection.
    /// Calling this more than once has no further effect.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.incoming.close();

        if !self.handle.is_closed() {
            let (bind, port) = (self.exposed.host().to_string(), self.exposed.port());
            let cancel = self.handle.cancel_tcpip_forward(bind, u32::from(port));
            match tokio::time::timeout(self.request_timeout, cancel).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    tracing::debug!("Failed to cancel remote listener {}: {}", self.exposed, e)
                }
                Err(_) => tracing::debug!(
                    "No reply cancelling remote listener {} within {:?}",
                    self.exposed,
                    self.request_timeout
                ),
            }
            if tokio::time::timeout(self.request_timeout, disconnect(&self.handle))
                .await
                .is_err()
            {
                tracing::debug!("Disconnect from {} timed out", self.server);
            }
        }

        tracing::info!("Closed session to {}", self.server);
    }

    pub fn is_closed(&self) -> bool {
        self.closed || self.handle.is_closed()
    }

    /// Remote listener address on the SSH server side.
    pub fn exposed(&self) -> &HostPort {
        &self.exposed
    }
}

async fn close_refused(channel: Channel<Msg>) {
    if let Err(e) = channel.close().await {
        tracing::debug!("Failed to close refused channel: {}", e);
    }
}

async fn disconnect(handle: &Handle<TunnelHandler>) {
    if let Err(e) = handle
        .disconnect(Disconnect::ByApplication, "", "en")
        .await
    {
        tracing::debug!("Disconnect failed: {}", e);
    }
}
