// ABOUTME: Seams between the forwarding loop and the SSH transport.
// ABOUTME: Connector opens sessions; TunnelListener accepts from and closes one.

use super::auth::SessionAuthenticator;
use super::error::Result;
use super::session::{ForwardedStream, TunnelSession};
use crate::config::{HostKeyPolicy, TunnelConfig};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Source of logical connections for one live session.
#[async_trait]
pub trait TunnelListener: Send {
    type Conn: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Next logical connection, or a session-level error once the session is unusable.
    async fn accept(&mut self) -> Result<Self::Conn>;

    /// Tear the session down. Must be idempotent.
    async fn close(&mut self);
}

/// Opens a fresh session each time the loop (re)connects.
#[async_trait]
pub trait Connector: Send + Sync {
    type Listener: TunnelListener;

    async fn connect(&self) -> Result<Self::Listener>;
}

#[async_trait]
impl TunnelListener for TunnelSession {
    type Conn = ForwardedStream;

    async fn accept(&mut self) -> Result<ForwardedStream> {
        TunnelSession::accept(self).await
    }

    async fn close(&mut self) {
        TunnelSession::close(self).await
    }
}

/// Authenticates and opens [`TunnelSession`]s for one tunnel definition.
#[derive(Debug, Clone)]
pub struct SshConnector {
    config: Arc<TunnelConfig>,
}

impl SshConnector {
    pub fn new(config: Arc<TunnelConfig>) -> Self {
        if config.host_keys == HostKeyPolicy::AcceptAny {
            tracing::warn!(
                "Host key verification is disabled for {}; the connection is open to MITM attacks",
                config.ssh_server
            );
        }
        Self { config }
    }
}

#[async_trait]
impl Connector for SshConnector {
    type Listener = TunnelSession;

    async fn connect(&self) -> Result<TunnelSession> {
        tracing::info!(
            "Connecting to {} as {}",
            self.config.ssh_server,
            self.config.ssh_username
        );
        let auth = SessionAuthenticator::build(&self.config).await?;
        TunnelSession::open(&self.config, auth).await
    }
}
