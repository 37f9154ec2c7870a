// ABOUTME: Tunnel engine error types.
// ABOUTME: Separates session-level failures (retried by the loop) from per-relay failures.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("server host key rejected for {0}")]
    HostKeyRejected(String),

    #[error("authentication unavailable: {0}")]
    AuthUnavailable(String),

    #[error("remote listen on {address} rejected: {reason}")]
    RemoteListenRejected { address: String, reason: String },

    #[error("SSH session broken: {0}")]
    SessionBroken(String),

    #[error("target {target} unreachable: {reason}")]
    TargetUnreachable { target: String, reason: String },

    #[error("relay I/O error: {0}")]
    RelayIo(std::io::Error),

    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),
}

impl Error {
    /// Whether this error ends the current session (and sends the loop back
    /// to connecting) rather than being contained in a single relay.
    pub fn is_session_fatal(&self) -> bool {
        !matches!(
            self,
            Error::TargetUnreachable { .. } | Error::RelayIo(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
