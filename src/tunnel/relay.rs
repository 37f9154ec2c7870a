// ABOUTME: Bidirectional byte relay between a forwarded connection and the target.
// ABOUTME: Dials the target with a timeout, then pipes both directions concurrently.

use super::error::{Error, Result};
use crate::config::{HostPort, Timeouts};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

const BUFFER_SIZE: usize = 64 * 1024;

/// Bytes moved by one finished relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Client (forwarded connection) to target.
    pub inbound_bytes: u64,
    /// Target to client.
    pub outbound_bytes: u64,
}

/// Pairs each forwarded connection with a fresh connection to the target.
#[derive(Debug, Clone)]
pub struct ConnectionRelay {
    target: HostPort,
    dial_timeout: Duration,
    drain_timeout: Duration,
}

impl ConnectionRelay {
    pub fn new(target: HostPort, timeouts: &Timeouts) -> Self {
        Self {
            target,
            dial_timeout: timeouts.dial,
            drain_timeout: timeouts.drain,
        }
    }

    pub fn target(&self) -> &HostPort {
        &self.target
    }

    /// Relay `inbound` to the target until either side finishes.
    ///
    /// Both halves are closed on return. A dial failure closes `inbound`
    /// immediately and yields [`Error::TargetUnreachable`].
    pub async fn relay<S>(&self, mut inbound: S) -> Result<RelayStats>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let dial = TcpStream::connect((self.target.host(), self.target.port()));
        let reason = match tokio::time::timeout(self.dial_timeout, dial).await {
            Ok(Ok(target)) => {
                if let Err(e) = target.set_nodelay(true) {
                    tracing::debug!("Failed to set TCP_NODELAY on {}: {}", self.target, e);
                }
                return pipe(inbound, target, self.drain_timeout).await;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("dial timed out after {:?}", self.dial_timeout),
        };

        let _ = inbound.shutdown().await;
        Err(Error::TargetUnreachable {
            target: self.target.to_string(),
            reason,
        })
    }
}

/// Copy bytes both ways between `a` and `b`.
///
/// The pipe ends when the first direction finishes. Its EOF is propagated to
/// the opposite writer, and the other direction gets `drain` to finish on its
/// own before both streams are dropped. An I/O error drops both immediately.
pub async fn pipe<A, B>(a: A, b: B, drain: Duration) -> Result<RelayStats>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);
    let mut stats = RelayStats::default();

    let result = {
        let inbound = copy_half(&mut a_read, &mut b_write, &mut stats.inbound_bytes);
        let outbound = copy_half(&mut b_read, &mut a_write, &mut stats.outbound_bytes);
        tokio::pin!(inbound, outbound);

        // A failed direction closes the pair at once; a clean EOF lets the other drain.
        tokio::select! {
            first = &mut inbound => match first {
                Ok(()) => drain_half(outbound, drain).await,
                Err(e) => Err(e),
            },
            first = &mut outbound => match first {
                Ok(()) => drain_half(inbound, drain).await,
                Err(e) => Err(e),
            },
        }
    };

    // Dropping the halves here closes both underlying streams.
    result.map(|()| stats).map_err(Error::RelayIo)
}

async fn drain_half<F>(half: F, drain: Duration) -> std::io::Result<()>
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    match tokio::time::timeout(drain, half).await {
        Ok(result) => result,
        Err(_) => {
            tracing::debug!("Relay direction still open after {:?}, closing", drain);
            Ok(())
        }
    }
}

async fn copy_half<R, W>(reader: &mut R, writer: &mut W, copied: &mut u64) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        *copied += n as u64;
    }
    writer.shutdown().await
}
