// ABOUTME: Reverse tunnel engine over SSH remote port forwarding.
// ABOUTME: Session setup, per-connection relays and the reconnecting accept loop.

mod auth;
mod backoff;
mod connector;
mod dispatch;
mod error;
mod forwarder;
mod relay;
mod session;

pub use auth::{AuthMethod, AuthMethods, SessionAuthenticator};
pub use backoff::Backoff;
pub use connector::{Connector, SshConnector, TunnelListener};
pub use dispatch::{BoundedDispatcher, Dispatcher, RelayTask, UnboundedDispatcher};
pub use error::{Error, Result};
pub use forwarder::{ForwardingLoop, LoopState};
pub use relay::{ConnectionRelay, RelayStats, pipe};
pub use session::{ForwardedStream, TunnelSession};
