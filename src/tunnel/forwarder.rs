// ABOUTME: Top-level reconnecting accept loop for one reverse tunnel.
// ABOUTME: Connecting -> Accepting -> (session lost) -> Connecting, relays dispatched per accept.

use super::backoff::Backoff;
use super::connector::{Connector, SshConnector, TunnelListener};
use super::dispatch::{self, Dispatcher};
use super::error::Error;
use super::relay::ConnectionRelay;
use crate::config::TunnelConfig;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// Observable phase of the forwarding loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Opening a session, possibly waiting out a backoff delay.
    Connecting,
    /// A session is open and connections are being accepted.
    Accepting,
    /// `run_until` returned.
    Stopped,
}

/// Drives one tunnel for the lifetime of the process.
pub struct ForwardingLoop<C: Connector> {
    connector: C,
    relay: Arc<ConnectionRelay>,
    dispatcher: Box<dyn Dispatcher>,
    backoff: Backoff,
    state: watch::Sender<LoopState>,
}

impl ForwardingLoop<SshConnector> {
    /// Production loop: SSH sessions, backoff and admission limit from `config`.
    pub fn from_config(config: TunnelConfig) -> Self {
        let relay = ConnectionRelay::new(config.target.clone(), &config.timeouts);
        let backoff = Backoff::new(config.backoff);
        let dispatcher = dispatch::for_limit(config.max_connections);
        let connector = SshConnector::new(Arc::new(config));
        Self::new(connector, relay, backoff).with_boxed_dispatcher(dispatcher)
    }
}

impl<C: Connector> ForwardingLoop<C> {
    pub fn new(connector: C, relay: ConnectionRelay, backoff: Backoff) -> Self {
        let (state, _) = watch::channel(LoopState::Connecting);
        Self {
            connector,
            relay: Arc::new(relay),
            dispatcher: Box::new(dispatch::UnboundedDispatcher),
            backoff,
            state,
        }
    }

    /// Replace the relay launch strategy.
    pub fn with_dispatcher(self, dispatcher: impl Dispatcher + 'static) -> Self {
        self.with_boxed_dispatcher(Box::new(dispatcher))
    }

    fn with_boxed_dispatcher(mut self, dispatcher: Box<dyn Dispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Watch the loop's state transitions.
    pub fn subscribe(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    /// Run forever.
    pub async fn run(self) {
        self.run_until(std::future::pending()).await
    }

    /// Run until `shutdown` resolves, then close the current session.
    ///
    /// Relays already in flight are not awaited; they end when their
    /// forwarded connection goes away with the session.
    pub async fn run_until<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);

        loop {
            self.state.send_replace(LoopState::Connecting);
            let mut listener = tokio::select! {
                _ = &mut shutdown => break,
                listener = self.connect() => listener,
            };

            self.state.send_replace(LoopState::Accepting);
            let lost = tokio::select! {
                _ = &mut shutdown => None,
                err = self.accept_loop(&mut listener) => Some(err),
            };

            listener.close().await;
            let Some(err) = lost else {
                break;
            };

            // Every lost session waits; backoff only resets once a connection was served.
            self.state.send_replace(LoopState::Connecting);
            let delay = self.backoff.next_delay();
            tracing::warn!("Session lost: {}; reconnecting in {:?}", err, delay);
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!("Forwarding stopped");
        self.state.send_replace(LoopState::Stopped);
    }

    /// Keep trying to open a session, sleeping per the backoff policy between failures.
    async fn connect(&mut self) -> C::Listener {
        loop {
            match self.connector.connect().await {
                Ok(listener) => return listener,
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    tracing::warn!(
                        "Connect attempt {} failed: {}; retrying in {:?}",
                        self.backoff.attempts(),
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Accept until the session fails, dispatching one relay per connection.
    ///
    /// The backoff is reset once the session has delivered a connection.
    async fn accept_loop(&mut self, listener: &mut C::Listener) -> Error {
        let mut served = false;
        loop {
            let conn = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => return e,
            };
            if !served {
                served = true;
                self.backoff.reset();
            }

            let relay = Arc::clone(&self.relay);
            self.dispatcher
                .dispatch(Box::pin(async move {
                    match relay.relay(conn).await {
                        Ok(stats) => tracing::debug!(
                            "Relay to {} finished: {} bytes in, {} bytes out",
                            relay.target(),
                            stats.inbound_bytes,
                            stats.outbound_bytes
                        ),
                        Err(e @ Error::TargetUnreachable { .. }) => tracing::warn!("{}", e),
                        Err(e) => tracing::debug!("Relay to {} ended: {}", relay.target(), e),
                    }
                }))
                .await;
        }
    }
}
