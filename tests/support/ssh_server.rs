// ABOUTME: In-process SSH server for integration tests, built on russh::server.
// ABOUTME: Password and public key auth plus tcpip-forward, so remote listeners open on 127.0.0.1.

use ptu::config::{BackoffConfig, HostPort, Timeouts, TunnelConfig};
use russh::Disconnect;
use russh::keys::ssh_key::PublicKey;
use russh::keys::ssh_key::public::KeyData;
use russh::keys::{PrivateKey, decode_secret_key};
use russh::server::{self, Auth, Session};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const USER: &str = "tester";
pub const PASSWORD: &str = "secret";

const HOST_KEY: &str = include_str!("../fixtures/host_key");

fn host_key() -> PrivateKey {
    decode_secret_key(HOST_KEY, None).expect("fixture host key should parse")
}

/// State shared by every session of one running server.
#[derive(Default)]
struct Shared {
    sessions: Mutex<Vec<server::Handle>>,
    forwards: Mutex<Vec<JoinHandle<()>>>,
    forward_requests: AtomicUsize,
    stall_cancel: AtomicBool,
    authorized_keys: Vec<KeyData>,
    offered_keys: Mutex<Vec<KeyData>>,
}

/// A running SSH server bound to 127.0.0.1.
pub struct TestSshServer {
    port: u16,
    accept_task: JoinHandle<()>,
    shared: Arc<Shared>,
}

impl TestSshServer {
    pub async fn start() -> Self {
        Self::start_on(0).await
    }

    /// Start on a specific port, e.g. to bring a killed server back.
    pub async fn start_on(port: u16) -> Self {
        Self::launch(port, Vec::new()).await
    }

    /// Start a server that also accepts public key auth for `keys`.
    pub async fn start_with_authorized_keys(keys: &[PublicKey]) -> Self {
        let keys = keys.iter().map(|k| k.key_data().clone()).collect();
        Self::launch(0, keys).await
    }

    async fn launch(port: u16, authorized_keys: Vec<KeyData>) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .expect("bind SSH port");
        let port = listener.local_addr().expect("local addr").port();

        let config = Arc::new(server::Config {
            keys: vec![host_key()],
            auth_rejection_time: Duration::from_millis(10),
            inactivity_timeout: None,
            ..Default::default()
        });
        let shared = Arc::new(Shared {
            authorized_keys,
            ..Default::default()
        });

        let accept_task = {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let handler = TestHandler {
                        shared: Arc::clone(&shared),
                    };
                    let config = Arc::clone(&config);
                    let shared = Arc::clone(&shared);
                    tokio::spawn(async move {
                        if let Ok(running) = server::run_stream(config, stream, handler).await {
                            shared.sessions.lock().unwrap().push(running.handle());
                            let _ = running.await;
                        }
                    });
                }
            })
        };

        Self {
            port,
            accept_task,
            shared,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn address(&self) -> HostPort {
        HostPort::new("127.0.0.1", self.port)
    }

    /// Number of tcpip-forward requests the server accepted.
    pub fn forward_requests(&self) -> usize {
        self.shared.forward_requests.load(Ordering::SeqCst)
    }

    /// Public keys presented with a signature, in the order the client offered them.
    pub fn offered_keys(&self) -> Vec<KeyData> {
        self.shared.offered_keys.lock().unwrap().clone()
    }

    /// Never answer cancel-tcpip-forward from now on.
    pub fn stall_forward_cancel(&self) {
        self.shared.stall_cancel.store(true, Ordering::SeqCst);
    }

    /// Tunnel definition for this server with short timeouts and fast retries.
    pub fn tunnel_config(&self, target: HostPort, exposed_port: u16) -> TunnelConfig {
        tunnel_config(self.address(), target, exposed_port)
    }

    /// Drop every connection and listener, as if the server process died.
    pub async fn kill(&self) {
        self.stop_listening();
        let sessions = std::mem::take(&mut *self.shared.sessions.lock().unwrap());
        for session in sessions {
            let _ = session
                .disconnect(Disconnect::ByApplication, "shutting down".into(), "en".into())
                .await;
        }
    }

    fn stop_listening(&self) {
        self.accept_task.abort();
        for forward in self.shared.forwards.lock().unwrap().drain(..) {
            forward.abort();
        }
    }
}

/// Test tunnel definition for a server at `ssh_server`, which need not be up yet.
pub fn tunnel_config(ssh_server: HostPort, target: HostPort, exposed_port: u16) -> TunnelConfig {
    TunnelConfig::new(ssh_server, USER, target, exposed_port)
        .password(PASSWORD)
        .exposed_bind("127.0.0.1")
        .timeouts(Timeouts {
            connect: Duration::from_secs(5),
            dial: Duration::from_secs(2),
            keepalive: Duration::from_secs(1),
            drain: Duration::from_millis(200),
        })
        .backoff(BackoffConfig {
            initial: Duration::from_millis(50),
            max: Duration::from_millis(200),
            multiplier: 2,
        })
}

impl Drop for TestSshServer {
    fn drop(&mut self) {
        self.stop_listening();
    }
}

struct TestHandler {
    shared: Arc<Shared>,
}

impl server::Handler for TestHandler {
    type Error = russh::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        if user == USER && password == PASSWORD {
            Ok(Auth::Accept)
        } else {
            Ok(Auth::reject())
        }
    }

    async fn auth_publickey(&mut self, user: &str, key: &PublicKey) -> Result<Auth, Self::Error> {
        let key = key.key_data().clone();
        let authorized = user == USER && self.shared.authorized_keys.contains(&key);
        self.shared.offered_keys.lock().unwrap().push(key);
        if authorized {
            Ok(Auth::Accept)
        } else {
            Ok(Auth::reject())
        }
    }

    async fn tcpip_forward(
        &mut self,
        address: &str,
        port: &mut u32,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let Ok(requested) = u16::try_from(*port) else {
            return Ok(false);
        };
        let listener = match TcpListener::bind((address, requested)).await {
            Ok(listener) => listener,
            Err(_) => return Ok(false),
        };
        if *port == 0 {
            *port = listener.local_addr().map(|a| u32::from(a.port())).unwrap_or(0);
        }

        let handle = session.handle();
        let (address, port) = (address.to_string(), *port);
        let forward = tokio::spawn(async move {
            while let Ok((mut socket, peer)) = listener.accept().await {
                let handle = handle.clone();
                let address = address.clone();
                tokio::spawn(async move {
                    let channel = match handle
                        .channel_open_forwarded_tcpip(
                            address,
                            port,
                            peer.ip().to_string(),
                            u32::from(peer.port()),
                        )
                        .await
                    {
                        Ok(channel) => channel,
                        Err(_) => return,
                    };
                    let mut stream = channel.into_stream();
                    let _ = tokio::io::copy_bidirectional(&mut socket, &mut stream).await;
                });
            }
        });

        self.shared.forward_requests.fetch_add(1, Ordering::SeqCst);
        self.shared.forwards.lock().unwrap().push(forward);
        Ok(true)
    }

    async fn cancel_tcpip_forward(
        &mut self,
        _address: &str,
        _port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        if self.shared.stall_cancel.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(true)
    }
}
