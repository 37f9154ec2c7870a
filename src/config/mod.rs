// ABOUTME: Tunnel configuration record handed to the forwarding engine.
// ABOUTME: Holds addresses, credentials, host key policy, timeouts and retry policy.

mod host_port;
mod settings;

pub use host_port::HostPort;
pub use settings::{BackoffSettings, Settings, TimeoutSettings};

use std::path::PathBuf;
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "ptu.yml";
pub const CONFIG_FILENAME_ALT: &str = "ptu.yaml";

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_TARGET_HOST: &str = "127.0.0.1";
pub const DEFAULT_TARGET_PORT: u16 = 80;
pub const DEFAULT_EXPOSED_BIND: &str = "0.0.0.0";

/// How the client proves its identity to the SSH server.
///
/// Exactly one method is active: a password when one was supplied,
/// otherwise every key held by the running SSH agent.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Password(String),
    Agent,
}

impl Credentials {
    /// Agent authentication is used when no (or an empty) password is given.
    pub fn from_password(password: Option<String>) -> Self {
        match password {
            Some(p) if !p.is_empty() => Credentials::Password(p),
            _ => Credentials::Agent,
        }
    }

    pub fn uses_agent(&self) -> bool {
        matches!(self, Credentials::Agent)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Password(_) => f.write_str("Password(<redacted>)"),
            Credentials::Agent => f.write_str("Agent"),
        }
    }
}

/// Server host key verification policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Accept whatever key the server presents. Vulnerable to MITM.
    #[default]
    AcceptAny,
    /// Require the key to be present in a known_hosts file.
    /// `None` uses the default ~/.ssh/known_hosts.
    KnownHosts { path: Option<PathBuf> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// SSH dial plus handshake.
    pub connect: Duration,
    /// Dialing the target for one forwarded connection.
    pub dial: Duration,
    /// Interval between SSH keepalive probes.
    pub keepalive: Duration,
    /// How long the second relay direction may keep flowing after the first ended.
    pub drain: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            dial: Duration::from_secs(10),
            keepalive: Duration::from_secs(15),
            drain: Duration::from_secs(5),
        }
    }
}

/// Capped exponential reconnect delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2,
        }
    }
}

/// Fully validated definition of one reverse tunnel.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    pub ssh_server: HostPort,
    pub ssh_username: String,
    pub credentials: Credentials,
    pub target: HostPort,
    pub exposed_bind: String,
    pub exposed_port: u16,
    pub host_keys: HostKeyPolicy,
    pub timeouts: Timeouts,
    pub backoff: BackoffConfig,
    /// Upper bound on concurrently relayed connections. `None` is unbounded.
    pub max_connections: Option<usize>,
}

impl TunnelConfig {
    pub fn new(
        ssh_server: HostPort,
        ssh_username: impl Into<String>,
        target: HostPort,
        exposed_port: u16,
    ) -> Self {
        Self {
            ssh_server,
            ssh_username: ssh_username.into(),
            credentials: Credentials::Agent,
            target,
            exposed_bind: DEFAULT_EXPOSED_BIND.to_string(),
            exposed_port,
            host_keys: HostKeyPolicy::default(),
            timeouts: Timeouts::default(),
            backoff: BackoffConfig::default(),
            max_connections: None,
        }
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.credentials = Credentials::from_password(Some(password.into()));
        self
    }

    pub fn exposed_bind(mut self, bind: impl Into<String>) -> Self {
        self.exposed_bind = bind.into();
        self
    }

    pub fn host_keys(mut self, policy: HostKeyPolicy) -> Self {
        self.host_keys = policy;
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn max_connections(mut self, limit: usize) -> Self {
        self.max_connections = Some(limit);
        self
    }

    /// Listener address requested on the SSH server side (`bind:port`).
    pub fn exposed_host(&self) -> HostPort {
        HostPort::new(self.exposed_bind.clone(), self.exposed_port)
    }

    /// Address remote clients dial to reach the target through the tunnel.
    pub fn connect_to(&self) -> HostPort {
        self.ssh_server.with_port(self.exposed_port)
    }
}
