// ABOUTME: Partial tunnel settings from a YAML file or command-line flags.
// ABOUTME: Merges sources (flags win), applies defaults and validates into a TunnelConfig.

use super::{
    BackoffConfig, CONFIG_FILENAME, CONFIG_FILENAME_ALT, Credentials, DEFAULT_EXPOSED_BIND,
    DEFAULT_SSH_PORT, DEFAULT_TARGET_HOST, DEFAULT_TARGET_PORT, HostKeyPolicy, HostPort, Timeouts,
    TunnelConfig,
};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Unresolved tunnel settings. Every field is optional so that a config
/// file and command-line flags can each supply part of the definition.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub ssh_server: Option<String>,
    #[serde(default)]
    pub ssh_username: Option<String>,
    #[serde(default)]
    pub ssh_password: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub exposed_bind: Option<String>,
    #[serde(default)]
    pub exposed_port: Option<i64>,
    #[serde(default)]
    pub strict_host_keys: Option<bool>,
    #[serde(default)]
    pub known_hosts: Option<PathBuf>,
    #[serde(default)]
    pub max_connections: Option<usize>,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub backoff: BackoffSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutSettings {
    #[serde(default, with = "humantime_serde")]
    pub connect: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub dial: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub keepalive: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub drain: Option<Duration>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackoffSettings {
    #[serde(default, with = "humantime_serde")]
    pub initial: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub max: Option<Duration>,
    #[serde(default)]
    pub multiplier: Option<u32>,
}

impl Settings {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load settings from an explicit file path.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ConfigNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Look for ptu.yml / ptu.yaml in `dir`. A missing file is not an error.
    pub fn discover(dir: &Path) -> Result<Option<Self>> {
        for name in [CONFIG_FILENAME, CONFIG_FILENAME_ALT] {
            let path = dir.join(name);
            if path.exists() {
                tracing::debug!("Using config file {}", path.display());
                return Self::load(&path).map(Some);
            }
        }
        Ok(None)
    }

    /// Layer `overrides` on top of `self`; any field set in `overrides` wins.
    pub fn merge(self, overrides: Settings) -> Settings {
        Settings {
            ssh_server: overrides.ssh_server.or(self.ssh_server),
            ssh_username: overrides.ssh_username.or(self.ssh_username),
            ssh_password: overrides.ssh_password.or(self.ssh_password),
            target: overrides.target.or(self.target),
            exposed_bind: overrides.exposed_bind.or(self.exposed_bind),
            exposed_port: overrides.exposed_port.or(self.exposed_port),
            strict_host_keys: overrides.strict_host_keys.or(self.strict_host_keys),
            known_hosts: overrides.known_hosts.or(self.known_hosts),
            max_connections: overrides.max_connections.or(self.max_connections),
            timeouts: TimeoutSettings {
                connect: overrides.timeouts.connect.or(self.timeouts.connect),
                dial: overrides.timeouts.dial.or(self.timeouts.dial),
                keepalive: overrides.timeouts.keepalive.or(self.timeouts.keepalive),
                drain: overrides.timeouts.drain.or(self.timeouts.drain),
            },
            backoff: BackoffSettings {
                initial: overrides.backoff.initial.or(self.backoff.initial),
                max: overrides.backoff.max.or(self.backoff.max),
                multiplier: overrides.backoff.multiplier.or(self.backoff.multiplier),
            },
        }
    }

    /// Apply defaults and validate. The username falls back to `$USER`, then `root`.
    pub fn resolve(self) -> Result<TunnelConfig> {
        let ssh_server = self
            .ssh_server
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::InvalidConfig("SSH server not defined".to_string()))?;
        let ssh_server = HostPort::parse(ssh_server, DEFAULT_SSH_PORT)
            .map_err(|e| Error::InvalidConfig(format!("SSH server: {e}")))?;

        let exposed_port = self
            .exposed_port
            .ok_or_else(|| Error::InvalidConfig("exposed TCP port not defined".to_string()))?;
        let exposed_port = u16::try_from(exposed_port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| {
                Error::InvalidConfig(format!("exposed TCP port number is invalid: {exposed_port}"))
            })?;

        let target = match self.target.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => HostPort::parse(t, DEFAULT_TARGET_PORT)
                .map_err(|e| Error::InvalidConfig(format!("target: {e}")))?,
            _ => HostPort::new(DEFAULT_TARGET_HOST, DEFAULT_TARGET_PORT),
        };

        let ssh_username = self
            .ssh_username
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| std::env::var("USER").unwrap_or_else(|_| "root".to_string()));

        let exposed_bind = self
            .exposed_bind
            .filter(|b| !b.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_EXPOSED_BIND.to_string());

        let host_keys = match (self.strict_host_keys.unwrap_or(false), self.known_hosts) {
            (true, path) => HostKeyPolicy::KnownHosts { path },
            (false, Some(path)) => HostKeyPolicy::KnownHosts { path: Some(path) },
            (false, None) => HostKeyPolicy::AcceptAny,
        };

        let defaults = Timeouts::default();
        let timeouts = Timeouts {
            connect: self.timeouts.connect.unwrap_or(defaults.connect),
            dial: self.timeouts.dial.unwrap_or(defaults.dial),
            keepalive: self.timeouts.keepalive.unwrap_or(defaults.keepalive),
            drain: self.timeouts.drain.unwrap_or(defaults.drain),
        };

        let defaults = BackoffConfig::default();
        let backoff = BackoffConfig {
            initial: self.backoff.initial.unwrap_or(defaults.initial),
            max: self.backoff.max.unwrap_or(defaults.max),
            multiplier: self.backoff.multiplier.unwrap_or(defaults.multiplier),
        };
        if backoff.initial > backoff.max {
            return Err(Error::InvalidConfig(
                "backoff.initial must not exceed backoff.max".to_string(),
            ));
        }
        if backoff.multiplier == 0 {
            return Err(Error::InvalidConfig(
                "backoff.multiplier must be at least 1".to_string(),
            ));
        }

        if self.max_connections == Some(0) {
            return Err(Error::InvalidConfig(
                "max_connections must be greater than zero".to_string(),
            ));
        }

        Ok(TunnelConfig {
            ssh_server,
            ssh_username,
            credentials: Credentials::from_password(self.ssh_password),
            target,
            exposed_bind,
            exposed_port,
            host_keys,
            timeouts,
            backoff,
            max_connections: self.max_connections,
        })
    }
}
