// ABOUTME: Builds the authentication methods offered during the SSH handshake.
// ABOUTME: Password auth when configured, otherwise every key held by the SSH agent.

use super::error::{Error, Result};
use crate::config::{Credentials, TunnelConfig};
use russh::client::{Handle, Handler};
use russh::keys::agent::client::AgentClient;
use tokio::net::UnixStream;

/// A single way of proving identity to the server.
pub enum AuthMethod {
    Password(String),
    Agent(AgentClient<UnixStream>),
}

impl std::fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMethod::Password(_) => f.write_str("Password(<redacted>)"),
            AuthMethod::Agent(_) => f.write_str("Agent"),
        }
    }
}

/// Ordered authentication methods for one user, tried until one succeeds.
#[derive(Debug)]
pub struct AuthMethods {
    user: String,
    methods: Vec<AuthMethod>,
}

impl AuthMethods {
    pub fn new(user: impl Into<String>, methods: Vec<AuthMethod>) -> Self {
        Self {
            user: user.into(),
            methods,
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn methods(&self) -> &[AuthMethod] {
        &self.methods
    }

    /// Try every method in order against an established handshake.
    pub(crate) async fn authenticate<H: Handler>(self, session: &mut Handle<H>) -> Result<()> {
        let user = self.user;
        for method in self.methods {
            let accepted = match method {
                AuthMethod::Password(password) => {
                    let result = session
                        .authenticate_password(user.as_str(), password)
                        .await
                        .map_err(Error::Protocol)?;
                    result.success()
                }
                AuthMethod::Agent(mut agent) => {
                    let keys = agent.request_identities().await.map_err(|e| {
                        Error::AuthUnavailable(format!("failed to list agent keys: {e}"))
                    })?;

                    if keys.is_empty() {
                        return Err(Error::AuthUnavailable("no keys in SSH agent".to_string()));
                    }

                    let mut accepted = false;
                    for key in &keys {
                        let result = session
                            .authenticate_publickey_with(
                                user.as_str(),
                                key.clone(),
                                None,
                                &mut agent,
                            )
                            .await
                            .map_err(|e| {
                                Error::Connection(format!("public key authentication failed: {e}"))
                            })?;
                        if result.success() {
                            accepted = true;
                            break;
                        }
                    }
                    accepted
                }
            };

            if accepted {
                tracing::debug!("Authenticated as {}", user);
                return Ok(());
            }
        }

        Err(Error::AuthUnavailable(format!(
            "server rejected every offered method for user {user}"
        )))
    }
}

/// Produces authentication material from the tunnel configuration.
pub struct SessionAuthenticator;

impl SessionAuthenticator {
    /// Build the method set for `config`.
    ///
    /// Agent auth requires a reachable agent (`SSH_AUTH_SOCK`); otherwise this
    /// fails with [`Error::AuthUnavailable`]. Password auth never fails here.
    pub async fn build(config: &TunnelConfig) -> Result<AuthMethods> {
        let method = match &config.credentials {
            Credentials::Password(password) => AuthMethod::Password(password.clone()),
            Credentials::Agent => {
                let agent = AgentClient::connect_env().await.map_err(|e| {
                    Error::AuthUnavailable(format!("SSH agent not available: {e}"))
                })?;
                AuthMethod::Agent(agent)
            }
        };
        Ok(AuthMethods::new(config.ssh_username.clone(), vec![method]))
    }
}
