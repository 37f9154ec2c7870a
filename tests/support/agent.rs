// ABOUTME: In-process SSH agent for tests, served over a Unix socket.
// ABOUTME: Loads fixture keys so agent-based authentication can run without a real ssh-agent.

use russh::keys::agent::client::AgentClient;
use russh::keys::agent::server::{self, Agent};
use russh::keys::ssh_key::PublicKey;
use russh::keys::{PrivateKey, decode_secret_key};
use std::path::{Path, PathBuf};
use tokio::net::UnixListener;
use tokio::task::JoinHandle;

const AGENT_KEY_A: &str = include_str!("../fixtures/agent_key_a");
const AGENT_KEY_B: &str = include_str!("../fixtures/agent_key_b");

/// Two distinct ed25519 keys to load into the agent.
pub fn fixture_keys() -> Vec<PrivateKey> {
    [AGENT_KEY_A, AGENT_KEY_B]
        .into_iter()
        .map(|pem| decode_secret_key(pem, None).expect("fixture agent key should parse"))
        .collect()
}

#[derive(Clone)]
struct ConfirmAll;

impl Agent for ConfirmAll {}

/// A running agent listening on a caller-chosen socket path.
pub struct TestAgent {
    socket: PathBuf,
    task: JoinHandle<()>,
}

impl TestAgent {
    /// Start an agent on `socket` holding `keys`.
    pub async fn start_at(socket: &Path, keys: &[PrivateKey]) -> Self {
        let socket = socket.to_path_buf();
        let listener = UnixListener::bind(&socket).expect("bind agent socket");

        let connections = Box::pin(futures::stream::unfold(listener, |listener| async move {
            let next = listener.accept().await.map(|(stream, _)| stream);
            Some((next, listener))
        }));
        let task = tokio::spawn(async move {
            let _ = server::serve(connections, ConfirmAll).await;
        });

        let agent = Self { socket, task };
        let mut client = agent.client().await;
        for key in keys {
            client
                .add_identity(key, &[])
                .await
                .expect("agent should accept fixture key");
        }
        agent
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Identities in the order the agent lists them.
    pub async fn identities(&self) -> Vec<PublicKey> {
        self.client()
            .await
            .request_identities()
            .await
            .expect("agent should list identities")
    }

    async fn client(&self) -> AgentClient<tokio::net::UnixStream> {
        AgentClient::connect_uds(&self.socket)
            .await
            .expect("connect to test agent")
    }
}

impl Drop for TestAgent {
    fn drop(&mut self) {
        self.task.abort();
    }
}
