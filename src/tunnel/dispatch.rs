// ABOUTME: Strategies for launching relays from the accept loop.
// ABOUTME: Unbounded task-per-connection by default, or a semaphore-bounded variant.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// One relay, ready to run.
pub type RelayTask = BoxFuture<'static, ()>;

/// Launches relay tasks on behalf of the forwarding loop.
///
/// `dispatch` must not wait for the task to complete. It may wait before
/// starting it (admission control), which holds back the next accept.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, task: RelayTask);
}

/// Spawns every relay immediately. No limit on concurrent relays.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnboundedDispatcher;

#[async_trait]
impl Dispatcher for UnboundedDispatcher {
    async fn dispatch(&self, task: RelayTask) {
        tokio::spawn(task);
    }
}

/// Runs at most `limit` relays at once; further accepts wait for a slot.
///
/// While accepts are held back, forwarded channels queue in the session's
/// backlog, which is sized to the same limit; connections beyond it are refused.
#[derive(Debug, Clone)]
pub struct BoundedDispatcher {
    permits: Arc<Semaphore>,
    limit: usize,
}

impl BoundedDispatcher {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            permits: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Relays currently running.
    pub fn active(&self) -> usize {
        self.limit - self.permits.available_permits()
    }
}

#[async_trait]
impl Dispatcher for BoundedDispatcher {
    async fn dispatch(&self, task: RelayTask) {
        match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => {
                tokio::spawn(async move {
                    task.await;
                    drop(permit);
                });
            }
            // The semaphore is never closed; run unbounded rather than drop the relay.
            Err(_) => {
                tokio::spawn(task);
            }
        }
    }
}

/// Pick a dispatcher for an optional connection limit.
pub fn for_limit(limit: Option<usize>) -> Box<dyn Dispatcher> {
    match limit {
        Some(limit) => Box::new(BoundedDispatcher::new(limit)),
        None => Box::new(UnboundedDispatcher),
    }
}
