use crate::error::Result;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

/// Per-instance write locks. Writers on different users never contend.
#[derive(Default)]
pub struct InstanceLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl InstanceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    pub async fn acquire(&self, user_key: &str) -> OwnedMutexGuard<()> {
        // clone the Arc so the map shard is released before awaiting
        let lock = self.locks.entry(user_key.to_string()).or_default().clone();
        lock.lock_owned().await
    }
}

/// Re-runs `op` while it fails with a version conflict, up to `max_retries` extra attempts.
pub async fn retry_on_conflict<T, F, Fut>(max_retries: u32, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Err(err) if err.is_conflict() && attempt < max_retries => {
                attempt = attempt.saturating_add(1);
                warn!(attempt, max_retries, error = %err, "Retrying after concurrent update");
            }
            outcome => return outcome,
        }
    }
}
