use std::sync::Arc;
use std::time::Duration;

use shared::repositories::errors::kv_store_errors::KvStoreError;
use shared::repositories::kv_store::KvStore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub const LEADER_LOCK_KEY: &str = "bot:leader_lock";
const LOCK_TTL: Duration = Duration::from_secs(20);
const REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// Try to become the single active instance. Returns false when another
/// instance already holds the lock.
pub async fn acquire(
    store: &Arc<dyn KvStore>,
    instance_id: &str,
) -> Result<bool, KvStoreError> {
    store
        .set_if_absent(LEADER_LOCK_KEY, instance_id, LOCK_TTL)
        .await
}

/// Keep the lock alive. Ownership is verified on every refresh; a missing or
/// stolen lock terminates the process so a healthier instance can take over.
pub fn spawn_refresh(store: Arc<dyn KvStore>, instance_id: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(REFRESH_INTERVAL);
        ticker.tick().await; // consume the immediate first tick
        loop {
            ticker.tick().await;
            match store.get(LEADER_LOCK_KEY).await {
                Ok(None) => {
                    warn!("leader lock disappeared, exiting");
                    std::process::exit(0);
                }
                Ok(Some(owner)) => {
                    if owner.trim() != instance_id.trim() {
                        warn!("leader lock stolen by {}, exiting", owner.trim());
                        std::process::exit(0);
                    }
                    if let Err(err) = store.expire(LEADER_LOCK_KEY, LOCK_TTL).await {
                        warn!("leader lock refresh failed: {}", err);
                    }
                }
                Err(err) => {
                    warn!("leader lock check failed: {}", err);
                }
            }
        }
    })
}

/// Release the lock at shutdown, but only while still the owner.
pub async fn release(store: &Arc<dyn KvStore>, instance_id: &str) {
    match store.get(LEADER_LOCK_KEY).await {
        Ok(Some(owner)) if owner.trim() == instance_id.trim() => {
            if let Err(err) = store.delete(LEADER_LOCK_KEY).await {
                warn!("leader lock release failed: {}", err);
            } else {
                info!("leader lock released");
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::repositories::kv_store::memory::MemoryKvStore;

    #[tokio::test]
    async fn only_one_instance_acquires_the_lock() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        assert!(acquire(&store, "inst-a").await.unwrap());
        assert!(!acquire(&store, "inst-b").await.unwrap());
    }

    #[tokio::test]
    async fn release_only_removes_an_owned_lock() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        acquire(&store, "inst-a").await.unwrap();

        release(&store, "inst-b").await;
        assert!(store.get(LEADER_LOCK_KEY).await.unwrap().is_some());

        release(&store, "inst-a").await;
        assert!(store.get(LEADER_LOCK_KEY).await.unwrap().is_none());
    }
}
