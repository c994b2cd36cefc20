use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use crate::repositories::errors::kv_store_errors::KvStoreError;

/// Typed operations over the shared state store. All writes carry a TTL so
/// that abandoned games and lobbies expire on their own.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KvStoreError>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvStoreError>;
    /// Returns true when the key was absent and has been set.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, KvStoreError>;
    async fn delete(&self, key: &str) -> Result<(), KvStoreError>;
    async fn set_add(&self, key: &str, member: &str, ttl: Duration) -> Result<(), KvStoreError>;
    async fn set_remove(&self, key: &str, member: &str) -> Result<(), KvStoreError>;
    async fn set_members(&self, key: &str) -> Result<Vec<String>, KvStoreError>;
    async fn set_card(&self, key: &str) -> Result<u64, KvStoreError>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), KvStoreError>;

    /// Open an optimistic critical section over the given keys. Reads go
    /// through the returned transaction; writes are queued and applied by
    /// `exec`, which fails with `TxConflict` if any watched key was modified
    /// in the meantime.
    async fn watch(&self, keys: &[String]) -> Result<Box<dyn WatchTx>, KvStoreError>;
}

#[async_trait]
pub trait WatchTx: Send {
    async fn get(&mut self, key: &str) -> Result<Option<String>, KvStoreError>;
    async fn set_card(&mut self, key: &str) -> Result<u64, KvStoreError>;
    fn queue_set(&mut self, key: &str, value: &str, ttl: Duration);
    fn queue_set_add(&mut self, key: &str, member: &str, ttl: Duration);
    async fn exec(self: Box<Self>) -> Result<(), KvStoreError>;
}

/// Redis-backed store. Plain operations share a multiplexed connection;
/// watch transactions open a dedicated connection because WATCH state is
/// bound to the connection it was issued on.
#[derive(Clone)]
pub struct RedisKvStore {
    client: redis::Client,
    conn: MultiplexedConnection,
}

impl RedisKvStore {
    pub async fn connect(redis_url: &str) -> Result<Self, KvStoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| KvStoreError::Transport(format!("invalid redis url: {}", e)))?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong != "PONG" {
            return Err(KvStoreError::Transport(format!(
                "unexpected ping reply: {}",
                pong
            )));
        }
        Ok(Self { client, conn })
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvStoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvStoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl.as_secs()).await?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, KvStoreError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<(), KvStoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str, ttl: Duration) -> Result<(), KvStoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(key, member).await?;
        let _: () = conn.expire(key, ttl.as_secs() as i64).await?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), KvStoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.srem(key, member).await?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, KvStoreError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(key).await?;
        Ok(members)
    }

    async fn set_card(&self, key: &str) -> Result<u64, KvStoreError> {
        let mut conn = self.conn.clone();
        let card: u64 = conn.scard(key).await?;
        Ok(card)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), KvStoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.expire(key, ttl.as_secs() as i64).await?;
        Ok(())
    }

    async fn watch(&self, keys: &[String]) -> Result<Box<dyn WatchTx>, KvStoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let mut watch = redis::cmd("WATCH");
        for key in keys {
            watch.arg(key);
        }
        let _: () = watch.query_async(&mut conn).await?;
        Ok(Box::new(RedisWatchTx {
            conn,
            pipe: redis::pipe(),
        }))
    }
}

struct RedisWatchTx {
    conn: MultiplexedConnection,
    pipe: redis::Pipeline,
}

#[async_trait]
impl WatchTx for RedisWatchTx {
    async fn get(&mut self, key: &str) -> Result<Option<String>, KvStoreError> {
        let value: Option<String> = self.conn.get(key).await?;
        Ok(value)
    }

    async fn set_card(&mut self, key: &str) -> Result<u64, KvStoreError> {
        let card: u64 = self.conn.scard(key).await?;
        Ok(card)
    }

    fn queue_set(&mut self, key: &str, value: &str, ttl: Duration) {
        self.pipe
            .cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs())
            .ignore();
    }

    fn queue_set_add(&mut self, key: &str, member: &str, ttl: Duration) {
        self.pipe.cmd("SADD").arg(key).arg(member).ignore();
        self.pipe
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs())
            .ignore();
    }

    async fn exec(mut self: Box<Self>) -> Result<(), KvStoreError> {
        self.pipe.atomic();
        // An aborted MULTI/EXEC surfaces as a nil reply.
        let reply: Option<redis::Value> = self.pipe.query_async(&mut self.conn).await?;
        match reply {
            Some(_) => Ok(()),
            None => Err(KvStoreError::TxConflict),
        }
    }
}

/// Test double shared with downstream crates through the `test-support`
/// feature.
#[cfg(any(test, feature = "test-support"))]
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct MemoryInner {
        strings: HashMap<String, String>,
        sets: HashMap<String, Vec<String>>,
        ttls: HashMap<String, u64>,
        versions: HashMap<String, u64>,
    }

    impl MemoryInner {
        fn bump(&mut self, key: &str) {
            *self.versions.entry(key.to_string()).or_insert(0) += 1;
        }
    }

    /// In-memory store with per-key version tracking so watch-transaction
    /// conflicts behave like the Redis implementation.
    #[derive(Clone, Default)]
    pub struct MemoryKvStore {
        inner: Arc<Mutex<MemoryInner>>,
    }

    impl MemoryKvStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn ttl_of(&self, key: &str) -> Option<u64> {
            self.inner.lock().unwrap().ttls.get(key).copied()
        }
    }

    #[async_trait]
    impl KvStore for MemoryKvStore {
        async fn get(&self, key: &str) -> Result<Option<String>, KvStoreError> {
            Ok(self.inner.lock().unwrap().strings.get(key).cloned())
        }

        async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvStoreError> {
            let mut inner = self.inner.lock().unwrap();
            inner.strings.insert(key.to_string(), value.to_string());
            inner.ttls.insert(key.to_string(), ttl.as_secs());
            inner.bump(key);
            Ok(())
        }

        async fn set_if_absent(
            &self,
            key: &str,
            value: &str,
            ttl: Duration,
        ) -> Result<bool, KvStoreError> {
            let mut inner = self.inner.lock().unwrap();
            if inner.strings.contains_key(key) {
                return Ok(false);
            }
            inner.strings.insert(key.to_string(), value.to_string());
            inner.ttls.insert(key.to_string(), ttl.as_secs());
            inner.bump(key);
            Ok(true)
        }

        async fn delete(&self, key: &str) -> Result<(), KvStoreError> {
            let mut inner = self.inner.lock().unwrap();
            inner.strings.remove(key);
            inner.sets.remove(key);
            inner.bump(key);
            Ok(())
        }

        async fn set_add(
            &self,
            key: &str,
            member: &str,
            ttl: Duration,
        ) -> Result<(), KvStoreError> {
            let mut inner = self.inner.lock().unwrap();
            let members = inner.sets.entry(key.to_string()).or_default();
            if !members.iter().any(|m| m == member) {
                members.push(member.to_string());
            }
            inner.ttls.insert(key.to_string(), ttl.as_secs());
            inner.bump(key);
            Ok(())
        }

        async fn set_remove(&self, key: &str, member: &str) -> Result<(), KvStoreError> {
            let mut inner = self.inner.lock().unwrap();
            if let Some(members) = inner.sets.get_mut(key) {
                members.retain(|m| m != member);
            }
            inner.bump(key);
            Ok(())
        }

        async fn set_members(&self, key: &str) -> Result<Vec<String>, KvStoreError> {
            Ok(self
                .inner
                .lock()
                .unwrap()
                .sets
                .get(key)
                .cloned()
                .unwrap_or_default())
        }

        async fn set_card(&self, key: &str) -> Result<u64, KvStoreError> {
            Ok(self
                .inner
                .lock()
                .unwrap()
                .sets
                .get(key)
                .map(|m| m.len() as u64)
                .unwrap_or(0))
        }

        async fn expire(&self, key: &str, ttl: Duration) -> Result<(), KvStoreError> {
            self.inner
                .lock()
                .unwrap()
                .ttls
                .insert(key.to_string(), ttl.as_secs());
            Ok(())
        }

        async fn watch(&self, keys: &[String]) -> Result<Box<dyn WatchTx>, KvStoreError> {
            let inner = self.inner.lock().unwrap();
            let watched = keys
                .iter()
                .map(|k| (k.clone(), inner.versions.get(k).copied().unwrap_or(0)))
                .collect();
            Ok(Box::new(MemoryWatchTx {
                store: self.inner.clone(),
                watched,
                queued: Vec::new(),
            }))
        }
    }

    enum QueuedOp {
        Set {
            key: String,
            value: String,
            ttl: u64,
        },
        SetAdd {
            key: String,
            member: String,
            ttl: u64,
        },
    }

    struct MemoryWatchTx {
        store: Arc<Mutex<MemoryInner>>,
        watched: Vec<(String, u64)>,
        queued: Vec<QueuedOp>,
    }

    #[async_trait]
    impl WatchTx for MemoryWatchTx {
        async fn get(&mut self, key: &str) -> Result<Option<String>, KvStoreError> {
            Ok(self.store.lock().unwrap().strings.get(key).cloned())
        }

        async fn set_card(&mut self, key: &str) -> Result<u64, KvStoreError> {
            Ok(self
                .store
                .lock()
                .unwrap()
                .sets
                .get(key)
                .map(|m| m.len() as u64)
                .unwrap_or(0))
        }

        fn queue_set(&mut self, key: &str, value: &str, ttl: Duration) {
            self.queued.push(QueuedOp::Set {
                key: key.to_string(),
                value: value.to_string(),
                ttl: ttl.as_secs(),
            });
        }

        fn queue_set_add(&mut self, key: &str, member: &str, ttl: Duration) {
            self.queued.push(QueuedOp::SetAdd {
                key: key.to_string(),
                member: member.to_string(),
                ttl: ttl.as_secs(),
            });
        }

        async fn exec(self: Box<Self>) -> Result<(), KvStoreError> {
            let MemoryWatchTx {
                store,
                watched,
                queued,
            } = *self;
            let mut inner = store.lock().unwrap();
            for (key, version) in &watched {
                if inner.versions.get(key).copied().unwrap_or(0) != *version {
                    return Err(KvStoreError::TxConflict);
                }
            }
            for op in queued {
                match op {
                    QueuedOp::Set { key, value, ttl } => {
                        inner.strings.insert(key.clone(), value);
                        inner.ttls.insert(key.clone(), ttl);
                        inner.bump(&key);
                    }
                    QueuedOp::SetAdd { key, member, ttl } => {
                        let members = inner.sets.entry(key.clone()).or_default();
                        if !members.iter().any(|m| m == &member) {
                            members.push(member);
                        }
                        inner.ttls.insert(key.clone(), ttl);
                        inner.bump(&key);
                    }
                }
            }
            Ok(())
        }
    }

}
