//! Durable key-value store collaborators.
//!
//! # Responsibilities
//! - Define the contract the cache and the distributed rate limiter need
//!   from an external store
//! - Provide a Redis adapter and an in-process adapter
//!
//! # Design Decisions
//! - The core only ever sees the traits, never a concrete client
//! - Every Redis call carries its own deadline so an unreachable store
//!   degrades to memory-only behaviour quickly instead of stalling requests
//! - The store is shared with other processes; nothing here assumes
//!   exclusive ownership of the keyspace

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::cache::pattern::{glob_match, to_redis_glob};
use crate::clock::SharedClock;

/// Errors from a durable store. Callers log these; they never reach clients.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("durable store unavailable: {0}")]
    Unavailable(String),

    #[error("durable store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Key-value contract used by the cache manager.
#[async_trait]
pub trait DurableKeyValueStore: Send + Sync + std::fmt::Debug {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Delete `keys`, returning how many existed.
    async fn del(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// Keys matching a glob pattern (`*` and `?`; everything else literal).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Cheap reachability check.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// State of a fixed window after one hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterWindow {
    /// Hits recorded in the current window, including this one.
    pub count: u64,
    /// Milliseconds until the window resets.
    pub ttl_ms: u64,
}

/// Atomic windowed counters used by the distributed rate limiter.
#[async_trait]
pub trait CounterStore: Send + Sync + std::fmt::Debug {
    /// Increment `key`, opening a window of `window` on the first hit.
    async fn hit(&self, key: &str, window: Duration) -> Result<CounterWindow, StoreError>;
}

/// One store seen through both contracts.
#[derive(Debug, Clone)]
pub struct StoreHandles {
    pub kv: Arc<dyn DurableKeyValueStore>,
    pub counters: Arc<dyn CounterStore>,
}

impl StoreHandles {
    pub fn new<S>(store: Arc<S>) -> Self
    where
        S: DurableKeyValueStore + CounterStore + 'static,
    {
        Self {
            kv: store.clone(),
            counters: store,
        }
    }
}

// INCR and set the expiry only when the key was just created, then report
// the remaining lifetime. Runs atomically on the server.
const HIT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
  ttl = tonumber(ARGV[1])
end
return {count, ttl}
";

/// Redis-backed store.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    op_timeout: Duration,
    hit_script: redis::Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("op_timeout", &self.op_timeout)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str, op_timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = match tokio::time::timeout(op_timeout, ConnectionManager::new(client)).await {
            Ok(conn) => conn?,
            Err(_) => return Err(StoreError::Timeout(op_timeout)),
        };
        tracing::info!("Connected to Redis durable store");
        Ok(Self {
            conn,
            op_timeout,
            hit_script: redis::Script::new(HIT_SCRIPT),
        })
    }

    async fn bounded<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.op_timeout, op).await {
            Ok(res) => res.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout(self.op_timeout)),
        }
    }
}

#[async_trait]
impl DurableKeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        self.bounded(async move { conn.get(key).await }).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        self.bounded(async move { conn.set(key, value).await }).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let ttl_ms = (ttl.as_millis() as u64).max(1);
        self.bounded(async move { conn.pset_ex(key, value, ttl_ms).await })
            .await
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        self.bounded(async move { conn.del(keys).await }).await
    }

    /// Walks the keyspace with `SCAN MATCH`; `KEYS` would block a shared instance.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let pattern = to_redis_glob(pattern);
        self.bounded(async move {
            let mut iter: redis::AsyncIter<'_, String> = conn.scan_match(&pattern).await?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            // SCAN may report a key more than once.
            keys.sort_unstable();
            keys.dedup();
            Ok::<_, redis::RedisError>(keys)
        })
        .await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        self.bounded(async move { conn.exists(key).await }).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _pong: String = self
            .bounded(async move { redis::cmd("PING").query_async(&mut conn).await })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn hit(&self, key: &str, window: Duration) -> Result<CounterWindow, StoreError> {
        let mut conn = self.conn.clone();
        let window_ms = (window.as_millis() as u64).max(1);
        let script = &self.hit_script;
        let (count, ttl_ms): (u64, i64) = self
            .bounded(async move { script.key(key).arg(window_ms).invoke_async(&mut conn).await })
            .await?;
        Ok(CounterWindow {
            count,
            ttl_ms: ttl_ms.max(0) as u64,
        })
    }
}

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Option<u64>,
}

/// In-process store with the same semantics as the Redis adapter.
///
/// Useful for single-instance deployments and tests; `set_available(false)`
/// makes every call fail the way an unreachable server would.
#[derive(Debug)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, StoredValue>>,
    available: AtomicBool,
    clock: SharedClock,
}

impl InMemoryStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            clock,
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("memory store mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, StoredValue>>, StoreError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store switched off".into()));
        }
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock().expect("memory store mutex poisoned");
        entries.retain(|_, v| v.expires_at.map_or(true, |at| at > now));
        Ok(entries)
    }
}

#[async_trait]
impl DurableKeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.guard()?.get(key).map(|v| v.value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.guard()?.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = self.clock.now_ms() + ttl.as_millis() as u64;
        self.guard()?.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at: Some(expires_at),
            },
        );
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        let mut entries = self.guard()?;
        Ok(keys.iter().filter(|k| entries.remove(*k).is_some()).count() as u64)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .guard()?
            .keys()
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.guard()?.contains_key(key))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.guard().map(|_| ())
    }
}

#[async_trait]
impl CounterStore for InMemoryStore {
    async fn hit(&self, key: &str, window: Duration) -> Result<CounterWindow, StoreError> {
        let now = self.clock.now_ms();
        let mut entries = self.guard()?;
        let entry = entries.entry(key.to_string()).or_insert_with(|| StoredValue {
            value: "0".to_string(),
            expires_at: Some(now + window.as_millis() as u64),
        });
        let count = entry.value.parse::<u64>().unwrap_or(0) + 1;
        entry.value = count.to_string();
        let ttl_ms = entry.expires_at.map(|at| at.saturating_sub(now)).unwrap_or(0);
        Ok(CounterWindow { count, ttl_ms })
    }
}
