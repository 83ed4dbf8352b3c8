//! Two-tier response cache.
//!
//! # Data Flow
//! ```text
//! get(key):
//!     → durable store (if configured and reachable)
//!     → process-local map (TTL checked, expired entries evicted)
//!     → miss
//!
//! set(key, value, ttl, tags):
//!     → process-local map + tag index (oldest entry evicted when full)
//!     → durable store SETEX (failures logged, never raised)
//! ```
//!
//! # Design Decisions
//! - The memory tier is the safety net: it is always written, whatever the
//!   durable store does
//! - Reads never fail; a miss is `None`
//! - The tag index lives with the memory tier and is updated under the same
//!   lock as the values, so an evicted key never lingers in a tag set
//! - Durable keys are namespaced by `key_prefix`; `clear` only touches that
//!   namespace because the store may be shared

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::pattern::glob_match;
use crate::cache::store::DurableKeyValueStore;
use crate::clock::SharedClock;
use crate::observability::metrics;

/// Cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries in the process-local tier.
    pub max_entries: usize,

    /// TTL used when a caller has no better idea, in seconds.
    pub default_ttl_secs: u64,

    /// Namespace prepended to every key in the durable store.
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            default_ttl_secs: 300,
            key_prefix: "bff:".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: u64,
    tags: Vec<String>,
    seq: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: u64) -> bool {
        now > self.expires_at
    }
}

/// Process-local tier: values, insertion order and tag index.
#[derive(Debug, Default)]
struct MemoryTier {
    entries: HashMap<String, CacheEntry>,
    order: BTreeMap<u64, String>,
    tags: HashMap<String, HashSet<String>>,
    next_seq: u64,
}

impl MemoryTier {
    /// Insert, returning how many entries were evicted for capacity.
    fn insert(&mut self, key: &str, value: Value, expires_at: u64, tags: Vec<String>, cap: usize) -> u64 {
        self.remove(key);

        let seq = self.next_seq;
        self.next_seq += 1;
        for tag in &tags {
            self.tags.entry(tag.clone()).or_default().insert(key.to_string());
        }
        self.order.insert(seq, key.to_string());
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at,
                tags,
                seq,
            },
        );

        let mut evicted = 0;
        while self.entries.len() > cap.max(1) {
            let Some((_, oldest)) = self.order.pop_first() else {
                break;
            };
            tracing::debug!(key = %oldest, "Evicting oldest cache entry");
            self.remove(&oldest);
            evicted += 1;
        }
        evicted
    }

    /// Remove from the value index, the order index and every tag set.
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.seq);
        for tag in &entry.tags {
            if let Some(keys) = self.tags.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tags.remove(tag);
                }
            }
        }
        Some(entry)
    }

    /// Live value for `key`; an expired entry is evicted on the way.
    fn get_live(&mut self, key: &str, now: u64) -> Option<Value> {
        let expired = self.entries.get(key)?.is_expired(now);
        if expired {
            self.remove(key);
            return None;
        }
        self.entries.get(key).map(|e| e.value.clone())
    }

    fn live_keys(&self, pattern: &str, now: u64) -> impl Iterator<Item = &String> + '_ {
        let pattern = pattern.to_string();
        self.entries
            .iter()
            .filter(move |(k, e)| !e.is_expired(now) && glob_match(&pattern, k))
            .map(|(k, _)| k)
    }

    fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        self.order.clear();
        self.tags.clear();
        n
    }
}

/// Cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
    pub durable_errors: u64,
    pub memory_entries: usize,
    pub max_entries: usize,
    pub tags: usize,
    pub hit_rate: f64,
    pub durable_configured: bool,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    evictions: AtomicU64,
    durable_errors: AtomicU64,
}

/// Read-through cache over an optional durable store and a bounded local map.
#[derive(Debug)]
pub struct CacheManager {
    config: CacheConfig,
    memory: Mutex<MemoryTier>,
    durable: Option<Arc<dyn DurableKeyValueStore>>,
    clock: SharedClock,
    counters: Counters,
}

impl CacheManager {
    pub fn new(
        config: CacheConfig,
        durable: Option<Arc<dyn DurableKeyValueStore>>,
        clock: SharedClock,
    ) -> Self {
        Self {
            config,
            memory: Mutex::new(MemoryTier::default()),
            durable,
            clock,
            counters: Counters::default(),
        }
    }

    /// Memory-only cache.
    pub fn in_memory(config: CacheConfig, clock: SharedClock) -> Self {
        Self::new(config, None, clock)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn has_durable_store(&self) -> bool {
        self.durable.is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryTier> {
        self.memory.lock().expect("cache mutex poisoned")
    }

    fn durable_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    fn durable_failed(&self, op: &'static str, key: &str, error: &dyn std::fmt::Display) {
        self.counters.durable_errors.fetch_add(1, Ordering::Relaxed);
        metrics::record_store_fallback("cache");
        tracing::warn!(op, key = %key, error = %error, "Durable cache operation failed, using memory tier");
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        if let Some(store) = &self.durable {
            match store.get(&self.durable_key(key)).await {
                Ok(Some(raw)) => match serde_json::from_str::<Value>(&raw) {
                    Ok(value) => {
                        self.counters.hits.fetch_add(1, Ordering::Relaxed);
                        metrics::record_cache_hit("durable");
                        tracing::debug!(key = %key, "cache hit (durable)");
                        return Some(value);
                    }
                    Err(e) => tracing::warn!(key = %key, error = %e, "Undecodable durable cache value"),
                },
                Ok(None) => {}
                Err(e) => self.durable_failed("get", key, &e),
            }
        }

        let now = self.clock.now_ms();
        let value = self.lock().get_live(key, now);
        match value {
            Some(value) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_hit("memory");
                tracing::debug!(key = %key, "cache hit (memory)");
                Some(value)
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_miss();
                tracing::debug!(key = %key, "cache miss");
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: Value, ttl: Duration, tags: &[String]) {
        let expires_at = self.clock.now_ms() + ttl.as_millis() as u64;
        let raw = self.durable.as_ref().map(|_| value.to_string());

        let evicted = self.lock().insert(
            key,
            value,
            expires_at,
            tags.to_vec(),
            self.config.max_entries,
        );
        self.counters.sets.fetch_add(1, Ordering::Relaxed);
        if evicted > 0 {
            self.counters.evictions.fetch_add(evicted, Ordering::Relaxed);
        }

        if let (Some(store), Some(raw)) = (&self.durable, raw) {
            if let Err(e) = store.set_ex(&self.durable_key(key), &raw, ttl).await {
                self.durable_failed("set", key, &e);
            }
        }
        tracing::debug!(key = %key, ttl_ms = ttl.as_millis() as u64, tags = ?tags, "cache set");
    }

    /// Remove one key from both tiers. Returns true if either tier had it.
    pub async fn del(&self, key: &str) -> bool {
        let in_memory = self.lock().remove(key).is_some();
        let in_durable = match &self.durable {
            Some(store) => match store.del(&[self.durable_key(key)]).await {
                Ok(n) => n > 0,
                Err(e) => {
                    self.durable_failed("del", key, &e);
                    false
                }
            },
            None => false,
        };
        in_memory || in_durable
    }

    pub async fn exists(&self, key: &str) -> bool {
        if let Some(store) = &self.durable {
            match store.exists(&self.durable_key(key)).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => self.durable_failed("exists", key, &e),
            }
        }
        let now = self.clock.now_ms();
        self.lock().get_live(key, now).is_some()
    }

    /// Live keys matching a glob pattern across both tiers, sorted.
    pub async fn keys(&self, pattern: &str) -> Vec<String> {
        let mut keys = BTreeSet::new();
        if let Some(store) = &self.durable {
            match store.keys(&self.durable_key(pattern)).await {
                Ok(found) => keys.extend(found.into_iter().filter_map(|k| {
                    k.strip_prefix(&self.config.key_prefix).map(str::to_string)
                })),
                Err(e) => self.durable_failed("keys", pattern, &e),
            }
        }
        let now = self.clock.now_ms();
        keys.extend(self.lock().live_keys(pattern, now).cloned());
        keys.into_iter().collect()
    }

    /// Remove every key matching `pattern`. Returns the number removed.
    pub async fn purge(&self, pattern: &str) -> usize {
        let keys = self.keys(pattern).await;
        if keys.is_empty() {
            return 0;
        }
        self.remove_keys(&keys).await;
        tracing::info!(pattern = %pattern, removed = keys.len(), "Purged cache keys");
        keys.len()
    }

    /// Remove every key carrying any of `tags`. Returns the number removed.
    pub async fn invalidate_by_tags(&self, tags: &[String]) -> usize {
        let keys: Vec<String> = {
            let memory = self.lock();
            let mut keys = BTreeSet::new();
            for tag in tags {
                if let Some(tagged) = memory.tags.get(tag) {
                    keys.extend(tagged.iter().cloned());
                }
            }
            keys.into_iter().collect()
        };
        if keys.is_empty() {
            return 0;
        }
        self.remove_keys(&keys).await;
        tracing::info!(tags = ?tags, removed = keys.len(), "Invalidated cache by tags");
        keys.len()
    }

    async fn remove_keys(&self, keys: &[String]) {
        {
            let mut memory = self.lock();
            for key in keys {
                memory.remove(key);
            }
        }
        if let Some(store) = &self.durable {
            let durable_keys: Vec<String> = keys.iter().map(|k| self.durable_key(k)).collect();
            if let Err(e) = store.del(&durable_keys).await {
                self.durable_failed("del", &format!("{} keys", keys.len()), &e);
            }
        }
    }

    /// Drop everything in this cache's namespace. Returns memory entries dropped.
    pub async fn clear(&self) -> usize {
        let cleared = self.lock().clear();
        if let Some(store) = &self.durable {
            let pattern = self.durable_key("*");
            match store.keys(&pattern).await {
                Ok(keys) => {
                    if let Err(e) = store.del(&keys).await {
                        self.durable_failed("clear", &pattern, &e);
                    }
                }
                Err(e) => self.durable_failed("clear", &pattern, &e),
            }
        }
        tracing::info!(cleared, "Cache cleared");
        cleared
    }

    pub fn stats(&self) -> CacheStats {
        let (memory_entries, tags) = {
            let memory = self.lock();
            (memory.entries.len(), memory.tags.len())
        };
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        metrics::record_cache_size(memory_entries);
        CacheStats {
            hits,
            misses,
            sets: self.counters.sets.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            durable_errors: self.counters.durable_errors.load(Ordering::Relaxed),
            memory_entries,
            max_entries: self.config.max_entries,
            tags,
            hit_rate: if total == 0 { 0.0 } else { hits as f64 / total as f64 },
            durable_configured: self.durable.is_some(),
        }
    }
}
