//! Request deduplication (single-flight).
//!
//! # Responsibilities
//! - Coalesce concurrent calls sharing a key into one execution
//! - Retry the underlying call with exponential backoff
//! - Hand every waiter the same settled result, success or error
//!
//! # Design Decisions
//! - The in-flight future is registered before it is first polled, so a
//!   caller arriving at any point before settlement observes it
//! - Entries are reused only inside a short coalescing window; an older
//!   pending entry is replaced by a fresh execution
//! - Each execution runs on its own task, so it settles (and releases any
//!   breaker admission it holds) even when every waiter has gone away
//! - The settled task removes its own entry, matched by id so a newer
//!   execution under the same key is left alone
//! - The map is soft-capped; the oldest entries are dropped from tracking
//!   (not cancelled) when the cap is exceeded

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};

use crate::clock::SharedClock;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::timeouts::EndpointPolicy;

/// Deduplicator configuration.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct DedupConfig {
    /// How long a pending request may be joined by new callers, in milliseconds.
    pub window_ms: u64,

    /// Soft cap on tracked pending requests.
    pub max_pending: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_ms: 1_000,
            max_pending: 1_000,
        }
    }
}

/// Retry settings for one deduplicated execution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DedupeOptions {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for DedupeOptions {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_delay: Duration::from_millis(1_000),
            backoff_multiplier: 2.0,
        }
    }
}

impl From<&EndpointPolicy> for DedupeOptions {
    fn from(policy: &EndpointPolicy) -> Self {
        Self {
            max_retries: policy.max_retries,
            retry_delay: policy.retry_delay,
            backoff_multiplier: policy.backoff_multiplier,
        }
    }
}

/// Failures the deduplicator may retry.
///
/// Errors that a repeat call cannot fix (a missing resource) return false and
/// settle on the first attempt.
pub trait Retryable {
    fn is_retryable(&self) -> bool {
        true
    }
}

/// Operational snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupStats {
    pub pending: usize,
    pub max_pending: usize,
    pub window_ms: u64,
    pub oldest_pending: Option<u64>,
}

type SharedCall<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

struct Pending<T, E>
where
    T: Clone,
    E: Clone,
{
    future: SharedCall<T, E>,
    started_at: u64,
    id: u64,
}

struct Inner<T, E>
where
    T: Clone,
    E: Clone,
{
    pending: Mutex<HashMap<String, Pending<T, E>>>,
    next_id: AtomicU64,
    config: DedupConfig,
    clock: SharedClock,
}

impl<T: Clone, E: Clone> Inner<T, E> {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Pending<T, E>>> {
        self.pending.lock().expect("dedup mutex poisoned")
    }

    fn settle(&self, key: &str, id: u64) {
        let mut pending = self.lock();
        if pending.get(key).map(|p| p.id) == Some(id) {
            pending.remove(key);
        }
    }
}

/// Coalesces concurrent calls by key.
pub struct RequestDeduplicator<T, E>
where
    T: Clone,
    E: Clone,
{
    inner: Arc<Inner<T, E>>,
}

impl<T: Clone, E: Clone> std::fmt::Debug for RequestDeduplicator<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDeduplicator")
            .field("pending", &self.inner.lock().len())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl<T, E> RequestDeduplicator<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Display + Retryable + Send + Sync + 'static,
{
    pub fn new(config: DedupConfig, clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                config,
                clock,
            }),
        }
    }

    /// Run `call` under `key`, or join the execution already in flight.
    pub async fn dedupe<F, Fut>(&self, key: &str, call: F, options: DedupeOptions) -> Result<T, E>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let shared = {
            let now = self.inner.clock.now_ms();
            let mut pending = self.inner.lock();

            match pending.get(key) {
                Some(p) if now.saturating_sub(p.started_at) < self.inner.config.window_ms => {
                    tracing::debug!(key = %key, "Joining in-flight request");
                    p.future.clone()
                }
                _ => {
                    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                    let future = self.start(key, id, call, options);
                    pending.insert(
                        key.to_string(),
                        Pending {
                            future: future.clone(),
                            started_at: now,
                            id,
                        },
                    );
                    evict_oldest(&mut pending, self.inner.config.max_pending);
                    future
                }
            }
        };

        shared.await
    }

    fn start<F, Fut>(&self, key: &str, id: u64, call: F, options: DedupeOptions) -> SharedCall<T, E>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let inner: Weak<Inner<T, E>> = Arc::downgrade(&self.inner);
        let key = key.to_string();
        let execution = tokio::spawn(async move {
            let result = with_retries(&key, call, options).await;
            if let Some(inner) = inner.upgrade() {
                inner.settle(&key, id);
            }
            result
        });

        async move {
            match execution.await {
                Ok(result) => result,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                // Only cancelled by runtime shutdown, which drops the waiters too.
                Err(_) => std::future::pending().await,
            }
        }
        .boxed()
        .shared()
    }

    pub fn stats(&self) -> DedupStats {
        let pending = self.inner.lock();
        DedupStats {
            pending: pending.len(),
            max_pending: self.inner.config.max_pending,
            window_ms: self.inner.config.window_ms,
            oldest_pending: pending.values().map(|p| p.started_at).min(),
        }
    }

    /// Forget every tracked request. In-flight executions keep running for
    /// the callers already waiting on them.
    pub fn clear(&self) {
        let mut pending = self.inner.lock();
        let dropped = pending.len();
        pending.clear();
        tracing::info!(dropped, "Cleared pending request map");
    }
}

fn evict_oldest<T: Clone, E: Clone>(pending: &mut HashMap<String, Pending<T, E>>, cap: usize) {
    while pending.len() > cap {
        let Some(oldest) = pending
            .iter()
            .min_by_key(|(_, p)| (p.started_at, p.id))
            .map(|(k, _)| k.clone())
        else {
            break;
        };
        tracing::debug!(key = %oldest, "Evicting oldest pending request");
        pending.remove(&oldest);
    }
}

async fn with_retries<T, E, F, Fut>(key: &str, call: F, options: DedupeOptions) -> Result<T, E>
where
    E: Display + Retryable,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < options.max_retries && e.is_retryable() => {
                attempt += 1;
                let delay = calculate_backoff(attempt, options.retry_delay, options.backoff_multiplier);
                tracing::info!(
                    key = %key,
                    attempt,
                    delay = ?delay,
                    error = %e,
                    "Retrying upstream call"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if attempt > 0 {
                    tracing::warn!(key = %key, attempts = attempt + 1, error = %e, "Retries exhausted");
                }
                return Err(e);
            }
        }
    }
}
