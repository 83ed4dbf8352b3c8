//! Circuit breaker for upstream protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: upstream assumed down, requests fail fast
//! - Half-Open: testing if upstream recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: total >= failure_threshold AND failure rate >= expected_failure_rate
//! Open → Half-Open: first call at or after next_attempt
//! Half-Open → Closed: probe request succeeds (counters reset)
//! Half-Open → Open: probe request fails (next_attempt recomputed)
//! ```
//!
//! # Design Decisions
//! - One breaker per upstream service (see `registry.rs`)
//! - Fail fast in Open state, the wrapped call is never invoked
//! - Single probe in Half-Open: the check-and-transition runs under the state
//!   mutex and later callers are rejected until the probe settles
//! - `monitoring_period` is reported but does not decay counters; counters
//!   only reset when the breaker re-enters Closed

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::SharedClock;

/// Breaker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Minimum number of recorded calls before the failure rate is evaluated.
    pub failure_threshold: u32,

    /// How long to stay open before letting a probe through, in milliseconds.
    pub recovery_timeout_ms: u64,

    /// Informational window reported on the dashboard, in milliseconds.
    pub monitoring_period_ms: u64,

    /// Failure ratio (0..=1) at which the breaker opens.
    pub expected_failure_rate: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 30_000,
            monitoring_period_ms: 60_000,
            expected_failure_rate: 0.5,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }
}

/// Gate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Gauge value used for metrics (0 closed, 1 half-open, 2 open).
    pub fn as_gauge(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

/// Rejection returned while the circuit is open.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("circuit open for service '{service}', next attempt at {next_attempt}")]
pub struct CircuitOpen {
    pub service: String,
    /// Epoch milliseconds at which a probe will be allowed.
    pub next_attempt: u64,
}

/// Snapshot for the operational dashboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_requests: u32,
    pub failure_rate: f64,
    pub last_failure_time: Option<u64>,
    pub next_attempt: Option<u64>,
    pub monitoring_period_ms: u64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<u64>,
    next_attempt: u64,
    probe_in_flight: bool,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
            next_attempt: 0,
            probe_in_flight: false,
        }
    }
}

/// Circuit breaker guarding one upstream service.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: SharedClock,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            state: Mutex::new(BreakerState::closed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `call` through the breaker.
    ///
    /// Returns `E::from(CircuitOpen)` without invoking `call` while the
    /// circuit is open; otherwise returns whatever `call` produced, unchanged.
    pub async fn execute<F, Fut, T, E>(&self, call: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitOpen>,
    {
        let mut permit = self.acquire().map_err(E::from)?;
        let result = call().await;
        permit.settle(result.is_ok());
        result
    }

    /// Current state, without triggering transitions.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let s = self.lock();
        let total = s.failure_count + s.success_count;
        let failure_rate = if total == 0 {
            0.0
        } else {
            f64::from(s.failure_count) / f64::from(total)
        };
        CircuitBreakerStats {
            state: s.state,
            failure_count: s.failure_count,
            success_count: s.success_count,
            total_requests: total,
            failure_rate,
            last_failure_time: s.last_failure_time,
            next_attempt: (s.state == CircuitState::Open).then_some(s.next_attempt),
            monitoring_period_ms: self.config.monitoring_period_ms,
        }
    }

    /// Force the breaker closed with zeroed counters.
    pub fn reset(&self) {
        *self.lock() = BreakerState::closed();
        tracing::info!(service = %self.name, "Circuit breaker reset");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.state.lock().expect("circuit breaker mutex poisoned")
    }

    fn acquire(&self) -> Result<Permit<'_>, CircuitOpen> {
        let now = self.clock.now_ms();
        let mut s = self.lock();
        match s.state {
            CircuitState::Closed => Ok(Permit::new(self, false)),
            CircuitState::Open if now >= s.next_attempt => {
                s.state = CircuitState::HalfOpen;
                s.probe_in_flight = true;
                tracing::info!(service = %self.name, "Circuit half-open, sending probe");
                Ok(Permit::new(self, true))
            }
            CircuitState::HalfOpen if !s.probe_in_flight => {
                s.probe_in_flight = true;
                Ok(Permit::new(self, true))
            }
            _ => Err(CircuitOpen {
                service: self.name.clone(),
                next_attempt: s.next_attempt,
            }),
        }
    }

    fn record(&self, success: bool, probe: bool) {
        let now = self.clock.now_ms();
        let mut s = self.lock();

        if probe {
            s.probe_in_flight = false;
            if success {
                *s = BreakerState {
                    last_failure_time: s.last_failure_time,
                    ..BreakerState::closed()
                };
                tracing::info!(service = %self.name, "Probe succeeded, circuit closed");
            } else {
                s.failure_count += 1;
                s.last_failure_time = Some(now);
                s.state = CircuitState::Open;
                s.next_attempt = now + self.config.recovery_timeout_ms;
                tracing::warn!(
                    service = %self.name,
                    next_attempt = s.next_attempt,
                    "Probe failed, circuit re-opened"
                );
            }
            return;
        }

        // A call admitted while closed may settle after another call has
        // already opened the circuit; it only updates the counters then.
        if success {
            s.success_count += 1;
        } else {
            s.failure_count += 1;
            s.last_failure_time = Some(now);
        }

        if s.state != CircuitState::Closed {
            return;
        }

        let total = s.failure_count + s.success_count;
        if total >= self.config.failure_threshold {
            let rate = f64::from(s.failure_count) / f64::from(total);
            if rate >= self.config.expected_failure_rate {
                s.state = CircuitState::Open;
                s.next_attempt = now + self.config.recovery_timeout_ms;
                tracing::warn!(
                    service = %self.name,
                    failures = s.failure_count,
                    total,
                    failure_rate = rate,
                    next_attempt = s.next_attempt,
                    "Circuit opened"
                );
            }
        }
    }
}

/// Admission for one call. Dropping it unsettled (the caller's future was
/// cancelled) counts as a failure so a half-open probe can never wedge.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    fn settle(&mut self, success: bool) {
        self.settled = true;
        self.breaker.record(success, self.probe);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.record(false, self.probe);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    enum TestError {
        Boom,
        Open,
    }

    impl From<CircuitOpen> for TestError {
        fn from(_: CircuitOpen) -> Self {
            TestError::Open
        }
    }

    fn breaker(threshold: u32, rate: f64, recovery_ms: u64) -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = ManualClock::new(1_000_000);
        let config = CircuitBreakerConfig {
            failure_threshold: threshold,
            recovery_timeout_ms: recovery_ms,
            monitoring_period_ms: 60_000,
            expected_failure_rate: rate,
        };
        (CircuitBreaker::new("test", config, clock.clone()), clock)
    }

    async fn fail(b: &CircuitBreaker) -> Result<(), TestError> {
        b.execute(|| async { Err::<(), _>(TestError::Boom) }).await
    }

    async fn succeed(b: &CircuitBreaker) -> Result<&'static str, TestError> {
        b.execute(|| async { Ok::<_, TestError>("ok") }).await
    }

    #[tokio::test]
    async fn test_stays_closed_below_threshold() {
        let (b, _) = breaker(5, 0.5, 1000);
        for _ in 0..4 {
            let _ = fail(&b).await;
        }
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.stats().failure_count, 4);
    }

    #[tokio::test]
    async fn test_opens_when_rate_reached_and_rejects_without_calling() {
        let (b, _) = breaker(4, 0.5, 1000);
        succeed(&b).await.unwrap();
        succeed(&b).await.unwrap();
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Closed);
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Open);

        let calls = AtomicU32::new(0);
        let res: Result<(), TestError> = b
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert_eq!(res, Err(TestError::Open));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_low_failure_rate_keeps_closed() {
        let (b, _) = breaker(3, 0.5, 1000);
        succeed(&b).await.unwrap();
        succeed(&b).await.unwrap();
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Closed);
        assert!((b.stats().failure_rate - 1.0 / 3.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_recovery_scenario() {
        let (b, clock) = breaker(3, 0.5, 1000);
        for _ in 0..3 {
            assert_eq!(fail(&b).await, Err(TestError::Boom));
        }
        assert_eq!(b.state(), CircuitState::Open);

        clock.advance(200);
        let calls = AtomicU32::new(0);
        let res: Result<(), TestError> = b
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert_eq!(res, Err(TestError::Open));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        clock.advance(900);
        assert_eq!(succeed(&b).await, Ok("ok"));
        let stats = b.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.success_count, 0);
        assert_eq!(stats.next_attempt, None);
    }

    #[tokio::test]
    async fn test_failed_probe_reopens_with_new_deadline() {
        let (b, clock) = breaker(2, 0.5, 1000);
        let _ = fail(&b).await;
        let _ = fail(&b).await;
        let first = b.stats().next_attempt.unwrap();

        clock.advance(1000);
        assert_eq!(fail(&b).await, Err(TestError::Boom));
        let stats = b.stats();
        assert_eq!(stats.state, CircuitState::Open);
        assert_eq!(stats.next_attempt, Some(first + 1000));
    }

    #[tokio::test]
    async fn test_single_probe_while_half_open() {
        let (b, clock) = breaker(1, 0.5, 100);
        let _ = fail(&b).await;
        clock.advance(100);

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let b = Arc::new(b);
        let probe = {
            let b = b.clone();
            tokio::spawn(async move {
                b.execute(|| async move {
                    let _ = release_rx.await;
                    Ok::<_, TestError>("probe")
                })
                .await
            })
        };

        // Let the probe get admitted.
        while b.state() != CircuitState::HalfOpen {
            tokio::task::yield_now().await;
        }
        assert_eq!(succeed(&b).await, Err(TestError::Open));

        release_tx.send(()).unwrap();
        assert_eq!(probe.await.unwrap(), Ok("probe"));
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_cancelled_probe_counts_as_failure() {
        let (b, clock) = breaker(1, 0.5, 100);
        let _ = fail(&b).await;
        clock.advance(100);

        let fut = b.execute(|| std::future::pending::<Result<(), TestError>>());
        let _ = tokio::time::timeout(Duration::from_millis(5), fut).await;
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_reset_forces_closed() {
        let (b, _) = breaker(1, 0.1, 10_000);
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Open);
        b.reset();
        let stats = b.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.total_requests, 0);
        assert_eq!(succeed(&b).await, Ok("ok"));
    }
}
