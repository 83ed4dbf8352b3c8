//! Named circuit breakers, one per upstream service.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::clock::SharedClock;
use crate::observability::metrics;
use crate::resilience::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState,
};

/// Lazily creates and hands out breakers by service name.
#[derive(Debug)]
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: CircuitBreakerConfig,
    clock: SharedClock,
}

impl BreakerRegistry {
    pub fn new(config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
            clock,
        }
    }

    /// Breaker for `service`, created on first use.
    pub fn get(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(service) {
            return existing.clone();
        }
        self.breakers
            .entry(service.to_string())
            .or_insert_with(|| {
                tracing::debug!(service = %service, "Creating circuit breaker");
                Arc::new(CircuitBreaker::new(service, self.config, self.clock.clone()))
            })
            .clone()
    }

    /// Existing breaker only; never creates.
    pub fn find(&self, service: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(service).map(|b| b.clone())
    }

    /// Stats for every known breaker, ordered by name.
    pub fn stats(&self) -> BTreeMap<String, CircuitBreakerStats> {
        self.breakers
            .iter()
            .map(|entry| {
                let stats = entry.value().stats();
                metrics::record_breaker_state(entry.key(), stats.state);
                (entry.key().clone(), stats)
            })
            .collect()
    }

    /// Names of breakers currently open.
    pub fn open_circuits(&self) -> Vec<String> {
        let mut open: Vec<String> = self
            .breakers
            .iter()
            .filter(|entry| entry.value().state() == CircuitState::Open)
            .map(|entry| entry.key().clone())
            .collect();
        open.sort();
        open
    }

    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }
}
