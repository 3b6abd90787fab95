//! Circuit breaker pattern for fault tolerance

use crate::{AdapterError, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sync_config::CircuitBreakerSettings;
use tokio::sync::RwLock;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - requests pass through
    Closed,
    /// Failing - requests are rejected
    Open,
    /// Testing recovery - the next call decides
    HalfOpen,
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening circuit
    pub failure_threshold: u32,
    /// Time to wait before allowing a trial call
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &CircuitBreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold.max(1),
            reset_timeout: settings.reset_timeout(),
        }
    }
}

/// Thread-safe circuit breaker guarding one named downstream call
pub struct CircuitBreaker {
    name: String,
    state: RwLock<CircuitState>,
    failure_count: AtomicU32,
    last_failure_time: RwLock<Option<Instant>>,
    config: CircuitBreakerConfig,

    // Metrics
    total_requests: AtomicU64,
    total_failures: AtomicU64,
    rejected_requests: AtomicU64,
    circuit_opens: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            last_failure_time: RwLock::new(None),
            config,
            total_requests: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            rejected_requests: AtomicU64::new(0),
            circuit_opens: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute an operation through the circuit breaker
    ///
    /// While open, the future is dropped unpolled and
    /// [`AdapterError::CircuitOpen`] is returned.
    pub async fn call<F, T>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        if !self.should_attempt().await {
            self.rejected_requests.fetch_add(1, Ordering::Relaxed);
            return Err(AdapterError::CircuitOpen {
                name: self.name.clone(),
            });
        }

        match operation.await {
            Ok(result) => {
                self.on_success().await;
                Ok(result)
            }
            Err(error) => {
                self.on_failure().await;
                self.total_failures.fetch_add(1, Ordering::Relaxed);
                Err(error)
            }
        }
    }

    /// Check if we should allow an operation
    pub async fn should_attempt(&self) -> bool {
        let mut state = self.state.write().await;

        match *state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let last_failure = *self.last_failure_time.read().await;
                match last_failure {
                    Some(failure_time) if failure_time.elapsed() >= self.config.reset_timeout => {
                        *state = CircuitState::HalfOpen;
                        tracing::info!("Circuit breaker {} transitioning to half-open", self.name);
                        true
                    }
                    _ => false,
                }
            }
        }
    }

    /// Handle successful operation
    pub async fn on_success(&self) {
        let mut state = self.state.write().await;
        self.failure_count.store(0, Ordering::Relaxed);

        if *state == CircuitState::HalfOpen {
            *state = CircuitState::Closed;
            tracing::info!("Circuit breaker {} closed after successful trial", self.name);
        }
    }

    /// Handle failed operation
    pub async fn on_failure(&self) {
        let mut state = self.state.write().await;
        let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;

        *self.last_failure_time.write().await = Some(Instant::now());

        match *state {
            CircuitState::Closed => {
                if failures >= self.config.failure_threshold {
                    *state = CircuitState::Open;
                    self.circuit_opens.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        "Circuit breaker {} opened after {} failures",
                        self.name,
                        failures
                    );
                }
            }
            CircuitState::HalfOpen => {
                *state = CircuitState::Open;
                self.circuit_opens.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Circuit breaker {} reopened from half-open state", self.name);
            }
            CircuitState::Open => {}
        }
    }

    /// Get current circuit state
    pub async fn state(&self) -> CircuitState {
        *self.state.read().await
    }

    /// Get circuit breaker metrics
    pub async fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            name: self.name.clone(),
            state: self.state().await,
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            rejected_requests: self.rejected_requests.load(Ordering::Relaxed),
            circuit_opens: self.circuit_opens.load(Ordering::Relaxed),
            current_failure_count: self.failure_count.load(Ordering::Relaxed),
        }
    }

    /// Reset the circuit breaker
    pub async fn reset(&self) {
        *self.state.write().await = CircuitState::Closed;
        self.failure_count.store(0, Ordering::Relaxed);
        *self.last_failure_time.write().await = None;
    }
}

/// Metrics for circuit breaker monitoring
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerMetrics {
    pub name: String,
    pub state: CircuitState,
    /// Total requests attempted
    pub total_requests: u64,
    /// Total failed requests
    pub total_failures: u64,
    /// Requests rejected while open
    pub rejected_requests: u64,
    /// Number of times circuit opened
    pub circuit_opens: u64,
    /// Current consecutive failure count
    pub current_failure_count: u32,
}

/// Named breakers, created on first use and shared afterwards
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// Breaker for `name`, created with the registry defaults if absent
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.config.clone())))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Metrics of every breaker, sorted by name
    pub async fn metrics(&self) -> Vec<CircuitBreakerMetrics> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|entry| entry.value().clone()).collect();

        let mut metrics = Vec::with_capacity(breakers.len());
        for breaker in breakers {
            metrics.push(breaker.metrics().await);
        }
        metrics.sort_by(|a, b| a.name.cmp(&b.name));
        metrics
    }

    /// True when no breaker is open or half-open
    pub async fn all_closed(&self) -> bool {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|entry| entry.value().clone()).collect();

        for breaker in breakers {
            if breaker.state().await != CircuitState::Closed {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn breaker(threshold: u32, reset: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                reset_timeout: reset,
            },
        )
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<()> {
        breaker
            .call(async { Err(AdapterError::Network("down".into())) })
            .await
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_fails_fast() {
        let breaker = breaker(3, Duration::from_secs(60));
        for _ in 0..3 {
            assert!(fail(&breaker).await.is_err());
        }
        assert_eq!(breaker.state().await, CircuitState::Open);

        let invoked = AtomicUsize::new(0);
        let result = breaker
            .call(async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(AdapterError::CircuitOpen { .. })));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(breaker.metrics().await.rejected_requests, 1);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let breaker = breaker(3, Duration::from_secs(60));
        fail(&breaker).await.ok();
        fail(&breaker).await.ok();
        breaker.call(async { Ok(()) }).await.unwrap();
        fail(&breaker).await.ok();
        fail(&breaker).await.ok();

        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_success_closes() {
        let breaker = breaker(1, Duration::from_millis(20));
        fail(&breaker).await.ok();
        assert_eq!(breaker.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(40)).await;
        breaker.call(async { Ok(()) }).await.unwrap();

        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let breaker = breaker(1, Duration::from_millis(20));
        fail(&breaker).await.ok();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(matches!(fail(&breaker).await, Err(AdapterError::Network(_))));

        assert_eq!(breaker.state().await, CircuitState::Open);
        assert_eq!(breaker.metrics().await.circuit_opens, 2);
    }

    #[tokio::test]
    async fn test_registry_reuses_named_breakers() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
        let a = registry.get_or_create("game-a:fetch");
        let again = registry.get_or_create("game-a:fetch");
        registry.get_or_create("game-a:validate_asset");

        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(registry.len(), 2);
        assert!(registry.all_closed().await);
    }
}
