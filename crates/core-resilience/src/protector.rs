//! Keyed protection for fallible actions
//!
//! [`ResourceProtector`] pairs a circuit breaker with a rate limiter for
//! every action key and funnels all per-key state through one lock. The
//! lock is never held while the protected operation runs, so metrics and
//! reset calls are not blocked by a slow action.
//!
//! Check order for each call:
//!
//! 1. circuit breaker (open circuits fail fast; expired ones go half-open
//!    and admit a single trial until it reports back)
//! 2. rate limiter (a refusal does not count against the breaker)
//! 3. the operation itself; its outcome feeds the breaker

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::error::ResilienceError;
use crate::rate_limiter::RateLimiter;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Protection parameters for one action key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceProtectionConfig {
    /// Attempts admitted per `window`
    pub max_attempts: u32,
    /// Rate-limit window
    pub window: Duration,
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// How long an open circuit refuses calls
    pub open_duration: Duration,
    /// Consecutive half-open successes that close the circuit
    pub half_open_trial_count: u32,
}

impl Default for ResourceProtectionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            window: Duration::from_secs(60),
            failure_threshold: 3,
            open_duration: Duration::from_secs(300),
            half_open_trial_count: 1,
        }
    }
}

impl ResourceProtectionConfig {
    /// Reject parameters that would disable protection outright
    pub fn validate(&self) -> Result<(), ResilienceError> {
        if self.max_attempts == 0 {
            return Err(ResilienceError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.window.is_zero() {
            return Err(ResilienceError::InvalidConfig(
                "window must be greater than zero".to_string(),
            ));
        }
        if self.failure_threshold == 0 {
            return Err(ResilienceError::InvalidConfig(
                "failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.half_open_trial_count == 0 {
            return Err(ResilienceError::InvalidConfig(
                "half_open_trial_count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            open_duration: self.open_duration,
            half_open_trials: self.half_open_trial_count,
        }
    }
}

/// Point-in-time counters for one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectionMetrics {
    /// Operations actually invoked
    pub attempts: u64,
    /// Invoked operations that failed
    pub failures: u64,
    /// Calls refused by the rate limiter
    pub rate_limited: u64,
    /// Calls refused by an open circuit
    pub circuit_rejections: u64,
    /// Breaker state at the time of the read
    pub circuit_state: CircuitState,
}

#[derive(Debug)]
struct KeyState {
    breaker: CircuitBreaker,
    limiter: RateLimiter,
    attempts: u64,
    failures: u64,
    rate_limited: u64,
    circuit_rejections: u64,
}

impl KeyState {
    fn new(config: &ResourceProtectionConfig) -> Self {
        Self {
            breaker: CircuitBreaker::new(config.breaker_config()),
            limiter: RateLimiter::new(config.max_attempts, config.window),
            attempts: 0,
            failures: 0,
            rate_limited: 0,
            circuit_rejections: 0,
        }
    }

    fn apply(&mut self, config: &ResourceProtectionConfig) {
        self.breaker.reconfigure(config.breaker_config());
        self.limiter.reconfigure(config.max_attempts, config.window);
    }

    fn metrics(&self) -> ProtectionMetrics {
        ProtectionMetrics {
            attempts: self.attempts,
            failures: self.failures,
            rate_limited: self.rate_limited,
            circuit_rejections: self.circuit_rejections,
            circuit_state: self.breaker.state(),
        }
    }
}

#[derive(Debug, Default)]
struct ProtectorInner {
    configs: HashMap<String, ResourceProtectionConfig>,
    keys: HashMap<String, KeyState>,
}

/// Per-key rate limiter + circuit breaker around arbitrary async operations
///
/// # Example
/// ```
/// use tether_core_resilience::{ResourceProtector, ResourceProtectionConfig};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let protector = ResourceProtector::new(ResourceProtectionConfig::default());
///
/// let value = protector
///     .execute_protected("lock_screen", || async { Ok::<_, String>(7) })
///     .await
///     .unwrap();
/// assert_eq!(value, 7);
/// assert_eq!(protector.metrics("lock_screen").await.attempts, 1);
/// # }
/// ```
#[derive(Debug)]
pub struct ResourceProtector {
    default_config: ResourceProtectionConfig,
    inner: Mutex<ProtectorInner>,
}

impl ResourceProtector {
    /// Create a protector whose keys use `default_config` unless configured otherwise
    pub fn new(default_config: ResourceProtectionConfig) -> Self {
        Self {
            default_config,
            inner: Mutex::new(ProtectorInner::default()),
        }
    }

    /// Set the parameters for one key.
    ///
    /// Existing counters and breaker state are kept; only future decisions
    /// use the new limits.
    pub async fn configure(&self, key: &str, config: ResourceProtectionConfig) {
        let mut inner = self.inner.lock().await;
        if let Some(state) = inner.keys.get_mut(key) {
            state.apply(&config);
        }
        inner.configs.insert(key.to_string(), config);
    }

    /// Run `op` under the protection of `key`
    pub async fn execute_protected<F, Fut, T, E>(
        &self,
        key: &str,
        op: F,
    ) -> Result<T, ResilienceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.admit(key).await?;

        match op().await {
            Ok(value) => {
                self.record(key, true).await;
                Ok(value)
            }
            Err(e) => {
                self.record(key, false).await;
                Err(ResilienceError::ActionFailed {
                    key: key.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Counters and breaker state for `key`
    pub async fn metrics(&self, key: &str) -> ProtectionMetrics {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let state = Self::state_for(&mut inner, &self.default_config, key);
        // Surface an expired cooldown without admitting a call
        let mut circuit_state = state.breaker.state();
        if let CircuitState::Open { until } = circuit_state {
            if now >= until {
                circuit_state = CircuitState::HalfOpen {
                    trials_remaining: state.breaker.config().half_open_trials.max(1),
                };
            }
        }
        ProtectionMetrics {
            circuit_state,
            ..state.metrics()
        }
    }

    /// Drop all recorded state for `key` (administrative recovery)
    pub async fn reset(&self, key: &str) {
        let mut inner = self.inner.lock().await;
        if inner.keys.remove(key).is_some() {
            debug!(key, "protection state reset");
        }
    }

    /// Drop recorded state for every key
    pub async fn reset_all(&self) {
        self.inner.lock().await.keys.clear();
    }

    async fn admit(&self, key: &str) -> Result<(), ResilienceError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let state = Self::state_for(&mut inner, &self.default_config, key);

        if let Err(retry_after) = state.breaker.check_at(now) {
            state.circuit_rejections += 1;
            warn!(key, ?retry_after, "circuit open, action refused");
            return Err(ResilienceError::CircuitOpen {
                key: key.to_string(),
                retry_after,
            });
        }

        if let Err(retry_after) = state.limiter.try_acquire_at(now) {
            state.rate_limited += 1;
            warn!(key, ?retry_after, "rate limit reached, action refused");
            return Err(ResilienceError::RateLimited {
                key: key.to_string(),
                retry_after,
            });
        }

        state.attempts += 1;
        Ok(())
    }

    async fn record(&self, key: &str, success: bool) {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let state = Self::state_for(&mut inner, &self.default_config, key);
        if success {
            state.breaker.on_success();
        } else {
            state.failures += 1;
            state.breaker.on_failure_at(now);
        }
    }

    fn state_for<'a>(
        inner: &'a mut ProtectorInner,
        default_config: &ResourceProtectionConfig,
        key: &str,
    ) -> &'a mut KeyState {
        let ProtectorInner { configs, keys } = inner;
        keys.entry(key.to_string()).or_insert_with(|| {
            let config = configs.get(key).unwrap_or(default_config);
            KeyState::new(config)
        })
    }
}

impl Default for ResourceProtector {
    fn default() -> Self {
        Self::new(ResourceProtectionConfig::default())
    }
}
