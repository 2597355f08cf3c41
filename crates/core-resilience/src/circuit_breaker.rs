//! Circuit Breaker implementation for fault tolerance
//!
//! The circuit breaker stops invoking an action whose underlying call keeps
//! failing. It has three states:
//! - Closed: Normal operation, calls pass through
//! - Open: The action is failing, calls are refused until the cooldown ends
//! - HalfOpen: Cooldown elapsed, trial calls decide the outcome one at a time

use std::time::Duration;
use tokio::time::Instant;

/// State of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, calls pass through normally
    Closed,
    /// Circuit is open, calls fail immediately until `until`
    Open { until: Instant },
    /// Circuit is half-open; this many consecutive successes close it again
    HalfOpen { trials_remaining: u32 },
}

impl CircuitState {
    /// Short lowercase name for logs and tables
    pub fn label(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen { .. } => "half-open",
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before allowing a trial
    pub open_duration: Duration,
    /// Consecutive half-open successes required to close the circuit
    pub half_open_trials: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            open_duration: Duration::from_secs(300),
            half_open_trials: 1,
        }
    }
}

/// Circuit breaker state for a single protected key
///
/// This type holds no lock; the owner serializes access. See
/// [`ResourceProtector`](crate::ResourceProtector) for the shared, keyed form.
///
/// # Example
/// ```
/// use tether_core_resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut breaker = CircuitBreaker::new(CircuitBreakerConfig {
///     failure_threshold: 2,
///     open_duration: Duration::from_secs(30),
///     half_open_trials: 1,
/// });
///
/// breaker.on_failure();
/// breaker.on_failure();
/// assert!(matches!(breaker.state(), CircuitState::Open { .. }));
/// assert!(breaker.check().is_err());
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    consecutive_failures: u32,
    /// A half-open trial was admitted and has not reported back
    trial_in_flight: bool,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            trial_in_flight: false,
        }
    }

    /// Create a new circuit breaker with default configuration
    pub fn new_default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    /// Get the current state of the circuit breaker
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Get current consecutive failure count
    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures
    }

    /// Get the active configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Replace the configuration; the current state is kept
    pub fn reconfigure(&mut self, config: CircuitBreakerConfig) {
        self.config = config;
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.trial_in_flight = false;
    }

    /// Decide whether a call may proceed now
    pub fn check(&mut self) -> Result<(), Duration> {
        self.check_at(Instant::now())
    }

    /// Decide whether a call may proceed at `now`
    ///
    /// An open circuit whose cooldown has passed moves to half-open and the
    /// call is admitted as a trial. Half-open admits one trial at a time;
    /// calls made while it runs are refused with a zero retry-after.
    /// Otherwise returns the time left open.
    pub fn check_at(&mut self, now: Instant) -> Result<(), Duration> {
        match self.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen { .. } => self.begin_trial(),
            CircuitState::Open { until } => {
                if now >= until {
                    self.state = CircuitState::HalfOpen {
                        trials_remaining: self.config.half_open_trials.max(1),
                    };
                    self.begin_trial()
                } else {
                    Err(until.saturating_duration_since(now))
                }
            }
        }
    }

    /// True while a half-open trial is outstanding
    pub fn trial_in_flight(&self) -> bool {
        self.trial_in_flight
    }

    fn begin_trial(&mut self) -> Result<(), Duration> {
        if self.trial_in_flight {
            return Err(Duration::ZERO);
        }
        self.trial_in_flight = true;
        Ok(())
    }

    /// Record a successful call
    pub fn on_success(&mut self) {
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures = 0;
            }
            CircuitState::HalfOpen { trials_remaining } => {
                self.trial_in_flight = false;
                let remaining = trials_remaining.saturating_sub(1);
                if remaining == 0 {
                    self.state = CircuitState::Closed;
                    self.consecutive_failures = 0;
                } else {
                    self.state = CircuitState::HalfOpen {
                        trials_remaining: remaining,
                    };
                }
            }
            CircuitState::Open { .. } => {
                // A call admitted before the circuit opened finished late
                self.consecutive_failures = 0;
            }
        }
    }

    /// Record a failed call
    pub fn on_failure(&mut self) {
        self.on_failure_at(Instant::now());
    }

    /// Record a failed call at `now`
    pub fn on_failure_at(&mut self, now: Instant) {
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.config.failure_threshold {
                    self.open(now);
                }
            }
            CircuitState::HalfOpen { .. } => {
                // Any failure in half-open reopens with a fresh cooldown
                self.trial_in_flight = false;
                self.consecutive_failures += 1;
                self.open(now);
            }
            CircuitState::Open { .. } => {}
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open {
            until: now + self.config.open_duration,
        };
        tracing::debug!(
            failures = self.consecutive_failures,
            cooldown = ?self.config.open_duration,
            "circuit opened"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32, open_ms: u64, trials: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            open_duration: Duration::from_millis(open_ms),
            half_open_trials: trials,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_closed_to_open() {
        let mut breaker = CircuitBreaker::new(config(3, 100, 1));

        for _ in 0..2 {
            breaker.on_failure();
            assert_eq!(breaker.state(), CircuitState::Closed);
        }
        breaker.on_failure();

        match breaker.state() {
            CircuitState::Open { .. } => (),
            state => panic!("Expected Open state, got {:?}", state),
        }
        assert_eq!(breaker.check().unwrap_err(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_consecutive_failures() {
        let mut breaker = CircuitBreaker::new(config(2, 100, 1));

        breaker.on_failure();
        breaker.on_success();
        breaker.on_failure();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_half_open_to_closed() {
        let mut breaker = CircuitBreaker::new(config(2, 50, 2));
        breaker.on_failure();
        breaker.on_failure();

        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(breaker.check().is_ok());
        assert_eq!(
            breaker.state(),
            CircuitState::HalfOpen {
                trials_remaining: 2
            }
        );

        breaker.on_success();
        assert_eq!(
            breaker.state(),
            CircuitState::HalfOpen {
                trials_remaining: 1
            }
        );

        assert!(breaker.check().is_ok());
        breaker.on_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_one_trial_at_a_time() {
        let mut breaker = CircuitBreaker::new(config(1, 50, 2));
        breaker.on_failure();
        tokio::time::advance(Duration::from_millis(50)).await;

        assert!(breaker.check().is_ok());
        assert!(breaker.trial_in_flight());
        assert_eq!(breaker.check().unwrap_err(), Duration::ZERO);
        assert_eq!(breaker.check().unwrap_err(), Duration::ZERO);

        breaker.on_success();
        assert!(!breaker.trial_in_flight());
        assert!(breaker.check().is_ok());
        assert!(breaker.check().is_err());
        breaker.on_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.check().is_ok());
        assert!(breaker.check().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let mut breaker = CircuitBreaker::new(config(1, 50, 3));
        breaker.on_failure();

        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(breaker.check().is_ok());
        breaker.on_failure();

        match breaker.state() {
            CircuitState::Open { until } => {
                assert_eq!(until, Instant::now() + Duration::from_millis(50));
            }
            state => panic!("Expected Open state, got {:?}", state),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset() {
        let mut breaker = CircuitBreaker::new(config(1, 1_000, 1));
        breaker.on_failure();

        breaker.reset();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
        assert!(breaker.check().is_ok());
    }
}
