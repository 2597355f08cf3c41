//! Sliding-window rate limiting
//!
//! Tracks the timestamps of admitted attempts and refuses a new attempt
//! once `max_attempts` of them fall inside the trailing `window`. A refused
//! attempt is not recorded, so a caller hammering a limited key does not
//! extend its own lockout.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Rate limiter using a sliding window of admission timestamps
///
/// # Example
/// ```
/// use tether_core_resilience::RateLimiter;
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// // At most 3 attempts per minute
/// let mut limiter = RateLimiter::new(3, Duration::from_secs(60));
/// for _ in 0..3 {
///     assert!(limiter.try_acquire().is_ok());
/// }
/// let retry_after = limiter.try_acquire().unwrap_err();
/// assert!(retry_after <= Duration::from_secs(60));
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct RateLimiter {
    /// Maximum attempts admitted per window
    max_attempts: u32,
    /// Length of the trailing window
    window: Duration,
    /// Admission times, oldest first
    admitted: VecDeque<Instant>,
}

impl RateLimiter {
    /// Create a new rate limiter
    ///
    /// # Arguments
    /// * `max_attempts` - Maximum number of attempts admitted inside `window`
    /// * `window` - Length of the trailing window
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
            admitted: VecDeque::new(),
        }
    }

    /// Create a rate limiter with attempts per minute
    pub fn per_minute(attempts_per_minute: u32) -> Self {
        Self::new(attempts_per_minute, Duration::from_secs(60))
    }

    /// Try to admit one attempt now
    ///
    /// Returns the time until the oldest attempt leaves the window when the
    /// limit is already met.
    pub fn try_acquire(&mut self) -> Result<(), Duration> {
        self.try_acquire_at(Instant::now())
    }

    /// Try to admit one attempt at `now`
    pub fn try_acquire_at(&mut self, now: Instant) -> Result<(), Duration> {
        self.prune(now);

        if self.admitted.len() as u64 >= u64::from(self.max_attempts) {
            let retry_after = self
                .admitted
                .front()
                .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
                .unwrap_or(self.window);
            return Err(retry_after);
        }

        self.admitted.push_back(now);
        Ok(())
    }

    /// Number of admitted attempts still inside the window
    pub fn attempts_in_window(&mut self) -> usize {
        self.prune(Instant::now());
        self.admitted.len()
    }

    /// Forget every recorded attempt
    pub fn reset(&mut self) {
        self.admitted.clear();
    }

    /// Replace the limiter parameters, keeping recorded attempts
    pub fn reconfigure(&mut self, max_attempts: u32, window: Duration) {
        self.max_attempts = max_attempts;
        self.window = window;
    }

    /// Get the maximum attempts per window
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Get the window length
    pub fn window(&self) -> Duration {
        self.window
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.admitted.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                self.admitted.pop_front();
            } else {
                break;
            }
        }
    }
}
