//! Tether Core Resilience: protection primitives for destructive actions
//!
//! # Overview
//!
//! Every protective action Tether runs (screen lock, logout, shutdown,
//! scripts) goes through a [`ResourceProtector`], so a flapping power cable
//! or a persistently failing OS call cannot turn into an unbounded loop of
//! destructive attempts. The crate provides:
//!
//! - **Rate Limiter**: sliding-window cap on attempts per key
//! - **Circuit Breaker**: stops invoking a key that keeps failing, with half-open trials
//! - **Resource Protector**: both of the above, keyed, behind one lock
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of power monitoring,
//! authentication or the operating system. Time comes from
//! `tokio::time::Instant`, so tests can pause and advance the clock.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       Security Action Executor          │
//! └─────────────┬───────────────────────────┘
//!               │ execute_protected(key, op)
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Circuit Breaker                   │  ← Fail fast while open
//! └─────────────┬───────────────────────────┘
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Rate Limiter                      │  ← Cap attempts per window
//! └─────────────┬───────────────────────────┘
//!               ▼
//!          Action Runner
//!     (lock, logout, shutdown, ...)
//! ```
//!
//! # Usage Example
//!
//! ```
//! use tether_core_resilience::{ResilienceError, ResourceProtectionConfig, ResourceProtector};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let protector = ResourceProtector::new(ResourceProtectionConfig {
//!     max_attempts: 1,
//!     window: Duration::from_secs(60),
//!     ..Default::default()
//! });
//!
//! protector
//!     .execute_protected("shutdown", || async { Ok::<_, String>(()) })
//!     .await
//!     .unwrap();
//!
//! let second = protector
//!     .execute_protected("shutdown", || async { Ok::<_, String>(()) })
//!     .await;
//! assert!(matches!(second, Err(ResilienceError::RateLimited { .. })));
//! # }
//! ```

pub mod circuit_breaker;
pub mod error;
pub mod protector;
pub mod rate_limiter;

// Re-export main types for convenience
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use error::ResilienceError;
pub use protector::{ProtectionMetrics, ResourceProtectionConfig, ResourceProtector};
pub use rate_limiter::RateLimiter;

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use tether_core_resilience::prelude::*;
/// ```
pub mod prelude {
    pub use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
    pub use super::error::ResilienceError;
    pub use super::protector::{ProtectionMetrics, ResourceProtectionConfig, ResourceProtector};
    pub use super::rate_limiter::RateLimiter;
}
