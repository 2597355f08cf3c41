//! Error types for the resilience crate

use std::time::Duration;
use thiserror::Error;

/// Errors produced by protected execution
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResilienceError {
    /// The circuit for `key` is open; the operation was not invoked
    #[error("circuit open for '{key}', retry after {retry_after:?}")]
    CircuitOpen { key: String, retry_after: Duration },

    /// Too many attempts for `key` inside the rate window; the operation was not invoked
    #[error("rate limit exceeded for '{key}', retry after {retry_after:?}")]
    RateLimited { key: String, retry_after: Duration },

    /// The operation ran and failed
    #[error("action '{key}' failed: {reason}")]
    ActionFailed { key: String, reason: String },

    /// Protection parameters are unusable
    #[error("invalid protection config: {0}")]
    InvalidConfig(String),
}

impl ResilienceError {
    /// The protection key this error refers to, if any
    pub fn key(&self) -> Option<&str> {
        match self {
            ResilienceError::CircuitOpen { key, .. }
            | ResilienceError::RateLimited { key, .. }
            | ResilienceError::ActionFailed { key, .. } => Some(key),
            ResilienceError::InvalidConfig(_) => None,
        }
    }

    /// How long the caller should wait before trying again.
    ///
    /// `None` for errors where the operation was actually invoked.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ResilienceError::CircuitOpen { retry_after, .. }
            | ResilienceError::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// True when the protector refused to invoke the operation
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ResilienceError::CircuitOpen { .. } | ResilienceError::RateLimited { .. }
        )
    }
}
