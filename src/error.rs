/*!
 * Error types for Tether
 */

use std::fmt;
use std::io;
use std::time::Duration;

use tether_core_interface::{ActionType, SystemError};
use tether_core_resilience::ResilienceError;

use crate::core::state::ArmingState;

pub type Result<T> = std::result::Result<T, TetherError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;
pub const EXIT_AUTH: i32 = 3;

#[derive(Debug)]
pub enum TetherError {
    /// Operation not legal from the current state
    InvalidState {
        operation: &'static str,
        state: ArmingState,
    },

    /// The proof offered does not satisfy the policy (e.g. password where biometrics are required)
    AuthenticationRequired(String),

    /// The authentication backend rejected the user
    AuthenticationFailed(String),

    /// The user dismissed the authentication prompt
    AuthenticationCancelled,

    /// Configuration disallows cancelling the grace period
    GracePeriodNotCancellable,

    /// Too many attempts for a protected key
    RateLimited { key: String, retry_after: Duration },

    /// The circuit for a protected key is open
    CircuitOpen { key: String, retry_after: Duration },

    /// A protective action did not complete
    ActionFailed {
        action: ActionType,
        cause: ActionFailure,
    },

    /// A custom script was refused before execution
    ScriptValidationFailed(String),

    /// Configuration error
    Config(String),

    /// I/O error
    Io(io::Error),

    /// Audit log error
    Audit(String),
}

/// Why a single action in an execution pass failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionFailure {
    /// Refused by the rate limiter; the runner was not invoked
    RateLimited { retry_after: Duration },
    /// Refused by an open circuit; the runner was not invoked
    CircuitOpen { retry_after: Duration },
    /// The runner was invoked and reported an error
    Runner(String),
    /// The script was refused before reaching the protector
    ScriptValidation(String),
}

impl ActionFailure {
    /// True when the runner was never invoked
    pub fn was_refused(&self) -> bool {
        !matches!(self, ActionFailure::Runner(_))
    }
}

impl From<ResilienceError> for ActionFailure {
    fn from(err: ResilienceError) -> Self {
        match err {
            ResilienceError::RateLimited { retry_after, .. } => {
                ActionFailure::RateLimited { retry_after }
            }
            ResilienceError::CircuitOpen { retry_after, .. } => {
                ActionFailure::CircuitOpen { retry_after }
            }
            ResilienceError::ActionFailed { reason, .. } => ActionFailure::Runner(reason),
            ResilienceError::InvalidConfig(reason) => ActionFailure::Runner(reason),
        }
    }
}

impl fmt::Display for ActionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionFailure::RateLimited { retry_after } => {
                write!(f, "rate limited, retry after {}s", retry_after.as_secs())
            }
            ActionFailure::CircuitOpen { retry_after } => {
                write!(f, "circuit open, retry after {}s", retry_after.as_secs())
            }
            ActionFailure::Runner(reason) => write!(f, "{}", reason),
            ActionFailure::ScriptValidation(reason) => {
                write!(f, "script validation failed: {}", reason)
            }
        }
    }
}

impl TetherError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            TetherError::Config(_) | TetherError::ScriptValidationFailed(_) => EXIT_FATAL,
            TetherError::AuthenticationRequired(_)
            | TetherError::AuthenticationFailed(_)
            | TetherError::AuthenticationCancelled => EXIT_AUTH,
            _ => EXIT_PARTIAL,
        }
    }

    /// True for the authentication family of errors
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            TetherError::AuthenticationRequired(_)
                | TetherError::AuthenticationFailed(_)
                | TetherError::AuthenticationCancelled
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            TetherError::InvalidState { .. } | TetherError::GracePeriodNotCancellable => {
                ErrorCategory::State
            }
            TetherError::AuthenticationRequired(_)
            | TetherError::AuthenticationFailed(_)
            | TetherError::AuthenticationCancelled => ErrorCategory::Security,
            TetherError::RateLimited { .. } | TetherError::CircuitOpen { .. } => {
                ErrorCategory::Protection
            }
            TetherError::ActionFailed { .. } | TetherError::ScriptValidationFailed(_) => {
                ErrorCategory::Action
            }
            TetherError::Config(_) => ErrorCategory::Configuration,
            TetherError::Io(_) => ErrorCategory::IoError,
            TetherError::Audit(_) => ErrorCategory::Audit,
        }
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Illegal transitions
    State,
    /// Authentication errors
    Security,
    /// Rate limiting and circuit breaking
    Protection,
    /// Protective action failures
    Action,
    /// Configuration errors
    Configuration,
    /// I/O operation errors
    IoError,
    /// Audit logging errors
    Audit,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::State => write!(f, "state"),
            ErrorCategory::Security => write!(f, "security"),
            ErrorCategory::Protection => write!(f, "protection"),
            ErrorCategory::Action => write!(f, "action"),
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::IoError => write!(f, "io"),
            ErrorCategory::Audit => write!(f, "audit"),
        }
    }
}

impl fmt::Display for TetherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TetherError::InvalidState { operation, state } => {
                write!(f, "Cannot {} while {}", operation, state)
            }
            TetherError::AuthenticationRequired(msg) => {
                write!(f, "Stronger authentication required: {}", msg)
            }
            TetherError::AuthenticationFailed(msg) => {
                write!(f, "Authentication failed: {}", msg)
            }
            TetherError::AuthenticationCancelled => write!(f, "Authentication cancelled"),
            TetherError::GracePeriodNotCancellable => {
                write!(f, "The grace period is configured as not cancellable")
            }
            TetherError::RateLimited { key, retry_after } => {
                write!(
                    f,
                    "Rate limit reached for {}, retry after {}s",
                    key,
                    retry_after.as_secs()
                )
            }
            TetherError::CircuitOpen { key, retry_after } => {
                write!(
                    f,
                    "Circuit open for {}, retry after {}s",
                    key,
                    retry_after.as_secs()
                )
            }
            TetherError::ActionFailed { action, cause } => {
                write!(f, "Action {} failed: {}", action, cause)
            }
            TetherError::ScriptValidationFailed(msg) => {
                write!(f, "Script validation failed: {}", msg)
            }
            TetherError::Config(msg) => write!(f, "Configuration error: {}", msg),
            TetherError::Io(err) => write!(f, "I/O error: {}", err),
            TetherError::Audit(msg) => write!(f, "Audit log error: {}", msg),
        }
    }
}

impl std::error::Error for TetherError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TetherError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for TetherError {
    fn from(err: io::Error) -> Self {
        TetherError::Io(err)
    }
}

impl From<toml::de::Error> for TetherError {
    fn from(err: toml::de::Error) -> Self {
        TetherError::Config(format!("TOML parse error: {}", err))
    }
}

impl From<SystemError> for TetherError {
    fn from(err: SystemError) -> Self {
        match err {
            SystemError::Io(io_err) => TetherError::Io(io_err),
            SystemError::Invalid(msg) => TetherError::Config(msg),
            other => TetherError::Config(other.to_string()),
        }
    }
}

impl From<ResilienceError> for TetherError {
    fn from(err: ResilienceError) -> Self {
        match err {
            ResilienceError::RateLimited { key, retry_after } => {
                TetherError::RateLimited { key, retry_after }
            }
            ResilienceError::CircuitOpen { key, retry_after } => {
                TetherError::CircuitOpen { key, retry_after }
            }
            ResilienceError::ActionFailed { key, reason } => match key.parse::<ActionType>() {
                Ok(action) => TetherError::ActionFailed {
                    action,
                    cause: ActionFailure::Runner(reason),
                },
                Err(_) => TetherError::Config(format!("{} failed: {}", key, reason)),
            },
            ResilienceError::InvalidConfig(msg) => TetherError::Config(msg),
        }
    }
}
