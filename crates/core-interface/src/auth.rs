//! Authentication policy contract

use std::fmt;
use std::time::Duration;

/// How the user proved their identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMethod {
    Biometric,
    Password,
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Biometric => f.write_str("biometric"),
            AuthMethod::Password => f.write_str("password"),
        }
    }
}

/// What a state transition demands from the authentication backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthPolicy {
    /// Only a biometric proof is acceptable
    pub require_biometric: bool,
    /// A password may stand in for biometrics
    pub allow_password_fallback: bool,
    /// How long a previous success may be reused
    pub cache_duration: Duration,
}

impl AuthPolicy {
    /// Disarming: biometric preferred, password fallback allowed
    pub fn disarm() -> Self {
        Self {
            require_biometric: false,
            allow_password_fallback: true,
            cache_duration: Duration::from_secs(30),
        }
    }

    /// Cancelling a running grace period: biometric required, short cache
    pub fn cancel_grace_period() -> Self {
        Self {
            require_biometric: true,
            allow_password_fallback: false,
            cache_duration: Duration::from_secs(5),
        }
    }

    /// Whether a proof made with `method` satisfies this policy
    pub fn accepts(&self, method: AuthMethod) -> bool {
        match method {
            AuthMethod::Biometric => true,
            AuthMethod::Password => !self.require_biometric && self.allow_password_fallback,
        }
    }
}

/// Result of one authentication request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Success { method: AuthMethod },
    Failure(String),
    Cancelled,
}

impl AuthOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AuthOutcome::Success { .. })
    }
}
