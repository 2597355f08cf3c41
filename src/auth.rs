/*!
 * Authentication guard
 *
 * [`GuardedAuthenticator`] wraps any [`AuthenticationGateway`] with two
 * protections the state machine relies on: a short-lived success cache,
 * bounded by each policy's `cache_duration`, and a sliding-window cap on
 * backend attempts.
 */

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tether_core_interface::{AuthMethod, AuthOutcome, AuthPolicy, AuthenticationGateway};
use tether_core_resilience::RateLimiter;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Backend attempts allowed per window by default
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default attempt window
pub const DEFAULT_ATTEMPT_WINDOW: Duration = Duration::from_secs(300);

/// Hex SHA-256 digest of a password, as stored in the config file
pub fn password_digest(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Compare `password` against a stored hex digest
///
/// The digests are compared in constant time; a malformed stored digest
/// never matches.
pub fn verify_password(password: &str, digest: &str) -> bool {
    let Ok(expected) = hex::decode(digest.trim()) else {
        return false;
    };
    let actual = Sha256::digest(password.as_bytes());
    if expected.len() != actual.len() {
        return false;
    }
    expected
        .iter()
        .zip(actual.iter())
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}

#[derive(Debug, Clone, Copy)]
struct CachedSuccess {
    method: AuthMethod,
    at: Instant,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Caching, rate-limited wrapper around an authentication backend
#[derive(Debug)]
pub struct GuardedAuthenticator<G> {
    inner: G,
    cache: Mutex<Option<CachedSuccess>>,
    limiter: Mutex<RateLimiter>,
}

impl<G: AuthenticationGateway> GuardedAuthenticator<G> {
    pub fn new(inner: G) -> Self {
        Self::with_limits(inner, DEFAULT_MAX_ATTEMPTS, DEFAULT_ATTEMPT_WINDOW)
    }

    pub fn with_limits(inner: G, max_attempts: u32, window: Duration) -> Self {
        Self {
            inner,
            cache: Mutex::new(None),
            limiter: Mutex::new(RateLimiter::new(max_attempts, window)),
        }
    }

    /// Forget any cached success
    pub fn invalidate(&self) {
        lock(&self.cache).take();
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }

    fn cached(&self, policy: &AuthPolicy) -> Option<AuthMethod> {
        let cache = lock(&self.cache);
        let entry = (*cache)?;
        let fresh = entry.at.elapsed() < policy.cache_duration;
        (fresh && policy.accepts(entry.method)).then_some(entry.method)
    }
}

#[async_trait]
impl<G: AuthenticationGateway> AuthenticationGateway for GuardedAuthenticator<G> {
    async fn authenticate(&self, reason: &str, policy: &AuthPolicy) -> AuthOutcome {
        if let Some(method) = self.cached(policy) {
            debug!(%method, "reusing cached authentication");
            return AuthOutcome::Success { method };
        }

        let admitted = lock(&self.limiter).try_acquire();
        if let Err(retry_after) = admitted {
            warn!(?retry_after, "authentication attempts exhausted");
            return AuthOutcome::Failure(format!(
                "too many authentication attempts, retry after {}s",
                retry_after.as_secs().max(1)
            ));
        }

        let outcome = self.inner.authenticate(reason, policy).await;
        match &outcome {
            AuthOutcome::Success { method } => {
                *lock(&self.cache) = Some(CachedSuccess {
                    method: *method,
                    at: Instant::now(),
                });
            }
            AuthOutcome::Failure(_) | AuthOutcome::Cancelled => self.invalidate(),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::mock::MockAuthenticator;

    #[test]
    fn test_password_digest() {
        let digest = password_digest("correct horse");
        assert_eq!(digest.len(), 64);
        assert!(verify_password("correct horse", &digest));
        assert!(verify_password("correct horse", &digest.to_uppercase()));
        assert!(!verify_password("battery staple", &digest));
        assert!(!verify_password("correct horse", "not hex"));
        assert!(!verify_password("correct horse", &digest[..32]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_is_cached_within_policy_window() {
        let guard = GuardedAuthenticator::new(MockAuthenticator::new());
        let policy = AuthPolicy::disarm();

        assert!(guard.authenticate("disarm", &policy).await.is_success());
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(guard.authenticate("disarm", &policy).await.is_success());
        assert_eq!(guard.inner().request_count(), 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(guard.authenticate("disarm", &policy).await.is_success());
        assert_eq!(guard.inner().request_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_password_does_not_satisfy_biometric_policy() {
        let guard = GuardedAuthenticator::new(MockAuthenticator::with_default(
            AuthOutcome::Success {
                method: AuthMethod::Password,
            },
        ));

        guard
            .authenticate("disarm", &AuthPolicy::disarm())
            .await;
        guard
            .authenticate("cancel", &AuthPolicy::cancel_grace_period())
            .await;

        assert_eq!(guard.inner().request_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_not_cached() {
        let guard = GuardedAuthenticator::new(MockAuthenticator::failing("no match"));
        let policy = AuthPolicy::disarm();

        assert!(!guard.authenticate("disarm", &policy).await.is_success());
        assert!(!guard.authenticate("disarm", &policy).await.is_success());
        assert_eq!(guard.inner().request_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_are_rate_limited() {
        let guard = GuardedAuthenticator::with_limits(
            MockAuthenticator::failing("no match"),
            2,
            Duration::from_secs(60),
        );
        let policy = AuthPolicy::disarm();

        guard.authenticate("disarm", &policy).await;
        guard.authenticate("disarm", &policy).await;
        let third = guard.authenticate("disarm", &policy).await;

        assert!(matches!(third, AuthOutcome::Failure(ref m) if m.contains("too many")));
        assert_eq!(guard.inner().request_count(), 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        guard.authenticate("disarm", &policy).await;
        assert_eq!(guard.inner().request_count(), 3);
    }
}
