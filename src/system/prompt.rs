//! Interactive password authentication for the console front end

use async_trait::async_trait;
use dialoguer::{theme::ColorfulTheme, Password};
use tether_core_interface::{AuthMethod, AuthOutcome, AuthPolicy, AuthenticationGateway};
use tracing::debug;

use crate::auth::verify_password;

/// Prompts on the terminal and checks the answer against a SHA-256 digest
///
/// Never produces a biometric proof, so policies that require biometrics
/// are refused without prompting.
#[derive(Debug, Clone)]
pub struct PasswordPrompt {
    digest: Option<String>,
}

impl PasswordPrompt {
    pub fn new(digest: Option<String>) -> Self {
        Self { digest }
    }

    /// Decide the outcome for an entered password
    pub fn check(&self, entered: &str) -> AuthOutcome {
        match &self.digest {
            Some(digest) if verify_password(entered, digest) => AuthOutcome::Success {
                method: AuthMethod::Password,
            },
            Some(_) => AuthOutcome::Failure("incorrect password".to_string()),
            None => AuthOutcome::Failure("no password configured".to_string()),
        }
    }
}

#[async_trait]
impl AuthenticationGateway for PasswordPrompt {
    async fn authenticate(&self, reason: &str, policy: &AuthPolicy) -> AuthOutcome {
        if !policy.accepts(AuthMethod::Password) {
            return AuthOutcome::Failure(
                "biometric authentication is required and unavailable".to_string(),
            );
        }
        if self.digest.is_none() {
            return AuthOutcome::Failure(
                "no password configured, run `tether hash-password`".to_string(),
            );
        }

        let prompt = reason.to_string();
        let entered = tokio::task::spawn_blocking(move || {
            Password::with_theme(&ColorfulTheme::default())
                .with_prompt(prompt)
                .interact()
        })
        .await;

        match entered {
            Ok(Ok(password)) => self.check(&password),
            Ok(Err(e)) => {
                debug!(error = %e, "password prompt aborted");
                AuthOutcome::Cancelled
            }
            Err(e) => AuthOutcome::Failure(format!("password prompt failed: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password_digest;

    #[test]
    fn test_check_against_digest() {
        let prompt = PasswordPrompt::new(Some(password_digest("hunter2")));
        assert!(prompt.check("hunter2").is_success());
        assert_eq!(
            prompt.check("hunter3"),
            AuthOutcome::Failure("incorrect password".to_string())
        );
    }

    #[tokio::test]
    async fn test_biometric_policy_refused_without_prompt() {
        let prompt = PasswordPrompt::new(Some(password_digest("hunter2")));
        let outcome = prompt
            .authenticate("cancel", &AuthPolicy::cancel_grace_period())
            .await;
        assert!(matches!(outcome, AuthOutcome::Failure(ref m) if m.contains("biometric")));
    }

    #[tokio::test]
    async fn test_missing_digest_refused_without_prompt() {
        let prompt = PasswordPrompt::new(None);
        let outcome = prompt.authenticate("disarm", &AuthPolicy::disarm()).await;
        assert!(!outcome.is_success());
    }
}
