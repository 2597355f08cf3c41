//! Scriptable collaborators for tests
//!
//! Every mock records what it was asked to do so tests can assert on call
//! order, and can be told to fail or delay.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tether_core_interface::{
    ActionRunner, ActionType, AlarmPlayer, AuthMethod, AuthOutcome, AuthPolicy,
    AuthenticationGateway, NotificationPresenter, PowerState, PowerStateProvider, Result,
    SecurityAction, SystemError,
};
use tokio::sync::watch;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Action runner that records calls and fails on demand
///
/// # Example
///
/// ```rust
/// use tether::system::MockActionRunner;
/// use tether_core_interface::{ActionRunner, ActionType, SecurityAction};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let runner = MockActionRunner::new();
/// runner.fail(ActionType::LogOut, "no session");
///
/// assert!(runner.run(&SecurityAction::LockScreen).await.is_ok());
/// assert!(runner.run(&SecurityAction::LogOut).await.is_err());
/// assert_eq!(runner.calls(), vec![ActionType::LockScreen, ActionType::LogOut]);
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MockActionRunner {
    actions: Mutex<Vec<SecurityAction>>,
    failures: Mutex<HashMap<ActionType, String>>,
    delay: Mutex<Option<Duration>>,
}

impl MockActionRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future run of `kind` fail with `reason`
    pub fn fail(&self, kind: ActionType, reason: &str) {
        lock(&self.failures).insert(kind, reason.to_string());
    }

    /// Make `kind` succeed again
    pub fn succeed(&self, kind: ActionType) {
        lock(&self.failures).remove(&kind);
    }

    /// Sleep for `delay` inside every run
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = Some(delay);
    }

    /// Kinds run so far, in order
    pub fn calls(&self) -> Vec<ActionType> {
        lock(&self.actions).iter().map(|a| a.kind()).collect()
    }

    /// Full actions run so far, in order
    pub fn actions(&self) -> Vec<SecurityAction> {
        lock(&self.actions).clone()
    }

    pub fn call_count(&self, kind: ActionType) -> usize {
        lock(&self.actions).iter().filter(|a| a.kind() == kind).count()
    }

    pub fn total_calls(&self) -> usize {
        lock(&self.actions).len()
    }
}

#[async_trait]
impl ActionRunner for MockActionRunner {
    async fn run(&self, action: &SecurityAction) -> Result<()> {
        lock(&self.actions).push(action.clone());

        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = lock(&self.failures).get(&action.kind()).cloned();
        match failure {
            Some(reason) => Err(SystemError::Invalid(reason)),
            None => Ok(()),
        }
    }
}

/// Authentication gateway with scripted outcomes
///
/// Queued outcomes are returned first, then the default outcome.
#[derive(Debug)]
pub struct MockAuthenticator {
    queued: Mutex<VecDeque<AuthOutcome>>,
    default_outcome: Mutex<AuthOutcome>,
    requests: Mutex<Vec<(String, AuthPolicy)>>,
    delay: Mutex<Option<Duration>>,
}

impl MockAuthenticator {
    /// Succeeds biometrically unless told otherwise
    pub fn new() -> Self {
        Self::with_default(AuthOutcome::Success {
            method: AuthMethod::Biometric,
        })
    }

    pub fn with_default(outcome: AuthOutcome) -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            default_outcome: Mutex::new(outcome),
            requests: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self::with_default(AuthOutcome::Failure(reason.to_string()))
    }

    pub fn cancelling() -> Self {
        Self::with_default(AuthOutcome::Cancelled)
    }

    /// Return `outcome` for the next request only
    pub fn push(&self, outcome: AuthOutcome) {
        lock(&self.queued).push_back(outcome);
    }

    pub fn set_default(&self, outcome: AuthOutcome) {
        *lock(&self.default_outcome) = outcome;
    }

    /// Keep every request pending for `delay` before answering
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = Some(delay);
    }

    /// Reasons and policies seen so far
    pub fn requests(&self) -> Vec<(String, AuthPolicy)> {
        lock(&self.requests).clone()
    }

    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }
}

impl Default for MockAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthenticationGateway for MockAuthenticator {
    async fn authenticate(&self, reason: &str, policy: &AuthPolicy) -> AuthOutcome {
        lock(&self.requests).push((reason.to_string(), *policy));

        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let queued = lock(&self.queued).pop_front();
        queued.unwrap_or_else(|| lock(&self.default_outcome).clone())
    }
}

/// Notification presenter that keeps every message
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<(String, String)> {
        lock(&self.sent).clone()
    }

    pub fn titles(&self) -> Vec<String> {
        lock(&self.sent).iter().map(|(t, _)| t.clone()).collect()
    }
}

impl NotificationPresenter for RecordingNotifier {
    fn notify(&self, title: &str, message: &str) {
        lock(&self.sent).push((title.to_string(), message.to_string()));
    }
}

/// Power source driven by the test
#[derive(Debug)]
pub struct MockPowerSource {
    sender: watch::Sender<PowerState>,
}

impl MockPowerSource {
    pub fn new(initial: PowerState) -> Self {
        let (sender, _) = watch::channel(initial);
        Self { sender }
    }

    /// Publish a new reading
    pub fn set(&self, state: PowerState) {
        self.sender.send_replace(state);
    }

    pub fn current(&self) -> PowerState {
        *self.sender.borrow()
    }
}

impl PowerStateProvider for MockPowerSource {
    fn subscribe(&self) -> watch::Receiver<PowerState> {
        self.sender.subscribe()
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Alarm that records the requested volumes
#[derive(Debug, Default)]
pub struct MockAlarm {
    volumes: Mutex<Vec<f32>>,
    failure: Mutex<Option<String>>,
}

impl MockAlarm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, reason: &str) {
        *lock(&self.failure) = Some(reason.to_string());
    }

    pub fn volumes(&self) -> Vec<f32> {
        lock(&self.volumes).clone()
    }

    pub fn play_count(&self) -> usize {
        lock(&self.volumes).len()
    }
}

#[async_trait]
impl AlarmPlayer for MockAlarm {
    async fn play(&self, volume: f32) -> Result<()> {
        lock(&self.volumes).push(volume);
        match lock(&self.failure).clone() {
            Some(reason) => Err(SystemError::Unsupported(reason)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_authenticator_queue_then_default() {
        let auth = MockAuthenticator::new();
        auth.push(AuthOutcome::Cancelled);

        let policy = AuthPolicy::disarm();
        assert_eq!(auth.authenticate("first", &policy).await, AuthOutcome::Cancelled);
        assert!(auth.authenticate("second", &policy).await.is_success());
        assert_eq!(auth.request_count(), 2);
        assert_eq!(auth.requests()[0].0, "first");
    }

    #[tokio::test]
    async fn test_runner_failure_can_be_cleared() {
        let runner = MockActionRunner::new();
        runner.fail(ActionType::Shutdown, "denied");
        let action = SecurityAction::Shutdown {
            after: Duration::ZERO,
        };

        assert!(runner.run(&action).await.is_err());
        runner.succeed(ActionType::Shutdown);
        assert!(runner.run(&action).await.is_ok());
        assert_eq!(runner.call_count(ActionType::Shutdown), 2);
    }

    #[test]
    fn test_power_source_publishes() {
        let source = MockPowerSource::new(PowerState::Connected);
        let rx = source.subscribe();
        source.set(PowerState::Disconnected);
        assert_eq!(*rx.borrow(), PowerState::Disconnected);
        assert_eq!(source.current(), PowerState::Disconnected);
    }

    #[test]
    fn test_notifier_records() {
        let notifier = RecordingNotifier::new();
        notifier.notify("Tether armed", "Watching power");
        assert_eq!(notifier.titles(), vec!["Tether armed".to_string()]);
    }
}
