/*!
 * Protective action execution
 *
 * Actions run one at a time in configured order, each through the
 * [`ResourceProtector`] under its action key and bounded by a run limit.
 * A failing or hung action never stops the ones after it; failures are
 * collected into the [`ExecutionResult`].
 */

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tether_core_interface::{ActionRunner, ActionType, AlarmPlayer, SecurityAction};
use tether_core_resilience::{ResilienceError, ResourceProtector};
use tracing::{debug, error, info, warn};

use super::script::validate_script;
use super::state::format_seconds;
use crate::config::Settings;
use crate::error::{ActionFailure, TetherError};

/// Protection key used for the grace-period alarm
pub const ALARM_KEY: &str = "alarm";

/// Run limit used by [`SecurityActionExecutor::execute_actions`]
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Runner lookup: one runner for every kind, optionally replaced per kind
#[derive(Clone)]
pub struct ActionRunners {
    default: Arc<dyn ActionRunner>,
    overrides: HashMap<ActionType, Arc<dyn ActionRunner>>,
}

impl ActionRunners {
    /// Use `runner` for every action kind
    pub fn uniform(runner: Arc<dyn ActionRunner>) -> Self {
        Self {
            default: runner,
            overrides: HashMap::new(),
        }
    }

    /// Replace the runner for one kind
    pub fn with(mut self, kind: ActionType, runner: Arc<dyn ActionRunner>) -> Self {
        self.overrides.insert(kind, runner);
        self
    }

    pub fn runner_for(&self, kind: ActionType) -> &Arc<dyn ActionRunner> {
        self.overrides.get(&kind).unwrap_or(&self.default)
    }
}

impl std::fmt::Debug for ActionRunners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRunners")
            .field("overrides", &self.overrides.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Aggregate outcome of one execution pass
#[derive(Debug, Default)]
pub struct ExecutionResult {
    /// True when every action completed
    pub all_succeeded: bool,
    /// Completed actions, in execution order
    pub succeeded: Vec<ActionType>,
    /// Failed actions with their [`TetherError::ActionFailed`] detail
    pub failed_actions: Vec<(ActionType, TetherError)>,
}

impl ExecutionResult {
    pub fn failure_count(&self) -> usize {
        self.failed_actions.len()
    }

    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed_actions.len()
    }

    /// One-line summary for audit details and notifications
    pub fn summary(&self) -> String {
        if self.failed_actions.is_empty() {
            return format!("{} of {} actions succeeded", self.succeeded.len(), self.attempted());
        }
        let failures: Vec<String> = self
            .failed_actions
            .iter()
            .map(|(_, err)| err.to_string())
            .collect();
        format!(
            "{} of {} actions failed: {}",
            self.failed_actions.len(),
            self.attempted(),
            failures.join("; ")
        )
    }
}

/// Runs configured actions through the resource protector
pub struct SecurityActionExecutor {
    runners: ActionRunners,
    protector: Arc<ResourceProtector>,
    alarm: Option<Arc<dyn AlarmPlayer>>,
}

impl SecurityActionExecutor {
    pub fn new(runners: ActionRunners, protector: Arc<ResourceProtector>) -> Self {
        Self {
            runners,
            protector,
            alarm: None,
        }
    }

    pub fn with_alarm(mut self, alarm: Arc<dyn AlarmPlayer>) -> Self {
        self.alarm = Some(alarm);
        self
    }

    pub fn protector(&self) -> &Arc<ResourceProtector> {
        &self.protector
    }

    /// Push the per-action protection parameters from `settings`
    ///
    /// Counters and breaker state survive reconfiguration.
    pub async fn apply_protection(&self, settings: &Settings) {
        for kind in settings.actions.iter() {
            self.protector
                .configure(kind.key(), settings.protection_for(*kind))
                .await;
        }
    }

    /// Run every action in order, collecting failures
    pub async fn execute_actions(&self, actions: &[SecurityAction]) -> ExecutionResult {
        self.execute_actions_within(actions, DEFAULT_ACTION_TIMEOUT)
            .await
    }

    /// Like [`execute_actions`](Self::execute_actions), failing any single
    /// action that runs longer than `limit`
    pub async fn execute_actions_within(
        &self,
        actions: &[SecurityAction],
        limit: Duration,
    ) -> ExecutionResult {
        let mut result = ExecutionResult::default();

        for action in actions {
            let kind = action.kind();
            match self.execute_one(action, limit).await {
                Ok(()) => {
                    info!(action = %kind, "action completed");
                    result.succeeded.push(kind);
                }
                Err(cause) => {
                    result
                        .failed_actions
                        .push((kind, TetherError::ActionFailed { action: kind, cause }));
                }
            }
        }

        result.all_succeeded = result.failed_actions.is_empty();
        result
    }

    async fn execute_one(
        &self,
        action: &SecurityAction,
        limit: Duration,
    ) -> Result<(), ActionFailure> {
        let kind = action.kind();

        if let SecurityAction::RunCustomScript { path } = action {
            if let Err(e) = validate_script(path) {
                let reason = match e {
                    TetherError::ScriptValidationFailed(reason) => reason,
                    other => other.to_string(),
                };
                warn!(script = %path.display(), reason = %reason, "custom script refused");
                return Err(ActionFailure::ScriptValidation(reason));
            }
        }

        let runner = self.runners.runner_for(kind);
        debug!(action = %kind, "running protected action");

        self.protector
            .execute_protected(kind.key(), || async move {
                match tokio::time::timeout(limit, runner.run(action)).await {
                    Ok(outcome) => outcome.map_err(|e| e.to_string()),
                    Err(_) => Err(format!("timed out after {}", format_seconds(limit))),
                }
            })
            .await
            .map_err(|e| {
                let failure = ActionFailure::from(e);
                if failure.was_refused() {
                    warn!(action = %kind, reason = %failure, "action refused by protection");
                } else {
                    error!(action = %kind, reason = %failure, "action failed");
                }
                failure
            })
    }

    /// Play the alarm through the protector under [`ALARM_KEY`]
    ///
    /// Does nothing when no alarm player is installed.
    pub async fn sound_alarm(&self, volume: f32) -> Result<(), ResilienceError> {
        let Some(alarm) = &self.alarm else {
            return Ok(());
        };
        self.protector
            .execute_protected(ALARM_KEY, || alarm.play(volume.clamp(0.0, 1.0)))
            .await
    }
}

impl std::fmt::Debug for SecurityActionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityActionExecutor")
            .field("runners", &self.runners)
            .field("alarm", &self.alarm.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::mock::{MockActionRunner, MockAlarm};
    use std::path::PathBuf;
    use std::time::Duration;
    use tether_core_resilience::ResourceProtectionConfig;

    fn executor_with(runner: Arc<MockActionRunner>) -> SecurityActionExecutor {
        SecurityActionExecutor::new(
            ActionRunners::uniform(runner),
            Arc::new(ResourceProtector::new(ResourceProtectionConfig::default())),
        )
    }

    #[tokio::test]
    async fn test_actions_run_in_order() {
        let runner = Arc::new(MockActionRunner::new());
        let executor = executor_with(runner.clone());

        let result = executor
            .execute_actions(&[
                SecurityAction::ClearClipboard,
                SecurityAction::LockScreen,
                SecurityAction::Shutdown {
                    after: Duration::from_secs(60),
                },
            ])
            .await;

        assert!(result.all_succeeded);
        assert_eq!(
            runner.calls(),
            vec![
                ActionType::ClearClipboard,
                ActionType::LockScreen,
                ActionType::Shutdown
            ]
        );
        assert_eq!(result.summary(), "3 of 3 actions succeeded");
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_later_actions() {
        let runner = Arc::new(MockActionRunner::new());
        runner.fail(ActionType::LockScreen, "no session");
        let executor = executor_with(runner.clone());

        let result = executor
            .execute_actions(&[SecurityAction::LockScreen, SecurityAction::LogOut])
            .await;

        assert!(!result.all_succeeded);
        assert_eq!(runner.calls(), vec![ActionType::LockScreen, ActionType::LogOut]);
        assert_eq!(result.succeeded, vec![ActionType::LogOut]);
        assert_eq!(result.failure_count(), 1);
        match &result.failed_actions[0] {
            (ActionType::LockScreen, TetherError::ActionFailed { cause, .. }) => {
                assert_eq!(cause, &ActionFailure::Runner("Invalid value: no session".to_string()));
            }
            other => panic!("unexpected failure entry: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_script_skips_protector_and_runner() {
        let runner = Arc::new(MockActionRunner::new());
        let executor = executor_with(runner.clone());

        let result = executor
            .execute_actions(&[SecurityAction::RunCustomScript {
                path: PathBuf::from("relative/alert.sh"),
            }])
            .await;

        assert!(runner.calls().is_empty());
        assert_eq!(
            executor
                .protector()
                .metrics(ActionType::RunCustomScript.key())
                .await
                .attempts,
            0
        );
        assert!(matches!(
            result.failed_actions[0].1,
            TetherError::ActionFailed {
                cause: ActionFailure::ScriptValidation(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_rate_limited_action_keeps_its_kind() {
        let runner = Arc::new(MockActionRunner::new());
        let executor = SecurityActionExecutor::new(
            ActionRunners::uniform(runner.clone()),
            Arc::new(ResourceProtector::new(ResourceProtectionConfig {
                max_attempts: 1,
                ..Default::default()
            })),
        );

        executor.execute_actions(&[SecurityAction::LockScreen]).await;
        let second = executor.execute_actions(&[SecurityAction::LockScreen]).await;

        assert_eq!(runner.call_count(ActionType::LockScreen), 1);
        assert!(matches!(
            second.failed_actions[0].1,
            TetherError::ActionFailed {
                cause: ActionFailure::RateLimited { .. },
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_action_times_out_and_later_actions_run() {
        let hung = Arc::new(MockActionRunner::new());
        hung.set_delay(Duration::from_secs(24 * 60 * 60));
        let general = Arc::new(MockActionRunner::new());
        let executor = SecurityActionExecutor::new(
            ActionRunners::uniform(general.clone()).with(ActionType::UnmountVolumes, hung.clone()),
            Arc::new(ResourceProtector::default()),
        );

        let started = tokio::time::Instant::now();
        let result = executor
            .execute_actions_within(
                &[SecurityAction::UnmountVolumes, SecurityAction::LockScreen],
                Duration::from_secs(5),
            )
            .await;

        assert!(started.elapsed() < Duration::from_secs(6));
        assert_eq!(hung.calls(), vec![ActionType::UnmountVolumes]);
        assert_eq!(general.calls(), vec![ActionType::LockScreen]);
        assert_eq!(result.succeeded, vec![ActionType::LockScreen]);
        match &result.failed_actions[0] {
            (ActionType::UnmountVolumes, TetherError::ActionFailed { cause, .. }) => {
                assert_eq!(cause, &ActionFailure::Runner("timed out after 5s".to_string()));
            }
            other => panic!("unexpected failure entry: {:?}", other),
        }
        assert_eq!(
            executor
                .protector()
                .metrics(ActionType::UnmountVolumes.key())
                .await
                .failures,
            1
        );
    }

    #[tokio::test]
    async fn test_per_kind_runner_override() {
        let general = Arc::new(MockActionRunner::new());
        let shutdown = Arc::new(MockActionRunner::new());
        let executor = SecurityActionExecutor::new(
            ActionRunners::uniform(general.clone()).with(ActionType::Shutdown, shutdown.clone()),
            Arc::new(ResourceProtector::default()),
        );

        executor
            .execute_actions(&[
                SecurityAction::LockScreen,
                SecurityAction::Shutdown {
                    after: Duration::ZERO,
                },
            ])
            .await;

        assert_eq!(general.calls(), vec![ActionType::LockScreen]);
        assert_eq!(shutdown.calls(), vec![ActionType::Shutdown]);
    }

    #[tokio::test]
    async fn test_alarm_is_protected() {
        let alarm = Arc::new(MockAlarm::new());
        let executor = executor_with(Arc::new(MockActionRunner::new())).with_alarm(alarm.clone());

        executor.sound_alarm(1.7).await.unwrap();
        assert_eq!(alarm.volumes(), vec![1.0]);
        assert_eq!(executor.protector().metrics(ALARM_KEY).await.attempts, 1);
    }

    #[tokio::test]
    async fn test_apply_protection_uses_overrides() {
        let executor = executor_with(Arc::new(MockActionRunner::new()));
        let mut settings = Settings::default();
        settings.protection_overrides.insert(
            ActionType::LockScreen,
            ResourceProtectionConfig {
                max_attempts: 1,
                ..Default::default()
            },
        );
        executor.apply_protection(&settings).await;

        executor.execute_actions(&[SecurityAction::LockScreen]).await;
        let second = executor.execute_actions(&[SecurityAction::LockScreen]).await;
        assert!(!second.all_succeeded);
    }
}
