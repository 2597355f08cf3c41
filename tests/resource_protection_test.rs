/*!
 * Resource protection around protective actions
 *
 * Rate limiting and circuit breaking as seen through the action executor
 * and through repeated triggers of the state machine.
 */

use std::sync::Arc;
use std::time::Duration;

use tether::config::{GracePeriodConfig, Settings, SharedSettings};
use tether::core::{ActionRunners, ArmingState, ArmingStateMachine, SecurityActionExecutor};
use tether::error::{ActionFailure, TetherError};
use tether::system::mock::{MockActionRunner, MockAuthenticator};
use tether::{ActionList, ActionType, ResourceProtectionConfig, ResourceProtector};
use tether_core_interface::SecurityAction;
use tether_core_resilience::CircuitState;

fn protection(max_attempts: u32, failure_threshold: u32) -> ResourceProtectionConfig {
    ResourceProtectionConfig {
        max_attempts,
        window: Duration::from_secs(60),
        failure_threshold,
        open_duration: Duration::from_secs(30),
        half_open_trial_count: 1,
    }
}

fn executor(config: ResourceProtectionConfig) -> (SecurityActionExecutor, Arc<MockActionRunner>) {
    let runner = Arc::new(MockActionRunner::new());
    let executor = SecurityActionExecutor::new(
        ActionRunners::uniform(runner.clone()),
        Arc::new(ResourceProtector::new(config)),
    );
    (executor, runner)
}

fn failure_of(result: &tether::core::ExecutionResult) -> &ActionFailure {
    match &result.failed_actions[0].1 {
        TetherError::ActionFailed { cause, .. } => cause,
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_fourth_attempt_in_window_is_rate_limited() {
    let (executor, runner) = executor(protection(3, 10));
    let shutdown = [SecurityAction::Shutdown {
        after: Duration::ZERO,
    }];

    for _ in 0..3 {
        assert!(executor.execute_actions(&shutdown).await.all_succeeded);
    }
    let fourth = executor.execute_actions(&shutdown).await;

    assert!(!fourth.all_succeeded);
    assert!(matches!(failure_of(&fourth), ActionFailure::RateLimited { .. }));
    assert_eq!(runner.call_count(ActionType::Shutdown), 3);

    // Other keys keep their own budget
    assert!(executor
        .execute_actions(&[SecurityAction::LockScreen])
        .await
        .all_succeeded);

    // The window slides
    tokio::time::advance(Duration::from_secs(61)).await;
    assert!(executor.execute_actions(&shutdown).await.all_succeeded);
    assert_eq!(runner.call_count(ActionType::Shutdown), 4);
}

#[tokio::test(start_paused = true)]
async fn test_breaker_opens_after_threshold_and_recovers() {
    let (executor, runner) = executor(protection(100, 2));
    runner.fail(ActionType::LogOut, "permission denied");
    let log_out = [SecurityAction::LogOut];

    for _ in 0..2 {
        let result = executor.execute_actions(&log_out).await;
        assert!(matches!(failure_of(&result), ActionFailure::Runner(_)));
    }

    let third = executor.execute_actions(&log_out).await;
    assert!(matches!(failure_of(&third), ActionFailure::CircuitOpen { .. }));
    assert_eq!(runner.call_count(ActionType::LogOut), 2);

    tokio::time::advance(Duration::from_secs(30)).await;
    let metrics = executor.protector().metrics(ActionType::LogOut.key()).await;
    assert!(matches!(metrics.circuit_state, CircuitState::HalfOpen { .. }));

    runner.succeed(ActionType::LogOut);
    assert!(executor.execute_actions(&log_out).await.all_succeeded);

    let metrics = executor.protector().metrics(ActionType::LogOut.key()).await;
    assert_eq!(metrics.circuit_state, CircuitState::Closed);
    assert_eq!(metrics.failures, 2);
    assert_eq!(metrics.circuit_rejections, 1);
    assert_eq!(runner.call_count(ActionType::LogOut), 3);
}

#[tokio::test(start_paused = true)]
async fn test_failures_are_collected_not_propagated() {
    let (executor, runner) = executor(protection(10, 10));
    runner.fail(ActionType::UnmountVolumes, "volume busy");

    let result = executor
        .execute_actions(&[
            SecurityAction::UnmountVolumes,
            SecurityAction::ClearClipboard,
            SecurityAction::RunCustomScript {
                path: "relative/../script.sh".into(),
            },
        ])
        .await;

    assert!(!result.all_succeeded);
    assert_eq!(result.succeeded, vec![ActionType::ClearClipboard]);
    assert_eq!(result.failure_count(), 2);
    assert_eq!(result.attempted(), 3);
    assert_eq!(runner.call_count(ActionType::RunCustomScript), 0);
    assert!(result.summary().starts_with("2 of 3 actions failed"));
}

#[tokio::test(start_paused = true)]
async fn test_repeated_triggers_open_the_circuit() {
    let settings = Settings {
        grace_period: GracePeriodConfig {
            duration: Duration::ZERO,
            cancellable: true,
        },
        actions: ActionList::new([ActionType::LockScreen]).unwrap(),
        protection_default: protection(100, 2),
        ..Default::default()
    };
    let runner = Arc::new(MockActionRunner::new());
    runner.fail(ActionType::LockScreen, "no display");
    let machine = ArmingStateMachine::builder()
        .settings(SharedSettings::new(settings))
        .authenticator(Arc::new(MockAuthenticator::new()))
        .runner(runner.clone())
        .build()
        .unwrap();

    machine.arm().await.unwrap();
    for _ in 0..3 {
        machine.on_power_state_changed(false).await;
        assert_eq!(machine.current_state(), ArmingState::Armed);
    }

    assert_eq!(runner.call_count(ActionType::LockScreen), 2);
    let last = machine.last_execution().unwrap();
    assert!(matches!(
        last.failed_actions[0].1,
        TetherError::ActionFailed {
            action: ActionType::LockScreen,
            cause: ActionFailure::CircuitOpen { .. }
        }
    ));

    let metrics = machine.get_protection_metrics(ActionType::LockScreen).await;
    assert!(matches!(metrics.circuit_state, CircuitState::Open { .. }));

    machine.reset_protection(ActionType::LockScreen).await;
    let metrics = machine.get_protection_metrics(ActionType::LockScreen).await;
    assert_eq!(metrics.circuit_state, CircuitState::Closed);
}
