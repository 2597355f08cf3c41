/*!
 * Integration tests: configuration file to running machine
 *
 * Loads a TOML configuration from disk, builds the machine from it and
 * checks the JSON Lines audit mirror written along the way.
 */

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tether::audit::{AuditLog, Event, EventKind};
use tether::config::{SharedSettings, TetherConfig};
use tether::core::{ArmingState, ArmingStateMachine};
use tether::system::mock::{MockActionRunner, MockAuthenticator};
use tether::{ActionType, TetherError};

const CONFIG: &str = r#"
actions = ["lock_screen", "clear_clipboard", "lock_screen"]
shutdown_delay_secs = 0
tick_interval_ms = 250

[grace_period]
duration_secs = 2
cancellable = false

[protection.default]
max_attempts = 5
window_secs = 60
failure_threshold = 2
open_duration_secs = 120
half_open_trials = 1

[protection.overrides.clear_clipboard]
max_attempts = 1
window_secs = 600
failure_threshold = 1
open_duration_secs = 60
half_open_trials = 1
"#;

fn write_config(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    std::fs::write(&path, CONFIG).unwrap();
    path
}

#[test]
fn test_config_file_maps_to_settings() {
    let dir = TempDir::new().unwrap();
    let config = TetherConfig::load(&write_config(&dir)).unwrap();
    let settings = config.settings().unwrap();

    // Duplicates dropped, first position kept
    assert_eq!(
        settings.actions.as_slice(),
        &[ActionType::LockScreen, ActionType::ClearClipboard]
    );
    assert_eq!(settings.grace_period.duration, Duration::from_secs(2));
    assert!(!settings.grace_period.cancellable);
    assert_eq!(settings.tick_interval, Duration::from_millis(250));
    assert_eq!(settings.protection_for(ActionType::LockScreen).max_attempts, 5);
    assert_eq!(
        settings.protection_for(ActionType::ClearClipboard).max_attempts,
        1
    );
}

#[test]
fn test_invalid_files_are_config_errors() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.toml");

    std::fs::write(&path, "actions = []\n").unwrap();
    assert!(matches!(
        TetherConfig::load(&path),
        Err(TetherError::Config(_))
    ));

    std::fs::write(&path, "actions = [\"run_custom_script\"]\n").unwrap();
    let err = TetherConfig::load(&path).unwrap_err();
    assert!(err.to_string().contains("script_path"));

    let missing = dir.path().join("missing.toml");
    assert!(matches!(
        TetherConfig::load(&missing),
        Err(TetherError::Config(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_machine_from_file_writes_audit_mirror() {
    let dir = TempDir::new().unwrap();
    let config = TetherConfig::load(&write_config(&dir)).unwrap();
    let audit_path = dir.path().join("audit").join("events.jsonl");

    let runner = Arc::new(MockActionRunner::new());
    let auth = Arc::new(MockAuthenticator::new());
    let machine = ArmingStateMachine::builder()
        .settings(SharedSettings::new(config.settings().unwrap()))
        .authenticator(auth.clone())
        .runner(runner.clone())
        .audit_log(Arc::new(
            AuditLog::with_file(config.audit.capacity, &audit_path).unwrap(),
        ))
        .build()
        .unwrap();

    machine.arm().await.unwrap();
    machine.on_power_state_changed(false).await;

    // Not cancellable: refused without asking for authentication
    assert!(matches!(
        machine.cancel_grace_period().await,
        Err(TetherError::GracePeriodNotCancellable)
    ));
    assert_eq!(auth.request_count(), 0);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(machine.current_state(), ArmingState::Armed);
    assert_eq!(
        runner.calls(),
        vec![ActionType::LockScreen, ActionType::ClearClipboard]
    );

    let contents = std::fs::read_to_string(&audit_path).unwrap();
    let mirrored: Vec<Event> = contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let kinds: Vec<EventKind> = mirrored.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::Armed,
            EventKind::PowerDisconnected,
            EventKind::GracePeriodStarted,
            EventKind::ActionsExecuted,
        ]
    );
    assert_eq!(mirrored[3].state, ArmingState::Triggered);
    assert_eq!(mirrored, machine.get_event_log(10));

    // Clearing the journal leaves the mirror intact
    machine.clear_event_log();
    assert!(machine.get_event_log(10).is_empty());
    assert_eq!(
        std::fs::read_to_string(&audit_path).unwrap().lines().count(),
        4
    );
}
