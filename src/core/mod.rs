/*!
 * Arming core: state machine, grace timer and action execution
 */

pub mod executor;
pub mod machine;
pub mod script;
pub mod state;
pub mod timer;

pub use executor::{
    ActionRunners, ExecutionResult, SecurityActionExecutor, ALARM_KEY, DEFAULT_ACTION_TIMEOUT,
};
pub use machine::{ArmingStateMachine, ArmingStateMachineBuilder};
pub use script::validate_script;
pub use state::{format_seconds, ArmingState, GraceCountdown, StateSnapshot};
pub use timer::{GracePeriodTimer, DEFAULT_TICK_INTERVAL};
