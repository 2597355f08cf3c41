/*!
 * Tether - power-loss theft deterrence
 *
 * A dead-man's switch for unattended machines:
 * - Arming state machine driven by mains power events
 * - Cancellable grace-period countdown before anything happens
 * - Authenticated disarm and cancel with cached, rate-limited attempts
 * - Protective actions (lock, log out, shut down, unmount, clear clipboard,
 *   custom script) behind per-action rate limits and circuit breakers
 * - Bounded audit log with an optional JSON Lines mirror
 *
 * The collaborator contracts live in `tether-core-interface` and the rate
 * limiter and circuit breaker in `tether-core-resilience`.
 */

pub mod audit;
pub mod auth;
pub mod cli_style;
pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod system;

// Re-export commonly used types
pub use audit::{AuditLog, Event, EventKind};
pub use config::{Settings, SettingsSource, SharedSettings, StaticSettings, TetherConfig};
pub use core::{
    ArmingState, ArmingStateMachine, ArmingStateMachineBuilder, ExecutionResult,
    SecurityActionExecutor, StateSnapshot,
};
pub use error::{Result, TetherError};
pub use tether_core_interface::{ActionList, ActionType, AuthMethod, AuthPolicy, PowerState};
pub use tether_core_resilience::{ResourceProtectionConfig, ResourceProtector};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
