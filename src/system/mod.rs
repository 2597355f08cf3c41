//! Collaborator implementations
//!
//! - `local`: OS command runners, alarm and notifiers
//! - `power`: polling power monitors (sysfs, pmset)
//! - `prompt`: terminal password authentication
//! - `mock`: scriptable doubles for tests

mod local;
pub mod mock;
pub mod power;
mod prompt;

pub use local::{
    plan, CommandActionRunner, CommandAlarm, DesktopNotifier, Invocation, Platform,
    TracingNotifier,
};
pub use mock::{MockActionRunner, MockAlarm, MockAuthenticator, MockPowerSource, RecordingNotifier};
pub use power::{platform_monitor, PmsetProbe, PollingPowerMonitor, PowerProbe, SysfsProbe};
pub use prompt::PasswordPrompt;
