/*!
 * Arming states and the observable state snapshot
 */

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The four arming states. There are no hidden sub-states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArmingState {
    /// Power changes are only logged
    Disarmed,
    /// A power disconnect is treated as a theft signal
    Armed,
    /// A disconnect was seen; protective actions run when the countdown ends
    GracePeriod,
    /// Protective actions are running
    Triggered,
}

impl ArmingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArmingState::Disarmed => "disarmed",
            ArmingState::Armed => "armed",
            ArmingState::GracePeriod => "grace_period",
            ArmingState::Triggered => "triggered",
        }
    }
}

impl fmt::Display for ArmingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArmingState::GracePeriod => write!(f, "in grace period"),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

/// A running grace-period countdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraceCountdown {
    /// Identifies the grace period instance
    pub id: u64,
    /// Configured length of this grace period
    pub duration: Duration,
    /// Time left as of the latest tick
    pub remaining: Duration,
    /// Whether the user may cancel it with authentication
    pub cancellable: bool,
}

/// Read-only view of the machine, published after every committed change
///
/// `grace` is `Some` exactly when `state` is [`ArmingState::GracePeriod`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSnapshot {
    pub state: ArmingState,
    pub grace: Option<GraceCountdown>,
}

impl StateSnapshot {
    pub(crate) fn settled(state: ArmingState) -> Self {
        debug_assert!(state != ArmingState::GracePeriod);
        Self { state, grace: None }
    }

    pub(crate) fn counting_down(grace: GraceCountdown) -> Self {
        Self {
            state: ArmingState::GracePeriod,
            grace: Some(grace),
        }
    }

    pub fn is_in_grace_period(&self) -> bool {
        self.state == ArmingState::GracePeriod
    }

    pub fn grace_period_remaining(&self) -> Option<Duration> {
        self.grace.map(|g| g.remaining)
    }
}

/// Seconds for audit details and notifications: `30s`, `1.5s`, `0.25s`
pub fn format_seconds(duration: Duration) -> String {
    if duration.subsec_millis() == 0 {
        return format!("{}s", duration.as_secs());
    }
    let secs = format!("{:.3}", duration.as_secs_f64());
    format!("{}s", secs.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_grace_fields_follow_state() {
        let settled = StateSnapshot::settled(ArmingState::Armed);
        assert!(!settled.is_in_grace_period());
        assert_eq!(settled.grace_period_remaining(), None);

        let counting = StateSnapshot::counting_down(GraceCountdown {
            id: 1,
            duration: Duration::from_secs(10),
            remaining: Duration::from_secs(7),
            cancellable: true,
        });
        assert!(counting.is_in_grace_period());
        assert_eq!(
            counting.grace_period_remaining(),
            Some(Duration::from_secs(7))
        );
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ArmingState::GracePeriod.to_string(), "in grace period");
        assert_eq!(ArmingState::Triggered.to_string(), "triggered");
        assert_eq!(
            serde_json::to_string(&ArmingState::GracePeriod).unwrap(),
            "\"grace_period\""
        );
    }

    #[test]
    fn test_format_seconds_keeps_fractions() {
        assert_eq!(format_seconds(Duration::from_secs(30)), "30s");
        assert_eq!(format_seconds(Duration::from_millis(1_500)), "1.5s");
        assert_eq!(format_seconds(Duration::from_millis(250)), "0.25s");
        assert_eq!(format_seconds(Duration::ZERO), "0s");
    }
}
