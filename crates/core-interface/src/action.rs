//! Protective action kinds and their ordered configuration

use crate::{Result, SystemError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// The kinds of protective action Tether can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    LockScreen,
    LogOut,
    Shutdown,
    UnmountVolumes,
    ClearClipboard,
    RunCustomScript,
}

impl ActionType {
    /// Every action kind, in declaration order
    pub const ALL: [ActionType; 6] = [
        ActionType::LockScreen,
        ActionType::LogOut,
        ActionType::Shutdown,
        ActionType::UnmountVolumes,
        ActionType::ClearClipboard,
        ActionType::RunCustomScript,
    ];

    /// Stable identifier, used as the resource-protection key
    pub fn key(&self) -> &'static str {
        match self {
            ActionType::LockScreen => "lock_screen",
            ActionType::LogOut => "log_out",
            ActionType::Shutdown => "shutdown",
            ActionType::UnmountVolumes => "unmount_volumes",
            ActionType::ClearClipboard => "clear_clipboard",
            ActionType::RunCustomScript => "run_custom_script",
        }
    }

    /// Human readable name
    pub fn label(&self) -> &'static str {
        match self {
            ActionType::LockScreen => "Lock screen",
            ActionType::LogOut => "Log out",
            ActionType::Shutdown => "Shut down",
            ActionType::UnmountVolumes => "Unmount volumes",
            ActionType::ClearClipboard => "Clear clipboard",
            ActionType::RunCustomScript => "Run custom script",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ActionType {
    type Err = SystemError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        ActionType::ALL
            .into_iter()
            .find(|kind| kind.key() == normalized)
            .ok_or_else(|| SystemError::Invalid(format!("unknown action '{}'", s)))
    }
}

/// Ordered, de-duplicated, non-empty list of action kinds
///
/// The user-chosen order is preserved; a repeated kind keeps its first position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ActionList(Vec<ActionType>);

impl ActionList {
    /// Build a list, dropping duplicates. Fails when no action remains.
    pub fn new(actions: impl IntoIterator<Item = ActionType>) -> Result<Self> {
        let mut list = Vec::new();
        for action in actions {
            if !list.contains(&action) {
                list.push(action);
            }
        }
        if list.is_empty() {
            return Err(SystemError::Invalid(
                "at least one security action must be configured".to_string(),
            ));
        }
        Ok(Self(list))
    }

    pub fn as_slice(&self) -> &[ActionType] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActionType> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, action: ActionType) -> bool {
        self.0.contains(&action)
    }
}

impl<'de> Deserialize<'de> for ActionList {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = Vec::<ActionType>::deserialize(deserializer)?;
        ActionList::new(raw).map_err(serde::de::Error::custom)
    }
}

impl Default for ActionList {
    fn default() -> Self {
        Self(vec![ActionType::LockScreen])
    }
}

/// A concrete action ready to run, carrying its parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityAction {
    LockScreen,
    LogOut,
    Shutdown { after: Duration },
    UnmountVolumes,
    ClearClipboard,
    RunCustomScript { path: PathBuf },
}

impl SecurityAction {
    /// The kind of this action
    pub fn kind(&self) -> ActionType {
        match self {
            SecurityAction::LockScreen => ActionType::LockScreen,
            SecurityAction::LogOut => ActionType::LogOut,
            SecurityAction::Shutdown { .. } => ActionType::Shutdown,
            SecurityAction::UnmountVolumes => ActionType::UnmountVolumes,
            SecurityAction::ClearClipboard => ActionType::ClearClipboard,
            SecurityAction::RunCustomScript { .. } => ActionType::RunCustomScript,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_list_preserves_order_and_dedupes() {
        let list = ActionList::new([
            ActionType::Shutdown,
            ActionType::LockScreen,
            ActionType::Shutdown,
            ActionType::ClearClipboard,
        ])
        .unwrap();

        assert_eq!(
            list.as_slice(),
            &[
                ActionType::Shutdown,
                ActionType::LockScreen,
                ActionType::ClearClipboard
            ]
        );
    }

    #[test]
    fn test_empty_action_list_rejected() {
        assert!(ActionList::new(Vec::new()).is_err());
    }

    #[test]
    fn test_action_type_parse() {
        assert_eq!(
            "lock-screen".parse::<ActionType>().unwrap(),
            ActionType::LockScreen
        );
        assert_eq!(
            "RUN_CUSTOM_SCRIPT".parse::<ActionType>().unwrap(),
            ActionType::RunCustomScript
        );
        assert!("format_disk".parse::<ActionType>().is_err());
    }

    #[test]
    fn test_action_list_deserialize() {
        #[derive(Deserialize)]
        struct Wrapper {
            actions: ActionList,
        }

        let parsed: Wrapper =
            toml::from_str(r#"actions = ["log_out", "lock_screen", "log_out"]"#).unwrap();
        assert_eq!(
            parsed.actions.as_slice(),
            &[ActionType::LogOut, ActionType::LockScreen]
        );

        assert!(toml::from_str::<Wrapper>("actions = []").is_err());
    }

    #[test]
    fn test_security_action_kind() {
        let action = SecurityAction::Shutdown {
            after: Duration::from_secs(60),
        };
        assert_eq!(action.kind(), ActionType::Shutdown);
        assert_eq!(action.kind().key(), "shutdown");
    }
}
