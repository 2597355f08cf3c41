/*!
 * Configuration types for Tether
 *
 * [`TetherConfig`] is the on-disk TOML document. [`Settings`] is the
 * validated runtime snapshot the state machine reads through a
 * [`SettingsSource`] at the start of every transition.
 */

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_core_interface::{ActionList, ActionType, AuthPolicy, SecurityAction};
use tether_core_resilience::ResourceProtectionConfig;

use crate::error::{Result, TetherError};

/// Main configuration document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TetherConfig {
    /// Countdown between disconnect and protective actions
    #[serde(default)]
    pub grace_period: GracePeriodSection,

    /// Protective actions, run in this order
    #[serde(default)]
    pub actions: ActionList,

    /// Delay passed to the shutdown command
    #[serde(default = "default_shutdown_delay")]
    pub shutdown_delay_secs: u64,

    /// Longest a single protective action may run before it counts as failed
    #[serde(default = "default_action_timeout")]
    pub action_timeout_secs: u64,

    /// Script run by the `run_custom_script` action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_path: Option<PathBuf>,

    /// Audible alarm while the grace period runs
    #[serde(default)]
    pub alarm: AlarmConfig,

    /// Rate limiting and circuit breaking for actions
    #[serde(default)]
    pub protection: ProtectionSection,

    /// Authentication policies
    #[serde(default)]
    pub auth: AuthSection,

    /// Audit journal
    #[serde(default)]
    pub audit: AuditSection,

    /// Power monitor polling
    #[serde(default)]
    pub power: PowerSection,

    /// Countdown tick interval in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stderr)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,
}

impl Default for TetherConfig {
    fn default() -> Self {
        Self {
            grace_period: GracePeriodSection::default(),
            actions: ActionList::default(),
            shutdown_delay_secs: default_shutdown_delay(),
            action_timeout_secs: default_action_timeout(),
            script_path: None,
            alarm: AlarmConfig::default(),
            protection: ProtectionSection::default(),
            auth: AuthSection::default(),
            audit: AuditSection::default(),
            power: PowerSection::default(),
            tick_interval_ms: default_tick_interval_ms(),
            log_level: LogLevel::Info,
            log_file: None,
            verbose: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GracePeriodSection {
    /// 0 disables the grace period: a disconnect triggers immediately
    #[serde(default = "default_grace_secs")]
    pub duration_secs: u64,

    #[serde(default = "default_true")]
    pub cancellable: bool,
}

impl Default for GracePeriodSection {
    fn default() -> Self {
        Self {
            duration_secs: default_grace_secs(),
            cancellable: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlarmConfig {
    #[serde(default)]
    pub enabled: bool,

    /// 0.0 to 1.0
    #[serde(default = "default_volume")]
    pub volume: f32,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            volume: default_volume(),
        }
    }
}

/// Protection parameters as written in the config file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionProfile {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_open_secs")]
    pub open_duration_secs: u64,

    #[serde(default = "default_half_open_trials")]
    pub half_open_trials: u32,
}

impl Default for ProtectionProfile {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            window_secs: default_window_secs(),
            failure_threshold: default_failure_threshold(),
            open_duration_secs: default_open_secs(),
            half_open_trials: default_half_open_trials(),
        }
    }
}

impl ProtectionProfile {
    pub fn to_protection_config(&self) -> ResourceProtectionConfig {
        ResourceProtectionConfig {
            max_attempts: self.max_attempts,
            window: Duration::from_secs(self.window_secs),
            failure_threshold: self.failure_threshold,
            open_duration: Duration::from_secs(self.open_duration_secs),
            half_open_trial_count: self.half_open_trials,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionSection {
    /// Applied to every action without an override
    #[serde(default)]
    pub default: ProtectionProfile,

    /// Per-action overrides keyed by action name (e.g. `shutdown`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<String, ProtectionProfile>,
}

/// One authentication policy as written in the config file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySection {
    pub require_biometric: bool,
    pub allow_password_fallback: bool,
    pub cache_secs: u64,
}

impl PolicySection {
    pub fn to_policy(&self) -> AuthPolicy {
        AuthPolicy {
            require_biometric: self.require_biometric,
            allow_password_fallback: self.allow_password_fallback,
            cache_duration: Duration::from_secs(self.cache_secs),
        }
    }
}

impl From<AuthPolicy> for PolicySection {
    fn from(policy: AuthPolicy) -> Self {
        Self {
            require_biometric: policy.require_biometric,
            allow_password_fallback: policy.allow_password_fallback,
            cache_secs: policy.cache_duration.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSection {
    /// SHA-256 hex digest of the fallback password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_sha256: Option<String>,

    #[serde(default = "default_disarm_policy")]
    pub disarm: PolicySection,

    #[serde(default = "default_cancel_policy")]
    pub cancel: PolicySection,

    /// Backend attempts allowed per window
    #[serde(default = "default_auth_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_auth_window_secs")]
    pub attempt_window_secs: u64,

    /// A prompt left unanswered this long counts as a failed attempt
    #[serde(default = "default_auth_timeout")]
    pub timeout_secs: u64,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            password_sha256: None,
            disarm: default_disarm_policy(),
            cancel: default_cancel_policy(),
            max_attempts: default_auth_attempts(),
            attempt_window_secs: default_auth_window_secs(),
            timeout_secs: default_auth_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSection {
    /// Events kept in memory
    #[serde(default = "default_audit_capacity")]
    pub capacity: usize,

    /// Optional JSON Lines mirror
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            capacity: default_audit_capacity(),
            log_file: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerSection {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Consecutive read failures before the monitor reports `Unknown`
    #[serde(default = "default_unknown_after")]
    pub unknown_after: u32,
}

impl Default for PowerSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            unknown_after: default_unknown_after(),
        }
    }
}

impl PowerSection {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Logging level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_grace_secs() -> u64 {
    30
}

fn default_shutdown_delay() -> u64 {
    60
}

fn default_volume() -> f32 {
    1.0
}

fn default_max_attempts() -> u32 {
    3
}

fn default_window_secs() -> u64 {
    60
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_open_secs() -> u64 {
    300
}

fn default_half_open_trials() -> u32 {
    1
}

fn default_disarm_policy() -> PolicySection {
    AuthPolicy::disarm().into()
}

fn default_cancel_policy() -> PolicySection {
    AuthPolicy::cancel_grace_period().into()
}

fn default_auth_attempts() -> u32 {
    5
}

fn default_auth_window_secs() -> u64 {
    300
}

fn default_auth_timeout() -> u64 {
    60
}

fn default_action_timeout() -> u64 {
    30
}

fn default_audit_capacity() -> usize {
    crate::audit::DEFAULT_CAPACITY
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_unknown_after() -> u32 {
    3
}

fn default_tick_interval_ms() -> u64 {
    100
}

impl TetherConfig {
    /// Default location: `<config dir>/tether/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("tether").join("config.toml"))
    }

    /// Read and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            TetherError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: TetherConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else the default location if it exists, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(default) if default.exists() => Self::load(&default),
            _ => Ok(Self::default()),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| TetherError::Config(format!("Failed to serialize config: {}", e)))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Check every cross-field constraint
    pub fn validate(&self) -> Result<()> {
        if self.actions.is_empty() {
            return Err(TetherError::Config(
                "at least one security action must be configured".to_string(),
            ));
        }

        if self.actions.contains(ActionType::RunCustomScript) && self.script_path.is_none() {
            return Err(TetherError::Config(
                "run_custom_script requires script_path".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.alarm.volume) {
            return Err(TetherError::Config(format!(
                "alarm volume {} is outside 0.0..=1.0",
                self.alarm.volume
            )));
        }

        if self.tick_interval_ms == 0 {
            return Err(TetherError::Config(
                "tick_interval_ms must be greater than zero".to_string(),
            ));
        }

        if self.audit.capacity == 0 {
            return Err(TetherError::Config(
                "audit capacity must be at least 1".to_string(),
            ));
        }

        if self.power.poll_interval_ms == 0 {
            return Err(TetherError::Config(
                "power poll_interval_ms must be greater than zero".to_string(),
            ));
        }

        if self.auth.timeout_secs == 0 {
            return Err(TetherError::Config(
                "auth timeout_secs must be greater than zero".to_string(),
            ));
        }

        if self.action_timeout_secs == 0 {
            return Err(TetherError::Config(
                "action_timeout_secs must be greater than zero".to_string(),
            ));
        }

        if self.auth.max_attempts == 0 || self.auth.attempt_window_secs == 0 {
            return Err(TetherError::Config(
                "auth attempt limits must be greater than zero".to_string(),
            ));
        }

        if let Some(digest) = &self.auth.password_sha256 {
            let valid = digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit());
            if !valid {
                return Err(TetherError::Config(
                    "password_sha256 must be a 64 character hex digest".to_string(),
                ));
            }
        }

        self.protection.default.to_protection_config().validate()?;
        self.protection_overrides()?;

        Ok(())
    }

    fn protection_overrides(&self) -> Result<HashMap<ActionType, ResourceProtectionConfig>> {
        let mut overrides = HashMap::new();
        for (name, profile) in &self.protection.overrides {
            let action: ActionType = name.parse()?;
            let config = profile.to_protection_config();
            config
                .validate()
                .map_err(|e| TetherError::Config(format!("protection.overrides.{}: {}", name, e)))?;
            overrides.insert(action, config);
        }
        Ok(overrides)
    }

    /// Runtime snapshot of this config
    pub fn settings(&self) -> Result<Settings> {
        self.validate()?;
        Ok(Settings {
            grace_period: GracePeriodConfig {
                duration: Duration::from_secs(self.grace_period.duration_secs),
                cancellable: self.grace_period.cancellable,
            },
            actions: self.actions.clone(),
            shutdown_delay: Duration::from_secs(self.shutdown_delay_secs),
            action_timeout: Duration::from_secs(self.action_timeout_secs),
            script_path: self.script_path.clone(),
            alarm: self.alarm,
            protection_default: self.protection.default.to_protection_config(),
            protection_overrides: self.protection_overrides()?,
            disarm_policy: self.auth.disarm.to_policy(),
            cancel_policy: self.auth.cancel.to_policy(),
            auth_timeout: Duration::from_secs(self.auth.timeout_secs),
            tick_interval: Duration::from_millis(self.tick_interval_ms),
        })
    }
}

/// Grace-period parameters captured when a countdown starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GracePeriodConfig {
    /// Zero means no grace period
    pub duration: Duration,
    pub cancellable: bool,
}

impl Default for GracePeriodConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(default_grace_secs()),
            cancellable: true,
        }
    }
}

/// Runtime settings read by the state machine
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub grace_period: GracePeriodConfig,
    pub actions: ActionList,
    pub shutdown_delay: Duration,
    /// Per-action run limit
    pub action_timeout: Duration,
    pub script_path: Option<PathBuf>,
    pub alarm: AlarmConfig,
    pub protection_default: ResourceProtectionConfig,
    pub protection_overrides: HashMap<ActionType, ResourceProtectionConfig>,
    pub disarm_policy: AuthPolicy,
    pub cancel_policy: AuthPolicy,
    /// How long a disarm or cancel prompt may stay unanswered
    pub auth_timeout: Duration,
    pub tick_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            grace_period: GracePeriodConfig::default(),
            actions: ActionList::default(),
            shutdown_delay: Duration::from_secs(default_shutdown_delay()),
            action_timeout: Duration::from_secs(default_action_timeout()),
            script_path: None,
            alarm: AlarmConfig::default(),
            protection_default: ResourceProtectionConfig::default(),
            protection_overrides: HashMap::new(),
            disarm_policy: AuthPolicy::disarm(),
            cancel_policy: AuthPolicy::cancel_grace_period(),
            auth_timeout: Duration::from_secs(default_auth_timeout()),
            tick_interval: Duration::from_millis(default_tick_interval_ms()),
        }
    }
}

impl Settings {
    /// Protection parameters for `action`
    pub fn protection_for(&self, action: ActionType) -> ResourceProtectionConfig {
        self.protection_overrides
            .get(&action)
            .cloned()
            .unwrap_or_else(|| self.protection_default.clone())
    }

    /// Concrete actions in configured order
    ///
    /// A script action without a path yields an empty path, which script
    /// validation refuses.
    pub fn security_actions(&self) -> Vec<SecurityAction> {
        self.actions
            .iter()
            .map(|kind| match kind {
                ActionType::LockScreen => SecurityAction::LockScreen,
                ActionType::LogOut => SecurityAction::LogOut,
                ActionType::Shutdown => SecurityAction::Shutdown {
                    after: self.shutdown_delay,
                },
                ActionType::UnmountVolumes => SecurityAction::UnmountVolumes,
                ActionType::ClearClipboard => SecurityAction::ClearClipboard,
                ActionType::RunCustomScript => SecurityAction::RunCustomScript {
                    path: self.script_path.clone().unwrap_or_default(),
                },
            })
            .collect()
    }
}

/// Read-only access to the current settings
///
/// Every transition reads a fresh snapshot, so updates apply to future
/// transitions only.
pub trait SettingsSource: Send + Sync + 'static {
    fn current(&self) -> Settings;
}

/// Settings fixed at construction
#[derive(Debug, Clone, Default)]
pub struct StaticSettings(Settings);

impl StaticSettings {
    pub fn new(settings: Settings) -> Self {
        Self(settings)
    }
}

impl SettingsSource for StaticSettings {
    fn current(&self) -> Settings {
        self.0.clone()
    }
}

/// Settings that can be replaced while the machine runs
#[derive(Debug, Default)]
pub struct SharedSettings {
    inner: RwLock<Settings>,
}

impl SharedSettings {
    pub fn new(settings: Settings) -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(settings),
        })
    }

    pub fn replace(&self, settings: Settings) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = settings;
    }

    pub fn update(&self, f: impl FnOnce(&mut Settings)) {
        f(&mut self.inner.write().unwrap_or_else(PoisonError::into_inner));
    }
}

impl SettingsSource for SharedSettings {
    fn current(&self) -> Settings {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<T: SettingsSource> SettingsSource for Arc<T> {
    fn current(&self) -> Settings {
        (**self).current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = TetherConfig::default();
        assert_eq!(config.grace_period.duration_secs, 30);
        assert!(config.grace_period.cancellable);
        assert_eq!(config.actions.as_slice(), &[ActionType::LockScreen]);
        assert_eq!(config.audit.capacity, 1000);
        assert_eq!(config.tick_interval_ms, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: TetherConfig = toml::from_str(
            r#"
            actions = ["shutdown", "lock_screen", "shutdown"]

            [grace_period]
            duration_secs = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.grace_period.duration_secs, 10);
        assert!(config.grace_period.cancellable);
        assert_eq!(
            config.actions.as_slice(),
            &[ActionType::Shutdown, ActionType::LockScreen]
        );
        assert_eq!(config.auth.cancel, default_cancel_policy());
    }

    #[test]
    fn test_empty_actions_rejected() {
        let parsed: std::result::Result<TetherConfig, _> = toml::from_str("actions = []");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_script_action_requires_path() {
        let mut config = TetherConfig {
            actions: ActionList::new([ActionType::RunCustomScript]).unwrap(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(TetherError::Config(_))));

        config.script_path = Some(PathBuf::from("/usr/local/bin/wipe.sh"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = TetherConfig {
            alarm: AlarmConfig {
                enabled: true,
                volume: 1.5,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let mut config = TetherConfig::default();
        config.protection.default.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = TetherConfig::default();
        config
            .protection
            .overrides
            .insert("reboot".to_string(), ProtectionProfile::default());
        assert!(config.validate().is_err());

        let mut config = TetherConfig::default();
        config.auth.password_sha256 = Some("not-a-digest".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_settings_resolve_overrides() {
        let mut config = TetherConfig::default();
        config.protection.overrides.insert(
            "shutdown".to_string(),
            ProtectionProfile {
                max_attempts: 1,
                ..Default::default()
            },
        );

        let settings = config.settings().unwrap();
        assert_eq!(settings.protection_for(ActionType::Shutdown).max_attempts, 1);
        assert_eq!(
            settings.protection_for(ActionType::LockScreen).max_attempts,
            3
        );
        assert_eq!(settings.grace_period.duration, Duration::from_secs(30));
        assert_eq!(settings.tick_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_timeouts_map_to_settings() {
        let config: TetherConfig = toml::from_str(
            r#"
            action_timeout_secs = 5

            [auth]
            timeout_secs = 45
            "#,
        )
        .unwrap();
        let settings = config.settings().unwrap();
        assert_eq!(settings.action_timeout, Duration::from_secs(5));
        assert_eq!(settings.auth_timeout, Duration::from_secs(45));

        let defaults = Settings::default();
        assert_eq!(defaults.action_timeout, Duration::from_secs(30));
        assert_eq!(defaults.auth_timeout, Duration::from_secs(60));

        let mut config = TetherConfig::default();
        config.auth.timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = TetherConfig::default();
        config.action_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_security_actions_carry_parameters() {
        let settings = Settings {
            actions: ActionList::new([ActionType::Shutdown, ActionType::RunCustomScript]).unwrap(),
            shutdown_delay: Duration::from_secs(5),
            script_path: Some(PathBuf::from("/opt/tether/alert.sh")),
            ..Default::default()
        };

        assert_eq!(
            settings.security_actions(),
            vec![
                SecurityAction::Shutdown {
                    after: Duration::from_secs(5)
                },
                SecurityAction::RunCustomScript {
                    path: PathBuf::from("/opt/tether/alert.sh")
                },
            ]
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tether").join("config.toml");

        let mut config = TetherConfig::default();
        config.grace_period.duration_secs = 0;
        config.alarm.enabled = true;
        config.save(&path).unwrap();

        let loaded = TetherConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_shared_settings_update() {
        let shared = SharedSettings::new(Settings::default());
        shared.update(|s| s.grace_period.cancellable = false);
        assert!(!shared.current().grace_period.cancellable);
    }
}
