//! Local OS implementations of the action, alarm and notification contracts
//!
//! Every action is a short external command run with `tokio::process`.
//! The command chosen for each action depends on the platform; when a
//! platform lists several candidates, the first one whose program exists
//! on `PATH` is used.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tether_core_interface::{
    ActionRunner, AlarmPlayer, NotificationPresenter, Result, SecurityAction, SystemError,
};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::core::script::interpreter_for;

/// Platforms with known command sets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    MacOs,
    Other,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if cfg!(target_os = "linux") {
            Platform::Linux
        } else {
            Platform::Other
        }
    }
}

/// One external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Minutes argument for `shutdown`, rounded up
fn shutdown_delay_arg(after: Duration) -> String {
    let minutes = after.as_secs().div_ceil(60);
    if minutes == 0 {
        "now".to_string()
    } else {
        format!("+{}", minutes)
    }
}

/// Candidate commands for `action` on `platform`, in preference order
pub fn plan(action: &SecurityAction, platform: Platform) -> Result<Vec<Invocation>> {
    let plan = match (action, platform) {
        (SecurityAction::RunCustomScript { path }, _) => vec![Invocation {
            program: interpreter_for(path).to_string(),
            args: vec![path.to_string_lossy().into_owned()],
        }],
        (_, Platform::Other) => {
            return Err(SystemError::Unsupported(format!(
                "{} has no implementation on this platform",
                action.kind()
            )))
        }

        (SecurityAction::LockScreen, Platform::Linux) => vec![
            Invocation::new("loginctl", &["lock-session"]),
            Invocation::new("xdg-screensaver", &["lock"]),
        ],
        (SecurityAction::LockScreen, Platform::MacOs) => {
            vec![Invocation::new("pmset", &["displaysleepnow"])]
        }

        (SecurityAction::LogOut, Platform::Linux) => {
            let user = std::env::var("USER").unwrap_or_default();
            if user.is_empty() {
                return Err(SystemError::Invalid(
                    "USER is not set, cannot terminate the session".to_string(),
                ));
            }
            vec![Invocation::new("loginctl", &["terminate-user", user.as_str()])]
        }
        (SecurityAction::LogOut, Platform::MacOs) => vec![Invocation::new(
            "osascript",
            &["-e", "tell application \"System Events\" to log out"],
        )],

        (SecurityAction::Shutdown { after }, _) => {
            let delay = shutdown_delay_arg(*after);
            vec![Invocation::new("shutdown", &["-h", delay.as_str()])]
        }

        (SecurityAction::UnmountVolumes, Platform::Linux) => vec![Invocation::new(
            "umount",
            &["--all", "--lazy", "--types", "nfs,nfs4,cifs,smbfs,fuse.sshfs"],
        )],
        (SecurityAction::UnmountVolumes, Platform::MacOs) => vec![Invocation::new(
            "osascript",
            &[
                "-e",
                "tell application \"Finder\" to eject (every disk whose ejectable is true)",
            ],
        )],

        (SecurityAction::ClearClipboard, Platform::Linux) => vec![
            Invocation::new("wl-copy", &["--clear"]),
            Invocation::new("xsel", &["--clipboard", "--clear"]),
        ],
        (SecurityAction::ClearClipboard, Platform::MacOs) => vec![Invocation::new("pbcopy", &[])],
    };
    Ok(plan)
}

/// Find `program` on `PATH`
fn which(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.is_absolute() {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|full| full.is_file())
}

/// Run `invocation` to completion with empty stdin
///
/// The child is killed if the returned future is dropped, so a caller's
/// timeout does not leave it running.
async fn run_invocation(invocation: &Invocation) -> Result<()> {
    debug!(program = %invocation.program, args = ?invocation.args, "running command");
    let output = Command::new(&invocation.program)
        .args(&invocation.args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                SystemError::NotFound(PathBuf::from(&invocation.program))
            }
            std::io::ErrorKind::PermissionDenied => {
                SystemError::PermissionDenied(invocation.program.clone())
            }
            _ => SystemError::Io(e),
        })?;

    if output.status.success() {
        Ok(())
    } else {
        Err(SystemError::CommandFailed {
            program: invocation.program.clone(),
            status: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Runs protective actions as external commands
#[derive(Debug, Clone, Copy)]
pub struct CommandActionRunner {
    platform: Platform,
}

impl CommandActionRunner {
    pub fn new() -> Self {
        Self {
            platform: Platform::current(),
        }
    }

    pub fn for_platform(platform: Platform) -> Self {
        Self { platform }
    }
}

impl Default for CommandActionRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionRunner for CommandActionRunner {
    async fn run(&self, action: &SecurityAction) -> Result<()> {
        let candidates = plan(action, self.platform)?;
        let first = candidates
            .iter()
            .find(|inv| which(&inv.program).is_some())
            .or_else(|| candidates.first())
            .ok_or_else(|| SystemError::Unsupported(format!("no command for {}", action.kind())))?;

        run_invocation(first).await?;
        info!(action = %action.kind(), program = %first.program, "action command completed");
        Ok(())
    }
}

/// Plays a sound file with the platform audio player
#[derive(Debug, Clone)]
pub struct CommandAlarm {
    platform: Platform,
    sound: PathBuf,
}

impl CommandAlarm {
    pub fn new() -> Self {
        let platform = Platform::current();
        let sound = match platform {
            Platform::MacOs => PathBuf::from("/System/Library/Sounds/Sosumi.aiff"),
            _ => PathBuf::from("/usr/share/sounds/freedesktop/stereo/alarm-clock-elapsed.oga"),
        };
        Self { platform, sound }
    }

    pub fn with_sound(mut self, sound: PathBuf) -> Self {
        self.sound = sound;
        self
    }

    pub fn invocation(&self, volume: f32) -> Result<Invocation> {
        let volume = volume.clamp(0.0, 1.0);
        let sound = self.sound.to_string_lossy().into_owned();
        match self.platform {
            Platform::MacOs => Ok(Invocation {
                program: "afplay".to_string(),
                args: vec!["-v".to_string(), format!("{:.2}", volume), sound],
            }),
            Platform::Linux => Ok(Invocation {
                program: "paplay".to_string(),
                args: vec![
                    format!("--volume={}", (volume * 65536.0).round() as u32),
                    sound,
                ],
            }),
            Platform::Other => Err(SystemError::Unsupported("alarm playback".to_string())),
        }
    }
}

impl Default for CommandAlarm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AlarmPlayer for CommandAlarm {
    async fn play(&self, volume: f32) -> Result<()> {
        if !self.sound.is_file() {
            return Err(SystemError::NotFound(self.sound.clone()));
        }
        run_invocation(&self.invocation(volume)?).await
    }
}

/// Notifications as `tracing` events only
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl NotificationPresenter for TracingNotifier {
    fn notify(&self, title: &str, message: &str) {
        info!(title, message, "notification");
    }
}

/// Desktop notifications through `notify-send` or `osascript`
///
/// Delivery is spawned on the current Tokio runtime and never awaited.
#[derive(Debug, Clone, Copy)]
pub struct DesktopNotifier {
    platform: Platform,
}

impl DesktopNotifier {
    pub fn new() -> Self {
        Self {
            platform: Platform::current(),
        }
    }

    pub fn invocation(&self, title: &str, message: &str) -> Option<Invocation> {
        match self.platform {
            Platform::Linux => Some(Invocation {
                program: "notify-send".to_string(),
                args: vec![
                    "--app-name=Tether".to_string(),
                    title.to_string(),
                    message.to_string(),
                ],
            }),
            Platform::MacOs => Some(Invocation {
                program: "osascript".to_string(),
                args: vec![
                    "-e".to_string(),
                    format!(
                        "display notification \"{}\" with title \"{}\"",
                        applescript_escape(message),
                        applescript_escape(title)
                    ),
                ],
            }),
            Platform::Other => None,
        }
    }
}

impl Default for DesktopNotifier {
    fn default() -> Self {
        Self::new()
    }
}

fn applescript_escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

impl NotificationPresenter for DesktopNotifier {
    fn notify(&self, title: &str, message: &str) {
        info!(title, message, "notification");
        let Some(invocation) = self.invocation(title, message) else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = run_invocation(&invocation).await {
                        warn!(error = %e, "desktop notification failed");
                    }
                });
            }
            Err(_) => debug!("no runtime, desktop notification skipped"),
        }
    }
}
