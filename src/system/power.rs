//! Polling power monitors
//!
//! A [`PollingPowerMonitor`] asks a [`PowerProbe`] for the mains state on a
//! fixed interval and publishes changes through a `watch` channel. A failed
//! probe keeps the last known state; after `unknown_after` consecutive
//! failures the monitor publishes [`PowerState::Unknown`] instead of going
//! quiet.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tether_core_interface::{PowerState, PowerStateProvider, Result, SystemError};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::config::PowerSection;

/// One reading of the mains state: `true` when external power is present
#[async_trait]
pub trait PowerProbe: Send + Sync + 'static {
    async fn probe(&self) -> Result<bool>;

    fn name(&self) -> &'static str;
}

/// Linux `/sys/class/power_supply`
#[derive(Debug, Clone)]
pub struct SysfsProbe {
    root: PathBuf,
}

impl SysfsProbe {
    pub fn new() -> Self {
        Self::with_root("/sys/class/power_supply")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for SysfsProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// Decide the mains state from `(type, online)` pairs of each supply
pub fn mains_online(supplies: &[(String, String)]) -> Result<bool> {
    let mut mains = supplies
        .iter()
        .filter(|(kind, _)| matches!(kind.trim(), "Mains" | "USB" | "USB_C" | "USB_PD"))
        .peekable();
    if mains.peek().is_none() {
        return Err(SystemError::Unsupported(
            "no mains power supply found".to_string(),
        ));
    }
    Ok(mains.any(|(_, online)| online.trim() == "1"))
}

async fn read_trimmed(path: &Path) -> Option<String> {
    tokio::fs::read_to_string(path)
        .await
        .ok()
        .map(|s| s.trim().to_string())
}

#[async_trait]
impl PowerProbe for SysfsProbe {
    async fn probe(&self) -> Result<bool> {
        let mut supplies = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let dir = entry.path();
            let Some(kind) = read_trimmed(&dir.join("type")).await else {
                continue;
            };
            let Some(online) = read_trimmed(&dir.join("online")).await else {
                continue;
            };
            supplies.push((kind, online));
        }
        mains_online(&supplies)
    }

    fn name(&self) -> &'static str {
        "sysfs"
    }
}

/// macOS `pmset -g batt`
#[derive(Debug, Clone, Copy, Default)]
pub struct PmsetProbe;

/// Parse the power source line of `pmset -g batt`
pub fn parse_pmset(output: &str) -> Result<bool> {
    let line = output
        .lines()
        .find(|l| l.contains("drawing from"))
        .ok_or_else(|| SystemError::Invalid("unrecognised pmset output".to_string()))?;
    if line.contains("'AC Power'") {
        Ok(true)
    } else if line.contains("'Battery Power'") || line.contains("'UPS Power'") {
        Ok(false)
    } else {
        Err(SystemError::Invalid(format!("unknown power source: {}", line.trim())))
    }
}

#[async_trait]
impl PowerProbe for PmsetProbe {
    async fn probe(&self) -> Result<bool> {
        let output = Command::new("pmset").args(["-g", "batt"]).output().await?;
        if !output.status.success() {
            return Err(SystemError::CommandFailed {
                program: "pmset".to_string(),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        parse_pmset(&String::from_utf8_lossy(&output.stdout))
    }

    fn name(&self) -> &'static str {
        "pmset"
    }
}

/// Power monitor that polls a probe on an interval
#[derive(Debug)]
pub struct PollingPowerMonitor {
    name: &'static str,
    sender: Arc<watch::Sender<PowerState>>,
    task: JoinHandle<()>,
}

impl PollingPowerMonitor {
    /// Probe once for the initial state, then poll every `interval`
    pub async fn start<P: PowerProbe>(probe: P, interval: Duration, unknown_after: u32) -> Self {
        let name = probe.name();
        let initial = match probe.probe().await {
            Ok(true) => PowerState::Connected,
            Ok(false) => PowerState::Disconnected,
            Err(e) => {
                warn!(probe = name, error = %e, "initial power probe failed");
                PowerState::Unknown
            }
        };
        debug!(probe = name, ?initial, "power monitor started");

        let (sender, _) = watch::channel(initial);
        let sender = Arc::new(sender);
        let task_sender = sender.clone();
        let task = tokio::spawn(async move {
            poll_loop(probe, task_sender, interval, unknown_after.max(1)).await;
        });

        Self { name, sender, task }
    }

    pub fn current(&self) -> PowerState {
        *self.sender.borrow()
    }
}

async fn poll_loop<P: PowerProbe>(
    probe: P,
    sender: Arc<watch::Sender<PowerState>>,
    interval: Duration,
    unknown_after: u32,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    let mut failures = 0u32;
    loop {
        ticker.tick().await;
        let reading = match probe.probe().await {
            Ok(connected) => {
                failures = 0;
                if connected {
                    PowerState::Connected
                } else {
                    PowerState::Disconnected
                }
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                warn!(probe = probe.name(), failures, error = %e, "power probe failed");
                if failures < unknown_after {
                    continue;
                }
                PowerState::Unknown
            }
        };

        sender.send_if_modified(|current| {
            if *current == reading {
                false
            } else {
                debug!(from = ?*current, to = ?reading, "power state changed");
                *current = reading;
                true
            }
        });
    }
}

impl PowerStateProvider for PollingPowerMonitor {
    fn subscribe(&self) -> watch::Receiver<PowerState> {
        self.sender.subscribe()
    }

    fn name(&self) -> &str {
        self.name
    }
}

impl Drop for PollingPowerMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Monitor for the current platform
pub async fn platform_monitor(config: &PowerSection) -> Result<PollingPowerMonitor> {
    let interval = config.poll_interval();
    if cfg!(target_os = "macos") {
        Ok(PollingPowerMonitor::start(PmsetProbe, interval, config.unknown_after).await)
    } else if cfg!(target_os = "linux") {
        Ok(PollingPowerMonitor::start(SysfsProbe::new(), interval, config.unknown_after).await)
    } else {
        Err(SystemError::Unsupported("power monitoring".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct ScriptedProbe {
        readings: Mutex<VecDeque<Result<bool>>>,
    }

    impl ScriptedProbe {
        fn new(readings: Vec<Result<bool>>) -> Self {
            Self {
                readings: Mutex::new(readings.into()),
            }
        }
    }

    #[async_trait]
    impl PowerProbe for ScriptedProbe {
        async fn probe(&self) -> Result<bool> {
            self.readings
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(true))
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn failure() -> Result<bool> {
        Err(SystemError::Invalid("probe failed".to_string()))
    }

    #[test]
    fn test_parse_pmset() {
        let ac = "Now drawing from 'AC Power'\n -InternalBattery-0 (id=1)\t100%; charged;\n";
        let battery = "Now drawing from 'Battery Power'\n -InternalBattery-0\t80%;\n";
        assert!(parse_pmset(ac).unwrap());
        assert!(!parse_pmset(battery).unwrap());
        assert!(parse_pmset("garbage").is_err());
    }

    #[test]
    fn test_mains_online() {
        let supplies = vec![
            ("Battery".to_string(), "1".to_string()),
            ("Mains".to_string(), "0".to_string()),
        ];
        assert!(!mains_online(&supplies).unwrap());

        let supplies = vec![("Mains".to_string(), "1\n".to_string())];
        assert!(mains_online(&supplies).unwrap());

        let supplies = vec![("Battery".to_string(), "1".to_string())];
        assert!(mains_online(&supplies).is_err());
    }

    #[tokio::test]
    async fn test_sysfs_probe_reads_tree() {
        let dir = TempDir::new().unwrap();
        for (name, kind, online) in [("AC", "Mains", "1"), ("BAT0", "Battery", "1")] {
            let supply = dir.path().join(name);
            std::fs::create_dir(&supply).unwrap();
            std::fs::write(supply.join("type"), format!("{}\n", kind)).unwrap();
            std::fs::write(supply.join("online"), format!("{}\n", online)).unwrap();
        }

        let probe = SysfsProbe::with_root(dir.path());
        assert!(probe.probe().await.unwrap());

        std::fs::write(dir.path().join("AC").join("online"), "0\n").unwrap();
        assert!(!probe.probe().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_publishes_changes() {
        let probe = ScriptedProbe::new(vec![Ok(true), Ok(true), Ok(false)]);
        let monitor = PollingPowerMonitor::start(probe, Duration::from_secs(1), 3).await;
        let mut rx = monitor.subscribe();
        assert_eq!(*rx.borrow_and_update(), PowerState::Connected);

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), PowerState::Disconnected);
        assert_eq!(monitor.current(), PowerState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_keep_last_known_then_unknown() {
        let probe = ScriptedProbe::new(vec![Ok(true), failure(), failure(), failure()]);
        let monitor = PollingPowerMonitor::start(probe, Duration::from_secs(1), 3).await;

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(monitor.current(), PowerState::Connected);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(monitor.current(), PowerState::Unknown);

        // Scripted readings run out and report connected again
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(monitor.current(), PowerState::Connected);
    }
}
