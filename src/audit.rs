/*!
 * Audit journal for arming transitions and protective actions
 *
 * The journal is an append-only, capacity-bounded ring of [`Event`]s kept in
 * memory. Once the capacity is exceeded the oldest entries are evicted.
 * Readers always receive a cloned snapshot.
 *
 * Optionally every event is mirrored to a JSON Lines file, one record per
 * line, for later inspection. A failing mirror is reported through `tracing`
 * and never blocks the in-memory journal.
 *
 * # Example
 *
 * ```
 * use tether::audit::{AuditLog, EventKind};
 * use tether::core::ArmingState;
 *
 * let log = AuditLog::new(100);
 * log.record(EventKind::Armed, None, ArmingState::Armed);
 * log.record(EventKind::PowerDisconnected, None, ArmingState::Armed);
 *
 * let recent = log.events(1);
 * assert_eq!(recent[0].kind, EventKind::PowerDisconnected);
 * ```
 */

use std::collections::VecDeque;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::state::ArmingState;
use crate::error::{Result, TetherError};

/// Default number of retained events
pub const DEFAULT_CAPACITY: usize = 1000;

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Armed,
    Disarmed,
    PowerDisconnected,
    PowerConnected,
    GracePeriodStarted,
    GracePeriodCancelled,
    ActionsExecuted,
    AuthSucceeded,
    AuthFailed,
    AutoArmTriggered,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Armed => "armed",
            EventKind::Disarmed => "disarmed",
            EventKind::PowerDisconnected => "power_disconnected",
            EventKind::PowerConnected => "power_connected",
            EventKind::GracePeriodStarted => "grace_period_started",
            EventKind::GracePeriodCancelled => "grace_period_cancelled",
            EventKind::ActionsExecuted => "actions_executed",
            EventKind::AuthSucceeded => "auth_succeeded",
            EventKind::AuthFailed => "auth_failed",
            EventKind::AutoArmTriggered => "auto_arm_triggered",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One journal entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// When the event was committed
    pub timestamp: DateTime<Utc>,

    pub kind: EventKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    /// Machine state at the moment the event was emitted
    pub state: ArmingState,
}

impl Event {
    pub fn new(kind: EventKind, details: Option<String>, state: ArmingState) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            details,
            state,
        }
    }
}

#[derive(Debug)]
struct Journal {
    events: VecDeque<Event>,
    capacity: usize,
}

/// Thread-safe bounded event journal
#[derive(Debug)]
pub struct AuditLog {
    journal: Mutex<Journal>,
    mirror: Option<Mirror>,
}

#[derive(Debug)]
struct Mirror {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AuditLog {
    /// Create an in-memory journal holding at most `capacity` events
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            journal: Mutex::new(Journal {
                events: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
                capacity,
            }),
            mirror: None,
        }
    }

    /// Create a journal that also appends every event to a JSON Lines file
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::Audit`] if the file or its parent directory
    /// cannot be created.
    pub fn with_file(capacity: usize, path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    TetherError::Audit(format!("Failed to create audit log directory: {}", e))
                })?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| TetherError::Audit(format!("Failed to open audit log: {}", e)))?;

        let mut log = Self::new(capacity);
        log.mirror = Some(Mirror {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
        });
        Ok(log)
    }

    /// Append an event and return a copy of it
    pub fn record(&self, kind: EventKind, details: Option<String>, state: ArmingState) -> Event {
        let event = Event::new(kind, details, state);

        {
            let mut journal = lock(&self.journal);
            journal.events.push_back(event.clone());
            while journal.events.len() > journal.capacity {
                journal.events.pop_front();
            }
        }

        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.append(&event) {
                warn!(path = %mirror.path.display(), error = %e, "audit mirror write failed");
            }
        }

        event
    }

    /// The most recent `limit` events, oldest first
    pub fn events(&self, limit: usize) -> Vec<Event> {
        let journal = lock(&self.journal);
        let skip = journal.events.len().saturating_sub(limit);
        journal.events.iter().skip(skip).cloned().collect()
    }

    /// Every retained event, oldest first
    pub fn all(&self) -> Vec<Event> {
        lock(&self.journal).events.iter().cloned().collect()
    }

    /// Kinds of every retained event, oldest first
    pub fn kinds(&self) -> Vec<EventKind> {
        lock(&self.journal).events.iter().map(|e| e.kind).collect()
    }

    /// Drop the in-memory events. The mirror file is left untouched.
    pub fn clear(&self) {
        lock(&self.journal).events.clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.journal).events.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.journal).events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        lock(&self.journal).capacity
    }

    /// Path of the JSON Lines mirror, if any
    pub fn mirror_path(&self) -> Option<&Path> {
        self.mirror.as_ref().map(|m| m.path.as_path())
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Mirror {
    fn append(&self, event: &Event) -> Result<()> {
        let json = serde_json::to_string(event)
            .map_err(|e| TetherError::Audit(format!("Failed to serialize event: {}", e)))?;

        let mut writer = lock(&self.writer);
        writeln!(writer, "{}", json)
            .map_err(|e| TetherError::Audit(format!("Failed to write audit log: {}", e)))?;
        writer
            .flush()
            .map_err(|e| TetherError::Audit(format!("Failed to flush audit log: {}", e)))?;
        Ok(())
    }
}
