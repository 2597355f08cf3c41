//! Tether Core Interface: collaborator contracts
//!
//! This crate defines the seams between Tether's arming state machine and
//! everything it does not own: the power-state source, the authentication
//! backend, the OS-level action runners, the alarm and the notification
//! layer. Each contract is a trait so real implementations and test mocks
//! are interchangeable.
//!
//! # Architecture
//!
//! ```text
//!   PowerStateProvider ──► ArmingStateMachine ◄── AuthenticationGateway
//!                                 │
//!                                 ▼
//!                      SecurityActionExecutor ──► ActionRunner (per kind)
//!                                 │
//!                                 ▼
//!                        NotificationPresenter
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use tether_core_interface::{ActionRunner, SecurityAction, SystemError};
//! use async_trait::async_trait;
//!
//! struct EchoRunner;
//!
//! #[async_trait]
//! impl ActionRunner for EchoRunner {
//!     async fn run(&self, action: &SecurityAction) -> Result<(), SystemError> {
//!         println!("would run {}", action.kind());
//!         Ok(())
//!     }
//! }
//! ```
//!
//! # Design Philosophy
//!
//! - Every collaborator is `Send + Sync + 'static` and injected explicitly;
//!   there is no ambient global service.
//! - Async completions are futures, never callbacks; dropping the future
//!   cancels the request.

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::watch;

pub mod action;
pub mod auth;

pub use action::{ActionList, ActionType, SecurityAction};
pub use auth::{AuthMethod, AuthOutcome, AuthPolicy};

#[derive(Error, Debug)]
pub enum SystemError {
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Command '{program}' failed (status {status:?}): {stderr}")]
    CommandFailed {
        program: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("Unsupported on this platform: {0}")]
    Unsupported(String),

    #[error("Invalid value: {0}")]
    Invalid(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SystemError>;

/// External power as last observed by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerState {
    Connected,
    Disconnected,
    /// The provider cannot currently tell; never treated as a disconnect
    Unknown,
}

impl PowerState {
    /// `Some(true)` when connected, `Some(false)` when disconnected
    pub fn as_connected(&self) -> Option<bool> {
        match self {
            PowerState::Connected => Some(true),
            PowerState::Disconnected => Some(false),
            PowerState::Unknown => None,
        }
    }
}

/// Source of connect/disconnect notifications
///
/// Implementations publish into a `watch` channel. On internal failure they
/// keep reporting the last known state (or [`PowerState::Unknown`]) instead
/// of going quiet.
pub trait PowerStateProvider: Send + Sync + 'static {
    /// Receiver that observes every published state change
    fn subscribe(&self) -> watch::Receiver<PowerState>;

    /// Short name for logs
    fn name(&self) -> &str {
        "power"
    }
}

/// Policy-driven authentication backend
#[async_trait]
pub trait AuthenticationGateway: Send + Sync + 'static {
    /// Ask the user to authenticate for `reason` under `policy`
    async fn authenticate(&self, reason: &str, policy: &AuthPolicy) -> AuthOutcome;
}

/// OS-level implementation of one or more protective actions
///
/// A runner may block for as long as the underlying call takes; the
/// executor awaits each action before starting the next.
#[async_trait]
pub trait ActionRunner: Send + Sync + 'static {
    async fn run(&self, action: &SecurityAction) -> Result<()>;
}

/// Audible alarm played while a grace period runs
#[async_trait]
pub trait AlarmPlayer: Send + Sync + 'static {
    /// `volume` is in `0.0..=1.0`
    async fn play(&self, volume: f32) -> Result<()>;
}

/// Fire-and-forget user notifications
pub trait NotificationPresenter: Send + Sync + 'static {
    fn notify(&self, title: &str, message: &str);
}
