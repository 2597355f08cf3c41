/*!
 * Arming state machine
 *
 * The machine is the single owner of the arming state. Two async locks
 * order the work:
 *
 * - `transition` serializes user requests and power events. `disarm` and
 *   `cancel_grace_period` keep it across their authentication await, so a
 *   power event that arrives mid-authentication waits its turn and is
 *   applied to the committed result. The lock is fair, so queued events
 *   apply in arrival order.
 * - `core` guards the state itself and is never held across an
 *   authentication prompt. Grace expiry takes only this lock, so a pending
 *   prompt cannot hold back the protective actions.
 *
 * Readers never take either lock: the committed state is published through
 * a `watch` channel as a [`StateSnapshot`].
 *
 * ```text
 * Disarmed --arm--> Armed
 * Armed --disconnect, grace > 0--> GracePeriod
 * Armed --disconnect, grace == 0--> Triggered --actions done--> Armed
 * GracePeriod --expiry--> Triggered --actions done--> Armed
 * GracePeriod --cancel (auth) or reconnect--> Armed
 * Armed | GracePeriod --disarm (auth)--> Disarmed
 * ```
 */

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use std::time::Duration;

use tether_core_interface::{
    ActionRunner, ActionType, AlarmPlayer, AuthOutcome, AuthPolicy, AuthenticationGateway,
    NotificationPresenter, PowerState, PowerStateProvider,
};
use tether_core_resilience::{ProtectionMetrics, ResourceProtector};
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::executor::{ActionRunners, ExecutionResult, SecurityActionExecutor};
use super::state::{format_seconds, ArmingState, GraceCountdown, StateSnapshot};
use super::timer::GracePeriodTimer;
use crate::audit::{AuditLog, Event, EventKind};
use crate::config::{Settings, SettingsSource, StaticSettings};
use crate::error::{Result, TetherError};
use crate::system::TracingNotifier;

/// A running grace period and the settings captured when it started
struct ActiveGrace {
    id: u64,
    timer: GracePeriodTimer,
    settings: Settings,
}

struct Core {
    state: ArmingState,
    /// `Some` exactly when `state` is `GracePeriod`
    grace: Option<ActiveGrace>,
}

struct Shared {
    /// Held by requests and power events for their whole transition
    transition: Mutex<()>,
    core: Mutex<Core>,
    snapshot: watch::Sender<StateSnapshot>,
    settings: Arc<dyn SettingsSource>,
    authenticator: Arc<dyn AuthenticationGateway>,
    executor: Arc<SecurityActionExecutor>,
    notifier: Arc<dyn NotificationPresenter>,
    audit: Arc<AuditLog>,
    next_grace_id: AtomicU64,
    last_execution: StdMutex<Option<Arc<ExecutionResult>>>,
    power_task: StdMutex<Option<JoinHandle<()>>>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let task = self
            .power_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

/// Coordinator for arming, grace periods and protective actions
///
/// Cloning yields another handle to the same machine.
#[derive(Clone)]
pub struct ArmingStateMachine {
    shared: Arc<Shared>,
}

impl ArmingStateMachine {
    pub fn builder() -> ArmingStateMachineBuilder {
        ArmingStateMachineBuilder::default()
    }

    // === Observable state ===

    pub fn current_state(&self) -> ArmingState {
        self.shared.snapshot.borrow().state
    }

    pub fn is_in_grace_period(&self) -> bool {
        self.shared.snapshot.borrow().is_in_grace_period()
    }

    /// Time left in the running grace period, as of the latest tick
    pub fn grace_period_remaining(&self) -> Option<Duration> {
        self.shared.snapshot.borrow().grace_period_remaining()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        *self.shared.snapshot.borrow()
    }

    /// Receiver notified on every committed change and countdown tick
    pub fn subscribe(&self) -> watch::Receiver<StateSnapshot> {
        self.shared.snapshot.subscribe()
    }

    /// Most recent `limit` audit events, oldest first
    pub fn get_event_log(&self, limit: usize) -> Vec<Event> {
        self.shared.audit.events(limit)
    }

    pub fn clear_event_log(&self) {
        self.shared.audit.clear();
    }

    pub fn audit_log(&self) -> &Arc<AuditLog> {
        &self.shared.audit
    }

    /// Result of the latest protective-action pass
    pub fn last_execution(&self) -> Option<Arc<ExecutionResult>> {
        self.shared
            .last_execution
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn get_protection_metrics(&self, action: ActionType) -> ProtectionMetrics {
        self.shared.executor.protector().metrics(action.key()).await
    }

    pub async fn reset_protection(&self, action: ActionType) {
        self.shared.executor.protector().reset(action.key()).await;
        info!(action = %action, "protection state reset");
    }

    // === User and automation requests ===

    /// Arm. Only legal from `Disarmed`; needs no authentication.
    pub async fn arm(&self) -> Result<()> {
        let _turn = self.shared.transition.lock().await;
        let mut core = self.shared.core.lock().await;
        if core.state != ArmingState::Disarmed {
            return Err(TetherError::InvalidState {
                operation: "arm",
                state: core.state,
            });
        }
        self.commit_armed(&mut core);
        Ok(())
    }

    /// Arm on behalf of an automatic trigger (location, network, schedule)
    pub async fn auto_arm(&self, trigger: &str) -> Result<()> {
        let _turn = self.shared.transition.lock().await;
        let mut core = self.shared.core.lock().await;
        if core.state != ArmingState::Disarmed {
            debug!(trigger, state = ?core.state, "auto-arm ignored");
            return Err(TetherError::InvalidState {
                operation: "auto-arm",
                state: core.state,
            });
        }
        self.record(
            EventKind::AutoArmTriggered,
            Some(trigger.to_string()),
            core.state,
        );
        self.commit_armed(&mut core);
        Ok(())
    }

    /// Disarm from `Armed` or `GracePeriod` after authenticating
    ///
    /// A running countdown is cancelled only once authentication succeeds.
    /// The countdown keeps running while the user authenticates; if it
    /// expires first, the actions win and this returns `InvalidState` with
    /// `Triggered`.
    pub async fn disarm(&self) -> Result<()> {
        let _turn = self.shared.transition.lock().await;
        let (state, grace_id) = {
            let core = self.shared.core.lock().await;
            if !matches!(core.state, ArmingState::Armed | ArmingState::GracePeriod) {
                return Err(TetherError::InvalidState {
                    operation: "disarm",
                    state: core.state,
                });
            }
            (core.state, core.grace.as_ref().map(|g| g.id))
        };

        let settings = self.shared.settings.current();
        self.authorize(
            "Disarm Tether",
            &settings.disarm_policy,
            settings.auth_timeout,
            state,
        )
        .await?;

        let mut core = self.shared.core.lock().await;
        ensure_unchanged(&core, "disarm", state, grace_id)?;
        if core.grace.is_some() {
            self.stop_grace(&mut core, "disarm")?;
            self.record(
                EventKind::GracePeriodCancelled,
                Some("disarmed".to_string()),
                ArmingState::GracePeriod,
            );
        }

        core.state = ArmingState::Disarmed;
        self.publish(&core);
        self.record(EventKind::Disarmed, None, core.state);
        info!("disarmed");
        self.shared
            .notifier
            .notify("Tether disarmed", "Power changes are no longer monitored");
        Ok(())
    }

    /// Cancel a running grace period and return to `Armed`
    ///
    /// Uses the stricter cancel policy. Refused without prompting when the
    /// grace period was started as not cancellable.
    pub async fn cancel_grace_period(&self) -> Result<()> {
        const OPERATION: &str = "cancel the grace period";

        let _turn = self.shared.transition.lock().await;
        let grace_id = {
            let core = self.shared.core.lock().await;
            let (id, cancellable) = match (&core.grace, core.state) {
                (Some(grace), ArmingState::GracePeriod) => {
                    (grace.id, grace.settings.grace_period.cancellable)
                }
                (_, state) => {
                    return Err(TetherError::InvalidState {
                        operation: OPERATION,
                        state,
                    })
                }
            };
            if !cancellable {
                return Err(TetherError::GracePeriodNotCancellable);
            }
            id
        };

        let settings = self.shared.settings.current();
        self.authorize(
            "Cancel the Tether countdown",
            &settings.cancel_policy,
            settings.auth_timeout,
            ArmingState::GracePeriod,
        )
        .await?;

        let mut core = self.shared.core.lock().await;
        ensure_unchanged(&core, OPERATION, ArmingState::GracePeriod, Some(grace_id))?;
        self.stop_grace(&mut core, OPERATION)?;
        core.state = ArmingState::Armed;
        self.publish(&core);
        self.record(
            EventKind::GracePeriodCancelled,
            Some("cancelled by user".to_string()),
            core.state,
        );
        info!("grace period cancelled by user");
        self.shared
            .notifier
            .notify("Countdown cancelled", "Tether is still armed");
        Ok(())
    }

    // === Power events ===

    /// Apply a connect (`true`) or disconnect (`false`) notification
    pub async fn on_power_state_changed(&self, connected: bool) {
        let _turn = self.shared.transition.lock().await;
        let mut core = self.shared.core.lock().await;
        if connected {
            self.apply_connect(&mut core);
        } else if core.state == ArmingState::Armed {
            self.disconnect_while_armed(&mut core).await;
        } else {
            self.record(EventKind::PowerDisconnected, None, core.state);
        }
    }

    /// Apply a provider reading; `Unknown` is logged and never triggers
    pub async fn on_power_reading(&self, reading: PowerState) {
        match reading.as_connected() {
            Some(connected) => self.on_power_state_changed(connected).await,
            None => warn!("power state unknown, not treated as a disconnect"),
        }
    }

    /// Handle a detected disconnect
    ///
    /// Outside `Armed` only the disconnect itself is logged.
    pub async fn handle_disconnect(&self) {
        self.on_power_state_changed(false).await;
    }

    /// Forward every change published by `provider`
    ///
    /// The reading current at attach time is taken as the baseline and not
    /// acted on. Replaces any previously attached source. Must be called
    /// inside a Tokio runtime.
    pub fn attach_power_source(&self, provider: Arc<dyn PowerStateProvider>) {
        let mut rx = provider.subscribe();
        let baseline = *rx.borrow_and_update();
        let source = provider.name().to_string();
        debug!(source = %source, ?baseline, "power source attached");

        let weak = Arc::downgrade(&self.shared);
        let task = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let reading = *rx.borrow_and_update();
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                debug!(source = %source, ?reading, "power reading");
                ArmingStateMachine { shared }.on_power_reading(reading).await;
            }
            debug!(source = %source, "power source closed");
        });

        let previous = self
            .shared
            .power_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    // === Internals ===

    fn commit_armed(&self, core: &mut Core) {
        core.state = ArmingState::Armed;
        self.publish(core);
        self.record(EventKind::Armed, None, core.state);
        info!("armed");
        self.shared.notifier.notify(
            "Tether armed",
            "Disconnecting power will trigger protective actions",
        );
    }

    fn apply_connect(&self, core: &mut Core) {
        if core.state != ArmingState::GracePeriod {
            self.record(EventKind::PowerConnected, None, core.state);
            return;
        }

        match self.stop_grace(core, "reconnect") {
            Ok(()) => {
                core.state = ArmingState::Armed;
                self.publish(core);
                self.record(
                    EventKind::GracePeriodCancelled,
                    Some("power reconnected".to_string()),
                    core.state,
                );
                info!("power reconnected, grace period cancelled");
                self.shared
                    .notifier
                    .notify("Power reconnected", "Countdown cancelled, Tether is still armed");
            }
            Err(_) => {
                // Expiry already claimed this grace period
                self.record(EventKind::PowerConnected, None, core.state);
            }
        }
    }

    async fn disconnect_while_armed(&self, core: &mut MutexGuard<'_, Core>) {
        self.record(EventKind::PowerDisconnected, None, core.state);
        let settings = self.shared.settings.current();

        if settings.grace_period.duration.is_zero() {
            warn!("power disconnected with no grace period, triggering");
            self.shared
                .notifier
                .notify("Power disconnected", "Running protective actions");
            self.trigger(core, &settings).await;
        } else {
            self.start_grace(core, settings);
        }
    }

    fn start_grace(&self, core: &mut Core, settings: Settings) {
        let id = self.shared.next_grace_id.fetch_add(1, Ordering::Relaxed) + 1;
        let duration = settings.grace_period.duration;
        let cancellable = settings.grace_period.cancellable;

        let tick_shared = Arc::downgrade(&self.shared);
        let expire_shared = Arc::downgrade(&self.shared);
        let timer = GracePeriodTimer::start(
            duration,
            settings.tick_interval,
            move |remaining| publish_tick(&tick_shared, id, remaining),
            move || {
                if let Some(shared) = expire_shared.upgrade() {
                    tokio::spawn(async move {
                        ArmingStateMachine { shared }.on_grace_expired(id).await;
                    });
                }
            },
        );

        let alarm = settings.alarm;
        core.grace = Some(ActiveGrace {
            id,
            timer,
            settings,
        });
        core.state = ArmingState::GracePeriod;
        self.publish(core);
        self.record(
            EventKind::GracePeriodStarted,
            Some(format_seconds(duration)),
            core.state,
        );
        warn!(grace_id = id, ?duration, cancellable, "power disconnected, grace period started");
        self.shared.notifier.notify(
            "Power disconnected",
            &format!(
                "Protective actions in {} unless power is reconnected or Tether is disarmed",
                format_seconds(duration)
            ),
        );

        if alarm.enabled {
            let executor = self.shared.executor.clone();
            tokio::spawn(async move {
                if let Err(e) = executor.sound_alarm(alarm.volume).await {
                    warn!(error = %e, "alarm failed");
                }
            });
        }
    }

    /// Stop the running countdown, keeping it in place if expiry already won
    fn stop_grace(&self, core: &mut Core, operation: &'static str) -> Result<()> {
        let Some(grace) = core.grace.take() else {
            return Ok(());
        };
        if grace.timer.cancel() {
            debug!(grace_id = grace.id, "grace timer cancelled");
            return Ok(());
        }
        debug!(grace_id = grace.id, operation, "grace period already expired");
        core.grace = Some(grace);
        Err(TetherError::InvalidState {
            operation,
            state: ArmingState::Triggered,
        })
    }

    async fn on_grace_expired(&self, id: u64) {
        let mut core = self.shared.core.lock().await;
        let matches = matches!(&core.grace, Some(grace) if grace.id == id);
        if !matches {
            debug!(grace_id = id, "stale grace expiry ignored");
            return;
        }
        let Some(grace) = core.grace.take() else {
            return;
        };
        warn!(grace_id = id, "grace period expired");
        self.trigger(&mut core, &grace.settings).await;
    }

    /// Run the configured actions and return to `Armed`
    ///
    /// Runs to completion once started.
    async fn trigger(&self, core: &mut MutexGuard<'_, Core>, settings: &Settings) {
        core.state = ArmingState::Triggered;
        self.publish(core);

        let executor = &self.shared.executor;
        executor.apply_protection(settings).await;
        let result = executor
            .execute_actions_within(&settings.security_actions(), settings.action_timeout)
            .await;

        self.record(
            EventKind::ActionsExecuted,
            Some(result.summary()),
            core.state,
        );

        core.state = ArmingState::Armed;
        self.publish(core);

        if result.all_succeeded {
            info!(actions = result.attempted(), "protective actions executed");
            self.shared
                .notifier
                .notify("Protective actions executed", &result.summary());
        } else {
            warn!(
                failed = result.failure_count(),
                attempted = result.attempted(),
                "protective actions incomplete"
            );
            self.shared.notifier.notify(
                "Protective actions incomplete",
                &format!(
                    "{} of {} actions failed",
                    result.failure_count(),
                    result.attempted()
                ),
            );
        }

        *self
            .shared
            .last_execution
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(result));
    }

    /// Ask the gateway, giving up after `limit`
    async fn authorize(
        &self,
        reason: &str,
        policy: &AuthPolicy,
        limit: Duration,
        state: ArmingState,
    ) -> Result<()> {
        let pending = self.shared.authenticator.authenticate(reason, policy);
        let Ok(outcome) = tokio::time::timeout(limit, pending).await else {
            let detail = format!("no answer within {}", format_seconds(limit));
            self.record(EventKind::AuthFailed, Some(detail.clone()), state);
            warn!(?limit, "authentication timed out");
            return Err(TetherError::AuthenticationFailed(detail));
        };

        match outcome {
            AuthOutcome::Success { method } if policy.accepts(method) => {
                self.record(EventKind::AuthSucceeded, Some(method.to_string()), state);
                Ok(())
            }
            AuthOutcome::Success { method } => {
                let detail = format!("{} authentication does not satisfy the policy", method);
                self.record(EventKind::AuthFailed, Some(detail.clone()), state);
                warn!(%method, "authentication method rejected by policy");
                Err(TetherError::AuthenticationRequired(detail))
            }
            AuthOutcome::Failure(reason) => {
                self.record(EventKind::AuthFailed, Some(reason.clone()), state);
                warn!(reason = %reason, "authentication failed");
                Err(TetherError::AuthenticationFailed(reason))
            }
            AuthOutcome::Cancelled => {
                self.record(EventKind::AuthFailed, Some("cancelled".to_string()), state);
                info!("authentication cancelled");
                Err(TetherError::AuthenticationCancelled)
            }
        }
    }

    fn publish(&self, core: &Core) {
        let snapshot = match &core.grace {
            Some(grace) if core.state == ArmingState::GracePeriod => {
                StateSnapshot::counting_down(GraceCountdown {
                    id: grace.id,
                    duration: grace.timer.duration(),
                    remaining: grace.timer.remaining(),
                    cancellable: grace.settings.grace_period.cancellable,
                })
            }
            _ => StateSnapshot::settled(core.state),
        };
        self.shared.snapshot.send_replace(snapshot);
    }

    fn record(&self, kind: EventKind, details: Option<String>, state: ArmingState) {
        self.shared.audit.record(kind, details, state);
    }
}

/// Fail when the state or countdown changed while the lock was released
fn ensure_unchanged(
    core: &Core,
    operation: &'static str,
    state: ArmingState,
    grace_id: Option<u64>,
) -> Result<()> {
    let current = core.grace.as_ref().map(|g| g.id);
    if grace_id.is_some() && current != grace_id {
        debug!(?grace_id, operation, "grace period expired during authentication");
        return Err(TetherError::InvalidState {
            operation,
            state: ArmingState::Triggered,
        });
    }
    if core.state != state {
        return Err(TetherError::InvalidState {
            operation,
            state: core.state,
        });
    }
    Ok(())
}

fn publish_tick(shared: &Weak<Shared>, id: u64, remaining: Duration) {
    let Some(shared) = shared.upgrade() else {
        return;
    };
    shared.snapshot.send_if_modified(|snapshot| match &mut snapshot.grace {
        Some(grace) if grace.id == id => {
            grace.remaining = remaining;
            true
        }
        _ => false,
    });
}

impl std::fmt::Debug for ArmingStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArmingStateMachine")
            .field("snapshot", &self.snapshot())
            .field("events", &self.shared.audit.len())
            .finish()
    }
}

/// Wires the machine's collaborators
///
/// An authenticator and action runners are required. Settings default to
/// [`Settings::default`], notifications go to `tracing` and the audit log
/// holds the default capacity.
#[derive(Default)]
pub struct ArmingStateMachineBuilder {
    settings: Option<Arc<dyn SettingsSource>>,
    authenticator: Option<Arc<dyn AuthenticationGateway>>,
    runners: Option<ActionRunners>,
    protector: Option<Arc<ResourceProtector>>,
    alarm: Option<Arc<dyn AlarmPlayer>>,
    notifier: Option<Arc<dyn NotificationPresenter>>,
    audit: Option<Arc<AuditLog>>,
    power: Option<Arc<dyn PowerStateProvider>>,
}

impl ArmingStateMachineBuilder {
    pub fn settings(mut self, settings: Arc<dyn SettingsSource>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn authenticator(mut self, authenticator: Arc<dyn AuthenticationGateway>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Use one runner for every action kind
    pub fn runner(mut self, runner: Arc<dyn ActionRunner>) -> Self {
        self.runners = Some(ActionRunners::uniform(runner));
        self
    }

    pub fn runners(mut self, runners: ActionRunners) -> Self {
        self.runners = Some(runners);
        self
    }

    pub fn protector(mut self, protector: Arc<ResourceProtector>) -> Self {
        self.protector = Some(protector);
        self
    }

    pub fn alarm(mut self, alarm: Arc<dyn AlarmPlayer>) -> Self {
        self.alarm = Some(alarm);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn NotificationPresenter>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn audit_log(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Attach a power source on build; requires a Tokio runtime
    pub fn power_source(mut self, power: Arc<dyn PowerStateProvider>) -> Self {
        self.power = Some(power);
        self
    }

    pub fn build(self) -> Result<ArmingStateMachine> {
        let authenticator = self.authenticator.ok_or_else(|| {
            TetherError::Config("an authentication gateway is required".to_string())
        })?;
        let runners = self
            .runners
            .ok_or_else(|| TetherError::Config("action runners are required".to_string()))?;
        let settings = self
            .settings
            .unwrap_or_else(|| Arc::new(StaticSettings::default()));
        let protector = self.protector.unwrap_or_else(|| {
            Arc::new(ResourceProtector::new(
                settings.current().protection_default,
            ))
        });

        let mut executor = SecurityActionExecutor::new(runners, protector);
        if let Some(alarm) = self.alarm {
            executor = executor.with_alarm(alarm);
        }

        let (snapshot, _) = watch::channel(StateSnapshot::settled(ArmingState::Disarmed));
        let machine = ArmingStateMachine {
            shared: Arc::new(Shared {
                transition: Mutex::new(()),
                core: Mutex::new(Core {
                    state: ArmingState::Disarmed,
                    grace: None,
                }),
                snapshot,
                settings,
                authenticator,
                executor: Arc::new(executor),
                notifier: self
                    .notifier
                    .unwrap_or_else(|| Arc::new(TracingNotifier)),
                audit: self.audit.unwrap_or_default(),
                next_grace_id: AtomicU64::new(0),
                last_execution: StdMutex::new(None),
                power_task: StdMutex::new(None),
            }),
        };

        if let Some(power) = self.power {
            machine.attach_power_source(power);
        }
        Ok(machine)
    }
}
