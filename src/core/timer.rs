/*!
 * Grace-period countdown
 *
 * The timer ticks on a fixed short interval and recomputes the remaining
 * time from the monotonic clock on every tick, so scheduler jitter never
 * accumulates into drift. Expiry and cancellation race on a single atomic
 * compare-and-swap: whichever wins is final, the loser is a no-op.
 */

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

const RUNNING: u8 = 0;
const CANCELLED: u8 = 1;
const EXPIRED: u8 = 2;

/// Default tick interval for progress callbacks
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct TimerShared {
    phase: AtomicU8,
    started_at: Instant,
    duration: Duration,
}

impl TimerShared {
    fn remaining(&self) -> Duration {
        self.duration.saturating_sub(self.started_at.elapsed())
    }
}

/// Cancellable countdown with periodic progress and a single expiry callback
///
/// Dropping the timer cancels it.
#[derive(Debug)]
pub struct GracePeriodTimer {
    shared: Arc<TimerShared>,
    task: JoinHandle<()>,
}

impl GracePeriodTimer {
    /// Start a countdown of `duration`.
    ///
    /// `on_tick(remaining)` runs every `tick` while time remains. `on_expire`
    /// runs exactly once, on the tick where the remaining time first reaches
    /// zero, unless [`cancel`](Self::cancel) won first. Must be called inside
    /// a Tokio runtime.
    pub fn start<T, E>(duration: Duration, tick: Duration, mut on_tick: T, on_expire: E) -> Self
    where
        T: FnMut(Duration) + Send + 'static,
        E: FnOnce() + Send + 'static,
    {
        let tick = if tick.is_zero() {
            DEFAULT_TICK_INTERVAL
        } else {
            tick
        };
        let started_at = Instant::now();
        let shared = Arc::new(TimerShared {
            phase: AtomicU8::new(RUNNING),
            started_at,
            duration,
        });

        let task_shared = shared.clone();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(started_at + tick, tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                if task_shared.phase.load(Ordering::Acquire) != RUNNING {
                    return;
                }

                let remaining = task_shared.remaining();
                if remaining.is_zero() {
                    let claimed = task_shared
                        .phase
                        .compare_exchange(RUNNING, EXPIRED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok();
                    if claimed {
                        on_expire();
                    }
                    return;
                }

                on_tick(remaining);
            }
        });

        Self { shared, task }
    }

    /// Stop the countdown.
    ///
    /// Returns `true` if this call cancelled a running timer, `false` if it
    /// was already cancelled or expiry has already begun. Safe to call any
    /// number of times from any thread.
    pub fn cancel(&self) -> bool {
        let cancelled = self
            .shared
            .phase
            .compare_exchange(RUNNING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if cancelled {
            self.task.abort();
        }
        cancelled
    }

    /// Time left, computed from the monotonic clock
    pub fn remaining(&self) -> Duration {
        match self.shared.phase.load(Ordering::Acquire) {
            RUNNING => self.shared.remaining(),
            _ => Duration::ZERO,
        }
    }

    pub fn duration(&self) -> Duration {
        self.shared.duration
    }

    pub fn is_running(&self) -> bool {
        self.shared.phase.load(Ordering::Acquire) == RUNNING
    }

    pub fn is_expired(&self) -> bool {
        self.shared.phase.load(Ordering::Acquire) == EXPIRED
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.phase.load(Ordering::Acquire) == CANCELLED
    }
}

impl Drop for GracePeriodTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
