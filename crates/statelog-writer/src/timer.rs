//! Cancellable one-shot timers
//!
//! The writer only needs three things from a timer: arm it with a delay and
//! a task, cancel it, and have the task run once when the delay elapses
//! unless it was cancelled first. [`Scheduler`] captures exactly that, so
//! the flush logic does not depend on how time is driven.
//!
//! - [`ThreadScheduler`] parks a named thread on a condition variable
//!   until the deadline or cancellation.
//! - [`ManualScheduler`] keeps a virtual clock that only moves when
//!   [`ManualScheduler::advance`] is called.

use statelog_core::{Error, Result};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Work run when a timer fires
pub type TimerTask = Box<dyn FnOnce() + Send + 'static>;

/// Arms one-shot timers
pub trait Scheduler: Send + Sync {
    /// Run `task` once after `delay` unless the returned handle is
    /// cancelled first.
    fn schedule(&self, delay: Duration, task: TimerTask) -> Result<TimerHandle>;
}

#[derive(Debug, Default)]
struct TimerShared {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

/// Handle to an armed timer
#[derive(Debug, Clone, Default)]
pub struct TimerHandle {
    shared: Arc<TimerShared>,
}

impl TimerHandle {
    /// Creates a handle that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the timer. Cancelling twice, or after the timer fired, is a
    /// no-op.
    pub fn cancel(&self) {
        let mut cancelled = self
            .shared
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *cancelled = true;
        self.shared.signal.notify_all();
    }

    /// Returns true once [`cancel`](Self::cancel) was called
    pub fn is_cancelled(&self) -> bool {
        *self
            .shared
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until `deadline` or cancellation; true if the deadline won
    fn wait_until(&self, deadline: Instant) -> bool {
        let mut cancelled = self
            .shared
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        loop {
            if *cancelled {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            cancelled = self
                .shared
                .signal
                .wait_timeout(cancelled, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// Timers backed by one short-lived thread each
#[derive(Debug, Clone)]
pub struct ThreadScheduler {
    thread_name: String,
}

impl ThreadScheduler {
    /// Timer threads are named `statelog-flush-timer`
    pub fn new() -> Self {
        Self::with_thread_name("statelog-flush-timer")
    }

    /// Use a custom thread name
    pub fn with_thread_name<S: Into<String>>(name: S) -> Self {
        Self {
            thread_name: name.into(),
        }
    }
}

impl Default for ThreadScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ThreadScheduler {
    fn schedule(&self, delay: Duration, task: TimerTask) -> Result<TimerHandle> {
        let handle = TimerHandle::new();
        let timer = handle.clone();
        let deadline = Instant::now() + delay;

        thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || {
                if timer.wait_until(deadline) {
                    task();
                }
            })?;

        Ok(handle)
    }
}

struct PendingTimer {
    due: Duration,
    handle: TimerHandle,
    task: TimerTask,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    pending: Vec<PendingTimer>,
}

/// Timers driven by an explicit virtual clock.
///
/// Tasks run on the thread calling [`advance`](Self::advance).
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

impl ManualScheduler {
    /// Creates a scheduler at virtual time zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward and run every timer that came due, in due
    /// order. Returns the number of tasks run.
    pub fn advance(&self, by: Duration) -> usize {
        let due = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.now += by;
            let now = state.now;

            let (mut due, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut state.pending)
                .into_iter()
                .filter(|timer| !timer.handle.is_cancelled())
                .partition(|timer| timer.due <= now);
            state.pending = rest;
            due.sort_by_key(|timer| timer.due);
            due
        };

        let mut fired = 0;
        for timer in due {
            if timer.handle.is_cancelled() {
                continue;
            }
            (timer.task)();
            fired += 1;
        }
        fired
    }

    /// Number of armed timers that have not fired or been cancelled
    pub fn armed(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .pending
            .iter()
            .filter(|timer| !timer.handle.is_cancelled())
            .count()
    }

    /// Current virtual time
    pub fn now(&self) -> Duration {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).now
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: TimerTask) -> Result<TimerHandle> {
        let mut state = self.state.lock().map_err(|_| Error::LockPoisoned)?;
        let handle = TimerHandle::new();
        let due = state.now + delay;
        state.pending.push(PendingTimer {
            due,
            handle: handle.clone(),
            task,
        });
        Ok(handle)
    }
}
