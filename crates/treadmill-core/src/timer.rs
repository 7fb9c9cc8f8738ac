//! Cross-thread wake signal for the execution thread.
//!
//! One thread waits; any thread may wake it. The signal is sticky: an
//! `interrupt()` with nobody waiting makes the next wait return at once, and it
//! stays set until the waiter calls [`WakeableTimer::clear`].

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::Clock;

#[derive(Debug, Default)]
pub struct WakeableTimer {
    woken: Mutex<bool>,
    cond: Condvar,
}

impl WakeableTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake the waiter, or arm the next wait to return immediately.
    /// Never blocks beyond the internal lock.
    pub fn interrupt(&self) {
        let mut woken = self.lock();
        *woken = true;
        self.cond.notify_all();
    }

    /// Consume a pending wake. Called by the waiter at the top of each iteration.
    pub fn clear(&self) {
        *self.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.lock()
    }

    /// Block for up to `timeout` (forever when `None`) or until interrupted.
    ///
    /// Returns `true` when woken by [`interrupt`](Self::interrupt).
    pub fn wait_for(&self, timeout: Option<Duration>) -> bool {
        let guard = self.lock();
        match timeout {
            None => {
                let guard = self
                    .cond
                    .wait_while(guard, |woken| !*woken)
                    .unwrap_or_else(PoisonError::into_inner);
                *guard
            }
            Some(timeout) if timeout.is_zero() => *guard,
            Some(timeout) => {
                let (guard, _) = self
                    .cond
                    .wait_timeout_while(guard, timeout, |woken| !*woken)
                    .unwrap_or_else(PoisonError::into_inner);
                *guard
            }
        }
    }

    /// Block until `instant` on `clock`'s timeline or until interrupted.
    pub fn wait_until(&self, clock: &dyn Clock, instant: DateTime<Utc>) -> bool {
        self.wait_for(Some(clock.until(instant)))
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        // The guarded value is a plain flag; a panic elsewhere cannot leave it torn.
        self.woken.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
