//! The cross-thread [`Machine`] handle.
//!
//! Every method here may be called from any thread, including from hooks on
//! the execution thread. Methods that change what the loop should be doing
//! wake it via the shared [`WakeableTimer`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use treadmill_core::{Actor, Clock, LifecycleState, SystemClock, WakeableTimer};

use crate::engine;
use crate::error::{panic_message, MachineError, Result};
use crate::history::RunHistory;
use crate::hooks::MachineHooks;
use crate::pause::PauseState;
use crate::run::RunRecord;
use crate::types::{MachineSettings, MachineStatus, PauseStatus, StatusTimes};

/// Start, end and next-run instants of the current (or last) run.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RunTimes {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub next: Option<DateTime<Utc>>,
}

/// Everything guarded by the machine lock.
pub(crate) struct Inner {
    pub state: LifecycleState,
    pub settings: MachineSettings,
    pub times: RunTimes,
    pub up_since: Option<DateTime<Utc>>,
    pub pause: PauseState,
    pub history: RunHistory,
    pub stop_requested: bool,
    /// Set while the loop is alive, so requests can tell whether they come
    /// from inside `execute`.
    pub loop_thread: Option<ThreadId>,
    pub in_execute: bool,
    pub paused_by_execute: bool,
}

impl Inner {
    /// Earlier of the manual override and the next pause alert.
    pub fn pause_until(&self) -> Option<DateTime<Utc>> {
        self.pause.effective_until(self.settings.alerts.as_ref())
    }

    /// Change the lifecycle state. While a stop is pending the machine reads
    /// `STOPPING` whatever the loop happens to be doing.
    pub fn set_state(&mut self, state: LifecycleState) {
        self.state = match state {
            LifecycleState::Running | LifecycleState::Waiting | LifecycleState::Paused
                if self.stop_requested =>
            {
                LifecycleState::Stopping
            }
            other => other,
        };
    }
}

pub(crate) struct Shared {
    pub name: String,
    pub clock: Arc<dyn Clock>,
    pub timer: WakeableTimer,
    /// Pause request flag. Only written while holding `inner`, so the loop can
    /// read it consistently with the episode state.
    pub pause_requested: AtomicBool,
    pub inner: Mutex<Inner>,
    hooks: Mutex<Option<Box<dyn MachineHooks>>>,
    thread: Mutex<Option<JoinHandle<Result<()>>>>,
    /// `true` from spawn until the loop has handed the hooks back. Waiting on
    /// this does not need the `JoinHandle`, which a joiner may hold.
    alive: Mutex<bool>,
    exited: Condvar,
}

impl Shared {
    pub fn take_hooks(&self) -> Option<Box<dyn MachineHooks>> {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    pub fn return_hooks(&self, hooks: Box<dyn MachineHooks>) {
        *self.hooks.lock().unwrap_or_else(PoisonError::into_inner) = Some(hooks);
    }

    fn has_hooks(&self) -> bool {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    fn is_alive(&self) -> bool {
        *self.alive.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_alive(&self, alive: bool) {
        *self.alive.lock().unwrap_or_else(PoisonError::into_inner) = alive;
        if !alive {
            self.exited.notify_all();
        }
    }

    /// Called by the loop as the very last thing it does.
    pub fn mark_exited(&self) {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).loop_thread = None;
        self.set_alive(false);
    }

    fn wait_for_exit(&self) {
        let mut alive = self.alive.lock().unwrap_or_else(PoisonError::into_inner);
        while *alive {
            alive = self.exited.wait(alive).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Builder for a [`Machine`] with non-default settings or clock.
pub struct MachineBuilder {
    name: String,
    settings: MachineSettings,
    clock: Arc<dyn Clock>,
}

impl MachineBuilder {
    pub fn with_settings(mut self, settings: MachineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self, hooks: impl MachineHooks + 'static) -> Machine {
        let history = RunHistory::new(self.settings.history_limit);
        let inner = Inner {
            state: LifecycleState::Stopped,
            settings: self.settings,
            times: RunTimes::default(),
            up_since: None,
            pause: PauseState::default(),
            history,
            stop_requested: false,
            loop_thread: None,
            in_execute: false,
            paused_by_execute: false,
        };
        Machine {
            shared: Arc::new(Shared {
                name: self.name,
                clock: self.clock,
                timer: WakeableTimer::new(),
                pause_requested: AtomicBool::new(false),
                inner: Mutex::new(inner),
                hooks: Mutex::new(Some(Box::new(hooks))),
                thread: Mutex::new(None),
                alive: Mutex::new(false),
                exited: Condvar::new(),
            }),
        }
    }
}

/// Handle to one recurring task and its execution thread. Cheap to clone.
#[derive(Clone)]
pub struct Machine {
    pub(crate) shared: Arc<Shared>,
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish()
    }
}

impl Machine {
    /// Machine with default settings on the system clock.
    pub fn new(name: impl Into<String>, hooks: impl MachineHooks + 'static) -> Self {
        Self::builder(name).build(hooks)
    }

    pub fn builder(name: impl Into<String>) -> MachineBuilder {
        MachineBuilder {
            name: name.into(),
            settings: MachineSettings::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Current time on the machine's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.shared.clock.now()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Spawn the execution thread.
    ///
    /// No-op while already running. A machine that is stopping or failing is
    /// waited for, whoever holds its join handle, and then started again; a
    /// stopped or failed one starts afresh.
    pub fn start(&self) -> Result<()> {
        let mut slot = self.shared.thread.lock().unwrap_or_else(PoisonError::into_inner);

        if self.on_loop_thread(slot.as_ref()) {
            debug!(machine = %self.name(), "start requested from the machine thread, ignoring");
            return Ok(());
        }
        if self.shared.is_alive() {
            let ending = {
                let inner = self.lock();
                inner.stop_requested || inner.state == LifecycleState::Failed
            };
            if !ending {
                return Ok(());
            }
            debug!(machine = %self.name(), "waiting for the previous loop to exit");
            self.shared.wait_for_exit();
        }
        if let Some(previous) = slot.take() {
            match previous.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(machine = %self.name(), error = %e, "previous run had failed"),
                Err(payload) => warn!(
                    machine = %self.name(),
                    panic = %panic_message(&*payload),
                    "previous machine thread panicked"
                ),
            }
        }

        if !self.shared.has_hooks() {
            return Err(MachineError::HooksUnavailable);
        }

        let pause_on_start = {
            let mut inner = self.lock();
            inner.stop_requested = false;
            inner.set_state(LifecycleState::Running);
            inner.settings.pause_on_start
        };
        if pause_on_start {
            self.pause_for_reason(None, "pause_on_start flag was set.");
        }

        self.shared.set_alive(true);
        let machine = self.clone();
        let spawned = thread::Builder::new()
            .name(format!("{} thread", self.name()))
            .spawn(move || engine::run(machine));

        match spawned {
            Ok(handle) => {
                *slot = Some(handle);
                info!(machine = %self.name(), "machine starting");
                Ok(())
            }
            Err(e) => {
                self.shared.set_alive(false);
                self.lock().set_state(LifecycleState::Stopped);
                Err(MachineError::Spawn(e))
            }
        }
    }

    fn on_loop_thread(&self, handle: Option<&JoinHandle<Result<()>>>) -> bool {
        let current = thread::current().id();
        handle.is_some_and(|h| h.thread().id() == current)
            || self.lock().loop_thread == Some(current)
    }

    /// Ask the loop to exit at the next opportunity. Idempotent, never blocks
    /// on a running `execute`.
    pub fn stop(&self) {
        {
            let mut inner = self.lock();
            if inner.stop_requested {
                return;
            }
            inner.stop_requested = true;
            if !inner.state.is_halted() {
                inner.set_state(LifecycleState::Stopping);
            }
        }
        info!(machine = %self.name(), "{} stop requested.", self.name());
        self.interrupt();
    }

    /// Wait for the execution thread to exit and return its outcome.
    ///
    /// Returns immediately when no thread is running. Blocks until the loop
    /// exits, so pair it with [`stop`](Self::stop) unless the loop is known to
    /// be ending. When another caller is already joining, this waits for the
    /// same exit and returns `Ok`; only the first joiner sees the outcome.
    pub fn join(&self) -> Result<()> {
        let handle = self.shared.thread.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(handle) = handle else {
            if self.lock().loop_thread != Some(thread::current().id()) {
                self.shared.wait_for_exit();
            }
            return Ok(());
        };
        if handle.thread().id() == thread::current().id() {
            *self.shared.thread.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
            return Ok(());
        }
        handle
            .join()
            .unwrap_or_else(|payload| Err(MachineError::Panicked(panic_message(&*payload))))
    }

    /// `stop()` followed by `join()`.
    pub fn shutdown(&self) -> Result<()> {
        self.stop();
        self.join()
    }

    /// Wake the loop so it re-evaluates its state.
    pub fn interrupt(&self) {
        self.shared.timer.interrupt();
    }

    pub fn state(&self) -> LifecycleState {
        self.lock().state
    }

    /// `true` in `RUNNING` and `WAITING`.
    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    // ── Scheduling ───────────────────────────────────────────────────────

    /// Run as soon as the loop is free.
    pub fn run_now(&self) {
        let now = self.now();
        self.set_next_run(now);
    }

    /// Override the next run time. Called from `execute`, it also replaces the
    /// rescheduling for the current run.
    pub fn set_next_run(&self, at: DateTime<Utc>) {
        self.lock().times.next = Some(at);
        self.interrupt();
    }

    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        self.lock().times.next
    }

    pub fn settings(&self) -> MachineSettings {
        self.lock().settings.clone()
    }

    /// Adjust settings in place. Takes effect from the loop's next decision.
    pub fn configure(&self, f: impl FnOnce(&mut MachineSettings)) {
        {
            let mut inner = self.lock();
            f(&mut inner.settings);
            let limit = inner.settings.history_limit;
            inner.history.set_limit(limit);
        }
        self.interrupt();
    }

    // ── Pause control ────────────────────────────────────────────────────

    /// Request a pause attributed to `actor` (`None` = the machine itself).
    pub fn pause_for_reason(&self, actor: Option<Actor>, reason: impl Into<String>) {
        let reason = reason.into();
        info!(
            machine = %self.name(),
            "{} set to pause by {} - {}",
            self.name(),
            Actor::text(actor.as_ref()),
            reason
        );
        {
            let mut inner = self.lock();
            inner.pause.actor = actor;
            inner.pause.reason = Some(reason);
        }
        self.set_paused(true);
    }

    /// Request a resume attributed to `actor` (`None` = the machine itself).
    pub fn resume_by(&self, actor: Option<Actor>) {
        info!(
            machine = %self.name(),
            "{} set to resume by {}",
            self.name(),
            Actor::text(actor.as_ref())
        );
        {
            let mut inner = self.lock();
            inner.pause.reason = None;
            // Outside an episode there is nothing for the resume to be reported against.
            inner.pause.actor = if inner.pause.in_episode() { actor } else { None };
        }
        self.set_paused(false);
    }

    /// Raw pause request. Called from inside `execute`, the current run is
    /// marked as paused by the task.
    pub fn set_paused(&self, paused: bool) {
        {
            let mut inner = self.lock();
            self.shared.pause_requested.store(paused, Ordering::Release);
            if inner.in_execute && inner.loop_thread == Some(thread::current().id()) {
                inner.paused_by_execute = paused;
            }
        }
        self.interrupt();
    }

    /// Whether a pause is requested. The loop may not have acknowledged it yet.
    pub fn is_paused(&self) -> bool {
        self.shared.pause_requested.load(Ordering::Acquire)
    }

    /// Set or clear the manual wake time for the current pause.
    pub fn set_pause_until(&self, until: Option<DateTime<Utc>>) {
        self.lock().pause.until_override = until;
        self.interrupt();
    }

    /// When the paused loop will next wake on its own: the earlier of the
    /// manual override and the next alert.
    pub fn pause_until(&self) -> Option<DateTime<Utc>> {
        self.lock().pause_until()
    }

    pub fn next_alert(&self) -> Option<DateTime<Utc>> {
        let inner = self.lock();
        inner.pause.next_alert(inner.settings.alerts.as_ref())
    }

    pub fn pause_state(&self) -> PauseState {
        self.lock().pause.clone()
    }

    // ── Introspection ────────────────────────────────────────────────────

    /// Retained runs, oldest first.
    pub fn history(&self) -> Vec<RunRecord> {
        self.lock().history.snapshot()
    }

    pub fn last_run(&self) -> Option<RunRecord> {
        self.lock().history.last().cloned()
    }

    pub fn run_count(&self) -> u64 {
        self.lock().history.run_count()
    }

    pub fn status(&self) -> MachineStatus {
        let now = self.now();
        let inner = self.lock();
        let requested = self.is_paused();
        let pause = (requested || inner.pause.in_episode()).then(|| PauseStatus {
            acknowledged: inner.pause.in_episode(),
            since: inner.pause.pause_time,
            until: inner.pause_until(),
            actor: inner.pause.actor.clone(),
            reason: inner.pause.reason.clone(),
            alert_count: inner.pause.alert_count,
        });
        MachineStatus {
            name: self.shared.name.clone(),
            state: inner.state,
            times: StatusTimes {
                start: inner.times.start,
                next: inner.times.next,
                end: inner.times.end,
            },
            uptime_secs: inner.up_since.map(|t| (now - t).num_seconds()),
            active: inner.state.is_active(),
            pause,
            run_count: inner.history.run_count(),
        }
    }
}
