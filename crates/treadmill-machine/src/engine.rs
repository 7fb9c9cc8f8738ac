//! The execution loop.
//!
//! Runs on the machine's dedicated thread and owns the hook set for as long as
//! it is alive. Each iteration handles exactly one of: a pending pause, a
//! pending resume, waiting for the next run, or running. Blocking always goes
//! through the machine's [`WakeableTimer`](treadmill_core::WakeableTimer) so
//! any request from another thread takes effect immediately.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::thread;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use treadmill_core::LifecycleState;

use crate::error::{panic_message, MachineError, Result};
use crate::hooks::MachineHooks;
use crate::machine::Machine;
use crate::run::RunRecord;
use crate::schedule::compute_next_run;
use crate::types::StatusNotice;

/// Thread entry point. Borrows the hook set from the machine for the life of
/// the loop and hands it back on exit.
pub(crate) fn run(machine: Machine) -> Result<()> {
    let Some(hooks) = machine.shared.take_hooks() else {
        error!(machine = %machine.name(), "no hooks available, machine thread exiting");
        machine.lock().set_state(LifecycleState::Failed);
        machine.shared.mark_exited();
        return Err(MachineError::HooksUnavailable);
    };

    let mut engine = Engine { machine, hooks };
    let result = engine.run();
    let Engine { machine, hooks } = engine;
    machine.shared.return_hooks(hooks);
    machine.shared.mark_exited();
    result
}

struct Engine {
    machine: Machine,
    hooks: Box<dyn MachineHooks>,
}

impl Engine {
    fn run(&mut self) -> Result<()> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run_loop()));
        let result = match outcome {
            Ok(result) => result,
            Err(payload) => Err(MachineError::Panicked(panic_message(&*payload))),
        };
        if let Err(e) = &result {
            self.fail(e);
        }
        result
    }

    fn now(&self) -> DateTime<Utc> {
        self.machine.now()
    }

    fn name(&self) -> &str {
        self.machine.name()
    }

    fn set_state(&self, state: LifecycleState) {
        self.machine.lock().set_state(state);
    }

    fn stop_requested(&self) -> bool {
        self.machine.lock().stop_requested
    }

    fn run_loop(&mut self) -> Result<()> {
        let now = self.now();
        {
            let mut inner = self.machine.lock();
            inner.loop_thread = Some(thread::current().id());
            inner.up_since = Some(now);
            if inner.times.next.is_none() {
                inner.times.next = Some(now);
            }
            inner.set_state(LifecycleState::Running);
        }
        info!(machine = %self.name(), "{} started.", self.name());

        while !self.stop_requested() {
            self.machine.shared.timer.clear();

            if self.machine.is_paused() {
                self.acknowledge_pause(true);
                self.wait_while_paused()?;
                continue;
            }
            self.acknowledge_resume();

            let next = self.machine.lock().times.next;
            let now = self.now();
            match next {
                Some(next) if now < next => {
                    self.set_state(LifecycleState::Waiting);
                    self.machine
                        .shared
                        .timer
                        .wait_until(self.machine.shared.clock.as_ref(), next);
                }
                _ => {
                    self.set_state(LifecycleState::Running);
                    self.run_once()?;
                }
            }
        }

        self.shutdown()
    }

    // ── Pause handling ───────────────────────────────────────────────────

    /// Enter a pause episode if the flag is set and none is open yet.
    ///
    /// Returns `true` when a new episode started. The flag check happens under
    /// the machine lock, so a resume racing this call wins cleanly.
    fn acknowledge_pause(&mut self, set_state: bool) -> bool {
        {
            let mut inner = self.machine.lock();
            if inner.pause.in_episode()
                || !self.machine.shared.pause_requested.load(Ordering::Acquire)
            {
                return false;
            }
            if set_state {
                inner.set_state(LifecycleState::Paused);
            }
            let now = self.now();
            inner.pause.begin_episode(now);
        }
        let result = self.hooks.on_pause(&self.machine);
        self.log_hook("on_pause", result);
        true
    }

    /// Close the open pause episode once the flag has been cleared.
    fn acknowledge_resume(&mut self) {
        let ended = {
            let mut inner = self.machine.lock();
            if !inner.pause.in_episode()
                || self.machine.shared.pause_requested.load(Ordering::Acquire)
            {
                return;
            }
            inner.set_state(LifecycleState::Running);
            inner.pause.end_episode()
        };

        let result = self.hooks.on_resume(&self.machine);
        self.log_hook("on_resume", result);

        if let Some(ended) = ended.filter(|e| e.alerts_fired > 0) {
            self.notify(StatusNotice::Resumed {
                resumed_by: ended.actor,
            });
        }
    }

    /// Block until resumed, stopped, or the pause deadline passes, then deal
    /// with whatever the deadline was for.
    fn wait_while_paused(&mut self) -> Result<()> {
        let until = self.machine.pause_until();
        let timer = &self.machine.shared.timer;
        match until {
            Some(until) => timer.wait_until(self.machine.shared.clock.as_ref(), until),
            None => timer.wait_for(None),
        };

        if !self.machine.is_paused() || self.stop_requested() {
            return Ok(());
        }
        let now = self.now();
        match self.machine.pause_until() {
            Some(until) if until <= now => self.pause_deadline_reached(now),
            _ => Ok(()),
        }
    }

    fn pause_deadline_reached(&mut self, now: DateTime<Utc>) -> Result<()> {
        let override_due = self
            .machine
            .lock()
            .pause
            .until_override
            .is_some_and(|until| until <= now);

        if override_due {
            debug!(machine = %self.name(), "pause override elapsed");
            self.hooks
                .on_pause_elapsed(&self.machine)
                .map_err(|source| MachineError::Hook {
                    hook: "on_pause_elapsed",
                    source,
                })?;
            if !self.machine.is_paused() {
                return Ok(());
            }
        }

        let alert = {
            let mut inner = self.machine.lock();
            let due = inner
                .pause
                .next_alert(inner.settings.alerts.as_ref())
                .is_some_and(|at| at <= now);
            due.then(|| inner.pause.record_alert(now))
        };
        if let Some(count) = alert {
            warn!(machine = %self.name(), count, "{} is still paused.", self.name());
            self.notify(StatusNotice::PauseReminder { count });
        }

        if !self.machine.is_paused() {
            return Ok(());
        }
        match self.machine.pause_until() {
            Some(deadline) if deadline <= now => {
                Err(MachineError::PauseDeadlineNotAdvanced { deadline })
            }
            _ => Ok(()),
        }
    }

    // ── Runs ─────────────────────────────────────────────────────────────

    fn run_once(&mut self) -> Result<()> {
        let start = self.now();
        let mut run = {
            let mut inner = self.machine.lock();
            inner.times.start = Some(start);
            inner.times.end = None;
            inner.times.next = None;
            inner.in_execute = true;
            inner.paused_by_execute = false;
            RunRecord::new(inner.history.next_id(), start)
        };
        debug!(machine = %self.name(), run_id = run.id, "run starting");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.hooks.execute(&self.machine, &mut run)
        }));

        let end = self.now();
        let paused_by_execute = {
            let mut inner = self.machine.lock();
            inner.in_execute = false;
            inner.times.end = Some(end);
            std::mem::take(&mut inner.paused_by_execute)
        };
        run.time_end = Some(end);

        let task_error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(payload) => Some(anyhow!("execute panicked: {}", panic_message(&*payload))),
        };

        if let Some(task_error) = &task_error {
            run.failed = true;
            run.error = Some(format!("{task_error:#}"));
            if self.machine.lock().settings.pause_on_error {
                self.pause_due_to_error(task_error)?;
            }
            let result = self.hooks.on_error(&self.machine, &run, task_error);
            self.log_hook("on_error", result);
        }

        self.reschedule(&mut run);

        if paused_by_execute {
            run.paused_by_execute = true;
            if self.acknowledge_pause(true) {
                self.record_alert();
                self.notify(StatusNotice::PausedByTask);
            }
        }

        run.time_next = self.machine.lock().times.next;
        let result = self.hooks.on_run_complete(&self.machine, &mut run);
        self.log_hook("on_run_complete", result);

        debug!(
            machine = %self.name(),
            run_id = run.id,
            failed = run.failed,
            next = ?run.time_next,
            "run finished"
        );
        self.machine.lock().history.push(run);
        Ok(())
    }

    /// Pick the next run time unless something (the task, or `run_now` from
    /// another thread) already set one during this run.
    fn reschedule(&mut self, run: &mut RunRecord) {
        let mut inner = self.machine.lock();
        if inner.times.next.is_some() {
            return;
        }
        let start = inner.times.start.unwrap_or(run.time_start);
        let end = inner.times.end.unwrap_or(start);
        let next = compute_next_run(&inner.settings.schedule, start, end, run.failed);
        inner.settings.schedule.wait_for_this_one_time = None;
        inner.times.next = Some(next.at);
        run.schedule_basis = Some(next.basis);
    }

    fn pause_due_to_error(&mut self, task_error: &anyhow::Error) -> Result<()> {
        self.hooks
            .on_pause_due_to_error(&self.machine, task_error)
            .map_err(|source| MachineError::Hook {
                hook: "on_pause_due_to_error",
                source,
            })?;
        if !self.machine.is_paused() {
            self.machine
                .pause_for_reason(None, "automatic pause due to error occurring.");
        }
        if self.acknowledge_pause(true) {
            self.record_alert();
            self.notify(StatusNotice::PausedOnError {
                error: format!("{task_error:#}"),
            });
        }
        Ok(())
    }

    // ── Exit paths ───────────────────────────────────────────────────────

    /// Orderly exit after a stop request. The machine is held paused while
    /// `on_stopping` runs; a pause the operator asked for survives the stop.
    fn shutdown(&mut self) -> Result<()> {
        let forced = {
            let _guard = self.machine.lock();
            !self.machine.shared.pause_requested.swap(true, Ordering::AcqRel)
        };
        self.acknowledge_pause(false);

        self.hooks
            .on_stopping(&self.machine)
            .map_err(|source| MachineError::Hook {
                hook: "on_stopping",
                source,
            })?;

        {
            let mut inner = self.machine.lock();
            if forced {
                self.machine.shared.pause_requested.store(false, Ordering::Release);
                inner.pause.reset();
            } else {
                let actor = inner.pause.actor.take();
                let reason = inner.pause.reason.take();
                inner.pause.reset();
                inner.pause.actor = actor;
                inner.pause.reason = reason;
            }
            inner.set_state(LifecycleState::Stopped);
        }
        info!(machine = %self.name(), "{} stopped.", self.name());
        Ok(())
    }

    fn fail(&mut self, e: &MachineError) {
        {
            let mut inner = self.machine.lock();
            self.machine.shared.pause_requested.store(false, Ordering::Release);
            inner.pause.reset();
            inner.in_execute = false;
            inner.paused_by_execute = false;
            inner.set_state(LifecycleState::Failed);
        }
        error!(machine = %self.name(), error = %e, "machine loop failed");

        let hooks = &mut self.hooks;
        let machine = &self.machine;
        match panic::catch_unwind(AssertUnwindSafe(|| hooks.on_fail(machine, e))) {
            Ok(result) => self.log_hook("on_fail", result),
            Err(payload) => warn!(
                machine = %self.name(),
                panic = %panic_message(&*payload),
                "on_fail hook panicked"
            ),
        }
        let notice = StatusNotice::Failed {
            error: e.to_string(),
        };
        let hooks = &mut self.hooks;
        let machine = &self.machine;
        match panic::catch_unwind(AssertUnwindSafe(|| hooks.notify_status(machine, &notice))) {
            Ok(result) => self.log_hook("notify_status", result),
            Err(payload) => warn!(
                machine = %self.name(),
                panic = %panic_message(&*payload),
                "notify_status hook panicked"
            ),
        }
    }

    /// Self-initiated pauses are announced straight away, and that
    /// announcement counts as the episode's first alert.
    fn record_alert(&self) -> u32 {
        let now = self.now();
        self.machine.lock().pause.record_alert(now)
    }

    // ── Hook plumbing ────────────────────────────────────────────────────

    fn notify(&mut self, notice: StatusNotice) {
        debug!(machine = %self.name(), ?notice, "publishing status");
        let result = self.hooks.notify_status(&self.machine, &notice);
        self.log_hook("notify_status", result);
    }

    /// Informational hooks never stop the loop; their errors are logged.
    fn log_hook(&self, hook: &'static str, result: anyhow::Result<()>) {
        if let Err(e) = result {
            warn!(machine = %self.name(), hook, "hook failed: {e:#}");
        }
    }
}
