//! The callbacks a [`Machine`] makes into its owner.
//!
//! `execute` is the only required method. Every other hook defaults to the
//! matching function in [`defaults`], so an override that wants the stock
//! behaviour plus its own calls the default explicitly:
//!
//! ```rust,no_run
//! use treadmill_machine::{hooks::{self, MachineHooks}, Machine, RunRecord};
//!
//! struct Mirror;
//!
//! impl MachineHooks for Mirror {
//!     fn execute(&mut self, _machine: &Machine, _run: &mut RunRecord) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//!
//!     fn on_pause(&mut self, machine: &Machine) -> anyhow::Result<()> {
//!         hooks::defaults::on_pause(machine);
//!         // ...close connections...
//!         Ok(())
//!     }
//! }
//! ```
//!
//! All hooks run on the execution thread. They must not call [`Machine::join`].

use tracing::{error, info, warn};

use crate::error::MachineError;
use crate::machine::Machine;
use crate::run::RunRecord;
use crate::types::StatusNotice;

/// Hook set for one machine.
///
/// Errors returned from `on_pause_elapsed`, `on_pause_due_to_error` and
/// `on_stopping` are engine-level and fail the machine. Errors from the other
/// hooks are logged and the loop carries on.
pub trait MachineHooks: Send {
    /// One unit of work. An `Err` (or a panic) marks the run failed; the
    /// machine keeps going.
    ///
    /// `run` is valid for this call only. Calling `pause_for_reason` or
    /// `set_paused(true)` from here marks the run `paused_by_execute` and the
    /// machine enters `PAUSED` right after rescheduling.
    fn execute(&mut self, machine: &Machine, run: &mut RunRecord) -> anyhow::Result<()>;

    /// A run failed. Called after the pause-on-error handling, if any.
    fn on_error(
        &mut self,
        machine: &Machine,
        run: &RunRecord,
        error: &anyhow::Error,
    ) -> anyhow::Result<()> {
        defaults::on_error(machine, run, error);
        Ok(())
    }

    /// The engine failed and is now `FAILED`. Best effort: an error here is
    /// logged and never replaces `error`.
    fn on_fail(&mut self, machine: &Machine, error: &MachineError) -> anyhow::Result<()> {
        defaults::on_fail(machine, error);
        Ok(())
    }

    /// The loop acknowledged a pause. Called once per pause episode.
    fn on_pause(&mut self, machine: &Machine) -> anyhow::Result<()> {
        defaults::on_pause(machine);
        Ok(())
    }

    /// The loop acknowledged a resume.
    fn on_resume(&mut self, machine: &Machine) -> anyhow::Result<()> {
        defaults::on_resume(machine);
        Ok(())
    }

    /// The loop is about to exit after a stop request. Release resources here.
    fn on_stopping(&mut self, _machine: &Machine) -> anyhow::Result<()> {
        Ok(())
    }

    /// The manual pause-until override has elapsed while still paused.
    ///
    /// Must either resume the machine or move the override later with
    /// [`Machine::set_pause_until`]; doing neither fails the machine.
    fn on_pause_elapsed(&mut self, _machine: &Machine) -> anyhow::Result<()> {
        Ok(())
    }

    /// A run failed and `pause_on_error` is set. The machine enters `PAUSED`
    /// as soon as this returns.
    fn on_pause_due_to_error(
        &mut self,
        machine: &Machine,
        error: &anyhow::Error,
    ) -> anyhow::Result<()> {
        defaults::on_pause_due_to_error(machine, error);
        Ok(())
    }

    /// A run finished and has been rescheduled. The record may still be
    /// annotated; it is frozen after this returns.
    fn on_run_complete(&mut self, _machine: &Machine, _run: &mut RunRecord) -> anyhow::Result<()> {
        Ok(())
    }

    /// Publish the machine's status to whoever watches it (mail, chat, pager).
    fn notify_status(&mut self, _machine: &Machine, _notice: &StatusNotice) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Any `FnMut(&Machine, &mut RunRecord)` closure is a hook set with only
/// `execute` customised.
impl<F> MachineHooks for F
where
    F: FnMut(&Machine, &mut RunRecord) -> anyhow::Result<()> + Send,
{
    fn execute(&mut self, machine: &Machine, run: &mut RunRecord) -> anyhow::Result<()> {
        self(machine, run)
    }
}

/// Stock hook behaviour, callable from overrides.
pub mod defaults {
    use super::*;

    pub fn on_error(machine: &Machine, run: &RunRecord, error: &anyhow::Error) {
        warn!(machine = %machine.name(), run_id = run.id, "run failed: {error:#}");
    }

    pub fn on_fail(machine: &Machine, error: &MachineError) {
        error!(machine = %machine.name(), %error, "{} failed.", machine.name());
    }

    pub fn on_pause(machine: &Machine) {
        info!(machine = %machine.name(), "{} paused.", machine.name());
    }

    pub fn on_resume(machine: &Machine) {
        info!(machine = %machine.name(), "{} resumed.", machine.name());
    }

    /// Record that the machine paused itself because of `error`.
    pub fn on_pause_due_to_error(machine: &Machine, _error: &anyhow::Error) {
        machine.pause_for_reason(None, "automatic pause due to error occurring.");
    }
}
