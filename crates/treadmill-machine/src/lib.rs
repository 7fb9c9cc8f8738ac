//! `treadmill-machine`: run one task over and over on a dedicated thread.
//!
//! # Overview
//!
//! A [`Machine`] owns a single recurring task, described by a [`MachineHooks`]
//! implementation, and drives it through a small lifecycle:
//!
//! ```text
//! STOPPED ──start──▶ RUNNING ⇄ WAITING
//!                       │  ▲
//!                 pause │  │ resume
//!                       ▼  │
//!                     PAUSED        any ──stop──▶ STOPPING ──▶ STOPPED
//!                                   any ──engine error──▶ FAILED
//! ```
//!
//! Task errors never stop the machine. They are recorded on the [`RunRecord`],
//! optionally pause it (`pause_on_error`), and affect when the next run
//! happens.
//!
//! # Next-run rules
//!
//! | Rule         | Gap measured from | Applies when                   |
//! |--------------|-------------------|--------------------------------|
//! | one-time     | run end           | set; consumed after one use    |
//! | on-error     | run end           | the run failed                 |
//! | frequency    | run start         | always                         |
//! | minimum      | run end           | always                         |
//! | fallback     | run end (1s)      | nothing above was positive     |
//!
//! # Pause alerts
//!
//! While paused the machine sends reminders through
//! [`MachineHooks::notify_status`]: the first after `alerts.initial`, the
//! second after `alerts.further` from the pause, later ones `alerts.further`
//! apart.

pub(crate) mod engine;
pub mod error;
pub mod history;
pub mod hooks;
pub mod machine;
pub mod pause;
pub mod run;
pub mod schedule;
pub mod types;

pub use error::{MachineError, Result};
pub use history::{HistoryLimit, RunHistory};
pub use hooks::MachineHooks;
pub use machine::{Machine, MachineBuilder};
pub use pause::{PauseAlerts, PauseState};
pub use run::RunRecord;
pub use schedule::{compute_next_run, NextRun, ScheduleBasis, ScheduleConfig};
pub use types::{MachineSettings, MachineStatus, PauseStatus, StatusNotice, StatusTimes};
