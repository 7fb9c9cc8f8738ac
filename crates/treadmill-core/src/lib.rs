//! `treadmill-core`: shared building blocks for the recurring-task engine.
//!
//! # Overview
//!
//! | Module   | Provides                                                   |
//! |----------|------------------------------------------------------------|
//! | `clock`  | [`Clock`] trait and the UTC [`SystemClock`]                |
//! | `timer`  | [`WakeableTimer`], the cross-thread wake signal            |
//! | `types`  | [`Actor`] attribution and the [`LifecycleState`] enum      |
//! | `config` | `treadmill.toml` + `TREADMILL_*` env loading via figment   |

pub mod clock;
pub mod config;
pub mod error;
pub mod timer;
pub mod types;

pub use clock::{Clock, SystemClock};
pub use error::{CoreError, Result};
pub use timer::WakeableTimer;
pub use types::{Actor, LifecycleState};
