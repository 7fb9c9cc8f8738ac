use chrono::{DateTime, Utc};
use thiserror::Error;

/// Engine-level failures. Any of these moves the machine to `FAILED`.
///
/// Errors raised by the task's own `execute` are not represented here; they are
/// recorded on the run and the loop carries on.
#[derive(Debug, Error)]
pub enum MachineError {
    /// The pause deadline elapsed and neither a resume nor a later deadline followed.
    #[error("still paused and pause deadline {deadline} was not advanced")]
    PauseDeadlineNotAdvanced { deadline: DateTime<Utc> },

    /// A hook the loop depends on for control flow returned an error.
    #[error("hook {hook} failed: {source}")]
    Hook {
        hook: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// A panic escaped the scheduling machinery.
    #[error("machine loop panicked: {0}")]
    Panicked(String),

    /// The execution thread could not be spawned.
    #[error("failed to spawn machine thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// The hook set is still owned by a previous execution thread.
    #[error("hooks unavailable: previous machine thread has not returned them")]
    HooksUnavailable,
}

pub type Result<T> = std::result::Result<T, MachineError>;

/// Best-effort text for a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
