use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity attributed to a pause or resume request.
///
/// `None` in an `Option<Actor>` means the machine did it itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub username: String,
    /// Numeric account id in the host's user store, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
}

impl Actor {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            user_id: None,
        }
    }

    pub fn with_user_id(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Display text for an optional actor: the username, or `"itself"`.
    pub fn text(actor: Option<&Actor>) -> &str {
        actor.map(|a| a.username.as_str()).unwrap_or("itself")
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.username)
    }
}

impl From<&str> for Actor {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Lifecycle state of a machine. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    /// Executing a run, or about to.
    Running,
    /// Pause acknowledged by the loop.
    Paused,
    /// Idle until the next run time.
    Waiting,
    /// Stop requested; the loop has not exited yet.
    Stopping,
    /// Initial state, and the state after a clean stop.
    #[default]
    Stopped,
    /// Terminal state after an engine-level error.
    Failed,
}

impl LifecycleState {
    /// `true` while the machine is `Running` or `Waiting`.
    pub fn is_active(self) -> bool {
        matches!(self, LifecycleState::Running | LifecycleState::Waiting)
    }

    /// `true` for the states a start request may leave from.
    pub fn is_halted(self) -> bool {
        matches!(self, LifecycleState::Stopped | LifecycleState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Running => "RUNNING",
            LifecycleState::Paused => "PAUSED",
            LifecycleState::Waiting => "WAITING",
            LifecycleState::Stopping => "STOPPING",
            LifecycleState::Stopped => "STOPPED",
            LifecycleState::Failed => "FAILED",
        }
    }

    /// Capitalised form for human-facing text, e.g. `"Waiting"`.
    pub fn as_text(self) -> String {
        let s = self.as_str();
        let mut out = s[..1].to_string();
        out.push_str(&s[1..].to_ascii_lowercase());
        out
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LifecycleState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RUNNING" => Ok(LifecycleState::Running),
            "PAUSED" => Ok(LifecycleState::Paused),
            "WAITING" => Ok(LifecycleState::Waiting),
            "STOPPING" => Ok(LifecycleState::Stopping),
            "STOPPED" => Ok(LifecycleState::Stopped),
            "FAILED" => Ok(LifecycleState::Failed),
            other => Err(format!("unknown lifecycle state: {other}")),
        }
    }
}
