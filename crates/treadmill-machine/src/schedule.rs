use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Gap used when no timing rule yields a positive wait.
pub const FALLBACK_WAIT_MS: i64 = 1_000;

/// Default floor gap after a run.
pub const DEFAULT_WAIT_MIN_MS: i64 = 200;

/// Timing rules for choosing the next run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    /// Floor gap measured from the end of a run.
    pub wait_min: Option<Duration>,
    /// Gap measured from the start of the previous run.
    pub wait_run_frequency: Option<Duration>,
    /// Gap after a failed run, measured from its end.
    pub wait_on_error: Option<Duration>,
    /// One-shot gap for the next reschedule only.
    pub wait_for_this_one_time: Option<Duration>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            wait_min: Some(Duration::milliseconds(DEFAULT_WAIT_MIN_MS)),
            wait_run_frequency: None,
            wait_on_error: None,
            wait_for_this_one_time: None,
        }
    }
}

/// Which rule produced a next-run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleBasis {
    OneTime,
    OnError,
    Frequency,
    Minimum,
    /// No rule applied; [`FALLBACK_WAIT_MS`] after the run's end was used.
    Fallback,
}

impl std::fmt::Display for ScheduleBasis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScheduleBasis::OneTime => "one_time",
            ScheduleBasis::OnError => "on_error",
            ScheduleBasis::Frequency => "frequency",
            ScheduleBasis::Minimum => "minimum",
            ScheduleBasis::Fallback => "fallback",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextRun {
    pub at: DateTime<Utc>,
    pub basis: ScheduleBasis,
}

/// Compute the next run time after a run that spanned `start..end`.
///
/// The first present and strictly positive rule wins, in this order:
/// one-time, on-error (failed runs only), frequency (from `start`), minimum.
/// The caller clears the one-time override afterwards whatever won.
pub fn compute_next_run(
    config: &ScheduleConfig,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    failed: bool,
) -> NextRun {
    let candidates = [
        (config.wait_for_this_one_time, end, true, ScheduleBasis::OneTime),
        (config.wait_on_error, end, failed, ScheduleBasis::OnError),
        (config.wait_run_frequency, start, true, ScheduleBasis::Frequency),
        (config.wait_min, end, true, ScheduleBasis::Minimum),
    ];

    for (wait, anchor, eligible, basis) in candidates {
        match wait {
            Some(wait) if eligible && wait > Duration::zero() => {
                return NextRun {
                    at: anchor + wait,
                    basis,
                };
            }
            _ => {}
        }
    }

    warn!(
        wait_min = ?config.wait_min,
        "no positive wait configured; falling back to {FALLBACK_WAIT_MS}ms"
    );
    NextRun {
        at: end + Duration::milliseconds(FALLBACK_WAIT_MS),
        basis: ScheduleBasis::Fallback,
    }
}
