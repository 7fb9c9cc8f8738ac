use chrono::Duration;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::secs_to_duration;
use crate::error::{CoreError, Result};

pub const DEFAULT_MACHINE_NAME: &str = "treadmill";
/// Floor gap after a run, in seconds.
pub const DEFAULT_WAIT_MIN_SECS: f64 = 0.2;
/// First pause alert after 5 minutes.
pub const DEFAULT_ALERT_INITIAL_SECS: f64 = 300.0;
/// Further pause alerts every 30 minutes.
pub const DEFAULT_ALERT_FURTHER_SECS: f64 = 1800.0;

/// Top-level config (treadmill.toml + TREADMILL_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TreadmillConfig {
    #[serde(default)]
    pub machine: MachineConfig,
    #[serde(default)]
    pub schedule: ScheduleFileConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    #[serde(default = "default_name")]
    pub name: String,
    /// Request a pause before the first run.
    #[serde(default)]
    pub pause_on_start: bool,
    /// Pause automatically when a run fails.
    #[serde(default)]
    pub pause_on_error: bool,
    /// Absent = keep no history, 0 = unbounded, N = keep the last N runs.
    #[serde(default)]
    pub run_history_limit: Option<usize>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            pause_on_start: false,
            pause_on_error: false,
            run_history_limit: None,
        }
    }
}

/// Reschedule timings as written in the file (fractional seconds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleFileConfig {
    #[serde(default = "default_wait_min_secs")]
    pub wait_min_secs: f64,
    /// Gap measured from the previous run's start.
    #[serde(default)]
    pub wait_run_frequency_secs: Option<f64>,
    /// Gap used only after a failed run.
    #[serde(default)]
    pub wait_on_error_secs: Option<f64>,
}

impl Default for ScheduleFileConfig {
    fn default() -> Self {
        Self {
            wait_min_secs: DEFAULT_WAIT_MIN_SECS,
            wait_run_frequency_secs: None,
            wait_on_error_secs: None,
        }
    }
}

impl ScheduleFileConfig {
    pub fn wait_min(&self) -> Result<Duration> {
        to_duration("schedule.wait_min_secs", self.wait_min_secs)
    }

    pub fn wait_run_frequency(&self) -> Result<Option<Duration>> {
        self.wait_run_frequency_secs
            .map(|s| to_duration("schedule.wait_run_frequency_secs", s))
            .transpose()
    }

    pub fn wait_on_error(&self) -> Result<Option<Duration>> {
        self.wait_on_error_secs
            .map(|s| to_duration("schedule.wait_on_error_secs", s))
            .transpose()
    }
}

/// Pause alert escalation thresholds (fractional seconds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// When false the machine pauses silently, waking only for overrides.
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_alert_initial_secs")]
    pub initial_secs: f64,
    #[serde(default = "default_alert_further_secs")]
    pub further_secs: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_secs: DEFAULT_ALERT_INITIAL_SECS,
            further_secs: DEFAULT_ALERT_FURTHER_SECS,
        }
    }
}

impl AlertConfig {
    /// Both alert gaps must be positive.
    pub fn initial(&self) -> Result<Duration> {
        to_positive_duration("alerts.initial_secs", self.initial_secs)
    }

    pub fn further(&self) -> Result<Duration> {
        to_positive_duration("alerts.further_secs", self.further_secs)
    }
}

fn to_duration(field: &'static str, value: f64) -> Result<Duration> {
    secs_to_duration(value).ok_or(CoreError::InvalidDuration { field, value })
}

fn to_positive_duration(field: &'static str, value: f64) -> Result<Duration> {
    let duration = to_duration(field, value)?;
    if duration <= Duration::zero() {
        return Err(CoreError::InvalidDuration { field, value });
    }
    Ok(duration)
}

fn bool_true() -> bool {
    true
}
fn default_name() -> String {
    DEFAULT_MACHINE_NAME.to_string()
}
fn default_wait_min_secs() -> f64 {
    DEFAULT_WAIT_MIN_SECS
}
fn default_alert_initial_secs() -> f64 {
    DEFAULT_ALERT_INITIAL_SECS
}
fn default_alert_further_secs() -> f64 {
    DEFAULT_ALERT_FURTHER_SECS
}

impl TreadmillConfig {
    /// Load config from a TOML file with TREADMILL_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.treadmill/treadmill.toml
    ///
    /// A missing file is not an error; defaults fill every field.
    /// Nested env keys use a double underscore: `TREADMILL_SCHEDULE__WAIT_MIN_SECS=1.5`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        debug!(path = %path, exists = std::path::Path::new(&path).exists(), "loading config");

        Self::extract(
            Figment::new()
                .merge(Toml::file(&path))
                .merge(Env::prefixed("TREADMILL_").split("__")),
        )
    }

    /// Extract from an already assembled figment; serde defaults fill the gaps.
    pub fn extract(figment: Figment) -> Result<Self> {
        let config: TreadmillConfig = figment
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject durations that cannot be represented, and non-positive alert
    /// gaps, before any engine sees them.
    pub fn validate(&self) -> Result<()> {
        self.schedule.wait_min()?;
        self.schedule.wait_run_frequency()?;
        self.schedule.wait_on_error()?;
        self.alerts.initial()?;
        self.alerts.further()?;
        if self.machine.name.trim().is_empty() {
            return Err(CoreError::Config("machine.name must not be empty".into()));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.treadmill/treadmill.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(s: &str) -> Result<TreadmillConfig> {
        TreadmillConfig::extract(Figment::new().merge(Toml::string(s)))
    }

    #[test]
    fn empty_file_gives_defaults() {
        let config = from_toml("").unwrap();
        assert_eq!(config.machine.name, DEFAULT_MACHINE_NAME);
        assert_eq!(config.schedule.wait_min().unwrap(), Duration::milliseconds(200));
        assert!(config.schedule.wait_run_frequency().unwrap().is_none());
        assert!(config.machine.run_history_limit.is_none());
        assert!(config.alerts.enabled);
        assert_eq!(config.alerts.initial().unwrap(), Duration::seconds(300));
    }

    #[test]
    fn full_file_is_parsed() {
        let config = from_toml(
            r#"
            [machine]
            name = "sync"
            pause_on_error = true
            run_history_limit = 0

            [schedule]
            wait_min_secs = 3
            wait_run_frequency_secs = 10.5
            wait_on_error_secs = 120

            [alerts]
            initial_secs = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.machine.name, "sync");
        assert!(config.machine.pause_on_error);
        assert_eq!(config.machine.run_history_limit, Some(0));
        assert_eq!(config.schedule.wait_min().unwrap(), Duration::seconds(3));
        assert_eq!(
            config.schedule.wait_run_frequency().unwrap(),
            Some(Duration::milliseconds(10_500))
        );
        assert_eq!(config.schedule.wait_on_error().unwrap(), Some(Duration::seconds(120)));

        let alerts = config.alerts;
        assert_eq!(alerts.initial().unwrap(), Duration::seconds(2));
        assert_eq!(alerts.further().unwrap(), Duration::seconds(1800));
    }

    #[test]
    fn alerts_can_be_disabled() {
        let config = from_toml("[alerts]\nenabled = false").unwrap();
        assert!(!config.alerts.enabled);
    }

    #[test]
    fn empty_name_is_rejected() {
        let err = from_toml("[machine]\nname = \" \"").unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[test]
    fn non_finite_duration_is_rejected() {
        let err = from_toml("[schedule]\nwait_min_secs = nan").unwrap_err();
        assert!(matches!(err, CoreError::InvalidDuration { field: "schedule.wait_min_secs", .. }));
    }

    #[test]
    fn non_positive_alert_gaps_are_rejected() {
        let err = from_toml("[alerts]\ninitial_secs = 0.2\nfurther_secs = 0").unwrap_err();
        assert!(matches!(err, CoreError::InvalidDuration { field: "alerts.further_secs", .. }));

        let err = from_toml("[alerts]\ninitial_secs = -1").unwrap_err();
        assert!(matches!(err, CoreError::InvalidDuration { field: "alerts.initial_secs", .. }));
    }

    #[test]
    fn negative_schedule_gap_is_accepted() {
        // A non-positive gap only means the rule is skipped when rescheduling.
        let config = from_toml("[schedule]\nwait_min_secs = -1").unwrap();
        assert_eq!(config.schedule.wait_min().unwrap(), Duration::seconds(-1));
    }
}
