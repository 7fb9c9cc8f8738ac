use chrono::{DateTime, Utc};
use serde::Serialize;
use treadmill_core::{config::TreadmillConfig, Actor, CoreError, LifecycleState};

use crate::history::HistoryLimit;
use crate::pause::PauseAlerts;
use crate::schedule::ScheduleConfig;

/// Owner-tunable behaviour. Readable and writable while the machine runs via
/// [`Machine::configure`](crate::Machine::configure).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineSettings {
    pub schedule: ScheduleConfig,
    /// Pause automatically when a run fails.
    pub pause_on_error: bool,
    /// Request a pause before the first run after `start()`.
    pub pause_on_start: bool,
    /// `None` disables pause alerts.
    pub alerts: Option<PauseAlerts>,
    pub history_limit: HistoryLimit,
}

impl Default for MachineSettings {
    fn default() -> Self {
        Self {
            schedule: ScheduleConfig::default(),
            pause_on_error: false,
            pause_on_start: false,
            alerts: Some(PauseAlerts::default()),
            history_limit: HistoryLimit::Disabled,
        }
    }
}

impl TryFrom<&TreadmillConfig> for MachineSettings {
    type Error = CoreError;

    fn try_from(config: &TreadmillConfig) -> Result<Self, Self::Error> {
        let alerts = if config.alerts.enabled {
            Some(PauseAlerts {
                initial: config.alerts.initial()?,
                further: config.alerts.further()?,
            })
        } else {
            None
        };

        Ok(Self {
            schedule: ScheduleConfig {
                wait_min: Some(config.schedule.wait_min()?),
                wait_run_frequency: config.schedule.wait_run_frequency()?,
                wait_on_error: config.schedule.wait_on_error()?,
                wait_for_this_one_time: None,
            },
            pause_on_error: config.machine.pause_on_error,
            pause_on_start: config.machine.pause_on_start,
            alerts,
            history_limit: HistoryLimit::from(config.machine.run_history_limit),
        })
    }
}

/// Point-in-time view of a machine, safe to take from any thread.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MachineStatus {
    pub name: String,
    pub state: LifecycleState,
    pub times: StatusTimes,
    /// Present once the machine has started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_secs: Option<i64>,
    pub active: bool,
    /// Present while a pause is requested or acknowledged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pause: Option<PauseStatus>,
    /// Runs started since the machine was created.
    pub run_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusTimes {
    pub start: Option<DateTime<Utc>>,
    pub next: Option<DateTime<Utc>>,
    /// Present once a run has completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PauseStatus {
    /// `false` between the request and the loop acknowledging it.
    pub acknowledged: bool,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub actor: Option<Actor>,
    pub reason: Option<String>,
    pub alert_count: Option<u32>,
}

/// Why the engine is asking the host to publish the machine's status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusNotice {
    /// Paused automatically after a failed run (`pause_on_error`). Counts as
    /// the episode's first alert.
    PausedOnError { error: String },
    /// The task requested a pause from inside `execute`. Counts as the
    /// episode's first alert.
    PausedByTask,
    /// Still paused; `count` is the number of reminders this episode, this one included.
    PauseReminder { count: u32 },
    /// Resumed after at least one reminder went out.
    Resumed { resumed_by: Option<Actor> },
    /// The engine stopped on an engine-level error.
    Failed { error: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use figment::{providers::{Format, Toml}, Figment};

    #[test]
    fn settings_from_config() {
        let config = TreadmillConfig::extract(Figment::new().merge(Toml::string(
            r#"
            [machine]
            pause_on_error = true
            run_history_limit = 2

            [schedule]
            wait_min_secs = 3
            wait_on_error_secs = 120

            [alerts]
            initial_secs = 2
            further_secs = 5
            "#,
        )))
        .unwrap();

        let settings = MachineSettings::try_from(&config).unwrap();
        assert!(settings.pause_on_error);
        assert!(!settings.pause_on_start);
        assert_eq!(settings.schedule.wait_min, Some(Duration::seconds(3)));
        assert_eq!(settings.schedule.wait_on_error, Some(Duration::seconds(120)));
        assert_eq!(settings.schedule.wait_run_frequency, None);
        assert_eq!(settings.history_limit, HistoryLimit::from(Some(2)));
        assert_eq!(
            settings.alerts,
            Some(PauseAlerts {
                initial: Duration::seconds(2),
                further: Duration::seconds(5),
            })
        );
    }

    #[test]
    fn disabled_alerts_map_to_none() {
        let config = TreadmillConfig::extract(
            Figment::new().merge(Toml::string("[alerts]\nenabled = false")),
        )
        .unwrap();
        let settings = MachineSettings::try_from(&config).unwrap();
        assert!(settings.alerts.is_none());
    }

    #[test]
    fn zero_alert_gap_is_rejected() {
        let mut config = TreadmillConfig::default();
        config.alerts.initial_secs = 0.2;
        config.alerts.further_secs = 0.0;
        assert!(MachineSettings::try_from(&config).is_err());

        config.alerts.enabled = false;
        assert!(MachineSettings::try_from(&config).unwrap().alerts.is_none());
    }

    #[test]
    fn status_omits_end_and_uptime_until_known() {
        let status = MachineStatus {
            name: "test".into(),
            state: LifecycleState::Stopped,
            times: StatusTimes { start: None, next: None, end: None },
            uptime_secs: None,
            active: false,
            pause: None,
            run_count: 0,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "STOPPED");
        assert!(json["times"].get("end").is_none());
        assert!(json.get("uptime_secs").is_none());
    }
}
