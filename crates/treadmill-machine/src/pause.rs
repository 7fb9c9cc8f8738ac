//! Pause episode bookkeeping and alert escalation timing.
//!
//! The effective wake time while paused is never stored. It is recomputed from
//! the manual override and the alert state each time it is asked for.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use treadmill_core::Actor;

/// Shortest gap between two alerts, whatever `further` says.
pub const MIN_ALERT_GAP_MS: i64 = 200;

/// Escalation thresholds for reminders while paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PauseAlerts {
    /// Gap from the pause time to the first alert.
    pub initial: Duration,
    /// Gap between later alerts.
    pub further: Duration,
}

impl Default for PauseAlerts {
    fn default() -> Self {
        Self {
            initial: Duration::minutes(5),
            further: Duration::minutes(30),
        }
    }
}

/// Pause request attribution and the current pause episode.
///
/// The pause *request* flag itself is an atomic on the machine; this struct
/// holds everything that is only touched under the machine lock.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PauseState {
    /// When the loop acknowledged the pause. `Some` for the whole episode.
    pub pause_time: Option<DateTime<Utc>>,
    /// Manually set wake time.
    pub until_override: Option<DateTime<Utc>>,
    pub actor: Option<Actor>,
    pub reason: Option<String>,
    pub alert_last: Option<DateTime<Utc>>,
    /// Alerts fired this episode; `None` outside an episode.
    pub alert_count: Option<u32>,
}

/// What the episode looked like when it ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeEnd {
    pub paused_at: DateTime<Utc>,
    pub alerts_fired: u32,
    /// Attribution at the moment of resume, i.e. whoever asked for it.
    pub actor: Option<Actor>,
}

impl PauseState {
    /// `true` between pause acknowledgement and resume acknowledgement.
    pub fn in_episode(&self) -> bool {
        self.pause_time.is_some()
    }

    /// Next alert due, or `None` when not paused or alerting is off.
    ///
    /// The second alert is anchored to the pause time, not the first alert;
    /// from the third onwards each is anchored to the previous one. Once an
    /// alert has fired the next one is always at least [`MIN_ALERT_GAP_MS`]
    /// after it.
    pub fn next_alert(&self, alerts: Option<&PauseAlerts>) -> Option<DateTime<Utc>> {
        let alerts = alerts?;
        let pause_time = self.pause_time?;
        let floor = Duration::milliseconds(MIN_ALERT_GAP_MS);
        match (self.alert_last, self.alert_count.unwrap_or(0)) {
            (None, _) => Some(pause_time + alerts.initial),
            (Some(last), 0 | 1) => Some((pause_time + alerts.further).max(last + floor)),
            (Some(last), _) => Some(last + alerts.further.max(floor)),
        }
    }

    /// Earlier of the manual override and the next alert.
    pub fn effective_until(&self, alerts: Option<&PauseAlerts>) -> Option<DateTime<Utc>> {
        match (self.until_override, self.next_alert(alerts)) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Start an episode. The caller has already checked the pause flag.
    pub fn begin_episode(&mut self, now: DateTime<Utc>) {
        self.pause_time = Some(now);
        self.alert_count = Some(0);
        self.alert_last = None;
    }

    /// Record an alert and return the running count for this episode.
    pub fn record_alert(&mut self, now: DateTime<Utc>) -> u32 {
        let count = self.alert_count.unwrap_or(0) + 1;
        self.alert_count = Some(count);
        self.alert_last = Some(now);
        count
    }

    /// End the episode, clearing attribution, alert state and the override.
    pub fn end_episode(&mut self) -> Option<EpisodeEnd> {
        let paused_at = self.pause_time.take()?;
        let alerts_fired = if self.alert_last.is_some() {
            self.alert_count.unwrap_or(1)
        } else {
            0
        };
        let actor = self.actor.take();
        self.clear_attribution();
        self.until_override = None;
        Some(EpisodeEnd {
            paused_at,
            alerts_fired,
            actor,
        })
    }

    /// Forget everything, episode or not.
    pub fn reset(&mut self) {
        *self = PauseState::default();
    }

    fn clear_attribution(&mut self) {
        self.actor = None;
        self.reason = None;
        self.alert_last = None;
        self.alert_count = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alerts() -> PauseAlerts {
        PauseAlerts {
            initial: Duration::seconds(2),
            further: Duration::seconds(5),
        }
    }

    fn paused_at(t: DateTime<Utc>) -> PauseState {
        let mut state = PauseState::default();
        state.begin_episode(t);
        state
    }

    #[test]
    fn not_paused_means_no_alert() {
        let state = PauseState::default();
        assert!(state.next_alert(Some(&alerts())).is_none());
        assert!(state.effective_until(Some(&alerts())).is_none());
    }

    #[test]
    fn alerting_off_means_no_alert() {
        let state = paused_at(Utc::now());
        assert!(state.next_alert(None).is_none());
    }

    #[test]
    fn escalation_anchors() {
        let t0 = Utc::now();
        let a = alerts();
        let mut state = paused_at(t0);

        // First alert: pause time + initial.
        assert_eq!(state.next_alert(Some(&a)), Some(t0 + Duration::seconds(2)));

        // Second alert: still anchored to the pause time.
        let first = t0 + Duration::seconds(2);
        assert_eq!(state.record_alert(first), 1);
        assert_eq!(state.next_alert(Some(&a)), Some(t0 + Duration::seconds(5)));

        // Third alert: anchored to the second.
        let second = t0 + Duration::seconds(5);
        assert_eq!(state.record_alert(second), 2);
        assert_eq!(state.next_alert(Some(&a)), Some(second + Duration::seconds(5)));
    }

    #[test]
    fn alerts_never_bunch_up() {
        let t0 = Utc::now();
        let a = PauseAlerts {
            initial: Duration::milliseconds(200),
            further: Duration::zero(),
        };
        let mut state = paused_at(t0);
        let floor = Duration::milliseconds(MIN_ALERT_GAP_MS);

        let first = t0 + Duration::milliseconds(200);
        state.record_alert(first);
        assert_eq!(state.next_alert(Some(&a)), Some(first + floor));

        let second = first + floor;
        state.record_alert(second);
        assert_eq!(state.next_alert(Some(&a)), Some(second + floor));
    }

    #[test]
    fn effective_until_is_earlier_of_override_and_alert() {
        let t0 = Utc::now();
        let a = alerts();
        let mut state = paused_at(t0);
        let alert = t0 + Duration::seconds(2);

        state.until_override = Some(t0 + Duration::seconds(1));
        assert_eq!(state.effective_until(Some(&a)), Some(t0 + Duration::seconds(1)));

        state.until_override = Some(t0 + Duration::seconds(200));
        assert_eq!(state.effective_until(Some(&a)), Some(alert));

        state.until_override = None;
        assert_eq!(state.effective_until(Some(&a)), Some(alert));

        state.until_override = Some(t0 + Duration::seconds(9));
        assert_eq!(state.effective_until(None), Some(t0 + Duration::seconds(9)));
    }

    #[test]
    fn ending_episode_clears_attribution() {
        let t0 = Utc::now();
        let mut state = paused_at(t0);
        state.actor = Some(Actor::new("admin"));
        state.reason = Some("Because I wanted to!".into());
        state.until_override = Some(t0);
        state.record_alert(t0);

        let end = state.end_episode().unwrap();
        assert_eq!(end.paused_at, t0);
        assert_eq!(end.alerts_fired, 1);
        assert_eq!(end.actor, Some(Actor::new("admin")));
        assert_eq!(state, PauseState::default());
        assert!(state.end_episode().is_none());
    }

    #[test]
    fn episode_without_alerts_reports_zero() {
        let mut state = paused_at(Utc::now());
        assert_eq!(state.end_episode().map(|e| e.alerts_fired), Some(0));
    }
}
