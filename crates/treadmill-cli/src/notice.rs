//! Human-readable text for machine status notices.

use chrono::{DateTime, Duration, Utc};
use treadmill_core::Actor;
use treadmill_machine::{MachineStatus, StatusNotice};

/// "1 hour, 2 minutes and 3 seconds". Sub-second parts are dropped.
pub fn format_pause_duration(d: Duration) -> String {
    let total = d.num_seconds().max(0);
    let units = [
        (total / 86_400, "day"),
        (total / 3_600 % 24, "hour"),
        (total / 60 % 60, "minute"),
        (total % 60, "second"),
    ];
    let parts: Vec<String> = units
        .iter()
        .filter(|(n, _)| *n > 0)
        .map(|(n, unit)| format!("{n} {unit}{}", if *n == 1 { "" } else { "s" }))
        .collect();

    match parts.as_slice() {
        [] => "0 seconds".to_string(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} and {last}", init.join(", ")),
    }
}

/// One line describing `notice` for `status`, as of `now`.
pub fn describe(status: &MachineStatus, notice: &StatusNotice, now: DateTime<Utc>) -> String {
    let name = &status.name;
    let pause = status.pause.as_ref();
    let paused_for = pause
        .and_then(|p| p.since)
        .map(|since| format_pause_duration(now - since));
    let reason = pause
        .and_then(|p| p.reason.as_deref())
        .map(|r| format!(" - {r}"))
        .unwrap_or_default();

    match notice {
        StatusNotice::PausedOnError { error } => {
            format!("{name} PAUSED after a failed run: {error}")
        }
        StatusNotice::PausedByTask => format!("{name} PAUSED by its task{reason}"),
        StatusNotice::PauseReminder { count } => {
            let by = Actor::text(pause.and_then(|p| p.actor.as_ref()));
            format!(
                "{name} still PAUSED after {} (reminder {count}, paused by {by}){reason}",
                paused_for.as_deref().unwrap_or("an unknown time"),
            )
        }
        StatusNotice::Resumed { resumed_by } => {
            format!("{name} {}. Resumed by: {}", status.state, Actor::text(resumed_by.as_ref()))
        }
        StatusNotice::Failed { error } => format!("{name} FAILED: {error}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use treadmill_core::LifecycleState;
    use treadmill_machine::{PauseStatus, StatusTimes};

    fn status(pause: Option<PauseStatus>) -> MachineStatus {
        MachineStatus {
            name: "nightly".into(),
            state: if pause.is_some() { LifecycleState::Paused } else { LifecycleState::Running },
            times: StatusTimes { start: None, next: None, end: None },
            uptime_secs: Some(10),
            active: true,
            pause,
            run_count: 3,
        }
    }

    #[test]
    fn durations_read_naturally() {
        assert_eq!(format_pause_duration(Duration::zero()), "0 seconds");
        assert_eq!(format_pause_duration(Duration::seconds(1)), "1 second");
        assert_eq!(format_pause_duration(Duration::seconds(5)), "5 seconds");
        assert_eq!(format_pause_duration(Duration::seconds(123)), "2 minutes and 3 seconds");
        assert_eq!(format_pause_duration(Duration::seconds(3_600)), "1 hour");
        assert_eq!(
            format_pause_duration(Duration::seconds(90_061)),
            "1 day, 1 hour, 1 minute and 1 second"
        );
        assert_eq!(format_pause_duration(Duration::milliseconds(2_900)), "2 seconds");
        assert_eq!(format_pause_duration(Duration::seconds(-4)), "0 seconds");
    }

    #[test]
    fn reminder_mentions_length_actor_and_reason() {
        let now = Utc::now();
        let status = status(Some(PauseStatus {
            acknowledged: true,
            since: Some(now - Duration::seconds(5)),
            until: None,
            actor: Some(Actor::new("admin")),
            reason: Some("Because I really wanted to!".into()),
            alert_count: Some(2),
        }));
        let text = describe(&status, &StatusNotice::PauseReminder { count: 2 }, now);
        assert_eq!(
            text,
            "nightly still PAUSED after 5 seconds (reminder 2, paused by admin) - Because I really wanted to!"
        );
    }

    #[test]
    fn resume_names_who_resumed() {
        let text = describe(
            &status(None),
            &StatusNotice::Resumed { resumed_by: Some(Actor::new("admin2")) },
            Utc::now(),
        );
        assert_eq!(text, "nightly RUNNING. Resumed by: admin2");

        let text = describe(&status(None), &StatusNotice::Resumed { resumed_by: None }, Utc::now());
        assert!(text.ends_with("Resumed by: itself"));
    }

    #[test]
    fn failures_carry_the_error() {
        let text = describe(
            &status(None),
            &StatusNotice::Failed { error: "hook on_pause_elapsed failed: hachigen".into() },
            Utc::now(),
        );
        assert!(text.starts_with("nightly FAILED"));
        assert!(text.contains("hachigen"));
    }
}
