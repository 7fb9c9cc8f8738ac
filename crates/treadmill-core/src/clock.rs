//! Source of "now" for the engine.
//!
//! Every instant is a `DateTime<Utc>`, so waits are always computed on a single
//! timeline and naive/aware mixing cannot be expressed.

use chrono::{DateTime, Duration, Utc};

/// Supplies the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Time remaining until `instant`, clamped to zero when already past.
    fn until(&self, instant: DateTime<Utc>) -> std::time::Duration {
        (instant - self.now()).to_std().unwrap_or(std::time::Duration::ZERO)
    }
}

/// Wall clock in UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Convert fractional seconds into a `chrono::Duration` with microsecond precision.
///
/// Returns `None` for NaN, infinities and values too large to represent.
pub fn secs_to_duration(secs: f64) -> Option<Duration> {
    if !secs.is_finite() {
        return None;
    }
    let micros = (secs * 1_000_000.0).round();
    if micros.abs() >= i64::MAX as f64 {
        return None;
    }
    Some(Duration::microseconds(micros as i64))
}

/// Fractional seconds in a `chrono::Duration`, for logs and status output.
pub fn duration_secs(d: Duration) -> f64 {
    d.num_microseconds()
        .map(|us| us as f64 / 1_000_000.0)
        .unwrap_or_else(|| d.num_milliseconds() as f64 / 1_000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    #[test]
    fn until_past_instant_is_zero() {
        let now = Utc::now();
        let clock = FixedClock(now);
        assert_eq!(clock.until(now - Duration::seconds(5)), std::time::Duration::ZERO);
    }

    #[test]
    fn until_future_instant_is_the_gap() {
        let now = Utc::now();
        let clock = FixedClock(now);
        assert_eq!(
            clock.until(now + Duration::milliseconds(1500)),
            std::time::Duration::from_millis(1500)
        );
    }

    #[test]
    fn fractional_seconds_convert() {
        assert_eq!(secs_to_duration(0.2), Some(Duration::milliseconds(200)));
        assert_eq!(secs_to_duration(-1.0), Some(Duration::seconds(-1)));
        assert_eq!(secs_to_duration(f64::NAN), None);
        assert_eq!(secs_to_duration(f64::INFINITY), None);
        assert_eq!(duration_secs(Duration::milliseconds(2500)), 2.5);
    }
}
