use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::schedule::ScheduleBasis;

/// One execution of the task.
///
/// Created at the start of a run and handed to `execute` as `&mut`; the engine
/// fills in the end/next times and outcome once the call returns. After
/// `on_run_complete` the record is frozen and either kept in history or dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Strictly increasing for the life of the machine, never reused.
    pub id: u64,
    pub time_start: DateTime<Utc>,
    /// `None` while the run is in progress.
    pub time_end: Option<DateTime<Utc>>,
    /// Next run time, filled in after rescheduling.
    pub time_next: Option<DateTime<Utc>>,
    pub failed: bool,
    /// The task itself requested a pause during this run.
    pub paused_by_execute: bool,
    /// Text of the task error for failed runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Rule that produced `time_next`; `None` when the task set it explicitly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_basis: Option<ScheduleBasis>,
    /// Task-attached fields.
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl RunRecord {
    pub fn new(id: u64, time_start: DateTime<Utc>) -> Self {
        Self {
            id,
            time_start,
            time_end: None,
            time_next: None,
            failed: false,
            paused_by_execute: false,
            error: None,
            schedule_basis: None,
            fields: Map::new(),
        }
    }

    /// Attach a field, replacing any previous value under `key`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// String field shorthand.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    /// Wall time between start and end, once the run has ended.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.time_end.map(|end| end - self.time_start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_is_open_and_clean() {
        let run = RunRecord::new(7, Utc::now());
        assert_eq!(run.id, 7);
        assert!(run.time_end.is_none());
        assert!(run.time_next.is_none());
        assert!(!run.failed);
        assert!(!run.paused_by_execute);
        assert!(run.fields.is_empty());
        assert!(run.duration().is_none());
    }

    #[test]
    fn fields_are_typed_json() {
        let mut run = RunRecord::new(0, Utc::now());
        run.set("grimmjow", "jaegerjaquez");
        run.set("rows", 42);
        assert_eq!(run.get_str("grimmjow"), Some("jaegerjaquez"));
        assert_eq!(run.get("rows"), Some(&Value::from(42)));

        run.set("grimmjow", "number six");
        assert_eq!(run.get_str("grimmjow"), Some("number six"));
        assert_eq!(run.remove("rows"), Some(Value::from(42)));
        assert!(run.get("rows").is_none());
    }

    #[test]
    fn serialises_without_empty_extras() {
        let run = RunRecord::new(3, Utc::now());
        let json = serde_json::to_value(&run).unwrap();
        assert!(json.get("error").is_none());
        assert!(json.get("schedule_basis").is_none());
        assert_eq!(json["id"], 3);
    }
}
