use std::collections::VecDeque;
use std::num::NonZeroUsize;

use crate::run::RunRecord;

/// How many completed runs to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryLimit {
    /// Keep nothing.
    #[default]
    Disabled,
    /// Keep every run.
    Unbounded,
    /// Keep the most recent N runs.
    Latest(NonZeroUsize),
}

impl From<Option<usize>> for HistoryLimit {
    /// `None` = disabled, `Some(0)` = unbounded, `Some(n)` = last n.
    fn from(limit: Option<usize>) -> Self {
        match limit {
            None => HistoryLimit::Disabled,
            Some(n) => NonZeroUsize::new(n).map_or(HistoryLimit::Unbounded, HistoryLimit::Latest),
        }
    }
}

/// Bounded, insertion-ordered run buffer plus the run id counter.
///
/// The counter lives here rather than being derived from the buffer so that
/// eviction (or a disabled buffer) never causes an id to be handed out twice.
#[derive(Debug, Default)]
pub struct RunHistory {
    limit: HistoryLimit,
    records: VecDeque<RunRecord>,
    next_id: u64,
}

impl RunHistory {
    pub fn new(limit: HistoryLimit) -> Self {
        Self {
            limit,
            records: VecDeque::new(),
            next_id: 0,
        }
    }

    pub fn limit(&self) -> HistoryLimit {
        self.limit
    }

    /// Takes effect on the next push; existing records are left alone until then.
    pub fn set_limit(&mut self, limit: HistoryLimit) {
        self.limit = limit;
    }

    /// Allocate the id for a new run.
    pub fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Total runs started so far.
    pub fn run_count(&self) -> u64 {
        self.next_id
    }

    /// Retain a completed run per the limit, evicting oldest first.
    pub fn push(&mut self, run: RunRecord) {
        match self.limit {
            HistoryLimit::Disabled => {}
            HistoryLimit::Unbounded => self.records.push_back(run),
            HistoryLimit::Latest(n) => {
                self.records.push_back(run);
                while self.records.len() > n.get() {
                    self.records.pop_front();
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RunRecord> {
        self.records.iter()
    }

    pub fn last(&self) -> Option<&RunRecord> {
        self.records.back()
    }

    /// Owned copy, oldest first.
    pub fn snapshot(&self) -> Vec<RunRecord> {
        self.records.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn run_into(history: &mut RunHistory) -> u64 {
        let id = history.next_id();
        history.push(RunRecord::new(id, Utc::now()));
        id
    }

    #[test]
    fn limit_from_option() {
        assert_eq!(HistoryLimit::from(None), HistoryLimit::Disabled);
        assert_eq!(HistoryLimit::from(Some(0)), HistoryLimit::Unbounded);
        assert_eq!(
            HistoryLimit::from(Some(2)),
            HistoryLimit::Latest(NonZeroUsize::new(2).unwrap())
        );
    }

    #[test]
    fn disabled_keeps_nothing_but_still_counts() {
        let mut history = RunHistory::default();
        for _ in 0..3 {
            run_into(&mut history);
        }
        assert!(history.is_empty());
        assert_eq!(history.run_count(), 3);
    }

    #[test]
    fn latest_n_evicts_oldest_and_ids_keep_rising() {
        let mut history = RunHistory::new(HistoryLimit::from(Some(2)));
        for _ in 0..5 {
            run_into(&mut history);
        }
        let ids: Vec<u64> = history.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 4]);
        assert_eq!(run_into(&mut history), 5);
    }

    #[test]
    fn unbounded_keeps_everything() {
        let mut history = RunHistory::new(HistoryLimit::Unbounded);
        for _ in 0..50 {
            run_into(&mut history);
        }
        assert_eq!(history.len(), 50);
        assert_eq!(history.last().map(|r| r.id), Some(49));
    }

    #[test]
    fn changing_limit_applies_on_next_push() {
        let mut history = RunHistory::new(HistoryLimit::Unbounded);
        for _ in 0..4 {
            run_into(&mut history);
        }
        history.set_limit(HistoryLimit::from(Some(1)));
        assert_eq!(history.len(), 4);
        run_into(&mut history);
        assert_eq!(history.snapshot().iter().map(|r| r.id).collect::<Vec<_>>(), vec![4]);
    }
}
