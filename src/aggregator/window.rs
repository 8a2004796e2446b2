use std::collections::HashMap;

use crate::event::{AggregateRecord, GroupEvent, GroupKey};
use crate::sink::FlushedWindow;

/// Counting state for the single live window.
///
/// `Uninitialized` is its own variant rather than a reserved window value,
/// so the first event always starts accumulating whatever its index is,
/// including 0 or a negative window.
#[derive(Debug, Default)]
pub enum WindowState {
    #[default]
    Uninitialized,
    Accumulating {
        window: i64,
        counts: HashMap<GroupKey, u64>,
    },
}

/// Outcome of folding one event into the state.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Observation {
    /// The previous window, completed by this event.
    pub flushed: Option<FlushedWindow>,
    /// The event belonged to an earlier window and was counted in the live one.
    pub late: bool,
}

impl WindowState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the live window, if any event has been seen.
    pub fn current_window(&self) -> Option<i64> {
        match self {
            Self::Uninitialized => None,
            Self::Accumulating { window, .. } => Some(*window),
        }
    }

    /// Count for `key` in the live window.
    pub fn count(&self, key: &GroupKey) -> u64 {
        match self {
            Self::Uninitialized => 0,
            Self::Accumulating { counts, .. } => counts.get(key).copied().unwrap_or(0),
        }
    }

    /// Folds one event into the state.
    ///
    /// An event from a later window completes the live window and starts the
    /// new one. An event from an earlier window is counted in the live
    /// window, not its own.
    pub fn observe(&mut self, event: GroupEvent) -> Observation {
        let GroupEvent { key, window: incoming } = event;

        match self {
            Self::Uninitialized => {
                *self = Self::Accumulating {
                    window: incoming,
                    counts: HashMap::from([(key, 1)]),
                };
                Observation::default()
            }

            Self::Accumulating { window, counts } if incoming > *window => {
                let completed = std::mem::take(counts);
                let flushed = into_batch(*window, completed);

                *window = incoming;
                counts.insert(key, 1);

                Observation {
                    flushed: Some(flushed),
                    late: false,
                }
            }

            Self::Accumulating { window, counts } => {
                *counts.entry(key).or_insert(0) += 1;
                Observation {
                    flushed: None,
                    late: incoming < *window,
                }
            }
        }
    }

    /// Takes the live window's counts, leaving the state uninitialized.
    pub fn take_live(&mut self) -> Option<FlushedWindow> {
        match std::mem::take(self) {
            Self::Uninitialized => None,
            Self::Accumulating { window, counts } => Some(into_batch(window, counts)),
        }
    }
}

fn into_batch(window: i64, counts: HashMap<GroupKey, u64>) -> FlushedWindow {
    FlushedWindow {
        window,
        records: counts
            .into_iter()
            .map(|(key, count)| AggregateRecord::from_key(key, count))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(device: &str, title: &str, window: i64) -> GroupEvent {
        GroupEvent {
            key: GroupKey::new(device, title, "US"),
            window,
        }
    }

    fn sorted(mut batch: FlushedWindow) -> FlushedWindow {
        batch.records.sort_by(|a, b| a.device.cmp(&b.device));
        batch
    }

    #[test]
    fn test_first_event_never_flushes() {
        for window in [0, 1, -3, i64::MAX] {
            let mut state = WindowState::new();
            let obs = state.observe(event("A", "T", window));
            assert_eq!(obs, Observation::default());
            assert_eq!(state.current_window(), Some(window));
        }
    }

    #[test]
    fn test_window_zero_is_flushed_on_advance() {
        let mut state = WindowState::new();
        state.observe(event("A", "T", 0));
        state.observe(event("A", "T", 0));

        let flushed = state
            .observe(event("B", "T", 1))
            .flushed
            .expect("window 0 flushes");
        assert_eq!(flushed.window, 0);
        assert_eq!(flushed.records.len(), 1);
        assert_eq!(flushed.records[0].sps, 2);
        assert_eq!(state.current_window(), Some(1));
    }

    #[test]
    fn test_same_window_accumulates() {
        let mut state = WindowState::new();
        state.observe(event("A", "T", 4));
        let obs = state.observe(event("A", "T!", 4));

        assert_eq!(obs, Observation::default());
        assert_eq!(state.count(&GroupKey::new("A", "T", "US")), 2);
    }

    #[test]
    fn test_advance_resets_counts_to_new_event() {
        let mut state = WindowState::new();
        state.observe(event("A", "T", 1));
        state.observe(event("B", "T", 1));

        let flushed = sorted(
            state
                .observe(event("C", "T", 5))
                .flushed
                .expect("flush on advance"),
        );
        let devices: Vec<_> = flushed.records.iter().map(|r| r.device.as_str()).collect();
        assert_eq!(devices, vec!["A", "B"]);

        assert_eq!(state.count(&GroupKey::new("A", "T", "US")), 0);
        assert_eq!(state.count(&GroupKey::new("C", "T", "US")), 1);
    }

    #[test]
    fn test_late_event_folds_into_live_window() {
        let mut state = WindowState::new();
        state.observe(event("A", "T", 3));
        let obs = state.observe(event("A", "T", 2));

        assert!(obs.late);
        assert!(obs.flushed.is_none());
        assert_eq!(state.current_window(), Some(3));
        assert_eq!(state.count(&GroupKey::new("A", "T", "US")), 2);

        let flushed = state
            .observe(event("A", "T", 4))
            .flushed
            .expect("flush");
        assert_eq!(flushed.window, 3);
        assert_eq!(flushed.records[0].sps, 2);
    }

    #[test]
    fn test_one_flush_per_strict_increase() {
        let mut state = WindowState::new();
        let windows = [0, 0, 1, 1, 0, 2, 5, 5, 4, 6];
        let flushes: Vec<i64> = windows
            .iter()
            .filter_map(|&w| state.observe(event("A", "T", w)).flushed)
            .map(|batch| batch.window)
            .collect();
        assert_eq!(flushes, vec![0, 1, 2, 5]);
    }

    #[test]
    fn test_take_live_drains_state() {
        let mut state = WindowState::new();
        assert!(state.take_live().is_none());

        state.observe(event("A", "T", 9));
        let live = state.take_live().expect("live window");
        assert_eq!(live.window, 9);
        assert_eq!(state.current_window(), None);
    }
}
