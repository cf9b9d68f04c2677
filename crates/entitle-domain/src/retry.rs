//! Persisted shapes and backoff schedule for the auto-attach retry loop.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default wait before each retry, in seconds. Roughly a month end to end.
pub const RETRY_INTERVALS: [u64; 14] = [
    900,     // 15m
    900,     // 15m
    1_800,   // 30m
    3_600,   // 1h
    7_200,   // 2h
    14_400,  // 4h
    28_800,  // 8h
    57_600,  // 16h
    86_400,  // 1d
    172_800, // 2d
    345_600, // 4d
    604_800, // 7d
    604_800, // 7d
    604_800, // 7d
];

/// Written before every sleep; an `interval_index` equal to the schedule
/// length marks an exhausted schedule.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryAutoAttachState {
    pub interval_index: usize,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

/// The user's original service selection, replayed on every attempt.
///
/// `None` means "whatever the contract enables by default", which is not the
/// same as an empty selection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryAutoAttachOptions {
    #[serde(default)]
    pub enable: Option<Vec<String>>,
    #[serde(default)]
    pub enable_beta: Option<Vec<String>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetrySchedule {
    intervals: Vec<Duration>,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self::from_secs(&RETRY_INTERVALS)
    }
}

impl RetrySchedule {
    #[must_use]
    pub fn from_secs(secs: &[u64]) -> Self {
        Self {
            intervals: secs.iter().copied().map(Duration::from_secs).collect(),
        }
    }

    #[must_use]
    pub fn intervals(&self) -> &[Duration] {
        &self.intervals
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    #[must_use]
    pub fn total(&self) -> Duration {
        self.intervals.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_spans_about_a_month() {
        let schedule = RetrySchedule::default();
        assert_eq!(schedule.len(), RETRY_INTERVALS.len());
        assert_eq!(schedule.intervals()[0], Duration::from_secs(15 * 60));
        let days = schedule.total().as_secs() / 86_400;
        assert!((28..=32).contains(&days), "schedule spans {days} days");
    }

    #[test]
    fn state_file_shape() {
        let state: RetryAutoAttachState =
            serde_json::from_str(r#"{"interval_index": 3, "failure_reason": null}"#)
                .expect("parse");
        assert_eq!(state.interval_index, 3);
        assert_eq!(state.failure_reason, None);
    }

    #[test]
    fn options_keep_null_distinct_from_empty() {
        let options: RetryAutoAttachOptions =
            serde_json::from_str(r#"{"enable": [], "enable_beta": null}"#).expect("parse");
        assert_eq!(options.enable, Some(Vec::new()));
        assert_eq!(options.enable_beta, None);
    }
}
