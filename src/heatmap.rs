//! Weekday × hour study-session density for a cohort.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{CohortMember, StudySession};
use crate::time::window_start;

pub const DEFAULT_WINDOW_DAYS: i64 = 30;

/// `"{weekday}-{hour}"` → number of sessions started in that slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Heatmap {
    cells: BTreeMap<String, u64>,
}

impl Heatmap {
    pub fn cell_key(weekday: u8, hour: u8) -> String {
        format!("{weekday}-{hour}")
    }

    pub fn record(&mut self, weekday: u8, hour: u8) {
        *self.cells.entry(Self::cell_key(weekday, hour)).or_insert(0) += 1;
    }

    pub fn get(&self, weekday: u8, hour: u8) -> u64 {
        self.cells
            .get(&Self::cell_key(weekday, hour))
            .copied()
            .unwrap_or(0)
    }

    pub fn cells(&self) -> &BTreeMap<String, u64> {
        &self.cells
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn total(&self) -> u64 {
        self.cells.values().sum()
    }

    /// Sums another heatmap into this one.
    #[must_use]
    pub fn merge(mut self, other: Heatmap) -> Heatmap {
        for (key, count) in other.cells {
            *self.cells.entry(key).or_insert(0) += count;
        }
        self
    }

    /// The `n` busiest cells, highest count first, ties by key.
    pub fn peaks(&self, n: usize) -> Vec<(String, u64)> {
        let mut cells: Vec<(String, u64)> = self
            .cells
            .iter()
            .map(|(key, count)| (key.clone(), *count))
            .collect();
        cells.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        cells.truncate(n);
        cells
    }
}

/// Counts sessions started in `[start, end]` that carry local time fields.
pub fn aggregate_sessions(
    sessions: &[StudySession],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Heatmap {
    let mut heatmap = Heatmap::default();
    for session in sessions {
        if session.started_at < start || session.started_at > end {
            continue;
        }
        match session.local_slot() {
            Some((weekday, hour)) => heatmap.record(weekday, hour),
            None => debug!(learner_id = %session.learner_id, "skipping session without local time"),
        }
    }
    heatmap
}

/// Heatmap over the trailing `window_days` for every member, fanned out
/// per member and merged at the end.
pub fn aggregate(members: &[CohortMember], now: DateTime<Utc>, window_days: i64) -> Heatmap {
    let start = window_start(now, window_days);
    members
        .par_iter()
        .map(|member| aggregate_sessions(&member.sessions, start, now))
        .reduce(Heatmap::default, Heatmap::merge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;
    use chrono::Duration;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn session(days_ago: i64, weekday: Option<u8>, hour: Option<u8>) -> StudySession {
        StudySession {
            learner_id: Uuid::nil(),
            started_at: fixed_now() - Duration::days(days_ago),
            duration_secs: 1800,
            local_hour: hour,
            local_weekday: weekday,
        }
    }

    fn member(sessions: Vec<StudySession>) -> CohortMember {
        CohortMember {
            learner_id: Uuid::new_v4(),
            display_name: "Jules Moreno".to_string(),
            class_label: "10-B".to_string(),
            last_login: None,
            exam_results: Vec::new(),
            sessions,
        }
    }

    #[test]
    fn counts_sessions_by_slot() {
        let members = vec![
            member(vec![session(1, Some(2), Some(19)), session(2, Some(2), Some(19))]),
            member(vec![session(3, Some(5), Some(8))]),
        ];
        let heatmap = aggregate(&members, fixed_now(), DEFAULT_WINDOW_DAYS);
        assert_eq!(heatmap.get(2, 19), 2);
        assert_eq!(heatmap.get(5, 8), 1);
        assert_eq!(heatmap.cells()["2-19"], 2);
        assert_eq!(heatmap.total(), 3);
    }

    #[test]
    fn skips_legacy_and_stale_sessions() {
        let members = vec![member(vec![
            session(1, None, Some(10)),
            session(1, Some(3), None),
            session(45, Some(3), Some(10)),
            session(-1, Some(3), Some(10)),
            session(29, Some(3), Some(10)),
        ])];
        let heatmap = aggregate(&members, fixed_now(), DEFAULT_WINDOW_DAYS);
        assert_eq!(heatmap.total(), 1);
    }

    #[test]
    fn peaks_are_ordered_by_count_then_key() {
        let mut heatmap = Heatmap::default();
        heatmap.record(1, 9);
        heatmap.record(0, 20);
        heatmap.record(0, 20);
        heatmap.record(0, 7);
        let peaks = heatmap.peaks(2);
        assert_eq!(peaks, vec![("0-20".to_string(), 2), ("0-7".to_string(), 1)]);
    }

    #[test]
    fn empty_cohort_is_empty_heatmap() {
        assert!(aggregate(&[], fixed_now(), DEFAULT_WINDOW_DAYS).is_empty());
    }

    fn arb_session() -> impl Strategy<Value = StudySession> {
        (0i64..60, prop::option::of(0u8..9), prop::option::of(0u8..26))
            .prop_map(|(days_ago, weekday, hour)| session(days_ago, weekday, hour))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_total_matches_eligible_sessions(
            groups in prop::collection::vec(prop::collection::vec(arb_session(), 0..8), 0..6),
        ) {
            let now = fixed_now();
            let start = window_start(now, DEFAULT_WINDOW_DAYS);
            let eligible = groups
                .iter()
                .flatten()
                .filter(|s| s.started_at >= start && s.local_slot().is_some())
                .count() as u64;

            let members: Vec<CohortMember> = groups.into_iter().map(member).collect();
            let forward = aggregate(&members, now, DEFAULT_WINDOW_DAYS);
            let mut reversed_members = members.clone();
            reversed_members.reverse();
            let reversed = aggregate(&reversed_members, now, DEFAULT_WINDOW_DAYS);

            prop_assert_eq!(forward.total(), eligible);
            prop_assert_eq!(forward, reversed);
        }
    }
}
