use std::time::Instant;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::models::{CohortMember, RiskRecord, RiskStatus};
use crate::performance::momentum;
use crate::time::parse_timestamp;

pub const DEFAULT_INACTIVITY_DAYS: i64 = 7;

/// Momentum below this marks a learner as declining.
pub const DECLINE_THRESHOLD: f64 = -5.0;

/// Status for the two risk signals. Inactivity combined with a falling
/// score escalates to critical.
pub fn status_for(inactive: bool, declining: bool) -> RiskStatus {
    match (inactive, declining) {
        (false, false) => RiskStatus::Healthy,
        (true, false) => RiskStatus::Stagnating,
        (false, true) => RiskStatus::Declining,
        (true, true) => RiskStatus::Critical,
    }
}

/// Whole days since the last login, or `None` if the learner never logged
/// in or the timestamp cannot be parsed. Future logins count as today.
pub fn days_inactive(last_login: Option<&str>, now: DateTime<Utc>) -> Option<i64> {
    let raw = last_login?;
    match parse_timestamp(raw) {
        Some(logged_in) => Some((now - logged_in).num_days().max(0)),
        None => {
            debug!(last_login = raw, "unparseable last login; treating as never");
            None
        }
    }
}

/// Consecutive-day login streak after a login on `today`.
///
/// Logging in again on the same day keeps the streak, logging in the day
/// after extends it, and anything else (including no usable previous login)
/// starts over at one.
pub fn next_login_streak(previous_login: Option<&str>, streak: u32, today: NaiveDate) -> u32 {
    let previous = previous_login
        .and_then(parse_timestamp)
        .map(|at| at.date_naive());

    match previous {
        Some(day) if day == today => streak.max(1),
        Some(day) if day == today - Duration::days(1) => streak.saturating_add(1),
        _ => 1,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RiskClassifier {
    pub inactivity_days: i64,
}

impl Default for RiskClassifier {
    fn default() -> Self {
        Self {
            inactivity_days: DEFAULT_INACTIVITY_DAYS,
        }
    }
}

/// Result of a deadline-bounded classification pass.
#[derive(Debug, Clone, Serialize)]
pub struct PartialClassification {
    pub records: Vec<RiskRecord>,
    pub processed: usize,
    pub total: usize,
}

impl PartialClassification {
    pub fn is_complete(&self) -> bool {
        self.processed == self.total
    }
}

impl RiskClassifier {
    pub fn new(inactivity_days: i64) -> Self {
        Self { inactivity_days }
    }

    /// Classifies one member, healthy or not.
    pub fn assess(&self, member: &CohortMember, now: DateTime<Utc>) -> RiskRecord {
        let days_inactive = days_inactive(member.last_login.as_deref(), now);
        let inactive = match days_inactive {
            Some(days) => days > self.inactivity_days,
            None => true,
        };
        let momentum = momentum(&member.exam_results);
        let status = status_for(inactive, momentum < DECLINE_THRESHOLD);

        RiskRecord {
            learner_id: member.learner_id,
            display_name: member.display_name.clone(),
            class_label: member.class_label.clone(),
            status,
            momentum,
            days_inactive,
        }
    }

    /// Risk records for every non-healthy member, in input order.
    pub fn classify(&self, members: &[CohortMember], now: DateTime<Utc>) -> Vec<RiskRecord> {
        members
            .par_iter()
            .map(|member| self.assess(member, now))
            .filter(|record| record.status != RiskStatus::Healthy)
            .collect()
    }

    /// Classifies members one at a time until `deadline` passes. Records
    /// already produced stay valid when the pass stops early.
    pub fn classify_until(
        &self,
        members: &[CohortMember],
        now: DateTime<Utc>,
        deadline: Instant,
    ) -> PartialClassification {
        let mut records = Vec::new();
        let mut processed = 0usize;

        for member in members {
            if Instant::now() >= deadline {
                debug!(processed, total = members.len(), "risk deadline reached");
                break;
            }
            let record = self.assess(member, now);
            if record.status != RiskStatus::Healthy {
                records.push(record);
            }
            processed += 1;
        }

        PartialClassification {
            records,
            processed,
            total: members.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExamResult;
    use crate::time::fixed_now;
    use std::time::Duration as StdDuration;
    use uuid::Uuid;

    fn sample_member(days_since_login: Option<i64>, percentages: &[f64]) -> CohortMember {
        let now = fixed_now();
        CohortMember {
            learner_id: Uuid::new_v4(),
            display_name: "Avery Lee".to_string(),
            class_label: "10-A".to_string(),
            last_login: days_since_login.map(|days| (now - Duration::days(days)).to_rfc3339()),
            exam_results: percentages
                .iter()
                .enumerate()
                .map(|(i, pct)| {
                    let date = format!("2026-02-{:02}", i + 1);
                    ExamResult::new(&date, "Math", "Unit Test", *pct, 100.0)
                })
                .collect(),
            sessions: Vec::new(),
        }
    }

    fn assess(days_since_login: Option<i64>, percentages: &[f64]) -> RiskRecord {
        RiskClassifier::default().assess(&sample_member(days_since_login, percentages), fixed_now())
    }

    #[test]
    fn login_streak_extends_on_consecutive_days() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        assert_eq!(next_login_streak(Some("2026-03-01"), 4, today), 5);
        assert_eq!(next_login_streak(Some("2026-03-02"), 4, today), 4);
        assert_eq!(next_login_streak(Some("2026-02-27"), 4, today), 1);
        assert_eq!(next_login_streak(None, 0, today), 1);
        assert_eq!(next_login_streak(Some("garbage"), 9, today), 1);
    }

    #[test]
    fn decision_table_covers_all_signals() {
        assert_eq!(status_for(false, false), RiskStatus::Healthy);
        assert_eq!(status_for(true, false), RiskStatus::Stagnating);
        assert_eq!(status_for(false, true), RiskStatus::Declining);
        assert_eq!(status_for(true, true), RiskStatus::Critical);
    }

    #[test]
    fn inactive_and_declining_is_critical() {
        let record = assess(Some(10), &[70.0, 60.0]);
        assert_eq!(record.status, RiskStatus::Critical);
        assert_eq!(record.momentum, -10.0);
        assert_eq!(record.days_inactive, Some(10));
    }

    #[test]
    fn active_and_declining_is_declining() {
        let record = assess(Some(3), &[70.0, 60.0]);
        assert_eq!(record.status, RiskStatus::Declining);
    }

    #[test]
    fn inactive_and_improving_is_only_stagnating() {
        let record = assess(Some(10), &[60.0, 65.0]);
        assert_eq!(record.status, RiskStatus::Stagnating);
    }

    #[test]
    fn seven_days_is_still_active() {
        let record = assess(Some(7), &[]);
        assert_eq!(record.status, RiskStatus::Healthy);
    }

    #[test]
    fn small_dips_are_not_declines() {
        let record = assess(Some(1), &[70.0, 65.0]);
        assert_eq!(record.status, RiskStatus::Healthy);
    }

    #[test]
    fn drop_of_exactly_five_points_is_not_a_decline() {
        let record = assess(Some(1), &[55.0, 50.0]);
        assert_eq!(record.momentum, -5.0);
        assert_eq!(record.status, RiskStatus::Healthy);

        let record = assess(Some(1), &[55.0, 49.9]);
        assert_eq!(record.status, RiskStatus::Declining);
    }

    #[test]
    fn missing_or_garbled_login_counts_as_stagnating() {
        let classifier = RiskClassifier::default();
        let never = classifier.assess(&sample_member(None, &[]), fixed_now());
        assert_eq!(never.status, RiskStatus::Stagnating);
        assert_eq!(never.days_inactive, None);

        let mut garbled = sample_member(Some(1), &[]);
        garbled.last_login = Some("last tuesday".to_string());
        assert_eq!(classifier.assess(&garbled, fixed_now()).status, RiskStatus::Stagnating);
    }

    #[test]
    fn healthy_members_are_omitted() {
        let members = vec![
            sample_member(Some(1), &[60.0, 70.0]),
            sample_member(Some(10), &[70.0, 60.0]),
            sample_member(Some(2), &[80.0, 50.0]),
        ];
        let records = RiskClassifier::default().classify(&members, fixed_now());
        let statuses: Vec<RiskStatus> = records.iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec![RiskStatus::Critical, RiskStatus::Declining]);
        assert_eq!(records[0].learner_id, members[1].learner_id);
    }

    #[test]
    fn classify_is_idempotent() {
        let members = vec![sample_member(None, &[90.0, 40.0]), sample_member(Some(12), &[])];
        let classifier = RiskClassifier::default();
        assert_eq!(
            classifier.classify(&members, fixed_now()),
            classifier.classify(&members, fixed_now())
        );
    }

    #[test]
    fn custom_inactivity_threshold() {
        let record = RiskClassifier::new(3).assess(&sample_member(Some(5), &[]), fixed_now());
        assert_eq!(record.status, RiskStatus::Stagnating);
    }

    #[test]
    fn expired_deadline_returns_empty_partial_result() {
        let members = vec![sample_member(None, &[]), sample_member(None, &[])];
        let partial =
            RiskClassifier::default().classify_until(&members, fixed_now(), Instant::now());
        assert_eq!(partial.processed, 0);
        assert!(partial.records.is_empty());
        assert!(!partial.is_complete());
    }

    #[test]
    fn generous_deadline_matches_full_classification() {
        let members = vec![sample_member(None, &[]), sample_member(Some(1), &[])];
        let classifier = RiskClassifier::default();
        let deadline = Instant::now() + StdDuration::from_secs(60);
        let partial = classifier.classify_until(&members, fixed_now(), deadline);
        assert!(partial.is_complete());
        assert_eq!(partial.records, classifier.classify(&members, fixed_now()));
    }
}
