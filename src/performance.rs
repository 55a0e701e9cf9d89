//! Momentum, consistency and readiness scores from exam and study history.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{ExamResult, PerformanceScores, StudySession};
use crate::progress::{round1, round2};

pub const MOMENTUM_WINDOW: usize = 4;
pub const DEFAULT_CONSISTENCY_WINDOW_DAYS: u32 = 14;

pub const PROGRESS_WEIGHT: f64 = 0.4;
pub const EXAM_WEIGHT: f64 = 0.6;

/// Valid results in input order. A result needs both a usable percentage
/// and a parseable date; everything else is skipped by every score.
pub fn valid_results(results: &[ExamResult]) -> Vec<(DateTime<Utc>, f64)> {
    results
        .iter()
        .filter_map(|result| {
            let dated = result.dated_percentage();
            if dated.is_none() {
                debug!(
                    date = %result.date,
                    test_type = %result.test_type,
                    "skipping malformed exam result"
                );
            }
            dated
        })
        .collect()
}

/// Change in percentage between the oldest and newest of the most recent
/// `MOMENTUM_WINDOW` valid results, to two decimals. Zero with fewer than two.
pub fn momentum(results: &[ExamResult]) -> f64 {
    let mut dated = valid_results(results);
    if dated.len() < 2 {
        return 0.0;
    }

    dated.sort_by(|a, b| b.0.cmp(&a.0));
    dated.truncate(MOMENTUM_WINDOW);
    dated.reverse();

    match (dated.first(), dated.last()) {
        (Some(first), Some(last)) => round2(last.1 - first.1),
        _ => 0.0,
    }
}

pub fn average_exam_percentage(results: &[ExamResult]) -> f64 {
    let valid = valid_results(results);
    if valid.is_empty() {
        0.0
    } else {
        valid.iter().map(|(_, pct)| pct).sum::<f64>() / valid.len() as f64
    }
}

/// Regularity of study time over the trailing `window_days` calendar days
/// (today included), on a 0–100 scale.
///
/// Days without study count as zero minutes. The score is
/// `100 × (1 − CV)` of daily minutes, floored at zero.
pub fn consistency(sessions: &[StudySession], now: DateTime<Utc>, window_days: u32) -> f64 {
    let days = window_days.max(1) as usize;
    let today = now.date_naive();
    let mut minutes = vec![0.0_f64; days];

    for session in sessions {
        if session.started_at > now {
            continue;
        }
        let age = (today - session.started_at.date_naive()).num_days();
        if let Ok(age) = usize::try_from(age) {
            if let Some(slot) = minutes.get_mut(age) {
                *slot += session.duration_secs as f64 / 60.0;
            }
        }
    }

    let mean = minutes.iter().sum::<f64>() / days as f64;
    if mean <= 0.0 {
        return 0.0;
    }

    let variance = minutes.iter().map(|m| (m - mean).powi(2)).sum::<f64>() / days as f64;
    let cv = variance.sqrt() / mean;
    (100.0 * (1.0 - cv).max(0.0)).round().clamp(0.0, 100.0)
}

pub fn readiness(overall_progress: f64, average_exam: f64) -> f64 {
    round1(overall_progress * PROGRESS_WEIGHT + average_exam * EXAM_WEIGHT)
}

#[derive(Debug, Clone, Copy)]
pub struct PerformanceScorer {
    pub consistency_window_days: u32,
}

impl Default for PerformanceScorer {
    fn default() -> Self {
        Self {
            consistency_window_days: DEFAULT_CONSISTENCY_WINDOW_DAYS,
        }
    }
}

impl PerformanceScorer {
    pub fn new(consistency_window_days: u32) -> Self {
        Self {
            consistency_window_days,
        }
    }

    pub fn score(
        &self,
        overall_progress: f64,
        results: &[ExamResult],
        sessions: &[StudySession],
        now: DateTime<Utc>,
    ) -> PerformanceScores {
        PerformanceScores {
            momentum: momentum(results),
            consistency: consistency(sessions, now, self.consistency_window_days),
            readiness: readiness(overall_progress, average_exam_percentage(results)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelinePoint {
    pub date: String,
    pub percentage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExamStatistics {
    pub by_test_type: BTreeMap<String, f64>,
    pub timeline: Vec<TimelinePoint>,
}

pub fn exam_statistics(results: &[ExamResult]) -> ExamStatistics {
    let mut by_type: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    let mut timeline: Vec<(DateTime<Utc>, TimelinePoint)> = Vec::new();

    for result in results {
        let Some((taken_at, pct)) = result.dated_percentage() else {
            continue;
        };

        let label = if result.test_type.trim().is_empty() {
            "unspecified".to_string()
        } else {
            result.test_type.clone()
        };
        let entry = by_type.entry(label).or_insert((0.0, 0));
        entry.0 += pct;
        entry.1 += 1;

        timeline.push((
            taken_at,
            TimelinePoint {
                date: result.date.clone(),
                percentage: round2(pct),
            },
        ));
    }

    timeline.sort_by(|a, b| a.0.cmp(&b.0));

    ExamStatistics {
        by_test_type: by_type
            .into_iter()
            .map(|(label, (total, count))| (label, round2(total / count as f64)))
            .collect(),
        timeline: timeline.into_iter().map(|(_, point)| point).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;
    use chrono::Duration;
    use uuid::Uuid;

    fn exams(percentages: &[f64]) -> Vec<ExamResult> {
        percentages
            .iter()
            .enumerate()
            .map(|(i, pct)| {
                let date = format!("2026-01-{:02}", i + 1);
                ExamResult::new(&date, "Math", "Unit Test", *pct, 100.0)
            })
            .collect()
    }

    fn daily_sessions(days: &[i64], minutes: u64) -> Vec<StudySession> {
        let now = fixed_now();
        days.iter()
            .map(|days_ago| StudySession {
                learner_id: Uuid::nil(),
                started_at: now - Duration::days(*days_ago),
                duration_secs: minutes * 60,
                local_hour: Some(18),
                local_weekday: Some(0),
            })
            .collect()
    }

    #[test]
    fn momentum_sign_convention() {
        assert_eq!(momentum(&exams(&[40.0, 50.0, 60.0, 80.0])), 40.0);
        assert_eq!(momentum(&exams(&[80.0, 60.0, 50.0, 40.0])), -40.0);
    }

    #[test]
    fn momentum_uses_four_most_recent() {
        assert_eq!(momentum(&exams(&[10.0, 40.0, 50.0, 60.0, 80.0])), 40.0);
    }

    #[test]
    fn momentum_sorts_by_date_not_input_order() {
        let mut results = exams(&[40.0, 50.0, 60.0, 80.0]);
        results.reverse();
        assert_eq!(momentum(&results), 40.0);
    }

    #[test]
    fn momentum_needs_two_valid_results() {
        assert_eq!(momentum(&[]), 0.0);
        assert_eq!(momentum(&exams(&[75.0])), 0.0);

        let mut results = exams(&[75.0, 20.0]);
        results[1].max_score = Some(0.0);
        assert_eq!(momentum(&results), 0.0);
    }

    #[test]
    fn momentum_skips_malformed_records() {
        let mut results = exams(&[40.0, 90.0, 60.0]);
        results[1].date = "not a date".to_string();
        assert_eq!(momentum(&results), 20.0);
    }

    #[test]
    fn average_ignores_invalid_results() {
        let mut results = exams(&[80.0, 60.0]);
        results.push(ExamResult {
            max_score: None,
            ..ExamResult::new("2026-02-01", "Math", "Quiz", 10.0, 0.0)
        });
        assert_eq!(average_exam_percentage(&results), 70.0);
        assert_eq!(average_exam_percentage(&[]), 0.0);
    }

    #[test]
    fn undated_results_are_skipped_by_every_score() {
        let results = vec![
            ExamResult::new("2026-01-01", "Math", "Unit Test", 50.0, 100.0),
            ExamResult::new("not a date", "Math", "Unit Test", 100.0, 100.0),
            ExamResult::new("2026/01/05", "Math", "Unit Test", 90.0, 100.0),
        ];
        assert_eq!(valid_results(&results).len(), 2);
        assert_eq!(momentum(&results), 40.0);
        assert_eq!(average_exam_percentage(&results), 70.0);
        assert_eq!(exam_statistics(&results).by_test_type["Unit Test"], 70.0);
        assert_eq!(exam_statistics(&results).timeline.len(), 2);
    }

    #[test]
    fn momentum_has_no_rounding_noise() {
        let results = vec![
            ExamResult::new("2026-02-01", "Math", "Unit Test", 55.0, 100.0),
            ExamResult::new("2026-02-02", "Math", "Unit Test", 50.0, 100.0),
        ];
        assert_eq!(momentum(&results), -5.0);

        let results = vec![
            ExamResult::new("2026-02-01", "Math", "Unit Test", 11.0, 30.0),
            ExamResult::new("2026-02-02", "Math", "Unit Test", 7.0, 30.0),
        ];
        assert_eq!(momentum(&results), -13.33);
    }

    #[test]
    fn readiness_blends_progress_and_exams() {
        assert_eq!(readiness(50.0, 80.0), 68.0);
        assert_eq!(readiness(0.0, 0.0), 0.0);
        assert_eq!(readiness(33.3, 71.25), 56.1);
    }

    #[test]
    fn steady_daily_study_is_fully_consistent() {
        let sessions = daily_sessions(&(0..14).collect::<Vec<_>>(), 30);
        assert_eq!(consistency(&sessions, fixed_now(), 14), 100.0);
    }

    #[test]
    fn missed_days_lower_consistency() {
        let sessions = daily_sessions(&(0..12).collect::<Vec<_>>(), 30);
        assert_eq!(consistency(&sessions, fixed_now(), 14), 59.0);
    }

    #[test]
    fn single_burst_scores_zero() {
        let sessions = daily_sessions(&[3], 240);
        assert_eq!(consistency(&sessions, fixed_now(), 14), 0.0);
    }

    #[test]
    fn no_study_and_out_of_window_study_score_zero() {
        assert_eq!(consistency(&[], fixed_now(), 14), 0.0);
        let sessions = daily_sessions(&[20, 25], 60);
        assert_eq!(consistency(&sessions, fixed_now(), 14), 0.0);
    }

    #[test]
    fn scorer_is_idempotent() {
        let scorer = PerformanceScorer::default();
        let results = exams(&[55.0, 65.0, 60.0]);
        let sessions = daily_sessions(&[0, 1, 2, 4], 45);
        let first = scorer.score(40.0, &results, &sessions, fixed_now());
        let second = scorer.score(40.0, &results, &sessions, fixed_now());
        assert_eq!(first, second);
        assert_eq!(first.momentum, 5.0);
        assert_eq!(first.readiness, 52.0);
    }

    #[test]
    fn statistics_group_by_test_type_and_sort_timeline() {
        let results = vec![
            ExamResult::new("2026-02-10", "Math", "Midterms", 45.0, 60.0),
            ExamResult::new("2026-01-05", "Science", "Unit Test 1", 18.0, 20.0),
            ExamResult::new("2026-02-01", "Math", "Unit Test 1", 14.0, 20.0),
            ExamResult::new("", "Math", "Unit Test 1", 10.0, 20.0),
        ];

        let stats = exam_statistics(&results);
        assert_eq!(stats.by_test_type["Midterms"], 75.0);
        assert_eq!(stats.by_test_type["Unit Test 1"], 80.0);
        let dates: Vec<&str> = stats.timeline.iter().map(|p| p.date.as_str()).collect();
        assert_eq!(dates, vec!["2026-01-05", "2026-02-01", "2026-02-10"]);
    }
}
