use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::NaiveDate;

use crate::heatmap::Heatmap;
use crate::models::{RiskRecord, RiskStatus};

const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

pub fn summarize_by_status(records: &[RiskRecord]) -> BTreeMap<RiskStatus, usize> {
    let mut counts = BTreeMap::new();
    for record in records {
        *counts.entry(record.status).or_insert(0) += 1;
    }
    counts
}

/// Most severe first, then steepest decline, then name.
pub fn rank_records(records: &[RiskRecord]) -> Vec<RiskRecord> {
    let mut ranked = records.to_vec();
    ranked.sort_by(|a, b| {
        b.status
            .cmp(&a.status)
            .then_with(|| a.momentum.partial_cmp(&b.momentum).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| a.display_name.cmp(&b.display_name))
    });
    ranked
}

/// Human label for a heatmap cell key such as `"0-18"` (weekday 0 = Monday).
pub fn describe_slot(key: &str) -> String {
    let parsed = key
        .split_once('-')
        .and_then(|(day, hour)| Some((day.parse::<usize>().ok()?, hour.parse::<u8>().ok()?)));

    match parsed {
        Some((day, hour)) if day < WEEKDAYS.len() => format!("{} {:02}:00", WEEKDAYS[day], hour),
        _ => key.to_string(),
    }
}

fn describe_inactivity(days: Option<i64>) -> String {
    match days {
        Some(days) => format!("{days} days since login"),
        None => "never logged in".to_string(),
    }
}

pub fn build_report(
    cohort: Option<&str>,
    generated_on: NaiveDate,
    heatmap_window_days: i64,
    records: &[RiskRecord],
    heatmap: &Heatmap,
) -> String {
    let counts = summarize_by_status(records);

    let mut output = String::new();
    let cohort_label = cohort.unwrap_or("all cohorts");

    let _ = writeln!(output, "# Cohort Analytics Report");
    let _ = writeln!(output, "Generated for {} on {}", cohort_label, generated_on);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Risk Mix");

    if counts.is_empty() {
        let _ = writeln!(output, "Every learner in this cohort is healthy.");
    } else {
        for (status, count) in counts.iter().rev() {
            let _ = writeln!(output, "- {}: {} learners", status, count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Learners Needing Attention");

    if records.is_empty() {
        let _ = writeln!(output, "No learners flagged.");
    } else {
        for record in rank_records(records).iter().take(20) {
            let _ = writeln!(
                output,
                "- {} ({}) {}: momentum {:+.1}, {}",
                record.display_name,
                record.class_label,
                record.status,
                record.momentum,
                describe_inactivity(record.days_inactive)
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "## Study Peaks (last {} days, {} sessions)",
        heatmap_window_days,
        heatmap.total()
    );

    if heatmap.is_empty() {
        let _ = writeln!(output, "No study sessions with local time recorded.");
    } else {
        for (slot, count) in heatmap.peaks(5) {
            let _ = writeln!(output, "- {}: {} sessions", describe_slot(&slot), count);
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn record(name: &str, status: RiskStatus, momentum: f64, days: Option<i64>) -> RiskRecord {
        RiskRecord {
            learner_id: Uuid::new_v4(),
            display_name: name.to_string(),
            class_label: "10-A".to_string(),
            status,
            momentum,
            days_inactive: days,
        }
    }

    #[test]
    fn ranks_by_severity_then_momentum() {
        let records = vec![
            record("Kiara", RiskStatus::Stagnating, 2.0, Some(9)),
            record("Avery", RiskStatus::Critical, -8.0, Some(12)),
            record("Jules", RiskStatus::Declining, -20.0, Some(1)),
            record("Noor", RiskStatus::Declining, -30.0, Some(2)),
        ];
        let names: Vec<String> = rank_records(&records)
            .into_iter()
            .map(|r| r.display_name)
            .collect();
        assert_eq!(names, vec!["Avery", "Noor", "Jules", "Kiara"]);
    }

    #[test]
    fn summarizes_statuses() {
        let records = vec![
            record("A", RiskStatus::Declining, -6.0, Some(1)),
            record("B", RiskStatus::Declining, -9.0, Some(2)),
            record("C", RiskStatus::Critical, -9.0, None),
        ];
        let counts = summarize_by_status(&records);
        assert_eq!(counts[&RiskStatus::Declining], 2);
        assert_eq!(counts[&RiskStatus::Critical], 1);
        assert!(!counts.contains_key(&RiskStatus::Stagnating));
    }

    #[test]
    fn describes_heatmap_slots() {
        assert_eq!(describe_slot("0-18"), "Mon 18:00");
        assert_eq!(describe_slot("6-7"), "Sun 07:00");
        assert_eq!(describe_slot("9-7"), "9-7");
        assert_eq!(describe_slot("bad"), "bad");
    }

    #[test]
    fn report_lists_flagged_learners_and_peaks() {
        let mut heatmap = Heatmap::default();
        heatmap.record(2, 19);
        heatmap.record(2, 19);
        let records = vec![record("Avery Lee", RiskStatus::Critical, -12.5, None)];
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();

        let report = build_report(Some("10-A"), date, 30, &records, &heatmap);
        assert!(report.starts_with("# Cohort Analytics Report"));
        assert!(report.contains("Generated for 10-A on 2026-03-02"));
        assert!(report.contains("- critical: 1 learners"));
        assert!(report.contains("- Avery Lee (10-A) critical: momentum -12.5, never logged in"));
        assert!(report.contains("- Wed 19:00: 2 sessions"));
    }

    #[test]
    fn empty_report_says_so() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let report = build_report(None, date, 30, &[], &Heatmap::default());
        assert!(report.contains("all cohorts"));
        assert!(report.contains("Every learner in this cohort is healthy."));
        assert!(report.contains("No study sessions with local time recorded."));
    }
}
