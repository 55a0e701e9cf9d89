use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::exclusion::EffectiveExclusionSet;
use crate::models::{CompletionRecord, CurriculumTree, ProgressSnapshot, SubjectProgress};

/// Rounds to one decimal place, half away from zero.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `part / whole` as a one-decimal percentage, `0.0` when `whole` is zero.
pub fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        round1(part as f64 / whole as f64 * 100.0)
    }
}

/// Completion percentages for one learner. Performance fields are left at
/// zero; see `engine::AnalyticsEngine::learner_snapshot` for the full view.
pub fn compute(
    curriculum: &CurriculumTree,
    exclusions: &EffectiveExclusionSet,
    completion: &CompletionRecord,
) -> ProgressSnapshot {
    let mut by_subject = BTreeMap::new();
    let mut total_valid = 0usize;
    let mut total_completed = 0usize;

    for (subject_name, subject) in &curriculum.subjects {
        let mut valid = 0usize;
        let mut completed = 0usize;

        for chapter_name in subject.chapters.keys() {
            if exclusions.is_excluded(subject_name, chapter_name) {
                continue;
            }
            valid += 1;
            if completion.is_completed(subject_name, chapter_name) {
                completed += 1;
            }
        }

        total_valid += valid;
        total_completed += completed;
        by_subject.insert(
            subject_name.clone(),
            SubjectProgress {
                percentage: percentage(completed, valid),
                valid_chapters: valid,
                completed_chapters: completed,
            },
        );
    }

    ProgressSnapshot {
        overall: percentage(total_completed, total_valid),
        by_subject,
        total_valid_chapters: total_valid,
        total_completed_chapters: total_completed,
        ..ProgressSnapshot::default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterStatus {
    pub completed: bool,
    pub excluded: bool,
}

/// Per-chapter completion board. Excluded chapters always read as not
/// completed, whatever the learner marked.
pub fn chapter_statuses(
    curriculum: &CurriculumTree,
    exclusions: &EffectiveExclusionSet,
    completion: &CompletionRecord,
) -> BTreeMap<String, BTreeMap<String, ChapterStatus>> {
    curriculum
        .subjects
        .iter()
        .map(|(subject_name, subject)| {
            let chapters = subject
                .chapters
                .keys()
                .map(|chapter_name| {
                    let excluded = exclusions.is_excluded(subject_name, chapter_name);
                    let completed =
                        !excluded && completion.is_completed(subject_name, chapter_name);
                    (chapter_name.clone(), ChapterStatus { completed, excluded })
                })
                .collect();
            (subject_name.clone(), chapters)
        })
        .collect()
}
