use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ParseError;
use crate::time::parse_timestamp;

pub const EXCLUSION_KEY_SEPARATOR: &str = "::";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Program {
    HighSchool,
    Exam,
    AfterTenth,
}

impl Program {
    pub fn as_str(&self) -> &'static str {
        match self {
            Program::HighSchool => "high_school",
            Program::Exam => "exam",
            Program::AfterTenth => "after_tenth",
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Program {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "high_school" | "highschool" => Ok(Program::HighSchool),
            "exam" | "exams" | "exam_prep" => Ok(Program::Exam),
            "after_tenth" => Ok(Program::AfterTenth),
            other => Err(ParseError::Program(other.to_string())),
        }
    }
}

/// Identifies one curriculum: program, board (or exam name) and level.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CurriculumKey {
    pub program: Program,
    pub board: String,
    pub level: Option<String>,
}

impl CurriculumKey {
    pub fn new(program: Program, board: impl Into<String>, level: Option<&str>) -> Self {
        Self {
            program,
            board: board.into(),
            level: level.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    #[serde(default)]
    pub topics: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    #[serde(default)]
    pub chapters: BTreeMap<String, Chapter>,
}

/// Subject → Chapter → Topic tree for one curriculum key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CurriculumTree {
    pub subjects: BTreeMap<String, Subject>,
}

impl CurriculumTree {
    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    pub fn subject_names(&self) -> Vec<String> {
        self.subjects.keys().cloned().collect()
    }

    pub fn chapter_count(&self) -> usize {
        self.subjects.values().map(|s| s.chapters.len()).sum()
    }

    pub fn add_chapter(&mut self, subject: &str, chapter: &str, topic: Option<&str>) {
        let entry = self
            .subjects
            .entry(subject.to_string())
            .or_default()
            .chapters
            .entry(chapter.to_string())
            .or_default();
        if let Some(topic) = topic {
            entry.topics.insert(topic.to_string());
        }
    }
}

pub fn exclusion_key(subject: &str, chapter: &str) -> String {
    format!("{subject}{EXCLUSION_KEY_SEPARATOR}{chapter}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Institution,
    Class,
    Personal,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Institution => "institution",
            Scope::Class => "class",
            Scope::Personal => "personal",
        }
    }
}

impl FromStr for Scope {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "institution" => Ok(Scope::Institution),
            "class" => Ok(Scope::Class),
            "personal" => Ok(Scope::Personal),
            other => Err(ParseError::Scope(other.to_string())),
        }
    }
}

/// `subject::chapter` → excluded flag for a single scope. Missing keys are
/// not excluded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExclusionSet {
    pub flags: BTreeMap<String, bool>,
}

impl ExclusionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exclude(&mut self, subject: &str, chapter: &str) {
        self.flags.insert(exclusion_key(subject, chapter), true);
    }

    pub fn is_excluded(&self, subject: &str, chapter: &str) -> bool {
        self.flags
            .get(&exclusion_key(subject, chapter))
            .copied()
            .unwrap_or(false)
    }

    /// Flips the flag for one chapter in this set only. Setting removes the
    /// key rather than storing `false`. Returns the new state.
    pub fn toggle(&mut self, subject: &str, chapter: &str) -> bool {
        let key = exclusion_key(subject, chapter);
        if self.flags.get(&key).copied().unwrap_or(false) {
            self.flags.remove(&key);
            false
        } else {
            self.flags.insert(key, true);
            true
        }
    }

    pub fn excluded_keys(&self) -> impl Iterator<Item = &str> {
        self.flags
            .iter()
            .filter(|(_, excluded)| **excluded)
            .map(|(key, _)| key.as_str())
    }
}

impl<K: Into<String>> FromIterator<(K, bool)> for ExclusionSet {
    fn from_iter<T: IntoIterator<Item = (K, bool)>>(iter: T) -> Self {
        Self {
            flags: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Exclusion sets for one learner, one per scope. A learner in several
/// classes carries one class set per class.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopedExclusions {
    #[serde(default)]
    pub institution: ExclusionSet,
    #[serde(default)]
    pub classes: Vec<ExclusionSet>,
    #[serde(default)]
    pub personal: ExclusionSet,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompletionRecord {
    pub subjects: BTreeMap<String, BTreeMap<String, bool>>,
}

impl CompletionRecord {
    pub fn mark(&mut self, subject: &str, chapter: &str, completed: bool) {
        self.subjects
            .entry(subject.to_string())
            .or_default()
            .insert(chapter.to_string(), completed);
    }

    pub fn is_completed(&self, subject: &str, chapter: &str) -> bool {
        self.subjects
            .get(subject)
            .and_then(|chapters| chapters.get(chapter))
            .copied()
            .unwrap_or(false)
    }
}

/// One recorded test. `score` and `max_score` are optional because the
/// collaborator may hand over partially filled records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExamResult {
    pub date: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub test_type: String,
    pub score: Option<f64>,
    pub max_score: Option<f64>,
}

impl ExamResult {
    pub fn new(date: &str, subject: &str, test_type: &str, score: f64, max_score: f64) -> Self {
        Self {
            date: date.to_string(),
            subject: subject.to_string(),
            test_type: test_type.to_string(),
            score: Some(score),
            max_score: Some(max_score),
        }
    }

    /// `None` for missing or non-finite values and `max_score <= 0`.
    pub fn percentage(&self) -> Option<f64> {
        let score = self.score.filter(|s| s.is_finite())?;
        let max_score = self.max_score.filter(|m| m.is_finite() && *m > 0.0)?;
        // Multiply first so whole-number scores give exact percentages.
        Some(score * 100.0 / max_score)
    }

    pub fn taken_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.date)
    }

    /// Date and percentage of a usable record. Every exam aggregate counts
    /// only records for which this is `Some`.
    pub fn dated_percentage(&self) -> Option<(DateTime<Utc>, f64)> {
        Some((self.taken_at()?, self.percentage()?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudySession {
    pub learner_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_secs: u64,
    pub local_hour: Option<u8>,
    pub local_weekday: Option<u8>,
}

impl StudySession {
    pub fn local_slot(&self) -> Option<(u8, u8)> {
        match (self.local_weekday, self.local_hour) {
            (Some(weekday), Some(hour)) if weekday <= 6 && hour <= 23 => Some((weekday, hour)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectProgress {
    pub percentage: f64,
    pub valid_chapters: usize,
    pub completed_chapters: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceScores {
    pub momentum: f64,
    pub consistency: f64,
    pub readiness: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub overall: f64,
    pub by_subject: BTreeMap<String, SubjectProgress>,
    pub total_valid_chapters: usize,
    pub total_completed_chapters: usize,
    #[serde(flatten)]
    pub performance: PerformanceScores,
    pub average_exam_percentage: f64,
    pub valid_exam_count: usize,
}

impl ProgressSnapshot {
    pub fn subject_percentages(&self) -> BTreeMap<String, f64> {
        self.by_subject
            .iter()
            .map(|(name, progress)| (name.clone(), progress.percentage))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskStatus {
    Healthy,
    Stagnating,
    Declining,
    Critical,
}

impl RiskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskStatus::Healthy => "healthy",
            RiskStatus::Stagnating => "stagnating",
            RiskStatus::Declining => "declining",
            RiskStatus::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskStatus {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "healthy" => Ok(RiskStatus::Healthy),
            "stagnating" => Ok(RiskStatus::Stagnating),
            "declining" => Ok(RiskStatus::Declining),
            "critical" => Ok(RiskStatus::Critical),
            other => Err(ParseError::RiskStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRecord {
    pub learner_id: Uuid,
    pub display_name: String,
    pub class_label: String,
    pub status: RiskStatus,
    pub momentum: f64,
    /// `None` when the learner has never logged in.
    pub days_inactive: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortMember {
    pub learner_id: Uuid,
    pub display_name: String,
    pub class_label: String,
    /// Raw last-login timestamp; unparseable values count as never.
    pub last_login: Option<String>,
    #[serde(default)]
    pub exam_results: Vec<ExamResult>,
    #[serde(default)]
    pub sessions: Vec<StudySession>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerInputs {
    pub curriculum: CurriculumKey,
    #[serde(default)]
    pub subject_filter: Option<Vec<String>>,
    #[serde(default)]
    pub exclusions: ScopedExclusions,
    #[serde(default)]
    pub completion: CompletionRecord,
    #[serde(default)]
    pub exam_results: Vec<ExamResult>,
    #[serde(default)]
    pub sessions: Vec<StudySession>,
}
