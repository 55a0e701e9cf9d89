//! Academic progress and cohort analytics.
//!
//! Pure scoring over curriculum trees, scoped chapter exclusions, completion
//! flags, exam results and study sessions. `db` and the binary supply those
//! inputs from Postgres; every other module is free of I/O.

pub mod config;
pub mod curriculum;
pub mod db;
pub mod engine;
pub mod error;
pub mod exclusion;
pub mod heatmap;
pub mod models;
pub mod performance;
pub mod progress;
pub mod report;
pub mod risk;
pub mod time;

pub use config::EngineConfig;
pub use curriculum::{CurriculumIndex, InMemoryCurriculumIndex};
pub use engine::AnalyticsEngine;
pub use error::{ConfigError, ParseError};
pub use exclusion::EffectiveExclusionSet;
pub use heatmap::Heatmap;
pub use models::{
    CohortMember, CompletionRecord, CurriculumKey, CurriculumTree, ExamResult, ExclusionSet,
    LearnerInputs, ProgressSnapshot, RiskRecord, RiskStatus, StudySession,
};
pub use time::Clock;
