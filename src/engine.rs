//! Wires the components together: curriculum lookup, exclusion merge,
//! progress, performance, risk and heatmap.

use std::time::Instant;

use crate::config::EngineConfig;
use crate::curriculum::CurriculumIndex;
use crate::exclusion::resolve_scoped;
use crate::heatmap::{self, Heatmap};
use crate::models::{CohortMember, LearnerInputs, ProgressSnapshot, RiskRecord};
use crate::performance::{average_exam_percentage, valid_results, PerformanceScorer};
use crate::progress::{self, round1};
use crate::risk::{PartialClassification, RiskClassifier};
use crate::time::Clock;

pub struct AnalyticsEngine<C: CurriculumIndex> {
    curriculum: C,
    config: EngineConfig,
    clock: Clock,
}

impl<C: CurriculumIndex> AnalyticsEngine<C> {
    pub fn new(curriculum: C, config: EngineConfig) -> Self {
        Self {
            curriculum,
            config,
            clock: Clock::System,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn curriculum(&self) -> &C {
        &self.curriculum
    }

    fn scorer(&self) -> PerformanceScorer {
        PerformanceScorer::new(self.config.consistency_window_days)
    }

    fn classifier(&self) -> RiskClassifier {
        RiskClassifier::new(self.config.inactivity_days)
    }

    /// Full progress snapshot for one learner. An unknown curriculum gives a
    /// zero-progress snapshot that still carries exam-based scores.
    pub fn learner_snapshot(&self, inputs: &LearnerInputs) -> ProgressSnapshot {
        let tree = self
            .curriculum
            .lookup(&inputs.curriculum, inputs.subject_filter.as_deref());
        let exclusions = resolve_scoped(&inputs.exclusions);

        let mut snapshot = progress::compute(&tree, &exclusions, &inputs.completion);
        snapshot.performance = self.scorer().score(
            snapshot.overall,
            &inputs.exam_results,
            &inputs.sessions,
            self.clock.now(),
        );
        snapshot.average_exam_percentage = round1(average_exam_percentage(&inputs.exam_results));
        snapshot.valid_exam_count = valid_results(&inputs.exam_results).len();
        snapshot
    }

    pub fn cohort_risk(&self, members: &[CohortMember]) -> Vec<RiskRecord> {
        self.classifier().classify(members, self.clock.now())
    }

    pub fn cohort_risk_until(
        &self,
        members: &[CohortMember],
        deadline: Instant,
    ) -> PartialClassification {
        self.classifier().classify_until(members, self.clock.now(), deadline)
    }

    pub fn cohort_heatmap(&self, members: &[CohortMember]) -> Heatmap {
        heatmap::aggregate(members, self.clock.now(), self.config.heatmap_window_days)
    }
}
