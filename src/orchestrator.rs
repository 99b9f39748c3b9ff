use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::config::ScoringConfig;
use crate::engines::difficulty::{DifficultyInput, DifficultyReport};
use crate::engines::pace::{PaceInput, PaceReport};
use crate::engines::priority::{PriorityReport, TopicPerformance};
use crate::engines::retention::{RetentionInput, RetentionReport};
use crate::types::{
    EngineKind, PerformanceSample, ResponseEnvelope, RetentionState, Tier,
};
use crate::wrapper::ExecutionWrapper;

/// One graded test plus everything the caller already holds about the
/// (student, topic) pair.
#[derive(Debug, Clone)]
pub struct Submission {
    pub student_id: String,
    pub topic_id: String,
    pub tier: Tier,
    pub sample: PerformanceSample,
    pub retention_state: Option<RetentionState>,
    pub days_since_last_review: Option<f64>,
    pub prior_forgetting_rate: Option<f64>,
    pub topic_weight: f64,
    pub course_importance: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineIssue {
    pub engine: EngineKind,
    pub message: String,
}

/// Merged four-engine result. Every envelope is always present; `errors`
/// annotates the ones that degraded.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionOutcome {
    pub retention: ResponseEnvelope<RetentionReport>,
    pub difficulty: ResponseEnvelope<DifficultyReport>,
    pub priority: ResponseEnvelope<PriorityReport>,
    pub pace: ResponseEnvelope<PaceReport>,
    pub errors: Vec<EngineIssue>,
    pub elapsed_ms: u64,
}

/// Fans one submission out to the four engines through the wrapper and
/// merges the envelopes. Engines have no data dependency on each other, so
/// they run concurrently; results merge by key, not by completion order.
pub struct Orchestrator {
    wrapper: Arc<ExecutionWrapper>,
    config: Arc<ScoringConfig>,
}

impl Orchestrator {
    pub fn new(wrapper: Arc<ExecutionWrapper>, config: Arc<ScoringConfig>) -> Self {
        Self { wrapper, config }
    }

    /// Wires the whole subsystem: classifier, context provider, registry
    /// with a fresh override store, wrapper. The one fatal error in this
    /// crate surfaces here, before any request is served.
    pub fn from_config(
        config: ScoringConfig,
        data_access: Arc<dyn crate::data_access::DataAccess>,
    ) -> Result<Self, crate::error::ConfigError> {
        let config = Arc::new(config);
        let classifier = crate::segment::SegmentClassifier::new(config.segmentation.clone())?;
        let provider = Arc::new(crate::context::ContextProvider::new(
            Arc::clone(&data_access),
            config.context.clone(),
        ));
        let registry = crate::registry::VersionRegistry::new(
            config.registry.clone(),
            config.feature_flags,
            Arc::new(crate::registry::OverrideStore::new()),
        );
        let wrapper = Arc::new(ExecutionWrapper::new(
            Arc::clone(&config),
            registry,
            provider,
            classifier,
            data_access,
        ));
        Ok(Self::new(wrapper, config))
    }

    pub fn wrapper(&self) -> &ExecutionWrapper {
        &self.wrapper
    }

    pub async fn process_submission(&self, submission: Submission) -> SubmissionOutcome {
        let started = Instant::now();

        // Warm the shared context once; the per-engine lookups behind the
        // wrapper then hit the cache instead of the store four times over.
        let timeout_ms = self.config.context.fetch_timeout_ms;
        let provider = self.wrapper.context_provider();
        let _ = tokio::join!(
            provider.topic_context(&submission.topic_id, timeout_ms),
            provider.student_history(&submission.student_id, None, timeout_ms),
            provider.student_history(&submission.student_id, Some(&submission.topic_id), timeout_ms),
            provider.student_signals(&submission.student_id, timeout_ms),
        );

        let retention_input = RetentionInput {
            sample: submission.sample.clone(),
            prior_state: submission.retention_state,
            days_since_last_review: submission.days_since_last_review,
            prior_forgetting_rate: submission.prior_forgetting_rate,
        };
        let difficulty_input = DifficultyInput {
            sample: submission.sample.clone(),
            recent_success_rates: None,
        };
        let pace_input = PaceInput {
            duration_minutes: submission.sample.duration_minutes().unwrap_or(0.0),
            question_count: submission.sample.total,
            success_rate: submission.sample.correct_rate(),
        };
        let topic_batch = vec![topic_performance(&submission)];

        let (retention, difficulty, priority, pace) = tokio::join!(
            self.wrapper.score_retention(
                &submission.student_id,
                &submission.topic_id,
                submission.tier,
                retention_input,
            ),
            self.wrapper.score_difficulty(
                &submission.student_id,
                &submission.topic_id,
                submission.tier,
                difficulty_input,
            ),
            self.wrapper
                .rank_priority(&submission.student_id, submission.tier, topic_batch),
            self.wrapper
                .analyze_pace(&submission.student_id, submission.tier, pace_input),
        );

        let mut errors = Vec::new();
        annotate(&mut errors, EngineKind::Retention, retention.fallback_used, &retention.fallback_reason);
        annotate(&mut errors, EngineKind::Difficulty, difficulty.fallback_used, &difficulty.fallback_reason);
        annotate(&mut errors, EngineKind::Priority, priority.fallback_used, &priority.fallback_reason);
        annotate(&mut errors, EngineKind::Pace, pace.fallback_used, &pace.fallback_reason);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        if !errors.is_empty() {
            tracing::warn!(
                student_id = %submission.student_id,
                topic_id = %submission.topic_id,
                degraded = errors.len(),
                elapsed_ms,
                "submission scored with degraded engines"
            );
        }

        SubmissionOutcome {
            retention,
            difficulty,
            priority,
            pace,
            errors,
            elapsed_ms,
        }
    }

    /// Batch ranking over many topics, the daily-plan entry point.
    pub async fn rank_topics(
        &self,
        student_id: &str,
        tier: Tier,
        topics: Vec<TopicPerformance>,
    ) -> ResponseEnvelope<PriorityReport> {
        self.wrapper.rank_priority(student_id, tier, topics).await
    }
}

fn annotate(
    errors: &mut Vec<EngineIssue>,
    engine: EngineKind,
    fallback_used: bool,
    reason: &Option<String>,
) {
    if fallback_used {
        errors.push(EngineIssue {
            engine,
            message: reason
                .clone()
                .unwrap_or_else(|| "degraded without reason".to_string()),
        });
    }
}

/// A one-topic batch built from the submission itself. A single test either
/// passed or failed outright for the failure-rate term.
fn topic_performance(submission: &Submission) -> TopicPerformance {
    let sample = &submission.sample;
    let correct_rate = sample.correct_rate();
    TopicPerformance {
        topic_id: submission.topic_id.clone(),
        blank_rate: sample.blank_rate(),
        wrong_rate: sample.wrong_rate(),
        failure_rate: if correct_rate < 0.5 { 1.0 } else { 0.0 },
        success_rate: correct_rate,
        topic_weight: submission.topic_weight,
        course_importance: submission.course_importance,
        minutes_per_question: sample
            .duration_minutes()
            .filter(|m| *m > 0.0 && sample.total > 0)
            .map(|m| m / sample.total as f64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn single_test_failure_rate_is_binary() {
        let submission = Submission {
            student_id: "s1".to_string(),
            topic_id: "t1".to_string(),
            tier: Tier::Free,
            sample: PerformanceSample {
                correct: 3,
                wrong: 7,
                blank: 2,
                total: 12,
                duration_seconds: Some(900.0),
                difficulty_hint: 3,
                timestamp: Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap(),
            },
            retention_state: None,
            days_since_last_review: None,
            prior_forgetting_rate: None,
            topic_weight: 2.0,
            course_importance: 1.5,
        };
        let topic = topic_performance(&submission);
        assert_eq!(topic.failure_rate, 1.0);
        assert!((topic.minutes_per_question.unwrap() - 1.25).abs() < 1e-9);
    }
}
