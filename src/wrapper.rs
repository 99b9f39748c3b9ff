use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::config::ScoringConfig;
use crate::context::ContextProvider;
use crate::data_access::DataAccess;
use crate::engines::difficulty::{self, DifficultyEnrichment, DifficultyInput, DifficultyReport};
use crate::engines::pace::{self, PaceEnrichment, PaceInput, PaceReport};
use crate::engines::priority::{self, PriorityEnrichment, PriorityReport, TopicPerformance};
use crate::engines::retention::{self, RetentionEnrichment, RetentionInput, RetentionReport};
use crate::registry::VersionRegistry;
use crate::segment::{SegmentClassifier, SegmentInput};
use crate::types::{
    EngineConfig, EngineKind, EngineVersion, ExecutionRecord, ResponseEnvelope, Segment, Tier,
};

/// Runs the version the registry picked and guarantees its caller a result.
///
/// Failure ladder, from mildest to last-resort:
/// 1. tier or missing context rules out v2 → v1 runs directly, no fallback
///    is recorded;
/// 2. v2 returns an error → v1 runs, `fallback_used` and a reason are set;
/// 3. the registry itself cannot resolve → the emergency path runs v1 with
///    no registry involvement at all. Nothing on this ladder can escape to
///    the routing layer as an error.
pub struct ExecutionWrapper {
    config: Arc<ScoringConfig>,
    registry: VersionRegistry,
    context: Arc<ContextProvider>,
    classifier: SegmentClassifier,
    data_access: Arc<dyn DataAccess>,
}

impl ExecutionWrapper {
    pub fn new(
        config: Arc<ScoringConfig>,
        registry: VersionRegistry,
        context: Arc<ContextProvider>,
        classifier: SegmentClassifier,
        data_access: Arc<dyn DataAccess>,
    ) -> Self {
        Self {
            config,
            registry,
            context,
            classifier,
            data_access,
        }
    }

    pub fn registry(&self) -> &VersionRegistry {
        &self.registry
    }

    pub fn context_provider(&self) -> &ContextProvider {
        &self.context
    }

    pub async fn score_retention(
        &self,
        student_id: &str,
        topic_id: &str,
        tier: Tier,
        input: RetentionInput,
    ) -> ResponseEnvelope<RetentionReport> {
        let started = Instant::now();
        let run_v1 = || RetentionReport::from_v1(retention::evaluate_v1(&input, &self.config.retention));

        let engine_cfg =
            match self
                .registry
                .resolve(EngineKind::Retention, tier, Some(student_id))
            {
                Ok(cfg) => cfg,
                Err(err) => {
                    return self
                        .emergency(EngineKind::Retention, tier, started, err.to_string(), run_v1())
                        .await;
                }
            };

        if engine_cfg.version == EngineVersion::V1 {
            let envelope = self.direct_v1(tier, run_v1());
            self.log(EngineKind::Retention, &envelope, tier, started).await;
            return envelope;
        }

        let enrichment = self
            .retention_enrichment(student_id, topic_id, &engine_cfg)
            .await;
        let envelope = match enrichment {
            None => {
                tracing::warn!(
                    student_id,
                    topic_id,
                    "segment signals unavailable, retention ran v1 directly"
                );
                self.direct_v1(tier, run_v1())
            }
            Some(enrichment) => match retention::evaluate_v2(
                &input,
                &enrichment,
                &self.config.retention,
                &self.config.risk_factors,
            ) {
                Ok(report) => self.v2_success(tier, report),
                Err(err) => self.fallback(
                    EngineKind::Retention,
                    tier,
                    &engine_cfg,
                    err.to_string(),
                    run_v1(),
                ),
            },
        };

        self.log(EngineKind::Retention, &envelope, tier, started).await;
        envelope
    }

    pub async fn score_difficulty(
        &self,
        student_id: &str,
        topic_id: &str,
        tier: Tier,
        input: DifficultyInput,
    ) -> ResponseEnvelope<DifficultyReport> {
        let started = Instant::now();
        let run_v1 =
            || DifficultyReport::from_v1(difficulty::evaluate_v1(&input, &self.config.difficulty));

        let engine_cfg =
            match self
                .registry
                .resolve(EngineKind::Difficulty, tier, Some(student_id))
            {
                Ok(cfg) => cfg,
                Err(err) => {
                    return self
                        .emergency(
                            EngineKind::Difficulty,
                            tier,
                            started,
                            err.to_string(),
                            run_v1(),
                        )
                        .await;
                }
            };

        if engine_cfg.version == EngineVersion::V1 {
            let envelope = self.direct_v1(tier, run_v1());
            self.log(EngineKind::Difficulty, &envelope, tier, started).await;
            return envelope;
        }

        let envelope = match self.segment_for(student_id, engine_cfg.timeout_ms).await {
            None => {
                tracing::warn!(
                    student_id,
                    topic_id,
                    "segment signals unavailable, difficulty ran v1 directly"
                );
                self.direct_v1(tier, run_v1())
            }
            Some(segment) => {
                let topic = self
                    .context
                    .topic_context(topic_id, engine_cfg.timeout_ms)
                    .await;
                let history = self
                    .context
                    .student_history(student_id, Some(topic_id), engine_cfg.timeout_ms)
                    .await;
                let enrichment = DifficultyEnrichment {
                    topic: topic.value,
                    history: history.value,
                    segment,
                    context_defaulted: topic.from_default,
                    history_defaulted: history.from_default,
                };
                match difficulty::evaluate_v2(&input, &enrichment, &self.config.difficulty) {
                    Ok(report) => self.v2_success(tier, report),
                    Err(err) => self.fallback(
                        EngineKind::Difficulty,
                        tier,
                        &engine_cfg,
                        err.to_string(),
                        run_v1(),
                    ),
                }
            }
        };

        self.log(EngineKind::Difficulty, &envelope, tier, started).await;
        envelope
    }

    pub async fn rank_priority(
        &self,
        student_id: &str,
        tier: Tier,
        topics: Vec<TopicPerformance>,
    ) -> ResponseEnvelope<PriorityReport> {
        let started = Instant::now();
        let run_v1 =
            || PriorityReport::from_v1(priority::rank_v1(&topics, &self.config.priority));

        let engine_cfg =
            match self
                .registry
                .resolve(EngineKind::Priority, tier, Some(student_id))
            {
                Ok(cfg) => cfg,
                Err(err) => {
                    return self
                        .emergency(EngineKind::Priority, tier, started, err.to_string(), run_v1())
                        .await;
                }
            };

        if engine_cfg.version == EngineVersion::V1 {
            let envelope = self.direct_v1(tier, run_v1());
            self.log(EngineKind::Priority, &envelope, tier, started).await;
            return envelope;
        }

        let envelope = match self.segment_for(student_id, engine_cfg.timeout_ms).await {
            None => {
                tracing::warn!(
                    student_id,
                    "segment signals unavailable, priority ran v1 directly"
                );
                self.direct_v1(tier, run_v1())
            }
            Some(segment) => {
                // One fetch per distinct topic id for the whole request.
                let mut topic_contexts = HashMap::new();
                for topic in &topics {
                    if !topic_contexts.contains_key(&topic.topic_id) {
                        let fetch = self
                            .context
                            .topic_context(&topic.topic_id, engine_cfg.timeout_ms)
                            .await;
                        topic_contexts.insert(topic.topic_id.clone(), fetch.value);
                    }
                }
                let enrichment = PriorityEnrichment {
                    segment,
                    topic_contexts,
                    enabled_features: engine_cfg.enabled_features.clone(),
                };
                match priority::rank_v2(&topics, &enrichment, &self.config.priority) {
                    Ok(report) => self.v2_success(tier, report),
                    Err(err) => self.fallback(
                        EngineKind::Priority,
                        tier,
                        &engine_cfg,
                        err.to_string(),
                        run_v1(),
                    ),
                }
            }
        };

        self.log(EngineKind::Priority, &envelope, tier, started).await;
        envelope
    }

    pub async fn analyze_pace(
        &self,
        student_id: &str,
        tier: Tier,
        input: PaceInput,
    ) -> ResponseEnvelope<PaceReport> {
        let started = Instant::now();
        let run_v1 = || PaceReport::from_v1(pace::evaluate_v1(&input, &self.config.pace));

        let engine_cfg = match self.registry.resolve(EngineKind::Pace, tier, Some(student_id)) {
            Ok(cfg) => cfg,
            Err(err) => {
                return self
                    .emergency(EngineKind::Pace, tier, started, err.to_string(), run_v1())
                    .await;
            }
        };

        if engine_cfg.version == EngineVersion::V1 {
            let envelope = self.direct_v1(tier, run_v1());
            self.log(EngineKind::Pace, &envelope, tier, started).await;
            return envelope;
        }

        let envelope = match self.segment_for(student_id, engine_cfg.timeout_ms).await {
            None => {
                tracing::warn!(
                    student_id,
                    "segment signals unavailable, pace ran v1 directly"
                );
                self.direct_v1(tier, run_v1())
            }
            Some(segment) => {
                let history = self
                    .context
                    .student_history(student_id, None, engine_cfg.timeout_ms)
                    .await;
                let avg_days_between_tests = cadence_days(
                    history.value.test_count,
                    self.config.context.history_days_back,
                );
                let enrichment = PaceEnrichment {
                    history_defaulted: history.from_default,
                    history: history.value,
                    segment,
                    avg_days_between_tests,
                    // The store does not expose per-question timing yet.
                    avg_minutes_per_question: None,
                };
                match pace::evaluate_v2(&input, &enrichment, &self.config.pace) {
                    Ok(report) => self.v2_success(tier, report),
                    Err(err) => self.fallback(
                        EngineKind::Pace,
                        tier,
                        &engine_cfg,
                        err.to_string(),
                        run_v1(),
                    ),
                }
            }
        };

        self.log(EngineKind::Pace, &envelope, tier, started).await;
        envelope
    }

    /// Full v2 context bundle for the retention engine, or `None` when the
    /// required segment cannot be built.
    async fn retention_enrichment(
        &self,
        student_id: &str,
        topic_id: &str,
        engine_cfg: &EngineConfig,
    ) -> Option<RetentionEnrichment> {
        let segment = self.segment_for(student_id, engine_cfg.timeout_ms).await?;
        let topic = self
            .context
            .topic_context(topic_id, engine_cfg.timeout_ms)
            .await;
        let history = self
            .context
            .student_history(student_id, Some(topic_id), engine_cfg.timeout_ms)
            .await;
        let prerequisite_mastery = self
            .context
            .prerequisite_mastery(student_id, &topic.value, engine_cfg.timeout_ms)
            .await;

        Some(RetentionEnrichment {
            context_defaulted: topic.from_default,
            history_defaulted: history.from_default,
            topic: topic.value,
            history: history.value,
            segment,
            prerequisite_mastery,
            now: Utc::now(),
        })
    }

    async fn segment_for(&self, student_id: &str, timeout_ms: u64) -> Option<Segment> {
        let signals = self.context.student_signals(student_id, timeout_ms).await?;
        let history = self
            .context
            .student_history(student_id, None, timeout_ms)
            .await;
        let input = SegmentInput {
            signals,
            test_count: history.value.test_count,
            overdue_count: history.value.overdue_topics,
        };
        Some(self.classifier.classify(&input))
    }

    fn direct_v1<T>(&self, tier: Tier, data: T) -> ResponseEnvelope<T> {
        ResponseEnvelope {
            data,
            version_used: EngineVersion::V1,
            fallback_used: false,
            fallback_reason: None,
            tier,
        }
    }

    fn v2_success<T>(&self, tier: Tier, data: T) -> ResponseEnvelope<T> {
        ResponseEnvelope {
            data,
            version_used: EngineVersion::V2,
            fallback_used: false,
            fallback_reason: None,
            tier,
        }
    }

    fn fallback<T>(
        &self,
        engine: EngineKind,
        tier: Tier,
        engine_cfg: &EngineConfig,
        reason: String,
        data: T,
    ) -> ResponseEnvelope<T> {
        if engine_cfg.fallback_enabled {
            tracing::warn!(engine = engine.as_str(), %reason, "v2 failed, served v1");
        } else {
            tracing::error!(
                engine = engine.as_str(),
                %reason,
                "v2 failed with silent fallback disabled, served v1"
            );
        }
        ResponseEnvelope {
            data,
            version_used: EngineVersion::V1,
            fallback_used: true,
            fallback_reason: Some(reason),
            tier,
        }
    }

    /// Registry dispatch failed. Serve v1 with no registry involvement; this
    /// path has no failure mode of its own.
    async fn emergency<T>(
        &self,
        engine: EngineKind,
        tier: Tier,
        started: Instant,
        reason: String,
        data: T,
    ) -> ResponseEnvelope<T> {
        tracing::error!(engine = engine.as_str(), %reason, "registry dispatch failed, emergency v1");
        let envelope = ResponseEnvelope {
            data,
            version_used: EngineVersion::V1,
            fallback_used: true,
            fallback_reason: Some(format!("registry unavailable: {reason}")),
            tier,
        };
        self.log(engine, &envelope, tier, started).await;
        envelope
    }

    /// Telemetry write. Must never block or fail the scoring call.
    async fn log<T>(
        &self,
        engine: EngineKind,
        envelope: &ResponseEnvelope<T>,
        tier: Tier,
        started: Instant,
    ) {
        let record = ExecutionRecord {
            engine,
            version: envelope.version_used,
            tier,
            duration_ms: started.elapsed().as_millis() as u64,
            fallback_used: envelope.fallback_used,
            success: !envelope.fallback_used,
            error: envelope.fallback_reason.clone(),
        };
        if let Err(err) = self.data_access.log_execution(record).await {
            tracing::warn!(engine = engine.as_str(), error = %err, "execution log write failed");
        }
    }
}

fn cadence_days(test_count: i32, window_days: u32) -> Option<f64> {
    if test_count > 1 {
        Some(window_days as f64 / test_count as f64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::cadence_days;

    #[test]
    fn cadence_needs_two_tests() {
        assert_eq!(cadence_days(0, 30), None);
        assert_eq!(cadence_days(1, 30), None);
        assert_eq!(cadence_days(10, 30), Some(3.0));
    }
}
