use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::config::PriorityConfig;
use crate::engines::shared::min_max_normalize;
use crate::error::EngineError;
use crate::types::{EngineFeature, Segment, SegmentLevel, TopicArchetype, TopicContext};

const IDEAL_MINUTES_PER_QUESTION: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriorityLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl PriorityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

/// One topic's aggregated performance, as the caller stores it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicPerformance {
    pub topic_id: String,
    pub blank_rate: f64,
    pub wrong_rate: f64,
    pub failure_rate: f64,
    pub success_rate: f64,
    pub topic_weight: f64,
    pub course_importance: f64,
    /// Observed working speed on this topic, when known.
    pub minutes_per_question: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedTopic {
    pub topic_id: String,
    pub raw_score: f64,
    pub normalized_score: f64,
    pub level: PriorityLevel,
    pub gap_score: f64,
    pub strategic_value: f64,
    pub speed_multiplier: f64,
    pub floor_guarded: bool,
}

/// Ranks a batch of topics by how urgently they need attention. Scores are
/// min-max normalized within the batch; the result is sorted descending.
///
/// Two guards keep the normalization honest: a topic whose raw score sits
/// below the absolute floor can rank high only because the whole batch is
/// weak, so it is forced LOW; and a topic far above the floor escalates from
/// HIGH to CRITICAL.
pub fn rank_v1(topics: &[TopicPerformance], cfg: &PriorityConfig) -> Vec<RankedTopic> {
    if topics.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(f64, f64, f64, f64)> = Vec::with_capacity(topics.len());
    for topic in topics {
        let gap = (topic.blank_rate.max(0.0) * cfg.blank_weight
            + topic.wrong_rate.max(0.0) * cfg.wrong_weight
            + topic.failure_rate.max(0.0) * cfg.failure_weight)
            .min(cfg.gap_cap);
        let strategic = (topic.topic_weight.max(0.0) * topic.course_importance.max(0.0))
            .min(cfg.strategic_cap);
        let speed = speed_multiplier(topic, cfg);
        let raw = (gap * strategic * speed * 100.0).min(cfg.raw_cap);
        scored.push((raw, gap, strategic, speed));
    }

    let normalized = min_max_normalize(&scored.iter().map(|s| s.0).collect::<Vec<_>>());

    let mut ranked: Vec<RankedTopic> = topics
        .iter()
        .zip(scored.iter().zip(normalized.iter()))
        .map(|(topic, (&(raw, gap, strategic, speed), &norm))| {
            let mut level = band_for(norm, cfg);
            let mut norm = norm;
            let mut floor_guarded = false;

            // A weak batch can normalize a harmless topic to the top.
            if norm >= cfg.floor_guard_normalized && raw < cfg.absolute_floor {
                level = PriorityLevel::Low;
                norm = norm.min(cfg.floor_guard_cap);
                floor_guarded = true;
            } else if level == PriorityLevel::High
                && raw > cfg.absolute_floor * cfg.critical_ratio
            {
                level = PriorityLevel::Critical;
            }

            RankedTopic {
                topic_id: topic.topic_id.clone(),
                raw_score: raw,
                normalized_score: norm,
                level,
                gap_score: gap,
                strategic_value: strategic,
                speed_multiplier: speed,
                floor_guarded,
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.normalized_score
            .partial_cmp(&a.normalized_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.raw_score
                    .partial_cmp(&a.raw_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.topic_id.cmp(&b.topic_id))
    });
    ranked
}

fn speed_multiplier(topic: &TopicPerformance, cfg: &PriorityConfig) -> f64 {
    let Some(mpq) = topic.minutes_per_question else {
        return 1.0;
    };
    if mpq <= 0.0 {
        return 1.0;
    }
    let ratio = mpq / IDEAL_MINUTES_PER_QUESTION;
    if ratio > cfg.slow_pace_ratio {
        cfg.slow_multiplier
    } else if ratio < cfg.fast_pace_ratio && topic.success_rate > cfg.fast_success_min {
        cfg.fast_multiplier
    } else {
        1.0
    }
}

fn band_for(normalized: f64, cfg: &PriorityConfig) -> PriorityLevel {
    if normalized < cfg.low_band {
        PriorityLevel::Low
    } else if normalized < cfg.medium_band {
        PriorityLevel::Medium
    } else {
        PriorityLevel::High
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UrgencyAdjustment {
    Elevated,
    Neutral,
    Relaxed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterpretedUrgency {
    Low,
    Moderate,
    High,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicInsight {
    pub urgency_adjustment: UrgencyAdjustment,
    pub interpreted_urgency: InterpretedUrgency,
    pub message_tone: &'static str,
    pub suggested_sessions: i32,
    pub suggested_minutes: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cascade_warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synergy_note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrioritizedTopic {
    #[serde(flatten)]
    pub base: RankedTopic,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insight: Option<TopicInsight>,
    pub enrichment_failed: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorityReport {
    pub topics: Vec<PrioritizedTopic>,
    pub enriched: bool,
}

impl PriorityReport {
    pub fn from_v1(ranked: Vec<RankedTopic>) -> Self {
        Self {
            topics: ranked
                .into_iter()
                .map(|base| PrioritizedTopic {
                    base,
                    insight: None,
                    enrichment_failed: false,
                })
                .collect(),
            enriched: false,
        }
    }
}

/// Context bundle for one ranking request. `topic_contexts` is the
/// request-scoped cache: each topic id is fetched once no matter how often
/// it appears downstream.
#[derive(Debug, Clone)]
pub struct PriorityEnrichment {
    pub segment: Segment,
    pub topic_contexts: HashMap<String, TopicContext>,
    pub enabled_features: HashSet<EngineFeature>,
}

/// Enrichment layer over `rank_v1`. Scores and levels pass through
/// untouched; insight is additive. A failure while enriching one topic tags
/// that topic and moves on.
pub fn rank_v2(
    topics: &[TopicPerformance],
    enrichment: &PriorityEnrichment,
    cfg: &PriorityConfig,
) -> Result<PriorityReport, EngineError> {
    if !enrichment.segment.confidence.is_finite() {
        return Err(EngineError::InvalidEnrichment(
            "segment confidence is not finite".to_string(),
        ));
    }

    let ranked = rank_v1(topics, cfg);
    let mut out = Vec::with_capacity(ranked.len());

    for topic in ranked {
        match enrich_topic(&topic, enrichment) {
            Ok(insight) => out.push(PrioritizedTopic {
                base: topic,
                insight: Some(insight),
                enrichment_failed: false,
            }),
            Err(err) => {
                tracing::warn!(topic_id = %topic.topic_id, error = %err, "priority enrichment failed");
                out.push(PrioritizedTopic {
                    base: topic,
                    insight: None,
                    enrichment_failed: true,
                });
            }
        }
    }

    Ok(PriorityReport {
        topics: out,
        enriched: true,
    })
}

fn enrich_topic(
    topic: &RankedTopic,
    enrichment: &PriorityEnrichment,
) -> Result<TopicInsight, EngineError> {
    if !topic.normalized_score.is_finite() {
        return Err(EngineError::InvalidEnrichment(format!(
            "normalized score for {} is not finite",
            topic.topic_id
        )));
    }

    let segment = &enrichment.segment;
    let archetype = enrichment
        .topic_contexts
        .get(&topic.topic_id)
        .map(|c| c.archetype)
        .unwrap_or_default();

    let adjustment = urgency_adjustment(segment.level, archetype, topic.level);
    let interpreted = interpret(topic.level, adjustment);
    let (sessions, minutes) = session_suggestion(interpreted);

    let cascade_warning = if enrichment
        .enabled_features
        .contains(&EngineFeature::PrerequisiteCascade)
    {
        cascade_check(topic, enrichment)
    } else {
        None
    };
    let synergy_note = if enrichment
        .enabled_features
        .contains(&EngineFeature::CrossSubjectSynergy)
    {
        synergy_check(topic)
    } else {
        None
    };

    Ok(TopicInsight {
        urgency_adjustment: adjustment,
        interpreted_urgency: interpreted,
        message_tone: tone_for(segment.level),
        suggested_sessions: sessions,
        suggested_minutes: minutes,
        cascade_warning,
        synergy_note,
    })
}

fn urgency_adjustment(
    level: SegmentLevel,
    archetype: TopicArchetype,
    priority: PriorityLevel,
) -> UrgencyAdjustment {
    let struggling = level.rank() <= 2;
    let advanced = level.rank() >= 6;

    if struggling
        && matches!(
            archetype,
            TopicArchetype::Foundational | TopicArchetype::ProblemSolving
        )
        && matches!(priority, PriorityLevel::High | PriorityLevel::Critical)
    {
        UrgencyAdjustment::Elevated
    } else if advanced && matches!(priority, PriorityLevel::Low | PriorityLevel::Medium) {
        UrgencyAdjustment::Relaxed
    } else {
        UrgencyAdjustment::Neutral
    }
}

fn interpret(priority: PriorityLevel, adjustment: UrgencyAdjustment) -> InterpretedUrgency {
    let base = match priority {
        PriorityLevel::Low => InterpretedUrgency::Low,
        PriorityLevel::Medium => InterpretedUrgency::Moderate,
        PriorityLevel::High | PriorityLevel::Critical => InterpretedUrgency::High,
    };
    match (base, adjustment) {
        (InterpretedUrgency::Low, UrgencyAdjustment::Elevated) => InterpretedUrgency::Moderate,
        (InterpretedUrgency::Moderate, UrgencyAdjustment::Elevated) => InterpretedUrgency::High,
        (InterpretedUrgency::High, UrgencyAdjustment::Relaxed) => InterpretedUrgency::Moderate,
        (InterpretedUrgency::Moderate, UrgencyAdjustment::Relaxed) => InterpretedUrgency::Low,
        (other, _) => other,
    }
}

fn tone_for(level: SegmentLevel) -> &'static str {
    match level.rank() {
        1 | 2 => "encouraging",
        6 | 7 => "challenging",
        _ => "direct",
    }
}

fn session_suggestion(urgency: InterpretedUrgency) -> (i32, i32) {
    match urgency {
        InterpretedUrgency::High => (3, 25),
        InterpretedUrgency::Moderate => (2, 20),
        InterpretedUrgency::Low => (1, 15),
    }
}

/// Mastery store for the cascade/synergy detectors. Not wired up yet; the
/// detectors stay feature-flagged off and emit nothing until it lands.
fn mastery_for(_topic_id: &str) -> Option<f64> {
    None
}

fn cascade_check(topic: &RankedTopic, enrichment: &PriorityEnrichment) -> Option<String> {
    if !matches!(topic.level, PriorityLevel::High | PriorityLevel::Critical) {
        return None;
    }
    let context = enrichment.topic_contexts.get(&topic.topic_id)?;
    let weak: Vec<&str> = context
        .prerequisites
        .iter()
        .filter(|link| mastery_for(&link.topic_id).is_some_and(|m| m < 60.0))
        .map(|link| link.topic_id.as_str())
        .collect();
    if weak.is_empty() {
        None
    } else {
        Some(format!("weak prerequisites: {}", weak.join(", ")))
    }
}

fn synergy_check(_topic: &RankedTopic) -> Option<String> {
    // Cross-subject mastery is not queryable yet.
    None
}
