use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::{RetentionConfig, SegmentRiskFactors};
use crate::error::EngineError;
use crate::types::{
    HistoryTrend, PerformanceSample, RetentionState, Segment, SegmentLevel, StudentHistory,
    TopicContext,
};

const RAPID_COMPLETION_RATIO: f64 = 0.25;
const IDEAL_MINUTES_PER_QUESTION: f64 = 1.5;

pub const SKIP_NOT_TWELVE: &str = "not a 12-question test";
pub const SKIP_NOT_FIRST_OF_DAY: &str = "not the first test of the day for this topic";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    New,
    Hero,
    Reset,
    Normal,
    Skipped,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Hero => "HERO",
            Self::Reset => "RESET",
            Self::Normal => "NORMAL",
            Self::Skipped => "SKIPPED",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetentionInput {
    pub sample: PerformanceSample,
    pub prior_state: Option<RetentionState>,
    /// Days since the previous review of this topic, if the caller knows it.
    /// Without it the HERO state cannot trigger.
    pub days_since_last_review: Option<f64>,
    /// Last persisted personal forgetting rate, v2 only.
    pub prior_forgetting_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionOutcome {
    pub status: ReviewStatus,
    pub state: RetentionState,
    pub score: f64,
    pub neutral: bool,
    pub explanation: String,
}

/// Baseline spaced-repetition pass: one sample in, the next review state
/// out. Pure; the same input always produces the same schedule.
pub fn evaluate_v1(input: &RetentionInput, cfg: &RetentionConfig) -> RetentionOutcome {
    let sample = &input.sample;

    if !sample.is_valid() {
        return RetentionOutcome {
            status: ReviewStatus::Normal,
            state: RetentionState {
                ease_factor: cfg.default_ease,
                interval_days: 1.0,
                repetition_count: input.prior_state.map(|s| s.repetition_count).unwrap_or(0),
            },
            score: 0.5,
            neutral: true,
            explanation: "empty test, schedule unchanged".to_string(),
        };
    }

    let score =
        ((sample.correct as f64 - 0.25 * sample.wrong.max(0) as f64) / sample.effective_total())
            .max(0.0);
    let prior = input.prior_state.unwrap_or_default();

    if prior.repetition_count == 0 {
        let ease = (cfg.default_ease - sample.clamped_hint() as f64 * cfg.new_hint_step)
            .clamp(cfg.min_ease, cfg.max_ease);
        return RetentionOutcome {
            status: ReviewStatus::New,
            state: RetentionState {
                ease_factor: ease,
                interval_days: 1.0,
                repetition_count: 1,
            },
            score,
            neutral: false,
            explanation: format!("first review, ease seeded at {ease:.2}"),
        };
    }

    let actual_gap = input.days_since_last_review.unwrap_or(0.0);
    if score >= cfg.hero_score_threshold && actual_gap > prior.interval_days {
        let ease = (prior.ease_factor + cfg.hero_ease_bonus).min(cfg.max_ease);
        let interval = (prior.interval_days * ease * cfg.hero_interval_bonus).max(1.0);
        return RetentionOutcome {
            status: ReviewStatus::Hero,
            state: RetentionState {
                ease_factor: ease,
                interval_days: interval,
                repetition_count: prior.repetition_count + 1,
            },
            score,
            neutral: false,
            explanation: format!(
                "recalled after {actual_gap:.0} overdue days, interval stretched to {interval:.1}"
            ),
        };
    }

    if score < cfg.reset_score_threshold {
        let ease = (prior.ease_factor - cfg.reset_ease_drop).max(cfg.min_ease);
        return RetentionOutcome {
            status: ReviewStatus::Reset,
            state: RetentionState {
                ease_factor: ease,
                interval_days: 1.0,
                repetition_count: 1,
            },
            score,
            neutral: false,
            explanation: format!("score {score:.2} below reset threshold, schedule restarted"),
        };
    }

    let ease =
        (prior.ease_factor + (score - 0.5) * cfg.normal_ease_gain).clamp(cfg.min_ease, cfg.max_ease);
    let interval = (prior.interval_days * ease).max(1.0);
    RetentionOutcome {
        status: ReviewStatus::Normal,
        state: RetentionState {
            ease_factor: ease,
            interval_days: interval,
            repetition_count: prior.repetition_count + 1,
        },
        score,
        neutral: false,
        explanation: format!("next review in {interval:.1} days"),
    }
}

/// Context bundle the wrapper assembles for a v2 run.
#[derive(Debug, Clone)]
pub struct RetentionEnrichment {
    pub topic: TopicContext,
    pub history: StudentHistory,
    pub segment: Segment,
    pub prerequisite_mastery: HashMap<String, f64>,
    pub context_defaulted: bool,
    pub history_defaulted: bool,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionV2Features {
    pub forgetting_rate: f64,
    pub evidence_confidence: f64,
    pub integrity: f64,
    pub anomaly_flags: Vec<String>,
    pub segment_risk_factor: f64,
    pub behavioral_multiplier: f64,
    pub adjusted_interval_days: f64,
}

/// What both versions hand to the envelope. `base` is the v1 result and is
/// never modified by enrichment; `state` is what the caller should persist.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionReport {
    pub status: ReviewStatus,
    pub state: RetentionState,
    pub score: f64,
    pub explanation: String,
    pub base: RetentionOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub v2_features: Option<RetentionV2Features>,
}

impl RetentionReport {
    pub fn from_v1(outcome: RetentionOutcome) -> Self {
        Self {
            status: outcome.status,
            state: outcome.state,
            score: outcome.score,
            explanation: outcome.explanation.clone(),
            base: outcome,
            v2_features: None,
        }
    }
}

/// Context-enriched pass. Runs v1 unchanged, then reshapes only the interval
/// using segment risk, topic archetype, prerequisite mastery and evidence
/// quality. Two gates keep adjustments on comparable footing: exactly twelve
/// questions, and the first test of the day for the topic.
pub fn evaluate_v2(
    input: &RetentionInput,
    enrichment: &RetentionEnrichment,
    cfg: &RetentionConfig,
    risk: &SegmentRiskFactors,
) -> Result<RetentionReport, EngineError> {
    if enrichment.segment.confidence < 0.0 || enrichment.segment.confidence > 1.0 {
        return Err(EngineError::InvalidEnrichment(format!(
            "segment confidence {} out of range",
            enrichment.segment.confidence
        )));
    }

    let base = evaluate_v1(input, cfg);

    if input.sample.total != cfg.v2_question_gate {
        return Ok(skipped(input, base, SKIP_NOT_TWELVE));
    }
    if let Some(last) = enrichment.history.last_test_at {
        if last.date_naive() == enrichment.now.date_naive() {
            return Ok(skipped(input, base, SKIP_NOT_FIRST_OF_DAY));
        }
    }

    let history = &enrichment.history;
    let segment = &enrichment.segment;

    let target = match segment.level {
        SegmentLevel::L1 | SegmentLevel::L2 => cfg.target_struggling,
        SegmentLevel::L6 | SegmentLevel::L7 => cfg.target_advanced,
        _ => cfg.target_default,
    };
    let k_prev = input
        .prior_forgetting_rate
        .unwrap_or(cfg.default_forget_rate);
    let forgetting_rate = (k_prev + cfg.forget_rate_step * (target - base.score))
        .clamp(cfg.forget_rate_floor, cfg.forget_rate_ceiling);

    let evidence_confidence = if history.test_count < 3 {
        0.5
    } else {
        let maturity = (history.test_count as f64 / cfg.evidence_maturity_tests).min(1.0);
        let recency = history
            .last_test_at
            .map(|last| {
                let days = (enrichment.now - last).num_seconds() as f64 / 86_400.0;
                (-days.max(0.0) / cfg.evidence_recency_halflife_days).exp()
            })
            .unwrap_or(0.0);
        (cfg.evidence_count_weight * maturity + cfg.evidence_recency_weight * recency)
            .clamp(0.2, 1.0)
    };

    let mut anomaly_flags = Vec::new();
    let trailing: Vec<f64> = history.recent_success_rates.iter().take(3).copied().collect();
    if trailing.len() == 3 {
        let trailing_avg = trailing.iter().sum::<f64>() / trailing.len() as f64;
        if trailing_avg > 0.0 && base.score * 100.0 >= trailing_avg * cfg.spike_ratio {
            anomaly_flags.push("score_spike".to_string());
        }
    }
    if let Some(minutes) = input.sample.duration_minutes() {
        let ideal = input.sample.total as f64 * IDEAL_MINUTES_PER_QUESTION;
        if minutes > 0.0 && minutes < ideal * RAPID_COMPLETION_RATIO {
            anomaly_flags.push("rapid_completion".to_string());
        }
    }
    if input.sample.wrong == 0
        && input.sample.blank == 0
        && history.trend == HistoryTrend::Declining
    {
        anomaly_flags.push("perfect_after_decline".to_string());
    }

    let integrity = if anomaly_flags.len() >= 2 {
        cfg.multi_anomaly_integrity
    } else if anomaly_flags.iter().any(|f| f == "score_spike") {
        cfg.spike_integrity
    } else {
        1.0
    }
    .clamp(0.6, 1.0);

    let brake = prerequisite_brake(enrichment, cfg);
    let behavioral_multiplier = enrichment.topic.archetype.interval_factor() * brake;
    let segment_risk_factor = risk.factor(segment.level);

    let base_interval = base.state.interval_days;
    let mut adjusted = base_interval * segment_risk_factor * behavioral_multiplier;
    if integrity < cfg.spike_integrity {
        adjusted = adjusted.min(base_interval * cfg.low_integrity_growth_cap);
    }
    // Thin evidence pulls the schedule back toward the unadjusted baseline.
    let final_interval =
        (base_interval + (adjusted - base_interval) * evidence_confidence).max(0.0);

    let features = RetentionV2Features {
        forgetting_rate,
        evidence_confidence,
        integrity,
        anomaly_flags,
        segment_risk_factor,
        behavioral_multiplier,
        adjusted_interval_days: final_interval,
    };
    let explanation = explain_adjustment(&base, &features, brake, enrichment);

    Ok(RetentionReport {
        status: base.status,
        state: RetentionState {
            ease_factor: base.state.ease_factor,
            interval_days: final_interval,
            repetition_count: base.state.repetition_count,
        },
        score: base.score,
        explanation,
        base,
        v2_features: Some(features),
    })
}

fn skipped(input: &RetentionInput, base: RetentionOutcome, reason: &str) -> RetentionReport {
    RetentionReport {
        status: ReviewStatus::Skipped,
        state: input.prior_state.unwrap_or_default(),
        score: base.score,
        explanation: reason.to_string(),
        base,
        v2_features: None,
    }
}

fn prerequisite_brake(enrichment: &RetentionEnrichment, cfg: &RetentionConfig) -> f64 {
    let links = &enrichment.topic.prerequisites;
    if links.is_empty() {
        return 1.0;
    }
    let weak = links
        .iter()
        .filter(|link| {
            enrichment
                .prerequisite_mastery
                .get(&link.topic_id)
                .is_some_and(|m| *m < cfg.prerequisite_mastery_floor)
        })
        .count();
    if weak * 2 >= links.len() {
        cfg.prerequisite_brake
    } else {
        1.0
    }
}

fn explain_adjustment(
    base: &RetentionOutcome,
    features: &RetentionV2Features,
    brake: f64,
    enrichment: &RetentionEnrichment,
) -> String {
    let delta = features.adjusted_interval_days - base.state.interval_days;
    let direction = if delta > 0.05 {
        "lengthened"
    } else if delta < -0.05 {
        "shortened"
    } else {
        "kept"
    };

    let mut reasons = Vec::new();
    if features.segment_risk_factor < 1.0 {
        reasons.push(format!("{} segment risk", enrichment.segment.level.as_str()));
    } else if features.segment_risk_factor > 1.0 {
        reasons.push(format!(
            "{} segment stability",
            enrichment.segment.level.as_str()
        ));
    }
    if enrichment.topic.archetype.interval_factor() != 1.0 {
        reasons.push(format!("{} topic", enrichment.topic.archetype.as_str()));
    }
    if brake < 1.0 {
        reasons.push("weak prerequisites".to_string());
    }
    if features.integrity < 1.0 {
        reasons.push("integrity concerns".to_string());
    }
    if features.evidence_confidence < 0.5 {
        reasons.push("thin evidence".to_string());
    }

    if reasons.is_empty() {
        format!(
            "interval {direction} at {:.1} days",
            features.adjusted_interval_days
        )
    } else {
        format!(
            "interval {direction} to {:.1} days ({})",
            features.adjusted_interval_days,
            reasons.join(", ")
        )
    }
}
