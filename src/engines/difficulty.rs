use serde::{Deserialize, Serialize};

use crate::config::DifficultyConfig;
use crate::engines::shared::{clamp01, clamp_score, std_dev, weighted_sum};
use crate::error::EngineError;
use crate::types::{HistoryTrend, PerformanceSample, Segment, StudentHistory, TopicContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DifficultyBand {
    Low,
    Medium,
    High,
    Critical,
}

impl DifficultyBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DifficultyInput {
    pub sample: PerformanceSample,
    /// Recent success rates (0-100, most recent first) if the caller has
    /// them; v1 computes volatility only from this slice.
    pub recent_success_rates: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DifficultyComponents {
    pub blank_rate: f64,
    pub wrong_rate: f64,
    pub volatility: f64,
    pub misconception: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DifficultyOutcome {
    pub score: f64,
    pub band: DifficultyBand,
    pub components: DifficultyComponents,
    pub neutral: bool,
    pub explanation: String,
}

/// Personal difficulty of a topic from one sample: how much of the struggle
/// is "left blank" versus "answered wrong", with small volatility and
/// misconception terms. Pure and idempotent.
pub fn evaluate_v1(input: &DifficultyInput, cfg: &DifficultyConfig) -> DifficultyOutcome {
    let sample = &input.sample;

    if !sample.is_valid() {
        return DifficultyOutcome {
            score: 50.0,
            band: DifficultyBand::Medium,
            components: DifficultyComponents {
                blank_rate: 0.0,
                wrong_rate: 0.0,
                volatility: 0.0,
                misconception: 0.0,
            },
            neutral: true,
            explanation: "empty test, difficulty unknown".to_string(),
        };
    }

    let blank_rate = sample.blank_rate();
    let wrong_rate = sample.wrong_rate();
    let volatility = volatility_term(input.recent_success_rates.as_deref(), cfg);
    let misconception = misconception_term(wrong_rate, blank_rate, cfg);

    let score = clamp_score(
        100.0
            * clamp01(weighted_sum(&[
                (cfg.blank_weight, blank_rate),
                (cfg.wrong_weight, wrong_rate),
                (cfg.volatility_weight, volatility),
                (cfg.misconception_weight, misconception),
            ])),
    );
    let band = band_for(score, cfg);

    DifficultyOutcome {
        score,
        band,
        components: DifficultyComponents {
            blank_rate,
            wrong_rate,
            volatility,
            misconception,
        },
        neutral: false,
        explanation: explain(band, blank_rate, wrong_rate, misconception),
    }
}

fn volatility_term(recent: Option<&[f64]>, cfg: &DifficultyConfig) -> f64 {
    match recent {
        Some(rates) if rates.len() >= cfg.min_volatility_samples => {
            // Rates arrive on the 0-100 scale; the deviation contributes on 0-1.
            clamp01(std_dev(rates) / 100.0 * 2.0)
        }
        _ => 0.0,
    }
}

fn misconception_term(wrong_rate: f64, blank_rate: f64, cfg: &DifficultyConfig) -> f64 {
    if wrong_rate > blank_rate && wrong_rate > cfg.misconception_min_wrong {
        (wrong_rate - blank_rate).max(0.0).min(cfg.misconception_cap)
    } else {
        0.0
    }
}

fn band_for(score: f64, cfg: &DifficultyConfig) -> DifficultyBand {
    if score < cfg.low_band {
        DifficultyBand::Low
    } else if score < cfg.medium_band {
        DifficultyBand::Medium
    } else if score < cfg.high_band {
        DifficultyBand::High
    } else {
        DifficultyBand::Critical
    }
}

fn explain(
    band: DifficultyBand,
    blank_rate: f64,
    wrong_rate: f64,
    misconception: f64,
) -> String {
    let driver = if misconception > 0.0 {
        "wrong answers outpace blanks, likely misconception"
    } else if blank_rate > wrong_rate {
        "mostly left blank"
    } else if wrong_rate > 0.0 {
        "mostly answered wrong"
    } else {
        "handled cleanly"
    };
    format!("{} difficulty, {driver}", band.as_str())
}

#[derive(Debug, Clone)]
pub struct DifficultyEnrichment {
    pub topic: TopicContext,
    pub history: StudentHistory,
    pub segment: Segment,
    pub context_defaulted: bool,
    pub history_defaulted: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DifficultyAdjustment {
    pub adjusted_score: f64,
    pub adjusted_band: DifficultyBand,
    pub baseline: f64,
    pub trend_bump: f64,
    pub segment_level: crate::types::SegmentLevel,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DifficultyReport {
    pub score: f64,
    pub band: DifficultyBand,
    pub explanation: String,
    pub base: DifficultyOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjustment: Option<DifficultyAdjustment>,
}

impl DifficultyReport {
    pub fn from_v1(outcome: DifficultyOutcome) -> Self {
        Self {
            score: outcome.score,
            band: outcome.band,
            explanation: outcome.explanation.clone(),
            base: outcome,
            adjustment: None,
        }
    }
}

/// Enriched pass: volatility sourced from history, the score blended toward
/// the topic's curriculum baseline, and a small bump while the student's
/// trend is declining. The embedded v1 outcome stays untouched.
pub fn evaluate_v2(
    input: &DifficultyInput,
    enrichment: &DifficultyEnrichment,
    cfg: &DifficultyConfig,
) -> Result<DifficultyReport, EngineError> {
    let baseline = enrichment.topic.difficulty_baseline;
    if !(0.0..=10.0).contains(&baseline) {
        return Err(EngineError::InvalidEnrichment(format!(
            "difficulty baseline {baseline} out of range"
        )));
    }

    let base = evaluate_v1(input, cfg);

    let enriched_input = DifficultyInput {
        sample: input.sample.clone(),
        recent_success_rates: input
            .recent_success_rates
            .clone()
            .or_else(|| Some(enrichment.history.recent_success_rates.clone())),
    };
    let enriched = evaluate_v1(&enriched_input, cfg);

    let trend_bump = if enrichment.history.trend == HistoryTrend::Declining {
        cfg.declining_trend_bump
    } else {
        0.0
    };
    let adjusted_score = clamp_score(
        (1.0 - cfg.baseline_blend) * enriched.score + cfg.baseline_blend * (baseline * 10.0)
            + trend_bump,
    );
    let adjusted_band = band_for(adjusted_score, cfg);

    let explanation = format!(
        "{} for this student ({}; segment {})",
        adjusted_band.as_str(),
        enriched.explanation,
        enrichment.segment.level.as_str()
    );

    Ok(DifficultyReport {
        score: adjusted_score,
        band: adjusted_band,
        explanation,
        base,
        adjustment: Some(DifficultyAdjustment {
            adjusted_score,
            adjusted_band,
            baseline,
            trend_bump,
            segment_level: enrichment.segment.level,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sample(correct: i32, wrong: i32, blank: i32, total: i32) -> PerformanceSample {
        PerformanceSample {
            correct,
            wrong,
            blank,
            total,
            duration_seconds: None,
            difficulty_hint: 3,
            timestamp: Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap(),
        }
    }

    #[test]
    fn blank_heavy_test_reads_harder_than_wrong_heavy() {
        let cfg = DifficultyConfig::default();
        let blanks = evaluate_v1(
            &DifficultyInput {
                sample: sample(4, 0, 8, 12),
                recent_success_rates: None,
            },
            &cfg,
        );
        let wrongs = evaluate_v1(
            &DifficultyInput {
                sample: sample(4, 8, 0, 12),
                recent_success_rates: None,
            },
            &cfg,
        );
        assert!(blanks.score > wrongs.score);
    }

    #[test]
    fn misconception_needs_dominant_wrong_rate() {
        let cfg = DifficultyConfig::default();
        let flagged = evaluate_v1(
            &DifficultyInput {
                sample: sample(5, 6, 1, 12),
                recent_success_rates: None,
            },
            &cfg,
        );
        assert!(flagged.components.misconception > 0.0);

        let quiet = evaluate_v1(
            &DifficultyInput {
                sample: sample(9, 2, 1, 12),
                recent_success_rates: None,
            },
            &cfg,
        );
        assert_eq!(quiet.components.misconception, 0.0);
    }

    #[test]
    fn volatility_requires_three_samples() {
        let cfg = DifficultyConfig::default();
        let short = evaluate_v1(
            &DifficultyInput {
                sample: sample(6, 3, 3, 12),
                recent_success_rates: Some(vec![80.0, 20.0]),
            },
            &cfg,
        );
        assert_eq!(short.components.volatility, 0.0);

        let enough = evaluate_v1(
            &DifficultyInput {
                sample: sample(6, 3, 3, 12),
                recent_success_rates: Some(vec![80.0, 20.0, 60.0]),
            },
            &cfg,
        );
        assert!(enough.components.volatility > 0.0);
    }

    #[test]
    fn identical_samples_score_identically() {
        let cfg = DifficultyConfig::default();
        let input = DifficultyInput {
            sample: sample(5, 4, 3, 12),
            recent_success_rates: Some(vec![50.0, 60.0, 40.0]),
        };
        let a = evaluate_v1(&input, &cfg);
        let b = evaluate_v1(&input, &cfg);
        assert_eq!(a.score, b.score);
        assert_eq!(a.band, b.band);
    }

    #[test]
    fn empty_test_is_neutral_medium() {
        let cfg = DifficultyConfig::default();
        let outcome = evaluate_v1(
            &DifficultyInput {
                sample: sample(0, 0, 0, 0),
                recent_success_rates: None,
            },
            &cfg,
        );
        assert!(outcome.neutral);
        assert_eq!(outcome.score, 50.0);
        assert_eq!(outcome.band, DifficultyBand::Medium);
    }

    #[test]
    fn v2_blends_toward_baseline_and_keeps_v1() {
        let cfg = DifficultyConfig::default();
        let input = DifficultyInput {
            sample: sample(3, 3, 6, 12),
            recent_success_rates: None,
        };
        let enrichment = DifficultyEnrichment {
            topic: TopicContext {
                difficulty_baseline: 9.0,
                ..Default::default()
            },
            history: StudentHistory::default(),
            segment: Segment {
                level: crate::types::SegmentLevel::L3,
                score: 45.0,
                confidence: 0.7,
                signals_used: Vec::new(),
                missing_signals: Vec::new(),
                cold_start: false,
            },
            context_defaulted: false,
            history_defaulted: false,
        };
        let report = evaluate_v2(&input, &enrichment, &cfg).unwrap();
        let v1 = evaluate_v1(&input, &cfg);
        assert_eq!(report.base.score, v1.score);
        assert!(report.score > v1.score); // pulled up toward baseline 90
    }

    #[test]
    fn v2_rejects_out_of_range_baseline() {
        let cfg = DifficultyConfig::default();
        let input = DifficultyInput {
            sample: sample(6, 3, 3, 12),
            recent_success_rates: None,
        };
        let enrichment = DifficultyEnrichment {
            topic: TopicContext {
                difficulty_baseline: 42.0,
                ..Default::default()
            },
            history: StudentHistory::default(),
            segment: Segment {
                level: crate::types::SegmentLevel::L3,
                score: 45.0,
                confidence: 0.7,
                signals_used: Vec::new(),
                missing_signals: Vec::new(),
                cold_start: false,
            },
            context_defaulted: false,
            history_defaulted: false,
        };
        assert!(evaluate_v2(&input, &enrichment, &cfg).is_err());
    }
}
