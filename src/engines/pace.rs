use serde::{Deserialize, Serialize};

use crate::config::PaceConfig;
use crate::engines::shared::clamp_score;
use crate::error::EngineError;
use crate::types::{Segment, StudentHistory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaceBand {
    Fast,
    Normal,
    Slow,
}

impl PaceBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "FAST",
            Self::Normal => "NORMAL",
            Self::Slow => "SLOW",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PaceInput {
    pub duration_minutes: f64,
    pub question_count: i32,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaceOutcome {
    pub band: PaceBand,
    pub pace_ratio: f64,
    pub modifier: f64,
    pub ideal_minutes: f64,
    pub careless: bool,
    pub duration_clipped: bool,
    pub neutral: bool,
    pub explanation: String,
}

/// Compares working time against the ideal for the question count. Absurd
/// durations are capped before the ratio so that a forgotten-open tab or a
/// deliberately padded timer cannot drag the modifier.
pub fn evaluate_v1(input: &PaceInput, cfg: &PaceConfig) -> PaceOutcome {
    let questions = input.question_count;
    if questions < cfg.min_questions
        || questions > cfg.max_questions
        || input.duration_minutes <= 0.0
    {
        return PaceOutcome {
            band: PaceBand::Normal,
            pace_ratio: 1.0,
            modifier: 1.0,
            ideal_minutes: cfg.baseline_question_count as f64 * cfg.ideal_minutes_per_question,
            careless: false,
            duration_clipped: false,
            neutral: true,
            explanation: "unusual test shape, pace not scored".to_string(),
        };
    }

    let ideal = questions as f64 * cfg.ideal_minutes_per_question;
    let clipped = input.duration_minutes > cfg.hard_cap_minutes;
    let capped = input.duration_minutes.min(cfg.hard_cap_minutes);
    // Minutes past the soft cap count half; the tail of a long session says
    // less about pace than its start.
    let effective = if capped <= cfg.soft_cap_minutes {
        capped
    } else {
        cfg.soft_cap_minutes + (capped - cfg.soft_cap_minutes) * 0.5
    };
    let ratio = effective / ideal;

    let (band, modifier, careless) = if ratio < cfg.fast_threshold {
        if input.success_rate >= cfg.fast_success_min {
            (PaceBand::Fast, cfg.fast_modifier, false)
        } else {
            (PaceBand::Fast, 1.0, true)
        }
    } else if ratio > cfg.slow_threshold {
        (PaceBand::Slow, cfg.slow_modifier, false)
    } else {
        (PaceBand::Normal, 1.0, false)
    };

    let explanation = match (band, careless) {
        (PaceBand::Fast, true) => "rushing with mistakes".to_string(),
        (PaceBand::Fast, false) => "fast and accurate".to_string(),
        (PaceBand::Slow, _) => format!("{:.0}% over the expected time", (ratio - 1.0) * 100.0),
        (PaceBand::Normal, _) => "steady pace".to_string(),
    };

    PaceOutcome {
        band,
        pace_ratio: ratio,
        modifier,
        ideal_minutes: ideal,
        careless,
        duration_clipped: clipped,
        neutral: false,
        explanation,
    }
}

/// Scales a difficulty score by the pace modifier, staying inside [0, 100].
pub fn apply_to_difficulty(base: f64, modifier: f64) -> f64 {
    clamp_score(base * modifier)
}

#[derive(Debug, Clone)]
pub struct PaceEnrichment {
    pub history: StudentHistory,
    pub segment: Segment,
    pub history_defaulted: bool,
    /// Average days between this student's tests (cadence).
    pub avg_days_between_tests: Option<f64>,
    /// Average working speed across recent tests (minutes per question).
    pub avg_minutes_per_question: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaceAdvice {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_days_between_tests: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_minutes_per_question: Option<f64>,
    pub segment_level: crate::types::SegmentLevel,
    pub advice: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaceReport {
    pub band: PaceBand,
    pub pace_ratio: f64,
    pub modifier: f64,
    pub explanation: String,
    pub base: PaceOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advice: Option<PaceAdvice>,
}

impl PaceReport {
    pub fn from_v1(outcome: PaceOutcome) -> Self {
        Self {
            band: outcome.band,
            pace_ratio: outcome.pace_ratio,
            modifier: outcome.modifier,
            explanation: outcome.explanation.clone(),
            base: outcome,
            advice: None,
        }
    }
}

/// Adds history-aware advice on top of the v1 verdict. Cadence and working
/// speed are deliberately separate fields; they answer different questions
/// and must not share a column.
pub fn evaluate_v2(
    input: &PaceInput,
    enrichment: &PaceEnrichment,
    cfg: &PaceConfig,
) -> Result<PaceReport, EngineError> {
    if enrichment
        .avg_minutes_per_question
        .is_some_and(|m| !m.is_finite())
    {
        return Err(EngineError::InvalidEnrichment(
            "average minutes per question is not finite".to_string(),
        ));
    }

    let base = evaluate_v1(input, cfg);
    let advice = build_advice(&base, enrichment);

    Ok(PaceReport {
        band: base.band,
        pace_ratio: base.pace_ratio,
        modifier: base.modifier,
        explanation: base.explanation.clone(),
        base,
        advice: Some(advice),
    })
}

fn build_advice(outcome: &PaceOutcome, enrichment: &PaceEnrichment) -> PaceAdvice {
    let struggling = enrichment.segment.level.rank() <= 2;

    let advice = if outcome.duration_clipped {
        "session ran far past the cap; pace was judged on the capped time".to_string()
    } else if outcome.careless {
        if struggling {
            "slow down a little; accuracy first, speed later".to_string()
        } else {
            "fast but sloppy; a short check pass would pay off".to_string()
        }
    } else {
        match outcome.band {
            PaceBand::Fast => "strong speed with accuracy to match".to_string(),
            PaceBand::Slow => match enrichment.avg_minutes_per_question {
                Some(avg) if avg > 2.0 => {
                    "consistently slow across topics; consider shorter timed drills".to_string()
                }
                _ => "slower than usual on this topic".to_string(),
            },
            PaceBand::Normal => match enrichment.avg_days_between_tests {
                Some(gap) if gap > 7.0 => {
                    "pace is healthy; testing more often would keep it that way".to_string()
                }
                _ => "pace is healthy".to_string(),
            },
        }
    };

    PaceAdvice {
        avg_days_between_tests: enrichment.avg_days_between_tests,
        avg_minutes_per_question: enrichment.avg_minutes_per_question,
        segment_level: enrichment.segment.level,
        advice,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> PaceConfig {
        PaceConfig::default()
    }

    #[test]
    fn fast_and_successful_earns_discount() {
        let outcome = evaluate_v1(
            &PaceInput {
                duration_minutes: 10.0,
                question_count: 12,
                success_rate: 0.9,
            },
            &cfg(),
        );
        assert_eq!(outcome.band, PaceBand::Fast);
        assert!((outcome.pace_ratio - 10.0 / 18.0).abs() < 1e-9);
        assert_eq!(outcome.modifier, 0.9);
        assert!(!outcome.careless);
    }

    #[test]
    fn fast_but_sloppy_is_flagged_not_rewarded() {
        let outcome = evaluate_v1(
            &PaceInput {
                duration_minutes: 10.0,
                question_count: 12,
                success_rate: 0.5,
            },
            &cfg(),
        );
        assert_eq!(outcome.band, PaceBand::Fast);
        assert_eq!(outcome.modifier, 1.0);
        assert!(outcome.careless);
    }

    #[test]
    fn slow_session_raises_modifier() {
        let outcome = evaluate_v1(
            &PaceInput {
                duration_minutes: 24.0,
                question_count: 12,
                success_rate: 0.7,
            },
            &cfg(),
        );
        assert_eq!(outcome.band, PaceBand::Slow);
        assert_eq!(outcome.modifier, 1.15);
    }

    #[test]
    fn absurd_duration_is_capped_before_ratio() {
        let outcome = evaluate_v1(
            &PaceInput {
                duration_minutes: 300.0,
                question_count: 12,
                success_rate: 0.7,
            },
            &cfg(),
        );
        assert!(outcome.duration_clipped);
        // 300 min caps to 40, soft-compresses to 32.5: ratio stays sane.
        assert!((outcome.pace_ratio - 32.5 / 18.0).abs() < 1e-9);
    }

    #[test]
    fn odd_question_counts_are_neutral() {
        for questions in [5, 25, 0, -3] {
            let outcome = evaluate_v1(
                &PaceInput {
                    duration_minutes: 15.0,
                    question_count: questions,
                    success_rate: 0.7,
                },
                &cfg(),
            );
            assert!(outcome.neutral, "questions={questions}");
            assert_eq!(outcome.pace_ratio, 1.0);
            assert_eq!(outcome.modifier, 1.0);
        }
    }

    #[test]
    fn non_positive_duration_is_neutral() {
        let outcome = evaluate_v1(
            &PaceInput {
                duration_minutes: 0.0,
                question_count: 12,
                success_rate: 0.7,
            },
            &cfg(),
        );
        assert!(outcome.neutral);
    }

    #[test]
    fn modifier_application_stays_in_range() {
        assert_eq!(apply_to_difficulty(95.0, 1.15), 100.0);
        assert!((apply_to_difficulty(50.0, 0.9) - 45.0).abs() < 1e-9);
        assert_eq!(apply_to_difficulty(0.0, 1.15), 0.0);
    }

    #[test]
    fn v2_separates_cadence_from_speed() {
        let input = PaceInput {
            duration_minutes: 24.0,
            question_count: 12,
            success_rate: 0.7,
        };
        let enrichment = PaceEnrichment {
            history: StudentHistory::default(),
            segment: Segment {
                level: crate::types::SegmentLevel::L4,
                score: 60.0,
                confidence: 0.7,
                signals_used: Vec::new(),
                missing_signals: Vec::new(),
                cold_start: false,
            },
            history_defaulted: false,
            avg_days_between_tests: Some(9.0),
            avg_minutes_per_question: Some(2.4),
        };
        let report = evaluate_v2(&input, &enrichment, &cfg()).unwrap();
        let advice = report.advice.unwrap();
        assert_eq!(advice.avg_days_between_tests, Some(9.0));
        assert_eq!(advice.avg_minutes_per_question, Some(2.4));
        assert_eq!(report.base.band, PaceBand::Slow);
        assert!(advice.advice.contains("slow"));
    }
}
