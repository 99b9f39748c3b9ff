use std::collections::HashMap;

use crate::config::SegmentationConfig;
use crate::error::ConfigError;
use crate::types::{Segment, SegmentLevel, SignalKind};

/// Everything the classifier looks at for one call.
#[derive(Debug, Clone, Default)]
pub struct SegmentInput {
    pub signals: HashMap<SignalKind, f64>,
    pub test_count: i32,
    pub overdue_count: i32,
}

/// Deterministic weighted classifier mapping behavioral signals to a skill
/// level L1-L7. Construction validates the weight table; everything after
/// that is infallible.
pub struct SegmentClassifier {
    config: SegmentationConfig,
}

impl SegmentClassifier {
    /// Fails fast on a weight table that does not sum to 1.0 or bands that
    /// are out of order; a bad table would silently corrupt every score.
    pub fn new(config: SegmentationConfig) -> Result<Self, ConfigError> {
        let sum = config.weights.sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(ConfigError::WeightSum { actual: sum });
        }
        for (index, pair) in config.band_thresholds.windows(2).enumerate() {
            if pair[0] >= pair[1] {
                return Err(ConfigError::UnsortedBands { index: index + 1 });
            }
        }
        Ok(Self { config })
    }

    pub fn classify(&self, input: &SegmentInput) -> Segment {
        let cfg = &self.config;

        if input.test_count < cfg.cold_start_min_tests {
            return Segment {
                level: SegmentLevel::L1,
                score: cfg.cold_start_score,
                confidence: cfg.cold_start_confidence,
                signals_used: Vec::new(),
                missing_signals: SignalKind::ALL.to_vec(),
                cold_start: true,
            };
        }

        let mut weighted = 0.0;
        let mut weight_present = 0.0;
        let mut signals_used = Vec::new();
        let mut missing_signals = Vec::new();

        for kind in SignalKind::ALL {
            match input.signals.get(&kind) {
                Some(raw) => {
                    let weight = cfg.weights.get(kind);
                    weighted += weight * raw.clamp(0.0, 1.0);
                    weight_present += weight;
                    signals_used.push(kind);
                }
                None => missing_signals.push(kind),
            }
        }

        // Missing signals drop out of the denominator entirely. Zero-filling
        // them would punish data gaps as if they were bad performance.
        let score = if weight_present > 0.0 {
            (100.0 * weighted / weight_present).clamp(0.0, 100.0)
        } else {
            cfg.cold_start_score
        };

        let mut level = self.level_for(score);
        if input.overdue_count >= cfg.overdue_cap_threshold {
            level = level.cap_at(cfg.overdue_cap.max_level);
        }
        if input.test_count < cfg.low_history_cap_threshold {
            level = level.cap_at(cfg.low_history_cap.max_level);
        }

        let confidence = self.confidence_for(input, weight_present);

        Segment {
            level,
            score,
            confidence,
            signals_used,
            missing_signals,
            cold_start: false,
        }
    }

    fn level_for(&self, score: f64) -> SegmentLevel {
        let t = &self.config.band_thresholds;
        if score < t[0] {
            SegmentLevel::L1
        } else if score < t[1] {
            SegmentLevel::L2
        } else if score < t[2] {
            SegmentLevel::L3
        } else if score < t[3] {
            SegmentLevel::L4
        } else if score < t[4] {
            SegmentLevel::L5
        } else if score < t[5] {
            SegmentLevel::L6
        } else {
            SegmentLevel::L7
        }
    }

    fn confidence_for(&self, input: &SegmentInput, weight_present: f64) -> f64 {
        let cfg = &self.config;

        let coverage = weight_present.clamp(0.0, 1.0);
        let maturity = (input.test_count as f64 / cfg.maturity_tests).min(1.0);

        let mut confidence = cfg.base_confidence
            + cfg.coverage_confidence_gain * coverage
            + cfg.maturity_confidence_gain * maturity;
        confidence = confidence.min(1.0);

        if let Some(speed) = input.signals.get(&SignalKind::SpeedConsistency) {
            if *speed < cfg.volatility_threshold {
                confidence *= cfg.volatility_penalty;
            }
        }

        confidence.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_signals(value: f64) -> HashMap<SignalKind, f64> {
        SignalKind::ALL.iter().map(|k| (*k, value)).collect()
    }

    fn classifier() -> SegmentClassifier {
        SegmentClassifier::new(SegmentationConfig::default()).unwrap()
    }

    #[test]
    fn perturbed_weights_fail_construction() {
        let mut config = SegmentationConfig::default();
        config.weights.success_rate = 0.5;
        assert!(matches!(
            SegmentClassifier::new(config),
            Err(ConfigError::WeightSum { .. })
        ));
    }

    #[test]
    fn cold_start_ignores_signals() {
        let input = SegmentInput {
            signals: full_signals(1.0),
            test_count: 1,
            overdue_count: 0,
        };
        let segment = classifier().classify(&input);
        assert_eq!(segment.level, SegmentLevel::L1);
        assert_eq!(segment.score, 20.0);
        assert_eq!(segment.confidence, 0.3);
        assert!(segment.cold_start);
    }

    #[test]
    fn strong_signals_reach_top_band() {
        let input = SegmentInput {
            signals: full_signals(0.95),
            test_count: 40,
            overdue_count: 0,
        };
        let segment = classifier().classify(&input);
        assert_eq!(segment.level, SegmentLevel::L7);
        assert!((segment.score - 95.0).abs() < 1e-9);
    }

    #[test]
    fn missing_signals_renormalize() {
        let mut signals = HashMap::new();
        signals.insert(SignalKind::SuccessRate, 0.8);
        signals.insert(SignalKind::SpeedConsistency, 0.8);
        let input = SegmentInput {
            signals,
            test_count: 20,
            overdue_count: 0,
        };
        let segment = classifier().classify(&input);
        // Two present signals at 0.8 must score exactly 80, not be dragged
        // down by the three missing ones.
        assert!((segment.score - 80.0).abs() < 1e-9);
        assert_eq!(segment.missing_signals.len(), 3);
    }

    #[test]
    fn overdue_cap_only_lowers() {
        let input = SegmentInput {
            signals: full_signals(0.95),
            test_count: 40,
            overdue_count: 6,
        };
        let segment = classifier().classify(&input);
        assert_eq!(segment.level, SegmentLevel::L4);

        let weak = SegmentInput {
            signals: full_signals(0.1),
            test_count: 40,
            overdue_count: 6,
        };
        let segment = classifier().classify(&weak);
        assert_eq!(segment.level, SegmentLevel::L1);
    }

    #[test]
    fn low_history_caps_at_l3() {
        let input = SegmentInput {
            signals: full_signals(0.95),
            test_count: 4,
            overdue_count: 0,
        };
        let segment = classifier().classify(&input);
        assert_eq!(segment.level, SegmentLevel::L3);
    }

    #[test]
    fn volatility_penalty_applies() {
        let mut signals = full_signals(0.6);
        signals.insert(SignalKind::SpeedConsistency, 0.1);
        let steady = SegmentInput {
            signals: full_signals(0.6),
            test_count: 20,
            overdue_count: 0,
        };
        let shaky = SegmentInput {
            signals,
            test_count: 20,
            overdue_count: 0,
        };
        let c = classifier();
        assert!(c.classify(&shaky).confidence < c.classify(&steady).confidence);
    }
}
