use serde::{Deserialize, Serialize};

use crate::types::{EngineVersion, SegmentLevel, SignalKind, Tier};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub default_ease: f64,
    pub min_ease: f64,
    pub max_ease: f64,
    pub new_hint_step: f64,
    pub hero_score_threshold: f64,
    pub hero_ease_bonus: f64,
    pub hero_interval_bonus: f64,
    pub reset_score_threshold: f64,
    pub reset_ease_drop: f64,
    pub normal_ease_gain: f64,
    pub v2_question_gate: i32,
    pub forget_rate_step: f64,
    pub forget_rate_floor: f64,
    pub forget_rate_ceiling: f64,
    pub default_forget_rate: f64,
    pub target_struggling: f64,
    pub target_advanced: f64,
    pub target_default: f64,
    pub evidence_count_weight: f64,
    pub evidence_recency_weight: f64,
    pub evidence_recency_halflife_days: f64,
    pub evidence_maturity_tests: f64,
    pub spike_ratio: f64,
    pub spike_integrity: f64,
    pub multi_anomaly_integrity: f64,
    pub low_integrity_growth_cap: f64,
    pub prerequisite_brake: f64,
    pub prerequisite_mastery_floor: f64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            default_ease: 2.5,
            min_ease: 1.3,
            max_ease: 2.5,
            new_hint_step: 0.1,
            hero_score_threshold: 0.7,
            hero_ease_bonus: 0.1,
            hero_interval_bonus: 1.2,
            reset_score_threshold: 0.35,
            reset_ease_drop: 0.2,
            normal_ease_gain: 0.15,
            v2_question_gate: 12,
            forget_rate_step: 0.03,
            forget_rate_floor: 0.01,
            forget_rate_ceiling: 0.20,
            default_forget_rate: 0.10,
            target_struggling: 0.90,
            target_advanced: 0.88,
            target_default: 0.80,
            evidence_count_weight: 0.6,
            evidence_recency_weight: 0.4,
            evidence_recency_halflife_days: 30.0,
            evidence_maturity_tests: 10.0,
            spike_ratio: 1.5,
            spike_integrity: 0.85,
            multi_anomaly_integrity: 0.70,
            low_integrity_growth_cap: 1.25,
            prerequisite_brake: 0.90,
            prerequisite_mastery_floor: 60.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DifficultyConfig {
    pub blank_weight: f64,
    pub wrong_weight: f64,
    pub volatility_weight: f64,
    pub misconception_weight: f64,
    pub misconception_cap: f64,
    pub misconception_min_wrong: f64,
    pub min_volatility_samples: usize,
    pub baseline_blend: f64,
    pub declining_trend_bump: f64,
    pub low_band: f64,
    pub medium_band: f64,
    pub high_band: f64,
}

impl Default for DifficultyConfig {
    fn default() -> Self {
        Self {
            blank_weight: 0.55,
            wrong_weight: 0.30,
            volatility_weight: 0.10,
            misconception_weight: 0.05,
            misconception_cap: 0.3,
            misconception_min_wrong: 0.3,
            min_volatility_samples: 3,
            baseline_blend: 0.15,
            declining_trend_bump: 5.0,
            low_band: 25.0,
            medium_band: 50.0,
            high_band: 75.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityConfig {
    pub blank_weight: f64,
    pub wrong_weight: f64,
    pub failure_weight: f64,
    pub gap_cap: f64,
    pub strategic_cap: f64,
    pub raw_cap: f64,
    pub slow_pace_ratio: f64,
    pub fast_pace_ratio: f64,
    pub fast_success_min: f64,
    pub slow_multiplier: f64,
    pub fast_multiplier: f64,
    pub low_band: f64,
    pub medium_band: f64,
    pub floor_guard_normalized: f64,
    pub absolute_floor: f64,
    pub floor_guard_cap: f64,
    pub critical_ratio: f64,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            blank_weight: 4.0,
            wrong_weight: 2.5,
            failure_weight: 1.5,
            gap_cap: 8.0,
            strategic_cap: 10.0,
            raw_cap: 10_000.0,
            slow_pace_ratio: 1.3,
            fast_pace_ratio: 0.7,
            fast_success_min: 0.8,
            slow_multiplier: 1.25,
            fast_multiplier: 0.8,
            low_band: 40.0,
            medium_band: 75.0,
            floor_guard_normalized: 70.0,
            absolute_floor: 15.0,
            floor_guard_cap: 45.0,
            critical_ratio: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaceConfig {
    pub ideal_minutes_per_question: f64,
    pub baseline_question_count: i32,
    pub min_questions: i32,
    pub max_questions: i32,
    pub soft_cap_minutes: f64,
    pub hard_cap_minutes: f64,
    pub fast_threshold: f64,
    pub slow_threshold: f64,
    pub fast_modifier: f64,
    pub slow_modifier: f64,
    pub fast_success_min: f64,
}

impl Default for PaceConfig {
    fn default() -> Self {
        Self {
            ideal_minutes_per_question: 1.5,
            baseline_question_count: 12,
            min_questions: 8,
            max_questions: 20,
            soft_cap_minutes: 25.0,
            hard_cap_minutes: 40.0,
            fast_threshold: 0.7,
            slow_threshold: 1.3,
            fast_modifier: 0.9,
            slow_modifier: 1.15,
            fast_success_min: 0.8,
        }
    }
}

/// Signal weights for the segment classifier. The sum is validated at
/// classifier construction; a mismatch is fatal, not a runtime fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalWeights {
    pub success_rate: f64,
    pub speed_consistency: f64,
    pub difficulty_progression: f64,
    pub retention_health: f64,
    pub test_frequency: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            success_rate: 0.35,
            speed_consistency: 0.20,
            difficulty_progression: 0.20,
            retention_health: 0.15,
            test_frequency: 0.10,
        }
    }
}

impl SignalWeights {
    pub fn sum(&self) -> f64 {
        self.success_rate
            + self.speed_consistency
            + self.difficulty_progression
            + self.retention_health
            + self.test_frequency
    }

    pub fn get(&self, kind: SignalKind) -> f64 {
        match kind {
            SignalKind::SuccessRate => self.success_rate,
            SignalKind::SpeedConsistency => self.speed_consistency,
            SignalKind::DifficultyProgression => self.difficulty_progression,
            SignalKind::RetentionHealth => self.retention_health,
            SignalKind::TestFrequency => self.test_frequency,
        }
    }
}

/// A cap that can only ever lower a computed level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LevelCap {
    pub max_level: SegmentLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentationConfig {
    pub weights: SignalWeights,
    /// Lower bound of each band above L1, ascending. L1 starts at 0.
    pub band_thresholds: [f64; 6],
    pub cold_start_min_tests: i32,
    pub cold_start_score: f64,
    pub cold_start_confidence: f64,
    pub overdue_cap_threshold: i32,
    pub overdue_cap: LevelCap,
    pub low_history_cap_threshold: i32,
    pub low_history_cap: LevelCap,
    pub base_confidence: f64,
    pub coverage_confidence_gain: f64,
    pub maturity_confidence_gain: f64,
    pub maturity_tests: f64,
    pub volatility_penalty: f64,
    pub volatility_threshold: f64,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            weights: SignalWeights::default(),
            band_thresholds: [25.0, 40.0, 55.0, 70.0, 80.0, 92.0],
            cold_start_min_tests: 3,
            cold_start_score: 20.0,
            cold_start_confidence: 0.3,
            overdue_cap_threshold: 5,
            overdue_cap: LevelCap {
                max_level: SegmentLevel::L4,
            },
            low_history_cap_threshold: 5,
            low_history_cap: LevelCap {
                max_level: SegmentLevel::L3,
            },
            base_confidence: 0.3,
            coverage_confidence_gain: 0.5,
            maturity_confidence_gain: 0.5,
            maturity_tests: 10.0,
            volatility_penalty: 0.85,
            volatility_threshold: 0.3,
        }
    }
}

/// Interval scaling per segment level, applied by the v2 retention engine.
/// Lower segments carry more forgetting risk and get shorter intervals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentRiskFactors {
    pub l1: f64,
    pub l2: f64,
    pub l3: f64,
    pub l4: f64,
    pub l5: f64,
    pub l6: f64,
    pub l7: f64,
}

impl Default for SegmentRiskFactors {
    fn default() -> Self {
        Self {
            l1: 0.80,
            l2: 0.90,
            l3: 0.95,
            l4: 1.00,
            l5: 1.05,
            l6: 1.10,
            l7: 1.15,
        }
    }
}

impl SegmentRiskFactors {
    pub fn factor(&self, level: SegmentLevel) -> f64 {
        match level {
            SegmentLevel::L1 => self.l1,
            SegmentLevel::L2 => self.l2,
            SegmentLevel::L3 => self.l3,
            SegmentLevel::L4 => self.l4,
            SegmentLevel::L5 => self.l5,
            SegmentLevel::L6 => self.l6,
            SegmentLevel::L7 => self.l7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    pub cache_ttl_seconds: u64,
    pub fetch_timeout_ms: u64,
    pub history_days_back: u32,
    pub signal_window_days: u32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: 300,
            fetch_timeout_ms: 1_500,
            history_days_back: 30,
            signal_window_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierPolicy {
    pub default_version: EngineVersion,
    pub timeout_ms: u64,
    pub fallback_enabled: bool,
}

/// Tier policies are optional so that a partially configured deployment is
/// detectable at resolution time instead of silently running defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub free: Option<TierPolicy>,
    pub premium: Option<TierPolicy>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            free: Some(TierPolicy {
                default_version: EngineVersion::V1,
                timeout_ms: 1_500,
                fallback_enabled: true,
            }),
            premium: Some(TierPolicy {
                default_version: EngineVersion::V2,
                timeout_ms: 2_000,
                fallback_enabled: true,
            }),
        }
    }
}

impl RegistryConfig {
    pub fn policy(&self, tier: Tier) -> Option<&TierPolicy> {
        match tier {
            Tier::Free => self.free.as_ref(),
            Tier::Premium => self.premium.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct FeatureFlags {
    // Both detectors ship dark until the mastery store lands.
    pub prerequisite_cascade_enabled: bool,
    pub cross_subject_synergy_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScoringConfig {
    pub retention: RetentionConfig,
    pub difficulty: DifficultyConfig,
    pub priority: PriorityConfig,
    pub pace: PaceConfig,
    pub segmentation: SegmentationConfig,
    pub risk_factors: SegmentRiskFactors,
    pub context: ContextConfig,
    pub registry: RegistryConfig,
    pub feature_flags: FeatureFlags,
}

impl ScoringConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("SCORING_CASCADE_ENABLED") {
            config.feature_flags.prerequisite_cascade_enabled = val.parse().unwrap_or(false);
        }
        if let Ok(val) = std::env::var("SCORING_SYNERGY_ENABLED") {
            config.feature_flags.cross_subject_synergy_enabled = val.parse().unwrap_or(false);
        }
        if let Ok(val) = std::env::var("SCORING_CONTEXT_TTL_SECONDS") {
            if let Ok(ttl) = val.parse() {
                config.context.cache_ttl_seconds = ttl;
            }
        }
        if let Ok(val) = std::env::var("SCORING_FETCH_TIMEOUT_MS") {
            if let Ok(timeout) = val.parse() {
                config.context.fetch_timeout_ms = timeout;
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_sum_to_one() {
        let weights = SignalWeights::default();
        assert!((weights.sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn band_thresholds_ascending() {
        let config = SegmentationConfig::default();
        for pair in config.band_thresholds.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn risk_factors_monotonic() {
        let rf = SegmentRiskFactors::default();
        let ordered = [rf.l1, rf.l2, rf.l3, rf.l4, rf.l5, rf.l6, rf.l7];
        for pair in ordered.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }
}
