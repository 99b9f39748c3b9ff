use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Retention,
    Difficulty,
    Priority,
    Pace,
}

impl EngineKind {
    pub const ALL: [EngineKind; 4] = [
        Self::Retention,
        Self::Difficulty,
        Self::Priority,
        Self::Pace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retention => "retention",
            Self::Difficulty => "difficulty",
            Self::Priority => "priority",
            Self::Pace => "pace",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineVersion {
    V1,
    V2,
}

impl EngineVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V1 => "v1",
            Self::V2 => "v2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum Tier {
    #[default]
    Free,
    Premium,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Premium => "premium",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "premium" => Self::Premium,
            _ => Self::Free,
        }
    }
}

/// One graded topic test, as submitted. Counts are taken at face value:
/// `correct + wrong + blank` need not equal `total`, and engines divide by
/// `effective_total` instead of trusting either figure alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSample {
    pub correct: i32,
    pub wrong: i32,
    pub blank: i32,
    pub total: i32,
    pub duration_seconds: Option<f64>,
    pub difficulty_hint: i32,
    pub timestamp: DateTime<Utc>,
}

impl PerformanceSample {
    pub fn is_valid(&self) -> bool {
        self.total > 0
    }

    pub fn effective_total(&self) -> f64 {
        let answered = self.correct.max(0) + self.wrong.max(0) + self.blank.max(0);
        self.total.max(answered).max(1) as f64
    }

    pub fn correct_rate(&self) -> f64 {
        self.correct.max(0) as f64 / self.effective_total()
    }

    pub fn wrong_rate(&self) -> f64 {
        self.wrong.max(0) as f64 / self.effective_total()
    }

    pub fn blank_rate(&self) -> f64 {
        self.blank.max(0) as f64 / self.effective_total()
    }

    pub fn duration_minutes(&self) -> Option<f64> {
        self.duration_seconds.map(|s| s / 60.0)
    }

    pub fn clamped_hint(&self) -> i32 {
        self.difficulty_hint.clamp(1, 5)
    }
}

/// Spaced-repetition state for one (student, topic) pair. Mutated only by
/// the retention engine; the external store persists it between calls.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionState {
    pub ease_factor: f64,
    pub interval_days: f64,
    pub repetition_count: i32,
}

impl Default for RetentionState {
    fn default() -> Self {
        Self {
            ease_factor: 2.5,
            interval_days: 0.0,
            repetition_count: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[derive(Default)]
pub enum TopicArchetype {
    Foundational,
    Synthesis,
    ConceptBased,
    FormulaHeavy,
    ProblemSolving,
    #[default]
    Mixed,
}

impl TopicArchetype {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Foundational => "foundational",
            Self::Synthesis => "synthesis",
            Self::ConceptBased => "concept_based",
            Self::FormulaHeavy => "formula_heavy",
            Self::ProblemSolving => "problem_solving",
            Self::Mixed => "mixed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "foundational" => Self::Foundational,
            "synthesis" => Self::Synthesis,
            "concept_based" => Self::ConceptBased,
            "formula_heavy" => Self::FormulaHeavy,
            "problem_solving" => Self::ProblemSolving,
            _ => Self::Mixed,
        }
    }

    /// Review-interval bias: foundational topics can stretch a little,
    /// synthesis topics decay faster than their raw scores suggest.
    pub fn interval_factor(&self) -> f64 {
        match self {
            Self::Foundational => 1.05,
            Self::Synthesis => 0.95,
            _ => 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrerequisiteLink {
    pub topic_id: String,
    pub strength: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicContext {
    pub archetype: TopicArchetype,
    pub difficulty_baseline: f64,
    pub prerequisites: Vec<PrerequisiteLink>,
}

impl Default for TopicContext {
    fn default() -> Self {
        Self {
            archetype: TopicArchetype::Mixed,
            difficulty_baseline: 5.0,
            prerequisites: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum HistoryTrend {
    Improving,
    Declining,
    Stable,
    #[default]
    Unknown,
}

impl HistoryTrend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Improving => "improving",
            Self::Declining => "declining",
            Self::Stable => "stable",
            Self::Unknown => "unknown",
        }
    }
}

/// Per-student (optionally per-topic) history window.
/// `recent_success_rates` is most-recent-first and bounded by the fetch
/// window; `avg_success_rate` is on the 0-100 scale.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StudentHistory {
    pub test_count: i32,
    pub avg_success_rate: f64,
    pub trend: HistoryTrend,
    pub last_test_at: Option<DateTime<Utc>>,
    pub recent_success_rates: Vec<f64>,
    pub overdue_topics: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SegmentLevel {
    L1,
    L2,
    L3,
    L4,
    L5,
    L6,
    L7,
}

impl SegmentLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::L1 => "L1",
            Self::L2 => "L2",
            Self::L3 => "L3",
            Self::L4 => "L4",
            Self::L5 => "L5",
            Self::L6 => "L6",
            Self::L7 => "L7",
        }
    }

    pub fn rank(&self) -> u8 {
        match self {
            Self::L1 => 1,
            Self::L2 => 2,
            Self::L3 => 3,
            Self::L4 => 4,
            Self::L5 => 5,
            Self::L6 => 6,
            Self::L7 => 7,
        }
    }

    /// Lower of the two levels; caps can only ever demote.
    pub fn cap_at(self, ceiling: Self) -> Self {
        if self.rank() <= ceiling.rank() {
            self
        } else {
            ceiling
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    SuccessRate,
    SpeedConsistency,
    DifficultyProgression,
    RetentionHealth,
    TestFrequency,
}

impl SignalKind {
    pub const ALL: [SignalKind; 5] = [
        Self::SuccessRate,
        Self::SpeedConsistency,
        Self::DifficultyProgression,
        Self::RetentionHealth,
        Self::TestFrequency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SuccessRate => "success_rate",
            Self::SpeedConsistency => "speed_consistency",
            Self::DifficultyProgression => "difficulty_progression",
            Self::RetentionHealth => "retention_health",
            Self::TestFrequency => "test_frequency",
        }
    }
}

/// Classifier output. Recomputed on every call; never persisted here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub level: SegmentLevel,
    pub score: f64,
    pub confidence: f64,
    pub signals_used: Vec<SignalKind>,
    pub missing_signals: Vec<SignalKind>,
    pub cold_start: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineFeature {
    SegmentAdjustment,
    PrerequisiteCascade,
    CrossSubjectSynergy,
}

/// Resolved execution parameters for one (engine, tier, override) triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    pub version: EngineVersion,
    pub enabled_features: HashSet<EngineFeature>,
    pub timeout_ms: u64,
    pub fallback_enabled: bool,
}

/// The only shape engines and the wrapper hand back to callers. `data` is
/// always present and always inside the engine's declared range; degraded
/// quality shows up in the flags, never as a missing field.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope<T> {
    pub data: T,
    pub version_used: EngineVersion,
    pub fallback_used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    pub tier: Tier,
}

/// Payload of the data-access `log_execution` write.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub engine: EngineKind,
    pub version: EngineVersion,
    pub tier: Tier,
    pub duration_ms: u64,
    pub fallback_used: bool,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_total_prefers_larger_answer_sum() {
        let sample = PerformanceSample {
            correct: 6,
            wrong: 4,
            blank: 3,
            total: 10,
            duration_seconds: None,
            difficulty_hint: 3,
            timestamp: Utc::now(),
        };
        assert_eq!(sample.effective_total(), 13.0);
    }

    #[test]
    fn effective_total_never_zero() {
        let sample = PerformanceSample {
            correct: 0,
            wrong: 0,
            blank: 0,
            total: 0,
            duration_seconds: None,
            difficulty_hint: 1,
            timestamp: Utc::now(),
        };
        assert_eq!(sample.effective_total(), 1.0);
        assert!(!sample.is_valid());
    }

    #[test]
    fn segment_level_cap_only_lowers() {
        assert_eq!(SegmentLevel::L6.cap_at(SegmentLevel::L4), SegmentLevel::L4);
        assert_eq!(SegmentLevel::L2.cap_at(SegmentLevel::L4), SegmentLevel::L2);
    }

    #[test]
    fn archetype_round_trip() {
        for a in [
            TopicArchetype::Foundational,
            TopicArchetype::Synthesis,
            TopicArchetype::ConceptBased,
            TopicArchetype::FormulaHeavy,
            TopicArchetype::ProblemSolving,
            TopicArchetype::Mixed,
        ] {
            assert_eq!(TopicArchetype::parse(a.as_str()), a);
        }
    }
}
