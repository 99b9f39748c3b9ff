use crate::types::{EngineKind, Tier};

/// Failure inside a scoring engine version. The execution wrapper converts
/// these into a v1 retry; they never reach the routing layer.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("context unavailable: {0}")]
    ContextUnavailable(String),

    #[error("student segment unavailable: {0}")]
    SegmentUnavailable(String),

    #[error("enrichment data invalid: {0}")]
    InvalidEnrichment(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DataAccessError {
    #[error("backing store unavailable: {0}")]
    Unavailable(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("fetch timed out after {0}ms")]
    Timeout(u64),
}

/// The only fatal error in this crate. A weight table that does not sum to
/// 1.0 would silently corrupt every segment score, so construction refuses it.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("segment signal weights must sum to 1.0, got {actual:.4}")]
    WeightSum { actual: f64 },

    #[error("segment bands must be sorted ascending, band {index} is not")]
    UnsortedBands { index: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("no tier policy configured for {tier:?} / {engine:?}")]
    MissingTierPolicy { tier: Tier, engine: EngineKind },
}
