//! Adaptive scoring core for topic-based test prep: spaced-repetition
//! scheduling, personal difficulty, priority ranking and pace analysis,
//! each in a v1/v2 pair behind a version registry and a fallback-safe
//! execution wrapper. Transport and persistence live elsewhere; this crate
//! talks to them only through the [`data_access::DataAccess`] trait.

pub mod config;
pub mod context;
pub mod data_access;
pub mod engines;
pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod segment;
pub mod types;
pub mod wrapper;

pub use config::ScoringConfig;
pub use orchestrator::{Orchestrator, Submission, SubmissionOutcome};
pub use wrapper::ExecutionWrapper;
#[allow(unused_imports)]
pub use types::*;
