use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::DataAccessError;
use crate::types::{ExecutionRecord, PrerequisiteLink, SignalKind, StudentHistory, TopicContext};

/// Read/write seam to the persistence layer, which lives outside this crate.
///
/// Every read is safe to fail: callers substitute a documented default and
/// flag the substitution. The one write, `log_execution`, must never block
/// scoring; failures are logged and swallowed by the caller.
///
/// `topic_metadata` returns archetype and baseline only; prerequisite links
/// come from `prerequisites` and are merged by the context provider.
#[async_trait]
pub trait DataAccess: Send + Sync {
    async fn topic_metadata(&self, topic_id: &str) -> Result<TopicContext, DataAccessError>;

    async fn prerequisites(&self, topic_id: &str)
        -> Result<Vec<PrerequisiteLink>, DataAccessError>;

    async fn student_history(
        &self,
        student_id: &str,
        topic_id: Option<&str>,
        days_back: u32,
    ) -> Result<StudentHistory, DataAccessError>;

    async fn student_signals(
        &self,
        student_id: &str,
        window_days: u32,
    ) -> Result<HashMap<SignalKind, f64>, DataAccessError>;

    async fn log_execution(&self, record: ExecutionRecord) -> Result<(), DataAccessError>;
}

/// Data access that has nothing to say. Every read misses, every write is
/// accepted and dropped. Used when the core runs without a backing store
/// (all engines degrade to defaults) and as a base for test doubles.
#[derive(Debug, Default, Clone)]
pub struct NullDataAccess;

#[async_trait]
impl DataAccess for NullDataAccess {
    async fn topic_metadata(&self, topic_id: &str) -> Result<TopicContext, DataAccessError> {
        Err(DataAccessError::NotFound(format!("topic {topic_id}")))
    }

    async fn prerequisites(
        &self,
        _topic_id: &str,
    ) -> Result<Vec<PrerequisiteLink>, DataAccessError> {
        Ok(Vec::new())
    }

    async fn student_history(
        &self,
        student_id: &str,
        _topic_id: Option<&str>,
        _days_back: u32,
    ) -> Result<StudentHistory, DataAccessError> {
        Err(DataAccessError::NotFound(format!("student {student_id}")))
    }

    async fn student_signals(
        &self,
        student_id: &str,
        _window_days: u32,
    ) -> Result<HashMap<SignalKind, f64>, DataAccessError> {
        Err(DataAccessError::NotFound(format!("signals for {student_id}")))
    }

    async fn log_execution(&self, _record: ExecutionRecord) -> Result<(), DataAccessError> {
        Ok(())
    }
}
