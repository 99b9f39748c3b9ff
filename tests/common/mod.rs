use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use studia_core::data_access::DataAccess;
use studia_core::error::DataAccessError;
use studia_core::types::{
    ExecutionRecord, HistoryTrend, PerformanceSample, PrerequisiteLink, SignalKind,
    StudentHistory, TopicArchetype, TopicContext,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("studia_core=debug")
        .with_test_writer()
        .try_init();
}

/// In-memory stand-in for the persistence layer. Reads resolve from maps,
/// `fail_reads` turns every read into a store failure, and execution log
/// writes are captured for assertions.
#[derive(Default)]
pub struct FakeStore {
    pub topics: HashMap<String, TopicContext>,
    pub prerequisites: HashMap<String, Vec<PrerequisiteLink>>,
    pub histories: HashMap<String, StudentHistory>,
    pub signals: HashMap<String, HashMap<SignalKind, f64>>,
    pub fail_reads: bool,
    pub fail_log_writes: bool,
    pub records: Mutex<Vec<ExecutionRecord>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store with one healthy premium student and one topic, enough for
    /// every v2 path to run.
    pub fn well_stocked() -> Self {
        let mut store = Self::new();
        store.topics.insert(
            "algebra".to_string(),
            TopicContext {
                archetype: TopicArchetype::Foundational,
                difficulty_baseline: 6.0,
                prerequisites: vec![PrerequisiteLink {
                    topic_id: "arithmetic".to_string(),
                    strength: 0.8,
                }],
            },
        );
        store.histories.insert(
            "maya".to_string(),
            StudentHistory {
                test_count: 12,
                avg_success_rate: 68.0,
                trend: HistoryTrend::Stable,
                last_test_at: None,
                recent_success_rates: vec![70.0, 66.0, 64.0],
                overdue_topics: 1,
            },
        );
        store.histories.insert(
            "maya:algebra".to_string(),
            StudentHistory {
                test_count: 6,
                avg_success_rate: 62.0,
                trend: HistoryTrend::Improving,
                last_test_at: None,
                recent_success_rates: vec![65.0, 60.0, 58.0],
                overdue_topics: 0,
            },
        );
        store.histories.insert(
            "maya:arithmetic".to_string(),
            StudentHistory {
                test_count: 9,
                avg_success_rate: 81.0,
                trend: HistoryTrend::Stable,
                last_test_at: None,
                recent_success_rates: vec![82.0, 80.0, 79.0],
                overdue_topics: 0,
            },
        );
        store.signals.insert("maya".to_string(), {
            let mut signals = HashMap::new();
            signals.insert(SignalKind::SuccessRate, 0.68);
            signals.insert(SignalKind::SpeedConsistency, 0.6);
            signals.insert(SignalKind::DifficultyProgression, 0.55);
            signals.insert(SignalKind::RetentionHealth, 0.6);
            signals.insert(SignalKind::TestFrequency, 0.5);
            signals
        });
        store
    }

    fn check(&self) -> Result<(), DataAccessError> {
        if self.fail_reads {
            Err(DataAccessError::Unavailable("store offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DataAccess for FakeStore {
    async fn topic_metadata(&self, topic_id: &str) -> Result<TopicContext, DataAccessError> {
        self.check()?;
        self.topics
            .get(topic_id)
            .cloned()
            .ok_or_else(|| DataAccessError::NotFound(format!("topic {topic_id}")))
    }

    async fn prerequisites(
        &self,
        topic_id: &str,
    ) -> Result<Vec<PrerequisiteLink>, DataAccessError> {
        self.check()?;
        Ok(self
            .prerequisites
            .get(topic_id)
            .cloned()
            .or_else(|| self.topics.get(topic_id).map(|t| t.prerequisites.clone()))
            .unwrap_or_default())
    }

    async fn student_history(
        &self,
        student_id: &str,
        topic_id: Option<&str>,
        _days_back: u32,
    ) -> Result<StudentHistory, DataAccessError> {
        self.check()?;
        let key = match topic_id {
            Some(topic) => format!("{student_id}:{topic}"),
            None => student_id.to_string(),
        };
        self.histories
            .get(&key)
            .cloned()
            .ok_or_else(|| DataAccessError::NotFound(format!("history {key}")))
    }

    async fn student_signals(
        &self,
        student_id: &str,
        _window_days: u32,
    ) -> Result<HashMap<SignalKind, f64>, DataAccessError> {
        self.check()?;
        self.signals
            .get(student_id)
            .cloned()
            .ok_or_else(|| DataAccessError::NotFound(format!("signals {student_id}")))
    }

    async fn log_execution(&self, record: ExecutionRecord) -> Result<(), DataAccessError> {
        if self.fail_log_writes {
            return Err(DataAccessError::Unavailable("log sink offline".to_string()));
        }
        self.records.lock().push(record);
        Ok(())
    }
}

pub fn sample(correct: i32, wrong: i32, blank: i32, total: i32) -> PerformanceSample {
    PerformanceSample {
        correct,
        wrong,
        blank,
        total,
        duration_seconds: Some(1_080.0),
        difficulty_hint: 3,
        timestamp: chrono::Utc::now(),
    }
}
