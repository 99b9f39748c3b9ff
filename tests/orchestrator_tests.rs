//! End-to-end submission flow: one graded test through all four engines,
//! with partial degradation instead of hard failure.

mod common;

use std::sync::Arc;

use common::{sample, FakeStore};
use studia_core::config::ScoringConfig;
use studia_core::engines::priority::TopicPerformance;
use studia_core::orchestrator::{Orchestrator, Submission};
use studia_core::types::{EngineKind, EngineVersion, RetentionState, Tier};

fn submission(tier: Tier) -> Submission {
    Submission {
        student_id: "maya".to_string(),
        topic_id: "algebra".to_string(),
        tier,
        sample: sample(8, 2, 2, 12),
        retention_state: Some(RetentionState {
            ease_factor: 2.0,
            interval_days: 4.0,
            repetition_count: 3,
        }),
        days_since_last_review: Some(3.0),
        prior_forgetting_rate: Some(0.08),
        topic_weight: 2.0,
        course_importance: 1.5,
    }
}

fn orchestrator(store: FakeStore) -> Orchestrator {
    Orchestrator::from_config(ScoringConfig::default(), Arc::new(store)).unwrap()
}

#[tokio::test]
async fn premium_submission_scores_all_four_engines() {
    common::init_tracing();
    let outcome = orchestrator(FakeStore::well_stocked())
        .process_submission(submission(Tier::Premium))
        .await;

    assert_eq!(outcome.retention.version_used, EngineVersion::V2);
    assert_eq!(outcome.difficulty.version_used, EngineVersion::V2);
    assert_eq!(outcome.priority.version_used, EngineVersion::V2);
    assert_eq!(outcome.pace.version_used, EngineVersion::V2);
    assert!(outcome.errors.is_empty());
    assert_eq!(outcome.priority.data.topics.len(), 1);

    // 18 minutes over 12 questions is exactly the ideal pace.
    assert_eq!(outcome.pace.data.modifier, 1.0);
}

#[tokio::test]
async fn free_submission_stays_on_v1_everywhere() {
    common::init_tracing();
    let outcome = orchestrator(FakeStore::well_stocked())
        .process_submission(submission(Tier::Free))
        .await;

    for version in [
        outcome.retention.version_used,
        outcome.difficulty.version_used,
        outcome.priority.version_used,
        outcome.pace.version_used,
    ] {
        assert_eq!(version, EngineVersion::V1);
    }
    assert!(outcome.errors.is_empty());
}

#[tokio::test]
async fn one_bad_engine_degrades_without_aborting() {
    common::init_tracing();
    let mut store = FakeStore::well_stocked();
    store.topics.get_mut("algebra").unwrap().difficulty_baseline = -3.0;

    let outcome = orchestrator(store)
        .process_submission(submission(Tier::Premium))
        .await;

    // Difficulty fell back; everything else still ran enriched.
    assert!(outcome.difficulty.fallback_used);
    assert_eq!(outcome.difficulty.version_used, EngineVersion::V1);
    assert_eq!(outcome.retention.version_used, EngineVersion::V2);
    assert_eq!(outcome.pace.version_used, EngineVersion::V2);

    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].engine, EngineKind::Difficulty);
    assert!((0.0..=100.0).contains(&outcome.difficulty.data.score));
}

#[tokio::test]
async fn offline_store_still_produces_a_full_outcome() {
    common::init_tracing();
    let mut store = FakeStore::well_stocked();
    store.fail_reads = true;

    let outcome = orchestrator(store)
        .process_submission(submission(Tier::Premium))
        .await;

    assert!((1.3..=2.5).contains(&outcome.retention.data.state.ease_factor));
    assert!((0.0..=100.0).contains(&outcome.difficulty.data.score));
    assert!(!outcome.priority.data.topics.is_empty());
}

#[tokio::test]
async fn topic_batch_comes_back_sorted() {
    common::init_tracing();
    let orchestrator = orchestrator(FakeStore::well_stocked());
    let topics = vec![
        TopicPerformance {
            topic_id: "fractions".to_string(),
            blank_rate: 0.4,
            wrong_rate: 0.3,
            failure_rate: 0.5,
            success_rate: 0.3,
            topic_weight: 3.0,
            course_importance: 1.0,
            minutes_per_question: None,
        },
        TopicPerformance {
            topic_id: "geometry".to_string(),
            blank_rate: 0.05,
            wrong_rate: 0.1,
            failure_rate: 0.0,
            success_rate: 0.85,
            topic_weight: 1.0,
            course_importance: 1.0,
            minutes_per_question: None,
        },
        TopicPerformance {
            topic_id: "algebra".to_string(),
            blank_rate: 0.2,
            wrong_rate: 0.2,
            failure_rate: 0.2,
            success_rate: 0.6,
            topic_weight: 2.0,
            course_importance: 1.2,
            minutes_per_question: None,
        },
    ];

    let envelope = orchestrator
        .rank_topics("maya", Tier::Premium, topics)
        .await;

    let scores: Vec<f64> = envelope
        .data
        .topics
        .iter()
        .map(|t| t.base.normalized_score)
        .collect();
    for pair in scores.windows(2) {
        assert!(pair[0] >= pair[1]);
    }
    assert_eq!(envelope.data.topics[0].base.topic_id, "fractions");
    assert!(envelope.data.enriched);
}

#[tokio::test]
async fn outcome_serializes_with_camel_case_keys() {
    common::init_tracing();
    let outcome = orchestrator(FakeStore::well_stocked())
        .process_submission(submission(Tier::Premium))
        .await;

    let json = serde_json::to_value(&outcome).unwrap();
    assert!(json.get("elapsedMs").is_some());
    assert!(json["retention"].get("versionUsed").is_some());
    assert!(json["retention"].get("fallbackUsed").is_some());
    assert!(json["retention"]["data"].get("v2Features").is_some());
    assert_eq!(json["retention"]["tier"], "premium");
}
