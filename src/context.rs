use chrono::Utc;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::config::ContextConfig;
use crate::data_access::DataAccess;
use crate::types::{SignalKind, StudentHistory, TopicContext};

const TTL_JITTER_RATIO: f64 = 0.1;

/// A context value plus where it came from. `from_default` marks the
/// safe-default substitution after a miss or store failure; callers surface
/// it, they never hide it.
#[derive(Debug, Clone)]
pub struct ContextFetch<T> {
    pub value: T,
    pub from_default: bool,
    pub from_cache: bool,
}

#[derive(Debug, Clone)]
struct CacheSlot<T> {
    value: T,
    expires_at_ms: i64,
}

impl<T> CacheSlot<T> {
    fn fresh(&self, now_ms: i64) -> bool {
        now_ms < self.expires_at_ms
    }
}

/// Supplies topic metadata and student history to the v2 engines, with an
/// in-process TTL cache in front of the backing store.
///
/// Writes are idempotent re-derivations of the same upstream rows, so
/// concurrent refreshes of one key are benign; last writer wins. Expired
/// entries are kept around as a stale fallback for when the store is down.
pub struct ContextProvider {
    data_access: Arc<dyn DataAccess>,
    config: ContextConfig,
    topics: RwLock<HashMap<String, CacheSlot<TopicContext>>>,
    histories: RwLock<HashMap<String, CacheSlot<StudentHistory>>>,
    signals: RwLock<HashMap<String, CacheSlot<HashMap<SignalKind, f64>>>>,
}

impl ContextProvider {
    pub fn new(data_access: Arc<dyn DataAccess>, config: ContextConfig) -> Self {
        Self {
            data_access,
            config,
            topics: RwLock::new(HashMap::new()),
            histories: RwLock::new(HashMap::new()),
            signals: RwLock::new(HashMap::new()),
        }
    }

    /// Topic archetype, baseline and prerequisite links, merged from the two
    /// metadata reads. Store failure yields the default context, flagged.
    pub async fn topic_context(&self, topic_id: &str, timeout_ms: u64) -> ContextFetch<TopicContext> {
        let now_ms = Utc::now().timestamp_millis();

        {
            let topics = self.topics.read().await;
            if let Some(slot) = topics.get(topic_id) {
                if slot.fresh(now_ms) {
                    return ContextFetch {
                        value: slot.value.clone(),
                        from_default: false,
                        from_cache: true,
                    };
                }
            }
        }

        let fetched = self
            .bounded(timeout_ms, self.data_access.topic_metadata(topic_id))
            .await;

        match fetched {
            Ok(mut context) => {
                // Prerequisite links live behind their own read; a failure
                // there degrades to "no links", not to a default context.
                match self
                    .bounded(timeout_ms, self.data_access.prerequisites(topic_id))
                    .await
                {
                    Ok(links) => context.prerequisites = links,
                    Err(err) => {
                        tracing::warn!(topic_id, error = %err, "prerequisite fetch failed");
                    }
                }

                let mut topics = self.topics.write().await;
                topics.insert(
                    topic_id.to_string(),
                    CacheSlot {
                        value: context.clone(),
                        expires_at_ms: now_ms + self.jittered_ttl_ms(),
                    },
                );
                ContextFetch {
                    value: context,
                    from_default: false,
                    from_cache: false,
                }
            }
            Err(err) => {
                tracing::warn!(topic_id, error = %err, "topic metadata fetch failed");
                self.stale_or_default(&self.topics, topic_id, TopicContext::default())
                    .await
            }
        }
    }

    /// Per-student history window, optionally scoped to one topic.
    pub async fn student_history(
        &self,
        student_id: &str,
        topic_id: Option<&str>,
        timeout_ms: u64,
    ) -> ContextFetch<StudentHistory> {
        let key = history_key(student_id, topic_id);
        let now_ms = Utc::now().timestamp_millis();

        {
            let histories = self.histories.read().await;
            if let Some(slot) = histories.get(&key) {
                if slot.fresh(now_ms) {
                    return ContextFetch {
                        value: slot.value.clone(),
                        from_default: false,
                        from_cache: true,
                    };
                }
            }
        }

        let fetched = self
            .bounded(
                timeout_ms,
                self.data_access
                    .student_history(student_id, topic_id, self.config.history_days_back),
            )
            .await;

        match fetched {
            Ok(history) => {
                let mut histories = self.histories.write().await;
                histories.insert(
                    key,
                    CacheSlot {
                        value: history.clone(),
                        expires_at_ms: now_ms + self.jittered_ttl_ms(),
                    },
                );
                ContextFetch {
                    value: history,
                    from_default: false,
                    from_cache: false,
                }
            }
            Err(err) => {
                tracing::warn!(student_id, ?topic_id, error = %err, "history fetch failed");
                self.stale_or_default(&self.histories, &key, StudentHistory::default())
                    .await
            }
        }
    }

    /// Normalized behavioral signals for the segment classifier. Unlike the
    /// other reads there is no meaningful default; `None` means the v2
    /// engines cannot be segment-aware for this call.
    pub async fn student_signals(
        &self,
        student_id: &str,
        timeout_ms: u64,
    ) -> Option<HashMap<SignalKind, f64>> {
        let now_ms = Utc::now().timestamp_millis();

        {
            let signals = self.signals.read().await;
            if let Some(slot) = signals.get(student_id) {
                if slot.fresh(now_ms) {
                    return Some(slot.value.clone());
                }
            }
        }

        let fetched = self
            .bounded(
                timeout_ms,
                self.data_access
                    .student_signals(student_id, self.config.signal_window_days),
            )
            .await;

        match fetched {
            Ok(map) => {
                let mut signals = self.signals.write().await;
                signals.insert(
                    student_id.to_string(),
                    CacheSlot {
                        value: map.clone(),
                        expires_at_ms: now_ms + self.jittered_ttl_ms(),
                    },
                );
                Some(map)
            }
            Err(err) => {
                tracing::warn!(student_id, error = %err, "signal fetch failed");
                let signals = self.signals.read().await;
                signals.get(student_id).map(|slot| slot.value.clone())
            }
        }
    }

    /// Mastery proxy (0-100 average success rate) for each prerequisite of a
    /// topic. Individual failures drop the link from the map; they never
    /// fail the whole lookup.
    pub async fn prerequisite_mastery(
        &self,
        student_id: &str,
        context: &TopicContext,
        timeout_ms: u64,
    ) -> HashMap<String, f64> {
        let mut mastery = HashMap::with_capacity(context.prerequisites.len());
        for link in &context.prerequisites {
            let fetch = self
                .student_history(student_id, Some(&link.topic_id), timeout_ms)
                .await;
            if !fetch.from_default {
                mastery.insert(link.topic_id.clone(), fetch.value.avg_success_rate);
            }
        }
        mastery
    }

    pub async fn cache_stats(&self) -> (usize, usize, usize) {
        let topics = self.topics.read().await.len();
        let histories = self.histories.read().await.len();
        let signals = self.signals.read().await.len();
        (topics, histories, signals)
    }

    async fn bounded<T>(
        &self,
        timeout_ms: u64,
        fut: impl std::future::Future<Output = Result<T, crate::error::DataAccessError>>,
    ) -> Result<T, crate::error::DataAccessError> {
        let effective = if timeout_ms > 0 {
            timeout_ms
        } else {
            self.config.fetch_timeout_ms
        };
        match tokio::time::timeout(Duration::from_millis(effective), fut).await {
            Ok(result) => result,
            Err(_) => Err(crate::error::DataAccessError::Timeout(effective)),
        }
    }

    async fn stale_or_default<T: Clone>(
        &self,
        cache: &RwLock<HashMap<String, CacheSlot<T>>>,
        key: &str,
        default: T,
    ) -> ContextFetch<T> {
        let guard = cache.read().await;
        if let Some(slot) = guard.get(key) {
            return ContextFetch {
                value: slot.value.clone(),
                from_default: false,
                from_cache: true,
            };
        }
        ContextFetch {
            value: default,
            from_default: true,
            from_cache: false,
        }
    }

    fn jittered_ttl_ms(&self) -> i64 {
        let base_ms = (self.config.cache_ttl_seconds * 1_000) as f64;
        let mut rng = rand::rng();
        let factor = rng.random_range(1.0 - TTL_JITTER_RATIO..=1.0 + TTL_JITTER_RATIO);
        (base_ms * factor).round().max(1.0) as i64
    }
}

fn history_key(student_id: &str, topic_id: Option<&str>) -> String {
    match topic_id {
        Some(topic) => format!("{student_id}:{topic}"),
        None => student_id.to_string(),
    }
}
