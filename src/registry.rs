use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::{FeatureFlags, RegistryConfig};
use crate::error::RegistryError;
use crate::types::{EngineConfig, EngineFeature, EngineKind, EngineVersion, Tier};

/// Who an override applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OverrideScope {
    Global,
    User(String),
}

/// Explicit process-wide override state, injected into the registry at
/// construction. Entries have no TTL; whoever sets one clears it. Set and
/// clear are atomic per key; keys are independent.
#[derive(Default)]
pub struct OverrideStore {
    inner: RwLock<HashMap<(OverrideScope, EngineKind), EngineVersion>>,
}

impl OverrideStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, scope: OverrideScope, engine: EngineKind, version: EngineVersion) {
        tracing::info!(
            ?scope,
            engine = engine.as_str(),
            version = version.as_str(),
            "version override set"
        );
        self.inner.write().insert((scope, engine), version);
    }

    pub fn clear(&self, scope: OverrideScope, engine: EngineKind) {
        tracing::info!(?scope, engine = engine.as_str(), "version override cleared");
        self.inner.write().remove(&(scope, engine));
    }

    pub fn get(&self, scope: &OverrideScope, engine: EngineKind) -> Option<EngineVersion> {
        self.inner.read().get(&(scope.clone(), engine)).copied()
    }

    pub fn clear_all(&self) {
        self.inner.write().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

/// Resolves which engine version runs for a given student and tier.
/// Precedence: per-user override, then global override, then tier default.
pub struct VersionRegistry {
    config: RegistryConfig,
    flags: FeatureFlags,
    overrides: Arc<OverrideStore>,
}

impl VersionRegistry {
    pub fn new(config: RegistryConfig, flags: FeatureFlags, overrides: Arc<OverrideStore>) -> Self {
        Self {
            config,
            flags,
            overrides,
        }
    }

    pub fn overrides(&self) -> &OverrideStore {
        &self.overrides
    }

    pub fn resolve(
        &self,
        engine: EngineKind,
        tier: Tier,
        user_id: Option<&str>,
    ) -> Result<EngineConfig, RegistryError> {
        let policy = self
            .config
            .policy(tier)
            .ok_or(RegistryError::MissingTierPolicy { tier, engine })?;

        let version = user_id
            .and_then(|user| {
                self.overrides
                    .get(&OverrideScope::User(user.to_string()), engine)
            })
            .or_else(|| self.overrides.get(&OverrideScope::Global, engine))
            .unwrap_or(policy.default_version);

        // A free-tier account never runs v2, override or not.
        let version = if version == EngineVersion::V2 && tier == Tier::Free {
            EngineVersion::V1
        } else {
            version
        };

        Ok(EngineConfig {
            version,
            enabled_features: self.features_for(engine, tier, version),
            timeout_ms: policy.timeout_ms,
            fallback_enabled: policy.fallback_enabled,
        })
    }

    fn features_for(
        &self,
        engine: EngineKind,
        tier: Tier,
        version: EngineVersion,
    ) -> HashSet<EngineFeature> {
        let mut features = HashSet::new();
        if version == EngineVersion::V2 && tier == Tier::Premium {
            features.insert(EngineFeature::SegmentAdjustment);
        }
        if engine == EngineKind::Priority && version == EngineVersion::V2 {
            if self.flags.prerequisite_cascade_enabled {
                features.insert(EngineFeature::PrerequisiteCascade);
            }
            if self.flags.cross_subject_synergy_enabled {
                features.insert(EngineFeature::CrossSubjectSynergy);
            }
        }
        features
    }
}
