//! Testing utilities for the plandoc workspace
//!
//! Shared fixtures: a throwaway store root with a plan, and entity builders.

#![allow(missing_docs)]

use plandoc_lock::LockConfig;
use plandoc_model::{
    ArtifactData, DecisionData, Phase, PhaseData, Requirement, RequirementData, Solution,
    SolutionData,
};
use plandoc_store::{CacheConfig, NewPlan, PlanStore, RepositoryFactory, StoreConfig};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Lock policy that fails fast enough for tests
pub fn fast_lock_config() -> LockConfig {
    LockConfig::default()
        .with_acquire_timeout(Duration::from_secs(5))
        .with_retry_interval(Duration::from_millis(2), Duration::from_millis(20))
        .with_dispose_timeout(Duration::from_millis(500))
}

pub fn test_config() -> StoreConfig {
    StoreConfig::default().with_lock(fast_lock_config())
}

pub fn cached_test_config() -> StoreConfig {
    test_config().with_cache(CacheConfig::default().with_max_capacity(100))
}

/// Temp store root with one plan
pub struct TestStore {
    pub dir: TempDir,
    pub factory: Arc<RepositoryFactory>,
    pub plans: PlanStore,
    pub plan_id: String,
}

impl TestStore {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: StoreConfig) -> Self {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let factory = Arc::new(RepositoryFactory::open(dir.path(), config).await.unwrap());
        let plans = PlanStore::new(Arc::clone(&factory));
        let plan_id = plans.create_plan(NewPlan::named("test plan")).await.unwrap().id;
        Self {
            dir,
            factory,
            plans,
            plan_id,
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

/// Route `tracing` output through the test harness; safe to call repeatedly
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .try_init();
}

pub fn requirement(title: &str) -> Requirement {
    Requirement::new(RequirementData::titled(title))
}

pub fn solution(title: &str, addressing: &[&str]) -> Solution {
    Solution::new(SolutionData::addressing(
        title,
        addressing.iter().map(|s| (*s).to_string()).collect(),
    ))
}

pub fn phase(title: &str, parent_id: Option<&str>) -> Phase {
    Phase::new(PhaseData::titled(title, parent_id.map(str::to_string)))
}

pub fn decision_data(title: &str) -> DecisionData {
    DecisionData {
        title: title.to_string(),
        question: format!("{title}?"),
        ..DecisionData::default()
    }
}

pub fn artifact_data(title: &str) -> ArtifactData {
    ArtifactData {
        title: title.to_string(),
        ..ArtifactData::default()
    }
}
