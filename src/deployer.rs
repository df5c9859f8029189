//! Deployment driver.
//!
//! Ties the pieces together for one planning/apply cycle: load the previous
//! snapshot, build and validate the declared graph, diff, plan, apply, and
//! persist the refreshed snapshot under a state lock.

use tracing::{info, warn};

use crate::config::{ConfigHasher, DeployConfig};
use crate::error::Result;
use crate::graph::ResourceGraph;
use crate::planner::{ApplyReport, DeploymentPlan, DiffEngine, DiffResult, PlanExecutor};
use crate::provider::ResourceProvisioner;
use crate::state::{Snapshot, StateStore};

/// Drives planning and applying for one stack.
pub struct Deployer<'a, S: StateStore> {
    /// Stack configuration.
    config: &'a DeployConfig,
    /// Snapshot store.
    store: &'a S,
    /// Resource provisioner.
    provisioner: &'a ResourceProvisioner,
    /// Configuration hasher.
    hasher: ConfigHasher,
    /// Diff engine.
    diff_engine: DiffEngine,
}

/// Outcome of an apply or destroy run.
#[derive(Debug)]
pub struct DeployOutcome {
    /// Per-resource apply report.
    pub report: ApplyReport,
    /// The refreshed snapshot, as persisted.
    pub snapshot: Snapshot,
}

impl<'a, S: StateStore> Deployer<'a, S> {
    /// Creates a new deployer.
    #[must_use]
    pub const fn new(
        config: &'a DeployConfig,
        store: &'a S,
        provisioner: &'a ResourceProvisioner,
    ) -> Self {
        Self {
            config,
            store,
            provisioner,
            hasher: ConfigHasher::new(),
            diff_engine: DiffEngine::new(),
        }
    }

    /// Computes the plan for the current stack against the stored snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack is structurally invalid or the
    /// snapshot cannot be loaded.
    pub async fn plan(&self) -> Result<(DeploymentPlan, DiffResult)> {
        let snapshot = self.store.load().await?;
        self.plan_against(self.config, snapshot.as_ref())
    }

    /// Applies the current stack.
    ///
    /// # Errors
    ///
    /// Returns an error if planning fails or the snapshot cannot be
    /// persisted. Provisioning failures are reported in the outcome, not
    /// as errors.
    pub async fn apply(&self) -> Result<DeployOutcome> {
        self.run(self.config).await
    }

    /// Tears down every resource recorded in the snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if planning fails or the snapshot cannot be
    /// persisted.
    pub async fn destroy(&self) -> Result<DeployOutcome> {
        let empty = self.config.without_resources();
        self.run(&empty).await
    }

    /// Plans and applies `config` under the state lock.
    async fn run(&self, config: &DeployConfig) -> Result<DeployOutcome> {
        let lock = self.store.acquire_lock("").await?;

        let result = self.run_locked(config).await;

        // Release the lock even when the run failed
        if let Err(e) = self.store.release_lock(&lock.lock_id).await {
            warn!("Failed to release state lock {}: {e}", lock.lock_id);
        }

        result
    }

    /// The lock-holding part of [`Deployer::run`].
    async fn run_locked(&self, config: &DeployConfig) -> Result<DeployOutcome> {
        let mut snapshot = self.store.load().await?.unwrap_or_else(|| {
            Snapshot::new(&self.config.project.name, &self.config.project.environment)
        });

        let (plan, _diff, graph) = self.plan_with_graph(config, Some(&snapshot))?;

        if !plan.has_changes() {
            info!("No changes for project '{}'", self.config.project.name);
        }

        let executor = PlanExecutor::new(self.provisioner);
        let report = executor.execute(&plan, config, &graph, &mut snapshot).await?;

        self.store.save(&snapshot).await?;

        Ok(DeployOutcome { report, snapshot })
    }

    /// Builds, validates, diffs, and plans in one step.
    fn plan_against(
        &self,
        config: &DeployConfig,
        snapshot: Option<&Snapshot>,
    ) -> Result<(DeploymentPlan, DiffResult)> {
        let (plan, diff, _graph) = self.plan_with_graph(config, snapshot)?;
        Ok((plan, diff))
    }

    /// Builds, validates, diffs, and plans, returning the graph for apply.
    fn plan_with_graph(
        &self,
        config: &DeployConfig,
        snapshot: Option<&Snapshot>,
    ) -> Result<(DeploymentPlan, DiffResult, ResourceGraph)> {
        let graph = config.build_graph()?;
        graph.validate()?;

        let config_hash = self.hasher.hash_config(config);
        let diff = self.diff_engine.compute_diff(config, &graph, snapshot);
        let plan = DeploymentPlan::from_diff(&diff, &graph, snapshot, &config_hash)?;

        Ok((plan, diff, graph))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use crate::provider::{ApiResponse, MockApiExecutor};
    use crate::state::LocalStateStore;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    const STACK: &str = r"
project:
  name: elk-telemetry
state:
  backend: local
resources:
  - id: collar
    kind: thing
    config:
      thing_name: elk-collar
exports:
  thing_arn: ${collar.thingArn}
";

    fn thing_executor() -> MockApiExecutor {
        let mut executor = MockApiExecutor::new();
        executor
            .expect_invoke()
            .withf(|call| call.action == "CreateThing")
            .returning(|_| {
                Ok(ApiResponse::from_json(json!({
                    "thingArn": "arn:aws:iot:us-west-2:123456789012:thing/elk-collar",
                    "thingName": "elk-collar",
                }))
                .expect("object"))
            });
        executor
            .expect_invoke()
            .withf(|call| call.action == "DeleteThing")
            .returning(|_| Ok(ApiResponse::from_json(json!({})).expect("object")));
        executor
    }

    #[tokio::test]
    async fn test_apply_persists_snapshot_and_exports() {
        let temp = TempDir::new().expect("temp dir");
        let store = LocalStateStore::with_base_dir(temp.path());
        let config = ConfigParser::new().parse_yaml(STACK, None).expect("parse");

        let provisioner = ResourceProvisioner::new(Arc::new(thing_executor()));
        let deployer = Deployer::new(&config, &store, &provisioner);

        let outcome = deployer.apply().await.expect("apply");
        assert!(outcome.report.success);
        assert_eq!(outcome.snapshot.generation, 1);

        let persisted = store.load().await.expect("load").expect("snapshot exists");
        assert_eq!(persisted.generation, 1);
        assert_eq!(
            persisted.exports.get("thing_arn").map(String::as_str),
            Some("arn:aws:iot:us-west-2:123456789012:thing/elk-collar")
        );
        assert!(!store.is_locked().await.expect("lock check"));
    }

    #[tokio::test]
    async fn test_second_apply_is_idempotent() {
        let temp = TempDir::new().expect("temp dir");
        let store = LocalStateStore::with_base_dir(temp.path());
        let config = ConfigParser::new().parse_yaml(STACK, None).expect("parse");

        let provisioner = ResourceProvisioner::new(Arc::new(thing_executor()));
        let deployer = Deployer::new(&config, &store, &provisioner);
        deployer.apply().await.expect("first apply");

        let (plan, diff) = deployer.plan().await.expect("plan");
        assert!(!diff.has_changes());
        assert!(!plan.has_changes());
    }

    #[tokio::test]
    async fn test_destroy_removes_all_records() {
        let temp = TempDir::new().expect("temp dir");
        let store = LocalStateStore::with_base_dir(temp.path());
        let config = ConfigParser::new().parse_yaml(STACK, None).expect("parse");

        let provisioner = ResourceProvisioner::new(Arc::new(thing_executor()));
        let deployer = Deployer::new(&config, &store, &provisioner);
        deployer.apply().await.expect("apply");

        let outcome = deployer.destroy().await.expect("destroy");
        assert!(outcome.report.success);
        assert!(outcome.snapshot.is_empty());
        assert!(outcome.snapshot.exports.is_empty());
        assert_eq!(outcome.snapshot.generation, 2);
    }
}
