//! Plan executor.
//!
//! Applies a deployment plan sequentially: immediately before each
//! resource is provisioned, every reference in its configuration is
//! resolved against the current outputs in the snapshot; the resulting
//! outputs are recorded before any dependent resource runs. The first
//! provisioning failure halts the apply, leaving already-applied resources
//! in their new state and reporting the rest as skipped. There is no
//! automatic rollback; re-running apply is idempotent for unaffected
//! resources.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info};

use crate::config::DeployConfig;
use crate::error::{KorralError, PlanError, Result};
use crate::graph::{
    attrs_from_json, attrs_to_json, resolve_attrs, LifecycleHooks, Reference, ResourceGraph,
    ResourceNode,
};
use crate::provider::{ResolvedHooks, ResolvedNode, ResourceProvisioner};
use crate::state::{HistoryEntry, OperationKind, ResourceRecord, Snapshot};

use super::plan::{ActionType, DeploymentPlan, PlannedAction};

/// Executor for deployment plans.
pub struct PlanExecutor<'a> {
    /// Resource provisioner.
    provisioner: &'a ResourceProvisioner,
}

/// Outcome of a single planned action.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ActionOutcome {
    /// Resource id.
    pub resource_id: String,
    /// Action that was attempted.
    pub action: ActionType,
    /// What happened.
    pub status: OutcomeStatus,
}

/// Status of an attempted action.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// The action completed.
    Applied,
    /// The action failed; the error message is preserved.
    Failed {
        /// The underlying error message.
        error: String,
    },
    /// The action was not attempted because an earlier action failed.
    Skipped,
}

/// Result of applying an entire plan.
#[derive(Debug, Serialize)]
pub struct ApplyReport {
    /// Generation the apply produced.
    pub generation: u64,
    /// Individual action outcomes, in plan order.
    pub outcomes: Vec<ActionOutcome>,
    /// Number of applied actions.
    pub applied: usize,
    /// Number of failed actions.
    pub failed: usize,
    /// Number of skipped actions.
    pub skipped: usize,
    /// Whether the entire plan succeeded.
    pub success: bool,
}

impl<'a> PlanExecutor<'a> {
    /// Creates a new plan executor.
    #[must_use]
    pub const fn new(provisioner: &'a ResourceProvisioner) -> Self {
        Self { provisioner }
    }

    /// Applies a deployment plan, mutating the snapshot as resources reach
    /// their new state.
    ///
    /// # Errors
    ///
    /// Returns an error for internal invariant violations (unresolvable
    /// references, malformed plans). Provisioning failures do not error;
    /// they are reported per-resource in the [`ApplyReport`].
    pub async fn execute(
        &self,
        plan: &DeploymentPlan,
        config: &DeployConfig,
        graph: &ResourceGraph,
        snapshot: &mut Snapshot,
    ) -> Result<ApplyReport> {
        info!(
            "Applying generation {} with {} action(s)",
            plan.generation,
            plan.actions.len()
        );

        if plan.is_empty() {
            return Ok(ApplyReport {
                generation: plan.generation,
                outcomes: vec![],
                applied: 0,
                failed: 0,
                skipped: 0,
                success: true,
            });
        }

        let mut outcomes: Vec<ActionOutcome> = Vec::with_capacity(plan.actions.len());
        let mut halted = false;

        for action in &plan.actions {
            if action.action_type == ActionType::Noop {
                outcomes.push(ActionOutcome {
                    resource_id: action.resource_id.clone(),
                    action: action.action_type,
                    status: OutcomeStatus::Applied,
                });
                continue;
            }

            if halted {
                outcomes.push(ActionOutcome {
                    resource_id: action.resource_id.clone(),
                    action: action.action_type,
                    status: OutcomeStatus::Skipped,
                });
                continue;
            }

            info!("Executing: {}", action.description());

            let result = match action.action_type {
                ActionType::Create => self.apply_create(action, graph, snapshot).await,
                ActionType::Update => self.apply_update(action, graph, snapshot).await,
                ActionType::Delete => self.apply_delete(action, snapshot).await,
                ActionType::Noop => Ok(()),
            };

            let status = match result {
                Ok(()) => OutcomeStatus::Applied,
                Err(e @ (KorralError::Plan(_) | KorralError::Internal(_))) => return Err(e),
                Err(e) => {
                    error!(
                        "Failed to {} '{}': {e}",
                        action.action_type, action.resource_id
                    );
                    halted = true;
                    OutcomeStatus::Failed {
                        error: e.to_string(),
                    }
                }
            };

            outcomes.push(ActionOutcome {
                resource_id: action.resource_id.clone(),
                action: action.action_type,
                status,
            });
        }

        let applied = outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Applied)
            .count();
        let failed = outcomes
            .iter()
            .filter(|o| matches!(o.status, OutcomeStatus::Failed { .. }))
            .count();
        let skipped = outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Skipped)
            .count();
        let success = failed == 0;

        snapshot.generation = plan.generation;
        snapshot.config_hash.clone_from(&plan.config_hash);

        if success {
            let exports = Self::resolve_exports(config, snapshot)?;
            snapshot.exports = exports;
        }

        let operation = if config.resources.is_empty() {
            OperationKind::Destroy
        } else {
            OperationKind::Apply
        };
        let resources: Vec<String> = plan
            .actionable_actions()
            .iter()
            .map(|a| a.resource_id.clone())
            .collect();
        let history_entry = if success {
            HistoryEntry::new(operation, plan.generation, &plan.config_hash, resources)
        } else {
            HistoryEntry::failed(
                operation,
                plan.generation,
                &plan.config_hash,
                resources,
                &format!("{failed} action(s) failed"),
            )
        };
        snapshot.add_history(history_entry);

        Ok(ApplyReport {
            generation: plan.generation,
            outcomes,
            applied,
            failed,
            skipped,
            success,
        })
    }

    /// Applies a create action.
    async fn apply_create(
        &self,
        action: &PlannedAction,
        graph: &ResourceGraph,
        snapshot: &mut Snapshot,
    ) -> Result<()> {
        let node = Self::declared_node(action, graph)?;
        let resolved = Self::resolve_node(node, snapshot)?;

        let provisioned = self.provisioner.create(&resolved).await?;

        let mut record = ResourceRecord::new(
            &node.id,
            node.kind,
            Value::Object(attrs_to_json(&node.config)),
            action.new_hash.as_deref().unwrap_or_default(),
            graph.dependencies_of(&node.id),
        );
        record.outputs = provisioned.outputs;
        record.physical_resource_id = provisioned.physical_resource_id;
        record.hooks = node.hooks.clone();
        snapshot.set_record(record);

        Ok(())
    }

    /// Applies an in-place update action.
    async fn apply_update(
        &self,
        action: &PlannedAction,
        graph: &ResourceGraph,
        snapshot: &mut Snapshot,
    ) -> Result<()> {
        let node = Self::declared_node(action, graph)?;

        let (physical_resource_id, previous_outputs) = {
            let record = snapshot.record(&node.id).ok_or_else(|| {
                KorralError::Plan(PlanError::MissingRecord {
                    node: node.id.clone(),
                })
            })?;
            (record.physical_resource_id.clone(), record.outputs.clone())
        };

        let resolved = Self::resolve_node(node, snapshot)?;
        let provisioned = self
            .provisioner
            .update(&resolved, &physical_resource_id, &previous_outputs)
            .await?;

        let dependencies = graph.dependencies_of(&node.id);
        let record = snapshot.record_mut(&node.id).ok_or_else(|| {
            KorralError::Plan(PlanError::MissingRecord {
                node: node.id.clone(),
            })
        })?;
        record.config = Value::Object(attrs_to_json(&node.config));
        record.config_hash = action.new_hash.clone().unwrap_or_default();
        record.outputs = provisioned.outputs;
        record.physical_resource_id = provisioned.physical_resource_id;
        record.depends_on = dependencies;
        record.hooks = node.hooks.clone();
        record.touch();

        Ok(())
    }

    /// Applies a delete action.
    async fn apply_delete(&self, action: &PlannedAction, snapshot: &mut Snapshot) -> Result<()> {
        let Some(record) = snapshot.record(&action.resource_id) else {
            debug!(
                "No record for '{}', considering delete successful",
                action.resource_id
            );
            return Ok(());
        };

        let physical_resource_id = record.physical_resource_id.clone();
        let resolved = Self::resolve_record(record, snapshot)?;

        self.provisioner
            .delete(&resolved, &physical_resource_id)
            .await?;

        snapshot.remove_record(&action.resource_id);
        Ok(())
    }

    /// Looks up the declared node for a create or update action.
    fn declared_node<'g>(
        action: &PlannedAction,
        graph: &'g ResourceGraph,
    ) -> Result<&'g ResourceNode> {
        graph.node(&action.resource_id).ok_or_else(|| {
            KorralError::internal(format!(
                "plan references undeclared resource '{}'",
                action.resource_id
            ))
        })
    }

    /// Resolves a declared node against the current snapshot outputs.
    fn resolve_node(node: &ResourceNode, snapshot: &Snapshot) -> Result<ResolvedNode> {
        let lookup = output_lookup(snapshot);

        let config = resolve_attrs(&node.config, &lookup)
            .map_err(|reference| unresolved(&node.id, &reference))?;
        let hooks = node
            .hooks
            .as_ref()
            .map(|hooks| Self::resolve_hooks(&node.id, hooks, &lookup))
            .transpose()?;

        Ok(ResolvedNode {
            id: node.id.clone(),
            kind: node.kind,
            config,
            hooks,
        })
    }

    /// Resolves a snapshot record (for deletes, where the node has already
    /// left the declared graph).
    fn resolve_record(record: &ResourceRecord, snapshot: &Snapshot) -> Result<ResolvedNode> {
        let lookup = output_lookup(snapshot);

        let attrs = record
            .config
            .as_object()
            .map(attrs_from_json)
            .unwrap_or_default();
        let config =
            resolve_attrs(&attrs, &lookup).map_err(|reference| unresolved(&record.id, &reference))?;
        let hooks = record
            .hooks
            .as_ref()
            .map(|hooks| Self::resolve_hooks(&record.id, hooks, &lookup))
            .transpose()?;

        Ok(ResolvedNode {
            id: record.id.clone(),
            kind: record.kind,
            config,
            hooks,
        })
    }

    /// Resolves lifecycle descriptors.
    fn resolve_hooks<F>(node_id: &str, hooks: &LifecycleHooks, lookup: &F) -> Result<ResolvedHooks>
    where
        F: Fn(&Reference) -> Option<Value>,
    {
        let on_create = hooks
            .on_create
            .resolve(lookup)
            .map_err(|reference| unresolved(node_id, &reference))?;
        let on_update = hooks
            .on_update
            .as_ref()
            .map(|spec| spec.resolve(lookup))
            .transpose()
            .map_err(|reference| unresolved(node_id, &reference))?;
        let on_delete = hooks
            .on_delete
            .as_ref()
            .map(|spec| spec.resolve(lookup))
            .transpose()
            .map_err(|reference| unresolved(node_id, &reference))?;

        Ok(ResolvedHooks {
            on_create,
            on_update,
            on_delete,
        })
    }

    /// Resolves the configured exports against snapshot outputs.
    fn resolve_exports(
        config: &DeployConfig,
        snapshot: &Snapshot,
    ) -> Result<std::collections::BTreeMap<String, String>> {
        let lookup = output_lookup(snapshot);
        let mut exports = std::collections::BTreeMap::new();

        for (name, expression) in &config.exports {
            let reference = Reference::parse(expression).ok_or_else(|| {
                KorralError::internal(format!("export '{name}' is not a reference: {expression}"))
            })?;

            let value = lookup(&reference).ok_or_else(|| {
                KorralError::Plan(PlanError::UnresolvedReference {
                    node: format!("export '{name}'"),
                    reference: reference.expression(),
                })
            })?;

            exports.insert(name.clone(), value_to_string(&value));
        }

        Ok(exports)
    }
}

/// Builds a reference-resolution closure over the snapshot's outputs.
fn output_lookup(snapshot: &Snapshot) -> impl Fn(&Reference) -> Option<Value> + '_ {
    move |reference: &Reference| snapshot.output(&reference.node, &reference.output).cloned()
}

/// Maps an unresolvable reference to the planning error that names the
/// resource holding it.
fn unresolved(node_id: &str, reference: &Reference) -> KorralError {
    KorralError::Plan(PlanError::UnresolvedReference {
        node: node_id.to_string(),
        reference: reference.expression(),
    })
}

/// Renders an output value for export.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl std::fmt::Display for ApplyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Generation {}: {} applied, {} failed, {} skipped",
            self.generation, self.applied, self.failed, self.skipped
        )
    }
}
