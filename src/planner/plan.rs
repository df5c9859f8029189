//! Deployment plan types and construction.
//!
//! A plan is the ordered list of per-resource actions computed from a diff:
//! deletes first, in the reverse topological order of the previous
//! generation (dependents removed before their dependencies), then creates
//! and updates in the topological order of the declared graph.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::error::Result;
use crate::graph::{ResourceGraph, ResourceKind};
use crate::state::Snapshot;

use super::diff::{DiffResult, DiffType};

/// A complete deployment plan.
#[derive(Debug)]
pub struct DeploymentPlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Generation this plan will produce when applied.
    pub generation: u64,
    /// Configuration hash this plan is based on.
    pub config_hash: String,
    /// Planned actions in execution order.
    pub actions: Vec<PlannedAction>,
}

/// A single planned action.
#[derive(Debug, Clone)]
pub struct PlannedAction {
    /// Action type.
    pub action_type: ActionType,
    /// Resource id.
    pub resource_id: String,
    /// Kind tag.
    pub kind: ResourceKind,
    /// Reason for this action.
    pub reason: String,
    /// New spec hash (for creates and updates).
    pub new_hash: Option<String>,
}

/// Types of actions in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    /// Create the resource.
    Create,
    /// Update the resource in place.
    Update,
    /// Delete the resource.
    Delete,
    /// No operation (for tracking).
    Noop,
}

impl DeploymentPlan {
    /// Creates a plan from a diff result.
    ///
    /// # Errors
    ///
    /// Returns an error if the declared graph cannot be topologically
    /// ordered (the caller is expected to have validated it already).
    pub fn from_diff(
        diff: &DiffResult,
        graph: &ResourceGraph,
        snapshot: Option<&Snapshot>,
        config_hash: &str,
    ) -> Result<Self> {
        let generation = snapshot.map_or(1, |s| s.generation + 1);
        let mut actions = Vec::new();

        // Deletes run first, in reverse order of the previous generation, so
        // no resource is deleted while something still references it.
        let delete_ids: BTreeSet<&str> = diff
            .diffs
            .iter()
            .filter(|d| matches!(d.diff_type, DiffType::Delete | DiffType::Replace))
            .map(|d| d.id.as_str())
            .collect();

        if let Some(snapshot) = snapshot.filter(|_| !delete_ids.is_empty()) {
            for id in previous_topological_order(snapshot).iter().rev() {
                if !delete_ids.contains(id.as_str()) {
                    continue;
                }
                let Some(entry) = diff.diff_for(id) else {
                    continue;
                };
                let reason = if entry.diff_type == DiffType::Replace {
                    String::from("Replacement-triggering change")
                } else {
                    String::from("Resource removed from stack")
                };
                actions.push(PlannedAction {
                    action_type: ActionType::Delete,
                    resource_id: id.clone(),
                    kind: entry.kind,
                    reason,
                    new_hash: None,
                });
            }
        }

        // Creates and updates run in topological order of the declared graph
        for id in graph.topological_order()? {
            let Some(entry) = diff.diff_for(&id) else {
                continue;
            };

            let action = match entry.diff_type {
                DiffType::Create => Some((ActionType::Create, String::from("Resource declared in stack"))),
                DiffType::Replace => {
                    Some((ActionType::Create, String::from("Recreating after replacement")))
                }
                DiffType::Update => {
                    Some((ActionType::Update, String::from("Configuration changed")))
                }
                DiffType::NoChange => Some((ActionType::Noop, String::new())),
                DiffType::Delete => None,
            };

            if let Some((action_type, reason)) = action {
                actions.push(PlannedAction {
                    action_type,
                    resource_id: id,
                    kind: entry.kind,
                    reason,
                    new_hash: entry.new_hash.clone(),
                });
            }
        }

        debug!(
            "Planned generation {generation}: {} action(s), {} actionable",
            actions.len(),
            actions.iter().filter(|a| a.action_type != ActionType::Noop).count()
        );

        Ok(Self {
            created_at: Utc::now(),
            generation,
            config_hash: config_hash.to_string(),
            actions,
        })
    }

    /// Creates an empty plan (nothing declared, nothing recorded).
    #[must_use]
    pub fn empty(config_hash: &str, generation: u64) -> Self {
        Self {
            created_at: Utc::now(),
            generation,
            config_hash: config_hash.to_string(),
            actions: vec![],
        }
    }

    /// Returns true if the plan contains no actions at all.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Returns true if any action changes external state.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.actions.iter().any(|a| a.action_type != ActionType::Noop)
    }

    /// Returns the number of actions.
    #[must_use]
    pub const fn action_count(&self) -> usize {
        self.actions.len()
    }

    /// Returns the number of create actions.
    #[must_use]
    pub fn create_count(&self) -> usize {
        self.count(ActionType::Create)
    }

    /// Returns the number of update actions.
    #[must_use]
    pub fn update_count(&self) -> usize {
        self.count(ActionType::Update)
    }

    /// Returns the number of delete actions.
    #[must_use]
    pub fn delete_count(&self) -> usize {
        self.count(ActionType::Delete)
    }

    /// Returns the actions that change external state.
    #[must_use]
    pub fn actionable_actions(&self) -> Vec<&PlannedAction> {
        self.actions
            .iter()
            .filter(|a| a.action_type != ActionType::Noop)
            .collect()
    }

    fn count(&self, action_type: ActionType) -> usize {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .count()
    }
}

/// Orders the previous generation's resources from their persisted
/// dependency lists (Kahn's algorithm, ties broken by id).
///
/// Records come from an applied plan and are acyclic; should a corrupted
/// snapshot contain a cycle anyway, the leftover ids are appended so the
/// teardown stays total.
fn previous_topological_order(snapshot: &Snapshot) -> Vec<String> {
    let ids: Vec<&String> = snapshot.resources.keys().collect();
    let index: HashMap<&str, usize> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    let mut depends_on: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); ids.len()];
    for (id, record) in &snapshot.resources {
        let from = index[id.as_str()];
        for dependency in &record.depends_on {
            if let Some(&to) = index.get(dependency.as_str()) {
                depends_on[from].insert(to);
            }
        }
    }

    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); ids.len()];
    let mut in_degree: Vec<usize> = vec![0; ids.len()];
    for (from, deps) in depends_on.iter().enumerate() {
        in_degree[from] = deps.len();
        for &to in deps {
            dependents[to].push(from);
        }
    }

    let mut ready: BTreeSet<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|&(_, &d)| d == 0)
        .map(|(i, _)| i)
        .collect();

    let mut order = Vec::with_capacity(ids.len());
    let mut placed = vec![false; ids.len()];
    while let Some(next) = ready.pop_first() {
        placed[next] = true;
        order.push(ids[next].clone());

        for &dependent in &dependents[next] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    for (i, id) in ids.iter().enumerate() {
        if !placed[i] {
            order.push((*id).clone());
        }
    }

    order
}

impl PlannedAction {
    /// Returns a human-readable description of the action.
    #[must_use]
    pub fn description(&self) -> String {
        match self.action_type {
            ActionType::Create => format!("Create {} '{}'", self.kind, self.resource_id),
            ActionType::Update => format!("Update {} '{}'", self.kind, self.resource_id),
            ActionType::Delete => format!("Delete {} '{}'", self.kind, self.resource_id),
            ActionType::Noop => format!("No change for '{}'", self.resource_id),
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Noop => "noop",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.action_type, self.resource_id)?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for DeploymentPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.has_changes() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Deployment plan (generation {}):", self.generation)?;
        for (i, action) in self.actionable_actions().iter().enumerate() {
            writeln!(f, "  {}. {action}", i + 1)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigHasher, ConfigParser, DeployConfig};
    use crate::graph::attrs_to_json;
    use crate::planner::diff::DiffEngine;
    use crate::state::ResourceRecord;
    use serde_json::Value;

    fn parse(yaml: &str) -> DeployConfig {
        ConfigParser::new().parse_yaml(yaml, None).expect("parse")
    }

    fn snapshot_for(config: &DeployConfig, generation: u64) -> Snapshot {
        let hasher = ConfigHasher::new();
        let graph = config.build_graph().expect("graph");
        let mut snapshot = Snapshot::new(&config.project.name, &config.project.environment);
        snapshot.generation = generation;
        for spec in &config.resources {
            let mut record = ResourceRecord::new(
                &spec.id,
                spec.kind,
                Value::Object(attrs_to_json(&spec.config)),
                &hasher.hash_resource(spec),
                graph.dependencies_of(&spec.id),
            );
            record.physical_resource_id = format!("physical-{}", spec.id);
            snapshot.set_record(record);
        }
        snapshot
    }

    fn plan_for(config: &DeployConfig, snapshot: Option<&Snapshot>) -> DeploymentPlan {
        let graph = config.build_graph().expect("graph");
        graph.validate().expect("valid graph");
        let hasher = ConfigHasher::new();
        let diff = DiffEngine::new().compute_diff(config, &graph, snapshot);
        DeploymentPlan::from_diff(&diff, &graph, snapshot, &hasher.hash_config(config))
            .expect("plan")
    }

    const DEPENDENT_STACK: &str = r"
project:
  name: elk-telemetry
state:
  backend: local
resources:
  - id: collar
    kind: thing
    config:
      thing_name: elk-collar
  - id: cert-to-thing
    kind: attachment
    config:
      principal: arn:static
      thing: ${collar.thingName}
";

    #[test]
    fn test_identical_stack_plans_all_noops() {
        let config = parse(DEPENDENT_STACK);
        let snapshot = snapshot_for(&config, 4);

        let plan = plan_for(&config, Some(&snapshot));
        assert!(!plan.has_changes());
        assert_eq!(plan.action_count(), 2);
        assert!(plan.actions.iter().all(|a| a.action_type == ActionType::Noop));
        assert_eq!(plan.generation, 5);
    }

    #[test]
    fn test_deletes_run_in_reverse_dependency_order() {
        let config = parse(DEPENDENT_STACK);
        let snapshot = snapshot_for(&config, 1);

        let empty = parse(
            r"
project:
  name: elk-telemetry
state:
  backend: local
resources: []
",
        );
        let plan = plan_for(&empty, Some(&snapshot));

        let deletes: Vec<&str> = plan
            .actions
            .iter()
            .filter(|a| a.action_type == ActionType::Delete)
            .map(|a| a.resource_id.as_str())
            .collect();
        // The attachment references the thing, so it is detached first
        assert_eq!(deletes, vec!["cert-to-thing", "collar"]);
    }

    #[test]
    fn test_replacement_is_delete_then_create() {
        let config = parse(DEPENDENT_STACK);
        let snapshot = snapshot_for(&config, 1);

        let changed = parse(&DEPENDENT_STACK.replace("elk-collar", "moose-collar"));
        let plan = plan_for(&changed, Some(&snapshot));

        let collar_actions: Vec<ActionType> = plan
            .actions
            .iter()
            .filter(|a| a.resource_id == "collar")
            .map(|a| a.action_type)
            .collect();
        assert_eq!(collar_actions, vec![ActionType::Delete, ActionType::Create]);
    }

    #[test]
    fn test_removing_on_update_and_changing_config_replaces_custom_resource() {
        let with_update = parse(
            r"
project:
  name: elk-telemetry
state:
  backend: local
resources:
  - id: device-cert
    kind: custom
    config:
      active: true
    on_create:
      service: iot
      action: CreateKeysAndCertificate
    on_update:
      service: iot
      action: UpdateCertificate
",
        );
        let snapshot = snapshot_for(&with_update, 1);

        let without_update = parse(
            r"
project:
  name: elk-telemetry
state:
  backend: local
resources:
  - id: device-cert
    kind: custom
    config:
      active: false
    on_create:
      service: iot
      action: CreateKeysAndCertificate
",
        );
        let plan = plan_for(&without_update, Some(&snapshot));

        let actions: Vec<ActionType> = plan
            .actions
            .iter()
            .filter(|a| a.resource_id == "device-cert")
            .map(|a| a.action_type)
            .collect();
        assert_eq!(actions, vec![ActionType::Delete, ActionType::Create]);
    }

    #[test]
    fn test_creates_follow_topological_order() {
        let config = parse(DEPENDENT_STACK);
        let plan = plan_for(&config, None);

        let creates: Vec<&str> = plan
            .actions
            .iter()
            .filter(|a| a.action_type == ActionType::Create)
            .map(|a| a.resource_id.as_str())
            .collect();
        assert_eq!(creates, vec!["collar", "cert-to-thing"]);
        assert_eq!(plan.generation, 1);
    }
}
