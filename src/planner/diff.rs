//! Diff engine for comparing the declared graph against the previous
//! generation's snapshot.
//!
//! Each resource is classified as create, update, replace, delete, or
//! unchanged. Replacement is chosen over update when the stable name
//! attribute changed or the resource has no in-place update call (including
//! custom resources without `on_update`).

use serde_json::Value;
use tracing::debug;

use crate::config::{ConfigHasher, DeployConfig};
use crate::graph::{attrs_to_json, ResourceGraph, ResourceKind, ResourceNode};
use crate::state::{ResourceRecord, Snapshot};

/// Engine for computing diffs between generations.
#[derive(Debug, Default)]
pub struct DiffEngine {
    /// Configuration hasher.
    hasher: ConfigHasher,
}

/// Difference for a single resource.
#[derive(Debug, Clone)]
pub struct ResourceDiff {
    /// Resource id.
    pub id: String,
    /// Kind tag.
    pub kind: ResourceKind,
    /// Type of difference.
    pub diff_type: DiffType,
    /// Details about the difference.
    pub details: Vec<DiffDetail>,
    /// Previous hash (if applicable).
    pub old_hash: Option<String>,
    /// New hash (if applicable).
    pub new_hash: Option<String>,
}

/// Type of difference detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffType {
    /// Resource needs to be created.
    Create,
    /// Resource needs an in-place update.
    Update,
    /// Resource needs to be deleted and recreated with a new identity.
    Replace,
    /// Resource needs to be deleted.
    Delete,
    /// Resource is unchanged.
    NoChange,
}

/// Detail about a specific difference.
#[derive(Debug, Clone)]
pub struct DiffDetail {
    /// Attribute that differs.
    pub field: String,
    /// Old value.
    pub old_value: Option<String>,
    /// New value.
    pub new_value: Option<String>,
}

/// Complete diff result.
#[derive(Debug)]
pub struct DiffResult {
    /// All resource diffs.
    pub diffs: Vec<ResourceDiff>,
    /// Number of resources to create.
    pub creates: usize,
    /// Number of resources to update in place.
    pub updates: usize,
    /// Number of resources to replace.
    pub replacements: usize,
    /// Number of resources to delete.
    pub deletes: usize,
    /// Number of unchanged resources.
    pub unchanged: usize,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: ConfigHasher::new(),
        }
    }

    /// Computes the diff between the declared graph and the previous
    /// snapshot.
    #[must_use]
    pub fn compute_diff(
        &self,
        config: &DeployConfig,
        graph: &ResourceGraph,
        snapshot: Option<&Snapshot>,
    ) -> DiffResult {
        let mut diffs = Vec::new();

        // Check each declared resource, in declaration order
        for node in graph.nodes() {
            let Some(spec) = config.resource(&node.id) else {
                continue;
            };
            let new_hash = self.hasher.hash_resource(spec);
            let record = snapshot.and_then(|s| s.record(&node.id));

            diffs.push(Self::compute_node_diff(node, record, &new_hash));
        }

        // Check for recorded resources that left the stack (to be deleted)
        if let Some(snapshot) = snapshot {
            for (id, record) in &snapshot.resources {
                if !graph.contains(id) {
                    debug!("Resource '{id}' left the stack, scheduling delete");
                    diffs.push(ResourceDiff {
                        id: id.clone(),
                        kind: record.kind,
                        diff_type: DiffType::Delete,
                        details: vec![DiffDetail {
                            field: String::from("resource"),
                            old_value: Some(record.physical_resource_id.clone()),
                            new_value: None,
                        }],
                        old_hash: Some(record.config_hash.clone()),
                        new_hash: None,
                    });
                }
            }
        }

        // Compute summary
        let creates = diffs.iter().filter(|d| d.diff_type == DiffType::Create).count();
        let updates = diffs.iter().filter(|d| d.diff_type == DiffType::Update).count();
        let replacements = diffs.iter().filter(|d| d.diff_type == DiffType::Replace).count();
        let deletes = diffs.iter().filter(|d| d.diff_type == DiffType::Delete).count();
        let unchanged = diffs.iter().filter(|d| d.diff_type == DiffType::NoChange).count();

        DiffResult {
            diffs,
            creates,
            updates,
            replacements,
            deletes,
            unchanged,
        }
    }

    /// Computes the diff for a single declared resource.
    fn compute_node_diff(
        node: &ResourceNode,
        record: Option<&ResourceRecord>,
        new_hash: &str,
    ) -> ResourceDiff {
        let Some(record) = record else {
            debug!("Resource '{}' needs to be created", node.id);
            return ResourceDiff {
                id: node.id.clone(),
                kind: node.kind,
                diff_type: DiffType::Create,
                details: vec![DiffDetail {
                    field: String::from("resource"),
                    old_value: None,
                    new_value: Some(node.id.clone()),
                }],
                old_hash: None,
                new_hash: Some(new_hash.to_string()),
            };
        };

        if record.config_hash == new_hash {
            debug!("Resource '{}' is up to date", node.id);
            return ResourceDiff {
                id: node.id.clone(),
                kind: node.kind,
                diff_type: DiffType::NoChange,
                details: vec![],
                old_hash: Some(record.config_hash.clone()),
                new_hash: Some(new_hash.to_string()),
            };
        }

        let details = Self::compute_detailed_diff(node, record);
        let diff_type = if Self::requires_replacement(node, record) {
            DiffType::Replace
        } else {
            DiffType::Update
        };

        debug!("Resource '{}' needs {diff_type:?}", node.id);
        ResourceDiff {
            id: node.id.clone(),
            kind: node.kind,
            diff_type,
            details,
            old_hash: Some(record.config_hash.clone()),
            new_hash: Some(new_hash.to_string()),
        }
    }

    /// Decides whether a changed resource must be replaced instead of
    /// updated in place.
    fn requires_replacement(node: &ResourceNode, record: &ResourceRecord) -> bool {
        if !node.supports_in_place_update() {
            return true;
        }

        // A change to the stable name attribute always forces replacement
        node.kind.name_attribute().is_some_and(|attribute| {
            let old = record.config.get(attribute);
            let new = node.config.get(attribute).map(crate::graph::AttrValue::to_json);
            old != new.as_ref()
        })
    }

    /// Computes changed top-level attributes between record and node.
    fn compute_detailed_diff(node: &ResourceNode, record: &ResourceRecord) -> Vec<DiffDetail> {
        let mut details = Vec::new();

        let new_config = attrs_to_json(&node.config);
        let empty = serde_json::Map::new();
        let old_config = record.config.as_object().unwrap_or(&empty);

        let mut attributes: Vec<&String> = new_config.keys().chain(old_config.keys()).collect();
        attributes.sort();
        attributes.dedup();

        for attribute in attributes {
            let old = old_config.get(attribute);
            let new = new_config.get(attribute);
            if old != new {
                details.push(DiffDetail {
                    field: attribute.clone(),
                    old_value: old.map(Value::to_string),
                    new_value: new.map(Value::to_string),
                });
            }
        }

        details
    }
}

impl DiffResult {
    /// Returns true if there are any changes.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.creates > 0 || self.updates > 0 || self.replacements > 0 || self.deletes > 0
    }

    /// Returns the total number of changes.
    #[must_use]
    pub const fn total_changes(&self) -> usize {
        self.creates + self.updates + self.replacements + self.deletes
    }

    /// Filters to only diffs that require action.
    #[must_use]
    pub fn actionable_diffs(&self) -> Vec<&ResourceDiff> {
        self.diffs
            .iter()
            .filter(|d| d.diff_type != DiffType::NoChange)
            .collect()
    }

    /// Gets the diff entry for a resource id.
    #[must_use]
    pub fn diff_for(&self, id: &str) -> Option<&ResourceDiff> {
        self.diffs.iter().find(|d| d.id == id)
    }
}

impl std::fmt::Display for DiffType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::NoChange => "no change",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ResourceDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.id, self.diff_type)?;
        if !self.details.is_empty() {
            write!(f, " (")?;
            for (i, detail) in self.details.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", detail.field)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use serde_json::json;

    fn parse(yaml: &str) -> DeployConfig {
        ConfigParser::new().parse_yaml(yaml, None).expect("parse")
    }

    fn thing_stack(name: &str) -> DeployConfig {
        parse(&format!(
            r"
project:
  name: elk-telemetry
state:
  backend: local
resources:
  - id: collar
    kind: thing
    config:
      thing_name: {name}
"
        ))
    }

    fn snapshot_for(config: &DeployConfig) -> Snapshot {
        let hasher = ConfigHasher::new();
        let mut snapshot = Snapshot::new(&config.project.name, &config.project.environment);
        for spec in &config.resources {
            let record = ResourceRecord::new(
                &spec.id,
                spec.kind,
                Value::Object(attrs_to_json(&spec.config)),
                &hasher.hash_resource(spec),
                vec![],
            );
            snapshot.set_record(record);
        }
        snapshot
    }

    #[test]
    fn test_first_deployment_is_all_creates() {
        let config = thing_stack("elk-collar");
        let graph = config.build_graph().expect("graph");

        let diff = DiffEngine::new().compute_diff(&config, &graph, None);
        assert_eq!(diff.creates, 1);
        assert_eq!(diff.unchanged, 0);
    }

    #[test]
    fn test_identical_stack_is_unchanged() {
        let config = thing_stack("elk-collar");
        let graph = config.build_graph().expect("graph");
        let snapshot = snapshot_for(&config);

        let diff = DiffEngine::new().compute_diff(&config, &graph, Some(&snapshot));
        assert!(!diff.has_changes());
        assert_eq!(diff.unchanged, 1);
    }

    #[test]
    fn test_name_change_forces_replacement() {
        let old_config = thing_stack("elk-collar");
        let snapshot = snapshot_for(&old_config);

        let new_config = thing_stack("moose-collar");
        let graph = new_config.build_graph().expect("graph");

        let diff = DiffEngine::new().compute_diff(&new_config, &graph, Some(&snapshot));
        assert_eq!(diff.replacements, 1);
        assert_eq!(diff.diff_for("collar").expect("diff").diff_type, DiffType::Replace);
    }

    #[test]
    fn test_kind_without_update_call_is_replaced() {
        let old_config = parse(
            r"
project:
  name: elk-telemetry
state:
  backend: local
resources:
  - id: app-repo
    kind: repository
    config:
      repository_name: my-iot-gps-app
",
        );
        let snapshot = snapshot_for(&old_config);

        let new_config = parse(
            r#"
project:
  name: elk-telemetry
state:
  backend: local
resources:
  - id: app-repo
    kind: repository
    config:
      repository_name: my-iot-gps-app
      image_tag_mutability: "IMMUTABLE"
"#,
        );
        let graph = new_config.build_graph().expect("graph");

        let diff = DiffEngine::new().compute_diff(&new_config, &graph, Some(&snapshot));
        assert_eq!(diff.diff_for("app-repo").expect("diff").diff_type, DiffType::Replace);
    }

    #[test]
    fn test_updatable_kind_updates_in_place() {
        let old_config = parse(
            r"
project:
  name: elk-telemetry
state:
  backend: local
resources:
  - id: collar
    kind: thing
    config:
      thing_name: elk-collar
",
        );
        let snapshot = snapshot_for(&old_config);

        let new_config = parse(
            r#"
project:
  name: elk-telemetry
state:
  backend: local
resources:
  - id: collar
    kind: thing
    config:
      thing_name: elk-collar
      attributes:
        herd: "rocky-mountain"
"#,
        );
        let graph = new_config.build_graph().expect("graph");

        let diff = DiffEngine::new().compute_diff(&new_config, &graph, Some(&snapshot));
        let entry = diff.diff_for("collar").expect("diff");
        assert_eq!(entry.diff_type, DiffType::Update);
        assert_eq!(entry.details.len(), 1);
        assert_eq!(entry.details[0].field, "attributes");
    }

    #[test]
    fn test_custom_without_on_update_is_replaced_on_change() {
        let old_config = parse(
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
",
        );
        let snapshot = snapshot_for(&old_config);

        let new_config = parse(
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
        let graph = new_config.build_graph().expect("graph");

        let diff = DiffEngine::new().compute_diff(&new_config, &graph, Some(&snapshot));
        assert_eq!(diff.diff_for("device-cert").expect("diff").diff_type, DiffType::Replace);
    }

    #[test]
    fn test_removed_resource_is_deleted() {
        let old_config = thing_stack("elk-collar");
        let mut snapshot = snapshot_for(&old_config);
        snapshot
            .record_mut("collar")
            .expect("record")
            .physical_resource_id = String::from("arn:thing");

        let new_config = parse(
            r"
project:
  name: elk-telemetry
state:
  backend: local
resources: []
",
        );
        let graph = new_config.build_graph().expect("graph");

        let diff = DiffEngine::new().compute_diff(&new_config, &graph, Some(&snapshot));
        assert_eq!(diff.deletes, 1);
        let entry = diff.diff_for("collar").expect("diff");
        assert_eq!(entry.diff_type, DiffType::Delete);
        assert_eq!(entry.details[0].old_value.as_deref(), Some("arn:thing"));
    }

    #[test]
    fn test_unresolved_reference_values_do_not_affect_diff() {
        // The hash covers the reference expression, not the resolved value,
        // so a dependency refreshing its outputs leaves dependents unchanged.
        let config = parse(
            r"
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
",
        );
        let graph = config.build_graph().expect("graph");
        let mut snapshot = snapshot_for(&config);
        snapshot
            .record_mut("collar")
            .expect("record")
            .outputs
            .insert(String::from("thingName"), json!("elk-collar"));

        let diff = DiffEngine::new().compute_diff(&config, &graph, Some(&snapshot));
        assert!(!diff.has_changes());
    }
}
