//! Resource nodes and kinds.
//!
//! A node is a declared resource: a stable id, a kind tag, an attribute
//! tree, and (for custom resources) the lifecycle call descriptors. Output
//! attributes are not stored on the node; they live in the persisted
//! snapshot and are written exactly once per generation by the node's own
//! provisioning step.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::provider::CallSpec;

use super::value::{AttrValue, Reference};

/// The fixed set of resource kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Container image repository.
    Repository,
    /// IAM role.
    Role,
    /// Container orchestration cluster.
    Cluster,
    /// Container task definition.
    TaskDefinition,
    /// Long-running container service.
    Service,
    /// IoT device policy.
    Policy,
    /// IoT thing (device identity).
    Thing,
    /// Principal attachment (certificate to thing, or policy to certificate).
    Attachment,
    /// Custom resource provisioned by explicit lifecycle API calls.
    Custom,
}

impl ResourceKind {
    /// Returns the kind tag as written in stack files.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Repository => "repository",
            Self::Role => "role",
            Self::Cluster => "cluster",
            Self::TaskDefinition => "task_definition",
            Self::Service => "service",
            Self::Policy => "policy",
            Self::Thing => "thing",
            Self::Attachment => "attachment",
            Self::Custom => "custom",
        }
    }

    /// Returns the control-plane service that provisions this kind.
    ///
    /// Custom resources carry their service in their call descriptors.
    #[must_use]
    pub const fn service(self) -> Option<&'static str> {
        match self {
            Self::Repository => Some("ecr"),
            Self::Role => Some("iam"),
            Self::Cluster | Self::TaskDefinition | Self::Service => Some("ecs"),
            Self::Policy | Self::Thing | Self::Attachment => Some("iot"),
            Self::Custom => None,
        }
    }

    /// Returns the attribute holding the resource's stable name.
    ///
    /// A change to this attribute forces replacement instead of an in-place
    /// update.
    #[must_use]
    pub const fn name_attribute(self) -> Option<&'static str> {
        match self {
            Self::Repository => Some("repository_name"),
            Self::Role => Some("role_name"),
            Self::Cluster => Some("cluster_name"),
            Self::TaskDefinition => Some("family"),
            Self::Service => Some("service_name"),
            Self::Policy => Some("policy_name"),
            Self::Thing => Some("thing_name"),
            Self::Attachment | Self::Custom => None,
        }
    }

    /// Returns true if the kind supports an in-place update call.
    ///
    /// Kinds without one are replaced (delete then create) on any
    /// configuration change. Custom resources are decided per node, based on
    /// whether an `on_update` descriptor is declared.
    #[must_use]
    pub const fn supports_update(self) -> bool {
        matches!(self, Self::Role | Self::Service | Self::Thing | Self::Custom)
    }

    /// Returns the response field holding the physical resource id.
    ///
    /// Kinds without one get a synthesized id at create time.
    #[must_use]
    pub const fn physical_id_field(self) -> Option<&'static str> {
        match self {
            Self::Repository => Some("repositoryArn"),
            Self::Role => Some("roleArn"),
            Self::Cluster => Some("clusterArn"),
            Self::TaskDefinition => Some("taskDefinitionArn"),
            Self::Service => Some("serviceArn"),
            Self::Policy => Some("policyArn"),
            Self::Thing => Some("thingArn"),
            Self::Attachment | Self::Custom => None,
        }
    }

    /// Returns the statically known output attributes of this kind.
    ///
    /// `None` means the output set is only known at provisioning time
    /// (custom resources), so references into it cannot be checked during
    /// validation.
    #[must_use]
    pub const fn known_outputs(self) -> Option<&'static [&'static str]> {
        match self {
            Self::Repository => Some(&["repositoryArn", "repositoryUri", "repositoryName", "registryId"]),
            Self::Role => Some(&["roleArn", "roleId", "roleName"]),
            Self::Cluster => Some(&["clusterArn", "clusterName"]),
            Self::TaskDefinition => Some(&["taskDefinitionArn", "family", "revision"]),
            Self::Service => Some(&["serviceArn", "serviceName"]),
            Self::Policy => Some(&["policyArn", "policyName"]),
            Self::Thing => Some(&["thingArn", "thingName", "thingId"]),
            Self::Attachment => Some(&[]),
            Self::Custom => None,
        }
    }

    /// Returns true for the custom resource kind.
    #[must_use]
    pub const fn is_custom(self) -> bool {
        matches!(self, Self::Custom)
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle call descriptors for a custom resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleHooks {
    /// Call executed when the resource is first created.
    pub on_create: CallSpec,
    /// Call executed on configuration changes; absence forces replacement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_update: Option<CallSpec>,
    /// Call executed on deletion; absence makes deletion an external no-op.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<CallSpec>,
}

/// A declared resource in the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceNode {
    /// Stable identifier, unique within the graph.
    pub id: String,
    /// Kind tag.
    pub kind: ResourceKind,
    /// Attribute tree; values may reference other nodes' outputs.
    pub config: BTreeMap<String, AttrValue>,
    /// Lifecycle descriptors, present only for custom resources.
    pub hooks: Option<LifecycleHooks>,
}

impl ResourceNode {
    /// Creates a new node without lifecycle hooks.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: ResourceKind, config: BTreeMap<String, AttrValue>) -> Self {
        Self {
            id: id.into(),
            kind,
            config,
            hooks: None,
        }
    }

    /// Attaches lifecycle hooks to the node.
    #[must_use]
    pub fn with_hooks(mut self, hooks: LifecycleHooks) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Returns true if a configuration change can be applied in place.
    #[must_use]
    pub fn supports_in_place_update(&self) -> bool {
        if self.kind.is_custom() {
            self.hooks.as_ref().is_some_and(|h| h.on_update.is_some())
        } else {
            self.kind.supports_update()
        }
    }

    /// Collects every reference held by this node, labeled with the
    /// attribute (or hook parameter path) it appears under.
    #[must_use]
    pub fn references(&self) -> Vec<(String, &Reference)> {
        let mut out = Vec::new();

        for (attribute, value) in &self.config {
            for reference in value.references() {
                out.push((attribute.clone(), reference));
            }
        }

        if let Some(hooks) = &self.hooks {
            Self::collect_hook_references("on_create", &hooks.on_create, &mut out);
            if let Some(spec) = &hooks.on_update {
                Self::collect_hook_references("on_update", spec, &mut out);
            }
            if let Some(spec) = &hooks.on_delete {
                Self::collect_hook_references("on_delete", spec, &mut out);
            }
        }

        out
    }

    fn collect_hook_references<'a>(
        hook: &str,
        spec: &'a CallSpec,
        out: &mut Vec<(String, &'a Reference)>,
    ) {
        for (parameter, value) in &spec.parameters {
            for reference in value.references() {
                out.push((format!("{hook}.{parameter}"), reference));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::value::attrs_from_json;
    use serde_json::json;

    fn attachment_config() -> BTreeMap<String, AttrValue> {
        let json = json!({
            "principal": "${device-cert.certificateArn}",
            "thing": "${collar.thingName}",
        });
        attrs_from_json(json.as_object().expect("object"))
    }

    #[test]
    fn test_node_collects_config_references() {
        let node = ResourceNode::new("cert-to-thing", ResourceKind::Attachment, attachment_config());

        let references = node.references();
        assert_eq!(references.len(), 2);
        assert_eq!(references[0].0, "principal");
        assert_eq!(references[0].1.node, "device-cert");
        assert_eq!(references[1].0, "thing");
        assert_eq!(references[1].1.node, "collar");
    }

    #[test]
    fn test_custom_node_collects_hook_references() {
        let hooks = LifecycleHooks {
            on_create: CallSpec {
                service: String::from("iot"),
                action: String::from("CreateKeysAndCertificate"),
                parameters: attrs_from_json(
                    json!({"templateArn": "${provisioning-template.templateArn}"})
                        .as_object()
                        .expect("object"),
                ),
                physical_resource_id_field: Some(String::from("certificateId")),
            },
            on_update: None,
            on_delete: None,
        };

        let node = ResourceNode::new("device-cert", ResourceKind::Custom, BTreeMap::new())
            .with_hooks(hooks);

        let references = node.references();
        assert_eq!(references.len(), 1);
        assert_eq!(references[0].0, "on_create.templateArn");
        assert_eq!(references[0].1.node, "provisioning-template");
    }

    #[test]
    fn test_in_place_update_support() {
        let thing = ResourceNode::new("collar", ResourceKind::Thing, BTreeMap::new());
        assert!(thing.supports_in_place_update());

        let repository = ResourceNode::new("images", ResourceKind::Repository, BTreeMap::new());
        assert!(!repository.supports_in_place_update());

        let custom = ResourceNode::new("device-cert", ResourceKind::Custom, BTreeMap::new())
            .with_hooks(LifecycleHooks {
                on_create: CallSpec {
                    service: String::from("iot"),
                    action: String::from("CreateKeysAndCertificate"),
                    parameters: BTreeMap::new(),
                    physical_resource_id_field: None,
                },
                on_update: None,
                on_delete: None,
            });
        assert!(!custom.supports_in_place_update());
    }

    #[test]
    fn test_kind_round_trips_through_serde() {
        let kind: ResourceKind = serde_json::from_str("\"task_definition\"").expect("deserialize");
        assert_eq!(kind, ResourceKind::TaskDefinition);
        assert_eq!(serde_json::to_string(&kind).expect("serialize"), "\"task_definition\"");
    }
}
