//! Stack configuration types.
//!
//! This module defines the structs that map to the `korral.stack.yaml` file.
//! These types are declarative: a project header, a state backend, the
//! resource set, and named exports. Resource attribute payloads are carried
//! as attribute trees; the engine only interprets the references inside
//! them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ConfigError, KorralError, Result};
use crate::graph::{AttrValue, LifecycleHooks, ResourceGraph, ResourceKind, ResourceNode};
use crate::provider::CallSpec;

/// The root configuration structure for a Korral stack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeployConfig {
    /// Project-level configuration.
    pub project: ProjectConfig,
    /// State backend configuration.
    pub state: StateConfig,
    /// Declared resources.
    #[serde(default)]
    pub resources: Vec<ResourceSpec>,
    /// Named exports, each a `${resource.output}` reference expression.
    #[serde(default)]
    pub exports: BTreeMap<String, String>,
}

/// Project-level configuration.
///
/// Account and region are explicit configuration, injected into the calls
/// that need them; core logic never reads them from the ambient
/// environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Unique name for the project.
    pub name: String,
    /// Environment (e.g. "dev", "staging", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Cloud account identifier.
    #[serde(default)]
    pub account: Option<String>,
    /// Cloud region.
    #[serde(default)]
    pub region: Option<String>,
}

/// State backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Backend type (local or s3).
    pub backend: StateBackend,
    /// S3 bucket name (required for s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix (optional).
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region (optional, uses AWS default if not specified).
    #[serde(default)]
    pub region: Option<String>,
    /// Local snapshot directory (for local backend).
    #[serde(default)]
    pub path: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based snapshot storage.
    #[default]
    Local,
    /// AWS S3-based snapshot storage.
    S3,
}

/// A declared resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceSpec {
    /// Stable identifier, unique within the stack.
    pub id: String,
    /// Kind tag.
    pub kind: ResourceKind,
    /// Attribute tree; string values of the form `${resource.output}`
    /// reference other resources' outputs.
    #[serde(default)]
    pub config: BTreeMap<String, AttrValue>,
    /// Create call descriptor (custom resources only, mandatory there).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_create: Option<CallSpec>,
    /// Update call descriptor (custom resources only; absence forces
    /// replacement on configuration changes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_update: Option<CallSpec>,
    /// Delete call descriptor (custom resources only; absence makes
    /// deletion an external no-op).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<CallSpec>,
}

impl DeployConfig {
    /// Gets a resource by id.
    #[must_use]
    pub fn resource(&self, id: &str) -> Option<&ResourceSpec> {
        self.resources.iter().find(|r| r.id == id)
    }

    /// Returns all declared resource ids in declaration order.
    #[must_use]
    pub fn resource_ids(&self) -> Vec<&str> {
        self.resources.iter().map(|r| r.id.as_str()).collect()
    }

    /// Builds the resource graph from the declared resources.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed resources (e.g. a custom resource
    /// without `on_create`) or duplicate ids.
    pub fn build_graph(&self) -> Result<ResourceGraph> {
        let mut graph = ResourceGraph::new();
        for spec in &self.resources {
            graph.add_node(spec.to_node()?)?;
        }
        Ok(graph)
    }

    /// Returns a copy of this configuration with no resources or exports,
    /// used to plan a full teardown.
    #[must_use]
    pub fn without_resources(&self) -> Self {
        Self {
            project: self.project.clone(),
            state: self.state.clone(),
            resources: Vec::new(),
            exports: BTreeMap::new(),
        }
    }
}

impl ResourceSpec {
    /// Returns true for custom resources.
    #[must_use]
    pub fn is_custom(&self) -> bool {
        self.kind.is_custom()
    }

    /// Converts the spec into a graph node.
    ///
    /// # Errors
    ///
    /// Returns a validation error if a custom resource lacks `on_create`,
    /// or a non-custom resource declares lifecycle descriptors.
    pub fn to_node(&self) -> Result<ResourceNode> {
        if self.is_custom() {
            let Some(on_create) = self.on_create.clone() else {
                return Err(KorralError::Config(ConfigError::validation(
                    format!("custom resource '{}' requires on_create", self.id),
                    format!("resources.{}.on_create", self.id),
                )));
            };

            return Ok(
                ResourceNode::new(self.id.clone(), self.kind, self.config.clone()).with_hooks(
                    LifecycleHooks {
                        on_create,
                        on_update: self.on_update.clone(),
                        on_delete: self.on_delete.clone(),
                    },
                ),
            );
        }

        if self.on_create.is_some() || self.on_update.is_some() || self.on_delete.is_some() {
            return Err(KorralError::Config(ConfigError::validation(
                format!(
                    "resource '{}' is not custom and cannot declare lifecycle calls",
                    self.id
                ),
                format!("resources.{}", self.id),
            )));
        }

        Ok(ResourceNode::new(self.id.clone(), self.kind, self.config.clone()))
    }
}

/// Default environment name.
fn default_environment() -> String {
    String::from("dev")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_spec_parses_references() {
        let yaml = r"
id: cert-to-thing
kind: attachment
config:
  principal: ${device-cert.certificateArn}
  thing: ${collar.thingName}
";
        let spec: ResourceSpec = serde_yaml::from_str(yaml).expect("parse");
        let node = spec.to_node().expect("to_node");

        let references = node.references();
        assert_eq!(references.len(), 2);
        assert_eq!(references[0].1.node, "device-cert");
    }

    #[test]
    fn test_custom_resource_requires_on_create() {
        let spec = ResourceSpec {
            id: String::from("device-cert"),
            kind: ResourceKind::Custom,
            config: BTreeMap::new(),
            on_create: None,
            on_update: None,
            on_delete: None,
        };

        let err = spec.to_node().expect_err("must fail");
        assert!(matches!(err, KorralError::Config(ConfigError::ValidationError { .. })));
    }

    #[test]
    fn test_native_resource_rejects_lifecycle_calls() {
        let spec = ResourceSpec {
            id: String::from("collar"),
            kind: ResourceKind::Thing,
            config: BTreeMap::new(),
            on_create: Some(CallSpec {
                service: String::from("iot"),
                action: String::from("CreateThing"),
                parameters: BTreeMap::new(),
                physical_resource_id_field: None,
            }),
            on_update: None,
            on_delete: None,
        };

        assert!(spec.to_node().is_err());
    }

    #[test]
    fn test_without_resources_clears_stack() {
        let yaml = r"
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
        let config: DeployConfig = serde_yaml::from_str(yaml).expect("parse");
        let empty = config.without_resources();

        assert!(empty.resources.is_empty());
        assert!(empty.exports.is_empty());
        assert_eq!(empty.project.name, "elk-telemetry");
    }
}
