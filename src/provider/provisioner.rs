//! Resource provisioner.
//!
//! Maps a resolved resource to the control-plane calls that realize it.
//! Native kinds are a direct mapping from configuration to a single
//! create/update/delete action; custom resources are delegated to the
//! [`CustomResourceBridge`].

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{KorralError, Result};
use crate::graph::ResourceKind;

use super::bridge::{merge_outputs, CustomResourceBridge, Provisioned};
use super::call::{ApiCall, ResolvedHooks, PHYSICAL_ID_PARAMETER};
use super::executor::ApiExecutor;

/// A resource whose configuration and hook parameters have been resolved to
/// plain values, ready to provision.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedNode {
    /// Resource id.
    pub id: String,
    /// Kind tag.
    pub kind: ResourceKind,
    /// Resolved configuration attributes.
    pub config: serde_json::Map<String, Value>,
    /// Resolved lifecycle calls, present only for custom resources.
    pub hooks: Option<ResolvedHooks>,
}

/// Native lifecycle operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NativeOp {
    Create,
    Update,
    Delete,
}

/// Provisions resources through an injected external-call executor.
pub struct ResourceProvisioner {
    /// Injected external-call executor.
    executor: Arc<dyn ApiExecutor>,
}

impl ResourceProvisioner {
    /// Creates a provisioner around an executor.
    #[must_use]
    pub fn new(executor: Arc<dyn ApiExecutor>) -> Self {
        Self { executor }
    }

    /// Creates the external resource for a node.
    ///
    /// # Errors
    ///
    /// Returns an error if the external call fails; outputs are left unset
    /// in that case.
    pub async fn create(&self, node: &ResolvedNode) -> Result<Provisioned> {
        if node.kind.is_custom() {
            let hooks = Self::require_hooks(node)?;
            let bridge = CustomResourceBridge::new(self.executor.as_ref());
            return bridge.create(&node.id, &hooks.on_create).await;
        }

        info!("Creating {} '{}'", node.kind, node.id);

        let call = self.native_call(node, NativeOp::Create, None)?;
        let response = self.executor.invoke(&call).await?;

        let physical_resource_id = node
            .kind
            .physical_id_field()
            .and_then(|field| response.string_field(field))
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        debug!(
            "Created {} '{}' (physical id: {physical_resource_id})",
            node.kind, node.id
        );

        Ok(Provisioned {
            outputs: response.fields,
            physical_resource_id,
        })
    }

    /// Updates the external resource for a node in place.
    ///
    /// Callers must only schedule in-place updates for nodes that support
    /// them; kinds without an update call are replaced instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the external call fails; outputs keep their
    /// previous value in that case.
    pub async fn update(
        &self,
        node: &ResolvedNode,
        physical_resource_id: &str,
        previous_outputs: &serde_json::Map<String, Value>,
    ) -> Result<Provisioned> {
        if node.kind.is_custom() {
            let hooks = Self::require_hooks(node)?;
            let Some(on_update) = &hooks.on_update else {
                return Err(KorralError::internal(format!(
                    "custom resource '{}' has no on_update and must be replaced",
                    node.id
                )));
            };
            let bridge = CustomResourceBridge::new(self.executor.as_ref());
            return bridge
                .update(&node.id, on_update, physical_resource_id, previous_outputs)
                .await;
        }

        info!("Updating {} '{}'", node.kind, node.id);

        let call = self.native_call(node, NativeOp::Update, Some(physical_resource_id))?;
        let response = self.executor.invoke(&call).await?;

        let physical_resource_id = node
            .kind
            .physical_id_field()
            .and_then(|field| response.string_field(field))
            .unwrap_or_else(|| physical_resource_id.to_string());

        Ok(Provisioned {
            outputs: merge_outputs(previous_outputs, response.fields),
            physical_resource_id,
        })
    }

    /// Deletes the external resource for a node.
    ///
    /// # Errors
    ///
    /// Returns an error if the external call fails.
    pub async fn delete(&self, node: &ResolvedNode, physical_resource_id: &str) -> Result<()> {
        if node.kind.is_custom() {
            let on_delete = node.hooks.as_ref().and_then(|h| h.on_delete.as_ref());
            let bridge = CustomResourceBridge::new(self.executor.as_ref());
            return bridge.delete(&node.id, on_delete, physical_resource_id).await;
        }

        info!("Deleting {} '{}'", node.kind, node.id);

        let call = self.native_call(node, NativeOp::Delete, Some(physical_resource_id))?;
        self.executor.invoke(&call).await?;
        Ok(())
    }

    /// Builds the control-plane call for a native lifecycle operation.
    fn native_call(
        &self,
        node: &ResolvedNode,
        op: NativeOp,
        physical_resource_id: Option<&str>,
    ) -> Result<ApiCall> {
        let service = node.kind.service().ok_or_else(|| {
            KorralError::internal(format!("resource '{}' has no native service mapping", node.id))
        })?;
        let action = Self::native_action(node, op)?;

        let mut call = ApiCall::new(service, action).with_parameters(node.config.clone());
        if let Some(id) = physical_resource_id {
            call = call.with_parameter(PHYSICAL_ID_PARAMETER, Value::String(id.to_string()));
        }

        Ok(call)
    }

    /// Returns the action name for a native lifecycle operation.
    fn native_action(node: &ResolvedNode, op: NativeOp) -> Result<&'static str> {
        let action = match (node.kind, op) {
            (ResourceKind::Repository, NativeOp::Create) => Some("CreateRepository"),
            (ResourceKind::Repository, NativeOp::Delete) => Some("DeleteRepository"),
            (ResourceKind::Role, NativeOp::Create) => Some("CreateRole"),
            (ResourceKind::Role, NativeOp::Update) => Some("UpdateRole"),
            (ResourceKind::Role, NativeOp::Delete) => Some("DeleteRole"),
            (ResourceKind::Cluster, NativeOp::Create) => Some("CreateCluster"),
            (ResourceKind::Cluster, NativeOp::Delete) => Some("DeleteCluster"),
            (ResourceKind::TaskDefinition, NativeOp::Create) => Some("RegisterTaskDefinition"),
            (ResourceKind::TaskDefinition, NativeOp::Delete) => Some("DeregisterTaskDefinition"),
            (ResourceKind::Service, NativeOp::Create) => Some("CreateService"),
            (ResourceKind::Service, NativeOp::Update) => Some("UpdateService"),
            (ResourceKind::Service, NativeOp::Delete) => Some("DeleteService"),
            (ResourceKind::Policy, NativeOp::Create) => Some("CreatePolicy"),
            (ResourceKind::Policy, NativeOp::Delete) => Some("DeletePolicy"),
            (ResourceKind::Thing, NativeOp::Create) => Some("CreateThing"),
            (ResourceKind::Thing, NativeOp::Update) => Some("UpdateThing"),
            (ResourceKind::Thing, NativeOp::Delete) => Some("DeleteThing"),
            (ResourceKind::Attachment, NativeOp::Create | NativeOp::Delete) => {
                return Self::attachment_action(node, op);
            }
            _ => None,
        };

        action.ok_or_else(|| {
            KorralError::internal(format!(
                "{} '{}' does not support this lifecycle operation",
                node.kind, node.id
            ))
        })
    }

    /// Picks the attachment action from the configured target.
    fn attachment_action(node: &ResolvedNode, op: NativeOp) -> Result<&'static str> {
        let to_thing = node.config.contains_key("thing");
        let to_policy = node.config.contains_key("policy");

        match (to_thing, to_policy, op) {
            (true, false, NativeOp::Create) => Ok("AttachThingPrincipal"),
            (true, false, NativeOp::Delete) => Ok("DetachThingPrincipal"),
            (false, true, NativeOp::Create) => Ok("AttachPrincipalPolicy"),
            (false, true, NativeOp::Delete) => Ok("DetachPrincipalPolicy"),
            _ => Err(KorralError::internal(format!(
                "attachment '{}' must target exactly one of 'thing' or 'policy'",
                node.id
            ))),
        }
    }

    /// Returns the resolved hooks of a custom resource.
    fn require_hooks(node: &ResolvedNode) -> Result<&ResolvedHooks> {
        node.hooks.as_ref().ok_or_else(|| {
            KorralError::internal(format!(
                "custom resource '{}' has no lifecycle descriptors",
                node.id
            ))
        })
    }
}
