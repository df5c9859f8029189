//! Custom resource bridge.
//!
//! Bridges declarative provisioning and imperative external API calls: a
//! custom resource's lifecycle is performed by invoking the call descriptor
//! matching the current action, and the response fields are normalized into
//! output attributes that downstream resources consume like any declared
//! attribute.
//!
//! Idempotency of the external call itself is delegated to the external
//! API; the bridge guarantees only that `on_create` is invoked at most once
//! per resource and generation, and that update and delete calls carry the
//! stored physical resource id.

use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::Result;

use super::call::{ResolvedCall, PHYSICAL_ID_PARAMETER};
use super::executor::ApiExecutor;

/// Result of a provisioning call: normalized outputs plus the physical
/// resource id addressing the external resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Provisioned {
    /// Output attributes, consumable by downstream resources.
    pub outputs: serde_json::Map<String, Value>,
    /// Idempotency key for subsequent update and delete calls.
    pub physical_resource_id: String,
}

/// Merges response fields over previous outputs.
///
/// A field not returned by the newer call retains its previous value.
#[must_use]
pub fn merge_outputs(
    previous: &serde_json::Map<String, Value>,
    response: serde_json::Map<String, Value>,
) -> serde_json::Map<String, Value> {
    let mut merged = previous.clone();
    merged.extend(response);
    merged
}

/// Executes custom resource lifecycle calls.
pub struct CustomResourceBridge<'a> {
    /// Injected external-call executor.
    executor: &'a dyn ApiExecutor,
}

impl<'a> CustomResourceBridge<'a> {
    /// Creates a bridge around an executor.
    #[must_use]
    pub const fn new(executor: &'a dyn ApiExecutor) -> Self {
        Self { executor }
    }

    /// Invokes the `on_create` descriptor.
    ///
    /// The physical resource id is taken from the declared response field,
    /// or synthesized when none is declared or the field is absent.
    ///
    /// # Errors
    ///
    /// Returns the underlying provider error if the call fails; outputs are
    /// left unset in that case.
    pub async fn create(&self, node_id: &str, on_create: &ResolvedCall) -> Result<Provisioned> {
        info!("Creating custom resource '{node_id}' via {}", on_create.call);

        let response = self.executor.invoke(&on_create.call).await?;

        let physical_resource_id = on_create
            .physical_resource_id_field
            .as_deref()
            .and_then(|field| response.string_field(field))
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        debug!(
            "Custom resource '{node_id}' created (physical id: {physical_resource_id}, {} output field(s))",
            response.fields.len()
        );

        Ok(Provisioned {
            outputs: response.fields,
            physical_resource_id,
        })
    }

    /// Invokes the `on_update` descriptor, passing the stored physical
    /// resource id.
    ///
    /// Response fields are merged over the previous outputs; if the declared
    /// physical-id field is present in the response, the returned id
    /// replaces the stored one.
    ///
    /// # Errors
    ///
    /// Returns the underlying provider error if the call fails; outputs
    /// keep their previous value in that case.
    pub async fn update(
        &self,
        node_id: &str,
        on_update: &ResolvedCall,
        physical_resource_id: &str,
        previous_outputs: &serde_json::Map<String, Value>,
    ) -> Result<Provisioned> {
        info!("Updating custom resource '{node_id}' via {}", on_update.call);

        let call = on_update.call.clone().with_parameter(
            PHYSICAL_ID_PARAMETER,
            Value::String(physical_resource_id.to_string()),
        );

        let response = self.executor.invoke(&call).await?;

        let physical_resource_id = on_update
            .physical_resource_id_field
            .as_deref()
            .and_then(|field| response.string_field(field))
            .unwrap_or_else(|| physical_resource_id.to_string());

        Ok(Provisioned {
            outputs: merge_outputs(previous_outputs, response.fields),
            physical_resource_id,
        })
    }

    /// Invokes the `on_delete` descriptor if declared, passing the stored
    /// physical resource id. Without a descriptor, deletion is a no-op at
    /// the external-API level and the resource is simply dropped.
    ///
    /// # Errors
    ///
    /// Returns the underlying provider error if the call fails.
    pub async fn delete(
        &self,
        node_id: &str,
        on_delete: Option<&ResolvedCall>,
        physical_resource_id: &str,
    ) -> Result<()> {
        let Some(on_delete) = on_delete else {
            debug!("Custom resource '{node_id}' has no on_delete; dropping without external call");
            return Ok(());
        };

        info!("Deleting custom resource '{node_id}' via {}", on_delete.call);

        let call = on_delete.call.clone().with_parameter(
            PHYSICAL_ID_PARAMETER,
            Value::String(physical_resource_id.to_string()),
        );

        self.executor.invoke(&call).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::call::{ApiCall, ApiResponse};
    use crate::provider::executor::MockApiExecutor;
    use serde_json::json;

    fn resolved(service: &str, action: &str, id_field: Option<&str>) -> ResolvedCall {
        ResolvedCall {
            call: ApiCall::new(service, action),
            physical_resource_id_field: id_field.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_create_extracts_declared_physical_id() {
        let mut executor = MockApiExecutor::new();
        executor.expect_invoke().times(1).returning(|_| {
            Ok(ApiResponse::from_json(json!({
                "certificateArn": "arn:aws:iot:us-west-2:123456789012:cert/abc",
                "certificateId": "abc",
            }))
            .expect("object"))
        });

        let bridge = CustomResourceBridge::new(&executor);
        let provisioned = bridge
            .create(
                "device-cert",
                &resolved("iot", "CreateKeysAndCertificate", Some("certificateId")),
            )
            .await
            .expect("create");

        assert_eq!(provisioned.physical_resource_id, "abc");
        assert_eq!(
            provisioned.outputs.get("certificateArn"),
            Some(&json!("arn:aws:iot:us-west-2:123456789012:cert/abc"))
        );
    }

    #[tokio::test]
    async fn test_create_synthesizes_physical_id_when_undeclared() {
        let mut executor = MockApiExecutor::new();
        executor
            .expect_invoke()
            .returning(|_| Ok(ApiResponse::from_json(json!({})).expect("object")));

        let bridge = CustomResourceBridge::new(&executor);
        let provisioned = bridge
            .create("device-cert", &resolved("iot", "CreateKeysAndCertificate", None))
            .await
            .expect("create");

        assert!(!provisioned.physical_resource_id.is_empty());
    }

    #[tokio::test]
    async fn test_update_passes_physical_id_and_merges_outputs() {
        let mut executor = MockApiExecutor::new();
        executor
            .expect_invoke()
            .withf(|call| call.parameters.get(PHYSICAL_ID_PARAMETER) == Some(&json!("abc")))
            .times(1)
            .returning(|_| {
                Ok(ApiResponse::from_json(json!({"status": "ACTIVE"})).expect("object"))
            });

        let previous = json!({
            "certificateArn": "arn:aws:iot:us-west-2:123456789012:cert/abc",
            "status": "INACTIVE",
        });

        let bridge = CustomResourceBridge::new(&executor);
        let provisioned = bridge
            .update(
                "device-cert",
                &resolved("iot", "UpdateCertificate", None),
                "abc",
                previous.as_object().expect("object"),
            )
            .await
            .expect("update");

        // Fields the update call did not return keep their previous value.
        assert_eq!(
            provisioned.outputs.get("certificateArn"),
            Some(&json!("arn:aws:iot:us-west-2:123456789012:cert/abc"))
        );
        assert_eq!(provisioned.outputs.get("status"), Some(&json!("ACTIVE")));
        assert_eq!(provisioned.physical_resource_id, "abc");
    }

    #[tokio::test]
    async fn test_delete_without_descriptor_is_a_noop() {
        let mut executor = MockApiExecutor::new();
        executor.expect_invoke().times(0);

        let bridge = CustomResourceBridge::new(&executor);
        bridge
            .delete("device-cert", None, "abc")
            .await
            .expect("delete without descriptor");
    }
}
