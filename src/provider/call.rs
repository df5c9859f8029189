//! External API call descriptors.
//!
//! A [`CallSpec`] is the declarative form written in stack files: service
//! name, action name, parameters (which may reference other resources'
//! outputs), and the response field that carries the physical resource id.
//! Resolving a spec against provisioned outputs produces a [`ResolvedCall`]
//! ready to hand to the executor.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::graph::{AttrValue, Reference};

/// Parameter injected into update and delete calls to address the external
/// resource created earlier.
pub const PHYSICAL_ID_PARAMETER: &str = "physicalResourceId";

/// A declarative external API call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSpec {
    /// Control-plane service name (e.g. `iot`).
    pub service: String,
    /// Action name (e.g. `CreateKeysAndCertificate`).
    pub action: String,
    /// Call parameters; values may reference other resources' outputs.
    #[serde(default)]
    pub parameters: BTreeMap<String, AttrValue>,
    /// Response field holding the physical resource id. When absent, an id
    /// is synthesized at create time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_resource_id_field: Option<String>,
}

impl CallSpec {
    /// Resolves the parameter references against provisioned outputs.
    ///
    /// # Errors
    ///
    /// Returns the first reference that `lookup` cannot resolve.
    pub fn resolve<F>(&self, lookup: &F) -> std::result::Result<ResolvedCall, Reference>
    where
        F: Fn(&Reference) -> Option<Value>,
    {
        let parameters = crate::graph::resolve_attrs(&self.parameters, lookup)?;
        Ok(ResolvedCall {
            call: ApiCall {
                service: self.service.clone(),
                action: self.action.clone(),
                parameters,
            },
            physical_resource_id_field: self.physical_resource_id_field.clone(),
        })
    }
}

/// A fully resolved API call, ready to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCall {
    /// Control-plane service name.
    pub service: String,
    /// Action name.
    pub action: String,
    /// Resolved call parameters.
    pub parameters: serde_json::Map<String, Value>,
}

impl ApiCall {
    /// Creates a call with no parameters.
    #[must_use]
    pub fn new(service: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            action: action.into(),
            parameters: serde_json::Map::new(),
        }
    }

    /// Sets the call parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: serde_json::Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Adds a single parameter.
    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }
}

impl std::fmt::Display for ApiCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.service, self.action)
    }
}

/// A resolved call paired with its physical-resource-id declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCall {
    /// The call to execute.
    pub call: ApiCall,
    /// Response field holding the physical resource id, if declared.
    pub physical_resource_id_field: Option<String>,
}

/// Resolved lifecycle calls for a custom resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedHooks {
    /// Resolved create call.
    pub on_create: ResolvedCall,
    /// Resolved update call, if declared.
    pub on_update: Option<ResolvedCall>,
    /// Resolved delete call, if declared.
    pub on_delete: Option<ResolvedCall>,
}

/// Response fields returned by an external API call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiResponse {
    /// Raw response fields.
    pub fields: serde_json::Map<String, Value>,
}

impl ApiResponse {
    /// Wraps a response field map.
    #[must_use]
    pub const fn new(fields: serde_json::Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Builds a response from a JSON value, which must be an object.
    #[must_use]
    pub fn from_json(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    /// Returns a response field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Returns a response field rendered as a string.
    #[must_use]
    pub fn string_field(&self, name: &str) -> Option<String> {
        match self.fields.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Returns true if the response carried no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::attrs_from_json;
    use serde_json::json;

    #[test]
    fn test_call_spec_resolves_parameter_references() {
        let spec = CallSpec {
            service: String::from("iot"),
            action: String::from("AttachThingPrincipal"),
            parameters: attrs_from_json(
                json!({
                    "principal": "${device-cert.certificateArn}",
                    "thingName": "elk-collar",
                })
                .as_object()
                .expect("object"),
            ),
            physical_resource_id_field: None,
        };

        let resolved = spec
            .resolve(&|reference: &Reference| {
                (reference.node == "device-cert")
                    .then(|| json!("arn:aws:iot:us-west-2:123456789012:cert/abc"))
            })
            .expect("resolves");

        assert_eq!(resolved.call.action, "AttachThingPrincipal");
        assert_eq!(
            resolved.call.parameters.get("principal"),
            Some(&json!("arn:aws:iot:us-west-2:123456789012:cert/abc"))
        );
        assert_eq!(resolved.call.parameters.get("thingName"), Some(&json!("elk-collar")));
    }

    #[test]
    fn test_call_spec_deserializes_from_yaml() {
        let yaml = r"
service: iot
action: CreateKeysAndCertificate
parameters:
  setAsActive: true
physical_resource_id_field: certificateId
";
        let spec: CallSpec = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(spec.service, "iot");
        assert_eq!(spec.action, "CreateKeysAndCertificate");
        assert_eq!(spec.physical_resource_id_field.as_deref(), Some("certificateId"));
    }

    #[test]
    fn test_response_string_field_stringifies_scalars() {
        let response = ApiResponse::from_json(json!({
            "certificateArn": "arn:aws:iot:us-west-2:123456789012:cert/abc",
            "revision": 3,
        }))
        .expect("object");

        assert_eq!(
            response.string_field("certificateArn").as_deref(),
            Some("arn:aws:iot:us-west-2:123456789012:cert/abc")
        );
        assert_eq!(response.string_field("revision").as_deref(), Some("3"));
        assert_eq!(response.string_field("missing"), None);
    }
}
