//! Attribute values and references.
//!
//! Resource configuration is a tree of literal values in which any string of
//! the form `${resource-id.outputField}` is promoted to a typed [`Reference`]
//! to another resource's output attribute. References are resolved against
//! provisioned outputs immediately before a resource is provisioned.

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A pointer from one resource's configuration to another resource's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Id of the referenced resource.
    pub node: String,
    /// Name of the referenced output attribute.
    pub output: String,
}

impl Reference {
    /// Creates a new reference.
    #[must_use]
    pub fn new(node: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            output: output.into(),
        }
    }

    /// Parses a reference expression of the form `${resource-id.outputField}`.
    ///
    /// Returns `None` if the string is not a reference expression. Partial
    /// interpolation is not supported: the whole string must be the
    /// expression.
    #[must_use]
    pub fn parse(expression: &str) -> Option<Self> {
        let inner = expression.strip_prefix("${")?.strip_suffix('}')?;
        if inner.contains('$') || inner.contains('{') || inner.contains('}') {
            return None;
        }

        let (node, output) = inner.split_once('.')?;
        if node.is_empty() || output.is_empty() {
            return None;
        }

        Some(Self::new(node, output))
    }

    /// Renders the reference back to its `${node.output}` expression form.
    #[must_use]
    pub fn expression(&self) -> String {
        format!("${{{}.{}}}", self.node, self.output)
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.expression())
    }
}

/// A configuration attribute value: a literal or a reference.
///
/// Literals mirror the JSON data model; maps are kept sorted so that hashing
/// and serialization are deterministic.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// Absent value.
    Null,
    /// Boolean literal.
    Bool(bool),
    /// Numeric literal.
    Number(serde_json::Number),
    /// String literal.
    String(String),
    /// List of values.
    List(Vec<AttrValue>),
    /// Map of attribute name to value.
    Map(BTreeMap<String, AttrValue>),
    /// Reference to another resource's output attribute.
    Reference(Reference),
}

impl AttrValue {
    /// Builds an attribute value from a JSON value, promoting reference
    /// expressions to [`AttrValue::Reference`].
    #[must_use]
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => Self::Number(n.clone()),
            Value::String(s) => Reference::parse(s)
                .map_or_else(|| Self::String(s.clone()), Self::Reference),
            Value::Array(items) => Self::List(items.iter().map(Self::from_json).collect()),
            Value::Object(map) => Self::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Renders the value back to JSON, with references in expression form.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::Number(n.clone()),
            Self::String(s) => Value::String(s.clone()),
            Self::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Self::Reference(reference) => Value::String(reference.expression()),
        }
    }

    /// Collects every reference contained in this value tree.
    pub fn collect_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Self::Reference(reference) => out.push(reference),
            Self::List(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            Self::Map(map) => {
                for value in map.values() {
                    value.collect_references(out);
                }
            }
            Self::Null | Self::Bool(_) | Self::Number(_) | Self::String(_) => {}
        }
    }

    /// Returns all references contained in this value tree.
    #[must_use]
    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    /// Resolves this value to plain JSON by substituting each reference with
    /// the value returned by `lookup`.
    ///
    /// # Errors
    ///
    /// Returns the first reference that `lookup` cannot resolve.
    pub fn resolve<F>(&self, lookup: &F) -> std::result::Result<Value, Reference>
    where
        F: Fn(&Reference) -> Option<Value>,
    {
        match self {
            Self::Reference(reference) => {
                lookup(reference).ok_or_else(|| reference.clone())
            }
            Self::List(items) => {
                let mut resolved = Vec::with_capacity(items.len());
                for item in items {
                    resolved.push(item.resolve(lookup)?);
                }
                Ok(Value::Array(resolved))
            }
            Self::Map(map) => {
                let mut resolved = serde_json::Map::new();
                for (key, value) in map {
                    resolved.insert(key.clone(), value.resolve(lookup)?);
                }
                Ok(Value::Object(resolved))
            }
            other => Ok(other.to_json()),
        }
    }
}

impl Serialize for AttrValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AttrValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_json(&value))
    }
}

/// Builds an attribute map from a JSON object.
#[must_use]
pub fn attrs_from_json(object: &serde_json::Map<String, Value>) -> BTreeMap<String, AttrValue> {
    object
        .iter()
        .map(|(k, v)| (k.clone(), AttrValue::from_json(v)))
        .collect()
}

/// Renders an attribute map back to a JSON object.
#[must_use]
pub fn attrs_to_json(attrs: &BTreeMap<String, AttrValue>) -> serde_json::Map<String, Value> {
    attrs
        .iter()
        .map(|(k, v)| (k.clone(), v.to_json()))
        .collect()
}

/// Resolves an attribute map to a plain JSON object.
///
/// # Errors
///
/// Returns the first reference that `lookup` cannot resolve.
pub fn resolve_attrs<F>(
    attrs: &BTreeMap<String, AttrValue>,
    lookup: &F,
) -> std::result::Result<serde_json::Map<String, Value>, Reference>
where
    F: Fn(&Reference) -> Option<Value>,
{
    let mut resolved = serde_json::Map::new();
    for (key, value) in attrs {
        resolved.insert(key.clone(), value.resolve(lookup)?);
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_reference_expression() {
        let reference = Reference::parse("${device-cert.certificateArn}").expect("should parse");
        assert_eq!(reference.node, "device-cert");
        assert_eq!(reference.output, "certificateArn");
        assert_eq!(reference.expression(), "${device-cert.certificateArn}");
    }

    #[test]
    fn test_parse_rejects_non_references() {
        assert!(Reference::parse("plain string").is_none());
        assert!(Reference::parse("${no-output}").is_none());
        assert!(Reference::parse("${.missing-node}").is_none());
        assert!(Reference::parse("${missing-output.}").is_none());
        assert!(Reference::parse("prefix ${a.b}").is_none());
        assert!(Reference::parse("${a.b} suffix").is_none());
        assert!(Reference::parse("${outer.${inner.field}}").is_none());
    }

    #[test]
    fn test_from_json_promotes_references() {
        let value = AttrValue::from_json(&json!({
            "principal": "${device-cert.certificateArn}",
            "thing": "elk-collar",
            "tags": ["${tracker.thingArn}", "literal"],
        }));

        let references = value.references();
        assert_eq!(references.len(), 2);
        assert_eq!(references[0].node, "device-cert");
        assert_eq!(references[1].node, "tracker");
    }

    #[test]
    fn test_json_round_trip_preserves_expressions() {
        let original = json!({
            "principal": "${device-cert.certificateArn}",
            "count": 3,
            "active": true,
        });

        let value = AttrValue::from_json(&original);
        assert_eq!(value.to_json(), original);
    }

    #[test]
    fn test_resolve_substitutes_outputs() {
        let value = AttrValue::from_json(&json!({
            "principal": "${device-cert.certificateArn}",
            "thing": "elk-collar",
        }));

        let resolved = value
            .resolve(&|reference: &Reference| {
                (reference.node == "device-cert" && reference.output == "certificateArn")
                    .then(|| json!("arn:aws:iot:us-west-2:123456789012:cert/abc"))
            })
            .expect("should resolve");

        assert_eq!(
            resolved,
            json!({
                "principal": "arn:aws:iot:us-west-2:123456789012:cert/abc",
                "thing": "elk-collar",
            })
        );
    }

    #[test]
    fn test_resolve_reports_unresolvable_reference() {
        let value = AttrValue::from_json(&json!("${ghost.arn}"));
        let err = value.resolve(&|_: &Reference| None).expect_err("should fail");
        assert_eq!(err.node, "ghost");
        assert_eq!(err.output, "arn");
    }
}
