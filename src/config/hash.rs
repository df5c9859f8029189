//! Configuration hashing for change detection.
//!
//! This module provides deterministic hashing of resource specifications
//! to detect changes between generations and enable idempotent plans.

use sha2::{Digest, Sha256};

use crate::graph::AttrValue;
use crate::provider::CallSpec;

use super::spec::{DeployConfig, ResourceSpec};

/// Hasher for computing configuration hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the entire stack configuration.
    ///
    /// This hash changes when any part of the configuration changes.
    #[must_use]
    pub fn hash_config(&self, config: &DeployConfig) -> String {
        let mut hasher = Sha256::new();

        // Project identity
        hasher.update(config.project.name.as_bytes());
        hasher.update(config.project.environment.as_bytes());
        if let Some(account) = &config.project.account {
            hasher.update(account.as_bytes());
        }
        if let Some(region) = &config.project.region {
            hasher.update(region.as_bytes());
        }

        // Each resource
        for resource in &config.resources {
            hasher.update(self.hash_resource(resource).as_bytes());
        }

        // Exports (BTreeMap iteration is already sorted)
        for (name, expression) in &config.exports {
            hasher.update(name.as_bytes());
            hasher.update(expression.as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a hash for a single resource specification.
    ///
    /// This hash is used to detect changes to individual resources; it
    /// covers the kind, the attribute tree, and the lifecycle descriptors,
    /// so removing `on_update` from a custom resource changes its hash.
    #[must_use]
    pub fn hash_resource(&self, resource: &ResourceSpec) -> String {
        let mut hasher = Sha256::new();

        // Resource identity
        hasher.update(resource.id.as_bytes());
        hasher.update(resource.kind.as_str().as_bytes());

        // Attribute tree (BTreeMap keeps keys sorted)
        for (attribute, value) in &resource.config {
            hasher.update(attribute.as_bytes());
            Self::update_value(&mut hasher, value);
        }

        // Lifecycle descriptors
        for (tag, spec) in [
            ("on_create", resource.on_create.as_ref()),
            ("on_update", resource.on_update.as_ref()),
            ("on_delete", resource.on_delete.as_ref()),
        ] {
            if let Some(spec) = spec {
                hasher.update(tag.as_bytes());
                Self::update_call_spec(&mut hasher, spec);
            }
        }

        hex::encode(hasher.finalize())
    }

    /// Feeds an attribute value into the hasher with a type tag, so that
    /// e.g. the string "true" and the boolean true hash differently.
    fn update_value(hasher: &mut Sha256, value: &AttrValue) {
        match value {
            AttrValue::Null => hasher.update([0u8]),
            AttrValue::Bool(b) => {
                hasher.update([1u8]);
                hasher.update([u8::from(*b)]);
            }
            AttrValue::Number(n) => {
                hasher.update([2u8]);
                hasher.update(n.to_string().as_bytes());
            }
            AttrValue::String(s) => {
                hasher.update([3u8]);
                hasher.update(s.as_bytes());
            }
            AttrValue::List(items) => {
                hasher.update([4u8]);
                for item in items {
                    Self::update_value(hasher, item);
                }
            }
            AttrValue::Map(map) => {
                hasher.update([5u8]);
                for (key, item) in map {
                    hasher.update(key.as_bytes());
                    Self::update_value(hasher, item);
                }
            }
            AttrValue::Reference(reference) => {
                hasher.update([6u8]);
                hasher.update(reference.node.as_bytes());
                hasher.update(reference.output.as_bytes());
            }
        }
    }

    /// Feeds a call descriptor into the hasher.
    fn update_call_spec(hasher: &mut Sha256, spec: &CallSpec) {
        hasher.update(spec.service.as_bytes());
        hasher.update(spec.action.as_bytes());
        for (parameter, value) in &spec.parameters {
            hasher.update(parameter.as_bytes());
            Self::update_value(hasher, value);
        }
        if let Some(field) = &spec.physical_resource_id_field {
            hasher.update(field.as_bytes());
        }
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes to determine if they are equal.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        // Use constant-time comparison to avoid timing attacks
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{attrs_from_json, ResourceKind};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn thing_spec(name: &str) -> ResourceSpec {
        ResourceSpec {
            id: String::from("collar"),
            kind: ResourceKind::Thing,
            config: attrs_from_json(json!({"thing_name": name}).as_object().expect("object")),
            on_create: None,
            on_update: None,
            on_delete: None,
        }
    }

    fn certificate_spec(with_update: bool) -> ResourceSpec {
        ResourceSpec {
            id: String::from("device-cert"),
            kind: ResourceKind::Custom,
            config: BTreeMap::new(),
            on_create: Some(CallSpec {
                service: String::from("iot"),
                action: String::from("CreateKeysAndCertificate"),
                parameters: attrs_from_json(json!({"setAsActive": true}).as_object().expect("object")),
                physical_resource_id_field: Some(String::from("certificateId")),
            }),
            on_update: with_update.then(|| CallSpec {
                service: String::from("iot"),
                action: String::from("UpdateCertificate"),
                parameters: BTreeMap::new(),
                physical_resource_id_field: None,
            }),
            on_delete: None,
        }
    }

    #[test]
    fn test_resource_hash_deterministic() {
        let hasher = ConfigHasher::new();
        let spec = thing_spec("elk-collar");

        assert_eq!(hasher.hash_resource(&spec), hasher.hash_resource(&spec));
    }

    #[test]
    fn test_config_change_changes_hash() {
        let hasher = ConfigHasher::new();
        assert_ne!(
            hasher.hash_resource(&thing_spec("elk-collar")),
            hasher.hash_resource(&thing_spec("moose-collar"))
        );
    }

    #[test]
    fn test_removing_on_update_changes_hash() {
        let hasher = ConfigHasher::new();
        assert_ne!(
            hasher.hash_resource(&certificate_spec(true)),
            hasher.hash_resource(&certificate_spec(false))
        );
    }

    #[test]
    fn test_reference_and_literal_hash_differently() {
        let hasher = ConfigHasher::new();

        let mut literal = thing_spec("elk-collar");
        literal.config = attrs_from_json(
            json!({"thing_name": "${other.thingName}x"}).as_object().expect("object"),
        );

        let mut reference = thing_spec("elk-collar");
        reference.config =
            attrs_from_json(json!({"thing_name": "${other.thingNamex}"}).as_object().expect("object"));

        assert_ne!(hasher.hash_resource(&literal), hasher.hash_resource(&reference));
    }

    #[test]
    fn test_short_hash() {
        let hasher = ConfigHasher::new();
        let full_hash = "abcdef1234567890abcdef1234567890";
        let short = hasher.short_hash(full_hash);

        assert_eq!(short, "abcdef12");
        assert_eq!(short.len(), 8);
    }

    #[test]
    fn test_hashes_match() {
        assert!(ConfigHasher::hashes_match("abc123", "abc123"));
        assert!(!ConfigHasher::hashes_match("abc123", "abc124"));
        assert!(!ConfigHasher::hashes_match("abc123", "abc12"));
    }
}
