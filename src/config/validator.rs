//! Stack validation.
//!
//! This module provides validation of stack configurations, ensuring the
//! declared resources are well-formed before any graph is built or any
//! provisioning begins.

use crate::error::{ConfigError, KorralError, Result};
use crate::graph::{AttrValue, Reference, ResourceKind};
use std::collections::HashSet;
use tracing::debug;

use super::spec::{DeployConfig, ResourceSpec, StateBackend};

/// Validator for stack configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a stack configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn validate(&self, config: &DeployConfig) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_project(&config.project, &mut result);
        Self::validate_state(&config.state, &mut result);
        Self::validate_resources(&config.resources, &mut result);
        Self::validate_exports(config, &mut result);

        if result.errors.is_empty() {
            debug!("Stack validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(KorralError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    /// Validates project configuration.
    fn validate_project(project: &super::spec::ProjectConfig, result: &mut ValidationResult) {
        if project.name.is_empty() {
            result.errors.push(ValidationError {
                field: String::from("project.name"),
                message: String::from("Project name cannot be empty"),
            });
        } else if !is_valid_name(&project.name) {
            result.errors.push(ValidationError {
                field: String::from("project.name"),
                message: format!(
                    "Project name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    project.name
                ),
            });
        }

        if project.environment.is_empty() {
            result.errors.push(ValidationError {
                field: String::from("project.environment"),
                message: String::from("Environment cannot be empty"),
            });
        }
    }

    /// Validates state configuration.
    fn validate_state(state: &super::spec::StateConfig, result: &mut ValidationResult) {
        match state.backend {
            StateBackend::S3 => {
                if state.bucket.is_none() || state.bucket.as_ref().is_some_and(String::is_empty) {
                    result.errors.push(ValidationError {
                        field: String::from("state.bucket"),
                        message: String::from("S3 bucket name is required when using S3 backend"),
                    });
                }
            }
            StateBackend::Local => {
                // Local backend is always valid
            }
        }
    }

    /// Validates all resource specifications.
    fn validate_resources(resources: &[ResourceSpec], result: &mut ValidationResult) {
        if resources.is_empty() {
            result.warnings.push(String::from("No resources defined in stack"));
            return;
        }

        let mut seen_ids = HashSet::new();

        for (i, resource) in resources.iter().enumerate() {
            let prefix = format!("resources[{i}]");

            // Validate unique id
            if seen_ids.contains(&resource.id) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.id"),
                    message: format!("Duplicate resource id: {}", resource.id),
                });
            } else {
                seen_ids.insert(&resource.id);
            }

            // Validate id format
            if !is_valid_name(&resource.id) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.id"),
                    message: format!(
                        "Resource id '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                        resource.id
                    ),
                });
            }

            Self::validate_lifecycle(resource, &prefix, result);
            Self::validate_name_attribute(resource, &prefix, result);

            match resource.kind {
                ResourceKind::Attachment => Self::validate_attachment(resource, &prefix, result),
                ResourceKind::Policy => Self::validate_policy(resource, &prefix, result),
                _ => {}
            }
        }
    }

    /// Validates lifecycle descriptor placement.
    fn validate_lifecycle(resource: &ResourceSpec, prefix: &str, result: &mut ValidationResult) {
        if resource.is_custom() {
            if resource.on_create.is_none() {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.on_create"),
                    message: format!("Custom resource '{}' requires on_create", resource.id),
                });
            }
            if resource.on_update.is_none() {
                result.warnings.push(format!(
                    "{prefix}: '{}' has no on_update; configuration changes will replace the resource",
                    resource.id
                ));
            }
        } else if resource.on_create.is_some()
            || resource.on_update.is_some()
            || resource.on_delete.is_some()
        {
            result.errors.push(ValidationError {
                field: prefix.to_string(),
                message: format!(
                    "Resource '{}' is not custom and cannot declare lifecycle calls",
                    resource.id
                ),
            });
        }
    }

    /// Validates the stable name attribute of native kinds.
    fn validate_name_attribute(
        resource: &ResourceSpec,
        prefix: &str,
        result: &mut ValidationResult,
    ) {
        let Some(name_attribute) = resource.kind.name_attribute() else {
            return;
        };

        match resource.config.get(name_attribute) {
            None => result.errors.push(ValidationError {
                field: format!("{prefix}.config.{name_attribute}"),
                message: format!(
                    "{} '{}' requires the '{}' attribute",
                    resource.kind, resource.id, name_attribute
                ),
            }),
            Some(AttrValue::String(_)) => {}
            Some(_) => result.errors.push(ValidationError {
                field: format!("{prefix}.config.{name_attribute}"),
                message: format!(
                    "'{}' of {} '{}' must be a literal string",
                    name_attribute, resource.kind, resource.id
                ),
            }),
        }
    }

    /// Validates attachment targets.
    fn validate_attachment(resource: &ResourceSpec, prefix: &str, result: &mut ValidationResult) {
        if !resource.config.contains_key("principal") {
            result.errors.push(ValidationError {
                field: format!("{prefix}.config.principal"),
                message: format!("Attachment '{}' requires a 'principal' attribute", resource.id),
            });
        }

        let to_thing = resource.config.contains_key("thing");
        let to_policy = resource.config.contains_key("policy");
        if to_thing == to_policy {
            result.errors.push(ValidationError {
                field: format!("{prefix}.config"),
                message: format!(
                    "Attachment '{}' must target exactly one of 'thing' or 'policy'",
                    resource.id
                ),
            });
        }
    }

    /// Warns on policy documents that grant access to every resource.
    fn validate_policy(resource: &ResourceSpec, prefix: &str, result: &mut ValidationResult) {
        if let Some(document) = resource.config.get("policy_document")
            && allows_any_resource(document) {
                result.warnings.push(format!(
                    "{prefix}.config.policy_document: policy '{}' grants access to all resources ('*'); prefer a scoped resource list",
                    resource.id
                ));
            }
    }

    /// Validates export expressions.
    fn validate_exports(config: &DeployConfig, result: &mut ValidationResult) {
        for (name, expression) in &config.exports {
            let field = format!("exports.{name}");

            if name.is_empty() {
                result.errors.push(ValidationError {
                    field,
                    message: String::from("Export name cannot be empty"),
                });
                continue;
            }

            let Some(reference) = Reference::parse(expression) else {
                result.errors.push(ValidationError {
                    field,
                    message: format!(
                        "Export '{name}' must be a ${{resource.output}} reference, got: {expression}"
                    ),
                });
                continue;
            };

            let Some(target) = config.resource(&reference.node) else {
                result.errors.push(ValidationError {
                    field,
                    message: format!(
                        "Export '{name}' references unknown resource '{}'",
                        reference.node
                    ),
                });
                continue;
            };

            if let Some(outputs) = target.kind.known_outputs()
                && !outputs.contains(&reference.output.as_str()) {
                    result.errors.push(ValidationError {
                        field,
                        message: format!(
                            "Export '{name}' references unknown output '{}.{}'",
                            reference.node, reference.output
                        ),
                    });
                }
        }
    }
}

/// Returns true if a policy document grants access to all resources.
fn allows_any_resource(value: &AttrValue) -> bool {
    match value {
        AttrValue::Map(map) => map.iter().any(|(key, item)| {
            (key == "Resource" && is_wildcard(item)) || allows_any_resource(item)
        }),
        AttrValue::List(items) => items.iter().any(allows_any_resource),
        _ => false,
    }
}

/// Returns true if a Resource entry is the wildcard.
fn is_wildcard(value: &AttrValue) -> bool {
    match value {
        AttrValue::String(s) => s == "*",
        AttrValue::List(items) => items
            .iter()
            .any(|item| matches!(item, AttrValue::String(s) if s == "*")),
        _ => false,
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }

    let mut chars = name.chars();

    // First character must be a letter
    if let Some(first) = chars.next()
        && !first.is_ascii_lowercase() {
            return false;
        }

    // Rest must be lowercase alphanumeric or hyphen
    for c in chars {
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
            return false;
        }
    }

    // Cannot end with hyphen
    if name.ends_with('-') {
        return false;
    }

    // Cannot have consecutive hyphens
    if name.contains("--") {
        return false;
    }

    true
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
