// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Korral
//!
//! A declarative, dependency-aware provisioning engine for cloud
//! infrastructure stacks.
//!
//! ## Overview
//!
//! Korral declares cloud resources as data and provisions them through an
//! external control-plane API:
//!
//! - Define your infrastructure as data in a YAML stack file
//! - References (`${resource.output}`) wire resources together explicitly
//! - A planner diffs against the previous generation and orders work by
//!   dependency, never by declaration order
//! - Custom resources bridge one-shot imperative API calls (e.g. issuing a
//!   device certificate) into the declarative model
//!
//! ## Architecture
//!
//! Each run is one **generation**:
//!
//! 1. **Graph**: the declared resources and their references, validated
//!    (no duplicates, no dangling references, no cycles)
//! 2. **Plan**: per-resource create/update/replace/delete/no-op, computed
//!    by diffing against the previous generation's snapshot
//! 3. **Apply**: sequential execution in topological order; outputs of each
//!    resource materialize before any dependent runs
//!
//! ## Modules
//!
//! - [`config`]: Stack file parsing, validation, and hashing
//! - [`graph`]: Resource graph model and dependency resolution
//! - [`planner`]: Diff computation, plan construction, and plan execution
//! - [`provider`]: Call descriptors, the external-call executor, and the
//!   custom resource bridge
//! - [`state`]: Snapshot storage backends (local, S3)
//! - [`deployer`]: The plan/apply driver
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: elk-telemetry
//!   region: us-west-2
//!
//! resources:
//!   - id: collar
//!     kind: thing
//!     config:
//!       thing_name: elk-collar
//!
//!   - id: device-cert
//!     kind: custom
//!     on_create:
//!       service: iot
//!       action: CreateKeysAndCertificate
//!       parameters:
//!         setAsActive: true
//!       physical_resource_id_field: certificateId
//!
//!   - id: cert-to-thing
//!     kind: attachment
//!     config:
//!       principal: ${device-cert.certificateArn}
//!       thing: ${collar.thingName}
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod deployer;
pub mod error;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, DeployConfig};
pub use deployer::{DeployOutcome, Deployer};
pub use error::{KorralError, Result};
pub use graph::{AttrValue, Reference, ResourceGraph, ResourceKind, ResourceNode};
pub use planner::{ApplyReport, DeploymentPlan, DiffEngine, PlanExecutor};
pub use provider::{
    ApiCall, ApiExecutor, ApiResponse, CallSpec, CustomResourceBridge, HttpApiExecutor,
    ResourceProvisioner,
};
pub use state::{LocalStateStore, S3StateStore, Snapshot, StateStore};
