//! Control-plane provider integration.
//!
//! This module owns everything that touches the external API: call
//! descriptors, the injected executor seam, the native kind-to-action
//! mapping, and the custom resource bridge.

mod bridge;
mod call;
mod executor;
mod provisioner;

pub use bridge::{merge_outputs, CustomResourceBridge, Provisioned};
pub use call::{
    ApiCall, ApiResponse, CallSpec, ResolvedCall, ResolvedHooks, PHYSICAL_ID_PARAMETER,
};
pub use executor::{ApiExecutor, HttpApiExecutor};
pub use provisioner::{ResolvedNode, ResourceProvisioner};

#[cfg(test)]
pub use executor::MockApiExecutor;
