//! Resource graph model.
//!
//! This module holds the structural core of the engine: resource nodes with
//! typed attribute trees, references between nodes, and the dependency
//! queries (validation, topological ordering) the planner relies on.

mod model;
mod node;
mod value;

pub use model::{GraphReference, ResourceGraph};
pub use node::{LifecycleHooks, ResourceKind, ResourceNode};
pub use value::{attrs_from_json, attrs_to_json, resolve_attrs, AttrValue, Reference};
