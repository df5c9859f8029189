//! Snapshot management module.
//!
//! This module provides persistent storage for the deployment snapshot:
//! per-resource configuration, outputs, physical resource ids, and
//! dependency lists, durable across planner invocations.

mod local;
mod lock;
mod s3;
mod store;
mod types;

pub use local::LocalStateStore;
pub use lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
pub use s3::S3StateStore;
pub use store::StateStore;
pub use types::{
    HistoryEntry, OperationKind, ResourceRecord, Snapshot, SNAPSHOT_VERSION,
};
