//! Snapshot types for tracking provisioned resources.
//!
//! A snapshot is the persisted record of one deployment generation: for
//! every resource, the configuration it was provisioned with, its output
//! attributes, its physical resource id, and the resources it depends on.
//! The dependency list is persisted so a later generation can order
//! deletions without the graph that originally produced them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::graph::{LifecycleHooks, ResourceKind};

/// Current version of the snapshot format.
pub const SNAPSHOT_VERSION: &str = "1.0";

/// The persisted state of one deployment generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Snapshot format version.
    pub version: String,
    /// Project name.
    pub project: String,
    /// Environment name.
    pub environment: String,
    /// Deployment generation, incremented on every apply.
    pub generation: u64,
    /// Hash of the last applied stack configuration.
    pub config_hash: String,
    /// Per-resource records, keyed by resource id.
    pub resources: BTreeMap<String, ResourceRecord>,
    /// Named exports resolved after the last successful apply.
    #[serde(default)]
    pub exports: BTreeMap<String, String>,
    /// When the snapshot was last updated.
    pub last_updated: DateTime<Utc>,
    /// Recent apply history.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// The persisted state of a single resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Resource id.
    pub id: String,
    /// Kind tag.
    pub kind: ResourceKind,
    /// Configuration as authored (references kept in expression form).
    pub config: Value,
    /// Hash of the specification when provisioned.
    pub config_hash: String,
    /// Output attributes, written once per generation by this resource's
    /// own provisioning step.
    pub outputs: serde_json::Map<String, Value>,
    /// Idempotency key addressing the external resource.
    pub physical_resource_id: String,
    /// Ids of resources this record referenced when provisioned.
    pub depends_on: Vec<String>,
    /// Lifecycle descriptors, persisted for custom resources so teardown
    /// works after the resource leaves the stack file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hooks: Option<LifecycleHooks>,
    /// When the resource was first provisioned.
    pub created_at: DateTime<Utc>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
}

/// A single entry in the apply history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the operation occurred.
    pub timestamp: DateTime<Utc>,
    /// Type of operation.
    pub operation: OperationKind,
    /// Generation the operation produced.
    pub generation: u64,
    /// Configuration hash at the time of the operation.
    pub config_hash: String,
    /// Resources affected.
    pub resources: Vec<String>,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Optional error message.
    #[serde(default)]
    pub error: Option<String>,
}

/// Types of operations recorded in the history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// A plan was applied.
    Apply,
    /// The stack was torn down.
    Destroy,
}

impl Snapshot {
    /// Creates a new empty snapshot.
    #[must_use]
    pub fn new(project: &str, environment: &str) -> Self {
        Self {
            version: SNAPSHOT_VERSION.to_string(),
            project: project.to_string(),
            environment: environment.to_string(),
            generation: 0,
            config_hash: String::new(),
            resources: BTreeMap::new(),
            exports: BTreeMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Gets a resource record by id.
    #[must_use]
    pub fn record(&self, id: &str) -> Option<&ResourceRecord> {
        self.resources.get(id)
    }

    /// Gets a mutable reference to a resource record by id.
    pub fn record_mut(&mut self, id: &str) -> Option<&mut ResourceRecord> {
        self.resources.get_mut(id)
    }

    /// Adds or replaces a resource record.
    pub fn set_record(&mut self, record: ResourceRecord) {
        self.resources.insert(record.id.clone(), record);
        self.last_updated = Utc::now();
    }

    /// Removes a resource record by id.
    pub fn remove_record(&mut self, id: &str) -> Option<ResourceRecord> {
        let result = self.resources.remove(id);
        if result.is_some() {
            self.last_updated = Utc::now();
        }
        result
    }

    /// Returns true if a record exists for the given id.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.resources.contains_key(id)
    }

    /// Returns all recorded resource ids.
    #[must_use]
    pub fn resource_ids(&self) -> Vec<&str> {
        self.resources.keys().map(String::as_str).collect()
    }

    /// Reads an output attribute of a recorded resource.
    #[must_use]
    pub fn output(&self, id: &str, name: &str) -> Option<&Value> {
        self.resources.get(id).and_then(|r| r.outputs.get(name))
    }

    /// Adds a history entry.
    pub fn add_history(&mut self, entry: HistoryEntry) {
        // Keep only the last 100 entries
        const MAX_HISTORY: usize = 100;
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }

    /// Returns true if no resources are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl ResourceRecord {
    /// Creates a new record with empty outputs.
    #[must_use]
    pub fn new(
        id: &str,
        kind: ResourceKind,
        config: Value,
        config_hash: &str,
        depends_on: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            kind,
            config,
            config_hash: config_hash.to_string(),
            outputs: serde_json::Map::new(),
            physical_resource_id: String::new(),
            depends_on,
            hooks: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Reads an output attribute.
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&Value> {
        self.outputs.get(name)
    }

    /// Marks the record as updated now.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl HistoryEntry {
    /// Creates a new successful history entry.
    #[must_use]
    pub fn new(
        operation: OperationKind,
        generation: u64,
        config_hash: &str,
        resources: Vec<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            generation,
            config_hash: config_hash.to_string(),
            resources,
            success: true,
            error: None,
        }
    }

    /// Creates a failed history entry.
    #[must_use]
    pub fn failed(
        operation: OperationKind,
        generation: u64,
        config_hash: &str,
        resources: Vec<String>,
        error: &str,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            generation,
            config_hash: config_hash.to_string(),
            resources,
            success: false,
            error: Some(error.to_string()),
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Apply => "apply",
            Self::Destroy => "destroy",
        };
        write!(f, "{op}")
    }
}
