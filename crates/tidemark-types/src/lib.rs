//! Shared types and identifiers for tidemark.
//!
//! This crate defines the vocabulary every other tidemark crate speaks:
//! topology values ([`TokenRange`], [`Node`], [`ReplicaSet`],
//! [`TableReference`]), identifiers ([`NodeId`], [`JobId`]), the validated
//! repair policy ([`RepairConfiguration`]), the job status vocabulary
//! ([`RepairStatus`]), a [`Clock`] capability and a typed [`events::EventBus`].

pub mod clock;
pub mod config;
mod error;
pub mod events;
mod token;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    HistoryProvider, RepairConfiguration, RepairConfigurationBuilder,
    RepairConfigurationProvider, RepairLockType, RepairParallelism,
    StaticRepairConfigurationProvider, TargetRepairSize, parse_size,
};
pub use error::ConfigError;
pub use token::{MAX_SPLIT_PARTS, TokenRange};

// ---------------------------------------------------------------------------
// ID types
// ---------------------------------------------------------------------------

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name([u8; 32]);

        impl $name {
            /// Create an ID by hashing arbitrary data with BLAKE3.
            pub fn from_data(data: &[u8]) -> Self {
                Self(blake3::hash(data).into())
            }

            /// Return the raw 32-byte representation.
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// First eight hex characters, for log lines.
            pub fn short(&self) -> String {
                self.to_string()[..8].to_string()
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                for byte in &self.0 {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }
    };
}

define_id!(
    /// Identifier for a data-store node: `blake3(host_id)`.
    NodeId
);

/// Identifier of a scheduled or on-demand repair job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(uuid::Uuid);

impl JobId {
    /// Generate a fresh random job id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Return the underlying UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<uuid::Uuid> for JobId {
    fn from(id: uuid::Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Topology
// ---------------------------------------------------------------------------

/// A node of the replicated data store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Node {
    /// Stable identity of the node.
    pub node_id: NodeId,
    /// Datacenter the node lives in.
    pub datacenter: String,
}

impl Node {
    /// Create a node whose id is derived from its host identifier.
    pub fn new(host_id: &str, datacenter: impl Into<String>) -> Self {
        Self {
            node_id: NodeId::from_data(host_id.as_bytes()),
            datacenter: datacenter.into(),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.datacenter, self.node_id.short())
    }
}

/// The deduplicated set of nodes that jointly own a token range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReplicaSet(BTreeSet<Node>);

impl ReplicaSet {
    /// Build a replica set, dropping duplicate nodes.
    pub fn new(nodes: impl IntoIterator<Item = Node>) -> Self {
        Self(nodes.into_iter().collect())
    }

    /// Iterate the nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.0.iter()
    }

    /// Number of replicas.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set has no replicas.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `node_id` is one of the replicas.
    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.0.iter().any(|n| n.node_id == *node_id)
    }

    /// Whether the two sets share at least one node.
    pub fn overlaps(&self, other: &ReplicaSet) -> bool {
        self.0.iter().any(|n| other.contains(&n.node_id))
    }

    /// Datacenters this replica set spans, sorted.
    pub fn datacenters(&self) -> BTreeSet<&str> {
        self.0.iter().map(|n| n.datacenter.as_str()).collect()
    }

    /// Subset of replicas living in `datacenter`.
    pub fn in_datacenter(&self, datacenter: &str) -> ReplicaSet {
        Self(
            self.0
                .iter()
                .filter(|n| n.datacenter == datacenter)
                .cloned()
                .collect(),
        )
    }

    /// Union of two replica sets.
    pub fn union(&self, other: &ReplicaSet) -> ReplicaSet {
        Self(self.0.union(&other.0).cloned().collect())
    }
}

impl FromIterator<Node> for ReplicaSet {
    fn from_iter<I: IntoIterator<Item = Node>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl fmt::Display for ReplicaSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, node) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{node}")?;
        }
        write!(f, "]")
    }
}

/// A keyspace + table pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableReference {
    /// Keyspace name.
    pub keyspace: String,
    /// Table name.
    pub table: String,
}

impl TableReference {
    /// Create a table reference.
    pub fn new(keyspace: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            keyspace: keyspace.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.keyspace, self.table)
    }
}

impl FromStr for TableReference {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('.') {
            Some((ks, tb)) if !ks.is_empty() && !tb.is_empty() && !tb.contains('.') => {
                Ok(Self::new(ks, tb))
            }
            _ => Err(ConfigError::InvalidTableReference(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Job status
// ---------------------------------------------------------------------------

/// Externally visible status of a repair job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RepairStatus {
    /// Selected for repair, waiting for its locks.
    InQueue,
    /// Locks held, repair in progress.
    Running,
    /// Overdue past the warning threshold.
    Warning,
    /// Overdue past the error threshold.
    Error,
    /// All ranges of the run repaired.
    Completed,
}

impl fmt::Display for RepairStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InQueue => "IN_QUEUE",
            Self::Running => "RUNNING",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Completed => "COMPLETED",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
