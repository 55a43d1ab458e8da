//! Lock key derivation.

use std::collections::BTreeSet;
use std::fmt;

use tidemark_types::{RepairLockType, ReplicaSet};

/// Name of a lock row in the shared store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockKey(String);

impl LockKey {
    /// Key guarding one exact replica set: `vnode:<id>,<id>,...`.
    ///
    /// Node ids are listed in sorted order so the key is independent of how
    /// the set was built.
    pub fn for_replicas(replicas: &ReplicaSet) -> Self {
        let ids: BTreeSet<String> = replicas.nodes().map(|n| n.node_id.to_string()).collect();
        Self(format!("vnode:{}", ids.into_iter().collect::<Vec<_>>().join(",")))
    }

    /// Key guarding an entire datacenter: `datacenter:<dc>`.
    pub fn for_datacenter(datacenter: &str) -> Self {
        Self(format!("datacenter:{datacenter}"))
    }

    /// All keys a repair touching `replica_sets` must hold, sorted and
    /// deduplicated.
    ///
    /// Acquiring in this order keeps two processes that need overlapping key
    /// sets from deadlocking each other.
    pub fn for_group<'a>(
        lock_type: RepairLockType,
        replica_sets: impl IntoIterator<Item = &'a ReplicaSet>,
    ) -> Vec<LockKey> {
        let keys: BTreeSet<LockKey> = match lock_type {
            RepairLockType::Vnode => replica_sets.into_iter().map(Self::for_replicas).collect(),
            RepairLockType::Datacenter => replica_sets
                .into_iter()
                .flat_map(|rs| rs.datacenters().into_iter().map(Self::for_datacenter))
                .collect(),
        };
        keys.into_iter().collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
