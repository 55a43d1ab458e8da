//! Point-in-time repair state of one table.

use tidemark_types::{RepairConfiguration, TableReference};

use crate::planner::{self, ReplicaRepairGroup};
use crate::state::VnodeRepairStates;

/// Immutable view of a table's repair state, taken once per pass.
///
/// A newer snapshot supersedes this one; it is never updated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairStateSnapshot {
    table: TableReference,
    created_at_ms: i64,
    last_completed_at_ms: i64,
    vnode_states: VnodeRepairStates,
    groups: Vec<ReplicaRepairGroup>,
}

impl RepairStateSnapshot {
    /// Evaluate `states` under `config` at `now_ms`.
    ///
    /// `last_completed_at_ms` is the oldest repair time of any vnode: the
    /// whole table has been repaired at least as recently as that. A table
    /// with no vnodes counts as fully repaired at `now_ms`.
    pub fn build(
        table: TableReference,
        vnode_states: VnodeRepairStates,
        config: &RepairConfiguration,
        now_ms: i64,
    ) -> Self {
        let due = planner::due_vnodes(&vnode_states, config, now_ms);
        let groups = planner::group_vnodes(due, config.parallelism());
        let last_completed_at_ms = vnode_states.oldest_repaired_at_ms().unwrap_or(now_ms);
        Self {
            table,
            created_at_ms: now_ms,
            last_completed_at_ms,
            vnode_states,
            groups,
        }
    }

    pub fn table(&self) -> &TableReference {
        &self.table
    }

    pub fn created_at_ms(&self) -> i64 {
        self.created_at_ms
    }

    pub fn last_completed_at_ms(&self) -> i64 {
        self.last_completed_at_ms
    }

    pub fn vnode_states(&self) -> &VnodeRepairStates {
        &self.vnode_states
    }

    /// Due vnodes, grouped and in the order they should be repaired.
    pub fn replica_repair_groups(&self) -> &[ReplicaRepairGroup] {
        &self.groups
    }

    /// Whether anything is due.
    pub fn can_repair(&self) -> bool {
        !self.groups.is_empty()
    }

    /// Fraction of vnodes not due at snapshot time.
    pub fn repaired_fraction(&self) -> f64 {
        let total = self.vnode_states.len();
        if total == 0 {
            return 1.0;
        }
        let due: usize = self.groups.iter().map(ReplicaRepairGroup::len).sum();
        (total - due) as f64 / total as f64
    }
}
