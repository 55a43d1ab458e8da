//! Per-table vnode repair bookkeeping.
//!
//! The tracker maps each `(token range, replica set)` of a table to the time
//! it was last repaired. Each table's map sits behind an `Arc` and is
//! replaced wholesale on update, so a snapshot read never observes a
//! half-applied change.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use tidemark_meta::RepairEntry;
use tidemark_types::{RepairConfiguration, ReplicaSet, TableReference, TokenRange};
use tracing::debug;

use crate::snapshot::RepairStateSnapshot;
use crate::state::{VnodeRepairState, VnodeRepairStates};

type VnodeKey = (TokenRange, ReplicaSet);
type TableState = HashMap<VnodeKey, i64>;

/// Repair times for every vnode this process knows about.
#[derive(Debug, Default)]
pub struct VnodeStateTracker {
    tables: RwLock<HashMap<TableReference, Arc<TableState>>>,
}

impl VnodeStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy, modify and swap in the state of `table`.
    fn update<R>(&self, table: &TableReference, f: impl FnOnce(&mut TableState) -> R) -> R {
        let mut tables = self.tables.write().expect("lock poisoned");
        let mut next = tables
            .get(table)
            .map(|state| TableState::clone(state))
            .unwrap_or_default();
        let result = f(&mut next);
        tables.insert(table.clone(), Arc::new(next));
        result
    }

    fn current(&self, table: &TableReference) -> Option<Arc<TableState>> {
        self.tables.read().expect("lock poisoned").get(table).cloned()
    }

    /// Record that `range` was repaired on `replicas` at `completed_at_ms`.
    ///
    /// An older completion never overwrites a newer one.
    pub fn record_completion(
        &self,
        table: &TableReference,
        range: TokenRange,
        replicas: ReplicaSet,
        completed_at_ms: i64,
    ) {
        self.update(table, |state| {
            let at = state.entry((range, replicas)).or_insert(completed_at_ms);
            *at = (*at).max(completed_at_ms);
        });
        debug!(%table, %range, completed_at_ms, "vnode repair recorded");
    }

    /// Merge completed-repair facts read from the history store.
    ///
    /// Returns how many vnodes moved forward.
    pub fn apply_history(&self, table: &TableReference, entries: &[RepairEntry]) -> usize {
        if entries.is_empty() {
            return 0;
        }
        self.update(table, |state| {
            let mut advanced = 0;
            for entry in entries {
                let at = state
                    .entry((entry.range, entry.replicas.clone()))
                    .or_insert(i64::MIN);
                if entry.repaired_at_ms > *at {
                    *at = entry.repaired_at_ms;
                    advanced += 1;
                }
            }
            advanced
        })
    }

    /// Align tracked vnodes with current ownership.
    ///
    /// Newly owned vnodes start as never repaired; vnodes no longer owned
    /// are dropped. Returns `(added, removed)`.
    pub fn sync_topology(
        &self,
        table: &TableReference,
        ownership: &[(TokenRange, ReplicaSet)],
    ) -> (usize, usize) {
        let owned: HashSet<&VnodeKey> = ownership.iter().collect();
        let (added, removed) = self.update(table, |state| {
            let before = state.len();
            state.retain(|key, _| owned.contains(key));
            let removed = before - state.len();
            let mut added = 0;
            for key in ownership {
                if !state.contains_key(key) {
                    state.insert(key.clone(), 0);
                    added += 1;
                }
            }
            (added, removed)
        });
        if added > 0 || removed > 0 {
            debug!(%table, added, removed, "topology synced");
        }
        (added, removed)
    }

    /// Current per-range states of `table`.
    pub fn states(&self, table: &TableReference) -> VnodeRepairStates {
        let Some(state) = self.current(table) else {
            return VnodeRepairStates::default();
        };
        state
            .iter()
            .map(|((range, replicas), at)| VnodeRepairState::new(*range, replicas.clone(), (*at).max(0)))
            .collect()
    }

    /// Immutable snapshot of `table` evaluated under `config` at `now_ms`.
    pub fn snapshot(
        &self,
        table: &TableReference,
        config: &RepairConfiguration,
        now_ms: i64,
    ) -> RepairStateSnapshot {
        RepairStateSnapshot::build(table.clone(), self.states(table), config, now_ms)
    }

    /// Tables with tracked state.
    pub fn tables(&self) -> Vec<TableReference> {
        let mut tables: Vec<_> = self
            .tables
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect();
        tables.sort();
        tables
    }
}
