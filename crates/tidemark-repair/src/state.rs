//! Per-vnode repair state and its per-table collection.

use std::collections::BTreeMap;

use tidemark_types::{ReplicaSet, TokenRange};

/// When one token range was last repaired on its replica set.
///
/// Immutable: a completed repair produces a new value through
/// [`VnodeRepairState::repaired_at`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VnodeRepairState {
    range: TokenRange,
    replicas: ReplicaSet,
    last_repaired_at_ms: i64,
}

impl VnodeRepairState {
    pub fn new(range: TokenRange, replicas: ReplicaSet, last_repaired_at_ms: i64) -> Self {
        Self {
            range,
            replicas,
            last_repaired_at_ms,
        }
    }

    /// A range that has never been repaired. Immediately due.
    pub fn never_repaired(range: TokenRange, replicas: ReplicaSet) -> Self {
        Self::new(range, replicas, 0)
    }

    pub fn range(&self) -> &TokenRange {
        &self.range
    }

    pub fn replicas(&self) -> &ReplicaSet {
        &self.replicas
    }

    pub fn last_repaired_at_ms(&self) -> i64 {
        self.last_repaired_at_ms
    }

    /// Due when at least `interval_ms` has passed since the last repair.
    pub fn is_due(&self, interval_ms: i64, now_ms: i64) -> bool {
        now_ms.saturating_sub(self.last_repaired_at_ms) >= interval_ms
    }

    /// The same vnode, repaired at `at_ms`.
    pub fn repaired_at(&self, at_ms: i64) -> Self {
        Self {
            last_repaired_at_ms: at_ms,
            ..self.clone()
        }
    }
}

/// One state per distinct token range of a table, ordered by range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VnodeRepairStates {
    states: Vec<VnodeRepairState>,
}

impl VnodeRepairStates {
    pub fn builder() -> VnodeRepairStatesBuilder {
        VnodeRepairStatesBuilder::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VnodeRepairState> {
        self.states.iter()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn get(&self, range: &TokenRange) -> Option<&VnodeRepairState> {
        self.states
            .binary_search_by(|s| s.range.cmp(range))
            .ok()
            .map(|i| &self.states[i])
    }

    /// Oldest `last_repaired_at_ms`, if any state exists.
    pub fn oldest_repaired_at_ms(&self) -> Option<i64> {
        self.states.iter().map(|s| s.last_repaired_at_ms).min()
    }
}

impl<'a> IntoIterator for &'a VnodeRepairStates {
    type Item = &'a VnodeRepairState;
    type IntoIter = std::slice::Iter<'a, VnodeRepairState>;

    fn into_iter(self) -> Self::IntoIter {
        self.states.iter()
    }
}

/// Accumulates states, merging duplicates of the same token range.
#[derive(Debug, Default)]
pub struct VnodeRepairStatesBuilder {
    by_range: BTreeMap<TokenRange, VnodeRepairState>,
}

impl VnodeRepairStatesBuilder {
    /// Add a state; on a duplicate range the most recent repair wins.
    pub fn add(mut self, state: VnodeRepairState) -> Self {
        self.push(state);
        self
    }

    pub fn push(&mut self, state: VnodeRepairState) {
        match self.by_range.get(&state.range) {
            Some(existing) if existing.last_repaired_at_ms >= state.last_repaired_at_ms => {}
            _ => {
                self.by_range.insert(state.range, state);
            }
        }
    }

    pub fn build(self) -> VnodeRepairStates {
        VnodeRepairStates {
            states: self.by_range.into_values().collect(),
        }
    }
}

impl FromIterator<VnodeRepairState> for VnodeRepairStates {
    fn from_iter<I: IntoIterator<Item = VnodeRepairState>>(iter: I) -> Self {
        let mut builder = Self::builder();
        for state in iter {
            builder.push(state);
        }
        builder.build()
    }
}
