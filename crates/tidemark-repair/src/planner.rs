//! Scheduling decisions: which due vnodes are repaired together, and how
//! large vnodes are cut into sub-ranges.
//!
//! Everything here is pure and deterministic. No I/O, no locks, no clock.

use tidemark_types::{
    MAX_SPLIT_PARTS, RepairConfiguration, RepairParallelism, ReplicaSet, TableReference,
    TargetRepairSize, TokenRange,
};

use crate::state::{VnodeRepairState, VnodeRepairStates};

/// Vnodes that are repaired together under one set of locks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaRepairGroup {
    vnodes: Vec<VnodeRepairState>,
}

impl ReplicaRepairGroup {
    fn single(vnode: VnodeRepairState) -> Self {
        Self {
            vnodes: vec![vnode],
        }
    }

    /// Members in scheduling order (oldest first).
    pub fn vnodes(&self) -> &[VnodeRepairState] {
        &self.vnodes
    }

    pub fn len(&self) -> usize {
        self.vnodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vnodes.is_empty()
    }

    /// Every node participating in the group.
    pub fn replicas(&self) -> ReplicaSet {
        self.vnodes
            .iter()
            .fold(ReplicaSet::default(), |acc, v| acc.union(v.replicas()))
    }

    pub fn replica_sets(&self) -> impl Iterator<Item = &ReplicaSet> {
        self.vnodes.iter().map(VnodeRepairState::replicas)
    }

    /// Oldest repair time among the members: the group's priority.
    pub fn oldest_repaired_at_ms(&self) -> i64 {
        self.vnodes
            .iter()
            .map(VnodeRepairState::last_repaired_at_ms)
            .min()
            .unwrap_or(i64::MAX)
    }

    fn conflicts_with(&self, vnode: &VnodeRepairState) -> bool {
        self.vnodes.iter().any(|v| v.replicas().overlaps(vnode.replicas()))
    }
}

/// Vnodes of `states` that are due under `config` at `now_ms`.
pub fn due_vnodes(
    states: &VnodeRepairStates,
    config: &RepairConfiguration,
    now_ms: i64,
) -> Vec<VnodeRepairState> {
    states
        .iter()
        .filter(|s| s.is_due(config.repair_interval_ms(), now_ms))
        .cloned()
        .collect()
}

/// Order vnodes oldest first; equal ages by ascending range start.
pub fn sort_oldest_first(vnodes: &mut [VnodeRepairState]) {
    vnodes.sort_by(|a, b| {
        a.last_repaired_at_ms()
            .cmp(&b.last_repaired_at_ms())
            .then_with(|| a.range().start().cmp(&b.range().start()))
            .then_with(|| a.range().end().cmp(&b.range().end()))
    });
}

/// Batch vnodes into groups whose members never share a node.
///
/// Vnodes are placed first-fit in oldest-first order, so each group's first
/// member is its oldest and groups come out ordered by (oldest repair time,
/// range start).
///
/// - `Sequential`: every vnode is its own group.
/// - `Parallel`: a vnode joins the first group none of whose replicas it
///   shares.
/// - `DatacenterAware`: as `Parallel`, but only among groups confined to the
///   same single datacenter. A vnode whose replicas span several
///   datacenters is repaired alone.
pub fn group_vnodes(
    mut vnodes: Vec<VnodeRepairState>,
    parallelism: RepairParallelism,
) -> Vec<ReplicaRepairGroup> {
    sort_oldest_first(&mut vnodes);

    if parallelism == RepairParallelism::Sequential {
        return vnodes.into_iter().map(ReplicaRepairGroup::single).collect();
    }

    // `None` marks a group that nothing else may join.
    let mut groups: Vec<(Option<String>, ReplicaRepairGroup)> = Vec::new();
    for vnode in vnodes {
        let lane = match parallelism {
            RepairParallelism::DatacenterAware => {
                let dcs = vnode.replicas().datacenters();
                if dcs.len() == 1 {
                    dcs.into_iter().next().map(str::to_string)
                } else {
                    None
                }
            }
            _ => Some(String::new()),
        };

        let slot = lane.as_ref().and_then(|lane| {
            groups.iter_mut().find(|(group_lane, group)| {
                group_lane.as_ref() == Some(lane) && !group.conflicts_with(&vnode)
            })
        });

        match slot {
            Some((_, group)) => group.vnodes.push(vnode),
            None => groups.push((lane, ReplicaRepairGroup::single(vnode))),
        }
    }

    groups.into_iter().map(|(_, group)| group).collect()
}

/// Size information for token ranges, supplied by the data store.
pub trait SizeEstimator: Send + Sync {
    /// Estimated bytes stored for `range` of `table`, if known.
    fn estimate_bytes(&self, table: &TableReference, range: &TokenRange) -> Option<u64>;
}

/// Estimator that knows nothing; no vnode is ever split.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSizeEstimate;

impl SizeEstimator for NoSizeEstimate {
    fn estimate_bytes(&self, _table: &TableReference, _range: &TokenRange) -> Option<u64> {
        None
    }
}

/// A vnode and the sub-ranges it is repaired in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairTask {
    pub vnode: VnodeRepairState,
    /// Contiguous pieces tiling the vnode, in ring order.
    pub subranges: Vec<TokenRange>,
}

/// Number of pieces a vnode of `size_bytes` needs to stay within `target`.
///
/// Never more than [`MAX_SPLIT_PARTS`]; past that the pieces exceed the
/// target instead of multiplying executor calls.
pub fn split_count(size_bytes: u64, target: TargetRepairSize) -> u64 {
    match target {
        TargetRepairSize::Full => 1,
        TargetRepairSize::Bytes(target) if size_bytes > target => {
            size_bytes.div_ceil(target).min(MAX_SPLIT_PARTS)
        }
        TargetRepairSize::Bytes(_) => 1,
    }
}

/// Cut each member of `group` into sub-ranges no larger than the target.
///
/// Splitting never changes replica ownership; sub-ranges stay with their
/// vnode.
pub fn plan_tasks(
    table: &TableReference,
    group: &ReplicaRepairGroup,
    target: TargetRepairSize,
    sizes: &dyn SizeEstimator,
) -> Vec<RepairTask> {
    group
        .vnodes()
        .iter()
        .map(|vnode| {
            let parts = match target {
                TargetRepairSize::Full => 1,
                TargetRepairSize::Bytes(_) => sizes
                    .estimate_bytes(table, vnode.range())
                    .map_or(1, |size| split_count(size, target)),
            };
            RepairTask {
                vnode: vnode.clone(),
                subranges: vnode.range().split(parts),
            }
        })
        .collect()
}
