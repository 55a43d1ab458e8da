//! Anti-entropy repair scheduling for tidemark.
//!
//! This crate provides:
//!
//! - [`VnodeStateTracker`] — per-table, per-vnode last-repaired times, fed by
//!   repair history and topology.
//! - [`RepairStateSnapshot`] — an immutable view of a table: due vnodes
//!   grouped into [`ReplicaRepairGroup`]s, oldest first.
//! - [`planner`] — grouping by parallelism and sub-range splitting by target
//!   repair size.
//! - [`RepairJob`] / [`JobRegistry`] — job lifecycle with status escalation
//!   derived from how long the work has been due.
//! - [`RepairScheduler`] — the periodic pass that locks groups, drives the
//!   [`RepairExecutor`] and records completions.
//!
//! The repair mechanism itself and the source of token ownership are traits
//! ([`RepairExecutor`], [`ReplicationProvider`]) so the scheduler can run
//! against a real cluster or an in-process fake.

mod error;
pub mod executor;
pub mod job;
pub mod planner;
pub mod scheduler;
mod snapshot;
mod state;
pub mod topology;
mod tracker;
mod view;

pub use error::RepairError;
pub use executor::{RepairExecutor, RepairRequest};
pub use job::{JobKind, JobRegistry, RepairJob, escalate};
pub use planner::{NoSizeEstimate, RepairTask, ReplicaRepairGroup, SizeEstimator};
pub use scheduler::{
    GroupOutcome, PassReport, RepairScheduler, RepairSchedulerBuilder, SchedulerConfig,
    TableReport,
};
pub use snapshot::RepairStateSnapshot;
pub use state::{VnodeRepairState, VnodeRepairStates, VnodeRepairStatesBuilder};
pub use topology::{ReplicationProvider, StaticReplicationProvider};
pub use tracker::VnodeStateTracker;
pub use view::{JobViewKind, RepairJobView};
