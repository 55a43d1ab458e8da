//! Seam to the external repair mechanism.
//!
//! tidemark never moves data itself. It decides what to repair and when,
//! then hands each sub-range to a [`RepairExecutor`] and waits for the
//! verdict.

use tidemark_types::{JobId, RepairParallelism, ReplicaSet, TableReference, TokenRange};

use crate::RepairError;

/// One unit of repair work: a (sub-)range on a replica set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairRequest {
    pub job_id: JobId,
    pub table: TableReference,
    pub range: TokenRange,
    pub replicas: ReplicaSet,
    pub parallelism: RepairParallelism,
}

/// Runs repairs on the data store.
///
/// Implementations return once the store reports the range repaired on all
/// replicas, or fail with [`RepairError::Execution`]. A call may be dropped
/// mid-flight when the lease is lost or the job is cancelled.
#[async_trait::async_trait]
pub trait RepairExecutor: Send + Sync {
    async fn repair(&self, request: RepairRequest) -> Result<(), RepairError>;
}
