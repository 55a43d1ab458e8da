//! Error types for repair scheduling and execution.

use tidemark_types::{ConfigError, JobId, RepairStatus, TableReference, TokenRange};

/// Errors that can occur while scheduling or running repairs.
///
/// Everything except [`RepairError::Config`] is scoped to one table or job
/// and retried on the next pass.
#[derive(Debug, thiserror::Error)]
pub enum RepairError {
    /// Failed to read or write repair history.
    #[error("metadata error: {0}")]
    Meta(#[from] tidemark_meta::MetaError),

    /// The lock store failed during acquisition, renewal or release.
    #[error("lock error: {0}")]
    Lock(#[from] tidemark_lock::LockError),

    /// The repair policy for a table is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The external repair mechanism reported a failure.
    #[error("repair of {range} failed: {reason}")]
    Execution {
        range: TokenRange,
        reason: String,
    },

    /// Token ownership for a table could not be read.
    #[error("topology unavailable for {table}: {reason}")]
    Topology {
        table: TableReference,
        reason: String,
    },

    /// A held lease was lost mid-repair; the affected range must be
    /// re-validated on the next pass.
    #[error("lock {key} lost during repair")]
    LockLost { key: String },

    /// The job was cancelled by request or shutdown.
    #[error("repair job {0} cancelled")]
    Cancelled(JobId),

    #[error("repair job {0} not found")]
    JobNotFound(JobId),

    /// A scheduled job has no pass in progress to cancel.
    #[error("repair job {0} is not running")]
    NotRunning(JobId),

    /// No repair policy applies to the table.
    #[error("table {0} is not configured for repair")]
    NotConfigured(TableReference),

    /// A job was asked to move along an edge its state machine lacks.
    #[error("repair job {job_id} cannot {action} while {status}")]
    InvalidTransition {
        job_id: JobId,
        status: RepairStatus,
        action: &'static str,
    },
}
