//! Persisted record types.

use serde::{Deserialize, Serialize};
use tidemark_types::{ReplicaSet, TableReference, TokenRange};

/// One completed repair of a token range on a replica set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairEntry {
    pub table: TableReference,
    pub range: TokenRange,
    pub replicas: ReplicaSet,
    /// When the repair session began, epoch milliseconds.
    pub started_at_ms: i64,
    /// When the range was confirmed repaired, epoch milliseconds.
    pub repaired_at_ms: i64,
}

/// A leased lock row.
///
/// `token` is unique per acquisition; renewal and release must present it,
/// so a holder whose lease was taken over cannot touch the new lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub key: String,
    /// Identity of the owning process.
    pub holder: String,
    pub token: uuid::Uuid,
    pub acquired_at_ms: i64,
    pub expires_at_ms: i64,
}

impl LockRecord {
    /// Whether the lease is still live at `now_ms`.
    ///
    /// The lease covers `[acquired_at, expires_at)`.
    pub fn is_live(&self, now_ms: i64) -> bool {
        now_ms < self.expires_at_ms
    }
}
