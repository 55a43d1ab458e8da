//! Storage contracts required by the scheduler and lock manager.

use tidemark_types::TableReference;

use crate::{LockRecord, MetaError, RepairEntry};

/// Durable log of completed repairs.
#[async_trait::async_trait]
pub trait RepairHistory: Send + Sync {
    /// Append a completed-repair fact.
    async fn record(&self, entry: RepairEntry) -> Result<(), MetaError>;

    /// All facts for `table` repaired at or after `since_ms`, oldest first.
    async fn entries_since(
        &self,
        table: &TableReference,
        since_ms: i64,
    ) -> Result<Vec<RepairEntry>, MetaError>;
}

/// Conditionally writable lease records.
///
/// Every mutating method is a single atomic conditional write. Callers never
/// read a record and then write based on what they saw.
#[async_trait::async_trait]
pub trait LockStore: Send + Sync {
    /// Insert `record` unless a live record (per `now_ms`) already exists
    /// for its key. Returns whether the insert happened.
    async fn insert_if_absent_or_expired(
        &self,
        record: LockRecord,
        now_ms: i64,
    ) -> Result<bool, MetaError>;

    /// Push the expiry of `key` to `expires_at_ms` if the stored record still
    /// carries `token` and has not expired at `now_ms`.
    async fn renew_if_holder(
        &self,
        key: &str,
        token: uuid::Uuid,
        expires_at_ms: i64,
        now_ms: i64,
    ) -> Result<bool, MetaError>;

    /// Delete `key` if the stored record carries `token`.
    async fn delete_if_holder(&self, key: &str, token: uuid::Uuid) -> Result<bool, MetaError>;

    /// Current record for `key`, live or not.
    async fn get(&self, key: &str) -> Result<Option<LockRecord>, MetaError>;

    /// Every stored record, ordered by key.
    async fn list(&self) -> Result<Vec<LockRecord>, MetaError>;
}
