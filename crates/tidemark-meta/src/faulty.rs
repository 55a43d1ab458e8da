//! A wrapper that injects store unavailability.
//!
//! `FaultyStore` forwards to any backend implementing both contracts until
//! told to fail, after which the affected contract returns
//! [`MetaError::Unavailable`] without touching the inner store.
//!
//! ```ignore
//! let store = Arc::new(FaultyStore::new(Arc::new(MemoryMetaStore::new())));
//! store.fail_history(true);   // snapshot reads and completion writes fail
//! store.fail_locks(true);     // every CAS fails
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tidemark_types::TableReference;

use crate::{LockRecord, LockStore, MetaError, RepairEntry, RepairHistory};

pub struct FaultyStore<S> {
    inner: Arc<S>,
    history_down: AtomicBool,
    locks_down: AtomicBool,
    /// Number of calls rejected so far.
    injected: AtomicU64,
}

impl<S> FaultyStore<S> {
    /// Wrap `inner`, initially healthy.
    pub fn new(inner: Arc<S>) -> Self {
        Self {
            inner,
            history_down: AtomicBool::new(false),
            locks_down: AtomicBool::new(false),
            injected: AtomicU64::new(0),
        }
    }

    /// Make [`RepairHistory`] calls fail (or recover).
    pub fn fail_history(&self, down: bool) {
        self.history_down.store(down, Ordering::SeqCst);
    }

    /// Make [`LockStore`] calls fail (or recover).
    pub fn fail_locks(&self, down: bool) {
        self.locks_down.store(down, Ordering::SeqCst);
    }

    /// Number of calls rejected since construction.
    pub fn injected_failures(&self) -> u64 {
        self.injected.load(Ordering::SeqCst)
    }

    /// The wrapped store.
    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }

    fn check(&self, flag: &AtomicBool, what: &str) -> Result<(), MetaError> {
        if flag.load(Ordering::SeqCst) {
            self.injected.fetch_add(1, Ordering::SeqCst);
            return Err(MetaError::Unavailable(format!("{what} store unreachable")));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl<S: RepairHistory + 'static> RepairHistory for FaultyStore<S> {
    async fn record(&self, entry: RepairEntry) -> Result<(), MetaError> {
        self.check(&self.history_down, "history")?;
        self.inner.record(entry).await
    }

    async fn entries_since(
        &self,
        table: &TableReference,
        since_ms: i64,
    ) -> Result<Vec<RepairEntry>, MetaError> {
        self.check(&self.history_down, "history")?;
        self.inner.entries_since(table, since_ms).await
    }
}

#[async_trait::async_trait]
impl<S: LockStore + 'static> LockStore for FaultyStore<S> {
    async fn insert_if_absent_or_expired(
        &self,
        record: LockRecord,
        now_ms: i64,
    ) -> Result<bool, MetaError> {
        self.check(&self.locks_down, "lock")?;
        self.inner.insert_if_absent_or_expired(record, now_ms).await
    }

    async fn renew_if_holder(
        &self,
        key: &str,
        token: uuid::Uuid,
        expires_at_ms: i64,
        now_ms: i64,
    ) -> Result<bool, MetaError> {
        self.check(&self.locks_down, "lock")?;
        self.inner
            .renew_if_holder(key, token, expires_at_ms, now_ms)
            .await
    }

    async fn delete_if_holder(&self, key: &str, token: uuid::Uuid) -> Result<bool, MetaError> {
        self.check(&self.locks_down, "lock")?;
        self.inner.delete_if_holder(key, token).await
    }

    async fn get(&self, key: &str) -> Result<Option<LockRecord>, MetaError> {
        self.check(&self.locks_down, "lock")?;
        self.inner.get(key).await
    }

    async fn list(&self) -> Result<Vec<LockRecord>, MetaError> {
        self.check(&self.locks_down, "lock")?;
        self.inner.list().await
    }
}
