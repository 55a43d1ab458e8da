//! In-memory metadata backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, RwLock};

use tidemark_types::TableReference;
use tracing::debug;

use crate::{LockRecord, LockStore, MetaError, RepairEntry, RepairHistory};

/// Repair history and lock records held in process memory.
///
/// Lock operations take a single mutex, which makes each conditional write
/// atomic with respect to every other caller sharing the same instance.
#[derive(Debug, Default)]
pub struct MemoryMetaStore {
    history: RwLock<HashMap<TableReference, Vec<RepairEntry>>>,
    locks: Mutex<BTreeMap<String, LockRecord>>,
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl RepairHistory for MemoryMetaStore {
    async fn record(&self, entry: RepairEntry) -> Result<(), MetaError> {
        let mut history = self.history.write().expect("lock poisoned");
        debug!(table = %entry.table, range = %entry.range, "recording repair in memory");
        let entries = history.entry(entry.table.clone()).or_default();
        let pos = entries.partition_point(|e| e.repaired_at_ms <= entry.repaired_at_ms);
        entries.insert(pos, entry);
        Ok(())
    }

    async fn entries_since(
        &self,
        table: &TableReference,
        since_ms: i64,
    ) -> Result<Vec<RepairEntry>, MetaError> {
        let history = self.history.read().expect("lock poisoned");
        Ok(history
            .get(table)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.repaired_at_ms >= since_ms)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl LockStore for MemoryMetaStore {
    async fn insert_if_absent_or_expired(
        &self,
        record: LockRecord,
        now_ms: i64,
    ) -> Result<bool, MetaError> {
        let mut locks = self.locks.lock().expect("lock poisoned");
        if locks.get(&record.key).is_some_and(|r| r.is_live(now_ms)) {
            return Ok(false);
        }
        locks.insert(record.key.clone(), record);
        Ok(true)
    }

    async fn renew_if_holder(
        &self,
        key: &str,
        token: uuid::Uuid,
        expires_at_ms: i64,
        now_ms: i64,
    ) -> Result<bool, MetaError> {
        let mut locks = self.locks.lock().expect("lock poisoned");
        match locks.get_mut(key) {
            Some(record) if record.token == token && record.is_live(now_ms) => {
                record.expires_at_ms = expires_at_ms;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_if_holder(&self, key: &str, token: uuid::Uuid) -> Result<bool, MetaError> {
        let mut locks = self.locks.lock().expect("lock poisoned");
        if locks.get(key).is_some_and(|r| r.token == token) {
            locks.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn get(&self, key: &str) -> Result<Option<LockRecord>, MetaError> {
        let locks = self.locks.lock().expect("lock poisoned");
        Ok(locks.get(key).cloned())
    }

    async fn list(&self) -> Result<Vec<LockRecord>, MetaError> {
        let locks = self.locks.lock().expect("lock poisoned");
        Ok(locks.values().cloned().collect())
    }
}
