//! [`MetaStore`] implementation wrapping Fjall keyspaces.

use std::path::Path;
use std::sync::Mutex;

use fjall::{Database, Keyspace, KeyspaceCreateOptions};
use tidemark_types::TableReference;
use tracing::debug;

use crate::{LockRecord, LockStore, MetaError, RepairEntry, RepairHistory};

type Result<T> = std::result::Result<T, MetaError>;

/// Durable metadata store backed by Fjall.
///
/// - `repair_history`: `table \0 repaired_at start end replicas-hash` →
///   serialized [`RepairEntry`]. Keys sort by time within a table, so a
///   lookback read is a prefix scan.
/// - `locks`: lock key → serialized [`LockRecord`].
pub struct MetaStore {
    #[allow(dead_code)]
    db: Database,
    history: Keyspace,
    locks: Keyspace,
    /// Serializes the read-compare-write of every conditional lock operation.
    cas: Mutex<()>,
}

impl MetaStore {
    /// Open a persistent MetaStore at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::builder(path).open()?;
        Self::init_keyspaces(db)
    }

    /// Open a temporary MetaStore that is cleaned up on drop.
    pub fn open_temporary() -> Result<Self> {
        let tmp = tempfile::tempdir().map_err(std::io::Error::other)?;
        let db = Database::builder(tmp.path()).temporary(true).open()?;
        Self::init_keyspaces(db)
    }

    fn init_keyspaces(db: Database) -> Result<Self> {
        let history = db.keyspace("repair_history", KeyspaceCreateOptions::default)?;
        let locks = db.keyspace("locks", KeyspaceCreateOptions::default)?;
        Ok(Self {
            db,
            history,
            locks,
            cas: Mutex::new(()),
        })
    }

    fn read_lock(&self, key: &str) -> Result<Option<LockRecord>> {
        match self.locks.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_lock(&self, record: &LockRecord) -> Result<()> {
        let value = postcard::to_allocvec(record)?;
        self.locks.insert(record.key.as_bytes(), value.as_slice())?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl RepairHistory for MetaStore {
    async fn record(&self, entry: RepairEntry) -> Result<()> {
        let key = history_key(&entry);
        let value = postcard::to_allocvec(&entry)?;
        self.history.insert(key.as_slice(), value.as_slice())?;
        debug!(table = %entry.table, range = %entry.range, at = entry.repaired_at_ms, "stored repair entry");
        Ok(())
    }

    async fn entries_since(&self, table: &TableReference, since_ms: i64) -> Result<Vec<RepairEntry>> {
        let prefix = table_prefix(table);
        let mut entries = Vec::new();
        for guard in self.history.prefix(prefix.as_slice()) {
            let v = guard.value()?;
            let entry: RepairEntry = postcard::from_bytes(&v)?;
            if entry.repaired_at_ms >= since_ms {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}

#[async_trait::async_trait]
impl LockStore for MetaStore {
    async fn insert_if_absent_or_expired(&self, record: LockRecord, now_ms: i64) -> Result<bool> {
        let _guard = self.cas.lock().expect("lock poisoned");
        if self.read_lock(&record.key)?.is_some_and(|r| r.is_live(now_ms)) {
            return Ok(false);
        }
        self.write_lock(&record)?;
        debug!(key = %record.key, holder = %record.holder, "lock record inserted");
        Ok(true)
    }

    async fn renew_if_holder(
        &self,
        key: &str,
        token: uuid::Uuid,
        expires_at_ms: i64,
        now_ms: i64,
    ) -> Result<bool> {
        let _guard = self.cas.lock().expect("lock poisoned");
        match self.read_lock(key)? {
            Some(mut record) if record.token == token && record.is_live(now_ms) => {
                record.expires_at_ms = expires_at_ms;
                self.write_lock(&record)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_if_holder(&self, key: &str, token: uuid::Uuid) -> Result<bool> {
        let _guard = self.cas.lock().expect("lock poisoned");
        if self.read_lock(key)?.is_some_and(|r| r.token == token) {
            self.locks.remove(key.as_bytes())?;
            debug!(key, "lock record deleted");
            return Ok(true);
        }
        Ok(false)
    }

    async fn get(&self, key: &str) -> Result<Option<LockRecord>> {
        self.read_lock(key)
    }

    async fn list(&self) -> Result<Vec<LockRecord>> {
        let mut records = Vec::new();
        for guard in self.locks.iter() {
            let v = guard.value()?;
            records.push(postcard::from_bytes(&v)?);
        }
        Ok(records)
    }
}

/// `keyspace.table` followed by a NUL separator.
fn table_prefix(table: &TableReference) -> Vec<u8> {
    let mut prefix = table.to_string().into_bytes();
    prefix.push(0);
    prefix
}

/// Map an i64 to 8 bytes whose lexicographic order matches numeric order.
fn sortable(v: i64) -> [u8; 8] {
    ((v as u64) ^ (1 << 63)).to_be_bytes()
}

fn history_key(entry: &RepairEntry) -> Vec<u8> {
    let replicas = entry
        .replicas
        .nodes()
        .map(|n| n.node_id.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let replicas_hash = blake3::hash(replicas.as_bytes());

    let mut key = table_prefix(&entry.table);
    key.extend_from_slice(&sortable(entry.repaired_at_ms));
    key.extend_from_slice(&sortable(entry.range.start()));
    key.extend_from_slice(&sortable(entry.range.end()));
    key.extend_from_slice(&replicas_hash.as_bytes()[..8]);
    key
}
