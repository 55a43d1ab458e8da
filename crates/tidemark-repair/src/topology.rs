//! Token ownership as reported by the data store.

use std::collections::HashMap;
use std::sync::RwLock;

use tidemark_types::{ReplicaSet, TableReference, TokenRange};

use crate::RepairError;

/// Current ownership of every table's token ranges.
#[async_trait::async_trait]
pub trait ReplicationProvider: Send + Sync {
    /// Tables that exist in the data store.
    async fn tables(&self) -> Result<Vec<TableReference>, RepairError>;

    /// Every `(range, replicas)` pair owning data of `table`.
    async fn token_ranges(
        &self,
        table: &TableReference,
    ) -> Result<Vec<(TokenRange, ReplicaSet)>, RepairError>;
}

/// Fixed topology, replaceable at runtime.
#[derive(Debug, Default)]
pub struct StaticReplicationProvider {
    tables: RwLock<HashMap<TableReference, Vec<(TokenRange, ReplicaSet)>>>,
}

impl StaticReplicationProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ownership of `table`, replacing anything known before.
    pub fn set_table(&self, table: TableReference, ranges: Vec<(TokenRange, ReplicaSet)>) {
        self.tables
            .write()
            .expect("lock poisoned")
            .insert(table, ranges);
    }

    pub fn with_table(self, table: TableReference, ranges: Vec<(TokenRange, ReplicaSet)>) -> Self {
        self.set_table(table, ranges);
        self
    }
}

#[async_trait::async_trait]
impl ReplicationProvider for StaticReplicationProvider {
    async fn tables(&self) -> Result<Vec<TableReference>, RepairError> {
        let mut tables: Vec<_> = self
            .tables
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect();
        tables.sort();
        Ok(tables)
    }

    async fn token_ranges(
        &self,
        table: &TableReference,
    ) -> Result<Vec<(TokenRange, ReplicaSet)>, RepairError> {
        self.tables
            .read()
            .expect("lock poisoned")
            .get(table)
            .cloned()
            .ok_or_else(|| RepairError::Topology {
                table: table.clone(),
                reason: "unknown table".into(),
            })
    }
}
