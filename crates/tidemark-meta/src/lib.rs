//! Persistence layer for tidemark.
//!
//! Two logical contracts are required from storage:
//!
//! - [`RepairHistory`]: durable append of completed-repair facts, keyed by
//!   table, token range, replica set and time, readable with a lookback.
//! - [`LockStore`]: lease records keyed by lock key that can only be written
//!   through conditional operations. Acquisition succeeds only when no live
//!   record exists; renewal and release only when the caller still holds the
//!   lease token.
//!
//! Implementations:
//!
//! - [`MemoryMetaStore`] for tests and single-process use.
//! - [`MetaStore`] backed by two Fjall keyspaces (`repair_history`, `locks`).
//! - [`FaultyStore`], a wrapper that makes either contract unavailable on
//!   demand.
//!
//! Linearizable conditional writes are a precondition: every implementation
//! here serializes them in-process, and a shared external store must provide
//! the same guarantee natively.

mod error;
mod faulty;
mod memory;
mod records;
mod store;
mod traits;

pub use error::MetaError;
pub use faulty::FaultyStore;
pub use memory::MemoryMetaStore;
pub use records::{LockRecord, RepairEntry};
pub use store::MetaStore;
pub use traits::{LockStore, RepairHistory};
