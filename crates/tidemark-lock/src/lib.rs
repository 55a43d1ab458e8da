//! Distributed repair locks for tidemark.
//!
//! - [`LockKey`] derives the keys a repair group must hold from the table's
//!   [`RepairLockType`](tidemark_types::RepairLockType).
//! - [`LockManager`] acquires, renews and releases leased locks through a
//!   single conditional write against a shared
//!   [`LockStore`](tidemark_meta::LockStore).
//! - [`UnwindBackoff`] spaces out repeated acquisition attempts on the same
//!   keys.
//!
//! No in-process mutex stands in for cross-process safety: two managers
//! sharing a store exclude each other exactly as two processes would.

mod backoff;
mod error;
mod key;
mod manager;

pub use backoff::UnwindBackoff;
pub use error::LockError;
pub use key::LockKey;
pub use manager::{Lock, LockManager, LockOutcome, LockSet, LockSetOutcome, RenewOutcome};
