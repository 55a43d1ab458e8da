//! Leased lock acquisition, renewal and release.

use std::sync::Arc;
use std::time::Duration;

use tidemark_meta::{LockRecord, LockStore};
use tidemark_types::Clock;
use tracing::{debug, info, warn};

use crate::{LockError, LockKey, UnwindBackoff};

/// A lease this process holds on one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lock {
    key: LockKey,
    token: uuid::Uuid,
    lease: Duration,
    expires_at_ms: i64,
}

impl Lock {
    pub fn key(&self) -> &LockKey {
        &self.key
    }

    /// Lease expiry in epoch milliseconds, as last written to the store.
    pub fn expires_at_ms(&self) -> i64 {
        self.expires_at_ms
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }
}

/// Result of a single-key acquisition attempt.
#[derive(Debug)]
pub enum LockOutcome {
    Acquired(Lock),
    /// Another process holds a live lease on the key.
    Denied {
        key: LockKey,
        /// Current holder, when it could be read back.
        holder: Option<String>,
        expires_at_ms: Option<i64>,
    },
}

/// Result of renewing a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewOutcome {
    Renewed,
    /// The lease expired or was taken over. Stop work immediately.
    Lost,
}

/// Every lease a repair group holds, acquired all-or-nothing.
#[derive(Debug)]
pub struct LockSet {
    locks: Vec<Lock>,
}

impl LockSet {
    pub fn locks(&self) -> &[Lock] {
        &self.locks
    }

    pub fn keys(&self) -> impl Iterator<Item = &LockKey> {
        self.locks.iter().map(Lock::key)
    }

    /// Earliest expiry across the set.
    pub fn expires_at_ms(&self) -> Option<i64> {
        self.locks.iter().map(Lock::expires_at_ms).min()
    }
}

/// Result of a multi-key acquisition attempt.
#[derive(Debug)]
pub enum LockSetOutcome {
    Acquired(LockSet),
    /// One key was held elsewhere; nothing is held by us.
    Denied {
        key: LockKey,
        holder: Option<String>,
    },
}

/// Acquires and maintains leases for one process.
///
/// Many managers, each with its own `holder_id`, may share one store; the
/// store's conditional writes decide every race.
pub struct LockManager {
    store: Arc<dyn LockStore>,
    clock: Arc<dyn Clock>,
    holder_id: String,
    backoff: UnwindBackoff,
}

impl LockManager {
    pub fn new(store: Arc<dyn LockStore>, clock: Arc<dyn Clock>, holder_id: impl Into<String>) -> Self {
        Self {
            store,
            clock,
            holder_id: holder_id.into(),
            backoff: UnwindBackoff::new(),
        }
    }

    /// Identity written into every record this manager creates.
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Attempt a single atomic acquisition of `key` for `lease`.
    pub async fn try_acquire(&self, key: &LockKey, lease: Duration) -> Result<LockOutcome, LockError> {
        let now = self.clock.now_millis();
        let record = LockRecord {
            key: key.to_string(),
            holder: self.holder_id.clone(),
            token: uuid::Uuid::new_v4(),
            acquired_at_ms: now,
            expires_at_ms: now + lease.as_millis() as i64,
        };
        let token = record.token;
        let expires_at_ms = record.expires_at_ms;

        if self.store.insert_if_absent_or_expired(record, now).await? {
            debug!(%key, holder = %self.holder_id, expires_at_ms, "lock acquired");
            return Ok(LockOutcome::Acquired(Lock {
                key: key.clone(),
                token,
                lease,
                expires_at_ms,
            }));
        }

        // Informational only; the decision was made by the conditional write.
        let current = self.store.get(key.as_str()).await.ok().flatten();
        debug!(%key, holder = ?current.as_ref().map(|r| &r.holder), "lock denied");
        Ok(LockOutcome::Denied {
            key: key.clone(),
            holder: current.as_ref().map(|r| r.holder.clone()),
            expires_at_ms: current.map(|r| r.expires_at_ms),
        })
    }

    /// Extend `lock` by its lease duration.
    ///
    /// Returns [`RenewOutcome::Lost`] if the lease already expired, even when
    /// nobody took the key over.
    pub async fn renew(&self, lock: &mut Lock) -> Result<RenewOutcome, LockError> {
        let now = self.clock.now_millis();
        let expires_at_ms = now + lock.lease.as_millis() as i64;
        if self
            .store
            .renew_if_holder(lock.key.as_str(), lock.token, expires_at_ms, now)
            .await?
        {
            lock.expires_at_ms = expires_at_ms;
            debug!(key = %lock.key, expires_at_ms, "lock renewed");
            Ok(RenewOutcome::Renewed)
        } else {
            warn!(key = %lock.key, holder = %self.holder_id, "lock lost");
            Ok(RenewOutcome::Lost)
        }
    }

    /// Release `lock`. Releasing a lease that was already lost is a no-op.
    pub async fn release(&self, lock: Lock) -> Result<(), LockError> {
        if self.store.delete_if_holder(lock.key.as_str(), lock.token).await? {
            debug!(key = %lock.key, "lock released");
        } else {
            debug!(key = %lock.key, "lock already gone at release");
        }
        Ok(())
    }

    /// How long to wait before attempting `keys` with the given unwind ratio.
    pub fn backoff_delay(&self, keys: &[LockKey], unwind_ratio: f64) -> Duration {
        self.backoff.delay(keys, unwind_ratio, self.clock.now_millis())
    }

    /// Acquire every key in `keys` (sorted order), or none of them.
    pub async fn try_acquire_all(
        &self,
        keys: &[LockKey],
        lease: Duration,
    ) -> Result<LockSetOutcome, LockError> {
        let mut sorted = keys.to_vec();
        sorted.sort();
        sorted.dedup();
        self.backoff.record_attempt(&sorted, self.clock.now_millis());

        let mut held = Vec::with_capacity(sorted.len());
        for key in &sorted {
            match self.try_acquire(key, lease).await {
                Ok(LockOutcome::Acquired(lock)) => held.push(lock),
                Ok(LockOutcome::Denied { key, holder, .. }) => {
                    self.release_quietly(held).await;
                    return Ok(LockSetOutcome::Denied { key, holder });
                }
                Err(e) => {
                    self.release_quietly(held).await;
                    return Err(e);
                }
            }
        }

        info!(keys = sorted.len(), holder = %self.holder_id, "lock set acquired");
        Ok(LockSetOutcome::Acquired(LockSet { locks: held }))
    }

    /// Renew every lease in `set`; `Lost` as soon as any one is lost.
    pub async fn renew_all(&self, set: &mut LockSet) -> Result<RenewOutcome, LockError> {
        for lock in &mut set.locks {
            if self.renew(lock).await? == RenewOutcome::Lost {
                return Ok(RenewOutcome::Lost);
            }
        }
        Ok(RenewOutcome::Renewed)
    }

    /// Release every lease in `set`, continuing past individual failures.
    ///
    /// Returns the first error seen.
    pub async fn release_all(&self, set: LockSet) -> Result<(), LockError> {
        let mut first_err = None;
        for lock in set.locks {
            let key = lock.key.clone();
            if let Err(e) = self.release(lock).await {
                warn!(%key, error = %e, "failed to release lock");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn release_quietly(&self, locks: Vec<Lock>) {
        if locks.is_empty() {
            return;
        }
        if let Err(e) = self.release_all(LockSet { locks }).await {
            warn!(error = %e, "failed to unwind partial lock set");
        }
    }
}
