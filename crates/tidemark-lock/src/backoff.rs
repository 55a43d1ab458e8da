//! Unwind-ratio backoff for lock acquisition.
//!
//! Before attempting a key set again, a caller waits
//! `ratio × (now - last attempt on any of those keys)`. A ratio of 0 retries
//! immediately; a ratio of 1 doubles the spacing between attempts. The first
//! attempt on a key never waits.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::LockKey;

/// Last attempt time per lock key.
#[derive(Debug, Default)]
pub struct UnwindBackoff {
    last_attempt_ms: Mutex<HashMap<LockKey, i64>>,
}

impl UnwindBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// How long to wait before the next attempt on `keys`.
    pub fn delay(&self, keys: &[LockKey], ratio: f64, now_ms: i64) -> Duration {
        if ratio <= 0.0 {
            return Duration::ZERO;
        }
        let last = self.last_attempt_ms.lock().expect("lock poisoned");
        let Some(latest) = keys.iter().filter_map(|k| last.get(k)).max() else {
            return Duration::ZERO;
        };
        let elapsed = now_ms.saturating_sub(*latest).max(0) as f64;
        Duration::from_millis((elapsed * ratio) as u64)
    }

    /// Remember that `keys` were attempted at `now_ms`.
    pub fn record_attempt(&self, keys: &[LockKey], now_ms: i64) {
        let mut last = self.last_attempt_ms.lock().expect("lock poisoned");
        for key in keys {
            last.insert(key.clone(), now_ms);
        }
    }
}
