//! Integration test: lease expiry and takeover.
//!
//! A holder that stops renewing loses its keys once the lease runs out, and
//! a holder that notices the loss stops repairing.

use std::sync::atomic::Ordering;
use std::time::Duration;

use tidemark_integration_tests::{T0, TestCluster, ring, table, weekly};
use tidemark_lock::{LockKey, LockManager, LockOutcome};
use tidemark_meta::LockStore;
use tidemark_repair::{GroupOutcome, SchedulerConfig};
use tidemark_types::events::LockLost;

/// A process that crashed while holding a key blocks the group for exactly
/// one lease, then the key is taken over.
#[tokio::test]
async fn test_crashed_holder_blocks_until_lease_expires() {
    let c = TestCluster::new(1);
    let lease = c.scheduler(0).config().lease;

    // Never renewed, never released.
    let crashed = LockManager::new(c.store.clone(), c.clock.clone(), "crashed");
    let key = LockKey::for_replicas(&ring()[0].1);
    let LockOutcome::Acquired(_stale) = crashed.try_acquire(&key, lease).await.unwrap() else {
        panic!("expected to acquire {key}");
    };

    // First group is {ab, cd}; the other two complete.
    let report = c.scheduler(0).run_pass().await;
    assert_eq!(report.denied_groups(), 1);
    assert_eq!(report.completed_groups(), 2);
    match report.outcomes().next() {
        Some(GroupOutcome::Denied { key: denied, holder }) => {
            assert_eq!(denied, key.as_str());
            assert_eq!(holder.as_deref(), Some("crashed"));
        }
        other => panic!("expected the first group to be denied, got {other:?}"),
    }

    // One millisecond short of expiry the key is still held.
    c.advance(lease - Duration::from_millis(1));
    let report = c.scheduler(0).run_pass().await;
    assert_eq!(report.denied_groups(), 1);
    assert_eq!(report.completed_groups(), 0);

    c.advance(Duration::from_millis(1));
    let report = c.scheduler(0).run_pass().await;
    assert_eq!(report.denied_groups(), 0);
    assert_eq!(report.completed_groups(), 1);

    let history = c.history().await;
    assert_eq!(history.len(), ring().len());
    let late: Vec<_> = history
        .iter()
        .filter(|e| e.repaired_at_ms == T0 + lease.as_millis() as i64)
        .map(|e| e.range)
        .collect();
    assert_eq!(late.len(), 2);
    assert!(late.contains(&ring()[0].0));
    assert!(c.store.inner().list().await.unwrap().is_empty());
}

/// A holder whose lease ran out mid-repair aborts the group, and the next
/// holder repairs it.
#[tokio::test]
async fn test_lost_lease_stops_repair() {
    let config = SchedulerConfig {
        lease: Duration::from_millis(60),
        ..SchedulerConfig::default()
    };
    let c = TestCluster::with_config(2, weekly(), ring(), config);
    let mut lost = c.scheduler(0).events().subscribe::<LockLost>();

    c.executor(0).hanging.store(true, Ordering::SeqCst);
    let s0 = c.scheduler(0).clone();
    let pass0 = tokio::spawn(async move { s0.run_pass().await });
    c.executor(0).started.notified().await;
    // Only the call already in flight stalls.
    c.executor(0).hanging.store(false, Ordering::SeqCst);

    c.advance(Duration::from_millis(61));
    let report1 = c.scheduler(1).run_pass().await;
    assert_eq!(report1.outcomes().next(), Some(&GroupOutcome::Completed));

    let report0 = tokio::time::timeout(Duration::from_secs(5), pass0)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report0.outcomes().next(), Some(&GroupOutcome::LockLost));

    let event = lost.try_recv().expect("lock lost event");
    assert_eq!(event.holder, "node-0");
    assert!(event.key.contains(LockKey::for_replicas(&ring()[0].1).as_str()));

    // The stalled call never finished, so node-0 recorded nothing for it.
    let first = ring()[0].0;
    assert!(
        c.log
            .completed_by("node-1")
            .iter()
            .any(|r| r.range == first)
    );
    assert!(c.history().await.iter().any(|e| e.range == first));
    assert!(c.store.inner().list().await.unwrap().is_empty());
    assert!(
        c.scheduler(1)
            .tracker()
            .states(&table())
            .iter()
            .all(|s| s.last_repaired_at_ms() > 0)
    );
}
