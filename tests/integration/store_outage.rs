//! Integration test: metadata store outages.
//!
//! A pass that cannot read or write the store does nothing it cannot
//! record, and the next pass after recovery picks up where it left off.

use std::sync::atomic::Ordering;

use tidemark_integration_tests::{DAY, T0, TestCluster, ring, table};
use tidemark_meta::LockStore;
use tidemark_types::events::PassSkipped;

#[tokio::test]
async fn test_history_outage_skips_pass_and_keeps_state() {
    let c = TestCluster::new(1);
    let scheduler = c.scheduler(0);
    scheduler.run_pass().await;
    assert_eq!(c.log.completed().len(), ring().len());

    c.advance(8 * DAY);
    let mut skipped = scheduler.events().subscribe::<PassSkipped>();
    c.store.fail_history(true);

    let report = scheduler.run_pass().await;
    assert!(report.tables.is_empty());
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].0, table());
    let event = skipped.try_recv().expect("pass skipped event");
    assert_eq!(event.table, table());
    assert!(event.reason.contains("unreachable"));

    // Nothing ran, nothing moved.
    assert_eq!(c.log.completed().len(), ring().len());
    assert!(
        scheduler
            .tracker()
            .states(&table())
            .iter()
            .all(|s| s.last_repaired_at_ms() == T0)
    );

    c.store.fail_history(false);
    let report = scheduler.run_pass().await;
    assert!(report.skipped.is_empty());
    assert_eq!(c.log.completed().len(), 2 * ring().len());
    assert_eq!(c.history().await.len(), 2 * ring().len());
}

#[tokio::test]
async fn test_lock_outage_runs_nothing() {
    let c = TestCluster::new(1);
    let scheduler = c.scheduler(0);
    c.store.fail_locks(true);

    let report = scheduler.run_pass().await;
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].1.contains("lock"));
    assert!(c.log.completed().is_empty());
    assert!(c.history().await.is_empty());

    c.store.fail_locks(false);
    scheduler.run_pass().await;
    assert_eq!(c.log.repaired_ranges().len(), ring().len());
    assert!(c.store.inner().list().await.unwrap().is_empty());
}

/// The history write after a finished repair fails: the vnode counts as not
/// repaired anywhere, the group's locks are still released, and the vnode is
/// repaired again once the store is back.
#[tokio::test]
async fn test_unrecorded_repair_is_retried_after_recovery() {
    let c = TestCluster::new(2);
    c.executor(0).break_history.store(true, Ordering::SeqCst);

    let report = c.scheduler(0).run_pass().await;
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(c.log.completed_by("node-0").len(), 1);
    let first = c.log.completed_by("node-0")[0].range;
    assert!(c.history().await.is_empty());
    assert!(
        c.scheduler(0)
            .tracker()
            .states(&table())
            .iter()
            .all(|s| s.last_repaired_at_ms() == 0)
    );
    assert!(c.store.inner().list().await.unwrap().is_empty());

    c.store.fail_history(false);
    c.scheduler(1).run_pass().await;
    assert!(c.log.completed_by("node-1").iter().any(|r| r.range == first));
    assert_eq!(c.history().await.len(), ring().len());
}
