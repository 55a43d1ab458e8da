//! Integration test: cluster-wide mutual exclusion.
//!
//! Several scheduler instances race over the same table. The execution log
//! records every repair that ran while another holder repaired under a
//! shared lock key.

use std::sync::atomic::Ordering;
use std::time::Duration;

use tidemark_integration_tests::{TestCluster, ring, weekly};
use tidemark_meta::LockStore;
use tidemark_repair::{GroupOutcome, SchedulerConfig};
use tidemark_types::{RepairLockType, RepairParallelism};

/// Three instances, concurrent passes: no overlap, every vnode repaired.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_passes_never_overlap() {
    let c = TestCluster::new(3);
    for instance in c.instances() {
        instance.executor.set_delay(Duration::from_millis(5));
    }

    let (r0, r1, r2) = tokio::join!(
        c.scheduler(0).run_pass(),
        c.scheduler(1).run_pass(),
        c.scheduler(2).run_pass(),
    );

    assert_eq!(c.log.violations(), 0, "two holders repaired under one key");
    assert_eq!(c.log.repaired_ranges().len(), ring().len());
    assert!(r0.completed_groups() + r1.completed_groups() + r2.completed_groups() >= 1);
    // Every lock was released at the end of its group.
    assert!(c.store.inner().list().await.unwrap().is_empty());
}

/// Datacenter locks: any two repairs touching the same datacenter exclude
/// each other across instances.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_datacenter_locks_exclude_whole_datacenter() {
    let policy = weekly()
        .to_builder()
        .lock_type(RepairLockType::Datacenter)
        .parallelism(RepairParallelism::Sequential)
        .build()
        .unwrap();
    let c = TestCluster::with_config(2, policy, ring(), SchedulerConfig::default());
    for instance in c.instances() {
        instance.executor.set_delay(Duration::from_millis(5));
    }

    tokio::join!(c.scheduler(0).run_pass(), c.scheduler(1).run_pass());

    assert_eq!(c.log.violations(), 0);
    assert_eq!(c.log.repaired_ranges().len(), ring().len());
}

/// A group held by one instance is denied to the other, which still works
/// on groups with different replicas.
#[tokio::test]
async fn test_held_group_is_skipped_by_others() {
    let policy = weekly()
        .to_builder()
        .parallelism(RepairParallelism::Sequential)
        .build()
        .unwrap();
    let c = TestCluster::with_config(2, policy, ring(), SchedulerConfig::default());
    c.executor(0).hanging.store(true, Ordering::SeqCst);

    let s0 = c.scheduler(0).clone();
    let pass0 = tokio::spawn(async move { s0.run_pass().await });
    c.executor(0).started.notified().await;

    // Instance 0 is stuck repairing the oldest vnode and holds its key.
    let held = c.store.inner().list().await.unwrap();
    assert_eq!(held.len(), 1);
    assert_eq!(held[0].holder, "node-0");

    let report = c.scheduler(1).run_pass().await;
    assert_eq!(report.denied_groups(), 1);
    assert_eq!(report.completed_groups(), ring().len() - 1);
    match report.outcomes().find(|o| matches!(o, GroupOutcome::Denied { .. })) {
        Some(GroupOutcome::Denied { key, holder }) => {
            assert_eq!(key, &held[0].key);
            assert_eq!(holder.as_deref(), Some("node-0"));
        }
        other => panic!("expected a denied group, got {other:?}"),
    }
    assert_eq!(c.log.violations(), 0);

    c.scheduler(0).shutdown();
    let report0 = tokio::time::timeout(Duration::from_secs(5), pass0)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report0.outcomes().next(), Some(&GroupOutcome::Cancelled));
    assert!(c.store.inner().list().await.unwrap().is_empty());
}
