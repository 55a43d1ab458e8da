//! Integration test: on-demand repairs across instances.

use std::sync::atomic::Ordering;
use std::time::Duration;

use tidemark_integration_tests::{DAY, T0, TestCluster, ring, table};
use tidemark_meta::LockStore;
use tidemark_repair::{GroupOutcome, JobViewKind, RepairError};
use tidemark_types::{RepairStatus, TokenRange};

/// A one-shot repair run by one instance shows up in every instance's
/// schedule, because they all read the shared history.
#[tokio::test]
async fn test_on_demand_repair_visible_to_other_instances() {
    let c = TestCluster::new(2);
    c.seed_history(T0).await;
    c.advance(DAY);

    let job_id = c
        .scheduler(0)
        .trigger_on_demand(&table(), Some(vec![TokenRange::new(10, 20)]))
        .await
        .unwrap();
    let queued = c.scheduler(0).job(job_id).unwrap();
    assert_eq!(queued.status(), RepairStatus::InQueue);
    assert_eq!(queued.next_run_or_completion_ms(), -1);

    let report = c.scheduler(0).run_pass().await;
    assert_eq!(report.completed_groups(), 1);

    // Only the vnode overlapping the requested range, repaired whole.
    let repaired = c.log.completed_by("node-0");
    assert_eq!(repaired.len(), 1);
    assert_eq!(repaired[0].range, TokenRange::new(0, 100));

    let done = c.scheduler(0).job(job_id).unwrap();
    assert_eq!(done.status(), RepairStatus::Completed);
    assert_eq!(done.progress(), 1.0);
    assert!(matches!(
        done.kind(),
        JobViewKind::OnDemand { completed_at_ms } if *completed_at_ms == T0 + DAY.as_millis() as i64
    ));

    // The other instance picks the repair up from history.
    c.scheduler(1).run_pass().await;
    assert!(c.scheduler(1).on_demand_jobs().is_empty());
    let states = c.scheduler(1).tracker().states(&table());
    for (range, _) in ring() {
        let expected = if range == TokenRange::new(0, 100) {
            T0 + DAY.as_millis() as i64
        } else {
            T0
        };
        assert_eq!(states.get(&range).unwrap().last_repaired_at_ms(), expected);
    }
    assert!(c.log.completed_by("node-1").is_empty());
}

/// Cancelling a running on-demand job stops the repair, releases its locks
/// and forgets the job.
#[tokio::test]
async fn test_cancel_running_on_demand_job() {
    let c = TestCluster::new(1);
    c.seed_history(T0).await;
    c.advance(DAY);

    let scheduler = c.scheduler(0).clone();
    let job_id = scheduler.trigger_on_demand(&table(), None).await.unwrap();

    c.executor(0).hanging.store(true, Ordering::SeqCst);
    let pass = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.run_pass().await }
    });
    c.executor(0).started.notified().await;
    assert_eq!(
        scheduler.job(job_id).unwrap().status(),
        RepairStatus::Running
    );
    assert!(!c.store.inner().list().await.unwrap().is_empty());

    scheduler.cancel(job_id).unwrap();
    let report = tokio::time::timeout(Duration::from_secs(5), pass)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.outcomes().collect::<Vec<_>>(), vec![&GroupOutcome::Cancelled]);
    assert!(scheduler.job(job_id).is_none());
    assert!(scheduler.on_demand_jobs().is_empty());
    assert!(c.store.inner().list().await.unwrap().is_empty());
    // Nothing recorded beyond the seed.
    assert!(c.history().await.iter().all(|e| e.repaired_at_ms == T0));

    assert!(matches!(
        scheduler.cancel(job_id),
        Err(RepairError::JobNotFound(id)) if id == job_id
    ));
}
