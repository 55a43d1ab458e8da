//! Integration test: status escalation of a table that keeps failing.
//!
//! Severity follows how long the table has gone unrepaired, not how many
//! attempts failed, and resets on the first success.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tidemark_integration_tests::{TestCluster, node, table, weekly};
use tidemark_meta::{RepairEntry, RepairHistory};
use tidemark_repair::{GroupOutcome, SchedulerConfig};
use tidemark_types::{ManualClock, RepairStatus, ReplicaSet, TokenRange};

const WEEK_MS: i64 = 604_800_000;

#[tokio::test]
async fn test_failing_table_escalates_then_recovers() {
    let range = TokenRange::new(0, 0);
    let replicas = ReplicaSet::new([node("a", "dc1"), node("b", "dc1")]);
    let clock = Arc::new(ManualClock::new(0));
    let c = TestCluster::with_clock(
        1,
        weekly(),
        vec![(range, replicas.clone())],
        SchedulerConfig::default(),
        clock.clone(),
    );
    c.store
        .inner()
        .record(RepairEntry {
            table: table(),
            range,
            replicas,
            started_at_ms: 0,
            repaired_at_ms: 0,
        })
        .await
        .unwrap();
    c.executor(0).failing.store(true, Ordering::SeqCst);
    let scheduler = c.scheduler(0);

    // Repaired at 0, not due before one interval.
    let report = scheduler.run_pass().await;
    assert_eq!(report.outcomes().count(), 0);
    assert_eq!(
        scheduler.table_job(&table()).unwrap().status(),
        RepairStatus::InQueue
    );

    // Due and failing, still within the warning time.
    clock.set(WEEK_MS + 1);
    let report = scheduler.run_pass().await;
    assert!(matches!(
        report.outcomes().next(),
        Some(GroupOutcome::Failed(_))
    ));
    assert_eq!(
        scheduler.table_job(&table()).unwrap().status(),
        RepairStatus::InQueue
    );

    clock.set(691_200_000);
    scheduler.run_pass().await;
    assert_eq!(
        scheduler.table_job(&table()).unwrap().status(),
        RepairStatus::Warning
    );

    clock.set(864_000_001);
    scheduler.run_pass().await;
    assert_eq!(
        scheduler.table_job(&table()).unwrap().status(),
        RepairStatus::Error
    );

    // First success at the same instant resets the severity.
    c.executor(0).failing.store(false, Ordering::SeqCst);
    let report = scheduler.run_pass().await;
    assert_eq!(report.outcomes().next(), Some(&GroupOutcome::Completed));

    let job = scheduler.table_job(&table()).unwrap();
    assert_eq!(job.status(), RepairStatus::InQueue);
    assert_eq!(job.next_run_or_completion_ms(), 864_000_001 + WEEK_MS);
    assert_eq!(
        scheduler
            .tracker()
            .states(&table())
            .get(&range)
            .unwrap()
            .last_repaired_at_ms(),
        864_000_001
    );

    let history = c.history().await;
    assert_eq!(history.len(), 2);
    assert_eq!(
        history.iter().map(|e| e.repaired_at_ms).max(),
        Some(864_000_001)
    );
}

/// Failed attempts never move the anchor: severity keeps accruing from the
/// last successful repair, and the next run stays where it was.
#[tokio::test]
async fn test_failures_do_not_move_due_time() {
    let clock = Arc::new(ManualClock::new(0));
    let ring = vec![(TokenRange::new(0, 0), ReplicaSet::new([node("a", "dc1")]))];
    let c = TestCluster::with_clock(1, weekly(), ring, SchedulerConfig::default(), clock.clone());
    c.executor(0).failing.store(true, Ordering::SeqCst);
    let scheduler = c.scheduler(0);

    clock.set(WEEK_MS + 1);
    scheduler.run_pass().await;
    let first = scheduler.table_job(&table()).unwrap();
    assert_eq!(first.status(), RepairStatus::InQueue);

    clock.set(WEEK_MS + 1 + 86_400_000);
    scheduler.run_pass().await;
    let second = scheduler.table_job(&table()).unwrap();
    assert_eq!(second.id(), first.id());
    assert_eq!(second.status(), RepairStatus::Warning);
    assert_eq!(second.next_run_or_completion_ms(), WEEK_MS);
    assert_eq!(c.log.completed().len(), 0);
    assert!(c.history().await.is_empty());
}
