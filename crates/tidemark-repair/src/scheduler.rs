//! Repair scheduler: periodic per-table passes that refresh repair state,
//! pick due groups, take their locks and drive the executor.
//!
//! Each pass:
//!
//! 1. Reads recent history and current ownership for every configured table
//!    and folds both into the [`VnodeStateTracker`].
//! 2. Takes a [`RepairStateSnapshot`] and walks its groups oldest first.
//! 3. For every group: waits out the unwind backoff (at most one
//!    `frequency`), acquires all lock keys or none, then repairs each
//!    sub-range while a keep-alive renews the leases. A lost lease drops the
//!    repair future at once, and so does cancellation or shutdown, which also
//!    cut a backoff short and end the rest of the pass.
//!
//! Tables are processed concurrently on a bounded pool; a table is never in
//! two passes at the same time.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tidemark_lock::{LockKey, LockManager, LockSet, LockSetOutcome, RenewOutcome};
use tidemark_meta::{RepairEntry, RepairHistory};
use tidemark_types::events::{EventBus, LockLost, PassSkipped, VnodeRepaired};
use tidemark_types::{
    Clock, JobId, RepairConfiguration, RepairConfigurationProvider, TableReference, TokenRange,
};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, interval};
use tracing::{debug, error, info, instrument, warn};

use crate::RepairError;
use crate::executor::{RepairExecutor, RepairRequest};
use crate::job::{JobKind, JobRegistry, RepairJob};
use crate::planner::{self, NoSizeEstimate, RepairTask, ReplicaRepairGroup, SizeEstimator};
use crate::snapshot::RepairStateSnapshot;
use crate::state::VnodeRepairState;
use crate::topology::ReplicationProvider;
use crate::tracker::VnodeStateTracker;
use crate::view::RepairJobView;

/// Process-wide scheduler settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// How often a pass runs.
    pub frequency: Duration,
    /// Tables repaired at the same time.
    pub max_concurrent_tables: usize,
    /// Lease on every lock; renewed every third of it.
    pub lease: Duration,
    /// How far back history is read on each pass.
    pub history_lookback: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            frequency: Duration::from_secs(30),
            max_concurrent_tables: 4,
            lease: Duration::from_secs(600),
            history_lookback: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

/// What happened to one repair group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupOutcome {
    /// Every sub-range repaired and recorded.
    Completed,
    /// A lock key was held elsewhere; the group stays queued.
    Denied { key: String, holder: Option<String> },
    /// A lease was lost mid-repair.
    LockLost,
    /// The executor reported a failure.
    Failed(String),
    /// Cancelled by request or shutdown.
    Cancelled,
}

/// Result of one table's pass.
#[derive(Debug, Clone)]
pub struct TableReport {
    pub table: TableReference,
    pub job_id: JobId,
    pub groups: Vec<GroupOutcome>,
}

/// Result of one scheduling pass across all tables.
#[derive(Debug, Default)]
pub struct PassReport {
    pub tables: Vec<TableReport>,
    /// Tables whose pass was skipped, with the reason.
    pub skipped: Vec<(TableReference, String)>,
}

impl PassReport {
    pub fn outcomes(&self) -> impl Iterator<Item = &GroupOutcome> {
        self.tables.iter().flat_map(|t| t.groups.iter())
    }

    pub fn completed_groups(&self) -> usize {
        self.outcomes()
            .filter(|o| **o == GroupOutcome::Completed)
            .count()
    }

    pub fn denied_groups(&self) -> usize {
        self.outcomes()
            .filter(|o| matches!(o, GroupOutcome::Denied { .. }))
            .count()
    }
}

struct Inner {
    config: SchedulerConfig,
    policies: Arc<dyn RepairConfigurationProvider>,
    replication: Arc<dyn ReplicationProvider>,
    history: Arc<dyn RepairHistory>,
    locks: Arc<LockManager>,
    executor: Arc<dyn RepairExecutor>,
    sizes: Arc<dyn SizeEstimator>,
    clock: Arc<dyn Clock>,
    tracker: VnodeStateTracker,
    jobs: JobRegistry,
    events: EventBus,
    /// Bounds how many tables are worked on at once.
    pool: Arc<Semaphore>,
    /// Tables with a pass in flight.
    busy: Mutex<HashSet<TableReference>>,
    /// Cancellation signal of every running job.
    cancels: Mutex<HashMap<JobId, watch::Sender<bool>>>,
    shutdown: watch::Sender<bool>,
}

/// Collects the collaborators of a [`RepairScheduler`].
pub struct RepairSchedulerBuilder {
    config: SchedulerConfig,
    policies: Arc<dyn RepairConfigurationProvider>,
    replication: Arc<dyn ReplicationProvider>,
    history: Arc<dyn RepairHistory>,
    locks: Arc<LockManager>,
    executor: Arc<dyn RepairExecutor>,
    clock: Arc<dyn Clock>,
    sizes: Arc<dyn SizeEstimator>,
    events: EventBus,
}

impl RepairSchedulerBuilder {
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn size_estimator(mut self, sizes: Arc<dyn SizeEstimator>) -> Self {
        self.sizes = sizes;
        self
    }

    /// Publish job and lock events on `events` instead of a private bus.
    pub fn events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn build(self) -> RepairScheduler {
        let (shutdown, _) = watch::channel(false);
        RepairScheduler {
            inner: Arc::new(Inner {
                pool: Arc::new(Semaphore::new(self.config.max_concurrent_tables.max(1))),
                config: self.config,
                policies: self.policies,
                replication: self.replication,
                history: self.history,
                locks: self.locks,
                executor: self.executor,
                sizes: self.sizes,
                clock: self.clock,
                tracker: VnodeStateTracker::new(),
                jobs: JobRegistry::new(self.events.clone()),
                events: self.events,
                busy: Mutex::new(HashSet::new()),
                cancels: Mutex::new(HashMap::new()),
                shutdown,
            }),
        }
    }
}

type TablePass = JoinHandle<Result<Option<TableReport>, RepairError>>;

/// Marks a table busy for as long as it lives.
struct TableClaim<'a> {
    busy: &'a Mutex<HashSet<TableReference>>,
    table: TableReference,
}

impl Drop for TableClaim<'_> {
    fn drop(&mut self) {
        self.busy.lock().expect("lock poisoned").remove(&self.table);
    }
}

/// Routes [`RepairScheduler::cancel`] to one job's pass while it lives.
struct PassCancel<'a> {
    cancels: &'a Mutex<HashMap<JobId, watch::Sender<bool>>>,
    job_id: JobId,
    rx: watch::Receiver<bool>,
}

impl<'a> PassCancel<'a> {
    fn register(cancels: &'a Mutex<HashMap<JobId, watch::Sender<bool>>>, job_id: JobId) -> Self {
        let (tx, rx) = watch::channel(false);
        cancels.lock().expect("lock poisoned").insert(job_id, tx);
        Self {
            cancels,
            job_id,
            rx,
        }
    }

    fn is_raised(&self) -> bool {
        *self.rx.borrow()
    }
}

impl Drop for PassCancel<'_> {
    fn drop(&mut self) {
        self.cancels
            .lock()
            .expect("lock poisoned")
            .remove(&self.job_id);
    }
}

/// Resolves once the flag is set. Pends forever if the sender is gone.
async fn flag_raised(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|raised| *raised).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn describe_keys(set: &LockSet) -> String {
    set.keys()
        .map(LockKey::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

/// Periodic repair scheduler. Cheap to clone.
#[derive(Clone)]
pub struct RepairScheduler {
    inner: Arc<Inner>,
}

impl RepairScheduler {
    pub fn builder(
        policies: Arc<dyn RepairConfigurationProvider>,
        replication: Arc<dyn ReplicationProvider>,
        history: Arc<dyn RepairHistory>,
        locks: Arc<LockManager>,
        executor: Arc<dyn RepairExecutor>,
        clock: Arc<dyn Clock>,
    ) -> RepairSchedulerBuilder {
        RepairSchedulerBuilder {
            config: SchedulerConfig::default(),
            policies,
            replication,
            history,
            locks,
            executor,
            clock,
            sizes: Arc::new(NoSizeEstimate),
            events: EventBus::new(),
        }
    }

    pub fn tracker(&self) -> &VnodeStateTracker {
        &self.inner.tracker
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Run passes every `frequency` until [`shutdown`](Self::shutdown).
    pub async fn run(&self) {
        info!(
            frequency_ms = self.inner.config.frequency.as_millis() as u64,
            holder = self.inner.locks.holder_id(),
            "repair scheduler started"
        );
        let mut tick = interval(self.inner.config.frequency);
        let mut shutdown = self.inner.shutdown.subscribe();

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = tick.tick() => {
                    let report = self.run_pass().await;
                    debug!(
                        tables = report.tables.len(),
                        skipped = report.skipped.len(),
                        completed = report.completed_groups(),
                        "repair pass finished"
                    );
                }
                _ = flag_raised(&mut shutdown) => break,
            }
        }
        info!("repair scheduler stopped");
    }

    /// Stop the run loop and interrupt every running repair.
    pub fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
    }

    /// One pass over every configured table and every queued on-demand job.
    #[instrument(skip(self))]
    pub async fn run_pass(&self) -> PassReport {
        let mut report = PassReport::default();

        let tables = match self.inner.replication.tables().await {
            Ok(tables) => tables,
            Err(e) => {
                error!(error = %e, "failed to list tables, skipping pass");
                return report;
            }
        };

        let mut handles = Vec::new();
        for table in tables {
            let Some(config) = self.inner.policies.for_table(&table) else {
                if self.inner.jobs.remove_scheduled(&table).is_some() {
                    info!(%table, "table no longer configured for repair");
                }
                continue;
            };

            let Ok(permit) = self.inner.pool.clone().acquire_owned().await else {
                warn!("table pool closed");
                break;
            };
            let this = self.clone();
            let task_table = table.clone();
            handles.push((
                table,
                tokio::spawn(async move {
                    let _permit = permit;
                    this.run_table(&task_table, &config).await
                }),
            ));
        }

        self.join_passes(handles, &mut report).await;

        // On-demand jobs go after the scheduled passes so that they do not
        // find their table busy.
        let mut handles = Vec::new();
        for job in self.inner.jobs.queued_on_demand() {
            let Ok(permit) = self.inner.pool.clone().acquire_owned().await else {
                break;
            };
            let this = self.clone();
            let table = job.table().clone();
            handles.push((
                table,
                tokio::spawn(async move {
                    let _permit = permit;
                    this.run_on_demand(job).await
                }),
            ));
        }
        self.join_passes(handles, &mut report).await;

        report
    }

    async fn join_passes(&self, handles: Vec<(TableReference, TablePass)>, report: &mut PassReport) {
        for (table, handle) in handles {
            match handle.await {
                Ok(Ok(Some(table_report))) => report.tables.push(table_report),
                Ok(Ok(None)) => report
                    .skipped
                    .push((table, "pass already running".to_string())),
                Ok(Err(e)) => report.skipped.push((table, e.to_string())),
                Err(e) => {
                    error!(%table, error = %e, "table pass panicked");
                    report.skipped.push((table, e.to_string()));
                }
            }
        }
    }

    fn claim(&self, table: &TableReference) -> Option<TableClaim<'_>> {
        let mut busy = self.inner.busy.lock().expect("lock poisoned");
        if !busy.insert(table.clone()) {
            return None;
        }
        Some(TableClaim {
            busy: &self.inner.busy,
            table: table.clone(),
        })
    }

    fn skip(&self, table: &TableReference, error: &RepairError) {
        warn!(%table, error = %error, "repair pass skipped");
        self.inner.events.emit(PassSkipped {
            table: table.clone(),
            reason: error.to_string(),
        });
    }

    fn is_shutting_down(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// Fold history and ownership into the tracker.
    ///
    /// Both are read before anything is applied, so a store failure leaves
    /// the tracked state untouched.
    async fn refresh(&self, table: &TableReference) -> Result<(), RepairError> {
        let now = self.inner.clock.now_millis();
        let since = now.saturating_sub(self.inner.config.history_lookback.as_millis() as i64);

        let entries = self.inner.history.entries_since(table, since).await?;
        let ownership = self.inner.replication.token_ranges(table).await?;

        let advanced = self.inner.tracker.apply_history(table, &entries);
        self.inner.tracker.sync_topology(table, &ownership);
        debug!(%table, entries = entries.len(), advanced, "repair state refreshed");
        Ok(())
    }

    fn publish_snapshot(
        &self,
        table: &TableReference,
        config: &RepairConfiguration,
    ) -> (JobId, Arc<RepairStateSnapshot>) {
        let now = self.inner.clock.now_millis();
        let snapshot = Arc::new(self.inner.tracker.snapshot(table, config, now));
        let job_id = self
            .inner
            .jobs
            .upsert_scheduled(table, config.clone(), snapshot.clone());
        (job_id, snapshot)
    }

    /// Scheduled pass over one table. `None` if the table was busy.
    #[instrument(skip(self, config), fields(table = %table))]
    async fn run_table(
        &self,
        table: &TableReference,
        config: &RepairConfiguration,
    ) -> Result<Option<TableReport>, RepairError> {
        let Some(_claim) = self.claim(table) else {
            debug!(%table, "pass already running for table");
            return Ok(None);
        };

        if let Err(e) = self.refresh(table).await {
            self.skip(table, &e);
            return Err(e);
        }
        let (job_id, snapshot) = self.publish_snapshot(table, config);
        if !snapshot.can_repair() {
            debug!(%table, "nothing due");
        }
        let mut cancel = PassCancel::register(&self.inner.cancels, job_id);

        let mut groups = Vec::new();
        for group in snapshot.replica_repair_groups() {
            if self.is_shutting_down() || cancel.is_raised() {
                break;
            }
            match self
                .execute_group(job_id, table, config, group, &mut cancel.rx)
                .await
            {
                Ok(outcome) => groups.push(outcome),
                Err(e) => {
                    self.publish_snapshot(table, config);
                    self.skip(table, &e);
                    return Err(e);
                }
            }
        }

        self.publish_snapshot(table, config);
        Ok(Some(TableReport {
            table: table.clone(),
            job_id,
            groups,
        }))
    }

    /// Run every remaining vnode of an on-demand job. `None` if the table was
    /// busy.
    #[instrument(skip(self, job), fields(table = %job.table(), job_id = %job.id()))]
    async fn run_on_demand(&self, job: RepairJob) -> Result<Option<TableReport>, RepairError> {
        let table = job.table().clone();
        let Some(_claim) = self.claim(&table) else {
            return Ok(None);
        };
        let JobKind::OnDemand {
            requested,
            repaired,
            ..
        } = job.kind()
        else {
            return Ok(None);
        };

        if let Err(e) = self.refresh(&table).await {
            self.skip(&table, &e);
            return Err(e);
        }

        let selected: Vec<VnodeRepairState> = self
            .inner
            .tracker
            .states(&table)
            .iter()
            .filter(|s| {
                requested
                    .as_ref()
                    .is_none_or(|ranges| ranges.iter().any(|r| r.overlaps(s.range())))
            })
            .cloned()
            .collect();
        self.inner.jobs.select_vnodes(job.id(), selected.len())?;

        let remaining: Vec<VnodeRepairState> = selected
            .into_iter()
            .filter(|s| !repaired.contains(s.range()))
            .collect();

        let mut report = TableReport {
            table: table.clone(),
            job_id: job.id(),
            groups: Vec::new(),
        };

        if remaining.is_empty() {
            self.inner.jobs.start(job.id(), 0)?;
            self.inner
                .jobs
                .succeed(job.id(), self.inner.clock.now_millis())?;
            return Ok(Some(report));
        }

        let config = job.config().clone();
        let mut cancel = PassCancel::register(&self.inner.cancels, job.id());
        for group in planner::group_vnodes(remaining, config.parallelism()) {
            if self.is_shutting_down()
                || cancel.is_raised()
                || self.inner.jobs.get(job.id()).is_none()
            {
                break;
            }
            match self
                .execute_group(job.id(), &table, &config, &group, &mut cancel.rx)
                .await
            {
                Ok(outcome) => report.groups.push(outcome),
                Err(e) => {
                    self.skip(&table, &e);
                    return Err(e);
                }
            }
        }
        Ok(Some(report))
    }

    /// Lock, repair and record one group.
    ///
    /// Contention, lease loss, executor failure and cancellation are
    /// outcomes; store failures are errors that end the table's pass.
    #[instrument(skip_all, fields(table = %table, job_id = %job_id, vnodes = group.len()))]
    async fn execute_group(
        &self,
        job_id: JobId,
        table: &TableReference,
        config: &RepairConfiguration,
        group: &ReplicaRepairGroup,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> Result<GroupOutcome, RepairError> {
        let inner = &self.inner;
        let keys = LockKey::for_group(config.lock_type(), group.replica_sets());
        let mut shutdown_rx = inner.shutdown.subscribe();

        let delay = inner
            .locks
            .backoff_delay(&keys, config.unwind_ratio())
            .min(inner.config.frequency);
        if !delay.is_zero() {
            debug!(delay_ms = delay.as_millis() as u64, "unwinding before lock attempt");
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = flag_raised(cancel_rx) => {
                    info!("cancelled while unwinding");
                    return Ok(GroupOutcome::Cancelled);
                }
                () = flag_raised(&mut shutdown_rx) => {
                    info!("shutdown while unwinding");
                    return Ok(GroupOutcome::Cancelled);
                }
            }
        }

        let lease = inner.config.lease;
        let mut set = match inner.locks.try_acquire_all(&keys, lease).await? {
            LockSetOutcome::Acquired(set) => set,
            LockSetOutcome::Denied { key, holder } => {
                debug!(%key, ?holder, "group locked elsewhere, staying queued");
                return Ok(GroupOutcome::Denied {
                    key: key.to_string(),
                    holder,
                });
            }
        };

        let tasks = planner::plan_tasks(
            table,
            group,
            config.target_repair_size(),
            inner.sizes.as_ref(),
        );
        let total: usize = tasks.iter().map(|t| t.subranges.len()).sum();
        if let Err(e) = inner.jobs.start(job_id, total) {
            self.release(set).await;
            return Err(e);
        }

        info!(subranges = total, keys = keys.len(), "repairing group");
        let result = tokio::select! {
            r = self.repair_tasks(job_id, table, config, &tasks) => r,
            lost = self.keep_alive(&mut set) => Err(lost),
            _ = flag_raised(cancel_rx) => Err(RepairError::Cancelled(job_id)),
            _ = flag_raised(&mut shutdown_rx) => Err(RepairError::Cancelled(job_id)),
        };

        self.release(set).await;

        let now = inner.clock.now_millis();
        match result {
            Ok(()) => {
                self.settle(job_id, inner.jobs.succeed(job_id, now).map(|_| ()));
                info!("group repaired");
                Ok(GroupOutcome::Completed)
            }
            Err(RepairError::Cancelled(_)) => {
                info!("group repair cancelled");
                self.settle(job_id, inner.jobs.fail(job_id));
                Ok(GroupOutcome::Cancelled)
            }
            Err(RepairError::LockLost { key }) => {
                warn!(%key, "lease lost, group will be re-validated next pass");
                inner.events.emit(LockLost {
                    key,
                    holder: inner.locks.holder_id().to_string(),
                });
                self.settle(job_id, inner.jobs.fail(job_id));
                Ok(GroupOutcome::LockLost)
            }
            Err(e @ RepairError::Execution { .. }) => {
                warn!(error = %e, "group repair failed");
                self.settle(job_id, inner.jobs.fail(job_id));
                Ok(GroupOutcome::Failed(e.to_string()))
            }
            Err(e) => {
                self.settle(job_id, inner.jobs.fail(job_id));
                Err(e)
            }
        }
    }

    /// A job may vanish mid-run when an on-demand job is cancelled.
    fn settle(&self, job_id: JobId, result: Result<(), RepairError>) {
        if let Err(e) = result {
            debug!(%job_id, error = %e, "job already gone");
        }
    }

    async fn release(&self, set: LockSet) {
        if let Err(e) = self.inner.locks.release_all(set).await {
            warn!(error = %e, "failed to release group locks; they will expire");
        }
    }

    /// Renew `set` every third of the lease until renewal fails.
    ///
    /// A store error is retried on the next tick; once the lease has run out
    /// without a successful renewal it is treated as lost.
    async fn keep_alive(&self, set: &mut LockSet) -> RepairError {
        let period = (self.inner.config.lease / 3).max(Duration::from_millis(1));
        loop {
            tokio::time::sleep(period).await;
            match self.inner.locks.renew_all(set).await {
                Ok(RenewOutcome::Renewed) => {}
                Ok(RenewOutcome::Lost) => {
                    return RepairError::LockLost {
                        key: describe_keys(set),
                    };
                }
                Err(e) => {
                    warn!(error = %e, "lease renewal failed");
                    let now = self.inner.clock.now_millis();
                    if set.expires_at_ms().is_some_and(|at| now >= at) {
                        return RepairError::LockLost {
                            key: describe_keys(set),
                        };
                    }
                }
            }
        }
    }

    /// Repair every sub-range; record each vnode once all of its sub-ranges
    /// are done.
    ///
    /// History is written before the tracker is updated so that a failed
    /// write leaves no local trace of the completion.
    async fn repair_tasks(
        &self,
        job_id: JobId,
        table: &TableReference,
        config: &RepairConfiguration,
        tasks: &[RepairTask],
    ) -> Result<(), RepairError> {
        let inner = &self.inner;
        for task in tasks {
            let started_at_ms = inner.clock.now_millis();
            for range in &task.subranges {
                self.repair_range(job_id, table, config, task, *range)
                    .await?;
                self.settle(job_id, inner.jobs.part_done(job_id));
            }

            let vnode = &task.vnode;
            let repaired_at_ms = inner.clock.now_millis();
            inner
                .history
                .record(RepairEntry {
                    table: table.clone(),
                    range: *vnode.range(),
                    replicas: vnode.replicas().clone(),
                    started_at_ms,
                    repaired_at_ms,
                })
                .await?;
            inner.tracker.record_completion(
                table,
                *vnode.range(),
                vnode.replicas().clone(),
                repaired_at_ms,
            );
            self.settle(job_id, inner.jobs.vnode_done(job_id, *vnode.range()));
            inner.events.emit(VnodeRepaired {
                table: table.clone(),
                range: *vnode.range(),
                replicas: vnode.replicas().clone(),
                repaired_at_ms,
            });
            debug!(range = %vnode.range(), repaired_at_ms, "vnode repaired");
        }
        Ok(())
    }

    async fn repair_range(
        &self,
        job_id: JobId,
        table: &TableReference,
        config: &RepairConfiguration,
        task: &RepairTask,
        range: TokenRange,
    ) -> Result<(), RepairError> {
        let request = RepairRequest {
            job_id,
            table: table.clone(),
            range,
            replicas: task.vnode.replicas().clone(),
            parallelism: config.parallelism(),
        };
        self.inner
            .executor
            .repair(request)
            .await
            .map_err(|e| match e {
                e @ RepairError::Execution { .. } => e,
                other => RepairError::Execution {
                    range,
                    reason: other.to_string(),
                },
            })
    }

    // ---- on-demand surface ----

    /// Queue a one-shot repair of `table`, optionally limited to the vnodes
    /// overlapping `ranges`.
    pub async fn trigger_on_demand(
        &self,
        table: &TableReference,
        ranges: Option<Vec<TokenRange>>,
    ) -> Result<JobId, RepairError> {
        let config = self
            .inner
            .policies
            .for_table(table)
            .ok_or_else(|| RepairError::NotConfigured(table.clone()))?;
        self.inner.replication.token_ranges(table).await?;

        let job = RepairJob::on_demand(
            table.clone(),
            config,
            ranges,
            self.inner.clock.now_millis(),
        );
        Ok(self.inner.jobs.add_on_demand(job))
    }

    /// Cancel a job.
    ///
    /// A running pass stops: a repair in flight is interrupted and its locks
    /// released, a backoff is cut short and no further group is started.
    /// Recorded state is left untouched. On-demand jobs are removed whether
    /// running or queued; a scheduled job returns to the queue, and
    /// cancelling one with no pass in progress is
    /// [`RepairError::NotRunning`].
    pub fn cancel(&self, job_id: JobId) -> Result<(), RepairError> {
        let job = self
            .inner
            .jobs
            .get(job_id)
            .ok_or(RepairError::JobNotFound(job_id))?;

        let running = self
            .inner
            .cancels
            .lock()
            .expect("lock poisoned")
            .get(&job_id)
            .map(|tx| tx.send_replace(true))
            .is_some();
        if job.is_on_demand() {
            self.inner.jobs.remove(job_id);
        } else if !running {
            return Err(RepairError::NotRunning(job_id));
        }
        info!(%job_id, table = %job.table(), "repair job cancelled");
        Ok(())
    }

    // ---- introspection ----

    pub fn scheduled_jobs(&self) -> Vec<RepairJobView> {
        self.inner
            .jobs
            .scheduled_views(self.inner.clock.now_millis())
    }

    pub fn on_demand_jobs(&self) -> Vec<RepairJobView> {
        self.inner
            .jobs
            .on_demand_views(self.inner.clock.now_millis())
    }

    pub fn job(&self, job_id: JobId) -> Option<RepairJobView> {
        self.inner
            .jobs
            .view(job_id, self.inner.clock.now_millis())
    }

    /// Scheduled job view of `table`, if it has been scheduled.
    pub fn table_job(&self, table: &TableReference) -> Option<RepairJobView> {
        self.inner
            .jobs
            .scheduled_job_id(table)
            .and_then(|id| self.job(id))
    }
}
