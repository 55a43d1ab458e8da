//! Repair job lifecycle.
//!
//! A job moves `IN_QUEUE → RUNNING → (IN_QUEUE | COMPLETED)`. `WARNING` and
//! `ERROR` are not stored: they are derived on read from how long the job
//! has been due, so repeated failures visibly worsen severity without any
//! retry bookkeeping.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use tidemark_types::events::{EventBus, JobStatusChanged};
use tidemark_types::{JobId, RepairConfiguration, RepairStatus, TableReference, TokenRange};
use tracing::{debug, info};

use crate::RepairError;
use crate::snapshot::RepairStateSnapshot;
use crate::view::RepairJobView;

/// Escalate `base` by how long the job has been due.
///
/// Thresholds are inclusive and measured from `due_since_ms`. `COMPLETED`
/// never escalates.
pub fn escalate(
    base: RepairStatus,
    due_since_ms: i64,
    now_ms: i64,
    config: &RepairConfiguration,
) -> RepairStatus {
    if base == RepairStatus::Completed {
        return base;
    }
    let overdue = now_ms.saturating_sub(due_since_ms);
    if overdue >= config.error_time_ms() {
        RepairStatus::Error
    } else if overdue >= config.warning_time_ms() {
        RepairStatus::Warning
    } else {
        base
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Queued,
    Running,
    Completed,
}

impl Phase {
    fn status(self) -> RepairStatus {
        match self {
            Self::Queued => RepairStatus::InQueue,
            Self::Running => RepairStatus::Running,
            Self::Completed => RepairStatus::Completed,
        }
    }
}

/// What a job repairs.
#[derive(Debug, Clone)]
pub enum JobKind {
    /// Recurring repair of a whole table, driven by its latest snapshot.
    Scheduled { snapshot: Arc<RepairStateSnapshot> },
    /// One-shot repair requested by an operator.
    OnDemand {
        /// Explicit ranges, or `None` for every vnode of the table.
        requested: Option<Vec<TokenRange>>,
        /// Vnodes selected when the job first ran.
        selected: usize,
        /// Vnodes already repaired by this job.
        repaired: BTreeSet<TokenRange>,
        completed_at_ms: Option<i64>,
    },
}

/// One scheduled or on-demand repair job.
#[derive(Debug, Clone)]
pub struct RepairJob {
    id: JobId,
    table: TableReference,
    config: RepairConfiguration,
    kind: JobKind,
    phase: Phase,
    done_parts: usize,
    total_parts: usize,
    due_since_ms: i64,
}

impl RepairJob {
    pub fn scheduled(
        table: TableReference,
        config: RepairConfiguration,
        snapshot: Arc<RepairStateSnapshot>,
    ) -> Self {
        Self {
            id: JobId::new(),
            table,
            config,
            due_since_ms: snapshot.last_completed_at_ms(),
            kind: JobKind::Scheduled { snapshot },
            phase: Phase::Queued,
            done_parts: 0,
            total_parts: 0,
        }
    }

    pub fn on_demand(
        table: TableReference,
        config: RepairConfiguration,
        requested: Option<Vec<TokenRange>>,
        created_at_ms: i64,
    ) -> Self {
        Self {
            id: JobId::new(),
            table,
            config,
            kind: JobKind::OnDemand {
                requested,
                selected: 0,
                repaired: BTreeSet::new(),
                completed_at_ms: None,
            },
            phase: Phase::Queued,
            done_parts: 0,
            total_parts: 0,
            due_since_ms: created_at_ms,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn table(&self) -> &TableReference {
        &self.table
    }

    pub fn config(&self) -> &RepairConfiguration {
        &self.config
    }

    pub fn kind(&self) -> &JobKind {
        &self.kind
    }

    pub fn is_on_demand(&self) -> bool {
        matches!(self.kind, JobKind::OnDemand { .. })
    }

    /// When the work this job covers became due.
    pub fn due_since_ms(&self) -> i64 {
        self.due_since_ms
    }

    /// Lifecycle status before escalation.
    pub fn base_status(&self) -> RepairStatus {
        self.phase.status()
    }

    /// Visible status at `now_ms`.
    pub fn status(&self, now_ms: i64) -> RepairStatus {
        escalate(self.base_status(), self.due_since_ms, now_ms, &self.config)
    }

    /// Progress in `[0, 1]`.
    ///
    /// While running: finished sub-ranges over sub-ranges in the running
    /// group. Otherwise a scheduled job reports the share of vnodes not due,
    /// and an on-demand job the share of its vnodes already repaired.
    pub fn progress(&self) -> f64 {
        match (&self.kind, self.phase) {
            (_, Phase::Completed) => 1.0,
            (_, Phase::Running) if self.total_parts > 0 => {
                self.done_parts as f64 / self.total_parts as f64
            }
            (_, Phase::Running) => 0.0,
            (JobKind::Scheduled { snapshot }, Phase::Queued) => snapshot.repaired_fraction(),
            (JobKind::OnDemand { selected, repaired, .. }, Phase::Queued) => {
                if *selected == 0 {
                    0.0
                } else {
                    repaired.len() as f64 / *selected as f64
                }
            }
        }
    }

    /// Latest snapshot of a scheduled job.
    pub fn snapshot(&self) -> Option<&Arc<RepairStateSnapshot>> {
        match &self.kind {
            JobKind::Scheduled { snapshot } => Some(snapshot),
            JobKind::OnDemand { .. } => None,
        }
    }

    /// Completion time of an on-demand job; `-1` while not completed.
    pub fn completed_at_ms(&self) -> i64 {
        match &self.kind {
            JobKind::OnDemand {
                completed_at_ms: Some(at),
                ..
            } => *at,
            _ => -1,
        }
    }

    fn invalid(&self, action: &'static str) -> RepairError {
        RepairError::InvalidTransition {
            job_id: self.id,
            status: self.base_status(),
            action,
        }
    }

    fn start(&mut self, total_parts: usize) -> Result<(), RepairError> {
        if self.phase != Phase::Queued {
            return Err(self.invalid("start"));
        }
        self.phase = Phase::Running;
        self.done_parts = 0;
        self.total_parts = total_parts;
        Ok(())
    }

    fn part_done(&mut self) -> Result<(), RepairError> {
        if self.phase != Phase::Running {
            return Err(self.invalid("record progress"));
        }
        self.done_parts = (self.done_parts + 1).min(self.total_parts);
        Ok(())
    }

    /// Returns whether the job as a whole is now complete.
    fn succeed(&mut self, now_ms: i64) -> Result<bool, RepairError> {
        if self.phase != Phase::Running {
            return Err(self.invalid("complete"));
        }
        self.done_parts = self.total_parts;
        match &mut self.kind {
            JobKind::Scheduled { .. } => {
                self.phase = Phase::Queued;
                Ok(true)
            }
            JobKind::OnDemand {
                selected,
                repaired,
                completed_at_ms,
                ..
            } => {
                if repaired.len() >= *selected {
                    self.phase = Phase::Completed;
                    *completed_at_ms = Some(now_ms);
                    Ok(true)
                } else {
                    self.phase = Phase::Queued;
                    Ok(false)
                }
            }
        }
    }

    fn fail(&mut self) -> Result<(), RepairError> {
        if self.phase != Phase::Running {
            return Err(self.invalid("fail"));
        }
        self.phase = Phase::Queued;
        self.done_parts = 0;
        Ok(())
    }
}

/// Every job this process knows about, with transitions published on the
/// [`EventBus`].
#[derive(Debug)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, RepairJob>>,
    scheduled: RwLock<HashMap<TableReference, JobId>>,
    events: EventBus,
}

impl JobRegistry {
    pub fn new(events: EventBus) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            scheduled: RwLock::new(HashMap::new()),
            events,
        }
    }

    fn emit(&self, job: &RepairJob, from: RepairStatus, to: RepairStatus) {
        if from != to {
            self.events.emit(JobStatusChanged {
                job_id: job.id,
                table: job.table.clone(),
                from,
                to,
            });
        }
    }

    fn with_job<R>(
        &self,
        id: JobId,
        f: impl FnOnce(&mut RepairJob) -> Result<R, RepairError>,
    ) -> Result<R, RepairError> {
        let mut jobs = self.jobs.write().expect("lock poisoned");
        let job = jobs.get_mut(&id).ok_or(RepairError::JobNotFound(id))?;
        f(job)
    }

    /// Create or refresh the scheduled job of `table` with a new snapshot.
    pub fn upsert_scheduled(
        &self,
        table: &TableReference,
        config: RepairConfiguration,
        snapshot: Arc<RepairStateSnapshot>,
    ) -> JobId {
        let mut scheduled = self.scheduled.write().expect("lock poisoned");
        let mut jobs = self.jobs.write().expect("lock poisoned");

        if let Some(job) = scheduled.get(table).and_then(|id| jobs.get_mut(id)) {
            job.due_since_ms = snapshot.last_completed_at_ms();
            job.kind = JobKind::Scheduled { snapshot };
            job.config = config;
            return job.id;
        }

        let job = RepairJob::scheduled(table.clone(), config, snapshot);
        let id = job.id;
        debug!(%table, job_id = %id, "scheduled repair job created");
        scheduled.insert(table.clone(), id);
        jobs.insert(id, job);
        id
    }

    /// Drop the scheduled job of a table that is no longer configured.
    pub fn remove_scheduled(&self, table: &TableReference) -> Option<RepairJob> {
        let id = self.scheduled.write().expect("lock poisoned").remove(table)?;
        self.jobs.write().expect("lock poisoned").remove(&id)
    }

    /// Register a new on-demand job.
    pub fn add_on_demand(&self, job: RepairJob) -> JobId {
        let id = job.id;
        info!(table = %job.table, job_id = %id, "on-demand repair job queued");
        self.jobs.write().expect("lock poisoned").insert(id, job);
        id
    }

    /// Record how many vnodes an on-demand job covers, once.
    pub fn select_vnodes(&self, id: JobId, count: usize) -> Result<(), RepairError> {
        self.with_job(id, |job| {
            if let JobKind::OnDemand { selected, .. } = &mut job.kind {
                if *selected == 0 {
                    *selected = count;
                }
            }
            Ok(())
        })
    }

    /// `IN_QUEUE → RUNNING` with `total_parts` sub-ranges to repair.
    pub fn start(&self, id: JobId, total_parts: usize) -> Result<(), RepairError> {
        let mut jobs = self.jobs.write().expect("lock poisoned");
        let job = jobs.get_mut(&id).ok_or(RepairError::JobNotFound(id))?;
        job.start(total_parts)?;
        self.emit(job, RepairStatus::InQueue, RepairStatus::Running);
        Ok(())
    }

    /// One sub-range of the running group finished.
    pub fn part_done(&self, id: JobId) -> Result<(), RepairError> {
        self.with_job(id, RepairJob::part_done)
    }

    /// A whole vnode of an on-demand job finished.
    pub fn vnode_done(&self, id: JobId, range: TokenRange) -> Result<(), RepairError> {
        self.with_job(id, |job| {
            if let JobKind::OnDemand { repaired, .. } = &mut job.kind {
                repaired.insert(range);
            }
            Ok(())
        })
    }

    /// The running group finished. Returns whether the job is complete.
    ///
    /// Scheduled jobs report `COMPLETED` for the run and are visible as
    /// `IN_QUEUE` again afterwards; completed on-demand jobs stay
    /// `COMPLETED`.
    pub fn succeed(&self, id: JobId, now_ms: i64) -> Result<bool, RepairError> {
        let mut jobs = self.jobs.write().expect("lock poisoned");
        let job = jobs.get_mut(&id).ok_or(RepairError::JobNotFound(id))?;
        let complete = job.succeed(now_ms)?;
        let to = if complete {
            RepairStatus::Completed
        } else {
            RepairStatus::InQueue
        };
        self.emit(job, RepairStatus::Running, to);
        Ok(complete)
    }

    /// The running group failed or was interrupted: back to `IN_QUEUE`.
    pub fn fail(&self, id: JobId) -> Result<(), RepairError> {
        let mut jobs = self.jobs.write().expect("lock poisoned");
        let job = jobs.get_mut(&id).ok_or(RepairError::JobNotFound(id))?;
        job.fail()?;
        self.emit(job, RepairStatus::Running, RepairStatus::InQueue);
        Ok(())
    }

    /// Forget a job entirely.
    pub fn remove(&self, id: JobId) -> Option<RepairJob> {
        let removed = self.jobs.write().expect("lock poisoned").remove(&id)?;
        if !removed.is_on_demand() {
            self.scheduled
                .write()
                .expect("lock poisoned")
                .retain(|_, job_id| *job_id != id);
        }
        Some(removed)
    }

    pub fn get(&self, id: JobId) -> Option<RepairJob> {
        self.jobs.read().expect("lock poisoned").get(&id).cloned()
    }

    pub fn scheduled_job_id(&self, table: &TableReference) -> Option<JobId> {
        self.scheduled.read().expect("lock poisoned").get(table).copied()
    }

    /// On-demand jobs waiting to run, oldest first.
    pub fn queued_on_demand(&self) -> Vec<RepairJob> {
        let mut jobs: Vec<RepairJob> = self
            .jobs
            .read()
            .expect("lock poisoned")
            .values()
            .filter(|j| j.is_on_demand() && j.phase == Phase::Queued)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| (j.due_since_ms, j.id));
        jobs
    }

    pub fn view(&self, id: JobId, now_ms: i64) -> Option<RepairJobView> {
        self.jobs
            .read()
            .expect("lock poisoned")
            .get(&id)
            .map(|job| RepairJobView::of(job, now_ms))
    }

    /// Views of all scheduled jobs, ordered by table.
    pub fn scheduled_views(&self, now_ms: i64) -> Vec<RepairJobView> {
        self.views(now_ms, |job| !job.is_on_demand())
    }

    /// Views of all on-demand jobs, ordered by table.
    pub fn on_demand_views(&self, now_ms: i64) -> Vec<RepairJobView> {
        self.views(now_ms, RepairJob::is_on_demand)
    }

    fn views(&self, now_ms: i64, keep: impl Fn(&RepairJob) -> bool) -> Vec<RepairJobView> {
        let jobs = self.jobs.read().expect("lock poisoned");
        let mut views: Vec<RepairJobView> = jobs
            .values()
            .filter(|job| keep(job))
            .map(|job| RepairJobView::of(job, now_ms))
            .collect();
        views.sort_by(|a, b| a.table().cmp(b.table()).then_with(|| a.id().cmp(&b.id())));
        views
    }
}
