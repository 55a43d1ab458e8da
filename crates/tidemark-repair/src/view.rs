//! Read-only job projections for operators and external callers.

use std::fmt;
use std::sync::Arc;

use tidemark_types::{JobId, RepairConfiguration, RepairStatus, TableReference};

use crate::job::{JobKind, RepairJob};
use crate::snapshot::RepairStateSnapshot;

/// The variant-specific part of a [`RepairJobView`].
#[derive(Debug, Clone, PartialEq)]
pub enum JobViewKind {
    /// Recurring job, with the snapshot its status was derived from.
    Scheduled { snapshot: Arc<RepairStateSnapshot> },
    /// One-shot job; `completed_at_ms` is `-1` until it completes.
    OnDemand { completed_at_ms: i64 },
}

/// Point-in-time projection of a repair job.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairJobView {
    id: JobId,
    table: TableReference,
    config: RepairConfiguration,
    status: RepairStatus,
    progress: f64,
    kind: JobViewKind,
}

impl RepairJobView {
    pub(crate) fn of(job: &RepairJob, now_ms: i64) -> Self {
        let kind = match job.kind() {
            JobKind::Scheduled { snapshot } => JobViewKind::Scheduled {
                snapshot: snapshot.clone(),
            },
            JobKind::OnDemand { .. } => JobViewKind::OnDemand {
                completed_at_ms: job.completed_at_ms(),
            },
        };
        Self {
            id: job.id(),
            table: job.table().clone(),
            config: job.config().clone(),
            status: job.status(now_ms),
            progress: job.progress().clamp(0.0, 1.0),
            kind,
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

    pub fn status(&self) -> RepairStatus {
        self.status
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn kind(&self) -> &JobViewKind {
        &self.kind
    }

    pub fn is_on_demand(&self) -> bool {
        matches!(self.kind, JobViewKind::OnDemand { .. })
    }

    /// Next run for a scheduled job; completion time (or `-1`) for an
    /// on-demand one.
    pub fn next_run_or_completion_ms(&self) -> i64 {
        match &self.kind {
            JobViewKind::Scheduled { snapshot } => snapshot
                .last_completed_at_ms()
                .saturating_add(self.config.repair_interval_ms()),
            JobViewKind::OnDemand { completed_at_ms } => *completed_at_ms,
        }
    }
}

impl fmt::Display for RepairJobView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_on_demand() {
            "on-demand"
        } else {
            "scheduled"
        };
        write!(
            f,
            "{} {} {kind} {} {:.1}% next={}",
            self.id,
            self.table,
            self.status,
            self.progress * 100.0,
            self.next_run_or_completion_ms()
        )
    }
}
