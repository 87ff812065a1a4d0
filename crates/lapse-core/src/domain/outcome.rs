//! Outcome - 1 回の sweep の結果
//!
//! These are plain data. They carry no behavior beyond small accessors so the
//! scheduler, the health probe and the CLI can all report the same shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::SweepError;
use super::ids::LeadId;

/// Result of dispatching notifications for one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    /// Leads referenced by an owner notification this cycle.
    pub processed: Vec<LeadId>,

    /// Leads withheld by cooldown or the per-owner cap.
    pub deferred: Vec<LeadId>,

    /// Leads without an owner; nobody to notify.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unowned: Vec<LeadId>,

    /// Notifications persisted (owner-grouped + system).
    pub notifications: usize,

    /// Owners whose dispatch failed and was isolated.
    pub failed_owners: usize,
}

/// Summary of a completed sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Candidates counted at the start of the sweep.
    pub candidates: usize,

    /// Batches fetched.
    pub batches: usize,

    /// Leads actually flipped to `Expired`.
    pub expired: usize,

    /// Previously deferred leads carried into this cycle's dispatch.
    pub carried_over: usize,

    pub dispatch: DispatchReport,
}

/// Typed result of `SweepExecutor::run_once`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Pipeline finished before the deadline.
    Completed(SweepReport),

    /// Another sweep held the lock; nothing was done.
    Skipped,

    Failed(SweepError),
}

impl RunOutcome {
    /// True only if the pipeline completed.
    pub fn succeeded(&self) -> bool {
        matches!(self, RunOutcome::Completed(_))
    }

    pub fn report(&self) -> Option<&SweepReport> {
        match self {
            RunOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&SweepError> {
        match self {
            RunOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Serializable view of the last run, exposed by the health probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub result: RunResultView,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunResultView {
    Completed { report: SweepReport },
    Skipped,
    Failed { error: String },
}

impl From<&RunOutcome> for RunResultView {
    fn from(outcome: &RunOutcome) -> Self {
        match outcome {
            RunOutcome::Completed(report) => RunResultView::Completed {
                report: report.clone(),
            },
            RunOutcome::Skipped => RunResultView::Skipped,
            RunOutcome::Failed(err) => RunResultView::Failed {
                error: err.to_string(),
            },
        }
    }
}
