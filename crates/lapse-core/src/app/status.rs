//! Health probe - scheduler の状態を読み取り専用で公開する

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::domain::RunSummary;

/// Scheduler state machine.
///
/// ```text
/// Idle -> Waiting -> (Backoff ->) Running -> Idle
///   any state -> Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Waiting,
    Running,
    Backoff,
    Stopped,
}

/// Snapshot returned by `HealthProbe::snapshot`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepStatus {
    /// The scheduler loop was started and has not exited.
    pub registered: bool,

    /// A sweep is executing right now.
    pub running: bool,

    pub state: SchedulerState,

    pub last_run: Option<RunSummary>,

    pub consecutive_failures: u32,

    pub next_run_at: Option<DateTime<Utc>>,
}

impl SweepStatus {
    pub(crate) fn initial() -> Self {
        Self {
            registered: false,
            running: false,
            state: SchedulerState::Idle,
            last_run: None,
            consecutive_failures: 0,
            next_run_at: None,
        }
    }
}

/// Cheap, cloneable reader of the scheduler status.
#[derive(Debug, Clone)]
pub struct HealthProbe {
    rx: watch::Receiver<SweepStatus>,
}

impl HealthProbe {
    pub(crate) fn new(rx: watch::Receiver<SweepStatus>) -> Self {
        Self { rx }
    }

    pub fn snapshot(&self) -> SweepStatus {
        self.rx.borrow().clone()
    }

    /// Wait until the status satisfies `predicate` and return it. Returns
    /// `None` if the scheduler is gone before that happens.
    pub async fn wait_until(
        &mut self,
        predicate: impl FnMut(&SweepStatus) -> bool,
    ) -> Option<SweepStatus> {
        self.rx.wait_for(predicate).await.ok().map(|status| status.clone())
    }
}

/// Write side, owned by the scheduler.
#[derive(Debug)]
pub(crate) struct StatusPublisher {
    tx: watch::Sender<SweepStatus>,
}

impl StatusPublisher {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(SweepStatus::initial());
        Self { tx }
    }

    pub(crate) fn probe(&self) -> HealthProbe {
        HealthProbe::new(self.tx.subscribe())
    }

    pub(crate) fn update(&self, apply: impl FnOnce(&mut SweepStatus)) {
        self.tx.send_modify(apply);
    }

    pub(crate) fn set_state(&self, state: SchedulerState) {
        self.update(|status| {
            status.state = state;
            status.running = state == SchedulerState::Running;
            if state == SchedulerState::Stopped {
                status.registered = false;
            }
        });
    }
}
