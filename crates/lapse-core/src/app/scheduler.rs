//! Scheduler loop - cron 待機、backoff 待機、sweep 実行を shutdown まで繰り返す
//!
//! # 学習ポイント
//! - shutdown は `watch` チャネル（WorkerGroup と同じ形）
//! - backoff の状態は `SweeperHandle::run_now` と共有し、手動実行の結果も数える

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, watch};
use tracing::{error, info, warn};

use super::cron::CronSchedule;
use super::status::{HealthProbe, SchedulerState, StatusPublisher};
use crate::domain::{ErrorKind, RunOutcome, RunSummary, SweepError};
use crate::ports::Clock;
use crate::sweep::{BackoffController, SweepExecutor};

pub struct Scheduler {
    executor: Arc<SweepExecutor>,
    schedule: CronSchedule,
    backoff: Arc<Mutex<BackoffController>>,
    clock: Arc<dyn Clock>,
    status: Arc<StatusPublisher>,
    enabled: bool,
    fail_stop_on_unexpected: bool,
}

impl Scheduler {
    pub fn new(
        executor: Arc<SweepExecutor>,
        schedule: CronSchedule,
        backoff: BackoffController,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            executor,
            schedule,
            backoff: Arc::new(Mutex::new(backoff)),
            clock,
            status: Arc::new(StatusPublisher::new()),
            enabled: true,
            fail_stop_on_unexpected: true,
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn fail_stop_on_unexpected(mut self, fail_stop: bool) -> Self {
        self.fail_stop_on_unexpected = fail_stop;
        self
    }

    pub fn probe(&self) -> HealthProbe {
        self.status.probe()
    }

    pub(crate) fn publisher(&self) -> Arc<StatusPublisher> {
        self.status.clone()
    }

    pub(crate) fn backoff(&self) -> Arc<Mutex<BackoffController>> {
        self.backoff.clone()
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped).
    ///
    /// Returns `Err` only when fail-stop is on and a sweep failed with an
    /// unexpected error.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), SweepError> {
        if !self.enabled {
            info!("sweep disabled by configuration");
            self.status.set_state(SchedulerState::Stopped);
            return Ok(());
        }

        self.status.update(|status| status.registered = true);
        info!(schedule = %self.schedule, "scheduler started");

        let result = self.run_loop(&mut shutdown).await;

        self.status.update(|status| status.next_run_at = None);
        self.status.set_state(SchedulerState::Stopped);
        match &result {
            Ok(()) => info!("scheduler stopped"),
            Err(err) => error!(error = %err, "scheduler stopped on unexpected error"),
        }
        result
    }

    async fn run_loop(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<(), SweepError> {
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            let now = self.clock.now();
            let Some(next) = self.schedule.next_after(now) else {
                warn!(schedule = %self.schedule, "schedule has no upcoming run");
                return Ok(());
            };
            self.status.update(|status| {
                status.state = SchedulerState::Waiting;
                status.running = false;
                status.next_run_at = Some(next);
            });
            if !sleep_or_shutdown(until(now, next), shutdown).await {
                return Ok(());
            }

            let now = self.clock.now();
            let (delay, failures) = {
                let backoff = self.backoff.lock().await;
                (backoff.should_delay(now), backoff.consecutive_failures())
            };
            if !delay.is_zero() {
                let resume_at = chrono::Duration::from_std(delay)
                    .ok()
                    .and_then(|delay| now.checked_add_signed(delay));
                self.status.update(|status| {
                    status.state = SchedulerState::Backoff;
                    status.next_run_at = resume_at;
                });
                warn!(
                    consecutive_failures = failures,
                    delay_secs = delay.as_secs(),
                    "backing off before next sweep"
                );
                if !sleep_or_shutdown(delay, shutdown).await {
                    return Ok(());
                }
            }

            self.status.set_state(SchedulerState::Running);
            let started_at = self.clock.now();
            let outcome = self.executor.run_once_until_shutdown(shutdown).await;
            let finished_at = self.clock.now();

            record_run(&self.backoff, &self.status, started_at, finished_at, &outcome).await;
            self.status.update(|status| {
                status.state = SchedulerState::Idle;
                status.running = false;
            });

            if let RunOutcome::Failed(err) = outcome {
                if err.kind() == ErrorKind::Unexpected && self.fail_stop_on_unexpected {
                    return Err(err);
                }
            }
        }
    }
}

/// Feed one finished sweep into the backoff controller and the health probe.
/// Skipped and cancelled runs count as neither success nor failure.
pub(crate) async fn record_run(
    backoff: &Mutex<BackoffController>,
    status: &StatusPublisher,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    outcome: &RunOutcome,
) {
    let failures = {
        let mut backoff = backoff.lock().await;
        match outcome {
            RunOutcome::Completed(_) => backoff.record_result(true, finished_at),
            RunOutcome::Skipped | RunOutcome::Failed(SweepError::Cancelled) => {}
            RunOutcome::Failed(_) => backoff.record_result(false, finished_at),
        }
        backoff.consecutive_failures()
    };
    let summary = RunSummary {
        started_at,
        finished_at,
        result: outcome.into(),
    };
    status.update(|status| {
        status.last_run = Some(summary);
        status.consecutive_failures = failures;
    });
}

fn until(now: DateTime<Utc>, next: DateTime<Utc>) -> Duration {
    (next - now).to_std().unwrap_or(Duration::ZERO)
}

/// `true` if the full duration elapsed, `false` on shutdown.
async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        // Err means the sender is gone, which is shutdown as well.
        _ = shutdown.wait_for(|stop| *stop) => false,
    }
}
