//! Sweep executor - scan → transition → notify を 1 回実行する
//!
//! # 学習ポイント
//! - single-flight: `tokio::sync::Mutex` を `lock_timeout` 付きで取得、取れなければ Skipped
//! - 実行期限は `tokio::time::timeout`、shutdown は `select!` で割り込む

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, watch};
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::{CandidateScanner, NotificationDispatcher, TransitionApplier};
use crate::domain::{LeadId, RunOutcome, SweepError, SweepReport};
use crate::ports::Clock;

/// Timing knobs of a single sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorSettings {
    /// How long `run_once` waits for a sweep already in flight.
    pub lock_timeout: Duration,

    /// Budget for the whole pipeline.
    pub execution_deadline: Duration,

    /// Pause between candidate batches.
    pub batch_pause: Duration,

    /// Maximum previously-deferred leads pulled into one dispatch.
    pub notice_backlog_limit: usize,
}

pub struct SweepExecutor {
    scanner: CandidateScanner,
    applier: TransitionApplier,
    dispatcher: NotificationDispatcher,
    clock: Arc<dyn Clock>,
    settings: ExecutorSettings,
    /// Single-flight guard. Held for the whole pipeline.
    lock: Mutex<()>,
}

impl SweepExecutor {
    pub fn new(
        scanner: CandidateScanner,
        applier: TransitionApplier,
        dispatcher: NotificationDispatcher,
        clock: Arc<dyn Clock>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            scanner,
            applier,
            dispatcher,
            clock,
            settings,
            lock: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Run one sweep. Never panics or returns an error directly: every
    /// result, including lock contention, is a `RunOutcome`.
    pub async fn run_once(&self) -> RunOutcome {
        self.guarded(std::future::pending()).await
    }

    /// Like `run_once`, but the sweep is abandoned as soon as `shutdown`
    /// flips to `true` (or its sender is dropped).
    pub async fn run_once_until_shutdown(&self, shutdown: &watch::Receiver<bool>) -> RunOutcome {
        let mut shutdown = shutdown.clone();
        self.guarded(async move {
            // Err means the sender is gone, which is shutdown as well.
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
    }

    async fn guarded(&self, cancelled: impl Future<Output = ()>) -> RunOutcome {
        let guard = match tokio::time::timeout(self.settings.lock_timeout, self.lock.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                warn!(
                    lock_timeout = ?self.settings.lock_timeout,
                    "previous sweep still running, skipping this one"
                );
                return RunOutcome::Skipped;
            }
        };

        let started = Instant::now();
        let deadline = self.settings.execution_deadline;
        let pipeline = tokio::time::timeout(deadline, self.pipeline())
            .instrument(info_span!("sweep"));

        let outcome = tokio::select! {
            result = pipeline => match result {
                Ok(Ok(report)) => RunOutcome::Completed(report),
                Ok(Err(err)) => RunOutcome::Failed(err),
                Err(_) => RunOutcome::Failed(SweepError::Timeout(deadline)),
            },
            _ = cancelled => RunOutcome::Failed(SweepError::Cancelled),
        };
        drop(guard);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            RunOutcome::Completed(report) => info!(
                candidates = report.candidates,
                batches = report.batches,
                expired = report.expired,
                carried_over = report.carried_over,
                notified = report.dispatch.processed.len(),
                deferred = report.dispatch.deferred.len(),
                elapsed_ms,
                "sweep completed"
            ),
            RunOutcome::Failed(err) => error!(error = %err, kind = ?err.kind(), elapsed_ms, "sweep failed"),
            RunOutcome::Skipped => {}
        }
        outcome
    }

    /// # Flow
    /// 1. Count candidates; none means no transition work.
    /// 2. Fetch, re-validate and expire one batch at a time, pausing between
    ///    batches.
    /// 3. Add leads deferred by earlier sweeps whose notice is still pending.
    /// 4. Dispatch notifications for the union.
    async fn pipeline(&self) -> Result<SweepReport, SweepError> {
        let now = self.clock.now();
        let mut report = SweepReport {
            candidates: self.scanner.count_candidates(now).await?,
            ..SweepReport::default()
        };

        let mut to_notify = Vec::new();
        let batches = self.scanner.batches_for(report.candidates);
        let mut offset = 0;
        for index in 0..batches {
            if index > 0 && !self.settings.batch_pause.is_zero() {
                tokio::time::sleep(self.settings.batch_pause).await;
            }
            let batch = self.scanner.batch(offset, now).await?;
            if batch.is_empty() {
                break;
            }
            let fetched = batch.len();
            let applied = self.applier.apply_batch(batch, self.clock.now()).await?;
            offset += fetched - applied.len();

            debug!(batch = index, fetched, expired = applied.len(), "batch applied");
            report.batches += 1;
            report.expired += applied.len();
            to_notify.extend(applied);
        }

        let fresh: HashSet<LeadId> = to_notify.iter().map(|lead| lead.id).collect();
        let backlog = self
            .scanner
            .pending_notices(self.settings.notice_backlog_limit + fresh.len())
            .await?;
        let carried: Vec<_> = backlog
            .into_iter()
            .filter(|lead| !fresh.contains(&lead.id))
            .collect();
        report.carried_over = carried.len();
        to_notify.extend(carried);

        if !to_notify.is_empty() {
            report.dispatch = self.dispatcher.dispatch(to_notify, self.clock.now()).await;
        }
        Ok(report)
    }
}
