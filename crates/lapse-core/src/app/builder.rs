//! SweeperBuilder - 構築とワイヤリング、起動後のライフサイクル
//!
//! # 学習ポイント
//! - Builder パターン（ポートは trait object で差し替え可能）
//! - 起動時検証（Fail-fast 設計）: 不正な schedule や未設定のポートは
//!   最初の tick ではなく `build()` で失敗する
//!
//! `Sweeper::start` は scheduler タスクを spawn し `SweeperHandle` を返す:
//! - `request_shutdown()`: ループと実行中の sweep に停止を通知
//! - `shutdown_and_join()`: 通知してループの終了を待つ
//! - `run_now()`: 同じ single-flight executor で即時 sweep（backoff にも計上）
//! - `health()`: scheduler 状態の probe
//!
//! ```ignore
//! let handle = Sweeper::builder(config)
//!     .lead_store(leads)
//!     .notification_store(notifications)
//!     .delivery(registry)
//!     .build()?
//!     .start();
//! // ...
//! handle.shutdown_and_join().await?;
//! ```

use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, info_span};

use super::config::{ConfigError, SweepConfig};
use super::cron::CronSchedule;
use super::scheduler::{Scheduler, record_run};
use super::status::{HealthProbe, StatusPublisher};
use crate::domain::{RunOutcome, SweepError};
use crate::ports::{
    Clock, DeliveryChannel, IdGenerator, LeadStore, NotificationStore, SystemClock, UlidGenerator,
};
use crate::sweep::{
    BackoffController, CandidateScanner, NotificationDispatcher, SweepExecutor, TransitionApplier,
};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no {0} configured; set it on the builder before build()")]
    Missing(&'static str),
}

pub struct SweeperBuilder {
    config: SweepConfig,
    leads: Option<Arc<dyn LeadStore>>,
    notifications: Option<Arc<dyn NotificationStore>>,
    delivery: Option<Arc<dyn DeliveryChannel>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

impl SweeperBuilder {
    pub fn new(config: SweepConfig) -> Self {
        Self {
            config,
            leads: None,
            notifications: None,
            delivery: None,
            clock: None,
            ids: None,
        }
    }

    pub fn lead_store(mut self, store: Arc<dyn LeadStore>) -> Self {
        self.leads = Some(store);
        self
    }

    pub fn notification_store(mut self, store: Arc<dyn NotificationStore>) -> Self {
        self.notifications = Some(store);
        self
    }

    pub fn delivery(mut self, channel: Arc<dyn DeliveryChannel>) -> Self {
        self.delivery = Some(channel);
        self
    }

    /// Defaults to `SystemClock`.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Defaults to a `UlidGenerator` driven by the configured clock.
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn build(self) -> Result<Sweeper, BuildError> {
        self.config.validate()?;
        let schedule = self.config.cron_schedule().map_err(ConfigError::from)?;

        let leads = self.leads.ok_or(BuildError::Missing("lead_store"))?;
        let notifications = self
            .notifications
            .ok_or(BuildError::Missing("notification_store"))?;
        let delivery = self.delivery.ok_or(BuildError::Missing("delivery"))?;
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids: Arc<dyn IdGenerator> = match self.ids {
            Some(ids) => ids,
            None => Arc::new(UlidGenerator::new(clock.clone())),
        };

        let dispatcher = NotificationDispatcher::new(
            leads.clone(),
            notifications,
            delivery,
            ids,
            self.config.dispatch_policy(),
        );
        let executor = SweepExecutor::new(
            CandidateScanner::new(leads.clone(), self.config.batch_size),
            TransitionApplier::new(leads),
            dispatcher,
            clock.clone(),
            self.config.executor_settings(),
        );

        Ok(Sweeper {
            config: self.config,
            schedule,
            executor: Arc::new(executor),
            clock,
        })
    }
}

/// 構築済みの sweep（まだスケジュールされていない）
pub struct Sweeper {
    config: SweepConfig,
    schedule: CronSchedule,
    executor: Arc<SweepExecutor>,
    clock: Arc<dyn Clock>,
}

impl Sweeper {
    pub fn builder(config: SweepConfig) -> SweeperBuilder {
        SweeperBuilder::new(config)
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    pub fn schedule(&self) -> &CronSchedule {
        &self.schedule
    }

    /// One sweep, no scheduler. Used by `--once` style entry points.
    pub async fn run_once(&self) -> RunOutcome {
        self.executor.run_once().await
    }

    /// Spawn the scheduler loop. Must be called inside a tokio runtime.
    pub fn start(self) -> SweeperHandle {
        let scheduler = Scheduler::new(
            self.executor.clone(),
            self.schedule,
            BackoffController::new(self.config.backoff_policy()),
            self.clock.clone(),
        )
        .enabled(self.config.enabled)
        .fail_stop_on_unexpected(self.config.fail_stop_on_unexpected);

        let probe = scheduler.probe();
        let status = scheduler.publisher();
        let backoff = scheduler.backoff();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(
            scheduler
                .run(shutdown_rx)
                .instrument(info_span!("scheduler")),
        );

        SweeperHandle {
            shutdown_tx,
            join,
            executor: self.executor,
            clock: self.clock,
            backoff,
            status,
            probe,
        }
    }
}

/// Handle to a running scheduler.
/// - `shutdown_tx` を drop すると scheduler ループも止まる
/// - `shutdown_and_join()` でループの終了と fail-stop エラーを受け取れる
pub struct SweeperHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<Result<(), SweepError>>,
    executor: Arc<SweepExecutor>,
    clock: Arc<dyn Clock>,
    backoff: Arc<Mutex<BackoffController>>,
    status: Arc<StatusPublisher>,
    probe: HealthProbe,
}

impl SweeperHandle {
    /// Ask the scheduler to stop. An in-flight sweep is cancelled.
    pub fn request_shutdown(&self) {
        // ignore send error: the loop may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop and wait. Surfaces the fail-stop error, if the loop ended on one.
    pub async fn shutdown_and_join(self) -> Result<(), SweepError> {
        self.request_shutdown();
        match self.join.await {
            Ok(result) => result,
            Err(err) => Err(SweepError::Unexpected(format!("scheduler task failed: {err}"))),
        }
    }

    /// Run a sweep now, outside the cron cadence. Contends for the same lock
    /// as scheduled sweeps, so it returns `Skipped` if one is in flight.
    ///
    /// The outcome counts toward backoff exactly like a scheduled run.
    pub async fn run_now(&self) -> RunOutcome {
        let started_at = self.clock.now();
        let outcome = self
            .executor
            .run_once_until_shutdown(&self.shutdown_tx.subscribe())
            .await;
        if !matches!(outcome, RunOutcome::Skipped) {
            record_run(
                &self.backoff,
                &self.status,
                started_at,
                self.clock.now(),
                &outcome,
            )
            .await;
        }
        outcome
    }

    pub fn health(&self) -> HealthProbe {
        self.probe.clone()
    }

    /// True once the scheduler loop has exited.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::status::SchedulerState;
    use crate::domain::{Lead, LeadId, LeadStatus, RunResultView, StoreError, UserId};
    use crate::impls::{ConnectionRegistry, InMemoryLeadStore, InMemoryNotificationStore};
    use crate::ports::FixedClock;
    use chrono::{DateTime, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, 9, 0, 0).unwrap()
    }

    fn builder(config: SweepConfig, leads: Arc<InMemoryLeadStore>) -> SweeperBuilder {
        Sweeper::builder(config)
            .lead_store(leads)
            .notification_store(Arc::new(InMemoryNotificationStore::new()))
            .delivery(Arc::new(ConnectionRegistry::new(8)))
            .clock(Arc::new(FixedClock::new(t0())))
    }

    #[test]
    fn missing_ports_fail_the_build() {
        let result = Sweeper::builder(SweepConfig::default())
            .notification_store(Arc::new(InMemoryNotificationStore::new()))
            .delivery(Arc::new(ConnectionRegistry::new(8)))
            .build();
        assert!(matches!(result, Err(BuildError::Missing("lead_store"))));
    }

    #[test]
    fn invalid_config_fails_the_build() {
        let config = SweepConfig {
            schedule: "61 * * * *".into(),
            ..SweepConfig::default()
        };
        let result = builder(config, Arc::new(InMemoryLeadStore::new())).build();
        assert!(matches!(result, Err(BuildError::Config(ConfigError::Schedule(_)))));
    }

    #[tokio::test]
    async fn run_now_sweeps_and_records_last_run() {
        let leads = Arc::new(InMemoryLeadStore::new());
        let lead = Lead::new(
            LeadId::generate(),
            Some(UserId::generate()),
            t0() - chrono::Duration::minutes(10),
            t0() - chrono::Duration::days(3),
        );
        leads.insert(lead.clone()).await;

        let handle = builder(SweepConfig::default(), leads.clone())
            .build()
            .unwrap()
            .start();
        let outcome = handle.run_now().await;

        assert_eq!(outcome.report().unwrap().expired, 1);
        assert_eq!(leads.get(lead.id).await.unwrap().status, LeadStatus::Expired);
        let status = handle.health().snapshot();
        assert!(matches!(
            status.last_run.map(|run| run.result),
            Some(RunResultView::Completed { .. })
        ));

        handle.shutdown_and_join().await.unwrap();
    }

    #[tokio::test]
    async fn manual_failures_count_toward_backoff() {
        let leads = Arc::new(InMemoryLeadStore::new());
        let handle = builder(SweepConfig::default(), leads.clone())
            .build()
            .unwrap()
            .start();

        leads
            .fail_next_read(StoreError::Unavailable("connection refused".into()))
            .await;
        let failed = handle.run_now().await;
        assert!(!failed.succeeded());
        assert_eq!(handle.health().snapshot().consecutive_failures, 1);

        let recovered = handle.run_now().await;
        assert!(recovered.succeeded());
        assert_eq!(handle.health().snapshot().consecutive_failures, 0);

        handle.shutdown_and_join().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let handle = builder(SweepConfig::default(), Arc::new(InMemoryLeadStore::new()))
            .build()
            .unwrap()
            .start();
        let probe = handle.health();

        handle.shutdown_and_join().await.unwrap();

        let status = probe.snapshot();
        assert_eq!(status.state, SchedulerState::Stopped);
        assert!(!status.registered);
    }

    #[tokio::test]
    async fn disabled_sweeper_reports_stopped() {
        let config = SweepConfig {
            enabled: false,
            ..SweepConfig::default()
        };
        let handle = builder(config, Arc::new(InMemoryLeadStore::new()))
            .build()
            .unwrap()
            .start();
        let mut probe = handle.health();

        let status = probe
            .wait_until(|status| status.state == SchedulerState::Stopped)
            .await
            .unwrap();
        assert!(!status.registered);
        handle.shutdown_and_join().await.unwrap();
    }
}
