//! App - 設定、スケジューリング、ライフサイクル
//!
//! - **SweepConfig**: TOML + `LAPSE_*` environment configuration
//! - **CronSchedule**: five-field cron parser
//! - **Scheduler**: cron wait, backoff wait, run, repeat
//! - **Sweeper / SweeperHandle**: wiring, start, shutdown, health probe

pub mod builder;
pub mod config;
pub mod cron;
pub mod scheduler;
pub mod status;

pub use self::builder::{BuildError, Sweeper, SweeperBuilder, SweeperHandle};
pub use self::config::{ConfigError, SweepConfig};
pub use self::cron::{CronError, CronSchedule};
pub use self::scheduler::Scheduler;
pub use self::status::{HealthProbe, SchedulerState, SweepStatus};
