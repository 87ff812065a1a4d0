//! Sweep - 失効パイプライン
//!
//! scanner → transition → dispatcher, orchestrated by the executor; the
//! backoff controller consumes the executor's outcomes.

pub mod backoff;
pub mod dispatcher;
pub mod executor;
pub mod scanner;
pub mod transition;

pub use self::backoff::{BackoffController, BackoffPolicy};
pub use self::dispatcher::{DispatchPolicy, NotificationDispatcher};
pub use self::executor::{ExecutorSettings, SweepExecutor};
pub use self::scanner::CandidateScanner;
pub use self::transition::TransitionApplier;
