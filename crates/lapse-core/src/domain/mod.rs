//! Domain - ドメインモデル（ids, leads, notifications, outcomes, errors）

pub mod errors;
pub mod ids;
pub mod lead;
pub mod notification;
pub mod outcome;

pub use self::errors::{DeliveryError, ErrorKind, StoreError, SweepError};
pub use self::ids::{Id, IdMarker, LeadId, NotificationId, UserId};
pub use self::lead::{Lead, LeadStatus};
pub use self::notification::{Notification, NotificationCategory, NotificationPriority, Recipient};
pub use self::outcome::{DispatchReport, RunOutcome, RunResultView, RunSummary, SweepReport};
