//! Ports - 抽象化レイヤー（sweep が話しかける外部システム）
//!
//! Each trait hides one external system: the relational lead store, the
//! notification table, the live-client push channel, the clock and the id
//! allocator. In-memory implementations live in `impls`.

pub mod clock;
pub mod delivery;
pub mod id_generator;
pub mod lead_store;
pub mod notification_store;

pub use self::clock::{Clock, FixedClock, SystemClock, TokioClock};
pub use self::delivery::DeliveryChannel;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::lead_store::{LeadFilter, LeadOrder, LeadStore};
pub use self::notification_store::NotificationStore;
