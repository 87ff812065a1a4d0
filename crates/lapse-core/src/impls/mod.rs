//! Impls - ポートのプロセス内実装
//!
//! - **InMemoryLeadStore** / **InMemoryNotificationStore**: development and
//!   test stores
//! - **ConnectionRegistry**: per-recipient bounded push channels, the
//!   production `DeliveryChannel` for clients connected to this process
//!
//! SQL-backed stores live outside this crate and implement the same ports.

pub mod connection_registry;
pub mod inmem_leads;
pub mod inmem_notifications;

pub use self::connection_registry::ConnectionRegistry;
pub use self::inmem_leads::InMemoryLeadStore;
pub use self::inmem_notifications::InMemoryNotificationStore;
