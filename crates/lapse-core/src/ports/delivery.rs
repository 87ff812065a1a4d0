//! DeliveryChannel port - 接続中クライアントへの best-effort push
//!
//! A push never blocks the sweep and its failure never fails a dispatch; the
//! notification is already persisted and the client will see it on its next
//! poll.

use crate::domain::{DeliveryError, Notification};

pub trait DeliveryChannel: Send + Sync {
    /// Route `notification` to its recipient's live connections.
    fn push(&self, notification: &Notification) -> Result<(), DeliveryError>;
}
