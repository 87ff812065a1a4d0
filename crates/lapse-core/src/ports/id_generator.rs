//! IdGenerator port - 通知 ID の採番

use crate::domain::ids::NotificationId;
use crate::ports::Clock;
use ulid::Ulid;

/// Allocates identifiers for records created by the sweep.
pub trait IdGenerator: Send + Sync {
    fn generate_notification_id(&self) -> NotificationId;
}

/// ULID generator whose timestamp part comes from a `Clock`, so ids stay
/// sortable by the same notion of time the sweep uses.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_notification_id(&self) -> NotificationId {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        NotificationId::from(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}
