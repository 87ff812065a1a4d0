//! NotificationStore port - 通知の永続化（UI はここを polling する）

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Notification, NotificationCategory, Recipient, StoreError, UserId};

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert(&self, notification: Notification) -> Result<(), StoreError>;

    /// Was a notification of `category` created for `user_id` at or after
    /// `since`? Backs the per-owner cooldown.
    async fn exists_recent_for_user(
        &self,
        user_id: UserId,
        category: NotificationCategory,
        since: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Newest first.
    async fn list_for_recipient(
        &self,
        recipient: &Recipient,
    ) -> Result<Vec<Notification>, StoreError>;
}
