//! InMemoryNotificationStore - 開発/テスト用の `NotificationStore` 実装

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    Notification, NotificationCategory, NotificationId, Recipient, StoreError, UserId,
};
use crate::ports::NotificationStore;

#[derive(Default)]
pub struct InMemoryNotificationStore {
    notifications: Mutex<Vec<Notification>>,
    /// Owners whose inserts are rejected (fault injection).
    rejecting: Mutex<HashSet<UserId>>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a notification directly, bypassing the dispatcher.
    pub async fn seed(&self, notification: Notification) {
        self.notifications.lock().await.push(notification);
    }

    pub async fn all(&self) -> Vec<Notification> {
        self.notifications.lock().await.clone()
    }

    pub async fn count_for(&self, recipient: &Recipient) -> usize {
        self.notifications
            .lock()
            .await
            .iter()
            .filter(|n| &n.recipient == recipient)
            .count()
    }

    /// The UI dismissed (deleted) a notification.
    pub async fn dismiss(&self, id: NotificationId) -> bool {
        let mut notifications = self.notifications.lock().await;
        let before = notifications.len();
        notifications.retain(|n| n.id != id);
        notifications.len() != before
    }

    /// Make every insert addressed to `user_id` fail.
    pub async fn reject_inserts_for(&self, user_id: UserId) {
        self.rejecting.lock().await.insert(user_id);
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn insert(&self, notification: Notification) -> Result<(), StoreError> {
        if let Some(user_id) = notification.user_id()
            && self.rejecting.lock().await.contains(&user_id)
        {
            return Err(StoreError::Unavailable(format!(
                "insert rejected for {user_id}"
            )));
        }
        self.notifications.lock().await.push(notification);
        Ok(())
    }

    async fn exists_recent_for_user(
        &self,
        user_id: UserId,
        category: NotificationCategory,
        since: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let recipient = Recipient::User(user_id);
        Ok(self.notifications.lock().await.iter().any(|n| {
            n.recipient == recipient && n.category == category && n.created_at >= since
        }))
    }

    async fn list_for_recipient(
        &self,
        recipient: &Recipient,
    ) -> Result<Vec<Notification>, StoreError> {
        let mut found: Vec<Notification> = self
            .notifications
            .lock()
            .await
            .iter()
            .filter(|n| &n.recipient == recipient)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }
}
