//! Notification model - 通知レコードと宛先

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{LeadId, NotificationId, UserId};

/// Who a notification is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "user_id", rename_all = "snake_case")]
pub enum Recipient {
    User(UserId),
    /// Operators / system listeners, not tied to an owner.
    System,
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recipient::User(user_id) => user_id.fmt(f),
            Recipient::System => f.write_str("system"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    /// A single lead expired.
    LeadExpired,
    /// Several leads of one owner expired (grouped).
    LeadsExpired,
    /// System-level summary of notifications withheld by rate limiting.
    DeferredWork,
}

impl NotificationCategory {
    /// Categories subject to the per-owner cooldown.
    pub const OWNER_EXPIRY: [NotificationCategory; 2] = [
        NotificationCategory::LeadExpired,
        NotificationCategory::LeadsExpired,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NotificationCategory::LeadExpired => "lead_expired",
            NotificationCategory::LeadsExpired => "leads_expired",
            NotificationCategory::DeferredWork => "deferred_work",
        }
    }
}

impl fmt::Display for NotificationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    Normal,
    High,
}

/// A persisted notification, created only by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub recipient: Recipient,
    pub category: NotificationCategory,
    pub priority: NotificationPriority,
    pub title: String,
    pub message: String,

    /// Structured data: affected lead ids and counts.
    pub payload: serde_json::Value,

    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn user_id(&self) -> Option<UserId> {
        match self.recipient {
            Recipient::User(user_id) => Some(user_id),
            Recipient::System => None,
        }
    }

    /// Lead ids referenced by the payload (empty if none).
    pub fn lead_ids(&self) -> Vec<LeadId> {
        serde_json::from_value(self.payload["lead_ids"].clone()).unwrap_or_default()
    }

    /// Whether the notification is past its expiry at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}
