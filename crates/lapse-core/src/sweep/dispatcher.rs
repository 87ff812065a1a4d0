//! Notification dispatcher - 期限切れ lead をオーナーに通知する（洪水は起こさない）
//!
//! # Flow
//! 1. Sort leads oldest deadline first (tie: oldest record).
//! 2. Group by owner; owner-less leads are set aside.
//! 3. Per owner, independently:
//!    - cooldown: an expiry notification within the window defers the group
//!    - cap: at most `per_owner_cap` leads go into one grouped notification,
//!      the rest are deferred
//! 4. Deferred leads are summarized in one system notification.
//! 5. Every notification is persisted, then pushed best-effort.
//!
//! A failure for one owner is logged and does not stop the others.
//!
//! # 学習ポイント
//! - オーナー通知は at-most-once: `notice_pending` を先に落とし、保存に
//!   失敗したら戻す。保存済み通知が再送されることはない

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::domain::{
    DispatchReport, Lead, LeadId, Notification, NotificationCategory, NotificationPriority,
    Recipient, StoreError, UserId,
};
use crate::ports::{DeliveryChannel, IdGenerator, LeadStore, NotificationStore};

/// Rate-limit knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPolicy {
    /// Maximum leads referenced by one owner notification.
    pub per_owner_cap: usize,

    /// Minimum interval between expiry notifications to the same owner.
    pub cooldown: Duration,

    /// Lifetime of a notification before the UI may drop it.
    pub notification_ttl: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeferReason {
    Cooldown,
    OverCap,
}

#[derive(Debug)]
struct Deferral {
    lead_id: LeadId,
    owner: UserId,
    reason: DeferReason,
}

/// What happened to one owner's group.
struct OwnerOutcome {
    processed: Vec<LeadId>,
    deferred: Vec<Deferral>,
}

pub struct NotificationDispatcher {
    leads: Arc<dyn LeadStore>,
    notifications: Arc<dyn NotificationStore>,
    delivery: Arc<dyn DeliveryChannel>,
    ids: Arc<dyn IdGenerator>,
    policy: DispatchPolicy,
}

impl NotificationDispatcher {
    pub fn new(
        leads: Arc<dyn LeadStore>,
        notifications: Arc<dyn NotificationStore>,
        delivery: Arc<dyn DeliveryChannel>,
        ids: Arc<dyn IdGenerator>,
        policy: DispatchPolicy,
    ) -> Self {
        Self {
            leads,
            notifications,
            delivery,
            ids,
            policy,
        }
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    /// Notify owners about `expired` leads. Never fails as a whole; per-owner
    /// failures are counted in the report.
    pub async fn dispatch(&self, mut expired: Vec<Lead>, now: DateTime<Utc>) -> DispatchReport {
        expired.sort_by_key(Lead::priority_key);
        expired.dedup_by_key(|lead| lead.id);

        let mut report = DispatchReport::default();
        let mut order: Vec<UserId> = Vec::new();
        let mut groups: HashMap<UserId, Vec<Lead>> = HashMap::new();
        for lead in expired {
            match lead.owner {
                Some(owner) => groups
                    .entry(owner)
                    .or_insert_with(|| {
                        order.push(owner);
                        Vec::new()
                    })
                    .push(lead),
                None => report.unowned.push(lead.id),
            }
        }

        if !report.unowned.is_empty() {
            debug!(count = report.unowned.len(), "expired leads without owner");
            if let Err(err) = self.leads.clear_notice_pending(&report.unowned).await {
                warn!(error = %err, "failed to clear notice flag of owner-less leads");
            }
        }

        let mut deferrals = Vec::new();
        for owner in order {
            let Some(group) = groups.remove(&owner) else {
                continue;
            };
            let group_size = group.len();
            match self.dispatch_owner(owner, group, now).await {
                Ok(outcome) => {
                    if !outcome.processed.is_empty() {
                        report.notifications += 1;
                    }
                    report.processed.extend(outcome.processed);
                    deferrals.extend(outcome.deferred);
                }
                Err(err) => {
                    warn!(owner = %owner, leads = group_size, error = %err, "owner dispatch failed");
                    report.failed_owners += 1;
                }
            }
        }

        report.deferred = deferrals.iter().map(|d| d.lead_id).collect();
        if !deferrals.is_empty() {
            match self.publish_deferred_summary(&deferrals, now).await {
                Ok(()) => report.notifications += 1,
                Err(err) => warn!(error = %err, "failed to persist deferred-work notification"),
            }
        }

        info!(
            processed = report.processed.len(),
            deferred = report.deferred.len(),
            unowned = report.unowned.len(),
            notifications = report.notifications,
            failed_owners = report.failed_owners,
            "dispatch finished"
        );
        report
    }

    async fn dispatch_owner(
        &self,
        owner: UserId,
        group: Vec<Lead>,
        now: DateTime<Utc>,
    ) -> Result<OwnerOutcome, StoreError> {
        if self.in_cooldown(owner, now).await? {
            debug!(owner = %owner, leads = group.len(), "owner in cooldown, deferring group");
            return Ok(OwnerOutcome {
                processed: Vec::new(),
                deferred: defer_all(owner, &group, DeferReason::Cooldown),
            });
        }

        let cap = self.policy.per_owner_cap.max(1);
        let (sent, held) = group.split_at(group.len().min(cap));
        let notification = self.owner_notification(owner, sent, held.len(), now);

        let processed: Vec<LeadId> = sent.iter().map(|lead| lead.id).collect();
        self.leads.clear_notice_pending(&processed).await?;
        if let Err(err) = self.notifications.insert(notification.clone()).await {
            if let Err(restore) = self.leads.mark_notice_pending(&processed).await {
                warn!(
                    owner = %owner,
                    leads = processed.len(),
                    error = %restore,
                    "failed to restore notice flag, these leads will not be notified"
                );
            }
            return Err(err);
        }
        self.push(&notification);

        Ok(OwnerOutcome {
            processed,
            deferred: defer_all(owner, held, DeferReason::OverCap),
        })
    }

    async fn in_cooldown(&self, owner: UserId, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let window = chrono::Duration::from_std(self.policy.cooldown).unwrap_or(chrono::Duration::MAX);
        let since = now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);
        for category in NotificationCategory::OWNER_EXPIRY {
            if self
                .notifications
                .exists_recent_for_user(owner, category, since)
                .await?
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn owner_notification(
        &self,
        owner: UserId,
        sent: &[Lead],
        withheld: usize,
        now: DateTime<Utc>,
    ) -> Notification {
        let lead_ids: Vec<LeadId> = sent.iter().map(|lead| lead.id).collect();
        let (category, title, message) = match sent {
            [lead] => (
                NotificationCategory::LeadExpired,
                "Lead expired".to_string(),
                format!("Lead {} passed its deadline without being closed.", lead.id),
            ),
            _ => (
                NotificationCategory::LeadsExpired,
                format!("{} leads expired", sent.len()),
                format!("{} of your leads passed their deadline without being closed.", sent.len()),
            ),
        };
        let message = if withheld > 0 {
            format!("{message} {withheld} more will be reported later.")
        } else {
            message
        };

        Notification {
            id: self.ids.generate_notification_id(),
            recipient: Recipient::User(owner),
            category,
            priority: NotificationPriority::High,
            title,
            message,
            payload: json!({
                "lead_ids": lead_ids,
                "count": sent.len(),
                "withheld": withheld,
                "oldest_expired_at": sent.first().map(|lead| lead.expires_at),
                "newest_expired_at": sent.last().map(|lead| lead.expires_at),
            }),
            read: false,
            created_at: now,
            sent_at: Some(now),
            expires_at: self.expiry_from(now),
        }
    }

    async fn publish_deferred_summary(
        &self,
        deferrals: &[Deferral],
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let lead_ids: Vec<LeadId> = deferrals.iter().map(|d| d.lead_id).collect();
        let mut owners: Vec<UserId> = deferrals.iter().map(|d| d.owner).collect();
        owners.sort();
        owners.dedup();
        let by_reason = |reason: DeferReason| deferrals.iter().filter(|d| d.reason == reason).count();

        let notification = Notification {
            id: self.ids.generate_notification_id(),
            recipient: Recipient::System,
            category: NotificationCategory::DeferredWork,
            priority: NotificationPriority::Low,
            title: format!("{} expiry notices deferred", lead_ids.len()),
            message: format!(
                "Rate limiting withheld expiry notices for {} leads across {} owners; they will be retried in a later sweep.",
                lead_ids.len(),
                owners.len()
            ),
            payload: json!({
                "lead_ids": lead_ids,
                "count": lead_ids.len(),
                "owners": owners.len(),
                "reasons": {
                    "cooldown": by_reason(DeferReason::Cooldown),
                    "over_cap": by_reason(DeferReason::OverCap),
                },
            }),
            read: false,
            created_at: now,
            sent_at: Some(now),
            expires_at: self.expiry_from(now),
        };

        self.notifications.insert(notification.clone()).await?;
        self.push(&notification);
        Ok(())
    }

    fn push(&self, notification: &Notification) {
        if let Err(err) = self.delivery.push(notification) {
            warn!(
                recipient = %notification.recipient,
                notification = %notification.id,
                error = %err,
                "live push failed, notification stays available for polling"
            );
        }
    }

    fn expiry_from(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        chrono::Duration::from_std(self.policy.notification_ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
    }
}

fn defer_all(owner: UserId, leads: &[Lead], reason: DeferReason) -> Vec<Deferral> {
    leads
        .iter()
        .map(|lead| Deferral {
            lead_id: lead.id,
            owner,
            reason,
        })
        .collect()
}
