//! Lead - sweep が扱う期限付きレコード

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{LeadId, UserId};

/// Lifecycle status of a lead.
///
/// State transitions owned by the sweep:
/// - Registered | Attended | InFollowUp -> Expired
///
/// Every other transition belongs to the CRUD flows outside this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    Registered,
    Attended,
    InFollowUp,
    Completed,
    Canceled,
    Expired,
}

impl LeadStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LeadStatus::Completed | LeadStatus::Canceled | LeadStatus::Expired
        )
    }
}

/// A prospective sales contact with a deadline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub owner: Option<UserId>,
    pub status: LeadStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub active: bool,

    /// Set when the sweep expires the lead, cleared once the owner has been
    /// told about it. Leads left pending were deferred by rate limiting.
    #[serde(default)]
    pub notice_pending: bool,
}

impl Lead {
    /// A fresh, active lead in `Registered` state.
    pub fn new(
        id: LeadId,
        owner: Option<UserId>,
        expires_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner,
            status: LeadStatus::Registered,
            expires_at,
            created_at,
            updated_at: created_at,
            active: true,
            notice_pending: false,
        }
    }

    pub fn with_status(mut self, status: LeadStatus) -> Self {
        self.status = status;
        self
    }

    /// Eligibility predicate shared by the scanner filter and the applier.
    pub fn is_expirable(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at < now && !self.status.is_terminal()
    }

    /// Flip to `Expired` if still eligible at `now`. Returns whether the lead
    /// changed.
    pub fn expire(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_expirable(now) {
            return false;
        }
        self.status = LeadStatus::Expired;
        self.updated_at = now;
        self.notice_pending = true;
        true
    }

    /// Dispatch priority key: oldest deadline first, then oldest record.
    pub fn priority_key(&self) -> (DateTime<Utc>, DateTime<Utc>, LeadId) {
        (self.expires_at, self.created_at, self.id)
    }
}
