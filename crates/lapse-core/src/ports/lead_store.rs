//! LeadStore port - リレーショナルなレコードストア
//!
//! ストアが唯一の正。sweep はバッチを一時的に読むだけで、書き込みは
//! 常に保存済みの行に対する条件付き更新として行う。
//!
//! # 学習ポイント
//! - 読み取りと書き込みの間に CRUD 側が lead を完了/キャンセルしうる
//! - `expire_eligible` はストア側で述語を再評価し、sweep 所有の列だけを書く

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Lead, LeadId, StoreError};

/// Predicate over leads. A closed set of shapes, no dynamic filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadFilter {
    /// Active, `expires_at < now`, status not terminal.
    Expirable { now: DateTime<Utc> },

    /// Expired by a sweep but the owner has not been told yet.
    NoticePending,
}

impl LeadFilter {
    pub fn expirable(now: DateTime<Utc>) -> Self {
        LeadFilter::Expirable { now }
    }

    pub fn notice_pending() -> Self {
        LeadFilter::NoticePending
    }

    /// Reference evaluation. SQL-backed stores translate the same predicate
    /// into a WHERE clause.
    pub fn matches(&self, lead: &Lead) -> bool {
        match self {
            LeadFilter::Expirable { now } => lead.is_expirable(*now),
            LeadFilter::NoticePending => lead.notice_pending,
        }
    }
}

/// Page ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeadOrder {
    /// `expires_at` ascending, then `created_at`, then id.
    #[default]
    OldestDeadlineFirst,
}

#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn count_eligible(&self, filter: &LeadFilter) -> Result<usize, StoreError>;

    async fn read_page(
        &self,
        filter: &LeadFilter,
        order: LeadOrder,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Lead>, StoreError>;

    /// Expire the listed leads that are still eligible at `now`, judged
    /// against the stored rows, in one transaction.
    ///
    /// Only `status`, `updated_at` and `notice_pending` are written; every
    /// other column keeps whatever a concurrent writer left there. Returns
    /// the leads that actually changed, as stored after the update.
    async fn expire_eligible(
        &self,
        ids: &[LeadId],
        now: DateTime<Utc>,
    ) -> Result<Vec<Lead>, StoreError>;

    /// Mark the owner notice as delivered for these leads.
    async fn clear_notice_pending(&self, ids: &[LeadId]) -> Result<(), StoreError>;

    /// Undo `clear_notice_pending` after the notice could not be persisted.
    async fn mark_notice_pending(&self, ids: &[LeadId]) -> Result<(), StoreError>;
}
