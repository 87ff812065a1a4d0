//! State transition applier - 期限切れ lead を `Expired` に遷移させる
//!
//! # 学習ポイント
//! - 手元のバッチは読み取り時点のスナップショットにすぎない
//! - 最終判定はストア側 (`LeadStore::expire_eligible`) で保存済みの行に対して行う

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::{Lead, LeadId, StoreError};
use crate::ports::LeadStore;

pub struct TransitionApplier {
    store: Arc<dyn LeadStore>,
}

impl TransitionApplier {
    pub fn new(store: Arc<dyn LeadStore>) -> Self {
        Self { store }
    }

    /// Expire every lead of `batch` that is still eligible at `now`.
    ///
    /// # Flow
    /// 1. Drop leads the snapshot already shows as ineligible.
    /// 2. Hand the rest to `expire_eligible`, which re-checks each stored row
    ///    in the same transaction as the write: a lead completed or canceled
    ///    since the page was read stays as it is.
    /// 3. Return exactly the subset the store changed.
    ///
    /// Leads already in a terminal state are skipped, so re-applying a batch
    /// is a no-op and issues no write.
    pub async fn apply_batch(
        &self,
        batch: Vec<Lead>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Lead>, StoreError> {
        let ids: Vec<LeadId> = batch
            .iter()
            .filter(|lead| lead.is_expirable(now))
            .map(|lead| lead.id)
            .collect();

        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.store.expire_eligible(&ids, now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LeadStatus, UserId};
    use crate::impls::InMemoryLeadStore;
    use crate::sweep::CandidateScanner;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap()
    }

    fn overdue() -> Lead {
        Lead::new(
            LeadId::generate(),
            Some(UserId::generate()),
            now() - Duration::hours(1),
            now() - Duration::days(2),
        )
    }

    #[tokio::test]
    async fn revalidation_excludes_concurrently_completed_leads() {
        let store = Arc::new(InMemoryLeadStore::new());
        let still_open = overdue();
        let completed_meanwhile = overdue().with_status(LeadStatus::Completed);
        store
            .extend([still_open.clone(), completed_meanwhile.clone()])
            .await;

        let applier = TransitionApplier::new(store.clone());
        let applied = applier
            .apply_batch(vec![still_open.clone(), completed_meanwhile.clone()], now())
            .await
            .unwrap();

        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].id, still_open.id);

        let stored = store.get(still_open.id).await.unwrap();
        assert_eq!(stored.status, LeadStatus::Expired);
        assert_eq!(stored.updated_at, now());
        assert!(stored.notice_pending);
        assert_eq!(
            store.get(completed_meanwhile.id).await.unwrap().status,
            LeadStatus::Completed
        );
    }

    #[tokio::test]
    async fn lead_closed_after_the_scan_is_left_alone() {
        let store = Arc::new(InMemoryLeadStore::new());
        let closed_later = overdue();
        let untouched = overdue();
        store.extend([closed_later.clone(), untouched.clone()]).await;

        let batch = CandidateScanner::new(store.clone(), 10)
            .batch(0, now())
            .await
            .unwrap();
        assert_eq!(batch.len(), 2);

        // The CRUD side completes one lead between the read and the write.
        let mut completed = closed_later.clone().with_status(LeadStatus::Completed);
        completed.updated_at = now() - Duration::minutes(1);
        store.insert(completed.clone()).await;

        let applied = TransitionApplier::new(store.clone())
            .apply_batch(batch, now())
            .await
            .unwrap();

        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].id, untouched.id);
        let stored = store.get(closed_later.id).await.unwrap();
        assert_eq!(stored.status, LeadStatus::Completed);
        assert_eq!(stored.updated_at, completed.updated_at);
        assert!(!stored.notice_pending);
    }

    #[tokio::test]
    async fn reapplying_is_a_no_op() {
        let store = Arc::new(InMemoryLeadStore::new());
        let lead = overdue();
        store.insert(lead.clone()).await;
        let applier = TransitionApplier::new(store.clone());

        let first = applier.apply_batch(vec![lead], now()).await.unwrap();
        assert_eq!(first.len(), 1);

        // Write faults would surface if a second write were attempted.
        store
            .fail_next_write(StoreError::Conflict("unexpected write".into()))
            .await;
        let second = applier.apply_batch(first, now()).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn write_failure_propagates() {
        let store = Arc::new(InMemoryLeadStore::new());
        let lead = overdue();
        store.insert(lead.clone()).await;
        store
            .fail_next_write(StoreError::Conflict("serialization failure".into()))
            .await;

        let applier = TransitionApplier::new(store.clone());
        let err = applier.apply_batch(vec![lead.clone()], now()).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(
            store.get(lead.id).await.unwrap().status,
            LeadStatus::Registered
        );
    }
}
