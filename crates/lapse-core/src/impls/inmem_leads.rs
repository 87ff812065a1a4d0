//! InMemoryLeadStore - 開発/テスト用の `LeadStore` 実装
//!
//! Holds leads in a `HashMap` behind a tokio `Mutex`. Supports one-shot
//! fault injection and an artificial per-call latency so failure and
//! contention paths can be exercised without a database.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{Lead, LeadId, StoreError};
use crate::ports::{LeadFilter, LeadOrder, LeadStore};

#[derive(Default)]
struct Faults {
    next_read: Option<StoreError>,
    next_write: Option<StoreError>,
}

pub struct InMemoryLeadStore {
    leads: Mutex<HashMap<LeadId, Lead>>,
    faults: Mutex<Faults>,
    latency: Duration,
}

impl InMemoryLeadStore {
    pub fn new() -> Self {
        Self {
            leads: Mutex::new(HashMap::new()),
            faults: Mutex::new(Faults::default()),
            latency: Duration::ZERO,
        }
    }

    /// Every store call sleeps for `latency` before touching data.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub async fn insert(&self, lead: Lead) {
        self.leads.lock().await.insert(lead.id, lead);
    }

    pub async fn extend(&self, leads: impl IntoIterator<Item = Lead>) {
        let mut map = self.leads.lock().await;
        for lead in leads {
            map.insert(lead.id, lead);
        }
    }

    pub async fn get(&self, id: LeadId) -> Option<Lead> {
        self.leads.lock().await.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.leads.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.leads.lock().await.is_empty()
    }

    /// The next `count_eligible` / `read_page` call fails with `err`.
    pub async fn fail_next_read(&self, err: StoreError) {
        self.faults.lock().await.next_read = Some(err);
    }

    /// The next write (`expire_eligible`, `clear_notice_pending`,
    /// `mark_notice_pending`) fails with `err`.
    pub async fn fail_next_write(&self, err: StoreError) {
        self.faults.lock().await.next_write = Some(err);
    }

    async fn before_read(&self) -> Result<(), StoreError> {
        self.simulate_latency().await;
        match self.faults.lock().await.next_read.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn before_write(&self) -> Result<(), StoreError> {
        self.simulate_latency().await;
        match self.faults.lock().await.next_write.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn set_notice_pending(&self, ids: &[LeadId], pending: bool) -> Result<(), StoreError> {
        self.before_write().await?;
        let mut leads = self.leads.lock().await;
        for id in ids {
            if let Some(lead) = leads.get_mut(id) {
                lead.notice_pending = pending;
            }
        }
        Ok(())
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

impl Default for InMemoryLeadStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LeadStore for InMemoryLeadStore {
    async fn count_eligible(&self, filter: &LeadFilter) -> Result<usize, StoreError> {
        self.before_read().await?;
        let leads = self.leads.lock().await;
        Ok(leads.values().filter(|lead| filter.matches(lead)).count())
    }

    async fn read_page(
        &self,
        filter: &LeadFilter,
        order: LeadOrder,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Lead>, StoreError> {
        self.before_read().await?;
        let leads = self.leads.lock().await;
        let mut matching: Vec<&Lead> = leads.values().filter(|lead| filter.matches(lead)).collect();
        match order {
            LeadOrder::OldestDeadlineFirst => matching.sort_by_key(|lead| lead.priority_key()),
        }
        Ok(matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn expire_eligible(
        &self,
        ids: &[LeadId],
        now: DateTime<Utc>,
    ) -> Result<Vec<Lead>, StoreError> {
        self.before_write().await?;
        // The map lock is the transaction: no caller sees a half-applied batch.
        let mut leads = self.leads.lock().await;
        let mut changed = Vec::new();
        for id in ids {
            let Some(lead) = leads.get_mut(id) else {
                continue;
            };
            if lead.expire(now) {
                changed.push(lead.clone());
            }
        }
        Ok(changed)
    }

    async fn clear_notice_pending(&self, ids: &[LeadId]) -> Result<(), StoreError> {
        self.set_notice_pending(ids, false).await
    }

    async fn mark_notice_pending(&self, ids: &[LeadId]) -> Result<(), StoreError> {
        self.set_notice_pending(ids, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LeadStatus, UserId};
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap()
    }

    fn lead_expiring(minutes_ago: i64) -> Lead {
        Lead::new(
            LeadId::generate(),
            Some(UserId::generate()),
            now() - ChronoDuration::minutes(minutes_ago),
            now() - ChronoDuration::days(3),
        )
    }

    #[tokio::test]
    async fn count_and_page_apply_the_filter_and_order() {
        let store = InMemoryLeadStore::new();
        let newest = lead_expiring(5);
        let oldest = lead_expiring(50);
        let middle = lead_expiring(20);
        let completed = lead_expiring(90).with_status(LeadStatus::Completed);
        let future = lead_expiring(-30);
        store
            .extend([newest.clone(), oldest.clone(), middle.clone(), completed, future])
            .await;

        let filter = LeadFilter::expirable(now());
        assert_eq!(store.count_eligible(&filter).await.unwrap(), 3);

        let page = store
            .read_page(&filter, LeadOrder::OldestDeadlineFirst, 0, 2)
            .await
            .unwrap();
        let ids: Vec<LeadId> = page.iter().map(|lead| lead.id).collect();
        assert_eq!(ids, vec![oldest.id, middle.id]);

        let rest = store
            .read_page(&filter, LeadOrder::OldestDeadlineFirst, 2, 2)
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, newest.id);
    }

    #[tokio::test]
    async fn expire_eligible_judges_the_stored_row() {
        let store = InMemoryLeadStore::new();
        let open = lead_expiring(10);
        let canceled = lead_expiring(10).with_status(LeadStatus::Canceled);
        let reassigned_to = UserId::generate();
        let mut reassigned = lead_expiring(20);
        store
            .extend([open.clone(), canceled.clone(), reassigned.clone()])
            .await;
        // Another writer moves the lead to a new owner after the sweep read it.
        reassigned.owner = Some(reassigned_to);
        store.insert(reassigned.clone()).await;
        let gone = lead_expiring(30);

        let changed = store
            .expire_eligible(&[open.id, canceled.id, reassigned.id, gone.id], now())
            .await
            .unwrap();

        let ids: Vec<LeadId> = changed.iter().map(|lead| lead.id).collect();
        assert_eq!(ids, vec![open.id, reassigned.id]);
        assert_eq!(
            store.get(canceled.id).await.unwrap().status,
            LeadStatus::Canceled
        );
        let stored = store.get(reassigned.id).await.unwrap();
        assert_eq!(stored.status, LeadStatus::Expired);
        assert_eq!(stored.owner, Some(reassigned_to));
        assert!(stored.notice_pending);
        assert!(store.get(gone.id).await.is_none());
    }

    #[tokio::test]
    async fn failed_expire_writes_nothing() {
        let store = InMemoryLeadStore::new();
        let lead = lead_expiring(10);
        store.insert(lead.clone()).await;
        store
            .fail_next_write(StoreError::Conflict("serialization failure".into()))
            .await;

        assert!(store.expire_eligible(&[lead.id], now()).await.is_err());
        assert_eq!(
            store.get(lead.id).await.unwrap().status,
            LeadStatus::Registered
        );
    }

    #[tokio::test]
    async fn injected_faults_fire_once() {
        let store = InMemoryLeadStore::new();
        store
            .fail_next_read(StoreError::Unavailable("down".into()))
            .await;

        let filter = LeadFilter::expirable(now());
        assert!(store.count_eligible(&filter).await.is_err());
        assert_eq!(store.count_eligible(&filter).await.unwrap(), 0);
    }
}
