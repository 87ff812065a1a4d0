//! Candidate scanner - 失効候補の件数取得とページング（期限の古い順）

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::{Lead, StoreError};
use crate::ports::{LeadFilter, LeadOrder, LeadStore};

pub struct CandidateScanner {
    store: Arc<dyn LeadStore>,
    batch_size: usize,
}

impl CandidateScanner {
    pub fn new(store: Arc<dyn LeadStore>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub async fn count_candidates(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        self.store.count_eligible(&LeadFilter::expirable(now)).await
    }

    /// Number of batches needed for `count` candidates.
    pub fn batches_for(&self, count: usize) -> usize {
        count.div_ceil(self.batch_size)
    }

    /// One batch of candidates starting at `offset`.
    ///
    /// Leads transitioned by earlier batches no longer match the filter, so
    /// callers advance `offset` only by the leads they left untouched.
    pub async fn batch(&self, offset: usize, now: DateTime<Utc>) -> Result<Vec<Lead>, StoreError> {
        self.store
            .read_page(
                &LeadFilter::expirable(now),
                LeadOrder::OldestDeadlineFirst,
                offset,
                self.batch_size,
            )
            .await
    }

    /// Leads expired in earlier sweeps whose owner notice is still pending.
    pub async fn pending_notices(&self, limit: usize) -> Result<Vec<Lead>, StoreError> {
        self.store
            .read_page(
                &LeadFilter::notice_pending(),
                LeadOrder::OldestDeadlineFirst,
                0,
                limit,
            )
            .await
    }
}
