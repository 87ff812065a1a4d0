//! Errors - エラー型と運用上の分類（ErrorKind）

use std::time::Duration;

use thiserror::Error;

/// Operational classification of a failed sweep.
///
/// - `Timeout`: the per-sweep deadline elapsed. Feeds backoff.
/// - `Store`: the record store refused or failed a call. Feeds backoff.
/// - `Cancelled`: outer shutdown interrupted the sweep. Not a failure of the
///   store, never counted toward backoff.
/// - `Unexpected`: anything unclassified. May stop the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Timeout,
    Store,
    Cancelled,
    Unexpected,
}

/// Errors raised by `LeadStore` / `NotificationStore` implementations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Concurrent write conflict (optimistic concurrency, serialization failure).
    #[error("write conflict: {0}")]
    Conflict(String),

    /// The store could not be reached or timed out.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store returned data that violates an invariant.
    #[error("store data corrupted: {0}")]
    Corrupted(String),
}

/// Errors raised by a `DeliveryChannel` push. Never propagated past the
/// dispatcher.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("no connected client for {0}")]
    NotConnected(String),

    #[error("delivery buffer full for {0}")]
    Backpressure(String),

    #[error("connection closed for {0}")]
    Closed(String),
}

/// Why a sweep failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SweepError {
    #[error("sweep exceeded its execution deadline of {0:?}")]
    Timeout(Duration),

    #[error("record store error: {0}")]
    Store(StoreError),

    #[error("sweep cancelled by shutdown")]
    Cancelled,

    #[error("unexpected sweep error: {0}")]
    Unexpected(String),
}

impl SweepError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SweepError::Timeout(_) => ErrorKind::Timeout,
            SweepError::Store(_) => ErrorKind::Store,
            SweepError::Cancelled => ErrorKind::Cancelled,
            SweepError::Unexpected(_) => ErrorKind::Unexpected,
        }
    }
}

impl From<StoreError> for SweepError {
    fn from(err: StoreError) -> Self {
        match err {
            // Corrupted data is not something a retry fixes.
            StoreError::Corrupted(message) => SweepError::Unexpected(message),
            other => SweepError::Store(other),
        }
    }
}
