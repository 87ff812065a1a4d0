//! Domain identifiers - 型安全な ID
//!
//! # 学習ポイント
//! - phantom marker で LeadId / UserId / NotificationId の取り違えをコンパイル時に防ぐ
//!
//! Every identifier is a ULID wrapped in `Id<T>`, where `T` is a zero-sized
//! marker. Leads, users and notifications therefore share one implementation
//! but cannot be mixed up at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Marker trait for each ID kind.
///
/// Provides the prefix used by `Display` ("lead-", "user-", "ntf-").
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic ULID-backed identifier.
#[repr(transparent)]
#[derive(Serialize, Deserialize)]
#[serde(transparent, bound = "")]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    /// Fresh identifier from the system clock and thread RNG.
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

// Manual impls: derives would put bounds on `T`, which is only a marker.
impl<T: IdMarker> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: IdMarker> Copy for Id<T> {}

impl<T: IdMarker> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ulid == other.ulid
    }
}

impl<T: IdMarker> Eq for Id<T> {}

impl<T: IdMarker> std::hash::Hash for Id<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.ulid.hash(state);
    }
}

impl<T: IdMarker> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: IdMarker> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.ulid.cmp(&other.ulid)
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Lead marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Lead {}

impl IdMarker for Lead {
    fn prefix() -> &'static str {
        "lead-"
    }
}

/// User (lead owner) marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum User {}

impl IdMarker for User {
    fn prefix() -> &'static str {
        "user-"
    }
}

/// Notification marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Notice {}

impl IdMarker for Notice {
    fn prefix() -> &'static str {
        "ntf-"
    }
}

/// Identifier of a lead record.
pub type LeadId = Id<Lead>;

/// Identifier of the user owning leads and receiving notifications.
pub type UserId = Id<User>;

/// Identifier of a persisted notification.
pub type NotificationId = Id<Notice>;
