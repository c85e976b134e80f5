//! Persistence seam for seat locks.
//!
//! Every mutation of lock state goes through a [`LockStore`]. Implementations
//! own the atomicity of [`LockStore::insert_if_available`]: the conflict check
//! and the insert must be one step with respect to any other acquire touching
//! an overlapping `(trip_id, seat)` set.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{LockId, LockStatus, SeatLock};

pub use memory::MemoryLockStore;
pub use postgres::PgLockStore;

/// Aggregate counts for monitoring the sweep backlog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockCounts {
    pub active_holds: i64,
    pub confirmed: i64,
    pub expired_unswept: i64,
}

#[async_trait]
pub trait LockStore: Send + Sync {
    /// Persists `lock` unless any of its seats is covered by a lock that is
    /// active at `now`. Fails with `SeatsUnavailable` and writes nothing on
    /// conflict.
    async fn insert_if_available(&self, lock: &SeatLock, now: DateTime<Utc>) -> Result<()>;

    async fn get(&self, lock_id: LockId) -> Result<Option<SeatLock>>;

    /// `HELD -> CONFIRMED`. A hold already past `expires_at` is still
    /// confirmed unless another lock active at `now` covers one of its seats,
    /// in which case this fails with `SeatsUnavailable` and changes nothing.
    /// The check runs in the same critical section as
    /// [`LockStore::insert_if_available`].
    async fn confirm_held(
        &self,
        lock_id: LockId,
        booking_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Marks the lock `RELEASED` and returns the status it had before.
    /// Releasing a released lock leaves it untouched.
    async fn release(&self, lock_id: LockId, now: DateTime<Utc>) -> Result<LockStatus>;

    /// Releases the lock only if it is still `HELD` and expired at `now`.
    /// Returns whether a row changed.
    async fn release_if_expired(&self, lock_id: LockId, now: DateTime<Utc>) -> Result<bool>;

    async fn active_for_trip(&self, trip_id: &str, now: DateTime<Utc>) -> Result<Vec<SeatLock>>;

    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<SeatLock>>;

    async fn counts(&self, now: DateTime<Utc>) -> Result<LockCounts>;
}

/// Seats of `requested` covered by any lock in `existing` that is active at
/// `now`, in request order.
pub(crate) fn conflicting_seats<'a>(
    requested: &[String],
    existing: impl IntoIterator<Item = &'a SeatLock> + Clone,
    now: DateTime<Utc>,
) -> Vec<String> {
    requested
        .iter()
        .filter(|seat| {
            existing
                .clone()
                .into_iter()
                .any(|lock| lock.is_active(now) && lock.covers(seat))
        })
        .cloned()
        .collect()
}
