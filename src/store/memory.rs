//! Process-local lock store.
//!
//! Each trip has its own mutex, so acquires on one trip never wait on
//! another. Suitable for tests and single-process embedding only: nothing here
//! is shared across processes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use super::{conflicting_seats, LockCounts, LockStore};
use crate::error::{LockError, Result};
use crate::models::{LockId, LockStatus, SeatLock};

type TripSlot = Arc<Mutex<Vec<SeatLock>>>;

#[derive(Debug, Default)]
pub struct MemoryLockStore {
    trips: RwLock<HashMap<String, TripSlot>>,
    index: RwLock<HashMap<LockId, String>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn trip_slot(&self, trip_id: &str) -> TripSlot {
        if let Some(slot) = self.trips.read().await.get(trip_id) {
            return slot.clone();
        }
        self.trips
            .write()
            .await
            .entry(trip_id.to_string())
            .or_default()
            .clone()
    }

    async fn slot_for_lock(&self, lock_id: LockId) -> Option<TripSlot> {
        let trip_id = self.index.read().await.get(&lock_id).cloned()?;
        Some(self.trip_slot(&trip_id).await)
    }

    async fn all_slots(&self) -> Vec<TripSlot> {
        self.trips.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn insert_if_available(&self, lock: &SeatLock, now: DateTime<Utc>) -> Result<()> {
        let slot = self.trip_slot(&lock.trip_id).await;
        let mut locks = slot.lock().await;

        let conflicts = conflicting_seats(&lock.seat_numbers, locks.iter(), now);
        if !conflicts.is_empty() {
            return Err(LockError::SeatsUnavailable {
                trip_id: lock.trip_id.clone(),
                seats: conflicts,
            });
        }

        locks.push(lock.clone());
        self.index.write().await.insert(lock.id, lock.trip_id.clone());
        Ok(())
    }

    async fn get(&self, lock_id: LockId) -> Result<Option<SeatLock>> {
        let Some(slot) = self.slot_for_lock(lock_id).await else {
            return Ok(None);
        };
        let locks = slot.lock().await;
        Ok(locks.iter().find(|l| l.id == lock_id).cloned())
    }

    async fn confirm_held(
        &self,
        lock_id: LockId,
        booking_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let slot = self
            .slot_for_lock(lock_id)
            .await
            .ok_or(LockError::LockNotFound(lock_id))?;
        let mut locks = slot.lock().await;
        let pos = locks
            .iter()
            .position(|l| l.id == lock_id)
            .ok_or(LockError::LockNotFound(lock_id))?;

        if locks[pos].status != LockStatus::Held {
            return Err(LockError::InvalidStateTransition {
                lock_id,
                from: locks[pos].status,
                to: LockStatus::Confirmed,
            });
        }

        // An expired hold may only be confirmed while nobody re-locked its seats.
        if !locks[pos].is_active(now) {
            let conflicts = conflicting_seats(
                &locks[pos].seat_numbers,
                locks.iter().filter(|l| l.id != lock_id),
                now,
            );
            if !conflicts.is_empty() {
                return Err(LockError::SeatsUnavailable {
                    trip_id: locks[pos].trip_id.clone(),
                    seats: conflicts,
                });
            }
        }

        let lock = &mut locks[pos];
        lock.status = LockStatus::Confirmed;
        if let Some(booking_id) = booking_id {
            lock.booking_id = Some(booking_id.to_string());
        }
        lock.updated_at = now;
        Ok(())
    }

    async fn release(&self, lock_id: LockId, now: DateTime<Utc>) -> Result<LockStatus> {
        let slot = self
            .slot_for_lock(lock_id)
            .await
            .ok_or(LockError::LockNotFound(lock_id))?;
        let mut locks = slot.lock().await;
        let lock = locks
            .iter_mut()
            .find(|l| l.id == lock_id)
            .ok_or(LockError::LockNotFound(lock_id))?;

        let previous = lock.status;
        if previous != LockStatus::Released {
            lock.status = LockStatus::Released;
            lock.updated_at = now;
        }
        Ok(previous)
    }

    async fn release_if_expired(&self, lock_id: LockId, now: DateTime<Utc>) -> Result<bool> {
        let Some(slot) = self.slot_for_lock(lock_id).await else {
            return Err(LockError::LockNotFound(lock_id));
        };
        let mut locks = slot.lock().await;
        match locks.iter_mut().find(|l| l.id == lock_id) {
            Some(lock) if lock.is_expired(now) => {
                lock.status = LockStatus::Released;
                lock.updated_at = now;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(LockError::LockNotFound(lock_id)),
        }
    }

    async fn active_for_trip(&self, trip_id: &str, now: DateTime<Utc>) -> Result<Vec<SeatLock>> {
        let Some(slot) = self.trips.read().await.get(trip_id).cloned() else {
            return Ok(Vec::new());
        };
        let locks = slot.lock().await;
        Ok(locks.iter().filter(|l| l.is_active(now)).cloned().collect())
    }

    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<SeatLock>> {
        let mut expired = Vec::new();
        for slot in self.all_slots().await {
            let locks = slot.lock().await;
            expired.extend(locks.iter().filter(|l| l.is_expired(now)).cloned());
        }
        expired.sort_by_key(|l| l.expires_at);
        Ok(expired)
    }

    async fn counts(&self, now: DateTime<Utc>) -> Result<LockCounts> {
        let mut counts = LockCounts::default();
        for slot in self.all_slots().await {
            for lock in slot.lock().await.iter() {
                match lock.status {
                    LockStatus::Held if lock.expires_at > now => counts.active_holds += 1,
                    LockStatus::Held if lock.expires_at < now => counts.expired_unswept += 1,
                    LockStatus::Confirmed => counts.confirmed += 1,
                    _ => {}
                }
            }
        }
        Ok(counts)
    }
}
