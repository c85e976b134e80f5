//! seat_lock.rs
//!
//! Жизненный цикл удержания мест (seat hold):
//!
//! 1.  **acquire**: atomically claims a set of seats on one trip for a holder.
//!     All-or-nothing: if any seat is actively locked, nothing is written and
//!     the error names every conflicting seat.
//! 2.  **confirm / release**: transitions driven by the payment workflow.
//! 3.  **release_expired_locks**: reclamation of abandoned holds, invoked by
//!     the sweeper on a schedule.
//!
//! Expiry is evaluated at read time through [`SeatLock::is_active`]; the sweep
//! only catches the persisted status up.

use chrono::Duration;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::{
    cache::AvailabilityCache,
    clock::Clock,
    config::LockConfig,
    error::{LockError, Result},
    models::{LockId, LockStatus, SeatLock},
    store::{LockCounts, LockStore},
};

pub struct SeatLockManager {
    store: Arc<dyn LockStore>,
    clock: Arc<dyn Clock>,
    cache: Option<AvailabilityCache>,
    config: LockConfig,
}

impl SeatLockManager {
    pub fn new(store: Arc<dyn LockStore>, clock: Arc<dyn Clock>, config: LockConfig) -> Self {
        Self {
            store,
            clock,
            cache: None,
            config,
        }
    }

    pub fn with_cache(mut self, cache: AvailabilityCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Places a `HELD` lock on `seat_numbers` for `holder_id`.
    ///
    /// `ttl_seconds` falls back to the configured default (900 s unless
    /// overridden).
    pub async fn acquire(
        &self,
        trip_id: &str,
        seat_numbers: &[String],
        holder_id: &str,
        ttl_seconds: Option<u64>,
    ) -> Result<SeatLock> {
        self.validate_request(trip_id, seat_numbers, holder_id)?;

        let ttl_seconds = ttl_seconds.unwrap_or(self.config.default_ttl_seconds);
        if ttl_seconds == 0 {
            return Err(LockError::InvalidRequest("ttl_seconds must be positive".into()));
        }
        if ttl_seconds > self.config.max_ttl_seconds {
            return Err(LockError::InvalidRequest(format!(
                "ttl_seconds must not exceed {}",
                self.config.max_ttl_seconds
            )));
        }
        let ttl = i64::try_from(ttl_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| LockError::InvalidRequest(format!("ttl_seconds {} is out of range", ttl_seconds)))?;

        let now = self.clock.now();
        let lock = SeatLock::new_held(trip_id, seat_numbers.to_vec(), holder_id, ttl, now)?;

        match self.store.insert_if_available(&lock, now).await {
            Ok(()) => {
                info!(
                    lock_id = %lock.id,
                    trip_id,
                    holder_id,
                    seats = ?lock.seat_numbers,
                    expires_at = %lock.expires_at,
                    "Seat lock acquired"
                );
                self.invalidate_cache(trip_id).await;
                Ok(lock)
            }
            Err(LockError::SeatsUnavailable { trip_id, seats }) => {
                info!(trip_id = %trip_id, holder_id, conflicts = ?seats, "Seats unavailable");
                Err(LockError::SeatsUnavailable { trip_id, seats })
            }
            Err(e) => {
                error!(trip_id, holder_id, "Seat lock acquisition failed: {}", e);
                Err(e)
            }
        }
    }

    /// `HELD -> CONFIRMED`. A hold past its expiry that has not been swept is
    /// still confirmed, unless another holder has locked one of its seats in
    /// the meantime; then `SeatsUnavailable` is returned and the hold stays
    /// `HELD` for the sweep.
    pub async fn confirm(&self, lock_id: LockId, booking_id: Option<&str>) -> Result<()> {
        let now = self.clock.now();

        match self.store.confirm_held(lock_id, booking_id, now).await {
            Ok(()) => {
                info!(%lock_id, booking_id = ?booking_id, "Seat lock confirmed");
                self.invalidate_cache_for_lock(lock_id).await;
                Ok(())
            }
            Err(e @ LockError::LockNotFound(_)) => {
                error!(%lock_id, "Confirm called for unknown seat lock");
                Err(e)
            }
            Err(e @ LockError::InvalidStateTransition { .. }) => {
                warn!(%lock_id, "Confirm rejected: {}", e);
                Err(e)
            }
            Err(e @ LockError::SeatsUnavailable { .. }) => {
                warn!(%lock_id, "Confirm rejected, expired hold lost its seats: {}", e);
                Err(e)
            }
            Err(e) => {
                error!(%lock_id, "Seat lock confirm failed: {}", e);
                Err(e)
            }
        }
    }

    /// Releases the lock. Repeated calls succeed without changing anything.
    pub async fn release(&self, lock_id: LockId) -> Result<()> {
        let now = self.clock.now();

        match self.store.release(lock_id, now).await {
            Ok(LockStatus::Released) => {
                debug!(%lock_id, "Seat lock already released");
                Ok(())
            }
            Ok(previous) => {
                if previous == LockStatus::Confirmed {
                    warn!(%lock_id, "Releasing a CONFIRMED seat lock, sold seats return to inventory");
                }
                info!(%lock_id, from = %previous, "Seat lock released");
                self.invalidate_cache_for_lock(lock_id).await;
                Ok(())
            }
            Err(e @ LockError::LockNotFound(_)) => {
                error!(%lock_id, "Release called for unknown seat lock");
                Err(e)
            }
            Err(e) => {
                error!(%lock_id, "Seat lock release failed: {}", e);
                Err(e)
            }
        }
    }

    pub async fn get_lock(&self, lock_id: LockId) -> Result<SeatLock> {
        self.store
            .get(lock_id)
            .await?
            .ok_or(LockError::LockNotFound(lock_id))
    }

    /// `HELD` (unexpired) and `CONFIRMED` locks of the trip.
    pub async fn get_active_locks(&self, trip_id: &str) -> Result<Vec<SeatLock>> {
        self.store.active_for_trip(trip_id, self.clock.now()).await
    }

    /// Display-only check; acquire performs its own authoritative check.
    pub async fn are_seats_available(&self, trip_id: &str, seat_numbers: &[String]) -> Result<bool> {
        let locked = self.locked_seats(trip_id).await?;
        Ok(seat_numbers.iter().all(|seat| !locked.contains(seat)))
    }

    /// `all_seats` minus `sold_seats` minus seats under an active lock,
    /// in the order of `all_seats`.
    pub async fn available_seats(
        &self,
        trip_id: &str,
        all_seats: &[String],
        sold_seats: &[String],
    ) -> Result<Vec<String>> {
        let locked = self.locked_seats(trip_id).await?;
        let sold: HashSet<&String> = sold_seats.iter().collect();

        Ok(all_seats
            .iter()
            .filter(|seat| !sold.contains(seat) && !locked.contains(*seat))
            .cloned()
            .collect())
    }

    /// `HELD` locks whose `expires_at` has passed.
    pub async fn find_expired_locks(&self) -> Result<Vec<SeatLock>> {
        self.store.find_expired(self.clock.now()).await
    }

    /// Releases every expired hold and returns how many were released.
    ///
    /// A failure on one lock is logged and the sweep moves on. Locks that were
    /// confirmed or released after being found are skipped.
    pub async fn release_expired_locks(&self) -> Result<usize> {
        let expired = self.find_expired_locks().await?;
        if expired.is_empty() {
            debug!("No expired seat locks to release");
            return Ok(0);
        }

        let mut released = 0;
        let mut touched_trips = HashSet::new();

        for lock in &expired {
            match self.store.release_if_expired(lock.id, self.clock.now()).await {
                Ok(true) => {
                    released += 1;
                    touched_trips.insert(lock.trip_id.as_str());
                    debug!(lock_id = %lock.id, trip_id = %lock.trip_id, "Expired seat lock released");
                }
                Ok(false) => {
                    debug!(lock_id = %lock.id, "Seat lock changed state before sweep, skipped");
                }
                Err(e) => {
                    error!(lock_id = %lock.id, "Failed to release expired seat lock: {}", e);
                }
            }
        }

        for trip_id in touched_trips {
            self.invalidate_cache(trip_id).await;
        }

        info!("Released {} of {} expired seat locks", released, expired.len());
        Ok(released)
    }

    pub async fn lock_counts(&self) -> Result<LockCounts> {
        self.store.counts(self.clock.now()).await
    }

    fn validate_request(&self, trip_id: &str, seat_numbers: &[String], holder_id: &str) -> Result<()> {
        if trip_id.trim().is_empty() {
            return Err(LockError::InvalidRequest("trip_id must not be empty".into()));
        }
        if holder_id.trim().is_empty() {
            return Err(LockError::InvalidRequest("holder_id must not be empty".into()));
        }
        if seat_numbers.is_empty() {
            return Err(LockError::InvalidRequest("at least one seat is required".into()));
        }
        if seat_numbers.len() > self.config.max_seats_per_lock {
            return Err(LockError::InvalidRequest(format!(
                "at most {} seats per lock",
                self.config.max_seats_per_lock
            )));
        }

        let mut seen = HashSet::with_capacity(seat_numbers.len());
        for seat in seat_numbers {
            if seat.trim().is_empty() {
                return Err(LockError::InvalidRequest("seat numbers must not be empty".into()));
            }
            if !seen.insert(seat.as_str()) {
                return Err(LockError::InvalidRequest(format!("duplicate seat {}", seat)));
            }
        }
        Ok(())
    }

    async fn locked_seats(&self, trip_id: &str) -> Result<HashSet<String>> {
        if let Some(cache) = &self.cache {
            match cache.locked_seats(trip_id).await {
                Ok(Some(seats)) => return Ok(seats.into_iter().collect()),
                Ok(None) => {}
                Err(e) => warn!(trip_id, "Availability cache read failed: {}", e),
            }
        }

        let seats: Vec<String> = self
            .get_active_locks(trip_id)
            .await?
            .into_iter()
            .flat_map(|lock| lock.seat_numbers)
            .collect();

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.store_locked_seats(trip_id, &seats).await {
                warn!(trip_id, "Availability cache write failed: {}", e);
            }
        }

        Ok(seats.into_iter().collect())
    }

    async fn invalidate_cache(&self, trip_id: &str) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.invalidate(trip_id).await {
                warn!(trip_id, "Availability cache invalidation failed: {}", e);
            }
        }
    }

    async fn invalidate_cache_for_lock(&self, lock_id: LockId) {
        if self.cache.is_none() {
            return;
        }
        match self.store.get(lock_id).await {
            Ok(Some(lock)) => self.invalidate_cache(&lock.trip_id).await,
            Ok(None) => {}
            Err(e) => warn!(%lock_id, "Could not resolve trip for cache invalidation: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryLockStore;

    fn seats(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn manager() -> (SeatLockManager, ManualClock) {
        let clock = ManualClock::default();
        let manager = SeatLockManager::new(
            Arc::new(MemoryLockStore::new()),
            Arc::new(clock.clone()),
            LockConfig::default(),
        );
        (manager, clock)
    }

    #[tokio::test]
    async fn acquire_uses_default_ttl() {
        let (manager, clock) = manager();
        let lock = manager.acquire("T1", &seats(&["A1"]), "U1", None).await.unwrap();

        assert_eq!(lock.status, LockStatus::Held);
        assert_eq!(lock.expires_at, clock.now() + Duration::seconds(900));
        assert!(lock.booking_id.is_none());
    }

    #[tokio::test]
    async fn acquire_rejects_invalid_requests() {
        let (manager, _) = manager();

        let cases = [
            ("T1", seats(&[]), "U1", None),
            ("T1", seats(&["A1", "A1"]), "U1", None),
            ("T1", seats(&["A1", " "]), "U1", None),
            ("", seats(&["A1"]), "U1", None),
            ("T1", seats(&["A1"]), "", None),
            ("T1", seats(&["A1"]), "U1", Some(0)),
            ("T1", seats(&["A1"]), "U1", Some(86_401)),
            ("T1", seats(&["A1"]), "U1", Some(1_000_000_000_000_000)),
            ("T1", seats(&["A1"]), "U1", Some(u64::MAX)),
            ("T1", (0..11).map(|i| format!("S{i}")).collect(), "U1", None),
        ];

        for (trip, requested, holder, ttl) in cases {
            let err = manager.acquire(trip, &requested, holder, ttl).await.unwrap_err();
            assert!(matches!(err, LockError::InvalidRequest(_)), "{trip:?} {requested:?}: {err:?}");
        }
        assert!(manager.get_active_locks("T1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn acquire_is_all_or_nothing() {
        let (manager, _) = manager();
        manager.acquire("T1", &seats(&["B"]), "U1", None).await.unwrap();

        let err = manager.acquire("T1", &seats(&["A", "B"]), "U2", None).await.unwrap_err();
        assert!(matches!(&err, LockError::SeatsUnavailable { seats, .. } if seats == &vec!["B".to_string()]));
        assert!(err.is_retryable());

        assert!(manager.are_seats_available("T1", &seats(&["A"])).await.unwrap());
        manager.acquire("T1", &seats(&["A"]), "U2", None).await.unwrap();
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let (manager, _) = manager();
        let lock = manager.acquire("T1", &seats(&["A1"]), "U1", None).await.unwrap();

        manager.release(lock.id).await.unwrap();
        manager.release(lock.id).await.unwrap();

        assert_eq!(manager.get_lock(lock.id).await.unwrap().status, LockStatus::Released);
        assert!(manager.are_seats_available("T1", &seats(&["A1"])).await.unwrap());
    }

    #[tokio::test]
    async fn expired_hold_stops_blocking_before_sweep() {
        let (manager, clock) = manager();
        let lock = manager.acquire("T1", &seats(&["A1"]), "U1", Some(60)).await.unwrap();

        clock.advance(Duration::seconds(61));

        assert!(manager.get_active_locks("T1").await.unwrap().is_empty());
        assert!(manager.are_seats_available("T1", &seats(&["A1"])).await.unwrap());
        manager.acquire("T1", &seats(&["A1"]), "U2", None).await.unwrap();

        // physically still HELD until swept
        assert_eq!(manager.get_lock(lock.id).await.unwrap().status, LockStatus::Held);
    }

    #[tokio::test]
    async fn confirmed_lock_is_terminal() {
        let (manager, clock) = manager();
        let lock = manager.acquire("T1", &seats(&["A1"]), "U1", Some(60)).await.unwrap();
        manager.confirm(lock.id, Some("BK-7")).await.unwrap();

        let err = manager.confirm(lock.id, None).await.unwrap_err();
        assert!(matches!(
            err,
            LockError::InvalidStateTransition { from: LockStatus::Confirmed, to: LockStatus::Confirmed, .. }
        ));

        clock.advance(Duration::days(1));
        let err = manager.acquire("T1", &seats(&["A1"]), "U2", None).await.unwrap_err();
        assert!(matches!(err, LockError::SeatsUnavailable { .. }));
        assert_eq!(manager.release_expired_locks().await.unwrap(), 0);

        let stored = manager.get_lock(lock.id).await.unwrap();
        assert_eq!(stored.status, LockStatus::Confirmed);
        assert_eq!(stored.booking_id.as_deref(), Some("BK-7"));
    }

    #[tokio::test]
    async fn confirm_after_release_is_rejected() {
        let (manager, _) = manager();
        let lock = manager.acquire("T1", &seats(&["A1"]), "U1", None).await.unwrap();
        manager.release(lock.id).await.unwrap();

        let err = manager.confirm(lock.id, None).await.unwrap_err();
        assert!(matches!(err, LockError::InvalidStateTransition { from: LockStatus::Released, .. }));
    }

    #[tokio::test]
    async fn confirm_wins_over_unswept_expiry() {
        let (manager, clock) = manager();
        let lock = manager.acquire("T1", &seats(&["A1"]), "U1", Some(1)).await.unwrap();
        clock.advance(Duration::seconds(30));

        manager.confirm(lock.id, None).await.unwrap();
        assert_eq!(manager.get_active_locks("T1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn huge_ttl_is_rejected_even_without_a_cap() {
        let clock = ManualClock::default();
        let manager = SeatLockManager::new(
            Arc::new(MemoryLockStore::new()),
            Arc::new(clock.clone()),
            LockConfig { max_ttl_seconds: u64::MAX, ..LockConfig::default() },
        );

        // past the Duration range, then past the timestamp range
        for ttl in [1_000_000_000_000_000, 9_000_000_000_000] {
            let err = manager.acquire("T1", &seats(&["A1"]), "U1", Some(ttl)).await.unwrap_err();
            assert!(matches!(err, LockError::InvalidRequest(_)), "{ttl}: {err:?}");
        }
        assert!(manager.are_seats_available("T1", &seats(&["A1"])).await.unwrap());
    }

    #[tokio::test]
    async fn expired_hold_loses_confirm_to_new_holder() {
        let (manager, clock) = manager();
        let stale = manager.acquire("T1", &seats(&["B1"]), "U1", Some(1)).await.unwrap();
        clock.advance(Duration::seconds(2));
        let fresh = manager.acquire("T1", &seats(&["B1"]), "U2", None).await.unwrap();

        let err = manager.confirm(stale.id, Some("BK-late")).await.unwrap_err();
        assert!(matches!(&err, LockError::SeatsUnavailable { seats, .. } if seats == &vec!["B1".to_string()]));

        let active = manager.get_active_locks("T1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, fresh.id);
        assert_eq!(manager.get_lock(stale.id).await.unwrap().status, LockStatus::Held);

        // the stale hold is still swept normally
        assert_eq!(manager.release_expired_locks().await.unwrap(), 1);
        assert_eq!(manager.get_lock(stale.id).await.unwrap().status, LockStatus::Released);
        manager.confirm(fresh.id, None).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_lock_reports_not_found() {
        let (manager, _) = manager();
        let id = uuid::Uuid::new_v4();

        assert!(matches!(manager.confirm(id, None).await, Err(LockError::LockNotFound(x)) if x == id));
        assert!(matches!(manager.release(id).await, Err(LockError::LockNotFound(_))));
        assert!(matches!(manager.get_lock(id).await, Err(LockError::LockNotFound(_))));
    }

    #[tokio::test]
    async fn available_seats_excludes_sold_and_locked() {
        let (manager, _) = manager();
        manager.acquire("T1", &seats(&["A2"]), "U1", None).await.unwrap();
        let confirmed = manager.acquire("T1", &seats(&["A4"]), "U2", None).await.unwrap();
        manager.confirm(confirmed.id, None).await.unwrap();

        let available = manager
            .available_seats("T1", &seats(&["A1", "A2", "A3", "A4", "A5"]), &seats(&["A5"]))
            .await
            .unwrap();

        assert_eq!(available, seats(&["A1", "A3"]));
    }

    #[tokio::test]
    async fn sweep_releases_only_expired_holds() {
        let (manager, clock) = manager();
        let mut expired = Vec::new();
        for i in 0..5 {
            let lock = manager.acquire("T1", &[format!("E{i}")], "U1", Some(60)).await.unwrap();
            expired.push(lock.id);
        }
        clock.advance(Duration::seconds(120));
        let mut fresh = Vec::new();
        for i in 0..2 {
            let lock = manager.acquire("T1", &[format!("F{i}")], "U2", Some(60)).await.unwrap();
            fresh.push(lock.id);
        }

        assert_eq!(manager.find_expired_locks().await.unwrap().len(), 5);
        assert_eq!(manager.release_expired_locks().await.unwrap(), 5);

        for id in expired {
            assert_eq!(manager.get_lock(id).await.unwrap().status, LockStatus::Released);
        }
        for id in fresh {
            assert_eq!(manager.get_lock(id).await.unwrap().status, LockStatus::Held);
        }
        assert_eq!(manager.release_expired_locks().await.unwrap(), 0);
    }
}
