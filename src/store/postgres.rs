//! Postgres-backed lock store.
//!
//! Acquire serializes on transaction-scoped advisory locks, one per
//! `(trip_id, seat)` key, taken in sorted order. Overlapping seat sets queue
//! behind each other; disjoint sets and other trips proceed in parallel. The
//! advisory locks are released automatically on commit or rollback.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;

use super::{LockCounts, LockStore};
use crate::database::Database;
use crate::error::{LockError, Result};
use crate::models::{LockId, LockStatus, SeatLock, SeatLockRow};

const SELECT_LOCKS: &str = r#"
    SELECT l.id, l.trip_id, l.holder_id, l.booking_id, l.status,
           l.expires_at, l.created_at, l.updated_at,
           array_agg(s.seat_number ORDER BY s.position) AS seat_numbers
    FROM seat_locks l
    JOIN seat_lock_seats s ON s.lock_id = l.id
"#;

#[derive(Clone)]
pub struct PgLockStore {
    pool: PgPool,
}

impl PgLockStore {
    pub fn new(db: &Database) -> Self {
        Self { pool: db.pool.clone() }
    }

    async fn lock_seat_keys(
        tx: &mut Transaction<'_, Postgres>,
        trip_id: &str,
        seat_numbers: &[String],
    ) -> Result<()> {
        let mut keys: Vec<String> = seat_numbers
            .iter()
            .map(|seat| format!("{}:{}", trip_id, seat))
            .collect();
        // Одинаковый порядок у всех транзакций - без дедлоков
        keys.sort();

        for key in keys {
            sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
                .bind(&key)
                .execute(&mut **tx)
                .await?;
        }
        Ok(())
    }

    /// Seats of `seat_numbers` covered by a lock active at `now`, other than
    /// `except`. Callers hold the advisory keys for these seats.
    async fn taken_seats(
        tx: &mut Transaction<'_, Postgres>,
        trip_id: &str,
        seat_numbers: &[String],
        except: Option<LockId>,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let taken: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT s.seat_number
            FROM seat_lock_seats s
            JOIN seat_locks l ON l.id = s.lock_id
            WHERE s.trip_id = $1
              AND s.seat_number = ANY($2)
              AND ($4::uuid IS NULL OR l.id <> $4)
              AND (l.status = 'CONFIRMED' OR (l.status = 'HELD' AND l.expires_at > $3))
            "#,
        )
        .bind(trip_id)
        .bind(seat_numbers)
        .bind(now)
        .bind(except)
        .fetch_all(&mut **tx)
        .await?;
        Ok(taken)
    }

    fn in_request_order(requested: &[String], taken: &[String]) -> Vec<String> {
        requested
            .iter()
            .filter(|seat| taken.contains(seat))
            .cloned()
            .collect()
    }

    fn into_locks(rows: Vec<SeatLockRow>) -> Result<Vec<SeatLock>> {
        rows.into_iter().map(SeatLock::try_from).collect()
    }
}

#[async_trait]
impl LockStore for PgLockStore {
    async fn insert_if_available(&self, lock: &SeatLock, now: DateTime<Utc>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        Self::lock_seat_keys(&mut tx, &lock.trip_id, &lock.seat_numbers).await?;

        let taken = Self::taken_seats(&mut tx, &lock.trip_id, &lock.seat_numbers, None, now).await?;

        if !taken.is_empty() {
            tx.rollback().await?;
            return Err(LockError::SeatsUnavailable {
                trip_id: lock.trip_id.clone(),
                seats: Self::in_request_order(&lock.seat_numbers, &taken),
            });
        }

        sqlx::query(
            r#"
            INSERT INTO seat_locks
                (id, trip_id, holder_id, booking_id, status, expires_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(lock.id)
        .bind(&lock.trip_id)
        .bind(&lock.holder_id)
        .bind(&lock.booking_id)
        .bind(lock.status.as_str())
        .bind(lock.expires_at)
        .bind(lock.created_at)
        .bind(lock.updated_at)
        .execute(&mut *tx)
        .await?;

        let positions: Vec<i32> = (0..lock.seat_numbers.len() as i32).collect();
        sqlx::query(
            r#"
            INSERT INTO seat_lock_seats (lock_id, trip_id, seat_number, position)
            SELECT $1, $2, seat.number, seat.position
            FROM UNNEST($3::text[], $4::int4[]) AS seat(number, position)
            "#,
        )
        .bind(lock.id)
        .bind(&lock.trip_id)
        .bind(&lock.seat_numbers)
        .bind(&positions)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, lock_id: LockId) -> Result<Option<SeatLock>> {
        let query = format!("{SELECT_LOCKS} WHERE l.id = $1 GROUP BY l.id");
        let row = sqlx::query_as::<_, SeatLockRow>(&query)
            .bind(lock_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(SeatLock::try_from).transpose()
    }

    async fn confirm_held(
        &self,
        lock_id: LockId,
        booking_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        // Seats never change, so reading them outside the transaction is safe.
        let lock = self.get(lock_id).await?.ok_or(LockError::LockNotFound(lock_id))?;

        let mut tx = self.pool.begin().await?;
        Self::lock_seat_keys(&mut tx, &lock.trip_id, &lock.seat_numbers).await?;

        let (status, expires_at): (String, DateTime<Utc>) =
            sqlx::query_as("SELECT status, expires_at FROM seat_locks WHERE id = $1 FOR UPDATE")
                .bind(lock_id)
                .fetch_one(&mut *tx)
                .await?;
        let status: LockStatus = status.parse()?;

        if status != LockStatus::Held {
            tx.rollback().await?;
            return Err(LockError::InvalidStateTransition {
                lock_id,
                from: status,
                to: LockStatus::Confirmed,
            });
        }

        if expires_at <= now {
            let taken =
                Self::taken_seats(&mut tx, &lock.trip_id, &lock.seat_numbers, Some(lock_id), now)
                    .await?;
            if !taken.is_empty() {
                tx.rollback().await?;
                return Err(LockError::SeatsUnavailable {
                    trip_id: lock.trip_id,
                    seats: Self::in_request_order(&lock.seat_numbers, &taken),
                });
            }
        }

        sqlx::query(
            r#"
            UPDATE seat_locks
            SET status = 'CONFIRMED',
                booking_id = COALESCE($2, booking_id),
                updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(lock_id)
        .bind(booking_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn release(&self, lock_id: LockId, now: DateTime<Utc>) -> Result<LockStatus> {
        let mut tx = self.pool.begin().await?;

        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM seat_locks WHERE id = $1 FOR UPDATE")
                .bind(lock_id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some(current) = current else {
            tx.rollback().await?;
            return Err(LockError::LockNotFound(lock_id));
        };
        let previous: LockStatus = current.parse()?;

        if previous != LockStatus::Released {
            sqlx::query("UPDATE seat_locks SET status = 'RELEASED', updated_at = $2 WHERE id = $1")
                .bind(lock_id)
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(previous)
    }

    async fn release_if_expired(&self, lock_id: LockId, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE seat_locks
            SET status = 'RELEASED', updated_at = $2
            WHERE id = $1 AND status = 'HELD' AND expires_at < $2
            "#,
        )
        .bind(lock_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!("Seat lock {} no longer eligible for sweep", lock_id);
        }
        Ok(result.rows_affected() > 0)
    }

    async fn active_for_trip(&self, trip_id: &str, now: DateTime<Utc>) -> Result<Vec<SeatLock>> {
        let query = format!(
            "{SELECT_LOCKS}
             WHERE l.trip_id = $1
               AND (l.status = 'CONFIRMED' OR (l.status = 'HELD' AND l.expires_at > $2))
             GROUP BY l.id
             ORDER BY l.created_at"
        );
        let rows = sqlx::query_as::<_, SeatLockRow>(&query)
            .bind(trip_id)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;
        Self::into_locks(rows)
    }

    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<SeatLock>> {
        let query = format!(
            "{SELECT_LOCKS}
             WHERE l.status = 'HELD' AND l.expires_at < $1
             GROUP BY l.id
             ORDER BY l.expires_at"
        );
        let rows = sqlx::query_as::<_, SeatLockRow>(&query)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;
        Self::into_locks(rows)
    }

    async fn counts(&self, now: DateTime<Utc>) -> Result<LockCounts> {
        let (active_holds, confirmed, expired_unswept): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'HELD' AND expires_at > $1),
                COUNT(*) FILTER (WHERE status = 'CONFIRMED'),
                COUNT(*) FILTER (WHERE status = 'HELD' AND expires_at < $1)
            FROM seat_locks
            "#,
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(LockCounts {
            active_holds,
            confirmed,
            expired_unswept,
        })
    }
}
