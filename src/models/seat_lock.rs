use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::LockError;

pub type LockId = Uuid;

/// Lifecycle state of a seat hold.
///
/// `Held` is the only state with outgoing transitions; `Confirmed` and
/// `Released` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockStatus {
    Held,
    Confirmed,
    Released,
}

impl LockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockStatus::Held => "HELD",
            LockStatus::Confirmed => "CONFIRMED",
            LockStatus::Released => "RELEASED",
        }
    }
}

impl fmt::Display for LockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockStatus {
    type Err = LockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HELD" => Ok(LockStatus::Held),
            "CONFIRMED" => Ok(LockStatus::Confirmed),
            "RELEASED" => Ok(LockStatus::Released),
            other => Err(LockError::CorruptRecord(format!("unknown lock status '{}'", other))),
        }
    }
}

/// A time-bounded reservation of specific seats on one trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatLock {
    pub id: LockId,
    pub trip_id: String,
    pub seat_numbers: Vec<String>,
    pub holder_id: String,
    pub booking_id: Option<String>,
    pub status: LockStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SeatLock {
    /// Builds a fresh `HELD` lock expiring `ttl` after `now`.
    /// Fails when `now + ttl` does not fit in a timestamp.
    pub fn new_held(
        trip_id: impl Into<String>,
        seat_numbers: Vec<String>,
        holder_id: impl Into<String>,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Self, LockError> {
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| LockError::InvalidRequest(format!("ttl of {}s is out of range", ttl.num_seconds())))?;

        Ok(Self {
            id: Uuid::new_v4(),
            trip_id: trip_id.into(),
            seat_numbers,
            holder_id: holder_id.into(),
            booking_id: None,
            status: LockStatus::Held,
            expires_at,
            created_at: now,
            updated_at: now,
        })
    }

    /// Whether the lock's seats count against availability at `now`.
    ///
    /// Every availability decision goes through this predicate, so a `HELD`
    /// lock past its `expires_at` stops blocking seats before the sweep has
    /// persisted the `RELEASED` status.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            LockStatus::Held => self.expires_at > now,
            LockStatus::Confirmed => true,
            LockStatus::Released => false,
        }
    }

    /// Eligible for the expiry sweep. Confirmed locks never are.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == LockStatus::Held && self.expires_at < now
    }

    pub fn covers(&self, seat_number: &str) -> bool {
        self.seat_numbers.iter().any(|s| s == seat_number)
    }
}

// Строка из БД: места агрегируются в массив через array_agg
#[derive(Debug, FromRow)]
pub struct SeatLockRow {
    pub id: Uuid,
    pub trip_id: String,
    pub seat_numbers: Vec<String>,
    pub holder_id: String,
    pub booking_id: Option<String>,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<SeatLockRow> for SeatLock {
    type Error = LockError;

    fn try_from(row: SeatLockRow) -> Result<Self, Self::Error> {
        Ok(SeatLock {
            id: row.id,
            trip_id: row.trip_id,
            seat_numbers: row.seat_numbers,
            holder_id: row.holder_id,
            booking_id: row.booking_id,
            status: row.status.parse()?,
            expires_at: row.expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
