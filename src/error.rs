use thiserror::Error;

use crate::models::{LockId, LockStatus};

/// Errors returned by the seat lock manager and its stores.
#[derive(Debug, Error)]
pub enum LockError {
    /// One or more requested seats are covered by an active lock.
    /// `seats` lists every conflicting seat in request order.
    #[error("seats unavailable on trip {trip_id}: {}", .seats.join(", "))]
    SeatsUnavailable { trip_id: String, seats: Vec<String> },

    #[error("seat lock {0} not found")]
    LockNotFound(LockId),

    #[error("invalid state transition for seat lock {lock_id}: {from} -> {to}")]
    InvalidStateTransition {
        lock_id: LockId,
        from: LockStatus,
        to: LockStatus,
    },

    #[error("invalid lock request: {0}")]
    InvalidRequest(String),

    #[error("corrupt seat lock record: {0}")]
    CorruptRecord(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl LockError {
    /// Conflicts are user-facing and can be retried with other seats.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LockError::SeatsUnavailable { .. })
    }
}

pub type Result<T, E = LockError> = std::result::Result<T, E>;
