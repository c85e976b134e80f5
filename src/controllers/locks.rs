use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use crate::{
    error::LockError,
    middleware::HolderId,
    models::{LockId, SeatLock},
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/locks", post(acquire_lock))
        .route("/locks/sweep", post(sweep_expired))
        .route("/locks/{lock_id}", get(get_lock))
        .route("/locks/{lock_id}/confirm", patch(confirm_lock))
        .route("/locks/{lock_id}/release", patch(release_lock))
        .route("/trips/{trip_id}/locks", get(active_locks))
        .route("/trips/{trip_id}/availability", get(seat_availability))
        .route("/stats/locks", get(lock_stats))
}

fn invalid(err: validator::ValidationErrors) -> LockError {
    LockError::InvalidRequest(err.to_string())
}

/* ---------- HOLDS ---------- */

// POST /api/locks
#[derive(Debug, Deserialize, Validate)]
struct AcquireLockRequest {
    #[validate(length(min = 1, max = 128))]
    trip_id: String,
    #[validate(length(min = 1))]
    seat_numbers: Vec<String>,
    #[validate(range(min = 1))]
    ttl_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
struct AcquireLockResponse {
    lock_id: LockId,
    expires_at: DateTime<Utc>,
}

async fn acquire_lock(
    State(state): State<Arc<AppState>>,
    HolderId(holder_id): HolderId,
    Json(req): Json<AcquireLockRequest>,
) -> Result<impl IntoResponse, LockError> {
    req.validate().map_err(invalid)?;

    let lock = state
        .locks
        .acquire(&req.trip_id, &req.seat_numbers, &holder_id, req.ttl_seconds)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(AcquireLockResponse {
            lock_id: lock.id,
            expires_at: lock.expires_at,
        }),
    ))
}

// GET /api/locks/{lock_id}
async fn get_lock(
    State(state): State<Arc<AppState>>,
    Path(lock_id): Path<LockId>,
) -> Result<Json<SeatLock>, LockError> {
    Ok(Json(state.locks.get_lock(lock_id).await?))
}

// PATCH /api/locks/{lock_id}/confirm
#[derive(Debug, Default, Deserialize, Validate)]
struct ConfirmLockRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 128))]
    booking_id: Option<String>,
}

async fn confirm_lock(
    State(state): State<Arc<AppState>>,
    Path(lock_id): Path<LockId>,
    body: Option<Json<ConfirmLockRequest>>,
) -> Result<impl IntoResponse, LockError> {
    // A bare PATCH without a JSON body confirms without a booking id.
    let req = body.map(|Json(req)| req).unwrap_or_default();
    req.validate().map_err(invalid)?;
    state.locks.confirm(lock_id, req.booking_id.as_deref()).await?;
    Ok(Json(serde_json::json!({ "lock_id": lock_id, "status": "CONFIRMED" })))
}

// PATCH /api/locks/{lock_id}/release
async fn release_lock(
    State(state): State<Arc<AppState>>,
    Path(lock_id): Path<LockId>,
) -> Result<impl IntoResponse, LockError> {
    state.locks.release(lock_id).await?;
    Ok(Json(serde_json::json!({ "lock_id": lock_id, "status": "RELEASED" })))
}

// POST /api/locks/sweep - внешний планировщик
async fn sweep_expired(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, LockError> {
    let released = state.locks.release_expired_locks().await?;
    Ok(Json(serde_json::json!({ "released": released })))
}

/* ---------- TRIPS ---------- */

// GET /api/trips/{trip_id}/locks
async fn active_locks(
    State(state): State<Arc<AppState>>,
    Path(trip_id): Path<String>,
) -> Result<Json<Vec<SeatLock>>, LockError> {
    Ok(Json(state.locks.get_active_locks(&trip_id).await?))
}

// GET /api/trips/{trip_id}/availability?seats=A1,A2
#[derive(Debug, Deserialize)]
struct AvailabilityQuery {
    seats: String,
}

#[derive(Debug, Serialize)]
struct AvailabilityResponse {
    trip_id: String,
    seats: Vec<String>,
    available: bool,
}

async fn seat_availability(
    State(state): State<Arc<AppState>>,
    Path(trip_id): Path<String>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<AvailabilityResponse>, LockError> {
    let seats: Vec<String> = query
        .seats
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    if seats.is_empty() {
        return Err(LockError::InvalidRequest("seats query parameter is empty".into()));
    }

    let available = state.locks.are_seats_available(&trip_id, &seats).await?;
    Ok(Json(AvailabilityResponse {
        trip_id,
        seats,
        available,
    }))
}

/* ---------- MONITORING ---------- */

// GET /api/stats/locks
async fn lock_stats(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, LockError> {
    let counts = state.locks.lock_counts().await?;
    Ok(Json(serde_json::json!({
        "active_holds": counts.active_holds,
        "confirmed": counts.confirmed,
        "expired_unswept": counts.expired_unswept,
    })))
}
