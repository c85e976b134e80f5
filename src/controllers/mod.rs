pub mod locks;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;

use crate::error::LockError;

pub fn routes() -> Router<Arc<crate::AppState>> {
    Router::new().merge(locks::routes())
}

/// "Hold no longer valid": the booking flow has to restart.
fn status_419() -> StatusCode {
    StatusCode::from_u16(419).unwrap_or(StatusCode::CONFLICT)
}

impl IntoResponse for LockError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            LockError::SeatsUnavailable { trip_id, seats } => (
                StatusCode::CONFLICT,
                json!({
                    "error": "seats_unavailable",
                    "message": "Please pick different seats",
                    "trip_id": trip_id,
                    "seats": seats,
                }),
            ),
            LockError::InvalidStateTransition { from, .. } => (
                status_419(),
                json!({
                    "error": "invalid_state_transition",
                    "message": "Your seats are no longer held, please try again",
                    "status": from,
                }),
            ),
            LockError::LockNotFound(lock_id) => (
                StatusCode::NOT_FOUND,
                json!({ "error": "lock_not_found", "lock_id": lock_id }),
            ),
            LockError::InvalidRequest(message) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "invalid_request", "message": message }),
            ),
            LockError::CorruptRecord(_) | LockError::Storage(_) => {
                tracing::error!("Internal Server Error: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal_error" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
