use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};

pub const HOLDER_HEADER: &str = "x-holder-id";

/// Identity of the actor placing a hold: a user id or a guest session id.
/// Authentication happens upstream; this only reads the resolved identity.
#[derive(Debug, Clone)]
pub struct HolderId(pub String);

impl<S> FromRequestParts<S> for HolderId
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let holder = parts
            .headers
            .get(HOLDER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or((StatusCode::UNAUTHORIZED, "X-Holder-Id header is required".to_string()))?;

        Ok(HolderId(holder.to_string()))
    }
}
