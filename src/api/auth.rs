use super::AppState;
use crate::relay::ErrorBody;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::warn;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing API Key. Please provide X-API-Key header.")]
    Missing,
    #[error("Invalid API Key")]
    Invalid,
}

pub fn check_api_key(headers: &HeaderMap, expected: &str) -> Result<(), AuthError> {
    let provided = headers.get(API_KEY_HEADER).ok_or(AuthError::Missing)?;
    if provided.as_bytes() == expected.as_bytes() {
        Ok(())
    } else {
        Err(AuthError::Invalid)
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self {
            AuthError::Missing => StatusCode::UNAUTHORIZED,
            AuthError::Invalid => StatusCode::FORBIDDEN,
        };
        let body = ErrorBody {
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Middleware guarding the model routes.
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    match check_api_key(request.headers(), &state.api_key) {
        Ok(()) => next.run(request).await,
        Err(e) => {
            warn!(path = %request.uri().path(), error = %e, "Rejected unauthenticated request");
            e.into_response()
        }
    }
}
