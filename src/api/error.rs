use crate::relay::ErrorBody;
use crate::Error;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{debug, error};

/// Status code for a gateway error.
pub fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Upstream { .. } => StatusCode::BAD_GATEWAY,
        Error::Timeout => StatusCode::GATEWAY_TIMEOUT,
        Error::QueueFull { .. } | Error::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
        // Client closed request.
        Error::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
        Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "Request failed");
        } else {
            debug!(status = status.as_u16(), error = %self, "Request failed");
        }
        (status, Json(ErrorBody::from(&self))).into_response()
    }
}

/// Anything a handler can fail with: gateway errors, or a body axum could not extract.
#[derive(Debug)]
pub enum ApiError {
    Gateway(Error),
    Rejected { status: StatusCode, detail: String },
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        ApiError::Gateway(error)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Rejected {
            status: rejection.status(),
            detail: rejection.body_text(),
        }
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        ApiError::Rejected {
            status: rejection.status(),
            detail: rejection.body_text(),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(error: MultipartError) -> Self {
        ApiError::Rejected {
            status: error.status(),
            detail: error.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Gateway(error) => error.into_response(),
            ApiError::Rejected { status, detail } => {
                debug!(status = status.as_u16(), %detail, "Request body rejected");
                (status, Json(ErrorBody { detail })).into_response()
            }
        }
    }
}
