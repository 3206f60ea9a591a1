//! Mapping library errors onto HTTP responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use libtrebble::{ErrorKind, TrebbleError};
use serde_json::json;

#[derive(Debug)]
pub enum ApiError {
    /// Missing, malformed or unknown bearer token
    Unauthorized,
    /// The request body could not be read as a form
    BadRequest(String),
    Service(TrebbleError),
}

impl From<TrebbleError> for ApiError {
    fn from(e: TrebbleError) -> Self {
        ApiError::Service(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "detail": "Authentication credentials were not provided or are invalid." })),
            )
                .into_response(),
            ApiError::BadRequest(detail) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "detail": detail }))).into_response()
            }
            ApiError::Service(TrebbleError::Validation(errors)) => {
                (StatusCode::BAD_REQUEST, Json(errors.to_field_map())).into_response()
            }
            ApiError::Service(e) => {
                let status = StatusCode::from_u16(e.http_status())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

                // Internal details stay in the log
                let detail = match e.kind() {
                    ErrorKind::Persistence | ErrorKind::Configuration | ErrorKind::Runtime => {
                        tracing::error!("Request failed: {}", e);
                        "Internal server error".to_string()
                    }
                    _ => {
                        tracing::warn!("Request failed: {}", e);
                        e.to_string()
                    }
                };

                (status, Json(json!({ "detail": detail }))).into_response()
            }
        }
    }
}
