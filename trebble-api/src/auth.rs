//! Bearer token authentication

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use libtrebble::accounts::authenticate_token;

use crate::error::ApiError;
use crate::AppState;

/// The user id behind the request's `Authorization: Bearer` token
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .ok_or(ApiError::Unauthorized)?;

        authenticate_token(state.service.database(), token)
            .await?
            .map(AuthUser)
            .ok_or(ApiError::Unauthorized)
    }
}
