//! HTTP surface for Trebble
//!
//! Two authenticated endpoints: create a LinkedIn post (multipart form) and
//! list the caller's posts. Everything behind them lives in `libtrebble`.

pub mod auth;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use libtrebble::PublishingService;
use tower_http::trace::TraceLayer;

/// Room for the text fields around the largest accepted image
const FORM_OVERHEAD_BYTES: usize = 1024 * 1024;

pub struct AppState {
    pub service: PublishingService,
}

impl AppState {
    pub fn new(service: PublishingService) -> Self {
        Self { service }
    }
}

/// Router with every route and layer, ready to serve
pub fn build_router(state: Arc<AppState>) -> Router {
    // Oversized images must reach the validator to get a field error, not a 413
    let body_limit = state.service.config().media.max_image_bytes as usize + FORM_OVERHEAD_BYTES;

    routes::routes()
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
