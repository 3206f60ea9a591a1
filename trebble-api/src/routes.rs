use std::sync::Arc;

use axum::extract::{Multipart, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use libtrebble::service::listing::{ListRequest, PostPage};
use libtrebble::service::validation::{ImageUpload, PostSubmission};
use libtrebble::{PublishOutcome, SubmissionOutcome};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/socials/linkedin/", post(create_linkedin_post))
        .route("/socials/list/", get(list_posts))
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatePostResponse {
    pub message: String,
    pub uuid: Uuid,
    /// Network payload for an immediate publish, null for a scheduled one
    pub response: Option<Value>,
    pub scheduled_time: Option<i64>,
}

/// Read the create-post multipart form
///
/// Unknown fields are ignored; an empty `image` part counts as no image.
async fn read_submission(mut multipart: Multipart) -> Result<PostSubmission, ApiError> {
    let mut submission = PostSubmission::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;
                if !bytes.is_empty() {
                    submission.image = Some(ImageUpload {
                        filename,
                        bytes: bytes.to_vec(),
                    });
                }
            }
            "account_uid" | "message" | "scheduled_time" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;
                match name.as_str() {
                    "account_uid" => submission.account_uid = Some(text),
                    "message" => submission.message = Some(text),
                    _ => submission.scheduled_time = Some(text),
                }
            }
            _ => {}
        }
    }

    Ok(submission)
}

/// POST /socials/linkedin/ - publish now or schedule a LinkedIn post
async fn create_linkedin_post(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    multipart: Multipart,
) -> Result<Json<CreatePostResponse>, ApiError> {
    let submission = read_submission(multipart).await?;
    let receipt = state.service.submit(submission, Some(&user_id)).await?;

    let response = match receipt.outcome {
        SubmissionOutcome::Published(outcome) => CreatePostResponse {
            message: "Post published successfully".to_string(),
            uuid: receipt.post_uuid,
            response: match outcome {
                PublishOutcome::Published(value) => Some(value),
                PublishOutcome::AlreadyPublished => None,
            },
            scheduled_time: None,
        },
        SubmissionOutcome::Scheduled { fire_at, .. } => CreatePostResponse {
            message: "Post scheduled successfully".to_string(),
            uuid: receipt.post_uuid,
            response: None,
            scheduled_time: Some(fire_at),
        },
    };

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    page_size: Option<usize>,
    page: Option<usize>,
    published: Option<bool>,
}

/// GET /socials/list/ - the caller's posts, newest first
async fn list_posts(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Query(params): Query<ListParams>,
) -> Result<Json<PostPage>, ApiError> {
    let request = ListRequest {
        page_size: params.page_size,
        page: params.page,
        published: params.published,
    };
    let page = state.service.listing().list(&user_id, &request).await?;
    Ok(Json(page))
}
