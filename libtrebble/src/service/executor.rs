//! Publish executor
//!
//! Runs one publish attempt for a stored post: upload its media, submit the
//! post, then record the network's response. The record is only written at
//! the very end, so `published` never reflects a half-finished attempt.

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{PublishError, Result};
use crate::media::MediaTransfer;
use crate::platforms::{PlatformRegistry, PublishRequest};
use crate::scheduling::{now_secs, FireHandler};
use crate::types::{PublishOutcome, ScheduledPublish, SocialAccount};
use crate::Database;

#[derive(Clone)]
pub struct PublishExecutor {
    db: Database,
    platforms: PlatformRegistry,
    media: MediaTransfer,
}

impl PublishExecutor {
    pub fn new(db: Database, platforms: PlatformRegistry, media: MediaTransfer) -> Self {
        Self {
            db,
            platforms,
            media,
        }
    }

    /// Publish record `record_id` as `account`
    ///
    /// `author` overrides the handle derived from the account.
    ///
    /// # Errors
    ///
    /// - `PublishError::RecordNotFound` if the record is gone
    /// - `PublishError::MediaTransferFailed` if the attached image could not be
    ///   uploaded; nothing is submitted in that case
    /// - `PublishError::ExternalPublishFailed` with the network's error body
    ///
    /// On any error the record stays unpublished with no response.
    pub async fn execute(
        &self,
        record_id: &Uuid,
        account: &SocialAccount,
        author: Option<&str>,
    ) -> Result<PublishOutcome> {
        let record = self
            .db
            .get_post(record_id)
            .await?
            .ok_or(PublishError::RecordNotFound(*record_id))?;

        if record.published {
            info!(post = %record_id, "Post already published, nothing to do");
            return Ok(PublishOutcome::AlreadyPublished);
        }

        let platform = self
            .platforms
            .get(&account.provider)
            .ok_or_else(|| PublishError::UnsupportedProvider(account.provider.clone()))?;

        let author = match author {
            Some(author) => author.to_string(),
            None => platform.author_handle(account),
        };

        let media = match &record.file {
            Some(reference) => {
                let handle = self
                    .media
                    .upload(reference, &account.credential, platform.as_ref())
                    .await
                    .map_err(PublishError::MediaTransferFailed)?;
                Some(handle)
            }
            None => None,
        };

        let request = PublishRequest {
            author,
            text: record.content.clone(),
            media,
        };
        let response = platform.publish(&request, &account.credential).await?;

        if !self
            .db
            .mark_published(record_id, &response, now_secs())
            .await?
        {
            warn!(
                post = %record_id,
                "Post was published by a concurrent attempt; keeping the first response"
            );
            return Ok(PublishOutcome::AlreadyPublished);
        }

        info!(post = %record_id, platform = platform.name(), "Post published");
        Ok(PublishOutcome::Published(response))
    }

    /// Resolve `account_uid` now and publish `record_id` as that account
    pub async fn execute_for(&self, record_id: &Uuid, account_uid: &str) -> Result<PublishOutcome> {
        let account = self
            .db
            .get_account(account_uid)
            .await?
            .ok_or_else(|| PublishError::AccountNotFound(account_uid.to_string()))?;
        self.execute(record_id, &account, None).await
    }
}

#[async_trait]
impl FireHandler for PublishExecutor {
    async fn fire(&self, payload: &ScheduledPublish) -> Result<PublishOutcome> {
        self.execute_for(&payload.post_uuid, &payload.account_uid)
            .await
    }
}
