//! Publish-now-or-later decision
//!
//! The record is stored before anything else happens, so a crash or failure
//! later always leaves a recoverable unpublished post behind.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{Result, SchedulingError};
use crate::scheduling::{now_secs, SchedulePort};
use crate::service::executor::PublishExecutor;
use crate::types::{
    PostRecord, ScheduledPublish, SocialAccount, SubmissionOutcome, SubmissionReceipt,
};
use crate::Database;

#[derive(Clone)]
pub struct Scheduler {
    db: Database,
    schedule: Arc<dyn SchedulePort>,
    executor: PublishExecutor,
}

impl Scheduler {
    pub fn new(db: Database, schedule: Arc<dyn SchedulePort>, executor: PublishExecutor) -> Self {
        Self {
            db,
            schedule,
            executor,
        }
    }

    /// Store a post and publish it now (`scheduled_time` absent) or register it for later
    ///
    /// The immediate path waits for the whole publish attempt; the deferred
    /// path returns as soon as the schedule entry is stored.
    ///
    /// # Errors
    ///
    /// `SchedulingError::PastScheduleTime` if `scheduled_time` has already
    /// passed (nothing is stored), otherwise whatever the publish attempt
    /// returns. After a failed immediate attempt the record stays stored
    /// and unpublished.
    pub async fn submit(
        &self,
        account: &SocialAccount,
        message: &str,
        media_reference: Option<String>,
        scheduled_time: Option<i64>,
    ) -> Result<SubmissionReceipt> {
        self.submit_at(account, message, media_reference, scheduled_time, now_secs())
            .await
    }

    pub async fn submit_at(
        &self,
        account: &SocialAccount,
        message: &str,
        media_reference: Option<String>,
        scheduled_time: Option<i64>,
        now: i64,
    ) -> Result<SubmissionReceipt> {
        if let Some(at) = scheduled_time {
            if at < now {
                return Err(SchedulingError::PastScheduleTime {
                    scheduled_time: at,
                    now,
                }
                .into());
            }
        }

        let record = PostRecord::new(
            account.uid.clone(),
            message.to_string(),
            media_reference,
            scheduled_time,
            now,
        );
        self.db.create_post(&record).await?;

        let outcome = match scheduled_time {
            None => {
                let outcome = self
                    .executor
                    .execute(&record.uuid, account, None)
                    .await
                    .inspect_err(|e| {
                        warn!(post = %record.uuid, "Immediate publish failed, post left unpublished: {}", e)
                    })?;
                SubmissionOutcome::Published(outcome)
            }
            Some(fire_at) => {
                let handle = self
                    .schedule
                    .register(
                        fire_at,
                        ScheduledPublish {
                            post_uuid: record.uuid,
                            account_uid: account.uid.clone(),
                        },
                    )
                    .await?;
                info!(post = %record.uuid, fire_at, delay_secs = fire_at - now, "Post scheduled");
                SubmissionOutcome::Scheduled { handle, fire_at }
            }
        };

        Ok(SubmissionReceipt {
            post_uuid: record.uuid,
            outcome,
        })
    }
}
