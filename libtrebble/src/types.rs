//! Core types for Trebble

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Durable record of one post and its publish lifecycle
///
/// Timestamps are Unix seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    pub uuid: Uuid,
    pub account_uid: String,
    pub content: String,
    /// Media reference as given at submission (not yet uploaded)
    pub file: Option<String>,
    /// `None` means the post was published immediately
    pub scheduled_time: Option<i64>,
    pub published: bool,
    /// Raw payload returned by the social network on success
    pub response: Option<Value>,
    pub date_published: i64,
    pub created_at: i64,
    pub likes: i64,
    pub comments: i64,
    pub shares: i64,
    pub header: Option<String>,
    pub data: Option<Value>,
}

impl PostRecord {
    /// A fresh, unpublished record
    ///
    /// `date_published` starts at the schedule time, or `now` for immediate posts.
    pub fn new(
        account_uid: String,
        content: String,
        file: Option<String>,
        scheduled_time: Option<i64>,
        now: i64,
    ) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            account_uid,
            content,
            file,
            scheduled_time,
            published: false,
            response: None,
            date_published: scheduled_time.unwrap_or(now),
            created_at: now,
            likes: 0,
            comments: 0,
            shares: 0,
            header: None,
            data: None,
        }
    }

    /// Unpublished and past its due time: a crash or failure left it behind
    pub fn is_stranded(&self, now: i64) -> bool {
        !self.published && self.scheduled_time.unwrap_or(self.created_at) < now
    }
}

/// Bearer credential for a social network account
///
/// Never printed: `Debug` is redacted and there is no `Display`.
pub struct Credential(SecretString);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn bearer_header(&self) -> String {
        format!("Bearer {}", self.expose())
    }
}

impl Clone for Credential {
    fn clone(&self) -> Self {
        Self::new(self.expose())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

/// A social network account linked to a user
#[derive(Debug, Clone)]
pub struct SocialAccount {
    pub uid: String,
    pub user_id: String,
    pub provider: String,
    /// The account's identity on the network (LinkedIn member id)
    pub external_id: String,
    pub credential: Credential,
    pub created_at: i64,
}

/// Opaque id of media uploaded to the network for one publish attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaHandle(String);

impl MediaHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    Pending,
    Firing,
    Done,
    Failed,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Pending => "pending",
            ScheduleStatus::Firing => "firing",
            ScheduleStatus::Done => "done",
            ScheduleStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ScheduleStatus::Pending),
            "firing" => Some(ScheduleStatus::Firing),
            "done" => Some(ScheduleStatus::Done),
            "failed" => Some(ScheduleStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable registration of a future publish
///
/// The credential is resolved from the account when the entry fires, so a
/// token refreshed in the meantime is picked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub id: Uuid,
    pub post_uuid: Uuid,
    pub account_uid: String,
    pub fire_at: i64,
    pub status: ScheduleStatus,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub claimed_at: Option<i64>,
}

/// What the delayed-execution facility runs when an entry fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledPublish {
    pub post_uuid: Uuid,
    pub account_uid: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScheduleHandle(pub Uuid);

/// Result of a publish attempt that did not fail
#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    /// The network accepted the post; this is its raw response
    Published(Value),
    /// The record was already published; nothing was sent
    AlreadyPublished,
}

impl PublishOutcome {
    pub fn response(&self) -> Option<&Value> {
        match self {
            PublishOutcome::Published(value) => Some(value),
            PublishOutcome::AlreadyPublished => None,
        }
    }
}

/// Returned by the scheduler once a submission is accepted
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionReceipt {
    pub post_uuid: Uuid,
    pub outcome: SubmissionOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    Published(PublishOutcome),
    Scheduled { handle: ScheduleHandle, fire_at: i64 },
}
