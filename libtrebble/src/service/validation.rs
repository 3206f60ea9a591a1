//! Inbound post request validation
//!
//! Checks every field and reports all failures at once, keyed by field name,
//! before anything is stored or sent.

use std::sync::Arc;

use crate::accounts::AccountDirectory;
use crate::error::{Result, ValidationErrors, ValidationFailure};
use crate::scheduling::parse_schedule_time;
use crate::types::SocialAccount;
use crate::Config;

/// An image as received from the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Raw create-post request; every field may be missing
#[derive(Debug, Clone, Default)]
pub struct PostSubmission {
    pub account_uid: Option<String>,
    pub message: Option<String>,
    pub image: Option<ImageUpload>,
    /// ISO-8601; absent or empty means publish now
    pub scheduled_time: Option<String>,
}

/// A request that passed validation
#[derive(Debug, Clone)]
pub struct ValidatedPost {
    pub account: SocialAccount,
    pub message: String,
    pub image: Option<ImageUpload>,
    pub scheduled_time: Option<i64>,
}

#[derive(Clone)]
pub struct RequestValidator {
    directory: Arc<dyn AccountDirectory>,
    max_image_bytes: u64,
    min_lead_secs: i64,
}

impl RequestValidator {
    pub fn new(directory: Arc<dyn AccountDirectory>, config: &Config) -> Self {
        Self {
            directory,
            max_image_bytes: config.media.max_image_bytes,
            min_lead_secs: config.scheduling.min_lead_secs,
        }
    }

    /// Validate `submission` as of `now`
    ///
    /// When `requester` is given, an account owned by another user is
    /// reported as unknown.
    ///
    /// # Errors
    ///
    /// `TrebbleError::Validation` with every failed field, or a persistence
    /// error from the account lookup.
    pub async fn validate(
        &self,
        submission: PostSubmission,
        requester: Option<&str>,
        now: i64,
    ) -> Result<ValidatedPost> {
        let mut errors = ValidationErrors::new();

        let message = match submission.message {
            None => {
                errors.add("message", ValidationFailure::MissingField);
                None
            }
            Some(m) if m.trim().is_empty() => {
                errors.add("message", ValidationFailure::EmptyMessage);
                None
            }
            Some(m) => Some(m),
        };

        if let Some(image) = &submission.image {
            let size = image.bytes.len() as u64;
            if size > self.max_image_bytes {
                errors.add(
                    "image",
                    ValidationFailure::ImageTooLarge {
                        size,
                        limit: self.max_image_bytes,
                    },
                );
            }
        }

        let account = match submission.account_uid.as_deref().map(str::trim) {
            None | Some("") => {
                errors.add("account_uid", ValidationFailure::MissingField);
                None
            }
            Some(uid) => match self.directory.find_account(uid).await? {
                Some(account) if requester.map_or(true, |user| account.user_id == user) => {
                    Some(account)
                }
                _ => {
                    errors.add("account_uid", ValidationFailure::UnknownAccount);
                    None
                }
            },
        };

        let scheduled_time = match submission.scheduled_time.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => match parse_schedule_time(raw) {
                None => {
                    errors.add(
                        "scheduled_time",
                        ValidationFailure::InvalidScheduleTime(raw.to_string()),
                    );
                    None
                }
                Some(at) if at < now + self.min_lead_secs => {
                    errors.add(
                        "scheduled_time",
                        ValidationFailure::ScheduleTooSoon {
                            min_lead_secs: self.min_lead_secs,
                        },
                    );
                    None
                }
                Some(at) => Some(at),
            },
        };

        match (errors.into_result(), account, message) {
            (Ok(()), Some(account), Some(message)) => Ok(ValidatedPost {
                account,
                message,
                image: submission.image,
                scheduled_time,
            }),
            (Err(errors), _, _) => Err(errors.into()),
            // Unreachable: a missing value always records a failure
            _ => Err(ValidationErrors::new().into()),
        }
    }
}
