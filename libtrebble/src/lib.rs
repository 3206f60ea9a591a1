//! Trebble - scheduled social post publishing
//!
//! This library holds the publishing pipeline shared by the Trebble binaries:
//! durable post records, request validation, immediate and deferred publishing
//! to LinkedIn (media upload included), and per-user listing.

pub mod accounts;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod media;
pub mod platforms;
pub mod scheduling;
pub mod service;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use db::{Database, PostQuery};
pub use error::{ErrorKind, Result, TrebbleError};
pub use service::PublishingService;
pub use types::{
    Credential, PostRecord, PublishOutcome, ScheduleEntry, ScheduleStatus, SocialAccount,
    SubmissionOutcome, SubmissionReceipt,
};
