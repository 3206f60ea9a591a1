//! Error types for Trebble

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, TrebbleError>;

#[derive(Error, Debug)]
pub enum TrebbleError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Publish failed: {0}")]
    Publish(#[from] PublishError),

    #[error("Scheduling failed: {0}")]
    Scheduling(#[from] SchedulingError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Process-level I/O outside any request: the listener, signal handling
    #[error("Runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Coarse classification used by the HTTP surface, the CLIs and the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad client input. Never retried.
    Validation,
    /// A referenced account or record does not exist.
    ResourceNotFound,
    /// Network failure or timeout talking to the social network. Safe to retry.
    ExternalTransport,
    /// The social network answered with a definitive error.
    ExternalRejection,
    /// Clock skew or a schedule time that passed before registration.
    Scheduling,
    /// The store is unavailable or misbehaving.
    Persistence,
    /// Broken configuration, only seen at startup.
    Configuration,
    /// The process itself failed while running.
    Runtime,
}

impl TrebbleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TrebbleError::Config(_) => ErrorKind::Configuration,
            TrebbleError::Database(_) => ErrorKind::Persistence,
            TrebbleError::Validation(_) | TrebbleError::InvalidInput(_) => ErrorKind::Validation,
            TrebbleError::Publish(e) => e.kind(),
            TrebbleError::Scheduling(_) => ErrorKind::Scheduling,
            TrebbleError::NotFound(_) => ErrorKind::ResourceNotFound,
            TrebbleError::Runtime(_) => ErrorKind::Runtime,
        }
    }

    /// HTTP status code used when the error reaches the API surface
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::Scheduling => 400,
            ErrorKind::ResourceNotFound => 404,
            ErrorKind::ExternalRejection => 502,
            ErrorKind::ExternalTransport => 504,
            ErrorKind::Persistence | ErrorKind::Configuration | ErrorKind::Runtime => 500,
        }
    }

    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Validation => 3,
            ErrorKind::Configuration | ErrorKind::Persistence => 2,
            _ => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },
}

/// What went wrong on one round trip to the social network
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalFailure {
    /// Connection error, TLS error or timeout
    Transport(String),
    /// Non-success status; the body is kept for triage
    Status { status: u16, body: String },
    /// Success status with a body we could not understand
    Malformed(String),
}

impl ExternalFailure {
    pub fn is_transport(&self) -> bool {
        matches!(self, ExternalFailure::Transport(_))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ExternalFailure::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl fmt::Display for ExternalFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternalFailure::Transport(msg) => write!(f, "transport error: {}", msg),
            ExternalFailure::Status { status, body } => write!(f, "status {}: {}", status, body),
            ExternalFailure::Malformed(msg) => write!(f, "malformed response: {}", msg),
        }
    }
}

impl From<reqwest::Error> for ExternalFailure {
    fn from(e: reqwest::Error) -> Self {
        // Strip the URL: upload URLs can carry signed query parameters.
        ExternalFailure::Transport(e.without_url().to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("media is {size} bytes, limit is {limit}")]
    TooLarge { size: u64, limit: u64 },

    #[error("could not fetch media: {0}")]
    FetchFailed(ExternalFailure),

    #[error("media upload failed: {0}")]
    UploadFailed(ExternalFailure),

    #[error("media upload was not finalized: {0}")]
    UploadIncomplete(ExternalFailure),
}

impl MediaError {
    fn external(&self) -> Option<&ExternalFailure> {
        match self {
            MediaError::TooLarge { .. } => None,
            MediaError::FetchFailed(f)
            | MediaError::UploadFailed(f)
            | MediaError::UploadIncomplete(f) => Some(f),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("media transfer failed: {0}")]
    MediaTransferFailed(#[from] MediaError),

    #[error("external publish failed: {0}")]
    ExternalPublishFailed(ExternalFailure),

    #[error("post record {0} not found")]
    RecordNotFound(Uuid),

    #[error("social account {0} not found")]
    AccountNotFound(String),

    #[error("no integration registered for provider {0}")]
    UnsupportedProvider(String),
}

impl PublishError {
    pub fn kind(&self) -> ErrorKind {
        let failure = match self {
            PublishError::RecordNotFound(_)
            | PublishError::AccountNotFound(_)
            | PublishError::UnsupportedProvider(_) => return ErrorKind::ResourceNotFound,
            PublishError::MediaTransferFailed(e) => e.external(),
            PublishError::ExternalPublishFailed(f) => Some(f),
        };

        match failure {
            Some(f) if f.is_transport() => ErrorKind::ExternalTransport,
            _ => ErrorKind::ExternalRejection,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulingError {
    #[error("scheduled time {scheduled_time} is already in the past (now {now})")]
    PastScheduleTime { scheduled_time: i64, now: i64 },
}

/// One rejected field of an inbound post request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    MissingField,
    EmptyMessage,
    ImageTooLarge { size: u64, limit: u64 },
    UnknownAccount,
    InvalidScheduleTime(String),
    ScheduleTooSoon { min_lead_secs: i64 },
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationFailure::MissingField => write!(f, "This field is required."),
            ValidationFailure::EmptyMessage => write!(f, "This field may not be blank."),
            ValidationFailure::ImageTooLarge { limit, .. } => {
                write!(f, "File size cannot exceed {}MB.", limit / (1024 * 1024))
            }
            ValidationFailure::UnknownAccount => write!(f, "Social Account does not exist"),
            ValidationFailure::InvalidScheduleTime(input) => write!(
                f,
                "Datetime has wrong format ({}). Use ISO-8601, e.g. 2025-01-31T09:00:00Z.",
                input
            ),
            ValidationFailure::ScheduleTooSoon { min_lead_secs } => write!(
                f,
                "Scheduled time must be at least {} seconds in the future.",
                min_lead_secs
            ),
        }
    }
}

/// Field-keyed set of validation failures
#[derive(Error, Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    failures: Vec<(String, ValidationFailure)>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, failure: ValidationFailure) {
        self.failures.push((field.to_string(), failure));
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failures recorded for one field
    pub fn get(&self, field: &str) -> Vec<&ValidationFailure> {
        self.failures
            .iter()
            .filter(|(name, _)| name == field)
            .map(|(_, failure)| failure)
            .collect()
    }

    pub fn has(&self, field: &str, failure: &ValidationFailure) -> bool {
        self.get(field).into_iter().any(|f| f == failure)
    }

    /// `{field: [messages]}` shape returned by the API
    pub fn to_field_map(&self) -> BTreeMap<String, Vec<String>> {
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (field, failure) in &self.failures {
            map.entry(field.clone()).or_default().push(failure.to_string());
        }
        map
    }

    /// Ok when nothing was recorded
    pub fn into_result(self) -> std::result::Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .failures
            .iter()
            .map(|(field, failure)| format!("{}: {}", field, failure))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_failure(status: u16) -> ExternalFailure {
        ExternalFailure::Status {
            status,
            body: r#"{"message":"nope"}"#.to_string(),
        }
    }

    #[test]
    fn test_validation_error_maps_to_400_and_exit_code_3() {
        let mut errors = ValidationErrors::new();
        errors.add("message", ValidationFailure::EmptyMessage);
        let error = TrebbleError::Validation(errors);

        assert_eq!(error.kind(), ErrorKind::Validation);
        assert_eq!(error.http_status(), 400);
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_runtime_failure_exits_with_code_1() {
        let error = TrebbleError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionAborted,
            "accept failed",
        ));
        assert_eq!(error.kind(), ErrorKind::Runtime);
        assert_eq!(error.exit_code(), 1);
        assert_eq!(error.http_status(), 500);

        let config = TrebbleError::Config(ConfigError::MissingField("database.path".to_string()));
        assert_eq!(config.exit_code(), 2);
        let input = TrebbleError::InvalidInput("bad".to_string());
        assert_eq!(input.exit_code(), 3);
    }

    #[test]
    fn test_record_not_found_is_resource_not_found() {
        let error = TrebbleError::Publish(PublishError::RecordNotFound(Uuid::new_v4()));
        assert_eq!(error.kind(), ErrorKind::ResourceNotFound);
        assert_eq!(error.http_status(), 404);
    }

    #[test]
    fn test_transport_failure_is_retry_safe_kind() {
        let error = PublishError::ExternalPublishFailed(ExternalFailure::Transport(
            "operation timed out".to_string(),
        ));
        assert_eq!(error.kind(), ErrorKind::ExternalTransport);

        let media = PublishError::MediaTransferFailed(MediaError::UploadFailed(
            ExternalFailure::Transport("connection reset".to_string()),
        ));
        assert_eq!(media.kind(), ErrorKind::ExternalTransport);
    }

    #[test]
    fn test_status_failure_is_rejection() {
        let error = PublishError::ExternalPublishFailed(status_failure(401));
        assert_eq!(error.kind(), ErrorKind::ExternalRejection);
        assert_eq!(TrebbleError::Publish(error).http_status(), 502);
    }

    #[test]
    fn test_media_too_large_is_rejection() {
        let error = PublishError::MediaTransferFailed(MediaError::TooLarge {
            size: 6_000_000,
            limit: 5_242_880,
        });
        assert_eq!(error.kind(), ErrorKind::ExternalRejection);
    }

    #[test]
    fn test_external_body_kept_in_message() {
        let error = TrebbleError::Publish(PublishError::ExternalPublishFailed(status_failure(422)));
        let message = error.to_string();
        assert!(message.contains("422"));
        assert!(message.contains("nope"));
    }

    #[test]
    fn test_database_error_exit_code() {
        let error = TrebbleError::Database(DbError::IoError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "File not found",
        )));
        assert_eq!(error.kind(), ErrorKind::Persistence);
        assert_eq!(error.exit_code(), 2);
        assert_eq!(error.http_status(), 500);
    }

    #[test]
    fn test_field_map_groups_messages() {
        let mut errors = ValidationErrors::new();
        errors.add("message", ValidationFailure::EmptyMessage);
        errors.add("account_uid", ValidationFailure::UnknownAccount);
        errors.add("message", ValidationFailure::MissingField);

        let map = errors.to_field_map();
        assert_eq!(map.len(), 2);
        assert_eq!(map["message"].len(), 2);
        assert_eq!(map["account_uid"], vec!["Social Account does not exist"]);
    }

    #[test]
    fn test_image_too_large_message_mentions_limit() {
        let failure = ValidationFailure::ImageTooLarge {
            size: 5_242_881,
            limit: 5_242_880,
        };
        assert_eq!(failure.to_string(), "File size cannot exceed 5MB.");
    }

    #[test]
    fn test_empty_errors_into_ok() {
        assert!(ValidationErrors::new().into_result().is_ok());
    }

    #[test]
    fn test_past_schedule_time_formatting() {
        let error = SchedulingError::PastScheduleTime {
            scheduled_time: 100,
            now: 200,
        };
        let message = TrebbleError::from(error).to_string();
        assert!(message.contains("already in the past"));
    }
}
