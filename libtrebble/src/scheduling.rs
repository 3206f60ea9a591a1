//! Deferred publishing
//!
//! A deferred post is registered through a [`SchedulePort`] as a durable
//! `schedule_entries` row, so pending posts survive a restart. The
//! [`Dispatcher`] polls for due entries, claims them atomically and hands each
//! one to a [`FireHandler`] (the publish executor in production).
//!
//! Entries are fired at least once: an entry whose worker died mid-attempt is
//! reclaimed after `stale_after_secs`. The handler is expected to treat a fire
//! for an already-published record as a no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SchedulingConfig;
use crate::error::Result;
use crate::types::{
    PublishOutcome, ScheduleEntry, ScheduleHandle, ScheduleStatus, ScheduledPublish,
};
use crate::Database;

/// Current wall-clock time in Unix seconds
pub fn now_secs() -> i64 {
    Utc::now().timestamp()
}

/// Parse an ISO-8601 schedule time into Unix seconds
///
/// Accepts RFC 3339 (`2025-01-31T09:00:00Z`, `2025-01-31T09:00:00+01:00`) and
/// offset-less forms (`2025-01-31T09:00:00`, `2025-01-31 09:00`), which are
/// read as UTC.
pub fn parse_schedule_time(input: &str) -> Option<i64> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.timestamp());
    }

    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
        .map(|naive| naive.and_utc().timestamp())
}

/// Registers a publish to run at a future time
#[async_trait]
pub trait SchedulePort: Send + Sync {
    async fn register(&self, fire_at: i64, payload: ScheduledPublish) -> Result<ScheduleHandle>;
}

/// Schedule backed by the `schedule_entries` table
#[derive(Clone)]
pub struct DurableSchedule {
    db: Database,
}

impl DurableSchedule {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SchedulePort for DurableSchedule {
    async fn register(&self, fire_at: i64, payload: ScheduledPublish) -> Result<ScheduleHandle> {
        let entry = ScheduleEntry {
            id: Uuid::new_v4(),
            post_uuid: payload.post_uuid,
            account_uid: payload.account_uid,
            fire_at,
            status: ScheduleStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: now_secs(),
            claimed_at: None,
        };
        self.db.insert_schedule_entry(&entry).await?;
        debug!(entry = %entry.id, post = %entry.post_uuid, fire_at, "Registered schedule entry");
        Ok(ScheduleHandle(entry.id))
    }
}

/// Work run when a schedule entry fires
#[async_trait]
pub trait FireHandler: Send + Sync {
    async fn fire(&self, payload: &ScheduledPublish) -> Result<PublishOutcome>;
}

/// What one dispatcher pass did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub claimed: usize,
    pub published: usize,
    pub already_published: usize,
    pub failed: usize,
}

pub struct Dispatcher {
    db: Database,
    handler: Arc<dyn FireHandler>,
    config: SchedulingConfig,
}

impl Dispatcher {
    pub fn new(db: Database, handler: Arc<dyn FireHandler>, config: SchedulingConfig) -> Self {
        Self {
            db,
            handler,
            config,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms)
    }

    /// Fire everything due now
    pub async fn tick(&self) -> Result<TickReport> {
        self.tick_at(now_secs()).await
    }

    /// Fire everything due at `now`
    ///
    /// `now` decides which entries are due. Claims are stamped with the wall
    /// clock at the moment each entry is taken, and staleness is judged
    /// against the same clock, so another dispatcher only reclaims an entry
    /// once its attempt really has run for `stale_after_secs`.
    ///
    /// Entries are claimed and fired one at a time, at most `batch_size` per
    /// tick; a failed entry is recorded and does not stop the rest.
    pub async fn tick_at(&self, now: i64) -> Result<TickReport> {
        let mut report = TickReport::default();

        while report.claimed < self.config.batch_size as usize {
            let claimed_at = now_secs();
            let stale_before = claimed_at - self.config.stale_after_secs;
            let Some(entry) = self
                .db
                .claim_next_due_entry(now, claimed_at, stale_before)
                .await?
            else {
                break;
            };
            report.claimed += 1;
            self.fire_entry(entry, &mut report).await;
        }

        if report.claimed > 0 {
            info!(
                claimed = report.claimed,
                published = report.published,
                failed = report.failed,
                "Dispatched due schedule entries"
            );
        }
        Ok(report)
    }

    async fn fire_entry(&self, entry: ScheduleEntry, report: &mut TickReport) {
        if entry.attempts > 1 {
            warn!(
                entry = %entry.id,
                attempts = entry.attempts,
                "Re-firing schedule entry abandoned mid-attempt"
            );
        }

        let payload = ScheduledPublish {
            post_uuid: entry.post_uuid,
            account_uid: entry.account_uid.clone(),
        };

        let (status, last_error) = match self.handler.fire(&payload).await {
            Ok(PublishOutcome::Published(_)) => {
                info!(post = %entry.post_uuid, "Scheduled post published");
                report.published += 1;
                (ScheduleStatus::Done, None)
            }
            Ok(PublishOutcome::AlreadyPublished) => {
                info!(post = %entry.post_uuid, "Post already published, ignoring duplicate fire");
                report.already_published += 1;
                (ScheduleStatus::Done, None)
            }
            Err(e) => {
                error!(
                    post = %entry.post_uuid,
                    kind = ?e.kind(),
                    "Scheduled publish failed: {}",
                    e
                );
                report.failed += 1;
                (ScheduleStatus::Failed, Some(e.to_string()))
            }
        };

        // Left in `firing` if this fails; reclaimed once stale
        if let Err(e) = self
            .db
            .finish_schedule_entry(&entry.id, status, last_error.as_deref())
            .await
        {
            error!(entry = %entry.id, "Could not record schedule entry result: {}", e);
        }
    }

    /// Poll until `shutdown` is set
    pub async fn run(&self, shutdown: Arc<AtomicBool>) -> Result<()> {
        let interval = self.poll_interval();
        let slice = interval.min(Duration::from_millis(250));
        info!("Dispatcher started (poll interval {:?})", interval);

        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("Shutdown requested, stopping dispatcher");
                break;
            }

            if let Err(e) = self.tick().await {
                error!("Error dispatching scheduled posts: {}", e);
            }

            let mut waited = Duration::ZERO;
            while waited < interval {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                sleep(slice).await;
                waited += slice;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExternalFailure, PublishError, TrebbleError};
    use crate::types::{Credential, PostRecord, SocialAccount};
    use serde_json::json;
    use std::sync::Mutex;

    struct RecordingHandler {
        fired: Mutex<Vec<ScheduledPublish>>,
        fail: bool,
    }

    impl RecordingHandler {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                fired: Mutex::new(Vec::new()),
                fail,
            })
        }

        fn fired(&self) -> Vec<ScheduledPublish> {
            self.fired.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FireHandler for RecordingHandler {
        async fn fire(&self, payload: &ScheduledPublish) -> Result<PublishOutcome> {
            self.fired.lock().unwrap().push(payload.clone());
            if self.fail {
                return Err(TrebbleError::Publish(PublishError::ExternalPublishFailed(
                    ExternalFailure::Status {
                        status: 401,
                        body: "token expired".to_string(),
                    },
                )));
            }
            Ok(PublishOutcome::Published(json!({"id": "x"})))
        }
    }

    async fn setup() -> (Database, Uuid) {
        let db = Database::in_memory().await.unwrap();
        db.insert_account(&SocialAccount {
            uid: "A1".to_string(),
            user_id: "user-1".to_string(),
            provider: "linkedin".to_string(),
            external_id: "abc".to_string(),
            credential: Credential::new("tok"),
            created_at: 0,
        })
        .await
        .unwrap();
        let post = PostRecord::new("A1".to_string(), "hi".to_string(), None, Some(1_000), 0);
        db.create_post(&post).await.unwrap();
        (db, post.uuid)
    }

    fn payload(post_uuid: Uuid) -> ScheduledPublish {
        ScheduledPublish {
            post_uuid,
            account_uid: "A1".to_string(),
        }
    }

    #[test]
    fn test_parse_schedule_time_formats() {
        assert_eq!(parse_schedule_time("1970-01-01T00:01:40Z"), Some(100));
        assert_eq!(parse_schedule_time("1970-01-01T01:01:40+01:00"), Some(100));
        assert_eq!(parse_schedule_time("1970-01-01T00:01:40"), Some(100));
        assert_eq!(parse_schedule_time("1970-01-01 00:01"), Some(60));
        assert_eq!(parse_schedule_time(" 2025-01-31T09:00:00Z "), Some(1_738_314_000));
    }

    #[test]
    fn test_parse_schedule_time_rejects_garbage() {
        assert_eq!(parse_schedule_time("tomorrow"), None);
        assert_eq!(parse_schedule_time(""), None);
        assert_eq!(parse_schedule_time("2025-13-01T00:00:00Z"), None);
    }

    #[tokio::test]
    async fn test_register_persists_pending_entry() {
        let (db, post_uuid) = setup().await;
        let schedule = DurableSchedule::new(db.clone());

        let handle = schedule.register(1_000, payload(post_uuid)).await.unwrap();

        let entry = db.get_schedule_entry(&handle.0).await.unwrap().unwrap();
        assert_eq!(entry.status, ScheduleStatus::Pending);
        assert_eq!(entry.fire_at, 1_000);
        assert_eq!(entry.post_uuid, post_uuid);
    }

    #[tokio::test]
    async fn test_tick_fires_only_due_entries() {
        let (db, post_uuid) = setup().await;
        let schedule = DurableSchedule::new(db.clone());
        let handle = schedule.register(1_000, payload(post_uuid)).await.unwrap();

        let handler = RecordingHandler::new(false);
        let dispatcher = Dispatcher::new(db.clone(), handler.clone(), SchedulingConfig::default());

        let early = dispatcher.tick_at(999).await.unwrap();
        assert_eq!(early.claimed, 0);
        assert!(handler.fired().is_empty());

        let due = dispatcher.tick_at(1_000).await.unwrap();
        assert_eq!(due.claimed, 1);
        assert_eq!(due.published, 1);
        assert_eq!(handler.fired(), vec![payload(post_uuid)]);

        let entry = db.get_schedule_entry(&handle.0).await.unwrap().unwrap();
        assert_eq!(entry.status, ScheduleStatus::Done);

        // Done entries are never fired again
        let again = dispatcher.tick_at(2_000).await.unwrap();
        assert_eq!(again.claimed, 0);
    }

    #[tokio::test]
    async fn test_failed_fire_is_recorded_not_retried() {
        let (db, post_uuid) = setup().await;
        let handle = DurableSchedule::new(db.clone())
            .register(1_000, payload(post_uuid))
            .await
            .unwrap();

        let handler = RecordingHandler::new(true);
        let dispatcher = Dispatcher::new(db.clone(), handler.clone(), SchedulingConfig::default());

        let report = dispatcher.tick_at(1_000).await.unwrap();
        assert_eq!(report.failed, 1);

        let entry = db.get_schedule_entry(&handle.0).await.unwrap().unwrap();
        assert_eq!(entry.status, ScheduleStatus::Failed);
        assert!(entry.last_error.unwrap().contains("token expired"));

        dispatcher.tick_at(5_000).await.unwrap();
        assert_eq!(handler.fired().len(), 1);
    }

    #[tokio::test]
    async fn test_only_abandoned_attempts_are_reclaimed() {
        let (db, post_uuid) = setup().await;
        let firing = |claimed_at: i64| ScheduleEntry {
            id: Uuid::new_v4(),
            post_uuid,
            account_uid: "A1".to_string(),
            fire_at: 1_000,
            status: ScheduleStatus::Firing,
            attempts: 1,
            last_error: None,
            created_at: 0,
            claimed_at: Some(claimed_at),
        };
        let abandoned = firing(now_secs() - 601);
        let in_flight = firing(now_secs());
        db.insert_schedule_entry(&abandoned).await.unwrap();
        db.insert_schedule_entry(&in_flight).await.unwrap();

        let handler = RecordingHandler::new(false);
        let dispatcher = Dispatcher::new(db.clone(), handler.clone(), SchedulingConfig::default());

        // Far past both schedule times; only real elapsed time makes a claim stale
        let report = dispatcher.tick_at(1_000_000).await.unwrap();
        assert_eq!(report.claimed, 1);

        let reclaimed = db.get_schedule_entry(&abandoned.id).await.unwrap().unwrap();
        assert_eq!(reclaimed.status, ScheduleStatus::Done);
        assert_eq!(reclaimed.attempts, 2);
        let untouched = db.get_schedule_entry(&in_flight.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, ScheduleStatus::Firing);
    }

    #[tokio::test]
    async fn test_tick_stops_at_batch_size() {
        let (db, post_uuid) = setup().await;
        let schedule = DurableSchedule::new(db.clone());
        for _ in 0..3 {
            schedule.register(1_000, payload(post_uuid)).await.unwrap();
        }

        let config = SchedulingConfig {
            batch_size: 2,
            ..Default::default()
        };
        let handler = RecordingHandler::new(false);
        let dispatcher = Dispatcher::new(db, handler.clone(), config);

        assert_eq!(dispatcher.tick_at(1_000).await.unwrap().claimed, 2);
        assert_eq!(dispatcher.tick_at(1_000).await.unwrap().claimed, 1);
        assert_eq!(handler.fired().len(), 3);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (db, _) = setup().await;
        let config = SchedulingConfig {
            poll_interval_ms: 20,
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(db, RecordingHandler::new(false), config);
        let shutdown = Arc::new(AtomicBool::new(false));

        let flag = shutdown.clone();
        let task = tokio::spawn(async move { dispatcher.run(flag).await });
        sleep(Duration::from_millis(60)).await;
        shutdown.store(true, Ordering::Relaxed);

        let result = tokio::time::timeout(Duration::from_secs(2), task).await;
        assert!(result.is_ok());
    }
}
