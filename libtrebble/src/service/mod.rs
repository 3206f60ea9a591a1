//! Service layer for Trebble
//!
//! `PublishingService` is the single entry point used by the API server, the
//! dispatcher daemon and the operator CLI. It owns the shared database handle
//! and wires the sub-services together:
//!
//! - `RequestValidator`: field-level checks on inbound post requests
//! - `Scheduler`: stores the record, then publishes now or registers for later
//! - `PublishExecutor`: media upload, post submission, record update
//! - `ListingService`: paged, per-user reads
//!
//! # Example
//!
//! ```no_run
//! use libtrebble::service::PublishingService;
//! use libtrebble::service::validation::PostSubmission;
//! use libtrebble::Config;
//!
//! # async fn example() -> libtrebble::Result<()> {
//! let service = PublishingService::new(Config::load()?).await?;
//!
//! let submission = PostSubmission {
//!     account_uid: Some("A1".to_string()),
//!     message: Some("Hello world".to_string()),
//!     ..Default::default()
//! };
//! let receipt = service.submit(submission, Some("user-1")).await?;
//! println!("post {}", receipt.post_uuid);
//! # Ok(())
//! # }
//! ```

pub mod executor;
pub mod listing;
pub mod scheduler;
pub mod validation;

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use self::executor::PublishExecutor;
use self::listing::ListingService;
use self::scheduler::Scheduler;
use self::validation::{PostSubmission, RequestValidator};
use crate::error::{PublishError, Result};
use crate::media::{MediaFetcher, MediaStore, MediaTransfer};
use crate::platforms::{build_http_client, PlatformRegistry};
use crate::scheduling::{now_secs, Dispatcher, DurableSchedule};
use crate::types::{PostRecord, PublishOutcome, SubmissionReceipt};
use crate::{Config, Database};

#[derive(Clone)]
pub struct PublishingService {
    db: Database,
    config: Arc<Config>,
    validator: RequestValidator,
    scheduler: Scheduler,
    executor: PublishExecutor,
    listing: ListingService,
    media: MediaStore,
}

impl PublishingService {
    /// Open the configured database and build every configured platform
    pub async fn new(config: Config) -> Result<Self> {
        let db = Database::new(&config.database.path).await?;
        let platforms = PlatformRegistry::from_config(&config)?;
        Self::with_platforms(db, config, platforms)
    }

    /// Build on an open database with an explicit set of platforms
    pub fn with_platforms(db: Database, config: Config, platforms: PlatformRegistry) -> Result<Self> {
        let http = build_http_client(config.linkedin.timeout_secs)?;
        let transfer = MediaTransfer::new(MediaFetcher::new(http, config.media.clone()));
        let executor = PublishExecutor::new(db.clone(), platforms, transfer);
        let scheduler = Scheduler::new(
            db.clone(),
            Arc::new(DurableSchedule::new(db.clone())),
            executor.clone(),
        );

        Ok(Self {
            validator: RequestValidator::new(Arc::new(db.clone()), &config),
            listing: ListingService::new(db.clone(), config.api.page_size),
            media: MediaStore::new(config.media.clone()),
            config: Arc::new(config),
            scheduler,
            executor,
            db,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn validator(&self) -> &RequestValidator {
        &self.validator
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn executor(&self) -> &PublishExecutor {
        &self.executor
    }

    pub fn listing(&self) -> &ListingService {
        &self.listing
    }

    /// Dispatcher that fires this service's deferred posts
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            self.db.clone(),
            Arc::new(self.executor.clone()),
            self.config.scheduling.clone(),
        )
    }

    /// Validate, store the image, then publish or schedule
    ///
    /// Nothing is stored when validation fails, and the image is removed
    /// again when the post record could not be stored.
    pub async fn submit(
        &self,
        submission: PostSubmission,
        requester: Option<&str>,
    ) -> Result<SubmissionReceipt> {
        let now = now_secs();
        let post = self.validator.validate(submission, requester, now).await?;

        let media_reference = match &post.image {
            Some(image) => Some(
                self.media
                    .save(&post.account.uid, &image.filename, &image.bytes)
                    .await?,
            ),
            None => None,
        };

        let result = self
            .scheduler
            .submit(
                &post.account,
                &post.message,
                media_reference.clone(),
                post.scheduled_time,
            )
            .await;

        if let (Err(_), Some(reference)) = (&result, &media_reference) {
            self.discard_unreferenced(reference).await;
        }
        result
    }

    /// Drop a stored image that no record ended up pointing at
    ///
    /// A record left unpublished by a failed attempt keeps its image so the
    /// post can be republished.
    async fn discard_unreferenced(&self, reference: &str) {
        match self.db.media_referenced(reference).await {
            Ok(true) => {}
            Ok(false) => {
                if let Err(e) = self.media.remove(reference).await {
                    warn!(file = reference, "Could not remove orphaned media: {}", e);
                }
            }
            Err(e) => warn!(file = reference, "Could not check media references: {}", e),
        }
    }

    /// Try an unpublished post again, as its own account
    ///
    /// Operator action for posts left behind by a failed attempt. A post that
    /// is already published is left alone.
    pub async fn republish(&self, post_id: &Uuid) -> Result<PublishOutcome> {
        let record = self
            .db
            .get_post(post_id)
            .await?
            .ok_or(PublishError::RecordNotFound(*post_id))?;

        info!(post = %post_id, "Republishing post");
        self.executor.execute_for(post_id, &record.account_uid).await
    }

    /// Unpublished posts whose due time has passed
    pub async fn stranded(&self) -> Result<Vec<PostRecord>> {
        self.db.stranded_posts(now_secs()).await
    }
}
