//! Social network integrations
//!
//! Every network is a [`Platform`]: it knows how to derive an author handle
//! for an account, upload one piece of media, and publish a post. The
//! publishing core looks platforms up by the account's provider name through
//! a [`PlatformRegistry`], so adding a network does not touch the scheduler,
//! the executor or the store.
//!
//! ```no_run
//! use libtrebble::platforms::PlatformRegistry;
//! use libtrebble::Config;
//!
//! # fn example() -> libtrebble::Result<()> {
//! let config = Config::load()?;
//! let registry = PlatformRegistry::from_config(&config)?;
//! assert!(registry.get("linkedin").is_some());
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{ConfigError, MediaError, PublishError, Result};
use crate::media::MediaPayload;
use crate::types::{Credential, MediaHandle, SocialAccount};
use crate::Config;

pub mod linkedin;

// Compiled into every build so integration tests in other crates can use it
pub mod mock;

/// Everything a network needs to create one post
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub author: String,
    pub text: String,
    /// Present only when the media upload for this attempt succeeded
    pub media: Option<MediaHandle>,
}

#[async_trait]
pub trait Platform: Send + Sync {
    /// Provider name accounts are registered under (e.g. "linkedin")
    fn name(&self) -> &str;

    /// Author handle for posts made by `account`
    fn author_handle(&self, account: &SocialAccount) -> String;

    /// Upload one image and return the network's handle for it
    ///
    /// # Errors
    ///
    /// `MediaError::UploadFailed` when registering or transferring fails,
    /// `MediaError::UploadIncomplete` when the finalize step fails.
    async fn upload_media(
        &self,
        media: &MediaPayload,
        credential: &Credential,
    ) -> std::result::Result<MediaHandle, MediaError>;

    /// Submit the post; returns the network's raw success payload
    ///
    /// # Errors
    ///
    /// `PublishError::ExternalPublishFailed` carrying the network's error body.
    async fn publish(
        &self,
        request: &PublishRequest,
        credential: &Credential,
    ) -> std::result::Result<Value, PublishError>;
}

/// Platforms keyed by provider name
#[derive(Clone, Default)]
pub struct PlatformRegistry {
    platforms: HashMap<String, Arc<dyn Platform>>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every network the configuration enables
    pub fn from_config(config: &Config) -> Result<Self> {
        let linkedin = linkedin::LinkedInPlatform::new(&config.linkedin)?;
        Ok(Self::new().with(Arc::new(linkedin)))
    }

    pub fn with(mut self, platform: Arc<dyn Platform>) -> Self {
        self.register(platform);
        self
    }

    pub fn register(&mut self, platform: Arc<dyn Platform>) {
        self.platforms.insert(platform.name().to_string(), platform);
    }

    pub fn get(&self, provider: &str) -> Option<Arc<dyn Platform>> {
        self.platforms.get(provider).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.platforms.keys().cloned().collect();
        names.sort();
        names
    }
}

/// HTTP client with the bounded per-request timeout every network call uses
pub fn build_http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| {
            ConfigError::InvalidValue {
                field: "http client".to_string(),
                reason: e.to_string(),
            }
            .into()
        })
}
