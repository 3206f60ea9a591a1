//! Mock platform for tests
//!
//! Records every upload and publish it receives and can be told to fail
//! either step or to answer slowly. Counters are shared through `Arc`, so a
//! clone handed to a service still reports into the original.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::sleep;

use crate::error::{MediaError, PublishError};
use crate::media::MediaPayload;
use crate::platforms::{Platform, PublishRequest};
use crate::types::{Credential, MediaHandle, SocialAccount};

#[derive(Debug, Clone)]
pub struct MockConfig {
    pub name: String,
    /// Returned by every upload when set
    pub upload_error: Option<MediaError>,
    /// Returned by every publish when set
    pub publish_error: Option<PublishError>,
    /// Success payload for publish
    pub response: Value,
    /// Applied before each call completes
    pub delay: Duration,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            upload_error: None,
            publish_error: None,
            response: json!({"id": "urn:li:share:mock"}),
            delay: Duration::from_millis(0),
        }
    }
}

#[derive(Debug, Default)]
struct Calls {
    uploads: AtomicUsize,
    publishes: AtomicUsize,
    requests: Mutex<Vec<PublishRequest>>,
}

#[derive(Debug, Clone)]
pub struct MockPlatform {
    config: MockConfig,
    calls: Arc<Calls>,
}

impl MockPlatform {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config,
            calls: Arc::new(Calls::default()),
        }
    }

    /// Accepts every upload and publish
    pub fn success(name: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            ..Default::default()
        })
    }

    /// Accepts publishes with the given payload
    pub fn responding(name: &str, response: Value) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            response,
            ..Default::default()
        })
    }

    pub fn upload_failure(name: &str, error: MediaError) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            upload_error: Some(error),
            ..Default::default()
        })
    }

    pub fn publish_failure(name: &str, error: PublishError) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            publish_error: Some(error),
            ..Default::default()
        })
    }

    pub fn with_delay(name: &str, delay: Duration) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            delay,
            ..Default::default()
        })
    }

    pub fn upload_count(&self) -> usize {
        self.calls.uploads.load(Ordering::SeqCst)
    }

    pub fn publish_count(&self) -> usize {
        self.calls.publishes.load(Ordering::SeqCst)
    }

    /// Every publish request received, in order
    pub fn published_requests(&self) -> Vec<PublishRequest> {
        self.calls
            .requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    async fn pause(&self) {
        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }
    }
}

#[async_trait]
impl Platform for MockPlatform {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn author_handle(&self, account: &SocialAccount) -> String {
        format!("urn:li:person:{}", account.external_id)
    }

    async fn upload_media(
        &self,
        _media: &MediaPayload,
        _credential: &Credential,
    ) -> std::result::Result<MediaHandle, MediaError> {
        let n = self.calls.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        self.pause().await;

        match &self.config.upload_error {
            Some(error) => Err(error.clone()),
            None => Ok(MediaHandle::new(format!(
                "urn:li:digitalmediaAsset:mock-{}",
                n
            ))),
        }
    }

    async fn publish(
        &self,
        request: &PublishRequest,
        _credential: &Credential,
    ) -> std::result::Result<Value, PublishError> {
        self.calls.publishes.fetch_add(1, Ordering::SeqCst);
        self.calls
            .requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request.clone());
        self.pause().await;

        match &self.config.publish_error {
            Some(error) => Err(error.clone()),
            None => Ok(self.config.response.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExternalFailure;

    fn request() -> PublishRequest {
        PublishRequest {
            author: "urn:li:person:1".to_string(),
            text: "hi".to_string(),
            media: None,
        }
    }

    #[tokio::test]
    async fn test_success_records_requests() {
        let platform = MockPlatform::success("linkedin");
        let clone = platform.clone();

        let response = clone.publish(&request(), &Credential::new("t")).await.unwrap();

        assert_eq!(response["id"], "urn:li:share:mock");
        assert_eq!(platform.publish_count(), 1);
        assert_eq!(platform.published_requests(), vec![request()]);
    }

    #[tokio::test]
    async fn test_publish_failure() {
        let platform = MockPlatform::publish_failure(
            "linkedin",
            PublishError::ExternalPublishFailed(ExternalFailure::Status {
                status: 401,
                body: "expired".to_string(),
            }),
        );

        let result = platform.publish(&request(), &Credential::new("t")).await;
        assert!(matches!(result, Err(PublishError::ExternalPublishFailed(_))));
        assert_eq!(platform.publish_count(), 1);
    }
}
