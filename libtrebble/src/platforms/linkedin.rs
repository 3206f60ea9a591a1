//! LinkedIn platform implementation
//!
//! Posts go through the UGC Posts API. An image is uploaded first as a
//! digital media asset in three round trips:
//!
//! 1. register the upload, which answers with an upload URL and a finalize URL
//! 2. PUT the raw bytes to the upload URL
//! 3. POST to the finalize URL, which answers with the asset id
//!
//! The asset id is attached to the post as a `READY` media block. Every call
//! carries the account's bearer token and the Rest.li protocol header.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::config::LinkedInConfig;
use crate::error::{ExternalFailure, MediaError, PublishError, Result};
use crate::media::MediaPayload;
use crate::platforms::{build_http_client, Platform, PublishRequest};
use crate::types::{Credential, MediaHandle, SocialAccount};

const RESTLI_HEADER: &str = "x-restli-protocol-version";
const UPLOAD_TYPE_HEADER: &str = "x-upload-content-type";
const UPLOAD_LENGTH_HEADER: &str = "x-upload-content-length";
const RESTLI_ID_HEADER: &str = "x-restli-id";

#[derive(Debug, Deserialize)]
struct RegisterUploadResponse {
    value: RegisterUploadValue,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterUploadValue {
    upload_mechanism: UploadMechanism,
    complete_upload_request: UploadUrl,
}

#[derive(Debug, Deserialize)]
struct UploadMechanism {
    #[serde(rename = "com.linkedin.digitalmedia.uploading.MediaUploadHttpRequest")]
    http_request: UploadUrl,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadUrl {
    upload_url: String,
}

#[derive(Debug, Deserialize)]
struct FinalizeResponse {
    value: FinalizeValue,
}

#[derive(Debug, Deserialize)]
struct FinalizeValue {
    id: String,
}

/// Where the bytes go and how to finalize them
#[derive(Debug)]
struct UploadTicket {
    upload_url: String,
    finalize_url: String,
}

pub struct LinkedInPlatform {
    http: reqwest::Client,
    config: LinkedInConfig,
}

impl LinkedInPlatform {
    pub fn new(config: &LinkedInConfig) -> Result<Self> {
        let http = build_http_client(config.timeout_secs)?;
        Ok(Self::with_client(http, config.clone()))
    }

    pub fn with_client(http: reqwest::Client, config: LinkedInConfig) -> Self {
        Self { http, config }
    }

    fn headers(&self, credential: &Credential) -> std::result::Result<HeaderMap, ExternalFailure> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&credential.bearer_header())
            .map_err(|_| ExternalFailure::Malformed("credential is not a valid header".into()))?;
        headers.insert(AUTHORIZATION, bearer);
        let restli = HeaderValue::from_str(&self.config.restli_protocol_version)
            .map_err(|_| ExternalFailure::Malformed("invalid Rest.li protocol version".into()))?;
        headers.insert(RESTLI_HEADER, restli);
        Ok(headers)
    }

    fn upload_headers(
        &self,
        media: &MediaPayload,
        credential: &Credential,
    ) -> std::result::Result<HeaderMap, ExternalFailure> {
        let mut headers = self.headers(credential)?;
        let content_type = HeaderValue::from_str(&media.content_type)
            .map_err(|_| ExternalFailure::Malformed("invalid content type".into()))?;
        headers.insert(UPLOAD_TYPE_HEADER, content_type);
        headers.insert(UPLOAD_LENGTH_HEADER, HeaderValue::from(media.len()));
        Ok(headers)
    }

    async fn register_upload(
        &self,
        media: &MediaPayload,
        credential: &Credential,
    ) -> std::result::Result<UploadTicket, ExternalFailure> {
        let response = self
            .http
            .post(&self.config.register_upload_url)
            .headers(self.upload_headers(media, credential)?)
            .send()
            .await?;

        let body = success_body(response).await?;
        let parsed: RegisterUploadResponse = serde_json::from_str(&body)
            .map_err(|e| ExternalFailure::Malformed(format!("register upload: {}", e)))?;

        Ok(UploadTicket {
            upload_url: parsed.value.upload_mechanism.http_request.upload_url,
            finalize_url: parsed.value.complete_upload_request.upload_url,
        })
    }

    async fn transfer(
        &self,
        ticket: &UploadTicket,
        media: &MediaPayload,
        credential: &Credential,
    ) -> std::result::Result<(), ExternalFailure> {
        let response = self
            .http
            .put(&ticket.upload_url)
            .headers(self.upload_headers(media, credential)?)
            .header(CONTENT_TYPE, media.content_type.as_str())
            .body(media.bytes.clone())
            .send()
            .await?;

        success_body(response).await.map(|_| ())
    }

    async fn finalize(
        &self,
        ticket: &UploadTicket,
        media: &MediaPayload,
        credential: &Credential,
    ) -> std::result::Result<MediaHandle, ExternalFailure> {
        let response = self
            .http
            .post(&ticket.finalize_url)
            .headers(self.upload_headers(media, credential)?)
            .send()
            .await?;

        let body = success_body(response).await?;
        let parsed: FinalizeResponse = serde_json::from_str(&body)
            .map_err(|e| ExternalFailure::Malformed(format!("finalize upload: {}", e)))?;
        Ok(MediaHandle::new(parsed.value.id))
    }
}

/// Body of a successful response, or the status and body of a failed one
async fn success_body(response: reqwest::Response) -> std::result::Result<String, ExternalFailure> {
    let status = response.status();
    let body = response.text().await?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(ExternalFailure::Status {
            status: status.as_u16(),
            body,
        })
    }
}

/// UGC post body for `request`
pub fn build_payload(request: &PublishRequest) -> Value {
    let mut share = json!({
        "shareCommentary": { "text": request.text },
        "shareMediaCategory": "NONE",
    });

    if let Some(media) = &request.media {
        share["shareMediaCategory"] = json!("IMAGE");
        share["media"] = json!([{ "status": "READY", "media": media.as_str() }]);
    }

    json!({
        "author": request.author,
        "lifecycleState": "PUBLISHED",
        "specificContent": { "com.linkedin.ugc.ShareContent": share },
        "visibility": { "com.linkedin.ugc.MemberNetworkVisibility": "PUBLIC" },
    })
}

#[async_trait]
impl Platform for LinkedInPlatform {
    fn name(&self) -> &str {
        "linkedin"
    }

    fn author_handle(&self, account: &SocialAccount) -> String {
        format!("urn:li:person:{}", account.external_id)
    }

    async fn upload_media(
        &self,
        media: &MediaPayload,
        credential: &Credential,
    ) -> std::result::Result<MediaHandle, MediaError> {
        let ticket = self
            .register_upload(media, credential)
            .await
            .map_err(MediaError::UploadFailed)?;
        tracing::debug!("LinkedIn upload registered");

        self.transfer(&ticket, media, credential)
            .await
            .map_err(MediaError::UploadFailed)?;

        let handle = self
            .finalize(&ticket, media, credential)
            .await
            .map_err(MediaError::UploadIncomplete)?;
        tracing::debug!(asset = handle.as_str(), "LinkedIn upload finalized");
        Ok(handle)
    }

    async fn publish(
        &self,
        request: &PublishRequest,
        credential: &Credential,
    ) -> std::result::Result<Value, PublishError> {
        let headers = self
            .headers(credential)
            .map_err(PublishError::ExternalPublishFailed)?;

        let response = self
            .http
            .post(&self.config.publish_url)
            .headers(headers)
            .json(&build_payload(request))
            .send()
            .await
            .map_err(|e| PublishError::ExternalPublishFailed(e.into()))?;

        let status = response.status();
        let restli_id = response
            .headers()
            .get(RESTLI_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::ExternalPublishFailed(ExternalFailure::Status {
                status: status.as_u16(),
                body,
            }));
        }

        // The post exists from here on; a lost body must not fail the publish
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!(
                    restli_id = restli_id.as_deref().unwrap_or("-"),
                    "Post accepted but its response body could not be read: {}",
                    e
                );
                String::new()
            }
        };

        let payload = if body.trim().is_empty() {
            json!({ "id": restli_id })
        } else {
            serde_json::from_str(&body).unwrap_or(Value::String(body))
        };
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn platform(server: &MockServer) -> LinkedInPlatform {
        let config = LinkedInConfig {
            register_upload_url: format!("{}/v2/assets", server.uri()),
            publish_url: format!("{}/v2/ugcPosts", server.uri()),
            restli_protocol_version: "2.0.0".to_string(),
            timeout_secs: 5,
        };
        LinkedInPlatform::new(&config).unwrap()
    }

    fn account() -> SocialAccount {
        SocialAccount {
            uid: "A1".to_string(),
            user_id: "user-1".to_string(),
            provider: "linkedin".to_string(),
            external_id: "xgLGs07jZ7".to_string(),
            credential: Credential::new("tok"),
            created_at: 0,
        }
    }

    fn jpeg() -> MediaPayload {
        MediaPayload::new(vec![0xff, 0xd8, 0xff, 0xe0])
    }

    async fn mount_register(server: &MockServer) {
        let body = json!({
            "value": {
                "uploadMechanism": {
                    "com.linkedin.digitalmedia.uploading.MediaUploadHttpRequest": {
                        "uploadUrl": format!("{}/upload/1", server.uri())
                    }
                },
                "completeUploadRequest": {
                    "uploadUrl": format!("{}/complete/1", server.uri())
                }
            }
        });
        Mock::given(method("POST"))
            .and(path("/v2/assets"))
            .and(header("authorization", "Bearer tok"))
            .and(header("x-restli-protocol-version", "2.0.0"))
            .and(header("x-upload-content-type", "image/jpeg"))
            .and(header("x-upload-content-length", "4"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[test]
    fn test_payload_without_media() {
        let payload = build_payload(&PublishRequest {
            author: "urn:li:person:abc".to_string(),
            text: "Hello world".to_string(),
            media: None,
        });

        assert_eq!(payload["author"], "urn:li:person:abc");
        assert_eq!(payload["lifecycleState"], "PUBLISHED");
        let share = &payload["specificContent"]["com.linkedin.ugc.ShareContent"];
        assert_eq!(share["shareCommentary"]["text"], "Hello world");
        assert_eq!(share["shareMediaCategory"], "NONE");
        assert!(share.get("media").is_none());
        assert_eq!(
            payload["visibility"]["com.linkedin.ugc.MemberNetworkVisibility"],
            "PUBLIC"
        );
    }

    #[test]
    fn test_payload_with_media() {
        let payload = build_payload(&PublishRequest {
            author: "urn:li:person:abc".to_string(),
            text: "pic".to_string(),
            media: Some(MediaHandle::new("urn:li:digitalmediaAsset:C5")),
        });

        let share = &payload["specificContent"]["com.linkedin.ugc.ShareContent"];
        assert_eq!(share["shareMediaCategory"], "IMAGE");
        assert_eq!(
            share["media"],
            json!([{ "status": "READY", "media": "urn:li:digitalmediaAsset:C5" }])
        );
    }

    #[test]
    fn test_author_handle() {
        let config = LinkedInConfig::default();
        let platform = LinkedInPlatform::new(&config).unwrap();
        assert_eq!(platform.author_handle(&account()), "urn:li:person:xgLGs07jZ7");
    }

    #[tokio::test]
    async fn test_upload_three_steps() {
        let server = MockServer::start().await;
        mount_register(&server).await;
        Mock::given(method("PUT"))
            .and(path("/upload/1"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/complete/1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"value": {"id": "urn:li:digitalmediaAsset:C5"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let handle = platform(&server)
            .upload_media(&jpeg(), &Credential::new("tok"))
            .await
            .unwrap();

        assert_eq!(handle.as_str(), "urn:li:digitalmediaAsset:C5");
    }

    #[tokio::test]
    async fn test_register_failure_stops_upload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/assets"))
            .respond_with(ResponseTemplate::new(401).set_body_string("{\"status\":401}"))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let err = platform(&server)
            .upload_media(&jpeg(), &Credential::new("tok"))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            MediaError::UploadFailed(ExternalFailure::Status {
                status: 401,
                body: "{\"status\":401}".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_transfer_failure_is_upload_failed() {
        let server = MockServer::start().await;
        mount_register(&server).await;
        Mock::given(method("PUT"))
            .and(path("/upload/1"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/complete/1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = platform(&server)
            .upload_media(&jpeg(), &Credential::new("tok"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::UploadFailed(_)));
    }

    #[tokio::test]
    async fn test_finalize_failure_is_upload_incomplete() {
        let server = MockServer::start().await;
        mount_register(&server).await;
        Mock::given(method("PUT"))
            .and(path("/upload/1"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/complete/1"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad"))
            .mount(&server)
            .await;

        let err = platform(&server)
            .upload_media(&jpeg(), &Credential::new("tok"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::UploadIncomplete(_)));
    }

    #[tokio::test]
    async fn test_publish_sends_payload_and_returns_body() {
        let server = MockServer::start().await;
        let request = PublishRequest {
            author: "urn:li:person:xgLGs07jZ7".to_string(),
            text: "Hello world".to_string(),
            media: None,
        };
        Mock::given(method("POST"))
            .and(path("/v2/ugcPosts"))
            .and(header("authorization", "Bearer tok"))
            .and(header("x-restli-protocol-version", "2.0.0"))
            .and(body_json(build_payload(&request)))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"id": "urn:li:share:42"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let response = platform(&server)
            .publish(&request, &Credential::new("tok"))
            .await
            .unwrap();
        assert_eq!(response, json!({"id": "urn:li:share:42"}));
    }

    #[tokio::test]
    async fn test_publish_empty_body_uses_restli_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/ugcPosts"))
            .respond_with(ResponseTemplate::new(201).insert_header("x-restli-id", "urn:li:share:7"))
            .mount(&server)
            .await;

        let request = PublishRequest {
            author: "urn:li:person:1".to_string(),
            text: "x".to_string(),
            media: None,
        };
        let response = platform(&server)
            .publish(&request, &Credential::new("tok"))
            .await
            .unwrap();
        assert_eq!(response, json!({"id": "urn:li:share:7"}));
    }

    #[tokio::test]
    async fn test_publish_truncated_body_uses_restli_id() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // Accepts the post, then drops the connection partway through the body
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_lowercase();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            socket
                .write_all(
                    b"HTTP/1.1 201 Created\r\nx-restli-id: urn:li:share:8\r\n\
                      content-length: 64\r\n\r\n{\"id\":",
                )
                .await
                .unwrap();
            socket.shutdown().await.unwrap();
        });

        let config = LinkedInConfig {
            register_upload_url: format!("http://{}/v2/assets", addr),
            publish_url: format!("http://{}/v2/ugcPosts", addr),
            restli_protocol_version: "2.0.0".to_string(),
            timeout_secs: 5,
        };
        let request = PublishRequest {
            author: "urn:li:person:1".to_string(),
            text: "x".to_string(),
            media: None,
        };
        let response = LinkedInPlatform::new(&config)
            .unwrap()
            .publish(&request, &Credential::new("tok"))
            .await
            .unwrap();

        assert_eq!(response, json!({"id": "urn:li:share:8"}));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_rejection_keeps_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/ugcPosts"))
            .respond_with(
                ResponseTemplate::new(422).set_body_string("{\"message\":\"duplicate\"}"),
            )
            .mount(&server)
            .await;

        let request = PublishRequest {
            author: "urn:li:person:1".to_string(),
            text: "x".to_string(),
            media: None,
        };
        let err = platform(&server)
            .publish(&request, &Credential::new("tok"))
            .await
            .unwrap_err();

        match err {
            PublishError::ExternalPublishFailed(ExternalFailure::Status { status, body }) => {
                assert_eq!(status, 422);
                assert!(body.contains("duplicate"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
