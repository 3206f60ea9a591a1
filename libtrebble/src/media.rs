//! Media storage and transfer
//!
//! Inbound images are written under the configured media root and referenced
//! by their served URL. When a post is published the reference is resolved
//! again (local file or remote URL), size-checked, and handed to the
//! platform's upload protocol.

use std::path::PathBuf;

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::config::MediaConfig;
use crate::error::{DbError, ExternalFailure, MediaError, Result};
use crate::platforms::Platform;
use crate::types::{Credential, MediaHandle};

const SUFFIX_LEN: usize = 10;

/// Raw bytes of one image plus its MIME type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPayload {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl MediaPayload {
    pub fn new(bytes: Vec<u8>) -> Self {
        let content_type = sniff_content_type(&bytes).to_string();
        Self {
            bytes,
            content_type,
        }
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// MIME type from the image's magic bytes; unknown content is sent as JPEG
pub fn sniff_content_type(bytes: &[u8]) -> &'static str {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ => "image/jpeg",
    }
}

/// Keep only the final path component and drop characters that are unsafe in a file name
fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(char::from)
        .collect()
}

/// Writes inbound images to the media root
#[derive(Debug, Clone)]
pub struct MediaStore {
    config: MediaConfig,
}

impl MediaStore {
    pub fn new(config: MediaConfig) -> Self {
        Self { config }
    }

    /// Store `bytes` as `{account_uid}_{filename}_{suffix}` and return its served URL
    pub async fn save(&self, account_uid: &str, filename: &str, bytes: &[u8]) -> Result<String> {
        let root = self.config.root_path();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(DbError::IoError)?;

        let name = format!(
            "{}_{}_{}",
            sanitize_filename(account_uid),
            sanitize_filename(filename),
            random_suffix()
        );
        tokio::fs::write(root.join(&name), bytes)
            .await
            .map_err(DbError::IoError)?;

        tracing::debug!(file = %name, size = bytes.len(), "Stored inbound media");
        Ok(format!("{}{}", self.config.url_prefix, name))
    }

    /// Delete a stored file; references outside this store are left alone
    pub async fn remove(&self, reference: &str) -> Result<()> {
        let Some(path) = self.local_path(reference) else {
            return Ok(());
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(file = %path.display(), "Removed stored media");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DbError::IoError(e).into()),
        }
    }

    /// Local path for a reference served from this store, if it is one
    pub fn local_path(&self, reference: &str) -> Option<PathBuf> {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return None;
        }
        let name = reference
            .strip_prefix(self.config.url_prefix.as_str())
            .unwrap_or(reference);
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
            return None;
        }
        Some(self.config.root_path().join(name))
    }
}

/// Resolves a media reference to bytes
#[derive(Debug, Clone)]
pub struct MediaFetcher {
    http: reqwest::Client,
    store: MediaStore,
    max_bytes: u64,
}

impl MediaFetcher {
    pub fn new(http: reqwest::Client, config: MediaConfig) -> Self {
        let max_bytes = config.max_image_bytes;
        Self {
            http,
            store: MediaStore::new(config),
            max_bytes,
        }
    }

    /// Fetch the bytes behind `reference` and enforce the size limit
    pub async fn fetch(&self, reference: &str) -> std::result::Result<MediaPayload, MediaError> {
        let bytes = if reference.starts_with("http://") || reference.starts_with("https://") {
            self.fetch_remote(reference).await?
        } else {
            self.fetch_local(reference).await?
        };

        let size = bytes.len() as u64;
        if size > self.max_bytes {
            return Err(MediaError::TooLarge {
                size,
                limit: self.max_bytes,
            });
        }
        Ok(MediaPayload::new(bytes))
    }

    async fn fetch_remote(&self, url: &str) -> std::result::Result<Vec<u8>, MediaError> {
        let mut response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| MediaError::FetchFailed(e.into()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MediaError::FetchFailed(ExternalFailure::Status {
                status: status.as_u16(),
                body,
            }));
        }

        // Refuse early when the server declares an oversized body
        if let Some(size) = response.content_length() {
            if size > self.max_bytes {
                return Err(MediaError::TooLarge {
                    size,
                    limit: self.max_bytes,
                });
            }
        }

        // The declared length is optional; stop reading once past the limit
        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| MediaError::FetchFailed(e.into()))?
        {
            bytes.extend_from_slice(&chunk);
            if bytes.len() as u64 > self.max_bytes {
                return Err(MediaError::TooLarge {
                    size: bytes.len() as u64,
                    limit: self.max_bytes,
                });
            }
        }
        Ok(bytes)
    }

    async fn fetch_local(&self, reference: &str) -> std::result::Result<Vec<u8>, MediaError> {
        let path = self.store.local_path(reference).ok_or_else(|| {
            MediaError::FetchFailed(ExternalFailure::Malformed(format!(
                "unsupported media reference: {}",
                reference
            )))
        })?;

        tokio::fs::read(&path)
            .await
            .map_err(|e| MediaError::FetchFailed(ExternalFailure::Transport(e.to_string())))
    }
}

/// Fetch-then-upload for one publish attempt
#[derive(Debug, Clone)]
pub struct MediaTransfer {
    fetcher: MediaFetcher,
}

impl MediaTransfer {
    pub fn new(fetcher: MediaFetcher) -> Self {
        Self { fetcher }
    }

    /// Upload the media behind `reference`; any failed step aborts the whole transfer
    pub async fn upload(
        &self,
        reference: &str,
        credential: &Credential,
        platform: &dyn Platform,
    ) -> std::result::Result<MediaHandle, MediaError> {
        let payload = self.fetcher.fetch(reference).await?;
        tracing::debug!(
            size = payload.len(),
            content_type = %payload.content_type,
            platform = platform.name(),
            "Uploading media"
        );
        platform.upload_media(&payload, credential).await
    }
}
