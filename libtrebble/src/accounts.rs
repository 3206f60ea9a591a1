//! Read-only access to social accounts and API tokens
//!
//! Accounts and users belong to an external identity provider. The publishing
//! core only resolves them: an account uid to its credential and network
//! identity, and an API bearer token to a user id.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::types::SocialAccount;
use crate::Database;

/// Resolves account references for the validator and the publish path
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn find_account(&self, uid: &str) -> Result<Option<SocialAccount>>;
}

#[async_trait]
impl AccountDirectory for Database {
    async fn find_account(&self, uid: &str) -> Result<Option<SocialAccount>> {
        self.get_account(uid).await
    }
}

/// SHA-256 hex digest of an API token, the form stored in `api_tokens`
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Fresh random API token (32 bytes, URL-safe base64)
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Issue a token for `user_id` and return the plaintext (shown once)
pub async fn issue_token(db: &Database, user_id: &str, label: Option<&str>) -> Result<String> {
    let token = generate_token();
    db.insert_api_token(&hash_token(&token), user_id, label).await?;
    Ok(token)
}

/// Resolve a plaintext bearer token to its user id
pub async fn authenticate_token(db: &Database, token: &str) -> Result<Option<String>> {
    if token.is_empty() {
        return Ok(None);
    }
    db.user_for_token_hash(&hash_token(token)).await
}
