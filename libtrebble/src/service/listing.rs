//! Read-only listing of a user's posts

use chrono::DateTime;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::db::PostQuery;
use crate::error::{Result, TrebbleError};
use crate::types::PostRecord;
use crate::Database;

/// Upper bound on a client-requested page size
pub const MAX_PAGE_SIZE: usize = 100;

/// Paging and filtering requested by the client
#[derive(Debug, Clone, Default)]
pub struct ListRequest {
    pub page_size: Option<usize>,
    /// 1-based
    pub page: Option<usize>,
    pub published: Option<bool>,
}

/// One page of posts, newest first
#[derive(Debug, Clone, Serialize)]
pub struct PostPage {
    pub count: i64,
    pub page: usize,
    pub page_size: usize,
    pub results: Vec<PostView>,
}

impl PostPage {
    pub fn has_next(&self) -> bool {
        (self.page * self.page_size) < self.count as usize
    }
}

/// Client-facing projection of a post record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostView {
    pub uuid: Uuid,
    pub account: String,
    /// RFC 3339
    pub date_published: String,
    pub content: String,
    pub file: Option<String>,
    pub likes: i64,
    pub comments: i64,
    pub shares: i64,
    pub published: bool,
    pub response: Option<Value>,
    pub header: Option<String>,
    pub data: Option<Value>,
}

impl From<PostRecord> for PostView {
    fn from(record: PostRecord) -> Self {
        let date_published = DateTime::from_timestamp(record.date_published, 0)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| record.date_published.to_string());

        Self {
            uuid: record.uuid,
            account: record.account_uid,
            date_published,
            content: record.content,
            file: record.file,
            likes: record.likes,
            comments: record.comments,
            shares: record.shares,
            published: record.published,
            response: record.response,
            header: record.header,
            data: record.data,
        }
    }
}

#[derive(Clone)]
pub struct ListingService {
    db: Database,
    default_page_size: usize,
}

impl ListingService {
    pub fn new(db: Database, default_page_size: usize) -> Self {
        Self {
            db,
            default_page_size,
        }
    }

    /// Posts made through accounts owned by `user_id`
    ///
    /// # Errors
    ///
    /// `TrebbleError::InvalidInput` for a zero page or page size.
    pub async fn list(&self, user_id: &str, request: &ListRequest) -> Result<PostPage> {
        let page_size = request.page_size.unwrap_or(self.default_page_size);
        if page_size == 0 {
            return Err(TrebbleError::InvalidInput(
                "page_size must be at least 1".to_string(),
            ));
        }
        let page_size = page_size.min(MAX_PAGE_SIZE);

        let page = request.page.unwrap_or(1);
        if page == 0 {
            return Err(TrebbleError::InvalidInput("page must be at least 1".to_string()));
        }

        let query = PostQuery {
            published: request.published,
            limit: page_size,
            offset: (page - 1).saturating_mul(page_size),
        };
        let records = self.db.list_posts_for_user(user_id, &query).await?;
        let count = self
            .db
            .count_posts_for_user(user_id, request.published)
            .await?;

        Ok(PostPage {
            count,
            page,
            page_size,
            results: records.into_iter().map(PostView::from).collect(),
        })
    }
}
