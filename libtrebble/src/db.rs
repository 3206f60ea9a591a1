//! Database operations for Trebble

use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{DbError, Result};
use crate::types::{Credential, PostRecord, ScheduleEntry, ScheduleStatus, SocialAccount};

/// Filters for listing a user's posts
#[derive(Debug, Clone)]
pub struct PostQuery {
    pub published: Option<bool>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for PostQuery {
    fn default() -> Self {
        Self {
            published: None,
            limit: 9,
            offset: 0,
        }
    }
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

const POST_COLUMNS: &str = "p.uuid, p.account_uid, p.content, p.file, p.scheduled_time, \
     p.published, p.response, p.date_published, p.created_at, p.likes, p.comments, \
     p.shares, p.header, p.data";

const ENTRY_COLUMNS: &str =
    "id, post_uuid, account_uid, fire_at, status, attempts, last_error, created_at, claimed_at";

impl Database {
    /// Open (creating if needed) the database at `db_path` and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // Connection options apply to every connection the pool opens
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(DbError::SqlxError)?;

        Self::migrate(pool).await
    }

    /// Private in-memory database
    ///
    /// Limited to one connection: every SQLite memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(DbError::SqlxError)?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(DbError::SqlxError)?;

        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    // ------------------------------------------------------------------
    // Accounts and API tokens
    // ------------------------------------------------------------------

    pub async fn insert_account(&self, account: &SocialAccount) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO social_accounts (uid, user_id, provider, external_id, access_token, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&account.uid)
        .bind(&account.user_id)
        .bind(&account.provider)
        .bind(&account.external_id)
        .bind(account.credential.expose())
        .bind(account.created_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_account(&self, uid: &str) -> Result<Option<SocialAccount>> {
        let row = sqlx::query(
            r#"
            SELECT uid, user_id, provider, external_id, access_token, created_at
            FROM social_accounts WHERE uid = ?
            "#,
        )
        .bind(uid)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.map(|r| account_from_row(&r)))
    }

    /// Accounts, optionally restricted to one user, oldest first
    pub async fn list_accounts(&self, user_id: Option<&str>) -> Result<Vec<SocialAccount>> {
        let rows = match user_id {
            Some(user) => {
                sqlx::query(
                    r#"
                    SELECT uid, user_id, provider, external_id, access_token, created_at
                    FROM social_accounts WHERE user_id = ? ORDER BY created_at, uid
                    "#,
                )
                .bind(user)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT uid, user_id, provider, external_id, access_token, created_at
                    FROM social_accounts ORDER BY created_at, uid
                    "#,
                )
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(DbError::SqlxError)?;

        Ok(rows.iter().map(account_from_row).collect())
    }

    /// Replace an account's bearer token; false if the account does not exist
    pub async fn update_account_token(&self, uid: &str, credential: &Credential) -> Result<bool> {
        let result = sqlx::query("UPDATE social_accounts SET access_token = ? WHERE uid = ?")
            .bind(credential.expose())
            .bind(uid)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn insert_api_token(
        &self,
        token_hash: &str,
        user_id: &str,
        label: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO api_tokens (token_hash, user_id, label, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(token_hash)
        .bind(user_id)
        .bind(label)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn user_for_token_hash(&self, token_hash: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT user_id FROM api_tokens WHERE token_hash = ?")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(row.map(|r| r.get("user_id")))
    }

    // ------------------------------------------------------------------
    // Post records
    // ------------------------------------------------------------------

    pub async fn create_post(&self, post: &PostRecord) -> Result<()> {
        let response = post.response.as_ref().map(Value::to_string);
        let data = post.data.as_ref().map(Value::to_string);

        sqlx::query(
            r#"
            INSERT INTO social_posts (uuid, account_uid, content, file, scheduled_time, published,
                response, date_published, created_at, likes, comments, shares, header, data)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(post.uuid.to_string())
        .bind(&post.account_uid)
        .bind(&post.content)
        .bind(&post.file)
        .bind(post.scheduled_time)
        .bind(post.published)
        .bind(response)
        .bind(post.date_published)
        .bind(post.created_at)
        .bind(post.likes)
        .bind(post.comments)
        .bind(post.shares)
        .bind(&post.header)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_post(&self, uuid: &Uuid) -> Result<Option<PostRecord>> {
        let query = format!("SELECT {} FROM social_posts p WHERE p.uuid = ?", POST_COLUMNS);
        let row = sqlx::query(&query)
            .bind(uuid.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(post_from_row).transpose()
    }

    /// Record a successful publish
    ///
    /// Sets `response`, `published` and `date_published` in one statement, and
    /// only if the record is still unpublished. `date_published` never moves
    /// backwards. Returns false when the record was already published (or is
    /// gone), i.e. another attempt won.
    pub async fn mark_published(&self, uuid: &Uuid, response: &Value, now: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE social_posts
            SET response = ?, published = 1, date_published = MAX(date_published, ?)
            WHERE uuid = ? AND published = 0
            "#,
        )
        .bind(response.to_string())
        .bind(now)
        .bind(uuid.to_string())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Posts whose account belongs to `user_id`, newest first
    ///
    /// Ties on `created_at` fall back to insertion order, so repeated reads
    /// return the same sequence.
    pub async fn list_posts_for_user(
        &self,
        user_id: &str,
        query: &PostQuery,
    ) -> Result<Vec<PostRecord>> {
        let mut sql = format!(
            r#"
            SELECT {}
            FROM social_posts p
            JOIN social_accounts a ON a.uid = p.account_uid
            WHERE a.user_id = ?
            "#,
            POST_COLUMNS
        );
        if query.published.is_some() {
            sql.push_str(" AND p.published = ?");
        }
        sql.push_str(" ORDER BY p.created_at DESC, p.seq DESC LIMIT ? OFFSET ?");

        let mut q = sqlx::query(&sql).bind(user_id);
        if let Some(published) = query.published {
            q = q.bind(published);
        }
        let rows = q
            .bind(query.limit as i64)
            .bind(query.offset as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(post_from_row).collect()
    }

    /// Number of posts `list_posts_for_user` would page through
    pub async fn count_posts_for_user(&self, user_id: &str, published: Option<bool>) -> Result<i64> {
        let mut sql = String::from(
            r#"
            SELECT COUNT(*) AS n
            FROM social_posts p
            JOIN social_accounts a ON a.uid = p.account_uid
            WHERE a.user_id = ?
            "#,
        );
        if published.is_some() {
            sql.push_str(" AND p.published = ?");
        }

        let mut q = sqlx::query(&sql).bind(user_id);
        if let Some(published) = published {
            q = q.bind(published);
        }
        let row = q.fetch_one(&self.pool).await.map_err(DbError::SqlxError)?;

        Ok(row.get("n"))
    }

    /// Whether any post record points at the media `reference`
    pub async fn media_referenced(&self, reference: &str) -> Result<bool> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM social_posts WHERE file = ?) AS found")
            .bind(reference)
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(row.get::<i64, _>("found") != 0)
    }

    /// Unpublished posts whose due time has passed
    pub async fn stranded_posts(&self, now: i64) -> Result<Vec<PostRecord>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM social_posts p
            WHERE p.published = 0 AND COALESCE(p.scheduled_time, p.created_at) < ?
            ORDER BY p.created_at, p.seq
            "#,
            POST_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(post_from_row).collect()
    }

    // ------------------------------------------------------------------
    // Schedule entries
    // ------------------------------------------------------------------

    pub async fn insert_schedule_entry(&self, entry: &ScheduleEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO schedule_entries (id, post_uuid, account_uid, fire_at, status, attempts,
                last_error, created_at, claimed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(entry.post_uuid.to_string())
        .bind(&entry.account_uid)
        .bind(entry.fire_at)
        .bind(entry.status.as_str())
        .bind(entry.attempts)
        .bind(&entry.last_error)
        .bind(entry.created_at)
        .bind(entry.claimed_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_schedule_entry(&self, id: &Uuid) -> Result<Option<ScheduleEntry>> {
        let sql = format!("SELECT {} FROM schedule_entries WHERE id = ?", ENTRY_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(entry_from_row).transpose()
    }

    pub async fn schedule_entries_for_post(&self, post_uuid: &Uuid) -> Result<Vec<ScheduleEntry>> {
        let sql = format!(
            "SELECT {} FROM schedule_entries WHERE post_uuid = ? ORDER BY created_at",
            ENTRY_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(post_uuid.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(entry_from_row).collect()
    }

    /// Atomically claim the next due entry
    ///
    /// Picks the earliest `pending` entry whose `fire_at` is at or before
    /// `due_by`, or a `firing` entry claimed before `stale_before` (its worker
    /// died mid-attempt), and stamps it with `claimed_at`. A single
    /// UPDATE ... RETURNING, so two dispatchers never claim the same entry.
    ///
    /// Entries are claimed one at a time, right before they are fired, so a
    /// claim never sits waiting behind a slow publish and goes stale.
    pub async fn claim_next_due_entry(
        &self,
        due_by: i64,
        claimed_at: i64,
        stale_before: i64,
    ) -> Result<Option<ScheduleEntry>> {
        let sql = format!(
            r#"
            UPDATE schedule_entries
            SET status = 'firing', claimed_at = ?, attempts = attempts + 1
            WHERE id = (
                SELECT id FROM schedule_entries
                WHERE (status = 'pending' AND fire_at <= ?)
                   OR (status = 'firing' AND claimed_at < ?)
                ORDER BY fire_at
                LIMIT 1
            )
            RETURNING {}
            "#,
            ENTRY_COLUMNS
        );

        let row = sqlx::query(&sql)
            .bind(claimed_at)
            .bind(due_by)
            .bind(stale_before)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(entry_from_row).transpose()
    }

    /// Close out a claimed entry as `done` or `failed`
    pub async fn finish_schedule_entry(
        &self,
        id: &Uuid,
        status: ScheduleStatus,
        last_error: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE schedule_entries SET status = ?, last_error = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(last_error)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Count of entries per status, for the daemon's startup log
    pub async fn schedule_counts(&self) -> Result<Vec<(ScheduleStatus, i64)>> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM schedule_entries GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter()
            .map(|r| -> Result<(ScheduleStatus, i64)> {
                let status: String = r.get("status");
                let status = ScheduleStatus::parse(&status).ok_or_else(|| DbError::CorruptRow {
                    table: "schedule_entries",
                    reason: format!("unknown status {}", status),
                })?;
                Ok((status, r.get::<i64, _>("n")))
            })
            .collect()
    }
}

fn account_from_row(r: &SqliteRow) -> SocialAccount {
    SocialAccount {
        uid: r.get("uid"),
        user_id: r.get("user_id"),
        provider: r.get("provider"),
        external_id: r.get("external_id"),
        credential: Credential::new(r.get::<String, _>("access_token")),
        created_at: r.get("created_at"),
    }
}

fn parse_uuid(table: &'static str, raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| {
        DbError::CorruptRow {
            table,
            reason: format!("bad uuid {}: {}", raw, e),
        }
        .into()
    })
}

fn parse_json(table: &'static str, raw: Option<String>) -> Result<Option<Value>> {
    raw.map(|text| {
        serde_json::from_str(&text).map_err(|e| {
            DbError::CorruptRow {
                table,
                reason: format!("bad json: {}", e),
            }
            .into()
        })
    })
    .transpose()
}

fn post_from_row(r: &SqliteRow) -> Result<PostRecord> {
    Ok(PostRecord {
        uuid: parse_uuid("social_posts", &r.get::<String, _>("uuid"))?,
        account_uid: r.get("account_uid"),
        content: r.get("content"),
        file: r.get("file"),
        scheduled_time: r.get("scheduled_time"),
        published: r.get::<i64, _>("published") != 0,
        response: parse_json("social_posts", r.get("response"))?,
        date_published: r.get("date_published"),
        created_at: r.get("created_at"),
        likes: r.get("likes"),
        comments: r.get("comments"),
        shares: r.get("shares"),
        header: r.get("header"),
        data: parse_json("social_posts", r.get("data"))?,
    })
}

fn entry_from_row(r: &SqliteRow) -> Result<ScheduleEntry> {
    let status: String = r.get("status");
    Ok(ScheduleEntry {
        id: parse_uuid("schedule_entries", &r.get::<String, _>("id"))?,
        post_uuid: parse_uuid("schedule_entries", &r.get::<String, _>("post_uuid"))?,
        account_uid: r.get("account_uid"),
        fire_at: r.get("fire_at"),
        status: ScheduleStatus::parse(&status).ok_or_else(|| DbError::CorruptRow {
            table: "schedule_entries",
            reason: format!("unknown status {}", status),
        })?,
        attempts: r.get("attempts"),
        last_error: r.get("last_error"),
        created_at: r.get("created_at"),
        claimed_at: r.get("claimed_at"),
    })
}
