//! FeedMessage repository (spec §3, §4.4).

use crate::error::{Result, StoreError};
use crate::model::FeedMessage;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

/// Everything needed to upsert a FeedMessage; `id` is assigned by the
/// database.
#[derive(Debug, Clone)]
pub struct NewFeedMessage {
    pub subsystem_name: String,
    pub message_id: String,
    pub message_id_header: String,
    pub in_reply_to_header: Option<String>,
    pub subject: String,
    pub author: String,
    pub author_email: String,
    pub content: String,
    pub url: String,
    pub received_at: DateTime<Utc>,
    pub is_patch: bool,
    pub is_reply: bool,
    pub is_series_patch: bool,
    pub patch_version: Option<String>,
    pub patch_index: i64,
    pub patch_total: i64,
    pub is_cover_letter: bool,
    pub series_message_id: Option<String>,
}

#[derive(Clone)]
pub struct FeedMessageRepository {
    pool: SqlitePool,
}

impl FeedMessageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subsystem_name TEXT NOT NULL,
                message_id TEXT NOT NULL,
                message_id_header TEXT NOT NULL UNIQUE,
                in_reply_to_header TEXT,
                subject TEXT NOT NULL,
                author TEXT NOT NULL,
                author_email TEXT NOT NULL,
                content TEXT NOT NULL,
                url TEXT NOT NULL,
                received_at TEXT NOT NULL,
                is_patch INTEGER NOT NULL DEFAULT 0,
                is_reply INTEGER NOT NULL DEFAULT 0,
                is_series_patch INTEGER NOT NULL DEFAULT 0,
                patch_version TEXT,
                patch_index INTEGER NOT NULL DEFAULT 0,
                patch_total INTEGER NOT NULL DEFAULT 0,
                is_cover_letter INTEGER NOT NULL DEFAULT 0,
                series_message_id TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_feed_messages_series
                ON feed_messages(series_message_id);
            CREATE INDEX IF NOT EXISTS idx_feed_messages_subsystem_received
                ON feed_messages(subsystem_name, received_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Schema(e.to_string()))?;
        Ok(())
    }

    /// Upsert keyed on `message_id_header`. On a concurrent-insert
    /// conflict the row is re-read and its derived fields updated, never
    /// its identity (spec §4.4 write path, step 1).
    pub async fn upsert(&self, new: NewFeedMessage) -> Result<FeedMessage> {
        sqlx::query(
            r#"
            INSERT INTO feed_messages (
                subsystem_name, message_id, message_id_header, in_reply_to_header,
                subject, author, author_email, content, url, received_at,
                is_patch, is_reply, is_series_patch, patch_version, patch_index,
                patch_total, is_cover_letter, series_message_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(message_id_header) DO UPDATE SET
                subject = excluded.subject,
                author = excluded.author,
                author_email = excluded.author_email,
                content = excluded.content,
                url = excluded.url,
                received_at = excluded.received_at,
                is_patch = excluded.is_patch,
                is_reply = excluded.is_reply,
                is_series_patch = excluded.is_series_patch,
                patch_version = excluded.patch_version,
                patch_index = excluded.patch_index,
                patch_total = excluded.patch_total,
                is_cover_letter = excluded.is_cover_letter,
                series_message_id = excluded.series_message_id,
                in_reply_to_header = excluded.in_reply_to_header
            "#,
        )
        .bind(&new.subsystem_name)
        .bind(&new.message_id)
        .bind(&new.message_id_header)
        .bind(&new.in_reply_to_header)
        .bind(&new.subject)
        .bind(&new.author)
        .bind(&new.author_email)
        .bind(&new.content)
        .bind(&new.url)
        .bind(new.received_at.to_rfc3339())
        .bind(new.is_patch as i64)
        .bind(new.is_reply as i64)
        .bind(new.is_series_patch as i64)
        .bind(&new.patch_version)
        .bind(new.patch_index)
        .bind(new.patch_total)
        .bind(new.is_cover_letter as i64)
        .bind(&new.series_message_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        self.find_by_message_id_header(&new.message_id_header)
            .await?
            .ok_or_else(|| StoreError::Query("row vanished after upsert".into()).into())
    }

    pub async fn find_by_message_id_header(&self, header: &str) -> Result<Option<FeedMessage>> {
        let row = sqlx::query("SELECT * FROM feed_messages WHERE message_id_header = ?")
            .bind(header)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        row.map(row_to_feed_message).transpose()
    }

    /// Sub-patches of a series, sorted by `patch_index`, excluding the
    /// cover letter itself (spec §4.5 rule 5).
    pub async fn find_sub_patches(&self, series_message_id: &str) -> Result<Vec<FeedMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM feed_messages
            WHERE series_message_id = ? AND patch_index != 0 AND message_id_header != ?
            ORDER BY patch_index ASC
            "#,
        )
        .bind(series_message_id)
        .bind(series_message_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        rows.into_iter().map(row_to_feed_message).collect()
    }

    /// Messages whose `in_reply_to_header` contains, as a substring, any
    /// id in `frontier` — the BFS step of reply-hierarchy reconstruction
    /// (spec §4.7 step 1).
    pub async fn find_replies_to_any(&self, frontier: &[String]) -> Result<Vec<FeedMessage>> {
        if frontier.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders: Vec<String> = frontier
            .iter()
            .map(|_| "in_reply_to_header LIKE '%' || ? || '%'".to_string())
            .collect();
        let sql = format!(
            "SELECT * FROM feed_messages WHERE in_reply_to_header IS NOT NULL AND ({})",
            placeholders.join(" OR ")
        );
        let mut query = sqlx::query(&sql);
        for id in frontier {
            query = query.bind(id);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        rows.into_iter().map(row_to_feed_message).collect()
    }

    /// The newest `received_at` seen for a subsystem, used to seed the
    /// poller's high-water mark (spec §4.1).
    pub async fn max_received_at(&self, subsystem: &str) -> Result<Option<DateTime<Utc>>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT MAX(received_at) FROM feed_messages WHERE subsystem_name = ?")
                .bind(subsystem)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(row
            .and_then(|(raw,)| raw)
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|dt| dt.with_timezone(&Utc)))
    }
}

fn row_to_feed_message(row: sqlx::sqlite::SqliteRow) -> Result<FeedMessage> {
    let received_at_raw: String = row
        .try_get("received_at")
        .map_err(|e| StoreError::Query(e.to_string()))?;
    let received_at = DateTime::parse_from_rfc3339(&received_at_raw)
        .map_err(|e| StoreError::Query(format!("bad received_at: {e}")))?
        .with_timezone(&Utc);

    Ok(FeedMessage {
        id: row.try_get("id").map_err(|e| StoreError::Query(e.to_string()))?,
        subsystem_name: row
            .try_get("subsystem_name")
            .map_err(|e| StoreError::Query(e.to_string()))?,
        message_id: row.try_get("message_id").map_err(|e| StoreError::Query(e.to_string()))?,
        message_id_header: row
            .try_get("message_id_header")
            .map_err(|e| StoreError::Query(e.to_string()))?,
        in_reply_to_header: row
            .try_get("in_reply_to_header")
            .map_err(|e| StoreError::Query(e.to_string()))?,
        subject: row.try_get("subject").map_err(|e| StoreError::Query(e.to_string()))?,
        author: row.try_get("author").map_err(|e| StoreError::Query(e.to_string()))?,
        author_email: row
            .try_get("author_email")
            .map_err(|e| StoreError::Query(e.to_string()))?,
        content: row.try_get("content").map_err(|e| StoreError::Query(e.to_string()))?,
        url: row.try_get("url").map_err(|e| StoreError::Query(e.to_string()))?,
        received_at,
        is_patch: row.try_get::<i64, _>("is_patch").map_err(|e| StoreError::Query(e.to_string()))? != 0,
        is_reply: row.try_get::<i64, _>("is_reply").map_err(|e| StoreError::Query(e.to_string()))? != 0,
        is_series_patch: row
            .try_get::<i64, _>("is_series_patch")
            .map_err(|e| StoreError::Query(e.to_string()))?
            != 0,
        patch_version: row
            .try_get("patch_version")
            .map_err(|e| StoreError::Query(e.to_string()))?,
        patch_index: row.try_get("patch_index").map_err(|e| StoreError::Query(e.to_string()))?,
        patch_total: row.try_get("patch_total").map_err(|e| StoreError::Query(e.to_string()))?,
        is_cover_letter: row
            .try_get::<i64, _>("is_cover_letter")
            .map_err(|e| StoreError::Query(e.to_string()))?
            != 0,
        series_message_id: row
            .try_get("series_message_id")
            .map_err(|e| StoreError::Query(e.to_string()))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    fn sample(header: &str, subject: &str) -> NewFeedMessage {
        NewFeedMessage {
            subsystem_name: "linux-mm".into(),
            message_id: header.into(),
            message_id_header: header.into(),
            in_reply_to_header: None,
            subject: subject.into(),
            author: "Alice <a@ex.com>".into(),
            author_email: "a@ex.com".into(),
            content: "body".into(),
            url: format!("https://lore.kernel.org/linux-mm/{header}/"),
            received_at: Utc::now(),
            is_patch: true,
            is_reply: false,
            is_series_patch: false,
            patch_version: None,
            patch_index: 0,
            patch_total: 0,
            is_cover_letter: false,
            series_message_id: None,
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_on_message_id_header() {
        let store = Store::connect_in_memory().await.unwrap();
        let repo = &store.feed_messages;

        let first = repo.upsert(sample("abc@d", "[PATCH] v1")).await.unwrap();
        let second = repo.upsert(sample("abc@d", "[PATCH] v2")).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.subject, "[PATCH] v2");
    }

    #[tokio::test]
    async fn find_sub_patches_excludes_cover_letter_and_sorts_by_index() {
        let store = Store::connect_in_memory().await.unwrap();
        let repo = &store.feed_messages;

        let mut cov = sample("cov@x", "[PATCH 0/2] series");
        cov.is_series_patch = true;
        cov.is_cover_letter = true;
        cov.patch_total = 2;
        cov.series_message_id = Some("cov@x".into());
        repo.upsert(cov).await.unwrap();

        let mut p2 = sample("p2@x", "[PATCH 2/2] B");
        p2.is_series_patch = true;
        p2.patch_index = 2;
        p2.patch_total = 2;
        p2.series_message_id = Some("cov@x".into());
        p2.in_reply_to_header = Some("cov@x".into());
        repo.upsert(p2).await.unwrap();

        let mut p1 = sample("p1@x", "[PATCH 1/2] A");
        p1.is_series_patch = true;
        p1.patch_index = 1;
        p1.patch_total = 2;
        p1.series_message_id = Some("cov@x".into());
        p1.in_reply_to_header = Some("cov@x".into());
        repo.upsert(p1).await.unwrap();

        let subs = repo.find_sub_patches("cov@x").await.unwrap();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].patch_index, 1);
        assert_eq!(subs[1].patch_index, 2);
    }
}
