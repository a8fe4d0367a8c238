//! PatchThread repository (spec §3, §4.8). At most one thread per
//! PatchCard, created only on explicit `watch`.

use crate::error::{Result, StoreError};
use crate::model::PatchThread;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct NewPatchThread {
    pub patch_card_message_id_header: String,
    pub thread_id: String,
    pub thread_name: String,
}

#[derive(Clone)]
pub struct PatchThreadRepository {
    pool: SqlitePool,
}

impl PatchThreadRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS patch_threads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                patch_card_message_id_header TEXT NOT NULL UNIQUE,
                thread_id TEXT NOT NULL,
                thread_name TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                overview_message_id TEXT,
                sub_patch_messages TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                archived_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_patch_threads_thread_id
                ON patch_threads(thread_id);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Schema(e.to_string()))?;
        Ok(())
    }

    pub async fn create(&self, new: NewPatchThread) -> Result<PatchThread> {
        let created_at = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO patch_threads (
                patch_card_message_id_header, thread_id, thread_name,
                is_active, sub_patch_messages, created_at
            ) VALUES (?, ?, ?, 1, '{}', ?)
            "#,
        )
        .bind(&new.patch_card_message_id_header)
        .bind(&new.thread_id)
        .bind(&new.thread_name)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        self.find_by_patch_card(&new.patch_card_message_id_header)
            .await?
            .ok_or_else(|| StoreError::Query("row vanished after insert".into()).into())
    }

    pub async fn find_by_patch_card(&self, patch_card_message_id_header: &str) -> Result<Option<PatchThread>> {
        let row = sqlx::query("SELECT * FROM patch_threads WHERE patch_card_message_id_header = ?")
            .bind(patch_card_message_id_header)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        row.map(row_to_patch_thread).transpose()
    }

    pub async fn find_by_thread_id(&self, thread_id: &str) -> Result<Option<PatchThread>> {
        let row = sqlx::query("SELECT * FROM patch_threads WHERE thread_id = ?")
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        row.map(row_to_patch_thread).transpose()
    }

    /// Record the platform message id for one sub-patch as it lands in the
    /// thread (spec §4.8 update path).
    pub async fn record_sub_patch_message(
        &self,
        thread_id: &str,
        patch_index: i64,
        platform_message_id: &str,
    ) -> Result<()> {
        let Some(thread) = self.find_by_thread_id(thread_id).await? else {
            return Err(StoreError::Query(format!("no thread {thread_id}")).into());
        };
        let mut messages = thread.sub_patch_messages;
        messages.insert(patch_index, platform_message_id.to_string());
        let json = serde_json::to_string(&messages)
            .map_err(|e| StoreError::Query(format!("encode sub_patch_messages: {e}")))?;

        sqlx::query("UPDATE patch_threads SET sub_patch_messages = ? WHERE thread_id = ?")
            .bind(&json)
            .bind(thread_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    pub async fn set_overview_message_id(&self, thread_id: &str, overview_message_id: &str) -> Result<()> {
        sqlx::query("UPDATE patch_threads SET overview_message_id = ? WHERE thread_id = ?")
            .bind(overview_message_id)
            .bind(thread_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    pub async fn mark_inactive(&self, thread_id: &str) -> Result<()> {
        sqlx::query("UPDATE patch_threads SET is_active = 0, archived_at = ? WHERE thread_id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(thread_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }
}

fn row_to_patch_thread(row: sqlx::sqlite::SqliteRow) -> Result<PatchThread> {
    let created_at_raw: String = row.try_get("created_at").map_err(|e| StoreError::Query(e.to_string()))?;
    let created_at = DateTime::parse_from_rfc3339(&created_at_raw)
        .map_err(|e| StoreError::Query(format!("bad created_at: {e}")))?
        .with_timezone(&Utc);

    let archived_at_raw: Option<String> =
        row.try_get("archived_at").map_err(|e| StoreError::Query(e.to_string()))?;
    let archived_at = archived_at_raw
        .map(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| StoreError::Query(format!("bad archived_at: {e}")))
        })
        .transpose()?;

    let sub_patch_messages_raw: String = row
        .try_get("sub_patch_messages")
        .map_err(|e| StoreError::Query(e.to_string()))?;
    let sub_patch_messages: HashMap<i64, String> = serde_json::from_str(&sub_patch_messages_raw)
        .map_err(|e| StoreError::Query(format!("bad sub_patch_messages json: {e}")))?;

    Ok(PatchThread {
        id: row.try_get("id").map_err(|e| StoreError::Query(e.to_string()))?,
        patch_card_message_id_header: row
            .try_get("patch_card_message_id_header")
            .map_err(|e| StoreError::Query(e.to_string()))?,
        thread_id: row.try_get("thread_id").map_err(|e| StoreError::Query(e.to_string()))?,
        thread_name: row.try_get("thread_name").map_err(|e| StoreError::Query(e.to_string()))?,
        is_active: row.try_get::<i64, _>("is_active").map_err(|e| StoreError::Query(e.to_string()))? != 0,
        overview_message_id: row
            .try_get("overview_message_id")
            .map_err(|e| StoreError::Query(e.to_string()))?,
        sub_patch_messages,
        created_at,
        archived_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[tokio::test]
    async fn create_and_record_sub_patch_messages() {
        let store = Store::connect_in_memory().await.unwrap();
        let repo = &store.patch_threads;

        let thread = repo
            .create(NewPatchThread {
                patch_card_message_id_header: "cov@x".into(),
                thread_id: "thread-1".into(),
                thread_name: "[PATCH 0/2] series X".into(),
            })
            .await
            .unwrap();
        assert!(thread.is_active);
        assert!(thread.sub_patch_messages.is_empty());

        repo.record_sub_patch_message("thread-1", 1, "msg-1").await.unwrap();
        repo.record_sub_patch_message("thread-1", 2, "msg-2").await.unwrap();

        let updated = repo.find_by_thread_id("thread-1").await.unwrap().unwrap();
        assert_eq!(updated.sub_patch_messages.get(&1).map(String::as_str), Some("msg-1"));
        assert_eq!(updated.sub_patch_messages.get(&2).map(String::as_str), Some("msg-2"));
    }

    #[tokio::test]
    async fn mark_inactive_sets_archived_at() {
        let store = Store::connect_in_memory().await.unwrap();
        let repo = &store.patch_threads;

        repo.create(NewPatchThread {
            patch_card_message_id_header: "cov@x".into(),
            thread_id: "thread-1".into(),
            thread_name: "series X".into(),
        })
        .await
        .unwrap();

        repo.mark_inactive("thread-1").await.unwrap();
        let thread = repo.find_by_thread_id("thread-1").await.unwrap().unwrap();
        assert!(!thread.is_active);
        assert!(thread.archived_at.is_some());
    }
}
