//! PatchCard repository (spec §3, §4.5).

use crate::error::{Result, StoreError};
use crate::model::PatchCard;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone)]
pub struct NewPatchCard {
    pub message_id_header: String,
    pub subsystem_name: String,
    pub subject: String,
    pub author: String,
    pub url: String,
    pub is_series_patch: bool,
    pub series_message_id: Option<String>,
    pub patch_version: Option<String>,
    pub patch_index: i64,
    pub patch_total: i64,
    pub is_cover_letter: bool,
    pub to_cc_list: Option<Vec<String>>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct PatchCardRepository {
    pool: SqlitePool,
}

impl PatchCardRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS patch_cards (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id_header TEXT NOT NULL UNIQUE,
                subsystem_name TEXT NOT NULL,
                platform_message_id TEXT,
                platform_channel_id TEXT,
                subject TEXT NOT NULL,
                author TEXT NOT NULL,
                url TEXT NOT NULL,
                has_thread INTEGER NOT NULL DEFAULT 0,
                is_series_patch INTEGER NOT NULL DEFAULT 0,
                series_message_id TEXT,
                patch_version TEXT,
                patch_index INTEGER NOT NULL DEFAULT 0,
                patch_total INTEGER NOT NULL DEFAULT 0,
                is_cover_letter INTEGER NOT NULL DEFAULT 0,
                to_cc_list TEXT,
                expires_at TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_patch_cards_series
                ON patch_cards(series_message_id);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Schema(e.to_string()))?;
        Ok(())
    }

    /// Idempotent by `message_id_header` — a retry of an already-dispatched
    /// card is a no-op read, never a duplicate row (spec §4.5 rule 4).
    pub async fn create_if_absent(&self, new: NewPatchCard) -> Result<PatchCard> {
        if let Some(existing) = self.find_by_message_id_header(&new.message_id_header).await? {
            return Ok(existing);
        }

        let to_cc_list_json = new
            .to_cc_list
            .as_ref()
            .map(|list| serde_json::to_string(list).unwrap_or_default());
        let created_at = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO patch_cards (
                message_id_header, subsystem_name, subject, author, url,
                is_series_patch, series_message_id, patch_version, patch_index,
                patch_total, is_cover_letter, to_cc_list, expires_at, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(message_id_header) DO NOTHING
            "#,
        )
        .bind(&new.message_id_header)
        .bind(&new.subsystem_name)
        .bind(&new.subject)
        .bind(&new.author)
        .bind(&new.url)
        .bind(new.is_series_patch as i64)
        .bind(&new.series_message_id)
        .bind(&new.patch_version)
        .bind(new.patch_index)
        .bind(new.patch_total)
        .bind(new.is_cover_letter as i64)
        .bind(&to_cc_list_json)
        .bind(new.expires_at.map(|dt| dt.to_rfc3339()))
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            // Lost the race to a concurrent insert; re-read the winner.
            return self
                .find_by_message_id_header(&new.message_id_header)
                .await?
                .ok_or_else(|| StoreError::Query("row vanished after conflict".into()).into());
        }

        self.find_by_message_id_header(&new.message_id_header)
            .await?
            .ok_or_else(|| StoreError::Query("row vanished after insert".into()).into())
    }

    pub async fn find_by_message_id_header(&self, header: &str) -> Result<Option<PatchCard>> {
        let row = sqlx::query("SELECT * FROM patch_cards WHERE message_id_header = ?")
            .bind(header)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        row.map(row_to_patch_card).transpose()
    }

    pub async fn set_platform_ids(
        &self,
        header: &str,
        platform_message_id: &str,
        platform_channel_id: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE patch_cards SET platform_message_id = ?, platform_channel_id = ? WHERE message_id_header = ?",
        )
        .bind(platform_message_id)
        .bind(platform_channel_id)
        .bind(header)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    /// Cache a resolved CC list onto a card so a later cycle's filter
    /// evaluation doesn't re-fetch it (spec §4.6's "already cached" path).
    pub async fn set_to_cc_list(&self, header: &str, to_cc_list: &[String]) -> Result<()> {
        let json = serde_json::to_string(to_cc_list)
            .map_err(|e| StoreError::Query(format!("encode to_cc_list: {e}")))?;
        sqlx::query("UPDATE patch_cards SET to_cc_list = ? WHERE message_id_header = ?")
            .bind(&json)
            .bind(header)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    pub async fn mark_has_thread(&self, header: &str, has_thread: bool) -> Result<()> {
        sqlx::query("UPDATE patch_cards SET has_thread = ? WHERE message_id_header = ?")
            .bind(has_thread as i64)
            .bind(header)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    /// Cards whose `expires_at` has passed and have no thread — candidates
    /// for being dropped from active consideration (spec §4.5 edge cases).
    pub async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<PatchCard>> {
        let rows = sqlx::query(
            "SELECT * FROM patch_cards WHERE has_thread = 0 AND expires_at IS NOT NULL AND expires_at <= ?",
        )
        .bind(now.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;
        rows.into_iter().map(row_to_patch_card).collect()
    }
}

fn row_to_patch_card(row: sqlx::sqlite::SqliteRow) -> Result<PatchCard> {
    let created_at_raw: String = row.try_get("created_at").map_err(|e| StoreError::Query(e.to_string()))?;
    let created_at = DateTime::parse_from_rfc3339(&created_at_raw)
        .map_err(|e| StoreError::Query(format!("bad created_at: {e}")))?
        .with_timezone(&Utc);

    let expires_at_raw: Option<String> =
        row.try_get("expires_at").map_err(|e| StoreError::Query(e.to_string()))?;
    let expires_at = expires_at_raw
        .map(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| StoreError::Query(format!("bad expires_at: {e}")))
        })
        .transpose()?;

    let to_cc_list_raw: Option<String> =
        row.try_get("to_cc_list").map_err(|e| StoreError::Query(e.to_string()))?;
    let to_cc_list = to_cc_list_raw
        .map(|raw| serde_json::from_str::<Vec<String>>(&raw))
        .transpose()
        .map_err(|e| StoreError::Query(format!("bad to_cc_list json: {e}")))?;

    Ok(PatchCard {
        id: row.try_get("id").map_err(|e| StoreError::Query(e.to_string()))?,
        message_id_header: row
            .try_get("message_id_header")
            .map_err(|e| StoreError::Query(e.to_string()))?,
        subsystem_name: row
            .try_get("subsystem_name")
            .map_err(|e| StoreError::Query(e.to_string()))?,
        platform_message_id: row
            .try_get("platform_message_id")
            .map_err(|e| StoreError::Query(e.to_string()))?,
        platform_channel_id: row
            .try_get("platform_channel_id")
            .map_err(|e| StoreError::Query(e.to_string()))?,
        subject: row.try_get("subject").map_err(|e| StoreError::Query(e.to_string()))?,
        author: row.try_get("author").map_err(|e| StoreError::Query(e.to_string()))?,
        url: row.try_get("url").map_err(|e| StoreError::Query(e.to_string()))?,
        has_thread: row.try_get::<i64, _>("has_thread").map_err(|e| StoreError::Query(e.to_string()))? != 0,
        is_series_patch: row
            .try_get::<i64, _>("is_series_patch")
            .map_err(|e| StoreError::Query(e.to_string()))?
            != 0,
        series_message_id: row
            .try_get("series_message_id")
            .map_err(|e| StoreError::Query(e.to_string()))?,
        patch_version: row
            .try_get("patch_version")
            .map_err(|e| StoreError::Query(e.to_string()))?,
        patch_index: row.try_get("patch_index").map_err(|e| StoreError::Query(e.to_string()))?,
        patch_total: row.try_get("patch_total").map_err(|e| StoreError::Query(e.to_string()))?,
        is_cover_letter: row
            .try_get::<i64, _>("is_cover_letter")
            .map_err(|e| StoreError::Query(e.to_string()))?
            != 0,
        to_cc_list,
        expires_at,
        created_at,
    })
}
