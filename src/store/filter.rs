//! Filter repositories: named `PatchCardFilter` rules plus the single-row
//! `FilterConfig` (spec §4.6).

use crate::error::{Result, StoreError};
use crate::model::{FilterCondition, FilterConfig, FilterPattern, PatchCardFilter};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct NewPatchCardFilter {
    pub name: String,
    pub enabled: bool,
    pub filter_conditions: HashMap<String, FilterCondition>,
    pub description: Option<String>,
    pub created_by: Option<String>,
}

#[derive(Clone)]
pub struct PatchCardFilterRepository {
    pool: SqlitePool,
}

impl PatchCardFilterRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS patch_card_filters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                filter_conditions TEXT NOT NULL,
                description TEXT,
                created_by TEXT,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Schema(e.to_string()))?;
        Ok(())
    }

    pub async fn create(&self, new: NewPatchCardFilter) -> Result<PatchCardFilter> {
        let conditions_json = encode_conditions(&new.filter_conditions)?;
        let created_at = Utc::now();

        let id = sqlx::query(
            r#"
            INSERT INTO patch_card_filters (name, enabled, filter_conditions, description, created_by, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&new.name)
        .bind(new.enabled as i64)
        .bind(&conditions_json)
        .bind(&new.description)
        .bind(&new.created_by)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?
        .last_insert_rowid();

        self.find_by_id(id)
            .await?
            .ok_or_else(|| StoreError::Query("row vanished after insert".into()).into())
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<PatchCardFilter>> {
        let row = sqlx::query("SELECT * FROM patch_card_filters WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        row.map(row_to_filter).transpose()
    }

    /// All filters, enabled first then by `created_at` then `id` — the
    /// deterministic evaluation order the engine relies on (spec §4.6).
    pub async fn list_enabled_ordered(&self) -> Result<Vec<PatchCardFilter>> {
        let rows = sqlx::query(
            "SELECT * FROM patch_card_filters WHERE enabled = 1 ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;
        rows.into_iter().map(row_to_filter).collect()
    }

    pub async fn set_enabled(&self, id: i64, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE patch_card_filters SET enabled = ? WHERE id = ?")
            .bind(enabled as i64)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }
}

fn encode_conditions(conditions: &HashMap<String, FilterCondition>) -> Result<String> {
    let wire: HashMap<String, WireCondition> = conditions
        .iter()
        .map(|(field, condition)| (field.clone(), WireCondition::from(condition)))
        .collect();
    serde_json::to_string(&wire).map_err(|e| StoreError::Query(format!("encode filter_conditions: {e}")).into())
}

fn decode_conditions(raw: &str) -> Result<HashMap<String, FilterCondition>> {
    let wire: HashMap<String, WireCondition> =
        serde_json::from_str(raw).map_err(|e| StoreError::Query(format!("decode filter_conditions: {e}")))?;
    Ok(wire.into_iter().map(|(field, condition)| (field, condition.into())).collect())
}

/// JSON-friendly mirror of [`FilterCondition`] / [`FilterPattern`] — the
/// domain types deliberately aren't `Serialize`/`Deserialize` so storage
/// concerns don't leak into the filter engine's types.
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind")]
enum WireCondition {
    One(WirePattern),
    AnyOf(Vec<WirePattern>),
}

#[derive(serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind")]
enum WirePattern {
    Substring { value: String },
    Regex { pattern: String, case_insensitive: bool },
}

impl From<&FilterCondition> for WireCondition {
    fn from(condition: &FilterCondition) -> Self {
        match condition {
            FilterCondition::One(p) => WireCondition::One(p.into()),
            FilterCondition::AnyOf(ps) => WireCondition::AnyOf(ps.iter().map(Into::into).collect()),
        }
    }
}

impl From<&FilterPattern> for WirePattern {
    fn from(pattern: &FilterPattern) -> Self {
        match pattern {
            FilterPattern::Substring(s) => WirePattern::Substring { value: s.clone() },
            FilterPattern::Regex { pattern, case_insensitive } => WirePattern::Regex {
                pattern: pattern.clone(),
                case_insensitive: *case_insensitive,
            },
        }
    }
}

impl From<WireCondition> for FilterCondition {
    fn from(wire: WireCondition) -> Self {
        match wire {
            WireCondition::One(p) => FilterCondition::One(p.into()),
            WireCondition::AnyOf(ps) => FilterCondition::AnyOf(ps.into_iter().map(Into::into).collect()),
        }
    }
}

impl From<WirePattern> for FilterPattern {
    fn from(wire: WirePattern) -> Self {
        match wire {
            WirePattern::Substring { value } => FilterPattern::Substring(value),
            WirePattern::Regex { pattern, case_insensitive } => FilterPattern::Regex { pattern, case_insensitive },
        }
    }
}

fn row_to_filter(row: sqlx::sqlite::SqliteRow) -> Result<PatchCardFilter> {
    let created_at_raw: String = row.try_get("created_at").map_err(|e| StoreError::Query(e.to_string()))?;
    let created_at = DateTime::parse_from_rfc3339(&created_at_raw)
        .map_err(|e| StoreError::Query(format!("bad created_at: {e}")))?
        .with_timezone(&Utc);

    let conditions_raw: String = row
        .try_get("filter_conditions")
        .map_err(|e| StoreError::Query(e.to_string()))?;

    Ok(PatchCardFilter {
        id: row.try_get("id").map_err(|e| StoreError::Query(e.to_string()))?,
        name: row.try_get("name").map_err(|e| StoreError::Query(e.to_string()))?,
        enabled: row.try_get::<i64, _>("enabled").map_err(|e| StoreError::Query(e.to_string()))? != 0,
        filter_conditions: decode_conditions(&conditions_raw)?,
        description: row.try_get("description").map_err(|e| StoreError::Query(e.to_string()))?,
        created_by: row.try_get("created_by").map_err(|e| StoreError::Query(e.to_string()))?,
        created_at,
    })
}

/// Single-row key/value store for global filter modes (spec §4.6
/// exclusive-vs-highlight toggle).
#[derive(Clone)]
pub struct FilterConfigRepository {
    pool: SqlitePool,
}

impl FilterConfigRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS filter_config (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                exclusive_mode INTEGER NOT NULL DEFAULT 0
            );
            INSERT OR IGNORE INTO filter_config (id, exclusive_mode) VALUES (1, 0);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Schema(e.to_string()))?;
        Ok(())
    }

    pub async fn get(&self) -> Result<FilterConfig> {
        let row: (i64,) = sqlx::query_as("SELECT exclusive_mode FROM filter_config WHERE id = 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(FilterConfig { exclusive_mode: row.0 != 0 })
    }

    pub async fn set_exclusive_mode(&self, exclusive_mode: bool) -> Result<()> {
        sqlx::query("UPDATE filter_config SET exclusive_mode = ? WHERE id = 1")
            .bind(exclusive_mode as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[tokio::test]
    async fn filter_config_defaults_to_highlight_mode() {
        let store = Store::connect_in_memory().await.unwrap();
        let config = store.filter_config.get().await.unwrap();
        assert!(!config.exclusive_mode);

        store.filter_config.set_exclusive_mode(true).await.unwrap();
        let config = store.filter_config.get().await.unwrap();
        assert!(config.exclusive_mode);
    }

    #[tokio::test]
    async fn create_and_list_enabled_filters_round_trips_conditions() {
        let store = Store::connect_in_memory().await.unwrap();
        let repo = &store.filters;

        let mut conditions = HashMap::new();
        conditions.insert(
            "subject".to_string(),
            FilterCondition::AnyOf(vec![
                FilterPattern::Substring("mm/".into()),
                FilterPattern::Regex { pattern: "slab".into(), case_insensitive: true },
            ]),
        );

        repo.create(NewPatchCardFilter {
            name: "memory-management".into(),
            enabled: true,
            filter_conditions: conditions,
            description: None,
            created_by: Some("alice".into()),
        })
        .await
        .unwrap();

        let filters = repo.list_enabled_ordered().await.unwrap();
        assert_eq!(filters.len(), 1);
        let condition = filters[0].filter_conditions.get("subject").unwrap();
        match condition {
            FilterCondition::AnyOf(patterns) => assert_eq!(patterns.len(), 2),
            _ => panic!("expected AnyOf"),
        }
    }
}
