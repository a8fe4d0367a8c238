//! Typed storage of feed messages, patch cards, threads, and filters
//! (spec §3, §4.4). Each repository owns its table and issues
//! `CREATE TABLE IF NOT EXISTS` on construction — there is no external
//! migration runner (spec §9: "the reimplementation may simply create
//! the schema on first run").

pub mod feed_message;
pub mod filter;
pub mod patch_card;
pub mod patch_thread;

pub use feed_message::FeedMessageRepository;
pub use filter::{FilterConfigRepository, PatchCardFilterRepository};
pub use patch_card::PatchCardRepository;
pub use patch_thread::PatchThreadRepository;

use crate::error::{Result, StoreError};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

/// Facade bundling the pool and every repository, the way a caller
/// actually wants to hold storage: one handle, typed accessors.
#[derive(Clone)]
pub struct Store {
    pub pool: SqlitePool,
    pub feed_messages: FeedMessageRepository,
    pub patch_cards: PatchCardRepository,
    pub patch_threads: PatchThreadRepository,
    pub filters: PatchCardFilterRepository,
    pub filter_config: FilterConfigRepository,
}

impl Store {
    /// Connect to `database_url` and bootstrap all tables.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StoreError::Connect(e))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .min_connections(1)
            .connect_with(options)
            .await
            .map_err(StoreError::Connect)?;

        let feed_messages = FeedMessageRepository::new(pool.clone());
        feed_messages.ensure_schema().await?;

        let patch_cards = PatchCardRepository::new(pool.clone());
        patch_cards.ensure_schema().await?;

        let patch_threads = PatchThreadRepository::new(pool.clone());
        patch_threads.ensure_schema().await?;

        let filters = PatchCardFilterRepository::new(pool.clone());
        filters.ensure_schema().await?;

        let filter_config = FilterConfigRepository::new(pool.clone());
        filter_config.ensure_schema().await?;

        Ok(Self {
            pool,
            feed_messages,
            patch_cards,
            patch_threads,
            filters,
            filter_config,
        })
    }

    /// Open an in-memory store for tests.
    #[cfg(test)]
    pub async fn connect_in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }
}
