//! Configuration loading and validation.
//!
//! Mirrors the env-var-first loading style used throughout this codebase:
//! read `std::env::var`, fall back to a sane default, validate at the end.

use crate::error::{ConfigError, Result};
use std::path::PathBuf;

/// Floor for the monitoring interval, matching spec §4.1.
pub const MIN_MONITORING_INTERVAL_SECS: u64 = 60;
const DEFAULT_MONITORING_INTERVAL_SECS: u64 = 300;
const DEFAULT_THREAD_CARD_TIMEOUT_HOURS: u64 = 72;

/// Top-level configuration for the patch-watch pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    /// Data directory for the SQLite database file.
    pub data_dir: PathBuf,

    /// `DATABASE_URL` override; when absent, derived from `data_dir`.
    pub database_url: Option<String>,

    /// `MANUAL_SUBSYSTEMS`: comma list of subsystem names to poll,
    /// since subsystem discovery/subscription bookkeeping is external.
    pub manual_subsystems: Vec<String>,

    /// `MONITORING_INTERVAL`, floored at [`MIN_MONITORING_INTERVAL_SECS`].
    pub monitoring_interval_secs: u64,

    /// `LAST_UPDATE_AT`: optional ISO-8601 override for the poller's
    /// high-water mark (spec §4.1 initialization order, step (a)).
    pub last_update_at: Option<chrono::DateTime<chrono::Utc>>,

    /// `MAX_NEWS_COUNT`: advisory cap on entries processed per subsystem
    /// per cycle (0 = unbounded).
    pub max_news_count: usize,

    /// Advisory hours until a PatchCard's `expires_at` is set.
    pub thread_card_timeout_hours: u64,

    /// Platform configuration, one entry per configured sender.
    pub platforms: PlatformConfig,
}

/// Per-platform webhook/token/channel settings (spec §6 "platform webhook
/// URLs / tokens / channel ids").
#[derive(Debug, Clone, Default)]
pub struct PlatformConfig {
    pub discord_bot_token: Option<String>,
    pub discord_channel_id: Option<u64>,
    pub feishu_webhook_url: Option<String>,
    /// Bot mention name, used by the (external) command parser; kept here
    /// because it is a platform-facing knob the core must thread through.
    pub bot_mention_name: Option<String>,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn load() -> Result<Self> {
        let data_dir = dirs::data_dir()
            .map(|d| d.join("lkml-patchwatch"))
            .unwrap_or_else(|| PathBuf::from("./data"));

        std::fs::create_dir_all(&data_dir).map_err(|source| {
            ConfigError::Invalid(format!(
                "failed to create data directory {}: {source}",
                data_dir.display()
            ))
        })?;

        let database_url = std::env::var("DATABASE_URL").ok();

        let manual_subsystems = std::env::var("MANUAL_SUBSYSTEMS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let monitoring_interval_secs = std::env::var("MONITORING_INTERVAL")
            .ok()
            .and_then(|raw| raw.parse::<u64>().ok())
            .unwrap_or(DEFAULT_MONITORING_INTERVAL_SECS)
            .max(MIN_MONITORING_INTERVAL_SECS);

        let last_update_at = match std::env::var("LAST_UPDATE_AT") {
            Ok(raw) => Some(parse_iso8601_utc(&raw).map_err(|e| {
                ConfigError::Invalid(format!("invalid LAST_UPDATE_AT '{raw}': {e}"))
            })?),
            Err(_) => None,
        };

        let max_news_count = std::env::var("MAX_NEWS_COUNT")
            .ok()
            .and_then(|raw| raw.parse::<usize>().ok())
            .unwrap_or(0);

        let thread_card_timeout_hours = std::env::var("THREAD_CARD_TIMEOUT_HOURS")
            .ok()
            .and_then(|raw| raw.parse::<u64>().ok())
            .unwrap_or(DEFAULT_THREAD_CARD_TIMEOUT_HOURS);

        let platforms = PlatformConfig {
            discord_bot_token: std::env::var("DISCORD_BOT_TOKEN").ok(),
            discord_channel_id: std::env::var("DISCORD_CHANNEL_ID")
                .ok()
                .and_then(|raw| raw.parse().ok()),
            feishu_webhook_url: std::env::var("FEISHU_WEBHOOK_URL").ok(),
            bot_mention_name: std::env::var("BOT_MENTION_NAME").ok(),
        };

        Ok(Self {
            data_dir,
            database_url,
            manual_subsystems,
            monitoring_interval_secs,
            last_update_at,
            max_news_count,
            thread_card_timeout_hours,
            platforms,
        })
    }

    /// Resolve the SQLite connection string, preferring `DATABASE_URL`.
    pub fn database_url(&self) -> String {
        self.database_url
            .clone()
            .unwrap_or_else(|| format!("sqlite://{}?mode=rwc", self.sqlite_path().display()))
    }

    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("patchwatch.db")
    }
}

/// Parse an ISO-8601 timestamp, tolerating a bare `Z` suffix (spec §4.1).
fn parse_iso8601_utc(raw: &str) -> std::result::Result<chrono::DateTime<chrono::Utc>, String> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_iso8601_with_z_suffix() {
        let dt = parse_iso8601_utc("2026-01-02T03:04:05Z").unwrap();
        assert_eq!(dt.to_rfc3339(), "2026-01-02T03:04:05+00:00");
    }

    #[test]
    fn rejects_garbage_timestamp() {
        assert!(parse_iso8601_utc("not-a-date").is_err());
    }
}
