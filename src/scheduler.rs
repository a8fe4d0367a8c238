//! Scheduler (spec §4.9): runs one poll-classify-store-dispatch cycle per
//! subsystem on a fixed interval. Adapted from the cron timer loop this
//! codebase used for per-job prompts — same `interval_at` +
//! `MissedTickBehavior::Skip` + execution-guard shape, generalized from
//! "one job, one prompt" to "one cycle, every configured subsystem".

use crate::config::Config;
use crate::error::{FeedError, Result};
use crate::feed::client::FeedClient;
use crate::feed::{classifier, parser};
use crate::model::FeedMessage;
use crate::patchcard;
use crate::platform::MultiPlatformSender;
use crate::store::feed_message::NewFeedMessage;
use crate::store::Store;
use crate::thread::overview;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Duration;

/// A subsystem is permanently skipped for the rest of the process after
/// this many consecutive cycle failures (adapted from the cron circuit
/// breaker, scoped per-subsystem-per-cycle rather than per-job).
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

struct ExecutionGuard(Arc<AtomicBool>);

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Shared state the scheduler mutates across cycles.
struct SchedulerState {
    /// The single high-water mark shared across every subsystem (spec §9:
    /// the original keeps one process-wide `last_update_dt`, not one per
    /// subsystem, which can let a slow subsystem starve a fast one — that
    /// behavior is preserved deliberately, not silently fixed; see
    /// DESIGN.md).
    last_update_dt: Option<DateTime<Utc>>,
    consecutive_failures: HashMap<String, u32>,
    disabled_subsystems: std::collections::HashSet<String>,
}

pub struct Scheduler {
    store: Store,
    feed_client: FeedClient,
    sender: MultiPlatformSender,
    subsystems: Vec<String>,
    interval_secs: u64,
    max_news_count: usize,
    thread_card_timeout_hours: u64,
    state: Arc<RwLock<SchedulerState>>,
    handle: Arc<RwLock<Option<tokio::task::JoinHandle<()>>>>,
}

impl Scheduler {
    pub fn new(config: &Config, store: Store, sender: MultiPlatformSender) -> Self {
        Self {
            store,
            feed_client: FeedClient::new(),
            sender,
            subsystems: config.manual_subsystems.clone(),
            interval_secs: config.monitoring_interval_secs,
            max_news_count: config.max_news_count,
            thread_card_timeout_hours: config.thread_card_timeout_hours,
            state: Arc::new(RwLock::new(SchedulerState {
                last_update_dt: config.last_update_at,
                consecutive_failures: HashMap::new(),
                disabled_subsystems: std::collections::HashSet::new(),
            })),
            handle: Arc::new(RwLock::new(None)),
        }
    }

    /// Start the interval-driven loop. Idempotent: a previously running
    /// loop is aborted first.
    pub async fn start(self: Arc<Self>) {
        {
            let mut handle = self.handle.write().await;
            if let Some(old) = handle.take() {
                old.abort();
            }
        }

        let scheduler = self.clone();
        let execution_lock = Arc::new(AtomicBool::new(false));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(
                tokio::time::Instant::now() + Duration::from_secs(scheduler.interval_secs),
                Duration::from_secs(scheduler.interval_secs),
            );
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                if execution_lock.load(Ordering::Acquire) {
                    tracing::debug!("previous monitoring cycle still running, skipping tick");
                    continue;
                }
                execution_lock.store(true, Ordering::Release);
                let guard = ExecutionGuard(execution_lock.clone());

                if let Err(error) = scheduler.run_cycle().await {
                    tracing::error!(%error, "monitoring cycle failed");
                }
                drop(guard);
            }
        });

        *self.handle.write().await = Some(handle);
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.handle.write().await.take() {
            handle.abort();
            let _ = handle.await;
        }
    }

    /// Run exactly one cycle, outside the timer loop (CLI `--once`).
    pub async fn run_once(&self) -> Result<()> {
        self.run_cycle().await
    }

    #[tracing::instrument(skip(self))]
    pub async fn run_cycle(&self) -> Result<()> {
        let cycle_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(cycle_id = %cycle_id, subsystem_count = self.subsystems.len(), "monitoring cycle starting");

        for subsystem in &self.subsystems {
            let disabled = self.state.read().await.disabled_subsystems.contains(subsystem);
            if disabled {
                continue;
            }

            match self.run_subsystem_cycle(subsystem).await {
                Ok(count) => {
                    let mut state = self.state.write().await;
                    state.consecutive_failures.remove(subsystem);
                    tracing::info!(cycle_id = %cycle_id, subsystem, count, "subsystem cycle complete");
                }
                Err(error) => {
                    tracing::warn!(cycle_id = %cycle_id, subsystem, %error, "subsystem cycle failed");
                    let mut state = self.state.write().await;
                    let failures = state.consecutive_failures.entry(subsystem.clone()).or_insert(0);
                    *failures += 1;
                    if *failures >= MAX_CONSECUTIVE_FAILURES {
                        tracing::warn!(subsystem, "circuit breaker tripped, disabling subsystem for this process");
                        state.disabled_subsystems.insert(subsystem.clone());
                    }
                }
            }
        }

        Ok(())
    }

    /// Seed the shared high-water mark the first time it's needed (spec
    /// §4.1): the env override from `Scheduler::new` wins if set, else the
    /// newest `received_at` already on record for this subsystem, else the
    /// current time. Without this, an unset override left every poll
    /// re-treating the whole feed as new.
    async fn ensure_high_water_mark(&self, subsystem: &str) -> Result<Option<DateTime<Utc>>> {
        {
            let state = self.state.read().await;
            if state.last_update_dt.is_some() {
                return Ok(state.last_update_dt);
            }
        }

        let seeded = match self.store.feed_messages.max_received_at(subsystem).await? {
            Some(dt) => dt,
            None => Utc::now(),
        };

        let mut state = self.state.write().await;
        if state.last_update_dt.is_none() {
            state.last_update_dt = Some(seeded);
        }
        Ok(state.last_update_dt)
    }

    /// Fetch, classify, persist, then apply side effects for one
    /// subsystem. Persistence happens in full before any PATCH/REPLY side
    /// effect runs, so cover-letter-first and sub-patch-first arrival
    /// orders converge identically (spec §4.4 two-phase write).
    async fn run_subsystem_cycle(&self, subsystem: &str) -> Result<usize> {
        let body = self.feed_client.fetch(subsystem).await?;
        let feed = parser::parse_atom_feed(&body).map_err(|e| FeedError::Malformed {
            subsystem: subsystem.to_string(),
            source: e.into(),
        })?;

        if feed.entries.is_empty() {
            return Err(FeedError::Unavailable { subsystem: subsystem.to_string(), reason: "empty feed".into() }.into());
        }

        let high_water_mark = self.ensure_high_water_mark(subsystem).await?;

        let mut raw_entries: Vec<_> = feed
            .entries
            .iter()
            .map(|entry| parser::extract_entry(subsystem, entry))
            .filter(|raw| high_water_mark.map(|hwm| raw.received_at > hwm).unwrap_or(true))
            .collect();

        raw_entries.sort_by_key(|r| r.received_at);
        if self.max_news_count > 0 && raw_entries.len() > self.max_news_count {
            let dropped = raw_entries.len() - self.max_news_count;
            tracing::warn!(subsystem, dropped, "more entries than MAX_NEWS_COUNT, dropping oldest");
            raw_entries = raw_entries.split_off(dropped);
        }

        if raw_entries.is_empty() {
            return Ok(0);
        }

        // Phase 1: persist every FeedMessage.
        let mut persisted: Vec<FeedMessage> = Vec::with_capacity(raw_entries.len());
        for raw in &raw_entries {
            let classification = classifier::classify(
                &raw.subject,
                raw.in_reply_to_header.as_deref(),
                raw.message_id_header.as_deref(),
            );
            let message_id_header = raw.message_id_header.clone().unwrap_or_else(|| raw.message_id.clone());
            let patch_info = classification.patch_info.clone();

            let message = self
                .store
                .feed_messages
                .upsert(NewFeedMessage {
                    subsystem_name: subsystem.to_string(),
                    message_id: raw.message_id.clone(),
                    message_id_header,
                    in_reply_to_header: raw.in_reply_to_header.clone(),
                    subject: raw.subject.clone(),
                    author: raw.author.clone(),
                    author_email: raw.author_email.clone(),
                    content: raw.content.clone(),
                    url: raw.url.clone(),
                    received_at: raw.received_at,
                    is_patch: classification.is_patch,
                    is_reply: classification.is_reply,
                    is_series_patch: classification.is_series_patch,
                    patch_version: patch_info.as_ref().and_then(|p| p.version.clone()),
                    patch_index: patch_info.as_ref().map(|p| p.index).unwrap_or(0),
                    patch_total: patch_info.as_ref().map(|p| p.total).unwrap_or(0),
                    is_cover_letter: patch_info.as_ref().map(|p| p.is_cover_letter).unwrap_or(false),
                    series_message_id: classification.series_message_id,
                })
                .await?;
            persisted.push(message);
        }

        // Phase 2: PATCH/REPLY side effects.
        for message in &persisted {
            if let Some(prepared) =
                patchcard::prepare_card(&self.store, &self.feed_client, self.thread_card_timeout_hours, message).await?
            {
                patchcard::dispatch(&self.store, &self.sender, &prepared).await?;
            }
            if message.is_reply {
                overview::on_reply(&self.store, &self.sender, &message.message_id_header).await?;
            }
        }

        let new_high_water = persisted.iter().map(|m| m.received_at).max();
        if let Some(new_high_water) = new_high_water {
            let mut state = self.state.write().await;
            state.last_update_dt = Some(state.last_update_dt.map_or(new_high_water, |prev| prev.max(new_high_water)));
        }

        Ok(persisted.len())
    }
}
