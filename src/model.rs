//! Core entity types shared across the feed, store, filter, and thread
//! modules. See spec §3 for the authoritative field-level invariants.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One row per distinct email ever observed on a subsystem feed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedMessage {
    pub id: i64,
    pub subsystem_name: String,
    /// Stable synthetic id; see `feed::parser::synthesize_message_id`.
    pub message_id: String,
    /// Unique. The upstream Message-ID; all cross-entity joins use this.
    pub message_id_header: String,
    pub in_reply_to_header: Option<String>,
    pub subject: String,
    pub author: String,
    pub author_email: String,
    pub content: String,
    pub url: String,
    pub received_at: chrono::DateTime<chrono::Utc>,
    pub is_patch: bool,
    pub is_reply: bool,
    pub is_series_patch: bool,
    pub patch_version: Option<String>,
    pub patch_index: i64,
    pub patch_total: i64,
    pub is_cover_letter: bool,
    pub series_message_id: Option<String>,
}

impl FeedMessage {
    /// A series is `{fm | fm.series_message_id == S}`. This member is its
    /// cover letter iff it carries the series id as its own identity.
    pub fn is_series_root(&self) -> bool {
        self.is_cover_letter && self.series_message_id.as_deref() == Some(&self.message_id_header)
    }

    /// True for a series member that is not the cover letter — these never
    /// get their own PatchCard (spec §4.5 rule 3).
    pub fn is_sub_patch(&self) -> bool {
        self.is_series_patch && !self.is_cover_letter
    }
}

/// The surfaced, persistent representation of one patch or cover letter.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchCard {
    pub id: i64,
    /// Unique; equals the FeedMessage of the cover letter or single patch.
    pub message_id_header: String,
    pub subsystem_name: String,
    pub platform_message_id: Option<String>,
    pub platform_channel_id: Option<String>,
    pub subject: String,
    pub author: String,
    pub url: String,
    pub has_thread: bool,
    pub is_series_patch: bool,
    pub series_message_id: Option<String>,
    pub patch_version: Option<String>,
    pub patch_index: i64,
    pub patch_total: i64,
    pub is_cover_letter: bool,
    pub to_cc_list: Option<Vec<String>>,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// A sub-patch entry collated onto a cover-letter PatchCard for rendering
/// (spec §4.5 rule 5). Not persisted separately — derived from FeedMessage
/// rows sharing `series_message_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeriesPatchEntry {
    pub message_id: String,
    pub patch_index: i64,
    pub subject: String,
    pub author: String,
}

/// At most one per PatchCard, created on explicit `watch`.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchThread {
    pub id: i64,
    pub patch_card_message_id_header: String,
    pub thread_id: String,
    pub thread_name: String,
    pub is_active: bool,
    pub overview_message_id: Option<String>,
    /// `patch_index -> platform message id`. For a single PATCH the sole
    /// key is 1.
    pub sub_patch_messages: HashMap<i64, String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub archived_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// A pattern against a single field value: a plain case-insensitive
/// substring, or a `/regex/` / `/regex/i` literal (spec §4.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterPattern {
    Substring(String),
    Regex { pattern: String, case_insensitive: bool },
}

/// A field condition is one pattern, or a list of patterns ORed together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterCondition {
    One(FilterPattern),
    AnyOf(Vec<FilterPattern>),
}

/// A named rule group whose conditions are ANDed; groups of filters are
/// ORed against each other by the filter engine.
#[derive(Debug, Clone)]
pub struct PatchCardFilter {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
    pub filter_conditions: HashMap<String, FilterCondition>,
    pub description: Option<String>,
    pub created_by: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Single-row key/value store for global filter modes.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterConfig {
    pub exclusive_mode: bool,
}
