//! Multi-platform Sender (spec §6): the abstract contract a chat platform
//! must satisfy to receive PatchCards and thread updates, plus a fan-out
//! wrapper that picks the configured platform. Platform-specific transport
//! details (auth handshakes, rate-limit internals, message formatting
//! beyond what's specified) are intentionally outside this contract.

pub mod discord;
pub mod feishu;

use crate::config::PlatformConfig;
use crate::error::{PlatformError, Result};
use crate::model::{PatchCard, SeriesPatchEntry};
use async_trait::async_trait;
use std::sync::Arc;

/// What sending a card or thread message returns: enough to persist and
/// later address the same message again.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub platform_message_id: String,
    pub platform_channel_id: String,
}

/// Posts PatchCards to a channel. Implemented once per platform.
#[async_trait]
pub trait PatchCardClient: Send + Sync {
    fn platform_name(&self) -> &'static str;

    async fn send_patch_card(
        &self,
        card: &PatchCard,
        series_entries: &[SeriesPatchEntry],
        matched_filters: &[String],
    ) -> Result<SentMessage>;
}

/// Thread operations. A platform with no real thread concept (Feishu) is
/// expected to no-op `post_overview`/`post_sub_patch_update` by emitting a
/// best-effort standalone message instead of failing (spec §6).
#[async_trait]
pub trait ThreadClient: Send + Sync {
    async fn create_thread(&self, card: &PatchCard, thread_name: &str) -> Result<SentMessage>;

    async fn post_sub_patch_update(&self, thread_id: &str, patch_index: i64, text: &str) -> Result<SentMessage>;

    async fn post_overview(&self, thread_id: &str, text: &str) -> Result<SentMessage>;

    /// Update an already-sent sub-patch message in place (spec §4.8 update
    /// path, step 5). Platforms with no edit primitive degrade to a
    /// best-effort new message and report success anyway (spec §6).
    async fn update_thread_overview(&self, thread_id: &str, message_id: &str, rendered: &str) -> Result<bool>;

    /// Notify the card's channel that its thread changed (spec §4.8 step
    /// 6). `patch_card_message_id` is the original PatchCard message, when
    /// known, so the notification can reference it.
    async fn send_thread_update_notification(
        &self,
        channel_id: &str,
        thread_id: &str,
        patch_card_message_id: Option<&str>,
    ) -> Result<bool>;
}

/// A platform implements both halves of the contract.
pub trait ChatPlatform: PatchCardClient + ThreadClient {}
impl<T: PatchCardClient + ThreadClient> ChatPlatform for T {}

/// Picks the single configured platform and fans every call through it.
/// Spec §6 leaves "what happens with more than one platform configured"
/// unspecified; this implementation sends through whichever platform
/// `PlatformConfig` resolves to, preferring Discord when both are set
/// (see DESIGN.md).
pub struct MultiPlatformSender {
    platform: Arc<dyn ChatPlatform>,
}

impl MultiPlatformSender {
    pub fn from_config(config: &PlatformConfig) -> Result<Self> {
        if let (Some(token), Some(channel_id)) = (&config.discord_bot_token, config.discord_channel_id) {
            return Ok(Self {
                platform: Arc::new(discord::DiscordClient::new(token.clone(), channel_id)),
            });
        }
        if let Some(webhook_url) = &config.feishu_webhook_url {
            return Ok(Self {
                platform: Arc::new(feishu::FeishuClient::new(webhook_url.clone())),
            });
        }
        Err(PlatformError::Other(anyhow::anyhow!(
            "no chat platform configured: set DISCORD_BOT_TOKEN + DISCORD_CHANNEL_ID or FEISHU_WEBHOOK_URL"
        ))
        .into())
    }

    /// Test-only seam: build a sender around any fake `ChatPlatform` so
    /// callers elsewhere can exercise dispatch/thread logic without a real
    /// Discord or Feishu backend.
    #[cfg(test)]
    pub(crate) fn from_platform(platform: Arc<dyn ChatPlatform>) -> Self {
        Self { platform }
    }

    pub fn platform_name(&self) -> &'static str {
        self.platform.platform_name()
    }

    pub async fn send_patch_card(
        &self,
        card: &PatchCard,
        series_entries: &[SeriesPatchEntry],
        matched_filters: &[String],
    ) -> Result<SentMessage> {
        self.platform.send_patch_card(card, series_entries, matched_filters).await
    }

    pub async fn create_thread(&self, card: &PatchCard, thread_name: &str) -> Result<SentMessage> {
        self.platform.create_thread(card, thread_name).await
    }

    pub async fn post_sub_patch_update(&self, thread_id: &str, patch_index: i64, text: &str) -> Result<SentMessage> {
        self.platform.post_sub_patch_update(thread_id, patch_index, text).await
    }

    pub async fn post_overview(&self, thread_id: &str, text: &str) -> Result<SentMessage> {
        self.platform.post_overview(thread_id, text).await
    }

    pub async fn update_thread_overview(&self, thread_id: &str, message_id: &str, rendered: &str) -> Result<bool> {
        self.platform.update_thread_overview(thread_id, message_id, rendered).await
    }

    pub async fn send_thread_update_notification(
        &self,
        channel_id: &str,
        thread_id: &str,
        patch_card_message_id: Option<&str>,
    ) -> Result<bool> {
        self.platform
            .send_thread_update_notification(channel_id, thread_id, patch_card_message_id)
            .await
    }
}

/// Renders the text body shared by every platform's patch-card message —
/// platforms decorate it (embeds, cards) but none invent the wording.
pub fn render_patch_card_text(card: &PatchCard, series_entries: &[SeriesPatchEntry], matched_filters: &[String]) -> String {
    let mut lines = Vec::new();
    let version = card.patch_version.as_deref().unwrap_or("");
    if card.is_series_patch {
        lines.push(format!(
            "[{subsystem}] {subject} ({version}, {total} patches)",
            subsystem = card.subsystem_name,
            subject = card.subject,
            total = card.patch_total
        ));
    } else {
        lines.push(format!("[{}] {}", card.subsystem_name, card.subject));
    }
    lines.push(format!("by {} — {}", card.author, card.url));

    if !series_entries.is_empty() {
        lines.push(String::new());
        for entry in series_entries {
            lines.push(format!("  {}/{} {} — {}", entry.patch_index, card.patch_total, entry.subject, entry.author));
        }
    }

    if !matched_filters.is_empty() {
        lines.push(String::new());
        lines.push(format!("matched filters: {}", matched_filters.join(", ")));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn card() -> PatchCard {
        PatchCard {
            id: 1,
            message_id_header: "cov@x".into(),
            subsystem_name: "linux-mm".into(),
            platform_message_id: None,
            platform_channel_id: None,
            subject: "[PATCH 0/2] series X".into(),
            author: "Alice".into(),
            url: "https://lore.kernel.org/linux-mm/cov@x/".into(),
            has_thread: false,
            is_series_patch: true,
            series_message_id: Some("cov@x".into()),
            patch_version: Some("v2".into()),
            patch_index: 0,
            patch_total: 2,
            is_cover_letter: true,
            to_cc_list: None,
            expires_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn renders_series_header_with_patch_count() {
        let text = render_patch_card_text(&card(), &[], &[]);
        assert!(text.contains("2 patches"));
        assert!(text.contains("v2"));
    }

    #[test]
    fn renders_matched_filters_when_present() {
        let text = render_patch_card_text(&card(), &[], &["memory-management".to_string()]);
        assert!(text.contains("matched filters: memory-management"));
    }

    #[test]
    fn from_config_requires_some_platform() {
        let config = PlatformConfig {
            discord_bot_token: None,
            discord_channel_id: None,
            feishu_webhook_url: None,
            bot_mention_name: None,
        };
        assert!(MultiPlatformSender::from_config(&config).is_err());
    }
}
