//! Discord adapter: real threads via `create_thread_from_message`, embeds
//! for PatchCard bodies. Grounded in the original `messaging/discord.rs`
//! adapter's use of `serenity::all::{Http, CreateMessage, CreateThread,
//! ChannelType}` — generalized from a bot-reply flow to a one-shot sender.

use crate::config::PlatformConfig;
use crate::error::{PlatformError, Result};
use crate::model::{PatchCard, SeriesPatchEntry};
use crate::platform::{render_patch_card_text, PatchCardClient, SentMessage, ThreadClient};
use async_trait::async_trait;
use serenity::all::{ChannelId, ChannelType, CreateEmbed, CreateMessage, CreateThread, EditMessage, Http, MessageId};

pub struct DiscordClient {
    http: Http,
    channel_id: ChannelId,
}

impl DiscordClient {
    pub fn new(bot_token: String, channel_id: u64) -> Self {
        Self {
            http: Http::new(&bot_token),
            channel_id: ChannelId::new(channel_id),
        }
    }

    pub fn from_config(config: &PlatformConfig) -> Result<Self> {
        let token = config.discord_bot_token.clone().ok_or_else(|| {
            PlatformError::SendFailed { platform: "discord".to_string(), reason: "DISCORD_BOT_TOKEN not set".into() }
        })?;
        let channel_id = config.discord_channel_id.ok_or_else(|| PlatformError::SendFailed {
            platform: "discord".to_string(),
            reason: "DISCORD_CHANNEL_ID not set".into(),
        })?;
        Ok(Self::new(token, channel_id))
    }
}

#[async_trait]
impl PatchCardClient for DiscordClient {
    fn platform_name(&self) -> &'static str {
        "discord"
    }

    async fn send_patch_card(
        &self,
        card: &PatchCard,
        series_entries: &[SeriesPatchEntry],
        matched_filters: &[String],
    ) -> Result<SentMessage> {
        let text = render_patch_card_text(card, series_entries, matched_filters);
        let embed = CreateEmbed::new().title(&card.subject).url(&card.url).description(text);
        let builder = CreateMessage::new().embed(embed);

        let message = self
            .channel_id
            .send_message(&self.http, builder)
            .await
            .map_err(|e| PlatformError::SendFailed { platform: "discord".to_string(), reason: e.to_string() })?;

        Ok(SentMessage {
            platform_message_id: message.id.to_string(),
            platform_channel_id: self.channel_id.to_string(),
        })
    }
}

#[async_trait]
impl ThreadClient for DiscordClient {
    async fn create_thread(&self, card: &PatchCard, thread_name: &str) -> Result<SentMessage> {
        let source_message_id = card
            .platform_message_id
            .as_deref()
            .and_then(|id| id.parse::<u64>().ok())
            .map(MessageId::new);

        let builder = CreateThread::new(truncate(thread_name, 100)).kind(ChannelType::PublicThread);

        let thread = match source_message_id {
            Some(id) => self.channel_id.create_thread_from_message(&self.http, id, builder).await,
            None => self.channel_id.create_thread(&self.http, builder).await,
        }
        .map_err(|e| PlatformError::ThreadCreateFailed { platform: "discord".to_string(), reason: e.to_string() })?;

        Ok(SentMessage {
            platform_message_id: thread.id.to_string(),
            platform_channel_id: thread.id.to_string(),
        })
    }

    async fn post_sub_patch_update(&self, thread_id: &str, _patch_index: i64, text: &str) -> Result<SentMessage> {
        self.post_to_thread(thread_id, text).await
    }

    async fn post_overview(&self, thread_id: &str, text: &str) -> Result<SentMessage> {
        self.post_to_thread(thread_id, text).await
    }

    async fn update_thread_overview(&self, thread_id: &str, message_id: &str, rendered: &str) -> Result<bool> {
        let Ok(channel) = thread_id.parse::<u64>() else {
            tracing::warn!(thread_id, "bad discord thread id, cannot update overview message");
            return Ok(false);
        };
        let Ok(msg_id) = message_id.parse::<u64>() else {
            tracing::warn!(message_id, "bad discord message id, cannot update overview message");
            return Ok(false);
        };

        let builder = EditMessage::new().content(rendered);
        match ChannelId::new(channel).edit_message(&self.http, MessageId::new(msg_id), builder).await {
            Ok(_) => Ok(true),
            Err(error) => {
                tracing::warn!(%error, "failed to update discord thread overview message");
                Ok(false)
            }
        }
    }

    async fn send_thread_update_notification(
        &self,
        channel_id: &str,
        thread_id: &str,
        patch_card_message_id: Option<&str>,
    ) -> Result<bool> {
        let Ok(channel) = channel_id.parse::<u64>() else {
            tracing::warn!(channel_id, "bad discord channel id, cannot send thread-update notification");
            return Ok(false);
        };

        let mut text = format!("Thread updated: <#{thread_id}>");
        if let Some(id) = patch_card_message_id {
            text.push_str(&format!(" (see message {id})"));
        }

        match ChannelId::new(channel).say(&self.http, text).await {
            Ok(_) => Ok(true),
            Err(error) => {
                tracing::warn!(%error, "failed to send discord thread-update notification");
                Ok(false)
            }
        }
    }
}

impl DiscordClient {
    async fn post_to_thread(&self, thread_id: &str, text: &str) -> Result<SentMessage> {
        let thread_channel: u64 = thread_id
            .parse()
            .map_err(|_| PlatformError::SendFailed { platform: "discord".to_string(), reason: format!("bad thread id {thread_id}") })?;
        let channel = ChannelId::new(thread_channel);

        let message = channel
            .say(&self.http, text)
            .await
            .map_err(|e| PlatformError::SendFailed { platform: "discord".to_string(), reason: e.to_string() })?;

        Ok(SentMessage {
            platform_message_id: message.id.to_string(),
            platform_channel_id: channel.to_string(),
        })
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_count_not_bytes() {
        assert_eq!(truncate("hello", 3), "hel");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
