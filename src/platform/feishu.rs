//! Feishu adapter: a plain webhook POST, no bot token, no real threads.
//! Thread operations degrade to standalone messages tagged with the
//! thread name, matching the original `feishu_client.py`'s webhook-only
//! transport (spec §6).

use crate::error::{PlatformError, Result};
use crate::model::{PatchCard, SeriesPatchEntry};
use crate::platform::{render_patch_card_text, PatchCardClient, SentMessage, ThreadClient};
use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

pub struct FeishuClient {
    http: reqwest::Client,
    webhook_url: String,
}

impl FeishuClient {
    pub fn new(webhook_url: String) -> Self {
        Self { http: reqwest::Client::new(), webhook_url }
    }

    async fn post_text(&self, text: String) -> Result<SentMessage> {
        let body = FeishuTextMessage { msg_type: "text", content: FeishuTextContent { text } };

        let response = self
            .http
            .post(&self.webhook_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| PlatformError::SendFailed { platform: "feishu".to_string(), reason: e.to_string() })?;

        if !response.status().is_success() {
            return Err(PlatformError::SendFailed {
                platform: "feishu".to_string(),
                reason: format!("webhook returned {}", response.status()),
            }
            .into());
        }

        // Feishu's incoming-webhook API doesn't hand back a message id we
        // can address later; synthesize one so the store layer always has
        // something non-empty to persist.
        Ok(SentMessage {
            platform_message_id: Uuid::new_v4().to_string(),
            platform_channel_id: self.webhook_url.clone(),
        })
    }
}

#[derive(Serialize)]
struct FeishuTextMessage {
    msg_type: &'static str,
    content: FeishuTextContent,
}

#[derive(Serialize)]
struct FeishuTextContent {
    text: String,
}

#[async_trait]
impl PatchCardClient for FeishuClient {
    fn platform_name(&self) -> &'static str {
        "feishu"
    }

    async fn send_patch_card(
        &self,
        card: &PatchCard,
        series_entries: &[SeriesPatchEntry],
        matched_filters: &[String],
    ) -> Result<SentMessage> {
        self.post_text(render_patch_card_text(card, series_entries, matched_filters)).await
    }
}

#[async_trait]
impl ThreadClient for FeishuClient {
    /// Feishu has no thread primitive; "creating" one is just sending the
    /// first message, tagged with the thread name so a reader can follow
    /// the series in a flat channel.
    async fn create_thread(&self, card: &PatchCard, thread_name: &str) -> Result<SentMessage> {
        let _ = card;
        self.post_text(format!("[{thread_name}] thread started")).await
    }

    async fn post_sub_patch_update(&self, thread_id: &str, patch_index: i64, text: &str) -> Result<SentMessage> {
        self.post_text(format!("[{thread_id} #{patch_index}] {text}")).await
    }

    async fn post_overview(&self, thread_id: &str, text: &str) -> Result<SentMessage> {
        self.post_text(format!("[{thread_id}] {text}")).await
    }

    /// No edit primitive over a plain webhook; send a tagged replacement
    /// message and report success regardless (spec §6 "non-applicable
    /// methods ... return True").
    async fn update_thread_overview(&self, thread_id: &str, _message_id: &str, rendered: &str) -> Result<bool> {
        if let Err(error) = self.post_text(format!("[{thread_id}] updated: {rendered}")).await {
            tracing::warn!(%error, "feishu best-effort overview update failed");
        }
        Ok(true)
    }

    async fn send_thread_update_notification(
        &self,
        _channel_id: &str,
        thread_id: &str,
        patch_card_message_id: Option<&str>,
    ) -> Result<bool> {
        let mut text = format!("[{thread_id}] thread updated");
        if let Some(id) = patch_card_message_id {
            text.push_str(&format!(" (see message {id})"));
        }
        if let Err(error) = self.post_text(text).await {
            tracing::warn!(%error, "feishu best-effort thread-update notification failed");
        }
        Ok(true)
    }
}
