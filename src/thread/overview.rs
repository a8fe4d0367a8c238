//! Thread Overview Service (spec §4.8): creates a PatchThread on explicit
//! watch, then keeps its overview message current as sub-patches and
//! replies land.

use crate::error::Result;
use crate::model::{FeedMessage, PatchCard, SeriesPatchEntry};
use crate::patchcard::collate_series_entries;
use crate::platform::MultiPlatformSender;
use crate::store::patch_thread::NewPatchThread;
use crate::store::Store;
use crate::thread::hierarchy;

/// Create path: a PatchThread is opened for `card`, named after its
/// subject, anchored on the card's already-sent platform message. Every
/// sub-patch slot (or the sole slot `1` for a single PATCH) gets its own
/// message, recorded so the update path has something to key on (spec
/// §4.8 create-step 3, §8 scenario 1).
pub async fn watch(store: &Store, sender: &MultiPlatformSender, card: &PatchCard) -> Result<()> {
    if store.patch_threads.find_by_patch_card(&card.message_id_header).await?.is_some() {
        return Ok(());
    }

    let thread_name = thread_name_for(card);
    let sent = sender.create_thread(card, &thread_name).await?;

    store
        .patch_threads
        .create(NewPatchThread {
            patch_card_message_id_header: card.message_id_header.clone(),
            thread_id: sent.platform_message_id.clone(),
            thread_name,
        })
        .await?;

    store.patch_cards.mark_has_thread(&card.message_id_header, true).await?;

    let overview_text = render_overview(store, card).await?;
    let overview_sent = sender.post_overview(&sent.platform_message_id, &overview_text).await?;
    store
        .patch_threads
        .set_overview_message_id(&sent.platform_message_id, &overview_sent.platform_message_id)
        .await?;

    for entry in sub_patch_slots(store, card).await? {
        let Some(message) = store.feed_messages.find_by_message_id_header(&entry.message_id).await? else {
            continue;
        };
        let text = render_sub_patch_overview(store, &message).await?;
        let sub_sent = sender
            .post_sub_patch_update(&sent.platform_message_id, entry.patch_index, &text)
            .await?;
        store
            .patch_threads
            .record_sub_patch_message(&sent.platform_message_id, entry.patch_index, &sub_sent.platform_message_id)
            .await?;
    }

    Ok(())
}

/// Update path: a reply landed under a watched series. Identify which
/// sub-patch slot it targets, update that slot's existing message in
/// place, and notify the card's channel — never post a fresh message or
/// re-post the whole overview (spec §4.8 update path).
pub async fn on_reply(store: &Store, sender: &MultiPlatformSender, message_id_header: &str) -> Result<()> {
    let Some(reply) = store.feed_messages.find_by_message_id_header(message_id_header).await? else {
        return Ok(());
    };
    let Some(in_reply_to) = reply.in_reply_to_header.clone() else {
        return Ok(());
    };

    let chain = hierarchy::find_ancestor_chain(store, message_id_header).await?;
    let Some(root_id) = chain.last().map(|m| m.message_id_header.clone()) else {
        return Ok(());
    };
    let Some(card) = store.patch_cards.find_by_message_id_header(&root_id).await? else {
        return Ok(());
    };
    let Some(thread) = store.patch_threads.find_by_patch_card(&card.message_id_header).await? else {
        return Ok(());
    };
    if !thread.is_active {
        return Ok(());
    }

    let Some(target) = target_sub_patch(store, &card, &in_reply_to).await? else {
        tracing::debug!(message_id_header, "reply matched no watched sub-patch slot, skipping thread update");
        return Ok(());
    };

    let Some(existing_message_id) = thread.sub_patch_messages.get(&target.patch_index).cloned() else {
        tracing::debug!(message_id_header, patch_index = target.patch_index, "no existing message for target sub-patch slot");
        return Ok(());
    };

    let Some(target_message) = store.feed_messages.find_by_message_id_header(&target.message_id).await? else {
        return Ok(());
    };
    let rendered = render_sub_patch_overview(store, &target_message).await?;

    let updated = sender.update_thread_overview(&thread.thread_id, &existing_message_id, &rendered).await?;
    if !updated {
        tracing::warn!(thread_id = %thread.thread_id, "thread overview update failed, skipping notification");
        return Ok(());
    }

    if let Some(channel_id) = card.platform_channel_id.as_deref() {
        sender
            .send_thread_update_notification(channel_id, &thread.thread_id, card.platform_message_id.as_deref())
            .await?;
    } else {
        tracing::warn!(message_id_header = %card.message_id_header, "patch card has no platform channel id, skipping thread-update notification");
    }

    Ok(())
}

/// Every slot a `watch` message should land in: one per sub-patch in
/// index order for a series, or the sole slot `1` for a single PATCH.
async fn sub_patch_slots(store: &Store, card: &PatchCard) -> Result<Vec<SeriesPatchEntry>> {
    if card.series_message_id.is_some() {
        collate_series_entries(store, card).await
    } else {
        Ok(vec![SeriesPatchEntry {
            message_id: card.message_id_header.clone(),
            patch_index: 1,
            subject: card.subject.clone(),
            author: card.author.clone(),
        }])
    }
}

/// Which sub-patch slot a reply targets (spec §4.8 update-step 3): the
/// series entry whose `message_id` is a substring of the reply's
/// `in_reply_to_header` (a single PATCH has exactly one candidate slot,
/// itself). `None` means the reply targets the cover letter directly, or
/// nothing recognizable at all — neither has a slot to update.
async fn target_sub_patch(store: &Store, card: &PatchCard, in_reply_to: &str) -> Result<Option<SeriesPatchEntry>> {
    if card.series_message_id.is_some() {
        let entries = collate_series_entries(store, card).await?;
        Ok(entries.into_iter().find(|entry| in_reply_to.contains(&entry.message_id)))
    } else if in_reply_to.contains(&card.message_id_header) {
        Ok(Some(SeriesPatchEntry {
            message_id: card.message_id_header.clone(),
            patch_index: 1,
            subject: card.subject.clone(),
            author: card.author.clone(),
        }))
    } else {
        Ok(None)
    }
}

/// One sub-patch's overview line: subject, url, and how many replies it
/// has collected so far.
async fn render_sub_patch_overview(store: &Store, message: &FeedMessage) -> Result<String> {
    let tree = hierarchy::build_reply_tree(store, &message.message_id_header).await?;
    let reply_count = tree.as_ref().map(|t| count_replies(&t.children)).unwrap_or(0);
    Ok(format!("{} — {} ({reply_count} replies)", message.subject, message.url))
}

fn count_replies(nodes: &[hierarchy::ReplyNode]) -> usize {
    nodes.iter().map(|n| 1 + count_replies(&n.children)).sum()
}

fn thread_name_for(card: &PatchCard) -> String {
    if card.is_series_patch {
        format!("{} ({} patches)", card.subject, card.patch_total)
    } else {
        card.subject.clone()
    }
}

/// One line per sub-patch seen so far, in index order, noting which have
/// landed in the thread.
async fn render_overview(store: &Store, card: &PatchCard) -> Result<String> {
    let Some(series_message_id) = &card.series_message_id else {
        return Ok(format!("{} — {}", card.subject, card.url));
    };

    let sub_patches = store.feed_messages.find_sub_patches(series_message_id).await?;

    let mut lines = vec![format!("{} ({} patches)", card.subject, card.patch_total)];
    for index in 1..=card.patch_total {
        match sub_patches.iter().find(|m| m.patch_index == index) {
            Some(m) => lines.push(format!("  {index}/{total} [received] {subject}", total = card.patch_total, subject = m.subject)),
            None => lines.push(format!("  {index}/{total} [pending]", total = card.patch_total)),
        }
    }

    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{ChatPlatform, PatchCardClient, SentMessage};
    use crate::store::feed_message::NewFeedMessage;
    use crate::store::patch_card::NewPatchCard;
    use crate::store::Store;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    /// Records every thread operation instead of talking to a real
    /// platform, so `watch`/`on_reply` can be exercised end to end.
    struct FakePlatform {
        next_id: AtomicU64,
        updates: Mutex<Vec<(String, String, String)>>,
        notifications: Mutex<Vec<(String, String, Option<String>)>>,
    }

    impl FakePlatform {
        fn new() -> Self {
            Self { next_id: AtomicU64::new(1), updates: Mutex::new(Vec::new()), notifications: Mutex::new(Vec::new()) }
        }

        fn next(&self) -> String {
            self.next_id.fetch_add(1, Ordering::SeqCst).to_string()
        }
    }

    #[async_trait]
    impl PatchCardClient for FakePlatform {
        fn platform_name(&self) -> &'static str {
            "fake"
        }

        async fn send_patch_card(&self, _card: &PatchCard, _series: &[SeriesPatchEntry], _matched: &[String]) -> Result<SentMessage> {
            Ok(SentMessage { platform_message_id: self.next(), platform_channel_id: "chan-1".into() })
        }
    }

    #[async_trait]
    impl crate::platform::ThreadClient for FakePlatform {
        async fn create_thread(&self, _card: &PatchCard, _thread_name: &str) -> Result<SentMessage> {
            Ok(SentMessage { platform_message_id: "thread-1".into(), platform_channel_id: "thread-1".into() })
        }

        async fn post_sub_patch_update(&self, thread_id: &str, _patch_index: i64, _text: &str) -> Result<SentMessage> {
            Ok(SentMessage { platform_message_id: self.next(), platform_channel_id: thread_id.to_string() })
        }

        async fn post_overview(&self, thread_id: &str, _text: &str) -> Result<SentMessage> {
            Ok(SentMessage { platform_message_id: self.next(), platform_channel_id: thread_id.to_string() })
        }

        async fn update_thread_overview(&self, thread_id: &str, message_id: &str, rendered: &str) -> Result<bool> {
            self.updates.lock().unwrap().push((thread_id.to_string(), message_id.to_string(), rendered.to_string()));
            Ok(true)
        }

        async fn send_thread_update_notification(
            &self,
            channel_id: &str,
            thread_id: &str,
            patch_card_message_id: Option<&str>,
        ) -> Result<bool> {
            self.notifications.lock().unwrap().push((
                channel_id.to_string(),
                thread_id.to_string(),
                patch_card_message_id.map(str::to_string),
            ));
            Ok(true)
        }
    }

    fn feed_message(header: &str, subject: &str, in_reply_to: Option<&str>, series: Option<&str>, patch_index: i64) -> NewFeedMessage {
        NewFeedMessage {
            subsystem_name: "linux-mm".into(),
            message_id: header.into(),
            message_id_header: header.into(),
            in_reply_to_header: in_reply_to.map(str::to_string),
            subject: subject.into(),
            author: "Alice <a@ex.com>".into(),
            author_email: "a@ex.com".into(),
            content: "body".into(),
            url: format!("https://lore.kernel.org/linux-mm/{header}/"),
            received_at: Utc::now(),
            is_patch: true,
            is_reply: in_reply_to.is_some() && series.is_none() && patch_index == 0,
            is_series_patch: series.is_some(),
            patch_version: None,
            patch_index,
            patch_total: if series.is_some() { 2 } else { 0 },
            is_cover_letter: series == Some(header),
            series_message_id: series.map(str::to_string),
        }
    }

    fn patch_card(header: &str, series: Option<&str>, patch_total: i64) -> NewPatchCard {
        NewPatchCard {
            message_id_header: header.into(),
            subsystem_name: "linux-mm".into(),
            subject: "[PATCH] fix foo".into(),
            author: "Alice <a@ex.com>".into(),
            url: format!("https://lore.kernel.org/linux-mm/{header}/"),
            is_series_patch: series.is_some(),
            series_message_id: series.map(str::to_string),
            patch_version: None,
            patch_index: 0,
            patch_total,
            is_cover_letter: series == Some(header),
            to_cc_list: None,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn watch_populates_the_sole_slot_for_a_single_patch() {
        let store = Store::connect_in_memory().await.unwrap();
        store.feed_messages.upsert(feed_message("abc@d", "[PATCH] fix foo", None, None, 0)).await.unwrap();
        let card = store.patch_cards.create_if_absent(patch_card("abc@d", None, 0)).await.unwrap();

        let fake = Arc::new(FakePlatform::new());
        let sender = MultiPlatformSender::from_platform(fake.clone() as Arc<dyn ChatPlatform>);

        watch(&store, &sender, &card).await.unwrap();

        let thread = store.patch_threads.find_by_patch_card("abc@d").await.unwrap().unwrap();
        assert_eq!(thread.sub_patch_messages.len(), 1);
        assert!(thread.sub_patch_messages.contains_key(&1));
    }

    #[tokio::test]
    async fn watch_populates_one_message_per_sub_patch_for_a_series() {
        let store = Store::connect_in_memory().await.unwrap();
        store.feed_messages.upsert(feed_message("cov@x", "[PATCH 0/2] series X", None, Some("cov@x"), 0)).await.unwrap();
        store
            .feed_messages
            .upsert(feed_message("p1@x", "[PATCH 1/2] A", Some("cov@x"), Some("cov@x"), 1))
            .await
            .unwrap();
        store
            .feed_messages
            .upsert(feed_message("p2@x", "[PATCH 2/2] B", Some("cov@x"), Some("cov@x"), 2))
            .await
            .unwrap();
        let card = store.patch_cards.create_if_absent(patch_card("cov@x", Some("cov@x"), 2)).await.unwrap();

        let fake = Arc::new(FakePlatform::new());
        let sender = MultiPlatformSender::from_platform(fake.clone() as Arc<dyn ChatPlatform>);

        watch(&store, &sender, &card).await.unwrap();

        let thread = store.patch_threads.find_by_patch_card("cov@x").await.unwrap().unwrap();
        assert_eq!(thread.sub_patch_messages.len(), 2);
        assert!(thread.sub_patch_messages.contains_key(&1));
        assert!(thread.sub_patch_messages.contains_key(&2));
    }

    #[tokio::test]
    async fn on_reply_updates_only_the_targeted_sub_patch_message_and_notifies() {
        let store = Store::connect_in_memory().await.unwrap();
        store.feed_messages.upsert(feed_message("cov@x", "[PATCH 0/2] series X", None, Some("cov@x"), 0)).await.unwrap();
        store
            .feed_messages
            .upsert(feed_message("p1@x", "[PATCH 1/2] A", Some("cov@x"), Some("cov@x"), 1))
            .await
            .unwrap();
        store
            .feed_messages
            .upsert(feed_message("p2@x", "[PATCH 2/2] B", Some("cov@x"), Some("cov@x"), 2))
            .await
            .unwrap();
        let card = store.patch_cards.create_if_absent(patch_card("cov@x", Some("cov@x"), 2)).await.unwrap();
        store.patch_cards.set_platform_ids("cov@x", "card-msg-1", "chan-1").await.unwrap();
        let card = store.patch_cards.find_by_message_id_header("cov@x").await.unwrap().unwrap();

        let fake = Arc::new(FakePlatform::new());
        let sender = MultiPlatformSender::from_platform(fake.clone() as Arc<dyn ChatPlatform>);
        watch(&store, &sender, &card).await.unwrap();

        let reply = NewFeedMessage {
            is_reply: true,
            is_patch: false,
            is_series_patch: false,
            patch_total: 0,
            patch_index: 0,
            is_cover_letter: false,
            series_message_id: None,
            ..feed_message("r1@x", "Re: [PATCH 2/2] B", Some("p2@x"), None, 0)
        };
        store.feed_messages.upsert(reply).await.unwrap();

        on_reply(&store, &sender, "r1@x").await.unwrap();

        let updates = fake.updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        let thread = store.patch_threads.find_by_patch_card("cov@x").await.unwrap().unwrap();
        assert_eq!(updates[0].1, thread.sub_patch_messages[&2]);

        let notifications = fake.notifications.lock().unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].0, "chan-1");
        assert_eq!(notifications[0].2.as_deref(), Some("card-msg-1"));
    }

    #[test]
    fn thread_name_includes_patch_count_for_series() {
        let card = PatchCard {
            id: 1,
            message_id_header: "cov@x".into(),
            subsystem_name: "linux-mm".into(),
            platform_message_id: None,
            platform_channel_id: None,
            subject: "series X".into(),
            author: "a".into(),
            url: "https://lore.kernel.org/linux-mm/cov@x/".into(),
            has_thread: false,
            is_series_patch: true,
            series_message_id: Some("cov@x".into()),
            patch_version: None,
            patch_index: 0,
            patch_total: 3,
            is_cover_letter: true,
            to_cc_list: None,
            expires_at: None,
            created_at: chrono::Utc::now(),
        };
        assert_eq!(thread_name_for(&card), "series X (3 patches)");
    }
}
