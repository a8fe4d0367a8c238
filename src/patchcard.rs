//! Patch-Card Service (spec §4.5): decides which FeedMessages become
//! PatchCards, collates series sub-patches onto the cover letter's card,
//! and dispatches new cards to every configured platform.

use crate::error::Result;
use crate::feed::cc_fetcher::CcListFetcher;
use crate::filters::{self, FilterableCard};
use crate::model::{FeedMessage, PatchCard, SeriesPatchEntry};
use crate::platform::MultiPlatformSender;
use crate::store::patch_card::NewPatchCard;
use crate::store::Store;
use chrono::{DateTime, Duration, Utc};

/// A PatchCard ready to be rendered and sent, with its series sub-patches
/// (if any) already collated.
#[derive(Debug, Clone)]
pub struct PreparedCard {
    pub card: PatchCard,
    pub series_entries: Vec<SeriesPatchEntry>,
    pub matched_filters: Vec<String>,
    pub suppressed: bool,
}

/// Eligibility rules from spec §4.5:
/// 1. Not a reply.
/// 2. A single PATCH, or the cover letter of a series.
/// 3. A series sub-patch (non-cover) never gets its own card.
/// 4. A card already exists for this `message_id_header` -> no-op (store
///    layer handles the idempotence; this layer just skips re-dispatch).
/// 5. A cover letter's card lists every sub-patch seen so far, not just
///    the ones present at series-detection time.
pub fn is_eligible(message: &FeedMessage) -> bool {
    if message.is_reply {
        return false;
    }
    if message.is_sub_patch() {
        return false;
    }
    message.is_patch
}

/// Build (or refresh) the PatchCard for one eligible FeedMessage, apply
/// filters, and persist it. Returns `None` if the message wasn't eligible.
pub async fn prepare_card(
    store: &Store,
    fetcher: &dyn CcListFetcher,
    config_thread_card_timeout_hours: u64,
    message: &FeedMessage,
) -> Result<Option<PreparedCard>> {
    if !is_eligible(message) {
        return Ok(None);
    }

    let expires_at: Option<DateTime<Utc>> = Some(
        message.received_at + Duration::hours(config_thread_card_timeout_hours as i64),
    );

    let card = store
        .patch_cards
        .create_if_absent(NewPatchCard {
            message_id_header: message.message_id_header.clone(),
            subsystem_name: message.subsystem_name.clone(),
            subject: message.subject.clone(),
            author: message.author.clone(),
            url: message.url.clone(),
            is_series_patch: message.is_series_patch,
            series_message_id: message.series_message_id.clone(),
            patch_version: message.patch_version.clone(),
            patch_index: message.patch_index,
            patch_total: message.patch_total,
            is_cover_letter: message.is_cover_letter,
            to_cc_list: None,
            expires_at,
        })
        .await?;

    let series_entries = collate_series_entries(store, &card).await?;

    let filters = store.filters.list_enabled_ordered().await?;
    let filter_config = store.filter_config.get().await?;

    // Only pay for a CC-list fetch when some enabled filter actually
    // inspects it (spec §4.6's cc condition is the only consumer).
    let needs_cc_list = filters
        .iter()
        .flat_map(|f| f.filter_conditions.keys())
        .any(|key| matches!(key.as_str(), "cclist" | "cc"));
    let cc_list = if needs_cc_list {
        filters::resolve_cc_list(store, fetcher, &card).await?
    } else {
        Vec::new()
    };

    let filterable = FilterableCard {
        subject: &card.subject,
        author: &card.author,
        author_email: &message.author_email,
        subsystem: &card.subsystem_name,
        content: &message.content,
        cc_list: &cc_list,
    };
    let outcome = filters::evaluate(&filters, filter_config.exclusive_mode, &filterable);

    Ok(Some(PreparedCard {
        card,
        series_entries,
        matched_filters: outcome.matched_filters,
        suppressed: outcome.suppressed,
    }))
}

/// Every sub-patch currently known for this card's series, sorted by
/// index — re-derived on every call so a card reflects sub-patches that
/// arrived after the cover letter (spec §4.5 rule 5).
pub(crate) async fn collate_series_entries(store: &Store, card: &PatchCard) -> Result<Vec<SeriesPatchEntry>> {
    let Some(series_message_id) = &card.series_message_id else {
        return Ok(Vec::new());
    };
    let sub_patches = store.feed_messages.find_sub_patches(series_message_id).await?;
    Ok(sub_patches
        .into_iter()
        .map(|m| SeriesPatchEntry {
            message_id: m.message_id_header,
            patch_index: m.patch_index,
            subject: m.subject,
            author: m.author,
        })
        .collect())
}

/// Dispatch a prepared, non-suppressed card to every configured platform,
/// recording the resulting platform message id.
pub async fn dispatch(store: &Store, sender: &MultiPlatformSender, prepared: &PreparedCard) -> Result<()> {
    if prepared.suppressed {
        tracing::debug!(message_id_header = %prepared.card.message_id_header, "card suppressed by exclusive-mode filters");
        return Ok(());
    }

    let sent = sender.send_patch_card(&prepared.card, &prepared.series_entries, &prepared.matched_filters).await?;

    store
        .patch_cards
        .set_platform_ids(&prepared.card.message_id_header, &sent.platform_message_id, &sent.platform_channel_id)
        .await?;

    Ok(())
}
