//! CC-list fetcher (spec §4.6, §6): resolves the To+CC address list for a
//! PatchCard's root URL. The wire format isn't pinned down beyond "fetch
//! the root URL and pull out the recipient addresses"; this follows
//! lore.kernel.org's own convention of a `/raw` suffix returning the raw
//! RFC 2822 message, and extracts addresses from its `To:`/`Cc:` header
//! lines only (never the body, so a quoted address in a reply never
//! counts as a CC).

use crate::error::Result;
use async_trait::async_trait;
use std::sync::LazyLock;

/// Core is agnostic to how a CC list gets resolved (spec §6) — this trait
/// is the seam `filters::resolve_cc_list` calls through.
#[async_trait]
pub trait CcListFetcher: Send + Sync {
    async fn fetch_cc_list(&self, root_url: &str) -> Result<Vec<String>>;
}

static EMAIL_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").unwrap());

/// Pull every address out of the `To:`/`Cc:` header lines of a raw RFC
/// 2822 message. Header lines run from the top of the message to the
/// first blank line; anything after that is the body and is ignored.
fn extract_to_cc_addresses(raw_message: &str) -> Vec<String> {
    raw_message
        .lines()
        .take_while(|line| !line.is_empty())
        .filter(|line| {
            let lower = line.to_lowercase();
            lower.starts_with("to:") || lower.starts_with("cc:")
        })
        .flat_map(|line| EMAIL_RE.find_iter(line).map(|m| m.as_str().to_string()))
        .collect()
}

#[async_trait]
impl CcListFetcher for super::client::FeedClient {
    async fn fetch_cc_list(&self, root_url: &str) -> Result<Vec<String>> {
        let raw_url = if root_url.ends_with('/') {
            format!("{root_url}raw")
        } else {
            format!("{root_url}/raw")
        };
        let body = self.fetch_raw(&raw_url).await?;
        Ok(extract_to_cc_addresses(&body))
    }
}
