//! Feed Entry Parser: turns one Atom entry into the raw fields the
//! classifier needs (spec §4.2).

use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

/// Atom 1.0 feed, as returned by `https://lore.kernel.org/<subsystem>/new.atom`.
#[derive(Debug, Deserialize)]
pub struct AtomFeed {
    #[serde(rename = "entry", default)]
    pub entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize, Default)]
pub struct AtomEntry {
    pub id: Option<String>,
    pub title: Option<String>,
    pub updated: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<AtomAuthor>,
    #[serde(rename = "link", default)]
    pub links: Vec<AtomLink>,
    /// Atom Threading Extension (RFC 4685) `<thr:in-reply-to>` element.
    #[serde(rename = "in-reply-to", default)]
    pub in_reply_to: Option<AtomInReplyTo>,
}

#[derive(Debug, Deserialize, Default)]
pub struct AtomAuthor {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AtomLink {
    pub href: Option<String>,
    #[serde(default)]
    pub rel: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct AtomInReplyTo {
    pub href: Option<String>,
    #[serde(rename = "ref")]
    pub reference: Option<String>,
}

/// The fields the classifier and store need, extracted from one entry.
#[derive(Debug, Clone)]
pub struct RawFeedEntry {
    pub message_id: String,
    pub message_id_header: Option<String>,
    pub in_reply_to_header: Option<String>,
    /// True if `in_reply_to_header` came from an unresolvable `urn:uuid:`
    /// `ref` attribute (spec §4.2, §9 open question) — such replies never
    /// join a reply tree but the header is still recorded.
    pub in_reply_to_is_opaque_uuid: bool,
    pub subject: String,
    pub author: String,
    pub author_email: String,
    pub content: String,
    pub url: String,
    pub received_at: chrono::DateTime<chrono::Utc>,
}

static EMAIL_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").unwrap()
});

/// Extract the last non-empty path segment of a URL, with its trailing
/// slash stripped. Returns `None` if the path has fewer than two segments
/// (spec §4.2).
pub fn last_path_segment(url: &str) -> Option<String> {
    let path = url
        .split_once("://")
        .map(|(_, rest)| rest.split_once('/').map(|(_, p)| p).unwrap_or(""))
        .unwrap_or(url);

    let segments: Vec<&str> = path
        .trim_end_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    if segments.len() < 2 {
        return None;
    }
    segments.last().map(|s| s.to_string())
}

/// Extract an email address from a free-text author string: `<a@b>`,
/// `(a@b)`, or a bare RFC-ish address (spec §4.2).
pub fn extract_author_email(author: &str) -> Option<String> {
    if let Some(start) = author.find('<') {
        if let Some(end) = author[start..].find('>') {
            let inner = &author[start + 1..start + end];
            if inner.contains('@') {
                return Some(inner.to_string());
            }
        }
    }
    if let Some(start) = author.find('(') {
        if let Some(end) = author[start..].find(')') {
            let inner = &author[start + 1..start + end];
            if inner.contains('@') {
                return Some(inner.to_string());
            }
        }
    }
    EMAIL_RE.find(author).map(|m| m.as_str().to_string())
}

fn uuid_ref(reference: &str) -> bool {
    reference.starts_with("urn:uuid:")
}

/// Turn one Atom entry into a [`RawFeedEntry`], for a given subsystem
/// (used to build the synthetic `message_id` fallback hash).
pub fn extract_entry(subsystem: &str, entry: &AtomEntry) -> RawFeedEntry {
    let url = entry
        .links
        .iter()
        .find(|l| l.rel.as_deref().unwrap_or("alternate") == "alternate")
        .or_else(|| entry.links.first())
        .and_then(|l| l.href.clone())
        .unwrap_or_default();

    let message_id_header = last_path_segment(&url);

    let (in_reply_to_header, in_reply_to_is_opaque_uuid) = match &entry.in_reply_to {
        Some(irt) => {
            if let Some(href) = irt.href.as_deref().filter(|h| !h.is_empty()) {
                (last_path_segment(href), false)
            } else if let Some(reference) = irt.reference.as_deref().filter(|r| !r.is_empty()) {
                (Some(reference.to_string()), uuid_ref(reference))
            } else {
                (None, false)
            }
        }
        None => (None, false),
    };

    let received_at = entry
        .updated
        .as_deref()
        .and_then(|raw| chrono::DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(chrono::Utc::now);

    let author = entry
        .author
        .as_ref()
        .and_then(|a| a.name.clone())
        .unwrap_or_default();
    let author_email = extract_author_email(&author).unwrap_or_default();

    let subject = entry.title.clone().unwrap_or_default();

    let content = entry
        .summary
        .clone()
        .filter(|s| !s.is_empty())
        .or_else(|| entry.description.clone().filter(|s| !s.is_empty()))
        .unwrap_or_default();

    let message_id = entry
        .id
        .clone()
        .filter(|s| !s.is_empty())
        .or_else(|| Some(url.clone()).filter(|s| !s.is_empty()))
        .unwrap_or_else(|| synthesize_message_id(subsystem, &subject, received_at));

    RawFeedEntry {
        message_id,
        message_id_header,
        in_reply_to_header,
        in_reply_to_is_opaque_uuid,
        subject,
        author,
        author_email,
        content,
        url,
        received_at,
    }
}

/// First 40 hex chars of SHA-256 of `subsystem|subject|received_ts`, used
/// only when the feed entry has neither `id` nor `link` (spec §4.2).
pub fn synthesize_message_id(
    subsystem: &str,
    subject: &str,
    received_at: chrono::DateTime<chrono::Utc>,
) -> String {
    let input = format!("{subsystem}|{subject}|{}", received_at.timestamp());
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)[..40].to_string()
}

pub fn parse_atom_feed(body: &str) -> Result<AtomFeed, serde_xml_rs::Error> {
    serde_xml_rs::from_str(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_path_segment_strips_trailing_slash() {
        assert_eq!(
            last_path_segment("https://lore.kernel.org/subsys/abc@d/"),
            Some("abc@d".to_string())
        );
    }

    #[test]
    fn last_path_segment_nil_below_two_segments() {
        assert_eq!(last_path_segment("https://lore.kernel.org/"), None);
        assert_eq!(last_path_segment("https://lore.kernel.org/subsys/"), None);
    }

    #[test]
    fn extracts_email_from_angle_brackets() {
        assert_eq!(
            extract_author_email("Alice <a@ex.com>"),
            Some("a@ex.com".to_string())
        );
    }

    #[test]
    fn extracts_email_from_parens() {
        assert_eq!(
            extract_author_email("a@ex.com (Alice)"),
            Some("a@ex.com".to_string())
        );
    }

    #[test]
    fn extracts_bare_email() {
        assert_eq!(
            extract_author_email("just a@ex.com in text"),
            Some("a@ex.com".to_string())
        );
    }

    #[test]
    fn flags_opaque_uuid_ref() {
        let entry = AtomEntry {
            in_reply_to: Some(AtomInReplyTo {
                href: None,
                reference: Some("urn:uuid:1234".to_string()),
            }),
            links: vec![AtomLink {
                href: Some("https://lore.kernel.org/subsys/abc@d/".into()),
                rel: Some("alternate".into()),
            }],
            ..Default::default()
        };
        let raw = extract_entry("subsys", &entry);
        assert_eq!(raw.in_reply_to_header.as_deref(), Some("urn:uuid:1234"));
        assert!(raw.in_reply_to_is_opaque_uuid);
    }

    #[test]
    fn prefers_href_over_ref_for_in_reply_to() {
        let entry = AtomEntry {
            in_reply_to: Some(AtomInReplyTo {
                href: Some("https://lore.kernel.org/subsys/cov@x/".into()),
                reference: Some("urn:uuid:1234".into()),
            }),
            links: vec![AtomLink {
                href: Some("https://lore.kernel.org/subsys/abc@d/".into()),
                rel: Some("alternate".into()),
            }],
            ..Default::default()
        };
        let raw = extract_entry("subsys", &entry);
        assert_eq!(raw.in_reply_to_header.as_deref(), Some("cov@x"));
        assert!(!raw.in_reply_to_is_opaque_uuid);
    }
}
