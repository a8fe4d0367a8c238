//! Filter Engine (spec §4.6): decides whether a PatchCard is suppressed
//! (exclusive mode) or merely highlighted (highlight mode), by evaluating
//! named filters against a fixed set of fields.

use crate::feed::cc_fetcher::CcListFetcher;
use crate::model::{FilterCondition, FilterPattern, PatchCard, PatchCardFilter};
use crate::store::Store;
use regex::Regex;

/// Fields a filter condition may target. Anything else is rejected at
/// filter-creation time by the caller, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Subject,
    Author,
    AuthorEmail,
    Subsystem,
    Keywords,
    CcList,
}

impl Field {
    /// Recognizes both spellings spec §3 lists for subsystem and
    /// CC-list (`subsys`/`subsystem`, `cclist`/`cc`).
    fn from_key(key: &str) -> Option<Self> {
        match key {
            "subject" => Some(Field::Subject),
            "author" => Some(Field::Author),
            "author_email" => Some(Field::AuthorEmail),
            "subsys" | "subsystem" => Some(Field::Subsystem),
            "keywords" => Some(Field::Keywords),
            "cclist" | "cc" => Some(Field::CcList),
            _ => None,
        }
    }
}

/// The values a single PatchCard exposes to the filter engine, resolved
/// once per evaluation (the CC list requires a series-root lookup).
pub struct FilterableCard<'a> {
    pub subject: &'a str,
    pub author: &'a str,
    pub author_email: &'a str,
    pub subsystem: &'a str,
    /// Feed summary content; `keywords` matches against this. Absent
    /// content never matches (spec §4.6).
    pub content: &'a str,
    pub cc_list: &'a [String],
}

/// Result of evaluating all filters against one card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterOutcome {
    /// Names of every filter that matched, in evaluation order.
    pub matched_filters: Vec<String>,
    /// Whether the card should be suppressed entirely. Always `false` in
    /// highlight mode.
    pub suppressed: bool,
}

impl FilterOutcome {
    pub fn matched(&self) -> bool {
        !self.matched_filters.is_empty()
    }
}

/// Matches one pattern against one field value. A plain [`FilterPattern::Substring`]
/// is case-insensitive; a [`FilterPattern::Regex`] is compiled on every call —
/// filters are small in number and evaluated at most once per cycle per
/// card, so there is no cache (spec §4.6 doesn't require one).
fn pattern_matches(pattern: &FilterPattern, value: &str) -> Result<bool, regex::Error> {
    match pattern {
        FilterPattern::Substring(needle) => Ok(value.to_lowercase().contains(&needle.to_lowercase())),
        FilterPattern::Regex { pattern, case_insensitive } => {
            let compiled = if *case_insensitive {
                Regex::new(&format!("(?i){pattern}"))?
            } else {
                Regex::new(pattern)?
            };
            Ok(compiled.is_match(value))
        }
    }
}

fn condition_matches(condition: &FilterCondition, value: &str) -> Result<bool, regex::Error> {
    match condition {
        FilterCondition::One(pattern) => pattern_matches(pattern, value),
        FilterCondition::AnyOf(patterns) => {
            for pattern in patterns {
                if pattern_matches(pattern, value)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
    }
}

/// `keywords` never matches absent content (spec §4.6); every other
/// field always has a value to test against, even if empty.
fn field_value<'a>(card: &FilterableCard<'a>, field: Field) -> Option<String> {
    match field {
        Field::Subject => Some(card.subject.to_string()),
        Field::Author => Some(card.author.to_string()),
        Field::AuthorEmail => Some(card.author_email.to_string()),
        Field::Subsystem => Some(card.subsystem.to_string()),
        Field::Keywords => (!card.content.is_empty()).then(|| card.content.to_string()),
        Field::CcList => Some(card.cc_list.join(" ")),
    }
}

/// All conditions within a filter are ANDed; an unknown field name fails
/// the whole filter rather than panicking (malformed filters just never
/// match, spec §4.6 edge cases).
fn filter_matches(filter: &PatchCardFilter, card: &FilterableCard) -> bool {
    for (field_key, condition) in &filter.filter_conditions {
        let Some(field) = Field::from_key(field_key) else {
            tracing::warn!(filter = %filter.name, field = %field_key, "unknown filter field, skipping filter");
            return false;
        };
        let Some(value) = field_value(card, field) else {
            return false;
        };
        match condition_matches(condition, &value) {
            Ok(true) => continue,
            Ok(false) => return false,
            Err(error) => {
                tracing::warn!(filter = %filter.name, %error, "invalid filter regex, skipping filter");
                return false;
            }
        }
    }
    true
}

/// Evaluate every enabled filter (ORed against each other) against `card`,
/// honoring the global exclusive/highlight mode.
pub fn evaluate(filters: &[PatchCardFilter], exclusive_mode: bool, card: &FilterableCard) -> FilterOutcome {
    let matched_filters: Vec<String> = filters
        .iter()
        .filter(|f| filter_matches(f, card))
        .map(|f| f.name.clone())
        .collect();

    let suppressed = exclusive_mode && matched_filters.is_empty();

    FilterOutcome { matched_filters, suppressed }
}

/// Resolve the CC list for a card: the space-joined To+CC addresses of
/// its root message (spec §4.6). A PatchCard is always a series root or a
/// standalone patch (sub-patches never get their own card, spec §4.5 rule
/// 3), so `card.url` is always the right root to fetch — cached on the
/// card if a previous cycle already resolved it.
pub async fn resolve_cc_list(
    store: &Store,
    fetcher: &dyn CcListFetcher,
    card: &PatchCard,
) -> crate::error::Result<Vec<String>> {
    if let Some(cached) = &card.to_cc_list {
        return Ok(cached.clone());
    }

    match fetcher.fetch_cc_list(&card.url).await {
        Ok(addresses) => {
            if !addresses.is_empty() {
                store.patch_cards.set_to_cc_list(&card.message_id_header, &addresses).await?;
            }
            Ok(addresses)
        }
        Err(error) => {
            tracing::warn!(message_id_header = %card.message_id_header, %error, "cc-list fetch failed, treating as empty");
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    fn make_filter(name: &str, field: &str, condition: FilterCondition) -> PatchCardFilter {
        let mut conditions = HashMap::new();
        conditions.insert(field.to_string(), condition);
        PatchCardFilter {
            id: 1,
            name: name.to_string(),
            enabled: true,
            filter_conditions: conditions,
            description: None,
            created_by: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn substring_match_is_case_insensitive() {
        let filter = make_filter(
            "mm",
            "subject",
            FilterCondition::One(FilterPattern::Substring("SLAB".into())),
        );
        let card = FilterableCard {
            subject: "[PATCH] mm/slab: fix leak",
            author: "a",
            author_email: "a@b",
            subsystem: "linux-mm",
            content: "",
            cc_list: &[],
        };
        let outcome = evaluate(&[filter], false, &card);
        assert!(outcome.matched());
    }

    #[test]
    fn regex_pattern_matches() {
        let filter = make_filter(
            "versioned",
            "subject",
            FilterCondition::One(FilterPattern::Regex { pattern: r"v\d+".into(), case_insensitive: true }),
        );
        let card = FilterableCard {
            subject: "[PATCH V3 1/2] foo",
            author: "a",
            author_email: "a@b",
            subsystem: "linux-mm",
            content: "",
            cc_list: &[],
        };
        assert!(evaluate(&[filter], false, &card).matched());
    }

    #[test]
    fn exclusive_mode_suppresses_unmatched_cards() {
        let filter = make_filter(
            "mm",
            "subject",
            FilterCondition::One(FilterPattern::Substring("zzz-no-match".into())),
        );
        let card = FilterableCard {
            subject: "[PATCH] fix foo",
            author: "a",
            author_email: "a@b",
            subsystem: "linux-mm",
            content: "",
            cc_list: &[],
        };
        let outcome = evaluate(&[filter], true, &card);
        assert!(outcome.suppressed);
        assert!(!outcome.matched());
    }

    #[test]
    fn highlight_mode_never_suppresses() {
        let filter = make_filter(
            "mm",
            "subject",
            FilterCondition::One(FilterPattern::Substring("zzz-no-match".into())),
        );
        let card = FilterableCard {
            subject: "[PATCH] fix foo",
            author: "a",
            author_email: "a@b",
            subsystem: "linux-mm",
            content: "",
            cc_list: &[],
        };
        let outcome = evaluate(&[filter], false, &card);
        assert!(!outcome.suppressed);
    }

    #[test]
    fn unknown_field_fails_the_filter_without_panicking() {
        let filter = make_filter(
            "bogus",
            "not_a_real_field",
            FilterCondition::One(FilterPattern::Substring("x".into())),
        );
        let card = FilterableCard {
            subject: "[PATCH] fix foo",
            author: "a",
            author_email: "a@b",
            subsystem: "linux-mm",
            content: "",
            cc_list: &[],
        };
        assert!(!evaluate(&[filter], false, &card).matched());
    }

    #[test]
    fn multiple_conditions_in_one_filter_are_anded() {
        let mut conditions = HashMap::new();
        conditions.insert(
            "subject".to_string(),
            FilterCondition::One(FilterPattern::Substring("mm/".into())),
        );
        conditions.insert(
            "author".to_string(),
            FilterCondition::One(FilterPattern::Substring("alice".into())),
        );
        let filter = PatchCardFilter {
            id: 1,
            name: "both".into(),
            enabled: true,
            filter_conditions: conditions,
            description: None,
            created_by: None,
            created_at: Utc::now(),
        };

        let matches = FilterableCard {
            subject: "[PATCH] mm/slab: fix",
            author: "Alice <a@ex.com>",
            author_email: "a@ex.com",
            subsystem: "linux-mm",
            content: "",
            cc_list: &[],
        };
        let no_match = FilterableCard {
            subject: "[PATCH] mm/slab: fix",
            author: "Bob <b@ex.com>",
            author_email: "b@ex.com",
            subsystem: "linux-mm",
            content: "",
            cc_list: &[],
        };

        assert!(evaluate(&[filter.clone()], false, &matches).matched());
        assert!(!evaluate(&[filter], false, &no_match).matched());
    }

    #[test]
    fn keywords_matches_content_and_never_matches_when_absent() {
        let filter = make_filter(
            "kw",
            "keywords",
            FilterCondition::One(FilterPattern::Substring("use-after-free".into())),
        );
        let with_content = FilterableCard {
            subject: "[PATCH] fix",
            author: "a",
            author_email: "a@b",
            subsystem: "linux-mm",
            content: "fixes a use-after-free in slab allocation",
            cc_list: &[],
        };
        let without_content = FilterableCard { content: "", ..with_content };

        assert!(evaluate(&[filter.clone()], false, &with_content).matched());
        assert!(!evaluate(&[filter], false, &without_content).matched());
    }

    #[test]
    fn subsys_and_cclist_aliases_are_recognized() {
        let subsys_filter = make_filter(
            "subsys-alias",
            "subsys",
            FilterCondition::One(FilterPattern::Substring("linux-mm".into())),
        );
        let cc_filter = make_filter(
            "cc-alias",
            "cc",
            FilterCondition::One(FilterPattern::Substring("bob@ex.com".into())),
        );
        let card = FilterableCard {
            subject: "[PATCH] fix",
            author: "a",
            author_email: "a@b",
            subsystem: "linux-mm",
            content: "",
            cc_list: &["alice@ex.com".to_string(), "bob@ex.com".to_string()],
        };

        assert!(evaluate(&[subsys_filter], false, &card).matched());
        assert!(evaluate(&[cc_filter], false, &card).matched());
    }
}
