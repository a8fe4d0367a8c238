//! Message Classifier: decides PATCH/REPLY/cover-letter and parses series
//! info from the subject alone (spec §4.3). Pure function of
//! `(subject, in_reply_to_header, message_id_header)`.

use std::sync::LazyLock;

/// Outcome of [`classify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub is_patch: bool,
    pub is_reply: bool,
    pub is_series_patch: bool,
    pub patch_info: Option<PatchInfo>,
    pub series_message_id: Option<String>,
}

impl Classification {
    fn other() -> Self {
        Self {
            is_patch: false,
            is_reply: false,
            is_series_patch: false,
            patch_info: None,
            series_message_id: None,
        }
    }

    fn reply() -> Self {
        Self {
            is_reply: true,
            ..Self::other()
        }
    }
}

/// Parsed `[PATCH ...]` bracket contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchInfo {
    pub version: Option<String>,
    pub index: i64,
    pub total: i64,
    pub is_cover_letter: bool,
}

static BRACKET_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"(?i)\[([^\]]*patch[^\]]*)\]").unwrap());
static VERSION_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"(?i)\bv(\d+)\b").unwrap());
static INDEX_TOTAL_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\b(\d+)/(\d+)\b").unwrap());

/// Rule order from spec §4.3:
/// 1. `Re:` prefix (case-insensitive) -> REPLY, wins over everything else.
/// 2. Bracketed `[... PATCH ...]` token, or a `patch:` prefix -> PATCH.
/// 3. Extract version and index/total from the bracket contents.
/// 4. `total >= 1` -> series patch; cover letter iff no `in_reply_to_header`.
/// 5. Otherwise a single PATCH.
pub fn classify(
    subject: &str,
    in_reply_to_header: Option<&str>,
    message_id_header: Option<&str>,
) -> Classification {
    if subject.to_lowercase().starts_with("re:") {
        return Classification::reply();
    }

    let Some(mut patch_info) = parse_patch_subject(subject) else {
        tracing::warn!(subject = %truncate(subject, 100), "failed to classify subject as PATCH");
        return Classification::other();
    };

    let mut classification = Classification {
        is_patch: true,
        is_reply: false,
        is_series_patch: false,
        patch_info: None,
        series_message_id: None,
    };

    if patch_info.total >= 1 {
        classification.is_series_patch = true;
        if in_reply_to_header.is_none() {
            patch_info.is_cover_letter = true;
            classification.series_message_id = message_id_header.map(str::to_string);
        } else {
            patch_info.is_cover_letter = false;
            classification.series_message_id = in_reply_to_header.map(str::to_string);
        }
    } else {
        classification.is_series_patch = false;
        patch_info.is_cover_letter = false;
    }

    classification.patch_info = Some(patch_info);
    classification
}

/// Parse the `[PATCH ...]` bracket out of a subject line, independent of
/// REPLY classification. Returns `None` if no PATCH token is present.
pub fn parse_patch_subject(subject: &str) -> Option<PatchInfo> {
    let subject_lower = subject.to_lowercase();
    let has_patch_keyword =
        (subject_lower.contains("patch") && subject_lower.contains('[')) || subject_lower.starts_with("patch:");
    if !has_patch_keyword {
        return None;
    }

    let Some(captures) = BRACKET_RE.captures(subject) else {
        // `patch:` prefix with no bracket still counts as an (unversioned,
        // non-series) PATCH.
        return Some(PatchInfo {
            version: None,
            index: 0,
            total: 0,
            is_cover_letter: false,
        });
    };
    let bracket_content = &captures[1];

    let version = VERSION_RE
        .captures(bracket_content)
        .map(|c| format!("v{}", &c[1]));

    let (index, total) = INDEX_TOTAL_RE
        .captures(bracket_content)
        .map(|c| {
            (
                c[1].parse::<i64>().unwrap_or(0),
                c[2].parse::<i64>().unwrap_or(0),
            )
        })
        .unwrap_or((0, 0));

    Some(PatchInfo {
        version,
        index,
        total,
        is_cover_letter: total >= 1 && index == 0,
    })
}

/// Inverse of [`parse_patch_subject`]'s index/total/version extraction —
/// renders a `[PATCH ...]` bracket for round-trip testing (spec §8).
pub fn render_subject(version: Option<&str>, index: i64, total: i64, title: &str) -> String {
    let mut bracket = String::from("PATCH");
    if let Some(v) = version {
        bracket.push(' ');
        bracket.push_str(v);
    }
    if total >= 1 {
        bracket.push_str(&format!(" {index}/{total}"));
    }
    format!("[{bracket}] {title}")
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        s[..max].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_prefix_wins_over_patch_bracket() {
        let c = classify("Re: [PATCH 2/3] fix foo", None, Some("id1"));
        assert!(c.is_reply);
        assert!(!c.is_patch);
    }

    #[test]
    fn single_patch_has_no_series() {
        let c = classify("[PATCH] fix typo in foo", None, Some("abc@d"));
        assert!(c.is_patch);
        assert!(!c.is_series_patch);
        assert_eq!(c.series_message_id, None);
    }

    #[test]
    fn cover_letter_with_no_in_reply_to() {
        let c = classify("[PATCH 0/2] series X", None, Some("cov@x"));
        let info = c.patch_info.unwrap();
        assert!(c.is_series_patch);
        assert!(info.is_cover_letter);
        assert_eq!(c.series_message_id.as_deref(), Some("cov@x"));
    }

    #[test]
    fn sub_patch_with_in_reply_to() {
        let c = classify("[PATCH 1/2] A", Some("cov@x"), Some("sub1@x"));
        let info = c.patch_info.unwrap();
        assert!(c.is_series_patch);
        assert!(!info.is_cover_letter);
        assert_eq!(c.series_message_id.as_deref(), Some("cov@x"));
    }

    #[test]
    fn multiple_brackets_picks_the_one_with_patch() {
        let c = classify("[for-linus][PATCH 0/2] series X", None, Some("cov@x"));
        let info = c.patch_info.unwrap();
        assert_eq!(info.index, 0);
        assert_eq!(info.total, 2);
    }

    #[test]
    fn version_and_index_total_both_present() {
        let c = classify("[PATCH v5 1/4] foo", Some("cov@x"), Some("id"));
        let info = c.patch_info.unwrap();
        assert_eq!(info.version.as_deref(), Some("v5"));
        assert_eq!((info.index, info.total), (1, 4));
    }

    #[test]
    fn unparseable_subject_is_other() {
        let c = classify("just a random subject", None, None);
        assert!(!c.is_patch);
        assert!(!c.is_reply);
        assert_eq!(c.patch_info, None);
    }

    #[test]
    fn render_subject_round_trips_for_all_valid_index_total_pairs() {
        for total in 0..=20i64 {
            let max_index = if total == 0 { 0 } else { total };
            for index in 0..=max_index {
                let subject = render_subject(Some("v3"), index, total, "some title");
                let info = parse_patch_subject(&subject).unwrap();
                assert_eq!(info.version.as_deref(), Some("v3"));
                assert_eq!((info.index, info.total), (index, total));
            }
        }
    }
}
