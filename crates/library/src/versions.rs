//! Edition suffix parsing for album titles ("Album (Deluxe Edition)").

use std::sync::OnceLock;

use regex::Regex;

/// Canonical edition tag and the keywords that select it.
pub const EDITION_TABLE: &[(&str, &[&str])] = &[
    ("explicit", &["explicit"]),
    ("360 audio", &["360 audio"]),
    ("anniversary", &["anniversary"]),
    ("diamond edition", &["diamond"]),
    ("centennial edition", &["centennial"]),
    ("golden edition", &["gold"]),
    ("platinum edition", &["platinum"]),
    ("silver edition", &["silver"]),
    ("ultimate edition", &["ultimate"]),
    ("expanded", &["expanded"]),
    ("extended", &["extended"]),
    ("deluxe", &["deluxe"]),
    ("super deluxe", &["super deluxe"]),
    ("complete", &["complete"]),
    ("legacy edition", &["legacy"]),
    ("special edition", &["special"]),
    ("collectors edition", &["collector"]),
    ("archive edition", &["archive"]),
    ("acoustic", &["acoustic"]),
    ("instrumental", &["instrumental"]),
    ("double disc", &["double disc", "double disk"]),
    ("unplugged", &["unplugged"]),
    ("summer edition", &["summer"]),
    ("winter edition", &["winter"]),
    ("spring edition", &["spring"]),
    ("fall edition", &["fall"]),
    ("bonus edition", &["bonus"]),
    ("bonus track", &["bonus track"]),
    ("original", &["original"]),
    ("international version", &["international"]),
    ("uk version", &["uk version"]),
    ("us version", &["us version"]),
    ("parental advisory", &["pa version"]),
    ("limited edition", &["limited"]),
    ("mono", &["mono"]),
    ("stereo", &["stereo"]),
    ("hi res", &["hi-res", "hi res", "hires"]),
    ("remix", &["re-mix", "remix"]),
    ("re-recorded", &["re-recorded", "rerecorded"]),
    ("reissue", &["reissue"]),
    ("remastered", &["remaster"]),
];

const ANNIVERSARY_TAG: &str = "anniversary";
const DELUXE_TAG: &str = "deluxe";
const SUPER_DELUXE_TAG: &str = "super deluxe";
const ORIGINAL_TAG: &str = "original";

fn suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let keywords: Vec<String> = EDITION_TABLE
            .iter()
            .flat_map(|(_, words)| words.iter().map(|w| regex::escape(w)))
            .collect();
        let pattern = format!(
            r"(?i)\s*[\(\[][^\)\]]*?(?:{})[^\)\]]*?[\)\]]$",
            keywords.join("|")
        );
        Regex::new(&pattern).expect("edition pattern compiles")
    })
}

fn ordinal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(\d+\w*)\s+anniversary").expect("valid regex"))
}

/// Splits a raw album title into its base title and the edition tags found
/// in a trailing bracketed suffix. Titles without such a suffix come back
/// unchanged with no tags.
pub fn parse_edition(og_title: &str) -> (String, Vec<String>) {
    let trimmed = og_title.trim_end();
    let found = match suffix_re().find(trimmed) {
        Some(found) => found,
        None => return (og_title.to_string(), Vec::new()),
    };

    let base = trimmed[..found.start()].trim().to_string();
    if base.is_empty() {
        return (og_title.to_string(), Vec::new());
    }

    let suffix = found.as_str();
    let haystack = suffix.to_lowercase();
    let mut versions: Vec<String> = Vec::new();
    for (tag, words) in EDITION_TABLE {
        if words.iter().any(|w| contains_word(&haystack, w)) {
            versions.push((*tag).to_string());
        }
    }

    if let Some(pos) = versions.iter().position(|v| v == ANNIVERSARY_TAG) {
        versions.remove(pos);
        let label = match ordinal_re().captures(suffix).and_then(|c| c.get(1)) {
            Some(ordinal) => format!("{} {}", ordinal.as_str().to_lowercase(), ANNIVERSARY_TAG),
            None => ANNIVERSARY_TAG.to_string(),
        };
        versions.insert(0, label);
    }

    (base, versions)
}

/// Drops tags made redundant by others or by the album type.
pub fn prune_versions(mut versions: Vec<String>, is_soundtrack: bool) -> Vec<String> {
    if versions.iter().any(|v| v == SUPER_DELUXE_TAG) {
        versions.retain(|v| v != DELUXE_TAG);
    }
    if is_soundtrack {
        versions.retain(|v| v != ORIGINAL_TAG);
    }
    versions
}

/// The title with any edition suffix removed.
pub fn base_title(title: &str) -> String {
    parse_edition(title).0
}

fn contains_word(haystack: &str, word: &str) -> bool {
    // "gold" must not fire on "golden": only accept matches at word starts.
    let mut from = 0;
    while let Some(pos) = haystack[from..].find(word) {
        let start = from + pos;
        let boundary = haystack[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        if boundary {
            return true;
        }
        from = start + word.len();
    }
    false
}
