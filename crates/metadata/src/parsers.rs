//! Pure text transforms applied to raw tag values.

use std::ops::Range;
use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// User switches that shape how raw tags become library entities.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagOptions {
    pub artist_separators: Vec<String>,
    pub artist_split_ignore_list: Vec<String>,
    pub genre_separators: Vec<String>,
    pub extract_featured_artists: bool,
    pub remove_prod_by: bool,
    pub remove_remaster_info: bool,
    pub merge_albums: bool,
    pub clean_album_title: bool,
    pub show_albums_as_singles: bool,
}

impl Default for TagOptions {
    fn default() -> Self {
        Self {
            artist_separators: vec![";".to_string(), "/".to_string()],
            artist_split_ignore_list: Vec::new(),
            genre_separators: vec!["/".to_string(), ";".to_string(), "&".to_string()],
            extract_featured_artists: true,
            remove_prod_by: true,
            remove_remaster_info: true,
            merge_albums: false,
            clean_album_title: true,
            show_albums_as_singles: false,
        }
    }
}

/// Artist/title pair guessed from a file name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilenameInfo {
    pub artist: Option<String>,
    pub title: String,
}

fn feat_paren_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\s*\((?:feat|ft|featuring|with)\.?\s+(.+?)\)").expect("valid regex")
    })
}

fn feat_bracket_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\s*\[(?:feat|ft|featuring|with)\.?\s+(.+?)\]").expect("valid regex")
    })
}

fn prod_bracket_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\s*[\(\[]\s*prod\.?(?:uced)?\s+(?:by\s+)?[^\)\]]*[\)\]]")
            .expect("valid regex")
    })
}

fn prod_dash_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\s+-\s+prod\.?(?:uced)?\s+.*$").expect("valid regex"))
}

fn remaster_bracket_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\s*[\(\[][^\)\]]*remaster[^\)\]]*[\)\]]").expect("valid regex")
    })
}

fn official_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\s*[\(\[][^\)\]]*official[^\)\]]*[\)\]]").expect("valid regex"))
}

/// Splits an artist tag into names. Entries of `ignore_list` are kept whole
/// even when they contain a separator ("AC/DC").
pub fn split_artists(src: &str, separators: &[String], ignore_list: &[String]) -> Vec<String> {
    let mut working = src.to_string();
    for (idx, keep) in ignore_list.iter().enumerate() {
        if keep.is_empty() {
            continue;
        }
        if let Some(range) = find_ignore_case(&working, keep) {
            working.replace_range(range, &placeholder(idx));
        }
    }

    let mut parts = vec![working];
    for sep in separators.iter().map(String::as_str).chain(std::iter::once(",")) {
        if sep.is_empty() {
            continue;
        }
        parts = parts
            .iter()
            .flat_map(|part| part.split(sep).map(str::to_string).collect::<Vec<_>>())
            .collect();
    }

    let mut out: Vec<String> = Vec::new();
    for part in parts {
        let mut name = part.trim().to_string();
        for (idx, keep) in ignore_list.iter().enumerate() {
            let token = placeholder(idx);
            if name.contains(&token) {
                name = name.replace(&token, keep);
            }
        }
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        if !out.iter().any(|existing| existing.eq_ignore_ascii_case(name)) {
            out.push(name.to_string());
        }
    }
    out
}

fn placeholder(idx: usize) -> String {
    format!("\u{1}{}\u{1}", idx)
}

fn find_ignore_case(haystack: &str, needle: &str) -> Option<Range<usize>> {
    RegexBuilder::new(&regex::escape(needle))
        .case_insensitive(true)
        .build()
        .ok()?
        .find(haystack)
        .map(|m| m.range())
}

/// Pulls "(feat. X)" style credits out of a title.
///
/// Returns the featured names and the title with the credit removed, or
/// `None` when the title carries no credit.
pub fn parse_feat_from_title(
    title: &str,
    separators: &[String],
    ignore_list: &[String],
) -> Option<(Vec<String>, String)> {
    let captures = feat_paren_re()
        .captures(title)
        .or_else(|| feat_bracket_re().captures(title))?;
    let whole = captures.get(0)?;
    let credited = captures.get(1)?.as_str();

    let mut separators = separators.to_vec();
    separators.push("&".to_string());
    let mut artists = split_artists(credited, &separators, ignore_list);
    // "A and B" inside a credit lists two artists.
    artists = artists
        .into_iter()
        .flat_map(|name| {
            name.split(" and ")
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .collect::<Vec<_>>()
        })
        .collect();

    let mut new_title = String::with_capacity(title.len());
    new_title.push_str(&title[..whole.start()]);
    new_title.push_str(&title[whole.end()..]);
    Some((artists, new_title.trim().to_string()))
}

/// Drops "(prod. by X)" and "- prod. X" producer credits.
pub fn remove_prod(title: &str) -> String {
    let without_brackets = prod_bracket_re().replace_all(title, "");
    let without_dash = prod_dash_re().replace(&without_brackets, "");
    let cleaned = without_dash.trim();
    if cleaned.is_empty() {
        title.trim().to_string()
    } else {
        cleaned.to_string()
    }
}

/// Removes remaster annotations, keeping the shortest non-empty candidate.
pub fn clean_title(title: &str) -> String {
    if !title.to_lowercase().contains("remaster") {
        return title.to_string();
    }

    let mut candidates: Vec<String> = Vec::new();
    let bracketless = remaster_bracket_re().replace_all(title, "").trim().to_string();
    candidates.push(bracketless);

    if let Some(idx) = title.rfind(" - ") {
        let (head, tail) = title.split_at(idx);
        if tail.to_lowercase().contains("remaster") {
            candidates.push(head.trim().to_string());
        }
    }

    candidates
        .into_iter()
        .filter(|c| !c.is_empty())
        .min_by_key(|c| c.chars().count())
        .unwrap_or_else(|| title.to_string())
}

/// Lowercases and splits a raw genre tag.
pub fn parse_genres(raw: &str, separators: &[String]) -> Vec<String> {
    let mut text = raw.to_lowercase();
    text = text.replace("rock & roll", "rock");
    text = text.replace("r&b", "RnB");

    let mut parts = vec![text];
    for sep in separators.iter().map(String::as_str).chain(std::iter::once(",")) {
        if sep.is_empty() {
            continue;
        }
        parts = parts
            .iter()
            .flat_map(|part| part.split(sep).map(str::to_string).collect::<Vec<_>>())
            .collect();
    }

    let mut out: Vec<String> = Vec::new();
    for part in parts {
        let genre = part.trim();
        if genre.is_empty() || out.iter().any(|g| g == genre) {
            continue;
        }
        out.push(genre.to_string());
    }
    out
}

/// Guesses artist and title from a file stem such as `01 - Artist - Title`.
pub fn extract_artist_title(stem: &str) -> FilenameInfo {
    let cleaned = official_re().replace_all(stem, "");
    let parts: Vec<&str> = cleaned
        .split(" - ")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    let (artist, title) = match parts.as_slice() {
        [] => (None, stem.trim().to_string()),
        [only] => (None, only.to_string()),
        [first, rest @ ..] if parts.len() > 2 && first.chars().all(|c| c.is_ascii_digit()) => {
            (Some(rest[0].to_string()), rest[1..].join(" - "))
        }
        [first, rest @ ..] => (Some(first.to_string()), rest.join(" - ")),
    };

    FilenameInfo {
        artist,
        title: title.replace('_', " ").trim().to_string(),
    }
}

/// Parses `YYYY`, `YYYY-MM` or `YYYY-MM-DD` (any non-digit separator) into
/// a UTC midnight timestamp.
pub fn parse_date(text: &str) -> Option<i64> {
    let mut numbers = text
        .split(|c: char| !c.is_ascii_digit())
        .filter(|p| !p.is_empty());
    let year_text = numbers.next()?;
    if year_text.len() != 4 {
        return None;
    }
    let year: i32 = year_text.parse().ok()?;
    let month = numbers
        .next()
        .and_then(|m| m.parse::<u8>().ok())
        .and_then(|m| time::Month::try_from(m).ok())
        .unwrap_or(time::Month::January);
    let day = numbers
        .next()
        .and_then(|d| d.parse::<u8>().ok())
        .filter(|d| (1..=31).contains(d))
        .unwrap_or(1);

    let date = time::Date::from_calendar_date(year, month, day)
        .or_else(|_| time::Date::from_calendar_date(year, month, 1))
        .ok()?;
    Some(date.midnight().assume_utc().unix_timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seps() -> Vec<String> {
        TagOptions::default().artist_separators
    }

    #[test]
    fn splits_on_separators_and_commas() {
        let names = split_artists("A; B/C, D", &seps(), &[]);
        assert_eq!(names, vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn split_keeps_ignored_names_whole() {
        let ignore = vec!["AC/DC".to_string()];
        let names = split_artists("AC/DC; Brian Johnson", &seps(), &ignore);
        assert_eq!(names, vec!["AC/DC", "Brian Johnson"]);
    }

    #[test]
    fn ignore_list_matches_across_case_width_changes() {
        let ignore = vec!["ẞ/a".to_string()];
        let names = split_artists("İẞ/Ab; C", &seps(), &ignore);
        assert_eq!(names, vec!["İẞ/ab", "C"]);
        let names = split_artists("ac/dc; Brian", &seps(), &["AC/DC".to_string()]);
        assert_eq!(names, vec!["AC/DC", "Brian"]);
    }

    #[test]
    fn split_drops_duplicates_and_blanks() {
        let names = split_artists("A;;a; ", &seps(), &[]);
        assert_eq!(names, vec!["A"]);
    }

    #[test]
    fn extracts_featured_artists() {
        let (artists, title) =
            parse_feat_from_title("Song (feat. B & C)", &seps(), &[]).unwrap();
        assert_eq!(artists, vec!["B", "C"]);
        assert_eq!(title, "Song");

        let (artists, title) =
            parse_feat_from_title("Other [ft. D and E] Remix", &seps(), &[]).unwrap();
        assert_eq!(artists, vec!["D", "E"]);
        assert_eq!(title, "Other Remix");

        assert!(parse_feat_from_title("No Credits", &seps(), &[]).is_none());
    }

    #[test]
    fn removes_producer_credits() {
        assert_eq!(remove_prod("Track (prod. by Someone)"), "Track");
        assert_eq!(remove_prod("Track [Produced by X]"), "Track");
        assert_eq!(remove_prod("Track - prod. X"), "Track");
        assert_eq!(remove_prod("Product"), "Product");
    }

    #[test]
    fn cleans_remaster_suffixes() {
        assert_eq!(clean_title("Song (2011 Remaster)"), "Song");
        assert_eq!(clean_title("Song - Remastered 2009"), "Song");
        assert_eq!(clean_title("Song [Remastered]"), "Song");
        assert_eq!(clean_title("Plain Song"), "Plain Song");
    }

    #[test]
    fn normalizes_genres() {
        let seps = TagOptions::default().genre_separators;
        assert_eq!(parse_genres("Rock & Roll, Pop", &seps), vec!["rock", "pop"]);
        assert_eq!(parse_genres("R&B/Soul", &seps), vec!["RnB", "soul"]);
        assert_eq!(parse_genres("Hip-Hop; hip-hop", &seps), vec!["hip-hop"]);
        assert!(parse_genres("  ", &seps).is_empty());
    }

    #[test]
    fn guesses_artist_and_title_from_filename() {
        assert_eq!(
            extract_artist_title("Artist - Title"),
            FilenameInfo {
                artist: Some("Artist".to_string()),
                title: "Title".to_string()
            }
        );
        assert_eq!(
            extract_artist_title("03 - Artist - Long_Title"),
            FilenameInfo {
                artist: Some("Artist".to_string()),
                title: "Long Title".to_string()
            }
        );
        assert_eq!(
            extract_artist_title("Just A Title (Official Video)"),
            FilenameInfo {
                artist: None,
                title: "Just A Title".to_string()
            }
        );
    }

    #[test]
    fn parses_dates() {
        assert_eq!(parse_date("1970"), Some(0));
        assert_eq!(parse_date("2000-01-02"), Some(946_771_200));
        assert_eq!(parse_date("2000-02-31"), parse_date("2000-02-01"));
        assert_eq!(parse_date("unknown"), None);
        assert_eq!(parse_date("99"), None);
    }
}
