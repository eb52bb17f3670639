//! Identity hashes used as primary keys across the library.
//!
//! Every part is normalized before digesting so that differences in case,
//! spacing, punctuation and diacritics do not produce distinct identities.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Number of hex characters kept from each end of the digest.
const HASH_HALF: usize = 8;

/// Hashes the given parts into a fixed length (16 char) lowercase hex key.
pub fn hash<S: AsRef<str>>(parts: &[S]) -> String {
    let mut joined = String::new();
    for part in parts {
        joined.push_str(&normalize_part(part.as_ref()));
    }
    let digest = blake3::hash(joined.as_bytes()).to_hex();
    let digest = digest.as_str();
    format!(
        "{}{}",
        &digest[..HASH_HALF],
        &digest[digest.len() - HASH_HALF..]
    )
}

pub fn trackhash<S: AsRef<str>>(title: &str, album: &str, artists: &[S]) -> String {
    let mut parts: Vec<&str> = Vec::with_capacity(artists.len() + 2);
    parts.push(title);
    parts.push(album);
    parts.extend(artists.iter().map(|a| a.as_ref()));
    hash(&parts)
}

pub fn albumhash<S: AsRef<str>>(album: &str, albumartists: &[S]) -> String {
    let mut parts: Vec<&str> = Vec::with_capacity(albumartists.len() + 1);
    parts.push(album);
    parts.extend(albumartists.iter().map(|a| a.as_ref()));
    hash(&parts)
}

pub fn artisthash(name: &str) -> String {
    hash(&[name])
}

pub fn weakhash<S: AsRef<str>>(title: &str, artists: &[S]) -> String {
    let mut parts: Vec<&str> = Vec::with_capacity(artists.len() + 1);
    parts.push(title);
    parts.extend(artists.iter().map(|a| a.as_ref()));
    hash(&parts)
}

pub fn pathhash(folder: &str) -> String {
    hash(&[folder])
}

fn normalize_part(part: &str) -> String {
    let folded: String = part
        .nfkd()
        .filter(|ch| !is_combining_mark(*ch))
        .flat_map(char::to_lowercase)
        .filter(|ch| !ch.is_whitespace())
        .collect();
    let alnum: String = folded.chars().filter(|ch| ch.is_alphanumeric()).collect();
    // Titles made only of symbols ("...", "!!!") keep their symbols.
    if alnum.is_empty() {
        folded
    } else {
        alnum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_has_fixed_length() {
        assert_eq!(hash(&["a"]).len(), 16);
        assert_eq!(hash(&["a much longer title", "and an album"]).len(), 16);
        assert_eq!(hash::<&str>(&[]).len(), 16);
    }

    #[test]
    fn hash_ignores_case_spacing_and_punctuation() {
        assert_eq!(hash(&["Hello, World!"]), hash(&["hello world"]));
        assert_eq!(artisthash("Beyoncé"), artisthash("beyonce"));
        assert_eq!(
            trackhash("Song", "Album", &["A", "B"]),
            trackhash("song", "ALBUM", &["a", "b"])
        );
    }

    #[test]
    fn symbol_only_titles_stay_distinct() {
        assert_ne!(hash(&["..."]), hash(&["!!!"]));
        assert_ne!(hash(&["..."]), hash(&[""]));
    }

    #[test]
    fn different_fields_produce_different_hashes() {
        assert_ne!(
            trackhash("One", "Album", &["Artist"]),
            trackhash("Two", "Album", &["Artist"])
        );
        assert_ne!(albumhash("Album", &["A"]), albumhash("Album", &["B"]));
        assert_ne!(weakhash("Song", &["A"]), weakhash("Song", &["B"]));
    }
}
