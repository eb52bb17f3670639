pub mod hash;

use serde::{Deserialize, Serialize};
use std::path::Path;

pub use hash::{albumhash, artisthash, hash, pathhash, trackhash, weakhash};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtistRef {
    pub name: String,
    pub artisthash: String,
}

impl ArtistRef {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let artisthash = artisthash(&name);
        Self { name, artisthash }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Genre {
    pub name: String,
    pub genrehash: String,
}

impl Genre {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let genrehash = hash(&[name.as_str()]);
        Self { name, genrehash }
    }
}

/// A directory projection computed from the folder index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub path: String,
    pub trackcount: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FavoriteKind {
    Track,
    Album,
    Artist,
}

impl FavoriteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FavoriteKind::Track => "track",
            FavoriteKind::Album => "album",
            FavoriteKind::Artist => "artist",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "track" => Some(FavoriteKind::Track),
            "album" => Some(FavoriteKind::Album),
            "artist" => Some(FavoriteKind::Artist),
            _ => None,
        }
    }
}

/// Normalizes a directory to a prefix ending in exactly one `/`, so that
/// `/music` never matches files under `/music videos`.
pub fn dir_prefix(dir: &str) -> String {
    let trimmed = dir.trim_end_matches('/');
    let mut out = String::with_capacity(trimmed.len() + 1);
    out.push_str(trimmed);
    out.push('/');
    out
}

pub fn path_to_slash_string(path: &Path) -> String {
    let text = path.to_string_lossy();
    if std::path::MAIN_SEPARATOR == '/' {
        text.into_owned()
    } else {
        text.replace(std::path::MAIN_SEPARATOR, "/")
    }
}
