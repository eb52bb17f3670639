use std::collections::{BTreeSet, HashMap};

use common::Genre;
use serde::Serialize;

use crate::album::merge_genres;
use crate::track::{Favorites, PhysicalTrack, PlayStats};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Artist {
    pub artisthash: String,
    /// Smallest observed alias, so the choice never depends on scan order.
    pub name: String,
    pub names: BTreeSet<String>,
    pub albumcount: usize,
    pub trackcount: usize,
    pub duration: u64,
    pub date: i64,
    pub created_date: i64,
    pub genres: Vec<Genre>,
    #[serde(flatten)]
    pub(crate) stats: PlayStats,
    #[serde(rename = "fav_userids")]
    pub(crate) favorites: Favorites,
}

impl Artist {
    fn seed(artisthash: &str, track: &PhysicalTrack) -> Self {
        Self {
            artisthash: artisthash.to_string(),
            name: String::new(),
            names: BTreeSet::new(),
            albumcount: 0,
            trackcount: 0,
            duration: 0,
            date: track.date,
            created_date: track.last_mod,
            genres: Vec::new(),
            stats: PlayStats::default(),
            favorites: Favorites::default(),
        }
    }

    pub fn stats(&self) -> &PlayStats {
        &self.stats
    }

    pub fn favorites(&self) -> &Favorites {
        &self.favorites
    }
}

/// An artist and the album/track hashes credited to it.
///
/// `trackhashes` only holds tracks where the artist is a track artist;
/// album-artist credits contribute the album and the rollups.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ArtistEntry {
    pub artist: Artist,
    pub albumhashes: BTreeSet<String>,
    pub trackhashes: BTreeSet<String>,
}

impl ArtistEntry {
    fn new(artisthash: &str, track: &PhysicalTrack) -> Self {
        Self {
            artist: Artist::seed(artisthash, track),
            albumhashes: BTreeSet::new(),
            trackhashes: BTreeSet::new(),
        }
    }

    /// Credits a track that was not counted for this artist before.
    pub(crate) fn extend(&mut self, track: &PhysicalTrack) {
        let artisthash = self.artist.artisthash.clone();
        let in_track = track.artisthashes.iter().any(|h| *h == artisthash);
        let name = track
            .artists
            .iter()
            .chain(track.albumartists.iter())
            .find(|a| a.artisthash == artisthash)
            .map(|a| a.name.clone());

        if let Some(name) = name {
            self.artist.names.insert(name);
        }
        self.albumhashes.insert(track.albumhash.clone());
        if in_track {
            self.trackhashes.insert(track.trackhash.clone());
        }

        let artist = &mut self.artist;
        artist.duration += u64::from(track.duration);
        artist.stats.accumulate(&track.stats);
        artist.date = artist.date.min(track.date);
        artist.created_date = artist.created_date.min(track.last_mod);
        merge_genres(&mut artist.genres, &track.genres);

        artist.name = artist.names.iter().next().cloned().unwrap_or_default();
        artist.albumcount = self.albumhashes.len();
        artist.trackcount = self.trackhashes.len();
    }
}

/// Builds artists from canonical tracks (one per trackhash), crediting
/// both track artists and album artists.
pub fn aggregate_artists(tracks: &[&PhysicalTrack]) -> HashMap<String, ArtistEntry> {
    let mut entries: HashMap<String, ArtistEntry> = HashMap::new();
    for track in tracks {
        for artisthash in track.credited_artisthashes() {
            entries
                .entry(artisthash.to_string())
                .or_insert_with(|| ArtistEntry::new(artisthash, track))
                .extend(track);
        }
    }
    entries
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArtistStore {
    entries: HashMap<String, ArtistEntry>,
}

impl ArtistStore {
    pub(crate) fn from_entries(entries: HashMap<String, ArtistEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, artisthash: &str) -> Option<&Artist> {
        self.entries.get(artisthash).map(|e| &e.artist)
    }

    pub fn entry(&self, artisthash: &str) -> Option<&ArtistEntry> {
        self.entries.get(artisthash)
    }

    pub fn get_by_hashes(&self, hashes: &[String]) -> Vec<&Artist> {
        hashes.iter().filter_map(|h| self.get(h)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArtistEntry> {
        self.entries.values()
    }

    pub(crate) fn entry_mut(&mut self, artisthash: &str) -> Option<&mut ArtistEntry> {
        self.entries.get_mut(artisthash)
    }

    pub(crate) fn insert(&mut self, entry: ArtistEntry) {
        self.entries.insert(entry.artist.artisthash.clone(), entry);
    }

    pub(crate) fn remove(&mut self, artisthash: &str) -> Option<ArtistEntry> {
        self.entries.remove(artisthash)
    }
}
