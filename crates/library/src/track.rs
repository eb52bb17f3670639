use std::collections::{BTreeMap, BTreeSet};

use common::{dir_prefix, trackhash, weakhash, ArtistRef, Genre};
use metadata::parsers::{
    clean_title, parse_feat_from_title, parse_genres, remove_prod, split_artists,
};
use metadata::TagOptions;
use serde::{Deserialize, Serialize};

use crate::versions::base_title;

/// One row of the persisted track table: raw tag values for one file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub filepath: String,
    pub folder: String,
    pub title: String,
    pub album: String,
    pub artists: String,
    pub albumartists: String,
    pub albumhash: String,
    pub trackhash: String,
    pub bitrate: u32,
    pub duration: u32,
    pub disc: u16,
    pub track: u16,
    pub genres: Option<String>,
    pub date: i64,
    pub last_mod: i64,
    pub copyright: Option<String>,
    pub lastplayed: i64,
    pub playcount: u32,
    pub playduration: u64,
    pub extra: BTreeMap<String, String>,
}

/// Play rollups. Only changed through `record` and `accumulate`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayStats {
    playcount: u32,
    playduration: u64,
    lastplayed: i64,
}

impl PlayStats {
    pub fn new(playcount: u32, playduration: u64, lastplayed: i64) -> Self {
        Self {
            playcount,
            playduration,
            lastplayed,
        }
    }

    pub fn playcount(&self) -> u32 {
        self.playcount
    }

    pub fn playduration(&self) -> u64 {
        self.playduration
    }

    pub fn lastplayed(&self) -> i64 {
        self.lastplayed
    }

    pub(crate) fn record(&mut self, duration: u64, timestamp: i64) {
        self.playcount = self.playcount.saturating_add(1);
        self.playduration = self.playduration.saturating_add(duration);
        self.lastplayed = self.lastplayed.max(timestamp);
    }

    pub(crate) fn accumulate(&mut self, other: &PlayStats) {
        self.playcount = self.playcount.saturating_add(other.playcount);
        self.playduration = self.playduration.saturating_add(other.playduration);
        self.lastplayed = self.lastplayed.max(other.lastplayed);
    }

    fn rank(&self) -> (u32, u64, i64) {
        (self.playcount, self.playduration, self.lastplayed)
    }
}

/// Users that marked an entity as favorite.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Favorites(BTreeSet<u32>);

impl Favorites {
    pub fn contains(&self, userid: u32) -> bool {
        self.0.contains(&userid)
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn set(&mut self, userid: u32, on: bool) {
        if on {
            self.0.insert(userid);
        } else {
            self.0.remove(&userid);
        }
    }
}

/// A file on disk with its derived identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PhysicalTrack {
    pub filepath: String,
    pub folder: String,
    pub title: String,
    pub og_title: String,
    pub album: String,
    pub og_album: String,
    pub artists: Vec<ArtistRef>,
    pub albumartists: Vec<ArtistRef>,
    pub artisthashes: Vec<String>,
    pub albumhash: String,
    pub trackhash: String,
    pub weakhash: String,
    pub bitrate: u32,
    pub duration: u32,
    pub disc: u16,
    pub track: u16,
    pub date: i64,
    pub last_mod: i64,
    pub genres: Vec<Genre>,
    pub copyright: Option<String>,
    pub extra: BTreeMap<String, String>,
    #[serde(flatten)]
    pub(crate) stats: PlayStats,
    #[serde(rename = "fav_userids")]
    pub(crate) favorites: Favorites,
}

impl PhysicalTrack {
    pub fn from_record(record: &TrackRecord, options: &TagOptions) -> Self {
        let separators = &options.artist_separators;
        let ignore = &options.artist_split_ignore_list;

        let og_title = record.title.clone();
        let og_album = record.album.clone();
        let mut title = record.title.clone();
        let mut album = record.album.clone();

        let mut artist_names = split_artists(&record.artists, separators, ignore);
        if artist_names.is_empty() {
            artist_names.push("Unknown".to_string());
        }
        let mut albumartist_names = split_artists(&record.albumartists, separators, ignore);
        if albumartist_names.is_empty() {
            albumartist_names = artist_names.clone();
        }

        if options.extract_featured_artists {
            if let Some((featured, new_title)) = parse_feat_from_title(&title, separators, ignore)
            {
                artist_names.extend(featured);
                if og_album == og_title {
                    album = new_title.clone();
                }
                title = new_title;
            }
        }
        if options.remove_prod_by {
            title = remove_prod(&title);
        }
        if options.remove_remaster_info {
            title = clean_title(&title);
        }
        if options.clean_album_title {
            album = base_title(&album);
        }

        let artists = dedup_artists(artist_names);
        let albumartists = dedup_artists(albumartist_names);
        let names: Vec<&str> = artists.iter().map(|a| a.name.as_str()).collect();

        let albumhash = if options.merge_albums {
            let albumartist_names: Vec<&str> =
                albumartists.iter().map(|a| a.name.as_str()).collect();
            common::albumhash(&album, &albumartist_names)
        } else {
            record.albumhash.clone()
        };

        let genres = record
            .genres
            .as_deref()
            .map(|raw| parse_genres(raw, &options.genre_separators))
            .unwrap_or_default()
            .into_iter()
            .map(Genre::new)
            .collect();

        Self {
            filepath: record.filepath.clone(),
            folder: dir_prefix(&record.folder),
            trackhash: trackhash(&title, &album, &names),
            weakhash: weakhash(&title, &names),
            artisthashes: artists.iter().map(|a| a.artisthash.clone()).collect(),
            title,
            og_title,
            album,
            og_album,
            artists,
            albumartists,
            albumhash,
            bitrate: record.bitrate,
            duration: record.duration,
            disc: record.disc,
            track: record.track,
            date: record.date,
            last_mod: record.last_mod,
            genres,
            copyright: record.copyright.clone(),
            extra: record.extra.clone(),
            stats: PlayStats::new(record.playcount, record.playduration, record.lastplayed),
            favorites: Favorites::default(),
        }
    }

    pub fn stats(&self) -> &PlayStats {
        &self.stats
    }

    pub fn favorites(&self) -> &Favorites {
        &self.favorites
    }

    /// Artist hashes the aggregation credits this track to: track artists
    /// followed by album artists not already listed.
    pub fn credited_artisthashes(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.artisthashes.iter().map(String::as_str).collect();
        for artist in &self.albumartists {
            if !out.contains(&artist.artisthash.as_str()) {
                out.push(artist.artisthash.as_str());
            }
        }
        out
    }
}

fn dedup_artists(names: Vec<String>) -> Vec<ArtistRef> {
    let mut out: Vec<ArtistRef> = Vec::with_capacity(names.len());
    for name in names {
        let artist = ArtistRef::new(name);
        if !out.iter().any(|a| a.artisthash == artist.artisthash) {
            out.push(artist);
        }
    }
    out
}

/// Every physical file sharing one trackhash.
///
/// Members are kept sorted by filepath and always carry identical play
/// stats and favorites, so rollups never depend on which member is read.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackGroup {
    tracks: Vec<PhysicalTrack>,
}

impl TrackGroup {
    pub fn new(track: PhysicalTrack) -> Self {
        Self {
            tracks: vec![track],
        }
    }

    pub fn tracks(&self) -> &[PhysicalTrack] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn trackhash(&self) -> Option<&str> {
        self.tracks.first().map(|t| t.trackhash.as_str())
    }

    /// Adds a member, replacing one with the same filepath. Stats converge
    /// on the most played member and favorites on the union.
    pub fn append(&mut self, mut track: PhysicalTrack) {
        self.tracks.retain(|t| t.filepath != track.filepath);

        if let Some(existing) = self.tracks.first() {
            let stats = if existing.stats.rank() >= track.stats.rank() {
                existing.stats
            } else {
                track.stats
            };
            let mut favorites = existing.favorites.clone();
            favorites.0.extend(track.favorites.iter());

            track.stats = stats;
            track.favorites = favorites.clone();
            for member in &mut self.tracks {
                member.stats = stats;
                member.favorites = favorites.clone();
            }
        }

        let pos = self
            .tracks
            .binary_search_by(|t| t.filepath.as_str().cmp(track.filepath.as_str()))
            .unwrap_or_else(|pos| pos);
        self.tracks.insert(pos, track);
    }

    pub fn remove(&mut self, filepath: &str) -> Option<PhysicalTrack> {
        let pos = self.tracks.iter().position(|t| t.filepath == filepath)?;
        Some(self.tracks.remove(pos))
    }

    /// Highest bitrate member; ties go to the smallest filepath.
    pub fn get_best(&self) -> Option<&PhysicalTrack> {
        self.tracks.iter().max_by(|a, b| {
            a.bitrate
                .cmp(&b.bitrate)
                .then_with(|| b.filepath.cmp(&a.filepath))
        })
    }

    pub(crate) fn increment_playcount(&mut self, duration: u64, timestamp: i64) {
        for track in &mut self.tracks {
            track.stats.record(duration, timestamp);
        }
    }

    pub(crate) fn set_favorite(&mut self, userid: u32, on: bool) {
        for track in &mut self.tracks {
            track.favorites.set(userid, on);
        }
    }

    pub(crate) fn set_favorites(&mut self, favorites: &Favorites) {
        for track in &mut self.tracks {
            track.favorites = favorites.clone();
        }
    }
}
