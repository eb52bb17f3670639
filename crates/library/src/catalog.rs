//! The in-memory view served to clients: tracks, albums, artists and folders
//! kept consistent with each other under incremental changes.

use std::collections::{BTreeSet, HashMap};

use common::FavoriteKind;

use crate::album::aggregate_albums;
use crate::album_store::AlbumStore;
use crate::artist_store::{aggregate_artists, ArtistStore};
use crate::folder_store::FolderStore;
use crate::track::{Favorites, PhysicalTrack, TrackGroup};
use crate::track_store::{AddOutcome, TrackStore};

pub(crate) type FavoriteIndex = HashMap<(FavoriteKind, String), Favorites>;

/// A change applied to the live catalog, recorded while a rebuild runs so it
/// can be replayed onto the rebuilt one.
#[derive(Clone, Debug)]
pub(crate) enum Mutation {
    Add(PhysicalTrack),
    Remove(Vec<String>),
    Play {
        trackhash: String,
        duration: u64,
        timestamp: i64,
    },
    Favorite {
        kind: FavoriteKind,
        hash: String,
        userid: u32,
        on: bool,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Catalog {
    tracks: TrackStore,
    albums: AlbumStore,
    artists: ArtistStore,
    folders: FolderStore,
    favorites: FavoriteIndex,
    single_track_as_single: bool,
}

impl Catalog {
    pub(crate) fn build(
        mut tracks: TrackStore,
        favorites: FavoriteIndex,
        single_track_as_single: bool,
    ) -> Self {
        for ((kind, hash), users) in &favorites {
            if *kind == FavoriteKind::Track {
                tracks.set_favorites(hash, users);
            }
        }

        let (album_entries, artist_entries) = {
            let canonical = tracks.canonical_tracks();
            (
                aggregate_albums(&canonical, single_track_as_single),
                aggregate_artists(&canonical),
            )
        };
        let mut albums = AlbumStore::from_entries(album_entries);
        let mut artists = ArtistStore::from_entries(artist_entries);
        for ((kind, hash), users) in &favorites {
            match kind {
                FavoriteKind::Album => {
                    if let Some(entry) = albums.entry_mut(hash) {
                        entry.album.favorites = users.clone();
                    }
                }
                FavoriteKind::Artist => {
                    if let Some(entry) = artists.entry_mut(hash) {
                        entry.artist.favorites = users.clone();
                    }
                }
                FavoriteKind::Track => {}
            }
        }

        let folders = FolderStore::from_entries(tracks.groups().flat_map(|g| {
            g.tracks()
                .iter()
                .map(|t| (t.filepath.clone(), t.trackhash.clone()))
        }));

        Self {
            tracks,
            albums,
            artists,
            folders,
            favorites,
            single_track_as_single,
        }
    }

    pub fn tracks(&self) -> &TrackStore {
        &self.tracks
    }

    pub fn albums(&self) -> &AlbumStore {
        &self.albums
    }

    pub fn artists(&self) -> &ArtistStore {
        &self.artists
    }

    pub fn folders(&self) -> &FolderStore {
        &self.folders
    }

    pub fn is_favorite(&self, kind: FavoriteKind, hash: &str, userid: u32) -> bool {
        self.favorites
            .get(&(kind, hash.to_string()))
            .map_or(false, |users| users.contains(userid))
    }

    pub(crate) fn apply(&mut self, mutation: Mutation) {
        match mutation {
            Mutation::Add(track) => self.add_track(track),
            Mutation::Remove(filepaths) => {
                self.remove_filepaths(&filepaths);
            }
            Mutation::Play {
                trackhash,
                duration,
                timestamp,
            } => {
                self.record_play(&trackhash, duration, timestamp);
            }
            Mutation::Favorite {
                kind,
                hash,
                userid,
                on,
            } => self.set_favorite(kind, &hash, userid, on),
        }
    }

    /// Inserts or replaces one file and updates everything it feeds into.
    pub(crate) fn add_track(&mut self, track: PhysicalTrack) {
        if self.tracks.trackhash_for(&track.filepath).is_some() {
            self.remove_filepaths(&[track.filepath.clone()]);
        }

        let trackhash = track.trackhash.clone();
        let filepath = track.filepath.clone();
        let before = self.tracks.keys(&trackhash);
        let outcome = self.tracks.add(track);
        self.folders.insert(filepath, trackhash.clone());

        match outcome {
            AddOutcome::NewGroup => {
                if let Some(users) = self.favorites.get(&(FavoriteKind::Track, trackhash.clone())) {
                    self.tracks.set_favorites(&trackhash, users);
                }
                let best = match self.tracks.group(&trackhash).and_then(TrackGroup::get_best) {
                    Some(best) => best.clone(),
                    None => return,
                };
                self.extend_album(&best);
                for artisthash in best.credited_artisthashes() {
                    self.extend_artist(artisthash, &best);
                }
            }
            AddOutcome::Joined => {
                let after = self.tracks.keys(&trackhash);
                let mut albums = BTreeSet::new();
                let mut artists = BTreeSet::new();
                for keys in before.into_iter().chain(after) {
                    albums.insert(keys.albumhash);
                    artists.extend(keys.artisthashes);
                }
                self.rescope(albums, artists);
            }
        }
    }

    /// Removes files and drops albums and artists left without tracks.
    pub(crate) fn remove_filepaths(&mut self, filepaths: &[String]) -> Vec<PhysicalTrack> {
        let mut removed = Vec::new();
        let mut albums = BTreeSet::new();
        let mut artists = BTreeSet::new();

        for filepath in filepaths {
            let trackhash = match self.tracks.trackhash_for(filepath) {
                Some(trackhash) => trackhash.to_string(),
                None => continue,
            };
            if let Some(keys) = self.tracks.keys(&trackhash) {
                albums.insert(keys.albumhash);
                artists.extend(keys.artisthashes);
            }
            removed.extend(self.tracks.remove_by_filepaths(std::slice::from_ref(filepath)));
            self.folders.remove(filepath);
            if let Some(keys) = self.tracks.keys(&trackhash) {
                albums.insert(keys.albumhash);
                artists.extend(keys.artisthashes);
            }
        }

        self.rescope(albums, artists);
        removed
    }

    /// Adds one play to a logical track and every rollup it is credited to.
    pub(crate) fn record_play(&mut self, trackhash: &str, duration: u64, timestamp: i64) -> bool {
        if !self.tracks.increment_playcount(trackhash, duration, timestamp) {
            return false;
        }
        let keys = match self.tracks.keys(trackhash) {
            Some(keys) => keys,
            None => return true,
        };
        if let Some(entry) = self.albums.entry_mut(&keys.albumhash) {
            entry.album.stats.record(duration, timestamp);
        }
        for artisthash in &keys.artisthashes {
            if let Some(entry) = self.artists.entry_mut(artisthash) {
                entry.artist.stats.record(duration, timestamp);
            }
        }
        true
    }

    pub(crate) fn set_favorite(&mut self, kind: FavoriteKind, hash: &str, userid: u32, on: bool) {
        let key = (kind, hash.to_string());
        let users = self.favorites.entry(key.clone()).or_default();
        users.set(userid, on);
        if users.is_empty() {
            self.favorites.remove(&key);
        }

        match kind {
            FavoriteKind::Track => {
                self.tracks.set_favorite(hash, userid, on);
            }
            FavoriteKind::Album => {
                if let Some(entry) = self.albums.entry_mut(hash) {
                    entry.album.favorites.set(userid, on);
                }
            }
            FavoriteKind::Artist => {
                if let Some(entry) = self.artists.entry_mut(hash) {
                    entry.artist.favorites.set(userid, on);
                }
            }
        }
    }

    fn stored_favorites(&self, kind: FavoriteKind, hash: &str) -> Favorites {
        self.favorites
            .get(&(kind, hash.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    fn extend_album(&mut self, track: &PhysicalTrack) {
        if let Some(entry) = self.albums.entry_mut(&track.albumhash) {
            entry.extend(track, self.single_track_as_single);
        } else {
            let favorites = self.stored_favorites(FavoriteKind::Album, &track.albumhash);
            for (_, mut entry) in aggregate_albums(&[track], self.single_track_as_single) {
                entry.album.favorites = favorites.clone();
                self.albums.insert(entry);
            }
        }
        debug_assert!(
            self.album_is_consistent(&track.albumhash),
            "album {} out of sync with its tracks",
            track.albumhash
        );
    }

    fn extend_artist(&mut self, artisthash: &str, track: &PhysicalTrack) {
        if let Some(entry) = self.artists.entry_mut(artisthash) {
            entry.extend(track);
        } else {
            let favorites = self.stored_favorites(FavoriteKind::Artist, artisthash);
            if let Some(mut entry) = aggregate_artists(&[track]).remove(artisthash) {
                entry.artist.favorites = favorites;
                self.artists.insert(entry);
            }
        }
        debug_assert!(
            self.artist_is_consistent(artisthash),
            "artist {} out of sync with its tracks",
            artisthash
        );
    }

    /// The album's count matches the trackhashes it owns, and each of them
    /// is a live group.
    pub(crate) fn album_is_consistent(&self, albumhash: &str) -> bool {
        self.albums.entry(albumhash).map_or(true, |entry| {
            entry.album.trackcount == entry.trackhashes.len()
                && entry.trackhashes.iter().all(|h| self.tracks.group(h).is_some())
        })
    }

    pub(crate) fn artist_is_consistent(&self, artisthash: &str) -> bool {
        self.artists.entry(artisthash).map_or(true, |entry| {
            entry.artist.trackcount == entry.trackhashes.len()
                && entry.artist.albumcount == entry.albumhashes.len()
                && entry.trackhashes.iter().all(|h| self.tracks.group(h).is_some())
        })
    }

    fn rescope(&mut self, albums: BTreeSet<String>, artists: BTreeSet<String>) {
        for albumhash in albums {
            self.rescope_album(&albumhash);
        }
        for artisthash in artists {
            self.rescope_artist(&artisthash);
        }
    }

    /// Recomputes one album from its current canonical tracks.
    fn rescope_album(&mut self, albumhash: &str) {
        let rebuilt = {
            let members = self.tracks.album_members(albumhash);
            aggregate_albums(&members, self.single_track_as_single).remove(albumhash)
        };
        match rebuilt {
            Some(mut entry) => {
                entry.album.favorites = self.stored_favorites(FavoriteKind::Album, albumhash);
                self.albums.insert(entry);
            }
            None => {
                self.albums.remove(albumhash);
            }
        }
        debug_assert!(
            self.album_is_consistent(albumhash),
            "album {} out of sync with its tracks",
            albumhash
        );
    }

    fn rescope_artist(&mut self, artisthash: &str) {
        let rebuilt = {
            let members = self.tracks.credited_members(artisthash);
            aggregate_artists(&members).remove(artisthash)
        };
        match rebuilt {
            Some(mut entry) => {
                entry.artist.favorites = self.stored_favorites(FavoriteKind::Artist, artisthash);
                self.artists.insert(entry);
            }
            None => {
                self.artists.remove(artisthash);
            }
        }
        debug_assert!(
            self.artist_is_consistent(artisthash),
            "artist {} out of sync with its tracks",
            artisthash
        );
    }
}
