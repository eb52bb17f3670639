use std::collections::HashMap;

use crate::album::{Album, AlbumEntry};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AlbumStore {
    entries: HashMap<String, AlbumEntry>,
}

impl AlbumStore {
    pub(crate) fn from_entries(entries: HashMap<String, AlbumEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, albumhash: &str) -> Option<&Album> {
        self.entries.get(albumhash).map(|e| &e.album)
    }

    pub fn entry(&self, albumhash: &str) -> Option<&AlbumEntry> {
        self.entries.get(albumhash)
    }

    pub fn get_by_hashes(&self, hashes: &[String]) -> Vec<&Album> {
        hashes.iter().filter_map(|h| self.get(h)).collect()
    }

    /// Albums where `artisthash` is one of the album artists, newest first.
    pub fn get_by_artist(&self, artisthash: &str) -> Vec<&Album> {
        let mut albums: Vec<&Album> = self
            .entries
            .values()
            .map(|e| &e.album)
            .filter(|a| a.artisthashes.iter().any(|h| h == artisthash))
            .collect();
        albums.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.albumhash.cmp(&b.albumhash)));
        albums
    }

    /// Other editions of an album: same base title and primary album artist.
    pub fn get_other_versions(&self, albumhash: &str) -> Vec<&Album> {
        let album = match self.get(albumhash) {
            Some(album) => album,
            None => return Vec::new(),
        };
        let primary = match album.artisthashes.first() {
            Some(primary) => primary,
            None => return Vec::new(),
        };
        let base_key = common::hash(&[album.base_title.as_str()]);
        let mut others: Vec<&Album> = self
            .entries
            .values()
            .map(|e| &e.album)
            .filter(|a| a.albumhash != album.albumhash)
            .filter(|a| a.artisthashes.first() == Some(primary))
            .filter(|a| common::hash(&[a.base_title.as_str()]) == base_key)
            .collect();
        others.sort_by(|a, b| a.albumhash.cmp(&b.albumhash));
        others
    }

    pub fn iter(&self) -> impl Iterator<Item = &AlbumEntry> {
        self.entries.values()
    }

    pub(crate) fn entry_mut(&mut self, albumhash: &str) -> Option<&mut AlbumEntry> {
        self.entries.get_mut(albumhash)
    }

    pub(crate) fn insert(&mut self, entry: AlbumEntry) {
        self.entries.insert(entry.album.albumhash.clone(), entry);
    }

    pub(crate) fn remove(&mut self, albumhash: &str) -> Option<AlbumEntry> {
        self.entries.remove(albumhash)
    }
}
