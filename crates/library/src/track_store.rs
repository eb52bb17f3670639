use std::collections::{BTreeSet, HashMap, HashSet};

use crate::track::{Favorites, PhysicalTrack, PlayStats, TrackGroup};
use crate::Generation;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddOutcome {
    NewGroup,
    Joined,
}

/// Album and credited artists of a group's canonical member.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct GroupKeys {
    pub albumhash: String,
    pub artisthashes: Vec<String>,
}

impl GroupKeys {
    fn of(group: &TrackGroup) -> Option<Self> {
        let best = group.get_best()?;
        Some(Self {
            albumhash: best.albumhash.clone(),
            artisthashes: best
                .credited_artisthashes()
                .into_iter()
                .map(str::to_string)
                .collect(),
        })
    }
}

/// Logical tracks keyed by trackhash.
///
/// Album and artist views follow each group's canonical member, which is
/// what the album and artist aggregation counts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackStore {
    groups: HashMap<String, TrackGroup>,
    by_filepath: HashMap<String, String>,
    by_album: HashMap<String, BTreeSet<String>>,
    by_artist: HashMap<String, BTreeSet<String>>,
}

impl TrackStore {
    /// Groups tracks into a fresh store. Gives up and returns `None` as soon
    /// as `generation` moves past `token`.
    pub fn load_all<I>(tracks: I, generation: &Generation, token: u64) -> Option<Self>
    where
        I: IntoIterator<Item = PhysicalTrack>,
    {
        let mut store = Self::default();
        for track in tracks {
            if !generation.is_current(token) {
                return None;
            }
            store.add(track);
        }
        Some(store)
    }

    pub fn add(&mut self, track: PhysicalTrack) -> AddOutcome {
        if self.by_filepath.contains_key(&track.filepath) {
            self.remove_by_filepaths(&[track.filepath.clone()]);
        }

        let trackhash = track.trackhash.clone();
        self.by_filepath
            .insert(track.filepath.clone(), trackhash.clone());

        match self.groups.get_mut(&trackhash) {
            Some(group) => {
                let before = GroupKeys::of(group);
                group.append(track);
                let after = GroupKeys::of(group);
                self.reindex(&trackhash, before, after);
                AddOutcome::Joined
            }
            None => {
                let group = TrackGroup::new(track);
                let after = GroupKeys::of(&group);
                self.groups.insert(trackhash.clone(), group);
                self.reindex(&trackhash, None, after);
                AddOutcome::NewGroup
            }
        }
    }

    /// Removes files from their groups, dropping groups left empty.
    pub fn remove_by_filepaths(&mut self, filepaths: &[String]) -> Vec<PhysicalTrack> {
        let mut removed = Vec::new();
        for filepath in filepaths {
            let trackhash = match self.by_filepath.remove(filepath) {
                Some(trackhash) => trackhash,
                None => continue,
            };
            let group = match self.groups.get_mut(&trackhash) {
                Some(group) => group,
                None => continue,
            };
            let before = GroupKeys::of(group);
            if let Some(track) = group.remove(filepath) {
                removed.push(track);
            }
            let after = GroupKeys::of(group);
            if group.is_empty() {
                self.groups.remove(&trackhash);
            }
            self.reindex(&trackhash, before, after);
        }
        removed
    }

    fn reindex(&mut self, trackhash: &str, before: Option<GroupKeys>, after: Option<GroupKeys>) {
        if before == after {
            return;
        }
        if let Some(keys) = before {
            unlink(&mut self.by_album, &keys.albumhash, trackhash);
            for artisthash in &keys.artisthashes {
                unlink(&mut self.by_artist, artisthash, trackhash);
            }
        }
        if let Some(keys) = after {
            self.by_album
                .entry(keys.albumhash)
                .or_default()
                .insert(trackhash.to_string());
            for artisthash in keys.artisthashes {
                self.by_artist
                    .entry(artisthash)
                    .or_default()
                    .insert(trackhash.to_string());
            }
        }
    }

    /// Number of logical tracks.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of physical files.
    pub fn file_count(&self) -> usize {
        self.by_filepath.len()
    }

    pub fn group(&self, trackhash: &str) -> Option<&TrackGroup> {
        self.groups.get(trackhash)
    }

    pub fn groups(&self) -> impl Iterator<Item = &TrackGroup> {
        self.groups.values()
    }

    /// Album and credited artists of the group's canonical member.
    pub(crate) fn keys(&self, trackhash: &str) -> Option<GroupKeys> {
        self.groups.get(trackhash).and_then(GroupKeys::of)
    }

    pub fn count_by_trackhash(&self, trackhash: &str) -> usize {
        self.groups.get(trackhash).map_or(0, TrackGroup::len)
    }

    pub fn trackhash_for(&self, filepath: &str) -> Option<&str> {
        self.by_filepath.get(filepath).map(String::as_str)
    }

    /// One canonical track per group, in no particular order.
    pub fn canonical_tracks(&self) -> Vec<&PhysicalTrack> {
        self.groups.values().filter_map(TrackGroup::get_best).collect()
    }

    /// Canonical tracks for the given hashes. With `preserve_order` the
    /// output follows the input (repeats included); otherwise it is sorted
    /// by trackhash without repeats. Unknown hashes are skipped.
    pub fn get_by_hashes(&self, trackhashes: &[String], preserve_order: bool) -> Vec<&PhysicalTrack> {
        if preserve_order {
            return trackhashes
                .iter()
                .filter_map(|h| self.groups.get(h))
                .filter_map(TrackGroup::get_best)
                .collect();
        }
        let unique: BTreeSet<&String> = trackhashes.iter().collect();
        unique
            .into_iter()
            .filter_map(|h| self.groups.get(h))
            .filter_map(TrackGroup::get_best)
            .collect()
    }

    /// Physical tracks for exact filepaths, in input order.
    pub fn get_by_filepaths(&self, filepaths: &[String]) -> Vec<&PhysicalTrack> {
        filepaths.iter().filter_map(|path| self.track_at(path)).collect()
    }

    pub fn track_at(&self, filepath: &str) -> Option<&PhysicalTrack> {
        let trackhash = self.by_filepath.get(filepath)?;
        self.groups
            .get(trackhash)?
            .tracks()
            .iter()
            .find(|t| t.filepath == filepath)
    }

    /// Play counters `track` ends up with once added, and the filepaths of
    /// every member of its group at that point.
    pub(crate) fn preview_add(&self, track: &PhysicalTrack) -> (PlayStats, Vec<String>) {
        let mut group = self.groups.get(&track.trackhash).cloned().unwrap_or_default();
        group.append(track.clone());
        let stats = group
            .tracks()
            .iter()
            .find(|t| t.filepath == track.filepath)
            .map_or(track.stats, |t| t.stats);
        let members = group.tracks().iter().map(|t| t.filepath.clone()).collect();
        (stats, members)
    }

    pub fn get_by_album_hash(&self, albumhash: &str, include_duplicates: bool) -> Vec<&PhysicalTrack> {
        let mut tracks = self.expand(self.by_album.get(albumhash), include_duplicates);
        tracks.retain(|t| include_duplicates || t.albumhash == albumhash);
        tracks.sort_by(|a, b| {
            (a.disc, a.track, &a.filepath).cmp(&(b.disc, b.track, &b.filepath))
        });
        tracks
    }

    /// Tracks where `artisthash` is a track artist.
    pub fn get_by_artist_hash(&self, artisthash: &str, include_duplicates: bool) -> Vec<&PhysicalTrack> {
        let mut tracks = self.expand(self.by_artist.get(artisthash), include_duplicates);
        tracks.retain(|t| t.artisthashes.iter().any(|h| h == artisthash));
        sort_by_path(&mut tracks);
        tracks
    }

    /// Tracks whose folder starts with `prefix`.
    pub fn get_in_path(&self, prefix: &str, include_duplicates: bool) -> Vec<&PhysicalTrack> {
        let mut tracks: Vec<&PhysicalTrack> = if include_duplicates {
            self.groups
                .values()
                .flat_map(|g| g.tracks().iter())
                .filter(|t| t.folder.starts_with(prefix))
                .collect()
        } else {
            self.groups
                .values()
                .filter_map(|g| {
                    g.tracks()
                        .iter()
                        .filter(|t| t.folder.starts_with(prefix))
                        .max_by(|a, b| {
                            a.bitrate
                                .cmp(&b.bitrate)
                                .then_with(|| b.filepath.cmp(&a.filepath))
                        })
                })
                .collect()
        };
        sort_by_path(&mut tracks);
        tracks
    }

    /// Canonical tracks of `albumhash`, as counted by the album aggregation.
    pub(crate) fn album_members(&self, albumhash: &str) -> Vec<&PhysicalTrack> {
        self.expand(self.by_album.get(albumhash), false)
    }

    /// Canonical tracks credited to `artisthash` as track or album artist.
    pub(crate) fn credited_members(&self, artisthash: &str) -> Vec<&PhysicalTrack> {
        self.expand(self.by_artist.get(artisthash), false)
    }

    pub fn get_recent_by_mtime(&self, start: usize, limit: usize) -> Vec<&PhysicalTrack> {
        let mut tracks = self.canonical_tracks();
        tracks.sort_by(|a, b| {
            b.last_mod
                .cmp(&a.last_mod)
                .then_with(|| a.filepath.cmp(&b.filepath))
        });
        tracks.into_iter().skip(start).take(limit).collect()
    }

    pub fn get_recent_by_lastplayed(&self, start: usize, limit: usize) -> Vec<&PhysicalTrack> {
        let mut tracks: Vec<&PhysicalTrack> = self
            .canonical_tracks()
            .into_iter()
            .filter(|t| t.stats().lastplayed() > 0)
            .collect();
        tracks.sort_by(|a, b| {
            b.stats()
                .lastplayed()
                .cmp(&a.stats().lastplayed())
                .then_with(|| a.filepath.cmp(&b.filepath))
        });
        tracks.into_iter().skip(start).take(limit).collect()
    }

    pub(crate) fn increment_playcount(&mut self, trackhash: &str, duration: u64, timestamp: i64) -> bool {
        match self.groups.get_mut(trackhash) {
            Some(group) => {
                group.increment_playcount(duration, timestamp);
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_favorites(&mut self, trackhash: &str, favorites: &Favorites) -> bool {
        match self.groups.get_mut(trackhash) {
            Some(group) => {
                group.set_favorites(favorites);
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_favorite(&mut self, trackhash: &str, userid: u32, on: bool) -> bool {
        match self.groups.get_mut(trackhash) {
            Some(group) => {
                group.set_favorite(userid, on);
                true
            }
            None => false,
        }
    }

    /// Hashes without a live group are skipped.
    fn expand(
        &self,
        hashes: Option<&BTreeSet<String>>,
        include_duplicates: bool,
    ) -> Vec<&PhysicalTrack> {
        let hashes = match hashes {
            Some(hashes) => hashes,
            None => return Vec::new(),
        };
        let groups = hashes.iter().filter_map(|h| self.groups.get(h));
        if include_duplicates {
            groups.flat_map(|g| g.tracks().iter()).collect()
        } else {
            groups.filter_map(TrackGroup::get_best).collect()
        }
    }
}

fn unlink(index: &mut HashMap<String, BTreeSet<String>>, key: &str, trackhash: &str) {
    if let Some(set) = index.get_mut(key) {
        set.remove(trackhash);
        if set.is_empty() {
            index.remove(key);
        }
    }
}

fn sort_by_path(tracks: &mut Vec<&PhysicalTrack>) {
    tracks.sort_by(|a, b| a.filepath.cmp(&b.filepath));
    let mut seen: HashSet<&str> = HashSet::new();
    tracks.retain(|t| seen.insert(t.filepath.as_str()));
}
