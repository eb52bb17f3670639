use std::collections::{BTreeSet, HashMap};

use common::{hash, pathhash, ArtistRef, Genre};
use serde::Serialize;

use crate::track::{Favorites, PhysicalTrack, PlayStats};
use crate::versions::{parse_edition, prune_versions};

const SINGLE_MARKERS: &[&str] = &["single version", "- single"];
const SOUNDTRACK_MARKERS: &[&str] = &["motion picture", "soundtrack"];
const LIVE_MARKERS: &[&str] = &["live from", "live at", "live in", "live on", "mtv unplugged"];
const VARIOUS_ARTISTS: &str = "various artists";
const COMPILATION_MARKERS: &[&str] = &[
    "the essential",
    "best of",
    "greatest hits",
    "#1 hits",
    "number ones",
    "super hits",
    "collection",
    "anthology",
    "great hits",
    "biggest hits",
    "the hits",
    "the ultimate",
    "compilation",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlbumType {
    Album,
    Single,
    Ep,
    Compilation,
    Soundtrack,
    #[serde(rename = "live album")]
    LiveAlbum,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Album {
    pub albumhash: String,
    pub title: String,
    pub og_title: String,
    pub base_title: String,
    pub versions: Vec<String>,
    #[serde(rename = "type")]
    pub album_type: AlbumType,
    pub albumartists: Vec<ArtistRef>,
    pub artisthashes: Vec<String>,
    pub pathhash: String,
    pub weakhash: String,
    pub trackcount: usize,
    pub duration: u64,
    pub date: i64,
    pub created_date: i64,
    pub genres: Vec<Genre>,
    #[serde(flatten)]
    pub(crate) stats: PlayStats,
    #[serde(rename = "fav_userids")]
    pub(crate) favorites: Favorites,
    /// Filepath of the track the title and artists were taken from.
    #[serde(skip)]
    pub(crate) sample_filepath: String,
}

impl Album {
    fn seed(track: &PhysicalTrack) -> Self {
        let mut album = Self {
            albumhash: track.albumhash.clone(),
            title: String::new(),
            og_title: String::new(),
            base_title: String::new(),
            versions: Vec::new(),
            album_type: AlbumType::Album,
            albumartists: Vec::new(),
            artisthashes: Vec::new(),
            pathhash: String::new(),
            weakhash: String::new(),
            trackcount: 0,
            duration: 0,
            date: track.date,
            created_date: track.last_mod,
            genres: Vec::new(),
            stats: PlayStats::default(),
            favorites: Favorites::default(),
            sample_filepath: String::new(),
        };
        album.adopt_identity(track);
        album
    }

    fn adopt_identity(&mut self, track: &PhysicalTrack) {
        self.title = track.album.clone();
        self.og_title = track.og_album.clone();
        self.albumartists = track.albumartists.clone();
        self.artisthashes = track
            .albumartists
            .iter()
            .map(|a| a.artisthash.clone())
            .collect();
        self.pathhash = pathhash(&track.folder);
        let names: Vec<&str> = self.albumartists.iter().map(|a| a.name.as_str()).collect();
        self.weakhash = hash(&[self.og_title.as_str(), names.join(", ").as_str()]);
        self.sample_filepath = track.filepath.clone();
    }

    fn absorb(&mut self, track: &PhysicalTrack) {
        if track.filepath < self.sample_filepath {
            self.adopt_identity(track);
        }
        self.duration += u64::from(track.duration);
        self.stats.accumulate(&track.stats);
        self.date = self.date.min(track.date);
        self.created_date = self.created_date.min(track.last_mod);
        merge_genres(&mut self.genres, &track.genres);
    }

    pub fn stats(&self) -> &PlayStats {
        &self.stats
    }

    pub fn favorites(&self) -> &Favorites {
        &self.favorites
    }
}

/// Decides the album type. Tests run in a fixed order and the first match
/// wins.
pub fn classify(album: &Album, tracks: &[&PhysicalTrack], single_track_as_single: bool) -> AlbumType {
    let og_title = album.og_title.to_lowercase();
    let title = album.title.to_lowercase();

    if is_single(album, &og_title, tracks, single_track_as_single) {
        return AlbumType::Single;
    }
    if contains_any(&og_title, SOUNDTRACK_MARKERS) {
        return AlbumType::Soundtrack;
    }
    if contains_any(&og_title, LIVE_MARKERS) {
        return AlbumType::LiveAlbum;
    }
    if is_compilation(album, &title) {
        return AlbumType::Compilation;
    }
    if album.title.trim().ends_with(" EP") {
        return AlbumType::Ep;
    }
    AlbumType::Album
}

fn is_single(
    album: &Album,
    og_title: &str,
    tracks: &[&PhysicalTrack],
    single_track_as_single: bool,
) -> bool {
    if contains_any(og_title, SINGLE_MARKERS) {
        return true;
    }
    if single_track_as_single && album.trackcount == 1 {
        return true;
    }
    if let [only] = tracks {
        let title_key = hash(&[only.title.as_str()]);
        return title_key == hash(&[album.title.as_str()])
            || title_key == hash(&[album.og_title.as_str()]);
    }
    false
}

fn is_compilation(album: &Album, title: &str) -> bool {
    let artists = album
        .albumartists
        .iter()
        .map(|a| a.name.to_lowercase())
        .collect::<Vec<_>>()
        .join(", ");
    artists.contains(VARIOUS_ARTISTS) || contains_any(title, COMPILATION_MARKERS)
}

fn contains_any(text: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| text.contains(m))
}

pub(crate) fn merge_genres(target: &mut Vec<Genre>, incoming: &[Genre]) {
    for genre in incoming {
        if target.iter().any(|g| g.genrehash == genre.genrehash) {
            continue;
        }
        let pos = target
            .binary_search_by(|g| g.name.as_str().cmp(genre.name.as_str()))
            .unwrap_or_else(|pos| pos);
        target.insert(pos, genre.clone());
    }
}

/// An album and the trackhashes it owns.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AlbumEntry {
    pub album: Album,
    pub trackhashes: BTreeSet<String>,
}

impl AlbumEntry {
    /// Adds a track that is new to this album. Returns false when the
    /// trackhash was already owned.
    pub(crate) fn extend(&mut self, track: &PhysicalTrack, single_track_as_single: bool) -> bool {
        if !self.trackhashes.insert(track.trackhash.clone()) {
            return false;
        }
        self.album.absorb(track);
        // Two or more tracks now, so the title-match single test cannot apply.
        self.refresh(&[], single_track_as_single);
        true
    }

    fn refresh(&mut self, tracks: &[&PhysicalTrack], single_track_as_single: bool) {
        self.album.trackcount = self.trackhashes.len();
        let (base_title, versions) = parse_edition(&self.album.og_title);
        self.album.base_title = base_title;
        self.album.album_type = classify(&self.album, tracks, single_track_as_single);
        self.album.versions =
            prune_versions(versions, self.album.album_type == AlbumType::Soundtrack);
    }
}

/// Builds albums from canonical tracks (one per trackhash).
pub fn aggregate_albums(
    tracks: &[&PhysicalTrack],
    single_track_as_single: bool,
) -> HashMap<String, AlbumEntry> {
    let mut entries: HashMap<String, AlbumEntry> = HashMap::new();
    let mut members: HashMap<String, Vec<&PhysicalTrack>> = HashMap::new();

    for track in tracks {
        let entry = entries
            .entry(track.albumhash.clone())
            .or_insert_with(|| AlbumEntry {
                album: Album::seed(track),
                trackhashes: BTreeSet::new(),
            });
        if entry.trackhashes.insert(track.trackhash.clone()) {
            entry.album.absorb(track);
            members.entry(track.albumhash.clone()).or_default().push(track);
        }
    }

    for (albumhash, entry) in entries.iter_mut() {
        let tracks = members.get(albumhash).map(Vec::as_slice).unwrap_or(&[]);
        entry.refresh(tracks, single_track_as_single);
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::tests::{record, track};
    use metadata::TagOptions;

    fn single_album(og_title: &str, artist: &str) -> Album {
        let mut album = Album::seed(&track("/m/x.mp3", "Other", og_title, artist));
        album.og_title = og_title.to_string();
        album.title = og_title.to_string();
        album.trackcount = 3;
        album
    }

    #[test]
    fn classification_order() {
        let cases = [
            ("Song - Single", AlbumType::Single),
            ("Film (Original Motion Picture Soundtrack)", AlbumType::Soundtrack),
            ("Live at Wembley", AlbumType::LiveAlbum),
            ("The Best of Things", AlbumType::Compilation),
            ("Five Songs EP", AlbumType::Ep),
            ("Regular", AlbumType::Album),
            ("Soundtrack Single Version", AlbumType::Single),
        ];
        for (title, expected) in cases {
            assert_eq!(classify(&single_album(title, "A"), &[], false), expected, "{}", title);
        }
        assert_eq!(
            classify(&single_album("Mixed", "Various Artists"), &[], false),
            AlbumType::Compilation
        );
    }

    #[test]
    fn single_track_rules() {
        let only = track("/m/a.mp3", "Hit", "Hit", "A");
        let mut album = Album::seed(&only);
        album.trackcount = 1;
        assert_eq!(classify(&album, &[&only], false), AlbumType::Single);

        let other = track("/m/b.mp3", "Intro", "Record", "A");
        let mut album = Album::seed(&other);
        album.trackcount = 1;
        assert_eq!(classify(&album, &[&other], false), AlbumType::Album);
        assert_eq!(classify(&album, &[&other], true), AlbumType::Single);
    }

    #[test]
    fn aggregates_rollups_and_versions() {
        let mut first = record("/m/lp/01.mp3", "One", "LP (Deluxe Edition)", "A");
        first.playcount = 2;
        first.playduration = 300;
        first.lastplayed = 40;
        first.date = 500;
        let mut second = record("/m/lp/02.mp3", "Two", "LP (Deluxe Edition)", "A");
        second.playcount = 1;
        second.playduration = 100;
        second.lastplayed = 90;
        second.last_mod = 1_500;
        second.genres = Some("Pop".to_string());

        let options = TagOptions::default();
        let tracks = vec![
            PhysicalTrack::from_record(&second, &options),
            PhysicalTrack::from_record(&first, &options),
        ];
        let refs: Vec<&PhysicalTrack> = tracks.iter().collect();
        let albums = aggregate_albums(&refs, false);
        assert_eq!(albums.len(), 1);

        let entry = albums.values().next().unwrap();
        let album = &entry.album;
        assert_eq!(album.trackcount, 2);
        assert_eq!(entry.trackhashes.len(), 2);
        assert_eq!(album.duration, 400);
        assert_eq!(album.stats().playcount(), 3);
        assert_eq!(album.stats().playduration(), 400);
        assert_eq!(album.stats().lastplayed(), 90);
        assert_eq!(album.date, 500);
        assert_eq!(album.created_date, 1_500);
        assert_eq!(album.og_title, "LP (Deluxe Edition)");
        assert_eq!(album.title, "LP");
        assert_eq!(album.base_title, "LP");
        assert_eq!(album.versions, vec!["deluxe"]);
        assert_eq!(album.sample_filepath, "/m/lp/01.mp3");
        let genres: Vec<&str> = album.genres.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(genres, vec!["pop", "rock"]);
    }

    #[test]
    fn extend_matches_aggregation() {
        let options = TagOptions::default();
        let a = PhysicalTrack::from_record(&record("/m/lp/01.mp3", "One", "LP", "A"), &options);
        let b = PhysicalTrack::from_record(&record("/m/lp/02.mp3", "Two", "LP", "A"), &options);

        let mut extended = aggregate_albums(&[&b], false).remove(&b.albumhash).unwrap();
        assert!(extended.extend(&a, false));
        assert!(!extended.extend(&a, false));

        let rebuilt = aggregate_albums(&[&a, &b], false).remove(&a.albumhash).unwrap();
        assert_eq!(extended, rebuilt);
    }
}
