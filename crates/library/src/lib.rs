pub mod album;
pub mod album_store;
pub mod artist_store;
pub mod catalog;
mod db;
pub mod folder_store;
pub mod scan;
pub mod track;
pub mod track_store;
pub mod versions;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use common::{path_to_slash_string, FavoriteKind};
use metadata::{MetadataError, TagOptions};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use redb::{CommitError, Database, DatabaseError, StorageError, TableError, TransactionError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use album::{Album, AlbumEntry, AlbumType};
pub use album_store::AlbumStore;
pub use artist_store::{Artist, ArtistEntry, ArtistStore};
pub use catalog::Catalog;
pub use folder_store::FolderStore;
pub use track::{Favorites, PhysicalTrack, PlayStats, TrackGroup, TrackRecord};
pub use track_store::{AddOutcome, TrackStore};

use catalog::Mutation;

/// Monotonic reload counter. A reload holding an older token has been
/// superseded and must not publish.
#[derive(Debug, Default)]
pub struct Generation(AtomicU64);

impl Generation {
    /// Claims a new token, superseding every earlier one.
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, token: u64) -> bool {
        self.current() == token
    }
}

#[derive(Clone, Debug, Default)]
pub struct LibraryOptions {
    pub roots: Vec<PathBuf>,
    pub exclude_dirs: Vec<String>,
    pub tags: TagOptions,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryStats {
    pub artists: usize,
    pub albums: usize,
    pub tracks: usize,
    pub files: usize,
}

impl LibraryStats {
    fn of(catalog: &Catalog) -> Self {
        Self {
            artists: catalog.artists().len(),
            albums: catalog.albums().len(),
            tracks: catalog.tracks().len(),
            files: catalog.tracks().file_count(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RebuildOutcome {
    Completed(LibraryStats),
    Superseded,
}

#[derive(Default)]
struct WriterState {
    /// Mutations applied since the reload holding this token opened its
    /// snapshot.
    journal: Option<(u64, Vec<Mutation>)>,
    /// Files written incrementally since the rebuild holding this token
    /// started scanning.
    touched: Option<(u64, HashSet<String>)>,
}

impl WriterState {
    fn record(&mut self, mutation: Mutation) {
        if let Some((_, journal)) = self.journal.as_mut() {
            journal.push(mutation);
        }
    }

    fn touch(&mut self, filepath: &str) {
        if let Some((_, touched)) = self.touched.as_mut() {
            touched.insert(filepath.to_string());
        }
    }
}

struct Inner {
    db: Arc<Database>,
    options: LibraryOptions,
    generation: Generation,
    catalog: RwLock<Catalog>,
    writer: Mutex<WriterState>,
}

/// Shared handle to the track table and the catalog built from it.
#[derive(Clone)]
pub struct Library {
    inner: Arc<Inner>,
}

impl Library {
    pub fn open(db_path: &Path, options: LibraryOptions) -> Result<Self, LibraryError> {
        let db = Self::open_db(db_path)?;
        info!("Opened index at {:?}", db_path);
        Self::open_with_db(db, options)
    }

    /// Publishes the catalog as persisted, without touching the filesystem.
    pub fn open_with_db(db: Arc<Database>, options: LibraryOptions) -> Result<Self, LibraryError> {
        if db::ensure_schema(&db)? {
            info!("Index reset; a rebuild will retag every file");
        }
        let library = Self {
            inner: Arc::new(Inner {
                db,
                options,
                generation: Generation::default(),
                catalog: RwLock::new(Catalog::default()),
                writer: Mutex::new(WriterState::default()),
            }),
        };
        library.reload()?;
        Ok(library)
    }

    pub fn open_db(path: &Path) -> Result<Arc<Database>, LibraryError> {
        let db = db::open_or_create_db(path)?;
        Ok(Arc::new(db))
    }

    pub fn options(&self) -> &LibraryOptions {
        &self.inner.options
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.inner.options.roots
    }

    pub fn catalog(&self) -> RwLockReadGuard<'_, Catalog> {
        self.inner.catalog.read()
    }

    pub fn stats(&self) -> LibraryStats {
        LibraryStats::of(&self.catalog())
    }

    /// Syncs the table with the roots (tagging new and modified files,
    /// dropping vanished ones), then reloads the catalog.
    pub fn rebuild(&self) -> Result<RebuildOutcome, LibraryError> {
        let token = self.begin_rebuild();
        let changes = match scan::scan_changes(
            &self.inner.db,
            &self.inner.options.roots,
            &self.inner.options.exclude_dirs,
        ) {
            Ok(changes) => changes,
            Err(err) => {
                let mut writer = self.inner.writer.lock();
                if matches!(writer.touched, Some((owner, _)) if owner == token) {
                    writer.touched = None;
                }
                return Err(err);
            }
        };
        self.finish_rebuild(token, changes)
    }

    fn begin_rebuild(&self) -> u64 {
        let mut writer = self.inner.writer.lock();
        let token = self.inner.generation.advance();
        writer.touched = Some((token, HashSet::new()));
        info!("Rebuild {} started", token);
        token
    }

    /// Writes what the scan found, leaving alone files that were written
    /// incrementally while it ran.
    fn finish_rebuild(
        &self,
        token: u64,
        changes: scan::ScanChanges,
    ) -> Result<RebuildOutcome, LibraryError> {
        {
            let mut writer = self.inner.writer.lock();
            let touched = match writer.touched.take() {
                Some((owner, touched)) if owner == token => touched,
                other => {
                    writer.touched = other;
                    info!("Rebuild {} superseded while scanning", token);
                    return Ok(RebuildOutcome::Superseded);
                }
            };
            if !self.inner.generation.is_current(token) {
                info!("Rebuild {} superseded while scanning", token);
                return Ok(RebuildOutcome::Superseded);
            }
            if !touched.is_empty() {
                debug!("Keeping {} files changed during the scan", touched.len());
            }
            db::write_records(&self.inner.db, &changes.upserts, &changes.deletes, &touched)?;
        }
        info!(
            "Tagged {} files ({} failed, {} unchanged, {} removed)",
            changes.upserts.len(),
            changes.failed,
            changes.unchanged,
            changes.deletes.len()
        );
        self.load(token)
    }

    /// Rebuilds the catalog from the table alone.
    pub fn reload(&self) -> Result<RebuildOutcome, LibraryError> {
        let token = self.inner.generation.advance();
        self.load(token)
    }

    fn load(&self, token: u64) -> Result<RebuildOutcome, LibraryError> {
        let read_txn = {
            let mut writer = self.inner.writer.lock();
            if !self.inner.generation.is_current(token) {
                info!("Reload {} superseded", token);
                return Ok(RebuildOutcome::Superseded);
            }
            writer.journal = Some((token, Vec::new()));
            match self.inner.db.begin_read() {
                Ok(txn) => txn,
                Err(err) => {
                    writer.journal = None;
                    return Err(err.into());
                }
            }
        };

        let generation = &self.inner.generation;
        let options = &self.inner.options;
        let built = (|| -> Result<Option<(Catalog, Vec<String>)>, LibraryError> {
            let tracks_table = read_txn.open_table(db::TRACKS_TABLE)?;
            let favorites_table = read_txn.open_table(db::FAVORITES_TABLE)?;
            let Some(records) = db::read_records(&tracks_table, generation, token)? else {
                return Ok(None);
            };
            let favorites = db::read_favorites(&favorites_table)?;
            let tracks = records
                .iter()
                .map(|record| PhysicalTrack::from_record(record, &options.tags));
            let Some(store) = TrackStore::load_all(tracks, generation, token) else {
                return Ok(None);
            };
            // Duplicates joining a group adopt its counters in memory; those
            // rows are written back once the catalog is final.
            let drifted: Vec<String> = records
                .iter()
                .filter(|record| {
                    store.track_at(&record.filepath).map_or(false, |track| {
                        *track.stats()
                            != PlayStats::new(record.playcount, record.playduration, record.lastplayed)
                    })
                })
                .map(|record| record.filepath.clone())
                .collect();
            let catalog = Catalog::build(store, favorites, options.tags.show_albums_as_singles);
            Ok(Some((catalog, drifted)))
        })();
        drop(read_txn);

        let mut writer = self.inner.writer.lock();
        let owns_journal = matches!(writer.journal, Some((owner, _)) if owner == token);
        let (mut catalog, drifted) = match built {
            Ok(Some(built)) if owns_journal && self.inner.generation.is_current(token) => built,
            Ok(_) => {
                if owns_journal {
                    writer.journal = None;
                }
                info!("Reload {} superseded", token);
                return Ok(RebuildOutcome::Superseded);
            }
            Err(err) => {
                if owns_journal {
                    writer.journal = None;
                }
                return Err(err);
            }
        };

        let journal = writer.journal.take().map(|(_, journal)| journal).unwrap_or_default();
        if !journal.is_empty() {
            debug!("Replaying {} changes onto reload {}", journal.len(), token);
        }
        for mutation in journal {
            catalog.apply(mutation);
        }
        let updates: Vec<(&str, PlayStats)> = drifted
            .iter()
            .filter_map(|path| {
                catalog
                    .tracks()
                    .track_at(path)
                    .map(|track| (path.as_str(), *track.stats()))
            })
            .collect();
        if !updates.is_empty() {
            debug!("Syncing play counters of {} duplicate files", updates.len());
            db::sync_play_stats(&self.inner.db, &updates)?;
        }
        let stats = LibraryStats::of(&catalog);
        let previous = std::mem::replace(&mut *self.inner.catalog.write(), catalog);
        drop(writer);
        drop(previous);

        info!(
            "Library ready: {} artists, {} albums, {} tracks ({} files)",
            stats.artists, stats.albums, stats.tracks, stats.files
        );
        Ok(RebuildOutcome::Completed(stats))
    }

    /// Tags one file and adds or replaces it.
    pub fn add_track(&self, path: &Path) -> Result<(), LibraryError> {
        let record = scan::tag_file(path)?;
        self.add_record(record)
    }

    /// Adds or replaces one row. A file joining a group takes over the
    /// group's play counters, on disk as in memory.
    pub fn add_record(&self, mut record: TrackRecord) -> Result<(), LibraryError> {
        let mut writer = self.inner.writer.lock();
        if let Some(previous) = db::read_record(&self.inner.db, &record.filepath)? {
            db::keep_play_counters(&mut record, &previous);
        }
        let mut track = PhysicalTrack::from_record(&record, &self.inner.options.tags);
        let (stats, members) = self.inner.catalog.read().tracks().preview_add(&track);
        record.playcount = stats.playcount();
        record.playduration = stats.playduration();
        record.lastplayed = stats.lastplayed();
        track.stats = stats;
        db::write_group_member(&self.inner.db, &record, &members)?;

        debug!("Indexed {}", track.filepath);
        writer.touch(&track.filepath);
        self.inner.catalog.write().add_track(track.clone());
        writer.record(Mutation::Add(track));
        Ok(())
    }

    /// Removes a file, or every file under a directory. Returns how many
    /// files were dropped.
    pub fn remove_track(&self, path: &Path) -> Result<usize, LibraryError> {
        let path = path_to_slash_string(path);
        let mut writer = self.inner.writer.lock();
        let mut filepaths = db::stored_filepaths(&self.inner.db, &path)?;
        {
            let catalog = self.inner.catalog.read();
            let folders = catalog.folders();
            if folders.contains(&path) {
                filepaths.push(path.clone());
            } else {
                filepaths.extend(folders.paths_under(&common::dir_prefix(&path)).iter().cloned());
            }
        }
        filepaths.sort();
        filepaths.dedup();
        if filepaths.is_empty() {
            return Ok(0);
        }

        db::write_records(&self.inner.db, &[], &filepaths, &HashSet::new())?;
        for filepath in &filepaths {
            writer.touch(filepath);
        }
        let removed = self.inner.catalog.write().remove_filepaths(&filepaths);
        debug!("Removed {} files under {}", removed.len(), path);
        let count = filepaths.len();
        writer.record(Mutation::Remove(filepaths));
        Ok(count)
    }

    /// Adds one play to a logical track. Returns false for unknown hashes.
    pub fn record_play(&self, trackhash: &str, duration: u64, timestamp: i64) -> Result<bool, LibraryError> {
        let mut writer = self.inner.writer.lock();
        let (filepaths, mut stats) = {
            let catalog = self.inner.catalog.read();
            let Some(group) = catalog.tracks().group(trackhash) else {
                return Ok(false);
            };
            let Some(first) = group.tracks().first() else {
                return Ok(false);
            };
            let filepaths: Vec<String> = group.tracks().iter().map(|t| t.filepath.clone()).collect();
            (filepaths, *first.stats())
        };
        stats.record(duration, timestamp);
        db::write_play_stats(&self.inner.db, &filepaths, &stats)?;

        self.inner
            .catalog
            .write()
            .record_play(trackhash, duration, timestamp);
        writer.record(Mutation::Play {
            trackhash: trackhash.to_string(),
            duration,
            timestamp,
        });
        Ok(true)
    }

    /// Flips a user's favorite mark and returns the new state.
    pub fn toggle_favorite(&self, kind: FavoriteKind, hash: &str, userid: u32) -> Result<bool, LibraryError> {
        let mut writer = self.inner.writer.lock();
        let on = !self.inner.catalog.read().is_favorite(kind, hash, userid);
        db::set_favorite(&self.inner.db, kind, hash, userid, on)?;
        self.inner
            .catalog
            .write()
            .set_favorite(kind, hash, userid, on);
        writer.record(Mutation::Favorite {
            kind,
            hash: hash.to_string(),
            userid,
            on,
        });
        Ok(on)
    }
}

#[derive(Debug)]
pub enum LibraryError {
    Io(std::io::Error),
    Metadata(MetadataError),
    Redb(redb::Error),
    Bincode(Box<bincode::ErrorKind>),
    KeyParse(String),
    InvalidTrack(String),
}

impl std::fmt::Display for LibraryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibraryError::Io(err) => write!(f, "io error: {}", err),
            LibraryError::Metadata(err) => write!(f, "metadata error: {}", err),
            LibraryError::Redb(err) => write!(f, "db error: {}", err),
            LibraryError::Bincode(err) => write!(f, "bincode error: {}", err),
            LibraryError::KeyParse(value) => write!(f, "key parse error: {}", value),
            LibraryError::InvalidTrack(path) => {
                write!(f, "no playable audio (zero duration or bitrate): {}", path)
            }
        }
    }
}

impl std::error::Error for LibraryError {}

impl From<std::io::Error> for LibraryError {
    fn from(err: std::io::Error) -> Self {
        LibraryError::Io(err)
    }
}

impl From<MetadataError> for LibraryError {
    fn from(err: MetadataError) -> Self {
        LibraryError::Metadata(err)
    }
}

impl From<redb::Error> for LibraryError {
    fn from(err: redb::Error) -> Self {
        LibraryError::Redb(err)
    }
}

impl From<DatabaseError> for LibraryError {
    fn from(err: DatabaseError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TableError> for LibraryError {
    fn from(err: TableError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TransactionError> for LibraryError {
    fn from(err: TransactionError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<StorageError> for LibraryError {
    fn from(err: StorageError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<CommitError> for LibraryError {
    fn from(err: CommitError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<Box<bincode::ErrorKind>> for LibraryError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        LibraryError::Bincode(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::tests::write_wav;
    use crate::track::tests::record;

    fn open_in(dir: &Path, roots: Vec<PathBuf>) -> Library {
        let options = LibraryOptions {
            roots,
            ..LibraryOptions::default()
        };
        Library::open(&dir.join("index").join("library.redb"), options).unwrap()
    }

    #[test]
    fn flac_and_mp3_copies_share_a_group() {
        let dir = tempfile::tempdir().unwrap();
        let library = open_in(dir.path(), Vec::new());

        let mp3 = record("/music/lp/01.mp3", "Song", "LP", "Band");
        let mut flac = record("/music/lp/01.flac", "Song", "LP", "Band");
        flac.bitrate = 1_411;
        library.add_record(mp3.clone()).unwrap();
        library.add_record(flac).unwrap();

        let catalog = library.catalog();
        assert_eq!(catalog.tracks().len(), 1);
        let group = catalog.tracks().groups().next().unwrap();
        assert_eq!(group.len(), 2);
        assert_eq!(group.get_best().unwrap().filepath, "/music/lp/01.flac");
        assert_eq!(catalog.albums().get(&mp3.albumhash).unwrap().trackcount, 1);
        assert_eq!(catalog.folders().count_tracks_containing("/music/lp/"), 2);
    }

    #[test]
    fn watched_add_extends_album_and_folder_index() {
        let dir = tempfile::tempdir().unwrap();
        let library = open_in(dir.path(), Vec::new());
        let first = record("/music/lp/01.mp3", "One", "LP", "Band");
        library.add_record(first.clone()).unwrap();
        library
            .add_record(record("/music/lp/02.mp3", "Two", "LP", "Band"))
            .unwrap();
        library
            .add_record(record("/music/lp/00.mp3", "Zero", "LP", "Band"))
            .unwrap();

        let catalog = library.catalog();
        assert_eq!(catalog.albums().get(&first.albumhash).unwrap().trackcount, 3);
        assert_eq!(
            catalog.folders().paths(),
            &["/music/lp/00.mp3", "/music/lp/01.mp3", "/music/lp/02.mp3"]
        );
    }

    #[test]
    fn removing_a_directory_drops_its_entities() {
        let dir = tempfile::tempdir().unwrap();
        let library = open_in(dir.path(), Vec::new());
        let kept = record("/music/a/01.mp3", "One", "Kept", "Band");
        let gone = record("/music/b/01.mp3", "Two", "Gone", "Solo");
        library.add_record(kept.clone()).unwrap();
        library.add_record(gone.clone()).unwrap();

        assert_eq!(library.remove_track(Path::new("/music/b")).unwrap(), 1);
        assert_eq!(library.remove_track(Path::new("/music/b")).unwrap(), 0);

        let catalog = library.catalog();
        assert!(catalog.albums().get(&gone.albumhash).is_none());
        assert!(catalog.artists().get(&common::artisthash("Solo")).is_none());
        assert!(catalog.albums().get(&kept.albumhash).is_some());
        drop(catalog);

        library.reload().unwrap();
        assert_eq!(library.stats().files, 1);
    }

    #[test]
    fn plays_and_favorites_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let song = record("/music/lp/01.mp3", "Song", "LP", "Band");
        let trackhash = {
            let library = open_in(dir.path(), Vec::new());
            library.add_record(song.clone()).unwrap();
            library
                .add_record(record("/music/lp/01.flac", "Song", "LP", "Band"))
                .unwrap();
            let trackhash = library.catalog().tracks().groups().next().unwrap().trackhash().unwrap().to_string();
            assert!(library.record_play(&trackhash, 180, 1_700).unwrap());
            assert!(!library.record_play("missing", 180, 1_700).unwrap());
            assert!(library.toggle_favorite(FavoriteKind::Album, &song.albumhash, 9).unwrap());
            assert!(library.toggle_favorite(FavoriteKind::Track, &trackhash, 9).unwrap());
            assert!(!library.toggle_favorite(FavoriteKind::Track, &trackhash, 9).unwrap());
            trackhash
        };

        let library = open_in(dir.path(), Vec::new());
        let catalog = library.catalog();
        let group = catalog.tracks().group(&trackhash).unwrap();
        for member in group.tracks() {
            assert_eq!(member.stats(), &PlayStats::new(1, 180, 1_700));
            assert!(!member.favorites().contains(9));
        }
        let album = catalog.albums().get(&song.albumhash).unwrap();
        assert_eq!(album.stats().playcount(), 1);
        assert!(album.favorites().contains(9));
        assert_eq!(
            catalog.artists().get(&common::artisthash("Band")).unwrap().stats().playduration(),
            180
        );
    }

    #[test]
    fn rebuild_tags_new_files_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("music");
        write_wav(&root.join("Band - One.wav"), 2);
        write_wav(&root.join("sub").join("Band - Two.wav"), 3);
        write_wav(&root.join(".hidden").join("Band - Three.wav"), 1);
        let library = open_in(dir.path(), vec![root.clone()]);
        assert_eq!(library.stats(), LibraryStats::default());

        let first = match library.rebuild().unwrap() {
            RebuildOutcome::Completed(stats) => stats,
            RebuildOutcome::Superseded => panic!("rebuild superseded"),
        };
        assert_eq!(first.tracks, 2);
        assert_eq!(first.artists, 1);
        let snapshot = library.catalog().clone();

        assert_eq!(library.rebuild().unwrap(), RebuildOutcome::Completed(first));
        assert_eq!(*library.catalog(), snapshot);

        std::fs::remove_file(root.join("sub").join("Band - Two.wav")).unwrap();
        match library.rebuild().unwrap() {
            RebuildOutcome::Completed(stats) => assert_eq!(stats.tracks, 1),
            RebuildOutcome::Superseded => panic!("rebuild superseded"),
        }
    }

    #[test]
    fn changes_during_reloads_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let library = open_in(dir.path(), Vec::new());

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..20 {
                    library.reload().unwrap();
                }
            });
            scope.spawn(|| {
                for i in 0..50 {
                    let path = format!("/music/a/{:02}.mp3", i);
                    let title = format!("Track {}", i);
                    library.add_record(record(&path, &title, "LP", "Band")).unwrap();
                    if i % 5 == 0 {
                        let trackhash = library
                            .catalog()
                            .tracks()
                            .trackhash_for(&path)
                            .map(str::to_string)
                            .unwrap();
                        library.record_play(&trackhash, 10, i).unwrap();
                    }
                }
            });
        });

        let live = library.catalog().clone();
        assert_eq!(live.tracks().len(), 50);
        library.reload().unwrap();
        assert_eq!(*library.catalog(), live);
    }

    #[test]
    fn duplicate_keeps_plays_after_played_copy_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let library = open_in(dir.path(), Vec::new());
        let played = record("/music/lp/a.mp3", "Song", "LP", "Band");
        library.add_record(played.clone()).unwrap();
        let trackhash = library
            .catalog()
            .tracks()
            .trackhash_for(&played.filepath)
            .map(str::to_string)
            .unwrap();
        assert!(library.record_play(&trackhash, 120, 50).unwrap());
        library
            .add_record(record("/music/lp/b.mp3", "Song", "LP", "Band"))
            .unwrap();
        assert_eq!(library.remove_track(Path::new("/music/lp/a.mp3")).unwrap(), 1);

        let expected = PlayStats::new(1, 120, 50);
        let live = *library.catalog().tracks().track_at("/music/lp/b.mp3").unwrap().stats();
        assert_eq!(live, expected);
        library.reload().unwrap();
        let reloaded = *library.catalog().tracks().track_at("/music/lp/b.mp3").unwrap().stats();
        assert_eq!(reloaded, expected);
        let stored = db::read_record(&library.inner.db, "/music/lp/b.mp3").unwrap().unwrap();
        assert_eq!(stored.playcount, 1);
    }

    #[test]
    fn rescanned_duplicates_inherit_plays() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("music");
        let first = root.join("x").join("Band - One.wav");
        write_wav(&first, 2);
        let library = open_in(dir.path(), vec![root.clone()]);
        library.rebuild().unwrap();
        let trackhash = library
            .catalog()
            .tracks()
            .trackhash_for(&path_to_slash_string(&first))
            .map(str::to_string)
            .unwrap();
        assert!(library.record_play(&trackhash, 2, 10).unwrap());

        write_wav(&root.join("y").join("Band - One.wav"), 2);
        library.rebuild().unwrap();
        assert_eq!(library.catalog().tracks().count_by_trackhash(&trackhash), 2);

        std::fs::remove_file(&first).unwrap();
        library.rebuild().unwrap();
        let catalog = library.catalog();
        let group = catalog.tracks().group(&trackhash).unwrap();
        assert_eq!(group.len(), 1);
        assert_eq!(group.tracks()[0].stats(), &PlayStats::new(1, 2, 10));
    }

    #[test]
    fn rebuild_keeps_rows_written_while_scanning() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("music");
        let file = root.join("Band - One.wav");
        write_wav(&file, 2);
        let library = open_in(dir.path(), vec![root.clone()]);
        let ghost = record("/elsewhere/ghost.mp3", "Ghost", "LP", "Band");
        library.add_record(ghost.clone()).unwrap();

        let token = library.begin_rebuild();
        let changes = scan::scan_changes(&library.inner.db, library.roots(), &[]).unwrap();
        assert!(changes.deletes.contains(&ghost.filepath));
        let one = path_to_slash_string(&file);
        assert!(changes.upserts.iter().any(|r| r.filepath == one));

        library
            .add_record(record(&one, "One Retagged", "Bootleg", "Band"))
            .unwrap();
        library.add_record(ghost.clone()).unwrap();
        assert!(matches!(
            library.finish_rebuild(token, changes).unwrap(),
            RebuildOutcome::Completed(_)
        ));

        let stored = db::read_record(&library.inner.db, &one).unwrap().unwrap();
        assert_eq!(stored.title, "One Retagged");
        assert!(db::read_record(&library.inner.db, &ghost.filepath).unwrap().is_some());
        let catalog = library.catalog();
        assert_eq!(catalog.tracks().track_at(&one).unwrap().title, "One Retagged");
        assert!(catalog.folders().contains(&ghost.filepath));
        drop(catalog);

        let stale = library.begin_rebuild();
        let current = library.begin_rebuild();
        assert_eq!(
            library.finish_rebuild(stale, scan::ScanChanges::default()).unwrap(),
            RebuildOutcome::Superseded
        );
        assert!(matches!(
            library.finish_rebuild(current, scan::ScanChanges::default()).unwrap(),
            RebuildOutcome::Completed(_)
        ));
    }

    #[test]
    fn stale_reload_does_not_publish() {
        let dir = tempfile::tempdir().unwrap();
        let library = open_in(dir.path(), Vec::new());
        let stale = library.inner.generation.advance();
        library.inner.generation.advance();
        assert_eq!(library.load(stale).unwrap(), RebuildOutcome::Superseded);
    }
}
