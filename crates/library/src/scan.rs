//! Filesystem enumeration and tag extraction feeding the track table.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use common::{dir_prefix, path_to_slash_string};
use metadata::parsers::{extract_artist_title, parse_date};
use metadata::read_tags;
use rayon::prelude::*;
use redb::Database;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::db;
use crate::track::TrackRecord;
use crate::LibraryError;

pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "flac", "mp3", "wav", "m4a", "ogg", "wma", "opus", "alac", "aiff",
];

const UNKNOWN: &str = "Unknown";

pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .map_or(false, |ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

/// True for directories the walker never descends into: hidden (`.`),
/// system (`$`) and configured exclusions, matched by name or full path.
pub fn is_excluded_dir(path: &Path, exclude_dirs: &[String]) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if name.starts_with('.') || name.starts_with('$') {
        return true;
    }
    let full = path_to_slash_string(path);
    exclude_dirs.iter().any(|dir| {
        let dir = dir.trim_end_matches('/');
        !dir.is_empty() && (name == dir || full == dir)
    })
}

pub fn collect_audio_files(roots: &[PathBuf], exclude_dirs: &[String]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for root in roots {
        let walker = WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || !is_excluded_dir(entry.path(), exclude_dirs)
            });
        for entry in walker.filter_map(Result::ok) {
            if entry.file_type().is_file() && is_supported(entry.path()) {
                files.push(entry.into_path());
            }
        }
    }
    files.sort();
    files.dedup();
    files
}

pub fn file_mtime_secs(path: &Path) -> Result<i64, LibraryError> {
    let modified = fs::metadata(path)?.modified()?;
    let secs = modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    Ok(i64::try_from(secs).unwrap_or(i64::MAX))
}

/// Reads one file into a track row. Files without duration or bitrate are
/// rejected; missing tags fall back to the filename and "Unknown".
pub fn tag_file(path: &Path) -> Result<TrackRecord, LibraryError> {
    let info = read_tags(path)?;
    if info.duration_secs == 0 || info.bitrate == 0 {
        return Err(LibraryError::InvalidTrack(path_to_slash_string(path)));
    }
    let last_mod = file_mtime_secs(path)?;

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let from_name = extract_artist_title(&stem);

    let title = info.title.unwrap_or(from_name.title);
    let artists = info
        .artist
        .clone()
        .or_else(|| info.album_artist.clone())
        .or(from_name.artist)
        .unwrap_or_else(|| UNKNOWN.to_string());
    let albumartists = info.album_artist.unwrap_or_else(|| artists.clone());
    let album = info.album.unwrap_or_else(|| UNKNOWN.to_string());

    let folder = path
        .parent()
        .map(|p| dir_prefix(&path_to_slash_string(p)))
        .unwrap_or_else(|| "/".to_string());
    let date = info
        .date
        .as_deref()
        .and_then(parse_date)
        .unwrap_or(last_mod);

    let mut extra = BTreeMap::new();
    if let Some(sample_rate) = info.sample_rate {
        extra.insert("samplerate".to_string(), sample_rate.to_string());
    }
    if let Some(channels) = info.channels {
        extra.insert("channels".to_string(), channels.to_string());
    }
    if let Some(ext) = path.extension() {
        extra.insert(
            "filetype".to_string(),
            ext.to_string_lossy().to_ascii_lowercase(),
        );
    }

    Ok(TrackRecord {
        filepath: path_to_slash_string(path),
        folder,
        albumhash: common::albumhash(&album, &[albumartists.as_str()]),
        trackhash: common::trackhash(&title, &album, &[artists.as_str()]),
        title,
        album,
        artists,
        albumartists,
        bitrate: info.bitrate,
        duration: info.duration_secs,
        disc: info.disc_no.unwrap_or(1),
        track: info.track_no.unwrap_or(1),
        genres: info.genre,
        date,
        last_mod,
        copyright: info.copyright,
        lastplayed: 0,
        playcount: 0,
        playduration: 0,
        extra,
    })
}

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct SyncPlan {
    pub to_tag: Vec<PathBuf>,
    pub stale: Vec<String>,
    pub unchanged: usize,
}

/// Splits files on disk into unchanged ones (same mtime as the stored row)
/// and ones needing tags; stored rows with no file left become stale.
pub(crate) fn plan_sync(files: &[(PathBuf, i64)], stored: &HashMap<String, i64>) -> SyncPlan {
    let mut plan = SyncPlan::default();
    let mut seen = HashSet::with_capacity(files.len());
    for (path, mtime) in files {
        let filepath = path_to_slash_string(path);
        if stored.get(&filepath) == Some(mtime) {
            plan.unchanged += 1;
        } else {
            plan.to_tag.push(path.clone());
        }
        seen.insert(filepath);
    }
    plan.stale = stored
        .keys()
        .filter(|path| !seen.contains(*path))
        .cloned()
        .collect();
    plan.stale.sort();
    plan
}

/// Rows to write after comparing the roots against the table.
#[derive(Debug, Default)]
pub(crate) struct ScanChanges {
    pub upserts: Vec<TrackRecord>,
    pub deletes: Vec<String>,
    pub unchanged: usize,
    pub failed: usize,
}

pub(crate) fn scan_changes(
    db: &Database,
    roots: &[PathBuf],
    exclude_dirs: &[String],
) -> Result<ScanChanges, LibraryError> {
    let files = collect_audio_files(roots, exclude_dirs);
    info!("Found {} audio files", files.len());

    let files: Vec<(PathBuf, i64)> = files
        .into_iter()
        .filter_map(|path| match file_mtime_secs(&path) {
            Ok(mtime) => Some((path, mtime)),
            Err(err) => {
                debug!("Skipping {:?}: {}", path, err);
                None
            }
        })
        .collect();
    let stored = db::read_last_mods(db)?;
    let plan = plan_sync(&files, &stored);
    info!(
        "{} unchanged, {} to tag, {} gone",
        plan.unchanged,
        plan.to_tag.len(),
        plan.stale.len()
    );

    let results: Vec<(PathBuf, Result<TrackRecord, LibraryError>)> = plan
        .to_tag
        .par_iter()
        .map(|path| (path.clone(), tag_file(path)))
        .collect();

    let mut changes = ScanChanges {
        deletes: plan.stale,
        unchanged: plan.unchanged,
        ..ScanChanges::default()
    };
    for (path, result) in results {
        match result {
            Ok(record) => changes.upserts.push(record),
            Err(err) => {
                warn!("Skipping {:?}: {}", path, err);
                changes.failed += 1;
                let filepath = path_to_slash_string(&path);
                if stored.contains_key(&filepath) {
                    changes.deletes.push(filepath);
                }
            }
        }
    }
    Ok(changes)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Writes a silent 16-bit mono PCM WAV of `secs` seconds.
    pub(crate) fn write_wav(path: &Path, secs: u32) {
        let sample_rate: u32 = 8_000;
        let byte_rate = sample_rate * 2;
        let data_len = byte_rate * secs;
        let mut bytes = Vec::with_capacity(44 + data_len as usize);
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&byte_rate.to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        bytes.resize(44 + data_len as usize, 0);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, bytes).unwrap();
    }

    #[test]
    fn walker_skips_hidden_and_excluded_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        for rel in [
            "a/01.mp3",
            "a/cover.jpg",
            "a/b/02.FLAC",
            ".hidden/03.mp3",
            "$RECYCLE/04.mp3",
            "skipme/05.mp3",
        ] {
            let path = root.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, b"x").unwrap();
        }

        let files = collect_audio_files(&[root.clone()], &["skipme".to_string()]);
        let names: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(&root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(names, vec!["a/01.mp3", "a/b/02.FLAC"]);
    }

    #[test]
    fn plan_compares_modification_times() {
        let files = vec![
            (PathBuf::from("/m/same.mp3"), 10),
            (PathBuf::from("/m/changed.mp3"), 20),
            (PathBuf::from("/m/new.mp3"), 30),
        ];
        let stored: HashMap<String, i64> = [
            ("/m/same.mp3".to_string(), 10),
            ("/m/changed.mp3".to_string(), 15),
            ("/m/gone.mp3".to_string(), 5),
        ]
        .into_iter()
        .collect();

        let plan = plan_sync(&files, &stored);
        assert_eq!(plan.unchanged, 1);
        assert_eq!(
            plan.to_tag,
            vec![PathBuf::from("/m/changed.mp3"), PathBuf::from("/m/new.mp3")]
        );
        assert_eq!(plan.stale, vec!["/m/gone.mp3".to_string()]);
    }

    #[test]
    fn untagged_wav_falls_back_to_filename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Band - Tune.wav");
        write_wav(&path, 2);

        let record = tag_file(&path).unwrap();
        assert_eq!(record.title, "Tune");
        assert_eq!(record.artists, "Band");
        assert_eq!(record.albumartists, "Band");
        assert_eq!(record.album, "Unknown");
        assert_eq!(record.duration, 2);
        assert!(record.bitrate > 0);
        assert_eq!(record.track, 1);
        assert_eq!(record.date, record.last_mod);
        assert!(record.folder.ends_with('/'));
        assert_eq!(record.extra.get("filetype").map(String::as_str), Some("wav"));
    }

    #[test]
    fn silent_or_broken_files_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.wav");
        write_wav(&empty, 0);
        assert!(tag_file(&empty).is_err());

        let junk = dir.path().join("junk.mp3");
        fs::write(&junk, b"not audio").unwrap();
        assert!(tag_file(&junk).is_err());
    }
}
