use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use common::{dir_prefix, FavoriteKind};
use redb::{Database, ReadableTable, Table, TableDefinition, TableError, WriteTransaction};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::catalog::FavoriteIndex;
use crate::track::{PlayStats, TrackRecord};
use crate::{Generation, LibraryError};

pub(crate) const INDEX_VERSION: u32 = 1;
const KEY_SEP: char = '\x1f';
const FAVORITE_MARK: &[u8] = &[1u8];

pub(crate) const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
pub(crate) const TRACKS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("tracks");
pub(crate) const FAVORITES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("favorites");

const META_VERSION_KEY: &str = "version";

pub(crate) fn open_or_create_db(path: &Path) -> Result<Database, LibraryError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if path.exists() {
        Ok(Database::open(path)?)
    } else {
        Ok(Database::create(path)?)
    }
}

pub(crate) fn read_version(db: &Database) -> Result<Option<u32>, LibraryError> {
    let read_txn = db.begin_read()?;
    let table = match read_txn.open_table(META_TABLE) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let version = match table.get(META_VERSION_KEY)? {
        Some(value) => Some(decode_value(value.value())?),
        None => None,
    };
    Ok(version)
}

/// Stamps a fresh database, or drops the track table when it was written
/// by an incompatible version. Favorites are kept. Returns true on reset.
pub(crate) fn ensure_schema(db: &Database) -> Result<bool, LibraryError> {
    let reset = match read_version(db)? {
        Some(version) if version == INDEX_VERSION => return Ok(false),
        Some(version) => {
            warn!("Index version mismatch ({}); dropping track rows", version);
            true
        }
        None => false,
    };

    let write_txn = db.begin_write()?;
    if reset {
        clear_table(&write_txn, TRACKS_TABLE)?;
    }
    {
        let mut meta = write_txn.open_table(META_TABLE)?;
        let bytes = encode_value(&INDEX_VERSION)?;
        meta.insert(META_VERSION_KEY, bytes.as_slice())?;
        write_txn.open_table(TRACKS_TABLE)?;
        write_txn.open_table(FAVORITES_TABLE)?;
    }
    write_txn.commit()?;
    Ok(reset)
}

/// Reads every track row, giving up with `None` once `generation` moves
/// past `token`.
pub(crate) fn read_records<T>(
    table: &T,
    generation: &Generation,
    token: u64,
) -> Result<Option<Vec<TrackRecord>>, LibraryError>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let mut records = Vec::new();
    for entry in table.iter()? {
        if !generation.is_current(token) {
            return Ok(None);
        }
        let entry = entry?;
        let record: TrackRecord = decode_value(entry.1.value())?;
        records.push(record);
    }
    Ok(Some(records))
}

pub(crate) fn read_favorites<T>(table: &T) -> Result<FavoriteIndex, LibraryError>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let mut index = FavoriteIndex::new();
    for entry in table.iter()? {
        let entry = entry?;
        let (kind, hash, userid) = split_favorite_key(entry.0.value())?;
        index.entry((kind, hash)).or_default().set(userid, true);
    }
    Ok(index)
}

pub(crate) fn read_record(db: &Database, filepath: &str) -> Result<Option<TrackRecord>, LibraryError> {
    let read_txn = db.begin_read()?;
    let table = match read_txn.open_table(TRACKS_TABLE) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let record = match table.get(filepath)? {
        Some(value) => Some(decode_value(value.value())?),
        None => None,
    };
    Ok(record)
}

/// Modification time of every persisted row, keyed by filepath.
pub(crate) fn read_last_mods(db: &Database) -> Result<HashMap<String, i64>, LibraryError> {
    let read_txn = db.begin_read()?;
    let table = match read_txn.open_table(TRACKS_TABLE) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(HashMap::new()),
        Err(err) => return Err(err.into()),
    };
    let mut last_mods = HashMap::new();
    for entry in table.iter()? {
        let entry = entry?;
        let record: TrackRecord = decode_value(entry.1.value())?;
        last_mods.insert(record.filepath, record.last_mod);
    }
    Ok(last_mods)
}

/// Writes and deletes rows in one transaction and returns the rows as
/// stored. Rows replacing an existing file keep that file's play counters.
/// Filepaths in `skip` are left as they are.
pub(crate) fn write_records(
    db: &Database,
    upserts: &[TrackRecord],
    deletes: &[String],
    skip: &HashSet<String>,
) -> Result<Vec<TrackRecord>, LibraryError> {
    let mut written = Vec::with_capacity(upserts.len());
    let write_txn = db.begin_write()?;
    {
        let mut table = write_txn.open_table(TRACKS_TABLE)?;
        for filepath in deletes {
            if skip.contains(filepath) {
                continue;
            }
            table.remove(filepath.as_str())?;
        }
        for record in upserts {
            if skip.contains(&record.filepath) {
                continue;
            }
            let previous: Option<TrackRecord> = match table.get(record.filepath.as_str())? {
                Some(value) => Some(decode_value(value.value())?),
                None => None,
            };
            let mut record = record.clone();
            if let Some(previous) = previous {
                keep_play_counters(&mut record, &previous);
            }
            let bytes = encode_value(&record)?;
            table.insert(record.filepath.as_str(), bytes.as_slice())?;
            written.push(record);
        }
    }
    write_txn.commit()?;
    Ok(written)
}

pub(crate) fn keep_play_counters(record: &mut TrackRecord, previous: &TrackRecord) {
    record.playcount = record.playcount.max(previous.playcount);
    record.playduration = record.playduration.max(previous.playduration);
    record.lastplayed = record.lastplayed.max(previous.lastplayed);
}

/// Writes one row and gives every other member of its group the same play
/// counters, in one transaction.
pub(crate) fn write_group_member(
    db: &Database,
    record: &TrackRecord,
    members: &[String],
) -> Result<(), LibraryError> {
    let stats = PlayStats::new(record.playcount, record.playduration, record.lastplayed);
    let write_txn = db.begin_write()?;
    {
        let mut table = write_txn.open_table(TRACKS_TABLE)?;
        let bytes = encode_value(record)?;
        table.insert(record.filepath.as_str(), bytes.as_slice())?;
        for filepath in members.iter().filter(|path| **path != record.filepath) {
            store_play_stats(&mut table, filepath, &stats)?;
        }
    }
    write_txn.commit()?;
    Ok(())
}

/// The stored row for `path` itself, or every row under it when `path` is a
/// directory.
pub(crate) fn stored_filepaths(db: &Database, path: &str) -> Result<Vec<String>, LibraryError> {
    let read_txn = db.begin_read()?;
    let table = match read_txn.open_table(TRACKS_TABLE) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    if table.get(path)?.is_some() {
        return Ok(vec![path.to_string()]);
    }
    let prefix = dir_prefix(path);
    let mut filepaths = Vec::new();
    for entry in table.range(prefix.as_str()..)? {
        let entry = entry?;
        let filepath = entry.0.value();
        if !filepath.starts_with(&prefix) {
            break;
        }
        filepaths.push(filepath.to_string());
    }
    Ok(filepaths)
}

/// Stores the shared play counters of a track group on each member row.
pub(crate) fn write_play_stats(
    db: &Database,
    filepaths: &[String],
    stats: &PlayStats,
) -> Result<(), LibraryError> {
    let updates: Vec<(&str, PlayStats)> = filepaths.iter().map(|p| (p.as_str(), *stats)).collect();
    sync_play_stats(db, &updates)
}

/// Stores per-row play counters in one transaction. Missing rows are
/// skipped.
pub(crate) fn sync_play_stats(
    db: &Database,
    updates: &[(&str, PlayStats)],
) -> Result<(), LibraryError> {
    if updates.is_empty() {
        return Ok(());
    }
    let write_txn = db.begin_write()?;
    {
        let mut table = write_txn.open_table(TRACKS_TABLE)?;
        for (filepath, stats) in updates {
            store_play_stats(&mut table, filepath, stats)?;
        }
    }
    write_txn.commit()?;
    Ok(())
}

fn store_play_stats(
    table: &mut Table<'_, '_, &'static str, &'static [u8]>,
    filepath: &str,
    stats: &PlayStats,
) -> Result<(), LibraryError> {
    let record: Option<TrackRecord> = match table.get(filepath)? {
        Some(value) => Some(decode_value(value.value())?),
        None => None,
    };
    let Some(mut record) = record else {
        return Ok(());
    };
    record.playcount = stats.playcount();
    record.playduration = stats.playduration();
    record.lastplayed = stats.lastplayed();
    let bytes = encode_value(&record)?;
    table.insert(filepath, bytes.as_slice())?;
    Ok(())
}

pub(crate) fn set_favorite(
    db: &Database,
    kind: FavoriteKind,
    hash: &str,
    userid: u32,
    on: bool,
) -> Result<(), LibraryError> {
    let key = favorite_key(kind, hash, userid);
    let write_txn = db.begin_write()?;
    {
        let mut table = write_txn.open_table(FAVORITES_TABLE)?;
        if on {
            table.insert(key.as_str(), FAVORITE_MARK)?;
        } else {
            table.remove(key.as_str())?;
        }
    }
    write_txn.commit()?;
    Ok(())
}

fn favorite_key(kind: FavoriteKind, hash: &str, userid: u32) -> String {
    format!("{}{}{}{}{}", kind.as_str(), KEY_SEP, hash, KEY_SEP, userid)
}

fn split_favorite_key(key: &str) -> Result<(FavoriteKind, String, u32), LibraryError> {
    let mut parts = key.split(KEY_SEP);
    let (Some(kind), Some(hash), Some(userid), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(LibraryError::KeyParse(key.to_string()));
    };
    let kind = FavoriteKind::parse(kind).ok_or_else(|| LibraryError::KeyParse(key.to_string()))?;
    let userid = userid
        .parse()
        .map_err(|_| LibraryError::KeyParse(key.to_string()))?;
    Ok((kind, hash.to_string(), userid))
}

fn clear_table(
    txn: &WriteTransaction,
    table: TableDefinition<&str, &[u8]>,
) -> Result<(), LibraryError> {
    match txn.delete_table(table) {
        Ok(_) => Ok(()),
        Err(TableError::TableDoesNotExist(_)) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, LibraryError> {
    Ok(bincode::serialize(value)?)
}

fn decode_value<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, LibraryError> {
    Ok(bincode::deserialize(bytes)?)
}
