use std::path::Path;

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    Json,
};
use common::{dir_prefix, path_to_slash_string, FavoriteKind};
use library::{Library, PhysicalTrack};
use tracing::{debug, warn};

use crate::state::{
    AlbumResponse, AppState, ArtistResponse, FavoriteRequest, FavoriteResponse, FolderRequest,
    FolderResponse, JsonResult, ListResponse, LogTrackRequest, LogTrackResponse, PageQuery,
    PathQuery, TracksRequest, TracksResponse, UserQuery,
};
use crate::utils::{json_error, now_secs};

use super::library_or_json_error;

const DEFAULT_PAGE: usize = 50;
const HOME: &str = "$home";
const MAX_PATH_TRACKS: usize = 300;

fn owned(tracks: Vec<&PhysicalTrack>) -> Vec<PhysicalTrack> {
    tracks.into_iter().cloned().collect()
}

/// Immediate subdirectories of `dir` on disk, skipping hidden and
/// excluded ones.
fn child_dirs(dir: &Path, exclude_dirs: &[String]) -> Vec<String> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            debug!("Cannot list {}: {}", dir.display(), err);
            return Vec::new();
        }
    };
    let mut dirs: Vec<String> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .filter(|path| !library::scan::is_excluded_dir(path, exclude_dirs))
        .map(|path| path_to_slash_string(&path))
        .collect();
    dirs.sort();
    dirs
}

fn is_under_root(library: &Library, folder: &str) -> bool {
    library
        .roots()
        .iter()
        .any(|root| folder.starts_with(&dir_prefix(&path_to_slash_string(root))))
}

pub async fn get_folder(
    State(state): State<AppState>,
    Json(request): Json<FolderRequest>,
) -> JsonResult<FolderResponse> {
    let library = library_or_json_error(&state)?;
    let folder = request.folder.trim();
    let exclude_dirs = library.options().exclude_dirs.clone();

    if folder.is_empty() || folder == HOME {
        let roots: Vec<String> = library
            .roots()
            .iter()
            .map(|root| path_to_slash_string(root))
            .collect();
        let catalog = library.catalog();
        return Ok(Json(FolderResponse {
            path: HOME.to_string(),
            folders: catalog.folders().count_folders(&roots),
            tracks: Vec::new(),
        }));
    }

    let prefix = dir_prefix(folder);
    if !is_under_root(&library, &prefix) {
        return Err(json_error(StatusCode::NOT_FOUND, "folder not in library"));
    }
    let dirs = if request.tracks_only {
        Vec::new()
    } else {
        let dir = Path::new(&prefix).to_path_buf();
        tokio::task::spawn_blocking(move || child_dirs(&dir, &exclude_dirs))
            .await
            .unwrap_or_default()
    };

    let catalog = library.catalog();
    let files: Vec<String> = catalog
        .folders()
        .files_in(&prefix)
        .into_iter()
        .map(str::to_string)
        .collect();
    Ok(Json(FolderResponse {
        path: prefix,
        folders: catalog.folders().count_folders(&dirs),
        tracks: owned(catalog.tracks().get_by_filepaths(&files)),
    }))
}

/// Tracks under a folder and all its subfolders, skipping files gone from
/// disk.
pub async fn tracks_in_path(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> JsonResult<TracksResponse> {
    let library = library_or_json_error(&state)?;
    let prefix = dir_prefix(query.path.trim());
    if !is_under_root(&library, &prefix) {
        return Err(json_error(StatusCode::NOT_FOUND, "folder not in library"));
    }
    let tracks = owned(library.catalog().tracks().get_in_path(&prefix, false));
    let tracks = tokio::task::spawn_blocking(move || {
        tracks
            .into_iter()
            .filter(|track| Path::new(&track.filepath).exists())
            .take(MAX_PATH_TRACKS)
            .collect::<Vec<_>>()
    })
    .await
    .unwrap_or_default();
    Ok(Json(TracksResponse { tracks }))
}

pub async fn get_album(
    State(state): State<AppState>,
    AxumPath(albumhash): AxumPath<String>,
    Query(query): Query<UserQuery>,
) -> JsonResult<AlbumResponse> {
    let library = library_or_json_error(&state)?;
    let catalog = library.catalog();
    let Some(album) = catalog.albums().get(&albumhash) else {
        return Err(json_error(StatusCode::NOT_FOUND, "album not found"));
    };
    let userid = query.userid.unwrap_or(0);
    Ok(Json(AlbumResponse {
        info: album.clone(),
        tracks: owned(catalog.tracks().get_by_album_hash(&albumhash, false)),
        other_versions: catalog
            .albums()
            .get_other_versions(&albumhash)
            .into_iter()
            .cloned()
            .collect(),
        is_favorite: catalog.is_favorite(FavoriteKind::Album, &albumhash, userid),
    }))
}

pub async fn get_artist(
    State(state): State<AppState>,
    AxumPath(artisthash): AxumPath<String>,
    Query(query): Query<UserQuery>,
) -> JsonResult<ArtistResponse> {
    let library = library_or_json_error(&state)?;
    let catalog = library.catalog();
    let Some(artist) = catalog.artists().get(&artisthash) else {
        return Err(json_error(StatusCode::NOT_FOUND, "artist not found"));
    };
    let userid = query.userid.unwrap_or(0);
    Ok(Json(ArtistResponse {
        artist: artist.clone(),
        albums: catalog
            .albums()
            .get_by_artist(&artisthash)
            .into_iter()
            .cloned()
            .collect(),
        tracks: owned(catalog.tracks().get_by_artist_hash(&artisthash, false)),
        is_favorite: catalog.is_favorite(FavoriteKind::Artist, &artisthash, userid),
    }))
}

pub async fn get_tracks(
    State(state): State<AppState>,
    Json(request): Json<TracksRequest>,
) -> JsonResult<Vec<PhysicalTrack>> {
    let library = library_or_json_error(&state)?;
    let catalog = library.catalog();
    Ok(Json(owned(
        catalog.tracks().get_by_hashes(&request.trackhashes, true),
    )))
}

fn page(query: &PageQuery) -> (usize, usize) {
    (
        query.start.unwrap_or(0),
        query.limit.unwrap_or(DEFAULT_PAGE).max(1),
    )
}

pub async fn recent_tracks(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> JsonResult<ListResponse<PhysicalTrack>> {
    let library = library_or_json_error(&state)?;
    let (start, limit) = page(&query);
    let catalog = library.catalog();
    let items = owned(catalog.tracks().get_recent_by_mtime(start, limit));
    Ok(Json(ListResponse {
        items,
        total: catalog.tracks().len(),
    }))
}

pub async fn played_tracks(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> JsonResult<ListResponse<PhysicalTrack>> {
    let library = library_or_json_error(&state)?;
    let (start, limit) = page(&query);
    let catalog = library.catalog();
    let items = owned(catalog.tracks().get_recent_by_lastplayed(start, limit));
    let total = catalog
        .tracks()
        .canonical_tracks()
        .iter()
        .filter(|track| track.stats().lastplayed() > 0)
        .count();
    Ok(Json(ListResponse { items, total }))
}

pub async fn log_track(
    State(state): State<AppState>,
    Json(request): Json<LogTrackRequest>,
) -> JsonResult<LogTrackResponse> {
    let library = library_or_json_error(&state)?;
    let timestamp = request.timestamp.unwrap_or_else(now_secs);
    let trackhash = request.trackhash.clone();
    let result = tokio::task::spawn_blocking(move || {
        library.record_play(&request.trackhash, request.duration, timestamp)
    })
    .await;
    match result {
        Ok(Ok(true)) => Ok(Json(LogTrackResponse { logged: true })),
        Ok(Ok(false)) => Err(json_error(StatusCode::NOT_FOUND, "track not found")),
        Ok(Err(err)) => {
            warn!("Failed to log play of {}: {}", trackhash, err);
            Err(json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("library error: {}", err),
            ))
        }
        Err(err) => Err(json_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())),
    }
}

pub async fn toggle_favorite(
    State(state): State<AppState>,
    Json(request): Json<FavoriteRequest>,
) -> JsonResult<FavoriteResponse> {
    let library = library_or_json_error(&state)?;
    let known = {
        let catalog = library.catalog();
        match request.kind {
            FavoriteKind::Track => catalog.tracks().group(&request.hash).is_some(),
            FavoriteKind::Album => catalog.albums().get(&request.hash).is_some(),
            FavoriteKind::Artist => catalog.artists().get(&request.hash).is_some(),
        }
    };
    if !known {
        return Err(json_error(
            StatusCode::NOT_FOUND,
            format!("{} not found", request.kind.as_str()),
        ));
    }
    let result = tokio::task::spawn_blocking(move || {
        library.toggle_favorite(request.kind, &request.hash, request.userid)
    })
    .await;
    match result {
        Ok(Ok(favorite)) => Ok(Json(FavoriteResponse { favorite })),
        Ok(Err(err)) => Err(json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("library error: {}", err),
        )),
        Err(err) => Err(json_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())),
    }
}
