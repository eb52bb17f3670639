use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use axum::http::StatusCode;
use axum::Json;
use common::{FavoriteKind, Folder};
use library::{Album, Artist, Library, LibraryStats, PhysicalTrack};
use notify::RecommendedWatcher;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::ServerConfig;
use crate::transcode::TranscodeRegistry;

#[derive(Clone)]
pub struct AppState {
    pub library_state: Arc<RwLock<LibraryState>>,
    pub config: Arc<RwLock<ServerConfig>>,
    pub watcher: Arc<RwLock<Option<RecommendedWatcher>>>,
    pub transcodes: TranscodeRegistry,
}

#[derive(Clone)]
pub struct LibraryState {
    pub library: Option<Library>,
    pub status: LibraryStatus,
}

#[derive(Clone, Debug)]
pub enum LibraryStatus {
    Unconfigured,
    Missing(PathBuf),
    Scanning { started: SystemTime },
    Ready(LibraryStats),
    Error(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub msg: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct LibraryStatusResponse {
    pub status: String,
    pub message: Option<String>,
    pub artists: Option<usize>,
    pub albums: Option<usize>,
    pub tracks: Option<usize>,
    pub files: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct FileQuery {
    pub filepath: Option<String>,
    pub quality: Option<String>,
    pub container: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FolderRequest {
    #[serde(default)]
    pub folder: String,
    #[serde(default)]
    pub tracks_only: bool,
}

#[derive(Serialize)]
pub struct FolderResponse {
    pub path: String,
    pub folders: Vec<Folder>,
    pub tracks: Vec<PhysicalTrack>,
}

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: String,
}

#[derive(Serialize)]
pub struct TracksResponse {
    pub tracks: Vec<PhysicalTrack>,
}

#[derive(Serialize)]
pub struct AlbumResponse {
    pub info: Album,
    pub tracks: Vec<PhysicalTrack>,
    pub other_versions: Vec<Album>,
    pub is_favorite: bool,
}

#[derive(Serialize)]
pub struct ArtistResponse {
    pub artist: Artist,
    pub albums: Vec<Album>,
    pub tracks: Vec<PhysicalTrack>,
    pub is_favorite: bool,
}

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub userid: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct TracksRequest {
    pub trackhashes: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub start: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct LogTrackRequest {
    pub trackhash: String,
    pub duration: u64,
    pub timestamp: Option<i64>,
}

#[derive(Serialize)]
pub struct LogTrackResponse {
    pub logged: bool,
}

#[derive(Debug, Deserialize)]
pub struct FavoriteRequest {
    #[serde(rename = "type")]
    pub kind: FavoriteKind,
    pub hash: String,
    #[serde(default)]
    pub userid: u32,
}

#[derive(Serialize)]
pub struct FavoriteResponse {
    pub favorite: bool,
}

#[derive(Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub total: usize,
}

pub type JsonResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;
