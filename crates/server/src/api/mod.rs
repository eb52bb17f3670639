pub mod catalog;
pub mod file;
pub mod status;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use library::Library;

use crate::state::{AppState, ErrorResponse, HealthResponse, LibraryStatus};
use crate::utils::{json_error, json_error_response};

pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/file/:trackhash", get(file::send_track_file))
        .route("/file/:trackhash/legacy", get(file::send_track_file_legacy))
        .route("/folder", post(catalog::get_folder))
        .route("/folder/tracks/all", get(catalog::tracks_in_path))
        .route("/album/:albumhash", get(catalog::get_album))
        .route("/artist/:artisthash", get(catalog::get_artist))
        .route("/tracks", post(catalog::get_tracks))
        .route("/tracks/recent", get(catalog::recent_tracks))
        .route("/tracks/played", get(catalog::played_tracks))
        .route("/logger/track/log", post(catalog::log_track))
        .route("/favorites/toggle", post(catalog::toggle_favorite))
        .route("/library/status", get(status::library_status))
        .route("/library/rescan", post(status::rescan))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

pub(crate) fn library_or_json_error(
    state: &AppState,
) -> Result<Library, (StatusCode, Json<ErrorResponse>)> {
    let guard = state.library_state.read();
    if let Some(library) = guard.library.clone() {
        Ok(library)
    } else {
        Err(json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            library_status_message(&guard.status),
        ))
    }
}

pub(crate) fn library_or_response(state: &AppState) -> Result<Library, Response> {
    let guard = state.library_state.read();
    if let Some(library) = guard.library.clone() {
        Ok(library)
    } else {
        Err(json_error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            library_status_message(&guard.status),
        ))
    }
}

pub(crate) fn library_status_message(status: &LibraryStatus) -> String {
    match status {
        LibraryStatus::Unconfigured => "music roots must be set".to_string(),
        LibraryStatus::Missing(path) => {
            format!("music directory not found: {}", path.display())
        }
        LibraryStatus::Scanning { .. } => "library indexing in progress".to_string(),
        LibraryStatus::Ready(_) => "library ready".to_string(),
        LibraryStatus::Error(message) => format!("library error: {}", message),
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;

    use axum::extract::{Path as AxumPath, Query, State};
    use axum::http::{header, HeaderMap, HeaderValue};
    use axum::response::Response;
    use common::{dir_prefix, path_to_slash_string, FavoriteKind};
    use library::{LibraryOptions, LibraryStats, TrackRecord};
    use parking_lot::RwLock;

    use super::*;
    use crate::config::ServerConfig;
    use crate::range::CHUNK_SIZE;
    use crate::state::{
        FavoriteRequest, FileQuery, FolderRequest, LibraryState, LogTrackRequest, PageQuery,
        PathQuery, TracksRequest, UserQuery,
    };
    use crate::transcode::TranscodeRegistry;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        state: AppState,
        library: Library,
    }

    fn record(path: &Path, title: &str, album: &str, bitrate: u32) -> TrackRecord {
        let filepath = path_to_slash_string(path);
        TrackRecord {
            folder: dir_prefix(&path_to_slash_string(path.parent().unwrap())),
            filepath,
            title: title.to_string(),
            album: album.to_string(),
            artists: "Band".to_string(),
            albumartists: "Band".to_string(),
            albumhash: common::albumhash(album, &["Band"]),
            trackhash: common::trackhash(title, album, &["Band"]),
            bitrate,
            duration: 60,
            disc: 1,
            track: 1,
            genres: None,
            date: 0,
            last_mod: 1,
            copyright: None,
            lastplayed: 0,
            playcount: 0,
            playduration: 0,
            extra: Default::default(),
        }
    }

    fn fixture(ffmpeg: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("music");
        std::fs::create_dir_all(root.join("album/disc2")).unwrap();
        let library = Library::open(
            &dir.path().join("library.redb"),
            LibraryOptions {
                roots: vec![root.clone()],
                ..Default::default()
            },
        )
        .unwrap();
        let state = AppState {
            library_state: Arc::new(RwLock::new(LibraryState {
                library: Some(library.clone()),
                status: LibraryStatus::Ready(LibraryStats::default()),
            })),
            config: Arc::new(RwLock::new(ServerConfig::default())),
            watcher: Arc::new(RwLock::new(None)),
            transcodes: TranscodeRegistry::new(
                dir.path().join("transcodes"),
                ffmpeg.to_string(),
                Duration::from_secs(5),
            ),
        };
        Fixture {
            _dir: dir,
            root,
            state,
            library,
        }
    }

    fn add_file(fx: &Fixture, rel: &str, size: usize, title: &str, bitrate: u32) -> String {
        let path = fx.root.join(rel);
        let bytes: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, bytes).unwrap();
        fx.library.add_record(record(&path, title, "Album", bitrate)).unwrap();
        let filepath = path_to_slash_string(&path);
        fx.library
            .catalog()
            .tracks()
            .trackhash_for(&filepath)
            .unwrap()
            .to_string()
    }

    fn file_query(quality: Option<&str>, container: Option<&str>) -> FileQuery {
        FileQuery {
            filepath: None,
            quality: quality.map(str::to_string),
            container: container.map(str::to_string),
        }
    }

    fn range(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, HeaderValue::from_str(value).unwrap());
        headers
    }

    async fn body(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn range_request_returns_one_chunk() {
        let fx = fixture("ffmpeg");
        let size = 2 * CHUNK_SIZE as usize + 10;
        let trackhash = add_file(&fx, "album/01.mp3", size, "One", 320);

        let start = CHUNK_SIZE + 5;
        let response = file::send_track_file(
            State(fx.state.clone()),
            AxumPath(trackhash.clone()),
            Query(file_query(None, None)),
            range(&format!("bytes={}-", start)),
        )
        .await;
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        let expected_end = (start + CHUNK_SIZE - 1).min(size as u64 - 1);
        assert_eq!(
            response.headers()[header::CONTENT_RANGE],
            format!("bytes {}-{}/{}", start, expected_end, size).as_str()
        );
        assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
        let data = body(response).await;
        assert_eq!(data.len() as u64, expected_end - start + 1);
        assert_eq!(data[0], (start % 251) as u8);

        let tail = file::send_track_file(
            State(fx.state.clone()),
            AxumPath(trackhash.clone()),
            Query(file_query(Some("original"), None)),
            range(&format!("bytes={}-", 2 * CHUNK_SIZE)),
        )
        .await;
        assert_eq!(
            tail.headers()[header::CONTENT_RANGE],
            format!("bytes {}-{}/{}", 2 * CHUNK_SIZE, size - 1, size).as_str()
        );

        let past_end = file::send_track_file(
            State(fx.state.clone()),
            AxumPath(trackhash),
            Query(file_query(None, None)),
            range(&format!("bytes={}-", size)),
        )
        .await;
        assert_eq!(past_end.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    }

    #[tokio::test]
    async fn unknown_track_is_not_found() {
        let fx = fixture("ffmpeg");
        let response = file::send_track_file(
            State(fx.state.clone()),
            AxumPath("nope".to_string()),
            Query(file_query(None, None)),
            HeaderMap::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json: serde_json::Value = serde_json::from_slice(&body(response).await).unwrap();
        assert_eq!(json["msg"], "File Not Found");
    }

    #[tokio::test]
    async fn legacy_sends_the_whole_file() {
        let fx = fixture("ffmpeg");
        let trackhash = add_file(&fx, "album/01.flac", 1000, "One", 900);
        let response = file::send_track_file_legacy(
            State(fx.state.clone()),
            AxumPath(trackhash),
            Query(file_query(None, None)),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "1000");
        assert_eq!(body(response).await.len(), 1000);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn transcode_never_exceeds_source_bitrate() {
        let fx = fixture("echo");
        let trackhash = add_file(&fx, "album/01.mp3", 100, "One", 128);
        let response = file::send_track_file(
            State(fx.state.clone()),
            AxumPath(trackhash.clone()),
            Query(file_query(Some("1411"), Some("mp3"))),
            HeaderMap::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()["x-transcoded-bitrate"], "128");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/mpeg");
        let data = String::from_utf8(body(response).await).unwrap();
        assert!(data.contains("-b:a 128k"));

        let invalid = file::send_track_file(
            State(fx.state.clone()),
            AxumPath(trackhash),
            Query(file_query(Some("128"), Some("wav"))),
            HeaderMap::new(),
        )
        .await;
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn folder_tracks_include_subfolders_and_skip_missing_files() {
        let fx = fixture("ffmpeg");
        add_file(&fx, "album/01.mp3", 10, "One", 320);
        add_file(&fx, "album/disc2/01.mp3", 10, "Two", 320);
        add_file(&fx, "album/disc2/02.mp3", 10, "Three", 320);
        std::fs::remove_file(fx.root.join("album/disc2/02.mp3")).unwrap();

        let root = path_to_slash_string(&fx.root);
        let Json(all) = catalog::tracks_in_path(
            State(fx.state.clone()),
            Query(PathQuery {
                path: format!("{}/album", root),
            }),
        )
        .await
        .unwrap();
        let titles: Vec<&str> = all.tracks.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["One", "Two"]);

        let outside = catalog::tracks_in_path(
            State(fx.state.clone()),
            Query(PathQuery {
                path: "/etc".to_string(),
            }),
        )
        .await;
        assert!(outside.is_err());
    }

    #[tokio::test]
    async fn folder_listing_counts_tracks_under_subdirectories() {
        let fx = fixture("ffmpeg");
        add_file(&fx, "album/01.mp3", 10, "One", 320);
        add_file(&fx, "album/disc2/01.mp3", 10, "Two", 320);
        add_file(&fx, "album/disc2/02.mp3", 10, "Three", 320);

        let root = path_to_slash_string(&fx.root);
        let Json(home) = catalog::get_folder(
            State(fx.state.clone()),
            Json(FolderRequest {
                folder: String::new(),
                tracks_only: false,
            }),
        )
        .await
        .unwrap();
        assert_eq!(home.folders.len(), 1);
        assert_eq!(home.folders[0].trackcount, 3);

        let Json(album) = catalog::get_folder(
            State(fx.state.clone()),
            Json(FolderRequest {
                folder: format!("{}/album", root),
                tracks_only: false,
            }),
        )
        .await
        .unwrap();
        assert_eq!(album.tracks.len(), 1);
        assert_eq!(album.folders.len(), 1);
        assert_eq!(album.folders[0].path, format!("{}/album/disc2/", root));
        assert_eq!(album.folders[0].trackcount, 2);

        let outside = catalog::get_folder(
            State(fx.state.clone()),
            Json(FolderRequest {
                folder: "/etc".to_string(),
                tracks_only: false,
            }),
        )
        .await;
        assert!(outside.is_err());
    }

    #[tokio::test]
    async fn plays_and_favorites_show_up_in_reads() {
        let fx = fixture("ffmpeg");
        let one = add_file(&fx, "album/01.mp3", 10, "One", 320);
        let two = add_file(&fx, "album/02.mp3", 10, "Two", 320);

        let Json(logged) = catalog::log_track(
            State(fx.state.clone()),
            Json(LogTrackRequest {
                trackhash: two.clone(),
                duration: 30,
                timestamp: Some(500),
            }),
        )
        .await
        .unwrap();
        assert!(logged.logged);
        let missing = catalog::log_track(
            State(fx.state.clone()),
            Json(LogTrackRequest {
                trackhash: "nope".to_string(),
                duration: 30,
                timestamp: None,
            }),
        )
        .await;
        assert!(missing.is_err());

        let Json(played) = catalog::played_tracks(
            State(fx.state.clone()),
            Query(PageQuery {
                start: None,
                limit: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(played.total, 1);
        assert_eq!(played.items[0].trackhash, two);

        let Json(ordered) = catalog::get_tracks(
            State(fx.state.clone()),
            Json(TracksRequest {
                trackhashes: vec![two.clone(), "nope".to_string(), one.clone()],
            }),
        )
        .await
        .unwrap();
        let hashes: Vec<&str> = ordered.iter().map(|t| t.trackhash.as_str()).collect();
        assert_eq!(hashes, vec![two.as_str(), one.as_str()]);

        let albumhash = ordered[0].albumhash.clone();
        let Json(toggled) = catalog::toggle_favorite(
            State(fx.state.clone()),
            Json(FavoriteRequest {
                kind: FavoriteKind::Album,
                hash: albumhash.clone(),
                userid: 7,
            }),
        )
        .await
        .unwrap();
        assert!(toggled.favorite);

        let Json(album) = catalog::get_album(
            State(fx.state.clone()),
            AxumPath(albumhash),
            Query(UserQuery { userid: Some(7) }),
        )
        .await
        .unwrap();
        assert!(album.is_favorite);
        assert_eq!(album.info.trackcount, 2);
        assert_eq!(album.tracks.len(), 2);
    }

    #[tokio::test]
    async fn requests_before_the_library_opens_are_unavailable() {
        let fx = fixture("ffmpeg");
        {
            let mut guard = fx.state.library_state.write();
            guard.library = None;
            guard.status = LibraryStatus::Scanning {
                started: std::time::SystemTime::now(),
            };
        }
        let response = file::send_track_file(
            State(fx.state.clone()),
            AxumPath("x".to_string()),
            Query(file_query(None, None)),
            HeaderMap::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let Json(status) = status::library_status(State(fx.state.clone())).await;
        assert_eq!(status.status, "scanning");
        assert!(status.tracks.is_none());
    }
}
