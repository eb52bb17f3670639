use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use library::Catalog;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::range::ByteRange;

pub const TRANSCODED_BITRATE_HEADER: HeaderName = HeaderName::from_static("x-transcoded-bitrate");

/// Re-reads of an under-filled window before settling for a short chunk.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            step: Duration::from_millis(250),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedFile {
    pub path: PathBuf,
    pub bitrate: u32,
    pub duration: u32,
}

/// Picks the file to serve: the hinted path when it is indexed and still
/// on disk, otherwise the highest-bitrate member of the group whose file
/// exists.
pub fn resolve_file(catalog: &Catalog, trackhash: &str, hint: Option<&str>) -> Option<ResolvedFile> {
    let tracks = catalog.tracks();
    if let Some(hint) = hint.map(str::trim).filter(|hint| !hint.is_empty()) {
        let hinted = tracks.get_by_filepaths(&[hint.to_string()]);
        if let Some(track) = hinted.first() {
            if Path::new(&track.filepath).is_file() {
                return Some(ResolvedFile {
                    path: PathBuf::from(&track.filepath),
                    bitrate: track.bitrate,
                    duration: track.duration,
                });
            }
        }
    }

    let group = tracks.group(trackhash)?;
    let mut members: Vec<_> = group.tracks().iter().collect();
    members.sort_by(|a, b| {
        b.bitrate
            .cmp(&a.bitrate)
            .then_with(|| a.filepath.cmp(&b.filepath))
    });
    members
        .into_iter()
        .find(|track| Path::new(&track.filepath).is_file())
        .map(|track| ResolvedFile {
            path: PathBuf::from(&track.filepath),
            bitrate: track.bitrate,
            duration: track.duration,
        })
}

/// Reads `range` from `path`. A short read is retried with a linearly
/// growing pause; after the last attempt whatever was read is returned.
pub async fn read_window(path: &Path, range: ByteRange, retry: RetryPolicy) -> std::io::Result<Vec<u8>> {
    let wanted = usize::try_from(range.len()).unwrap_or(usize::MAX);
    let mut data = Vec::with_capacity(wanted);
    let mut attempt = 0;
    loop {
        let mut file = tokio::fs::File::open(path).await?;
        file.seek(SeekFrom::Start(range.start + data.len() as u64)).await?;
        let mut reader = file.take((wanted - data.len()) as u64);
        reader.read_to_end(&mut data).await?;
        if data.len() >= wanted || attempt >= retry.attempts {
            break;
        }
        attempt += 1;
        debug!(
            "Short read on {:?} ({} of {} bytes), retry {}",
            path,
            data.len(),
            wanted,
            attempt
        );
        tokio::time::sleep(retry.step * attempt).await;
    }
    Ok(data)
}

/// A 206 carrying `data` from `start`. An empty body reports an empty
/// window.
pub fn partial_response(data: Vec<u8>, start: u64, total: u64, mime: &str) -> Response {
    let content_range = if data.is_empty() {
        format!("bytes */{}", total)
    } else {
        ByteRange {
            start,
            end: start + data.len() as u64 - 1,
        }
        .content_range(total)
    };
    let length = data.len();
    let mut response = Response::new(Body::from(data));
    *response.status_mut() = StatusCode::PARTIAL_CONTENT;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime).unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static("Content-Range, X-Transcoded-Bitrate"),
    );
    if let Ok(value) = HeaderValue::from_str(&content_range) {
        headers.insert(header::CONTENT_RANGE, value);
    }
    response
}

pub fn unsatisfiable_response(size: u64) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
    if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", size)) {
        response.headers_mut().insert(header::CONTENT_RANGE, value);
    }
    response
}

pub fn guess_mime(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .to_string()
}

/// Whole-file response streamed from disk.
pub async fn full_file_response(path: &Path) -> std::io::Result<Response> {
    let file = tokio::fs::File::open(path).await?;
    let size = file.metadata().await?.len();
    let mime = guess_mime(path);
    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&mime).unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().replace('"', ""))
        .unwrap_or_default();
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", name)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            step: Duration::from_millis(5),
        }
    }

    fn record(path: &Path, bitrate: u32) -> library::TrackRecord {
        library::TrackRecord {
            filepath: common::path_to_slash_string(path),
            folder: common::dir_prefix(&common::path_to_slash_string(path.parent().unwrap())),
            title: "Song".to_string(),
            album: "Album".to_string(),
            artists: "Band".to_string(),
            albumartists: "Band".to_string(),
            albumhash: common::albumhash("Album", &["Band"]),
            trackhash: common::trackhash("Song", "Album", &["Band"]),
            bitrate,
            duration: 180,
            disc: 1,
            track: 1,
            genres: None,
            date: 0,
            last_mod: 0,
            copyright: None,
            lastplayed: 0,
            playcount: 0,
            playduration: 0,
            extra: Default::default(),
        }
    }

    #[test]
    fn resolves_hint_then_best_existing_member() {
        let dir = tempfile::tempdir().unwrap();
        let flac = dir.path().join("song.flac");
        let mp3 = dir.path().join("song.mp3");
        let gone = dir.path().join("song.wav");
        fs::write(&flac, b"flac").unwrap();
        fs::write(&mp3, b"mp3").unwrap();

        let library = library::Library::open(
            &dir.path().join("index.redb"),
            library::LibraryOptions::default(),
        )
        .unwrap();
        library.add_record(record(&flac, 900)).unwrap();
        library.add_record(record(&mp3, 320)).unwrap();
        library.add_record(record(&gone, 1411)).unwrap();

        let catalog = library.catalog();
        let flac_path = common::path_to_slash_string(&flac);
        let mp3_path = common::path_to_slash_string(&mp3);
        let trackhash = catalog.tracks().trackhash_for(&flac_path).unwrap().to_string();
        assert_eq!(catalog.tracks().count_by_trackhash(&trackhash), 3);

        let best = resolve_file(&catalog, &trackhash, None).unwrap();
        assert_eq!(best.path, PathBuf::from(&flac_path));
        assert_eq!(best.bitrate, 900);

        let hinted = resolve_file(&catalog, &trackhash, Some(&mp3_path)).unwrap();
        assert_eq!(hinted.path, PathBuf::from(&mp3_path));

        let unindexed = dir.path().join("other.mp3");
        fs::write(&unindexed, b"x").unwrap();
        let fallback = resolve_file(
            &catalog,
            &trackhash,
            Some(&common::path_to_slash_string(&unindexed)),
        )
        .unwrap();
        assert_eq!(fallback.path, PathBuf::from(&flac_path));

        fs::remove_file(&flac).unwrap();
        fs::remove_file(&mp3).unwrap();
        assert!(resolve_file(&catalog, &trackhash, None).is_none());
        assert!(resolve_file(&catalog, "missing", None).is_none());
    }

    #[tokio::test]
    async fn reads_requested_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mp3");
        let bytes: Vec<u8> = (0..200u8).collect();
        fs::write(&path, &bytes).unwrap();

        let data = read_window(&path, ByteRange { start: 10, end: 19 }, fast_retry())
            .await
            .unwrap();
        assert_eq!(data, bytes[10..20].to_vec());
    }

    #[tokio::test]
    async fn short_file_returns_what_exists_after_retries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mp3");
        fs::write(&path, vec![7u8; 50]).unwrap();

        let data = read_window(&path, ByteRange { start: 40, end: 139 }, fast_retry())
            .await
            .unwrap();
        assert_eq!(data.len(), 10);
    }

    #[tokio::test]
    async fn growing_file_fills_the_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("growing.mp3");
        fs::write(&path, vec![1u8; 10]).unwrap();

        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let mut bytes = vec![1u8; 10];
            bytes.extend(vec![2u8; 90]);
            tokio::fs::write(&writer_path, bytes).await.unwrap();
        });
        let retry = RetryPolicy {
            attempts: 10,
            step: Duration::from_millis(25),
        };
        let data = read_window(&path, ByteRange { start: 0, end: 99 }, retry)
            .await
            .unwrap();
        writer.await.unwrap();
        assert_eq!(data.len(), 100);
        assert_eq!(data[99], 2);
    }

    #[test]
    fn partial_response_headers() {
        let response = partial_response(vec![0u8; 4], 8, 100, "audio/mpeg");
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_RANGE], "bytes 8-11/100");
        assert_eq!(headers[header::ACCEPT_RANGES], "bytes");
        assert_eq!(headers[header::CONTENT_LENGTH], "4");
        assert_eq!(headers[header::CONTENT_TYPE], "audio/mpeg");

        let response = unsatisfiable_response(100);
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */100");
    }

    #[test]
    fn mime_is_guessed_from_extension() {
        assert_eq!(guess_mime(Path::new("/m/a.mp3")), "audio/mpeg");
        assert_eq!(guess_mime(Path::new("/m/a.unknownext")), "application/octet-stream");
    }
}
