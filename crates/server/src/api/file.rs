use axum::{
    extract::{Path as AxumPath, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
};
use tracing::warn;

use crate::range::{chunk_window, parse_range_start, ByteRange, RangeError, CHUNK_SIZE};
use crate::state::{AppState, FileQuery};
use crate::streaming::{
    full_file_response, guess_mime, partial_response, read_window, resolve_file,
    unsatisfiable_response, ResolvedFile, RetryPolicy, TRANSCODED_BITRATE_HEADER,
};
use crate::transcode::{
    parse_quality, target_bitrate, Container, JobState, Quality, TranscodeKey, TranscodeRequest,
};
use crate::utils::json_error_response;

use super::library_or_response;

const NOT_FOUND: &str = "File Not Found";

fn resolve(
    state: &AppState,
    trackhash: &str,
    hint: Option<&str>,
) -> Result<ResolvedFile, Response> {
    let library = library_or_response(state)?;
    let catalog = library.catalog();
    resolve_file(&catalog, trackhash, hint)
        .ok_or_else(|| json_error_response(StatusCode::NOT_FOUND, NOT_FOUND))
}

fn range_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::RANGE).and_then(|value| value.to_str().ok())
}

pub async fn send_track_file(
    State(state): State<AppState>,
    AxumPath(trackhash): AxumPath<String>,
    Query(query): Query<FileQuery>,
    headers: HeaderMap,
) -> Response {
    let file = match resolve(&state, &trackhash, query.filepath.as_deref()) {
        Ok(file) => file,
        Err(response) => return response,
    };
    let quality = match parse_quality(query.quality.as_deref()) {
        Ok(quality) => quality,
        Err(message) => return json_error_response(StatusCode::BAD_REQUEST, message),
    };
    match quality {
        Quality::Original => send_original(&file, range_header(&headers)).await,
        Quality::Kbps(requested) => {
            let container = match Container::parse(query.container.as_deref()) {
                Ok(container) => container,
                Err(message) => return json_error_response(StatusCode::BAD_REQUEST, message),
            };
            let range = range_header(&headers);
            send_transcoded(&state, &trackhash, &file, container, requested, range).await
        }
    }
}

async fn send_original(file: &ResolvedFile, range: Option<&str>) -> Response {
    let size = match tokio::fs::metadata(&file.path).await {
        Ok(meta) => meta.len(),
        Err(_) => return json_error_response(StatusCode::NOT_FOUND, NOT_FOUND),
    };
    let window = match chunk_window(range, size) {
        Ok(window) => window,
        Err(RangeError::Unsatisfiable) => return unsatisfiable_response(size),
        Err(RangeError::Invalid) => {
            return json_error_response(StatusCode::BAD_REQUEST, "invalid range")
        }
    };
    match read_window(&file.path, window, RetryPolicy::default()).await {
        Ok(data) => {
            let total = size.max(window.start + data.len() as u64);
            partial_response(data, window.start, total, &guess_mime(&file.path))
        }
        Err(err) => {
            warn!("Failed to read {}: {}", file.path.display(), err);
            json_error_response(StatusCode::NOT_FOUND, NOT_FOUND)
        }
    }
}

async fn send_transcoded(
    state: &AppState,
    trackhash: &str,
    file: &ResolvedFile,
    container: Container,
    requested: u32,
    range: Option<&str>,
) -> Response {
    let start = match parse_range_start(range) {
        Ok(start) => start,
        Err(_) => return json_error_response(StatusCode::BAD_REQUEST, "invalid range"),
    };
    let kbps = target_bitrate(container, requested, file.bitrate);
    let request = TranscodeRequest {
        key: TranscodeKey {
            trackhash: trackhash.to_string(),
            kbps,
            container,
        },
        source: file.path.clone(),
        duration_secs: file.duration,
        source_kbps: file.bitrate,
    };
    let job = match state.transcodes.get_or_start(request) {
        Ok(job) => job,
        Err(err) => {
            warn!("Transcode of {} failed to start: {}", file.path.display(), err);
            return json_error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string());
        }
    };

    let job_state = job.wait_until(start.saturating_add(CHUNK_SIZE)).await;
    let available = match job_state {
        JobState::Running { written } => written,
        JobState::Finished { size } => size,
        JobState::Failed => {
            return json_error_response(StatusCode::INTERNAL_SERVER_ERROR, "transcode failed")
        }
    };
    if start >= available {
        return unsatisfiable_response(available);
    }
    let window = ByteRange {
        start,
        end: available - 1,
    }
    .clamp_to(CHUNK_SIZE);
    let retry = RetryPolicy {
        attempts: 0,
        ..RetryPolicy::default()
    };
    let data = match read_window(&job.output, window, retry).await {
        Ok(data) => data,
        Err(err) => {
            warn!("Failed to read transcode {}: {}", job.output.display(), err);
            return json_error_response(StatusCode::INTERNAL_SERVER_ERROR, "transcode unavailable");
        }
    };

    let total = job.total_size(job_state).max(start + data.len() as u64);
    let mut response = partial_response(data, start, total, container.mime());
    response
        .headers_mut()
        .insert(TRANSCODED_BITRATE_HEADER, HeaderValue::from(kbps));
    response
}

pub async fn send_track_file_legacy(
    State(state): State<AppState>,
    AxumPath(trackhash): AxumPath<String>,
    Query(query): Query<FileQuery>,
) -> Response {
    let file = match resolve(&state, &trackhash, query.filepath.as_deref()) {
        Ok(file) => file,
        Err(response) => return response,
    };
    match full_file_response(&file.path).await {
        Ok(response) => response,
        Err(err) => {
            warn!("Failed to open {}: {}", file.path.display(), err);
            json_error_response(StatusCode::NOT_FOUND, NOT_FOUND)
        }
    }
}
