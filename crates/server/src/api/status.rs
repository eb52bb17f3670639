use axum::{extract::State, http::StatusCode, Json};

use crate::scan::start_rescan;
use crate::state::{AppState, JsonResult, LibraryStatus, LibraryStatusResponse};
use crate::utils::json_error;

use super::{library_or_json_error, library_status_message};

pub async fn library_status(State(state): State<AppState>) -> Json<LibraryStatusResponse> {
    let guard = state.library_state.read();
    let label = match &guard.status {
        LibraryStatus::Unconfigured => "unconfigured",
        LibraryStatus::Missing(_) => "missing",
        LibraryStatus::Scanning { .. } => "scanning",
        LibraryStatus::Ready(_) => "ready",
        LibraryStatus::Error(_) => "error",
    };
    let stats = match &guard.status {
        LibraryStatus::Ready(stats) => Some(stats.clone()),
        _ => guard.library.as_ref().map(|library| library.stats()),
    };
    Json(LibraryStatusResponse {
        status: label.to_string(),
        message: Some(library_status_message(&guard.status)),
        artists: stats.as_ref().map(|s| s.artists),
        albums: stats.as_ref().map(|s| s.albums),
        tracks: stats.as_ref().map(|s| s.tracks),
        files: stats.as_ref().map(|s| s.files),
    })
}

pub async fn rescan(State(state): State<AppState>) -> JsonResult<LibraryStatusResponse> {
    let library = library_or_json_error(&state)?;
    if matches!(
        state.library_state.read().status,
        LibraryStatus::Scanning { .. }
    ) {
        return Err(json_error(
            StatusCode::CONFLICT,
            "library indexing in progress",
        ));
    }
    start_rescan(state.clone(), library);
    Ok(Json(LibraryStatusResponse {
        status: "scanning".to_string(),
        message: Some("library rescan started".to_string()),
        artists: None,
        albums: None,
        tracks: None,
        files: None,
    }))
}
