use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use library::{Library, LibraryOptions, RebuildOutcome};
use redb::Database;
use tracing::{info, warn};

use crate::state::{AppState, LibraryStatus};
use crate::watch::configure_watcher;

fn set_status(state: &AppState, status: LibraryStatus) {
    state.library_state.write().status = status;
}

/// Opens the index, publishes what it already holds, then syncs it with
/// the roots in the background.
pub fn start_index(state: AppState, db: Arc<Database>, options: LibraryOptions) {
    {
        let mut guard = state.library_state.write();
        guard.library = None;
        guard.status = LibraryStatus::Scanning {
            started: SystemTime::now(),
        };
    }
    *state.watcher.write() = None;

    tokio::spawn(async move {
        let result = tokio::task::spawn_blocking(move || Library::open_with_db(db, options)).await;
        let library = match result {
            Ok(Ok(library)) => library,
            Ok(Err(err)) => {
                let message = err.to_string();
                set_status(&state, LibraryStatus::Error(message.clone()));
                warn!("Failed to open library: {}", message);
                return;
            }
            Err(err) => {
                let message = err.to_string();
                set_status(&state, LibraryStatus::Error(message.clone()));
                warn!("Library open join error: {}", message);
                return;
            }
        };

        let stats = library.stats();
        info!(
            "Published stored index: {} artists, {} albums, {} tracks",
            stats.artists, stats.albums, stats.tracks
        );
        state.library_state.write().library = Some(library.clone());
        configure_watcher(&state, &library);
        run_rebuild(state, library).await;
    });
}

pub fn start_rescan(state: AppState, library: Library) {
    set_status(
        &state,
        LibraryStatus::Scanning {
            started: SystemTime::now(),
        },
    );
    tokio::spawn(async move {
        run_rebuild(state, library).await;
    });
}

async fn run_rebuild(state: AppState, library: Library) {
    if library.roots().is_empty() {
        set_status(&state, LibraryStatus::Unconfigured);
        return;
    }
    let missing: Vec<PathBuf> = library
        .roots()
        .iter()
        .filter(|root| !root.exists())
        .cloned()
        .collect();
    for root in &missing {
        warn!("Music root not found: {}", root.display());
    }
    if missing.len() == library.roots().len() {
        set_status(&state, LibraryStatus::Missing(missing[0].clone()));
        return;
    }

    let rebuild_library = library.clone();
    let result = tokio::task::spawn_blocking(move || rebuild_library.rebuild()).await;
    match result {
        Ok(Ok(RebuildOutcome::Completed(stats))) => {
            info!(
                "Library rescan complete: {} artists, {} albums, {} tracks",
                stats.artists, stats.albums, stats.tracks
            );
            set_status(&state, LibraryStatus::Ready(stats));
        }
        Ok(Ok(RebuildOutcome::Superseded)) => {
            info!("Library rescan superseded by a newer one");
        }
        Ok(Err(err)) => {
            let message = err.to_string();
            set_status(&state, LibraryStatus::Error(message.clone()));
            warn!("Library scan failed: {}", message);
        }
        Err(err) => {
            let message = err.to_string();
            set_status(&state, LibraryStatus::Error(message.clone()));
            warn!("Library scan join error: {}", message);
        }
    }
}

/// Rebuilds on a fixed interval while the periodic switch is on.
pub fn start_periodic_scans(state: AppState) {
    let config = state.config.read().clone();
    if !config.enable_periodic_scans {
        return;
    }
    let minutes = config.scan_interval_mins.max(1);
    info!("Periodic scans every {} minutes", minutes);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(minutes * 60));
        interval.tick().await;
        loop {
            interval.tick().await;
            let library = {
                let guard = state.library_state.read();
                if matches!(guard.status, LibraryStatus::Scanning { .. }) {
                    continue;
                }
                guard.library.clone()
            };
            if let Some(library) = library {
                start_rescan(state.clone(), library);
            }
        }
    });
}
