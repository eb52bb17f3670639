mod api;
mod config;
mod range;
mod scan;
mod state;
mod streaming;
mod transcode;
mod utils;
mod watch;

use std::sync::Arc;
use std::time::Duration;

use api::api_router;
use axum::Router;
use config::{config_path_from_env, load_or_create_config, resolve_path, resolve_roots};
use library::{Library, LibraryOptions};
use parking_lot::RwLock;
use scan::{start_index, start_periodic_scans};
use state::{AppState, LibraryState, LibraryStatus};
use tower_http::request_id::{MakeRequestUuid, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use transcode::TranscodeRegistry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = config_path_from_env();
    let (config, created) = load_or_create_config(&config_path)?;
    let config_store = Arc::new(RwLock::new(config.clone()));

    if created {
        info!("Created default config at {:?}", config_path);
    } else {
        info!("Loaded config from {:?}", config_path);
    }

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let index_path = resolve_path(&config_path, config.index_path.trim());
    if let Some(parent) = index_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let db = Library::open_db(&index_path)?;
    info!("Opened index at {:?}", index_path);

    let transcode_dir = resolve_path(&config_path, config.transcode_dir.trim());
    if transcode_dir.exists() {
        if let Err(err) = std::fs::remove_dir_all(&transcode_dir) {
            warn!("Failed to clear {:?}: {}", transcode_dir, err);
        }
    }
    let transcodes = TranscodeRegistry::new(
        transcode_dir,
        config.ffmpeg_path.clone(),
        Duration::from_secs(config.transcode_timeout_secs.max(1)),
    );

    let state = AppState {
        library_state: Arc::new(RwLock::new(LibraryState {
            library: None,
            status: LibraryStatus::Unconfigured,
        })),
        config: config_store,
        watcher: Arc::new(RwLock::new(None)),
        transcodes,
    };

    let roots = resolve_roots(&config_path, &config.roots);
    if roots.is_empty() {
        info!("No music roots configured yet; add them to {:?}.", config_path);
    }
    let options = LibraryOptions {
        roots,
        exclude_dirs: config.exclude_dirs.clone(),
        tags: config.tags.clone(),
    };
    start_index(state.clone(), db, options);
    start_periodic_scans(state.clone());

    let app = Router::new()
        .merge(api_router(state.clone()))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on {}", bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    state.transcodes.clear_finished();
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                warn!("Failed to install terminate signal handler: {}", err);
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", err);
        }
    }

    info!("Shutdown signal received.");
}
