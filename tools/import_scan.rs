use std::env;
use std::path::{Path, PathBuf};

use library::{Library, LibraryOptions, RebuildOutcome};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = env::args().skip(1);
    let music_roots = args
        .next()
        .or_else(|| env::var("MUSIC_ROOT").ok())
        .ok_or("MUSIC_ROOT not set and no path argument")?;
    let index_path = args
        .next()
        .or_else(|| env::var("INDEX_PATH").ok())
        .unwrap_or_else(|| "data/library.redb".to_string());

    let roots: Vec<PathBuf> = env::split_paths(&music_roots).collect();
    if let Some(parent) = Path::new(&index_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let library = Library::open(
        Path::new(&index_path),
        LibraryOptions {
            roots,
            ..LibraryOptions::default()
        },
    )?;

    match library.rebuild()? {
        RebuildOutcome::Completed(stats) => println!(
            "Indexed: {} artists, {} albums, {} tracks ({} files)",
            stats.artists, stats.albums, stats.tracks, stats.files
        ),
        RebuildOutcome::Superseded => tracing::warn!("Rebuild superseded by a newer one"),
    }

    Ok(())
}
