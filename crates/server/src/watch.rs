use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use library::scan::{collect_audio_files, is_excluded_dir, is_supported};
use library::Library;
use notify::event::{ModifyKind, RenameMode};
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::state::AppState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Change {
    Add,
    Remove,
}

/// A configured root and the path the OS reports events under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchRoot {
    pub configured: PathBuf,
    pub real: PathBuf,
}

impl WatchRoot {
    pub fn new(configured: PathBuf) -> Self {
        let real = std::fs::canonicalize(&configured).unwrap_or_else(|_| configured.clone());
        Self { configured, real }
    }
}

/// Maps an event path back under its configured root. Paths outside every
/// root yield `None`.
pub fn translate_path(path: &Path, roots: &[WatchRoot]) -> Option<PathBuf> {
    for root in roots {
        if path.starts_with(&root.configured) {
            return Some(path.to_path_buf());
        }
    }
    for root in roots {
        if let Ok(rest) = path.strip_prefix(&root.real) {
            return Some(root.configured.join(rest));
        }
    }
    None
}

fn is_ignored(path: &Path, roots: &[WatchRoot], exclude_dirs: &[String]) -> bool {
    let Some(root) = roots.iter().find(|root| path.starts_with(&root.configured)) else {
        return true;
    };
    path.ancestors()
        .skip(1)
        .take_while(|dir| *dir != root.configured.as_path())
        .any(|dir| is_excluded_dir(dir, exclude_dirs))
}

/// Turns one notify event into per-path changes. Renames become a removal
/// of the source and an addition of the destination; an end outside every
/// root is dropped.
pub fn classify_event(event: &Event, roots: &[WatchRoot], exclude_dirs: &[String]) -> Vec<(PathBuf, Change)> {
    let mut raw = Vec::new();
    match &event.kind {
        EventKind::Create(_) => {
            raw.extend(event.paths.iter().map(|p| (p.clone(), Change::Add)));
        }
        EventKind::Remove(_) => {
            raw.extend(event.paths.iter().map(|p| (p.clone(), Change::Remove)));
        }
        EventKind::Modify(ModifyKind::Name(mode)) => match (mode, event.paths.as_slice()) {
            (RenameMode::Both, [from, to]) => {
                raw.push((from.clone(), Change::Remove));
                raw.push((to.clone(), Change::Add));
            }
            (RenameMode::From, paths) => {
                raw.extend(paths.iter().map(|p| (p.clone(), Change::Remove)));
            }
            (RenameMode::To, paths) => {
                raw.extend(paths.iter().map(|p| (p.clone(), Change::Add)));
            }
            (_, paths) => {
                for path in paths {
                    let change = if path.exists() { Change::Add } else { Change::Remove };
                    raw.push((path.clone(), change));
                }
            }
        },
        EventKind::Modify(ModifyKind::Metadata(_)) => {}
        EventKind::Modify(_) => {
            raw.extend(event.paths.iter().map(|p| (p.clone(), Change::Add)));
        }
        _ => {}
    }

    raw.into_iter()
        .filter_map(|(path, change)| translate_path(&path, roots).map(|path| (path, change)))
        .filter(|(path, _)| !is_ignored(path, roots, exclude_dirs))
        .collect()
}

pub fn configure_watcher(state: &AppState, library: &Library) {
    let config = state.config.read().clone();
    if !config.watch_music {
        info!("Watcher disabled (watch_music=false)");
        *state.watcher.write() = None;
        return;
    }
    if library.roots().is_empty() {
        *state.watcher.write() = None;
        return;
    }

    let watch_debounce_secs = if config.watch_debounce_secs == 0 {
        2
    } else {
        config.watch_debounce_secs
    };
    let watch_debounce = Duration::from_secs(watch_debounce_secs);

    match setup_watcher(library.clone(), watch_debounce) {
        Ok(watcher) => {
            info!(
                "Watching {} roots for changes (debounce {}s)",
                library.roots().len(),
                watch_debounce.as_secs()
            );
            *state.watcher.write() = Some(watcher);
        }
        Err(err) => {
            warn!("Failed to start watcher: {}", err);
            *state.watcher.write() = None;
        }
    }
}

fn setup_watcher(
    library: Library,
    debounce: Duration,
) -> Result<RecommendedWatcher, Box<dyn std::error::Error>> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Event>();
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        },
        NotifyConfig::default(),
    )?;

    let mut roots = Vec::new();
    for root in library.roots() {
        match watcher.watch(root, RecursiveMode::Recursive) {
            Ok(()) => roots.push(WatchRoot::new(root.clone())),
            Err(err) => warn!("Cannot watch {}: {}", root.display(), err),
        }
    }
    if roots.is_empty() {
        return Err("no watchable roots".into());
    }

    tokio::spawn(async move {
        watch_loop(library, roots, rx, debounce).await;
    });

    Ok(watcher)
}

/// Changes waiting out their debounce window; the latest change for a
/// path wins.
#[derive(Debug, Default)]
struct Pending {
    changes: HashMap<PathBuf, (Change, Instant)>,
}

impl Pending {
    fn push(&mut self, path: PathBuf, change: Change, due: Instant) {
        self.changes.insert(path, (change, due));
    }

    fn next_due(&self) -> Option<Instant> {
        self.changes.values().map(|(_, due)| *due).min()
    }

    fn take_due(&mut self, now: Instant) -> Vec<(PathBuf, Change)> {
        let due: Vec<PathBuf> = self
            .changes
            .iter()
            .filter(|(_, (_, at))| *at <= now)
            .map(|(path, _)| path.clone())
            .collect();
        let mut ready: Vec<(PathBuf, Change)> = due
            .into_iter()
            .filter_map(|path| self.changes.remove(&path).map(|(change, _)| (path, change)))
            .collect();
        ready.sort_by(|a, b| a.0.cmp(&b.0));
        ready
    }
}

async fn watch_loop(
    library: Library,
    roots: Vec<WatchRoot>,
    mut rx: UnboundedReceiver<Event>,
    debounce: Duration,
) {
    let exclude_dirs = library.options().exclude_dirs.clone();
    let mut pending = Pending::default();
    loop {
        let next_due = pending.next_due();
        tokio::select! {
            _ = async {
                match next_due {
                    Some(due) => tokio::time::sleep_until(due).await,
                    None => std::future::pending::<()>().await,
                }
            } => {
                let ready = pending.take_due(Instant::now());
                if ready.is_empty() {
                    continue;
                }
                let library = library.clone();
                let exclude_dirs = exclude_dirs.clone();
                match tokio::task::spawn_blocking(move || apply_changes(&library, &ready, &exclude_dirs)).await {
                    Ok((added, removed)) => {
                        if added + removed > 0 {
                            info!("Watcher: {} files indexed, {} removed", added, removed);
                        }
                    }
                    Err(err) => warn!("Watcher join error: {}", err),
                }
            }
            maybe_event = rx.recv() => {
                let Some(event) = maybe_event else {
                    return;
                };
                let due = Instant::now() + debounce;
                for (path, change) in classify_event(&event, &roots, &exclude_dirs) {
                    pending.push(path, change, due);
                }
            }
        }
    }
}

/// Applies settled changes. The filesystem is checked again, so a file
/// created and deleted within one window is a removal.
fn apply_changes(library: &Library, changes: &[(PathBuf, Change)], exclude_dirs: &[String]) -> (usize, usize) {
    let mut added = 0;
    let mut removed = 0;
    for (path, change) in changes {
        let exists = path.exists();
        if *change == Change::Remove || !exists {
            match library.remove_track(path) {
                Ok(count) => removed += count,
                Err(err) => warn!("Failed to remove {}: {}", path.display(), err),
            }
            if !exists {
                continue;
            }
        }

        let files = if path.is_dir() {
            collect_audio_files(&[path.clone()], exclude_dirs)
        } else if is_supported(path) {
            vec![path.clone()]
        } else {
            Vec::new()
        };
        for file in files {
            match library.add_track(&file) {
                Ok(()) => added += 1,
                Err(err) => debug!("Skipping {}: {}", file.display(), err),
            }
        }
    }
    (added, removed)
}
