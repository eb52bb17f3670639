//! Sorted path index for directory-scoped track counts.

use std::collections::HashMap;

use common::{dir_prefix, Folder};
use rayon::prelude::*;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FolderStore {
    /// Every indexed filepath, strictly ascending.
    paths: Vec<String>,
    trackhashes: HashMap<String, String>,
}

impl FolderStore {
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let trackhashes: HashMap<String, String> = entries.into_iter().collect();
        let mut paths: Vec<String> = trackhashes.keys().cloned().collect();
        paths.sort_unstable();
        Self { paths, trackhashes }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn contains(&self, filepath: &str) -> bool {
        self.trackhashes.contains_key(filepath)
    }

    pub fn trackhash_for(&self, filepath: &str) -> Option<&str> {
        self.trackhashes.get(filepath).map(String::as_str)
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub(crate) fn insert(&mut self, filepath: String, trackhash: String) {
        if let Err(pos) = self.paths.binary_search(&filepath) {
            self.paths.insert(pos, filepath.clone());
        }
        self.trackhashes.insert(filepath, trackhash);
    }

    pub(crate) fn remove(&mut self, filepath: &str) -> bool {
        if let Ok(pos) = self.paths.binary_search_by(|p| p.as_str().cmp(filepath)) {
            self.paths.remove(pos);
        }
        self.trackhashes.remove(filepath).is_some()
    }

    /// Number of indexed paths starting with `prefix`.
    pub fn count_tracks_containing(&self, prefix: &str) -> usize {
        let start = match self.first_match(prefix) {
            Some(start) => start,
            None => return 0,
        };
        self.paths[start..]
            .iter()
            .take_while(|p| p.starts_with(prefix))
            .count()
    }

    /// Counts tracks under each directory, in parallel. Directories are
    /// normalized to a trailing `/` and empty ones are dropped.
    pub fn count_folders(&self, dirs: &[String]) -> Vec<Folder> {
        dirs.par_iter()
            .map(|dir| Folder {
                path: dir_prefix(dir),
                trackcount: self.count_tracks_containing(&dir_prefix(dir)),
            })
            .filter(|folder| folder.trackcount > 0)
            .collect()
    }

    /// Every indexed path starting with `prefix`, ascending.
    pub fn paths_under(&self, prefix: &str) -> &[String] {
        let start = match self.first_match(prefix) {
            Some(start) => start,
            None => return &[],
        };
        let len = self.paths[start..]
            .iter()
            .take_while(|p| p.starts_with(prefix))
            .count();
        &self.paths[start..start + len]
    }

    /// Filepaths directly inside `dir` (not in subdirectories).
    pub fn files_in(&self, dir: &str) -> Vec<&str> {
        let prefix = dir_prefix(dir);
        let start = match self.first_match(&prefix) {
            Some(start) => start,
            None => return Vec::new(),
        };
        self.paths[start..]
            .iter()
            .take_while(|p| p.starts_with(&prefix))
            .filter(|p| !p[prefix.len()..].contains('/'))
            .map(String::as_str)
            .collect()
    }

    /// Left-most index whose path starts with `prefix`.
    fn first_match(&self, prefix: &str) -> Option<usize> {
        let mut low = 0usize;
        let mut high = self.paths.len();
        while low < high {
            let mid = low + (high - low) / 2;
            let path = self.paths[mid].as_str();
            if path.starts_with(prefix) {
                if mid == 0 || !self.paths[mid - 1].starts_with(prefix) {
                    return Some(mid);
                }
                high = mid;
            } else if path < prefix {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        None
    }
}
