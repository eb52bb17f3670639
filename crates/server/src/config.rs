use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use metadata::TagOptions;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub roots: Vec<String>,
    pub exclude_dirs: Vec<String>,
    pub index_path: String,
    pub port: u16,
    pub watch_music: bool,
    pub watch_debounce_secs: u64,
    pub enable_periodic_scans: bool,
    pub scan_interval_mins: u64,
    pub transcode_dir: String,
    pub transcode_timeout_secs: u64,
    pub ffmpeg_path: String,
    #[serde(flatten)]
    pub tags: TagOptions,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            exclude_dirs: Vec::new(),
            index_path: "library.redb".to_string(),
            port: 3000,
            watch_music: true,
            watch_debounce_secs: 2,
            enable_periodic_scans: false,
            scan_interval_mins: 10,
            transcode_dir: "transcodes".to_string(),
            transcode_timeout_secs: 600,
            ffmpeg_path: "ffmpeg".to_string(),
            tags: TagOptions::default(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn config_path_from_env() -> PathBuf {
    match env::var("TONEARM_CONFIG") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("config.yaml")),
        Err(_) => PathBuf::from("config.yaml"),
    }
}

pub fn load_or_create_config(path: &Path) -> Result<(ServerConfig, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut config: ServerConfig = serde_yaml::from_str(&contents)?;
        if config.port == 0 {
            config.port = 3000;
        }
        if config.index_path.trim().is_empty() {
            config.index_path = "library.redb".to_string();
        }
        if config.transcode_dir.trim().is_empty() {
            config.transcode_dir = "transcodes".to_string();
        }
        if config.ffmpeg_path.trim().is_empty() {
            config.ffmpeg_path = "ffmpeg".to_string();
        }
        config.roots.retain(|root| !root.trim().is_empty());
        return Ok((config, false));
    }

    let config = ServerConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

pub fn save_config(path: &Path, config: &ServerConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}

pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value);
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}

pub fn resolve_roots(config_path: &Path, roots: &[String]) -> Vec<PathBuf> {
    roots
        .iter()
        .map(|root| root.trim())
        .filter(|root| !root.is_empty())
        .map(|root| resolve_path(config_path, root))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let (config, created) = load_or_create_config(&path).unwrap();
        assert!(created);
        assert!(path.exists());
        assert_eq!(config.port, 3000);
        assert_eq!(config.index_path, "library.redb");
        assert!(config.watch_music);

        let (again, created) = load_or_create_config(&path).unwrap();
        assert!(!created);
        assert_eq!(again.tags, config.tags);
    }

    #[test]
    fn partial_file_keeps_defaults_and_flattened_tag_switches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "roots:\n  - /music\n  - ''\nport: 0\nmerge_albums: true\nartist_separators: [\"&\"]\n",
        )
        .unwrap();

        let (config, created) = load_or_create_config(&path).unwrap();
        assert!(!created);
        assert_eq!(config.roots, vec!["/music".to_string()]);
        assert_eq!(config.port, 3000);
        assert!(config.tags.merge_albums);
        assert_eq!(config.tags.artist_separators, vec!["&".to_string()]);
        assert!(config.tags.remove_prod_by);
        assert_eq!(config.watch_debounce_secs, 2);
    }

    #[test]
    fn relative_paths_resolve_against_config_dir() {
        let config_path = Path::new("/etc/tonearm/config.yaml");
        assert_eq!(
            resolve_path(config_path, "library.redb"),
            PathBuf::from("/etc/tonearm/library.redb")
        );
        assert_eq!(resolve_path(config_path, "/data/x"), PathBuf::from("/data/x"));
        assert_eq!(
            resolve_path(Path::new("config.yaml"), "a"),
            PathBuf::from("./a")
        );
        assert_eq!(
            resolve_roots(config_path, &["music".to_string(), " ".to_string()]),
            vec![PathBuf::from("/etc/tonearm/music")]
        );
    }
}
