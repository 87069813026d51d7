use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use library::parse_root_list;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const CONFIG_VERSION: u32 = 1;

pub const MAX_SCAN_WORKERS: usize = 8;
pub const MAX_SCAN_INTERVAL_MINUTES: u64 = 24 * 60;
pub const DEFAULT_WATCH_REFRESH_MS: u64 = 300_000;
pub const MIN_WATCH_REFRESH_MS: u64 = 10_000;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub version: u32,
    pub index_path: String,
    pub download_root: String,
    /// Extra directories libraries may live under, separated by `;` (or `:`
    /// on unix).
    pub library_roots: String,
    pub scan_workers: usize,
    /// 0 disables the periodic rescan.
    pub scan_interval_minutes: u64,
    pub watch_libraries: bool,
    pub watch_refresh_ms: u64,
    /// Non-zero switches watchers to polling at this interval.
    pub watch_poll_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            index_path: "library.redb".to_string(),
            download_root: "downloads".to_string(),
            library_roots: String::new(),
            scan_workers: 1,
            scan_interval_minutes: 0,
            watch_libraries: false,
            watch_refresh_ms: DEFAULT_WATCH_REFRESH_MS,
            watch_poll_ms: 0,
        }
    }
}

impl ServerConfig {
    pub fn scan_worker_limit(&self) -> usize {
        self.scan_workers.clamp(1, MAX_SCAN_WORKERS)
    }

    pub fn scan_interval(&self) -> Option<Duration> {
        if self.scan_interval_minutes == 0 {
            return None;
        }
        let minutes = self.scan_interval_minutes.min(MAX_SCAN_INTERVAL_MINUTES);
        Some(Duration::from_secs(minutes * 60))
    }

    pub fn watch_refresh_interval(&self) -> Duration {
        let ms = if self.watch_refresh_ms == 0 {
            DEFAULT_WATCH_REFRESH_MS
        } else {
            self.watch_refresh_ms.max(MIN_WATCH_REFRESH_MS)
        };
        Duration::from_millis(ms)
    }

    pub fn watch_poll_interval(&self) -> Option<Duration> {
        if self.watch_poll_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.watch_poll_ms))
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
    match env::var("SONGVAULT_CONFIG") {
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
        if config.version < CONFIG_VERSION {
            config.version = CONFIG_VERSION;
        }
        if config.index_path.trim().is_empty() {
            config.index_path = "library.redb".to_string();
        }
        if config.download_root.trim().is_empty() {
            config.download_root = "downloads".to_string();
        }
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

pub fn apply_env_overrides(config: &mut ServerConfig) {
    apply_overrides(config, |key| env::var(key).ok());
}

/// Applies `SONGVAULT_*` overrides looked up through `lookup`. Unparseable
/// numbers are logged and ignored.
pub fn apply_overrides<F>(config: &mut ServerConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| {
        lookup(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    if let Some(value) = get("SONGVAULT_INDEX_PATH") {
        config.index_path = value;
    }
    if let Some(value) = get("SONGVAULT_DOWNLOAD_ROOT") {
        config.download_root = value;
    }
    if let Some(value) = get("SONGVAULT_LIBRARY_ROOTS") {
        config.library_roots = value;
    }
    if let Some(value) = get("SONGVAULT_SCAN_WORKERS") {
        if let Some(parsed) = parse_number("SONGVAULT_SCAN_WORKERS", &value) {
            config.scan_workers = parsed;
        }
    }
    if let Some(value) = get("SONGVAULT_SCAN_INTERVAL_MINUTES") {
        if let Some(parsed) = parse_number("SONGVAULT_SCAN_INTERVAL_MINUTES", &value) {
            config.scan_interval_minutes = parsed;
        }
    }
    if let Some(value) = get("SONGVAULT_WATCH") {
        config.watch_libraries = env_flag(&value);
    }
    if let Some(value) = get("SONGVAULT_WATCH_REFRESH_MS") {
        if let Some(parsed) = parse_number("SONGVAULT_WATCH_REFRESH_MS", &value) {
            config.watch_refresh_ms = parsed;
        }
    }
    if let Some(value) = get("SONGVAULT_WATCH_POLL_MS") {
        if let Some(parsed) = parse_number("SONGVAULT_WATCH_POLL_MS", &value) {
            config.watch_poll_ms = parsed;
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Option<T> {
    match value.parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a number", key, value);
            None
        }
    }
}

pub fn env_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
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

pub fn resolve_download_root(config_path: &Path, config: &ServerConfig) -> PathBuf {
    resolve_path(config_path, config.download_root.trim())
}

/// The download root followed by the configured extra roots.
pub fn allowed_roots(config_path: &Path, config: &ServerConfig) -> Vec<PathBuf> {
    let mut roots = vec![resolve_download_root(config_path, config)];
    for root in parse_root_list(&config.library_roots) {
        roots.push(resolve_path(config_path, &root.to_string_lossy()));
    }
    roots
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn worker_limit_is_clamped() {
        let mut config = ServerConfig::default();
        assert_eq!(config.scan_worker_limit(), 1);
        config.scan_workers = 0;
        assert_eq!(config.scan_worker_limit(), 1);
        config.scan_workers = 32;
        assert_eq!(config.scan_worker_limit(), 8);
    }

    #[test]
    fn intervals_respect_bounds() {
        let mut config = ServerConfig::default();
        assert_eq!(config.scan_interval(), None);
        config.scan_interval_minutes = 10_000;
        assert_eq!(config.scan_interval(), Some(Duration::from_secs(1440 * 60)));

        assert_eq!(config.watch_refresh_interval(), Duration::from_millis(300_000));
        config.watch_refresh_ms = 50;
        assert_eq!(config.watch_refresh_interval(), Duration::from_millis(10_000));
        assert_eq!(config.watch_poll_interval(), None);
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let mut config = ServerConfig::default();
        apply_overrides(
            &mut config,
            lookup(&[
                ("SONGVAULT_SCAN_WORKERS", "4"),
                ("SONGVAULT_SCAN_INTERVAL_MINUTES", "15"),
                ("SONGVAULT_WATCH", "yes"),
                ("SONGVAULT_WATCH_POLL_MS", "not-a-number"),
                ("SONGVAULT_LIBRARY_ROOTS", "/srv/music;/mnt/nas"),
            ]),
        );
        assert_eq!(config.scan_workers, 4);
        assert_eq!(config.scan_interval_minutes, 15);
        assert!(config.watch_libraries);
        assert_eq!(config.watch_poll_ms, 0);
        assert_eq!(config.library_roots, "/srv/music;/mnt/nas");
    }

    #[test]
    fn watch_flag_values() {
        for value in ["1", "true", "YES", "on"] {
            assert!(env_flag(value));
        }
        for value in ["0", "false", "off", "maybe"] {
            assert!(!env_flag(value));
        }
    }

    #[test]
    fn creates_default_config_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("config.yaml");
        let (config, created) = load_or_create_config(&path).unwrap();
        assert!(created);
        assert_eq!(config.scan_workers, 1);

        let (_, created) = load_or_create_config(&path).unwrap();
        assert!(!created);
    }

    #[test]
    fn partial_files_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "scan_workers: 3\nindex_path: \"\"\n").unwrap();
        let (config, _) = load_or_create_config(&path).unwrap();
        assert_eq!(config.scan_workers, 3);
        assert_eq!(config.index_path, "library.redb");
        assert_eq!(config.watch_refresh_ms, DEFAULT_WATCH_REFRESH_MS);
    }

    #[test]
    fn roots_resolve_against_the_config_dir() {
        let config_path = Path::new("/etc/songvault/config.yaml");
        let config = ServerConfig {
            library_roots: "/srv/music;shared".to_string(),
            ..ServerConfig::default()
        };
        assert_eq!(
            allowed_roots(config_path, &config),
            vec![
                PathBuf::from("/etc/songvault/downloads"),
                PathBuf::from("/srv/music"),
                PathBuf::from("/etc/songvault/shared"),
            ]
        );
    }
}
