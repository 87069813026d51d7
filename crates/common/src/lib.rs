use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Library {
    pub id: u64,
    pub user_id: u64,
    pub name: String,
    pub created_at: u64,
}

/// One directory enrolled in a library. The row id is the stable identity;
/// `path` may be rewritten when canonicalization changes it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LibraryPath {
    pub id: u64,
    pub library_id: u64,
    pub path: String,
    pub enabled: bool,
    pub last_scanned_at: Option<u64>,
    pub created_at: u64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn is_active(self) -> bool {
        matches!(self, ScanStatus::Queued | ScanStatus::Running)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScanStatus::Queued => "queued",
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanRun {
    pub id: u64,
    pub library_id: u64,
    pub user_id: u64,
    pub status: ScanStatus,
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub finished_at: Option<u64>,
    pub error: Option<String>,
    pub stats_json: Option<String>,
}

impl ScanRun {
    pub fn stats(&self) -> Option<ScanStats> {
        self.stats_json
            .as_deref()
            .and_then(|value| serde_json::from_str(value).ok())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScanStats {
    pub scanned_files: usize,
    pub created_songs: usize,
    pub updated_songs: usize,
    pub skipped_songs: usize,
    pub errors: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Artist {
    pub id: u64,
    pub user_id: u64,
    pub name: String,
    pub created_at: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Album {
    pub id: u64,
    pub user_id: u64,
    pub artist_id: Option<u64>,
    pub title: String,
    pub album_artist: String,
    pub year: Option<i32>,
    pub created_at: u64,
}

/// A library-origin song. `source_url` is the reconciliation identity and
/// `relative_path`/`file_size`/`file_mtime` the change-detection fingerprint.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Song {
    pub id: u64,
    pub user_id: u64,
    pub library_id: u64,
    pub library_path_id: u64,
    pub source_url: String,
    pub file_path: String,
    pub relative_path: String,
    pub file_size: u64,
    pub file_mtime: u64,
    pub content_hash: String,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    pub genre: Option<String>,
    pub isrc: Option<String>,
    pub lyrics: Option<String>,
    pub duration_ms: Option<u32>,
    pub bitrate: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
    pub replay_gain_track_gain: Option<f32>,
    pub replay_gain_track_peak: Option<f32>,
    pub replay_gain_album_gain: Option<f32>,
    pub replay_gain_album_peak: Option<f32>,
    pub track_number: Option<u16>,
    pub disc_number: Option<u16>,
    pub year: Option<i32>,
    pub artist_id: Option<u64>,
    pub album_id: Option<u64>,
    pub created_at: u64,
    pub updated_at: u64,
}

pub fn song_source_url(library_id: u64, path_id: u64, relpath: &str) -> String {
    format!("{}{}", source_url_prefix(library_id, path_id), relpath)
}

pub fn legacy_song_source_url(library_id: u64, relpath: &str) -> String {
    format!("{}{}", legacy_source_url_prefix(library_id), relpath)
}

pub fn source_url_prefix(library_id: u64, path_id: u64) -> String {
    format!("library:{}:{}:", library_id, path_id)
}

pub fn legacy_source_url_prefix(library_id: u64) -> String {
    format!("library:{}:", library_id)
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|value| value.as_millis() as u64)
        .unwrap_or(0)
}

pub fn millis_since_epoch(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|value| value.as_millis() as u64)
        .unwrap_or(0)
}

pub fn relpath_from(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    Some(path_to_slash_string(rel))
}

pub fn join_relpath(root: &Path, relpath: &str) -> PathBuf {
    let mut out = PathBuf::from(root);
    for part in relpath.split('/') {
        if part.is_empty() {
            continue;
        }
        out.push(part);
    }
    out
}

fn path_to_slash_string(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    parts.join("/")
}
