use std::fs;
use std::path::Path;
use std::sync::Arc;

use common::{
    legacy_song_source_url, legacy_source_url_prefix, now_millis, Album, Artist, Library,
    LibraryPath, ScanRun, ScanStats, ScanStatus, Song,
};
use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};
use serde::{Deserialize, Serialize};

use crate::LibraryError;

const KEY_SEP: char = '\x1f';

const COUNTERS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("counters");
const LIBRARIES_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("libraries");
const LIBRARY_PATHS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("library_paths");
const SCAN_RUNS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("scan_runs");
// run id -> library id, only for queued/running runs
const ACTIVE_RUNS_TABLE: TableDefinition<u64, u64> = TableDefinition::new("active_runs");
const ARTISTS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("artists");
const ARTISTS_BY_NAME_TABLE: TableDefinition<&str, u64> = TableDefinition::new("artists_by_name");
const ALBUMS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("albums");
const ALBUMS_BY_NAME_TABLE: TableDefinition<&str, u64> = TableDefinition::new("albums_by_name");
const SONGS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("songs");
const SONGS_BY_SOURCE_TABLE: TableDefinition<&str, u64> = TableDefinition::new("songs_by_source");

/// Handle to the song index. Cheap to clone; every operation runs in its own
/// redb transaction.
#[derive(Clone)]
pub struct LibraryDb {
    db: Arc<Database>,
}

impl LibraryDb {
    pub fn open(path: &Path) -> Result<Self, LibraryError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let db = if path.exists() {
            Database::open(path)?
        } else {
            Database::create(path)?
        };
        Self::new(Arc::new(db))
    }

    pub fn new(db: Arc<Database>) -> Result<Self, LibraryError> {
        let store = Self { db };
        store.init_tables()?;
        Ok(store)
    }

    fn init_tables(&self) -> Result<(), LibraryError> {
        let write_txn = self.db.begin_write()?;
        {
            let _ = write_txn.open_table(COUNTERS_TABLE)?;
            let _ = write_txn.open_table(LIBRARIES_TABLE)?;
            let _ = write_txn.open_table(LIBRARY_PATHS_TABLE)?;
            let _ = write_txn.open_table(SCAN_RUNS_TABLE)?;
            let _ = write_txn.open_table(ACTIVE_RUNS_TABLE)?;
            let _ = write_txn.open_table(ARTISTS_TABLE)?;
            let _ = write_txn.open_table(ARTISTS_BY_NAME_TABLE)?;
            let _ = write_txn.open_table(ALBUMS_TABLE)?;
            let _ = write_txn.open_table(ALBUMS_BY_NAME_TABLE)?;
            let _ = write_txn.open_table(SONGS_TABLE)?;
            let _ = write_txn.open_table(SONGS_BY_SOURCE_TABLE)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn create_library(&self, user_id: u64, name: &str) -> Result<Library, LibraryError> {
        let write_txn = self.db.begin_write()?;
        let library = {
            let id = next_id(&write_txn, "libraries")?;
            let library = Library {
                id,
                user_id,
                name: name.trim().to_string(),
                created_at: now_millis(),
            };
            let mut table = write_txn.open_table(LIBRARIES_TABLE)?;
            let bytes = encode_value(&library)?;
            table.insert(id, bytes.as_slice())?;
            library
        };
        write_txn.commit()?;
        Ok(library)
    }

    pub fn get_library(&self, library_id: u64) -> Result<Option<Library>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LIBRARIES_TABLE)?;
        let library = match table.get(library_id)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(library)
    }

    /// Returns the library only when it belongs to `user_id`.
    pub fn find_user_library(
        &self,
        user_id: u64,
        library_id: u64,
    ) -> Result<Option<Library>, LibraryError> {
        Ok(self
            .get_library(library_id)?
            .filter(|library| library.user_id == user_id))
    }

    pub fn list_libraries(&self) -> Result<Vec<Library>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LIBRARIES_TABLE)?;
        let mut items = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            items.push(decode_value(entry.1.value())?);
        }
        Ok(items)
    }

    pub fn add_library_path(
        &self,
        library_id: u64,
        path: &str,
    ) -> Result<LibraryPath, LibraryError> {
        let write_txn = self.db.begin_write()?;
        let library_path = {
            let libraries = write_txn.open_table(LIBRARIES_TABLE)?;
            if libraries.get(library_id)?.is_none() {
                return Err(LibraryError::LibraryNotFound(library_id));
            }
            let id = next_id(&write_txn, "library_paths")?;
            let library_path = LibraryPath {
                id,
                library_id,
                path: path.to_string(),
                enabled: true,
                last_scanned_at: None,
                created_at: now_millis(),
            };
            let mut table = write_txn.open_table(LIBRARY_PATHS_TABLE)?;
            let bytes = encode_value(&library_path)?;
            table.insert(id, bytes.as_slice())?;
            library_path
        };
        write_txn.commit()?;
        Ok(library_path)
    }

    pub fn get_library_path(&self, path_id: u64) -> Result<Option<LibraryPath>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LIBRARY_PATHS_TABLE)?;
        let path = match table.get(path_id)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(path)
    }

    pub fn list_library_paths(&self, library_id: u64) -> Result<Vec<LibraryPath>, LibraryError> {
        Ok(self
            .all_library_paths()?
            .into_iter()
            .filter(|path| path.library_id == library_id)
            .collect())
    }

    /// Enabled paths across every library, in id order.
    pub fn list_enabled_paths(&self) -> Result<Vec<LibraryPath>, LibraryError> {
        Ok(self
            .all_library_paths()?
            .into_iter()
            .filter(|path| path.enabled)
            .collect())
    }

    fn all_library_paths(&self) -> Result<Vec<LibraryPath>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LIBRARY_PATHS_TABLE)?;
        let mut items = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            items.push(decode_value(entry.1.value())?);
        }
        Ok(items)
    }

    pub fn set_path_enabled(&self, path_id: u64, enabled: bool) -> Result<bool, LibraryError> {
        self.update_path(path_id, |path| path.enabled = enabled)
    }

    pub fn update_path_location(&self, path_id: u64, location: &str) -> Result<bool, LibraryError> {
        self.update_path(path_id, |path| path.path = location.to_string())
    }

    pub fn mark_path_scanned(&self, path_id: u64, scanned_at: u64) -> Result<bool, LibraryError> {
        self.update_path(path_id, |path| path.last_scanned_at = Some(scanned_at))
    }

    fn update_path<F>(&self, path_id: u64, apply: F) -> Result<bool, LibraryError>
    where
        F: FnOnce(&mut LibraryPath),
    {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(LIBRARY_PATHS_TABLE)?;
            let mut path: LibraryPath = match table.get(path_id)? {
                Some(value) => decode_value(value.value())?,
                None => return Ok(false),
            };
            apply(&mut path);
            let bytes = encode_value(&path)?;
            table.insert(path_id, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(true)
    }

    pub fn create_scan_run(
        &self,
        library_id: u64,
        user_id: u64,
        status: ScanStatus,
    ) -> Result<ScanRun, LibraryError> {
        let write_txn = self.db.begin_write()?;
        let run = insert_run(&write_txn, library_id, user_id, status)?;
        write_txn.commit()?;
        Ok(run)
    }

    /// Creates a run unless the library already has a queued or running one.
    /// The check and the insert share one write transaction.
    pub fn create_scan_run_if_idle(
        &self,
        library_id: u64,
        user_id: u64,
        status: ScanStatus,
    ) -> Result<Option<ScanRun>, LibraryError> {
        let write_txn = self.db.begin_write()?;
        {
            let active = write_txn.open_table(ACTIVE_RUNS_TABLE)?;
            for entry in active.iter()? {
                let entry = entry?;
                if entry.1.value() == library_id {
                    return Ok(None);
                }
            }
        }
        let run = insert_run(&write_txn, library_id, user_id, status)?;
        write_txn.commit()?;
        Ok(Some(run))
    }

    pub fn get_scan_run(&self, run_id: u64) -> Result<Option<ScanRun>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SCAN_RUNS_TABLE)?;
        let run = match table.get(run_id)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(run)
    }

    pub fn find_active_run(&self, library_id: u64) -> Result<Option<ScanRun>, LibraryError> {
        Ok(self
            .active_runs()?
            .into_iter()
            .find(|run| run.library_id == library_id))
    }

    pub fn count_running_runs(&self) -> Result<usize, LibraryError> {
        Ok(self
            .active_runs()?
            .iter()
            .filter(|run| run.status == ScanStatus::Running)
            .count())
    }

    /// Oldest queued runs first, at most `limit` of them.
    pub fn list_queued_runs(&self, limit: usize) -> Result<Vec<ScanRun>, LibraryError> {
        Ok(self
            .active_runs()?
            .into_iter()
            .filter(|run| run.status == ScanStatus::Queued)
            .take(limit)
            .collect())
    }

    fn active_runs(&self) -> Result<Vec<ScanRun>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let active = read_txn.open_table(ACTIVE_RUNS_TABLE)?;
        let runs = read_txn.open_table(SCAN_RUNS_TABLE)?;
        let mut items = Vec::new();
        for entry in active.iter()? {
            let entry = entry?;
            if let Some(value) = runs.get(entry.0.value())? {
                items.push(decode_value(value.value())?);
            }
        }
        Ok(items)
    }

    /// Newest first.
    pub fn list_scan_runs(
        &self,
        library_id: u64,
        limit: usize,
    ) -> Result<Vec<ScanRun>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SCAN_RUNS_TABLE)?;
        let mut items = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            let run: ScanRun = decode_value(entry.1.value())?;
            if run.library_id == library_id {
                items.push(run);
            }
        }
        items.reverse();
        items.truncate(limit);
        Ok(items)
    }

    /// Conditional `queued -> running` transition. Returns the number of rows
    /// changed: 0 when the run was already claimed or no longer exists.
    pub fn claim_queued_run(&self, run_id: u64) -> Result<usize, LibraryError> {
        let claimed = self.update_run(run_id, |run| {
            if run.status != ScanStatus::Queued {
                return false;
            }
            run.status = ScanStatus::Running;
            run.started_at = Some(now_millis());
            true
        })?;
        Ok(usize::from(claimed))
    }

    /// Moves a non-terminal run to `running`, keeping an existing start time.
    pub fn start_scan_run(&self, run_id: u64) -> Result<bool, LibraryError> {
        self.update_run(run_id, |run| {
            if run.status.is_terminal() {
                return false;
            }
            run.status = ScanStatus::Running;
            run.started_at.get_or_insert_with(now_millis);
            true
        })
    }

    /// Conditional `running -> status` transition. `stats` replaces the stored
    /// stats only when given. Returns false when the run is not running, so a
    /// run that already reached a terminal state keeps it.
    pub fn finish_scan_run(
        &self,
        run_id: u64,
        status: ScanStatus,
        error: Option<String>,
        stats: Option<&ScanStats>,
    ) -> Result<bool, LibraryError> {
        let stats_json = match stats {
            Some(stats) => Some(serde_json::to_string(stats)?),
            None => None,
        };
        self.update_run(run_id, move |run| {
            if run.status != ScanStatus::Running {
                return false;
            }
            run.status = status;
            run.finished_at = Some(now_millis());
            run.error = error;
            if stats_json.is_some() {
                run.stats_json = stats_json;
            }
            true
        })
    }

    /// Marks every running run failed with `message`; returns how many.
    pub fn fail_running_runs(&self, message: &str) -> Result<usize, LibraryError> {
        let write_txn = self.db.begin_write()?;
        let failed = {
            let mut active = write_txn.open_table(ACTIVE_RUNS_TABLE)?;
            let mut runs = write_txn.open_table(SCAN_RUNS_TABLE)?;
            let mut run_ids = Vec::new();
            for entry in active.iter()? {
                let entry = entry?;
                run_ids.push(entry.0.value());
            }

            let now = now_millis();
            let mut failed = 0usize;
            for run_id in run_ids {
                let mut run: ScanRun = match runs.get(run_id)? {
                    Some(value) => decode_value(value.value())?,
                    None => continue,
                };
                if run.status != ScanStatus::Running {
                    continue;
                }
                run.status = ScanStatus::Failed;
                run.error = Some(message.to_string());
                run.finished_at = Some(now);
                let bytes = encode_value(&run)?;
                runs.insert(run_id, bytes.as_slice())?;
                active.remove(run_id)?;
                failed += 1;
            }
            failed
        };
        write_txn.commit()?;
        Ok(failed)
    }

    fn update_run<F>(&self, run_id: u64, apply: F) -> Result<bool, LibraryError>
    where
        F: FnOnce(&mut ScanRun) -> bool,
    {
        let write_txn = self.db.begin_write()?;
        {
            let mut runs = write_txn.open_table(SCAN_RUNS_TABLE)?;
            let mut run: ScanRun = match runs.get(run_id)? {
                Some(value) => decode_value(value.value())?,
                None => return Ok(false),
            };
            if !apply(&mut run) {
                return Ok(false);
            }
            let bytes = encode_value(&run)?;
            runs.insert(run_id, bytes.as_slice())?;

            let mut active = write_txn.open_table(ACTIVE_RUNS_TABLE)?;
            if run.status.is_active() {
                active.insert(run_id, run.library_id)?;
            } else {
                active.remove(run_id)?;
            }
        }
        write_txn.commit()?;
        Ok(true)
    }

    pub fn list_artists(&self, user_id: u64) -> Result<Vec<Artist>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ARTISTS_TABLE)?;
        let mut items = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            let artist: Artist = decode_value(entry.1.value())?;
            if artist.user_id == user_id {
                items.push(artist);
            }
        }
        Ok(items)
    }

    /// Finds the user's artist by name or creates it.
    pub fn upsert_artist(&self, user_id: u64, name: &str) -> Result<Artist, LibraryError> {
        let key = artist_name_key(user_id, name);
        let write_txn = self.db.begin_write()?;
        let artist = {
            let mut by_name = write_txn.open_table(ARTISTS_BY_NAME_TABLE)?;
            let mut artists = write_txn.open_table(ARTISTS_TABLE)?;
            let existing_id = by_name.get(key.as_str())?.map(|value| value.value());
            if let Some(artist_id) = existing_id {
                if let Some(value) = artists.get(artist_id)? {
                    return Ok(decode_value(value.value())?);
                }
            }

            let id = next_id(&write_txn, "artists")?;
            let artist = Artist {
                id,
                user_id,
                name: name.trim().to_string(),
                created_at: now_millis(),
            };
            let bytes = encode_value(&artist)?;
            artists.insert(id, bytes.as_slice())?;
            by_name.insert(key.as_str(), id)?;
            artist
        };
        write_txn.commit()?;
        Ok(artist)
    }

    pub fn list_albums(&self, user_id: u64) -> Result<Vec<Album>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ALBUMS_TABLE)?;
        let mut items = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            let album: Album = decode_value(entry.1.value())?;
            if album.user_id == user_id {
                items.push(album);
            }
        }
        Ok(items)
    }

    /// Finds the user's album by `(title, album_artist)` or creates it. A
    /// missing year on an existing album is filled in.
    pub fn upsert_album(
        &self,
        user_id: u64,
        title: &str,
        album_artist: &str,
        artist_id: Option<u64>,
        year: Option<i32>,
    ) -> Result<Album, LibraryError> {
        let key = album_name_key(user_id, title, album_artist);
        let write_txn = self.db.begin_write()?;
        let album = {
            let mut by_name = write_txn.open_table(ALBUMS_BY_NAME_TABLE)?;
            let mut albums = write_txn.open_table(ALBUMS_TABLE)?;
            let existing_id = by_name.get(key.as_str())?.map(|value| value.value());
            let existing: Option<Album> = match existing_id {
                Some(album_id) => match albums.get(album_id)? {
                    Some(value) => Some(decode_value(value.value())?),
                    None => None,
                },
                None => None,
            };

            match existing {
                Some(mut album) => {
                    if album.year.is_some() || year.is_none() {
                        return Ok(album);
                    }
                    album.year = year;
                    let bytes = encode_value(&album)?;
                    albums.insert(album.id, bytes.as_slice())?;
                    album
                }
                None => {
                    let id = next_id(&write_txn, "albums")?;
                    let album = Album {
                        id,
                        user_id,
                        artist_id,
                        title: title.trim().to_string(),
                        album_artist: album_artist.trim().to_string(),
                        year,
                        created_at: now_millis(),
                    };
                    let bytes = encode_value(&album)?;
                    albums.insert(id, bytes.as_slice())?;
                    by_name.insert(key.as_str(), id)?;
                    album
                }
            }
        };
        write_txn.commit()?;
        Ok(album)
    }

    pub fn get_song(&self, song_id: u64) -> Result<Option<Song>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SONGS_TABLE)?;
        let song = match table.get(song_id)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(song)
    }

    pub fn find_song_by_source(&self, source_url: &str) -> Result<Option<Song>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(SONGS_BY_SOURCE_TABLE)?;
        let songs = read_txn.open_table(SONGS_TABLE)?;
        let song_id = match index.get(source_url)? {
            Some(value) => value.value(),
            None => return Ok(None),
        };
        let song = match songs.get(song_id)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(song)
    }

    /// Every song whose source URL starts with `prefix`.
    pub fn songs_with_source_prefix(&self, prefix: &str) -> Result<Vec<Song>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(SONGS_BY_SOURCE_TABLE)?;
        let songs = read_txn.open_table(SONGS_TABLE)?;

        let mut end = prefix.to_string();
        end.push('\u{10ffff}');
        let mut items = Vec::new();
        for entry in index.range(prefix..end.as_str())? {
            let entry = entry?;
            if let Some(value) = songs.get(entry.1.value())? {
                items.push(decode_value(value.value())?);
            }
        }
        Ok(items)
    }

    /// Songs of `library_id` still stored under the `library:<lib>:<rel>`
    /// form. Index keys qualified by one of `path_ids` are passed over without
    /// reading their song rows.
    pub fn legacy_library_songs(
        &self,
        library_id: u64,
        path_ids: &[u64],
    ) -> Result<Vec<Song>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(SONGS_BY_SOURCE_TABLE)?;
        let songs = read_txn.open_table(SONGS_TABLE)?;

        let prefix = legacy_source_url_prefix(library_id);
        let mut end = prefix.clone();
        end.push('\u{10ffff}');
        let mut items = Vec::new();
        for entry in index.range(prefix.as_str()..end.as_str())? {
            let entry = entry?;
            let key = entry.0.value();
            let rest = key.strip_prefix(prefix.as_str()).unwrap_or(key);
            if is_path_qualified(rest, path_ids) {
                continue;
            }
            if let Some(value) = songs.get(entry.1.value())? {
                let song: Song = decode_value(value.value())?;
                if song.source_url == legacy_song_source_url(library_id, &song.relative_path) {
                    items.push(song);
                }
            }
        }
        Ok(items)
    }

    pub fn list_library_songs(&self, library_id: u64) -> Result<Vec<Song>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SONGS_TABLE)?;
        let mut items = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            let song: Song = decode_value(entry.1.value())?;
            if song.library_id == library_id {
                items.push(song);
            }
        }
        Ok(items)
    }

    /// Stores a new song and assigns its id.
    pub fn insert_song(&self, mut song: Song) -> Result<Song, LibraryError> {
        let write_txn = self.db.begin_write()?;
        {
            song.id = next_id(&write_txn, "songs")?;
            let mut songs = write_txn.open_table(SONGS_TABLE)?;
            let mut index = write_txn.open_table(SONGS_BY_SOURCE_TABLE)?;
            let bytes = encode_value(&song)?;
            songs.insert(song.id, bytes.as_slice())?;
            index.insert(song.source_url.as_str(), song.id)?;
        }
        write_txn.commit()?;
        Ok(song)
    }

    /// Rewrites an existing song, moving its source index entry when the
    /// source URL changed.
    pub fn update_song(&self, song: &Song) -> Result<bool, LibraryError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut songs = write_txn.open_table(SONGS_TABLE)?;
            let mut index = write_txn.open_table(SONGS_BY_SOURCE_TABLE)?;
            let previous: Song = match songs.get(song.id)? {
                Some(value) => decode_value(value.value())?,
                None => return Ok(false),
            };
            if previous.source_url != song.source_url {
                index.remove(previous.source_url.as_str())?;
            }
            let bytes = encode_value(song)?;
            songs.insert(song.id, bytes.as_slice())?;
            index.insert(song.source_url.as_str(), song.id)?;
        }
        write_txn.commit()?;
        Ok(true)
    }
}

fn insert_run(
    write_txn: &WriteTransaction,
    library_id: u64,
    user_id: u64,
    status: ScanStatus,
) -> Result<ScanRun, LibraryError> {
    let id = next_id(write_txn, "scan_runs")?;
    let now = now_millis();
    let run = ScanRun {
        id,
        library_id,
        user_id,
        status,
        created_at: now,
        started_at: if status == ScanStatus::Running {
            Some(now)
        } else {
            None
        },
        finished_at: None,
        error: None,
        stats_json: None,
    };
    let mut runs = write_txn.open_table(SCAN_RUNS_TABLE)?;
    let bytes = encode_value(&run)?;
    runs.insert(id, bytes.as_slice())?;
    if status.is_active() {
        let mut active = write_txn.open_table(ACTIVE_RUNS_TABLE)?;
        active.insert(id, library_id)?;
    }
    Ok(run)
}

fn next_id(write_txn: &WriteTransaction, counter: &str) -> Result<u64, LibraryError> {
    let mut table = write_txn.open_table(COUNTERS_TABLE)?;
    let current = table.get(counter)?.map(|value| value.value()).unwrap_or(0);
    let next = current + 1;
    table.insert(counter, next)?;
    Ok(next)
}

fn is_path_qualified(rest: &str, path_ids: &[u64]) -> bool {
    match rest.split_once(':') {
        Some((head, _)) => head
            .parse::<u64>()
            .map(|id| path_ids.contains(&id))
            .unwrap_or(false),
        None => false,
    }
}

fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, LibraryError> {
    Ok(bincode::serialize(value)?)
}

fn decode_value<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, LibraryError> {
    Ok(bincode::deserialize(bytes)?)
}

fn name_key_part(value: &str) -> String {
    value.trim().to_lowercase()
}

fn artist_name_key(user_id: u64, name: &str) -> String {
    let mut out = user_id.to_string();
    out.push(KEY_SEP);
    out.push_str(&name_key_part(name));
    out
}

fn album_name_key(user_id: u64, title: &str, album_artist: &str) -> String {
    let mut out = user_id.to_string();
    out.push(KEY_SEP);
    out.push_str(&name_key_part(title));
    out.push(KEY_SEP);
    out.push_str(&name_key_part(album_artist));
    out
}
