use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::{
    join_relpath, legacy_song_source_url, millis_since_epoch, now_millis, relpath_from,
    song_source_url, source_url_prefix, Library, LibraryPath, ScanStats, ScanStatus, Song,
};
use metadata::{TagInfo, TagReader};
use sha1::{Digest, Sha1};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::naming::{
    directory_artist_album, disc_number_from_relpath, parse_track_filename, year_from_text,
};
use crate::store::LibraryDb;
use crate::validate::PathValidator;
use crate::LibraryError;

pub const AUDIO_EXTENSIONS: [&str; 14] = [
    "mp3", "flac", "m4a", "aac", "ogg", "oga", "opus", "wav", "aif", "aiff", "wma", "alac",
    "ape", "wv",
];

/// Staging area under the download root. Never descended into while scanning.
pub const IMPORTS_DIR_NAME: &str = "library-imports";

/// Upper bound on audio files handled by one scan, across all paths.
pub const MAX_SCAN_FILES: usize = 10_000;

const UNKNOWN_ARTIST: &str = "Unknown Artist";

enum FileOutcome {
    Created,
    Updated,
    Skipped,
}

/// Reconciles a library's enabled paths into the song index.
pub struct Scanner {
    db: LibraryDb,
    validator: PathValidator,
    reader: Arc<dyn TagReader>,
    download_root: PathBuf,
}

impl Scanner {
    pub fn new(
        db: LibraryDb,
        validator: PathValidator,
        reader: Arc<dyn TagReader>,
        download_root: PathBuf,
    ) -> Self {
        let download_root = fs::canonicalize(&download_root).unwrap_or(download_root);
        Self {
            db,
            validator,
            reader,
            download_root,
        }
    }

    pub fn db(&self) -> &LibraryDb {
        &self.db
    }

    pub fn validator(&self) -> &PathValidator {
        &self.validator
    }

    /// Runs one reconciliation pass for `library_id`. With `existing_run` the
    /// given ledger row is driven to its terminal state; otherwise a new
    /// `running` row is created. A run that is already terminal is refused
    /// with `RunNotActive` and left untouched.
    pub fn scan(
        &self,
        user_id: u64,
        library_id: u64,
        existing_run: Option<u64>,
    ) -> Result<ScanStats, LibraryError> {
        let library = self
            .db
            .find_user_library(user_id, library_id)?
            .ok_or(LibraryError::LibraryNotFound(library_id))?;

        let run_id = match existing_run {
            Some(run_id) => {
                if !self.db.start_scan_run(run_id)? {
                    return Err(LibraryError::RunNotActive(run_id));
                }
                run_id
            }
            None => {
                self.db
                    .create_scan_run(library.id, user_id, ScanStatus::Running)?
                    .id
            }
        };
        info!("Scanning library {} ({:?}), run {}", library.id, library.name, run_id);

        let mut stats = ScanStats::default();
        match self.reconcile(&library, &mut stats) {
            Ok(()) => {
                if !self
                    .db
                    .finish_scan_run(run_id, ScanStatus::Completed, None, Some(&stats))?
                {
                    warn!(
                        "Scan run {} was finished elsewhere; its status is left as is",
                        run_id
                    );
                }
                info!(
                    "Library {} scanned: {} files, {} created, {} updated, {} skipped, {} errors",
                    library.id,
                    stats.scanned_files,
                    stats.created_songs,
                    stats.updated_songs,
                    stats.skipped_songs,
                    stats.errors
                );
                Ok(stats)
            }
            Err(err) => {
                warn!("Scan of library {} failed: {}", library.id, err);
                if let Err(write_err) = self.db.finish_scan_run(
                    run_id,
                    ScanStatus::Failed,
                    Some(err.to_string()),
                    Some(&stats),
                ) {
                    warn!("Failed to record failure of scan run {}: {}", run_id, write_err);
                }
                Err(err)
            }
        }
    }

    fn reconcile(&self, library: &Library, stats: &mut ScanStats) -> Result<(), LibraryError> {
        let all_paths = self.db.list_library_paths(library.id)?;
        let path_ids: Vec<u64> = all_paths.iter().map(|path| path.id).collect();
        let paths: Vec<LibraryPath> = all_paths.into_iter().filter(|path| path.enabled).collect();
        let mut pass = ScanPass {
            legacy: self
                .db
                .legacy_library_songs(library.id, &path_ids)?
                .into_iter()
                .map(|song| (song.source_url.clone(), song))
                .collect(),
            names: NameCache::prime(&self.db, library.user_id)?,
        };
        let mut budget = MAX_SCAN_FILES;

        for path in paths {
            if budget == 0 {
                warn!(
                    "Library {} hit the {} file limit; remaining paths skipped",
                    library.id, MAX_SCAN_FILES
                );
                break;
            }

            let root = match self.validator.validate(&path.path) {
                Ok(root) => root,
                Err(rejection) => {
                    warn!("Skipping library path {:?}: {}", path.path, rejection);
                    stats.errors += 1;
                    continue;
                }
            };
            let canonical = root.to_string_lossy().to_string();
            if canonical != path.path {
                debug!("Library path {} moved to {:?}", path.id, canonical);
                self.db.update_path_location(path.id, &canonical)?;
            }

            let (files, walk_errors) = collect_audio_files(&root, budget);
            stats.errors += walk_errors;
            budget = budget.saturating_sub(files.len());
            debug!("Found {} audio files under {:?}", files.len(), root);

            self.reconcile_path(library, &path, &root, &files, &mut pass, stats)?;
            self.db.mark_path_scanned(path.id, now_millis())?;
        }
        Ok(())
    }

    fn reconcile_path(
        &self,
        library: &Library,
        path: &LibraryPath,
        root: &Path,
        files: &[PathBuf],
        pass: &mut ScanPass,
        stats: &mut ScanStats,
    ) -> Result<(), LibraryError> {
        let existing: HashMap<String, Song> = self
            .db
            .songs_with_source_prefix(&source_url_prefix(library.id, path.id))?
            .into_iter()
            .map(|song| (song.source_url.clone(), song))
            .collect();

        for file in files {
            stats.scanned_files += 1;
            match self.reconcile_file(library, path, root, file, &existing, pass) {
                Ok(FileOutcome::Created) => stats.created_songs += 1,
                Ok(FileOutcome::Updated) => stats.updated_songs += 1,
                Ok(FileOutcome::Skipped) => stats.skipped_songs += 1,
                Err(err) if err.is_store_error() => return Err(err),
                Err(err) => {
                    warn!("Failed to index {:?}: {}", file, err);
                    stats.errors += 1;
                }
            }
        }
        Ok(())
    }

    fn reconcile_file(
        &self,
        library: &Library,
        path: &LibraryPath,
        root: &Path,
        file: &Path,
        existing: &HashMap<String, Song>,
        pass: &mut ScanPass,
    ) -> Result<FileOutcome, LibraryError> {
        let relpath = relpath_from(root, file).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "file is outside its library path",
            )
        })?;
        let source_url = song_source_url(library.id, path.id, &relpath);
        let legacy_url = legacy_song_source_url(library.id, &relpath);
        let previous = existing
            .get(&source_url)
            .or_else(|| pass.legacy.get(&legacy_url))
            .cloned();
        let adopts_legacy = previous
            .as_ref()
            .map_or(false, |song| song.source_url == legacy_url);

        let meta = fs::metadata(file)?;
        let file_size = meta.len();
        let file_mtime = meta.modified().map(millis_since_epoch).unwrap_or(0);

        if let Some(song) = &previous {
            if song.relative_path == relpath
                && song.file_size == file_size
                && song.file_mtime == file_mtime
            {
                if song.source_url != source_url {
                    let mut upgraded = song.clone();
                    upgraded.source_url = source_url;
                    upgraded.library_path_id = path.id;
                    upgraded.updated_at = now_millis();
                    self.db.update_song(&upgraded)?;
                }
                if adopts_legacy {
                    pass.legacy.remove(&legacy_url);
                }
                return Ok(FileOutcome::Skipped);
            }
        }

        let tags = self.reader.read(file)?;
        let play_path = self.stage_file(library.id, path.id, file, &relpath)?;

        let now = now_millis();
        let is_update = previous.is_some();
        let mut song = match previous {
            Some(song) => song,
            None => Song {
                created_at: now,
                ..Song::default()
            },
        };
        song.user_id = library.user_id;
        song.library_id = library.id;
        song.library_path_id = path.id;
        song.source_url = source_url;
        song.file_path = play_path.to_string_lossy().to_string();
        song.relative_path = relpath.clone();
        song.file_size = file_size;
        song.file_mtime = file_mtime;
        song.content_hash = content_hash(file_size, file_mtime, path.id, &relpath);
        song.updated_at = now;
        self.apply_tags(&mut song, file, &relpath, tags, &mut pass.names)?;

        if is_update {
            self.db.update_song(&song)?;
            if adopts_legacy {
                pass.legacy.remove(&legacy_url);
            }
            Ok(FileOutcome::Updated)
        } else {
            self.db.insert_song(song)?;
            Ok(FileOutcome::Created)
        }
    }

    fn apply_tags(
        &self,
        song: &mut Song,
        file: &Path,
        relpath: &str,
        tags: TagInfo,
        names: &mut NameCache,
    ) -> Result<(), LibraryError> {
        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let from_name = parse_track_filename(&stem);
        let (dir_artist, dir_album) = directory_artist_album(relpath);

        let genre = tags.genre();
        let title = tags
            .title
            .filter(|title| !title.is_empty())
            .unwrap_or(from_name.title);
        let artist = tags
            .artist
            .or(dir_artist)
            .unwrap_or_else(|| UNKNOWN_ARTIST.to_string());
        let album = tags.album.or(dir_album);
        let year = tags
            .year
            .or_else(|| album.as_deref().and_then(year_from_text));

        song.artist_id = Some(names.artist(&self.db, song.user_id, &artist)?);
        song.album_id = match &album {
            Some(album) => {
                let album_artist = tags.album_artist.as_deref().unwrap_or(&artist);
                let album_artist_id = names.artist(&self.db, song.user_id, album_artist)?;
                Some(names.album(
                    &self.db,
                    song.user_id,
                    album,
                    album_artist,
                    album_artist_id,
                    year,
                )?)
            }
            None => None,
        };

        song.title = if title.is_empty() { stem } else { title };
        song.artist = artist;
        song.album = album;
        song.album_artist = tags.album_artist;
        song.genre = genre;
        song.isrc = tags.isrc;
        song.lyrics = tags.lyrics;
        song.duration_ms = tags.duration_ms;
        song.bitrate = tags.bitrate;
        song.sample_rate = tags.sample_rate;
        song.channels = tags.channels;
        song.replay_gain_track_gain = tags.track_gain;
        song.replay_gain_track_peak = tags.track_peak;
        song.replay_gain_album_gain = tags.album_gain;
        song.replay_gain_album_peak = tags.album_peak;
        song.track_number = tags.track_no.or(from_name.track_no);
        song.disc_number = tags.disc_no.or_else(|| disc_number_from_relpath(relpath));
        song.year = year;
        Ok(())
    }

    /// Copies files from outside the download root into the staging area and
    /// returns the path the song should play from.
    fn stage_file(
        &self,
        library_id: u64,
        path_id: u64,
        file: &Path,
        relpath: &str,
    ) -> Result<PathBuf, LibraryError> {
        if file.starts_with(&self.download_root) {
            return Ok(file.to_path_buf());
        }
        let staging_root = self
            .download_root
            .join(IMPORTS_DIR_NAME)
            .join(library_id.to_string())
            .join(path_id.to_string());
        let target = join_relpath(&staging_root, relpath);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(file, &target)?;
        Ok(target)
    }
}

/// State shared by every path of one scan. Legacy songs leave `legacy` once a
/// path adopts them.
struct ScanPass {
    legacy: HashMap<String, Song>,
    names: NameCache,
}

/// Per-scan lookup of artist and album ids, keyed by normalized names.
struct NameCache {
    artists: HashMap<String, u64>,
    albums: HashMap<(String, String), u64>,
}

impl NameCache {
    fn prime(db: &LibraryDb, user_id: u64) -> Result<Self, LibraryError> {
        let artists = db
            .list_artists(user_id)?
            .into_iter()
            .map(|artist| (name_key(&artist.name), artist.id))
            .collect();
        let albums = db
            .list_albums(user_id)?
            .into_iter()
            .map(|album| {
                (
                    (name_key(&album.title), name_key(&album.album_artist)),
                    album.id,
                )
            })
            .collect();
        Ok(Self { artists, albums })
    }

    fn artist(&mut self, db: &LibraryDb, user_id: u64, name: &str) -> Result<u64, LibraryError> {
        let key = name_key(name);
        if let Some(id) = self.artists.get(&key) {
            return Ok(*id);
        }
        let artist = db.upsert_artist(user_id, name)?;
        self.artists.insert(key, artist.id);
        Ok(artist.id)
    }

    fn album(
        &mut self,
        db: &LibraryDb,
        user_id: u64,
        title: &str,
        album_artist: &str,
        artist_id: u64,
        year: Option<i32>,
    ) -> Result<u64, LibraryError> {
        let key = (name_key(title), name_key(album_artist));
        if let Some(id) = self.albums.get(&key) {
            return Ok(*id);
        }
        let album = db.upsert_album(user_id, title, album_artist, Some(artist_id), year)?;
        self.albums.insert(key, album.id);
        Ok(album.id)
    }
}

fn name_key(value: &str) -> String {
    value.trim().to_lowercase()
}

pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .map(|ext| AUDIO_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Audio files under `root` in sorted order, at most `limit` of them, plus the
/// number of walk errors met on the way. Symlinks are not followed and
/// staging directories are skipped.
pub fn collect_audio_files(root: &Path, limit: usize) -> (Vec<PathBuf>, usize) {
    let mut files = Vec::new();
    let mut errors = 0usize;
    if limit == 0 {
        return (files, errors);
    }

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !(entry.file_type().is_dir() && entry.file_name() == IMPORTS_DIR_NAME)
        });
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!("Failed to walk {:?}: {}", root, err);
                errors += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_audio_file(entry.path()) {
            continue;
        }
        files.push(entry.into_path());
        if files.len() >= limit {
            break;
        }
    }
    (files, errors)
}

/// Cheap change fingerprint; the audio bytes are never read.
pub fn content_hash(file_size: u64, file_mtime: u64, path_id: u64, relpath: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("{}:{}:{}:{}", file_size, file_mtime, path_id, relpath).as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use metadata::MetadataError;
    use tempfile::TempDir;

    struct StubReader;

    impl TagReader for StubReader {
        fn read(&self, path: &Path) -> Result<TagInfo, MetadataError> {
            let name = path.to_string_lossy();
            if name.contains("corrupt") {
                return Err(MetadataError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "unreadable frame",
                )));
            }
            if name.contains("tagged") {
                return Ok(TagInfo {
                    title: Some("Tagged Title".to_string()),
                    artist: Some("Tag Artist".to_string()),
                    album: Some("Tag Album".to_string()),
                    track_no: Some(9),
                    year: Some(1997),
                    ..TagInfo::default()
                });
            }
            Ok(TagInfo::default())
        }
    }

    struct Fixture {
        download: TempDir,
        music: TempDir,
        db: LibraryDb,
        scanner: Scanner,
        library: Library,
        path: LibraryPath,
    }

    fn fixture() -> Fixture {
        let download = tempfile::tempdir().unwrap();
        let music = tempfile::tempdir().unwrap();
        let db = LibraryDb::open(&download.path().join("index.redb")).unwrap();
        let validator = PathValidator::new(vec![
            download.path().to_path_buf(),
            music.path().to_path_buf(),
        ]);
        let scanner = Scanner::new(
            db.clone(),
            validator,
            Arc::new(StubReader),
            download.path().to_path_buf(),
        );
        let library = db.create_library(1, "Main").unwrap();
        let path = db
            .add_library_path(library.id, music.path().to_str().unwrap())
            .unwrap();
        Fixture {
            download,
            music,
            db,
            scanner,
            library,
            path,
        }
    }

    fn write_file(root: &Path, relpath: &str, bytes: &[u8]) -> PathBuf {
        let path = join_relpath(root, relpath);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn untagged_file_takes_names_from_its_path() {
        let fx = fixture();
        write_file(fx.music.path(), "Artist/Album/01 - Song.mp3", b"audio");

        let stats = fx.scanner.scan(1, fx.library.id, None).unwrap();
        assert_eq!(stats.scanned_files, 1);
        assert_eq!(stats.created_songs, 1);
        assert_eq!(stats.errors, 0);

        let songs = fx.db.list_library_songs(fx.library.id).unwrap();
        assert_eq!(songs.len(), 1);
        let song = &songs[0];
        assert_eq!(song.artist, "Artist");
        assert_eq!(song.album.as_deref(), Some("Album"));
        assert_eq!(song.track_number, Some(1));
        assert_eq!(song.title, "Song");
        assert_eq!(song.relative_path, "Artist/Album/01 - Song.mp3");
        assert_eq!(
            song.source_url,
            format!("library:{}:{}:Artist/Album/01 - Song.mp3", fx.library.id, fx.path.id)
        );
        assert_eq!(
            song.content_hash,
            content_hash(5, song.file_mtime, fx.path.id, "Artist/Album/01 - Song.mp3")
        );
        assert!(song.artist_id.is_some());
        assert!(song.album_id.is_some());
    }

    #[test]
    fn files_outside_the_download_root_are_staged() {
        let fx = fixture();
        write_file(fx.music.path(), "Artist/Album/01 - Song.mp3", b"audio");
        fx.scanner.scan(1, fx.library.id, None).unwrap();

        let song = fx.db.list_library_songs(fx.library.id).unwrap().remove(0);
        let staged = fs::canonicalize(fx.download.path())
            .unwrap()
            .join(IMPORTS_DIR_NAME)
            .join(fx.library.id.to_string())
            .join(fx.path.id.to_string())
            .join("Artist")
            .join("Album")
            .join("01 - Song.mp3");
        assert_eq!(Path::new(&song.file_path), staged.as_path());
        assert_eq!(fs::read(&staged).unwrap(), b"audio");
    }

    #[test]
    fn files_inside_the_download_root_play_in_place() {
        let fx = fixture();
        let original = write_file(fx.download.path(), "Inbox/Album/01 - Song.flac", b"flac");
        let path = fx
            .db
            .add_library_path(fx.library.id, fx.download.path().join("Inbox").to_str().unwrap())
            .unwrap();
        fx.db.set_path_enabled(fx.path.id, false).unwrap();

        fx.scanner.scan(1, fx.library.id, None).unwrap();
        let song = fx.db.list_library_songs(fx.library.id).unwrap().remove(0);
        assert_eq!(song.library_path_id, path.id);
        assert_eq!(
            Path::new(&song.file_path),
            fs::canonicalize(&original).unwrap().as_path()
        );
    }

    #[test]
    fn second_scan_of_unchanged_tree_skips_everything() {
        let fx = fixture();
        write_file(fx.music.path(), "A/B/01 - One.mp3", b"one");
        write_file(fx.music.path(), "A/B/02 - Two.flac", b"two");

        let first = fx.scanner.scan(1, fx.library.id, None).unwrap();
        assert_eq!(first.created_songs, 2);

        let second = fx.scanner.scan(1, fx.library.id, None).unwrap();
        assert_eq!(second.created_songs, 0);
        assert_eq!(second.updated_songs, 0);
        assert_eq!(second.skipped_songs, second.scanned_files);
        assert_eq!(second.scanned_files, 2);
        assert_eq!(fx.db.list_library_songs(fx.library.id).unwrap().len(), 2);
    }

    #[test]
    fn legacy_source_urls_are_upgraded_in_place() {
        let fx = fixture();
        let file = write_file(fx.music.path(), "A/B/01 - One.mp3", b"one");
        let meta = fs::metadata(&file).unwrap();
        let legacy = fx
            .db
            .insert_song(Song {
                user_id: 1,
                library_id: fx.library.id,
                source_url: legacy_song_source_url(fx.library.id, "A/B/01 - One.mp3"),
                relative_path: "A/B/01 - One.mp3".to_string(),
                file_size: meta.len(),
                file_mtime: millis_since_epoch(meta.modified().unwrap()),
                title: "One".to_string(),
                ..Song::default()
            })
            .unwrap();

        let stats = fx.scanner.scan(1, fx.library.id, None).unwrap();
        assert_eq!(stats.skipped_songs, 1);
        assert_eq!(stats.created_songs, 0);

        let songs = fx.db.list_library_songs(fx.library.id).unwrap();
        assert_eq!(songs.len(), 1);
        assert_eq!(songs[0].id, legacy.id);
        assert_eq!(
            songs[0].source_url,
            song_source_url(fx.library.id, fx.path.id, "A/B/01 - One.mp3")
        );
        assert_eq!(songs[0].library_path_id, fx.path.id);
    }

    #[test]
    fn legacy_song_is_adopted_by_one_path_only() {
        let fx = fixture();
        let file = write_file(fx.music.path(), "A/B/01 - One.mp3", b"one");
        write_file(fx.download.path(), "Second/A/B/01 - One.mp3", b"other");
        let second = fx
            .db
            .add_library_path(fx.library.id, fx.download.path().join("Second").to_str().unwrap())
            .unwrap();
        let meta = fs::metadata(&file).unwrap();
        let legacy = fx
            .db
            .insert_song(Song {
                user_id: 1,
                library_id: fx.library.id,
                source_url: legacy_song_source_url(fx.library.id, "A/B/01 - One.mp3"),
                relative_path: "A/B/01 - One.mp3".to_string(),
                file_size: meta.len(),
                file_mtime: millis_since_epoch(meta.modified().unwrap()),
                title: "One".to_string(),
                ..Song::default()
            })
            .unwrap();

        let stats = fx.scanner.scan(1, fx.library.id, None).unwrap();
        assert_eq!(stats.skipped_songs, 1);
        assert_eq!(stats.created_songs, 1);

        let adopted = fx.db.get_song(legacy.id).unwrap().unwrap();
        assert_eq!(adopted.library_path_id, fx.path.id);
        let songs = fx.db.list_library_songs(fx.library.id).unwrap();
        assert_eq!(songs.len(), 2);
        assert!(songs
            .iter()
            .any(|song| song.id != legacy.id && song.library_path_id == second.id));
    }

    #[test]
    fn enrolled_paths_are_rewritten_to_their_canonical_form() {
        let fx = fixture();
        fs::create_dir_all(fx.music.path().join("x")).unwrap();
        write_file(fx.music.path(), "Inbox/Artist/Album/01 - Song.mp3", b"audio");
        let raw = format!("{}/x/../Inbox", fx.music.path().display());
        let path = fx.db.add_library_path(fx.library.id, &raw).unwrap();
        fx.db.set_path_enabled(fx.path.id, false).unwrap();

        let first = fx.scanner.scan(1, fx.library.id, None).unwrap();
        assert_eq!(first.created_songs, 1);
        let canonical = fs::canonicalize(fx.music.path().join("Inbox")).unwrap();
        let stored = fx.db.get_library_path(path.id).unwrap().unwrap();
        assert_eq!(stored.path, canonical.to_string_lossy());
        assert!(stored.last_scanned_at.is_some());

        let second = fx.scanner.scan(1, fx.library.id, None).unwrap();
        assert_eq!(second.created_songs, 0);
        assert_eq!(second.skipped_songs, 1);
        let songs = fx.db.list_library_songs(fx.library.id).unwrap();
        assert_eq!(songs.len(), 1);
        assert_eq!(songs[0].relative_path, "Artist/Album/01 - Song.mp3");
        assert_eq!(
            songs[0].source_url,
            song_source_url(fx.library.id, path.id, "Artist/Album/01 - Song.mp3")
        );
    }

    #[test]
    fn finished_runs_are_not_scanned_again() {
        let fx = fixture();
        write_file(fx.music.path(), "A/B/01 - One.mp3", b"one");
        let run = fx
            .db
            .create_scan_run(fx.library.id, 1, ScanStatus::Queued)
            .unwrap();
        assert_eq!(fx.db.claim_queued_run(run.id).unwrap(), 1);
        assert_eq!(fx.db.fail_running_runs("Scan interrupted by server restart.").unwrap(), 1);

        let result = fx.scanner.scan(1, fx.library.id, Some(run.id));
        assert!(matches!(result, Err(LibraryError::RunNotActive(id)) if id == run.id));

        let stored = fx.db.get_scan_run(run.id).unwrap().unwrap();
        assert_eq!(stored.status, ScanStatus::Failed);
        assert_eq!(
            stored.error.as_deref(),
            Some("Scan interrupted by server restart.")
        );
        assert!(fx.db.list_library_songs(fx.library.id).unwrap().is_empty());
    }

    struct InterruptingReader {
        db: LibraryDb,
    }

    impl TagReader for InterruptingReader {
        fn read(&self, _path: &Path) -> Result<TagInfo, MetadataError> {
            self.db.fail_running_runs("stopped by operator").unwrap();
            Ok(TagInfo::default())
        }
    }

    #[test]
    fn runs_failed_mid_scan_keep_their_failure() {
        let fx = fixture();
        write_file(fx.music.path(), "A/B/01 - One.mp3", b"one");
        let scanner = Scanner::new(
            fx.db.clone(),
            PathValidator::new(vec![fx.music.path().to_path_buf()]),
            Arc::new(InterruptingReader { db: fx.db.clone() }),
            fx.download.path().to_path_buf(),
        );

        let stats = scanner.scan(1, fx.library.id, None).unwrap();
        assert_eq!(stats.created_songs, 1);

        let runs = fx.db.list_scan_runs(fx.library.id, 10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, ScanStatus::Failed);
        assert_eq!(runs[0].error.as_deref(), Some("stopped by operator"));
        assert!(runs[0].stats().is_none());
    }

    #[test]
    fn corrupt_file_is_counted_and_skipped() {
        let fx = fixture();
        write_file(fx.music.path(), "A/B/01 - One.mp3", b"one");
        write_file(fx.music.path(), "A/B/02 - corrupt.mp3", b"bad");
        write_file(fx.music.path(), "A/B/03 - Three.mp3", b"three");

        let stats = fx.scanner.scan(1, fx.library.id, None).unwrap();
        assert_eq!(stats.scanned_files, 3);
        assert_eq!(stats.created_songs, 2);
        assert_eq!(stats.errors, 1);
    }

    #[test]
    fn changed_files_are_updated() {
        let fx = fixture();
        let file = write_file(fx.music.path(), "A/B/01 - One.mp3", b"one");
        fx.scanner.scan(1, fx.library.id, None).unwrap();
        let before = fx.db.list_library_songs(fx.library.id).unwrap().remove(0);

        fs::write(&file, b"a longer recording").unwrap();
        let stats = fx.scanner.scan(1, fx.library.id, None).unwrap();
        assert_eq!(stats.updated_songs, 1);
        assert_eq!(stats.created_songs, 0);

        let after = fx.db.list_library_songs(fx.library.id).unwrap().remove(0);
        assert_eq!(after.id, before.id);
        assert_eq!(after.file_size, 18);
        assert_ne!(after.content_hash, before.content_hash);
    }

    #[test]
    fn tags_win_over_path_guesses() {
        let fx = fixture();
        write_file(fx.music.path(), "Dir Artist/Dir Album/01 - tagged.mp3", b"x");
        fx.scanner.scan(1, fx.library.id, None).unwrap();

        let song = fx.db.list_library_songs(fx.library.id).unwrap().remove(0);
        assert_eq!(song.title, "Tagged Title");
        assert_eq!(song.artist, "Tag Artist");
        assert_eq!(song.album.as_deref(), Some("Tag Album"));
        assert_eq!(song.track_number, Some(9));
        assert_eq!(song.year, Some(1997));
    }

    #[test]
    fn disc_and_year_come_from_the_path() {
        let fx = fixture();
        write_file(fx.music.path(), "Artist/Album (2004)/CD2/03 - Song.ogg", b"x");
        fx.scanner.scan(1, fx.library.id, None).unwrap();

        let song = fx.db.list_library_songs(fx.library.id).unwrap().remove(0);
        assert_eq!(song.artist, "Artist");
        assert_eq!(song.album.as_deref(), Some("Album (2004)"));
        assert_eq!(song.disc_number, Some(2));
        assert_eq!(song.year, Some(2004));
        assert_eq!(song.track_number, Some(3));
    }

    #[test]
    fn artists_and_albums_are_shared_across_songs() {
        let fx = fixture();
        write_file(fx.music.path(), "Artist/Album/01 - One.mp3", b"1");
        write_file(fx.music.path(), "Artist/Album/02 - Two.mp3", b"2");
        fx.scanner.scan(1, fx.library.id, None).unwrap();

        assert_eq!(fx.db.list_artists(1).unwrap().len(), 1);
        assert_eq!(fx.db.list_albums(1).unwrap().len(), 1);
        let songs = fx.db.list_library_songs(fx.library.id).unwrap();
        assert_eq!(songs[0].album_id, songs[1].album_id);
    }

    #[test]
    fn invalid_paths_count_as_errors() {
        let fx = fixture();
        fx.db
            .add_library_path(fx.library.id, "/definitely/not/a/music/dir")
            .unwrap();
        write_file(fx.music.path(), "A/B/01 - One.mp3", b"one");

        let stats = fx.scanner.scan(1, fx.library.id, None).unwrap();
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.created_songs, 1);
    }

    #[test]
    fn staging_directories_and_other_files_are_ignored() {
        let fx = fixture();
        write_file(fx.music.path(), "library-imports/1/1/old.mp3", b"x");
        write_file(fx.music.path(), "A/B/cover.jpg", b"x");
        write_file(fx.music.path(), "A/B/01 - One.MP3", b"one");

        let stats = fx.scanner.scan(1, fx.library.id, None).unwrap();
        assert_eq!(stats.scanned_files, 1);
    }

    #[test]
    fn runs_are_recorded() {
        let fx = fixture();
        write_file(fx.music.path(), "A/B/01 - One.mp3", b"one");
        fx.scanner.scan(1, fx.library.id, None).unwrap();

        let runs = fx.db.list_scan_runs(fx.library.id, 10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, ScanStatus::Completed);
        assert_eq!(runs[0].stats().unwrap().created_songs, 1);
        assert!(fx.db.get_library_path(fx.path.id).unwrap().unwrap().last_scanned_at.is_some());
    }

    #[test]
    fn existing_run_is_reused() {
        let fx = fixture();
        let run = fx
            .db
            .create_scan_run_if_idle(fx.library.id, 1, ScanStatus::Queued)
            .unwrap()
            .unwrap();
        assert_eq!(fx.db.claim_queued_run(run.id).unwrap(), 1);

        fx.scanner.scan(1, fx.library.id, Some(run.id)).unwrap();
        let runs = fx.db.list_scan_runs(fx.library.id, 10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, run.id);
        assert_eq!(runs[0].status, ScanStatus::Completed);
    }

    #[test]
    fn foreign_library_is_not_found() {
        let fx = fixture();
        assert!(matches!(
            fx.scanner.scan(2, fx.library.id, None),
            Err(LibraryError::LibraryNotFound(_))
        ));
        assert!(fx.db.list_scan_runs(fx.library.id, 10).unwrap().is_empty());
    }

    #[test]
    fn collection_respects_the_limit() {
        let dir = tempfile::tempdir().unwrap();
        for index in 0..5 {
            write_file(dir.path(), &format!("{:02}.mp3", index), b"x");
        }
        let (files, errors) = collect_audio_files(dir.path(), 3);
        assert_eq!(errors, 0);
        assert_eq!(files.len(), 3);
        assert!(files[0].ends_with("00.mp3"));
        assert!(files[2].ends_with("02.mp3"));
    }
}
