use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use library::{LibraryDb, PathValidator, Scanner};
use metadata::LoftyReader;
use tracing::info;
use tracing_subscriber::EnvFilter;

const IMPORT_USER_ID: u64 = 1;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = env::args().skip(1);
    let music_root = args
        .next()
        .or_else(|| env::var("MUSIC_ROOT").ok())
        .ok_or("MUSIC_ROOT not set and no path argument")?;
    let index_path = args
        .next()
        .or_else(|| env::var("INDEX_PATH").ok())
        .unwrap_or_else(|| "data/library.redb".to_string());
    // Files under the download root are indexed in place; anything else is
    // staged into it.
    let download_root = env::var("DOWNLOAD_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(&music_root));

    let music_root = std::fs::canonicalize(&music_root)?;
    let music_root_str = music_root.to_string_lossy().to_string();
    let db = LibraryDb::open(&PathBuf::from(&index_path))?;

    let library = match db
        .list_libraries()?
        .into_iter()
        .find(|library| library.user_id == IMPORT_USER_ID && library.name == music_root_str)
    {
        Some(library) => library,
        None => db.create_library(IMPORT_USER_ID, &music_root_str)?,
    };
    let known = db
        .list_library_paths(library.id)?
        .into_iter()
        .any(|path| path.path == music_root_str);
    if !known {
        let path = db.add_library_path(library.id, &music_root_str)?;
        info!("Enrolled {:?} as library path {}", music_root, path.id);
    }

    let validator = PathValidator::new(vec![download_root.clone(), music_root.clone()]);
    let scanner = Scanner::new(db, validator, Arc::new(LoftyReader), download_root);
    let stats = scanner.scan(IMPORT_USER_ID, library.id, None)?;

    println!(
        "Scanned {} files: {} created, {} updated, {} skipped, {} errors",
        stats.scanned_files,
        stats.created_songs,
        stats.updated_songs,
        stats.skipped_songs,
        stats.errors
    );

    Ok(())
}
