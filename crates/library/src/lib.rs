mod naming;
mod scanner;
mod store;
mod validate;

use metadata::MetadataError;
use redb::{CommitError, DatabaseError, StorageError, TableError, TransactionError};

pub use naming::{
    directory_artist_album, disc_number_from_relpath, normalize_title, parse_track_filename,
    year_from_text, TrackFilename,
};
pub use scanner::{
    collect_audio_files, content_hash, is_audio_file, Scanner, AUDIO_EXTENSIONS,
    IMPORTS_DIR_NAME, MAX_SCAN_FILES,
};
pub use store::LibraryDb;
pub use validate::{parse_root_list, PathRejection, PathValidator};

#[derive(Debug)]
pub enum LibraryError {
    Io(std::io::Error),
    Metadata(MetadataError),
    Redb(redb::Error),
    Bincode(Box<bincode::ErrorKind>),
    Json(serde_json::Error),
    LibraryNotFound(u64),
    RunNotActive(u64),
}

impl LibraryError {
    /// Store failures abort a scan run; everything else is scoped to one file
    /// or one path.
    pub fn is_store_error(&self) -> bool {
        matches!(
            self,
            LibraryError::Redb(_) | LibraryError::Bincode(_) | LibraryError::Json(_)
        )
    }
}

impl std::fmt::Display for LibraryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibraryError::Io(err) => write!(f, "io error: {}", err),
            LibraryError::Metadata(err) => write!(f, "metadata error: {}", err),
            LibraryError::Redb(err) => write!(f, "db error: {}", err),
            LibraryError::Bincode(err) => write!(f, "bincode error: {}", err),
            LibraryError::Json(err) => write!(f, "json error: {}", err),
            LibraryError::LibraryNotFound(id) => write!(f, "library {} not found", id),
            LibraryError::RunNotActive(id) => write!(f, "scan run {} is no longer active", id),
        }
    }
}

impl std::error::Error for LibraryError {}

impl From<std::io::Error> for LibraryError {
    fn from(err: std::io::Error) -> Self {
        LibraryError::Io(err)
    }
}

impl From<MetadataError> for LibraryError {
    fn from(err: MetadataError) -> Self {
        LibraryError::Metadata(err)
    }
}

impl From<redb::Error> for LibraryError {
    fn from(err: redb::Error) -> Self {
        LibraryError::Redb(err)
    }
}

impl From<DatabaseError> for LibraryError {
    fn from(err: DatabaseError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TableError> for LibraryError {
    fn from(err: TableError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TransactionError> for LibraryError {
    fn from(err: TransactionError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<StorageError> for LibraryError {
    fn from(err: StorageError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<CommitError> for LibraryError {
    fn from(err: CommitError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<Box<bincode::ErrorKind>> for LibraryError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        LibraryError::Bincode(err)
    }
}

impl From<serde_json::Error> for LibraryError {
    fn from(err: serde_json::Error) -> Self {
        LibraryError::Json(err)
    }
}
