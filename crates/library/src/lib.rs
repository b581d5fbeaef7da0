use std::fs::Metadata;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use metadata::MetadataError;
use redb::{CommitError, DatabaseError, StorageError, TableError, TransactionError};

mod apply;
mod associate;
pub mod catalog;
mod queue;
mod reconcile;
mod scan;
mod settings;
mod stats;

pub use catalog::{Catalog, CatalogRead, CATALOG_VERSION};
pub use queue::{FileInfo, FileScanQueue, ScanOutput, ScanRequest, ScanResult};
pub use reconcile::{
    get_or_create_artist, get_or_create_clusters, get_or_create_medium, get_or_create_release,
    sync_cluster_types,
};
pub use scan::{ScanOutcome, Scanner};
pub use settings::{
    FallbackSettings, FileKind, ScanOptions, ScanSettings, ARTIST_INFO_FILE_NAME,
};
pub use stats::{
    NoopListener, ScanDuplicate, ScanError, ScanErrorKind, ScanListener, ScanProgress, ScanStats,
    ScanStep,
};

#[derive(Debug)]
pub enum LibraryError {
    Io(std::io::Error),
    Metadata(MetadataError),
    Redb(redb::Error),
    Bincode(Box<bincode::ErrorKind>),
    KeyParse(String),
    VersionMismatch(u32),
}

impl std::fmt::Display for LibraryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibraryError::Io(err) => write!(f, "io error: {}", err),
            LibraryError::Metadata(err) => write!(f, "metadata error: {}", err),
            LibraryError::Redb(err) => write!(f, "db error: {}", err),
            LibraryError::Bincode(err) => write!(f, "bincode error: {}", err),
            LibraryError::KeyParse(value) => write!(f, "key parse error: {}", value),
            LibraryError::VersionMismatch(version) => {
                write!(f, "catalog version mismatch: {}", version)
            }
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

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_millis() as u64
}

pub(crate) fn modified_millis(metadata: &Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
