use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Failures of a single region file.
#[derive(Debug, Error)]
pub enum RegionError {
    #[error("no chunk stored at ({x}, {z})")]
    Missing { x: i32, z: i32 },
    #[error("region file {0} was never created")]
    Uninitialized(PathBuf),
    #[error("unknown compression format {0}")]
    UnknownCompression(u8),
    #[error("corrupt region data: {0}")]
    Corrupt(String),
    #[error("payload needs {pages} pages, more than one entry can address")]
    TooLarge { pages: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failures at the serializer boundary.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("chunk ({x}, {z}) has never been stored")]
    NotFound { x: i32, z: i32 },
    #[error("chunk ({x}, {z}) is corrupt: {reason}")]
    Corrupt { x: i32, z: i32, reason: String },
    #[error("failed to read chunk ({x}, {z})")]
    Read {
        x: i32,
        z: i32,
        #[source]
        source: RegionError,
    },
    #[error("failed to write chunk ({x}, {z})")]
    Write {
        x: i32,
        z: i32,
        #[source]
        source: RegionError,
    },
    #[error("cannot open storage at {path}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("storage task failed: {0}")]
    Task(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

/// Failures surfaced to `request_chunk` callers. Cloneable so one failed
/// load can resolve every waiting subscriber.
#[derive(Debug, Clone, Error)]
pub enum WorldError {
    #[error("loading chunk ({x}, {z}) failed")]
    Load {
        x: i32,
        z: i32,
        #[source]
        source: Arc<StorageError>,
    },
    #[error("generating chunk ({x}, {z}) failed: {reason}")]
    Generation { x: i32, z: i32, reason: String },
    #[error("load of chunk ({x}, {z}) ended without a result")]
    Abandoned { x: i32, z: i32 },
}

/// Failures while resolving generation stage order.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StageError {
    #[error("unknown generation stage {0:?}")]
    Unknown(String),
    #[error("generation stages form a cycle through {0:?}")]
    Cycle(String),
}
