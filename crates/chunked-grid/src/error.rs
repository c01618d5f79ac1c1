//! Error types for chunked grid storage.

use thiserror::Error;

/// Errors that can occur while reading, writing, or swapping grid chunks.
#[derive(Error, Debug)]
pub enum GridStoreError {
    /// Coordinates outside the declared grid or chunk extent.
    #[error("cell ({row}, {col}) is outside extent {nrows}x{ncols}")]
    OutOfRange {
        row: i64,
        col: i64,
        nrows: i64,
        ncols: i64,
    },

    /// The memory manager could not free enough chunks for an allocation.
    #[error(
        "memory exhausted: {requested_bytes} bytes requested with {used_bytes} of {budget_bytes} bytes in use and nothing left to evict"
    )]
    ResourceExhausted {
        requested_bytes: usize,
        used_bytes: usize,
        budget_bytes: usize,
    },

    /// A NaN or infinite value was offered as the no-data sentinel.
    #[error("invalid no-data value: {0}")]
    InvalidNoDataValue(f64),

    /// Persisted chunk bytes do not decode to any known chunk encoding.
    #[error("corrupt persisted chunk: {0}")]
    CorruptPersistedChunk(String),

    /// A chunk the grid believes was swapped out is missing from its store.
    #[error("chunk not found in store: {0}")]
    ChunkNotFound(String),

    /// Storage/IO error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Bulk import error.
    #[error("import error: {0}")]
    Import(String),

    /// The grid is not registered with the memory manager.
    #[error("grid {0} is not registered with the memory manager")]
    UnknownGrid(u64),
}

impl GridStoreError {
    /// Create an OutOfRange error.
    pub fn out_of_range(row: i64, col: i64, nrows: i64, ncols: i64) -> Self {
        Self::OutOfRange {
            row,
            col,
            nrows,
            ncols,
        }
    }

    /// Create a CorruptPersistedChunk error.
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptPersistedChunk(msg.into())
    }

    /// Create a Storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a Config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an Import error.
    pub fn import(msg: impl Into<String>) -> Self {
        Self::Import(msg.into())
    }

    /// True for the errors that abort an operation because memory ran out.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::ResourceExhausted { .. })
    }
}

impl From<std::io::Error> for GridStoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for GridStoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result type for grid store operations.
pub type Result<T> = std::result::Result<T, GridStoreError>;
