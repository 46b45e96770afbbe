//! Archive Error Types
//!
//! One tagged kind per failure class. Encoding, compression and write errors
//! fail a `store` call. List and read errors fail a query. Decode errors are
//! per-object and only surface through query stats and logs.

use std::io::Error as IoError;
use thiserror::Error;

/// Error type for archive operations
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Batch could not be serialized; nothing was written
    #[error("Error encoding flows: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Gzip compression of the serialized batch failed; nothing was written
    #[error("Error compressing flows: {0}")]
    Compression(#[source] IoError),

    /// Object store rejected or failed the PUT
    #[error("Failed to write object {key}: {source}")]
    Write {
        key: String,
        #[source]
        source: IoError,
    },

    /// Listing the prefix failed
    #[error("Failed to list objects under {prefix}: {source}")]
    List {
        prefix: String,
        #[source]
        source: IoError,
    },

    /// Reading one listed object failed
    #[error("Failed to read object {key}: {source}")]
    Read {
        key: String,
        #[source]
        source: IoError,
    },

    /// Object body is not a gzip'd JSON array of flows
    #[error("Failed to decode object {key}: {reason}")]
    Decode { key: String, reason: String },

    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ArchiveError {
    /// Underlying object store error, if this failure came from the store
    pub fn io_source(&self) -> Option<&IoError> {
        match self {
            ArchiveError::Write { source, .. }
            | ArchiveError::List { source, .. }
            | ArchiveError::Read { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;
