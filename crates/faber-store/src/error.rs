//! # Store Errors

use std::path::PathBuf;

use faber_core::RecordId;
use thiserror::Error;

/// Errors raised by record store backends.
#[derive(Error, Debug)]
pub enum StoreError {
    /// `save` was called with an id that already exists.
    #[error("record {0} already exists")]
    DuplicateId(RecordId),

    /// `update` was called for an id that does not exist.
    #[error("record {0} not found")]
    NotFound(RecordId),

    /// Reading or writing the backing file failed.
    #[error("store io error at {path}: {source}")]
    Io {
        /// The file being read or written.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The backing file exists but does not hold a valid store document.
    #[error("store file {path} is corrupt: {reason}")]
    Corrupt {
        /// The offending file.
        path: PathBuf,
        /// Parser diagnostic.
        reason: String,
    },

    /// Serializing the store document failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
