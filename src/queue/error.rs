//! Error types for queue file operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while reading or rewriting the queue file.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Queue file could not be read.
    #[error("failed to read queue file '{path}': {source}")]
    Read {
        /// The queue file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Queue file could not be written.
    #[error("failed to write queue file '{path}': {source}")]
    Write {
        /// The queue file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl QueueError {
    /// Creates a read error for `path`.
    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    /// Creates a write error for `path`.
    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }
}
