//! Failure file bookkeeping for URLs that exhausted their retries.
//!
//! The failure file mirrors the queue file's shape: plain text, one URL per
//! line, append-only from the run loop's side. A URL lives in at most one of
//! {queue, failure file}; re-enqueueing a failed URL removes it from here.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, instrument};

/// Errors that can occur while reading or rewriting the failure file.
#[derive(Debug, Error)]
pub enum FailureLogError {
    /// Failure file could not be read.
    #[error("failed to read failure file '{path}': {source}")]
    Read {
        /// The failure file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Failure file could not be written.
    #[error("failed to write failure file '{path}': {source}")]
    Write {
        /// The failure file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// Result type for failure log operations.
pub type Result<T> = std::result::Result<T, FailureLogError>;

/// Append-only log of URLs that exceeded the retry limit.
#[derive(Debug, Clone)]
pub struct FailureLog {
    path: PathBuf,
}

impl FailureLog {
    /// Creates a failure log handle for the given file path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the underlying file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns all failed URLs in file order. A missing file is empty.
    ///
    /// # Errors
    ///
    /// Returns [`FailureLogError::Read`] if the file exists but cannot be read.
    pub fn list(&self) -> Result<Vec<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => Ok(raw
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(FailureLogError::Read {
                path: self.path.clone(),
                source: err,
            }),
        }
    }

    /// Returns true when `url` is recorded as failed.
    ///
    /// # Errors
    ///
    /// Returns [`FailureLogError::Read`] if the file exists but cannot be read.
    pub fn contains(&self, url: &str) -> Result<bool> {
        Ok(self.list()?.iter().any(|failed| failed == url))
    }

    /// Appends `url` to the failure file, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`FailureLogError::Write`] if the file cannot be opened or written.
    #[instrument(skip(self), fields(failed = %self.path.display(), url = %url))]
    pub fn append(&self, url: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| FailureLogError::Write {
                path: self.path.clone(),
                source: err,
            })?;
        writeln!(file, "{url}").map_err(|err| FailureLogError::Write {
            path: self.path.clone(),
            source: err,
        })?;
        debug!("recorded permanent failure");
        Ok(())
    }

    /// Removes every occurrence of `url`, used when the URL is re-enqueued.
    ///
    /// Returns true when at least one entry was removed.
    ///
    /// # Errors
    ///
    /// Returns [`FailureLogError::Read`] / [`FailureLogError::Write`] on IO failure.
    #[instrument(skip(self), fields(failed = %self.path.display(), url = %url))]
    pub fn remove(&self, url: &str) -> Result<bool> {
        let mut file = match OpenOptions::new().read(true).write(true).open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
            Err(err) => {
                return Err(FailureLogError::Read {
                    path: self.path.clone(),
                    source: err,
                });
            }
        };

        let mut raw = String::new();
        file.read_to_string(&mut raw)
            .map_err(|err| FailureLogError::Read {
                path: self.path.clone(),
                source: err,
            })?;

        let entries: Vec<&str> = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        if !entries.iter().any(|entry| *entry == url) {
            return Ok(false);
        }

        let mut survivors = String::new();
        for entry in entries.iter().filter(|entry| **entry != url) {
            survivors.push_str(entry);
            survivors.push('\n');
        }

        file.seek(SeekFrom::Start(0))
            .map_err(|err| FailureLogError::Write {
                path: self.path.clone(),
                source: err,
            })?;
        file.set_len(0).map_err(|err| FailureLogError::Write {
            path: self.path.clone(),
            source: err,
        })?;
        file.write_all(survivors.as_bytes())
            .map_err(|err| FailureLogError::Write {
                path: self.path.clone(),
                source: err,
            })?;

        debug!("cleared failure entries for re-enqueue");
        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn log_in(dir: &TempDir) -> FailureLog {
        FailureLog::new(dir.path().join("dqlist.failed"))
    }

    #[test]
    fn test_list_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);
        assert!(log.list().unwrap().is_empty());
        assert!(!log.contains("https://example.com/a").unwrap());
    }

    #[test]
    fn test_append_accumulates_in_order() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);
        log.append("https://example.com/a").unwrap();
        log.append("https://example.com/b").unwrap();
        assert_eq!(
            log.list().unwrap(),
            vec!["https://example.com/a", "https://example.com/b"]
        );
        assert!(log.contains("https://example.com/b").unwrap());
    }

    #[test]
    fn test_remove_drops_all_occurrences() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);
        log.append("https://example.com/a").unwrap();
        log.append("https://example.com/b").unwrap();
        log.append("https://example.com/a").unwrap();

        assert!(log.remove("https://example.com/a").unwrap());
        assert_eq!(log.list().unwrap(), vec!["https://example.com/b"]);
    }

    #[test]
    fn test_remove_absent_url_returns_false() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);
        log.append("https://example.com/a").unwrap();
        assert!(!log.remove("https://example.com/zzz").unwrap());
        assert_eq!(log.list().unwrap(), vec!["https://example.com/a"]);
    }

    #[test]
    fn test_remove_on_missing_file_returns_false() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);
        assert!(!log.remove("https://example.com/a").unwrap());
    }
}
