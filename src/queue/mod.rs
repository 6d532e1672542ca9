//! Queue file management.
//!
//! The queue is a plain text file, one URL per line, attempted in file
//! order. Producers (the `add` command, or anything else) append; the run
//! loop consumes from the head. Appends go through `O_APPEND` so concurrent
//! producers cannot interleave partial lines; removal rewrites the file in
//! place (seek to start, truncate, write survivors) and matches by value,
//! so lines appended while a download was in flight survive the rewrite.
//!
//! # Example
//!
//! ```no_run
//! use dq_core::queue::QueueFile;
//!
//! # fn main() -> Result<(), dq_core::queue::QueueError> {
//! let queue = QueueFile::new("/home/me/.dqlist");
//! queue.append(&["https://example.com/a.iso".to_string()])?;
//! if let Some(url) = queue.front()? {
//!     // ... download it ...
//!     queue.remove(&url)?;
//! }
//! # Ok(())
//! # }
//! ```

mod error;

pub use error::QueueError;

use std::fs::OpenOptions;
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Line-oriented queue of pending URLs backed by a text file.
///
/// A missing file is an empty queue, never an error; it is created on the
/// first append.
#[derive(Debug, Clone)]
pub struct QueueFile {
    path: PathBuf,
}

impl QueueFile {
    /// Creates a queue handle for the given file path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the underlying file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns all queued URLs in file order.
    ///
    /// Blank lines and surrounding whitespace are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Read`] if the file exists but cannot be read.
    pub fn load(&self) -> Result<Vec<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => Ok(parse_lines(&raw)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(QueueError::read(&self.path, err)),
        }
    }

    /// Returns the first queued URL, if any.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Read`] if the file exists but cannot be read.
    pub fn front(&self) -> Result<Option<String>> {
        Ok(self.load()?.into_iter().next())
    }

    /// Returns true when `url` has a queue entry.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Read`] if the file exists but cannot be read.
    pub fn contains(&self, url: &str) -> Result<bool> {
        Ok(self.load()?.iter().any(|queued| queued == url))
    }

    /// Appends URLs to the end of the queue, creating the file if needed.
    ///
    /// The file is opened in append mode, so a producer appending while the
    /// run loop holds the head cannot corrupt existing lines.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Write`] if the file cannot be opened or written.
    #[instrument(skip(self, urls), fields(queue = %self.path.display(), count = urls.len()))]
    pub fn append(&self, urls: &[String]) -> Result<()> {
        if urls.is_empty() {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| QueueError::write(&self.path, err))?;
        let mut block = String::new();
        for url in urls {
            block.push_str(url);
            block.push('\n');
        }
        file.write_all(block.as_bytes())
            .map_err(|err| QueueError::write(&self.path, err))?;
        debug!(count = urls.len(), "appended to queue");
        Ok(())
    }

    /// Removes the first queue entry matching `url`.
    ///
    /// The whole file is re-read inside the same open, then rewritten from
    /// the start: entries appended by a producer since the download began
    /// are re-read here and therefore preserved. Returns true when an entry
    /// was removed.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Read`] / [`QueueError::Write`] on IO failure.
    #[instrument(skip(self), fields(queue = %self.path.display(), url = %url))]
    pub fn remove(&self, url: &str) -> Result<bool> {
        let mut file = match OpenOptions::new().read(true).write(true).open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(QueueError::read(&self.path, err)),
        };

        let mut raw = String::new();
        file.read_to_string(&mut raw)
            .map_err(|err| QueueError::read(&self.path, err))?;

        let queued = parse_lines(&raw);
        let Some(index) = queued.iter().position(|entry| entry == url) else {
            return Ok(false);
        };

        let mut survivors = String::new();
        for (i, entry) in queued.iter().enumerate() {
            if i == index {
                continue;
            }
            survivors.push_str(entry);
            survivors.push('\n');
        }

        file.seek(SeekFrom::Start(0))
            .map_err(|err| QueueError::write(&self.path, err))?;
        file.set_len(0)
            .map_err(|err| QueueError::write(&self.path, err))?;
        file.write_all(survivors.as_bytes())
            .map_err(|err| QueueError::write(&self.path, err))?;

        debug!("removed from queue");
        Ok(true)
    }
}

/// Parses queue file content into URLs, skipping blank lines.
fn parse_lines(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
