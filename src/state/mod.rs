//! Persisted download state: per-URL attempt counts and the in-flight URL.
//!
//! The state file is a small JSON document next to the queue file. Attempt
//! counts survive process restarts so a URL that keeps failing across
//! sessions still runs out of retries; `current` lets external observers
//! (such as the web wrapper) see which URL is downloading right now.
//!
//! A missing state file is an empty state. A malformed one is logged and
//! treated as empty rather than blocking the queue.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors produced by state persistence.
#[derive(Debug, Error)]
pub enum StateError {
    /// I/O error reading or writing the state file.
    #[error("I/O error on state file: {0}")]
    Io(#[from] std::io::Error),
    /// JSON serialization error (shouldn't occur for well-formed state).
    #[error("JSON serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result type for state operations.
pub type Result<T> = std::result::Result<T, StateError>;

/// The persisted state document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// URL currently being downloaded, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<String>,
    /// Failed-attempt count per URL.
    #[serde(default)]
    pub attempts: HashMap<String, u32>,
}

/// File-backed store for [`State`].
///
/// Every operation is a read-modify-write of the whole document; the file is
/// small (one entry per troubled URL) and this keeps counts durable across
/// crashes mid-queue.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Creates a state store for the given file path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the underlying file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the state document.
    ///
    /// A missing file yields the default state. A file that fails to parse
    /// is logged and also yields the default state, resetting attempt
    /// counts rather than wedging the queue.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the file exists but cannot be read.
    pub fn load(&self) -> Result<State> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(State::default()),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_str(&raw) {
            Ok(state) => Ok(state),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "malformed state file, starting fresh");
                Ok(State::default())
            }
        }
    }

    /// Writes the state document, via a temp file renamed into place so a
    /// crash mid-write cannot leave a truncated document.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] on I/O or serialization failure.
    pub fn save(&self, state: &State) -> Result<()> {
        let tmp = temp_path(&self.path);
        let serialized = serde_json::to_vec_pretty(state)?;
        if let Err(err) = fs::write(&tmp, &serialized) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        if let Err(err) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        Ok(())
    }

    /// Returns the recorded attempt count for `url` (0 when unknown).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the file exists but cannot be read.
    pub fn attempts(&self, url: &str) -> Result<u32> {
        Ok(self.load()?.attempts.get(url).copied().unwrap_or(0))
    }

    /// Increments and persists the attempt count for `url`, returning the
    /// new count.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] on I/O or serialization failure.
    pub fn record_failure(&self, url: &str) -> Result<u32> {
        let mut state = self.load()?;
        let count = state.attempts.entry(url.to_string()).or_insert(0);
        *count += 1;
        let count = *count;
        self.save(&state)?;
        debug!(url = %url, attempts = count, "recorded failed attempt");
        Ok(count)
    }

    /// Removes the attempt count for `url`, if present.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] on I/O or serialization failure.
    pub fn clear_attempts(&self, url: &str) -> Result<()> {
        let mut state = self.load()?;
        if state.attempts.remove(url).is_some() {
            self.save(&state)?;
        }
        Ok(())
    }

    /// Returns the URL currently marked as downloading.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the file exists but cannot be read.
    pub fn current(&self) -> Result<Option<String>> {
        Ok(self.load()?.current)
    }

    /// Records `url` as the in-flight download.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] on I/O or serialization failure.
    pub fn set_current(&self, url: &str) -> Result<()> {
        let mut state = self.load()?;
        state.current = Some(url.to_string());
        self.save(&state)
    }

    /// Clears the in-flight marker.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] on I/O or serialization failure.
    pub fn clear_current(&self) -> Result<()> {
        let mut state = self.load()?;
        if state.current.take().is_some() {
            self.save(&state)?;
        }
        Ok(())
    }
}

/// Sibling temp path for atomic replacement: `.dqlist.state` → `.dqlist.state.tmp`.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map_or_else(
        || std::ffi::OsString::from("state"),
        std::ffi::OsStr::to_os_string,
    );
    name.push(".tmp");
    path.with_file_name(name)
}
