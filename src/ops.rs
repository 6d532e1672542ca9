//! High-level operations behind the CLI commands.
//!
//! `add` and `list` are thin, but they own the cross-file invariant: a URL
//! lives in at most one of {queue, failure file}, so enqueueing a
//! previously-failed URL clears its failure entry and attempt count.

use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::config::Config;
use crate::failure::{FailureLog, FailureLogError};
use crate::queue::{QueueError, QueueFile};
use crate::state::{StateError, StateStore};

/// URL schemes the external downloader is expected to handle.
const ACCEPTED_SCHEMES: &[&str] = &["http", "https", "ftp", "ftps"];

/// Errors from queue-manipulation operations.
#[derive(Debug, Error)]
pub enum OpsError {
    /// One or more inputs were not downloadable URLs; nothing was enqueued.
    #[error(
        "not downloadable URLs: {}\n  Suggestion: URLs must start with http://, https://, ftp://, or ftps://",
        urls.join(", ")
    )]
    InvalidUrls {
        /// The rejected inputs.
        urls: Vec<String>,
    },

    /// Queue file operation failed.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// State file operation failed.
    #[error(transparent)]
    State(#[from] StateError),

    /// Failure file operation failed.
    #[error(transparent)]
    Failure(#[from] FailureLogError),
}

/// Result of an `add` operation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AddOutcome {
    /// URLs appended to the queue, in input order.
    pub added: Vec<String>,
    /// Inputs skipped because the URL is already queued (or repeated in the
    /// same invocation).
    pub skipped: Vec<String>,
    /// URLs that had a failure file entry cleared, i.e. explicit retries.
    pub retried: Vec<String>,
}

/// A read-only view of the queue for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSnapshot {
    /// Queued URLs in download order.
    pub queued: Vec<String>,
    /// URL currently being downloaded by a running consumer, if any.
    pub current: Option<String>,
}

/// Validates and appends URLs to the queue.
///
/// All-or-nothing on validation: when any input is rejected, nothing is
/// enqueued. Re-adding a URL from the failure file removes it there and
/// resets its attempt count; URLs already queued are skipped.
///
/// # Errors
///
/// Returns [`OpsError::InvalidUrls`] listing every rejected input, or a file
/// store error.
pub fn add_urls(config: &Config, urls: &[String]) -> Result<AddOutcome, OpsError> {
    let invalid: Vec<String> = urls
        .iter()
        .filter(|url| !is_downloadable_url(url))
        .cloned()
        .collect();
    if !invalid.is_empty() {
        return Err(OpsError::InvalidUrls { urls: invalid });
    }

    let queue = QueueFile::new(&config.queue);
    let failures = FailureLog::new(&config.failed);
    let state = StateStore::new(&config.state);

    let mut outcome = AddOutcome::default();
    for url in urls {
        if outcome.added.contains(url) || queue.contains(url)? {
            debug!(url = %url, "already queued, skipping");
            outcome.skipped.push(url.clone());
            continue;
        }
        if failures.remove(url)? {
            state.clear_attempts(url)?;
            info!(url = %url, "cleared failure entry for retry");
            outcome.retried.push(url.clone());
        }
        outcome.added.push(url.clone());
    }

    queue.append(&outcome.added)?;
    Ok(outcome)
}

/// Returns the queue contents plus the in-flight URL.
///
/// # Errors
///
/// Returns a file store error when the queue or state file is unreadable.
pub fn queue_snapshot(config: &Config) -> Result<QueueSnapshot, OpsError> {
    let queued = QueueFile::new(&config.queue).load()?;
    let current = StateStore::new(&config.state).current()?;
    Ok(QueueSnapshot { queued, current })
}

/// Returns the failure file contents.
///
/// # Errors
///
/// Returns a file store error when the failure file is unreadable.
pub fn failed_urls(config: &Config) -> Result<Vec<String>, OpsError> {
    Ok(FailureLog::new(&config.failed).list()?)
}

/// Returns true when the input parses as a URL with an accepted scheme.
fn is_downloadable_url(input: &str) -> bool {
    Url::parse(input)
        .map(|url| ACCEPTED_SCHEMES.contains(&url.scheme()))
        .unwrap_or(false)
}
