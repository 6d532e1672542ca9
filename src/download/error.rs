//! Error types for downloader invocation.

use std::path::PathBuf;

use thiserror::Error;

/// cURL exit code for "the server does not support ranges": a resume was
/// requested against a server that cannot honor it.
pub const CURL_RANGE_ERROR: i32 = 33;

/// Errors that can occur while running the external downloader.
#[derive(Debug, Error)]
pub enum FetchError {
    /// No downloader binary could be found.
    #[error("downloader '{name}' not found in PATH\n  Suggestion: install cURL or set `curl_path` in the config")]
    DownloaderNotFound {
        /// The binary name that was searched for.
        name: String,
    },

    /// The downloader process could not be started.
    #[error("failed to run '{program}': {source}")]
    Spawn {
        /// The program that failed to start.
        program: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The downloader exited with a non-zero code.
    #[error("download failed for {url}: curl exited with code {code} ({description})")]
    ExitCode {
        /// The URL that failed to download.
        url: String,
        /// The child's exit code.
        code: i32,
        /// Human-readable description of the code.
        description: &'static str,
    },

    /// The downloader was terminated by a signal.
    #[error("download terminated by signal for {url}")]
    Terminated {
        /// The URL whose download was interrupted.
        url: String,
    },

    /// The destination directory could not be created.
    #[error("failed to create destination directory '{path}': {source}")]
    DestDir {
        /// The directory path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    /// Creates an exit-code error, attaching the known-code description.
    pub fn exit_code(url: impl Into<String>, code: i32) -> Self {
        Self::ExitCode {
            url: url.into(),
            code,
            description: describe_curl_exit(code),
        }
    }

    /// Creates a spawn error for `program`.
    pub fn spawn(program: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            source,
        }
    }
}

/// Describes the well-known cURL exit codes that show up in queue runs.
#[must_use]
pub fn describe_curl_exit(code: i32) -> &'static str {
    match code {
        1 => "unsupported protocol",
        3 => "malformed URL",
        5 => "could not resolve proxy",
        6 => "could not resolve host",
        7 => "failed to connect",
        18 => "partial transfer",
        22 => "HTTP error response",
        23 => "write error",
        28 => "operation timed out",
        CURL_RANGE_ERROR => "server does not support ranges",
        35 => "TLS handshake failed",
        47 => "too many redirects",
        56 => "network receive failure",
        60 => "TLS certificate verification failed",
        67 => "login denied",
        78 => "remote file not found",
        _ => "see curl(1) for this exit code",
    }
}
