//! cURL invocation: command construction, resume handling, credentials.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::{AuthEntry, Config};

use super::error::{CURL_RANGE_ERROR, FetchError};
use super::filename::resolve_filename;

/// Arguments every transfer starts from.
///
/// `--location-trusted` follows redirects (re-sending credentials to the
/// redirect target); `--fail` turns HTTP error responses into non-zero exit
/// codes, which is the only success signal this tool reads.
const CURL_BASE: &[&str] = &["--location-trusted", "--fail"];

/// An external download command.
///
/// The engine only depends on this trait, so tests can substitute a
/// scripted fake for the real cURL process.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Fetches `url` into `dest_dir`, returning the destination path.
    ///
    /// Success and failure are determined by the external process's exit
    /// status; a returned path does not imply any content validation.
    async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<PathBuf, FetchError>;
}

/// cURL-backed [`Downloader`].
pub struct CurlDownloader {
    binary: PathBuf,
    extra_args: Vec<String>,
    auth: Vec<AuthEntry>,
}

impl CurlDownloader {
    /// Creates a downloader with an explicit binary path.
    #[must_use]
    pub fn new(binary: PathBuf, extra_args: Vec<String>, auth: Vec<AuthEntry>) -> Self {
        Self {
            binary,
            extra_args,
            auth,
        }
    }

    /// Builds a downloader from config: `curl_path` when set, otherwise
    /// `curl` discovered in PATH. A bare `curl_path` name is also resolved
    /// through PATH, so a missing downloader surfaces before the queue is
    /// touched.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::DownloaderNotFound`] when no binary can be found.
    pub fn from_config(config: &Config) -> Result<Self, FetchError> {
        let binary = match &config.curl_path {
            Some(path) => resolve_binary(path)?,
            None => which::which("curl").map_err(|_| FetchError::DownloaderNotFound {
                name: "curl".to_string(),
            })?,
        };
        debug!(binary = %binary.display(), "using downloader");
        Ok(Self::new(
            binary,
            config.curl_args.clone(),
            config.auth.clone(),
        ))
    }

    /// Returns extra cURL arguments authenticating `url`, or none.
    ///
    /// The first credential entry whose host pattern is a substring of the
    /// URL's host wins; entries keep config file order.
    fn auth_args(&self, url: &str) -> Vec<String> {
        let Some(host) = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
        else {
            return Vec::new();
        };

        for entry in &self.auth {
            if host.contains(&entry.host_pattern) {
                debug!(host = %host, pattern = %entry.host_pattern, "matched credentials");
                return vec![
                    "-u".to_string(),
                    format!("{}:{}", entry.username, entry.password),
                ];
            }
        }
        Vec::new()
    }

    /// Sends a HEAD probe and returns the raw header block, if it succeeds.
    ///
    /// Probe failures are never fatal; the filename falls back to the URL.
    async fn probe_headers(&self, url: &str) -> Option<String> {
        let mut command = Command::new(&self.binary);
        command.args(CURL_BASE).arg("-Is");
        command.args(self.auth_args(url));
        command.arg(url);

        match command.output().await {
            Ok(output) if output.status.success() => {
                Some(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            Ok(output) => {
                debug!(status = ?output.status.code(), "HEAD probe failed, falling back to URL filename");
                None
            }
            Err(err) => {
                debug!(error = %err, "HEAD probe could not run");
                None
            }
        }
    }

    /// Builds the transfer argument list.
    fn transfer_args(&self, url: &str, dest: &Path, resume: bool) -> Vec<std::ffi::OsString> {
        let mut args: Vec<std::ffi::OsString> = CURL_BASE.iter().map(Into::into).collect();
        args.push("-o".into());
        args.push(dest.as_os_str().to_os_string());
        for arg in self.auth_args(url) {
            args.push(arg.into());
        }
        if resume {
            args.push("-C".into());
            args.push("-".into());
        }
        for arg in &self.extra_args {
            args.push(arg.into());
        }
        args.push(url.into());
        args
    }
}

/// Resolves a configured downloader path: explicit paths pass through,
/// bare names go through PATH lookup.
fn resolve_binary(path: &Path) -> Result<PathBuf, FetchError> {
    if path.components().count() > 1 {
        return Ok(path.to_path_buf());
    }
    which::which(path).map_err(|_| FetchError::DownloaderNotFound {
        name: path.display().to_string(),
    })
}

#[async_trait]
impl Downloader for CurlDownloader {
    #[instrument(skip(self, dest_dir), fields(url = %url))]
    async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<PathBuf, FetchError> {
        if !dest_dir.exists() {
            std::fs::create_dir_all(dest_dir).map_err(|err| FetchError::DestDir {
                path: dest_dir.to_path_buf(),
                source: err,
            })?;
        }

        let headers = self.probe_headers(url).await;
        let filename = resolve_filename(url, headers.as_deref());
        let dest = dest_dir.join(filename);

        // Try to resume a partial file from an earlier attempt.
        let mut resume = dest.exists();
        loop {
            if resume {
                info!(dest = %dest.display(), "resuming existing file");
            }
            let status = Command::new(&self.binary)
                .args(self.transfer_args(url, &dest, resume))
                .status()
                .await
                .map_err(|err| FetchError::spawn(&self.binary, err))?;

            match status.code() {
                Some(0) => return Ok(dest),
                Some(CURL_RANGE_ERROR) if resume => {
                    // Server cannot serve ranges: restart from scratch, once.
                    warn!("resume failed; starting over");
                    resume = false;
                }
                Some(code) => return Err(FetchError::exit_code(url, code)),
                None => return Err(FetchError::Terminated {
                    url: url.to_string(),
                }),
            }
        }
    }
}
