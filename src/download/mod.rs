//! External downloader invocation.
//!
//! All transfers are delegated to cURL; this module builds the command
//! line (resume flags, credentials, passthrough arguments), resolves the
//! destination filename, and interprets the child's exit status.

mod curl;
mod error;
mod filename;

pub use curl::{CurlDownloader, Downloader};
pub use error::{CURL_RANGE_ERROR, FetchError, describe_curl_exit};
pub use filename::resolve_filename;
