//! Destination filename resolution for downloads.
//!
//! Resume only works when the same URL always maps to the same destination
//! name, so resolution here is deterministic for anything the server or URL
//! names: a `Content-Disposition` filename from the HEAD probe wins, then
//! the last URL path segment, and only anonymous URLs fall back to a random
//! name.

use std::path::Path;
use std::sync::OnceLock;

use rand::Rng;
use rand::distributions::Alphanumeric;
use regex::Regex;
use tracing::debug;
use url::Url;

/// Length of the random fallback name suffix.
const RANDOM_NAME_LEN: usize = 20;

/// Resolves the destination filename for `url`.
///
/// `head_output` is the raw header block captured from the `-Is` probe, if
/// the probe succeeded.
#[must_use]
pub fn resolve_filename(url: &str, head_output: Option<&str>) -> String {
    if let Some(headers) = head_output
        && let Some(name) = filename_from_headers(headers)
    {
        debug!(filename = %name, "got filename from headers");
        return name;
    }

    if let Some(name) = filename_from_url(url) {
        debug!(filename = %name, "got filename from URL");
        return name;
    }

    let name = random_filename();
    debug!(filename = %name, "using random filename");
    name
}

/// Extracts a filename from a raw HTTP header block's `Content-Disposition`.
fn filename_from_headers(headers: &str) -> Option<String> {
    static DISPOSITION: OnceLock<Regex> = OnceLock::new();
    let re = DISPOSITION.get_or_init(|| {
        #[allow(clippy::expect_used)] // literal pattern, cannot fail at runtime
        let re = Regex::new(r"(?im)^content-disposition:\s*(.+?)\s*$")
            .expect("static header pattern");
        re
    });

    // With --location-trusted the probe may contain several responses; the
    // final one describes the payload.
    let value = re
        .captures_iter(headers)
        .last()
        .and_then(|captures| captures.get(1))?
        .as_str();
    let name = parse_content_disposition(value)?;

    // Strip any path components a hostile header might smuggle in.
    let base = Path::new(&name)
        .file_name()
        .map(|os| os.to_string_lossy().into_owned())?;
    let sanitized = sanitize_filename(&base);
    (!sanitized.trim_matches('_').is_empty()).then_some(sanitized)
}

/// Parses a Content-Disposition header value to extract a filename.
///
/// Handles:
/// - `attachment; filename="example.iso"`
/// - `attachment; filename=example.iso`
/// - `attachment; filename*=UTF-8''example.iso` (RFC 5987)
fn parse_content_disposition(header: &str) -> Option<String> {
    // Try filename*= first (RFC 5987 encoded)
    if let Some(pos) = header.find("filename*=") {
        let value = header[pos + 10..].trim();
        // Format: charset'language'encoded_value
        if let Some(quote_pos) = value.find("''") {
            let encoded = &value[quote_pos + 2..];
            let end = encoded.find(';').unwrap_or(encoded.len());
            let encoded_name = encoded[..end].trim();
            if let Ok(decoded) = urlencoding::decode(encoded_name) {
                return Some(decoded.into_owned());
            }
        }
    }

    // Try regular filename=
    if let Some(pos) = header.find("filename=") {
        let value = header[pos + 9..].trim();

        if let Some(stripped) = value.strip_prefix('"') {
            if let Some(end) = stripped.find('"') {
                return Some(stripped[..end].to_string());
            }
        } else {
            let end = value.find(';').unwrap_or(value.len());
            let filename = value[..end].trim();
            if !filename.is_empty() {
                return Some(filename.to_string());
            }
        }
    }

    None
}

/// Derives a filename from the last segment of the URL path.
fn filename_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last_segment = parsed.path_segments()?.filter(|s| !s.is_empty()).next_back()?;
    let decoded = urlencoding::decode(last_segment)
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| last_segment.to_string());
    let sanitized = sanitize_filename(&decoded);
    (!sanitized.trim_matches('_').is_empty()).then_some(sanitized)
}

/// Nonsense fallback for URLs with no usable name anywhere.
fn random_filename() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RANDOM_NAME_LEN)
        .map(char::from)
        .collect();
    format!("download-{suffix}")
}

/// Sanitizes a filename for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems
/// (`/ \ : * ? " < > |` and control characters) with `_`.
fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    // Dot-only names would resolve to the directory itself.
    if sanitized.chars().all(|c| c == '.') {
        return "_".to_string();
    }
    sanitized
}
