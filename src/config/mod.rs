//! Configuration loading: file config parsing, defaults, and path resolution.
//!
//! The config file is a flat `key = value` format (double-quoted strings,
//! integers, booleans, `#` comments). Unknown keys are rejected so typos
//! surface immediately instead of silently falling back to defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

/// Default retry limit (retries after the initial attempt).
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default empty-queue poll interval in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Io {
        /// The config file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A line did not match the `key = value` shape.
    #[error("invalid config syntax on line {line}: expected key = value")]
    Syntax {
        /// 1-indexed line number.
        line: usize,
    },

    /// A key was recognized but its value could not be parsed or is out of range.
    #[error("invalid `{key}` value on line {line}: {reason}")]
    Value {
        /// The config key.
        key: String,
        /// 1-indexed line number.
        line: usize,
        /// Why the value was rejected.
        reason: String,
    },

    /// The key is not part of the configuration schema.
    #[error("unknown configuration key '{key}' on line {line}")]
    UnknownKey {
        /// The unrecognized key.
        key: String,
        /// 1-indexed line number.
        line: usize,
    },

    /// An explicitly requested config file does not exist.
    #[error("config file '{path}' does not exist")]
    NotFound {
        /// The requested path.
        path: PathBuf,
    },

    /// `$HOME` is unset and a `~/` path or default location needs it.
    #[error("cannot resolve '~' paths: HOME is not set")]
    NoHome,
}

/// Supported config verbosity labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerbositySetting {
    /// Standard `info` level output.
    #[default]
    Default,
    /// `debug` level output.
    Verbose,
    /// Errors only.
    Quiet,
    /// `trace` level output.
    Debug,
}

impl VerbositySetting {
    /// Returns the stable string label for display output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Verbose => "verbose",
            Self::Quiet => "quiet",
            Self::Debug => "debug",
        }
    }
}

/// A per-domain credential entry.
///
/// The pattern is matched by substring against the URL host, so
/// `auth."example.com"` also covers `www.example.com`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEntry {
    /// Host substring this entry applies to.
    pub host_pattern: String,
    /// Username passed through to the downloader.
    pub username: String,
    /// Password passed through to the downloader.
    pub password: String,
}

/// Raw file configuration: every field optional, nothing resolved yet.
#[derive(Debug, Clone, Default)]
pub struct FileConfig {
    /// Destination directory for downloads.
    pub dest: Option<PathBuf>,
    /// Queue file path.
    pub queue: Option<PathBuf>,
    /// State file path (defaults to `<queue>.state`).
    pub state: Option<PathBuf>,
    /// Failure file path (defaults to `<queue>.failed`).
    pub failed: Option<PathBuf>,
    /// Retry limit.
    pub max_retries: Option<u32>,
    /// Empty-queue poll interval in seconds.
    pub poll_interval_secs: Option<u64>,
    /// Post-download shell command.
    pub post: Option<String>,
    /// Downloader binary override.
    pub curl_path: Option<PathBuf>,
    /// Extra passthrough arguments, whitespace-separated in the file.
    pub curl_args: Vec<String>,
    /// Per-domain credentials, in file order.
    pub auth: Vec<AuthEntry>,
    /// Default verbosity mode.
    pub verbosity: Option<VerbositySetting>,
}

/// Fully resolved configuration used by the engine and commands.
#[derive(Debug, Clone)]
pub struct Config {
    /// Destination directory for downloads.
    pub dest: PathBuf,
    /// Queue file path.
    pub queue: PathBuf,
    /// State file path.
    pub state: PathBuf,
    /// Failure file path.
    pub failed: PathBuf,
    /// Retries allowed after the initial attempt.
    pub max_retries: u32,
    /// Sleep between polls of an empty queue.
    pub poll_interval: Duration,
    /// Post-download shell command, if any.
    pub post: Option<String>,
    /// Downloader binary override; discovered on PATH when unset.
    pub curl_path: Option<PathBuf>,
    /// Extra passthrough arguments for the downloader.
    pub curl_args: Vec<String>,
    /// Per-domain credentials, in file order.
    pub auth: Vec<AuthEntry>,
    /// Verbosity from the config file (CLI flags and RUST_LOG win).
    pub verbosity: VerbositySetting,
}

impl Config {
    /// Loads configuration from `path` if given, otherwise from the default
    /// location, falling back to built-in defaults when no file exists.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] when an explicit `path` does not
    /// exist, and parse/validation errors for a malformed file.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(explicit) => {
                if !explicit.exists() {
                    return Err(ConfigError::NotFound {
                        path: explicit.to_path_buf(),
                    });
                }
                Some(read_file_config(explicit)?)
            }
            None => match default_config_path() {
                Some(default) if default.exists() => {
                    debug!(path = %default.display(), "loading config file");
                    Some(read_file_config(&default)?)
                }
                _ => None,
            },
        };

        Self::resolve(file)
    }

    /// Resolves a parsed file config (or none) against built-in defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoHome`] when a default or `~/` path cannot be
    /// expanded.
    pub fn resolve(file: Option<FileConfig>) -> Result<Self, ConfigError> {
        let file = file.unwrap_or_default();

        let queue = match file.queue {
            Some(path) => expand_tilde(&path)?,
            None => home_dir()?.join(".dqlist"),
        };
        let dest = match file.dest {
            Some(path) => expand_tilde(&path)?,
            None => home_dir()?.join("Downloads"),
        };
        let state = match file.state {
            Some(path) => expand_tilde(&path)?,
            None => sibling_with_suffix(&queue, "state"),
        };
        let failed = match file.failed {
            Some(path) => expand_tilde(&path)?,
            None => sibling_with_suffix(&queue, "failed"),
        };
        let curl_path = match file.curl_path {
            Some(path) => Some(expand_tilde(&path)?),
            None => None,
        };

        Ok(Self {
            dest,
            queue,
            state,
            failed,
            max_retries: file.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            poll_interval: Duration::from_secs(
                file.poll_interval_secs.unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
            ),
            post: file.post,
            curl_path,
            curl_args: file.curl_args,
            auth: file.auth,
            verbosity: file.verbosity.unwrap_or_default(),
        })
    }
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/dq/config.toml`
/// 2. `$HOME/.config/dq/config.toml`
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join("dq").join("config.toml"));
    }

    let home = env_var_non_empty("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("dq")
            .join("config.toml"),
    )
}

fn env_var_non_empty(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

fn home_dir() -> Result<PathBuf, ConfigError> {
    env_var_non_empty("HOME")
        .map(PathBuf::from)
        .ok_or(ConfigError::NoHome)
}

/// Expands a leading `~` or `~/` against `$HOME`; other paths pass through.
fn expand_tilde(path: &Path) -> Result<PathBuf, ConfigError> {
    let Some(text) = path.to_str() else {
        return Ok(path.to_path_buf());
    };
    if text == "~" {
        return home_dir();
    }
    if let Some(rest) = text.strip_prefix("~/") {
        return Ok(home_dir()?.join(rest));
    }
    Ok(path.to_path_buf())
}

/// Appends a suffix to a path's final component: `~/.dqlist` → `~/.dqlist.state`.
fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map_or_else(
        || std::ffi::OsString::from("dqlist"),
        std::ffi::OsStr::to_os_string,
    );
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config_str(&raw)
}

/// Parses the flat `key = value` config format.
///
/// # Errors
///
/// Returns a [`ConfigError`] naming the offending line for syntax errors,
/// bad values, and unknown keys.
pub fn parse_config_str(raw: &str) -> Result<FileConfig, ConfigError> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line_no = line_index + 1;
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            return Err(ConfigError::Syntax { line: line_no });
        };

        let key = raw_key.trim();
        let value = raw_value.trim();

        match key {
            "dest" => cfg.dest = Some(PathBuf::from(parse_string("dest", value, line_no)?)),
            "queue" => cfg.queue = Some(PathBuf::from(parse_string("queue", value, line_no)?)),
            "state" => cfg.state = Some(PathBuf::from(parse_string("state", value, line_no)?)),
            "failed" => cfg.failed = Some(PathBuf::from(parse_string("failed", value, line_no)?)),
            "max_retries" => {
                let parsed = parse_integer("max_retries", value, line_no)?;
                let parsed = u32::try_from(parsed).map_err(|_| value_error(
                    "max_retries",
                    line_no,
                    "out of range",
                ))?;
                if parsed > 100 {
                    return Err(value_error("max_retries", line_no, "expected range 0..=100"));
                }
                cfg.max_retries = Some(parsed);
            }
            "poll_interval_secs" => {
                let parsed = parse_integer("poll_interval_secs", value, line_no)?;
                if !(1..=86_400).contains(&parsed) {
                    return Err(value_error(
                        "poll_interval_secs",
                        line_no,
                        "expected range 1..=86400",
                    ));
                }
                cfg.poll_interval_secs = Some(parsed);
            }
            "post" => cfg.post = Some(parse_string("post", value, line_no)?),
            "curl_path" => {
                cfg.curl_path = Some(PathBuf::from(parse_string("curl_path", value, line_no)?));
            }
            "curl_args" => {
                let parsed = parse_string("curl_args", value, line_no)?;
                cfg.curl_args = parsed.split_whitespace().map(str::to_string).collect();
            }
            "verbosity" => {
                let parsed = parse_string("verbosity", value, line_no)?;
                cfg.verbosity = Some(parse_verbosity(&parsed, line_no)?);
            }
            _ => {
                if let Some(host_pattern) = parse_auth_key(key) {
                    let credentials = parse_string("auth", value, line_no)?;
                    cfg.auth.push(parse_auth_entry(&host_pattern, &credentials, line_no)?);
                } else {
                    return Err(ConfigError::UnknownKey {
                        key: key.to_string(),
                        line: line_no,
                    });
                }
            }
        }
    }
    Ok(cfg)
}

/// Extracts the host pattern from an `auth.<host>` or `auth."<host>"` key.
fn parse_auth_key(key: &str) -> Option<String> {
    let rest = key.strip_prefix("auth.")?;
    let rest = rest.trim();
    let host = rest
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(rest);
    if host.is_empty() {
        return None;
    }
    Some(host.to_string())
}

/// Splits a `"username password"` credential value on its first whitespace.
fn parse_auth_entry(
    host_pattern: &str,
    credentials: &str,
    line: usize,
) -> Result<AuthEntry, ConfigError> {
    let Some((username, password)) = credentials.split_once(char::is_whitespace) else {
        return Err(value_error(
            "auth",
            line,
            "expected \"username password\"",
        ));
    };
    let username = username.trim();
    let password = password.trim();
    if username.is_empty() || password.is_empty() {
        return Err(value_error(
            "auth",
            line,
            "expected \"username password\"",
        ));
    }
    Ok(AuthEntry {
        host_pattern: host_pattern.to_string(),
        username: username.to_string(),
        password: password.to_string(),
    })
}

fn value_error(key: &str, line: usize, reason: &str) -> ConfigError {
    ConfigError::Value {
        key: key.to_string(),
        line,
        reason: reason.to_string(),
    }
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string(key: &str, raw_value: &str, line: usize) -> Result<String, ConfigError> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        return Err(value_error(key, line, "expected double-quoted string"));
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer(key: &str, raw_value: &str, line: usize) -> Result<u64, ConfigError> {
    let token = raw_value.trim();
    if token.is_empty() {
        return Err(value_error(key, line, "expected integer value"));
    }
    token
        .parse::<u64>()
        .map_err(|_| value_error(key, line, "expected non-negative integer"))
}

fn parse_verbosity(value: &str, line: usize) -> Result<VerbositySetting, ConfigError> {
    match value {
        "default" => Ok(VerbositySetting::Default),
        "verbose" => Ok(VerbositySetting::Verbose),
        "quiet" => Ok(VerbositySetting::Quiet),
        "debug" => Ok(VerbositySetting::Debug),
        _ => Err(value_error(
            "verbosity",
            line,
            "expected one of: default, verbose, quiet, debug",
        )),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_partial_fields() {
        let cfg = parse_config_str(
            r#"
max_retries = 5
verbosity = "verbose"
"#,
        )
        .expect("partial config should parse");
        assert_eq!(cfg.max_retries, Some(5));
        assert_eq!(cfg.verbosity, Some(VerbositySetting::Verbose));
        assert!(cfg.dest.is_none());
        assert!(cfg.queue.is_none());
    }

    #[test]
    fn test_parse_config_paths_and_post() {
        let cfg = parse_config_str(
            r#"
dest = "/data/incoming"
queue = "/data/queue.txt"
post = "notify-send 'done: {url}'"
"#,
        )
        .expect("config should parse");
        assert_eq!(cfg.dest, Some(PathBuf::from("/data/incoming")));
        assert_eq!(cfg.queue, Some(PathBuf::from("/data/queue.txt")));
        assert_eq!(cfg.post.as_deref(), Some("notify-send 'done: {url}'"));
    }

    #[test]
    fn test_parse_config_supports_inline_comments() {
        let cfg = parse_config_str(
            r#"
max_retries = 4 # tries
curl_args = "--limit-rate 500k" # passthrough
"#,
        )
        .expect("config with comments should parse");
        assert_eq!(cfg.max_retries, Some(4));
        assert_eq!(
            cfg.curl_args,
            vec!["--limit-rate".to_string(), "500k".to_string()]
        );
    }

    #[test]
    fn test_parse_config_hash_inside_string_is_not_a_comment() {
        let cfg = parse_config_str(r##"post = "echo '#done'""##).expect("should parse");
        assert_eq!(cfg.post.as_deref(), Some("echo '#done'"));
    }

    #[test]
    fn test_parse_config_auth_entries_keep_file_order() {
        let cfg = parse_config_str(
            r#"
auth."example.com" = "alice s3cret"
auth.internal = "bob hunter2"
"#,
        )
        .expect("auth entries should parse");
        assert_eq!(cfg.auth.len(), 2);
        assert_eq!(cfg.auth[0].host_pattern, "example.com");
        assert_eq!(cfg.auth[0].username, "alice");
        assert_eq!(cfg.auth[0].password, "s3cret");
        assert_eq!(cfg.auth[1].host_pattern, "internal");
    }

    #[test]
    fn test_parse_config_auth_password_may_contain_spaces() {
        let cfg = parse_config_str(r#"auth."example.com" = "alice pass with spaces""#)
            .expect("should parse");
        assert_eq!(cfg.auth[0].password, "pass with spaces");
    }

    #[test]
    fn test_parse_config_rejects_auth_without_password() {
        let err = parse_config_str(r#"auth."example.com" = "alice""#)
            .expect_err("missing password should be rejected");
        assert!(err.to_string().contains("username password"));
    }

    #[test]
    fn test_parse_config_rejects_unknown_keys() {
        let err = parse_config_str("unknown_key = 123").expect_err("unknown key error expected");
        assert!(err.to_string().contains("unknown configuration key"));
        assert!(err.to_string().contains("unknown_key"));
    }

    #[test]
    fn test_parse_config_rejects_missing_equals() {
        let err = parse_config_str("just a line").expect_err("syntax error expected");
        assert!(matches!(err, ConfigError::Syntax { line: 1 }));
    }

    #[test]
    fn test_parse_config_rejects_unquoted_string() {
        let err = parse_config_str("dest = /tmp").expect_err("unquoted string rejected");
        assert!(err.to_string().contains("double-quoted"));
    }

    #[test]
    fn test_parse_config_rejects_out_of_range_max_retries() {
        let err = parse_config_str("max_retries = 101").expect_err("range error expected");
        assert!(err.to_string().contains("max_retries"));
    }

    #[test]
    fn test_parse_config_rejects_zero_poll_interval() {
        let err = parse_config_str("poll_interval_secs = 0").expect_err("range error expected");
        assert!(err.to_string().contains("poll_interval_secs"));
    }

    #[test]
    fn test_parse_config_rejects_invalid_verbosity() {
        let err = parse_config_str(r#"verbosity = "loud""#).expect_err("invalid verbosity");
        assert!(err.to_string().contains("verbosity"));
    }

    #[test]
    fn test_verbosity_as_str() {
        assert_eq!(VerbositySetting::Default.as_str(), "default");
        assert_eq!(VerbositySetting::Verbose.as_str(), "verbose");
        assert_eq!(VerbositySetting::Quiet.as_str(), "quiet");
        assert_eq!(VerbositySetting::Debug.as_str(), "debug");
    }

    #[test]
    fn test_resolve_defaults_derive_state_and_failed_from_queue() {
        let file = FileConfig {
            queue: Some(PathBuf::from("/data/urls.txt")),
            ..FileConfig::default()
        };
        let cfg = Config::resolve(Some(file)).unwrap();
        assert_eq!(cfg.queue, PathBuf::from("/data/urls.txt"));
        assert_eq!(cfg.state, PathBuf::from("/data/urls.txt.state"));
        assert_eq!(cfg.failed, PathBuf::from("/data/urls.txt.failed"));
        assert_eq!(cfg.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(
            cfg.poll_interval,
            Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS)
        );
    }

    #[test]
    fn test_resolve_explicit_state_and_failed_win_over_derived() {
        let file = FileConfig {
            queue: Some(PathBuf::from("/data/urls.txt")),
            state: Some(PathBuf::from("/elsewhere/dq.state")),
            failed: Some(PathBuf::from("/elsewhere/dq.failed")),
            ..FileConfig::default()
        };
        let cfg = Config::resolve(Some(file)).unwrap();
        assert_eq!(cfg.state, PathBuf::from("/elsewhere/dq.state"));
        assert_eq!(cfg.failed, PathBuf::from("/elsewhere/dq.failed"));
    }

    #[test]
    fn test_load_explicit_missing_path_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/dq-config.toml")))
            .expect_err("missing explicit config should error");
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn test_load_explicit_path_parses_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
queue = "/data/urls.txt"
dest = "/data/incoming"
max_retries = 7
"#,
        )
        .unwrap();
        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.queue, PathBuf::from("/data/urls.txt"));
        assert_eq!(cfg.dest, PathBuf::from("/data/incoming"));
        assert_eq!(cfg.max_retries, 7);
    }

    #[test]
    fn test_sibling_with_suffix_appends_to_final_component() {
        assert_eq!(
            sibling_with_suffix(Path::new("/home/u/.dqlist"), "state"),
            PathBuf::from("/home/u/.dqlist.state")
        );
    }
}
