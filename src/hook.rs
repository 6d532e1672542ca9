//! Post-download hook execution.
//!
//! On a successful download an optional shell command runs fire-and-forget:
//! the queue loop moves on immediately and a detached task reaps the child
//! and logs its exit status. Hook problems never affect download outcomes.

use std::path::Path;

use tokio::process::Command;
use tracing::{debug, info, warn};

/// Renders the hook command for a completed download.
///
/// `{url}` and `{path}` placeholders are substituted; when the template uses
/// neither, the single-quoted URL is appended as a final argument.
#[must_use]
pub fn render_command(template: &str, url: &str, path: &Path) -> String {
    let has_placeholder = template.contains("{url}") || template.contains("{path}");
    let rendered = template
        .replace("{url}", url)
        .replace("{path}", &path.display().to_string());
    if has_placeholder {
        rendered
    } else {
        format!("{rendered} {}", shell_quote(url))
    }
}

/// Spawns the post-download hook for `url`, fire-and-forget.
///
/// Spawn failures are logged at warn level and swallowed.
pub fn spawn_post_command(template: &str, url: &str, path: &Path) {
    let rendered = render_command(template, url, path);
    debug!(command = %rendered, "running post-download hook");

    let child = Command::new("sh").arg("-c").arg(&rendered).spawn();
    let mut child = match child {
        Ok(child) => child,
        Err(err) => {
            warn!(command = %rendered, error = %err, "failed to start post-download hook");
            return;
        }
    };

    // Reap the child off the queue loop so it never becomes a zombie.
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) if status.success() => {
                info!(command = %rendered, "post-download hook finished");
            }
            Ok(status) => {
                warn!(command = %rendered, code = ?status.code(), "post-download hook failed");
            }
            Err(err) => {
                warn!(command = %rendered, error = %err, "failed to wait for post-download hook");
            }
        }
    });
}

/// Wraps a value in single quotes for `sh -c`, escaping embedded quotes.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
