use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;
use uuid::Uuid;

use crate::inspector::find_first_top_level_pipe;
use crate::quoting::{self, Dialect};

/// Prefix for capture file names in the platform temp directory.
pub const DEFAULT_FILE_PREFIX: &str = "autotee";

/// Lines shown by the truncation stage on the no-pipe branch.
pub const DEFAULT_TRUNCATE_LINES: usize = 100;

/// Shell variable the rewritten command binds the capture path to.
const CAPTURE_VAR: &str = "TMPFILE";

/// Announcement line prefix. Downstream parsing anchors on this exact text.
pub const ANNOUNCE_PREFIX: &str = "Full output saved to:";

#[derive(Debug, Clone)]
pub struct RewrittenCommand {
    pub text: String,
    pub capture_path: PathBuf,
}

/// Transforms an accepted command so its full first-stage output is teed to a
/// fresh capture file while every later stage still sees identical input.
pub struct Rewriter {
    file_prefix: String,
    truncate_lines: usize,
}

impl Rewriter {
    pub fn new() -> Self {
        Self {
            file_prefix: DEFAULT_FILE_PREFIX.to_string(),
            truncate_lines: DEFAULT_TRUNCATE_LINES,
        }
    }

    pub fn with_options(file_prefix: &str, truncate_lines: usize) -> Self {
        Self {
            file_prefix: file_prefix.to_string(),
            truncate_lines,
        }
    }

    /// Fresh capture path: `{temp dir}/{prefix}-{uuid}.log`. A random UUID
    /// keeps concurrent rewrites collision-free without coordination.
    pub fn capture_path(&self) -> PathBuf {
        env::temp_dir().join(format!("{}-{}.log", self.file_prefix, Uuid::new_v4()))
    }

    /// Rewrite `command`, splitting at its first top-level pipe. Only call
    /// after the policy accepted; the transform itself never refuses.
    pub fn rewrite(&self, command: &str) -> RewrittenCommand {
        let capture_path = self.capture_path();
        let text = match find_first_top_level_pipe(command) {
            Some(idx) => self.rewrite_pipeline(command, idx, &capture_path),
            // The policy normally guarantees a pipe exists; if the facts and
            // the text disagree, fall back to capturing the whole command.
            None => self.rewrite_plain(command, &capture_path),
        };
        debug!(capture = %capture_path.display(), "command rewritten");
        RewrittenCommand { text, capture_path }
    }

    fn rewrite_pipeline(&self, command: &str, pipe_idx: usize, capture: &Path) -> String {
        let before = strip_stderr_merge(command[..pipe_idx].trim());
        let after = command[pipe_idx + 1..].trim();
        format!(
            "{var}={path}\n{before} 2>&1 | tee \"${var}\" | {after}\necho \"\"\necho \"{announce} ${var}\"",
            var = CAPTURE_VAR,
            path = quote_capture_path(capture),
            before = before,
            after = after,
            announce = ANNOUNCE_PREFIX,
        )
    }

    /// Legacy no-pipe branch: tee, then a default truncation stage so the
    /// caller still sees a bounded view.
    fn rewrite_plain(&self, command: &str, capture: &Path) -> String {
        let cleaned = strip_stderr_merge(command.trim());
        format!(
            "{var}={path}\n{cmd} 2>&1 | tee \"${var}\" | head -{lines}\necho \"\"\necho \"{announce} ${var}\"",
            var = CAPTURE_VAR,
            path = quote_capture_path(capture),
            cmd = cleaned,
            lines = self.truncate_lines,
            announce = ANNOUNCE_PREFIX,
        )
    }
}

impl Default for Rewriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop a trailing `2>&1` so the rewrite does not emit the merge twice.
/// The leading space is required: an argument word that merely ends in
/// `2>&1` (an fd redirection glued to a word like `file2`) must stay intact.
fn strip_stderr_merge(command: &str) -> &str {
    command
        .strip_suffix(" 2>&1")
        .map(str::trim_end)
        .unwrap_or(command)
}

fn quote_capture_path(path: &Path) -> String {
    let raw = path.to_string_lossy();
    match quoting::quote(&raw, Dialect::Bash) {
        Ok(quoted) => quoted,
        // Unreachable for a generated temp path, but never crash the hook.
        Err(_) => format!("\"{raw}\""),
    }
}

/// True when `path` looks like one of our capture files.
pub fn is_capture_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| {
            name.starts_with(&format!("{DEFAULT_FILE_PREFIX}-")) && name.ends_with(".log")
        })
}

/// Best-effort removal of capture files older than `max_age` from the temp
/// directory. Returns how many were removed.
pub fn sweep_stale_captures(max_age: Duration) -> anyhow::Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(env::temp_dir())?.flatten() {
        let path = entry.path();
        if !is_capture_file(&path) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        let age = modified.elapsed().unwrap_or(Duration::ZERO);
        if age > max_age && fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}
