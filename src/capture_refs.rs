use std::collections::HashSet;
use std::env;
use std::path::{PathBuf, MAIN_SEPARATOR_STR};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;

/// Announcement emitted by a rewritten command on success.
static PRIMARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)Full output saved to:\s*(.+?)\s*$").unwrap());

/// Secondary phrase used on failure-preservation paths.
static PRESERVED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)temp file preserved:\s*(.+?)\s*$").unwrap());

static UNIX_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/[^<>:|?*\x00-\x1f]*$").unwrap());
static WINDOWS_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]:[^<>|?*\x00-\x1f]*$").unwrap());
static RELATIVE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\.{1,2}[/\\][^<>:|?*\x00-\x1f]*$|^[^/\\<>:|?*\x00-\x1f][^<>:|?*\x00-\x1f]*$")
        .unwrap()
});

static REPEATED_SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[/\\]+").unwrap());

/// One extracted capture reference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureRef {
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub raw: String,
}

/// Counters kept by the caller and threaded through `parse` explicitly, so
/// the parser itself carries no hidden lifecycle state.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ParserStats {
    pub total_processed: u64,
    pub paths_extracted: u64,
    pub errors: u64,
    pub last_processed: Option<DateTime<Utc>>,
}

/// Extracts capture file paths from free-form stderr/log text.
///
/// Content that matches no announcement phrase yields an empty list, never an
/// error; syntactically invalid path tokens are dropped silently and counted
/// in the stats.
pub fn parse(text: &str, stats: &mut ParserStats) -> Vec<CaptureRef> {
    stats.total_processed += 1;
    stats.last_processed = Some(Utc::now());

    if text.is_empty() {
        return Vec::new();
    }

    let timestamp = Utc::now();
    let mut refs = Vec::new();
    for pattern in [&*PRIMARY, &*PRESERVED] {
        for caps in pattern.captures_iter(text) {
            let raw_match = caps.get(0).map(|m| m.as_str().trim().to_string());
            let Some(token) = caps.get(1).map(|m| m.as_str()) else {
                continue;
            };
            let cleaned = clean_path(token);
            if !is_valid_path(&cleaned) {
                stats.errors += 1;
                continue;
            }
            refs.push(CaptureRef {
                path: PathBuf::from(cleaned),
                timestamp,
                raw: raw_match.unwrap_or_default(),
            });
        }
    }

    let unique = dedup_by_resolved_path(refs);
    stats.paths_extracted += unique.len() as u64;
    unique
}

/// Convenience form for callers that only want the paths.
pub fn extract_paths(text: &str, stats: &mut ParserStats) -> Vec<PathBuf> {
    parse(text, stats).into_iter().map(|r| r.path).collect()
}

/// Whether `text` contains either announcement phrase at all.
pub fn has_references(text: &str) -> bool {
    PRIMARY.is_match(text) || PRESERVED.is_match(text)
}

/// Trim, strip one matching layer of quotes, un-escape escaped quotes, and
/// collapse repeated separators.
fn clean_path(raw: &str) -> String {
    let mut cleaned = raw.trim();

    if cleaned.len() >= 2
        && ((cleaned.starts_with('"') && cleaned.ends_with('"'))
            || (cleaned.starts_with('\'') && cleaned.ends_with('\'')))
    {
        cleaned = &cleaned[1..cleaned.len() - 1];
    }

    let unescaped = cleaned.replace("\\\"", "\"").replace("\\'", "'");
    REPEATED_SEPARATORS
        .replace_all(&unescaped, MAIN_SEPARATOR_STR)
        .into_owned()
}

fn is_valid_path(path: &str) -> bool {
    if path.is_empty() || path.contains(['\0', '\r', '\n']) {
        return false;
    }
    UNIX_PATH.is_match(path) || WINDOWS_PATH.is_match(path) || RELATIVE_PATH.is_match(path)
}

fn dedup_by_resolved_path(refs: Vec<CaptureRef>) -> Vec<CaptureRef> {
    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let mut seen = HashSet::new();
    refs.into_iter()
        .filter(|r| {
            let key = if r.path.is_absolute() {
                r.path.clone()
            } else {
                cwd.join(&r.path)
            };
            seen.insert(key)
        })
        .collect()
}
