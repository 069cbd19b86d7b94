use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// Default number of captures retained before the oldest is evicted.
pub const DEFAULT_MAX_CAPTURES: usize = 10;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("capture file does not exist: {0}")]
    FileNotFound(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub path: PathBuf,
    pub command: String,
    pub timestamp: DateTime<Utc>,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// Partial update merged into a matching record.
#[derive(Debug, Default, Clone)]
pub struct CapturePatch {
    pub command: Option<String>,
    pub size: Option<u64>,
    pub metadata: Map<String, Value>,
}

/// Bounded, insertion-ordered record of recent captures.
///
/// In atomic mode every mutation builds a new sequence and swaps it in, so a
/// reader holding the previous snapshot keeps seeing a consistent list. In
/// non-atomic mode mutations splice the one live sequence in place.
pub struct CaptureLedger {
    entries: Arc<Vec<CaptureRecord>>,
    max_entries: usize,
    atomic: bool,
}

impl CaptureLedger {
    pub fn new(max_entries: usize, atomic: bool) -> Self {
        Self {
            entries: Arc::new(Vec::new()),
            max_entries: max_entries.max(1),
            atomic,
        }
    }

    /// Record a capture. The file must exist unless `metadata` carries a
    /// truthy `test_mode` flag; in test mode the size may be supplied via a
    /// numeric `size` field.
    pub fn add(
        &mut self,
        path: &Path,
        command: &str,
        metadata: Map<String, Value>,
    ) -> Result<CaptureRecord, LedgerError> {
        let test_mode = metadata
            .get("test_mode")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let size = if test_mode {
            metadata.get("size").and_then(Value::as_u64).unwrap_or(0)
        } else {
            fs::metadata(path)
                .map_err(|_| LedgerError::FileNotFound(path.to_path_buf()))?
                .len()
        };

        let record = CaptureRecord {
            path: resolve(path),
            command: command.to_string(),
            timestamp: Utc::now(),
            size,
            updated_at: None,
            metadata,
        };

        let max = self.max_entries;
        let pushed = record.clone();
        self.mutate(move |entries| {
            entries.push(record);
            while entries.len() > max {
                entries.remove(0);
            }
        });
        debug!(path = %pushed.path.display(), len = self.entries.len(), "capture recorded");
        Ok(pushed)
    }

    /// Most recent capture, if any.
    pub fn last(&self) -> Option<CaptureRecord> {
        self.entries.last().cloned()
    }

    /// Defensive copy of the history; mutating it never affects the ledger.
    pub fn captures(&self) -> Vec<CaptureRecord> {
        self.entries.as_ref().clone()
    }

    /// Merge `patch` into the record matching `path`. No-op when absent.
    pub fn update(&mut self, path: &Path, patch: CapturePatch) {
        let target = resolve(path);
        self.mutate(move |entries| {
            if let Some(record) = entries.iter_mut().find(|r| r.path == target) {
                if let Some(command) = patch.command {
                    record.command = command;
                }
                if let Some(size) = patch.size {
                    record.size = size;
                }
                for (key, value) in patch.metadata {
                    record.metadata.insert(key, value);
                }
                record.updated_at = Some(Utc::now());
            }
        });
    }

    /// Remove the record matching `path`; reports whether one was removed.
    pub fn remove(&mut self, path: &Path) -> bool {
        let target = resolve(path);
        let before = self.entries.len();
        self.mutate(move |entries| {
            entries.retain(|r| r.path != target);
        });
        self.entries.len() < before
    }

    pub fn clear(&mut self) {
        self.mutate(|entries| entries.clear());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Identity of the underlying sequence allocation. Atomic mutations
    /// change it, in-place mutations keep it.
    #[cfg(test)]
    pub(crate) fn sequence_id(&self) -> *const Vec<CaptureRecord> {
        Arc::as_ptr(&self.entries)
    }

    fn mutate<F: FnOnce(&mut Vec<CaptureRecord>)>(&mut self, f: F) {
        if self.atomic {
            let mut next = self.entries.as_ref().clone();
            f(&mut next);
            self.entries = Arc::new(next);
        } else {
            f(Arc::make_mut(&mut self.entries));
        }
    }
}

/// Absolute form of `path`: canonicalized when it exists, otherwise joined
/// onto the working directory.
fn resolve(path: &Path) -> PathBuf {
    if let Ok(canonical) = fs::canonicalize(path) {
        return canonical;
    }
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn test_meta() -> Map<String, Value> {
        let mut meta = Map::new();
        meta.insert("test_mode".into(), Value::Bool(true));
        meta
    }

    #[test]
    fn add_rejects_missing_file() {
        let mut ledger = CaptureLedger::new(5, true);
        let err = ledger
            .add(Path::new("/nonexistent/autotee-x.log"), "cmd", Map::new())
            .unwrap_err();
        assert!(matches!(err, LedgerError::FileNotFound(_)));
    }

    #[test]
    fn add_records_real_file_size() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"twelve bytes").unwrap();
        let mut ledger = CaptureLedger::new(5, true);
        let record = ledger.add(file.path(), "echo hi", Map::new()).unwrap();
        assert_eq!(record.size, 12);
        assert!(record.path.is_absolute());
    }

    #[test]
    fn test_mode_skips_existence_check() {
        let mut ledger = CaptureLedger::new(5, true);
        let mut meta = test_meta();
        meta.insert("size".into(), Value::from(42u64));
        let record = ledger
            .add(Path::new("/tmp/autotee-missing.log"), "cmd", meta)
            .unwrap();
        assert_eq!(record.size, 42);
    }

    #[test]
    fn bound_evicts_oldest_first() {
        let mut ledger = CaptureLedger::new(3, true);
        for i in 0..5 {
            ledger
                .add(
                    Path::new(&format!("/tmp/autotee-{i}.log")),
                    &format!("cmd {i}"),
                    test_meta(),
                )
                .unwrap();
        }
        let captures = ledger.captures();
        assert_eq!(captures.len(), 3);
        assert_eq!(captures[0].command, "cmd 2");
        assert_eq!(captures[2].command, "cmd 4");
        assert_eq!(ledger.last().unwrap().command, "cmd 4");
    }

    #[test]
    fn captures_returns_defensive_copy() {
        let mut ledger = CaptureLedger::new(5, true);
        ledger
            .add(Path::new("/tmp/autotee-a.log"), "cmd", test_meta())
            .unwrap();
        let mut copy = ledger.captures();
        copy.clear();
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn update_merges_fields_and_stamps_time() {
        let mut ledger = CaptureLedger::new(5, true);
        ledger
            .add(Path::new("/tmp/autotee-a.log"), "cmd", test_meta())
            .unwrap();
        let mut patch = CapturePatch {
            size: Some(99),
            ..Default::default()
        };
        patch.metadata.insert("exit_code".into(), Value::from(0));
        ledger.update(Path::new("/tmp/autotee-a.log"), patch);

        let record = ledger.last().unwrap();
        assert_eq!(record.size, 99);
        assert_eq!(record.metadata.get("exit_code"), Some(&Value::from(0)));
        assert!(record.updated_at.is_some());
    }

    #[test]
    fn update_missing_is_a_noop() {
        let mut ledger = CaptureLedger::new(5, true);
        ledger.update(Path::new("/tmp/autotee-none.log"), CapturePatch::default());
        assert!(ledger.is_empty());
    }

    #[test]
    fn remove_reports_whether_anything_went() {
        let mut ledger = CaptureLedger::new(5, true);
        ledger
            .add(Path::new("/tmp/autotee-a.log"), "cmd", test_meta())
            .unwrap();
        assert!(ledger.remove(Path::new("/tmp/autotee-a.log")));
        assert!(!ledger.remove(Path::new("/tmp/autotee-a.log")));
        assert!(ledger.is_empty());
    }

    #[test]
    fn atomic_mode_swaps_the_sequence() {
        let mut ledger = CaptureLedger::new(5, true);
        let before = ledger.sequence_id();
        ledger
            .add(Path::new("/tmp/autotee-a.log"), "cmd", test_meta())
            .unwrap();
        assert_ne!(before, ledger.sequence_id());
    }

    #[test]
    fn non_atomic_mode_mutates_in_place() {
        let mut ledger = CaptureLedger::new(5, false);
        let before = ledger.sequence_id();
        ledger
            .add(Path::new("/tmp/autotee-a.log"), "cmd", test_meta())
            .unwrap();
        assert_eq!(before, ledger.sequence_id());
    }

    #[test]
    fn clear_empties_history() {
        let mut ledger = CaptureLedger::new(5, true);
        ledger
            .add(Path::new("/tmp/autotee-a.log"), "cmd", test_meta())
            .unwrap();
        ledger.clear();
        assert!(ledger.is_empty());
        assert!(ledger.last().is_none());
    }
}
