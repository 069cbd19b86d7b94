use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use crate::ledger::{CaptureLedger, CaptureRecord};
use crate::quoting::{self, Dialect, QuoteError};

/// Variable holding the path of the most recent capture.
pub const LAST_CAPTURE_VAR: &str = "AUTOTEE_LAST_CAPTURE";

/// Variable holding the capture history as a JSON array.
pub const CAPTURES_VAR: &str = "AUTOTEE_CAPTURES";

#[derive(Debug, Error, PartialEq)]
pub enum ExportError {
    #[error("shell dialect not supported for environment export: {0}")]
    UnsupportedDialect(Dialect),
    #[error(transparent)]
    Quote(#[from] QuoteError),
}

/// Trimmed view of a record, small enough to live in an environment variable.
#[derive(Serialize)]
struct ExportedCapture<'a> {
    path: &'a std::path::Path,
    timestamp: chrono::DateTime<Utc>,
    size: u64,
}

/// Emits shell statements that publish the capture history as environment
/// variables. Interactive unix shells only; cmd and powershell have no
/// sourceable export syntax worth targeting.
#[derive(Debug)]
pub struct EnvExporter {
    dialect: Dialect,
}

impl EnvExporter {
    pub fn new(dialect: Dialect) -> Result<Self, ExportError> {
        match dialect {
            Dialect::Bash | Dialect::Zsh | Dialect::Sh | Dialect::Fish => Ok(Self { dialect }),
            Dialect::Cmd | Dialect::Powershell => Err(ExportError::UnsupportedDialect(dialect)),
        }
    }

    /// Statement setting [`LAST_CAPTURE_VAR`], or unsetting it when the
    /// ledger is empty.
    pub fn last_capture_export(&self, ledger: &CaptureLedger) -> Result<String, ExportError> {
        match ledger.last() {
            Some(record) => {
                let path = quoting::quote(&record.path.to_string_lossy(), self.dialect)?;
                Ok(self.set_statement(LAST_CAPTURE_VAR, &path))
            }
            None => Ok(self.unset_statement(LAST_CAPTURE_VAR)),
        }
    }

    /// Statement setting [`CAPTURES_VAR`] to a JSON array of the history, or
    /// unsetting it when the ledger is empty.
    pub fn captures_export(&self, ledger: &CaptureLedger) -> Result<String, ExportError> {
        let captures = ledger.captures();
        if captures.is_empty() {
            return Ok(self.unset_statement(CAPTURES_VAR));
        }
        let exported: Vec<ExportedCapture> = captures.iter().map(trim_record).collect();
        let json = serde_json::to_string(&exported).unwrap_or_else(|_| "[]".into());
        let quoted = quoting::quote(&json, self.dialect)?;
        Ok(self.set_statement(CAPTURES_VAR, &quoted))
    }

    /// Complete sourceable script exporting both variables.
    pub fn export_script(&self, ledger: &CaptureLedger) -> Result<String, ExportError> {
        Ok(format!(
            "#!/usr/bin/env {shell}\n# capture environment, generated {now}\n\n{last}\n{all}\n",
            shell = self.dialect.as_str(),
            now = Utc::now().to_rfc3339(),
            last = self.last_capture_export(ledger)?,
            all = self.captures_export(ledger)?,
        ))
    }

    fn set_statement(&self, var: &str, quoted_value: &str) -> String {
        match self.dialect {
            Dialect::Fish => format!("set -gx {var} {quoted_value}"),
            _ => format!("export {var}={quoted_value}"),
        }
    }

    fn unset_statement(&self, var: &str) -> String {
        match self.dialect {
            Dialect::Fish => format!("set -e {var}"),
            _ => format!("unset {var}"),
        }
    }
}

fn trim_record(record: &CaptureRecord) -> ExportedCapture<'_> {
    ExportedCapture {
        path: &record.path,
        timestamp: record.timestamp,
        size: record.size,
    }
}
