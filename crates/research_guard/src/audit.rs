//! Audit Log - Append-only JSONL record of every handled failure

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

use crate::error::{GuardError, Result};

/// One audited failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    /// Calling context (operation name)
    pub context: String,
    /// Error kind, e.g. `resource_limit_exceeded` or `external`
    pub kind: String,
    pub message: String,
    /// Full error chain, root cause included
    #[serde(default)]
    pub detail: String,
}

/// Append-only audit sink
#[derive(Debug)]
pub struct AuditLog {
    log_path: PathBuf,
    write_lock: Mutex<()>,
}

impl AuditLog {
    /// Open (or prepare to create) the audit file at `path`
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let log_path = path.into();
        if let Some(parent) = log_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        info!("Audit log initialized: {}", log_path.display());

        Ok(Self {
            log_path,
            write_lock: Mutex::new(()),
        })
    }

    /// Append one record as a single line
    pub fn append(&self, record: &AuditRecord) -> Result<()> {
        let line = serde_json::to_string(record)? + "\n";

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| GuardError::poisoned("audit log"))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        file.write_all(line.as_bytes())?;
        file.sync_all()?;

        Ok(())
    }

    /// Read all records, skipping lines that do not parse
    pub fn read_all(&self) -> Result<Vec<AuditRecord>> {
        if !self.log_path.exists() {
            return Ok(vec![]);
        }

        let content = fs::read_to_string(&self.log_path)?;
        Ok(content
            .lines()
            .filter(|line| !line.is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(context: &str) -> AuditRecord {
        AuditRecord {
            timestamp: Utc::now(),
            context: context.to_string(),
            kind: "internal".to_string(),
            message: "boom".to_string(),
            detail: "boom: disk full".to_string(),
        }
    }

    #[test]
    fn test_audit_append_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let log = AuditLog::open(temp_dir.path().join("nested/audit.jsonl")).unwrap();

        log.append(&record("first")).unwrap();
        log.append(&record("second")).unwrap();

        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].context, "first");
        assert_eq!(records[1].context, "second");
    }

    #[test]
    fn test_read_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let log = AuditLog::open(temp_dir.path().join("audit.jsonl")).unwrap();
        assert!(log.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_skips_malformed_lines() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("audit.jsonl");
        let log = AuditLog::open(&path).unwrap();

        log.append(&record("ok")).unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"not json\n").unwrap();

        assert_eq!(log.read_all().unwrap().len(), 1);
    }

    #[test]
    fn test_record_without_detail_still_parses() {
        let line =
            r#"{"timestamp":"2024-01-01T00:00:00Z","context":"c","kind":"external","message":"m"}"#;
        let record: AuditRecord = serde_json::from_str(line).unwrap();
        assert_eq!(record.detail, "");
    }
}
