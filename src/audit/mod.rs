//! Append-only JSON-lines audit log.
//!
//! One event per line at `logs/deployment-audit.log`: `timestamp`
//! (ISO 8601), `event` (UPPER_SNAKE), `target` (domain or environment),
//! `data` (object). The core never truncates the file.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pipeline::PipelineAuditor;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub target: String,
    pub data: Value,
}

pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create audit directory {}", parent.display()))?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event. The name is normalized to UPPER_SNAKE.
    pub fn append(&self, event: &str, target: &str, data: Value) -> Result<AuditEvent> {
        let entry = AuditEvent {
            timestamp: Utc::now(),
            event: upper_snake(event),
            target: target.to_string(),
            data,
        };
        let mut line = serde_json::to_string(&entry).context("Failed to serialize audit event")?;
        line.push('\n');

        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open audit log {}", self.path.display()))?
            .write_all(line.as_bytes())
            .context("Failed to write audit entry")?;
        Ok(entry)
    }

    /// Parse every line; used by status commands and tests.
    pub fn read_all(&self) -> Result<Vec<AuditEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path).context("Failed to read audit log")?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).context("Malformed audit line"))
            .collect()
    }
}

impl PipelineAuditor for AuditLog {
    fn log_phase(&self, domain: &str, phase: &str, state: &str) {
        let _ = self.append(
            &format!("phase-{state}"),
            domain,
            serde_json::json!({ "phase": phase }),
        );
    }

    fn log_error(&self, domain: &str, phase: &str, error: &str) {
        let _ = self.append(
            "phase-error",
            domain,
            serde_json::json!({ "phase": phase, "error": error }),
        );
    }
}

fn upper_snake(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '-' | ' ' | '.' => '_',
            other => other.to_ascii_uppercase(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn append_writes_one_json_line_per_event() {
        let dir = tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("logs/deployment-audit.log")).unwrap();

        log.append("deployment-started", "example.com", json!({"env": "staging"}))
            .unwrap();
        log.append("DEPLOYMENT_COMPLETED", "example.com", json!({"url": "https://a"}))
            .unwrap();

        let raw = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(raw.lines().count(), 2);

        let events = log.read_all().unwrap();
        assert_eq!(events[0].event, "DEPLOYMENT_STARTED");
        assert_eq!(events[1].event, "DEPLOYMENT_COMPLETED");
        assert_eq!(events[0].target, "example.com");
        assert_eq!(events[0].data["env"], "staging");
    }

    #[test]
    fn append_never_truncates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.log");
        {
            let log = AuditLog::new(&path).unwrap();
            log.append("first", "t", json!({})).unwrap();
        }
        {
            // A fresh handle appends after existing content.
            let log = AuditLog::new(&path).unwrap();
            log.append("second", "t", json!({})).unwrap();
            assert_eq!(log.read_all().unwrap().len(), 2);
        }
    }

    #[test]
    fn pipeline_auditor_impl_records_phase_and_error() {
        let dir = tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.log")).unwrap();
        log.log_phase("example.com", "deployment", "running");
        log.log_error("example.com", "verification", "probe returned 503");

        let events = log.read_all().unwrap();
        assert_eq!(events[0].event, "PHASE_RUNNING");
        assert_eq!(events[0].data["phase"], "deployment");
        assert_eq!(events[1].event, "PHASE_ERROR");
        assert_eq!(events[1].data["error"], "probe returned 503");
    }

    #[test]
    fn upper_snake_normalization() {
        assert_eq!(upper_snake("deployment-started"), "DEPLOYMENT_STARTED");
        assert_eq!(upper_snake("db migrate"), "DB_MIGRATE");
        assert_eq!(upper_snake("ALREADY_SNAKE"), "ALREADY_SNAKE");
    }
}
