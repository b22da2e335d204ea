//! Durable key-value store of state blobs keyed by (workflow, phase).
//!
//! One canonical-JSON file per key under `<root>/persistence/`. Writes
//! replace the current blob; with `auto_backup` on (the default) the prior
//! blob is kept beside it as `<key>.json.backup`. I/O failures are retried
//! once before surfacing as `StorageIOError`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::sanitize_key;
use crate::canonical;
use crate::errors::StateError;
use crate::events::{DeployEvent, EventSender};

const SCHEMA_VERSION: u32 = 1;

/// The persisted record for one (workflow, phase) key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateBlob {
    pub workflow: String,
    pub phase: String,
    pub content: Value,
    pub saved_at: DateTime<Utc>,
    pub schema_version: u32,
}

/// Aggregate numbers over the whole store.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStatistics {
    pub entries: usize,
    pub total_bytes: u64,
    pub workflows: usize,
    pub phases: usize,
}

pub struct StatePersistence {
    dir: PathBuf,
    auto_backup: bool,
    events: EventSender,
}

impl StatePersistence {
    pub fn new(root: impl Into<PathBuf>, events: EventSender) -> Result<Self, StateError> {
        let dir = root.into().join("persistence");
        ensure_dir(&dir)?;
        Ok(Self {
            dir,
            auto_backup: true,
            events,
        })
    }

    pub fn auto_backup(mut self, enabled: bool) -> Self {
        self.auto_backup = enabled;
        self
    }

    fn blob_path(&self, workflow: &str, phase: &str) -> PathBuf {
        self.dir
            .join(format!("{}__{}.json", sanitize_key(workflow), sanitize_key(phase)))
    }

    /// Replace the current blob, returning the serialized size in bytes.
    pub fn save(
        &self,
        workflow: &str,
        phase: &str,
        content: Value,
    ) -> Result<usize, StateError> {
        let blob = StateBlob {
            workflow: workflow.to_string(),
            phase: phase.to_string(),
            content,
            saved_at: Utc::now(),
            schema_version: SCHEMA_VERSION,
        };
        let encoded = canonical::encode(&blob)?;
        let path = self.blob_path(workflow, phase);

        if self.auto_backup && path.exists() {
            let backup = path.with_extension("json.backup");
            retry_io(&path, || std::fs::copy(&path, &backup).map(|_| ()))?;
        }

        let tmp = path.with_extension("json.tmp");
        retry_io(&tmp, || std::fs::write(&tmp, encoded.as_bytes()))?;
        retry_io(&path, || std::fs::rename(&tmp, &path))?;

        self.events.emit(DeployEvent::StateSaved {
            workflow: workflow.to_string(),
            phase: phase.to_string(),
            size: encoded.len(),
        });
        tracing::debug!(target: "stratus::state", workflow, phase, bytes = encoded.len(), "state saved");
        Ok(encoded.len())
    }

    pub fn load(&self, workflow: &str, phase: &str) -> Result<StateBlob, StateError> {
        let path = self.blob_path(workflow, phase);
        if !path.exists() {
            return Err(StateError::BlobNotFound {
                workflow: workflow.to_string(),
                phase: phase.to_string(),
            });
        }
        let raw = retry_io(&path, || std::fs::read_to_string(&path))?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Remove the blob (and its backup). Returns true when something existed.
    pub fn delete(&self, workflow: &str, phase: &str) -> Result<bool, StateError> {
        let path = self.blob_path(workflow, phase);
        if !path.exists() {
            return Ok(false);
        }
        retry_io(&path, || std::fs::remove_file(&path))?;
        let backup = path.with_extension("json.backup");
        if backup.exists() {
            retry_io(&backup, || std::fs::remove_file(&backup))?;
        }
        Ok(true)
    }

    pub fn list_by_workflow(&self, workflow: &str) -> Result<Vec<StateBlob>, StateError> {
        self.list(|blob| blob.workflow == workflow)
    }

    pub fn list_by_phase(&self, phase: &str) -> Result<Vec<StateBlob>, StateError> {
        self.list(|blob| blob.phase == phase)
    }

    fn list(&self, keep: impl Fn(&StateBlob) -> bool) -> Result<Vec<StateBlob>, StateError> {
        let mut blobs: Vec<StateBlob> = Vec::new();
        for entry in read_dir(&self.dir)? {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                let raw = retry_io(&path, || std::fs::read_to_string(&path))?;
                let blob: StateBlob = serde_json::from_str(&raw)?;
                if keep(&blob) {
                    blobs.push(blob);
                }
            }
        }
        blobs.sort_by(|a, b| a.saved_at.cmp(&b.saved_at));
        Ok(blobs)
    }

    pub fn statistics(&self) -> Result<StoreStatistics, StateError> {
        let mut stats = StoreStatistics::default();
        let mut workflows = std::collections::BTreeSet::new();
        let mut phases = std::collections::BTreeSet::new();
        for entry in read_dir(&self.dir)? {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                let raw = retry_io(&path, || std::fs::read_to_string(&path))?;
                let blob: StateBlob = serde_json::from_str(&raw)?;
                stats.entries += 1;
                stats.total_bytes += raw.len() as u64;
                workflows.insert(blob.workflow);
                phases.insert(blob.phase);
            }
        }
        stats.workflows = workflows.len();
        stats.phases = phases.len();
        Ok(stats)
    }
}

fn ensure_dir(dir: &Path) -> Result<(), StateError> {
    retry_io(dir, || std::fs::create_dir_all(dir))
}

fn read_dir(dir: &Path) -> Result<Vec<std::fs::DirEntry>, StateError> {
    let entries = retry_io(dir, || {
        std::fs::read_dir(dir)?.collect::<std::io::Result<Vec<_>>>()
    })?;
    Ok(entries)
}

/// Run a filesystem operation, retrying exactly once on failure.
pub(crate) fn retry_io<T>(
    path: &Path,
    op: impl Fn() -> std::io::Result<T>,
) -> Result<T, StateError> {
    op().or_else(|first| {
        tracing::warn!(target: "stratus::state", path = %path.display(), error = %first, "I/O failed, retrying once");
        op()
    })
    .map_err(|source| StateError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn store(dir: &Path) -> StatePersistence {
        StatePersistence::new(dir, EventSender::disabled()).unwrap()
    }

    #[test]
    fn save_then_load_round_trips_content() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let content = json!({"domains": ["example.com"], "step": 2});

        let size = store.save("deploy-1", "assess", content.clone()).unwrap();
        assert!(size > 0);

        let blob = store.load("deploy-1", "assess").unwrap();
        assert_eq!(blob.content, content);
        assert_eq!(blob.workflow, "deploy-1");
        assert_eq!(blob.phase, "assess");
        assert_eq!(blob.schema_version, 1);
    }

    #[test]
    fn load_missing_key_is_not_found() {
        let dir = tempdir().unwrap();
        let err = store(dir.path()).load("deploy-1", "assess").unwrap_err();
        assert_eq!(err.kind(), "StateBlobNotFound");
    }

    #[test]
    fn save_emits_state_saved_event() {
        let dir = tempdir().unwrap();
        let (events, mut rx) = EventSender::channel();
        let store = StatePersistence::new(dir.path(), events).unwrap();
        store.save("deploy-1", "assess", json!({})).unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(event.name(), "state-saved");
    }

    #[test]
    fn overwrite_keeps_backup_of_prior_blob() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.save("deploy-1", "assess", json!({"v": 1})).unwrap();
        store.save("deploy-1", "assess", json!({"v": 2})).unwrap();

        let backup_path = dir
            .path()
            .join("persistence")
            .join("deploy-1__assess.json.backup");
        assert!(backup_path.exists());
        let backup: StateBlob =
            serde_json::from_str(&std::fs::read_to_string(backup_path).unwrap()).unwrap();
        assert_eq!(backup.content, json!({"v": 1}));

        let current = store.load("deploy-1", "assess").unwrap();
        assert_eq!(current.content, json!({"v": 2}));
    }

    #[test]
    fn auto_backup_can_be_disabled() {
        let dir = tempdir().unwrap();
        let store = StatePersistence::new(dir.path(), EventSender::disabled())
            .unwrap()
            .auto_backup(false);
        store.save("deploy-1", "assess", json!({"v": 1})).unwrap();
        store.save("deploy-1", "assess", json!({"v": 2})).unwrap();
        assert!(
            !dir.path()
                .join("persistence")
                .join("deploy-1__assess.json.backup")
                .exists()
        );
    }

    #[test]
    fn delete_removes_blob_and_backup() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.save("deploy-1", "assess", json!({"v": 1})).unwrap();
        store.save("deploy-1", "assess", json!({"v": 2})).unwrap();

        assert!(store.delete("deploy-1", "assess").unwrap());
        assert!(!store.delete("deploy-1", "assess").unwrap());
        assert!(store.load("deploy-1", "assess").is_err());
    }

    #[test]
    fn listing_filters_by_workflow_and_phase() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.save("deploy-1", "assess", json!(1)).unwrap();
        store.save("deploy-1", "construct", json!(2)).unwrap();
        store.save("deploy-2", "assess", json!(3)).unwrap();

        let by_workflow = store.list_by_workflow("deploy-1").unwrap();
        assert_eq!(by_workflow.len(), 2);

        let by_phase = store.list_by_phase("assess").unwrap();
        assert_eq!(by_phase.len(), 2);
        assert!(by_phase.iter().all(|b| b.phase == "assess"));
    }

    #[test]
    fn statistics_counts_distinct_workflows_and_phases() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.save("deploy-1", "assess", json!(1)).unwrap();
        store.save("deploy-1", "construct", json!(2)).unwrap();
        store.save("deploy-2", "assess", json!(3)).unwrap();

        let stats = store.statistics().unwrap();
        assert_eq!(stats.entries, 3);
        assert_eq!(stats.workflows, 2);
        assert_eq!(stats.phases, 2);
        assert!(stats.total_bytes > 0);
    }

    #[test]
    fn blob_file_is_canonical_json() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store
            .save("deploy-1", "assess", json!({"zeta": 1, "alpha": 2}))
            .unwrap();

        let raw = std::fs::read_to_string(
            dir.path().join("persistence").join("deploy-1__assess.json"),
        )
        .unwrap();
        // Keys sorted, no whitespace.
        let content_pos = raw.find(r#""content":{"alpha":2,"zeta":1}"#);
        assert!(content_pos.is_some(), "not canonical: {raw}");
    }
}
