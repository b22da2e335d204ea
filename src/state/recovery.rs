//! Checkpoints, recovery tracking, and rollback.
//!
//! A checkpoint is a tagged, recoverable reference to a specific version of
//! a phase's state. Creating one appends a version and then replaces the
//! persisted blob, in that order, so the blob always reflects a version
//! that exists. Recovering restores the blob to the checkpointed version's
//! content byte-for-byte (checksum verified on read).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::persistence::{StatePersistence, retry_io};
use super::sanitize_key;
use super::versioning::{CreateVersionOptions, ListOptions, StateVersioning};
use crate::canonical;
use crate::errors::StateError;
use crate::events::{DeployEvent, EventSender};
use crate::util::generate_id;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub milestone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    pub phase_id: String,
    pub version_id: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub state_size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default)]
    pub metadata: CheckpointMetadata,
    pub recoverable: bool,
}

/// Options for [`StateRecovery::create_checkpoint`].
#[derive(Debug, Clone, Default)]
pub struct CheckpointOptions {
    pub reason: Option<String>,
    pub milestone: Option<String>,
    pub tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryRecord {
    pub recovery_id: String,
    pub phase_id: String,
    pub checkpoint_id: String,
    pub version_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub rollback_id: String,
    pub phase_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_version: Option<String>,
    pub to_version: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
}

/// One way forward offered by a recovery plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RecoveryOption {
    ResumeCurrent {
        phase: String,
        checkpoint_id: String,
    },
    SkipToNext {
        phase: String,
    },
    RollbackTo {
        phase: String,
        checkpoint_id: String,
        version_id: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoveryPlan {
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub options: Vec<RecoveryOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

impl RecoveryPlan {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            available: false,
            reason: Some(reason.into()),
            options: Vec::new(),
            recommendation: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryStatistics {
    pub checkpoints: usize,
    pub recoveries: usize,
    pub recoveries_in_progress: usize,
    pub successful_recoveries: usize,
    pub success_rate: f64,
    pub rollbacks: usize,
}

pub struct StateRecovery {
    dir: PathBuf,
    workflow: String,
    persistence: Arc<StatePersistence>,
    versioning: Arc<StateVersioning>,
    max_checkpoints: usize,
    retention_days: i64,
    events: EventSender,
}

impl StateRecovery {
    pub fn new(
        root: impl Into<PathBuf>,
        workflow: impl Into<String>,
        persistence: Arc<StatePersistence>,
        versioning: Arc<StateVersioning>,
        events: EventSender,
    ) -> Result<Self, StateError> {
        let dir = root.into().join("recovery");
        let checkpoints_dir = dir.join("checkpoints");
        retry_io(&checkpoints_dir, || std::fs::create_dir_all(&checkpoints_dir))?;
        Ok(Self {
            dir,
            workflow: workflow.into(),
            persistence,
            versioning,
            max_checkpoints: 50,
            retention_days: 14,
            events,
        })
    }

    pub fn max_checkpoints(mut self, max: usize) -> Self {
        self.max_checkpoints = max.max(1);
        self
    }

    pub fn retention_days(mut self, days: i64) -> Self {
        self.retention_days = days;
        self
    }

    /// Version the state, persist it as the current blob, and record a
    /// recoverable checkpoint.
    pub fn create_checkpoint(
        &self,
        phase: &str,
        state: &Value,
        opts: CheckpointOptions,
    ) -> Result<Checkpoint, StateError> {
        let version = self.versioning.create_version(
            phase,
            state,
            CreateVersionOptions {
                parent_id: None,
                tag: opts.tag.clone(),
                message: opts.reason.clone(),
            },
        )?;
        self.persistence.save(&self.workflow, phase, state.clone())?;

        let now = Utc::now();
        let checkpoint = Checkpoint {
            checkpoint_id: generate_id("chk"),
            phase_id: phase.to_string(),
            version_id: version.version_id.clone(),
            created_at: now,
            last_used_at: now,
            state_size: version.size,
            tag: opts.tag,
            metadata: CheckpointMetadata {
                reason: opts.reason,
                milestone: opts.milestone,
            },
            recoverable: true,
        };

        let mut checkpoints = self.load_checkpoints(phase)?;
        checkpoints.push(checkpoint.clone());
        self.prune_checkpoints(&mut checkpoints);
        self.store_checkpoints(phase, &checkpoints)?;

        self.events.emit(DeployEvent::CheckpointCreated {
            phase: phase.to_string(),
            checkpoint_id: checkpoint.checkpoint_id.clone(),
            version_id: version.version_id,
        });
        Ok(checkpoint)
    }

    pub fn get_checkpoint(
        &self,
        phase: &str,
        checkpoint_id: &str,
    ) -> Result<Checkpoint, StateError> {
        self.load_checkpoints(phase)?
            .into_iter()
            .find(|c| c.checkpoint_id == checkpoint_id)
            .ok_or_else(|| StateError::CheckpointNotFound {
                phase: phase.to_string(),
                checkpoint_id: checkpoint_id.to_string(),
            })
    }

    pub fn latest_checkpoint(&self, phase: &str) -> Result<Option<Checkpoint>, StateError> {
        Ok(self.load_checkpoints(phase)?.into_iter().next_back())
    }

    pub fn list_checkpoints(
        &self,
        phase: &str,
        opts: ListOptions,
    ) -> Result<Vec<Checkpoint>, StateError> {
        let mut checkpoints = self.load_checkpoints(phase)?;
        if opts.reverse {
            checkpoints.reverse();
        }
        Ok(checkpoints
            .into_iter()
            .skip(opts.skip)
            .take(opts.limit)
            .collect())
    }

    /// Restore the persisted blob to the checkpoint's version and open a
    /// recovery record.
    pub fn recover_from_checkpoint(
        &self,
        phase: &str,
        checkpoint_id: &str,
    ) -> Result<RecoveryRecord, StateError> {
        let checkpoint = self.get_checkpoint(phase, checkpoint_id)?;
        let state = self.versioning.load_state(phase, &checkpoint.version_id)?;
        self.persistence.save(&self.workflow, phase, state)?;

        let mut checkpoints = self.load_checkpoints(phase)?;
        if let Some(cp) = checkpoints
            .iter_mut()
            .find(|c| c.checkpoint_id == checkpoint_id)
        {
            cp.last_used_at = Utc::now();
        }
        self.store_checkpoints(phase, &checkpoints)?;

        let record = RecoveryRecord {
            recovery_id: generate_id("rec"),
            phase_id: phase.to_string(),
            checkpoint_id: checkpoint_id.to_string(),
            version_id: checkpoint.version_id,
            started_at: Utc::now(),
            completed_at: None,
            success: None,
            message: None,
        };
        let mut history = self.load_recoveries()?;
        history.push(record.clone());
        self.store_recoveries(&history)?;

        self.events.emit(DeployEvent::RecoveryStarted {
            phase: phase.to_string(),
            recovery_id: record.recovery_id.clone(),
            checkpoint_id: checkpoint_id.to_string(),
        });
        Ok(record)
    }

    pub fn complete_recovery(
        &self,
        recovery_id: &str,
        success: bool,
        message: Option<String>,
    ) -> Result<RecoveryRecord, StateError> {
        let mut history = self.load_recoveries()?;
        let record = history
            .iter_mut()
            .find(|r| r.recovery_id == recovery_id)
            .ok_or_else(|| StateError::RecoveryNotFound {
                recovery_id: recovery_id.to_string(),
            })?;
        record.completed_at = Some(Utc::now());
        record.success = Some(success);
        record.message = message;
        let completed = record.clone();
        self.store_recoveries(&history)?;

        self.events.emit(DeployEvent::RecoveryCompleted {
            recovery_id: recovery_id.to_string(),
            success,
        });
        Ok(completed)
    }

    /// Restore the blob to an arbitrary existing version.
    pub fn rollback(&self, phase: &str, version_id: &str) -> Result<RollbackRecord, StateError> {
        // Validates the target exists.
        self.versioning.get_version(phase, version_id)?;
        let from_version = self
            .versioning
            .current_version(phase)?
            .map(|v| v.version_id);
        let state = self.versioning.load_state(phase, version_id)?;
        self.persistence.save(&self.workflow, phase, state)?;

        let record = RollbackRecord {
            rollback_id: generate_id("rbk"),
            phase_id: phase.to_string(),
            from_version,
            to_version: version_id.to_string(),
            started_at: Utc::now(),
            completed_at: None,
            success: None,
        };
        let mut history = self.load_rollbacks()?;
        history.push(record.clone());
        self.store_rollbacks(&history)?;
        Ok(record)
    }

    pub fn complete_rollback(
        &self,
        rollback_id: &str,
        success: bool,
    ) -> Result<RollbackRecord, StateError> {
        let mut history = self.load_rollbacks()?;
        let record = history
            .iter_mut()
            .find(|r| r.rollback_id == rollback_id)
            .ok_or_else(|| StateError::RollbackNotFound {
                rollback_id: rollback_id.to_string(),
            })?;
        record.completed_at = Some(Utc::now());
        record.success = Some(success);
        let completed = record.clone();
        self.store_rollbacks(&history)?;
        Ok(completed)
    }

    pub fn recovery_history(
        &self,
        phase: &str,
        limit: usize,
    ) -> Result<Vec<RecoveryRecord>, StateError> {
        let mut history: Vec<RecoveryRecord> = self
            .load_recoveries()?
            .into_iter()
            .filter(|r| r.phase_id == phase)
            .collect();
        history.reverse();
        history.truncate(limit);
        Ok(history)
    }

    pub fn rollback_history(
        &self,
        phase: &str,
        limit: usize,
    ) -> Result<Vec<RollbackRecord>, StateError> {
        let mut history: Vec<RollbackRecord> = self
            .load_rollbacks()?
            .into_iter()
            .filter(|r| r.phase_id == phase)
            .collect();
        history.reverse();
        history.truncate(limit);
        Ok(history)
    }

    /// What can be done for a phase right now.
    pub fn recovery_plan(&self, phase: &str) -> Result<RecoveryPlan, StateError> {
        let checkpoints = self.load_checkpoints(phase)?;
        let recoverable: Vec<&Checkpoint> =
            checkpoints.iter().filter(|c| c.recoverable).collect();
        if recoverable.is_empty() {
            return Ok(RecoveryPlan::unavailable(format!(
                "no recoverable checkpoints for phase {phase}"
            )));
        }

        let latest = recoverable.last().expect("non-empty");
        let mut options = vec![
            RecoveryOption::ResumeCurrent {
                phase: phase.to_string(),
                checkpoint_id: latest.checkpoint_id.clone(),
            },
            RecoveryOption::SkipToNext {
                phase: phase.to_string(),
            },
        ];
        for checkpoint in recoverable.iter().rev() {
            options.push(RecoveryOption::RollbackTo {
                phase: phase.to_string(),
                checkpoint_id: checkpoint.checkpoint_id.clone(),
                version_id: checkpoint.version_id.clone(),
            });
        }

        Ok(RecoveryPlan {
            available: true,
            reason: None,
            options,
            recommendation: Some(format!(
                "resume-current from checkpoint {}",
                latest.checkpoint_id
            )),
        })
    }

    pub fn statistics(&self, phase: Option<&str>) -> Result<RecoveryStatistics, StateError> {
        let recoveries: Vec<RecoveryRecord> = self
            .load_recoveries()?
            .into_iter()
            .filter(|r| phase.is_none_or(|p| r.phase_id == p))
            .collect();
        let rollbacks = self
            .load_rollbacks()?
            .into_iter()
            .filter(|r| phase.is_none_or(|p| r.phase_id == p))
            .count();

        let checkpoints = match phase {
            Some(p) => self.load_checkpoints(p)?.len(),
            None => {
                let mut total = 0;
                for entry in retry_io(&self.dir.join("checkpoints"), || {
                    std::fs::read_dir(self.dir.join("checkpoints"))?
                        .collect::<std::io::Result<Vec<_>>>()
                })? {
                    let raw = retry_io(&entry.path(), || std::fs::read_to_string(entry.path()))?;
                    let list: Vec<Checkpoint> = serde_json::from_str(&raw)?;
                    total += list.len();
                }
                total
            }
        };

        let completed = recoveries.iter().filter(|r| r.completed_at.is_some()).count();
        let successful = recoveries
            .iter()
            .filter(|r| r.success == Some(true))
            .count();
        Ok(RecoveryStatistics {
            checkpoints,
            recoveries: recoveries.len(),
            recoveries_in_progress: recoveries.len() - completed,
            successful_recoveries: successful,
            success_rate: if completed == 0 {
                0.0
            } else {
                successful as f64 / completed as f64
            },
            rollbacks,
        })
    }

    /// Ancestor chain of a version, delegated to the versioning service.
    pub fn version_chain(
        &self,
        phase: &str,
        version_id: &str,
        depth: usize,
    ) -> Result<Vec<crate::state::Version>, StateError> {
        self.versioning.version_chain(phase, version_id, depth)
    }

    /// All phases that currently have at least one checkpoint.
    pub fn phases_with_checkpoints(&self) -> Result<Vec<String>, StateError> {
        let checkpoints_dir = self.dir.join("checkpoints");
        let mut phases = Vec::new();
        for entry in retry_io(&checkpoints_dir, || {
            std::fs::read_dir(&checkpoints_dir)?.collect::<std::io::Result<Vec<_>>>()
        })? {
            let raw = retry_io(&entry.path(), || std::fs::read_to_string(entry.path()))?;
            let list: Vec<Checkpoint> = serde_json::from_str(&raw)?;
            if let Some(first) = list.first() {
                phases.push(first.phase_id.clone());
            }
        }
        phases.sort();
        Ok(phases)
    }

    fn checkpoints_path(&self, phase: &str) -> PathBuf {
        self.dir
            .join("checkpoints")
            .join(format!("{}.json", sanitize_key(phase)))
    }

    fn load_checkpoints(&self, phase: &str) -> Result<Vec<Checkpoint>, StateError> {
        read_json_list(&self.checkpoints_path(phase))
    }

    fn store_checkpoints(&self, phase: &str, list: &[Checkpoint]) -> Result<(), StateError> {
        write_json_list(&self.checkpoints_path(phase), list)
    }

    fn load_recoveries(&self) -> Result<Vec<RecoveryRecord>, StateError> {
        read_json_list(&self.dir.join("recoveries.json"))
    }

    fn store_recoveries(&self, list: &[RecoveryRecord]) -> Result<(), StateError> {
        write_json_list(&self.dir.join("recoveries.json"), list)
    }

    fn load_rollbacks(&self) -> Result<Vec<RollbackRecord>, StateError> {
        read_json_list(&self.dir.join("rollbacks.json"))
    }

    fn store_rollbacks(&self, list: &[RollbackRecord]) -> Result<(), StateError> {
        write_json_list(&self.dir.join("rollbacks.json"), list)
    }

    /// Cap checkpoint count and age. The latest checkpoint is never pruned.
    fn prune_checkpoints(&self, checkpoints: &mut Vec<Checkpoint>) {
        let cutoff = Utc::now() - Duration::days(self.retention_days);
        let latest_id = checkpoints
            .last()
            .map(|c| c.checkpoint_id.clone())
            .unwrap_or_default();

        let overflow = checkpoints.len().saturating_sub(self.max_checkpoints);
        let mut dropped = 0usize;
        checkpoints.retain(|c| {
            if c.checkpoint_id == latest_id {
                return true;
            }
            if dropped < overflow || c.created_at < cutoff {
                dropped += 1;
                false
            } else {
                true
            }
        });
    }
}

fn read_json_list<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>, StateError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = retry_io(path, || std::fs::read_to_string(path))?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_json_list<T: Serialize>(path: &Path, list: &[T]) -> Result<(), StateError> {
    let encoded = canonical::encode(&list)?;
    let tmp = path.with_extension("json.tmp");
    retry_io(&tmp, || std::fs::write(&tmp, encoded.as_bytes()))?;
    retry_io(path, || std::fs::rename(&tmp, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    struct Fixture {
        _dir: tempfile::TempDir,
        recovery: StateRecovery,
        persistence: Arc<StatePersistence>,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let events = EventSender::disabled();
        let persistence =
            Arc::new(StatePersistence::new(dir.path(), events.clone()).unwrap());
        let versioning = Arc::new(StateVersioning::new(dir.path(), events.clone()).unwrap());
        let recovery = StateRecovery::new(
            dir.path(),
            "deployment",
            Arc::clone(&persistence),
            versioning,
            events,
        )
        .unwrap();
        Fixture {
            _dir: dir,
            recovery,
            persistence,
        }
    }

    #[test]
    fn checkpoint_versions_then_persists() {
        let f = fixture();
        let state = json!({"assessed": true});
        let checkpoint = f
            .recovery
            .create_checkpoint(
                "assess",
                &state,
                CheckpointOptions {
                    reason: Some("phase complete".to_string()),
                    milestone: Some("assessment".to_string()),
                    tag: None,
                },
            )
            .unwrap();

        assert!(checkpoint.recoverable);
        assert!(checkpoint.checkpoint_id.starts_with("chk-"));
        assert_eq!(checkpoint.metadata.reason.as_deref(), Some("phase complete"));

        // The persisted blob reflects the checkpointed state.
        let blob = f.persistence.load("deployment", "assess").unwrap();
        assert_eq!(blob.content, state);
    }

    #[test]
    fn checkpoint_recover_load_round_trips_bytes() {
        let f = fixture();
        let state = json!({"payload": [1, 2, 3], "nested": {"z": 1, "a": 2}});
        let checkpoint = f
            .recovery
            .create_checkpoint("assess", &state, CheckpointOptions::default())
            .unwrap();

        // Clobber the blob, then recover.
        f.persistence
            .save("deployment", "assess", json!({"corrupted": true}))
            .unwrap();
        let record = f
            .recovery
            .recover_from_checkpoint("assess", &checkpoint.checkpoint_id)
            .unwrap();
        assert_eq!(record.version_id, checkpoint.version_id);

        let blob = f.persistence.load("deployment", "assess").unwrap();
        assert_eq!(blob.content, state);
    }

    #[test]
    fn recover_missing_checkpoint_fails() {
        let f = fixture();
        let err = f
            .recovery
            .recover_from_checkpoint("assess", "chk-0-missing")
            .unwrap_err();
        assert_eq!(err.kind(), "CheckpointNotFound");
    }

    #[test]
    fn recovery_lifecycle_updates_history_and_last_used() {
        let f = fixture();
        let checkpoint = f
            .recovery
            .create_checkpoint("construct", &json!(1), CheckpointOptions::default())
            .unwrap();

        let record = f
            .recovery
            .recover_from_checkpoint("construct", &checkpoint.checkpoint_id)
            .unwrap();
        let stats = f.recovery.statistics(Some("construct")).unwrap();
        assert_eq!(stats.recoveries_in_progress, 1);

        let completed = f
            .recovery
            .complete_recovery(&record.recovery_id, true, Some("resumed".to_string()))
            .unwrap();
        assert_eq!(completed.success, Some(true));

        let stats = f.recovery.statistics(Some("construct")).unwrap();
        assert_eq!(stats.recoveries_in_progress, 0);
        assert_eq!(stats.successful_recoveries, 1);
        assert!((stats.success_rate - 1.0).abs() < f64::EPSILON);

        let updated = f
            .recovery
            .get_checkpoint("construct", &checkpoint.checkpoint_id)
            .unwrap();
        assert!(updated.last_used_at >= checkpoint.last_used_at);

        let history = f.recovery.recovery_history("construct", 10).unwrap();
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn rollback_restores_older_version() {
        let f = fixture();
        let first = f
            .recovery
            .create_checkpoint("execute", &json!({"rev": 1}), CheckpointOptions::default())
            .unwrap();
        f.recovery
            .create_checkpoint("execute", &json!({"rev": 2}), CheckpointOptions::default())
            .unwrap();

        let record = f.recovery.rollback("execute", &first.version_id).unwrap();
        assert_eq!(record.to_version, first.version_id);
        assert!(record.from_version.is_some());

        let blob = f.persistence.load("deployment", "execute").unwrap();
        assert_eq!(blob.content, json!({"rev": 1}));

        let completed = f
            .recovery
            .complete_rollback(&record.rollback_id, true)
            .unwrap();
        assert_eq!(completed.success, Some(true));
        assert_eq!(f.recovery.rollback_history("execute", 10).unwrap().len(), 1);
    }

    #[test]
    fn rollback_to_missing_version_fails() {
        let f = fixture();
        let err = f.recovery.rollback("execute", "ver-0-missing").unwrap_err();
        assert_eq!(err.kind(), "VersionNotFound");
    }

    #[test]
    fn plan_unavailable_without_checkpoints() {
        let f = fixture();
        let plan = f.recovery.recovery_plan("assess").unwrap();
        assert!(!plan.available);
        assert!(plan.reason.is_some());
        assert!(plan.options.is_empty());
    }

    #[test]
    fn plan_offers_resume_skip_and_rollbacks() {
        let f = fixture();
        f.recovery
            .create_checkpoint("assess", &json!(1), CheckpointOptions::default())
            .unwrap();
        let latest = f
            .recovery
            .create_checkpoint("assess", &json!(2), CheckpointOptions::default())
            .unwrap();

        let plan = f.recovery.recovery_plan("assess").unwrap();
        assert!(plan.available);
        assert!(matches!(
            &plan.options[0],
            RecoveryOption::ResumeCurrent { checkpoint_id, .. }
                if *checkpoint_id == latest.checkpoint_id
        ));
        assert!(matches!(&plan.options[1], RecoveryOption::SkipToNext { .. }));
        let rollback_count = plan
            .options
            .iter()
            .filter(|o| matches!(o, RecoveryOption::RollbackTo { .. }))
            .count();
        assert_eq!(rollback_count, 2);
        assert!(
            plan.recommendation
                .unwrap()
                .contains(&latest.checkpoint_id)
        );
    }

    #[test]
    fn checkpoint_retention_caps_count_and_keeps_latest() {
        let dir = tempdir().unwrap();
        let events = EventSender::disabled();
        let persistence = Arc::new(StatePersistence::new(dir.path(), events.clone()).unwrap());
        let versioning = Arc::new(StateVersioning::new(dir.path(), events.clone()).unwrap());
        let recovery = StateRecovery::new(
            dir.path(),
            "deployment",
            persistence,
            versioning,
            events,
        )
        .unwrap()
        .max_checkpoints(2);

        let mut last = None;
        for i in 0..5 {
            last = Some(
                recovery
                    .create_checkpoint("assess", &json!(i), CheckpointOptions::default())
                    .unwrap(),
            );
        }

        let list = recovery
            .list_checkpoints("assess", ListOptions::default())
            .unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].checkpoint_id, last.unwrap().checkpoint_id);
    }

    #[test]
    fn phases_with_checkpoints_lists_each_phase_once() {
        let f = fixture();
        f.recovery
            .create_checkpoint("assess", &json!(1), CheckpointOptions::default())
            .unwrap();
        f.recovery
            .create_checkpoint("assess", &json!(2), CheckpointOptions::default())
            .unwrap();
        f.recovery
            .create_checkpoint("construct", &json!(1), CheckpointOptions::default())
            .unwrap();

        assert_eq!(
            f.recovery.phases_with_checkpoints().unwrap(),
            vec!["assess".to_string(), "construct".to_string()]
        );
    }
}
