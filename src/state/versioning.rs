//! Append-only version history per phase with integrity checks.
//!
//! Each version lives in its own file under `<root>/versions/<phase>/`,
//! holding metadata plus the full state. Checksums are SHA-256 over the
//! canonical encoding and are recomputed on read, so corruption surfaces as
//! `ChecksumMismatchError` rather than silently flowing downstream.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::persistence::retry_io;
use super::sanitize_key;
use crate::canonical;
use crate::errors::StateError;
use crate::events::{DeployEvent, EventSender};
use crate::util::generate_id;

/// Version metadata. The state itself is stored alongside but not carried
/// here; use [`StateVersioning::load_state`] to get verified content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub version_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_version_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub checksum: String,
    pub size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VersionRecord {
    version: Version,
    state: Value,
}

/// Options for [`StateVersioning::create_version`].
#[derive(Debug, Clone, Default)]
pub struct CreateVersionOptions {
    /// Parent version; defaults to the current version of the phase.
    pub parent_id: Option<String>,
    pub tag: Option<String>,
    pub message: Option<String>,
}

/// Result of comparing two versions.
#[derive(Debug, Clone, Serialize)]
pub struct VersionDiff {
    pub size_delta: i64,
    pub checksum_equal: bool,
    pub age_delta_ms: i64,
}

/// Listing options; newest-first by default.
#[derive(Debug, Clone, Copy)]
pub struct ListOptions {
    pub limit: usize,
    pub skip: usize,
    pub reverse: bool,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            limit: usize::MAX,
            skip: 0,
            reverse: true,
        }
    }
}

pub struct StateVersioning {
    dir: PathBuf,
    max_versions: usize,
    retention_days: i64,
    events: EventSender,
}

impl StateVersioning {
    pub fn new(root: impl Into<PathBuf>, events: EventSender) -> Result<Self, StateError> {
        let dir = root.into().join("versions");
        retry_io(&dir, || std::fs::create_dir_all(&dir))?;
        Ok(Self {
            dir,
            max_versions: 100,
            retention_days: 30,
            events,
        })
    }

    pub fn max_versions(mut self, max: usize) -> Self {
        self.max_versions = max.max(1);
        self
    }

    pub fn retention_days(mut self, days: i64) -> Self {
        self.retention_days = days;
        self
    }

    fn phase_dir(&self, phase: &str) -> PathBuf {
        self.dir.join(sanitize_key(phase))
    }

    fn version_path(&self, phase: &str, version_id: &str) -> PathBuf {
        self.phase_dir(phase)
            .join(format!("{}.json", sanitize_key(version_id)))
    }

    /// Append a new version of `state`. The parent defaults to the current
    /// version; a tag is taken away from any prior holder.
    pub fn create_version(
        &self,
        phase: &str,
        state: &Value,
        opts: CreateVersionOptions,
    ) -> Result<Version, StateError> {
        let encoded = canonical::encode(state)?;
        let parent_version_id = match opts.parent_id {
            Some(id) => {
                // Parent must exist in this phase's chain.
                self.get_version(phase, &id)?;
                Some(id)
            }
            None => self.current_version(phase)?.map(|v| v.version_id),
        };

        if let Some(ref tag) = opts.tag {
            self.untag(phase, tag)?;
        }

        let version = Version {
            version_id: generate_id("ver"),
            parent_version_id,
            created_at: Utc::now(),
            tag: opts.tag,
            checksum: canonical::checksum_bytes(encoded.as_bytes()),
            size: encoded.len(),
            message: opts.message,
        };

        let phase_dir = self.phase_dir(phase);
        retry_io(&phase_dir, || std::fs::create_dir_all(&phase_dir))?;
        self.write_record(
            phase,
            &VersionRecord {
                version: version.clone(),
                state: state.clone(),
            },
        )?;

        self.prune(phase, &version.version_id)?;
        tracing::debug!(
            target: "stratus::state",
            phase,
            version_id = %version.version_id,
            size = version.size,
            "version created"
        );
        Ok(version)
    }

    /// A tagged version promoted as a recovery point for the phase's
    /// current state.
    pub fn create_snapshot(
        &self,
        phase: &str,
        tag: &str,
        message: Option<String>,
    ) -> Result<Version, StateError> {
        let current = self.current_version(phase)?.ok_or_else(|| {
            StateError::VersionNotFound {
                phase: phase.to_string(),
                version_id: "<current>".to_string(),
            }
        })?;
        let state = self.load_state(phase, &current.version_id)?;
        self.create_version(
            phase,
            &state,
            CreateVersionOptions {
                parent_id: Some(current.version_id),
                tag: Some(tag.to_string()),
                message,
            },
        )
    }

    pub fn get_version(&self, phase: &str, version_id: &str) -> Result<Version, StateError> {
        Ok(self.read_record(phase, version_id)?.version)
    }

    /// Load a version's state, verifying its checksum. A mismatch emits a
    /// `checksum-mismatch` warning event and fails.
    pub fn load_state(&self, phase: &str, version_id: &str) -> Result<Value, StateError> {
        let record = self.read_record(phase, version_id)?;
        let actual = canonical::checksum(&record.state)?;
        if actual != record.version.checksum {
            self.events.emit(DeployEvent::ChecksumMismatch {
                phase: phase.to_string(),
                version_id: version_id.to_string(),
            });
            tracing::warn!(
                target: "stratus::state",
                phase,
                version_id,
                "checksum mismatch, treating version as corrupt"
            );
            return Err(StateError::ChecksumMismatch {
                version_id: version_id.to_string(),
                expected: record.version.checksum,
                actual,
            });
        }
        Ok(record.state)
    }

    /// Recompute the checksum of `state` against the recorded one.
    pub fn validate_checksum(
        &self,
        phase: &str,
        version_id: &str,
        state: &Value,
    ) -> Result<bool, StateError> {
        let version = self.get_version(phase, version_id)?;
        let actual = canonical::checksum(state)?;
        if actual != version.checksum {
            self.events.emit(DeployEvent::ChecksumMismatch {
                phase: phase.to_string(),
                version_id: version_id.to_string(),
            });
            return Ok(false);
        }
        Ok(true)
    }

    /// Latest version by (created_at, version_id).
    pub fn current_version(&self, phase: &str) -> Result<Option<Version>, StateError> {
        Ok(self.all_versions(phase)?.into_iter().next_back())
    }

    pub fn get_version_by_tag(
        &self,
        phase: &str,
        tag: &str,
    ) -> Result<Option<Version>, StateError> {
        Ok(self
            .all_versions(phase)?
            .into_iter()
            .find(|v| v.tag.as_deref() == Some(tag)))
    }

    pub fn list_versions(
        &self,
        phase: &str,
        opts: ListOptions,
    ) -> Result<Vec<Version>, StateError> {
        let mut versions = self.all_versions(phase)?;
        if opts.reverse {
            versions.reverse();
        }
        Ok(versions.into_iter().skip(opts.skip).take(opts.limit).collect())
    }

    pub fn compare_versions(&self, a: &Version, b: &Version) -> VersionDiff {
        VersionDiff {
            size_delta: b.size as i64 - a.size as i64,
            checksum_equal: a.checksum == b.checksum,
            age_delta_ms: (b.created_at - a.created_at).num_milliseconds(),
        }
    }

    /// Ancestor list starting at `version_id`, following parent references.
    /// Terminates at the root or after `depth` entries.
    pub fn version_chain(
        &self,
        phase: &str,
        version_id: &str,
        depth: usize,
    ) -> Result<Vec<Version>, StateError> {
        let mut chain = Vec::new();
        let mut cursor = Some(version_id.to_string());
        while let Some(id) = cursor {
            if chain.len() >= depth {
                break;
            }
            let version = self.get_version(phase, &id)?;
            cursor = version.parent_version_id.clone();
            chain.push(version);
        }
        Ok(chain)
    }

    pub fn clear_phase_versions(&self, phase: &str) -> Result<usize, StateError> {
        let phase_dir = self.phase_dir(phase);
        if !phase_dir.exists() {
            return Ok(0);
        }
        let count = self.all_versions(phase)?.len();
        retry_io(&phase_dir, || std::fs::remove_dir_all(&phase_dir))?;
        Ok(count)
    }

    pub fn version_count(&self, phase: &str) -> Result<usize, StateError> {
        Ok(self.all_versions(phase)?.len())
    }

    /// All versions sorted ascending by (created_at, version_id).
    fn all_versions(&self, phase: &str) -> Result<Vec<Version>, StateError> {
        let phase_dir = self.phase_dir(phase);
        if !phase_dir.exists() {
            return Ok(Vec::new());
        }
        let entries = retry_io(&phase_dir, || {
            std::fs::read_dir(&phase_dir)?.collect::<std::io::Result<Vec<_>>>()
        })?;

        let mut versions = Vec::new();
        for entry in entries {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                let raw = retry_io(&path, || std::fs::read_to_string(&path))?;
                let record: VersionRecord = serde_json::from_str(&raw)?;
                versions.push(record.version);
            }
        }
        versions.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.version_id.cmp(&b.version_id))
        });
        Ok(versions)
    }

    /// Retention: cap at `max_versions` and drop versions older than
    /// `retention_days`. The current (just-created) version is never pruned.
    fn prune(&self, phase: &str, current_id: &str) -> Result<(), StateError> {
        let versions = self.all_versions(phase)?;
        let cutoff = Utc::now() - Duration::days(self.retention_days);
        let overflow = versions.len().saturating_sub(self.max_versions);

        for (index, version) in versions.iter().enumerate() {
            if version.version_id == current_id {
                continue;
            }
            let too_many = index < overflow;
            let too_old = version.created_at < cutoff;
            if too_many || too_old {
                let path = self.version_path(phase, &version.version_id);
                retry_io(&path, || std::fs::remove_file(&path))?;
                tracing::debug!(
                    target: "stratus::state",
                    phase,
                    version_id = %version.version_id,
                    "version pruned"
                );
            }
        }
        Ok(())
    }

    fn untag(&self, phase: &str, tag: &str) -> Result<(), StateError> {
        if let Some(mut holder) = self.get_version_by_tag(phase, tag)? {
            let state = self.read_record(phase, &holder.version_id)?.state;
            holder.tag = None;
            self.write_record(
                phase,
                &VersionRecord {
                    version: holder,
                    state,
                },
            )?;
        }
        Ok(())
    }

    fn read_record(&self, phase: &str, version_id: &str) -> Result<VersionRecord, StateError> {
        let path = self.version_path(phase, version_id);
        if !path.exists() {
            return Err(StateError::VersionNotFound {
                phase: phase.to_string(),
                version_id: version_id.to_string(),
            });
        }
        let raw = retry_io(&path, || std::fs::read_to_string(&path))?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn write_record(&self, phase: &str, record: &VersionRecord) -> Result<(), StateError> {
        let path = self.version_path(phase, &record.version.version_id);
        let encoded = canonical::encode(record)?;
        write_atomic(&path, encoded.as_bytes())
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StateError> {
    let tmp = path.with_extension("json.tmp");
    retry_io(&tmp, || std::fs::write(&tmp, bytes))?;
    retry_io(path, || std::fs::rename(&tmp, path))
}
