//! Data-bridge workflow integrator.
//!
//! Coordinates the three state services across the four-phase migration
//! workflow `assess -> construct -> orchestrate -> execute`. A fifth
//! `identify` phase exists in the catalog but is not wired into the
//! sequence; entering it is still valid.
//!
//! State for each phase is independent: operations on one phase never read
//! or write another's records.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::errors::StateError;
use crate::events::{DeployEvent, EventSender};
use crate::state::{
    Checkpoint, CheckpointOptions, ListOptions, RecoveryPlan, RecoveryRecord, RollbackRecord,
    StatePersistence, StateRecovery, StateVersioning,
};

/// Workflow phase catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowPhase {
    Identify,
    Assess,
    Construct,
    Orchestrate,
    Execute,
}

impl WorkflowPhase {
    /// Every phase the bridge knows about, wired or not.
    pub const ALL: [WorkflowPhase; 5] = [
        WorkflowPhase::Identify,
        WorkflowPhase::Assess,
        WorkflowPhase::Construct,
        WorkflowPhase::Orchestrate,
        WorkflowPhase::Execute,
    ];

    /// The wired workflow sequence. `Identify` is defined but dormant.
    pub const SEQUENCE: [WorkflowPhase; 4] = [
        WorkflowPhase::Assess,
        WorkflowPhase::Construct,
        WorkflowPhase::Orchestrate,
        WorkflowPhase::Execute,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowPhase::Identify => "identify",
            WorkflowPhase::Assess => "assess",
            WorkflowPhase::Construct => "construct",
            WorkflowPhase::Orchestrate => "orchestrate",
            WorkflowPhase::Execute => "execute",
        }
    }

    pub fn parse(phase_id: &str) -> Result<Self, StateError> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == phase_id.to_lowercase())
            .ok_or_else(|| StateError::UnknownPhase(phase_id.to_string()))
    }

    /// The next phase in the wired sequence, if any.
    pub fn next(&self) -> Option<WorkflowPhase> {
        let index = Self::SEQUENCE.iter().position(|p| p == self)?;
        Self::SEQUENCE.get(index + 1).copied()
    }
}

impl std::fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-phase numbers reported by [`DataBridge::workflow_statistics`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct PhaseStatistics {
    pub active: bool,
    pub entered: bool,
    pub state_size: usize,
    pub checkpoints: usize,
}

const WORKFLOW: &str = "data-bridge";

pub struct DataBridge {
    persistence: Arc<StatePersistence>,
    recovery: StateRecovery,
    active: BTreeSet<String>,
    phase_states: BTreeMap<String, Value>,
    events: EventSender,
}

impl DataBridge {
    /// Instantiate persistence, versioning and recovery under `root`.
    pub fn initialize(root: impl Into<PathBuf>, events: EventSender) -> Result<Self, StateError> {
        let root = root.into();
        let persistence = Arc::new(StatePersistence::new(&root, events.clone())?);
        let versioning = Arc::new(StateVersioning::new(&root, events.clone())?);
        let recovery = StateRecovery::new(
            &root,
            WORKFLOW,
            Arc::clone(&persistence),
            versioning,
            events.clone(),
        )?;

        events.emit(DeployEvent::InitializationComplete {
            component: WORKFLOW.to_string(),
        });
        Ok(Self {
            persistence,
            recovery,
            active: BTreeSet::new(),
            phase_states: BTreeMap::new(),
            events,
        })
    }

    /// Mark a phase active and store its entry context.
    pub fn enter_phase(&mut self, phase_id: &str, context: Value) -> Result<(), StateError> {
        let phase = WorkflowPhase::parse(phase_id)?;
        let key = phase.as_str().to_string();
        if self.active.contains(&key) {
            return Err(StateError::AlreadyInPhase(key));
        }
        self.active.insert(key.clone());
        self.phase_states.insert(key, context);
        tracing::info!(target: "stratus::bridge", phase = %phase, "entered workflow phase");
        Ok(())
    }

    /// Mark a phase inactive; its state is kept.
    pub fn exit_phase(&mut self, phase_id: &str) -> Result<(), StateError> {
        let phase = WorkflowPhase::parse(phase_id)?;
        self.active.remove(phase.as_str());
        Ok(())
    }

    pub fn is_active(&self, phase_id: &str) -> bool {
        self.active.contains(phase_id)
    }

    pub fn phase_state(&self, phase_id: &str) -> Option<&Value> {
        self.phase_states.get(phase_id)
    }

    /// Checkpoint a phase's result. The phase must have been entered.
    pub fn create_phase_checkpoint(
        &mut self,
        phase_id: &str,
        result: &Value,
        opts: CheckpointOptions,
    ) -> Result<Checkpoint, StateError> {
        let phase = WorkflowPhase::parse(phase_id)?;
        if !self.phase_states.contains_key(phase.as_str()) {
            return Err(StateError::NotInPhase(phase.as_str().to_string()));
        }
        let checkpoint = self
            .recovery
            .create_checkpoint(phase.as_str(), result, opts)?;
        self.phase_states
            .insert(phase.as_str().to_string(), result.clone());

        self.events.emit(DeployEvent::PhaseCheckpointCreated {
            phase: phase.as_str().to_string(),
            checkpoint_id: checkpoint.checkpoint_id.clone(),
        });
        Ok(checkpoint)
    }

    /// Scan every phase for recoverable checkpoints and merge the options.
    pub fn recovery_plan(&self) -> Result<RecoveryPlan, StateError> {
        let mut options = Vec::new();
        let mut latest: Option<(DateTime<Utc>, String, String)> = None;

        for phase in WorkflowPhase::ALL {
            let plan = self.recovery.recovery_plan(phase.as_str())?;
            if !plan.available {
                continue;
            }
            options.extend(plan.options);
            if let Some(checkpoint) = self.recovery.latest_checkpoint(phase.as_str())? {
                let candidate = (
                    checkpoint.created_at,
                    phase.as_str().to_string(),
                    checkpoint.checkpoint_id,
                );
                if latest.as_ref().is_none_or(|best| candidate.0 > best.0) {
                    latest = Some(candidate);
                }
            }
        }

        match latest {
            None => Ok(RecoveryPlan::unavailable("no checkpoints in any phase")),
            Some((_, phase, checkpoint_id)) => Ok(RecoveryPlan {
                available: true,
                reason: None,
                options,
                recommendation: Some(format!(
                    "resume phase {phase} from checkpoint {checkpoint_id}"
                )),
            }),
        }
    }

    /// Locate the checkpoint's owning phase, restore its blob, and bring the
    /// in-memory phase state back.
    pub fn recover_from_checkpoint(
        &mut self,
        checkpoint_id: &str,
    ) -> Result<RecoveryRecord, StateError> {
        let phase = self.find_owning_phase(checkpoint_id)?;
        let record = self
            .recovery
            .recover_from_checkpoint(phase.as_str(), checkpoint_id)?;

        let blob = self.persistence.load(WORKFLOW, phase.as_str())?;
        self.phase_states
            .insert(phase.as_str().to_string(), blob.content);
        Ok(record)
    }

    pub fn complete_recovery(
        &self,
        recovery_id: &str,
        success: bool,
        message: Option<String>,
    ) -> Result<RecoveryRecord, StateError> {
        self.recovery.complete_recovery(recovery_id, success, message)
    }

    /// Roll a phase back `levels` versions along its parent chain.
    pub fn rollback_phase(
        &mut self,
        phase_id: &str,
        levels: usize,
    ) -> Result<RollbackRecord, StateError> {
        let phase = WorkflowPhase::parse(phase_id)?;
        let current = self
            .recovery
            .latest_checkpoint(phase.as_str())?
            .ok_or_else(|| StateError::CheckpointNotFound {
                phase: phase.as_str().to_string(),
                checkpoint_id: "<latest>".to_string(),
            })?;

        let chain = self.versioning_chain(phase.as_str(), &current.version_id, levels + 1)?;
        let target = chain
            .last()
            .filter(|_| chain.len() == levels + 1)
            .ok_or_else(|| StateError::VersionNotFound {
                phase: phase.as_str().to_string(),
                version_id: format!("<{levels} levels below {}>", current.version_id),
            })?;

        let record = self.recovery.rollback(phase.as_str(), &target.version_id)?;
        let blob = self.persistence.load(WORKFLOW, phase.as_str())?;
        self.phase_states
            .insert(phase.as_str().to_string(), blob.content);
        Ok(record)
    }

    pub fn complete_rollback(
        &self,
        rollback_id: &str,
        success: bool,
    ) -> Result<RollbackRecord, StateError> {
        self.recovery.complete_rollback(rollback_id, success)
    }

    /// Per-phase counts and sizes, keyed by phase name.
    pub fn workflow_statistics(&self) -> Result<BTreeMap<String, PhaseStatistics>, StateError> {
        let mut stats = BTreeMap::new();
        for phase in WorkflowPhase::ALL {
            let key = phase.as_str().to_string();
            let checkpoints = self
                .recovery
                .list_checkpoints(phase.as_str(), ListOptions::default())?
                .len();
            let state_size = self
                .phase_states
                .get(phase.as_str())
                .map(|v| v.to_string().len())
                .unwrap_or(0);
            stats.insert(
                key.clone(),
                PhaseStatistics {
                    active: self.active.contains(&key),
                    entered: self.phase_states.contains_key(&key),
                    state_size,
                    checkpoints,
                },
            );
        }
        Ok(stats)
    }

    pub fn recovery_services(&self) -> &StateRecovery {
        &self.recovery
    }

    fn find_owning_phase(&self, checkpoint_id: &str) -> Result<WorkflowPhase, StateError> {
        for phase in WorkflowPhase::ALL {
            let found = self
                .recovery
                .list_checkpoints(phase.as_str(), ListOptions::default())?
                .into_iter()
                .any(|c| c.checkpoint_id == checkpoint_id);
            if found {
                return Ok(phase);
            }
        }
        Err(StateError::CheckpointNotFound {
            phase: "<any>".to_string(),
            checkpoint_id: checkpoint_id.to_string(),
        })
    }

    fn versioning_chain(
        &self,
        phase: &str,
        version_id: &str,
        depth: usize,
    ) -> Result<Vec<crate::state::Version>, StateError> {
        // The recovery service owns the versioning handle; walk through it.
        self.recovery.version_chain(phase, version_id, depth)
    }
}
