//! Six-phase deployment pipeline engine.
//!
//! A pipeline is a value holding a map from phase to handler closure;
//! orchestrator flavors are constructors that populate the map. Execution
//! walks the fixed sequence
//! `initialization -> validation -> preparation -> deployment ->
//! verification -> monitoring`, timing each handler and recording the
//! outcome.
//!
//! `initialization`, `validation` and `deployment` are critical: their
//! failure aborts the pipeline. The other phases record their failure and
//! execution continues (unless `continue_on_error` is off).

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;

use crate::errors::OrchestratorError;
use crate::events::{DeployEvent, EventSender};
use crate::util::CancelFlag;

/// The fixed phase sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelinePhase {
    Initialization,
    Validation,
    Preparation,
    Deployment,
    Verification,
    Monitoring,
}

impl PipelinePhase {
    pub const SEQUENCE: [PipelinePhase; 6] = [
        PipelinePhase::Initialization,
        PipelinePhase::Validation,
        PipelinePhase::Preparation,
        PipelinePhase::Deployment,
        PipelinePhase::Verification,
        PipelinePhase::Monitoring,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelinePhase::Initialization => "initialization",
            PipelinePhase::Validation => "validation",
            PipelinePhase::Preparation => "preparation",
            PipelinePhase::Deployment => "deployment",
            PipelinePhase::Verification => "verification",
            PipelinePhase::Monitoring => "monitoring",
        }
    }

    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            PipelinePhase::Initialization | PipelinePhase::Validation | PipelinePhase::Deployment
        )
    }

    pub fn is_valid_phase(name: &str) -> bool {
        Self::SEQUENCE.iter().any(|p| p.as_str() == name)
    }

    pub fn is_critical_phase(name: &str) -> bool {
        Self::SEQUENCE
            .iter()
            .any(|p| p.as_str() == name && p.is_critical())
    }
}

impl std::fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseState {
    #[default]
    Pending,
    Running,
    Complete,
    Error,
}

impl PhaseState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseState::Pending => "pending",
            PhaseState::Running => "running",
            PhaseState::Complete => "complete",
            PhaseState::Error => "error",
        }
    }
}

/// What a handler hands back on success.
#[derive(Debug, Clone, Default)]
pub struct PhaseOutput {
    pub result: Value,
    /// Non-fatal problems; the phase still counts as complete.
    pub warnings: Vec<String>,
}

impl PhaseOutput {
    pub fn ok(result: Value) -> Self {
        Self {
            result,
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(result: Value, warning: impl Into<String>) -> Self {
        Self {
            result,
            warnings: vec![warning.into()],
        }
    }
}

/// Recorded outcome of one executed phase.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseResult {
    pub success: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub result: Value,
}

/// Per-phase slice of the execution summary.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseSummary {
    pub state: PhaseState,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryStats {
    pub completed: usize,
    pub failed: usize,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSummary {
    pub deployment_id: String,
    pub orchestrator: String,
    pub total_duration_ms: u64,
    pub phases: BTreeMap<String, PhaseSummary>,
    pub stats: SummaryStats,
}

/// Identity of a running pipeline, exposed to handlers and observers.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionContext {
    pub deployment_id: String,
    pub orchestrator: String,
    pub domain: String,
}

/// Audit sink consumed by the engine on phase boundaries and errors.
pub trait PipelineAuditor: Send + Sync {
    fn log_phase(&self, domain: &str, phase: &str, state: &str);
    fn log_error(&self, domain: &str, phase: &str, error: &str);
}

pub type HandlerFuture = BoxFuture<'static, anyhow::Result<PhaseOutput>>;
pub type PhaseHandler = Box<dyn Fn() -> HandlerFuture + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct ExecuteOptions {
    pub continue_on_error: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            continue_on_error: true,
        }
    }
}

pub struct PhasePipeline {
    context: ExecutionContext,
    handlers: BTreeMap<PipelinePhase, PhaseHandler>,
    states: BTreeMap<PipelinePhase, PhaseState>,
    results: BTreeMap<PipelinePhase, PhaseResult>,
    events: EventSender,
    auditor: Option<Arc<dyn PipelineAuditor>>,
    cancel: CancelFlag,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl PhasePipeline {
    pub fn new(
        deployment_id: impl Into<String>,
        orchestrator: impl Into<String>,
        domain: impl Into<String>,
        events: EventSender,
    ) -> Self {
        let states = PipelinePhase::SEQUENCE
            .into_iter()
            .map(|p| (p, PhaseState::Pending))
            .collect();
        Self {
            context: ExecutionContext {
                deployment_id: deployment_id.into(),
                orchestrator: orchestrator.into(),
                domain: domain.into(),
            },
            handlers: BTreeMap::new(),
            states,
            results: BTreeMap::new(),
            events,
            auditor: None,
            cancel: CancelFlag::new(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Install the handler for one phase. Later registrations replace
    /// earlier ones.
    pub fn on(mut self, phase: PipelinePhase, handler: PhaseHandler) -> Self {
        self.handlers.insert(phase, handler);
        self
    }

    pub fn with_auditor(mut self, auditor: Arc<dyn PipelineAuditor>) -> Self {
        self.auditor = Some(auditor);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the sequence. Fails on a critical phase failure or cancellation;
    /// the per-phase record remains queryable either way.
    pub async fn execute(
        &mut self,
        opts: ExecuteOptions,
    ) -> Result<ExecutionSummary, OrchestratorError> {
        self.started_at = Some(Utc::now());

        for phase in PipelinePhase::SEQUENCE {
            if self.cancel.is_cancelled() {
                self.finished_at = Some(Utc::now());
                return Err(OrchestratorError::Cancelled);
            }

            self.transition(phase, PhaseState::Pending, PhaseState::Running);
            self.events.emit(DeployEvent::PhaseStarted {
                domain: self.context.domain.clone(),
                phase: phase.as_str().to_string(),
            });
            if let Some(ref auditor) = self.auditor {
                auditor.log_phase(&self.context.domain, phase.as_str(), "running");
            }

            let started = Utc::now();
            let outcome = match self.handlers.get(&phase) {
                Some(handler) => handler().await,
                // A phase without a handler has nothing to do.
                None => Ok(PhaseOutput::default()),
            };
            let finished = Utc::now();
            let duration_ms = (finished - started).num_milliseconds().max(0) as u64;

            match outcome {
                Ok(output) => {
                    self.transition(phase, PhaseState::Running, PhaseState::Complete);
                    self.events.emit(DeployEvent::PhaseCompleted {
                        domain: self.context.domain.clone(),
                        phase: phase.as_str().to_string(),
                        success: true,
                        duration_ms,
                    });
                    if let Some(ref auditor) = self.auditor {
                        auditor.log_phase(&self.context.domain, phase.as_str(), "complete");
                    }
                    self.results.insert(
                        phase,
                        PhaseResult {
                            success: true,
                            errors: Vec::new(),
                            warnings: output.warnings,
                            duration_ms,
                            started_at: started,
                            finished_at: finished,
                            result: output.result,
                        },
                    );
                }
                Err(error) => {
                    let message = format!("{error:#}");
                    self.transition(phase, PhaseState::Running, PhaseState::Error);
                    self.events.emit(DeployEvent::PhaseCompleted {
                        domain: self.context.domain.clone(),
                        phase: phase.as_str().to_string(),
                        success: false,
                        duration_ms,
                    });
                    if let Some(ref auditor) = self.auditor {
                        auditor.log_error(&self.context.domain, phase.as_str(), &message);
                    }
                    tracing::error!(
                        target: "stratus::pipeline",
                        domain = %self.context.domain,
                        phase = %phase,
                        error = %message,
                        "phase failed"
                    );
                    self.results.insert(
                        phase,
                        PhaseResult {
                            success: false,
                            errors: vec![message.clone()],
                            warnings: Vec::new(),
                            duration_ms,
                            started_at: started,
                            finished_at: finished,
                            result: Value::Null,
                        },
                    );

                    if phase.is_critical() || !opts.continue_on_error {
                        self.finished_at = Some(Utc::now());
                        return Err(OrchestratorError::CriticalPhaseFailed {
                            phase: phase.as_str().to_string(),
                            message,
                        });
                    }
                }
            }
        }

        self.finished_at = Some(Utc::now());
        Ok(self.generate_execution_summary())
    }

    pub fn get_phase_status(&self, phase: PipelinePhase) -> PhaseState {
        self.states.get(&phase).copied().unwrap_or_default()
    }

    pub fn get_phase_result(&self, phase: PipelinePhase) -> Option<&PhaseResult> {
        self.results.get(&phase)
    }

    pub fn execution_time(&self) -> u64 {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => (end - start).num_milliseconds().max(0) as u64,
            (Some(start), None) => (Utc::now() - start).num_milliseconds().max(0) as u64,
            _ => 0,
        }
    }

    pub fn execution_context(&self) -> &ExecutionContext {
        &self.context
    }

    /// True when every executed phase succeeded without warnings.
    pub fn is_clean(&self) -> bool {
        self.results
            .values()
            .all(|r| r.success && r.warnings.is_empty())
    }

    /// All warnings recorded across phases.
    pub fn warnings(&self) -> Vec<String> {
        self.results
            .values()
            .flat_map(|r| r.warnings.iter().cloned())
            .collect()
    }

    pub fn generate_execution_summary(&self) -> ExecutionSummary {
        let mut phases = BTreeMap::new();
        let mut completed = 0usize;
        let mut failed = 0usize;

        for phase in PipelinePhase::SEQUENCE {
            let state = self.get_phase_status(phase);
            match state {
                PhaseState::Complete => completed += 1,
                PhaseState::Error => failed += 1,
                _ => {}
            }
            let result = self.results.get(&phase);
            phases.insert(
                phase.as_str().to_string(),
                PhaseSummary {
                    state,
                    duration_ms: result.map(|r| r.duration_ms).unwrap_or(0),
                    error: result.and_then(|r| r.errors.first().cloned()),
                },
            );
        }

        let executed = completed + failed;
        ExecutionSummary {
            deployment_id: self.context.deployment_id.clone(),
            orchestrator: self.context.orchestrator.clone(),
            total_duration_ms: self.execution_time(),
            phases,
            stats: SummaryStats {
                completed,
                failed,
                success_rate: if executed == 0 {
                    0.0
                } else {
                    completed as f64 / executed as f64
                },
            },
        }
    }

    fn transition(&mut self, phase: PipelinePhase, from: PhaseState, to: PhaseState) {
        self.states.insert(phase, to);
        self.events.emit(DeployEvent::PhaseTransition {
            domain: self.context.domain.clone(),
            phase: phase.as_str().to_string(),
            from: from.as_str().to_string(),
            to: to.as_str().to_string(),
        });
    }
}
