//! Per-domain and per-deployment state records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{DeployMode, Environment};
use crate::database::DatabaseHandle;
use crate::health::HealthProbe;
use crate::pipeline::ExecutionSummary;
use crate::secrets::SecretRef;

/// Configuration for one deployable domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainConfig {
    pub name: String,
    /// Routes served by the worker, most specific first.
    #[serde(default)]
    pub routes: Vec<String>,
    /// Health probe override; the orchestrator default applies otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthProbe>,
}

impl DomainConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            routes: Vec::new(),
            health: None,
        }
    }
}

/// Where a domain currently is in its deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DomainStatus {
    #[default]
    Pending,
    Database,
    Secrets,
    Deployment,
    Validating,
    Completed,
    CompletedWithWarnings,
    Failed,
}

impl DomainStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainStatus::Pending => "pending",
            DomainStatus::Database => "database",
            DomainStatus::Secrets => "secrets",
            DomainStatus::Deployment => "deployment",
            DomainStatus::Validating => "validating",
            DomainStatus::Completed => "completed",
            DomainStatus::CompletedWithWarnings => "completed-with-warnings",
            DomainStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DomainStatus::Completed | DomainStatus::CompletedWithWarnings | DomainStatus::Failed
        )
    }
}

/// One recorded failure, attributed to a phase and an error kind.
#[derive(Debug, Clone, Serialize)]
pub struct DomainError {
    pub phase: String,
    pub kind: String,
    pub message: String,
}

/// Everything tracked for one domain across its pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct DomainState {
    pub name: String,
    pub orchestration_id: Option<String>,
    pub status: DomainStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseHandle>,
    pub secrets: Vec<SecretRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_summary: Option<ExecutionSummary>,
    pub errors: Vec<DomainError>,
    pub warnings: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl DomainState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            orchestration_id: None,
            status: DomainStatus::Pending,
            database: None,
            secrets: Vec::new(),
            worker_url: None,
            custom_url: None,
            phase_summary: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }
}

/// Overall outcome of a deployment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentStatus {
    #[default]
    Pending,
    Running,
    Completed,
    CompletedWithWarnings,
    Failed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Completed => "completed",
            DeploymentStatus::CompletedWithWarnings => "completed-with-warnings",
            DeploymentStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DeploymentStats {
    pub completed: usize,
    pub warnings: usize,
    pub failed: usize,
}

/// Final report handed to the caller and the command layer.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentReport {
    pub deployment_id: String,
    pub environment: Environment,
    pub mode: DeployMode,
    pub dry_run: bool,
    pub status: DeploymentStatus,
    pub stats: DeploymentStats,
    pub domains: Vec<DomainState>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub audit_log: String,
    /// Domains queued for rollback when `rollback_on_error` cut a batch
    /// short.
    pub rollback_scheduled: Vec<String>,
}

impl DeploymentReport {
    /// Deployment status from per-domain outcomes: any failure is a
    /// failure, any warning taints the run, otherwise clean.
    pub fn derive_status(domains: &[DomainState]) -> (DeploymentStatus, DeploymentStats) {
        let mut stats = DeploymentStats::default();
        for domain in domains {
            match domain.status {
                DomainStatus::Completed => stats.completed += 1,
                DomainStatus::CompletedWithWarnings => {
                    stats.completed += 1;
                    stats.warnings += 1;
                }
                DomainStatus::Failed => stats.failed += 1,
                _ => {}
            }
        }
        let status = if stats.failed > 0 {
            DeploymentStatus::Failed
        } else if stats.warnings > 0 {
            DeploymentStatus::CompletedWithWarnings
        } else {
            DeploymentStatus::Completed
        };
        (status, stats)
    }
}
