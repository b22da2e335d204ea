//! Typed error hierarchy for the stratus orchestration core.
//!
//! One enum per subsystem:
//! - `ManifestError` — wrangler.toml read/parse/write failures
//! - `StateError` — persistence, versioning and recovery failures
//! - `CapabilityError` — capability registry lookups
//! - `PlatformError` — platform CLI spawn/exit/timeout failures
//! - `OrchestratorError` — deployment-level failures and cancellation
//!
//! Every variant maps to a stable `kind()` identifier that callers and the
//! audit log can switch on without matching on the Rust type.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the manifest mutator.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to parse manifest at {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Manifest validation failed: {0}")]
    Validation(String),

    #[error("Failed to read manifest at {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write manifest at {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ManifestError {
    pub fn kind(&self) -> &'static str {
        match self {
            ManifestError::Parse { .. } => "ConfigParseError",
            ManifestError::Validation(_) => "ConfigValidationError",
            ManifestError::ReadFailed { .. } | ManifestError::WriteFailed { .. } => {
                "StorageIOError"
            }
        }
    }
}

/// Errors from the state layer (persistence, versioning, recovery).
#[derive(Debug, Error)]
pub enum StateError {
    #[error("State store I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("State content is not encodable: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Checksum mismatch for version {version_id}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        version_id: String,
        expected: String,
        actual: String,
    },

    #[error("No state found for workflow {workflow}, phase {phase}")]
    BlobNotFound { workflow: String, phase: String },

    #[error("Version {version_id} not found for phase {phase}")]
    VersionNotFound { phase: String, version_id: String },

    #[error("Checkpoint {checkpoint_id} not found for phase {phase}")]
    CheckpointNotFound {
        phase: String,
        checkpoint_id: String,
    },

    #[error("Recovery {recovery_id} not found")]
    RecoveryNotFound { recovery_id: String },

    #[error("Rollback {rollback_id} not found")]
    RollbackNotFound { rollback_id: String },

    #[error("Unknown workflow phase: {0}")]
    UnknownPhase(String),

    #[error("Phase {0} is already active")]
    AlreadyInPhase(String),

    #[error("Phase {0} has not been entered")]
    NotInPhase(String),
}

impl StateError {
    pub fn kind(&self) -> &'static str {
        match self {
            StateError::Io { .. } => "StorageIOError",
            StateError::Serialization(_) => "SerializationError",
            StateError::ChecksumMismatch { .. } => "ChecksumMismatchError",
            StateError::BlobNotFound { .. } => "StateBlobNotFound",
            StateError::VersionNotFound { .. } => "VersionNotFound",
            StateError::CheckpointNotFound { .. } => "CheckpointNotFound",
            StateError::RecoveryNotFound { .. } => "RecoveryNotFound",
            StateError::RollbackNotFound { .. } => "RollbackNotFound",
            StateError::UnknownPhase(_) => "UnknownPhaseError",
            StateError::AlreadyInPhase(_) => "AlreadyInPhaseError",
            StateError::NotInPhase(_) => "NotInPhaseError",
        }
    }
}

/// Errors from the capability registry.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("Unknown capability: {0}")]
    Unknown(String),
}

impl CapabilityError {
    pub fn kind(&self) -> &'static str {
        match self {
            CapabilityError::Unknown(_) => "UnknownCapabilityError",
        }
    }
}

/// Errors from platform CLI invocations (wrangler deploy, d1 commands).
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Failed to spawn `{command}`: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with code {code}: {stderr}")]
    CliFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("`{command}` timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },

    #[error("`{command}` produced more than {limit} bytes of output")]
    OutputOverflow { command: String, limit: usize },

    #[error("`{command}` terminated by cancellation")]
    Cancelled { command: String },
}

impl PlatformError {
    pub fn kind(&self) -> &'static str {
        match self {
            PlatformError::Timeout { .. } => "PlatformCLITimeout",
            PlatformError::Cancelled { .. } => "DeploymentCancelled",
            PlatformError::SpawnFailed { .. }
            | PlatformError::CliFailed { .. }
            | PlatformError::OutputOverflow { .. } => "PlatformCLIError",
        }
    }

    /// Exit code of the child, where one exists.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            PlatformError::CliFailed { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Deployment-level failures surfaced by the multi-domain orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Deployment cancelled")]
    Cancelled,

    #[error("Critical phase {phase} failed: {message}")]
    CriticalPhaseFailed { phase: String, message: String },

    #[error("Domain resolution failed: {0}")]
    DomainResolution(String),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrchestratorError {
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::Cancelled => "DeploymentCancelled",
            OrchestratorError::CriticalPhaseFailed { .. } => "CriticalPhaseFailed",
            OrchestratorError::DomainResolution(_) => "DomainResolutionError",
            OrchestratorError::Manifest(e) => e.kind(),
            OrchestratorError::State(e) => e.kind(),
            OrchestratorError::Platform(e) => e.kind(),
            OrchestratorError::Other(_) => "InternalError",
        }
    }
}
