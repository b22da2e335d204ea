//! Typed deployment event channel.
//!
//! Orchestration tasks send [`DeployEvent`]s through a cloneable
//! [`EventSender`]; the command layer owns the receiving end and fans events
//! out to the console and the audit log. A dropped receiver never fails a
//! sender: events are best-effort observability, not control flow.

use serde::Serialize;
use tokio::sync::mpsc;

/// Which child-process stream a line of output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Everything observable the core does, as a typed event.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum DeployEvent {
    /// Pipeline phase state transition for a domain.
    PhaseTransition {
        domain: String,
        phase: String,
        from: String,
        to: String,
    },
    PhaseStarted {
        domain: String,
        phase: String,
    },
    PhaseCompleted {
        domain: String,
        phase: String,
        success: bool,
        duration_ms: u64,
    },
    StateSaved {
        workflow: String,
        phase: String,
        size: usize,
    },
    ChecksumMismatch {
        phase: String,
        version_id: String,
    },
    CheckpointCreated {
        phase: String,
        checkpoint_id: String,
        version_id: String,
    },
    PhaseCheckpointCreated {
        phase: String,
        checkpoint_id: String,
    },
    RecoveryStarted {
        phase: String,
        recovery_id: String,
        checkpoint_id: String,
    },
    RecoveryCompleted {
        recovery_id: String,
        success: bool,
    },
    InitializationComplete {
        component: String,
    },
    /// A side effect suppressed by dry-run mode, with the content that would
    /// have been produced.
    DryRunArtifact {
        description: String,
        content: String,
    },
    CliOutput {
        command: String,
        stream: OutputStream,
        line: String,
    },
    /// Actionable suggestion derived from a CLI failure.
    Hint {
        message: String,
    },
    DomainCompleted {
        domain: String,
        status: String,
    },
}

impl DeployEvent {
    /// Short kebab-case name, as used in logs and tests.
    pub fn name(&self) -> &'static str {
        match self {
            DeployEvent::PhaseTransition { .. } => "phase-transition",
            DeployEvent::PhaseStarted { .. } => "phase-started",
            DeployEvent::PhaseCompleted { .. } => "phase-completed",
            DeployEvent::StateSaved { .. } => "state-saved",
            DeployEvent::ChecksumMismatch { .. } => "checksum-mismatch",
            DeployEvent::CheckpointCreated { .. } => "checkpoint-created",
            DeployEvent::PhaseCheckpointCreated { .. } => "phase-checkpoint-created",
            DeployEvent::RecoveryStarted { .. } => "recovery-started",
            DeployEvent::RecoveryCompleted { .. } => "recovery-completed",
            DeployEvent::InitializationComplete { .. } => "initialization-complete",
            DeployEvent::DryRunArtifact { .. } => "dry-run-artifact",
            DeployEvent::CliOutput { .. } => "cli-output",
            DeployEvent::Hint { .. } => "hint",
            DeployEvent::DomainCompleted { .. } => "domain-completed",
        }
    }
}

/// Cloneable sending half of the event channel.
///
/// A disabled sender (no channel) swallows events; library code never has to
/// care whether anyone is listening.
#[derive(Debug, Clone, Default)]
pub struct EventSender {
    tx: Option<mpsc::UnboundedSender<DeployEvent>>,
}

impl EventSender {
    /// Create a connected channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DeployEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sender that drops everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: DeployEvent) {
        tracing::debug!(target: "stratus::events", event = event.name(), "emit");
        if let Some(ref tx) = self.tx {
            // Receiver may be gone during shutdown; that is fine.
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_arrive_in_order() {
        let (sender, mut rx) = EventSender::channel();
        sender.emit(DeployEvent::PhaseStarted {
            domain: "example.com".to_string(),
            phase: "validation".to_string(),
        });
        sender.emit(DeployEvent::PhaseCompleted {
            domain: "example.com".to_string(),
            phase: "validation".to_string(),
            success: true,
            duration_ms: 12,
        });

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.name(), "phase-started");
        assert_eq!(second.name(), "phase-completed");
    }

    #[test]
    fn disabled_sender_swallows_events() {
        let sender = EventSender::disabled();
        sender.emit(DeployEvent::Hint {
            message: "nobody is listening".to_string(),
        });
    }

    #[test]
    fn dropped_receiver_does_not_panic() {
        let (sender, rx) = EventSender::channel();
        drop(rx);
        sender.emit(DeployEvent::InitializationComplete {
            component: "data-bridge".to_string(),
        });
    }

    #[test]
    fn events_serialize_with_kebab_case_tags() {
        let event = DeployEvent::StateSaved {
            workflow: "deploy".to_string(),
            phase: "assess".to_string(),
            size: 42,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"state-saved""#));
        assert!(json.contains(r#""size":42"#));
    }
}
