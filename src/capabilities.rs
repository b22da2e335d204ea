//! Unified phase capability registry.
//!
//! Capabilities are a fixed-width bit set keyed by a compile-time enum; the
//! registry metadata is a static table. Phase handlers consult the set to
//! select behavior instead of spawning orchestrator subclasses.

use serde::Serialize;

use crate::config::DeployMode;
use crate::errors::CapabilityError;

/// Which orchestration tier a capability belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilitySystem {
    Single,
    Portfolio,
    Enterprise,
    All,
}

/// Every behavior flag the orchestrator understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
#[repr(u32)]
pub enum Capability {
    SingleDeploy,
    MultiDeploy,
    PortfolioDeploy,
    BasicValidation,
    StandardValidation,
    ComprehensiveValidation,
    ComplianceCheck,
    HealthCheck,
    EndpointTesting,
    IntegrationTesting,
    ProductionTesting,
    DbMigration,
    D1Management,
    MultiRegionDb,
    SecretGeneration,
    SecretCoordination,
    SecretDistribution,
    HighAvailability,
    DisasterRecovery,
    AuditLogging,
    Rollback,
    DeploymentCleanup,
}

/// Static metadata for one capability.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CapabilityDef {
    pub capability: Capability,
    pub name: &'static str,
    pub system: CapabilitySystem,
    pub description: &'static str,
}

/// The full registry table.
pub const CAPABILITY_REGISTRY: [CapabilityDef; 22] = [
    CapabilityDef {
        capability: Capability::SingleDeploy,
        name: "singleDeploy",
        system: CapabilitySystem::Single,
        description: "Deploy a single domain",
    },
    CapabilityDef {
        capability: Capability::MultiDeploy,
        name: "multiDeploy",
        system: CapabilitySystem::Portfolio,
        description: "Deploy multiple domains in one run",
    },
    CapabilityDef {
        capability: Capability::PortfolioDeploy,
        name: "portfolioDeploy",
        system: CapabilitySystem::Portfolio,
        description: "Coordinate a whole domain portfolio",
    },
    CapabilityDef {
        capability: Capability::BasicValidation,
        name: "basicValidation",
        system: CapabilitySystem::All,
        description: "Manifest syntax checks only",
    },
    CapabilityDef {
        capability: Capability::StandardValidation,
        name: "standardValidation",
        system: CapabilitySystem::All,
        description: "Manifest, credential and naming checks",
    },
    CapabilityDef {
        capability: Capability::ComprehensiveValidation,
        name: "comprehensiveValidation",
        system: CapabilitySystem::Portfolio,
        description: "Cross-domain consistency validation",
    },
    CapabilityDef {
        capability: Capability::ComplianceCheck,
        name: "complianceCheck",
        system: CapabilitySystem::Enterprise,
        description: "Regulatory compliance validation",
    },
    CapabilityDef {
        capability: Capability::HealthCheck,
        name: "healthCheck",
        system: CapabilitySystem::All,
        description: "HTTP probe of the deployed worker",
    },
    CapabilityDef {
        capability: Capability::EndpointTesting,
        name: "endpointTesting",
        system: CapabilitySystem::All,
        description: "Exercise individual endpoints post-deploy",
    },
    CapabilityDef {
        capability: Capability::IntegrationTesting,
        name: "integrationTesting",
        system: CapabilitySystem::Portfolio,
        description: "Cross-service integration tests",
    },
    CapabilityDef {
        capability: Capability::ProductionTesting,
        name: "productionTesting",
        system: CapabilitySystem::Portfolio,
        description: "Smoke tests against production",
    },
    CapabilityDef {
        capability: Capability::DbMigration,
        name: "dbMigration",
        system: CapabilitySystem::All,
        description: "Apply pending database migrations",
    },
    CapabilityDef {
        capability: Capability::D1Management,
        name: "d1Management",
        system: CapabilitySystem::All,
        description: "Create and bind edge SQL databases",
    },
    CapabilityDef {
        capability: Capability::MultiRegionDb,
        name: "multiRegionDb",
        system: CapabilitySystem::Enterprise,
        description: "Multi-region database placement",
    },
    CapabilityDef {
        capability: Capability::SecretGeneration,
        name: "secretGeneration",
        system: CapabilitySystem::All,
        description: "Generate per-domain secrets",
    },
    CapabilityDef {
        capability: Capability::SecretCoordination,
        name: "secretCoordination",
        system: CapabilitySystem::Portfolio,
        description: "Share secrets across domains",
    },
    CapabilityDef {
        capability: Capability::SecretDistribution,
        name: "secretDistribution",
        system: CapabilitySystem::Enterprise,
        description: "Distribute secrets to external stores",
    },
    CapabilityDef {
        capability: Capability::HighAvailability,
        name: "highAvailability",
        system: CapabilitySystem::Enterprise,
        description: "Redundant deployment topology",
    },
    CapabilityDef {
        capability: Capability::DisasterRecovery,
        name: "disasterRecovery",
        system: CapabilitySystem::Enterprise,
        description: "Cross-site recovery checkpoints",
    },
    CapabilityDef {
        capability: Capability::AuditLogging,
        name: "auditLogging",
        system: CapabilitySystem::All,
        description: "Structured audit trail of every phase",
    },
    CapabilityDef {
        capability: Capability::Rollback,
        name: "rollback",
        system: CapabilitySystem::All,
        description: "Roll deployments back to a prior version",
    },
    CapabilityDef {
        capability: Capability::DeploymentCleanup,
        name: "deploymentCleanup",
        system: CapabilitySystem::All,
        description: "Remove artifacts of failed deployments",
    },
];

impl Capability {
    pub fn name(&self) -> &'static str {
        self.definition().name
    }

    pub fn definition(&self) -> &'static CapabilityDef {
        CAPABILITY_REGISTRY
            .iter()
            .find(|def| def.capability == *self)
            .expect("registry covers every variant")
    }

    pub fn parse(name: &str) -> Result<Self, CapabilityError> {
        CAPABILITY_REGISTRY
            .iter()
            .find(|def| def.name == name)
            .map(|def| def.capability)
            .ok_or_else(|| CapabilityError::Unknown(name.to_string()))
    }

    fn mask(&self) -> u32 {
        1u32 << (*self as u32)
    }
}

/// Capability tier used for recommendations. Enterprise is a superset of
/// portfolio, which is a superset of single.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityMode {
    Single,
    Portfolio,
    Enterprise,
}

impl From<DeployMode> for CapabilityMode {
    fn from(mode: DeployMode) -> Self {
        match mode {
            DeployMode::Single => CapabilityMode::Single,
            DeployMode::MultiDomain | DeployMode::Portfolio => CapabilityMode::Portfolio,
        }
    }
}

const SINGLE_SET: [Capability; 6] = [
    Capability::SingleDeploy,
    Capability::StandardValidation,
    Capability::HealthCheck,
    Capability::DbMigration,
    Capability::SecretGeneration,
    Capability::AuditLogging,
];

const PORTFOLIO_EXTRAS: [Capability; 5] = [
    Capability::MultiDeploy,
    Capability::PortfolioDeploy,
    Capability::ComprehensiveValidation,
    Capability::ProductionTesting,
    Capability::SecretCoordination,
];

const ENTERPRISE_EXTRAS: [Capability; 4] = [
    Capability::HighAvailability,
    Capability::DisasterRecovery,
    Capability::ComplianceCheck,
    Capability::MultiRegionDb,
];

/// Recommended capability set for a mode (each tier includes the previous).
pub fn recommended_capabilities(mode: CapabilityMode) -> Vec<Capability> {
    let mut set: Vec<Capability> = SINGLE_SET.to_vec();
    if matches!(mode, CapabilityMode::Portfolio | CapabilityMode::Enterprise) {
        set.extend(PORTFOLIO_EXTRAS);
    }
    if mode == CapabilityMode::Enterprise {
        set.extend(ENTERPRISE_EXTRAS);
    }
    set
}

/// Counts per system in a [`CapabilityReport`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct SystemCounts {
    pub single: usize,
    pub portfolio: usize,
    pub enterprise: usize,
    pub all: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CapabilityReport {
    pub mode: CapabilityMode,
    pub enabled: Vec<&'static str>,
    pub enabled_count: usize,
    pub registered_count: usize,
    pub by_system: SystemCounts,
}

/// The in-memory flag set.
#[derive(Debug, Clone, Copy)]
pub struct CapabilityRegistry {
    flags: u32,
    mode: CapabilityMode,
}

impl CapabilityRegistry {
    /// Empty set.
    pub fn new(mode: CapabilityMode) -> Self {
        Self { flags: 0, mode }
    }

    /// Registry for a mode, optionally pre-loaded with its recommended set.
    pub fn for_mode(mode: CapabilityMode, apply_recommended: bool) -> Self {
        let mut registry = Self::new(mode);
        if apply_recommended {
            for capability in recommended_capabilities(mode) {
                registry.enable(capability);
            }
        }
        registry
    }

    pub fn mode(&self) -> CapabilityMode {
        self.mode
    }

    pub fn enable(&mut self, capability: Capability) -> &mut Self {
        self.flags |= capability.mask();
        self
    }

    pub fn disable(&mut self, capability: Capability) -> &mut Self {
        self.flags &= !capability.mask();
        self
    }

    /// Enable by registry name; unknown names fail.
    pub fn enable_by_name(&mut self, name: &str) -> Result<&mut Self, CapabilityError> {
        let capability = Capability::parse(name)?;
        Ok(self.enable(capability))
    }

    pub fn disable_by_name(&mut self, name: &str) -> Result<&mut Self, CapabilityError> {
        let capability = Capability::parse(name)?;
        Ok(self.disable(capability))
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.flags & capability.mask() != 0
    }

    pub fn has_by_name(&self, name: &str) -> Result<bool, CapabilityError> {
        Ok(self.has(Capability::parse(name)?))
    }

    pub fn enabled(&self) -> Vec<Capability> {
        CAPABILITY_REGISTRY
            .iter()
            .filter(|def| self.has(def.capability))
            .map(|def| def.capability)
            .collect()
    }

    /// Switch mode; with `apply_recommended` the mode's set is enabled on
    /// top of whatever is already on.
    pub fn set_deployment_mode(&mut self, mode: CapabilityMode, apply_recommended: bool) {
        self.mode = mode;
        if apply_recommended {
            for capability in recommended_capabilities(mode) {
                self.enable(capability);
            }
        }
    }

    pub fn report(&self) -> CapabilityReport {
        let enabled = self.enabled();
        let mut by_system = SystemCounts::default();
        for capability in &enabled {
            match capability.definition().system {
                CapabilitySystem::Single => by_system.single += 1,
                CapabilitySystem::Portfolio => by_system.portfolio += 1,
                CapabilitySystem::Enterprise => by_system.enterprise += 1,
                CapabilitySystem::All => by_system.all += 1,
            }
        }
        CapabilityReport {
            mode: self.mode,
            enabled: enabled.iter().map(|c| c.name()).collect(),
            enabled_count: enabled.len(),
            registered_count: CAPABILITY_REGISTRY.len(),
            by_system,
        }
    }
}
