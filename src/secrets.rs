//! Secret generation and distribution seam.
//!
//! The orchestrator never sees secret values, only opaque references; the
//! actual platform secret upload belongs to the injected implementation.

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::config::Environment;

/// Opaque reference to a provisioned secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretRef {
    pub name: String,
    pub reference: String,
}

#[async_trait]
pub trait SecretManager: Send + Sync {
    /// Produce the secret set for a (domain, environment).
    async fn generate(
        &self,
        domain: &str,
        environment: Environment,
    ) -> anyhow::Result<Vec<SecretRef>>;

    /// Push the secrets wherever the platform expects them.
    async fn distribute(&self, domain: &str, secrets: &[SecretRef]) -> anyhow::Result<()>;
}

/// Default manager: mints fresh references for the standard worker secret
/// set and treats distribution as a log-only operation.
#[derive(Debug, Default)]
pub struct GeneratedSecretManager;

const STANDARD_SECRETS: [&str; 3] = ["JWT_SECRET", "API_KEY", "WEBHOOK_SECRET"];

#[async_trait]
impl SecretManager for GeneratedSecretManager {
    async fn generate(
        &self,
        domain: &str,
        environment: Environment,
    ) -> anyhow::Result<Vec<SecretRef>> {
        Ok(STANDARD_SECRETS
            .iter()
            .map(|name| SecretRef {
                name: (*name).to_string(),
                reference: format!(
                    "secret://{}/{}/{}/{}",
                    domain,
                    environment,
                    name,
                    Uuid::new_v4().simple()
                ),
            })
            .collect())
    }

    async fn distribute(&self, domain: &str, secrets: &[SecretRef]) -> anyhow::Result<()> {
        tracing::info!(
            target: "stratus::secrets",
            domain,
            count = secrets.len(),
            "secret references ready for distribution"
        );
        Ok(())
    }
}
