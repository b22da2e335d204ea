//! Deployment configuration.
//!
//! `DeployConfig` bridges the CLI flags and environment variables with the
//! runtime needs of the orchestrator: target environment, deployment mode,
//! service directory, dry-run, batch size, and platform credentials.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Deployment target environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Staging,
    #[default]
    Development,
    Preview,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Staging => "staging",
            Environment::Development => "development",
            Environment::Preview => "preview",
        }
    }

    /// Local environments run migrations against the local simulator.
    pub fn is_remote(&self) -> bool {
        !matches!(self, Environment::Development)
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            "staging" => Ok(Environment::Staging),
            "development" | "dev" => Ok(Environment::Development),
            "preview" => Ok(Environment::Preview),
            _ => anyhow::bail!(
                "Invalid environment '{}'. Valid values: production, staging, development, preview",
                s
            ),
        }
    }
}

/// How many domains a deployment coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeployMode {
    #[default]
    Single,
    MultiDomain,
    Portfolio,
}

impl DeployMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployMode::Single => "single",
            DeployMode::MultiDomain => "multi-domain",
            DeployMode::Portfolio => "portfolio",
        }
    }
}

impl std::fmt::Display for DeployMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeployMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single" => Ok(DeployMode::Single),
            "multi-domain" | "multi" => Ok(DeployMode::MultiDomain),
            "portfolio" => Ok(DeployMode::Portfolio),
            _ => anyhow::bail!(
                "Invalid deployment mode '{}'. Valid values: single, multi-domain, portfolio",
                s
            ),
        }
    }
}

/// Runtime configuration for one deployment.
#[derive(Debug, Clone)]
pub struct DeployConfig {
    pub environment: Environment,
    pub mode: DeployMode,
    /// Service working directory (holds wrangler.toml).
    pub service_dir: PathBuf,
    pub dry_run: bool,
    /// Domains per parallel batch.
    pub parallel_deployments: usize,
    /// Platform CLI binary.
    pub platform_cli: String,
    pub api_token: Option<String>,
    pub account_id: Option<String>,
    /// Alternate manifest passed through to the platform CLI.
    pub config_path: Option<PathBuf>,
    /// Directory for audit and backup artifacts.
    pub log_dir: PathBuf,
    /// Cancel remaining domains in a batch and schedule rollback when one
    /// domain fails.
    pub rollback_on_error: bool,
    /// Per-invocation timeout for deploy and migration commands.
    pub command_timeout: Duration,
}

impl DeployConfig {
    pub fn new(
        environment: Environment,
        mode: DeployMode,
        service_dir: impl Into<PathBuf>,
    ) -> Self {
        let service_dir = service_dir.into();
        let log_dir = std::env::var("LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| service_dir.join("logs"));

        Self {
            environment,
            mode,
            service_dir,
            dry_run: false,
            parallel_deployments: 3,
            platform_cli: "wrangler".to_string(),
            api_token: std::env::var("CLOUDFLARE_API_TOKEN").ok(),
            account_id: std::env::var("CLOUDFLARE_ACCOUNT_ID").ok(),
            config_path: None,
            log_dir,
            rollback_on_error: false,
            command_timeout: Duration::from_secs(120),
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn parallel_deployments(mut self, n: usize) -> Self {
        self.parallel_deployments = n.max(1);
        self
    }

    pub fn rollback_on_error(mut self, rollback: bool) -> Self {
        self.rollback_on_error = rollback;
        self
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.service_dir.join("wrangler.toml")
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.log_dir.join("deployment-audit.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn environment_round_trips_through_strings() {
        for env in [
            Environment::Production,
            Environment::Staging,
            Environment::Development,
            Environment::Preview,
        ] {
            assert_eq!(Environment::from_str(env.as_str()).unwrap(), env);
        }
    }

    #[test]
    fn environment_rejects_unknown_values() {
        assert!(Environment::from_str("qa").is_err());
    }

    #[test]
    fn development_is_local() {
        assert!(!Environment::Development.is_remote());
        assert!(Environment::Production.is_remote());
        assert!(Environment::Staging.is_remote());
        assert!(Environment::Preview.is_remote());
    }

    #[test]
    fn mode_parses_aliases() {
        assert_eq!(DeployMode::from_str("multi").unwrap(), DeployMode::MultiDomain);
        assert_eq!(DeployMode::from_str("portfolio").unwrap(), DeployMode::Portfolio);
        assert!(DeployMode::from_str("galactic").is_err());
    }

    #[test]
    fn config_defaults() {
        let config = DeployConfig::new(
            Environment::Staging,
            DeployMode::Single,
            "/srv/worker",
        );
        assert_eq!(config.parallel_deployments, 3);
        assert!(!config.dry_run);
        assert_eq!(config.platform_cli, "wrangler");
        assert_eq!(config.manifest_path(), PathBuf::from("/srv/worker/wrangler.toml"));
        assert_eq!(config.command_timeout, Duration::from_secs(120));
    }

    #[test]
    fn parallel_deployments_clamped_to_one() {
        let config = DeployConfig::new(Environment::Development, DeployMode::Single, ".")
            .parallel_deployments(0);
        assert_eq!(config.parallel_deployments, 1);
    }
}
