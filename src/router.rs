//! Domain selection, routing policy and deployment planning.
//!
//! The router is a thin front for the multi-domain orchestrator: it loads
//! domain configurations, narrows them down for an environment, and hands
//! each selected domain to an injected deploy function. It holds no
//! orchestrator back-pointer; callers inject a factory or closure instead.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::Environment;
use crate::orchestrator::{DomainConfig, DomainState, DomainStatus};

/// Platform API surface the router needs when no config file is given.
#[async_trait]
pub trait PlatformApiClient: Send + Sync {
    /// List zone names visible to the given token.
    async fn list_domains(&self, api_token: &str) -> Result<Vec<String>>;
}

/// Hostname and path-prefix policy for one (domain, environment).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentRouting {
    pub hostname: String,
    pub path_prefix: String,
}

/// A planned multi-domain rollout.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentPlan {
    pub environment: Environment,
    pub created_at: DateTime<Utc>,
    pub domains: Vec<DomainConfig>,
    pub routing: BTreeMap<String, EnvironmentRouting>,
}

/// Result of validating a domain selection.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RouterValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Domain selection input.
#[derive(Debug, Clone, Default)]
pub struct SelectOptions {
    pub specific_domain: Option<String>,
    pub select_all: bool,
    /// Allow an interactive picker when nothing else decides.
    pub interactive: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct DomainsFile {
    domains: Vec<DomainConfig>,
}

#[derive(Debug, Default)]
pub struct DomainRouter {
    domains: Vec<DomainConfig>,
}

impl DomainRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load domains from a JSON file, or from the platform API when a token
    /// is given instead.
    pub async fn load_configuration(
        &mut self,
        config_path: Option<&Path>,
        api_token: Option<&str>,
        api: Option<&dyn PlatformApiClient>,
    ) -> Result<usize> {
        self.domains = match (config_path, api_token, api) {
            (Some(path), _, _) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read domains file {}", path.display()))?;
                let file: DomainsFile = serde_json::from_str(&raw)
                    .with_context(|| format!("Failed to parse domains file {}", path.display()))?;
                file.domains
            }
            (None, Some(token), Some(api)) => api
                .list_domains(token)
                .await
                .context("Failed to list domains from platform API")?
                .into_iter()
                .map(DomainConfig::named)
                .collect(),
            _ => anyhow::bail!("no domain source: provide a config file or an API token"),
        };
        tracing::info!(target: "stratus::router", count = self.domains.len(), "domains loaded");
        Ok(self.domains.len())
    }

    /// All discoverable domains.
    pub fn detect_domains(&self) -> &[DomainConfig] {
        &self.domains
    }

    /// Pick the domains to deploy.
    ///
    /// Priority: an explicitly named domain, then `select_all`, then (when
    /// allowed and on a terminal) an interactive picker, then the full set.
    pub fn select_domains(&self, opts: &SelectOptions) -> Result<Vec<DomainConfig>> {
        if let Some(ref name) = opts.specific_domain {
            let domain = self
                .domains
                .iter()
                .find(|d| &d.name == name)
                .cloned()
                .with_context(|| format!("domain {name} is not configured"))?;
            return Ok(vec![domain]);
        }
        if opts.select_all || self.domains.len() == 1 {
            return Ok(self.domains.clone());
        }
        if opts.interactive && console::user_attended() && !self.domains.is_empty() {
            let names: Vec<&str> = self.domains.iter().map(|d| d.name.as_str()).collect();
            let picked = dialoguer::Select::new()
                .with_prompt("Select a domain to deploy")
                .items(&names)
                .default(0)
                .interact()
                .context("domain selection aborted")?;
            return Ok(vec![self.domains[picked].clone()]);
        }
        Ok(self.domains.clone())
    }

    /// Environment-specific hostname / prefix policy.
    pub fn environment_routing(domain: &str, environment: Environment) -> EnvironmentRouting {
        match environment {
            Environment::Production => EnvironmentRouting {
                hostname: domain.to_string(),
                path_prefix: "/".to_string(),
            },
            Environment::Staging => EnvironmentRouting {
                hostname: format!("staging.{domain}"),
                path_prefix: "/".to_string(),
            },
            Environment::Development => EnvironmentRouting {
                hostname: format!("dev.{domain}"),
                path_prefix: "/".to_string(),
            },
            Environment::Preview => EnvironmentRouting {
                hostname: format!("preview.{domain}"),
                path_prefix: "/preview".to_string(),
            },
        }
    }

    /// Check a selection before handing it to the orchestrator.
    pub fn validate_configuration(
        domains: &[DomainConfig],
        environment: Environment,
    ) -> RouterValidation {
        let mut report = RouterValidation::default();
        if domains.is_empty() {
            report.errors.push("no domains selected".to_string());
        }
        let mut seen = std::collections::BTreeSet::new();
        for domain in domains {
            if domain.name.trim().is_empty() {
                report.errors.push("empty domain name".to_string());
                continue;
            }
            if !seen.insert(domain.name.clone()) {
                report
                    .errors
                    .push(format!("duplicate domain: {}", domain.name));
            }
            if !domain
                .name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-')
            {
                report
                    .errors
                    .push(format!("invalid domain name: {}", domain.name));
            }
            if environment == Environment::Production && domain.routes.is_empty() {
                report.warnings.push(format!(
                    "{}: no routes configured; workers.dev URL will be used",
                    domain.name
                ));
            }
        }
        report.valid = report.errors.is_empty();
        report
    }

    /// Produce a plan document for a multi-domain rollout.
    pub fn plan_multi_domain_deployment(
        domains: &[DomainConfig],
        environment: Environment,
    ) -> DeploymentPlan {
        let routing = domains
            .iter()
            .map(|d| {
                (
                    d.name.clone(),
                    Self::environment_routing(&d.name, environment),
                )
            })
            .collect();
        DeploymentPlan {
            environment,
            created_at: Utc::now(),
            domains: domains.to_vec(),
            routing,
        }
    }

    /// Iterate the domains, delegating each to `deploy_fn` (typically the
    /// orchestrator's `deploy_single_domain`). The router itself never
    /// orchestrates.
    pub async fn deploy_across_domains<F, Fut>(
        domains: &[DomainConfig],
        deploy_fn: F,
    ) -> Vec<DomainState>
    where
        F: Fn(DomainConfig) -> Fut,
        Fut: std::future::Future<Output = DomainState>,
    {
        let mut states = Vec::with_capacity(domains.len());
        for domain in domains {
            let state = deploy_fn(domain.clone()).await;
            tracing::info!(
                target: "stratus::router",
                domain = %state.name,
                status = state.status.as_str(),
                "domain deployed"
            );
            states.push(state);
        }
        states
    }

    /// Summarize a routed run, mirroring the orchestrator's derivation.
    pub fn summarize(states: &[DomainState]) -> serde_json::Value {
        json!({
            "total": states.len(),
            "completed": states
                .iter()
                .filter(|s| s.status == DomainStatus::Completed)
                .count(),
            "withWarnings": states
                .iter()
                .filter(|s| s.status == DomainStatus::CompletedWithWarnings)
                .count(),
            "failed": states
                .iter()
                .filter(|s| s.status == DomainStatus::Failed)
                .count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn router_with(domains: &[&str]) -> DomainRouter {
        DomainRouter {
            domains: domains.iter().map(|d| DomainConfig::named(*d)).collect(),
        }
    }

    #[tokio::test]
    async fn load_configuration_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("domains.json");
        std::fs::write(
            &path,
            r#"{"domains": [
                {"name": "example.com", "routes": ["example.com/*"]},
                {"name": "shop.example.com"}
            ]}"#,
        )
        .unwrap();

        let mut router = DomainRouter::new();
        let count = router
            .load_configuration(Some(&path), None, None)
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(router.detect_domains()[0].name, "example.com");
        assert_eq!(router.detect_domains()[0].routes, vec!["example.com/*"]);
    }

    #[tokio::test]
    async fn load_configuration_from_api() {
        struct FakeApi;
        #[async_trait]
        impl PlatformApiClient for FakeApi {
            async fn list_domains(&self, _token: &str) -> Result<Vec<String>> {
                Ok(vec!["a.example".to_string(), "b.example".to_string()])
            }
        }

        let mut router = DomainRouter::new();
        let count = router
            .load_configuration(None, Some("token"), Some(&FakeApi))
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn load_configuration_needs_a_source() {
        let mut router = DomainRouter::new();
        assert!(router.load_configuration(None, None, None).await.is_err());
    }

    #[test]
    fn select_specific_domain() {
        let router = router_with(&["a.example", "b.example"]);
        let selected = router
            .select_domains(&SelectOptions {
                specific_domain: Some("b.example".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "b.example");

        let err = router
            .select_domains(&SelectOptions {
                specific_domain: Some("missing.example".to_string()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }

    #[test]
    fn select_all_and_single_domain_shortcuts() {
        let router = router_with(&["a.example", "b.example"]);
        let all = router
            .select_domains(&SelectOptions {
                select_all: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(all.len(), 2);

        let single = router_with(&["only.example"]);
        let selected = single.select_domains(&SelectOptions::default()).unwrap();
        assert_eq!(selected.len(), 1);
    }

    #[test]
    fn routing_policy_per_environment() {
        let production =
            DomainRouter::environment_routing("example.com", Environment::Production);
        assert_eq!(production.hostname, "example.com");

        let staging = DomainRouter::environment_routing("example.com", Environment::Staging);
        assert_eq!(staging.hostname, "staging.example.com");

        let preview = DomainRouter::environment_routing("example.com", Environment::Preview);
        assert_eq!(preview.hostname, "preview.example.com");
        assert_eq!(preview.path_prefix, "/preview");
    }

    #[test]
    fn validation_catches_duplicates_and_bad_names() {
        let domains = vec![
            DomainConfig::named("example.com"),
            DomainConfig::named("example.com"),
            DomainConfig::named("Bad_Name.example"),
        ];
        let report = DomainRouter::validate_configuration(&domains, Environment::Staging);
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("duplicate")));
        assert!(report.errors.iter().any(|e| e.contains("invalid domain name")));

        let empty = DomainRouter::validate_configuration(&[], Environment::Staging);
        assert!(!empty.valid);
    }

    #[test]
    fn validation_warns_on_routeless_production_domains() {
        let domains = vec![DomainConfig::named("example.com")];
        let report = DomainRouter::validate_configuration(&domains, Environment::Production);
        assert!(report.valid);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn plan_includes_routing_for_every_domain() {
        let domains = vec![
            DomainConfig::named("a.example"),
            DomainConfig::named("b.example"),
        ];
        let plan = DomainRouter::plan_multi_domain_deployment(&domains, Environment::Staging);
        assert_eq!(plan.domains.len(), 2);
        assert_eq!(plan.routing["a.example"].hostname, "staging.a.example");
        assert_eq!(plan.routing["b.example"].hostname, "staging.b.example");
    }

    #[tokio::test]
    async fn deploy_across_domains_delegates_in_order() {
        let domains = vec![
            DomainConfig::named("a.example"),
            DomainConfig::named("b.example"),
        ];
        let states = DomainRouter::deploy_across_domains(&domains, |domain| async move {
            let mut state = DomainState::new(&domain.name);
            state.status = if domain.name.starts_with('a') {
                DomainStatus::Completed
            } else {
                DomainStatus::Failed
            };
            state
        })
        .await;

        assert_eq!(states.len(), 2);
        assert_eq!(states[0].name, "a.example");
        let summary = DomainRouter::summarize(&states);
        assert_eq!(summary["completed"], 1);
        assert_eq!(summary["failed"], 1);
    }
}
