//! Multi-domain deployment coordinator.
//!
//! Owns per-deployment state, drives one phase pipeline per domain, and
//! aggregates per-domain outcomes into the deployment report. Domains are
//! deployed in sequential batches; within a batch they run concurrently as
//! cooperative tasks. Per-domain failures never abort sibling domains
//! unless `rollback_on_error` is set.

pub mod domain;

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde_json::json;

use crate::audit::AuditLog;
use crate::bridge::DataBridge;
use crate::capabilities::{Capability, CapabilityRegistry};
use crate::config::{DeployConfig, Environment};
use crate::database::{DatabaseOrchestrator, MigrationStatus};
use crate::deployer::PlatformDeployer;
use crate::errors::OrchestratorError;
use crate::events::{DeployEvent, EventSender};
use crate::health::HealthProbe;
use crate::manifest::{DatabaseBinding, ManifestMutator};
use crate::pipeline::{
    ExecuteOptions, PhaseHandler, PhaseOutput, PhasePipeline, PipelineAuditor, PipelinePhase,
};
use crate::process::ProcessRunner;
use crate::secrets::{GeneratedSecretManager, SecretManager};
use crate::state::CheckpointOptions;
use crate::util::{CancelFlag, database_name, generate_id};

pub use domain::{
    DeploymentReport, DeploymentStats, DeploymentStatus, DomainConfig, DomainError, DomainState,
    DomainStatus,
};

/// Supplies the domain set for a deployment.
#[async_trait]
pub trait DomainResolver: Send + Sync {
    async fn resolve(&self, environment: Environment) -> Result<Vec<DomainConfig>>;
}

/// Resolver over a fixed list; used by the router and by tests.
pub struct StaticDomainResolver {
    domains: Vec<DomainConfig>,
}

impl StaticDomainResolver {
    pub fn new(domains: Vec<DomainConfig>) -> Self {
        Self { domains }
    }
}

#[async_trait]
impl DomainResolver for StaticDomainResolver {
    async fn resolve(&self, _environment: Environment) -> Result<Vec<DomainConfig>> {
        Ok(self.domains.clone())
    }
}

/// Everything one domain's phase handlers need, shared by `Arc`.
struct DomainServices {
    domain: DomainConfig,
    environment: Environment,
    dry_run: bool,
    api_token_present: bool,
    registry: CapabilityRegistry,
    health: HealthProbe,
    state: Mutex<DomainState>,
    manifest: ManifestMutator,
    database: DatabaseOrchestrator,
    deployer: PlatformDeployer,
    secrets: Arc<dyn SecretManager>,
    audit: Arc<AuditLog>,
}

impl DomainServices {
    fn state(&self) -> Result<MutexGuard<'_, DomainState>> {
        self.state
            .lock()
            .map_err(|_| anyhow::anyhow!("domain state lock poisoned"))
    }
}

pub struct MultiDomainOrchestrator {
    config: DeployConfig,
    registry: CapabilityRegistry,
    resolver: Arc<dyn DomainResolver>,
    runner: Arc<dyn ProcessRunner>,
    secret_manager: Arc<dyn SecretManager>,
    health: HealthProbe,
    events: EventSender,
    audit: Arc<AuditLog>,
    cancel: CancelFlag,
    bridge: Option<DataBridge>,
    deployment_id: String,
    domains: Vec<DomainConfig>,
    batches: Vec<Vec<DomainConfig>>,
    initialized: bool,
}

impl MultiDomainOrchestrator {
    pub fn new(
        config: DeployConfig,
        registry: CapabilityRegistry,
        resolver: Arc<dyn DomainResolver>,
        runner: Arc<dyn ProcessRunner>,
        events: EventSender,
    ) -> Result<Self> {
        let audit = Arc::new(AuditLog::new(config.audit_log_path())?);
        Ok(Self {
            deployment_id: generate_id("deploy"),
            config,
            registry,
            resolver,
            runner,
            secret_manager: Arc::new(GeneratedSecretManager),
            health: HealthProbe::default(),
            events,
            audit,
            cancel: CancelFlag::new(),
            bridge: None,
            domains: Vec::new(),
            batches: Vec::new(),
            initialized: false,
        })
    }

    /// Convenience constructor with the full enterprise capability set.
    pub fn enterprise(
        config: DeployConfig,
        resolver: Arc<dyn DomainResolver>,
        runner: Arc<dyn ProcessRunner>,
        events: EventSender,
    ) -> Result<Self> {
        let registry = CapabilityRegistry::for_mode(
            crate::capabilities::CapabilityMode::Enterprise,
            true,
        );
        Self::new(config, registry, resolver, runner, events)
    }

    pub fn with_secret_manager(mut self, manager: Arc<dyn SecretManager>) -> Self {
        self.secret_manager = manager;
        self
    }

    pub fn with_health_probe(mut self, probe: HealthProbe) -> Self {
        self.health = probe;
        self
    }

    /// Attach a data bridge so batch boundaries become checkpoints.
    pub fn with_bridge(mut self, bridge: DataBridge) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Resolve domain configurations and build the deployment batches.
    pub async fn initialize(&mut self) -> Result<()> {
        let domains = self
            .resolver
            .resolve(self.config.environment)
            .await
            .map_err(|e| OrchestratorError::DomainResolution(e.to_string()))?;
        self.batches = create_deployment_batches(&domains, self.config.parallel_deployments);
        self.domains = domains;
        self.initialized = true;

        self.audit_event(
            "deployment-initialized",
            self.config.environment.as_str(),
            json!({
                "deploymentId": self.deployment_id,
                "mode": self.config.mode.as_str(),
                "domains": self.domains.iter().map(|d| d.name.clone()).collect::<Vec<_>>(),
                "batches": self.batches.len(),
            }),
        );
        Ok(())
    }

    /// Deploy the resolved domain set.
    pub async fn deploy(&mut self) -> Result<DeploymentReport> {
        if !self.initialized {
            self.initialize().await?;
        }
        let started_at = Utc::now();
        self.audit_event(
            "deployment-started",
            self.config.environment.as_str(),
            json!({ "deploymentId": self.deployment_id, "dryRun": self.config.dry_run }),
        );
        self.bridge_enter();

        let batches = self.batches.clone();
        let mut results: Vec<DomainState> = Vec::new();
        let mut rollback_scheduled: Vec<String> = Vec::new();
        let mut cancelled = false;

        for (index, batch) in batches.iter().enumerate() {
            if self.cancel.is_cancelled() {
                cancelled = true;
                self.checkpoint(&results, Some("cancelled"));
                break;
            }
            self.audit_event(
                "batch-started",
                self.config.environment.as_str(),
                json!({ "batch": index, "domains": batch.len() }),
            );

            let batch_states =
                join_all(batch.iter().map(|domain| self.deploy_single_domain(domain))).await;
            let any_failed = batch_states
                .iter()
                .any(|state| state.status == DomainStatus::Failed);
            results.extend(batch_states);

            self.checkpoint(&results, None);
            self.audit_event(
                "batch-completed",
                self.config.environment.as_str(),
                json!({ "batch": index, "anyFailed": any_failed }),
            );

            if self.cancel.is_cancelled() {
                cancelled = true;
                self.checkpoint(&results, Some("cancelled"));
                break;
            }

            if any_failed && self.config.rollback_on_error {
                rollback_scheduled = results
                    .iter()
                    .filter(|state| {
                        matches!(
                            state.status,
                            DomainStatus::Completed | DomainStatus::CompletedWithWarnings
                        )
                    })
                    .map(|state| state.name.clone())
                    .collect();
                self.cancel.cancel();
                cancelled = true;
                self.audit_event(
                    "rollback-scheduled",
                    self.config.environment.as_str(),
                    json!({ "domains": rollback_scheduled }),
                );
                break;
            }
        }

        let (mut status, stats) = DeploymentReport::derive_status(&results);
        if cancelled {
            status = DeploymentStatus::Failed;
        }

        self.audit_event(
            "deployment-completed",
            self.config.environment.as_str(),
            json!({
                "deploymentId": self.deployment_id,
                "status": status.as_str(),
                "completed": stats.completed,
                "failed": stats.failed,
            }),
        );
        self.bridge_exit();

        Ok(DeploymentReport {
            deployment_id: self.deployment_id.clone(),
            environment: self.config.environment,
            mode: self.config.mode,
            dry_run: self.config.dry_run,
            status,
            stats,
            domains: results,
            started_at,
            finished_at: Utc::now(),
            audit_log: self.audit.path().display().to_string(),
            rollback_scheduled,
        })
    }

    /// Deploy an explicit domain list, replacing whatever the resolver
    /// produced. An empty list is a successful no-op deployment.
    pub async fn deploy_portfolio(
        &mut self,
        domains: Vec<DomainConfig>,
    ) -> Result<DeploymentReport> {
        self.batches = create_deployment_batches(&domains, self.config.parallel_deployments);
        self.domains = domains;
        self.initialized = true;
        self.deploy().await
    }

    /// Run one domain through the six-phase pipeline and return its final
    /// state snapshot.
    pub async fn deploy_single_domain(&self, domain: &DomainConfig) -> DomainState {
        let services = self.build_domain_services(domain);
        let mut pipeline = self.build_pipeline(&services);

        let outcome = pipeline.execute(ExecuteOptions::default()).await;
        let summary = pipeline.generate_execution_summary();

        let mut state = match services.state() {
            Ok(guard) => guard.clone(),
            Err(_) => DomainState::new(&domain.name),
        };
        state.phase_summary = Some(summary);
        state.warnings = pipeline.warnings();
        state.finished_at = Some(Utc::now());

        match outcome {
            Ok(summary) => {
                state.status = if summary.stats.failed > 0 || !state.warnings.is_empty() {
                    DomainStatus::CompletedWithWarnings
                } else {
                    DomainStatus::Completed
                };
            }
            Err(error) => {
                state.status = DomainStatus::Failed;
                let phase = match &error {
                    OrchestratorError::CriticalPhaseFailed { phase, .. } => phase.clone(),
                    _ => "pipeline".to_string(),
                };
                state.errors.push(DomainError {
                    phase,
                    kind: error.kind().to_string(),
                    message: error.to_string(),
                });
            }
        }

        self.events.emit(DeployEvent::DomainCompleted {
            domain: domain.name.clone(),
            status: state.status.as_str().to_string(),
        });
        self.audit_event(
            "domain-completed",
            &domain.name,
            json!({ "status": state.status.as_str() }),
        );
        state
    }

    fn build_domain_services(&self, domain: &DomainConfig) -> Arc<DomainServices> {
        let manifest = ManifestMutator::new(
            self.config.manifest_path(),
            self.config.dry_run,
            self.events.clone(),
        );
        let database = DatabaseOrchestrator::new(
            &self.config.platform_cli,
            &self.config.service_dir,
            self.config.log_dir.join("backups"),
            Arc::clone(&self.runner),
            self.config.dry_run,
            self.events.clone(),
            Arc::clone(&self.audit),
        );
        let mut deployer = PlatformDeployer::new(
            &self.config.platform_cli,
            &self.config.service_dir,
            Arc::clone(&self.runner),
            self.config.dry_run,
            self.events.clone(),
        )
        .command_timeout(self.config.command_timeout)
        .routes(domain.routes.clone());
        if let Some(ref path) = self.config.config_path {
            deployer = deployer.config_path(path);
        }

        Arc::new(DomainServices {
            domain: domain.clone(),
            environment: self.config.environment,
            dry_run: self.config.dry_run,
            api_token_present: self.config.api_token.is_some(),
            registry: self.registry,
            health: self.health.clone(),
            state: Mutex::new(DomainState::new(&domain.name)),
            manifest,
            database,
            deployer,
            secrets: Arc::clone(&self.secret_manager),
            audit: Arc::clone(&self.audit),
        })
    }

    fn build_pipeline(&self, services: &Arc<DomainServices>) -> PhasePipeline {
        PhasePipeline::new(
            &self.deployment_id,
            self.config.mode.as_str(),
            &services.domain.name,
            self.events.clone(),
        )
        .with_auditor(Arc::clone(&self.audit) as Arc<dyn PipelineAuditor>)
        .with_cancel(self.cancel.clone())
        .on(PipelinePhase::Initialization, handler(services, run_initialization))
        .on(PipelinePhase::Validation, handler(services, run_validation))
        .on(PipelinePhase::Preparation, handler(services, run_preparation))
        .on(PipelinePhase::Deployment, handler(services, run_deployment))
        .on(PipelinePhase::Verification, handler(services, run_verification))
        .on(PipelinePhase::Monitoring, handler(services, run_monitoring))
    }

    fn bridge_enter(&mut self) {
        let context = json!({
            "deploymentId": self.deployment_id,
            "environment": self.config.environment.as_str(),
            "mode": self.config.mode.as_str(),
        });
        if let Some(ref mut bridge) = self.bridge {
            // An already-active execute phase (resumed run) is fine.
            if let Err(error) = bridge.enter_phase("execute", context) {
                tracing::debug!(target: "stratus::orchestrator", %error, "execute phase already active");
            }
        }
    }

    fn bridge_exit(&mut self) {
        if let Some(ref mut bridge) = self.bridge {
            if let Err(error) = bridge.exit_phase("execute") {
                tracing::warn!(target: "stratus::orchestrator", %error, "failed to exit execute phase");
            }
        }
    }

    /// Record the aggregate domain outcomes as a checkpoint; best effort.
    fn checkpoint(&mut self, results: &[DomainState], tag: Option<&str>) {
        let Some(ref mut bridge) = self.bridge else {
            return;
        };
        let state = json!({
            "deploymentId": self.deployment_id,
            "domains": results
                .iter()
                .map(|d| json!({ "name": d.name, "status": d.status.as_str() }))
                .collect::<Vec<_>>(),
        });
        let opts = CheckpointOptions {
            reason: Some(match tag {
                Some("cancelled") => "deployment cancelled".to_string(),
                _ => "batch complete".to_string(),
            }),
            milestone: None,
            tag: tag.map(|t| t.to_string()),
        };
        if let Err(error) = bridge.create_phase_checkpoint("execute", &state, opts) {
            tracing::warn!(target: "stratus::orchestrator", %error, "checkpoint failed");
        }
    }

    fn audit_event(&self, event: &str, target: &str, data: serde_json::Value) {
        if let Err(error) = self.audit.append(event, target, data) {
            tracing::warn!(target: "stratus::orchestrator", %error, "audit append failed");
        }
    }
}

/// Split domains into batches of at most `parallel_deployments`.
pub fn create_deployment_batches(
    domains: &[DomainConfig],
    parallel_deployments: usize,
) -> Vec<Vec<DomainConfig>> {
    domains
        .chunks(parallel_deployments.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

fn handler<F, Fut>(services: &Arc<DomainServices>, f: F) -> PhaseHandler
where
    F: Fn(Arc<DomainServices>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<PhaseOutput>> + Send + 'static,
{
    let services = Arc::clone(services);
    Box::new(move || Box::pin(f(Arc::clone(&services))))
}

async fn run_initialization(s: Arc<DomainServices>) -> Result<PhaseOutput> {
    let orchestration_id = generate_id("orch");
    {
        let mut state = s.state()?;
        state.started_at = Some(Utc::now());
        state.orchestration_id = Some(orchestration_id.clone());
    }
    Ok(PhaseOutput::ok(json!({
        "orchestrationId": orchestration_id,
        "domain": s.domain.name,
    })))
}

async fn run_validation(s: Arc<DomainServices>) -> Result<PhaseOutput> {
    let report = s.manifest.validate().context("manifest validation")?;
    if !report.valid {
        anyhow::bail!("manifest invalid: {}", report.errors.join("; "));
    }
    if s.environment.is_remote() && !s.dry_run && !s.api_token_present {
        anyhow::bail!("missing CLOUDFLARE_API_TOKEN for remote deployment");
    }

    let db_name = database_name(&s.domain.name, s.environment.as_str());
    if db_name.len() > 63 {
        anyhow::bail!("database name {db_name} exceeds 63 characters");
    }
    if !db_name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        anyhow::bail!("database name {db_name} contains invalid characters");
    }

    Ok(PhaseOutput {
        result: json!({ "manifestValid": true }),
        warnings: report.warnings,
    })
}

async fn run_preparation(s: Arc<DomainServices>) -> Result<PhaseOutput> {
    let mut warnings = Vec::new();
    let mut result = serde_json::Map::new();

    let wants_database =
        s.registry.has(Capability::D1Management) || s.registry.has(Capability::DbMigration);
    if wants_database {
        s.state()?.status = DomainStatus::Database;
        let db_name = database_name(&s.domain.name, s.environment.as_str());

        match s.database.ensure_database(&db_name).await {
            Ok(handle) => {
                s.manifest.add_database_binding(
                    s.environment,
                    DatabaseBinding::new("DB", &handle.name, &handle.id),
                )?;
                result.insert("database".to_string(), json!(handle.name));
                s.state()?.database = Some(handle);

                if s.registry.has(Capability::DbMigration) {
                    let outcome = s
                        .database
                        .apply_database_migrations(
                            &db_name,
                            s.environment,
                            s.environment.is_remote(),
                        )
                        .await;
                    match outcome.status {
                        MigrationStatus::Failed => warnings.push(format!(
                            "migration failed for {db_name}: {}",
                            outcome.error.unwrap_or_else(|| "unknown error".to_string())
                        )),
                        _ => {
                            result.insert(
                                "migrationsApplied".to_string(),
                                json!(outcome.migrations_applied),
                            );
                        }
                    }
                }
            }
            Err(error) => warnings.push(format!("database provisioning failed: {error}")),
        }
    }

    if s.registry.has(Capability::SecretGeneration) {
        s.state()?.status = DomainStatus::Secrets;
        match s.secrets.generate(&s.domain.name, s.environment).await {
            Ok(secrets) => {
                s.secrets
                    .distribute(&s.domain.name, &secrets)
                    .await
                    .unwrap_or_else(|error| {
                        warnings.push(format!("secret distribution failed: {error}"))
                    });
                result.insert("secrets".to_string(), json!(secrets.len()));
                s.state()?.secrets = secrets;
            }
            Err(error) => warnings.push(format!("secret generation failed: {error}")),
        }
    }

    Ok(PhaseOutput {
        result: serde_json::Value::Object(result),
        warnings,
    })
}

async fn run_deployment(s: Arc<DomainServices>) -> Result<PhaseOutput> {
    s.state()?.status = DomainStatus::Deployment;
    let outcome = s.deployer.deploy(s.environment).await?;
    if !outcome.success {
        anyhow::bail!(
            "worker deploy failed: {}",
            outcome
                .error
                .unwrap_or_else(|| "no error output".to_string())
        );
    }

    let custom_url = s
        .domain
        .routes
        .first()
        .map(|route| format!("https://{}", route.trim_end_matches("/*").trim_end_matches('*')));
    {
        let mut state = s.state()?;
        state.worker_url = outcome.worker_url.clone();
        state.custom_url = custom_url;
    }
    Ok(PhaseOutput::ok(json!({ "url": outcome.url })))
}

async fn run_verification(s: Arc<DomainServices>) -> Result<PhaseOutput> {
    if !s.registry.has(Capability::HealthCheck) || s.dry_run {
        return Ok(PhaseOutput::ok(json!({ "skipped": true })));
    }
    s.state()?.status = DomainStatus::Validating;

    let url = {
        let state = s.state()?;
        state
            .custom_url
            .clone()
            .or_else(|| state.worker_url.clone())
    }
    .ok_or_else(|| anyhow::anyhow!("no deployed URL to probe"))?;

    let probe = s.domain.health.clone().unwrap_or_else(|| s.health.clone());
    let status = probe.check(&url).await?;
    Ok(PhaseOutput::ok(json!({ "probedUrl": url, "status": status })))
}

async fn run_monitoring(s: Arc<DomainServices>) -> Result<PhaseOutput> {
    let url = s.state()?.worker_url.clone();
    let _ = s.audit.append(
        "monitoring-armed",
        &s.domain.name,
        json!({ "url": url, "environment": s.environment.as_str() }),
    );
    Ok(PhaseOutput::ok(json!({ "watches": url.map_or(0, |_| 1) })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::CapabilityMode;
    use crate::config::DeployMode;
    use crate::process::{CommandOutput, MockProcessRunner};
    use tempfile::tempdir;

    fn base_caps() -> CapabilityRegistry {
        // The single-mode set minus healthCheck, which would hit the
        // network in tests.
        let mut registry = CapabilityRegistry::for_mode(CapabilityMode::Single, true);
        registry.disable(Capability::HealthCheck);
        registry
    }

    fn write_manifest(dir: &std::path::Path) {
        std::fs::write(
            dir.join("wrangler.toml"),
            "name = \"shop-worker\"\nmain = \"src/index.js\"\ncompatibility_date = \"2026-01-15\"\n",
        )
        .unwrap();
    }

    fn happy_runner() -> MockProcessRunner {
        MockProcessRunner::new()
            .with_response("d1 create", CommandOutput::ok(
                "database_id = \"11111111-2222-3333-4444-555555555555\"\n",
            ))
            .with_response("migrations apply", CommandOutput::ok("Applied 1 migrations\n"))
            .with_response("deploy", CommandOutput::ok("Deployed to: https://shop.example\n"))
    }

    fn config(dir: &std::path::Path, env: Environment) -> DeployConfig {
        let mut config = DeployConfig::new(env, DeployMode::Single, dir);
        config.api_token = Some("token".to_string());
        config.log_dir = dir.join("logs");
        config
    }

    async fn orchestrator_for(
        dir: &std::path::Path,
        env: Environment,
        runner: MockProcessRunner,
        domains: Vec<DomainConfig>,
    ) -> MultiDomainOrchestrator {
        MultiDomainOrchestrator::new(
            config(dir, env),
            base_caps(),
            Arc::new(StaticDomainResolver::new(domains)),
            Arc::new(runner),
            EventSender::disabled(),
        )
        .unwrap()
    }

    #[test]
    fn batching_chunks_domains() {
        let domains: Vec<DomainConfig> = (0..5)
            .map(|i| DomainConfig::named(format!("d{i}.example.com")))
            .collect();
        let batches = create_deployment_batches(&domains, 2);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[2].len(), 1);

        // Zero parallelism degrades to one domain per batch.
        assert_eq!(create_deployment_batches(&domains, 0).len(), 5);
    }

    #[tokio::test]
    async fn single_domain_happy_path_completes() {
        let dir = tempdir().unwrap();
        write_manifest(dir.path());
        let mut orchestrator = orchestrator_for(
            dir.path(),
            Environment::Production,
            happy_runner(),
            vec![DomainConfig::named("example.com")],
        )
        .await;

        let report = orchestrator.deploy().await.unwrap();
        assert_eq!(report.status, DeploymentStatus::Completed);
        assert_eq!(report.stats.completed, 1);
        assert_eq!(report.stats.failed, 0);

        let domain = &report.domains[0];
        assert_eq!(domain.status, DomainStatus::Completed);
        assert_eq!(
            domain.database.as_ref().unwrap().name,
            "example-com-production-db"
        );
        assert_eq!(domain.worker_url.as_deref(), Some("https://shop.example"));
        assert_eq!(domain.secrets.len(), 3);
        assert!(domain.phase_summary.as_ref().unwrap().stats.failed == 0);
    }

    #[tokio::test]
    async fn migration_failure_is_warning_not_fatal() {
        let dir = tempdir().unwrap();
        write_manifest(dir.path());
        let runner = MockProcessRunner::new()
            .with_response("d1 create", CommandOutput::ok("database_id = \"aa-bb\"\n"))
            .with_response("migrations apply", CommandOutput::failed(1, "locked"))
            .with_response("deploy", CommandOutput::ok("Deployed to: https://a.example\n"));
        let mut orchestrator = orchestrator_for(
            dir.path(),
            Environment::Production,
            runner,
            vec![DomainConfig::named("example.com")],
        )
        .await;

        let report = orchestrator.deploy().await.unwrap();
        assert_eq!(report.status, DeploymentStatus::CompletedWithWarnings);
        let domain = &report.domains[0];
        assert_eq!(domain.status, DomainStatus::CompletedWithWarnings);
        assert!(domain.warnings.iter().any(|w| w.contains("migration failed")));
        // Deployment itself succeeded.
        assert_eq!(domain.worker_url.as_deref(), Some("https://a.example"));
    }

    #[tokio::test]
    async fn validation_failure_fails_domain_and_skips_deploy() {
        let dir = tempdir().unwrap();
        // Manifest without compatibility_date fails validation.
        std::fs::write(
            dir.path().join("wrangler.toml"),
            "name = \"w\"\nmain = \"src/index.js\"\n",
        )
        .unwrap();
        let runner = happy_runner();
        let mut orchestrator = orchestrator_for(
            dir.path(),
            Environment::Production,
            runner,
            vec![DomainConfig::named("example.com")],
        )
        .await;

        let report = orchestrator.deploy().await.unwrap();
        assert_eq!(report.status, DeploymentStatus::Failed);
        let domain = &report.domains[0];
        assert_eq!(domain.status, DomainStatus::Failed);
        assert_eq!(domain.errors[0].phase, "validation");
        // The deploy phase never ran.
        let summary = domain.phase_summary.as_ref().unwrap();
        assert_eq!(summary.phases["deployment"].state.as_str(), "pending");
    }

    #[tokio::test]
    async fn deploy_failure_fails_domain() {
        let dir = tempdir().unwrap();
        write_manifest(dir.path());
        let runner = MockProcessRunner::new()
            .with_response("d1 create", CommandOutput::ok("database_id = \"aa\"\n"))
            .with_response("migrations apply", CommandOutput::ok("Applied 0 migrations\n"))
            .with_response("deploy", CommandOutput::failed(1, "authentication failure"));
        let mut orchestrator = orchestrator_for(
            dir.path(),
            Environment::Production,
            runner,
            vec![DomainConfig::named("example.com")],
        )
        .await;

        let report = orchestrator.deploy().await.unwrap();
        assert_eq!(report.status, DeploymentStatus::Failed);
        assert_eq!(report.domains[0].errors[0].phase, "deployment");
    }

    #[tokio::test]
    async fn partial_failure_does_not_abort_sibling_domains() {
        let dir = tempdir().unwrap();
        write_manifest(dir.path());
        // bad.example's migrations AND deploy both fail; deploy failing only
        // for it is not expressible by substring matching, so fail its
        // database create instead (a warning) plus succeed everything else.
        let runner = MockProcessRunner::new()
            .with_response("d1 create bad-example-com", CommandOutput::failed(1, "quota"))
            .with_response("d1 create", CommandOutput::ok("database_id = \"aa\"\n"))
            .with_response("migrations apply", CommandOutput::ok("Applied 1 migrations\n"))
            .with_response("deploy", CommandOutput::ok("Deployed to: https://x.example\n"));
        let mut orchestrator = orchestrator_for(
            dir.path(),
            Environment::Production,
            runner,
            vec![
                DomainConfig::named("good.example.com"),
                DomainConfig::named("bad.example.com"),
            ],
        )
        .await;

        let report = orchestrator.deploy().await.unwrap();
        assert_eq!(report.domains.len(), 2);
        let good = report.domains.iter().find(|d| d.name.starts_with("good")).unwrap();
        let bad = report.domains.iter().find(|d| d.name.starts_with("bad")).unwrap();
        assert_eq!(good.status, DomainStatus::Completed);
        assert_eq!(bad.status, DomainStatus::CompletedWithWarnings);
    }

    #[tokio::test]
    async fn empty_portfolio_succeeds_with_zero_stats() {
        let dir = tempdir().unwrap();
        write_manifest(dir.path());
        let mut orchestrator = orchestrator_for(
            dir.path(),
            Environment::Production,
            MockProcessRunner::new(),
            vec![],
        )
        .await;

        let report = orchestrator.deploy_portfolio(vec![]).await.unwrap();
        assert_eq!(report.status, DeploymentStatus::Completed);
        assert_eq!(report.stats.completed, 0);
        assert!(report.domains.is_empty());
    }

    #[tokio::test]
    async fn rollback_on_error_cancels_remaining_batches() {
        let dir = tempdir().unwrap();
        write_manifest(dir.path());
        let runner = MockProcessRunner::new()
            .with_response("d1 create", CommandOutput::ok("database_id = \"aa\"\n"))
            .with_response("migrations apply", CommandOutput::ok("Applied 0 migrations\n"))
            .with_response("deploy", CommandOutput::failed(1, "upload failed"));

        let mut config = config(dir.path(), Environment::Production);
        config = config.rollback_on_error(true).parallel_deployments(1);
        let mut orchestrator = MultiDomainOrchestrator::new(
            config,
            base_caps(),
            Arc::new(StaticDomainResolver::new(vec![
                DomainConfig::named("first.example.com"),
                DomainConfig::named("second.example.com"),
            ])),
            Arc::new(runner),
            EventSender::disabled(),
        )
        .unwrap();

        let report = orchestrator.deploy().await.unwrap();
        assert_eq!(report.status, DeploymentStatus::Failed);
        // Only the first batch ran.
        assert_eq!(report.domains.len(), 1);
        assert_eq!(report.domains[0].name, "first.example.com");
    }

    #[tokio::test]
    async fn dry_run_spawns_no_processes_and_writes_no_manifest() {
        let dir = tempdir().unwrap();
        write_manifest(dir.path());
        let before = std::fs::read_to_string(dir.path().join("wrangler.toml")).unwrap();

        let runner = Arc::new(MockProcessRunner::new());
        let mut config = config(dir.path(), Environment::Staging);
        config.dry_run = true;
        let (events, mut rx) = EventSender::channel();
        let mut orchestrator = MultiDomainOrchestrator::new(
            config,
            base_caps(),
            Arc::new(StaticDomainResolver::new(vec![DomainConfig::named(
                "example.com",
            )])),
            Arc::clone(&runner) as Arc<dyn ProcessRunner>,
            events,
        )
        .unwrap();

        let report = orchestrator.deploy().await.unwrap();
        assert_eq!(report.status, DeploymentStatus::Completed);
        assert!(runner.calls().is_empty());

        let after = std::fs::read_to_string(dir.path().join("wrangler.toml")).unwrap();
        assert_eq!(before, after);

        // The suppressed side effects surfaced as events instead.
        let dry_run_events = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|e| e.name() == "dry-run-artifact")
            .count();
        assert!(dry_run_events >= 2, "expected migration and deploy artifacts");
    }

    #[tokio::test]
    async fn cancellation_fails_deployment_and_checkpoints() {
        let dir = tempdir().unwrap();
        write_manifest(dir.path());
        let cancel = CancelFlag::new();
        cancel.cancel();

        let bridge = DataBridge::initialize(dir.path().join("state"), EventSender::disabled())
            .unwrap();
        let mut orchestrator = orchestrator_for(
            dir.path(),
            Environment::Production,
            happy_runner(),
            vec![DomainConfig::named("example.com")],
        )
        .await
        .with_bridge(bridge)
        .with_cancel(cancel);

        let report = orchestrator.deploy().await.unwrap();
        assert_eq!(report.status, DeploymentStatus::Failed);
        assert!(report.domains.is_empty());
    }
}
