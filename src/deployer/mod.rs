//! Worker publishing through the platform CLI.
//!
//! Builds the `wrangler deploy` invocation for an environment, streams its
//! output into the event channel, extracts the deployed URL from stdout,
//! and turns common failure texts into actionable hints.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;

use crate::config::Environment;
use crate::errors::{ManifestError, PlatformError};
use crate::events::{DeployEvent, EventSender};
use crate::manifest::ManifestMutator;
use crate::process::{CommandSpec, ProcessRunner};

/// Outcome of one publish attempt. A non-zero CLI exit is captured here;
/// only spawn/timeout problems surface as errors.
#[derive(Debug, Clone, Serialize)]
pub struct DeployOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_url: Option<String>,
    pub environment: Environment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub stdout: String,
    pub stderr: String,
}

pub struct PlatformDeployer {
    cli: String,
    service_dir: PathBuf,
    config_path: Option<PathBuf>,
    routes: Vec<String>,
    runner: Arc<dyn ProcessRunner>,
    command_timeout: Duration,
    dry_run: bool,
    events: EventSender,
}

impl PlatformDeployer {
    pub fn new(
        cli: impl Into<String>,
        service_dir: impl Into<PathBuf>,
        runner: Arc<dyn ProcessRunner>,
        dry_run: bool,
        events: EventSender,
    ) -> Self {
        Self {
            cli: cli.into(),
            service_dir: service_dir.into(),
            config_path: None,
            routes: Vec::new(),
            runner,
            command_timeout: Duration::from_secs(120),
            dry_run,
            events,
        }
    }

    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Routes considered as URL fallbacks when the CLI output names none.
    pub fn routes(mut self, routes: Vec<String>) -> Self {
        self.routes = routes;
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Argument vector for a deploy: `deploy`, then `--env <env>` for
    /// non-production targets, then caller options.
    pub fn deploy_command(&self, environment: Environment) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.cli)
            .arg("deploy")
            .current_dir(&self.service_dir)
            .timeout(self.command_timeout);
        if environment != Environment::Production {
            spec = spec.args(["--env", environment.as_str()]);
        }
        if let Some(ref path) = self.config_path {
            spec = spec
                .arg("--config")
                .arg(path.to_string_lossy().into_owned());
        }
        spec
    }

    /// Publish the worker for `environment`.
    pub async fn deploy(&self, environment: Environment) -> Result<DeployOutcome, PlatformError> {
        // The manifest must have a section for the target environment.
        let manifest = ManifestMutator::new(
            self.service_dir.join("wrangler.toml"),
            self.dry_run,
            self.events.clone(),
        );
        if let Err(error) = self.ensure_manifest_env(&manifest, environment) {
            return Ok(DeployOutcome {
                success: false,
                url: None,
                worker_url: None,
                environment,
                code: None,
                error: Some(error.to_string()),
                stdout: String::new(),
                stderr: String::new(),
            });
        }
        let worker_name = manifest
            .read()
            .map(|config| config.name)
            .unwrap_or_else(|_| "worker".to_string());

        let spec = self.deploy_command(environment);
        if self.dry_run {
            self.events.emit(DeployEvent::DryRunArtifact {
                description: "worker deploy".to_string(),
                content: spec.display_line(),
            });
            let url = fallback_url(&worker_name);
            return Ok(DeployOutcome {
                success: true,
                url: Some(url.clone()),
                worker_url: Some(url),
                environment,
                code: None,
                error: None,
                stdout: String::new(),
                stderr: String::new(),
            });
        }

        let output = self.runner.run(&spec, &self.events).await?;
        if output.success() {
            let url = extract_url(&output.stdout, &self.routes, &worker_name);
            tracing::info!(
                target: "stratus::deployer",
                environment = %environment,
                url = %url,
                "worker deployed"
            );
            Ok(DeployOutcome {
                success: true,
                url: Some(url.clone()),
                worker_url: Some(url),
                environment,
                code: Some(0),
                error: None,
                stdout: output.stdout,
                stderr: output.stderr,
            })
        } else {
            self.emit_hints(environment, &output.stderr);
            Ok(DeployOutcome {
                success: false,
                url: None,
                worker_url: None,
                environment,
                code: Some(output.code),
                error: Some(first_error_line(&output.stderr)),
                stdout: output.stdout,
                stderr: output.stderr,
            })
        }
    }

    fn ensure_manifest_env(
        &self,
        manifest: &ManifestMutator,
        environment: Environment,
    ) -> Result<(), ManifestError> {
        manifest.ensure_environment(environment)?;
        Ok(())
    }

    fn emit_hints(&self, environment: Environment, stderr: &str) {
        if stderr.contains("No environment found") {
            self.events.emit(DeployEvent::Hint {
                message: format!(
                    "add an [env.{}] section to wrangler.toml",
                    environment.as_str()
                ),
            });
        }
        if stderr.contains("wrangler.toml")
            && (stderr.contains("not found") || stderr.contains("Missing"))
        {
            self.events.emit(DeployEvent::Hint {
                message: "create a wrangler.toml manifest in the service directory".to_string(),
            });
        }
    }
}

/// Extract the deployed URL from CLI stdout.
///
/// Priority: `Deployed to:` marker, then `Your worker has been deployed
/// to:`, then `Worker URL:`, then the first configured route, then the
/// workers.dev fallback.
pub fn extract_url(stdout: &str, routes: &[String], worker_name: &str) -> String {
    const MARKERS: [&str; 3] = [
        r"Deployed to:\s*(https?://\S+)",
        r"Your worker has been deployed to:\s*(https?://\S+)",
        r"Worker URL:\s*(https?://\S+)",
    ];
    for marker in MARKERS {
        let re = Regex::new(marker).expect("static regex");
        if let Some(caps) = re.captures(stdout) {
            return caps[1].trim_end_matches(['.', ',']).to_string();
        }
    }
    if let Some(route) = routes.first() {
        let host = route.trim_end_matches("/*").trim_end_matches('*');
        return format!("https://{}", host.trim_start_matches("https://"));
    }
    fallback_url(worker_name)
}

fn fallback_url(worker_name: &str) -> String {
    format!("https://{worker_name}.workers.dev")
}

fn first_error_line(stderr: &str) -> String {
    stderr
        .lines()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("deploy failed with no output")
        .to_string()
}

/// Detect the target environment during construction.
///
/// Explicit environment variables win (`NODE_ENV`, `ENVIRONMENT`,
/// `DEPLOY_ENV`, `CF_PAGES_BRANCH`); otherwise the current git branch is
/// mapped (`main`/`master` to production, `develop`/`dev` to development,
/// anything containing `staging` to staging, else development).
pub fn detect_environment(service_dir: &Path) -> Environment {
    for var in ["NODE_ENV", "ENVIRONMENT", "DEPLOY_ENV"] {
        if let Ok(value) = std::env::var(var) {
            if let Ok(env) = value.parse() {
                return env;
            }
        }
    }
    if let Ok(branch) = std::env::var("CF_PAGES_BRANCH") {
        return environment_for_branch(&branch);
    }
    match current_branch(service_dir) {
        Some(branch) => environment_for_branch(&branch),
        None => Environment::Development,
    }
}

/// Branch-name convention shared by the platform's CI integrations.
pub fn environment_for_branch(branch: &str) -> Environment {
    match branch {
        "main" | "master" => Environment::Production,
        "develop" | "dev" => Environment::Development,
        other if other.contains("staging") => Environment::Staging,
        _ => Environment::Development,
    }
}

fn current_branch(service_dir: &Path) -> Option<String> {
    let repo = git2::Repository::discover(service_dir).ok()?;
    let head = repo.head().ok()?;
    head.shorthand().map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::WranglerConfig;
    use crate::process::{CommandOutput, MockProcessRunner};
    use tempfile::tempdir;

    fn deployer(
        dir: &Path,
        runner: MockProcessRunner,
        dry_run: bool,
    ) -> (Arc<MockProcessRunner>, PlatformDeployer) {
        let runner = Arc::new(runner);
        let deployer = PlatformDeployer::new(
            "wrangler",
            dir,
            Arc::clone(&runner) as Arc<dyn ProcessRunner>,
            dry_run,
            EventSender::disabled(),
        );
        (runner, deployer)
    }

    fn write_manifest(dir: &Path) {
        let mut config = WranglerConfig::default();
        config.name = "shop-worker".to_string();
        config.compatibility_date = Some("2026-01-15".to_string());
        std::fs::write(
            dir.join("wrangler.toml"),
            toml::to_string_pretty(&config).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn production_deploy_command_has_no_env_flag() {
        let dir = tempdir().unwrap();
        let (_r, deployer) = deployer(dir.path(), MockProcessRunner::new(), false);
        assert_eq!(
            deployer.deploy_command(Environment::Production).display_line(),
            "wrangler deploy"
        );
    }

    #[test]
    fn non_production_deploy_command_appends_env() {
        let dir = tempdir().unwrap();
        let (_r, deployer) = deployer(dir.path(), MockProcessRunner::new(), false);
        assert_eq!(
            deployer.deploy_command(Environment::Development).display_line(),
            "wrangler deploy --env development"
        );
    }

    #[test]
    fn config_path_is_forwarded() {
        let dir = tempdir().unwrap();
        let (_r, deployer) = deployer(dir.path(), MockProcessRunner::new(), false);
        let deployer = deployer.config_path("configs/wrangler.staging.toml");
        assert_eq!(
            deployer.deploy_command(Environment::Staging).display_line(),
            "wrangler deploy --env staging --config configs/wrangler.staging.toml"
        );
    }

    #[tokio::test]
    async fn successful_deploy_extracts_url() {
        let dir = tempdir().unwrap();
        write_manifest(dir.path());
        let runner = MockProcessRunner::new().with_response(
            "deploy",
            CommandOutput::ok("Uploading...\nDeployed to: https://shop.example.com\n"),
        );
        let (_r, deployer) = deployer(dir.path(), runner, false);

        let outcome = deployer.deploy(Environment::Production).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.url.as_deref(), Some("https://shop.example.com"));
        assert_eq!(outcome.code, Some(0));
    }

    #[tokio::test]
    async fn deploy_ensures_manifest_environment() {
        let dir = tempdir().unwrap();
        write_manifest(dir.path());
        let runner = MockProcessRunner::new()
            .with_response("deploy", CommandOutput::ok("Worker URL: https://a.example\n"));
        let (_r, deployer) = deployer(dir.path(), runner, false);

        deployer.deploy(Environment::Development).await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join("wrangler.toml")).unwrap();
        assert!(raw.contains("[env.development]"));
    }

    #[tokio::test]
    async fn failed_deploy_returns_outcome_with_code() {
        let dir = tempdir().unwrap();
        write_manifest(dir.path());
        let runner = MockProcessRunner::new().with_response(
            "deploy",
            CommandOutput::failed(1, "✘ [ERROR] No environment found in configuration\n"),
        );
        let (events, mut rx) = EventSender::channel();
        let deployer = PlatformDeployer::new(
            "wrangler",
            dir.path(),
            Arc::new(runner) as Arc<dyn ProcessRunner>,
            false,
            events,
        );

        let outcome = deployer.deploy(Environment::Staging).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.code, Some(1));
        assert!(outcome.error.unwrap().contains("No environment found"));

        let hints: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|e| match e {
                DeployEvent::Hint { message } => Some(message),
                _ => None,
            })
            .collect();
        assert!(hints.iter().any(|h| h.contains("[env.staging]")));
    }

    #[tokio::test]
    async fn dry_run_deploy_spawns_nothing() {
        let dir = tempdir().unwrap();
        write_manifest(dir.path());
        let (runner, deployer) = deployer(dir.path(), MockProcessRunner::new(), true);

        let outcome = deployer.deploy(Environment::Production).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.url.as_deref(), Some("https://shop-worker.workers.dev"));
        assert!(runner.calls().is_empty());
        // Dry run leaves the manifest alone too.
        let raw = std::fs::read_to_string(dir.path().join("wrangler.toml")).unwrap();
        assert!(!raw.contains("[env."));
    }

    #[test]
    fn url_extraction_priority_order() {
        assert_eq!(
            extract_url("Deployed to: https://a.example\nWorker URL: https://b.example", &[], "w"),
            "https://a.example"
        );
        assert_eq!(
            extract_url(
                "Your worker has been deployed to: https://b.example",
                &[],
                "w"
            ),
            "https://b.example"
        );
        assert_eq!(
            extract_url("Worker URL: https://a.example", &[], "w"),
            "https://a.example"
        );
        assert_eq!(
            extract_url("nothing here", &["api.example.com/*".to_string()], "w"),
            "https://api.example.com"
        );
        assert_eq!(extract_url("nothing here", &[], "shop"), "https://shop.workers.dev");
    }

    #[test]
    fn branch_mapping_convention() {
        assert_eq!(environment_for_branch("main"), Environment::Production);
        assert_eq!(environment_for_branch("master"), Environment::Production);
        assert_eq!(environment_for_branch("develop"), Environment::Development);
        assert_eq!(environment_for_branch("dev"), Environment::Development);
        assert_eq!(environment_for_branch("staging"), Environment::Staging);
        assert_eq!(environment_for_branch("release-staging-2"), Environment::Staging);
        assert_eq!(environment_for_branch("feature/login"), Environment::Development);
    }
}
