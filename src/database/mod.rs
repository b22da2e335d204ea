//! Database orchestration through the platform CLI.
//!
//! Creates per-domain d1 databases, applies migrations with retry, and
//! exports environment backups. Database names are a pure function of the
//! domain and environment (`<dot-to-dash(domain)>-<env>-db`).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::audit::AuditLog;
use crate::config::Environment;
use crate::errors::PlatformError;
use crate::events::{DeployEvent, EventSender};
use crate::process::{CommandOutput, CommandSpec, ProcessRunner};
use crate::retry::{RetryConfig, with_retry};
use crate::util::database_name;

/// An allocated database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseHandle {
    pub name: String,
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MigrationStatus {
    Completed,
    Failed,
    DryRun,
}

/// Result of a migration run. CLI failure is reported here, not thrown:
/// the caller decides whether it is fatal.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationOutcome {
    pub status: MigrationStatus,
    pub database_name: String,
    pub migrations_applied: u32,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupEntry {
    pub domain: String,
    pub database_name: String,
    pub output_path: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupManifest {
    pub environment: Environment,
    pub created_at: chrono::DateTime<Utc>,
    pub entries: Vec<BackupEntry>,
}

pub struct DatabaseOrchestrator {
    cli: String,
    service_dir: PathBuf,
    backup_dir: PathBuf,
    runner: Arc<dyn ProcessRunner>,
    retry: RetryConfig,
    command_timeout: Duration,
    dry_run: bool,
    events: EventSender,
    audit: Arc<AuditLog>,
}

impl DatabaseOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cli: impl Into<String>,
        service_dir: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
        runner: Arc<dyn ProcessRunner>,
        dry_run: bool,
        events: EventSender,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            cli: cli.into(),
            service_dir: service_dir.into(),
            backup_dir: backup_dir.into(),
            runner,
            retry: RetryConfig::default(),
            command_timeout: Duration::from_secs(120),
            dry_run,
            events,
            audit,
        }
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Migration command for a database.
    ///
    /// Local (development): `d1 migrations apply <db> --local`, no
    /// environment flag. Remote: `d1 migrations apply <db> --env <env>
    /// --remote`.
    pub fn migration_command(
        &self,
        db_name: &str,
        environment: Environment,
        is_remote: bool,
    ) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.cli)
            .args(["d1", "migrations", "apply", db_name])
            .current_dir(&self.service_dir)
            .timeout(self.command_timeout);
        if is_remote {
            spec = spec.args(["--env", environment.as_str()]).arg("--remote");
        } else {
            spec = spec.arg("--local");
        }
        spec
    }

    /// Create the database if the platform does not know it yet. An
    /// "already exists" response is success.
    pub async fn ensure_database(&self, db_name: &str) -> Result<DatabaseHandle, PlatformError> {
        let spec = CommandSpec::new(&self.cli)
            .args(["d1", "create", db_name])
            .current_dir(&self.service_dir)
            .timeout(self.command_timeout);

        if self.dry_run {
            self.events.emit(DeployEvent::DryRunArtifact {
                description: "database create".to_string(),
                content: spec.display_line(),
            });
            return Ok(DatabaseHandle {
                name: db_name.to_string(),
                id: "dry-run".to_string(),
            });
        }

        let output = self.runner.run(&spec, &self.events).await?;
        if !output.success() && !output.stderr.contains("already exists") {
            return Err(PlatformError::CliFailed {
                command: spec.display_line(),
                code: output.code,
                stderr: output.stderr,
            });
        }

        let id = extract_database_id(&output.stdout).unwrap_or_else(|| "unknown".to_string());
        self.log_audit_event(
            "database-ensured",
            db_name,
            serde_json::json!({ "id": id }),
        );
        Ok(DatabaseHandle {
            name: db_name.to_string(),
            id,
        })
    }

    /// Apply pending migrations with retry. Exhausted retries produce a
    /// `Failed` outcome rather than an error.
    pub async fn apply_database_migrations(
        &self,
        db_name: &str,
        environment: Environment,
        is_remote: bool,
    ) -> MigrationOutcome {
        let spec = self.migration_command(db_name, environment, is_remote);

        if self.dry_run {
            self.events.emit(DeployEvent::DryRunArtifact {
                description: "database migration".to_string(),
                content: spec.display_line(),
            });
            return MigrationOutcome {
                status: MigrationStatus::DryRun,
                database_name: db_name.to_string(),
                migrations_applied: 0,
                output: String::new(),
                error: None,
            };
        }

        let attempt = with_retry(self.retry, "database migration", |_attempt| {
            let spec = spec.clone();
            async move {
                let output = self.runner.run(&spec, &self.events).await?;
                if output.success() {
                    Ok(output)
                } else {
                    Err(PlatformError::CliFailed {
                        command: spec.display_line(),
                        code: output.code,
                        stderr: output.stderr,
                    })
                }
            }
        })
        .await;

        match attempt {
            Ok(CommandOutput { stdout, .. }) => {
                let applied = parse_migration_count(&stdout);
                self.log_audit_event(
                    "migrations-applied",
                    db_name,
                    serde_json::json!({
                        "environment": environment.as_str(),
                        "count": applied,
                    }),
                );
                MigrationOutcome {
                    status: MigrationStatus::Completed,
                    database_name: db_name.to_string(),
                    migrations_applied: applied,
                    output: stdout,
                    error: None,
                }
            }
            Err(error) => {
                self.log_audit_event(
                    "migrations-failed",
                    db_name,
                    serde_json::json!({
                        "environment": environment.as_str(),
                        "error": error.to_string(),
                    }),
                );
                MigrationOutcome {
                    status: MigrationStatus::Failed,
                    database_name: db_name.to_string(),
                    migrations_applied: 0,
                    output: String::new(),
                    error: Some(error.to_string()),
                }
            }
        }
    }

    /// Export every domain's database and write a JSON backup manifest.
    pub async fn create_environment_backup(
        &self,
        environment: Environment,
        domains: &[String],
    ) -> anyhow::Result<BackupManifest> {
        std::fs::create_dir_all(&self.backup_dir)?;
        let stamp = Utc::now().format("%Y%m%dT%H%M%S");
        let mut entries = Vec::new();

        for domain in domains {
            let db_name = database_name(domain, environment.as_str());
            let output_path = self
                .backup_dir
                .join(format!("{db_name}-{stamp}.sql"))
                .to_string_lossy()
                .to_string();
            let spec = CommandSpec::new(&self.cli)
                .args(["d1", "export", &db_name, "--remote", "--output", &output_path])
                .current_dir(&self.service_dir)
                .timeout(self.command_timeout);

            if self.dry_run {
                self.events.emit(DeployEvent::DryRunArtifact {
                    description: "database export".to_string(),
                    content: spec.display_line(),
                });
                entries.push(BackupEntry {
                    domain: domain.clone(),
                    database_name: db_name,
                    output_path,
                    success: true,
                    error: None,
                });
                continue;
            }

            let entry = match self.runner.run(&spec, &self.events).await {
                Ok(output) if output.success() => BackupEntry {
                    domain: domain.clone(),
                    database_name: db_name,
                    output_path,
                    success: true,
                    error: None,
                },
                Ok(output) => BackupEntry {
                    domain: domain.clone(),
                    database_name: db_name,
                    output_path,
                    success: false,
                    error: Some(output.stderr),
                },
                Err(error) => BackupEntry {
                    domain: domain.clone(),
                    database_name: db_name,
                    output_path,
                    success: false,
                    error: Some(error.to_string()),
                },
            };
            entries.push(entry);
        }

        let manifest = BackupManifest {
            environment,
            created_at: Utc::now(),
            entries,
        };

        let manifest_path = self
            .backup_dir
            .join(format!("backup-{}-{stamp}.json", environment.as_str()));
        if !self.dry_run {
            std::fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)?;
        }
        self.log_audit_event(
            "environment-backup",
            environment.as_str(),
            serde_json::json!({
                "domains": domains.len(),
                "manifest": manifest_path.to_string_lossy(),
            }),
        );
        Ok(manifest)
    }

    /// Append to the deployment audit log; audit failures never interrupt
    /// orchestration.
    pub fn log_audit_event(&self, event: &str, target: &str, data: Value) {
        if let Err(error) = self.audit.append(event, target, data) {
            tracing::warn!(target: "stratus::database", %error, "audit append failed");
        }
    }
}

fn parse_migration_count(stdout: &str) -> u32 {
    // Numeric token following an "Applied" marker, e.g.
    // "Applied 3 migrations" or "Applied 3 new migrations".
    let re = Regex::new(r"Applied\s+(\d+)").expect("static regex");
    re.captures(stdout)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

fn extract_database_id(stdout: &str) -> Option<String> {
    // `d1 create` prints a binding snippet with `database_id = "<uuid>"`.
    let re = Regex::new(r#"database_id\s*=\s*"([0-9a-fA-F-]+)""#).expect("static regex");
    re.captures(stdout)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::MockProcessRunner;
    use tempfile::tempdir;

    struct Fixture {
        _dir: tempfile::TempDir,
        runner: Arc<MockProcessRunner>,
    }

    impl Fixture {
        fn new(runner: MockProcessRunner) -> (Self, DatabaseOrchestrator) {
            Self::with_dry_run(runner, false)
        }

        fn with_dry_run(
            runner: MockProcessRunner,
            dry_run: bool,
        ) -> (Self, DatabaseOrchestrator) {
            let dir = tempdir().unwrap();
            let runner = Arc::new(runner);
            let audit = Arc::new(AuditLog::new(dir.path().join("audit.log")).unwrap());
            let orchestrator = DatabaseOrchestrator::new(
                "wrangler",
                dir.path(),
                dir.path().join("backups"),
                Arc::clone(&runner) as Arc<dyn ProcessRunner>,
                dry_run,
                EventSender::disabled(),
                audit,
            )
            .retry(RetryConfig::new(3, Duration::from_millis(1)));
            (
                Fixture {
                    _dir: dir,
                    runner,
                },
                orchestrator,
            )
        }
    }

    #[test]
    fn local_migration_command_has_no_env_flag() {
        let (_f, db) = Fixture::new(MockProcessRunner::new());
        let spec = db.migration_command("example-com-development-db", Environment::Development, false);
        let line = spec.display_line();
        assert_eq!(
            line,
            "wrangler d1 migrations apply example-com-development-db --local"
        );
        assert!(!line.contains("--env"));
    }

    #[test]
    fn remote_migration_command_has_env_and_remote() {
        let (_f, db) = Fixture::new(MockProcessRunner::new());
        let spec = db.migration_command("example-com-staging-db", Environment::Staging, true);
        assert_eq!(
            spec.display_line(),
            "wrangler d1 migrations apply example-com-staging-db --env staging --remote"
        );
    }

    #[tokio::test]
    async fn migration_success_parses_applied_count() {
        let runner = MockProcessRunner::new().with_response(
            "migrations apply",
            CommandOutput::ok("🌀 Executing on example-com-production-db\nApplied 3 migrations\n"),
        );
        let (_f, db) = Fixture::new(runner);

        let outcome = db
            .apply_database_migrations("example-com-production-db", Environment::Production, true)
            .await;
        assert_eq!(outcome.status, MigrationStatus::Completed);
        assert_eq!(outcome.migrations_applied, 3);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn migration_retries_transient_failures() {
        let runner = MockProcessRunner::new()
            .with_response("migrations apply", CommandOutput::failed(1, "database busy"))
            .with_response(
                "migrations apply",
                CommandOutput::ok("Applied 1 migrations\n"),
            );
        let (f, db) = Fixture::new(runner);

        let outcome = db
            .apply_database_migrations("example-com-staging-db", Environment::Staging, true)
            .await;
        assert_eq!(outcome.status, MigrationStatus::Completed);
        assert_eq!(f.runner.call_count("migrations apply"), 2);
    }

    #[tokio::test]
    async fn migration_exhaustion_reports_failure_without_throwing() {
        let runner = MockProcessRunner::new()
            .with_response("migrations apply", CommandOutput::failed(1, "locked"));
        let (f, db) = Fixture::new(runner);

        let outcome = db
            .apply_database_migrations("example-com-staging-db", Environment::Staging, true)
            .await;
        assert_eq!(outcome.status, MigrationStatus::Failed);
        assert!(outcome.error.unwrap().contains("locked"));
        // Default retry config: three attempts.
        assert_eq!(f.runner.call_count("migrations apply"), 3);
    }

    #[tokio::test]
    async fn migration_dry_run_skips_cli() {
        let (f, db) = Fixture::with_dry_run(MockProcessRunner::new(), true);
        let outcome = db
            .apply_database_migrations("example-com-staging-db", Environment::Staging, true)
            .await;
        assert_eq!(outcome.status, MigrationStatus::DryRun);
        assert!(f.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn ensure_database_parses_id_from_create_output() {
        let runner = MockProcessRunner::new().with_response(
            "d1 create",
            CommandOutput::ok(
                "✅ Successfully created DB\n[[d1_databases]]\nbinding = \"DB\"\ndatabase_name = \"x\"\ndatabase_id = \"aaaabbbb-1111-2222-3333-ccccddddeeee\"\n",
            ),
        );
        let (_f, db) = Fixture::new(runner);

        let handle = db.ensure_database("example-com-production-db").await.unwrap();
        assert_eq!(handle.name, "example-com-production-db");
        assert_eq!(handle.id, "aaaabbbb-1111-2222-3333-ccccddddeeee");
    }

    #[tokio::test]
    async fn ensure_database_tolerates_already_exists() {
        let runner = MockProcessRunner::new().with_response(
            "d1 create",
            CommandOutput::failed(1, "a database with that name already exists"),
        );
        let (_f, db) = Fixture::new(runner);
        let handle = db.ensure_database("example-com-production-db").await.unwrap();
        assert_eq!(handle.id, "unknown");
    }

    #[tokio::test]
    async fn ensure_database_surfaces_other_failures() {
        let runner = MockProcessRunner::new()
            .with_response("d1 create", CommandOutput::failed(1, "authentication error"));
        let (_f, db) = Fixture::new(runner);
        let err = db.ensure_database("example-com-production-db").await.unwrap_err();
        assert_eq!(err.kind(), "PlatformCLIError");
    }

    #[tokio::test]
    async fn backup_exports_every_domain_and_writes_manifest() {
        let runner = MockProcessRunner::new()
            .with_response("d1 export", CommandOutput::ok("Export complete\n"));
        let (f, db) = Fixture::new(runner);

        let manifest = db
            .create_environment_backup(
                Environment::Production,
                &["example.com".to_string(), "shop.example.com".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(manifest.entries.len(), 2);
        assert!(manifest.entries.iter().all(|e| e.success));
        assert_eq!(manifest.entries[0].database_name, "example-com-production-db");
        assert_eq!(
            manifest.entries[1].database_name,
            "shop-example-com-production-db"
        );
        assert_eq!(f.runner.call_count("d1 export"), 2);

        // The manifest file landed next to the exports.
        let manifests: Vec<_> = std::fs::read_dir(f._dir.path().join("backups"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".json"))
            .collect();
        assert_eq!(manifests.len(), 1);
    }

    #[tokio::test]
    async fn backup_records_per_domain_failures() {
        let runner = MockProcessRunner::new().with_response(
            "shop-example-com-production-db",
            CommandOutput::failed(1, "export denied"),
        );
        let (_f, db) = Fixture::new(runner);

        let manifest = db
            .create_environment_backup(
                Environment::Production,
                &["example.com".to_string(), "shop.example.com".to_string()],
            )
            .await
            .unwrap();
        assert!(manifest.entries[0].success);
        assert!(!manifest.entries[1].success);
        assert!(manifest.entries[1].error.as_deref().unwrap().contains("denied"));
    }

    #[test]
    fn migration_count_parser_variants() {
        assert_eq!(parse_migration_count("Applied 12 migrations"), 12);
        assert_eq!(parse_migration_count("Applied 1 new migration!"), 1);
        assert_eq!(parse_migration_count("No migrations to apply"), 0);
        assert_eq!(parse_migration_count(""), 0);
    }
}
