//! CLI subcommand implementations.
//!
//! Each command returns its process exit code: 0 success, 1 critical
//! failure, 2 misuse, 130 cancellation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use console::style;
use serde_json::json;

use crate::bridge::DataBridge;
use crate::capabilities::{CapabilityMode, CapabilityRegistry};
use crate::config::{DeployConfig, DeployMode, Environment};
use crate::deployer::detect_environment;
use crate::events::{DeployEvent, EventSender};
use crate::manifest::ManifestMutator;
use crate::orchestrator::{
    DeploymentReport, DeploymentStatus, DomainConfig, MultiDomainOrchestrator,
    StaticDomainResolver,
};
use crate::process::TokioProcessRunner;
use crate::router::{DomainRouter, SelectOptions};
use crate::util::CancelFlag;

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_MISUSE: i32 = 2;
pub const EXIT_CANCELLED: i32 = 130;

/// Options for `stratus deploy`.
#[derive(Debug, Clone)]
pub struct DeployArgs {
    pub environment: Option<Environment>,
    pub mode: DeployMode,
    pub service_dir: PathBuf,
    pub dry_run: bool,
    pub config_path: Option<PathBuf>,
    pub domain: Option<String>,
    pub all_domains: bool,
    pub parallel: usize,
    pub rollback_on_error: bool,
}

/// Run a deployment.
pub async fn cmd_deploy(args: DeployArgs, cancel: CancelFlag) -> Result<i32> {
    let environment = args
        .environment
        .unwrap_or_else(|| detect_environment(&args.service_dir));

    let domains = match resolve_domains(&args).await? {
        Some(domains) => domains,
        None => {
            eprintln!(
                "{} no domain selected: pass --domain <name>, --all-domains, or add domains.json",
                style("error:").red().bold()
            );
            return Ok(EXIT_MISUSE);
        }
    };

    let mut config = DeployConfig::new(environment, args.mode, &args.service_dir)
        .dry_run(args.dry_run)
        .parallel_deployments(args.parallel)
        .rollback_on_error(args.rollback_on_error);
    config.config_path = args.config_path.clone();
    let state_root = args.service_dir.join(".stratus/state");

    let (events, mut rx) = EventSender::channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                DeployEvent::DryRunArtifact {
                    description,
                    content,
                } => {
                    println!("{} {description}", style("[dry-run]").yellow());
                    for line in content.lines() {
                        println!("    {line}");
                    }
                }
                DeployEvent::Hint { message } => {
                    eprintln!("{} {message}", style("hint:").cyan());
                }
                DeployEvent::CliOutput { line, .. } => {
                    tracing::debug!(target: "stratus::cli", "{line}");
                }
                other => {
                    tracing::debug!(target: "stratus::cli", event = other.name(), "event");
                }
            }
        }
    });

    let bridge = DataBridge::initialize(&state_root, events.clone())?;
    let mut orchestrator = MultiDomainOrchestrator::new(
        config,
        CapabilityRegistry::for_mode(CapabilityMode::from(args.mode), true),
        Arc::new(StaticDomainResolver::new(domains)),
        Arc::new(TokioProcessRunner::with_cancel(cancel.clone())),
        events,
    )?
    .with_bridge(bridge)
    .with_cancel(cancel.clone());

    let report = orchestrator.deploy().await?;
    drop(orchestrator);
    printer.abort();

    print_report(&report);
    Ok(match report.status {
        DeploymentStatus::Failed if cancel.is_cancelled() => EXIT_CANCELLED,
        DeploymentStatus::Failed => EXIT_FAILURE,
        _ => EXIT_OK,
    })
}

async fn resolve_domains(args: &DeployArgs) -> Result<Option<Vec<DomainConfig>>> {
    if let Some(ref name) = args.domain {
        return Ok(Some(vec![DomainConfig::named(name)]));
    }
    let domains_file = args.service_dir.join("domains.json");
    if domains_file.exists() {
        let mut router = DomainRouter::new();
        router
            .load_configuration(Some(&domains_file), None, None)
            .await?;
        let selected = router.select_domains(&SelectOptions {
            specific_domain: None,
            select_all: args.all_domains,
            interactive: !args.all_domains,
        })?;
        return Ok(Some(selected));
    }
    Ok(None)
}

fn print_report(report: &DeploymentReport) {
    println!();
    let headline = match report.status {
        DeploymentStatus::Completed => style("deployment completed").green().bold(),
        DeploymentStatus::CompletedWithWarnings => {
            style("deployment completed with warnings").yellow().bold()
        }
        _ => style("deployment failed").red().bold(),
    };
    println!(
        "{headline}  {} ({} environment, {} mode)",
        report.deployment_id,
        report.environment,
        report.mode
    );

    for domain in &report.domains {
        println!("\n  {}  [{}]", style(&domain.name).bold(), domain.status.as_str());
        if let Some(ref summary) = domain.phase_summary {
            for (phase, entry) in &summary.phases {
                let mark = match entry.state.as_str() {
                    "complete" => style("ok").green(),
                    "error" => style("error").red(),
                    other => style(other).dim(),
                };
                match entry.error {
                    Some(ref error) => {
                        println!("    {phase:<15} {mark} {}", style(error).red())
                    }
                    None => println!("    {phase:<15} {mark} ({} ms)", entry.duration_ms),
                }
            }
        }
        for warning in &domain.warnings {
            println!("    {} {warning}", style("warning:").yellow());
        }
        if let Some(ref url) = domain.worker_url {
            println!("    url: {url}");
        }
    }

    println!(
        "\n  completed: {}  warnings: {}  failed: {}",
        report.stats.completed, report.stats.warnings, report.stats.failed
    );
    println!("  audit log: {}", report.audit_log);
    if report.status == DeploymentStatus::Failed {
        println!(
            "  {} checkpoints were recorded; run `stratus assess` to see recovery options",
            style("recovery:").cyan()
        );
    }
    if !report.rollback_scheduled.is_empty() {
        println!(
            "  rollback scheduled for: {}",
            report.rollback_scheduled.join(", ")
        );
    }
}

/// Run `stratus validate`.
pub fn cmd_validate(service_dir: &Path) -> Result<i32> {
    let manifest = ManifestMutator::new(
        service_dir.join("wrangler.toml"),
        false,
        EventSender::disabled(),
    );
    if !manifest.exists() {
        eprintln!(
            "{} no wrangler.toml in {}",
            style("error:").red().bold(),
            service_dir.display()
        );
        return Ok(EXIT_FAILURE);
    }

    let report = manifest.validate()?;
    for error in &report.errors {
        eprintln!("{} {error}", style("error:").red().bold());
    }
    for warning in &report.warnings {
        eprintln!("{} {warning}", style("warning:").yellow());
    }
    if report.valid {
        println!("{} manifest is valid", style("ok:").green().bold());
        Ok(EXIT_OK)
    } else {
        Ok(EXIT_FAILURE)
    }
}

/// Options for `stratus assess`.
#[derive(Debug, Clone)]
pub struct AssessArgs {
    pub service_dir: PathBuf,
    pub domain: Option<String>,
    pub service_type: Option<String>,
    pub export: Option<PathBuf>,
}

/// Run `stratus assess`: manifest health, domain inventory, state-store and
/// recovery status in one report.
pub fn cmd_assess(args: AssessArgs) -> Result<i32> {
    let manifest = ManifestMutator::new(
        args.service_dir.join("wrangler.toml"),
        false,
        EventSender::disabled(),
    );
    let manifest_report = manifest.validate()?;

    let state_root = args.service_dir.join(".stratus/state");
    let bridge = DataBridge::initialize(&state_root, EventSender::disabled())?;
    let statistics = bridge.workflow_statistics()?;
    let plan = bridge.recovery_plan()?;

    let report = json!({
        "service": args.service_dir.display().to_string(),
        "serviceType": args.service_type,
        "domain": args.domain,
        "manifest": {
            "valid": manifest_report.valid,
            "errors": manifest_report.errors,
            "warnings": manifest_report.warnings,
        },
        "workflow": statistics,
        "recovery": plan,
    });
    let rendered = serde_json::to_string_pretty(&report)?;

    match args.export {
        Some(path) => {
            std::fs::write(&path, &rendered)
                .with_context(|| format!("Failed to export report to {}", path.display()))?;
            println!("report exported to {}", path.display());
        }
        None => println!("{rendered}"),
    }
    Ok(if manifest_report.valid {
        EXIT_OK
    } else {
        EXIT_FAILURE
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn validate_missing_manifest_fails() {
        let dir = tempdir().unwrap();
        assert_eq!(cmd_validate(dir.path()).unwrap(), EXIT_FAILURE);
    }

    #[test]
    fn validate_good_manifest_passes() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("wrangler.toml"),
            "name = \"w\"\nmain = \"src/index.js\"\ncompatibility_date = \"2026-01-15\"\n",
        )
        .unwrap();
        assert_eq!(cmd_validate(dir.path()).unwrap(), EXIT_OK);
    }

    #[test]
    fn assess_exports_report() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("wrangler.toml"),
            "name = \"w\"\nmain = \"src/index.js\"\ncompatibility_date = \"2026-01-15\"\n",
        )
        .unwrap();
        let export = dir.path().join("report.json");

        let code = cmd_assess(AssessArgs {
            service_dir: dir.path().to_path_buf(),
            domain: None,
            service_type: Some("api".to_string()),
            export: Some(export.clone()),
        })
        .unwrap();
        assert_eq!(code, EXIT_OK);

        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(export).unwrap()).unwrap();
        assert_eq!(report["manifest"]["valid"], true);
        assert_eq!(report["recovery"]["available"], false);
        assert!(report["workflow"]["assess"].is_object());
    }

    #[tokio::test]
    async fn deploy_without_domain_is_misuse() {
        let dir = tempdir().unwrap();
        let code = cmd_deploy(
            DeployArgs {
                environment: Some(Environment::Development),
                mode: DeployMode::Single,
                service_dir: dir.path().to_path_buf(),
                dry_run: true,
                config_path: None,
                domain: None,
                all_domains: false,
                parallel: 1,
                rollback_on_error: false,
            },
            CancelFlag::new(),
        )
        .await
        .unwrap();
        assert_eq!(code, EXIT_MISUSE);
    }
}
