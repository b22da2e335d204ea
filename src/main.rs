use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use stratus::cmd::{self, AssessArgs, DeployArgs};
use stratus::config::{DeployMode, Environment};
use stratus::util::CancelFlag;

#[derive(Parser)]
#[command(name = "stratus")]
#[command(version, about = "Multi-domain serverless deployment orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Service working directory (holds wrangler.toml)
    #[arg(long, global = true)]
    pub service: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Deploy worker artifacts and backing resources
    Deploy {
        /// Target environment (detected from env vars / git branch if omitted)
        #[arg(long)]
        env: Option<Environment>,
        /// Deployment mode
        #[arg(long, default_value = "single")]
        mode: DeployMode,
        /// Emit intended side effects without performing them
        #[arg(long)]
        dry_run: bool,
        /// Alternate manifest path passed to the platform CLI
        #[arg(long)]
        config: Option<PathBuf>,
        /// Deploy a single named domain
        #[arg(long)]
        domain: Option<String>,
        /// Deploy every configured domain
        #[arg(long)]
        all_domains: bool,
        /// Domains per parallel batch
        #[arg(long, default_value = "3")]
        parallel: usize,
        /// Cancel the batch and schedule rollback when a domain fails
        #[arg(long)]
        rollback_on_error: bool,
    },
    /// Validate the service configuration
    Validate,
    /// Produce an assessment report (manifest, state stores, recovery)
    Assess {
        #[arg(long)]
        domain: Option<String>,
        #[arg(long)]
        service_type: Option<String>,
        /// Write the report to a file instead of stdout
        #[arg(long)]
        export: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let service_dir = match cli.service.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("cancellation requested, terminating in-flight commands");
                cancel.cancel();
            }
        });
    }

    let code = match cli.command {
        Commands::Deploy {
            env,
            mode,
            dry_run,
            config,
            domain,
            all_domains,
            parallel,
            rollback_on_error,
        } => {
            cmd::cmd_deploy(
                DeployArgs {
                    environment: env,
                    mode,
                    service_dir,
                    dry_run,
                    config_path: config,
                    domain,
                    all_domains,
                    parallel,
                    rollback_on_error,
                },
                cancel,
            )
            .await?
        }
        Commands::Validate => cmd::cmd_validate(&service_dir)?,
        Commands::Assess {
            domain,
            service_type,
            export,
        } => cmd::cmd_assess(AssessArgs {
            service_dir,
            domain,
            service_type,
            export,
        })?,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
