//! Berth - fleet deployment and recovery CLI
//!
//! The `berth` command deploys catalog services onto the shared host and
//! keeps them healthy.
//!
//! ## Commands
//!
//! - `deploy`: Full pipeline (network, environment, bootstrap, artifact,
//!   start, verify, diagnose and remediate on failure)
//! - `verify`: Poll the health endpoint of the running instance
//! - `diagnose`: Collect a diagnostic report for the running instance
//! - `network`: Resolve the shared network
//! - `env`: Print the resolved environment with secrets removed
//! - `inventory`: List catalog services with their observed state
//! - `catalog`: Print the loaded catalog as JSON
//!
//! Exit status is 0 when the service ends up healthy and 1 on any fatal
//! failure.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use berth_core::reporting::{render_attempt, render_failure, render_report, render_run};
use berth_core::{
    collect_inventory, render_inventory, shutdown_channel, AttemptJournal, BootstrapConfig,
    Collaborators, DeployError, DeployOptions, DeploymentPipeline, Fleet, SecretSource, Shutdown,
};
use berth_runtime::{
    CommandBootstrapper, ContainerRuntime, DockerCli, HttpHealthProbe, SchemaBootstrapper,
};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "berth")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Deploy, verify and recover services on a shared host", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Fleet definition (TOML). The built-in fleet is used when omitted.
    #[arg(long, global = true, env = "BERTH_CONFIG")]
    config: Option<PathBuf>,

    /// Secret environment file (KEY=value, owner-readable only)
    #[arg(long, global = true, env = "BERTH_ENV_FILE", default_value = ".env")]
    env_file: PathBuf,

    /// Directory the attempt journal is written to
    #[arg(
        long,
        global = true,
        env = "BERTH_STATE_DIR",
        default_value = ".berth/attempts"
    )]
    state_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy a service and verify it, remediating once on failure
    Deploy {
        /// Service id from the catalog
        service: String,

        /// Image archive to install before deploying
        #[arg(long)]
        artifact: Option<PathBuf>,

        /// Do not run the schema bootstrapper
        #[arg(long)]
        skip_bootstrap: bool,
    },

    /// Verify the health of the running instance of a service
    Verify {
        /// Service id from the catalog
        service: String,
    },

    /// Collect a diagnostic report for a service
    Diagnose {
        /// Service id from the catalog
        service: String,
    },

    /// Resolve the shared network and list its running members
    Network,

    /// Print the resolved environment of a service (secrets removed)
    Env {
        /// Service id from the catalog
        service: String,
    },

    /// List catalog services with their observed instance state
    Inventory,

    /// Print the loaded catalog as JSON
    Catalog,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    berth_core::telemetry::init_tracing(cli.json, level);

    let fleet = Fleet::load_or_builtin(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("Failed to load fleet definition {}", path.display()),
        None => "Built-in fleet definition is invalid".to_string(),
    })?;
    let fleet = Arc::new(fleet);

    let healthy = match cli.command {
        Commands::Catalog => cmd_catalog(&fleet)?,
        Commands::Inventory => cmd_inventory(&fleet, &DockerCli::default()).await?,
        command => {
            let shutdown = shutdown_on_interrupt();
            let pipeline = build_pipeline(fleet, &cli.env_file, &cli.state_dir, shutdown)?;
            match command {
                Commands::Deploy {
                    service,
                    artifact,
                    skip_bootstrap,
                } => {
                    let options = DeployOptions {
                        artifact,
                        skip_bootstrap,
                    };
                    cmd_deploy(&pipeline, &service, &options).await?
                }
                Commands::Verify { service } => cmd_verify(&pipeline, &service).await?,
                Commands::Diagnose { service } => cmd_diagnose(&pipeline, &service).await?,
                Commands::Network => cmd_network(&pipeline).await?,
                Commands::Env { service } => cmd_env(&pipeline, &service).await?,
                Commands::Inventory | Commands::Catalog => true,
            }
        }
    };

    Ok(if healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Shutdown handle triggered by Ctrl-C.
fn shutdown_on_interrupt() -> Shutdown {
    let (trigger, shutdown) = shutdown_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current cycle");
            trigger.trigger();
        }
    });
    shutdown
}

/// Wire the production collaborators into a pipeline.
fn build_pipeline(
    fleet: Arc<Fleet>,
    env_file: &Path,
    state_dir: &Path,
    shutdown: Shutdown,
) -> Result<DeploymentPipeline> {
    let probe = HttpHealthProbe::new(fleet.settings.health.probe_timeout())
        .context("Failed to build health probe client")?;
    let collaborators = Collaborators {
        runtime: Arc::new(DockerCli::default()),
        probe: Arc::new(probe),
        bootstrapper: fleet
            .settings
            .bootstrap
            .as_ref()
            .and_then(command_bootstrapper),
    };

    let pipeline = DeploymentPipeline::new(
        fleet,
        collaborators,
        SecretSource::File(env_file.to_path_buf()),
        shutdown,
    )
    .context("Failed to set up deployment pipeline")?;
    Ok(pipeline.with_journal(AttemptJournal::new(state_dir)))
}

fn command_bootstrapper(config: &BootstrapConfig) -> Option<Arc<dyn SchemaBootstrapper>> {
    let (program, args) = config.command.split_first()?;
    let bootstrapper: Arc<dyn SchemaBootstrapper> = Arc::new(CommandBootstrapper::new(
        program.clone(),
        args.to_vec(),
        config.timeout(),
    ));
    Some(bootstrapper)
}

/// Run the full pipeline. Failures print the stage/service/report block.
async fn cmd_deploy(
    pipeline: &DeploymentPipeline,
    service: &str,
    options: &DeployOptions,
) -> Result<bool> {
    info!(service = %service, "deploying");
    match pipeline.deploy(service, options).await {
        Ok(run) => {
            print!("{}", render_run(&run));
            Ok(true)
        }
        Err(failure) => {
            eprint!("{}", render_failure(&failure));
            Ok(false)
        }
    }
}

/// Verify the running instance without redeploying.
async fn cmd_verify(pipeline: &DeploymentPipeline, service: &str) -> Result<bool> {
    match pipeline.verify(service).await {
        Ok(attempt) => {
            print!("{}", render_attempt(&attempt));
            Ok(true)
        }
        Err(err @ DeployError::VerificationFailed { .. }) => {
            println!("{err}");
            Ok(false)
        }
        Err(err) => Err(err).with_context(|| format!("Failed to verify {service}")),
    }
}

async fn cmd_diagnose(pipeline: &DeploymentPipeline, service: &str) -> Result<bool> {
    let report = pipeline
        .diagnose(service)
        .await
        .with_context(|| format!("Failed to diagnose {service}"))?;
    print!("{}", render_report(&report));
    Ok(true)
}

async fn cmd_network(pipeline: &DeploymentPipeline) -> Result<bool> {
    let network = pipeline
        .resolve_network()
        .await
        .context("Failed to resolve shared network")?;
    println!("Network: {}", network.name);
    if network.hosts.is_empty() {
        println!("No running members");
    }
    for host in &network.hosts {
        println!("  {host}");
    }
    Ok(true)
}

async fn cmd_env(pipeline: &DeploymentPipeline, service: &str) -> Result<bool> {
    let env = pipeline
        .redacted_environment(service)
        .await
        .with_context(|| format!("Failed to resolve environment for {service}"))?;
    for (key, value) in env {
        println!("{key}={value}");
    }
    Ok(true)
}

async fn cmd_inventory(fleet: &Fleet, runtime: &dyn ContainerRuntime) -> Result<bool> {
    let entries = collect_inventory(&fleet.registry, runtime)
        .await
        .context("Failed to list instances")?;
    print!("{}", render_inventory(&entries));
    Ok(true)
}

fn catalog_json(fleet: &Fleet) -> serde_json::Value {
    serde_json::json!({
        "network": fleet.settings.network,
        "services": fleet.registry.services().collect::<Vec<_>>(),
        "infrastructure": fleet.registry.infrastructure().collect::<Vec<_>>(),
    })
}

fn cmd_catalog(fleet: &Fleet) -> Result<bool> {
    let json = serde_json::to_string_pretty(&catalog_json(fleet))
        .context("Failed to serialize catalog")?;
    println!("{json}");
    Ok(true)
}
