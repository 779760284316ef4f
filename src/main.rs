use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use nonkube_controller::config::ControllerConfig;
use nonkube_controller::controller::{ControllerState, NamespaceRegistry};
use nonkube_controller::fs::FileLock;
use nonkube_controller::telemetry::{init_tracing, LogFormat};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, args_conflicts_with_subcommands = true)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller (default)
    Run(RunArgs),
    /// Show version information
    Version,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Directory whose sub-directories are namespaces
    #[arg(long, env = "SKUPPER_NAMESPACES_PATH")]
    namespaces_path: Option<PathBuf>,

    /// Optional TOML file overriding intervals and paths
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Hard limit for graceful shutdown, in seconds
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS")]
    shutdown_timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command.unwrap_or(Commands::Run(args.run)) {
        Commands::Version => {
            println!("Skupper nonkube controller v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Run(run_args) => run_controller(run_args).await,
    }
}

fn load_config(args: &RunArgs) -> anyhow::Result<ControllerConfig> {
    let mut config = match &args.config {
        Some(path) => ControllerConfig::load(path)
            .with_context(|| format!("unable to load configuration from {}", path.display()))?,
        None => ControllerConfig::default(),
    };
    if let Some(path) = &args.namespaces_path {
        config.namespaces_path = path.clone();
    }
    if let Some(secs) = args.shutdown_timeout_secs {
        if secs == 0 {
            bail!("shutdown timeout must be greater than zero");
        }
        config.shutdown_timeout = Duration::from_secs(secs);
    }
    Ok(config)
}

async fn run_controller(args: RunArgs) -> anyhow::Result<()> {
    init_tracing(args.log_format);
    let config = load_config(&args)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        namespaces = %config.namespaces_path.display(),
        "Starting Skupper nonkube controller"
    );

    std::fs::create_dir_all(&config.namespaces_path).with_context(|| {
        format!(
            "unable to create namespaces directory {}",
            config.namespaces_path.display()
        )
    })?;
    let _lock = FileLock::acquire(&config.lock_file()).context("another controller is running")?;

    let shutdown_timeout = config.shutdown_timeout;
    let stop = CancellationToken::new();
    let tracker = TaskTracker::new();
    let registry = NamespaceRegistry::new(ControllerState::new(config));
    registry
        .start(stop.clone(), &tracker)
        .context("unable to start namespace registry")?;

    wait_for_signal().await?;
    info!("Shutting down");
    stop.cancel();
    tracker.close();

    if tokio::time::timeout(shutdown_timeout, tracker.wait())
        .await
        .is_err()
    {
        error!(timeout = ?shutdown_timeout, "Shutdown timed out");
        bail!("graceful shutdown did not complete within {shutdown_timeout:?}");
    }
    info!("Shutdown complete");
    Ok(())
}

async fn wait_for_signal() -> anyhow::Result<()> {
    let mut terminate =
        signal(SignalKind::terminate()).context("unable to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("unable to listen for SIGINT")?;
            info!("Received SIGINT");
        }
        _ = terminate.recv() => info!("Received SIGTERM"),
    }
    Ok(())
}
