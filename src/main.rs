use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use sitekeeper::config::AppConfig;
use sitekeeper::manager::{Manager, SiteServer};
use sitekeeper::site::{InMemorySiteRepository, SiteLocks, StatusReporter};
use sitekeeper::tasks::{ContainerRuntime, DockerClient};
use sitekeeper::worker::{Worker, run_tasks, task_queue};

#[derive(Debug, Parser)]
#[command(name = "sitekeeper", version, about = "Provisions one container per site")]
struct Args {
    /// TOML configuration file. Environment variables override it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, overrides `logging.level`.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = AppConfig::load(args.config.as_deref()).context("loading configuration")?;
    init_logging(args.log_level.as_deref().unwrap_or(&config.logging.level))?;

    let docker = DockerClient::connect(&config.docker).context("connecting to docker")?;
    if let Err(err) = docker.ping().await {
        error!(error = %err, "Docker daemon is not reachable");
        return Err(err).context("docker health check");
    }
    info!(socket = %config.docker.socket_path, "Connected to docker");

    let runtime: Arc<dyn ContainerRuntime> = Arc::new(docker);
    let sites = Arc::new(InMemorySiteRepository::new());
    let locks = SiteLocks::new();
    let (sender, receiver) = task_queue(config.queue.capacity);

    let worker = Worker::new(
        "default_worker",
        runtime.clone(),
        StatusReporter::new(sites.clone()),
        locks.clone(),
        &config.docker.pod_domain,
    );
    let worker_handle = tokio::spawn(run_tasks(worker, receiver));

    let manager = Arc::new(Manager::new(runtime, sites, sender, locks));
    let server = SiteServer::new(manager, &config.server.host, config.server.port);
    server.start_server(shutdown_signal()).await?;

    info!("Waiting for queued tasks to finish");
    worker_handle.await.context("worker task panicked")?;
    Ok(())
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(err) => error!(error = %err, "Failed to listen for shutdown signal"),
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_line_number(true)
                .compact(),
        )
        .try_init()?;

    Ok(())
}
