use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use spsflow::config::{Config, TopologyMode};
use spsflow::node::Node;

/// Windowed success-per-second aggregation of a streaming event feed.
#[derive(Parser)]
#[command(name = "spsflow", about)]
struct Cli {
    /// Path to the YAML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Window length in seconds.
    #[arg(long)]
    interval: Option<u64>,

    /// Number of deserialization workers.
    #[arg(long)]
    cores: Option<usize>,

    /// Topology mode (local or distributed).
    #[arg(long)]
    topology: Option<TopologyMode>,

    /// This node's endpoint (host:port).
    #[arg(long)]
    my_host: Option<String>,

    /// Worker node endpoint (host:port).
    #[arg(long)]
    worker_host: Option<String>,

    /// Aggregator node endpoint (host:port).
    #[arg(long)]
    aggregator_host: Option<String>,

    /// Feed URL.
    #[arg(long)]
    feed_url: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

/// Build-time version info.
mod version {
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

impl Cli {
    /// Load the config file (or defaults) and apply flag overrides.
    fn into_config(self) -> Result<Config> {
        let mut cfg = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(level) = self.log_level {
            cfg.log_level = level;
        }
        if let Some(interval) = self.interval {
            cfg.window.interval_secs = interval;
        }
        if let Some(cores) = self.cores {
            cfg.workers.count = cores;
        }
        if let Some(mode) = self.topology {
            cfg.topology.mode = mode;
        }
        if let Some(host) = self.my_host {
            cfg.topology.my_host = host;
        }
        if let Some(host) = self.worker_host {
            cfg.topology.worker_host = host;
        }
        if let Some(host) = self.aggregator_host {
            cfg.topology.aggregator_host = host;
        }
        if let Some(url) = self.feed_url {
            cfg.feed.url = url;
        }

        cfg.validate().context("invalid configuration")?;
        Ok(cfg)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle version subcommand before anything else.
    if let Some(Command::Version) = &cli.command {
        println!("spsflow {}", version::full());
        return Ok(());
    }

    let cfg = cli.into_config()?;

    // Diagnostics go to stderr; stdout carries aggregate output only.
    let filter = EnvFilter::try_new(&cfg.log_level)
        .with_context(|| format!("invalid log level: {}", cfg.log_level))?;

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        "starting spsflow",
    );

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(run(cfg))
}

async fn run(cfg: Config) -> Result<()> {
    let mut node = Node::new(cfg)?;
    node.start().await?;

    shutdown_signal().await?;

    node.stop().await?;

    tracing::info!("spsflow stopped");

    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).context("registering SIGTERM handler")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for SIGINT")?;
            tracing::info!("received SIGINT, shutting down");
        }
        _ = sigterm.recv() => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }

    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("waiting for SIGINT")?;
    tracing::info!("received SIGINT, shutting down");
    Ok(())
}
