//! cachepulse CLI: thin wrapper over `cachepulse-core`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use cachepulse_core::logging::init_logging;
use cachepulse_core::{daemon, Config, Shutdown};

#[derive(Parser)]
#[command(name = "cachepulse", version, about = "LAN-cache transfer lifecycle daemon")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, short, global = true, default_value = "/etc/cachepulse/cachepulse.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon until SIGINT/SIGTERM
    Run,
    /// Validate the configuration and print the resolved form
    CheckConfig,
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    if path.is_file() {
        Config::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))
    } else {
        // Missing config file is fine for `run` on a fresh box; defaults
        // carry no datasources, so the probe stays disabled.
        Ok(Config::default())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run => run(&cli.config).await,
        Commands::CheckConfig => check_config(&cli.config),
    }
}

async fn run(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    init_logging(&config.general.log_level, config.general.log_format)
        .context("Failed to initialize logging")?;

    if config.datasources.is_empty() {
        warn!("No datasources configured; running with reaper and guardian only");
    }

    let shutdown = Arc::new(Shutdown::new());
    spawn_signal_handler(Arc::clone(&shutdown));

    info!(config = %config_path.display(), "cachepulse starting");
    daemon::run(&config, shutdown).await?;
    Ok(())
}

fn check_config(config_path: &Path) -> anyhow::Result<()> {
    let config = Config::load_from(config_path)
        .with_context(|| format!("Invalid config at {}", config_path.display()))?;
    let rendered = toml::to_string_pretty(&config).context("Failed to render config")?;
    println!("{rendered}");
    Ok(())
}

fn spawn_signal_handler(shutdown: Arc<Shutdown>) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                    shutdown.trigger();
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("Shutdown signal received");
        shutdown.trigger();
    });
}
