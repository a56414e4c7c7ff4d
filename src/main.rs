//! Tracker ingest server - normalizes GPS/GSM device streams over TCP.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracker_server as app;

use app::config::{AppConfig, ConfigLoadResult};
use app::server::TrackerServer;
use app::store::{MemoryDirectory, MemorySink};

/// TCP ingest server for GPS/GSM tracking devices.
#[derive(Parser)]
#[command(name = "tracker-server")]
struct Cli {
    /// Use config.toml from current directory (dev mode)
    #[arg(long)]
    dev: bool,

    /// Explicit config file path
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write a default config.toml and exit
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = if let Some(path) = cli.config {
        path
    } else if cli.dev {
        PathBuf::from("config.toml")
    } else {
        AppConfig::default_path()
    };

    if cli.init_config {
        AppConfig::default().save(&config_path)?;
        println!("Wrote default config to {}", config_path.display());
        return Ok(());
    }

    let config = match AppConfig::try_load(&config_path) {
        ConfigLoadResult::Loaded(config) => config,
        ConfigLoadResult::Missing => {
            eprintln!("Config {} missing, using defaults", config_path.display());
            AppConfig::default()
        }
        ConfigLoadResult::Invalid(e) => {
            anyhow::bail!("Config {} invalid: {e}", config_path.display());
        }
    };

    // Initialize logging; the appender guard must outlive the server
    let _guard = if config.log.file_enabled {
        let appender = tracing_appender::rolling::daily(&config.log.dir, "tracker-server.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
            )
            .with_writer(writer)
            .with_ansi(false)
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
            )
            .init();
        None
    };

    tracing::info!("Tracker server starting...");

    // Standalone mode: in-memory directory and sink. Production deployments
    // plug their own DeviceDirectory / PositionSink implementations in here.
    let directory = Arc::new(MemoryDirectory::new());
    let sink = Arc::new(MemorySink::new());

    TrackerServer::new(config, directory, sink).run().await?;

    tracing::info!("Tracker server stopped");
    Ok(())
}
