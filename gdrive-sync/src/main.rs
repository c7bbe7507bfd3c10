use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use gdrive_sync::config::{self, CliOverrides, ENV_CONFIG};
use gdrive_sync::session::SyncRuntime;
use gdrive_sync::storage::TokenStorage;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "gdrive-sync",
    version,
    about = "Mirror a Google Drive folder onto the local filesystem"
)]
struct Cli {
    /// JSON settings file (default: ./settings.json when present)
    #[arg(short, long, env = ENV_CONFIG)]
    config: Option<PathBuf>,

    /// Download every file, even when the local copy is current
    #[arg(short, long)]
    force: bool,

    /// Drive folder to mirror
    #[arg(long)]
    folder_id: Option<String>,

    /// Local directory receiving the mirror
    #[arg(short, long)]
    destination: Option<String>,

    /// Log progress of individual downloads
    #[arg(short, long)]
    verbose: bool,

    /// Remove the cached OAuth token and exit
    #[arg(long)]
    logout: bool,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            force: self.force,
            folder_id: self.folder_id.clone(),
            destination: self.destination.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    if cli.logout {
        let path = config::load_token_path(cli.config.as_deref())?;
        TokenStorage::new(&path)
            .delete()
            .with_context(|| format!("failed to remove {}", path.display()))?;
        tracing::info!(path = %path.display(), "saved token removed");
        return Ok(());
    }

    let config = config::load(cli.config.as_deref(), &cli.overrides())?;
    tracing::info!(
        folder = %config.remote_folder_id,
        destination = %config.destination_path.display(),
        force = config.force_downloads,
        "starting sync"
    );
    SyncRuntime::new(config).run().await?;
    Ok(())
}
