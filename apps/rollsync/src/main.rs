mod cli;

use anyhow::{Context, Result};
use chrono::Utc;
use rollsync_bitable::BitableClient;
use rollsync_core::{extractor_from_config, previous_day_window, ExtractWindow, SyncJob};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = cli::parse_args();
    let config = rollsync_config::load_resolved_config(args.config_path)
        .context("failed to load rollsync config")?;
    let offset = config.sync.reference_offset()?;

    let window = match args.date {
        Some(day) => ExtractWindow { day },
        None => previous_day_window(Utc::now(), &offset),
    };
    info!("syncing {} .. {}", window.start_text(), window.end_text());

    let client = BitableClient::new(config.bitable.clone())?;
    let extractor = extractor_from_config(&config.source);

    SyncJob::new(&config, &client, extractor.as_ref())
        .run(&window)
        .await?;
    Ok(())
}
