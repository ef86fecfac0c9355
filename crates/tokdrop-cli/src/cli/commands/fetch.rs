//! One-shot retrieval without a chat.

use anyhow::{Context, Result};
use tokdrop_core::config::Config;
use tokdrop_core::pipeline::DeliveryOrchestrator;
use tracing::info;

pub async fn run(url: &str, config: &Config) -> Result<()> {
    let orchestrator = DeliveryOrchestrator::from_config(config)?;
    let retrieved = orchestrator
        .retrieve(url)
        .await
        .with_context(|| format!("fetch {url}"))?;

    match retrieved {
        Some(file) => {
            let path = file.keep();
            info!("saved {url} to {}", path.display());
            println!("{}", path.display());
        }
        None => println!("{url} is a slideshow; there is no video to download."),
    }
    Ok(())
}
