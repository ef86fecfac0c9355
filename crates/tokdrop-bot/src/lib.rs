//! Telegram front end: long-polls for messages and hands each one to the
//! delivery pipeline.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokdrop_core::config::Config;
use tokdrop_core::pipeline::DeliveryOrchestrator;
use tracing::{debug, info, warn};

use crate::bot::{BotContext, dispatch_message};
use crate::telegram::{TelegramClient, TelegramSettings};

mod bot;
mod handlers;
pub mod telegram;

pub async fn run(config: Config) -> Result<()> {
    let settings = TelegramSettings::from_config(&config)?;
    let http = config
        .http
        .client_builder()?
        .build()
        .context("Failed to build Telegram HTTP client")?;
    let client = Arc::new(TelegramClient::new(
        http,
        &settings.api_base_url,
        settings.bot_token,
    ));
    let orchestrator = DeliveryOrchestrator::from_config(&config)?;

    info!(
        "tokdrop bot started. Allowlist: {} chat(s). Scratch dir: {}",
        settings.allowlist_chat_ids.len(),
        config.download.scratch_dir.display()
    );

    let context = Arc::new(BotContext::new(
        Arc::clone(&client),
        orchestrator,
        settings.allowlist_chat_ids,
    ));
    poll(&client, &context, settings.poll_timeout).await;
    Ok(())
}

async fn poll(client: &TelegramClient, context: &Arc<BotContext>, poll_timeout: Duration) {
    let mut offset: Option<i64> = None;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let current_offset = offset;
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down Telegram bot.");
                break;
            }
            updates = client.get_updates(current_offset, poll_timeout) => {
                let updates = match updates {
                    Ok(updates) => updates,
                    Err(err) => {
                        warn!("Telegram polling error: {err}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                };

                if !updates.is_empty() {
                    debug!("Received {} update(s)", updates.len());
                }
                for update in updates {
                    offset = Some(update.update_id + 1);
                    if let Some(message) = update.message {
                        dispatch_message(context, message);
                    }
                }
            }
        }
    }
}
