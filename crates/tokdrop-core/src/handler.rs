//! Entry point for inbound chat messages.

use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::chat::{MessageEvent, MessageRef};
use crate::error::HandlerError;
use crate::links::extract_links;
use crate::pipeline::{DeliveryOrchestrator, DeliveryOutcome};

/// Delivers every unique link in `event`, concurrently, and waits for all.
///
/// Messages without text or chat are ignored. Per-link failures show up in
/// the returned outcomes; only a missing chat client is an error.
pub async fn handle_message_event(
    event: MessageEvent,
    orchestrator: &DeliveryOrchestrator,
) -> Result<Vec<DeliveryOutcome>, HandlerError> {
    let (Some(text), Some(chat_id)) = (event.text.as_deref(), event.chat_id) else {
        warn!("ignoring message {} without text or chat", event.message_id);
        return Ok(Vec::new());
    };

    let links = extract_links(Some(text));
    if links.is_empty() {
        return Ok(Vec::new());
    }
    let client = event.client.ok_or(HandlerError::MissingClient)?;

    let target = MessageRef::new(chat_id, event.message_id);
    debug!("{} link(s) in {target}", links.len());

    let deliveries = links
        .iter()
        .map(|url| orchestrator.run(url, target, Arc::clone(&client)));
    Ok(join_all(deliveries).await)
}
