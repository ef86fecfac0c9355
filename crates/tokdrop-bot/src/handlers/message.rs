use anyhow::Result;
use tokdrop_core::chat::MessageEvent;
use tokdrop_core::handler::handle_message_event;
use tokdrop_core::pipeline::DeliveryOutcome;
use tracing::info;

use crate::bot::BotContext;
use crate::telegram::Message;

pub(crate) async fn handle_message(context: &BotContext, message: Message) -> Result<()> {
    let event = MessageEvent {
        text: message.body().map(str::to_string),
        chat_id: Some(message.chat.id),
        message_id: message.message_id,
        client: Some(context.chat_client()),
    };

    let outcomes = handle_message_event(event, context.orchestrator()).await?;
    if outcomes.is_empty() {
        return Ok(());
    }

    let delivered = outcomes.iter().filter(|o| o.is_delivered()).count();
    let failed = outcomes
        .iter()
        .filter(|o| matches!(o, DeliveryOutcome::Failed { .. }))
        .count();
    info!(
        "Message {}/{}: {} link(s), {delivered} delivered, {failed} failed",
        message.chat.id,
        message.message_id,
        outcomes.len()
    );
    Ok(())
}
