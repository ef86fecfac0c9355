use std::sync::Arc;

use tracing::{debug, error};

use crate::bot::context::BotContext;
use crate::handlers::message::handle_message;
use crate::telegram::Message;

/// Hands a message to its own task so slow downloads never hold up polling.
pub(crate) fn dispatch_message(context: &Arc<BotContext>, message: Message) {
    if !should_process_message(context, &message) {
        return;
    }

    let context = Arc::clone(context);
    tokio::spawn(async move {
        let chat_id = message.chat.id;
        let message_id = message.message_id;
        if let Err(err) = handle_message(context.as_ref(), message).await {
            error!("Message handling error for {chat_id}/{message_id}: {err:#}");
        }
    });
}

/// Quick check if message should be processed (allowlist + bot filter).
/// Returns false for messages that should be silently ignored.
fn should_process_message(context: &BotContext, message: &Message) -> bool {
    let allowlist = context.allowlist_chat_ids();
    if !allowlist.is_empty() && !allowlist.contains(&message.chat.id) {
        debug!("Ignoring non-allowlisted chat {}", message.chat.id);
        return false;
    }

    if message.is_from_bot() {
        return false;
    }

    message.body().is_some_and(|body| !body.trim().is_empty())
}
