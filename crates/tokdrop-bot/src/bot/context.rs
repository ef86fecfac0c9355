use std::collections::HashSet;
use std::sync::Arc;

use tokdrop_core::chat::ChatClient;
use tokdrop_core::pipeline::DeliveryOrchestrator;

use crate::telegram::TelegramClient;

pub(crate) struct BotContext {
    client: Arc<TelegramClient>,
    orchestrator: DeliveryOrchestrator,
    allowlist_chat_ids: HashSet<i64>,
}

impl BotContext {
    pub(crate) fn new(
        client: Arc<TelegramClient>,
        orchestrator: DeliveryOrchestrator,
        allowlist_chat_ids: HashSet<i64>,
    ) -> Self {
        Self {
            client,
            orchestrator,
            allowlist_chat_ids,
        }
    }

    /// The Telegram client as the pipeline sees it.
    pub(crate) fn chat_client(&self) -> Arc<dyn ChatClient> {
        Arc::clone(&self.client) as Arc<dyn ChatClient>
    }

    pub(crate) fn orchestrator(&self) -> &DeliveryOrchestrator {
        &self.orchestrator
    }

    pub(crate) fn allowlist_chat_ids(&self) -> &HashSet<i64> {
        &self.allowlist_chat_ids
    }
}
