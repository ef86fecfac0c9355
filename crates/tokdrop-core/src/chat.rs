//! Messaging capabilities the pipeline needs from a chat platform.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DeliveryError;

/// A message in a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: i64,
    pub message_id: i64,
}

impl MessageRef {
    pub fn new(chat_id: i64, message_id: i64) -> Self {
        Self {
            chat_id,
            message_id,
        }
    }
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.chat_id, self.message_id)
    }
}

/// A reaction attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction {
    Emoji(String),
    CustomEmoji(String),
}

impl Reaction {
    /// Parses `custom:<id>` as a custom emoji and anything else as a plain emoji.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        match value.strip_prefix("custom:") {
            Some(id) => Reaction::CustomEmoji(id.trim().to_string()),
            None => Reaction::Emoji(value.to_string()),
        }
    }
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<MessageRef, DeliveryError>;

    /// Uploads a video file as a streamable video.
    async fn send_video(
        &self,
        chat_id: i64,
        path: &Path,
        reply_to: Option<i64>,
    ) -> Result<MessageRef, DeliveryError>;

    /// Replaces the bot's reaction on `target`; `None` clears it.
    async fn set_reaction(
        &self,
        target: MessageRef,
        reaction: Option<&Reaction>,
    ) -> Result<(), DeliveryError>;

    async fn edit_text(&self, target: MessageRef, text: &str) -> Result<(), DeliveryError>;

    async fn delete_message(&self, target: MessageRef) -> Result<(), DeliveryError>;
}

/// An inbound message as handed over by the chat adapter.
#[derive(Clone)]
pub struct MessageEvent {
    pub text: Option<String>,
    pub chat_id: Option<i64>,
    pub message_id: i64,
    pub client: Option<Arc<dyn ChatClient>>,
}

impl fmt::Debug for MessageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageEvent")
            .field("text", &self.text)
            .field("chat_id", &self.chat_id)
            .field("message_id", &self.message_id)
            .field("client", &self.client.as_ref().map(|_| "ChatClient"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reaction_parse() {
        assert_eq!(Reaction::parse("👀"), Reaction::Emoji("👀".to_string()));
        assert_eq!(
            Reaction::parse("custom:5406745015365943482"),
            Reaction::CustomEmoji("5406745015365943482".to_string())
        );
    }
}
