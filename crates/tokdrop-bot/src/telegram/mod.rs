use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use reqwest::Body;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokdrop_core::chat::{ChatClient, MessageRef, Reaction};
use tokdrop_core::config::Config;
use tokdrop_core::error::DeliveryError;
use tokio_util::io::ReaderStream;
use tracing::debug;

mod types;

/// Slack on top of the long-poll timeout before a getUpdates request is
/// abandoned.
const POLL_MARGIN: Duration = Duration::from_secs(10);

pub use types::{Chat, Message, Update, User};

pub struct TelegramSettings {
    pub bot_token: String,
    pub api_base_url: String,
    pub allowlist_chat_ids: HashSet<i64>,
    pub poll_timeout: Duration,
}

impl TelegramSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        let Some(bot_token) = config.telegram.effective_bot_token() else {
            bail!("telegram.bot_token, TOKDROP_TELEGRAM_BOT_TOKEN or TELEGRAM_BOT_TOKEN is required");
        };

        Ok(Self {
            bot_token,
            api_base_url: config.telegram.api_base_url.trim_end_matches('/').to_string(),
            allowlist_chat_ids: config.telegram.allowlist_chat_ids.iter().copied().collect(),
            poll_timeout: config.telegram.poll_timeout(),
        })
    }
}

#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl TelegramClient {
    pub fn new(http: reqwest::Client, base_url: &str, token: String) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout: Duration,
    ) -> Result<Vec<Update>, DeliveryError> {
        let request = GetUpdatesRequest {
            offset,
            timeout: timeout.as_secs(),
            allowed_updates: Some(vec!["message"]),
        };
        self.post_with_timeout("getUpdates", &request, Some(timeout + POLL_MARGIN))
            .await
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to_message_id: Option<i64>,
    ) -> Result<Message, DeliveryError> {
        let request = SendMessageRequest {
            chat_id,
            text,
            reply_to_message_id,
            allow_sending_without_reply: Some(true),
        };
        self.post("sendMessage", &request).await
    }

    /// Uploads `path` as a streamable video, streaming the file from disk.
    pub async fn send_video(
        &self,
        chat_id: i64,
        path: &Path,
        reply_to_message_id: Option<i64>,
    ) -> Result<Message, DeliveryError> {
        const METHOD: &str = "sendVideo";

        let io_error = |source| DeliveryError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = tokio::fs::File::open(path).await.map_err(io_error)?;
        let length = file.metadata().await.map_err(io_error)?.len();
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("video.mp4")
            .to_string();

        let video = Part::stream_with_length(Body::wrap_stream(ReaderStream::new(file)), length)
            .file_name(file_name)
            .mime_str(video_mime(path))
            .map_err(|source| DeliveryError::Request {
                method: METHOD,
                source,
            })?;
        let mut form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("supports_streaming", "true")
            .part("video", video);
        if let Some(reply_to) = reply_to_message_id {
            form = form
                .text("reply_to_message_id", reply_to.to_string())
                .text("allow_sending_without_reply", "true");
        }

        let response = self
            .http
            .post(self.method_url(METHOD))
            .multipart(form)
            .send()
            .await
            .map_err(|source| DeliveryError::Request {
                method: METHOD,
                source,
            })?;
        Self::decode(METHOD, response).await
    }

    /// Sets the bot's reaction on a message; `None` removes it.
    pub async fn set_message_reaction(
        &self,
        chat_id: i64,
        message_id: i64,
        reaction: Option<&Reaction>,
    ) -> Result<(), DeliveryError> {
        let reaction = reaction
            .map(|reaction| match reaction {
                Reaction::Emoji(emoji) => ReactionType::Emoji { emoji },
                Reaction::CustomEmoji(id) => ReactionType::CustomEmoji {
                    custom_emoji_id: id,
                },
            })
            .into_iter()
            .collect();
        let request = SetMessageReactionRequest {
            chat_id,
            message_id,
            reaction,
        };
        let _: bool = self.post("setMessageReaction", &request).await?;
        Ok(())
    }

    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<(), DeliveryError> {
        let request = EditMessageTextRequest {
            chat_id,
            message_id,
            text,
        };
        // Either the edited message or `true`.
        let _: Value = self.post("editMessageText", &request).await?;
        Ok(())
    }

    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), DeliveryError> {
        let request = MessageTarget {
            chat_id,
            message_id,
        };
        let _: bool = self.post("deleteMessage", &request).await?;
        Ok(())
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        method: &'static str,
        body: &B,
    ) -> Result<T, DeliveryError> {
        self.post_with_timeout(method, body, None).await
    }

    /// Like `post`, with a per-request timeout that overrides the client's.
    async fn post_with_timeout<T: DeserializeOwned, B: Serialize>(
        &self,
        method: &'static str,
        body: &B,
        timeout: Option<Duration>,
    ) -> Result<T, DeliveryError> {
        let mut request = self.http.post(self.method_url(method)).json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .await
            .map_err(|source| DeliveryError::Request { method, source })?;
        Self::decode(method, response).await
    }

    async fn decode<T: DeserializeOwned>(
        method: &'static str,
        response: reqwest::Response,
    ) -> Result<T, DeliveryError> {
        let status = response.status();
        let payload: TelegramResponse<T> = response
            .json()
            .await
            .map_err(|source| DeliveryError::Request { method, source })?;

        match payload {
            TelegramResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            TelegramResponse { description, .. } => {
                let description =
                    description.unwrap_or_else(|| format!("Telegram API error ({status})"));
                debug!("{method} failed: {description}");
                Err(DeliveryError::Api {
                    method,
                    description,
                })
            }
        }
    }
}

/// Content type for an uploaded video, from its file extension.
fn video_mime(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("mp4" | "m4v") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl ChatClient for TelegramClient {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<MessageRef, DeliveryError> {
        let sent = self.send_message(chat_id, text, reply_to).await?;
        Ok(MessageRef::new(sent.chat.id, sent.message_id))
    }

    async fn send_video(
        &self,
        chat_id: i64,
        path: &Path,
        reply_to: Option<i64>,
    ) -> Result<MessageRef, DeliveryError> {
        let sent = TelegramClient::send_video(self, chat_id, path, reply_to).await?;
        Ok(MessageRef::new(sent.chat.id, sent.message_id))
    }

    async fn set_reaction(
        &self,
        target: MessageRef,
        reaction: Option<&Reaction>,
    ) -> Result<(), DeliveryError> {
        self.set_message_reaction(target.chat_id, target.message_id, reaction)
            .await
    }

    async fn edit_text(&self, target: MessageRef, text: &str) -> Result<(), DeliveryError> {
        self.edit_message_text(target.chat_id, target.message_id, text)
            .await
    }

    async fn delete_message(&self, target: MessageRef) -> Result<(), DeliveryError> {
        TelegramClient::delete_message(self, target.chat_id, target.message_id).await
    }
}

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Serialize)]
struct GetUpdatesRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<i64>,
    timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    allowed_updates: Option<Vec<&'static str>>,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to_message_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    allow_sending_without_reply: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ReactionType<'a> {
    Emoji { emoji: &'a str },
    CustomEmoji { custom_emoji_id: &'a str },
}

#[derive(Debug, Serialize)]
struct SetMessageReactionRequest<'a> {
    chat_id: i64,
    message_id: i64,
    reaction: Vec<ReactionType<'a>>,
}

#[derive(Debug, Serialize)]
struct EditMessageTextRequest<'a> {
    chat_id: i64,
    message_id: i64,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct MessageTarget {
    chat_id: i64,
    message_id: i64,
}
