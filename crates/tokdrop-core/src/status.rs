//! User-visible progress markers on the triggering message.
//!
//! Signaling is best effort: a platform error is logged and never changes
//! the outcome of a delivery.
//!
//! A message carries a single bot reaction, so links sharing a message share
//! it. While any of them is in flight the reaction is pending; once all have
//! settled it shows the worst outcome, failed over done, and is removed only
//! when every link ended without one.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

use crate::chat::{ChatClient, MessageRef, Reaction};
use crate::config::{StatusConfig, StatusStyle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusMarker {
    Pending,
    Done,
    Failed,
}

/// Reaction state of one message across its links.
#[derive(Debug, Default)]
struct SharedReaction {
    in_flight: usize,
    settled: Option<StatusMarker>,
    shown: Option<StatusMarker>,
}

impl SharedReaction {
    fn settle(&mut self, marker: Option<StatusMarker>) {
        self.settled = match (self.settled, marker) {
            (Some(StatusMarker::Failed), _) | (_, Some(StatusMarker::Failed)) => {
                Some(StatusMarker::Failed)
            }
            (Some(StatusMarker::Done), _) | (_, Some(StatusMarker::Done)) => {
                Some(StatusMarker::Done)
            }
            _ => None,
        };
    }

    fn wanted(&self) -> Option<StatusMarker> {
        if self.in_flight > 0 {
            Some(StatusMarker::Pending)
        } else {
            self.settled
        }
    }
}

type ReactionBoard = Arc<Mutex<HashMap<MessageRef, SharedReaction>>>;

/// How markers are rendered, built once from config.
#[derive(Debug, Clone)]
pub struct StatusSignal {
    style: StatusStyle,
    pending: Reaction,
    done: Reaction,
    failed: Reaction,
    pending_text: String,
    failed_text: String,
    board: ReactionBoard,
}

impl Default for StatusSignal {
    fn default() -> Self {
        Self::from_config(&StatusConfig::default())
    }
}

impl StatusSignal {
    pub fn from_config(config: &StatusConfig) -> Self {
        Self {
            style: config.style,
            pending: Reaction::parse(&config.pending),
            done: Reaction::parse(&config.done),
            failed: Reaction::parse(&config.failed),
            pending_text: config.pending_text.clone(),
            failed_text: config.failed_text.clone(),
            board: ReactionBoard::default(),
        }
    }

    pub fn tracker(&self, client: Arc<dyn ChatClient>, target: MessageRef) -> StatusTracker {
        StatusTracker {
            signal: self.clone(),
            client,
            target,
            progress: None,
            joined: false,
        }
    }

    fn reaction(&self, marker: StatusMarker) -> &Reaction {
        match marker {
            StatusMarker::Pending => &self.pending,
            StatusMarker::Done => &self.done,
            StatusMarker::Failed => &self.failed,
        }
    }
}

/// Status of one link delivery.
///
/// In reaction style the marker feeds the reaction shared by every link on
/// the target. In message style a progress reply is posted on pending,
/// removed on done, and rewritten with the failure text on failure.
pub struct StatusTracker {
    signal: StatusSignal,
    client: Arc<dyn ChatClient>,
    target: MessageRef,
    progress: Option<MessageRef>,
    joined: bool,
}

impl StatusTracker {
    pub async fn mark(&mut self, marker: StatusMarker) {
        match self.signal.style {
            StatusStyle::Reaction => self.react(Some(marker)).await,
            StatusStyle::Message => self.mark_with_message(marker).await,
        }
    }

    /// Ends this link without an outcome. Its own marker goes away; markers
    /// left by other links on the same message stay.
    pub async fn clear(&mut self) {
        match self.signal.style {
            StatusStyle::Reaction => self.react(None).await,
            StatusStyle::Message => self.delete_progress().await,
        }
    }

    async fn react(&mut self, marker: Option<StatusMarker>) {
        let mut board = self.signal.board.lock().await;
        let shared = board.entry(self.target).or_default();
        if marker == Some(StatusMarker::Pending) {
            if !self.joined {
                self.joined = true;
                shared.in_flight += 1;
            }
        } else {
            if self.joined {
                self.joined = false;
                shared.in_flight = shared.in_flight.saturating_sub(1);
            }
            shared.settle(marker);
        }

        let wanted = shared.wanted();
        if wanted != shared.shown {
            let reaction = wanted.map(|marker| self.signal.reaction(marker));
            match self.client.set_reaction(self.target, reaction).await {
                Ok(()) => shared.shown = wanted,
                Err(err) => warn!("failed to mark {} as {wanted:?}: {err}", self.target),
            }
        }
        if shared.in_flight == 0 {
            board.remove(&self.target);
        }
    }

    async fn mark_with_message(&mut self, marker: StatusMarker) {
        match marker {
            StatusMarker::Pending => {
                if self.progress.is_some() {
                    return;
                }
                match self
                    .client
                    .send_text(
                        self.target.chat_id,
                        &self.signal.pending_text,
                        Some(self.target.message_id),
                    )
                    .await
                {
                    Ok(sent) => self.progress = Some(sent),
                    Err(err) => warn!("failed to post progress for {}: {err}", self.target),
                }
            }
            StatusMarker::Done => self.delete_progress().await,
            StatusMarker::Failed => {
                let result = match self.progress {
                    Some(progress) => {
                        self.client
                            .edit_text(progress, &self.signal.failed_text)
                            .await
                    }
                    None => self
                        .client
                        .send_text(
                            self.target.chat_id,
                            &self.signal.failed_text,
                            Some(self.target.message_id),
                        )
                        .await
                        .map(|_| ()),
                };
                if let Err(err) = result {
                    warn!("failed to report failure for {}: {err}", self.target);
                }
            }
        }
    }

    async fn delete_progress(&mut self) {
        if let Some(progress) = self.progress.take()
            && let Err(err) = self.client.delete_message(progress).await
        {
            warn!("failed to delete progress message {progress}: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::error::DeliveryError;

    #[derive(Default)]
    struct Log {
        calls: Mutex<Vec<String>>,
        reject: bool,
    }

    impl Log {
        fn push(&self, call: String) -> Result<(), DeliveryError> {
            self.calls.lock().unwrap().push(call);
            if self.reject {
                return Err(DeliveryError::Api {
                    method: "test",
                    description: "Bad Request: rejected".to_string(),
                });
            }
            Ok(())
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatClient for Log {
        async fn send_text(
            &self,
            chat_id: i64,
            text: &str,
            reply_to: Option<i64>,
        ) -> Result<MessageRef, DeliveryError> {
            self.push(format!("text {chat_id} {text} {reply_to:?}"))?;
            Ok(MessageRef::new(chat_id, 99))
        }

        async fn send_video(
            &self,
            _chat_id: i64,
            _path: &Path,
            _reply_to: Option<i64>,
        ) -> Result<MessageRef, DeliveryError> {
            unreachable!("status never sends video")
        }

        async fn set_reaction(
            &self,
            target: MessageRef,
            reaction: Option<&Reaction>,
        ) -> Result<(), DeliveryError> {
            self.push(format!("react {target} {reaction:?}"))
        }

        async fn edit_text(&self, target: MessageRef, text: &str) -> Result<(), DeliveryError> {
            self.push(format!("edit {target} {text}"))
        }

        async fn delete_message(&self, target: MessageRef) -> Result<(), DeliveryError> {
            self.push(format!("delete {target}"))
        }
    }

    fn message_style() -> StatusSignal {
        StatusSignal::from_config(&StatusConfig {
            style: StatusStyle::Message,
            ..StatusConfig::default()
        })
    }

    #[tokio::test]
    async fn test_reaction_style_replaces_marker() {
        let log = Arc::new(Log::default());
        let chat: Arc<dyn ChatClient> = Arc::<Log>::clone(&log);
        let mut tracker = StatusSignal::default().tracker(chat, MessageRef::new(1, 2));

        tracker.mark(StatusMarker::Pending).await;
        tracker.mark(StatusMarker::Done).await;

        assert_eq!(
            log.calls(),
            vec![
                "react 1/2 Some(Emoji(\"👀\"))",
                "react 1/2 Some(Emoji(\"👌\"))",
            ]
        );
    }

    #[tokio::test]
    async fn test_reaction_style_clear_removes_own_marker() {
        let log = Arc::new(Log::default());
        let chat: Arc<dyn ChatClient> = Arc::<Log>::clone(&log);
        let mut tracker = StatusSignal::default().tracker(chat, MessageRef::new(1, 2));

        tracker.mark(StatusMarker::Pending).await;
        tracker.clear().await;

        assert_eq!(
            log.calls(),
            vec!["react 1/2 Some(Emoji(\"👀\"))", "react 1/2 None"]
        );
    }

    #[tokio::test]
    async fn test_neutral_link_keeps_sibling_failure() {
        let log = Arc::new(Log::default());
        let signal = StatusSignal::default();
        let target = MessageRef::new(1, 2);
        let mut failing = signal.tracker(Arc::<Log>::clone(&log), target);
        let mut slideshow = signal.tracker(Arc::<Log>::clone(&log), target);

        failing.mark(StatusMarker::Pending).await;
        slideshow.mark(StatusMarker::Pending).await;
        failing.mark(StatusMarker::Failed).await;
        slideshow.clear().await;

        assert_eq!(
            log.calls(),
            vec![
                "react 1/2 Some(Emoji(\"👀\"))",
                "react 1/2 Some(Emoji(\"😢\"))",
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_outranks_later_success() {
        let log = Arc::new(Log::default());
        let signal = StatusSignal::default();
        let target = MessageRef::new(1, 2);
        let mut failing = signal.tracker(Arc::<Log>::clone(&log), target);
        let mut delivered = signal.tracker(Arc::<Log>::clone(&log), target);

        failing.mark(StatusMarker::Pending).await;
        delivered.mark(StatusMarker::Pending).await;
        failing.mark(StatusMarker::Failed).await;
        delivered.mark(StatusMarker::Done).await;

        assert_eq!(log.calls().last().unwrap(), "react 1/2 Some(Emoji(\"😢\"))");
    }

    #[tokio::test]
    async fn test_message_style_deletes_progress_on_done() {
        let log = Arc::new(Log::default());
        let chat: Arc<dyn ChatClient> = Arc::<Log>::clone(&log);
        let mut tracker = message_style().tracker(chat, MessageRef::new(1, 2));

        tracker.mark(StatusMarker::Pending).await;
        tracker.mark(StatusMarker::Done).await;

        assert_eq!(
            log.calls(),
            vec!["text 1 Downloading video… Some(2)", "delete 1/99"]
        );
    }

    #[tokio::test]
    async fn test_message_style_edits_progress_on_failure() {
        let log = Arc::new(Log::default());
        let chat: Arc<dyn ChatClient> = Arc::<Log>::clone(&log);
        let mut tracker = message_style().tracker(chat, MessageRef::new(1, 2));

        tracker.mark(StatusMarker::Pending).await;
        tracker.mark(StatusMarker::Failed).await;

        assert_eq!(
            log.calls(),
            vec![
                "text 1 Downloading video… Some(2)",
                "edit 1/99 Could not download this video.",
            ]
        );
    }

    #[tokio::test]
    async fn test_platform_errors_are_swallowed() {
        let log = Arc::new(Log {
            reject: true,
            ..Log::default()
        });
        let chat: Arc<dyn ChatClient> = Arc::<Log>::clone(&log);
        let mut tracker = message_style().tracker(chat, MessageRef::new(1, 2));

        tracker.mark(StatusMarker::Pending).await;
        tracker.mark(StatusMarker::Failed).await;
        tracker.clear().await;

        // The progress reply never landed, so failure is posted as a new reply.
        assert_eq!(
            log.calls(),
            vec![
                "text 1 Downloading video… Some(2)",
                "text 1 Could not download this video. Some(2)",
            ]
        );
    }
}
