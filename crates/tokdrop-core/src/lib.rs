//! Core pipeline for tokdrop: finds TikTok links in chat messages and
//! delivers the videos behind them back into the chat.

pub mod cache;
pub mod chat;
pub mod config;
pub mod download;
pub mod error;
pub mod handler;
pub mod links;
pub mod logging;
pub mod metadata;
pub mod pipeline;
pub mod resolve;
pub mod retry;
pub mod status;

pub use chat::{ChatClient, MessageEvent, MessageRef, Reaction};
pub use config::Config;
pub use handler::handle_message_event;
pub use pipeline::{DeliveryOrchestrator, DeliveryOutcome};
