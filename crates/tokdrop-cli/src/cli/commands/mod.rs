//! CLI command handlers.

pub mod config;
pub mod fetch;
pub mod links;
