//! Configuration management for tokdrop.
//!
//! Loads configuration from ${TOKDROP_HOME}/config.toml with sensible defaults.
//! A handful of environment variables override file values so the bot can run
//! from a plain `.env`-style deployment.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::links::default_short_hosts;
use crate::retry::RetryPolicy;

/// Returns the default config template with comments.
///
/// This is embedded from default_config.toml at compile time.
fn default_config_template() -> &'static str {
    include_str!("../default_config.toml")
}

pub mod paths {
    //! Path resolution for tokdrop configuration.
    //!
    //! TOKDROP_HOME resolution order:
    //! 1. TOKDROP_HOME environment variable (if set)
    //! 2. ~/.config/tokdrop (default)
    //! 3. ./.tokdrop when no home directory can be determined

    use std::path::PathBuf;

    pub fn tokdrop_home() -> PathBuf {
        if let Ok(home) = std::env::var("TOKDROP_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir().map_or_else(
            || PathBuf::from(".tokdrop"),
            |h| h.join(".config").join("tokdrop"),
        )
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        tokdrop_home().join("config.toml")
    }
}

/// Telegram bot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot token for Telegram API.
    pub bot_token: Option<String>,
    /// Chats the bot answers in. Empty means every chat.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowlist_chat_ids: Vec<i64>,
    /// Long-poll timeout for getUpdates.
    pub poll_timeout_secs: u64,
    pub api_base_url: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            allowlist_chat_ids: Vec::new(),
            poll_timeout_secs: 30,
            api_base_url: "https://api.telegram.org".to_string(),
        }
    }
}

impl TelegramConfig {
    /// Config value first, then TOKDROP_TELEGRAM_BOT_TOKEN, then TELEGRAM_BOT_TOKEN.
    pub fn effective_bot_token(&self) -> Option<String> {
        normalize_optional(self.bot_token.as_deref())
            .or_else(|| env_non_empty("TOKDROP_TELEGRAM_BOT_TOKEN"))
            .or_else(|| env_non_empty("TELEGRAM_BOT_TOKEN"))
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }
}

/// Outbound HTTP settings shared by every client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Proxy URL, e.g. `socks5://127.0.0.1:1080`.
    pub proxy: Option<String>,
    /// Whole-request timeout in seconds (0 disables).
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            timeout_secs: 0,
            connect_timeout_secs: 10,
        }
    }
}

impl HttpConfig {
    /// Config value first, then `PROXY` (`host:port` means SOCKS5).
    pub fn effective_proxy(&self) -> Option<String> {
        normalize_optional(self.proxy.as_deref())
            .or_else(|| env_non_empty("PROXY"))
            .map(|proxy| {
                if proxy.contains("://") {
                    proxy
                } else {
                    format!("socks5://{proxy}")
                }
            })
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    /// Builds a reqwest client with proxy and timeouts applied.
    pub fn client_builder(&self) -> Result<reqwest::ClientBuilder> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs.max(1)));
        if let Some(timeout) = self.timeout() {
            builder = builder.timeout(timeout);
        }
        if let Some(proxy) = self.effective_proxy() {
            let proxy = reqwest::Proxy::all(&proxy)
                .with_context(|| format!("Invalid proxy URL: {proxy}"))?;
            builder = builder.proxy(proxy);
        }
        Ok(builder)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    None,
    Memory,
    Redis,
}

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Defaults to redis when a URL is available, otherwise none.
    pub backend: Option<CacheBackend>,
    pub redis_url: Option<String>,
    pub key_prefix: String,
    pub timeout_ms: u64,
    pub retry_after_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: None,
            redis_url: None,
            key_prefix: "tokdrop:".to_string(),
            timeout_ms: 500,
            retry_after_secs: 30,
        }
    }
}

impl CacheConfig {
    pub fn effective_redis_url(&self) -> Option<String> {
        normalize_optional(self.redis_url.as_deref()).or_else(|| env_non_empty("REDIS_URL"))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }

    pub fn retry_after(&self) -> Duration {
        Duration::from_secs(self.retry_after_secs)
    }

    pub fn effective_backend(&self) -> CacheBackend {
        match self.backend {
            Some(backend) => backend,
            None if self.effective_redis_url().is_some() => CacheBackend::Redis,
            None => CacheBackend::None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinksConfig {
    /// Hosts whose links must be redirect-resolved.
    pub short_hosts: Vec<String>,
}

impl Default for LinksConfig {
    fn default() -> Self {
        Self {
            short_hosts: default_short_hosts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub api_base_url: String,
    pub prefer_hd: bool,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://www.tikwm.com".to_string(),
            prefer_hd: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub scratch_dir: PathBuf,
    pub extension: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            scratch_dir: PathBuf::from("downloads"),
            extension: "mp4".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            delay_ms: policy.delay.as_millis() as u64,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.delay_ms))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StatusStyle {
    /// React on the originating message.
    #[default]
    Reaction,
    /// Reply with a progress message, removed or edited at the end.
    Message,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub style: StatusStyle,
    /// Reaction emoji, or `custom:<id>` for a custom emoji.
    pub pending: String,
    pub done: String,
    pub failed: String,
    pub pending_text: String,
    pub failed_text: String,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            style: StatusStyle::Reaction,
            pending: "👀".to_string(),
            done: "👌".to_string(),
            failed: "😢".to_string(),
            pending_text: "Downloading video…".to_string(),
            failed_text: "Could not download this video.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive used when RUST_LOG is unset.
    pub level: String,
    /// Optional log file, rolled daily.
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub http: HttpConfig,
    pub cache: CacheConfig,
    pub links: LinksConfig,
    pub metadata: MetadataConfig,
    pub download: DownloadConfig,
    pub retry: RetryConfig,
    pub status: StatusConfig,
    pub log: LogConfig,
}

impl Config {
    /// Loads configuration from the default config path.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Creates a default config file at the given path.
    /// Returns an error if the file already exists.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }
        Self::write_config(path, default_config_template())
    }

    /// Writes config content to a file, creating parent directories as needed.
    /// Uses atomic write (temp file + rename) to prevent corruption.
    fn write_config(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let tmp_path = path.with_extension("toml.tmp");
        fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write config to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }
}

fn normalize_optional(input: Option<&str>) -> Option<String> {
    input.and_then(normalize_string)
}

fn normalize_string(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().as_deref().and_then(normalize_string)
}
