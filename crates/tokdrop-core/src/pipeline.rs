//! Per-link delivery: resolve, fetch, download, send, clean up.
//!
//! Two retry layers are involved. The download layer retries resolve, fetch
//! and download together, bypassing the metadata cache after the first
//! attempt since an expired signed URL is the usual cause of a failed
//! transfer. The delivery layer wraps that plus the upload to the chat, and
//! releases the scratch file before every retry so a failed send is never
//! followed by resending a suspect file.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::cache::Cache;
use crate::chat::{ChatClient, MessageRef};
use crate::config::Config;
use crate::download::{MediaDownloader, ScratchFile};
use crate::error::PipelineError;
use crate::metadata::{MetadataFetcher, MetadataOutcome, TikwmSource};
use crate::resolve::RedirectResolver;
use crate::retry::RetryPolicy;
use crate::status::{StatusMarker, StatusSignal};

/// How a single link delivery ended. Failures are reported, never raised.
#[derive(Debug)]
pub enum DeliveryOutcome {
    Delivered,
    /// The link points at a slideshow; nothing was sent.
    NoVideo,
    Failed {
        attempts: u32,
        error: PipelineError,
    },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }
}

enum Prepared {
    Ready(ScratchFile),
    NoVideo,
}

enum Sent {
    Delivered(ScratchFile),
    NoVideo,
}

pub struct DeliveryOrchestrator {
    resolver: RedirectResolver,
    fetcher: MetadataFetcher,
    downloader: MediaDownloader,
    signal: StatusSignal,
    delivery_policy: RetryPolicy,
    download_policy: RetryPolicy,
}

impl DeliveryOrchestrator {
    pub fn new(
        resolver: RedirectResolver,
        fetcher: MetadataFetcher,
        downloader: MediaDownloader,
        signal: StatusSignal,
    ) -> Self {
        Self {
            resolver,
            fetcher,
            downloader,
            signal,
            delivery_policy: RetryPolicy::default(),
            download_policy: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, delivery: RetryPolicy, download: RetryPolicy) -> Self {
        self.delivery_policy = delivery;
        self.download_policy = download;
        self
    }

    /// Wires the full pipeline from config: one cache shared by resolver
    /// and fetcher, tikwm as the media-info source.
    pub fn from_config(config: &Config) -> Result<Self> {
        let cache = Cache::from_config(&config.cache);

        let resolver = RedirectResolver::new(config.http.client_builder()?, cache.clone())
            .context("Failed to build redirect client")?
            .with_short_hosts(config.links.short_hosts.clone());

        let http = config
            .http
            .client_builder()?
            .build()
            .context("Failed to build HTTP client")?;
        let source = TikwmSource::new(
            http.clone(),
            &config.metadata.api_base_url,
            config.metadata.prefer_hd,
        );
        let fetcher = MetadataFetcher::new(Arc::new(source), cache);
        let downloader = MediaDownloader::new(
            http,
            config.download.scratch_dir.clone(),
            &config.download.extension,
        );

        let policy = config.retry.policy();
        Ok(Self::new(
            resolver,
            fetcher,
            downloader,
            StatusSignal::from_config(&config.status),
        )
        .with_retry(policy, policy))
    }

    /// Delivers the video behind `url` as a reply to `target`.
    ///
    /// The target is marked pending up front, then done or failed. A
    /// slideshow clears the marker. The scratch file is gone on return.
    pub async fn run(
        &self,
        url: &str,
        target: MessageRef,
        client: Arc<dyn ChatClient>,
    ) -> DeliveryOutcome {
        let mut status = self.signal.tracker(Arc::clone(&client), target);
        status.mark(StatusMarker::Pending).await;

        let client = client.as_ref();
        let what = format!("delivery of {url}");
        let result = self
            .delivery_policy
            .run(&what, move |_| self.attempt(url, target, client))
            .await;

        match result {
            Ok(Sent::Delivered(file)) => {
                status.mark(StatusMarker::Done).await;
                file.release().await;
                info!("delivered {url} to {target}");
                DeliveryOutcome::Delivered
            }
            Ok(Sent::NoVideo) => {
                status.clear().await;
                info!("{url} is a slideshow, nothing to deliver");
                DeliveryOutcome::NoVideo
            }
            Err(exhausted) => {
                status.mark(StatusMarker::Failed).await;
                error!(
                    "giving up on {url} after {} attempts: {}",
                    exhausted.attempts, exhausted.last_error
                );
                DeliveryOutcome::Failed {
                    attempts: exhausted.attempts,
                    error: exhausted.last_error,
                }
            }
        }
    }

    /// Resolves, fetches and downloads `url` without touching any chat.
    /// Returns `None` for a slideshow.
    pub async fn retrieve(&self, url: &str) -> Result<Option<ScratchFile>, PipelineError> {
        match self.prepare(url).await? {
            Prepared::Ready(file) => Ok(Some(file)),
            Prepared::NoVideo => Ok(None),
        }
    }

    async fn attempt(
        &self,
        url: &str,
        target: MessageRef,
        client: &dyn ChatClient,
    ) -> Result<Sent, PipelineError> {
        let file = match self.prepare(url).await? {
            Prepared::Ready(file) => file,
            Prepared::NoVideo => return Ok(Sent::NoVideo),
        };

        match client
            .send_video(target.chat_id, file.path(), Some(target.message_id))
            .await
        {
            Ok(_) => Ok(Sent::Delivered(file)),
            Err(err) => {
                file.release().await;
                Err(err.into())
            }
        }
    }

    async fn prepare(&self, url: &str) -> Result<Prepared, PipelineError> {
        let what = format!("download of {url}");
        self.download_policy
            .run(&what, move |attempt| self.prepare_once(url, attempt == 1))
            .await
            .map_err(|exhausted| exhausted.last_error)
    }

    async fn prepare_once(&self, url: &str, use_cache: bool) -> Result<Prepared, PipelineError> {
        let canonical = self.resolver.resolve(url).await?;
        match self.fetcher.fetch(&canonical, use_cache).await? {
            MetadataOutcome::NoVideo => Ok(Prepared::NoVideo),
            MetadataOutcome::Video(media) => {
                let file = self.downloader.download(&media).await?;
                Ok(Prepared::Ready(file))
            }
        }
    }
}
