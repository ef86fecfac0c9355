//! Media metadata lookup.
//!
//! The upstream source is behind [`MediaInfoSource`]; [`TikwmSource`] is the
//! bundled implementation. Raw [`MediaInfo`] is what gets cached, and it is
//! validated into a [`MetadataOutcome`] on every read so cached and fresh
//! values go through the same checks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::cache::Cache;
use crate::error::MetadataError;

/// Signed media URLs expire quickly, so metadata is only kept briefly.
pub const METADATA_TTL: Duration = Duration::from_secs(60 * 10);

pub fn metadata_key(canonical_url: &str) -> String {
    format!("metadata:{canonical_url}")
}

/// Media info as reported upstream, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub play_url: Option<String>,
    /// Slideshow image URLs; non-empty means there is no video.
    #[serde(default)]
    pub images: Vec<String>,
}

/// A validated, downloadable asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescriptor {
    pub id: String,
    pub playable_url: String,
    pub is_slideshow: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataOutcome {
    Video(MediaDescriptor),
    /// Slideshow content: nothing to download, and not a failure.
    NoVideo,
}

impl MediaInfo {
    pub fn is_slideshow(&self) -> bool {
        !self.images.is_empty()
    }

    pub fn into_outcome(self, url: &str) -> Result<MetadataOutcome, MetadataError> {
        let Some(playable_url) = self.play_url.filter(|u| !u.trim().is_empty()) else {
            return Err(MetadataError::MissingPlayableUrl {
                url: url.to_string(),
            });
        };
        if !self.images.is_empty() {
            return Ok(MetadataOutcome::NoVideo);
        }
        let Some(id) = self.id.filter(|id| !id.trim().is_empty()) else {
            return Err(MetadataError::Unparseable {
                url: url.to_string(),
                reason: "missing media id".to_string(),
            });
        };
        Ok(MetadataOutcome::Video(MediaDescriptor {
            id,
            playable_url,
            is_slideshow: false,
        }))
    }
}

#[async_trait]
pub trait MediaInfoSource: Send + Sync {
    async fn fetch_media_info(&self, canonical_url: &str) -> Result<MediaInfo, MetadataError>;
}

pub struct MetadataFetcher {
    source: Arc<dyn MediaInfoSource>,
    cache: Cache,
}

impl MetadataFetcher {
    pub fn new(source: Arc<dyn MediaInfoSource>, cache: Cache) -> Self {
        Self { source, cache }
    }

    /// Looks up media for `canonical_url`.
    ///
    /// With `use_cache` a cached entry is returned without an upstream call;
    /// an entry that fails to parse counts as a miss. Upstream results are
    /// always written back, whatever `use_cache` says.
    pub async fn fetch(
        &self,
        canonical_url: &str,
        use_cache: bool,
    ) -> Result<MetadataOutcome, MetadataError> {
        let key = metadata_key(canonical_url);
        if use_cache && let Some(cached) = self.cache.get(&key).await {
            match serde_json::from_str::<MediaInfo>(&cached) {
                Ok(info) => {
                    debug!("metadata cache hit: {canonical_url}");
                    return info.into_outcome(canonical_url);
                }
                Err(err) => warn!("ignoring unparseable cached metadata for {canonical_url}: {err}"),
            }
        }

        let info = self.source.fetch_media_info(canonical_url).await?;
        match serde_json::to_string(&info) {
            Ok(json) => self.cache.set(&key, &json, METADATA_TTL).await,
            Err(err) => warn!("failed to serialize metadata for {canonical_url}: {err}"),
        }

        if info.is_slideshow() {
            debug!("{canonical_url} is a slideshow");
        }
        info.into_outcome(canonical_url)
    }
}

/// Media info from the tikwm.com JSON API.
pub struct TikwmSource {
    http: reqwest::Client,
    base_url: String,
    prefer_hd: bool,
}

#[derive(Debug, Deserialize)]
struct TikwmResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<TikwmVideo>,
}

#[derive(Debug, Deserialize)]
struct TikwmVideo {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    play: Option<String>,
    #[serde(default)]
    hdplay: Option<String>,
    #[serde(default)]
    images: Option<Vec<String>>,
}

impl TikwmSource {
    pub fn new(http: reqwest::Client, base_url: &str, prefer_hd: bool) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            prefer_hd,
        }
    }

    /// Some responses carry paths relative to the API host.
    fn absolutize(&self, play_url: String) -> String {
        if !play_url.starts_with('/') {
            return play_url;
        }
        Url::parse(&self.base_url)
            .and_then(|base| base.join(&play_url))
            .map_or(play_url, |joined| joined.to_string())
    }

    fn into_media_info(&self, video: TikwmVideo) -> MediaInfo {
        let id = match video.id {
            Some(Value::String(id)) => Some(id),
            Some(Value::Number(id)) => Some(id.to_string()),
            _ => None,
        };
        let hd = video
            .hdplay
            .filter(|u| self.prefer_hd && !u.trim().is_empty());
        let play_url = hd.or(video.play).map(|u| self.absolutize(u));
        MediaInfo {
            id,
            play_url,
            images: video.images.unwrap_or_default(),
        }
    }
}

#[async_trait]
impl MediaInfoSource for TikwmSource {
    async fn fetch_media_info(&self, canonical_url: &str) -> Result<MediaInfo, MetadataError> {
        let endpoint = format!("{}/api/", self.base_url);
        let mut query = vec![("url", canonical_url)];
        if self.prefer_hd {
            query.push(("hd", "1"));
        }

        let response = self
            .http
            .get(&endpoint)
            .query(&query)
            .send()
            .await
            .map_err(|source| MetadataError::Request {
                url: canonical_url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(MetadataError::Status {
                url: canonical_url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|source| MetadataError::Request {
                url: canonical_url.to_string(),
                source,
            })?;
        let payload: TikwmResponse =
            serde_json::from_str(&body).map_err(|err| MetadataError::Unparseable {
                url: canonical_url.to_string(),
                reason: err.to_string(),
            })?;

        if payload.code != 0 {
            return Err(MetadataError::Rejected {
                url: canonical_url.to_string(),
                message: payload
                    .msg
                    .unwrap_or_else(|| format!("error code {}", payload.code)),
            });
        }

        let Some(video) = payload.data else {
            return Err(MetadataError::Unparseable {
                url: canonical_url.to_string(),
                reason: "response has no data".to_string(),
            });
        };
        Ok(self.into_media_info(video))
    }
}
