//! Short-link expansion to canonical video page URLs.

use std::time::Duration;

use reqwest::redirect::Policy;
use tracing::debug;

use crate::cache::Cache;
use crate::error::ResolutionError;
use crate::links::{default_short_hosts, is_short_link};

/// Short-link targets do not change, so resolutions are kept for a day.
pub const REDIRECT_TTL: Duration = Duration::from_secs(60 * 60 * 24);
pub const MAX_REDIRECT_HOPS: usize = 10;

pub fn redirect_key(url: &str) -> String {
    format!("redirect:{url}")
}

pub struct RedirectResolver {
    http: reqwest::Client,
    cache: Cache,
    short_hosts: Vec<String>,
}

impl RedirectResolver {
    /// Builds a resolver with its own client limited to [`MAX_REDIRECT_HOPS`].
    pub fn new(builder: reqwest::ClientBuilder, cache: Cache) -> reqwest::Result<Self> {
        let http = builder
            .redirect(Policy::limited(MAX_REDIRECT_HOPS))
            .build()?;
        Ok(Self {
            http,
            cache,
            short_hosts: default_short_hosts(),
        })
    }

    #[must_use]
    pub fn with_short_hosts(mut self, short_hosts: Vec<String>) -> Self {
        self.short_hosts = short_hosts;
        self
    }

    /// Returns the canonical URL for `url`.
    ///
    /// Cache hits skip the network. Fresh results, including URLs that are
    /// already canonical, are written back for [`REDIRECT_TTL`].
    pub async fn resolve(&self, url: &str) -> Result<String, ResolutionError> {
        let key = redirect_key(url);
        if let Some(cached) = self.cache.get(&key).await {
            debug!("redirect cache hit: {url} -> {cached}");
            return Ok(cached);
        }

        let canonical = if is_short_link(url, &self.short_hosts) {
            self.follow(url).await?
        } else {
            url.to_string()
        };

        self.cache.set(&key, &canonical, REDIRECT_TTL).await;
        Ok(canonical)
    }

    async fn follow(&self, url: &str) -> Result<String, ResolutionError> {
        let response = self.http.get(url).send().await.map_err(|source| {
            if source.is_redirect() {
                ResolutionError::TooManyRedirects {
                    url: url.to_string(),
                    max_hops: MAX_REDIRECT_HOPS,
                }
            } else {
                ResolutionError::Request {
                    url: url.to_string(),
                    source,
                }
            }
        })?;
        let canonical = response.url().to_string();
        debug!("resolved {url} -> {canonical}");
        Ok(canonical)
    }
}
