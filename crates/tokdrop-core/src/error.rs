//! Error types for each pipeline stage.
//!
//! Lower components surface these to the orchestrator, which is the only
//! place that retries. `CacheError` never leaves the `cache` module as a
//! failure: `Cache` downgrades it to a miss or a skipped write.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("redirect request for {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("redirect chain for {url} exceeded {max_hops} hops")]
    TooManyRedirects { url: String, max_hops: usize },
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("media info request for {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("media info request for {url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("media info source rejected {url}: {message}")]
    Rejected { url: String, message: String },
    #[error("media info for {url} is unparseable: {reason}")]
    Unparseable { url: String, reason: String },
    #[error("media info for {url} has no playable URL")]
    MissingPlayableUrl { url: String },
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("media {id} is a slideshow and has no video to download")]
    NotAVideo { id: String },
    #[error("download of {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("download of {url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("failed writing {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("{method} request failed: {source}")]
    Request {
        method: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{method} rejected: {description}")]
    Api {
        method: &'static str,
        description: String,
    },
    #[error("failed reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache connection failed: {0}")]
    Connect(#[source] redis::RedisError),
    #[error("cache {op} for {key} failed: {source}")]
    Command {
        op: &'static str,
        key: String,
        #[source]
        source: redis::RedisError,
    },
    #[error("cache unavailable, last connect failed {0:?} ago")]
    Unavailable(Duration),
}

/// The last error of a delivery attempt.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

/// Precondition failures that abort handling of a whole message.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("message event carries no chat client")]
    MissingClient,
}
