//! Streaming media downloads into the scratch directory.
//!
//! A video lives at `{scratch_dir}/{id}.{ext}` from download until it has
//! been delivered. Bytes are written to a `.part` sibling first and renamed
//! on completion, so an existing final path is always a complete file.
//! Concurrent deliveries of the same id are serialized by a per-path lease
//! held by the returned [`ScratchFile`].

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::error::DownloadError;
use crate::metadata::MediaDescriptor;

const PARTIAL_SUFFIX: &str = "part";

pub struct MediaDownloader {
    http: reqwest::Client,
    scratch_dir: PathBuf,
    extension: String,
    locks: ScratchLocks,
}

impl MediaDownloader {
    pub fn new(http: reqwest::Client, scratch_dir: impl Into<PathBuf>, extension: &str) -> Self {
        Self {
            http,
            scratch_dir: scratch_dir.into(),
            extension: extension.trim_start_matches('.').to_string(),
            locks: ScratchLocks::default(),
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Scratch path for a media id. Characters outside `[A-Za-z0-9_-]` are
    /// replaced so an id can never escape the scratch directory.
    pub fn path_for(&self, id: &str) -> PathBuf {
        let stem: String = id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.scratch_dir.join(format!("{stem}.{}", self.extension))
    }

    /// Downloads `media` to its scratch path and returns it under lease.
    ///
    /// If a complete file is already present no request is made.
    pub async fn download(&self, media: &MediaDescriptor) -> Result<ScratchFile, DownloadError> {
        if media.is_slideshow {
            return Err(DownloadError::NotAVideo {
                id: media.id.clone(),
            });
        }

        let path = self.path_for(&media.id);
        let lease = self.locks.acquire(&path).await;

        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|source| io_error(&path, source))?;
        if exists {
            debug!("reusing {}", path.display());
            return Ok(ScratchFile { path, _lease: lease });
        }

        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|source| io_error(&self.scratch_dir, source))?;

        let partial = partial_path(&path);
        if let Err(err) = self.fetch_to(&media.playable_url, &partial).await {
            remove_if_present(&partial).await;
            return Err(err);
        }
        tokio::fs::rename(&partial, &path)
            .await
            .map_err(|source| io_error(&path, source))?;

        debug!("downloaded {} to {}", media.id, path.display());
        Ok(ScratchFile { path, _lease: lease })
    }

    async fn fetch_to(&self, url: &str, target: &Path) -> Result<(), DownloadError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|source| DownloadError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let mut file = tokio::fs::File::create(target)
            .await
            .map_err(|source| io_error(target, source))?;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|source| DownloadError::Request {
                url: url.to_string(),
                source,
            })?;
            file.write_all(&chunk)
                .await
                .map_err(|source| io_error(target, source))?;
        }
        file.flush()
            .await
            .map_err(|source| io_error(target, source))?;
        Ok(())
    }
}

/// A downloaded file that must be handed back with [`ScratchFile::release`].
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
    _lease: ScratchLease,
}

impl ScratchFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ends the lease and leaves the file in place.
    pub fn keep(self) -> PathBuf {
        self.path
    }

    /// Deletes the file, plus any leftover partial, and ends the lease.
    pub async fn release(self) {
        remove_if_present(&self.path).await;
        remove_if_present(&partial_path(&self.path)).await;
        debug!("released {}", self.path.display());
    }
}

/// Exclusive access to one scratch path.
#[derive(Default, Clone)]
struct ScratchLocks {
    inner: Arc<Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>>,
}

impl ScratchLocks {
    fn table(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<AsyncMutex<()>>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn acquire(&self, path: &Path) -> ScratchLease {
        let lock = Arc::clone(self.table().entry(path.to_path_buf()).or_default());
        let guard = lock.lock_owned().await;
        ScratchLease {
            path: path.to_path_buf(),
            guard,
            locks: self.clone(),
        }
    }
}

struct ScratchLease {
    path: PathBuf,
    guard: OwnedMutexGuard<()>,
    locks: ScratchLocks,
}

impl fmt::Debug for ScratchLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScratchLease")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Drop for ScratchLease {
    fn drop(&mut self) {
        // The table and this guard are the only holders when nobody waits.
        let mut table = self.locks.table();
        if Arc::strong_count(OwnedMutexGuard::mutex(&self.guard)) <= 2 {
            table.remove(&self.path);
        }
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    path.with_file_name(name)
}

fn io_error(path: &Path, source: io::Error) -> DownloadError {
    DownloadError::Io {
        path: path.to_path_buf(),
        source,
    }
}

async fn remove_if_present(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!("failed to remove {}: {err}", path.display()),
    }
}
