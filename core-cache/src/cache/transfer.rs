//! # Source Transfers
//!
//! Copies a remote asset into a staging file while handing the same bytes to
//! the caller.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  chunks   ┌──────────────────┐  chunks   ┌────────────────┐
//! │  HttpClient  ├──────────>│  transfer task   ├──────────>│ TransferStream │
//! └──────────────┘           │ (tokio::spawn)   │ (bounded) └────────────────┘
//!                            └───────┬──────────┘
//!                                    │ write
//!                                    ▼
//!                       .staging/<key>.<uuid>.part
//! ```
//!
//! Dropping the [`TransferStream`] cancels the task through a
//! `CancellationToken` drop guard. [`TransferStream::detach`] lets the transfer
//! finish in the background instead.

use crate::error::{CacheError, Result};
use bridge_traits::http::{DownloadRequest, DownloadStream, HttpClient};
use bridge_traits::storage::FileSystemAccess;
use bytes::{Bytes, BytesMut};
use futures::Stream;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, trace};

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// A file that is fully present in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFile {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Progress of one transfer, published on a `watch` channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    InProgress { bytes_written: u64 },
    Completed(CachedFile),
    Failed(String),
    Cancelled,
}

impl TransferStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, TransferStatus::InProgress { .. })
    }
}

/// Handle for awaiting a transfer started by someone else.
#[derive(Debug, Clone)]
pub struct TransferWatcher {
    status: watch::Receiver<TransferStatus>,
}

impl TransferWatcher {
    pub(crate) fn new(status: watch::Receiver<TransferStatus>) -> Self {
        Self { status }
    }

    /// Current status without waiting.
    pub fn status(&self) -> TransferStatus {
        self.status.borrow().clone()
    }

    /// Wait for the transfer to finish and return the cached file.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::TransferFailed`] or [`CacheError::Cancelled`] when
    /// the transfer did not produce a cache entry.
    pub async fn wait(mut self) -> Result<CachedFile> {
        loop {
            match &*self.status.borrow_and_update() {
                TransferStatus::Completed(file) => return Ok(file.clone()),
                TransferStatus::Failed(message) => {
                    return Err(CacheError::TransferFailed(message.clone()))
                }
                TransferStatus::Cancelled => return Err(CacheError::Cancelled),
                TransferStatus::InProgress { .. } => {}
            }

            self.status.changed().await.map_err(|_| {
                CacheError::Internal("Transfer ended without reporting a status".to_string())
            })?;
        }
    }
}

/// Bytes of an in-progress transfer, delivered as they arrive.
///
/// Implements `Stream<Item = io::Result<Bytes>>`. The stream ends after the
/// last chunk; a failed transfer yields one error item first.
///
/// The failure is read from the transfer status once the chunk channel
/// closes, so it is delivered even when the caller lags behind the source.
pub struct TransferStream {
    identifier: String,
    content_length: Option<u64>,
    chunks: mpsc::Receiver<std::io::Result<Bytes>>,
    watcher: TransferWatcher,
    cancel: DropGuard,
    finished: bool,
}

impl TransferStream {
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Length advertised by the source, if any.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Watcher for the caching side of this transfer.
    pub fn watcher(&self) -> TransferWatcher {
        self.watcher.clone()
    }

    /// Stop consuming but let the transfer finish caching in the background.
    pub fn detach(self) -> TransferWatcher {
        let TransferStream {
            watcher, cancel, ..
        } = self;
        cancel.disarm();
        watcher
    }

    pub(crate) fn set_content_length(&mut self, length: Option<u64>) {
        self.content_length = length;
    }

    /// Adapt into an `AsyncRead` for consumers that want a reader.
    pub fn into_async_read(self) -> tokio_util::io::StreamReader<Self, Bytes> {
        tokio_util::io::StreamReader::new(self)
    }
}

impl Stream for TransferStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        match ready!(self.chunks.poll_recv(cx)) {
            Some(chunk) => Poll::Ready(Some(chunk)),
            None => {
                // The job publishes its final status before dropping the sender.
                self.finished = true;
                match self.watcher.status() {
                    TransferStatus::Failed(message) => {
                        Poll::Ready(Some(Err(std::io::Error::other(message))))
                    }
                    _ => Poll::Ready(None),
                }
            }
        }
    }
}

impl std::fmt::Debug for TransferStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferStream")
            .field("content_length", &self.content_length)
            .field("status", &self.watcher.status())
            .finish_non_exhaustive()
    }
}

/// Channels connecting a spawned transfer to its stream and watchers.
pub(crate) struct TransferHandles {
    pub stream: TransferStream,
    pub job: TransferJob,
    pub status: watch::Receiver<TransferStatus>,
}

/// Work item executed by the spawned transfer task.
pub(crate) struct TransferJob {
    pub identifier: String,
    pub staging_path: PathBuf,
    stall_timeout: Duration,
    chunks: mpsc::Sender<std::io::Result<Bytes>>,
    pub status: watch::Sender<TransferStatus>,
    cancel: CancellationToken,
}

/// Create the stream, the job, and the status channel for one transfer.
pub(crate) fn prepare(
    identifier: &str,
    staging_path: PathBuf,
    stall_timeout: Duration,
    buffer_chunks: usize,
) -> TransferHandles {
    let (chunk_tx, chunk_rx) = mpsc::channel(buffer_chunks.max(1));
    let (status_tx, status_rx) = watch::channel(TransferStatus::InProgress { bytes_written: 0 });
    let cancel = CancellationToken::new();

    let stream = TransferStream {
        identifier: identifier.to_string(),
        content_length: None,
        chunks: chunk_rx,
        watcher: TransferWatcher::new(status_rx.clone()),
        cancel: cancel.clone().drop_guard(),
        finished: false,
    };

    let job = TransferJob {
        identifier: identifier.to_string(),
        staging_path,
        stall_timeout,
        chunks: chunk_tx,
        status: status_tx,
        cancel,
    };

    TransferHandles {
        stream,
        job,
        status: status_rx,
    }
}

impl TransferJob {
    /// Open the source. Called before the stream is handed out so the
    /// caller sees the advertised length.
    pub async fn open(&self, http: &dyn HttpClient) -> Result<DownloadStream> {
        let source = http
            .download_stream(DownloadRequest::new(self.identifier.clone()))
            .await?;
        Ok(source)
    }

    /// Stream `source` into the staging file, forwarding chunks to the caller.
    ///
    /// Returns the number of bytes written. The staging file is left in place
    /// on both success and failure; the caller moves or removes it.
    pub async fn copy_to_staging(
        &self,
        fs: &dyn FileSystemAccess,
        mut source: DownloadStream,
    ) -> Result<u64> {
        let mut writer = fs.open_write_stream(&self.staging_path).await?;
        let mut forward = true;
        let mut received: u64 = 0;
        let mut buf = BytesMut::with_capacity(READ_CHUNK_SIZE);

        loop {
            buf.reserve(READ_CHUNK_SIZE);

            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(CacheError::Cancelled),
                read = tokio::time::timeout(self.stall_timeout, source.reader.read_buf(&mut buf)) => read,
            };

            let n = read
                .map_err(|_| CacheError::Stalled(self.stall_timeout))?
                .map_err(|e| CacheError::TransferFailed(format!("Read failed: {}", e)))?;

            if n == 0 {
                break;
            }

            let chunk = buf.split().freeze();
            writer.write_all(&chunk).await?;
            received += n as u64;
            self.status.send_replace(TransferStatus::InProgress {
                bytes_written: received,
            });

            if forward {
                forward = self.forward(chunk).await?;
            }
        }

        writer.flush().await?;
        writer.shutdown().await?;

        if let Some(expected) = source.content_length {
            if received != expected {
                return Err(CacheError::Incomplete { expected, received });
            }
        }

        trace!(bytes = received, "Transfer body complete");
        Ok(received)
    }

    /// Send one chunk to the caller. Returns `false` once the caller stopped
    /// listening, after which the transfer only writes to disk.
    async fn forward(&self, chunk: Bytes) -> Result<bool> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CacheError::Cancelled),
            sent = self.chunks.send(Ok(chunk)) => {
                if sent.is_err() {
                    debug!("Caller detached; continuing transfer without forwarding");
                }
                Ok(sent.is_ok())
            }
        }
    }
}

/// Remove a staging file, ignoring a file that is already gone.
pub(crate) async fn discard_staging(fs: &dyn FileSystemAccess, path: &Path) {
    match fs.delete_file(path).await {
        Ok(()) => trace!(path = ?path, "Removed staging file"),
        Err(e) if e.is_not_found() => {}
        Err(e) => debug!(path = ?path, error = %e, "Failed to remove staging file"),
    }
}
