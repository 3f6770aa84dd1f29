//! HTTP Client Abstraction
//!
//! Provides streaming downloads of remote media assets.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::error::Result;

/// Dynamic async reader handed out by streaming downloads.
pub type DynAsyncRead = dyn tokio::io::AsyncRead + Send + Unpin;

/// Download request
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub headers: HashMap<String, String>,
    pub timeout: Option<Duration>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
            timeout: None,
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }
}

/// An open response body that can be consumed incrementally.
pub struct DownloadStream {
    /// Value of the `Content-Length` header, when the server sent one
    pub content_length: Option<u64>,
    /// Body reader
    pub reader: Box<DynAsyncRead>,
}

impl DownloadStream {
    pub fn new(reader: Box<DynAsyncRead>, content_length: Option<u64>) -> Self {
        Self {
            content_length,
            reader,
        }
    }
}

impl fmt::Debug for DownloadStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadStream")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Async HTTP client trait
///
/// Abstracts network transfers so the cache core never talks to a concrete
/// HTTP stack. Implementations should handle:
/// - TLS certificate validation
/// - Connection pooling and keep-alive
/// - Mapping non-2xx responses to [`BridgeError::HttpStatus`](crate::BridgeError::HttpStatus)
///
/// Implementations must not retry on their own: retry policy belongs to the
/// caller of the cache.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::http::{DownloadRequest, HttpClient};
/// use tokio::io::AsyncReadExt;
///
/// async fn fetch_all(client: &dyn HttpClient) -> Result<Vec<u8>> {
///     let mut stream = client
///         .download_stream(DownloadRequest::new("https://cdn.example.com/a.mp4"))
///         .await?;
///     let mut body = Vec::new();
///     stream.reader.read_to_end(&mut body).await?;
///     Ok(body)
/// }
/// ```
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Open a GET request and return the body as a stream of bytes.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Network connection fails
    /// - TLS validation fails
    /// - The server answers with a non-success status
    async fn download_stream(&self, request: DownloadRequest) -> Result<DownloadStream>;

    /// Check network connectivity
    async fn is_connected(&self) -> bool {
        true
    }
}
