//! Progress-reporting PUT to a pre-signed URL
//!
//! The body is streamed in fixed-size chunks and every chunk handed to the
//! connection is reported through the progress callback. Dropping the
//! future aborts the request, which is how the controller pauses and
//! cancels transfers.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::io::ReaderStream;

/// Size of each streamed body chunk
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Called with `(bytes_sent, total_bytes)`; only invoked when the total is known
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Transfer errors
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Upload failed: {0}")]
    Status(u16),

    #[error("Network error during upload: {0}")]
    Network(String),

    #[error("Failed to read file: {0}")]
    Read(#[from] std::io::Error),
}

/// Where a file's bytes come from.
///
/// Cloning is cheap: paths are re-opened per attempt and in-memory bytes
/// are reference counted.
#[derive(Debug, Clone)]
pub enum FileSource {
    Path(PathBuf),
    Bytes(Bytes),
}

impl FileSource {
    async fn into_stream(self) -> Result<(BoxStream<'static, std::io::Result<Bytes>>, u64), TransferError> {
        match self {
            FileSource::Bytes(bytes) => {
                let total = bytes.len() as u64;
                let chunks: Vec<std::io::Result<Bytes>> = (0..bytes.len())
                    .step_by(CHUNK_SIZE)
                    .map(|start| Ok(bytes.slice(start..(start + CHUNK_SIZE).min(bytes.len()))))
                    .collect();
                Ok((stream::iter(chunks).boxed(), total))
            }
            FileSource::Path(path) => {
                let file = tokio::fs::File::open(&path).await?;
                let total = file.metadata().await?.len();
                Ok((ReaderStream::with_capacity(file, CHUNK_SIZE).boxed(), total))
            }
        }
    }
}

/// Cancellable, progress-reporting upload of a file to a URL
#[async_trait]
pub trait Transport: Send + Sync {
    async fn put(
        &self,
        url: &str,
        content_type: &str,
        source: &FileSource,
        on_progress: ProgressFn,
    ) -> Result<(), TransferError>;
}

/// [`Transport`] backed by reqwest
#[derive(Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[tracing::instrument(
        name = "transfer.put",
        skip(self, url, source, on_progress),
        fields(http.status_code = tracing::field::Empty, upload.bytes = tracing::field::Empty),
        err
    )]
    async fn put(
        &self,
        url: &str,
        content_type: &str,
        source: &FileSource,
        on_progress: ProgressFn,
    ) -> Result<(), TransferError> {
        let (body, total) = source.clone().into_stream().await?;
        tracing::Span::current().record("upload.bytes", total);

        let mut loaded = 0u64;
        let counted = body.inspect_ok(move |chunk| {
            loaded += chunk.len() as u64;
            if total > 0 {
                on_progress(loaded, total);
            }
        });

        let response = self
            .client
            .put(url)
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, total)
            .body(reqwest::Body::wrap_stream(counted))
            .send()
            .await
            .map_err(|e| TransferError::Network(e.without_url().to_string()))?;

        let status = response.status();
        tracing::Span::current().record("http.status_code", status.as_u16());

        if !status.is_success() {
            return Err(TransferError::Status(status.as_u16()));
        }

        Ok(())
    }
}
