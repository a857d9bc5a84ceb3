//! External collaborator seams
//!
//! The scheduler never talks to the network, a codec, or the filesystem
//! directly. Those concerns live behind three narrow traits:
//!
//! - [`Fetcher`] — streams remote media and supplies stream metadata
//! - [`Transcoder`] — converts a byte stream to the container implied by the
//!   target path's extension
//! - [`Sink`] — opens a writable handle at a destination path
//!
//! All three are `async_trait` objects so embedders can wrap `yt-dlp`,
//! `ffmpeg`, an HTTP client, or in tests, scripted mocks.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::error::{ConvertError, FetchError, WriteError};

/// A readable stream of media bytes
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// A writable handle opened by a [`Sink`]
pub type SinkStream = Pin<Box<dyn AsyncWrite + Send>>;

/// Everything a fetcher needs to start streaming one item
#[derive(Clone, Debug)]
pub struct FetchRequest {
    /// Source URL
    pub url: String,
    /// Fetcher arguments (scheduler defaults followed by per-item args)
    pub args: Vec<String>,
    /// Fetcher options (scheduler defaults merged under per-item options)
    pub options: HashMap<String, String>,
    /// Cancellation signal; fetchers should abort promptly when triggered
    pub cancel: CancellationToken,
}

/// Stream metadata emitted by the fetcher once the remote end answers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchMetadata {
    /// Suggested filename for the stream (used to derive a default output)
    pub filename: String,
    /// Total size in bytes, when the remote end reports one
    pub size: Option<u64>,
}

/// An open fetch: metadata plus the byte stream
///
/// Returning this from [`Fetcher::fetch`] is the `info` signal; returning an
/// error is the `error` signal.
pub struct FetchStream {
    /// Stream metadata
    pub metadata: FetchMetadata,
    /// The media bytes
    pub body: ByteStream,
}

/// Full metadata for a URL, retrieved without downloading
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchProbe {
    /// The same metadata a fetch would report
    pub metadata: FetchMetadata,
    /// Fetcher-specific metadata, passed through untyped
    pub raw: serde_json::Value,
}

/// Streams remote media
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    /// Start fetching one item
    ///
    /// Resolves with metadata and the byte stream, or with a [`FetchError`]
    /// when the source cannot be reached or the stream breaks during setup.
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchStream, FetchError>;

    /// Retrieve full metadata for a URL without downloading it
    async fn probe(&self, url: &str) -> Result<FetchProbe, FetchError>;
}

/// Converts a byte stream to the container implied by the target extension
#[async_trait::async_trait]
pub trait Transcoder: Send + Sync {
    /// Consume `input` and produce the transcoded output at `target`
    ///
    /// `Ok(())` is the `end` signal, `Err` the `error` signal.
    async fn transcode(&self, input: ByteStream, target: &Path) -> Result<(), ConvertError>;
}

/// Accepts a byte stream at a destination path
#[async_trait::async_trait]
pub trait Sink: Send + Sync {
    /// Open a writable handle at `target`, creating parent directories
    async fn open(&self, target: &Path) -> Result<SinkStream, WriteError>;
}

/// Default [`Sink`] writing to the local filesystem via `tokio::fs`
pub struct FsSink;

#[async_trait::async_trait]
impl Sink for FsSink {
    async fn open(&self, target: &Path) -> Result<SinkStream, WriteError> {
        if let Some(parent) = target.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| WriteError::Create {
                    path: PathBuf::from(parent),
                    source,
                })?;
        }

        let file = tokio::fs::File::create(target)
            .await
            .map_err(|source| WriteError::Create {
                path: target.to_path_buf(),
                source,
            })?;

        Ok(Box::pin(file))
    }
}

/// Bundle of the three collaborator handles a scheduler dispatches against
#[derive(Clone)]
pub struct Services {
    /// Streams remote media
    pub fetcher: Arc<dyn Fetcher>,
    /// Converts streams between containers
    pub transcoder: Arc<dyn Transcoder>,
    /// Writes streams to their destination
    pub sink: Arc<dyn Sink>,
}
