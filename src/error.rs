//! Error types for bulkdl
//!
//! This module provides error handling for the library:
//! - Per-collaborator error types (`FetchError`, `WriteError`, `ConvertError`)
//!   that fail only the task that owns them
//! - A top-level [`Error`] for everything the library itself can refuse
//!
//! Scheduler exhaustion (a slot finding the item list empty) is deliberately
//! not an error — it is normal termination and has no variant here.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for bulkdl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for bulkdl
///
/// Task-level failures (`Fetch`, `Write`, `Convert`) are recorded on the
/// owning [`DownloadItem`](crate::types::DownloadItem) and never propagate
/// past the scheduler.
#[derive(Debug, Error)]
pub enum Error {
    /// Fetcher failed during metadata retrieval or streaming
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Sink failed during a direct write
    #[error("write error: {0}")]
    Write(#[from] WriteError),

    /// Transcoder failed while converting a stream
    #[error("conversion error: {0}")]
    Convert(#[from] ConvertError),

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "working_dir")
        key: Option<String>,
    },

    /// `start()` was called on a scheduler that is already running
    #[error("scheduler already started")]
    AlreadyStarted,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a [`Fetcher`](crate::services::Fetcher)
///
/// A fetch error fails the owning task only; the scheduler records it on the
/// item and keeps dispatching.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Metadata retrieval failed before any bytes were streamed
    #[error("metadata retrieval failed for {url}: {reason}")]
    Metadata {
        /// Source URL being fetched
        url: String,
        /// The reason metadata retrieval failed
        reason: String,
    },

    /// The byte stream failed mid-transfer
    #[error("stream error for {url}: {reason}")]
    Stream {
        /// Source URL being fetched
        url: String,
        /// The reason the stream failed
        reason: String,
    },

    /// The fetch observed the cancellation signal and aborted
    #[error("fetch of {url} was cancelled")]
    Cancelled {
        /// Source URL whose fetch was cancelled
        url: String,
    },
}

/// Errors raised by a [`Sink`](crate::services::Sink) during a direct write
#[derive(Debug, Error)]
pub enum WriteError {
    /// The destination file could not be created
    #[error("failed to create {path}: {source}")]
    Create {
        /// Destination path that could not be created
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Piping the byte stream into the destination failed
    #[error("write to {path} failed: {source}")]
    Stream {
        /// Destination path being written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by a [`Transcoder`](crate::services::Transcoder)
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The transcode run failed
    #[error("transcode to {target} failed: {reason}")]
    Failed {
        /// Destination path of the transcode
        target: PathBuf,
        /// The reason the transcode failed
        reason: String,
    },

    /// I/O error while the transcoder read its input or wrote its output
    #[error("transcoder I/O error for {target}: {source}")]
    Io {
        /// Destination path of the transcode
        target: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}
