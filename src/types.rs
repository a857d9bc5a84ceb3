//! Core types for bulkdl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::Error;

/// One requested unit of work in a bulk download
///
/// Constructed by the caller with the builder methods, then handed to
/// [`BulkScheduler`](crate::scheduler::BulkScheduler), which fills in the
/// bookkeeping fields (`slot`, `finished`, `error`, `target`, timestamps) as
/// the item moves through its lifecycle. Each item is claimed by exactly one
/// slot, exactly once, in list order.
#[derive(Clone, Debug)]
pub struct DownloadItem {
    /// Source identifier handed verbatim to the fetcher
    pub url: String,

    /// Caller-specified destination; when absent it is derived from fetch
    /// metadata once available
    pub output: Option<PathBuf>,

    /// Desired output extension; when present the stream is transcoded
    pub convert: Option<String>,

    /// Per-item fetcher arguments, appended after the scheduler defaults
    pub args: Vec<String>,

    /// Per-item fetcher options, winning over scheduler defaults on collision
    pub options: HashMap<String, String>,

    /// Per-item overwrite override; `None` falls back to the scheduler config
    pub overwrite: Option<bool>,

    /// Slot that claimed this item; assigned at dispatch, observability only
    pub slot: Option<usize>,

    /// Set exactly once, when the item reaches a terminal state
    pub finished: bool,

    /// Set iff the item failed
    pub error: Option<Arc<Error>>,

    /// Resolved destination path, recorded at the terminal transition
    pub target: Option<PathBuf>,

    /// When the item was claimed by a slot
    pub claimed_at: Option<DateTime<Utc>>,

    /// When the item reached a terminal state
    pub finished_at: Option<DateTime<Utc>>,
}

impl DownloadItem {
    /// Create a new item for the given source URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            output: None,
            convert: None,
            args: Vec::new(),
            options: HashMap::new(),
            overwrite: None,
            slot: None,
            finished: false,
            error: None,
            target: None,
            claimed_at: None,
            finished_at: None,
        }
    }

    /// Set the destination path (absolute, or relative to the working dir)
    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    /// Request transcoding to the given extension (e.g. `"mp3"`)
    pub fn with_convert(mut self, extension: impl Into<String>) -> Self {
        self.convert = Some(extension.into());
        self
    }

    /// Append per-item fetcher arguments
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set a per-item fetcher option
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Override the scheduler-level overwrite flag for this item
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = Some(overwrite);
        self
    }

    /// Whether this item reached a successful terminal state
    pub fn succeeded(&self) -> bool {
        self.finished && self.error.is_none()
    }
}

/// State of a single download task
///
/// `Skipped`, `Finished`, and `Failed` are terminal: a task transitions into
/// one of them exactly once and ignores any signal that arrives afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Constructed, nothing started yet
    Created,
    /// Waiting on the fetcher for stream metadata
    Fetching,
    /// Fetch metadata received, routing decision pending
    MetadataReceived,
    /// Stream is being piped straight to the sink
    WritingDirect,
    /// Stream is being transcoded to the target format
    Converting,
    /// Target already existed; finished without touching the fetcher
    Skipped,
    /// Successfully completed
    Finished,
    /// Failed with an error
    Failed,
}

impl TaskState {
    /// Whether this state is terminal (no further transitions occur)
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Skipped | TaskState::Finished | TaskState::Failed)
    }
}

/// Event emitted during the bulk download lifecycle
///
/// Events exist for observability, not correctness: the scheduler behaves
/// identically with zero subscribers, and an unsubscribed channel never
/// crashes the process.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// An item was claimed by a slot
    Claimed {
        /// Index of the item in the input list
        index: usize,
        /// Slot that claimed the item
        slot: usize,
        /// Source URL
        url: String,
    },

    /// An item reached a successful terminal state
    Finished {
        /// Index of the item in the input list
        index: usize,
        /// Slot that processed the item
        slot: usize,
        /// Source URL
        url: String,
        /// Resolved destination path, if one was determined
        target: Option<PathBuf>,
        /// Whether the item was skipped via the existence short-circuit
        skipped: bool,
    },

    /// An item failed
    Failed {
        /// Index of the item in the input list
        index: usize,
        /// Slot that processed the item
        slot: usize,
        /// Source URL
        url: String,
        /// Message of the underlying cause
        error: String,
    },

    /// Every item has reached a terminal state
    Complete {
        /// Number of items that succeeded (including skips)
        finished: usize,
        /// Number of items that failed
        failed: usize,
    },
}
