//! Per-item download task -- existence check, fetch, routing, completion.
//!
//! A [`DownloadTask`] drives exactly one item from `Created` to a terminal
//! state. It decides where the final bytes land (target resolution), whether
//! the fetch can be skipped entirely (existence short-circuit), and whether
//! the stream goes straight to the [`Sink`](crate::services::Sink) or through
//! the [`Transcoder`](crate::services::Transcoder).


use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::error::{FetchError, Result, WriteError};
use crate::services::{FetchMetadata, FetchProbe, FetchRequest, FetchStream, Fetcher, Services};
use crate::types::TaskState;
use crate::utils;

/// Options a task is dispatched with
///
/// The scheduler builds these by merging its configuration with per-item
/// values; standalone callers can use [`TaskOptions::default`].
#[derive(Clone, Debug)]
pub struct TaskOptions {
    /// Directory that relative outputs are joined under
    pub working_dir: PathBuf,
    /// Overwrite an existing target instead of skipping the item
    pub overwrite: bool,
    /// Fetcher arguments, passed through verbatim
    pub args: Vec<String>,
    /// Fetcher options, passed through verbatim
    pub options: HashMap<String, String>,
    /// Cancellation signal, forwarded to the fetcher
    pub cancel: CancellationToken,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            overwrite: false,
            args: Vec::new(),
            options: HashMap::new(),
            cancel: CancellationToken::new(),
        }
    }
}

/// Transient execution object driving one item to a terminal state
///
/// Owned exclusively by the slot (or caller) that created it; not persisted.
/// After [`start`](DownloadTask::start) returns, the terminal
/// [`state`](DownloadTask::state), the resolved [`target`](DownloadTask::target),
/// and any received [`metadata`](DownloadTask::metadata) remain inspectable.
pub struct DownloadTask {
    url: String,
    output: Option<PathBuf>,
    convert: Option<String>,
    args: Vec<String>,
    options: HashMap<String, String>,
    working_dir: PathBuf,
    overwrite: bool,
    cancel: CancellationToken,
    metadata: Option<FetchMetadata>,
    full_info: Option<FetchProbe>,
    state: TaskState,
}

impl DownloadTask {
    /// Create a task for the given source URL
    pub fn new(url: impl Into<String>, options: TaskOptions) -> Self {
        Self {
            url: url.into(),
            output: None,
            convert: None,
            args: options.args,
            options: options.options,
            working_dir: options.working_dir,
            overwrite: options.overwrite,
            cancel: options.cancel,
            metadata: None,
            full_info: None,
            state: TaskState::Created,
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

    /// Source URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current state
    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Destination path as currently known (caller-supplied or derived from
    /// fetch metadata)
    pub fn output(&self) -> Option<&Path> {
        self.output.as_deref()
    }

    /// Stream metadata, available once the fetcher has answered
    pub fn metadata(&self) -> Option<&FetchMetadata> {
        self.metadata.as_ref()
    }

    /// Stream size in bytes; only available after the fetcher has answered
    pub fn size(&self) -> Option<u64> {
        self.metadata.as_ref().and_then(|m| m.size)
    }

    /// Resolve the final destination path
    ///
    /// Recomputed on demand from `(output, working_dir, convert)` — same
    /// inputs always produce the same path. `None` until an output is known.
    pub fn target(&self) -> Option<PathBuf> {
        self.output
            .as_ref()
            .map(|output| Self::resolve_target(output, &self.working_dir, self.convert.as_deref()))
    }

    /// Pure target resolution
    ///
    /// Absolute outputs pass through; relative outputs are joined under
    /// `working_dir`. When a conversion extension is set, the current
    /// extension (if any) is stripped and `.` plus the conversion extension
    /// is appended.
    pub fn resolve_target(output: &Path, working_dir: &Path, convert: Option<&str>) -> PathBuf {
        let resolved = utils::absolutize(output, working_dir);
        match convert {
            Some(ext) => utils::replace_extension(&resolved, ext),
            None => resolved,
        }
    }

    /// Full metadata for the URL, retrieved without downloading
    ///
    /// Cached after the first call.
    pub async fn full_info(&mut self, fetcher: &dyn Fetcher) -> Result<FetchProbe> {
        if let Some(probe) = &self.full_info {
            return Ok(probe.clone());
        }
        let probe = fetcher.probe(&self.url).await?;
        self.full_info = Some(probe.clone());
        Ok(probe)
    }

    /// Drive the task to a terminal state
    ///
    /// Intended to be called once per task. On success the task ends in
    /// `Skipped` or `Finished` and a file exists at the target path (unless
    /// skipped); on failure the task ends in `Failed` and the error is
    /// returned while the task keeps its resolved state for inspection.
    pub async fn start(&mut self, services: &Services) -> Result<()> {
        match self.execute(services).await {
            Ok(terminal) => {
                self.transition(terminal);
                Ok(())
            }
            Err(err) => {
                tracing::debug!(url = %self.url, error = %err, "download task failed");
                self.transition(TaskState::Failed);
                Err(err)
            }
        }
    }

    async fn execute(&mut self, services: &Services) -> Result<TaskState> {
        if self.target_exists().await {
            tracing::debug!(url = %self.url, "target exists, skipping fetch");
            return Ok(TaskState::Skipped);
        }

        self.transition(TaskState::Fetching);
        let request = self.fetch_request();
        let FetchStream { metadata, body } = services.fetcher.fetch(&request).await?;
        self.transition(TaskState::MetadataReceived);

        if metadata.filename.is_empty() {
            return Err(FetchError::Metadata {
                url: self.url.clone(),
                reason: "fetcher supplied an empty filename".to_string(),
            }
            .into());
        }

        let source_ext = Path::new(&metadata.filename)
            .extension()
            .map(|e| e.to_os_string());
        if self.output.is_none() {
            self.output = Some(PathBuf::from(&metadata.filename));
        }
        self.metadata = Some(metadata);

        // The derived default output may point at a file from a previous run
        if self.target_exists().await {
            tracing::debug!(url = %self.url, "derived target exists, skipping write");
            return Ok(TaskState::Skipped);
        }

        let Some(target) = self.target() else {
            return Err(FetchError::Metadata {
                url: self.url.clone(),
                reason: "could not resolve a target path".to_string(),
            }
            .into());
        };

        if self.cancel.is_cancelled() {
            return Err(FetchError::Cancelled {
                url: self.url.clone(),
            }
            .into());
        }

        if target.extension().map(|e| e.to_os_string()) == source_ext {
            self.transition(TaskState::WritingDirect);
            let mut writer = services.sink.open(&target).await?;
            let mut body = body;
            tokio::io::copy(&mut body, &mut writer)
                .await
                .map_err(|source| WriteError::Stream {
                    path: target.clone(),
                    source,
                })?;
            writer
                .shutdown()
                .await
                .map_err(|source| WriteError::Stream {
                    path: target.clone(),
                    source,
                })?;
            tracing::debug!(url = %self.url, target = %target.display(), "direct write complete");
        } else {
            self.transition(TaskState::Converting);
            services.transcoder.transcode(body, &target).await?;
            tracing::debug!(url = %self.url, target = %target.display(), "transcode complete");
        }

        Ok(TaskState::Finished)
    }

    /// Move to `next` unless a terminal state has already been reached.
    fn transition(&mut self, next: TaskState) {
        if self.state.is_terminal() {
            tracing::trace!(current = ?self.state, ignored = ?next, "signal after terminal state ignored");
            return;
        }
        self.state = next;
    }

    /// Whether the resolved target already exists and may satisfy the item.
    ///
    /// Always false when `overwrite` is set or no target is resolvable yet.
    async fn target_exists(&self) -> bool {
        if self.overwrite {
            return false;
        }
        match self.target() {
            Some(target) => tokio::fs::try_exists(&target).await.unwrap_or(false),
            None => false,
        }
    }

    fn fetch_request(&self) -> FetchRequest {
        FetchRequest {
            url: self.url.clone(),
            args: self.args.clone(),
            options: self.options.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl std::fmt::Debug for DownloadTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadTask")
            .field("url", &self.url)
            .field("output", &self.output)
            .field("convert", &self.convert)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
