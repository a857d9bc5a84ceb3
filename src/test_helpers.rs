//! Shared mock collaborators for unit tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{ConvertError, FetchError};
use crate::services::{
    ByteStream, FetchMetadata, FetchProbe, FetchRequest, FetchStream, Fetcher, FsSink, Services,
    Transcoder,
};

/// Scripted fetch outcome for one URL.
#[derive(Clone)]
pub(crate) struct FetchScript {
    pub(crate) filename: String,
    pub(crate) size: Option<u64>,
    pub(crate) body: Vec<u8>,
    pub(crate) delay: Duration,
    pub(crate) fail: Option<String>,
}

impl FetchScript {
    pub(crate) fn ok(filename: &str, body: &[u8]) -> Self {
        Self {
            filename: filename.to_string(),
            size: Some(body.len() as u64),
            body: body.to_vec(),
            delay: Duration::ZERO,
            fail: None,
        }
    }

    pub(crate) fn failing(reason: &str) -> Self {
        Self {
            filename: String::new(),
            size: None,
            body: Vec::new(),
            delay: Duration::ZERO,
            fail: Some(reason.to_string()),
        }
    }

    pub(crate) fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Fetcher that replays scripts and records every request.
pub(crate) struct MockFetcher {
    scripts: HashMap<String, FetchScript>,
    requests: Mutex<Vec<FetchRequest>>,
    probe_calls: AtomicUsize,
}

impl MockFetcher {
    pub(crate) fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            requests: Mutex::new(Vec::new()),
            probe_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_script(mut self, url: &str, script: FetchScript) -> Self {
        self.scripts.insert(url.to_string(), script);
        self
    }

    pub(crate) fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.requests.lock().unwrap().iter().map(|r| r.url.clone()).collect()
    }

    pub(crate) fn call_count(&self, url: &str) -> usize {
        self.requests.lock().unwrap().iter().filter(|r| r.url == url).count()
    }

    pub(crate) fn probe_call_count(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchStream, FetchError> {
        self.requests.lock().unwrap().push(request.clone());

        let script = self
            .scripts
            .get(&request.url)
            .cloned()
            .ok_or_else(|| FetchError::Metadata {
                url: request.url.clone(),
                reason: "no script for url".to_string(),
            })?;

        if !script.delay.is_zero() {
            tokio::time::sleep(script.delay).await;
        }
        if request.cancel.is_cancelled() {
            return Err(FetchError::Cancelled {
                url: request.url.clone(),
            });
        }
        if let Some(reason) = script.fail {
            return Err(FetchError::Stream {
                url: request.url.clone(),
                reason,
            });
        }

        Ok(FetchStream {
            metadata: FetchMetadata {
                filename: script.filename,
                size: script.size,
            },
            body: Box::pin(std::io::Cursor::new(script.body)) as ByteStream,
        })
    }

    async fn probe(&self, url: &str) -> Result<FetchProbe, FetchError> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);

        let script = self
            .scripts
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Metadata {
                url: url.to_string(),
                reason: "no script for url".to_string(),
            })?;

        Ok(FetchProbe {
            metadata: FetchMetadata {
                filename: script.filename.clone(),
                size: script.size,
            },
            raw: serde_json::json!({ "_filename": script.filename }),
        })
    }
}

/// Transcoder that drains its input, writes a marker file, and records the
/// destination.
pub(crate) struct MockTranscoder {
    saved: Mutex<Vec<PathBuf>>,
    fail: Option<String>,
}

impl MockTranscoder {
    pub(crate) fn new() -> Self {
        Self {
            saved: Mutex::new(Vec::new()),
            fail: None,
        }
    }

    pub(crate) fn failing(reason: &str) -> Self {
        Self {
            saved: Mutex::new(Vec::new()),
            fail: Some(reason.to_string()),
        }
    }

    pub(crate) fn saved(&self) -> Vec<PathBuf> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Transcoder for MockTranscoder {
    async fn transcode(&self, mut input: ByteStream, target: &Path) -> Result<(), ConvertError> {
        if let Some(reason) = &self.fail {
            return Err(ConvertError::Failed {
                target: target.to_path_buf(),
                reason: reason.clone(),
            });
        }

        let mut bytes = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut input, &mut bytes)
            .await
            .map_err(|source| ConvertError::Io {
                target: target.to_path_buf(),
                source,
            })?;

        tokio::fs::write(target, b"transcoded")
            .await
            .map_err(|source| ConvertError::Io {
                target: target.to_path_buf(),
                source,
            })?;

        self.saved.lock().unwrap().push(target.to_path_buf());
        Ok(())
    }
}

/// Bundle mocks into a [`Services`] while keeping handles for assertions.
pub(crate) fn make_services(
    fetcher: MockFetcher,
    transcoder: MockTranscoder,
) -> (Services, Arc<MockFetcher>, Arc<MockTranscoder>) {
    let fetcher = Arc::new(fetcher);
    let transcoder = Arc::new(transcoder);
    let services = Services {
        fetcher: fetcher.clone(),
        transcoder: transcoder.clone(),
        sink: Arc::new(FsSink),
    };
    (services, fetcher, transcoder)
}
