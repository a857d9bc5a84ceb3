//! Bulk download scheduler -- bounded-concurrency slot dispatch.
//!
//! [`BulkScheduler`] owns a fixed item list and N "slots". Each slot
//! repeatedly claims the next unclaimed item (a single indivisible
//! read-and-increment, serialized with the completion scan), drives a
//! [`DownloadTask`] to a terminal state, records the outcome on the item, and
//! claims again -- fill-as-you-go, no batched rounds and no rebalancing
//! between slots. A per-item failure is recorded and dispatch continues; the
//! aggregate completion signal fires exactly once, after every item has
//! reached a terminal state.


use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::Utc;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::services::Services;
use crate::task::{DownloadTask, TaskOptions};
use crate::types::{DownloadItem, Event, TaskState};

/// Events buffered per subscriber before it starts lagging
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Snapshot of one claim, taken under the item-list lock.
struct Claim {
    index: usize,
    url: String,
    output: Option<PathBuf>,
    convert: Option<String>,
    args: Vec<String>,
    options: HashMap<String, String>,
    overwrite: Option<bool>,
}

/// Bounded-concurrency bulk download scheduler (cloneable - all fields are Arc-wrapped)
///
/// Created with the full item list up front; items cannot be added after
/// construction. [`start`](BulkScheduler::start) is valid exactly once.
///
/// # Example
///
/// ```no_run
/// use bulkdl::{BulkScheduler, Config, DownloadItem, Services};
///
/// # fn build_services() -> Services { unimplemented!() }
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let scheduler = BulkScheduler::new(
///     vec![DownloadItem::new("https://media.example.com/a")],
///     Config::default(),
///     build_services(),
/// )?;
/// scheduler.start().await?;
///
/// let items = scheduler.wait().await;
/// println!("{} succeeded", items.iter().filter(|i| i.succeeded()).count());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BulkScheduler {
    /// Item list with per-item bookkeeping; claims and the completion scan
    /// serialize on this lock
    items: Arc<Mutex<Vec<DownloadItem>>>,
    /// Item count, fixed at construction
    total: usize,
    /// Next unclaimed index; incremented under the items lock
    cursor: Arc<AtomicUsize>,
    /// Resolved configuration
    config: Arc<Config>,
    /// Collaborator handles tasks are dispatched against
    services: Services,
    /// Event broadcast channel sender (multiple subscribers supported)
    event_tx: broadcast::Sender<Event>,
    /// Aggregate completion signal, written at most once
    done_tx: Arc<watch::Sender<bool>>,
    /// Receiver template cloned out by `wait()`
    done_rx: watch::Receiver<bool>,
    /// Guard ensuring the aggregate signal fires at most once
    completed: Arc<AtomicBool>,
    /// Guard ensuring `start()` runs at most once
    started: Arc<AtomicBool>,
    /// Cancellation signal: stops new claims, forwarded to collaborators
    cancel: CancellationToken,
    /// Join handles of the spawned slot loops
    slots: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl BulkScheduler {
    /// Create a scheduler over `items`
    ///
    /// The configuration is resolved here: the working directory is
    /// absolutized against the process's current directory at this point, not
    /// when items are dispatched.
    pub fn new(items: Vec<DownloadItem>, config: Config, services: Services) -> Result<Self> {
        let config = config.resolve()?;
        let total = items.len();
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (done_tx, done_rx) = watch::channel(false);

        Ok(Self {
            items: Arc::new(Mutex::new(items)),
            total,
            cursor: Arc::new(AtomicUsize::new(0)),
            config: Arc::new(config),
            services,
            event_tx,
            done_tx: Arc::new(done_tx),
            done_rx,
            completed: Arc::new(AtomicBool::new(false)),
            started: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            slots: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Start dispatching
    ///
    /// Spawns one loop per slot; each immediately attempts to claim an item.
    /// Valid exactly once -- a second call returns [`Error::AlreadyStarted`].
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStarted);
        }

        tracing::info!(
            items = self.total,
            slots = self.config.slot_count,
            "starting bulk download"
        );

        let mut handles = self.slots.lock().await;
        for slot in 0..self.config.slot_count {
            let scheduler = self.clone();
            handles.push(tokio::spawn(async move { scheduler.slot_loop(slot).await }));
        }
        Ok(())
    }

    /// Await the aggregate completion signal and return the item snapshot
    ///
    /// Resolves once every item has reached a terminal state (or, after
    /// [`cancel`](BulkScheduler::cancel), once every *claimed* item has).
    /// Per-item failures do not fail this future -- inspect the returned
    /// items to detect partial failure.
    pub async fn wait(&self) -> Vec<DownloadItem> {
        let mut done = self.done_rx.clone();
        while !*done.borrow_and_update() {
            if done.changed().await.is_err() {
                break;
            }
        }
        self.items().await
    }

    /// Snapshot of the item list, including per-item bookkeeping
    pub async fn items(&self) -> Vec<DownloadItem> {
        self.items.lock().await.clone()
    }

    /// Subscribe to scheduler events
    ///
    /// Multiple subscribers are supported; each receives all events
    /// independently. With zero subscribers events are silently dropped --
    /// the scheduler never requires a listener.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Subscribe to scheduler events as a `Stream`
    pub fn event_stream(&self) -> BroadcastStream<Event> {
        BroadcastStream::new(self.event_tx.subscribe())
    }

    /// Get the resolved configuration
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Whether the aggregate completion signal has fired
    pub fn is_complete(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// The scheduler's cancellation token
    ///
    /// Cloned into every [`FetchRequest`](crate::services::FetchRequest) so
    /// collaborators can abort in-flight work.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop claiming new items
    ///
    /// In-flight tasks run to their own terminal state; unclaimed items are
    /// left untouched (`finished == false`, no slot). The aggregate signal
    /// then fires once the in-flight tasks are done.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel and wait for the slot loops to wind down
    pub async fn shutdown(&self) -> Vec<DownloadItem> {
        self.cancel.cancel();

        let handles: Vec<JoinHandle<()>> = {
            let mut slots = self.slots.lock().await;
            slots.drain(..).collect()
        };
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "slot task panicked during shutdown");
            }
        }

        // Covers a shutdown before start(): no slot loop ever ran a scan
        self.check_complete().await;
        self.wait().await
    }

    /// One slot: claim, run, repeat until the list is exhausted or cancelled.
    async fn slot_loop(self, slot: usize) {
        while let Some(claim) = self.claim_next(slot).await {
            self.emit(Event::Claimed {
                index: claim.index,
                slot,
                url: claim.url.clone(),
            });
            tracing::debug!(slot, index = claim.index, url = %claim.url, "item claimed");
            self.run_claim(slot, claim).await;
        }

        tracing::debug!(slot, "slot idle, no more work");
        // A dispatch attempt that found nothing still triggers the completion
        // scan; this resolves the empty-list and cancellation cases.
        self.check_complete().await;
    }

    /// Claim the next unclaimed item for `slot`.
    ///
    /// The cursor increment and the slot assignment happen under the items
    /// lock, so the completion scan can never observe a half-taken claim.
    async fn claim_next(&self, slot: usize) -> Option<Claim> {
        let mut items = self.items.lock().await;

        if self.cancel.is_cancelled() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        if index >= self.total {
            return None;
        }

        let item = &mut items[index];
        item.slot = Some(slot);
        item.claimed_at = Some(Utc::now());

        Some(Claim {
            index,
            url: item.url.clone(),
            output: item.output.clone(),
            convert: item.convert.clone(),
            args: item.args.clone(),
            options: item.options.clone(),
            overwrite: item.overwrite,
        })
    }

    /// Drive one claimed item to a terminal state and record the outcome.
    async fn run_claim(&self, slot: usize, claim: Claim) {
        let Claim {
            index,
            url,
            output,
            convert,
            args,
            options,
            overwrite,
        } = claim;

        // Scheduler defaults merge under per-item values: args concatenate,
        // options collide item-wins.
        let mut merged_args = self.config.args.clone();
        merged_args.extend(args);
        let mut merged_options = self.config.options.clone();
        merged_options.extend(options);

        let task_options = TaskOptions {
            working_dir: self.config.working_dir.clone(),
            overwrite: overwrite.unwrap_or(self.config.overwrite),
            args: merged_args,
            options: merged_options,
            cancel: self.cancel.clone(),
        };

        let mut task = DownloadTask::new(url.clone(), task_options);
        if let Some(output) = output {
            task = task.with_output(output);
        }
        if let Some(convert) = convert {
            task = task.with_convert(convert);
        }

        let result = task.start(&self.services).await;
        let target = task.target();
        let derived_output = task.output().map(Path::to_path_buf);
        let skipped = task.state() == TaskState::Skipped;

        match result {
            Ok(()) => {
                {
                    let mut items = self.items.lock().await;
                    let item = &mut items[index];
                    item.finished = true;
                    item.finished_at = Some(Utc::now());
                    item.output = derived_output;
                    item.target = target.clone();
                }
                tracing::info!(slot, index, url = %url, skipped, "item finished");
                self.emit(Event::Finished {
                    index,
                    slot,
                    url,
                    target,
                    skipped,
                });
            }
            Err(err) => {
                let err = Arc::new(err);
                {
                    let mut items = self.items.lock().await;
                    let item = &mut items[index];
                    item.finished = true;
                    item.finished_at = Some(Utc::now());
                    item.output = derived_output;
                    item.target = target.clone();
                    item.error = Some(Arc::clone(&err));
                }
                tracing::warn!(slot, index, url = %url, error = %err, "item failed");
                self.emit(Event::Failed {
                    index,
                    slot,
                    url,
                    error: err.to_string(),
                });
            }
        }

        self.check_complete().await;
    }

    /// Fire the aggregate completion signal if every item is terminal.
    ///
    /// Cheap and idempotent: runs after every dispatch attempt and every
    /// terminal transition; the signal fires at most once. After
    /// cancellation, items that were never claimed are not waited for.
    async fn check_complete(&self) {
        if self.completed.load(Ordering::SeqCst) {
            return;
        }

        let (all_done, finished, failed) = {
            let items = self.items.lock().await;
            let cancelled = self.cancel.is_cancelled();
            let all_done = items
                .iter()
                .all(|item| item.finished || (cancelled && item.slot.is_none()));
            let finished = items
                .iter()
                .filter(|item| item.finished && item.error.is_none())
                .count();
            let failed = items.iter().filter(|item| item.error.is_some()).count();
            (all_done, finished, failed)
        };

        if !all_done {
            return;
        }
        if self.completed.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::info!(finished, failed, "bulk download complete");
        self.done_tx.send(true).ok();
        self.emit(Event::Complete { finished, failed });
    }

    /// Emit an event to all subscribers
    ///
    /// send() returns Err if there are no receivers, which is fine - we just
    /// drop the event.
    fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}
