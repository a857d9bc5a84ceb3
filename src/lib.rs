//! # bulkdl
//!
//! Bounded-concurrency bulk media download and transcode scheduler.
//!
//! ## Design Philosophy
//!
//! bulkdl is designed to be:
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Narrow at the edges** - Network fetch, transcoding, and disk writes
//!   live behind the [`Fetcher`](services::Fetcher),
//!   [`Transcoder`](services::Transcoder), and [`Sink`](services::Sink) seams
//! - **Event-driven** - Consumers subscribe to events, no polling required
//! - **Failure-isolating** - One bad item never takes down the batch
//!
//! ## Quick Start
//!
//! ```no_run
//! use bulkdl::{BulkScheduler, Config, DownloadItem, Services};
//!
//! # fn build_services() -> Services { unimplemented!() }
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let items = vec![
//!         DownloadItem::new("https://media.example.com/talk"),
//!         DownloadItem::new("https://media.example.com/song").with_convert("mp3"),
//!     ];
//!
//!     let scheduler = BulkScheduler::new(items, Config::default(), build_services())?;
//!
//!     // Subscribe to events
//!     let mut events = scheduler.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     scheduler.start().await?;
//!     let items = scheduler.wait().await;
//!     println!("{} items done", items.len());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Bulk scheduler (slot dispatch, events, aggregate completion)
pub mod scheduler;
/// External collaborator seams (Fetcher/Transcoder/Sink)
pub mod services;
/// Per-item download task state machine
pub mod task;
/// Core types and events
pub mod types;
/// Path manipulation helpers
pub mod utils;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use config::Config;
pub use error::{ConvertError, Error, FetchError, Result, WriteError};
pub use scheduler::BulkScheduler;
pub use services::{
    ByteStream, FetchMetadata, FetchProbe, FetchRequest, FetchStream, Fetcher, FsSink, Services,
    Sink, Transcoder,
};
pub use task::{DownloadTask, TaskOptions};
pub use types::{DownloadItem, Event, TaskState};

/// Run a scheduler to completion with graceful signal handling.
///
/// Starts the scheduler, then races aggregate completion against a
/// termination signal. On a signal the scheduler stops claiming new items,
/// in-flight tasks run to their own terminal state, and the item snapshot is
/// returned so callers can see how far the batch got.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with a Ctrl+C fallback if
///   signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use bulkdl::{BulkScheduler, Config, DownloadItem, Services, run_with_shutdown};
///
/// # fn build_services() -> Services { unimplemented!() }
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let items = vec![DownloadItem::new("https://media.example.com/talk")];
///     let scheduler = BulkScheduler::new(items, Config::default(), build_services())?;
///
///     let items = run_with_shutdown(scheduler).await?;
///     println!("{} items reached a terminal state", items.len());
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(scheduler: BulkScheduler) -> Result<Vec<DownloadItem>> {
    scheduler.start().await?;

    tokio::select! {
        items = scheduler.wait() => Ok(items),
        _ = wait_for_signal() => {
            scheduler.cancel();
            Ok(scheduler.wait().await)
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration may fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        _ => {
            tracing::warn!("Could not register signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
