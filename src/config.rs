//! Configuration types for bulkdl

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Scheduler configuration
///
/// Scheduler-level `args` and `options` are defaults merged **under**
/// per-item values at dispatch time: args are concatenated (defaults first),
/// options are merged with the item winning on key collision.
///
/// The working directory is resolved to an absolute path by
/// [`Config::resolve`] when the scheduler is constructed — relative paths are
/// resolved against the process's current directory *at configuration time*,
/// not at use time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Number of concurrently active download slots (default: 5)
    #[serde(default = "default_slot_count")]
    pub slot_count: usize,

    /// Working directory that relative output paths are joined under
    /// (default: ".")
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,

    /// Overwrite existing target files instead of skipping them
    #[serde(default)]
    pub overwrite: bool,

    /// Default fetcher arguments, prepended to per-item args
    #[serde(default)]
    pub args: Vec<String>,

    /// Default fetcher options, overridden by per-item options on collision
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            slot_count: default_slot_count(),
            working_dir: default_working_dir(),
            overwrite: false,
            args: Vec::new(),
            options: HashMap::new(),
        }
    }
}

impl Config {
    /// Load a configuration from a JSON string
    ///
    /// Missing fields fall back to their defaults, so `"{}"` is a valid
    /// configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config {
            message: format!("invalid configuration JSON: {e}"),
            key: None,
        })
    }

    /// Resolve the configuration for use by a scheduler
    ///
    /// Absolutizes `working_dir` against the process's current directory and
    /// clamps `slot_count` to at least 1 (a scheduler with zero slots would
    /// never drain its item list).
    pub fn resolve(mut self) -> Result<Self> {
        if self.slot_count == 0 {
            tracing::warn!("slot_count of 0 clamped to 1");
            self.slot_count = 1;
        }

        if !self.working_dir.is_absolute() {
            let cwd = std::env::current_dir().map_err(|e| Error::Config {
                message: format!("cannot resolve working directory: {e}"),
                key: Some("working_dir".to_string()),
            })?;
            self.working_dir = cwd.join(&self.working_dir);
        }

        Ok(self)
    }
}

fn default_slot_count() -> usize {
    5
}

fn default_working_dir() -> PathBuf {
    PathBuf::from(".")
}
