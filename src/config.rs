//! Engine configuration.
//!
//! Only the worker pool is configurable; the tree itself is fully described
//! by its specification.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::orchestration::Priority;
use crate::{ttlog_debug, Result};

const DEFAULT_THREAD_NAME: &str = "tasktree-worker";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of worker threads in the default pool. `None` uses the
    /// available parallelism of the machine.
    pub worker_threads: Option<usize>,
    /// Name given to pool threads.
    pub thread_name: String,
    /// Priority used by concurrent calls that don't pick one explicitly.
    pub default_priority: Priority,
    /// Log at DEBUG instead of INFO.
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_threads: None,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            default_priority: Priority::Inherit,
            debug: false,
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        ttlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            ttlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config = Self::from_toml_str(&fs::read_to_string(path)?)?;
        ttlog_debug!(
            "Config loaded: worker_threads={:?}, thread_name={}, priority={:?}",
            config.worker_threads,
            config.thread_name,
            config.default_priority
        );
        Ok(config)
    }

    /// Override fields from `TASKTREE_WORKER_THREADS` and `TASKTREE_DEBUG`.
    pub fn apply_env(mut self) -> Self {
        if let Some(threads) = std::env::var("TASKTREE_WORKER_THREADS")
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|&n| n > 0)
        {
            self.worker_threads = Some(threads);
        }
        if std::env::var_os("TASKTREE_DEBUG").is_some() {
            self.debug = crate::log::env_debug();
        }
        self
    }

    pub fn effective_worker_threads(&self) -> usize {
        self.worker_threads.filter(|&n| n > 0).unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
    }
}
