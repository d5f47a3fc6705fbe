// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::breaker::BreakerConfig;
use crate::pool::PoolConfig;
use crate::queue::QueueConfig;
use crate::types::StorageMode;

/// Configuration exactly as read from a TOML file.
///
/// ```toml
/// [pool]
/// max_workers = 4
/// heartbeat_timeout_secs = 300
/// default_adapter = "process"
///
/// [breaker]
/// max_attempts = 3
/// max_error_repeats = 2
/// oscillation_threshold = 2
///
/// [queue]
/// lock_timeout_ms = 10000
///
/// [state]
/// dir = ".workstream"
/// storage = "file"
/// ```
///
/// All sections are optional and have reasonable defaults. Use
/// `ConfigFile::try_from(raw)` to obtain a validated config.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub pool: PoolSection,

    #[serde(default)]
    pub breaker: BreakerSection,

    #[serde(default)]
    pub queue: QueueSection,

    #[serde(default)]
    pub state: StateSection,
}

/// Validated configuration.
///
/// Constructed once at startup and handed by reference to each component's
/// constructor; there is no global copy.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub pool: PoolSection,
    pub breaker: BreakerSection,
    pub queue: QueueSection,
    pub state: StateSection,
}

impl ConfigFile {
    /// Build without validation. Only `config::validate` should call this.
    pub(crate) fn new_unchecked(
        pool: PoolSection,
        breaker: BreakerSection,
        queue: QueueSection,
        state: StateSection,
    ) -> Self {
        Self {
            pool,
            breaker,
            queue,
            state,
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_workers: self.pool.max_workers,
            heartbeat_timeout: Duration::from_secs(self.pool.heartbeat_timeout_secs),
            default_adapter: self.pool.default_adapter.clone(),
        }
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            max_attempts: self.breaker.max_attempts,
            max_error_repeats: self.breaker.max_error_repeats,
            oscillation_threshold: self.breaker.oscillation_threshold,
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            root: self.queue_dir(),
            lock_timeout: Duration::from_millis(self.queue.lock_timeout_ms),
        }
    }

    /// `<state.dir>/queue`
    pub fn queue_dir(&self) -> PathBuf {
        self.state.dir.join("queue")
    }

    /// `<state.dir>/ledger`
    pub fn ledger_dir(&self) -> PathBuf {
        self.state.dir.join("ledger")
    }

    /// `<state.dir>/workers`
    pub fn workers_dir(&self) -> PathBuf {
        self.state.dir.join("workers")
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        let raw = RawConfigFile::default();
        Self::new_unchecked(raw.pool, raw.breaker, raw.queue, raw.state)
    }
}

/// `[pool]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolSection {
    /// Upper bound on live (non-terminated) workers. Also caps wave size.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// A worker whose last heartbeat is older than this is reported stale.
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,

    /// Adapter used for bundles that do not name one.
    #[serde(default = "default_adapter")]
    pub default_adapter: String,
}

fn default_max_workers() -> usize {
    4
}

fn default_heartbeat_timeout_secs() -> u64 {
    300
}

fn default_adapter() -> String {
    "process".to_string()
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            default_adapter: default_adapter(),
        }
    }
}

/// `[breaker]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct BreakerSection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_max_error_repeats")]
    pub max_error_repeats: usize,

    #[serde(default = "default_oscillation_threshold")]
    pub oscillation_threshold: usize,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_max_error_repeats() -> usize {
    2
}

fn default_oscillation_threshold() -> usize {
    2
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            max_error_repeats: default_max_error_repeats(),
            oscillation_threshold: default_oscillation_threshold(),
        }
    }
}

/// `[queue]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSection {
    /// Bounded wait for a per-task lock before giving up.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_lock_timeout_ms() -> u64 {
    10_000
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

/// `[state]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StateSection {
    /// Root for queue, ledger and worker state.
    #[serde(default = "default_state_dir")]
    pub dir: PathBuf,

    #[serde(default)]
    pub storage: StorageMode,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".workstream")
}

impl Default for StateSection {
    fn default() -> Self {
        Self {
            dir: default_state_dir(),
            storage: StorageMode::default(),
        }
    }
}
