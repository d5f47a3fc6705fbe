// src/logging.rs

//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! The filter is resolved in this order:
//! 1. the level passed by the embedding application (if any)
//! 2. `WORKSTREAM_LOG`, read as a full filter directive, so both `debug`
//!    and `workstream::queue=trace,info` work
//! 3. `info`
//!
//! Logs go to STDERR so stdout stays free for whatever the host prints.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, EnvFilter};

use crate::types::LogLevel;

/// Environment variable consulted when no explicit level is given.
pub const LOG_ENV_VAR: &str = "WORKSTREAM_LOG";

/// Install the global subscriber.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(level: Option<LogLevel>) -> Result<()> {
    let env = std::env::var(LOG_ENV_VAR).ok();
    let filter = build_filter(level, env.as_deref());

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
}

/// Filter for an explicit level or, failing that, an env directive.
///
/// A directive that does not parse falls back to `info`.
pub fn build_filter(level: Option<LogLevel>, env_directive: Option<&str>) -> EnvFilter {
    if let Some(level) = level {
        return EnvFilter::new(level.to_string());
    }
    match env_directive.map(str::trim).filter(|d| !d.is_empty()) {
        Some(directive) => EnvFilter::try_new(directive).unwrap_or_else(|e| {
            eprintln!("ignoring invalid {LOG_ENV_VAR}={directive:?}: {e}");
            EnvFilter::new(LogLevel::Info.to_string())
        }),
        None => EnvFilter::new(LogLevel::Info.to_string()),
    }
}

pub fn level_from_log_level(lvl: LogLevel) -> tracing::Level {
    match lvl {
        LogLevel::Error => tracing::Level::ERROR,
        LogLevel::Warn => tracing::Level::WARN,
        LogLevel::Info => tracing::Level::INFO,
        LogLevel::Debug => tracing::Level::DEBUG,
        LogLevel::Trace => tracing::Level::TRACE,
    }
}
