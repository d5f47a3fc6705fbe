// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Result, WorkstreamError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = WorkstreamError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(
            raw.pool,
            raw.breaker,
            raw.queue,
            raw.state,
        ))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_pool(cfg)?;
    validate_breaker(cfg)?;
    validate_queue(cfg)?;
    Ok(())
}

fn validate_pool(cfg: &RawConfigFile) -> Result<()> {
    if cfg.pool.max_workers == 0 {
        return Err(WorkstreamError::Config(
            "[pool].max_workers must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.pool.default_adapter.trim().is_empty() {
        return Err(WorkstreamError::Config(
            "[pool].default_adapter must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_breaker(cfg: &RawConfigFile) -> Result<()> {
    let b = &cfg.breaker;
    if b.max_attempts == 0 {
        return Err(WorkstreamError::Config(
            "[breaker].max_attempts must be >= 1 (got 0)".to_string(),
        ));
    }
    if b.max_error_repeats == 0 {
        return Err(WorkstreamError::Config(
            "[breaker].max_error_repeats must be >= 1 (got 0)".to_string(),
        ));
    }
    if b.oscillation_threshold == 0 {
        return Err(WorkstreamError::Config(
            "[breaker].oscillation_threshold must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_queue(cfg: &RawConfigFile) -> Result<()> {
    if cfg.queue.lock_timeout_ms == 0 {
        return Err(WorkstreamError::Config(
            "[queue].lock_timeout_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}
