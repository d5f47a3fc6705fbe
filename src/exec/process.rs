// src/exec/process.rs

//! Shell command adapter.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::breaker::fingerprint;
use crate::errors::Result;
use crate::exec::adapter::{ExecutionAdapter, ExecutionOutcome, ExecutionRequest};

pub const PROCESS_ADAPTER: &str = "process";

/// Runs a bundle's command through the platform shell.
///
/// Stdout is captured and fingerprinted as the attempt's content hash.
/// Stderr is logged at debug; its last non-empty line becomes the error
/// message of a failed attempt.
#[derive(Debug, Clone)]
pub struct ProcessAdapter {
    adapter_type: String,
}

impl ProcessAdapter {
    pub fn new() -> Self {
        Self::named(PROCESS_ADAPTER)
    }

    /// Same adapter registered under another type key.
    pub fn named(adapter_type: impl Into<String>) -> Self {
        Self {
            adapter_type: adapter_type.into(),
        }
    }
}

impl Default for ProcessAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionAdapter for ProcessAdapter {
    fn adapter_type(&self) -> &str {
        &self.adapter_type
    }

    fn check_available(&self) -> bool {
        if cfg!(windows) {
            true
        } else {
            Path::new("/bin/sh").exists()
        }
    }

    fn execute(
        &self,
        request: ExecutionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ExecutionOutcome>> + Send + '_>> {
        Box::pin(run_command(request))
    }
}

async fn run_command(mut request: ExecutionRequest) -> Result<ExecutionOutcome> {
    let Some(command) = request.command.clone() else {
        warn!(run_id = %request.run_id, unit = %request.unit_id, "unit has no command");
        return Ok(ExecutionOutcome::failed(None, "no command configured for unit"));
    };

    info!(
        run_id = %request.run_id,
        unit = %request.unit_id,
        attempt = request.attempt,
        worker_id = %request.worker_id,
        cmd = %command,
        "starting unit process"
    );

    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(&command);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(&command);
        c
    };
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for unit '{}'", request.unit_id))?;

    // Drain both pipes concurrently so neither fills up and blocks the child.
    let stdout_task = child.stdout.take().map(|mut stdout| {
        let unit = request.unit_id.clone();
        tokio::spawn(async move {
            let mut buf = Vec::new();
            match stdout.read_to_end(&mut buf).await {
                Ok(_) => Some(buf),
                Err(e) => {
                    warn!(unit = %unit, error = %e, read_bytes = buf.len(), "failed to read unit stdout; output not fingerprinted");
                    None
                }
            }
        })
    });
    let stderr_task = child.stderr.take().map(|stderr| {
        let unit = request.unit_id.clone();
        tokio::spawn(async move {
            let mut last = None;
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(unit = %unit, "stderr: {}", line);
                if !line.trim().is_empty() {
                    last = Some(line);
                }
            }
            last
        })
    });

    let status = tokio::select! {
        status = child.wait() => status,
        cancel = &mut request.cancel => match cancel {
            Ok(()) => {
                info!(unit = %request.unit_id, worker_id = %request.worker_id, "worker torn down; killing unit process");
                if let Err(e) = child.kill().await {
                    warn!(unit = %request.unit_id, error = %e, "failed to kill unit process");
                }
                return Ok(ExecutionOutcome::canceled());
            }
            // Handle dropped without a teardown: keep waiting.
            Err(_) => child.wait().await,
        },
    };
    let status = status.with_context(|| format!("waiting for process of unit '{}'", request.unit_id))?;

    let stdout = match stdout_task {
        Some(handle) => handle.await.unwrap_or_else(|e| {
            warn!(unit = %request.unit_id, error = %e, "stdout reader task failed");
            None
        }),
        None => Some(Vec::new()),
    };
    let last_stderr = match stderr_task {
        Some(handle) => handle.await.unwrap_or_default(),
        None => None,
    };

    let code = status.code().unwrap_or(-1);
    info!(
        unit = %request.unit_id,
        attempt = request.attempt,
        exit_code = code,
        success = status.success(),
        "unit process exited"
    );

    // A truncated read would fingerprint partial output.
    let content_hash = stdout.as_deref().map(fingerprint);
    if status.success() {
        Ok(ExecutionOutcome::succeeded(code, content_hash))
    } else {
        let error = last_stderr.unwrap_or_else(|| format!("process exited with code {code}"));
        Ok(ExecutionOutcome::failed(Some(code), error).with_content_hash(content_hash))
    }
}
