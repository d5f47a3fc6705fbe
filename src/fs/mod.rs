// src/fs/mod.rs

//! Small filesystem helpers shared by the file-backed stores and the task
//! queue.
//!
//! Every record write goes through [`write_json_atomic`]: serialize into a
//! dot-prefixed temp file in the destination directory, flush it to disk,
//! then `rename` over the target. Readers therefore see either the old
//! record or the new one, never a partial write.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::Result;

/// Atomically replace `path` with the JSON encoding of `value`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes)
}

/// Atomically replace `path` with `contents`.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("path {:?} has no parent directory", path))?;
    fs::create_dir_all(parent).with_context(|| format!("creating dir {:?}", parent))?;

    let tmp = temp_path_for(path);
    {
        let mut file = File::create(&tmp).with_context(|| format!("creating file {:?}", tmp))?;
        file.write_all(contents)
            .with_context(|| format!("writing to file {:?}", tmp))?;
        file.sync_all()
            .with_context(|| format!("syncing file {:?}", tmp))?;
    }

    fs::rename(&tmp, path).with_context(|| format!("renaming {:?} -> {:?}", tmp, path))?;
    Ok(())
}

/// Read and decode a JSON record.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents =
        fs::read(path).with_context(|| format!("reading file {:?}", path))?;
    Ok(serde_json::from_slice(&contents)?)
}

/// Append one line to `path`, creating it if needed, and sync it.
pub fn append_line(path: &Path, line: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating dir {:?}", parent))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {:?} for append", path))?;
    writeln!(file, "{line}").with_context(|| format!("appending to {:?}", path))?;
    file.sync_data()
        .with_context(|| format!("syncing {:?}", path))?;
    Ok(())
}

/// All `*.json` files directly inside `dir`, sorted by file name.
///
/// Temp files (dot-prefixed) are skipped. A missing directory yields an
/// empty list.
pub fn list_json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("reading dir {:?}", dir))? {
        let path = entry?.path();
        let is_json = path.extension().is_some_and(|ext| ext == "json");
        let is_hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'));
        if is_json && !is_hidden && path.is_file() {
            entries.push(path);
        }
    }
    entries.sort();
    Ok(entries)
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("record");
    path.with_file_name(format!(".{name}.tmp"))
}
