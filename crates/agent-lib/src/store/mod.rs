//! Durable engine state
//!
//! Everything the engine must remember across restarts lives here:
//! - Rolling window of utilization samples (JSON snapshot)
//! - Append-only candidate/decision/review audit log (JSON lines)
//! - Mutable action record table keyed by id (JSON snapshot)
//!
//! Snapshots are written atomically through a temp file and rename.
//! Pattern vectors are persisted by the pattern store itself.

mod actions;
mod audit;
mod window;


pub use actions::ActionTable;
pub use audit::{AuditEntry, AuditLog, DecisionView, PendingDecision};
pub use window::{ResourceWindow, SampleWindowStore, WindowConfig, WindowStats};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// File layout of the state directory
#[derive(Debug, Clone)]
pub struct StatePaths {
    root: PathBuf,
}

impl StatePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn samples(&self) -> PathBuf {
        self.root.join("samples.json")
    }

    pub fn audit_log(&self) -> PathBuf {
        self.root.join("audit.jsonl")
    }

    pub fn actions(&self) -> PathBuf {
        self.root.join("actions.json")
    }

    pub fn patterns(&self) -> PathBuf {
        self.root.join("patterns.json")
    }

    pub fn policy(&self) -> PathBuf {
        self.root.join("policy.json")
    }
}

/// Serialize `value` to `path`, replacing the file atomically
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    let json = serde_json::to_vec(value).context("Failed to serialize state")?;

    let temp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .with_context(|| format!("Failed to create temp file {:?}", temp_path))?;

    file.write_all(&json).context("Failed to write state data")?;
    file.sync_all().context("Failed to sync state file")?;

    std::fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;

    Ok(())
}

/// Read a JSON snapshot, `None` if the file does not exist yet
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }

    let mut file =
        File::open(path).with_context(|| format!("Failed to open state file {:?}", path))?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)
        .with_context(|| format!("Failed to read state file {:?}", path))?;

    let value = serde_json::from_slice(&data)
        .with_context(|| format!("Failed to deserialize state file {:?}", path))?;
    Ok(Some(value))
}
