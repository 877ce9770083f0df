//! On-disk state file: one JSON document per peer.
//!
//! The heap is never written out. Arena indices mean nothing after a restart,
//! so the queue is rebuilt from the pending workflows on load.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::ClockSnapshot;
use crate::error::{Error, Result};
use crate::model::{PeerId, WorkflowTask};

pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub version: u32,
    pub peer_id: PeerId,
    pub merkle_clock: ClockSnapshot,
    pub peers: Vec<PeerId>,
    pub workflows: Vec<WorkflowTask>,
}

/// Read and parse a state file. Does not verify the clock chain.
pub fn read_state(path: &Path) -> Result<PersistedState> {
    let content = std::fs::read_to_string(path)?;
    let corrupt = |e: serde_json::Error| {
        Error::CorruptState(format!("unreadable state file {}: {e}", path.display()))
    };

    // Check the version before committing to a shape.
    let raw: serde_json::Value = serde_json::from_str(&content).map_err(corrupt)?;
    let version = raw
        .get("version")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| Error::CorruptState(format!("{}: missing version", path.display())))?;
    if version != u64::from(STATE_VERSION) {
        return Err(Error::UnsupportedStateVersion(
            u32::try_from(version).unwrap_or(u32::MAX),
        ));
    }
    serde_json::from_value(raw).map_err(corrupt)
}

/// Write a state file atomically: temp file in the same directory, flushed to
/// disk, then renamed over the target.
pub fn write_state(path: &Path, state: &PersistedState) -> Result<()> {
    let dir = path.parent().filter(|d| !d.as_os_str().is_empty());
    if let Some(dir) = dir {
        std::fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_vec_pretty(state)?;
    let tmp = sibling(path, "tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&json)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    sync_dir(dir.unwrap_or(Path::new(".")));
    debug!(
        path = %path.display(),
        workflows = state.workflows.len(),
        logical_clock = state.merkle_clock.logical_clock,
        "state saved"
    );
    Ok(())
}

/// Move an untrusted state file out of the way, keeping it for inspection.
pub fn quarantine(path: &Path) -> Result<PathBuf> {
    let target = sibling(path, "corrupt");
    std::fs::rename(path, &target)?;
    Ok(target)
}

/// Persist the rename itself. Not every platform can open a directory, so a
/// failure here is logged and otherwise ignored.
fn sync_dir(dir: &Path) {
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        debug!(dir = %dir.display(), error = %e, "directory sync skipped");
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}
