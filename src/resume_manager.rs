use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use log::{info, error, warn};

use crate::error::Result;

/// Which programs a harvest run family has finished or given up on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointState {
    #[serde(default)]
    pub completed_spps: BTreeSet<String>,
    #[serde(default)]
    pub failed_spps: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_index: Option<usize>,
}

impl CheckpointState {
    pub fn is_done(&self, id: &str) -> bool {
        self.completed_spps.contains(id)
    }

    pub fn is_failed(&self, id: &str) -> bool {
        self.failed_spps.contains(id)
    }

    /// Moves `id` into the completed set, clearing any earlier failure.
    pub fn mark_done(&mut self, id: &str) {
        self.failed_spps.remove(id);
        self.completed_spps.insert(id.to_string());
    }

    /// Records a failure. Completed ids are never demoted; returns whether the
    /// id is now in the failed set.
    pub fn mark_failed(&mut self, id: &str) -> bool {
        if self.completed_spps.contains(id) {
            warn!("Ignoring failure for {}: already completed.", id);
            return false;
        }
        self.failed_spps.insert(id.to_string());
        true
    }
}

/// Persistence port for [`CheckpointState`].
pub trait CheckpointStore {
    /// Never fails: a missing or unreadable checkpoint means no prior progress.
    fn load(&mut self) -> CheckpointState;

    /// Replaces the persisted state wholesale.
    fn save(&mut self, state: &CheckpointState) -> Result<()>;
}

/// JSON checkpoint on disk, replaced through a temp file + rename.
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        FileCheckpointStore { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&mut self) -> CheckpointState {
        if !self.path.exists() {
            info!("No checkpoint found at {:?}. Starting fresh.", self.path);
            return CheckpointState::default();
        }
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                error!("Failed to read checkpoint {:?}: {}. Starting fresh.", self.path, e);
                return CheckpointState::default();
            }
        };
        match serde_json::from_str::<CheckpointState>(&content) {
            Ok(state) => {
                info!(
                    "Resuming from checkpoint: {} completed, {} failed.",
                    state.completed_spps.len(),
                    state.failed_spps.len()
                );
                state
            }
            Err(e) => {
                error!("Failed to parse checkpoint {:?}: {}. Starting fresh.", self.path, e);
                CheckpointState::default()
            }
        }
    }

    fn save(&mut self, state: &CheckpointState) -> Result<()> {
        let json = serde_json::to_string_pretty(state)?;
        write_atomically(&self.path, &self.temp_path(), json.as_bytes())
    }
}

/// Writes `bytes` beside `path`, syncs, then renames over `path`.
pub(crate) fn write_atomically(path: &Path, temp: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    {
        let mut file = File::create(temp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(temp, path)?;
    Ok(())
}

/// Keeps the checkpoint in memory; every save is recorded for inspection.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    pub saved: Option<CheckpointState>,
    pub save_count: usize,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: CheckpointState) -> Self {
        MemoryCheckpointStore { saved: Some(state), save_count: 0 }
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&mut self) -> CheckpointState {
        self.saved.clone().unwrap_or_default()
    }

    fn save(&mut self, state: &CheckpointState) -> Result<()> {
        self.saved = Some(state.clone());
        self.save_count += 1;
        Ok(())
    }
}
