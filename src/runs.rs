//! The set of active local-optimization runs, persisted between
//! invocations.
//!
//! The generator keeps no in-memory state between manager calls beyond what
//! the caller holds, so the active-run ids live in a small text file: sorted
//! ids, one per line. A file left behind by an earlier experiment (present
//! while the history shows no runs at all) is stale and removed.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use derive_more::{Display, Error};
use tracing::warn;

use crate::history::{History, RunId};

pub const ACTIVE_RUNS_FILE: &str = "active_runs.txt";

#[derive(Debug, Display, Error)]
pub enum RegistryError {
    #[display("failed to read active-run state: {source}")]
    Read { source: io::Error },

    #[display("failed to write active-run state: {source}")]
    Write { source: io::Error },

    #[display("active-run state is corrupt at {line:?}")]
    Corrupt {
        #[error(not(source))]
        line: String,
    },
}

/// Active-run ids backed by `active_runs.txt` in the chosen directory.
#[derive(Debug)]
pub struct RunRegistry {
    path: PathBuf,
    active: BTreeSet<RunId>,
}

impl RunRegistry {
    /// Loads the active set, clearing a stale file when the history carries
    /// no run entries.
    pub fn open(dir: &Path, hist: &History) -> Result<Self, RegistryError> {
        let path = dir.join(ACTIVE_RUNS_FILE);
        let mut active = BTreeSet::new();

        if path.exists() {
            if !hist.has_run_entries() {
                warn!(path = %path.display(), "removing stale active-run state");
                fs::remove_file(&path).map_err(|source| RegistryError::Write { source })?;
            } else {
                let text =
                    fs::read_to_string(&path).map_err(|source| RegistryError::Read { source })?;
                for line in text.lines() {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let id = line.parse::<RunId>().map_err(|_| RegistryError::Corrupt {
                        line: line.to_string(),
                    })?;
                    active.insert(id);
                }
            }
        }

        Ok(Self { path, active })
    }

    pub fn insert(&mut self, run: RunId) {
        self.active.insert(run);
    }

    pub fn remove(&mut self, run: RunId) {
        self.active.remove(&run);
    }

    /// The active ids in ascending order.
    pub fn ids(&self) -> Vec<RunId> {
        self.active.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Writes the active set back to disk.
    pub fn persist(&self) -> Result<(), RegistryError> {
        let mut text = String::new();
        for id in &self.active {
            text.push_str(&id.to_string());
            text.push('\n');
        }
        fs::write(&self.path, text).map_err(|source| RegistryError::Write { source })
    }
}
