//! Status history persistence using local JSON storage.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::StoreError;
use crate::portal::{ApplicationIdentifier, StatusRecord};
use crate::settings;

/// Last seen status record per application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct History(BTreeMap<ApplicationIdentifier, StatusRecord>);

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ApplicationIdentifier) -> Option<&StatusRecord> {
        self.0.get(id)
    }

    /// Replace the snapshot for `id`, returning the previous one.
    pub fn record(&mut self, id: ApplicationIdentifier, record: StatusRecord) -> Option<StatusRecord> {
        self.0.insert(id, record)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// File-backed [`History`].
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// History stored as `status_history.json` inside `state_dir`.
    pub fn in_dir(state_dir: &Path) -> Self {
        Self::new(state_dir.join(settings::HISTORY_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load history from disk.
    ///
    /// Returns an empty history if the file doesn't exist or is corrupted.
    pub fn load(&self) -> History {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No status history yet at {:?}", self.path);
                return History::new();
            }
            Err(e) => {
                error!("Failed to read status history: {}, starting fresh", e);
                return History::new();
            }
        };

        match serde_json::from_str::<History>(&content) {
            Ok(history) => {
                debug!("Loaded {} snapshot(s) from {:?}", history.len(), self.path);
                history
            }
            Err(e) => {
                warn!(
                    "Status history is corrupt: {}, every school will be treated as new",
                    e
                );
                History::new()
            }
        }
    }

    /// Save history to disk.
    pub fn save(&self, history: &History) -> Result<(), StoreError> {
        let content = serde_json::to_vec_pretty(history)?;
        settings::write_atomic(&self.path, &content)?;
        debug!("Saved {} snapshot(s) to {:?}", history.len(), self.path);
        Ok(())
    }
}
