//! ---
//! renew_section: "01-core-functionality"
//! renew_subsection: "module"
//! renew_type: "source"
//! renew_scope: "code"
//! renew_description: "Bounded persistent log of update attempts."
//! renew_version: "v0.0.0-prealpha"
//! renew_owner: "tbd"
//! ---
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use renew_versioning::ReleaseVersion;

use crate::error::UpdateError;
use crate::fsutil;

/// One finished update attempt as seen by the applier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HistoryRecord {
    pub version: ReleaseVersion,
    pub previous_version: ReleaseVersion,
    pub update_date: DateTime<Utc>,
    #[serde(default)]
    pub release_notes: String,
    pub was_successful: bool,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// JSON file holding the most recent attempts, oldest first.
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    capacity: usize,
    lock: Mutex<()>,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            path: path.into(),
            capacity: capacity.max(1),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every stored record. A missing or unreadable file reads as empty.
    pub fn load(&self) -> Vec<HistoryRecord> {
        let _guard = self.lock.lock();
        self.read_unlocked()
    }

    /// Append `record`, trimming to the newest entries by date.
    ///
    /// Persistence failures are logged and swallowed so an apply outcome is
    /// never changed by a history write.
    pub fn append(&self, record: HistoryRecord) {
        if let Err(err) = self.try_append(record) {
            warn!(path = %self.path.display(), error = %err, "failed to persist update history");
        }
    }

    fn try_append(&self, record: HistoryRecord) -> Result<(), UpdateError> {
        let _guard = self.lock.lock();
        let mut records = self.read_unlocked();
        records.push(record);
        let records = retain_newest(records, self.capacity);
        fsutil::write_json_atomic(&self.path, &records)?;
        debug!(path = %self.path.display(), entries = records.len(), "update history written");
        Ok(())
    }

    fn read_unlocked(&self) -> Vec<HistoryRecord> {
        let body = match fs::read(&self.path) {
            Ok(body) => body,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Vec::new(),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "unable to read update history");
                return Vec::new();
            }
        };
        match serde_json::from_slice(&body) {
            Ok(records) => records,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "update history is corrupt; starting fresh");
                Vec::new()
            }
        }
    }
}

/// Keep the `capacity` most recent records, returned oldest first.
fn retain_newest(mut records: Vec<HistoryRecord>, capacity: usize) -> Vec<HistoryRecord> {
    records.sort_by(|a, b| b.update_date.cmp(&a.update_date));
    records.truncate(capacity);
    records.reverse();
    records
}
