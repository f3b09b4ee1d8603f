// Monthly upstream call counter, persisted to a small JSON file

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UsageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    // "YYYY-MM"
    pub month: String,
    pub count: u32,
}

impl UsageRecord {
    fn fresh(month: &str) -> Self {
        Self {
            month: month.to_string(),
            count: 0,
        }
    }
}

pub fn current_month() -> String {
    Utc::now().format("%Y-%m").to_string()
}

// Every call that consumes upstream quota goes through `increment` exactly once.
pub trait UsageTracker: Send + Sync + 'static {
    fn current_count(&self) -> u32;

    // Load, bump by one, persist; returns the new count
    fn increment(&self) -> Result<u32, UsageError>;
}

pub struct FileUsageTracker {
    path: PathBuf,
    // Serializes read-modify-write of the file
    lock: Mutex<()>,
}

impl FileUsageTracker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // Missing or malformed files, and records from another month, all read as zero
    fn load(&self, month: &str) -> UsageRecord {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(_) => return UsageRecord::fresh(month),
        };
        match serde_json::from_str::<UsageRecord>(&content) {
            Ok(record) if record.month == month => record,
            Ok(record) => {
                tracing::info!(
                    stored_month = %record.month,
                    month,
                    "usage counter reset for new month"
                );
                UsageRecord::fresh(month)
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "malformed usage file, starting from zero");
                UsageRecord::fresh(month)
            }
        }
    }

    fn save(&self, record: &UsageRecord) -> Result<(), UsageError> {
        let json = serde_json::to_string(record)?;
        fs::write(&self.path, json)?;
        Ok(())
    }

    fn increment_for_month(&self, month: &str) -> Result<u32, UsageError> {
        let _guard = self.lock.lock();
        let mut record = self.load(month);
        record.count += 1;
        self.save(&record)?;
        Ok(record.count)
    }
}

impl UsageTracker for FileUsageTracker {
    fn current_count(&self) -> u32 {
        let _guard = self.lock.lock();
        self.load(&current_month()).count
    }

    fn increment(&self) -> Result<u32, UsageError> {
        self.increment_for_month(&current_month())
    }
}
