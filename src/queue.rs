//! Durable Queue Module
//!
//! On-disk record of work requests that arrived while all worker slots were
//! busy. Each pending entry is one JSON file under the queue directory,
//! named to encode the enqueue time and the target, so a crash or partial
//! write can corrupt at most one entry. Ordering is strictly by enqueue
//! time; enqueueing a target that is already queued is a no-op.

use crate::validator::ItemId;
use crate::{ManagerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// What a queued request or worker is asked to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkTarget {
    /// Migrate one item through the copy-verify-relocate engine
    Item(ItemId),
    /// Run a space-management sweep
    Sweep,
}

impl WorkTarget {
    /// Stable key used in record filenames and for deduplication.
    pub fn key(&self) -> String {
        match self {
            WorkTarget::Item(id) => id.as_str().to_string(),
            WorkTarget::Sweep => "sweep".to_string(),
        }
    }

    /// Parse a key back into a target (inverse of [`WorkTarget::key`]).
    pub fn from_key(key: &str) -> Result<Self> {
        if key == "sweep" {
            Ok(WorkTarget::Sweep)
        } else {
            Ok(WorkTarget::Item(ItemId::new(key)?))
        }
    }
}

impl std::fmt::Display for WorkTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

/// One persisted work request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub target: WorkTarget,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn waiting_for(&self) -> chrono::Duration {
        Utc::now() - self.enqueued_at
    }
}

/// Directory-backed FIFO queue with one durable record per entry.
pub struct DurableQueue {
    dir: PathBuf,
}

impl DurableQueue {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            ManagerError::QueueError(format!(
                "Failed to create queue directory: path={:?}, error={}",
                self.dir, e
            ))
        })
    }

    fn entry_filename(target: &WorkTarget, enqueued_at: &DateTime<Utc>) -> String {
        // Zero-padded millis keep lexicographic order equal to enqueue order
        format!("{:013}_{}.json", enqueued_at.timestamp_millis(), target.key())
    }

    /// Sorted record paths, oldest first.
    fn record_paths(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.dir)
            .map_err(|e| {
                ManagerError::QueueError(format!(
                    "Failed to read queue directory: path={:?}, error={}",
                    self.dir, e
                ))
            })?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
            .collect();

        paths.sort();
        Ok(paths)
    }

    fn read_entry(path: &Path) -> Result<QueueEntry> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ManagerError::QueueError(format!(
                "Failed to read queue entry: path={:?}, error={}",
                path, e
            ))
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            ManagerError::QueueError(format!(
                "Corrupt queue entry: path={:?}, error={}",
                path, e
            ))
        })
    }

    /// Persist a work request. Returns `false` without writing anything when
    /// an entry for the same target already exists.
    pub fn enqueue(&self, target: &WorkTarget) -> Result<bool> {
        self.ensure_dir()?;

        let suffix = format!("_{}.json", target.key());
        for path in self.record_paths()? {
            if path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(&suffix))
                .unwrap_or(false)
            {
                debug!("Target already queued, enqueue is a no-op: target={}", target);
                return Ok(false);
            }
        }

        let entry = QueueEntry {
            target: target.clone(),
            enqueued_at: Utc::now(),
        };
        let final_path = self.dir.join(Self::entry_filename(target, &entry.enqueued_at));
        let temp_path = final_path.with_extension("json.tmp");

        std::fs::write(&temp_path, serde_json::to_string_pretty(&entry)?).map_err(|e| {
            ManagerError::QueueError(format!(
                "Failed to write queue entry: path={:?}, error={}",
                temp_path, e
            ))
        })?;

        // Atomic rename makes the entry visible all-or-nothing
        std::fs::rename(&temp_path, &final_path).map_err(|e| {
            let _ = std::fs::remove_file(&temp_path);
            ManagerError::QueueError(format!(
                "Failed to finalize queue entry: path={:?}, error={}",
                final_path, e
            ))
        })?;

        info!("Enqueued work request: target={}, path={:?}", target, final_path);
        Ok(true)
    }

    /// All pending entries, oldest first. Corrupt records are skipped with a
    /// warning rather than failing the whole listing.
    pub fn list(&self) -> Result<Vec<QueueEntry>> {
        let mut entries = Vec::new();
        for path in self.record_paths()? {
            match Self::read_entry(&path) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Skipping unreadable queue entry: {}", e),
            }
        }
        Ok(entries)
    }

    /// Remove and return the oldest entry, or `None` when the queue is empty.
    pub fn dequeue_oldest(&self) -> Result<Option<QueueEntry>> {
        for path in self.record_paths()? {
            let entry = match Self::read_entry(&path) {
                Ok(entry) => entry,
                Err(e) => {
                    // A corrupt record affects only itself; drop it and move on
                    warn!("Removing corrupt queue entry: {}", e);
                    let _ = std::fs::remove_file(&path);
                    continue;
                }
            };

            std::fs::remove_file(&path).map_err(|e| {
                ManagerError::QueueError(format!(
                    "Failed to remove dequeued entry: path={:?}, error={}",
                    path, e
                ))
            })?;

            debug!("Dequeued work request: target={}", entry.target);
            return Ok(Some(entry));
        }

        Ok(None)
    }

    /// Remove the entry for a specific target, if present.
    pub fn remove(&self, target: &WorkTarget) -> Result<bool> {
        let suffix = format!("_{}.json", target.key());
        for path in self.record_paths()? {
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(&suffix))
                .unwrap_or(false);
            if matches {
                std::fs::remove_file(&path).map_err(|e| {
                    ManagerError::QueueError(format!(
                        "Failed to remove queue entry: path={:?}, error={}",
                        path, e
                    ))
                })?;
                info!("Removed queue entry: target={}", target);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Empty the queue unconditionally. Returns the number of entries
    /// removed.
    pub fn clear_all(&self) -> Result<usize> {
        let mut removed = 0;
        for path in self.record_paths()? {
            std::fs::remove_file(&path).map_err(|e| {
                ManagerError::QueueError(format!(
                    "Failed to clear queue entry: path={:?}, error={}",
                    path, e
                ))
            })?;
            removed += 1;
        }
        if removed > 0 {
            info!("Cleared queue: entries_removed={}", removed);
        }
        Ok(removed)
    }
}
