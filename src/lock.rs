//! Space-Management Lock
//!
//! Cross-process mutual exclusion through filesystem lock records with
//! holder liveness validation. One named lock exists per operation kind;
//! only the space-management sweep takes one, so per-item migrations are
//! never blocked. Acquisition fails fast instead of waiting: a second
//! concurrent sweep is a no-op, not a queued wait. A record whose holder
//! process is no longer alive is treated as abandoned and taken over, so a
//! crashed sweep cannot block future sweeps forever.

use crate::{ManagerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Lock kind guarding the eviction sweep.
pub const SPACE_MANAGEMENT: &str = "space-management";

/// Check whether a process with the given pid is still running.
pub fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        // kill(pid, 0) probes existence without delivering a signal
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }

    #[cfg(not(unix))]
    {
        // Conservative fallback: never break a lock we cannot verify
        warn!(
            "Process existence check not implemented for this platform, assuming pid {} is alive",
            pid
        );
        true
    }
}

/// Persisted lock record content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    /// Process ID of the lock holder
    pub pid: u32,
    /// hostname:pid for unique identification in logs
    pub instance_id: String,
    /// Operation kind being guarded
    pub operation: String,
    pub acquired_at: DateTime<Utc>,
}

impl LockRecord {
    fn new(operation: &str) -> Self {
        let pid = std::process::id();
        Self {
            pid,
            instance_id: format!(
                "{}:{}",
                gethostname::gethostname().to_string_lossy(),
                pid
            ),
            operation: operation.to_string(),
            acquired_at: Utc::now(),
        }
    }

    /// A record is stale when its holder process no longer exists.
    pub fn is_stale(&self) -> bool {
        !is_process_alive(self.pid)
    }
}

/// Handle to a held lock. The record file is removed on release or drop.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    record: LockRecord,
    released: bool,
}

impl LockGuard {
    pub fn record(&self) -> &LockRecord {
        &self.record
    }

    /// Explicitly release the lock, removing the record file.
    pub fn release(mut self) -> Result<()> {
        self.remove_record()?;
        self.released = true;
        Ok(())
    }

    fn remove_record(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(
                    "Released lock: operation={}, path={:?}",
                    self.record.operation, self.path
                );
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Already gone, e.g. removed by an operator
                debug!("Lock record already removed: path={:?}", self.path);
                Ok(())
            }
            Err(e) => Err(ManagerError::LockError(format!(
                "Failed to remove lock record: path={:?}, error={}",
                self.path, e
            ))),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.remove_record() {
                warn!("Failed to release lock on drop: {}", e);
            }
        }
    }
}

/// Manages named lock records under a lock directory.
pub struct LockManager {
    locks_dir: PathBuf,
}

impl LockManager {
    pub fn new(locks_dir: &Path) -> Self {
        Self {
            locks_dir: locks_dir.to_path_buf(),
        }
    }

    fn lock_path(&self, operation: &str) -> PathBuf {
        self.locks_dir.join(format!("{}.lock", operation))
    }

    /// Read the current lock record for an operation, `None` when unheld.
    pub fn read(&self, operation: &str) -> Result<Option<LockRecord>> {
        let path = self.lock_path(operation);
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ManagerError::LockError(format!(
                    "Failed to read lock record: path={:?}, error={}",
                    path, e
                )))
            }
        };

        match serde_json::from_str(&contents) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(
                    "Corrupt lock record, treating as unheld: path={:?}, error={}",
                    path, e
                );
                Ok(None)
            }
        }
    }

    /// Acquire the named lock, failing fast when a live holder exists.
    ///
    /// A record whose holder process is dead is removed and acquisition
    /// proceeds.
    pub fn acquire(&self, operation: &str) -> Result<LockGuard> {
        std::fs::create_dir_all(&self.locks_dir).map_err(|e| {
            ManagerError::LockError(format!(
                "Failed to create lock directory: path={:?}, error={}",
                self.locks_dir, e
            ))
        })?;

        let path = self.lock_path(operation);

        // First attempt, then one retry after breaking a stale record.
        for attempt in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let record = LockRecord::new(operation);
                    file.write_all(serde_json::to_string_pretty(&record)?.as_bytes())
                        .map_err(|e| {
                            let _ = std::fs::remove_file(&path);
                            ManagerError::LockError(format!(
                                "Failed to write lock record: path={:?}, error={}",
                                path, e
                            ))
                        })?;

                    info!(
                        "Acquired lock: operation={}, instance={}, path={:?}",
                        operation, record.instance_id, path
                    );
                    return Ok(LockGuard {
                        path,
                        record,
                        released: false,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    match self.read(operation)? {
                        Some(record) if !record.is_stale() => {
                            debug!(
                                "Lock held by live process: operation={}, holder={}, acquired_at={}",
                                operation, record.instance_id, record.acquired_at
                            );
                            return Err(ManagerError::LockHeld(format!(
                                "{} lock held by {} since {}",
                                operation, record.instance_id, record.acquired_at
                            )));
                        }
                        Some(record) => {
                            info!(
                                "Breaking stale lock from dead holder: operation={}, holder={}, pid={}",
                                operation, record.instance_id, record.pid
                            );
                            let _ = std::fs::remove_file(&path);
                        }
                        None => {
                            // Unreadable or vanished record; clear and retry once
                            warn!(
                                "Removing unreadable lock record: operation={}, path={:?}",
                                operation, path
                            );
                            let _ = std::fs::remove_file(&path);
                        }
                    }

                    if attempt == 1 {
                        return Err(ManagerError::LockHeld(format!(
                            "{} lock contended during stale takeover",
                            operation
                        )));
                    }
                }
                Err(e) => {
                    return Err(ManagerError::LockError(format!(
                        "Failed to create lock record: path={:?}, error={}",
                        path, e
                    )))
                }
            }
        }

        unreachable!("lock acquisition loop returns on every path")
    }
}
