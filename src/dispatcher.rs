//! Process Dispatcher
//!
//! Bounds the number of concurrently running worker processes and hands
//! queued work to free slots. Workers are fire-and-forget: nothing reports
//! completion back, so liveness is established by probing the recorded pid
//! on every count, and records whose process has exited are purged lazily.
//! A request for an identifier that already has a live worker is enqueued
//! rather than double-spawned.

use crate::lock::{is_process_alive, LockManager, LockRecord, SPACE_MANAGEMENT};
use crate::queue::{DurableQueue, QueueEntry, WorkTarget};
use crate::{ManagerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Persisted record of a spawned worker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub pid: u32,
    pub target: WorkTarget,
    pub started_at: DateTime<Utc>,
}

impl WorkerRecord {
    pub fn running_for(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }
}

/// Spawns a detached worker process for a target. Abstracted so tests can
/// observe dispatch decisions without forking real processes.
pub trait WorkerSpawner {
    fn spawn(&self, target: &WorkTarget) -> Result<u32>;
}

/// Re-executes the current binary with the hidden `worker` subcommand.
pub struct ProcessSpawner {
    pub config_path: Option<String>,
}

impl WorkerSpawner for ProcessSpawner {
    fn spawn(&self, target: &WorkTarget) -> Result<u32> {
        let exe = std::env::current_exe().map_err(|e| {
            ManagerError::DispatchError(format!("Cannot locate own executable: {}", e))
        })?;

        let mut command = std::process::Command::new(exe);
        command
            .arg("worker")
            .arg(target.key())
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null());
        if let Some(config_path) = &self.config_path {
            command.arg("--config").arg(config_path);
        }

        let child = command.spawn().map_err(|e| {
            ManagerError::DispatchError(format!(
                "Failed to spawn worker: target={}, error={}",
                target, e
            ))
        })?;

        Ok(child.id())
    }
}

/// Result of submitting a work request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A worker process was spawned for this request
    Spawned(u32),
    /// All slots busy (or the target is already running); request queued
    Queued,
    /// The target was already queued; nothing changed
    AlreadyQueued,
}

/// Read-only snapshot of dispatcher state.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub live_workers: Vec<WorkerStatus>,
    pub queued: Vec<QueueStatus>,
    pub sweep_lock: Option<SweepLockStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub pid: u32,
    pub target: String,
    pub running_secs: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub target: String,
    pub waiting_secs: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepLockStatus {
    pub holder: String,
    pub held_secs: i64,
}

/// The dispatcher itself: worker records plus the durable queue.
pub struct Dispatcher<S: WorkerSpawner> {
    workers_dir: PathBuf,
    max_workers: usize,
    queue: DurableQueue,
    locks: LockManager,
    spawner: S,
}

impl<S: WorkerSpawner> Dispatcher<S> {
    pub fn new(
        workers_dir: &Path,
        queue_dir: &Path,
        locks_dir: &Path,
        max_workers: usize,
        spawner: S,
    ) -> Self {
        Self {
            workers_dir: workers_dir.to_path_buf(),
            max_workers,
            queue: DurableQueue::new(queue_dir),
            locks: LockManager::new(locks_dir),
            spawner,
        }
    }

    pub fn queue(&self) -> &DurableQueue {
        &self.queue
    }

    fn record_path(&self, record: &WorkerRecord) -> PathBuf {
        self.workers_dir
            .join(format!("{}_{}.json", record.pid, record.target.key()))
    }

    /// Live worker records. Records whose pid is no longer running are
    /// purged as they are encountered; internal bookkeeping alone is never
    /// trusted.
    pub fn live_workers(&self) -> Result<Vec<WorkerRecord>> {
        if !self.workers_dir.exists() {
            return Ok(Vec::new());
        }

        let mut live = Vec::new();
        for entry in std::fs::read_dir(&self.workers_dir).map_err(|e| {
            ManagerError::DispatchError(format!(
                "Failed to read workers directory: path={:?}, error={}",
                self.workers_dir, e
            ))
        })? {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    warn!("Skipping unreadable worker record dir entry: {}", e);
                    continue;
                }
            };
            if path.extension().map(|e| e != "json").unwrap_or(true) {
                continue;
            }

            let record: WorkerRecord = match std::fs::read_to_string(&path)
                .map_err(ManagerError::from)
                .and_then(|c| serde_json::from_str(&c).map_err(ManagerError::from))
            {
                Ok(record) => record,
                Err(e) => {
                    warn!("Removing corrupt worker record: path={:?}, error={}", path, e);
                    let _ = std::fs::remove_file(&path);
                    continue;
                }
            };

            if is_process_alive(record.pid) {
                live.push(record);
            } else {
                debug!(
                    "Purging stale worker record: pid={}, target={}",
                    record.pid, record.target
                );
                let _ = std::fs::remove_file(&path);
            }
        }

        live.sort_by_key(|r| r.started_at);
        Ok(live)
    }

    fn spawn_and_record(&self, target: &WorkTarget) -> Result<u32> {
        std::fs::create_dir_all(&self.workers_dir).map_err(|e| {
            ManagerError::DispatchError(format!(
                "Failed to create workers directory: path={:?}, error={}",
                self.workers_dir, e
            ))
        })?;

        let pid = self.spawner.spawn(target)?;
        let record = WorkerRecord {
            pid,
            target: target.clone(),
            started_at: Utc::now(),
        };

        let path = self.record_path(&record);
        std::fs::write(&path, serde_json::to_string_pretty(&record)?).map_err(|e| {
            ManagerError::DispatchError(format!(
                "Failed to write worker record: path={:?}, error={}",
                path, e
            ))
        })?;

        info!("Spawned worker: pid={}, target={}", pid, target);
        Ok(pid)
    }

    /// Submit a work request: spawn immediately when a slot is free and no
    /// worker is already running this target, otherwise persist it in the
    /// durable queue. Never blocks on worker completion.
    pub fn submit(&self, target: &WorkTarget) -> Result<SubmitOutcome> {
        let live = self.live_workers()?;

        if live.iter().any(|r| r.target == *target) {
            info!(
                "Worker already running for target, queueing instead: target={}",
                target
            );
            return match self.queue.enqueue(target)? {
                true => Ok(SubmitOutcome::Queued),
                false => Ok(SubmitOutcome::AlreadyQueued),
            };
        }

        if live.len() < self.max_workers {
            let pid = self.spawn_and_record(target)?;
            return Ok(SubmitOutcome::Spawned(pid));
        }

        debug!(
            "All worker slots busy ({}/{}), queueing: target={}",
            live.len(),
            self.max_workers,
            target
        );
        match self.queue.enqueue(target)? {
            true => Ok(SubmitOutcome::Queued),
            false => Ok(SubmitOutcome::AlreadyQueued),
        }
    }

    /// Drain the queue into free worker slots, oldest entry first. Returns
    /// the number of workers spawned.
    pub fn drain(&self) -> Result<usize> {
        let live = self.live_workers()?;
        let mut free_slots = self.max_workers.saturating_sub(live.len());
        let mut running: Vec<WorkTarget> = live.into_iter().map(|r| r.target).collect();

        let mut spawned = 0;
        for entry in self.queue.list()? {
            if free_slots == 0 {
                break;
            }

            // A queued duplicate of a still-running target stays in place,
            // keeping its position in line; entries behind it are still
            // promoted into free slots
            if running.contains(&entry.target) {
                debug!(
                    "Queued target still running, leaving in place: target={}",
                    entry.target
                );
                continue;
            }

            self.queue.remove(&entry.target)?;
            self.spawn_and_record(&entry.target)?;
            running.push(entry.target);
            free_slots -= 1;
            spawned += 1;
        }

        if spawned > 0 {
            info!("Drained queue: workers_spawned={}", spawned);
        }
        Ok(spawned)
    }

    /// Read-only status snapshot: live workers, queue contents, and the
    /// sweep lock holder if one exists.
    pub fn status(&self) -> Result<StatusReport> {
        let live_workers = self
            .live_workers()?
            .into_iter()
            .map(|r| WorkerStatus {
                pid: r.pid,
                target: r.target.key(),
                running_secs: r.running_for().num_seconds(),
            })
            .collect();

        let queued = self
            .queue
            .list()?
            .into_iter()
            .map(|e: QueueEntry| QueueStatus {
                target: e.target.key(),
                waiting_secs: e.waiting_for().num_seconds(),
            })
            .collect();

        let sweep_lock = self
            .locks
            .read(SPACE_MANAGEMENT)?
            .filter(|r: &LockRecord| !r.is_stale())
            .map(|r| SweepLockStatus {
                holder: r.instance_id.clone(),
                held_secs: (Utc::now() - r.acquired_at).num_seconds(),
            });

        Ok(StatusReport {
            live_workers,
            queued,
            sweep_lock,
        })
    }
}
