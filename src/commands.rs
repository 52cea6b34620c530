//! Command Operations
//!
//! The operations exposed to invokers (CLI and event hooks): single-item
//! processing, the space-management sweep, status reporting, and queue
//! maintenance. Mutating operations honor dry-run mode by performing all
//! reads, validations, and space computations inline while skipping
//! filesystem writes, metadata updates, and notifications.

use crate::config::Config;
use crate::dispatcher::{Dispatcher, SubmitOutcome, WorkerSpawner};
use crate::engine::Engine;
use crate::lock::{LockManager, SPACE_MANAGEMENT};
use crate::metadata::MetadataSource;
use crate::notify::Notifier;
use crate::queue::WorkTarget;
use crate::selector::{self, EvictionRoute};
use crate::validator::ItemId;
use crate::{ManagerError, Result};
use tracing::{error, info, warn};

/// Trigger a single-item migration through the dispatcher.
///
/// In dry-run mode the engine runs inline instead, so the operator sees
/// the full evaluation without any worker record or queue entry being
/// written.
pub async fn process<S: WorkerSpawner>(
    config: &Config,
    dispatcher: &Dispatcher<S>,
    metadata: &dyn MetadataSource,
    notifier: &dyn Notifier,
    raw_id: &str,
    dry_run: bool,
) -> Result<()> {
    let id = ItemId::new(raw_id)?;

    if dry_run {
        let engine = Engine::new(config, metadata, notifier, true);
        let report = engine.migrate(&id).await?;
        info!("[DRY RUN] Migration evaluation complete: id={}, outcome={:?}", id, report.outcome);
        return Ok(());
    }

    dispatcher.drain()?;
    match dispatcher.submit(&WorkTarget::Item(id.clone()))? {
        SubmitOutcome::Spawned(pid) => {
            info!("Migration worker spawned: id={}, pid={}", id, pid)
        }
        SubmitOutcome::Queued => info!("Migration request queued: id={}", id),
        SubmitOutcome::AlreadyQueued => {
            info!("Migration request already queued, no-op: id={}", id)
        }
    }
    Ok(())
}

/// Trigger a space-management sweep through the dispatcher.
pub async fn sweep<S: WorkerSpawner>(
    config: &Config,
    dispatcher: &Dispatcher<S>,
    metadata: &dyn MetadataSource,
    notifier: &dyn Notifier,
    dry_run: bool,
) -> Result<()> {
    if dry_run {
        // Inline evaluation; the lock record is itself a filesystem write,
        // so dry-run skips acquisition entirely
        return run_sweep(config, metadata, notifier, true).await;
    }

    dispatcher.drain()?;
    match dispatcher.submit(&WorkTarget::Sweep)? {
        SubmitOutcome::Spawned(pid) => info!("Sweep worker spawned: pid={}", pid),
        SubmitOutcome::Queued => info!("Sweep request queued"),
        SubmitOutcome::AlreadyQueued => info!("Sweep already queued, no-op"),
    }
    Ok(())
}

/// Worker entry point: execute one target to completion, then drain freed
/// slots opportunistically.
pub async fn run_worker<S: WorkerSpawner>(
    config: &Config,
    dispatcher: &Dispatcher<S>,
    metadata: &dyn MetadataSource,
    notifier: &dyn Notifier,
    target_key: &str,
) -> Result<()> {
    let target = WorkTarget::from_key(target_key)?;
    info!("Worker starting: pid={}, target={}", std::process::id(), target);

    let result = match &target {
        WorkTarget::Item(id) => {
            let engine = Engine::new(config, metadata, notifier, false);
            engine.migrate(id).await.map(|report| {
                info!(
                    "Worker finished migration: id={}, outcome={:?}, attempts={}",
                    id, report.outcome, report.attempts
                );
            })
        }
        WorkTarget::Sweep => run_sweep(config, metadata, notifier, false).await,
    };

    if let Err(e) = &result {
        error!("Worker failed: target={}, error={}", target, e);
    }

    // Our slot frees when we exit; hand queued work to it now rather than
    // waiting for the next external invocation
    if let Err(e) = dispatcher.drain() {
        warn!("Post-worker drain failed: {}", e);
    }

    result
}

/// One eviction pass: free fast-tier space until it meets the threshold,
/// oldest finished items first. Guarded by the space-management lock; a
/// concurrently running sweep makes this a logged no-op, not an error.
pub async fn run_sweep(
    config: &Config,
    metadata: &dyn MetadataSource,
    notifier: &dyn Notifier,
    dry_run: bool,
) -> Result<()> {
    let locks = LockManager::new(&config.dispatcher.locks_dir);
    let _guard = if dry_run {
        None
    } else {
        match locks.acquire(SPACE_MANAGEMENT) {
            Ok(guard) => Some(guard),
            Err(ManagerError::LockHeld(holder)) => {
                info!("Sweep already running, skipping: {}", holder);
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    };

    let free = selector::fast_tier_free_space(&config.storage.fast_root)?;
    let threshold = config.space.free_space_threshold;
    info!(
        "Fast-tier space check: free={}MB, threshold={}MB",
        free / 1024 / 1024,
        threshold / 1024 / 1024
    );
    if free >= threshold {
        info!("Fast-tier space sufficient, no eviction needed");
        return Ok(());
    }

    // Snapshot the metadata source and keep only items actually resident
    // under the fast-tier root
    let items: Vec<_> = metadata
        .list_items()
        .await?
        .into_iter()
        .filter(|item| {
            item.fast_path
                .as_ref()
                .map(|p| p.starts_with(&config.storage.fast_root))
                .unwrap_or(false)
        })
        .collect();

    let plan = selector::select_candidates(&items, free, threshold);
    if plan.candidates.is_empty() {
        info!("No eligible items found on the fast tier to evict");
        return Ok(());
    }
    info!(
        "Eviction plan: candidates={}, projected_freed={}MB",
        plan.candidates.len(),
        plan.projected_freed / 1024 / 1024
    );

    let engine = Engine::new(config, metadata, notifier, dry_run);
    let mut evicted = 0usize;
    let mut freed_bytes = 0u64;
    for candidate in &plan.candidates {
        let outcome = match candidate.route {
            EvictionRoute::DropFastCopy => {
                selector::evict_archived(config, metadata, &candidate.item, dry_run).await
            }
            EvictionRoute::FullMigration => {
                engine.migrate(&candidate.item.id).await.map(|_| ())
            }
        };

        match outcome {
            Ok(()) => {
                evicted += 1;
                freed_bytes += candidate.item.size_bytes;
            }
            Err(e) => {
                // Stop the pass rather than churning through a tier that is
                // failing; remaining candidates are untouched
                error!(
                    "Eviction failed, stopping sweep: id={}, error={}",
                    candidate.item.id, e
                );
                break;
            }
        }
    }

    info!(
        "Sweep summary: evicted={}, freed={}MB, projected_free={}MB",
        evicted,
        freed_bytes / 1024 / 1024,
        (free + freed_bytes) / 1024 / 1024
    );
    if let Some(shortfall) = plan.shortfall {
        warn!(
            "Free space still below threshold after exhausting candidates: shortfall={}MB",
            shortfall / 1024 / 1024
        );
    }

    Ok(())
}

/// Print a read-only status snapshot as JSON.
pub fn status<S: WorkerSpawner>(dispatcher: &Dispatcher<S>) -> Result<()> {
    let report = dispatcher.status()?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Force-drain the queue without a new submission.
pub fn drain_queue<S: WorkerSpawner>(dispatcher: &Dispatcher<S>, dry_run: bool) -> Result<()> {
    if dry_run {
        let pending = dispatcher.queue().list()?;
        info!("[DRY RUN] Would drain queue: pending_entries={}", pending.len());
        return Ok(());
    }

    let spawned = dispatcher.drain()?;
    info!("Queue drain complete: workers_spawned={}", spawned);
    Ok(())
}

/// Empty the durable queue unconditionally (operator escape hatch).
pub fn clear_queue<S: WorkerSpawner>(dispatcher: &Dispatcher<S>, dry_run: bool) -> Result<()> {
    if dry_run {
        let pending = dispatcher.queue().list()?;
        info!("[DRY RUN] Would clear queue: entries={}", pending.len());
        return Ok(());
    }

    let removed = dispatcher.queue().clear_all()?;
    info!("Queue cleared: entries_removed={}", removed);
    Ok(())
}
