//! Eviction Selector
//!
//! Decides which finished items leave the fast tier when free space drops
//! below the configured threshold. Selection is deterministic over a fixed
//! metadata snapshot: oldest completion timestamp first, ties broken by
//! identifier, accumulating declared sizes until the projected free space
//! reaches the threshold. Items past the cutoff are never touched.
//!
//! Selected items that already have a slow-tier archive copy are evicted in
//! place (fast copy deleted, metadata repointed); items never archived go
//! through the full copy-verify-relocate engine instead.

use crate::config::Config;
use crate::metadata::{Item, MetadataSource};
use crate::validator;
use crate::Result;
use std::path::Path;
use tracing::{debug, info, warn};

/// How a selected item should be removed from the fast tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvictionRoute {
    /// Slow-tier copy already exists: delete fast copy, repoint metadata
    DropFastCopy,
    /// Never archived: run the full migration engine first
    FullMigration,
}

/// One selected eviction candidate.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub item: Item,
    pub route: EvictionRoute,
}

/// Result of a selection pass over a metadata snapshot.
#[derive(Debug, Clone)]
pub struct SelectionPlan {
    pub candidates: Vec<Candidate>,
    /// Sum of declared sizes of the selected items
    pub projected_freed: u64,
    /// Bytes still missing after exhausting all eligible items, if any
    pub shortfall: Option<u64>,
}

impl SelectionPlan {
    pub fn is_satisfied(&self) -> bool {
        self.shortfall.is_none()
    }
}

/// Select the minimal ordered set of items to free enough fast-tier space.
///
/// Pure function over the snapshot: given the same items, free space, and
/// threshold it always returns the same plan. Returns an empty plan when
/// free space already meets the threshold.
pub fn select_candidates(items: &[Item], free_bytes: u64, threshold: u64) -> SelectionPlan {
    if free_bytes >= threshold {
        return SelectionPlan {
            candidates: Vec::new(),
            projected_freed: 0,
            shortfall: None,
        };
    }

    let needed = threshold - free_bytes;
    debug!(
        "Selecting eviction candidates: free={}, threshold={}, needed={}",
        free_bytes, threshold, needed
    );

    let mut eligible: Vec<&Item> = items.iter().filter(|i| i.is_sweep_eligible()).collect();
    // Oldest completed first; identifier breaks ties for determinism
    eligible.sort_by(|a, b| {
        a.completed_at
            .cmp(&b.completed_at)
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut candidates = Vec::new();
    let mut freed = 0u64;
    for item in eligible {
        if freed >= needed {
            break;
        }
        let route = if item.is_archived() {
            EvictionRoute::DropFastCopy
        } else {
            EvictionRoute::FullMigration
        };
        freed = freed.saturating_add(item.size_bytes);
        candidates.push(Candidate {
            item: item.clone(),
            route,
        });
    }

    let shortfall = if freed >= needed {
        None
    } else {
        Some(needed - freed)
    };

    SelectionPlan {
        candidates,
        projected_freed: freed,
        shortfall,
    }
}

/// Evict an already-archived item from the fast tier: repoint metadata at
/// the slow-tier copy, then delete the fast-tier data. No re-copy happens;
/// the archive copy was verified when it was first migrated.
pub async fn evict_archived(
    config: &Config,
    metadata: &dyn MetadataSource,
    item: &Item,
    dry_run: bool,
) -> Result<()> {
    let slow_path = item.slow_path.as_ref().ok_or_else(|| {
        crate::ManagerError::MetadataError(format!(
            "evict_archived called for unarchived item {}",
            item.id
        ))
    })?;
    let fast_path = match &item.fast_path {
        Some(p) => p.clone(),
        None => {
            info!("Fast-tier copy already gone: id={}", item.id);
            return Ok(());
        }
    };

    if !fast_path.exists() {
        // Metadata may lag a prior eviction; just make sure it points at
        // the archive
        info!(
            "Fast-tier path missing on disk, repointing metadata only: id={}",
            item.id
        );
        if !dry_run {
            metadata.set_storage_path(&item.id, slow_path).await?;
        }
        return Ok(());
    }

    // Safety check before deletion, same rule as the engine
    let fast_path =
        validator::validate_path(&fast_path, &[config.storage.fast_root.clone()])?;

    if dry_run {
        info!(
            "[DRY RUN] Would evict id={}: repoint metadata to {:?}, delete {:?}",
            item.id, slow_path, fast_path
        );
        return Ok(());
    }

    info!(
        "Evicting archived item from fast tier: id={}, fast={:?}, slow={:?}",
        item.id, fast_path, slow_path
    );
    if let Err(e) = metadata.pause_item(&item.id).await {
        warn!("Pause request failed before eviction: id={}, error={}", item.id, e);
    }
    metadata.set_storage_path(&item.id, slow_path).await?;

    let result = if fast_path.is_dir() {
        std::fs::remove_dir_all(&fast_path)
    } else {
        std::fs::remove_file(&fast_path)
    };
    match result {
        Ok(()) => info!("Deleted fast-tier copy: id={}, path={:?}", item.id, fast_path),
        Err(e) => warn!(
            "Failed to delete fast-tier copy after repointing: id={}, path={:?}, error={}",
            item.id, fast_path, e
        ),
    }

    if let Err(e) = metadata.resume_item(&item.id).await {
        warn!("Resume after eviction failed: id={}, error={}", item.id, e);
    }

    Ok(())
}

/// Free-space probe for the fast tier root.
pub fn fast_tier_free_space(fast_root: &Path) -> Result<u64> {
    crate::engine::free_space(fast_root)
}
