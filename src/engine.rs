//! Copy-Verify-Relocate Engine
//!
//! Moves one item's data from the fast tier to the slow tier through a
//! `PENDING -> COPYING -> VERIFYING -> COMMITTED` state machine with retry.
//! The source is deleted only after the copy has verified and the metadata
//! source has accepted the new storage path; no failure mode leaves the
//! source gone without a verified destination copy. The dispatcher
//! guarantees single-owner access to the item's paths for the duration of a
//! run.

use crate::config::Config;
use crate::metadata::MetadataSource;
use crate::notify::Notifier;
use crate::validator::{self, ItemId};
use crate::{ManagerError, Result};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Terminal outcome of one migration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Data verified on the slow tier, metadata updated, source removed
    Committed,
    /// Slow-tier path already set and fast-tier data gone; nothing to do
    AlreadyMigrated,
    /// Item not eligible (not finished, or no fast-tier data)
    Skipped,
    /// Dry run: all checks performed, no mutation
    DryRun,
}

/// Summary of a completed (or skipped) migration.
#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub id: ItemId,
    pub outcome: MigrationOutcome,
    pub attempts: u32,
    pub bytes_copied: u64,
    pub files_copied: u64,
}

/// Byte and file-count totals for a path, used for copy verification.
///
/// Symlinks are not followed and contribute no bytes, matching whole-file
/// copy semantics: verification compares exactly what the copy produced.
pub fn path_stats(path: &Path) -> Result<(u64, u64)> {
    if path.is_file() {
        let size = std::fs::metadata(path)?.len();
        return Ok((size, 1));
    }

    let mut total_bytes = 0u64;
    let mut file_count = 0u64;
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry.map_err(|e| {
            ManagerError::IoError(format!("Failed to walk {:?}: {}", path, e))
        })?;
        if entry.file_type().is_file() {
            file_count += 1;
            total_bytes += entry.metadata().map(|m| m.len()).map_err(|e| {
                ManagerError::IoError(format!(
                    "Failed to stat {:?}: {}",
                    entry.path(),
                    e
                ))
            })?;
        }
    }
    Ok((total_bytes, file_count))
}

/// Recursively copy a file or directory tree, whole files only.
fn copy_recursive(src: &Path, dest: &Path) -> Result<u64> {
    let mut bytes = 0u64;

    if src.is_file() {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        bytes += std::fs::copy(src, dest)
            .map_err(|e| ManagerError::CopyFailed(format!("{:?} -> {:?}: {}", src, dest, e)))?;
        return Ok(bytes);
    }

    for entry in WalkDir::new(src).follow_links(false) {
        let entry =
            entry.map_err(|e| ManagerError::CopyFailed(format!("walk {:?}: {}", src, e)))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| ManagerError::CopyFailed(format!("prefix {:?}: {}", src, e)))?;
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            bytes += std::fs::copy(entry.path(), &target).map_err(|e| {
                ManagerError::CopyFailed(format!("{:?} -> {:?}: {}", entry.path(), target, e))
            })?;
        }
        // Symlinks and special files are skipped; verification counts files only
    }

    Ok(bytes)
}

/// Remove a possibly-incomplete destination left by a failed attempt.
fn cleanup_destination(path: &Path) {
    if !path.exists() {
        return;
    }
    info!("Cleaning up incomplete destination: path={:?}", path);
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    if let Err(e) = result {
        error!("Destination cleanup failed: path={:?}, error={}", path, e);
    }
}

/// Compare source and destination by file count and total bytes.
fn verify_copy(src: &Path, dest: &Path) -> Result<()> {
    if !src.exists() {
        return Err(ManagerError::VerificationMismatch(format!(
            "source disappeared during verification: {:?}",
            src
        )));
    }
    if !dest.exists() {
        return Err(ManagerError::VerificationMismatch(format!(
            "destination missing: {:?}",
            dest
        )));
    }

    let (src_bytes, src_files) = path_stats(src)?;
    let (dest_bytes, dest_files) = path_stats(dest)?;
    debug!(
        "Verification stats: src_bytes={}, src_files={}, dest_bytes={}, dest_files={}",
        src_bytes, src_files, dest_bytes, dest_files
    );

    if src_bytes == dest_bytes && src_files == dest_files {
        Ok(())
    } else {
        Err(ManagerError::VerificationMismatch(format!(
            "src {} bytes/{} files, dest {} bytes/{} files",
            src_bytes, src_files, dest_bytes, dest_files
        )))
    }
}

/// The per-item migration engine. One instance handles one run; the
/// dispatcher ensures no two instances run for the same identifier.
pub struct Engine<'a> {
    config: &'a Config,
    metadata: &'a dyn MetadataSource,
    notifier: &'a dyn Notifier,
    dry_run: bool,
}

impl<'a> Engine<'a> {
    pub fn new(
        config: &'a Config,
        metadata: &'a dyn MetadataSource,
        notifier: &'a dyn Notifier,
        dry_run: bool,
    ) -> Self {
        Self {
            config,
            metadata,
            notifier,
            dry_run,
        }
    }

    /// Destination path for an item: `<slow_root>/<label>/<sanitized name>`.
    pub fn destination_for(&self, label: &str, name: &str) -> PathBuf {
        self.config
            .storage
            .slow_root
            .join(validator::sanitize_name(label))
            .join(validator::sanitize_name(name))
    }

    /// Run the full copy-verify-relocate state machine for one item.
    pub async fn migrate(&self, id: &ItemId) -> Result<MigrationReport> {
        let started = Instant::now();
        info!("Starting migration: id={}", id);

        // PENDING: fetch the item and check preconditions
        let item = self
            .metadata
            .get_item(id)
            .await?
            .ok_or_else(|| ManagerError::MetadataError(format!("item {} not found", id)))?;

        let fast_path = item.fast_path.clone();
        let source_exists = fast_path.as_ref().map(|p| p.exists()).unwrap_or(false);

        // Idempotence: re-processing an already-migrated item is a no-op
        if item.slow_path.is_some() && !source_exists {
            info!(
                "Item already migrated, nothing to do: id={}, slow_path={:?}",
                id, item.slow_path
            );
            return Ok(MigrationReport {
                id: id.clone(),
                outcome: MigrationOutcome::AlreadyMigrated,
                attempts: 0,
                bytes_copied: 0,
                files_copied: 0,
            });
        }

        let source = match fast_path {
            Some(path) if item.is_migration_eligible() && source_exists => path,
            _ => {
                warn!(
                    "Item not eligible for migration: id={}, completed={}, fast_path_present={}",
                    id,
                    item.completed_at.is_some(),
                    source_exists
                );
                return Ok(MigrationReport {
                    id: id.clone(),
                    outcome: MigrationOutcome::Skipped,
                    attempts: 0,
                    bytes_copied: 0,
                    files_copied: 0,
                });
            }
        };

        // Safety check before anything mutates: the source we will later
        // delete must resolve under the fast-tier root
        let source = validator::validate_path(&source, &[self.config.storage.fast_root.clone()])?;

        let dest = self.destination_for(&item.label, &item.name);
        debug!("Migration paths: id={}, source={:?}, dest={:?}", id, source, dest);

        // Free-space precondition: declared size plus safety margin must fit
        let needed = item.size_bytes.saturating_add(self.config.space.safety_margin);
        let available = free_space(&self.config.storage.slow_root)?;
        if available < needed {
            return Err(ManagerError::InsufficientSpace(format!(
                "slow tier has {} bytes free, item {} needs {} (size {} + margin {})",
                available, id, needed, item.size_bytes, self.config.space.safety_margin
            )));
        }

        if self.dry_run {
            info!(
                "[DRY RUN] Would copy id={} from {:?} to {:?}, verify, update metadata, delete source, notify '{}'",
                id, source, dest, item.label
            );
            return Ok(MigrationReport {
                id: id.clone(),
                outcome: MigrationOutcome::DryRun,
                attempts: 0,
                bytes_copied: 0,
                files_copied: 0,
            });
        }

        // Pre-copy shortcut: a destination left by a previous run may
        // already be complete
        let mut copy_verified = false;
        let mut attempts = 0u32;
        if dest.exists() {
            warn!("Destination already exists: id={}, path={:?}", id, dest);
            match verify_copy(&source, &dest) {
                Ok(()) => {
                    info!("Existing destination verified, skipping copy: id={}", id);
                    copy_verified = true;
                }
                Err(e) => {
                    warn!("Existing destination failed verification ({}), recopying", e);
                    cleanup_destination(&dest);
                }
            }
        }

        // COPYING -> VERIFYING, each attempt independent
        let max_attempts = self.config.engine.copy_retry_attempts.max(1);
        let mut last_error = None;
        while !copy_verified && attempts < max_attempts {
            attempts += 1;
            info!("Copy attempt {}/{}: id={}", attempts, max_attempts, id);

            if attempts > 1 {
                cleanup_destination(&dest);
            }

            let copy_started = Instant::now();
            match copy_recursive(&source, &dest) {
                Ok(bytes) => {
                    info!(
                        "Copy finished: id={}, bytes={}, duration={:.2}s",
                        id,
                        bytes,
                        copy_started.elapsed().as_secs_f64()
                    );
                }
                Err(e) => {
                    error!("Copy failed: id={}, attempt={}, error={}", id, attempts, e);
                    last_error = Some(e);
                    continue;
                }
            }

            if !self.config.engine.verification_enabled {
                copy_verified = true;
                break;
            }

            match verify_copy(&source, &dest) {
                Ok(()) => {
                    info!("Verification successful: id={}, attempt={}", id, attempts);
                    copy_verified = true;
                }
                Err(e) => {
                    error!(
                        "Verification failed: id={}, attempt={}, error={}",
                        id, attempts, e
                    );
                    last_error = Some(e);
                }
            }
        }

        if !copy_verified {
            // FAILED(fatal): discard the untrusted destination, leave the
            // source untouched for a future manual retry
            cleanup_destination(&dest);
            let err = last_error.unwrap_or_else(|| {
                ManagerError::CopyFailed(format!("no copy attempt succeeded for {}", id))
            });
            error!(
                "Migration failed after {} attempts: id={}, error={}",
                attempts, id, err
            );
            return Err(err);
        }

        let (bytes_copied, files_copied) = path_stats(&dest)?;

        // COMMITTED: pause the remote reader, repoint metadata, then source
        // deletion, then notification
        if let Err(e) = self.metadata.pause_item(id).await {
            warn!("Pause request failed before commit: id={}, error={}", id, e);
        }
        if let Err(e) = self.metadata.set_storage_path(id, &dest).await {
            // The verified destination is removed so a failed commit leaves
            // no stray copy; the source remains authoritative
            error!(
                "Metadata update failed, removing destination: id={}, error={}",
                id, e
            );
            cleanup_destination(&dest);
            if let Err(resume_err) = self.metadata.resume_item(id).await {
                warn!(
                    "Resume after failed commit also failed: id={}, error={}",
                    id, resume_err
                );
            }
            return Err(e);
        }

        info!("Deleting fast-tier source: id={}, path={:?}", id, source);
        let delete_result = if source.is_dir() {
            std::fs::remove_dir_all(&source)
        } else {
            std::fs::remove_file(&source)
        };
        if let Err(e) = delete_result {
            // Metadata already points at the slow tier; surface the stray
            // source instead of unwinding a committed migration
            error!(
                "Failed to delete fast-tier source after commit: id={}, path={:?}, error={}",
                id, source, e
            );
        }

        if let Err(e) = self.metadata.resume_item(id).await {
            warn!("Resume after commit failed: id={}, error={}", id, e);
        }

        if let Err(e) = self.notifier.notify(&item.label, id).await {
            warn!("Notification failed (non-fatal): id={}, error={}", id, e);
        }

        info!(
            "Migration committed: id={}, bytes={}, files={}, attempts={}, duration={:.2}s",
            id,
            bytes_copied,
            files_copied,
            attempts,
            started.elapsed().as_secs_f64()
        );

        Ok(MigrationReport {
            id: id.clone(),
            outcome: MigrationOutcome::Committed,
            attempts,
            bytes_copied,
            files_copied,
        })
    }
}

/// Available bytes on the filesystem holding `path`.
pub fn free_space(path: &Path) -> Result<u64> {
    fs2::available_space(path).map_err(|e| {
        ManagerError::IoError(format!(
            "Failed to check free space: path={:?}, error={}",
            path, e
        ))
    })
}
