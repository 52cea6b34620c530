//! Item Metadata Source
//!
//! The remote system of record for download items. The core never caches
//! item records beyond one operation's lifetime: every migration and every
//! sweep re-reads from the source, and relocation bookkeeping is written
//! back through `set_storage_path`.

use crate::validator::ItemId;
use crate::{ManagerError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A download item as reported by the metadata source.
///
/// Treated as an external, mutable, remotely-read record; a freshly-updated
/// storage path may not be instantly visible on the next read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    /// Display name (unsanitized; never used directly as a path segment)
    pub name: String,
    /// Category label routing the item to a slow-tier subdirectory and a
    /// notification service
    pub label: String,
    pub size_bytes: u64,
    pub file_count: u64,
    /// Fast-tier data path; `None` once the item lives only on the slow tier
    pub fast_path: Option<PathBuf>,
    /// Slow-tier archive path; `None` until the first successful migration
    pub slow_path: Option<PathBuf>,
    /// Unset until the download finishes
    pub completed_at: Option<DateTime<Utc>>,
    pub loaded_at: DateTime<Utc>,
}

impl Item {
    /// An item may be migrated only once it has finished downloading and
    /// still has data on the fast tier.
    pub fn is_migration_eligible(&self) -> bool {
        self.completed_at.is_some()
            && self
                .fast_path
                .as_ref()
                .map(|p| !p.as_os_str().is_empty())
                .unwrap_or(false)
    }

    /// Sweep selection only considers finished items still resident on the
    /// fast tier; whether the item was previously archived decides the
    /// eviction route, not eligibility.
    pub fn is_sweep_eligible(&self) -> bool {
        self.is_migration_eligible()
    }

    /// True once the slow tier holds an archive copy from a prior migration.
    pub fn is_archived(&self) -> bool {
        self.slow_path.is_some()
    }
}

/// Interface to the remote item metadata store.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// List all known items with their current attributes.
    async fn list_items(&self) -> Result<Vec<Item>>;

    /// Fetch a single item, `None` when the identifier is unknown.
    async fn get_item(&self, id: &ItemId) -> Result<Option<Item>>;

    /// Update the item's authoritative storage path after a relocation.
    async fn set_storage_path(&self, id: &ItemId, path: &Path) -> Result<()>;

    /// Pause remote access to the item's data before its path changes.
    async fn pause_item(&self, id: &ItemId) -> Result<()>;

    /// Resume remote access once the relocation is committed.
    async fn resume_item(&self, id: &ItemId) -> Result<()>;
}

/// HTTP client for the metadata API.
pub struct RemoteMetadataClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct StoragePathUpdate<'a> {
    path: &'a Path,
}

impl RemoteMetadataClient {
    pub fn new(base_url: &str, timeout: std::time::Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ManagerError::ConfigError(format!("Failed to build metadata HTTP client: {}", e))
            })?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl MetadataSource for RemoteMetadataClient {
    async fn list_items(&self) -> Result<Vec<Item>> {
        let url = format!("{}/items", self.base_url);
        debug!("Listing items: url={}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ManagerError::MetadataError(format!("List request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| ManagerError::MetadataError(format!("List returned error: {}", e)))?;

        response
            .json()
            .await
            .map_err(|e| ManagerError::MetadataError(format!("Invalid item list payload: {}", e)))
    }

    async fn get_item(&self, id: &ItemId) -> Result<Option<Item>> {
        let url = format!("{}/items/{}", self.base_url, id);
        debug!("Fetching item: id={}, url={}", id, url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ManagerError::MetadataError(format!("Get request failed: {}", e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = response
            .error_for_status()
            .map_err(|e| ManagerError::MetadataError(format!("Get returned error: {}", e)))?;

        let item = response
            .json()
            .await
            .map_err(|e| ManagerError::MetadataError(format!("Invalid item payload: {}", e)))?;

        Ok(Some(item))
    }

    async fn set_storage_path(&self, id: &ItemId, path: &Path) -> Result<()> {
        let url = format!("{}/items/{}/storage-path", self.base_url, id);
        debug!("Updating storage path: id={}, path={:?}", id, path);

        self.client
            .post(&url)
            .json(&StoragePathUpdate { path })
            .send()
            .await
            .map_err(|e| {
                ManagerError::MetadataError(format!("Storage path update failed: {}", e))
            })?
            .error_for_status()
            .map_err(|e| {
                ManagerError::MetadataError(format!("Storage path update rejected: {}", e))
            })?;

        Ok(())
    }

    async fn pause_item(&self, id: &ItemId) -> Result<()> {
        self.post_lifecycle(id, "pause").await
    }

    async fn resume_item(&self, id: &ItemId) -> Result<()> {
        self.post_lifecycle(id, "resume").await
    }
}

impl RemoteMetadataClient {
    async fn post_lifecycle(&self, id: &ItemId, action: &str) -> Result<()> {
        let url = format!("{}/items/{}/{}", self.base_url, id, action);
        debug!("Item lifecycle request: id={}, action={}", id, action);

        self.client
            .post(&url)
            .send()
            .await
            .map_err(|e| {
                ManagerError::MetadataError(format!("Item {} request failed: {}", action, e))
            })?
            .error_for_status()
            .map_err(|e| {
                ManagerError::MetadataError(format!("Item {} rejected: {}", action, e))
            })?;

        Ok(())
    }
}
