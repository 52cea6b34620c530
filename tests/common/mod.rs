//! Shared test doubles: an in-memory metadata source and a recording
//! notifier.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tiermover::metadata::{Item, MetadataSource};
use tiermover::notify::Notifier;
use tiermover::validator::ItemId;
use tiermover::{ManagerError, Result};

/// In-memory metadata source backed by a mutex-guarded map.
pub struct InMemoryMetadata {
    items: Mutex<HashMap<ItemId, Item>>,
    pub path_updates: Mutex<Vec<(ItemId, PathBuf)>>,
    pub fail_path_updates: bool,
}

impl InMemoryMetadata {
    pub fn new(items: Vec<Item>) -> Self {
        Self {
            items: Mutex::new(items.into_iter().map(|i| (i.id.clone(), i)).collect()),
            path_updates: Mutex::new(Vec::new()),
            fail_path_updates: false,
        }
    }

    pub fn failing_updates(items: Vec<Item>) -> Self {
        Self {
            fail_path_updates: true,
            ..Self::new(items)
        }
    }

    pub fn item(&self, id: &ItemId) -> Option<Item> {
        self.items.lock().unwrap().get(id).cloned()
    }
}

#[async_trait]
impl MetadataSource for InMemoryMetadata {
    async fn list_items(&self) -> Result<Vec<Item>> {
        Ok(self.items.lock().unwrap().values().cloned().collect())
    }

    async fn get_item(&self, id: &ItemId) -> Result<Option<Item>> {
        Ok(self.items.lock().unwrap().get(id).cloned())
    }

    async fn set_storage_path(&self, id: &ItemId, path: &Path) -> Result<()> {
        if self.fail_path_updates {
            return Err(ManagerError::MetadataError(
                "injected storage path failure".to_string(),
            ));
        }
        let mut items = self.items.lock().unwrap();
        let item = items
            .get_mut(id)
            .ok_or_else(|| ManagerError::MetadataError(format!("unknown item {}", id)))?;
        item.slow_path = Some(path.to_path_buf());
        self.path_updates
            .lock()
            .unwrap()
            .push((id.clone(), path.to_path_buf()));
        Ok(())
    }

    async fn pause_item(&self, _id: &ItemId) -> Result<()> {
        Ok(())
    }

    async fn resume_item(&self, _id: &ItemId) -> Result<()> {
        Ok(())
    }
}

/// Notifier that records every call instead of talking to a service.
#[derive(Default)]
pub struct RecordingNotifier {
    pub calls: Mutex<Vec<(String, ItemId)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, label: &str, id: &ItemId) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((label.to_string(), id.clone()));
        Ok(())
    }
}

pub fn test_id(c: char) -> ItemId {
    ItemId::new(&c.to_string().repeat(40)).unwrap()
}

pub fn test_item(c: char, fast_path: Option<PathBuf>, slow_path: Option<PathBuf>) -> Item {
    Item {
        id: test_id(c),
        name: format!("item {}", c),
        label: "sonarr".to_string(),
        size_bytes: 64,
        file_count: 1,
        fast_path,
        slow_path,
        completed_at: Some(Utc.timestamp_opt(1_700_000_000, 0).unwrap()),
        loaded_at: Utc::now(),
    }
}
