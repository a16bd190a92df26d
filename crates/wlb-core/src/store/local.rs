use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{ItemStore, sort_by_due};
use crate::error::{TrackerError, TrackerResult};
use crate::fsutil::write_atomic;
use crate::identity::Identity;
use crate::item::{Item, NewItem};

/// Fixed key the whole item list lives under.
pub const LOCAL_STORE_KEY: &str = "wlb_tasks_v1";

/// Single-user store: one JSON array, read whole and written whole.
#[derive(Debug)]
pub struct LocalStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> TrackerResult<Self> {
        fs::create_dir_all(data_dir)?;
        let path = data_dir.join(format!("{LOCAL_STORE_KEY}.json"));
        info!(file = %path.display(), "opened local item store");
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stored list. Missing, unreadable or malformed data reads
    /// as an empty list; single malformed entries are dropped.
    fn read_all(&self) -> Vec<Item> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Vec::new(),
            Err(err) => {
                warn!(file = %self.path.display(), error = %err, "failed reading item store; treating as empty");
                return Vec::new();
            }
        };

        if raw.trim().is_empty() {
            return Vec::new();
        }

        let entries = match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Array(entries)) => entries,
            Ok(_) => {
                warn!(file = %self.path.display(), "item store is not a JSON array; treating as empty");
                return Vec::new();
            }
            Err(err) => {
                warn!(file = %self.path.display(), error = %err, "item store is corrupt; treating as empty");
                return Vec::new();
            }
        };

        let total = entries.len();
        let items: Vec<Item> = entries
            .into_iter()
            .enumerate()
            .filter_map(|(idx, entry)| match serde_json::from_value::<Item>(entry) {
                Ok(item) => Some(item),
                Err(err) => {
                    warn!(index = idx, error = %err, "dropping malformed stored item");
                    None
                }
            })
            .collect();

        debug!(total, kept = items.len(), "loaded local items");
        items
    }

    fn write_all(&self, items: &[Item]) -> anyhow::Result<()> {
        debug!(count = items.len(), "saving item store");
        let payload = serde_json::to_vec(items)?;
        write_atomic(&self.path, &payload)
    }

    /// Read-modify-write under the store lock. `apply` decides the change;
    /// nothing is written if it fails.
    fn update<T>(&self, apply: impl FnOnce(&mut Vec<Item>) -> TrackerResult<T>) -> TrackerResult<T> {
        let _guard = self.write_lock.lock();
        let mut items = self.read_all();
        let out = apply(&mut items)?;
        sort_by_due(&mut items);
        self.write_all(&items)
            .map_err(|err| TrackerError::persistence(format!("{err:#}")))?;
        Ok(out)
    }
}

fn find_mut<'a>(items: &'a mut [Item], id: &str) -> TrackerResult<&'a mut Item> {
    items
        .iter_mut()
        .find(|item| item.id == id)
        .ok_or_else(|| TrackerError::NotFound(id.to_string()))
}

#[async_trait]
impl ItemStore for LocalStore {
    #[tracing::instrument(skip(self, _owner))]
    async fn fetch(&self, _owner: &Identity) -> TrackerResult<Vec<Item>> {
        let mut items = self.read_all();
        sort_by_due(&mut items);
        Ok(items)
    }

    #[tracing::instrument(skip(self, _owner, item))]
    async fn insert(&self, _owner: &Identity, item: NewItem) -> TrackerResult<Item> {
        let created = item.into_item(None);
        let stored = created.clone();
        self.update(move |items| {
            items.push(created);
            Ok(())
        })?;
        Ok(stored)
    }

    #[tracing::instrument(skip(self, _owner))]
    async fn set_completed(&self, _owner: &Identity, id: &str, completed: bool) -> TrackerResult<()> {
        self.update(|items| {
            find_mut(items, id)?.completed = completed;
            Ok(())
        })
    }

    #[tracing::instrument(skip(self, _owner))]
    async fn set_due(&self, _owner: &Identity, id: &str, due_at: DateTime<Utc>) -> TrackerResult<()> {
        self.update(|items| {
            find_mut(items, id)?.due_at = due_at;
            Ok(())
        })
    }

    #[tracing::instrument(skip(self, _owner))]
    async fn delete(&self, _owner: &Identity, id: &str) -> TrackerResult<()> {
        self.update(|items| {
            let before = items.len();
            items.retain(|item| item.id != id);
            if items.len() == before {
                return Err(TrackerError::NotFound(id.to_string()));
            }
            Ok(())
        })
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
