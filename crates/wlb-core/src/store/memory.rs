use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{ItemStore, sort_by_due};
use crate::error::{TrackerError, TrackerResult};
use crate::identity::Identity;
use crate::item::{Item, NewItem};

/// Process-local store scoped by owner, for throwaway sessions and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Mutex<Vec<Item>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: Vec<Item>) -> Self {
        Self {
            items: Mutex::new(items),
        }
    }

    pub fn snapshot(&self) -> Vec<Item> {
        self.items.lock().clone()
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn fetch(&self, owner: &Identity) -> TrackerResult<Vec<Item>> {
        let mut out: Vec<Item> = self
            .items
            .lock()
            .iter()
            .filter(|item| item.owner_id.as_deref().is_none_or(|id| id == owner.user_id))
            .cloned()
            .collect();
        sort_by_due(&mut out);
        Ok(out)
    }

    async fn insert(&self, owner: &Identity, item: NewItem) -> TrackerResult<Item> {
        let created = item.into_item(Some(owner.user_id.clone()));
        self.items.lock().push(created.clone());
        Ok(created)
    }

    async fn set_completed(&self, _owner: &Identity, id: &str, completed: bool) -> TrackerResult<()> {
        let mut items = self.items.lock();
        let item = items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| TrackerError::NotFound(id.to_string()))?;
        item.completed = completed;
        Ok(())
    }

    async fn set_due(&self, _owner: &Identity, id: &str, due_at: DateTime<Utc>) -> TrackerResult<()> {
        let mut items = self.items.lock();
        let item = items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| TrackerError::NotFound(id.to_string()))?;
        item.due_at = due_at;
        Ok(())
    }

    async fn delete(&self, _owner: &Identity, id: &str) -> TrackerResult<()> {
        let mut items = self.items.lock();
        let before = items.len();
        items.retain(|item| item.id != id);
        if items.len() == before {
            return Err(TrackerError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
