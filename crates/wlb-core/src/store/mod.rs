//! Durable item stores behind one async interface.
//!
//! The collection manager only ever talks to [`ItemStore`]; which backend
//! sits behind it is decided once from configuration.

mod local;
mod memory;
mod remote;

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use local::{LOCAL_STORE_KEY, LocalStore};
pub use memory::MemoryStore;
pub use remote::{RemoteConfig, RemoteStore};

use crate::error::{TrackerError, TrackerResult};
use crate::identity::Identity;
use crate::item::{Item, NewItem};

/// Durable owner of record for items.
///
/// Every mutating call either succeeds completely or returns an error and
/// leaves the store as it was, as far as the backend allows.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// All items visible to `owner`, ordered by due time ascending.
    async fn fetch(&self, owner: &Identity) -> TrackerResult<Vec<Item>>;

    /// Persists a new item and returns it as stored (with its final id).
    async fn insert(&self, owner: &Identity, item: NewItem) -> TrackerResult<Item>;

    async fn set_completed(&self, owner: &Identity, id: &str, completed: bool) -> TrackerResult<()>;

    async fn set_due(&self, owner: &Identity, id: &str, due_at: DateTime<Utc>) -> TrackerResult<()>;

    async fn delete(&self, owner: &Identity, id: &str) -> TrackerResult<()>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    #[default]
    Local,
    Remote,
    Memory,
}

impl FromStr for Backend {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "file" => Ok(Backend::Local),
            "remote" | "supabase" => Ok(Backend::Remote),
            "memory" => Ok(Backend::Memory),
            other => Err(TrackerError::Config(format!(
                "unknown store.backend '{other}' (expected local, remote or memory)"
            ))),
        }
    }
}

pub type SharedStore = Arc<dyn ItemStore>;

/// Sorts by due time; ties keep their existing relative order.
pub fn sort_by_due(items: &mut [Item]) {
    items.sort_by_key(|item| item.due_at);
}
