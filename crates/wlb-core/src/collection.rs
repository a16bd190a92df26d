//! The in-memory item list for the signed-in user, kept write-through with
//! an [`ItemStore`].
//!
//! Every mutation is persisted first and applied to the cache only once the
//! store confirms it. A rejected write leaves the cache exactly as it was.
//!
//! State sits behind a short-lived lock that is never held across an
//! `.await`, so store calls can suspend without blocking readers. Two guards
//! keep concurrent callers honest:
//!
//! - an item with a write in flight rejects further writes with
//!   [`TrackerError::Busy`];
//! - an epoch counter bumps on identity change and on [`Collection::close`];
//!   results of calls started under an older epoch are dropped.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::datetime::add_minutes;
use crate::error::{TrackerError, TrackerResult};
use crate::identity::{Identity, IdentityProvider};
use crate::item::{Category, Item, NewItem, Title};
use crate::store::{SharedStore, sort_by_due};
use crate::view::{ViewCache, ViewFilter};

/// Result of [`Collection::load`]. Loading never fails outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { count: usize },
    /// Nobody is signed in; the collection is empty.
    SignedOut,
    /// The store could not be read; the previous items were kept.
    Degraded { reason: String },
    /// The identity changed or the collection closed while loading.
    Discarded,
}

#[derive(Debug, Default)]
struct State {
    identity: Option<Identity>,
    items: Vec<Item>,
    in_flight: HashSet<String>,
    epoch: u64,
    revision: u64,
    loading: bool,
    closed: bool,
}

impl State {
    fn same_user(&self, other: Option<&Identity>) -> bool {
        self.identity.as_ref().map(|i| &i.user_id) == other.map(|i| &i.user_id)
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    fn insert_sorted(&mut self, item: Item) {
        let pos = self.items.partition_point(|existing| existing.due_at <= item.due_at);
        self.items.insert(pos, item);
        self.touch();
    }
}

struct Mutation {
    owner: Identity,
    epoch: u64,
    item: Item,
}

pub struct Collection {
    store: SharedStore,
    identity: Arc<dyn IdentityProvider>,
    state: Mutex<State>,
    views: Mutex<ViewCache>,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("store", &self.store.name())
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl Collection {
    pub fn new(store: SharedStore, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            store,
            identity,
            state: Mutex::new(State::default()),
            views: Mutex::new(ViewCache::default()),
        }
    }

    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    /// Snapshot of the cached items, ordered by due time.
    pub fn items(&self) -> Vec<Item> {
        self.state.lock().items.clone()
    }

    pub fn get(&self, id: &str) -> Option<Item> {
        self.state.lock().items.iter().find(|item| item.id == id).cloned()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.state.lock().identity.clone()
    }

    /// Bumps on every change to the cached items.
    pub fn revision(&self) -> u64 {
        self.state.lock().revision
    }

    pub fn is_loading(&self) -> bool {
        self.state.lock().loading
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// The items `filter` selects, recomputed only when the collection, the
    /// filter or the local day changed since the last call.
    pub fn view(&self, filter: &ViewFilter, now: DateTime<Utc>, tz: &Tz) -> Vec<Item> {
        let revision = self.revision();
        let mut views = self.views.lock();
        views
            .get_or_compute(revision, *filter, || self.items(), now, tz)
            .to_vec()
    }

    /// Resolves a full id or a unique id prefix against the cached items.
    pub fn resolve_id(&self, prefix: &str) -> TrackerResult<String> {
        let prefix = prefix.trim();
        let state = self.state.lock();
        if let Some(item) = state.items.iter().find(|item| item.id == prefix) {
            return Ok(item.id.clone());
        }
        let mut matches = state
            .items
            .iter()
            .filter(|item| !prefix.is_empty() && item.id.starts_with(prefix));
        let first = matches
            .next()
            .ok_or_else(|| TrackerError::NotFound(prefix.to_string()))?;
        if matches.next().is_some() {
            return Err(TrackerError::AmbiguousId(prefix.to_string()));
        }
        Ok(first.id.clone())
    }

    /// Reloads from the store for whoever is signed in now.
    ///
    /// No identity empties the collection. A store failure is logged and
    /// keeps whatever was cached; it is reported through the outcome, never
    /// as an error.
    #[instrument(skip(self), fields(store = self.store.name()))]
    pub async fn load(&self) -> LoadOutcome {
        let identity = self.identity.current_identity().await;

        let epoch = {
            let mut state = self.state.lock();
            if state.closed {
                return LoadOutcome::Discarded;
            }
            if !state.same_user(identity.as_ref()) {
                debug!(
                    from = ?state.identity.as_ref().map(|i| i.user_id.as_str()),
                    to = ?identity.as_ref().map(|i| i.user_id.as_str()),
                    "identity changed; resetting collection"
                );
                state.epoch += 1;
                state.items.clear();
                state.in_flight.clear();
                state.touch();
            }
            state.identity = identity.clone();
            state.loading = identity.is_some();
            state.epoch
        };

        let Some(owner) = identity else {
            info!("no identity; collection is empty");
            return LoadOutcome::SignedOut;
        };

        let result = self.store.fetch(&owner).await;

        let mut state = self.state.lock();
        if state.closed || state.epoch != epoch {
            debug!(epoch, current = state.epoch, "discarding late load result");
            return LoadOutcome::Discarded;
        }
        state.loading = false;

        match result {
            Ok(mut items) => {
                sort_by_due(&mut items);
                let count = items.len();
                state.items = items;
                state.touch();
                info!(count, "loaded items");
                LoadOutcome::Loaded { count }
            }
            Err(err) => {
                error!(error = %err, kept = state.items.len(), "loading items failed; keeping previous items");
                LoadOutcome::Degraded {
                    reason: err.to_string(),
                }
            }
        }
    }

    /// Creates, persists, then caches a new item at its due-time position.
    #[instrument(skip(self, title), fields(store = self.store.name()))]
    pub async fn create(&self, title: &str, category: Category, due_at: DateTime<Utc>) -> TrackerResult<Item> {
        let title = Title::parse(title)?;
        if self.is_closed() {
            return Err(TrackerError::Closed);
        }

        let owner = self
            .identity
            .current_identity()
            .await
            .ok_or(TrackerError::NoIdentity)?;
        let epoch = self.state.lock().epoch;

        let new_item = NewItem::new(title, category, due_at, Utc::now());
        let created = self.store.insert(&owner, new_item).await.inspect_err(|err| {
            warn!(error = %err, "store rejected new item");
        })?;

        let mut state = self.state.lock();
        if state.closed || state.epoch != epoch || !state.same_user(Some(&owner)) {
            debug!(id = %created.id, "collection moved on; not caching created item");
            return Ok(created);
        }
        state.insert_sorted(created.clone());
        info!(id = %created.id, "created item");
        Ok(created)
    }

    /// Persists `completed = next` and mirrors it in the cache on success.
    /// Setting the current value is a no-op.
    #[instrument(skip(self))]
    pub async fn set_completed(&self, id: &str, next: bool) -> TrackerResult<()> {
        let Some(mutation) = self.begin_mutation(id, |item| item.completed != next)? else {
            debug!("completed flag already has the requested value");
            return Ok(());
        };

        let result = self.store.set_completed(&mutation.owner, id, next).await;
        self.finish_mutation(id, mutation.epoch, result, |items| {
            if let Some(item) = items.iter_mut().find(|item| item.id == id) {
                item.completed = next;
            }
        })
    }

    pub async fn toggle(&self, id: &str) -> TrackerResult<bool> {
        let current = self
            .get(id)
            .ok_or_else(|| TrackerError::NotFound(id.to_string()))?;
        let next = !current.completed;
        self.set_completed(id, next).await?;
        Ok(next)
    }

    /// Moves an open item's due time forward by `minutes`.
    #[instrument(skip(self))]
    pub async fn snooze(&self, id: &str, minutes: i64) -> TrackerResult<DateTime<Utc>> {
        let mutation = self
            .begin_mutation(id, |_| true)?
            .ok_or_else(|| TrackerError::NotFound(id.to_string()))?;
        if mutation.item.completed {
            self.state.lock().in_flight.remove(id);
            return Err(TrackerError::Completed(id.to_string()));
        }

        let Some(due_at) = add_minutes(mutation.item.due_at, minutes) else {
            self.state.lock().in_flight.remove(id);
            return Err(TrackerError::InvalidTime(format!(
                "snoozing by {minutes} minutes leaves the supported date range"
            )));
        };
        let result = self.store.set_due(&mutation.owner, id, due_at).await;
        self.finish_mutation(id, mutation.epoch, result, |items| {
            if let Some(pos) = items.iter().position(|item| item.id == id) {
                let mut item = items.remove(pos);
                item.due_at = due_at;
                let at = items.partition_point(|existing| existing.due_at <= due_at);
                items.insert(at, item);
            }
        })?;
        Ok(due_at)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> TrackerResult<()> {
        let mutation = self
            .begin_mutation(id, |_| true)?
            .ok_or_else(|| TrackerError::NotFound(id.to_string()))?;

        let result = self.store.delete(&mutation.owner, id).await;
        self.finish_mutation(id, mutation.epoch, result, |items| {
            items.retain(|item| item.id != id);
        })
    }

    /// Reloads whenever the identity provider reports a sign-in or
    /// sign-out. Returns once the provider goes away or the collection is
    /// closed.
    pub async fn follow_identity(&self) {
        let mut rx = self.identity.subscribe();
        while rx.changed().await.is_ok() {
            if self.is_closed() {
                break;
            }
            let signed_in = rx.borrow_and_update().is_some();
            debug!(signed_in, "identity changed");
            self.load().await;
        }
    }

    /// Tears down the collection. Calls still in flight finish against the
    /// store but their results are no longer applied.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.epoch += 1;
            state.loading = false;
            debug!(epoch = state.epoch, "closed collection");
        }
        self.views.lock().invalidate();
    }

    /// Checks preconditions and marks `id` in flight. Returns `None` when
    /// `wanted` says there is nothing to do.
    fn begin_mutation(&self, id: &str, wanted: impl FnOnce(&Item) -> bool) -> TrackerResult<Option<Mutation>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TrackerError::Closed);
        }
        let owner = state.identity.clone().ok_or(TrackerError::NoIdentity)?;
        let item = state
            .items
            .iter()
            .find(|item| item.id == id)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(id.to_string()))?;
        if !wanted(&item) {
            return Ok(None);
        }
        if !state.in_flight.insert(id.to_string()) {
            return Err(TrackerError::Busy(id.to_string()));
        }
        Ok(Some(Mutation {
            owner,
            epoch: state.epoch,
            item,
        }))
    }

    fn finish_mutation(
        &self,
        id: &str,
        epoch: u64,
        result: TrackerResult<()>,
        apply: impl FnOnce(&mut Vec<Item>),
    ) -> TrackerResult<()> {
        let mut state = self.state.lock();
        state.in_flight.remove(id);

        if let Err(err) = result {
            warn!(id, error = %err, "store rejected change; cache left unchanged");
            return Err(err);
        }

        if state.closed || state.epoch != epoch {
            debug!(id, "collection moved on; not applying confirmed change");
            return Ok(());
        }
        apply(&mut state.items);
        state.touch();
        Ok(())
    }
}
