//! Keyed store of server-owned resources.
//!
//! Every change to a cached value goes through [`EntityCache::put`] or
//! [`EntityCache::mark_stale`] (the fetch bookkeeping helpers apply their
//! results through the same paths), so subscribers observe every transition.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use chrono::{DateTime, Utc};
use shared::domain::{ClusterId, ClusterStatus};
use tracing::{debug, trace};

use crate::error::ConsoleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Analytics,
    Clusters,
    Assessments,
    Approvals,
    Knowledge,
    SchemaMappings,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Analytics => "analytics",
            ResourceKind::Clusters => "clusters",
            ResourceKind::Assessments => "assessments",
            ResourceKind::Approvals => "approvals",
            ResourceKind::Knowledge => "knowledge",
            ResourceKind::SchemaMappings => "schema-mappings",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource type plus canonical parameters. Parameters live in an ordered
/// map, so insertion order never affects equality or hashing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    kind: ResourceKind,
    params: BTreeMap<String, String>,
}

impl ResourceKey {
    pub const ID_PARAM: &'static str = "id";

    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn analytics() -> Self {
        Self::new(ResourceKind::Analytics)
    }

    pub fn clusters(status: Option<ClusterStatus>) -> Self {
        let key = Self::new(ResourceKind::Clusters);
        match status {
            Some(status) => key.with_param("status", status.as_str()),
            None => key,
        }
    }

    /// Single cluster by id. Shares the `clusters` kind so that type-wide
    /// invalidation covers it.
    pub fn cluster(id: &ClusterId) -> Self {
        Self::new(ResourceKind::Clusters).with_param(Self::ID_PARAM, id.as_str())
    }

    pub fn assessments(cluster_id: Option<&ClusterId>) -> Self {
        let key = Self::new(ResourceKind::Assessments);
        match cluster_id {
            Some(cluster_id) => key.with_param("cluster_id", cluster_id.as_str()),
            None => key,
        }
    }

    pub fn pending_approvals() -> Self {
        Self::new(ResourceKind::Approvals).with_param("status", ClusterStatus::Pending.as_str())
    }

    pub fn knowledge() -> Self {
        Self::new(ResourceKind::Knowledge)
    }

    pub fn schema_mappings() -> Self {
        Self::new(ResourceKind::SchemaMappings)
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind.as_str())?;
        if self.params.is_empty() {
            return Ok(());
        }
        f.write_str("{")?;
        for (index, (name, value)) in self.params.iter().enumerate() {
            if index > 0 {
                f.write_str(",")?;
            }
            write!(f, "{name}={value}")?;
        }
        f.write_str("}")
    }
}

/// Selects cached keys for invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPattern {
    /// Every key of the kind, whatever its parameters.
    Kind(ResourceKind),
    /// One key, parameters included.
    Exact(ResourceKey),
}

impl KeyPattern {
    pub fn matches(&self, key: &ResourceKey) -> bool {
        match self {
            KeyPattern::Kind(kind) => key.kind == *kind,
            KeyPattern::Exact(exact) => exact == key,
        }
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPattern::Kind(kind) => write!(f, "{kind}(*)"),
            KeyPattern::Exact(key) => write!(f, "{key}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    Fetching,
    Errored,
}

/// Snapshot of one cache entry as seen by readers.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: Option<V>,
    pub freshness: Freshness,
    pub fetched_at: Option<DateTime<Utc>>,
    pub last_error: Option<ConsoleError>,
}

impl<V> CacheEntry<V> {
    /// Fresh and, when a maximum age is given, younger than it.
    pub fn is_fresh(&self, max_age: Option<Duration>) -> bool {
        if self.freshness != Freshness::Fresh {
            return false;
        }
        match (max_age, self.fetched_at) {
            (None, _) => true,
            (Some(max_age), Some(fetched_at)) => {
                let age = Utc::now().signed_duration_since(fetched_at);
                age.to_std().map(|age| age < max_age).unwrap_or(true)
            }
            (Some(_), None) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheChange {
    Updated,
    Stale,
    Errored,
}

#[derive(Debug, Clone)]
pub struct CacheEvent {
    pub key: ResourceKey,
    pub change: CacheChange,
}

type Callback = Arc<dyn Fn(&CacheEvent) + Send + Sync>;

struct Slot<V> {
    value: Option<V>,
    freshness: Freshness,
    fetched_at: Option<DateTime<Utc>>,
    last_error: Option<ConsoleError>,
    /// Sequences at or below this were issued before the slot existed.
    created_seq: u64,
    /// Last sequence number handed out for this key.
    issued_seq: u64,
    /// Sequence number of the write currently held in `value`.
    applied_seq: u64,
    /// Fetches numbered at or below this started before the last invalidation.
    invalidated_through: u64,
    in_flight: usize,
    subscribers: HashMap<u64, Callback>,
}

impl<V> Slot<V> {
    fn empty(floor: u64) -> Self {
        Self {
            value: None,
            freshness: Freshness::Stale,
            fetched_at: None,
            last_error: None,
            created_seq: floor,
            issued_seq: floor,
            applied_seq: floor,
            invalidated_through: floor,
            in_flight: 0,
            subscribers: HashMap::new(),
        }
    }

    /// Whether a fetch numbered `seq` was started for this slot rather than
    /// for one that was dropped under the same key.
    fn owns(&self, seq: u64) -> bool {
        seq > self.created_seq
    }

    fn callbacks(&self) -> Vec<Callback> {
        self.subscribers.values().cloned().collect()
    }

    /// Stores a value under `seq`. Stays stale when the write predates the
    /// last invalidation.
    fn apply(&mut self, seq: u64, value: V) {
        self.value = Some(value);
        self.applied_seq = seq;
        self.fetched_at = Some(Utc::now());
        self.last_error = None;
        self.freshness = if seq <= self.invalidated_through {
            Freshness::Stale
        } else if self.in_flight > 0 && self.issued_seq > seq {
            Freshness::Fetching
        } else {
            Freshness::Fresh
        };
    }
}

struct Store<V> {
    slots: HashMap<ResourceKey, Slot<V>>,
    /// Store-wide, so a key that is dropped and recreated never reuses a
    /// number still carried by an old fetch.
    last_seq: u64,
    next_subscriber_id: u64,
}

impl<V> Store<V> {
    fn slot(&mut self, key: &ResourceKey) -> &mut Slot<V> {
        let floor = self.last_seq;
        self.slots
            .entry(key.clone())
            .or_insert_with(|| Slot::empty(floor))
    }

    /// Hands out the next sequence number for `key`, creating its slot.
    fn issue(&mut self, key: &ResourceKey) -> (u64, &mut Slot<V>) {
        let floor = self.last_seq;
        self.last_seq += 1;
        let seq = self.last_seq;
        let slot = self
            .slots
            .entry(key.clone())
            .or_insert_with(|| Slot::empty(floor));
        slot.issued_seq = seq;
        (seq, slot)
    }
}

/// Outcome of handing a finished fetch back to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchApplied {
    Applied,
    /// A later write already landed; the result was dropped.
    Superseded,
    /// The entry was torn down while the fetch was in flight.
    Discarded,
}

pub struct EntityCache<V> {
    store: Arc<Mutex<Store<V>>>,
}

impl<V> Clone for EntityCache<V> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<V> Default for EntityCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> EntityCache<V> {
    pub fn new() -> Self {
        Self {
            store: Arc::new(Mutex::new(Store {
                slots: HashMap::new(),
                last_seq: 0,
                next_subscriber_id: 1,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Store<V>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(callbacks: Vec<Callback>, key: &ResourceKey, change: CacheChange) {
        if callbacks.is_empty() {
            return;
        }
        let event = CacheEvent {
            key: key.clone(),
            change,
        };
        for callback in callbacks {
            callback(&event);
        }
    }

    /// Replaces the value, marks it fresh and notifies subscribers. In-flight
    /// fetches that started earlier can no longer overwrite it.
    pub fn put(&self, key: ResourceKey, value: V) {
        let callbacks = {
            let mut store = self.lock();
            let (seq, slot) = store.issue(&key);
            slot.apply(seq, value);
            slot.callbacks()
        };
        trace!(%key, "cache put");
        Self::notify(callbacks, &key, CacheChange::Updated);
    }

    /// Flips the entry to stale, keeping its value. Returns `false` (and
    /// notifies nobody) when the entry is absent or already stale.
    pub fn mark_stale(&self, key: &ResourceKey) -> bool {
        let callbacks = {
            let mut store = self.lock();
            let Some(slot) = store.slots.get_mut(key) else {
                return false;
            };
            if slot.freshness == Freshness::Stale {
                return false;
            }
            slot.freshness = Freshness::Stale;
            slot.invalidated_through = slot.issued_seq;
            slot.callbacks()
        };
        debug!(%key, "cache entry marked stale");
        Self::notify(callbacks, key, CacheChange::Stale);
        true
    }

    /// Marks every cached key matching `pattern` stale. Returns the keys that
    /// actually changed.
    pub fn invalidate(&self, pattern: &KeyPattern) -> Vec<ResourceKey> {
        let mut matching: Vec<ResourceKey> = self
            .lock()
            .slots
            .keys()
            .filter(|key| pattern.matches(key))
            .cloned()
            .collect();
        matching.sort();
        matching.retain(|key| self.mark_stale(key));
        matching
    }

    /// Registers `callback` for every change to `key`, creating an empty
    /// entry if none exists yet.
    pub fn subscribe<F>(&self, key: ResourceKey, callback: F) -> Subscription
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
        V: Send + 'static,
    {
        let id = {
            let mut store = self.lock();
            let id = store.next_subscriber_id;
            store.next_subscriber_id += 1;
            store
                .slot(&key)
                .subscribers
                .insert(id, Arc::new(callback));
            id
        };

        let store: Weak<Mutex<Store<V>>> = Arc::downgrade(&self.store);
        let release_key = key.clone();
        Subscription {
            key,
            release: Some(Box::new(move || {
                if let Some(store) = store.upgrade() {
                    let mut store = store.lock().unwrap_or_else(PoisonError::into_inner);
                    if let Some(slot) = store.slots.get_mut(&release_key) {
                        slot.subscribers.remove(&id);
                    }
                }
            })),
        }
    }

    pub fn subscriber_count(&self, key: &ResourceKey) -> usize {
        self.lock()
            .slots
            .get(key)
            .map_or(0, |slot| slot.subscribers.len())
    }

    pub fn keys(&self) -> Vec<ResourceKey> {
        let mut keys: Vec<_> = self.lock().slots.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Stale or errored keys that somebody is still watching.
    pub fn observed_stale_keys(&self) -> Vec<ResourceKey> {
        let mut keys: Vec<_> = self
            .lock()
            .slots
            .iter()
            .filter(|(_, slot)| {
                !slot.subscribers.is_empty()
                    && matches!(slot.freshness, Freshness::Stale | Freshness::Errored)
            })
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Drops entries nobody subscribes to and nothing is fetching.
    pub fn prune_unobserved(&self) -> usize {
        let mut store = self.lock();
        let before = store.slots.len();
        store
            .slots
            .retain(|_, slot| !slot.subscribers.is_empty() || slot.in_flight > 0);
        before - store.slots.len()
    }

    /// Forgets every value. Watched entries stay registered but empty; results
    /// of fetches already in flight are discarded.
    pub fn clear(&self) {
        let mut notifications = Vec::new();
        {
            let mut store = self.lock();
            let Store {
                slots, last_seq, ..
            } = &mut *store;
            slots.retain(|key, slot| {
                if slot.subscribers.is_empty() {
                    return false;
                }
                *last_seq += 1;
                let seq = *last_seq;
                slot.issued_seq = seq;
                slot.value = None;
                slot.fetched_at = None;
                slot.last_error = None;
                slot.freshness = Freshness::Stale;
                slot.applied_seq = seq;
                slot.invalidated_through = seq;
                notifications.push((key.clone(), slot.callbacks()));
                true
            });
        }
        debug!(retained = notifications.len(), "cache cleared");
        for (key, callbacks) in notifications {
            Self::notify(callbacks, &key, CacheChange::Stale);
        }
    }

    /// Starts a fetch for `key`, returning its sequence number.
    pub(crate) fn begin_fetch(&self, key: &ResourceKey) -> u64 {
        let mut store = self.lock();
        let (seq, slot) = store.issue(key);
        slot.in_flight += 1;
        slot.freshness = Freshness::Fetching;
        seq
    }

    /// Whether a fetch numbered `seq` can still deliver the current state of
    /// `key`: it belongs to the live slot, started after the latest
    /// invalidation and was not overtaken by a later write.
    pub(crate) fn fetch_is_current(&self, key: &ResourceKey, seq: u64) -> bool {
        self.lock().slots.get(key).is_some_and(|slot| {
            slot.owns(seq) && seq > slot.invalidated_through && seq > slot.applied_seq
        })
    }

    pub(crate) fn complete_fetch(&self, key: &ResourceKey, seq: u64, value: V) -> FetchApplied {
        let callbacks = {
            let mut store = self.lock();
            let Some(slot) = store.slots.get_mut(key).filter(|slot| slot.owns(seq)) else {
                return FetchApplied::Discarded;
            };
            slot.in_flight = slot.in_flight.saturating_sub(1);
            if seq <= slot.applied_seq {
                if slot.in_flight == 0 && slot.freshness == Freshness::Fetching {
                    slot.freshness = Freshness::Fresh;
                }
                return FetchApplied::Superseded;
            }
            slot.apply(seq, value);
            slot.callbacks()
        };
        Self::notify(callbacks, key, CacheChange::Updated);
        FetchApplied::Applied
    }

    pub(crate) fn fail_fetch(&self, key: &ResourceKey, seq: u64, error: ConsoleError) -> FetchApplied {
        let callbacks = {
            let mut store = self.lock();
            let Some(slot) = store.slots.get_mut(key).filter(|slot| slot.owns(seq)) else {
                return FetchApplied::Discarded;
            };
            slot.in_flight = slot.in_flight.saturating_sub(1);
            if seq <= slot.applied_seq {
                return FetchApplied::Superseded;
            }
            if slot.in_flight > 0 && slot.issued_seq > seq {
                // A newer fetch is still running; let it decide the state.
                slot.last_error = Some(error);
                return FetchApplied::Superseded;
            }
            slot.freshness = Freshness::Errored;
            slot.last_error = Some(error);
            slot.callbacks()
        };
        Self::notify(callbacks, key, CacheChange::Errored);
        FetchApplied::Applied
    }
}

impl<V: Clone> EntityCache<V> {
    /// Pure lookup.
    pub fn get(&self, key: &ResourceKey) -> Option<CacheEntry<V>> {
        self.lock().slots.get(key).map(|slot| CacheEntry {
            value: slot.value.clone(),
            freshness: slot.freshness,
            fetched_at: slot.fetched_at,
            last_error: slot.last_error.clone(),
        })
    }

    /// Cached values whose keys match `pattern`, in key order.
    pub fn values_matching(&self, pattern: &KeyPattern) -> Vec<(ResourceKey, V)> {
        let mut values: Vec<_> = self
            .lock()
            .slots
            .iter()
            .filter(|(key, _)| pattern.matches(key))
            .filter_map(|(key, slot)| slot.value.clone().map(|value| (key.clone(), value)))
            .collect();
        values.sort_by(|a, b| a.0.cmp(&b.0));
        values
    }
}

/// Registration handle returned by [`EntityCache::subscribe`]. Dropping it
/// deregisters the callback.
pub struct Subscription {
    key: ResourceKey,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("active", &self.release.is_some())
            .finish()
    }
}

#[cfg(test)]
#[path = "tests/cache_tests.rs"]
mod tests;
