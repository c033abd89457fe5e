use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use futures::{
    future::{self, BoxFuture, Shared},
    FutureExt,
};
use tracing::{debug, trace, warn};

use crate::{
    cache::{EntityCache, FetchApplied, ResourceKey},
    error::{ConsoleError, Result},
};

/// A read that resolves independently of the caller: dropping it does not
/// cancel the underlying fetch.
pub type PendingRead<V> = BoxFuture<'static, Result<V>>;

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V>>>;

struct InFlight<V> {
    seq: u64,
    result: SharedFetch<V>,
}

type Registry<V> = Arc<Mutex<HashMap<ResourceKey, InFlight<V>>>>;

/// Resolves resource keys to data, collapsing concurrent reads of one key
/// into a single remote call.
pub struct FetchCoordinator<V> {
    cache: EntityCache<V>,
    in_flight: Registry<V>,
    stale_after: Option<Duration>,
}

impl<V> FetchCoordinator<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(cache: EntityCache<V>) -> Self {
        Self {
            cache,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            stale_after: None,
        }
    }

    /// Treat fresh entries older than `stale_after` as stale.
    pub fn with_stale_after(mut self, stale_after: Option<Duration>) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn cache(&self) -> &EntityCache<V> {
        &self.cache
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<ResourceKey, InFlight<V>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn in_flight(&self, key: &ResourceKey) -> bool {
        self.registry().contains_key(key)
    }

    /// Returns the cached value when fresh, joins a fetch already running
    /// for `key` when it can still deliver the current state, or starts one
    /// with `fetcher`. The decision is taken when this is called, not when
    /// the returned future is first polled.
    ///
    /// `fetcher` runs without the registry lock held, so it may call back
    /// into the coordinator.
    pub fn ensure<F, Fut>(&self, key: ResourceKey, fetcher: F) -> PendingRead<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        // A write that landed while a fetch was running is newer than
        // anything that fetch can return.
        if let Some(entry) = self.cache.get(&key) {
            if entry.is_fresh(self.stale_after) {
                if let Some(value) = entry.value {
                    trace!(%key, "cache hit");
                    return future::ready(Ok(value)).boxed();
                }
            }
        }

        if let Some(joined) = self.join_current(&self.registry(), &key) {
            return joined;
        }

        let fetch = fetcher();
        let mut registry = self.registry();
        // Another caller may have started a fetch while `fetcher` ran.
        if let Some(joined) = self.join_current(&registry, &key) {
            return joined;
        }
        self.start(&mut registry, key, fetch)
    }

    /// Starts a new fetch even if the entry is fresh or one is already
    /// running. Whichever result carries the higher sequence number wins.
    pub fn refetch<F, Fut>(&self, key: ResourceKey, fetcher: F) -> PendingRead<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let fetch = fetcher();
        let mut registry = self.registry();
        self.start(&mut registry, key, fetch)
    }

    /// Joins the registered fetch for `key` unless it predates a teardown,
    /// an invalidation or a later write.
    fn join_current(
        &self,
        registry: &HashMap<ResourceKey, InFlight<V>>,
        key: &ResourceKey,
    ) -> Option<PendingRead<V>> {
        let pending = registry.get(key)?;
        if !self.cache.fetch_is_current(key, pending.seq) {
            trace!(%key, seq = pending.seq, "in-flight fetch is outdated");
            return None;
        }
        trace!(%key, seq = pending.seq, "joining in-flight fetch");
        Some(pending.result.clone().boxed())
    }

    fn start<Fut>(
        &self,
        registry: &mut HashMap<ResourceKey, InFlight<V>>,
        key: ResourceKey,
        fetch: Fut,
    ) -> PendingRead<V>
    where
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let seq = self.cache.begin_fetch(&key);
        debug!(%key, seq, "fetch started");

        let cache = self.cache.clone();
        let in_flight = Arc::clone(&self.in_flight);
        let task_key = key.clone();
        // The registry lock is held until the entry below is inserted, so the
        // task cannot deregister itself before it is registered.
        let task = tokio::spawn(async move {
            let result = fetch.await;
            let applied = match &result {
                Ok(value) => cache.complete_fetch(&task_key, seq, value.clone()),
                Err(err) => {
                    warn!(key = %task_key, seq, error = %err, "fetch failed");
                    cache.fail_fetch(&task_key, seq, err.clone())
                }
            };
            match applied {
                FetchApplied::Applied => debug!(key = %task_key, seq, "fetch settled"),
                FetchApplied::Superseded => {
                    debug!(key = %task_key, seq, "fetch result superseded by a later write")
                }
                FetchApplied::Discarded => {
                    debug!(key = %task_key, seq, "fetch result discarded after cache teardown")
                }
            }

            let mut registry = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if registry
                .get(&task_key)
                .is_some_and(|pending| pending.seq == seq)
            {
                registry.remove(&task_key);
            }
            result
        });

        let result = async move {
            task.await.map_err(|err| {
                ConsoleError::UnexpectedResponse(format!("fetch task ended abnormally: {err}"))
            })?
        }
        .boxed()
        .shared();

        registry.insert(
            key,
            InFlight {
                seq,
                result: result.clone(),
            },
        );
        result.boxed()
    }
}

#[cfg(test)]
#[path = "tests/fetch_tests.rs"]
mod tests;
