use super::*;

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{mpsc, oneshot};

use crate::cache::{CacheChange, CacheEvent, Freshness};

fn coordinator() -> FetchCoordinator<String> {
    FetchCoordinator::new(EntityCache::new())
}

fn counted(calls: &Arc<AtomicUsize>, value: &str) -> impl Future<Output = Result<String>> {
    calls.fetch_add(1, Ordering::SeqCst);
    future::ready(Ok(value.to_string()))
}

fn gated(
    calls: &Arc<AtomicUsize>,
    gate: oneshot::Receiver<()>,
    value: &str,
) -> impl Future<Output = Result<String>> + Send + 'static {
    calls.fetch_add(1, Ordering::SeqCst);
    let value = value.to_string();
    async move {
        let _ = gate.await;
        Ok(value)
    }
}

#[tokio::test]
async fn concurrent_ensures_share_one_fetch() {
    let fetcher = coordinator();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = ResourceKey::analytics();
    let (release, gate) = oneshot::channel();

    let first = fetcher.ensure(key.clone(), || gated(&calls, gate, "totals"));
    let second = fetcher.ensure(key.clone(), || counted(&calls, "duplicate"));
    assert!(fetcher.in_flight(&key));
    assert_eq!(
        fetcher.cache().get(&key).expect("entry").freshness,
        Freshness::Fetching
    );

    release.send(()).expect("release fetch");
    let (first, second) = tokio::join!(first, second);

    assert_eq!(first.expect("first"), "totals");
    assert_eq!(second.expect("second"), "totals");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!fetcher.in_flight(&key));
}

#[tokio::test]
async fn fresh_entry_is_served_without_a_fetch() {
    let fetcher = coordinator();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = ResourceKey::knowledge();
    fetcher.cache().put(key.clone(), "cached".to_string());

    let value = fetcher
        .ensure(key.clone(), || counted(&calls, "remote"))
        .await
        .expect("cached value");

    assert_eq!(value, "cached");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn stale_entry_is_refetched() {
    let fetcher = coordinator();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = ResourceKey::knowledge();
    fetcher.cache().put(key.clone(), "v1".to_string());
    fetcher.cache().mark_stale(&key);

    let value = fetcher
        .ensure(key.clone(), || counted(&calls, "v2"))
        .await
        .expect("refetched");

    assert_eq!(value, "v2");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(fetcher.cache().get(&key).expect("entry").freshness, Freshness::Fresh);
}

#[tokio::test]
async fn entries_older_than_stale_after_are_refetched() {
    let fetcher = coordinator().with_stale_after(Some(Duration::ZERO));
    let calls = Arc::new(AtomicUsize::new(0));
    let key = ResourceKey::schema_mappings();
    fetcher.cache().put(key.clone(), "old".to_string());

    let value = fetcher
        .ensure(key, || counted(&calls, "new"))
        .await
        .expect("refetched");

    assert_eq!(value, "new");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_fetch_keeps_last_good_value() {
    let fetcher = coordinator();
    let key = ResourceKey::analytics();
    fetcher.cache().put(key.clone(), "good".to_string());
    fetcher.cache().mark_stale(&key);

    let err = fetcher
        .ensure(key.clone(), || async {
            Err::<String, _>(ConsoleError::NetworkFailure("connection reset".into()))
        })
        .await
        .expect_err("fetch fails");

    assert_eq!(err, ConsoleError::NetworkFailure("connection reset".into()));
    let entry = fetcher.cache().get(&key).expect("entry");
    assert_eq!(entry.freshness, Freshness::Errored);
    assert_eq!(entry.value.as_deref(), Some("good"));
    assert_eq!(entry.last_error, Some(err));
}

#[tokio::test]
async fn later_refetch_wins_over_slower_earlier_fetch() {
    let fetcher = coordinator();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = ResourceKey::clusters(None);
    let (release_a, gate_a) = oneshot::channel();

    let slow = fetcher.ensure(key.clone(), || gated(&calls, gate_a, "A"));
    let fast = fetcher
        .refetch(key.clone(), || counted(&calls, "B"))
        .await
        .expect("fast fetch");
    assert_eq!(fast, "B");

    release_a.send(()).expect("release slow fetch");
    assert_eq!(slow.await.expect("slow fetch"), "A");

    let entry = fetcher.cache().get(&key).expect("entry");
    assert_eq!(entry.value.as_deref(), Some("B"));
    assert_eq!(entry.freshness, Freshness::Fresh);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(!fetcher.in_flight(&key));
}

#[tokio::test]
async fn dropped_caller_still_populates_the_cache() {
    let fetcher = coordinator();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = ResourceKey::pending_approvals();
    let (updates_tx, mut updates) = mpsc::unbounded_channel();
    let _subscription = fetcher
        .cache()
        .subscribe(key.clone(), move |event: &CacheEvent| {
            let _ = updates_tx.send(event.change);
        });
    let (release, gate) = oneshot::channel();

    drop(fetcher.ensure(key.clone(), || gated(&calls, gate, "queue")));
    release.send(()).expect("release fetch");

    let change = tokio::time::timeout(Duration::from_secs(5), updates.recv())
        .await
        .expect("update arrives")
        .expect("channel open");
    assert_eq!(change, CacheChange::Updated);
    assert_eq!(
        fetcher.cache().get(&key).and_then(|entry| entry.value).as_deref(),
        Some("queue")
    );
}

#[tokio::test]
async fn invalidation_during_flight_starts_a_new_fetch() {
    let fetcher = coordinator();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = ResourceKey::knowledge();
    let (release, gate) = oneshot::channel();

    let before_write = fetcher.ensure(key.clone(), || gated(&calls, gate, "pre-write"));
    assert!(fetcher.cache().mark_stale(&key));

    let after_write = fetcher
        .ensure(key.clone(), || counted(&calls, "post-write"))
        .await
        .expect("second fetch");
    assert_eq!(after_write, "post-write");
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    release.send(()).expect("release first fetch");
    before_write.await.expect("first fetch");

    let entry = fetcher.cache().get(&key).expect("entry");
    assert_eq!(entry.value.as_deref(), Some("post-write"));
    assert_eq!(entry.freshness, Freshness::Fresh);
}

#[tokio::test]
async fn lone_fetch_that_predates_invalidation_lands_stale() {
    let fetcher = coordinator();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = ResourceKey::assessments(None);
    let (release, gate) = oneshot::channel();

    let pending = fetcher.ensure(key.clone(), || gated(&calls, gate, "pre-write"));
    fetcher.cache().mark_stale(&key);
    release.send(()).expect("release fetch");
    pending.await.expect("fetch");

    let entry = fetcher.cache().get(&key).expect("entry");
    assert_eq!(entry.value.as_deref(), Some("pre-write"));
    assert_eq!(entry.freshness, Freshness::Stale);
}

#[tokio::test]
async fn fetch_from_before_clear_is_not_joined() {
    let fetcher = coordinator();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = ResourceKey::clusters(None);
    let (release, gate) = oneshot::channel();

    let old_session = fetcher.ensure(key.clone(), || gated(&calls, gate, "old session"));
    fetcher.cache().clear();

    let value = fetcher
        .ensure(key.clone(), || counted(&calls, "new session"))
        .await
        .expect("new fetch");
    assert_eq!(value, "new session");
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    release.send(()).expect("release old fetch");
    assert_eq!(old_session.await.expect("old fetch"), "old session");

    let entry = fetcher.cache().get(&key).expect("entry");
    assert_eq!(entry.value.as_deref(), Some("new session"));
    assert_eq!(entry.freshness, Freshness::Fresh);
    assert!(!fetcher.in_flight(&key));
}

#[tokio::test]
async fn write_during_flight_is_served_over_the_running_fetch() {
    let fetcher = coordinator();
    let calls = Arc::new(AtomicUsize::new(0));
    let key = ResourceKey::analytics();
    let (release, gate) = oneshot::channel();

    let running = fetcher.ensure(key.clone(), || gated(&calls, gate, "remote"));
    fetcher.cache().put(key.clone(), "written".to_string());

    let value = fetcher
        .ensure(key.clone(), || counted(&calls, "unused"))
        .await
        .expect("cached write");
    assert_eq!(value, "written");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    release.send(()).expect("release fetch");
    running.await.expect("running fetch");
    assert_eq!(
        fetcher.cache().get(&key).and_then(|entry| entry.value).as_deref(),
        Some("written")
    );
}

#[tokio::test]
async fn fetcher_may_call_back_into_the_coordinator() {
    let fetcher = coordinator();
    let key = ResourceKey::knowledge();
    let watched = key.clone();

    let value = tokio::time::timeout(Duration::from_secs(5), async {
        let first = fetcher.ensure(key.clone(), || {
            assert!(!fetcher.in_flight(&watched));
            future::ready(Ok("first".to_string()))
        });
        let second = fetcher.refetch(key.clone(), || {
            assert!(fetcher.in_flight(&watched));
            future::ready(Ok("second".to_string()))
        });
        let (first, second) = tokio::join!(first, second);
        first.expect("first");
        second
    })
    .await
    .expect("no deadlock")
    .expect("second");

    assert_eq!(value, "second");
}
