use elector::{
    test_utils::{recording_callbacks, Journal, SimulatedStore},
    Callbacks, CancellationToken, ElectionState, Elector, ElectorConfig, Error,
    InMemoryLeaseStore,
};
use std::{sync::Arc, time::Duration};
use tokio::time::{sleep, timeout};
use tokio_test::{assert_err, assert_ok};

const KEY: &str = "lock:job";
const TTL: Duration = Duration::from_secs(3);

fn config() -> ElectorConfig {
    ElectorConfig::new(KEY, TTL)
        .with_renew_interval(Duration::from_secs(1))
        .with_backoff(Duration::from_millis(300), Duration::ZERO)
}

async fn wait_for_state(elector: &Elector, state: ElectionState) {
    let mut rx = elector.subscribe();
    timeout(Duration::from_secs(60), rx.wait_for(|s| *s == state))
        .await
        .expect("timed out waiting for state")
        .expect("state channel closed");
}

#[test]
fn test_zero_ttl_fails_at_construction() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let result = Elector::new(
        ElectorConfig::new(KEY, Duration::ZERO),
        store,
        Callbacks::new(),
    );
    assert!(matches!(result, Err(Error::InvalidTtl)));
}

#[test]
fn test_unbounded_ttl_fails_at_construction() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let result = Elector::new(
        ElectorConfig::new(KEY, Duration::MAX),
        store,
        Callbacks::new(),
    );
    assert!(matches!(result, Err(Error::InvalidTtl)));
}

#[test]
fn test_renew_interval_is_corrected_at_construction() {
    let store = Arc::new(InMemoryLeaseStore::new());
    for renew in [0, 10] {
        let config = ElectorConfig::new(KEY, Duration::from_secs(9))
            .with_renew_interval(Duration::from_secs(renew));
        let elector = Elector::new(config, store.clone(), Callbacks::new()).unwrap();
        assert_eq!(
            elector.config().effective_renew_interval(),
            Duration::from_secs(3)
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_stop_before_start_is_noop() {
    let (store, _memory) = SimulatedStore::in_memory();
    let elector = Elector::new(config(), store.clone(), Callbacks::new()).unwrap();

    assert_ok!(elector.stop(Duration::from_secs(1)).await);
    assert!(!elector.is_running());
    assert_eq!(elector.state(), ElectionState::Stopped);
    assert!(store.journal().entries().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_double_start_runs_one_loop() {
    let (store, memory) = SimulatedStore::in_memory();
    memory.force_owner(KEY, "other", Duration::from_secs(600));
    let root = CancellationToken::new();
    let elector = Elector::new(config(), store.clone(), Callbacks::new()).unwrap();

    assert_ok!(elector.start(&root));
    assert_ok!(elector.start(&root));
    assert!(elector.is_running());

    // Attempts at 0, 300, 600 and 900 ms.
    sleep(Duration::from_millis(1050)).await;
    assert_eq!(store.calls("try_acquire", &elector.identity().to_string()), 4);

    assert_ok!(elector.stop(Duration::from_secs(1)).await);
    assert_ok!(elector.stop(Duration::from_secs(1)).await);
    assert!(!elector.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_double_start_fires_on_acquired_once() {
    let (store, _memory) = SimulatedStore::in_memory();
    let journal = store.journal().clone();
    let root = CancellationToken::new();
    let elector = Elector::new(config(), store.clone(), recording_callbacks(&journal, "a")).unwrap();

    elector.start(&root).unwrap();
    elector.start(&root).unwrap();
    wait_for_state(&elector, ElectionState::Leading).await;
    sleep(Duration::from_secs(5)).await;
    elector.stop(Duration::from_secs(1)).await.unwrap();

    assert_eq!(journal.count("on_acquired:a"), 1);
    assert_eq!(journal.count("on_lost:a"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_times_out_on_slow_cleanup() {
    let (store, memory) = SimulatedStore::in_memory();
    let journal = Journal::new();
    let done = journal.clone();
    let callbacks = Callbacks::new().on_lost(move |_| {
        let done = done.clone();
        async move {
            sleep(Duration::from_secs(10)).await;
            done.record("cleanup_done");
        }
    });

    let root = CancellationToken::new();
    let elector = Elector::new(config(), store.clone(), callbacks).unwrap();
    elector.start(&root).unwrap();
    wait_for_state(&elector, ElectionState::Leading).await;

    let result = elector.stop(Duration::from_secs(1)).await;
    assert!(matches!(result, Err(Error::StopTimeout)));

    // Release does not wait for the cleanup callback.
    assert_eq!(memory.holder(KEY), None);
    assert_eq!(elector.state(), ElectionState::Stopped);
    assert!(matches!(elector.start(&root), Err(Error::Draining)));

    sleep(Duration::from_secs(10)).await;
    assert_eq!(journal.count("cleanup_done"), 1);
    assert_ok!(elector.start(&root));
    wait_for_state(&elector, ElectionState::Leading).await;
    assert_err!(elector.stop(Duration::from_secs(1)).await);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_stop_still_blocks_restart() {
    let (store, _memory) = SimulatedStore::in_memory();
    let journal = Journal::new();
    let done = journal.clone();
    let callbacks = Callbacks::new().on_lost(move |_| {
        let done = done.clone();
        async move {
            sleep(Duration::from_secs(10)).await;
            done.record("cleanup_done");
        }
    });

    let root = CancellationToken::new();
    let elector = Elector::new(config(), store.clone(), callbacks).unwrap();
    elector.start(&root).unwrap();
    wait_for_state(&elector, ElectionState::Leading).await;

    // The caller gives up on stop long before its own deadline.
    let abandoned = timeout(Duration::from_millis(100), elector.stop(Duration::from_secs(60))).await;
    assert!(abandoned.is_err());
    assert!(!elector.is_running());
    assert!(matches!(elector.start(&root), Err(Error::Draining)));

    sleep(Duration::from_secs(10)).await;
    assert_eq!(journal.count("cleanup_done"), 1);
    assert_ok!(elector.start(&root));
    wait_for_state(&elector, ElectionState::Leading).await;
}

#[tokio::test(start_paused = true)]
async fn test_dropping_running_elector_releases_lease() {
    let (store, memory) = SimulatedStore::in_memory();
    let journal = store.journal().clone();
    let root = CancellationToken::new();
    let elector = Elector::new(config(), store.clone(), recording_callbacks(&journal, "a")).unwrap();
    let owner = elector.identity().to_string();

    elector.start(&root).unwrap();
    wait_for_state(&elector, ElectionState::Leading).await;
    drop(elector);

    sleep(Duration::from_secs(1)).await;
    assert_eq!(memory.holder(KEY), None);
    assert_eq!(store.calls("release", &owner), 1);
    assert_eq!(journal.count("work_stopped:a"), 1);
    assert_eq!(journal.count("on_lost:a"), 1);

    let renews = store.calls("renew", &owner);
    sleep(Duration::from_secs(30)).await;
    assert_eq!(store.calls("renew", &owner), renews);
    assert_eq!(store.calls("try_acquire", &owner), 1);
}

#[tokio::test(start_paused = true)]
async fn test_parent_cancellation_drains_loop() {
    let (store, memory) = SimulatedStore::in_memory();
    let journal = store.journal().clone();
    let root = CancellationToken::new();
    let elector = Elector::new(config(), store.clone(), recording_callbacks(&journal, "a")).unwrap();

    elector.start(&root).unwrap();
    wait_for_state(&elector, ElectionState::Leading).await;

    root.cancel();
    wait_for_state(&elector, ElectionState::Stopped).await;

    assert_eq!(memory.holder(KEY), None);
    assert_eq!(journal.count("on_lost:a"), 1);
    assert!(elector.is_running());

    assert_ok!(elector.stop(Duration::from_secs(1)).await);
    assert!(!elector.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_failed_release_is_swallowed() {
    let (store, memory) = SimulatedStore::in_memory();
    let root = CancellationToken::new();
    let elector = Elector::new(config(), store.clone(), Callbacks::new()).unwrap();
    let owner = elector.identity().to_string();

    elector.start(&root).unwrap();
    wait_for_state(&elector, ElectionState::Leading).await;

    store.partition(&owner);
    assert_ok!(elector.stop(Duration::from_secs(1)).await);
    assert_eq!(store.calls("release", &owner), 1);
    assert_eq!(memory.holder(KEY), Some(owner));

    sleep(TTL).await;
    assert_eq!(memory.holder(KEY), None);
}

#[tokio::test(start_paused = true)]
async fn test_independent_keys_lead_side_by_side() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let root = CancellationToken::new();

    let jobs = Elector::new(config(), store.clone(), Callbacks::new()).unwrap();
    let reports = Elector::new(
        ElectorConfig::new("lock:reports", TTL),
        store.clone(),
        Callbacks::new(),
    )
    .unwrap();

    jobs.start(&root).unwrap();
    reports.start(&root).unwrap();
    wait_for_state(&jobs, ElectionState::Leading).await;
    wait_for_state(&reports, ElectionState::Leading).await;

    assert_eq!(store.holder(KEY), Some(jobs.identity().to_string()));
    assert_eq!(store.holder("lock:reports"), Some(reports.identity().to_string()));
    assert_ne!(jobs.identity(), reports.identity());

    jobs.stop(Duration::from_secs(1)).await.unwrap();
    reports.stop(Duration::from_secs(1)).await.unwrap();
    assert!(store.is_empty());
}
