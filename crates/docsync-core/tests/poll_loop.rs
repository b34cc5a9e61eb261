mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{Content, FakeRemote, Harness};
use docsync_core::{CatalogItem, EngineConfig, PollState, TypedCatalog};
use futures::StreamExt;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

fn fast_config() -> EngineConfig {
    EngineConfig::default().with_poll_interval(Duration::from_millis(20))
}

fn prepared_remote() -> FakeRemote {
    let remote = FakeRemote::new();
    remote.put("/JSONs/genres.json", "rev1", "[]");
    remote.put("/JSONs/languages.json", "rev1", "[]");
    remote
}

#[tokio::test]
async fn test_loop_requires_prepared_and_connected() {
    let harness = Harness::with_config(prepared_remote(), fast_config());

    harness.engine.set_connectivity(true);
    assert_eq!(harness.engine.poll_state(), PollState::Stopped);

    harness
        .engine
        .prepare_content(&TypedCatalog::<Content>::new())
        .await;
    assert_eq!(harness.engine.poll_state(), PollState::Running);

    // Starting again is a no-op
    harness
        .engine
        .prepare_content(&TypedCatalog::<Content>::new())
        .await;
    assert_eq!(harness.engine.poll_state(), PollState::Running);
}

#[tokio::test]
async fn test_prepared_engine_waits_for_connectivity() {
    let harness = Harness::with_config(prepared_remote(), fast_config());
    harness
        .engine
        .prepare_content(&TypedCatalog::<Content>::new())
        .await;
    assert!(harness.engine.is_prepared());
    assert_eq!(harness.engine.poll_state(), PollState::Stopped);

    harness.engine.set_connectivity(true);
    assert_eq!(harness.engine.poll_state(), PollState::Running);

    harness.engine.set_connectivity(false);
    assert_eq!(harness.engine.poll_state(), PollState::Stopped);
}

#[tokio::test]
async fn test_timer_publishes_remote_changes() {
    let harness = Harness::with_config(prepared_remote(), fast_config());
    harness
        .engine
        .prepare_content(&TypedCatalog::<Content>::new())
        .await;
    let changes = harness.engine.changes();
    futures::pin_mut!(changes);

    harness.engine.set_connectivity(true);
    harness
        .remote
        .put("/JSONs/languages.json", "rev2", r#"["en","de"]"#);

    let changed = timeout(Duration::from_secs(5), changes.next())
        .await
        .expect("no change published")
        .unwrap();
    assert_eq!(changed, Content::Languages.id());

    let languages: Vec<String> = harness
        .engine
        .get_decoded(&Content::Languages.id())
        .unwrap();
    assert_eq!(languages, vec!["en", "de"]);
}

#[tokio::test]
async fn test_connectivity_signal_drives_loop() {
    let harness = Harness::with_config(prepared_remote(), fast_config());
    harness
        .engine
        .prepare_content(&TypedCatalog::<Content>::new())
        .await;

    let (tx, rx) = watch::channel(false);
    harness.engine.attach_connectivity(rx);
    assert_eq!(harness.engine.poll_state(), PollState::Stopped);

    tx.send(true).unwrap();
    sleep(Duration::from_millis(50)).await;
    assert!(harness.engine.is_connected());
    assert_eq!(harness.engine.poll_state(), PollState::Running);

    tx.send(false).unwrap();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.engine.poll_state(), PollState::Stopped);

    // No ticks while offline
    let mut changes = harness.engine.subscribe();
    harness.remote.put("/JSONs/genres.json", "rev2", "[1]");
    sleep(Duration::from_millis(100)).await;
    assert!(changes.try_recv().is_err());
}

#[tokio::test]
async fn test_shutdown_stops_loop_and_releases_signal() {
    let harness = Harness::with_config(prepared_remote(), fast_config());
    harness
        .engine
        .prepare_content(&TypedCatalog::<Content>::new())
        .await;
    let (tx, rx) = watch::channel(true);
    harness.engine.attach_connectivity(rx);
    assert_eq!(harness.engine.poll_state(), PollState::Running);

    harness.engine.shutdown();
    sleep(Duration::from_millis(20)).await;

    assert_eq!(harness.engine.poll_state(), PollState::Stopped);
    assert!(tx.is_closed());
}

#[tokio::test]
async fn test_stop_lets_in_flight_update_finish() {
    let harness = Harness::with_config(prepared_remote(), fast_config());
    harness
        .engine
        .prepare_content(&TypedCatalog::<Content>::new())
        .await;
    let mut changes = harness.engine.subscribe();

    let gate = harness.remote.gate_download("/JSONs/genres.json");
    harness.remote.put("/JSONs/genres.json", "rev2", "[2]");
    harness.engine.set_connectivity(true);
    timeout(Duration::from_secs(5), gate.entered())
        .await
        .expect("no tick reached the download");

    harness.engine.set_connectivity(false);
    assert_eq!(harness.engine.poll_state(), PollState::Stopped);

    gate.release();
    let changed = timeout(Duration::from_secs(5), changes.recv())
        .await
        .expect("in-flight update was dropped")
        .unwrap();
    assert_eq!(changed, Content::Genres.id());

    let genres = harness.engine.get(&Content::Genres.id()).unwrap();
    assert_eq!(genres.revision, "rev2");
    assert_eq!(harness.engine.get_raw(&Content::Genres.id()).unwrap(), b"[2]");
    assert_eq!(harness.engine.poll_state(), PollState::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_readers_see_old_or_new_pair_during_update() {
    let remote = FakeRemote::new();
    remote.put("/JSONs/genres.json", "rev1", "[1]");
    remote.put("/JSONs/languages.json", "rev1", "[]");
    let harness = Arc::new(Harness::new(remote));
    harness
        .engine
        .prepare_content(&TypedCatalog::<Content>::new())
        .await;
    let before = harness.engine.get(&Content::Genres.id()).unwrap();

    let gate = harness.remote.gate_download("/JSONs/genres.json");
    harness.remote.put("/JSONs/genres.json", "rev2", "[2]");
    let polling = {
        let harness = harness.clone();
        tokio::spawn(async move { harness.engine.poll_once().await })
    };
    gate.entered().await;

    // The old pair is served while the download is pending
    assert_eq!(harness.engine.get(&Content::Genres.id()).unwrap(), before);

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let harness = harness.clone();
        let done = done.clone();
        let local_path = before.local_path.clone();
        tokio::spawn(async move {
            while !done.load(Ordering::SeqCst) {
                let entry = harness.engine.get(&Content::Genres.id()).unwrap();
                assert_eq!(entry.local_path, local_path);
                assert!(entry.revision == "rev1" || entry.revision == "rev2");

                let ids: Vec<u32> = harness.engine.get_decoded(&Content::Genres.id()).unwrap();
                assert!(ids == vec![1] || ids == vec![2]);
                tokio::task::yield_now().await;
            }
        })
    };

    sleep(Duration::from_millis(20)).await;
    gate.release();
    let report = polling.await.unwrap();
    assert_eq!(report.updated, 1);

    sleep(Duration::from_millis(20)).await;
    done.store(true, Ordering::SeqCst);
    reader.await.unwrap();

    let after = harness.engine.get(&Content::Genres.id()).unwrap();
    assert_eq!(after.revision, "rev2");
    assert_eq!(after.local_path, before.local_path);
    let ids: Vec<u32> = harness.engine.get_decoded(&Content::Genres.id()).unwrap();
    assert_eq!(ids, vec![2]);
}

#[test]
fn test_connectivity_from_thread_without_runtime() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let harness = Harness::with_config(prepared_remote(), fast_config());
    runtime.block_on(
        harness
            .engine
            .prepare_content(&TypedCatalog::<Content>::new()),
    );

    std::thread::scope(|scope| {
        scope
            .spawn(|| harness.engine.set_connectivity(true))
            .join()
            .unwrap();
    });
    assert_eq!(harness.engine.poll_state(), PollState::Running);

    harness.engine.set_connectivity(false);
    assert_eq!(harness.engine.poll_state(), PollState::Stopped);
}

#[test]
fn test_going_offline_during_prepare_never_leaves_loop_running() {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    for _ in 0..50 {
        let harness = Harness::with_config(prepared_remote(), fast_config());
        harness.engine.set_connectivity(true);

        std::thread::scope(|scope| {
            scope.spawn(|| harness.engine.set_connectivity(false));
            runtime.block_on(
                harness
                    .engine
                    .prepare_content(&TypedCatalog::<Content>::new()),
            );
        });

        assert!(harness.engine.is_prepared());
        assert!(!harness.engine.is_connected());
        assert_eq!(harness.engine.poll_state(), PollState::Stopped);
    }
}
