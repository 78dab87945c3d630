//! Contract Test: Snapshot Broadcast
//!
//! Constraints verified:
//! - Every observable transition of a cycle produces exactly one broadcast,
//!   delivered in the order the state changed
//! - Partial results are streamed while a pass runs
//! - A failing or panicking subscriber affects neither the cycle nor the
//!   other subscribers
//! - Subscribing is silent and unsubscribing stops delivery
//! - A subscriber may read snapshots while other threads change state

mod common;

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc, Arc,
    },
    time::Duration,
};

use common::*;
use proxywatch::validator::{OptionsUpdate, ProgressState};

#[tokio::test(start_paused = true)]
async fn cycle_streams_ordered_snapshots() {
    let proxies = candidates(5);
    let supplier = Arc::new(StaticSupplier::new(proxies.clone()));
    let prober = Arc::new(
        ScriptedProber::new(Script::Status(500, Duration::from_millis(10)))
            .with(proxies[0], Script::Status(200, Duration::from_millis(10)))
            .with(proxies[2], Script::Status(200, Duration::from_millis(10)))
            .with(proxies[4], Script::Status(302, Duration::from_millis(10))),
    );
    let cache = cache(supplier, prober, options(2, 1000));
    let recorder = Recorder::default();
    let _subscription = recorder.attach(&cache);

    cache.refresh().await.unwrap();
    let snapshots = recorder.snapshots();

    // reset + start + one per probe + one per approval + completion
    assert_eq!(snapshots.len(), 1 + 1 + 5 + 3 + 1);

    let reset = &snapshots[0];
    assert_eq!(reset.partial_progress, None);
    assert_eq!(reset.count, 0);
    assert_eq!(reset.raw_count, 5);
    assert!(reset.summary.is_none());
    assert!(reset.refreshing);

    let started = &snapshots[1];
    let progress = started.partial_progress.as_ref().unwrap();
    assert_eq!(progress.state, ProgressState::Running);
    assert_eq!(progress.tested, 0);
    assert_eq!(progress.total, 5);
    assert_eq!(started.count, 0);

    let mut tested = 0;
    let mut count = 0;
    for snapshot in &snapshots[1..snapshots.len() - 1] {
        assert_eq!(snapshot.count, snapshot.proxies.len());
        let progress = snapshot.partial_progress.as_ref().unwrap();
        assert!(progress.tested >= tested);
        assert!(snapshot.count >= count);
        tested = progress.tested;
        count = snapshot.count;
    }
    assert_eq!(tested, 5);

    let last = snapshots.last().unwrap();
    assert_eq!(last.partial_progress, None);
    assert_eq!(last.count, 3);
    assert_eq!(last.summary.as_ref().unwrap().approved, 3);
}

#[tokio::test(start_paused = true)]
async fn faulty_subscribers_are_isolated() {
    let supplier = Arc::new(StaticSupplier::new(candidates(3)));
    let prober = Arc::new(ScriptedProber::new(Script::Status(200, Duration::ZERO)));
    let cache = cache(supplier, prober, options(1, 1000));

    let failing_calls = Arc::new(AtomicUsize::new(0));
    let calls = Arc::clone(&failing_calls);
    let _failing = cache.subscribe(move |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("subscriber is broken")
    });
    let _panicking = cache.subscribe(|snapshot| {
        if snapshot.count > 0 {
            panic!("subscriber panicked");
        }
        Ok(())
    });
    let recorder = Recorder::default();
    let _recording = recorder.attach(&cache);

    let outcome = cache.refresh().await.unwrap();
    assert_eq!(outcome.validated.count, 3);

    let delivered = recorder.len();
    assert_eq!(delivered, 1 + 1 + 3 + 3 + 1);
    assert_eq!(failing_calls.load(Ordering::SeqCst), delivered);
}

#[tokio::test(start_paused = true)]
async fn subscribing_is_silent_and_unsubscribe_stops_delivery() {
    let supplier = Arc::new(StaticSupplier::new(candidates(2)));
    let prober = Arc::new(ScriptedProber::new(Script::Status(200, Duration::ZERO)));
    let cache = cache(supplier, prober, options(1, 1000));

    let recorder = Recorder::default();
    let subscription = recorder.attach(&cache);
    assert_eq!(recorder.len(), 0);

    cache.refresh().await.unwrap();
    let delivered = recorder.len();
    assert!(delivered > 0);

    subscription.unsubscribe();
    cache.refresh().await.unwrap();
    assert_eq!(recorder.len(), delivered);
}

#[tokio::test(start_paused = true)]
async fn every_subscriber_sees_the_same_sequence() {
    let supplier = Arc::new(StaticSupplier::new(candidates(6)));
    let prober = Arc::new(ScriptedProber::new(Script::Status(200, Duration::from_millis(1))));
    let cache = cache(supplier, prober, options(3, 1000));

    let first = Recorder::default();
    let second = Recorder::default();
    let _a = first.attach(&cache);
    let _b = second.attach(&cache);

    cache.refresh().await.unwrap();
    assert_eq!(first.snapshots(), second.snapshots());
}

#[test]
fn subscribers_may_read_snapshots_while_options_change() {
    let supplier = Arc::new(StaticSupplier::new(candidates(1)));
    let prober = Arc::new(ScriptedProber::new(Script::Status(200, Duration::ZERO)));
    let cache = cache(supplier, prober, options(4, 1000));

    let reader = Arc::downgrade(&cache);
    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&delivered);
    let _subscription = cache.subscribe(move |_| {
        std::thread::sleep(Duration::from_millis(100));
        if let Some(cache) = reader.upgrade() {
            cache.raw_snapshot();
            cache.validated_snapshot();
        }
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let (done, finished) = mpsc::channel();
    for (delay, concurrency) in [(0, 5), (30, 6)] {
        let cache = Arc::clone(&cache);
        let done = done.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(delay));
            let update: OptionsUpdate =
                serde_json::from_str(&format!(r#"{{"concurrency": {}}}"#, concurrency)).unwrap();
            done.send(cache.update_validation_options(&update).is_ok()).unwrap();
        });
    }

    for _ in 0..2 {
        let accepted = finished
            .recv_timeout(Duration::from_secs(5))
            .expect("options update never returned");
        assert!(accepted);
    }
    assert_eq!(delivered.load(Ordering::SeqCst), 2);
    assert_eq!(cache.validation_options().concurrency, 6);
}
