//! Reinstate sessions driven by an in-process [`ChannelSource`].
//!
//! All tests run on the current-thread runtime, so the session actor only
//! makes progress while the test task is suspended. That makes the
//! interleaving of producer, actor and test deterministic.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use iobio_core::{ChangeKind, Delta, MalformedDelta, Value};
use iobio_sync::{
    ChannelSource, DEFAULT_WINDOW, FeedError, Session, SessionEnd, SessionEvent, SyncError,
};
use tokio::sync::broadcast;

async fn started(window: u32) -> (Session, iobio_sync::FeedProducer) {
    let (source, producer) = ChannelSource::pair(true);
    let session = Session::start(&source, window).await.expect("session starts");
    (session, producer)
}

/// Waits until delta number `seq` has been applied.
async fn wait_for_seq(events: &mut broadcast::Receiver<SessionEvent>, seq: u64) {
    loop {
        match events.recv().await.expect("session events") {
            SessionEvent::Updated { seq: applied } if applied >= seq => return,
            SessionEvent::Updated { .. } => continue,
            SessionEvent::Ended(end) => panic!("session ended early: {end:?}"),
        }
    }
}

#[tokio::test]
async fn rejected_subscription_fails_start() {
    let (source, producer) = ChannelSource::pair(false);
    let err = Session::start(&source, DEFAULT_WINDOW).await.unwrap_err();
    assert_eq!(err, SyncError::Subscription);
    // No credit is granted on a rejected subscription.
    assert_eq!(producer.credits_granted(), 0);
}

#[tokio::test]
async fn window_stays_bounded_and_refills_one_per_record() {
    let (session, producer) = started(DEFAULT_WINDOW).await;
    assert_eq!(producer.credits_granted(), 10);
    assert_eq!(producer.available_credits(), 10);

    let calls = Arc::new(AtomicUsize::new(0));
    session.on_update({
        let calls = calls.clone();
        move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        }
    });

    let mut events = session.subscribe();
    let sender = tokio::spawn({
        let producer = producer.clone();
        async move {
            for i in 0..25 {
                producer
                    .send(Delta::add(vec!["files".to_owned(), format!("f{i}")], i))
                    .await
                    .expect("credited send");
            }
        }
    });

    loop {
        match events.recv().await.unwrap() {
            SessionEvent::Updated { seq } => {
                assert!(producer.available_credits() <= 10, "seq {seq}");
                assert!(calls.load(Ordering::SeqCst) as u64 >= seq);
                if seq == 25 {
                    break;
                }
            }
            SessionEvent::Ended(end) => panic!("unexpected end: {end:?}"),
        }
    }
    sender.await.unwrap();

    assert_eq!(session.stop().await, SessionEnd::Stopped);
    assert_eq!(producer.credits_granted(), 35);
    assert_eq!(calls.load(Ordering::SeqCst), 25);
    assert_eq!(session.mirror().get(&["files", "f24"]), Some(Value::from(24)));
}

#[tokio::test]
async fn every_listener_runs_once_per_record() {
    let (session, producer) = started(DEFAULT_WINDOW).await;
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    let first_id = session.on_update({
        let first = first.clone();
        move |_| {
            first.fetch_add(1, Ordering::SeqCst);
        }
    });
    session.on_update({
        let second = second.clone();
        move |tree| {
            assert!(tree.get(&["a"]).is_some());
            second.fetch_add(1, Ordering::SeqCst);
        }
    });

    let mut events = session.subscribe();
    producer.send(Delta::update(["a"], 1)).await.unwrap();
    wait_for_seq(&mut events, 1).await;

    assert!(session.remove_listener(first_id));
    assert!(!session.remove_listener(first_id));
    producer.send(Delta::update(["a"], 2)).await.unwrap();
    wait_for_seq(&mut events, 2).await;

    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn missing_ancestors_are_created() {
    let (session, producer) = started(DEFAULT_WINDOW).await;
    let mut events = session.subscribe();
    let mut changes = session.changes();

    producer.send(Delta::update(["a", "b", "c"], 5)).await.unwrap();
    wait_for_seq(&mut events, 1).await;

    let mirror = session.mirror();
    assert_eq!(mirror.get(&["a", "b", "c"]), Some(Value::from(5)));
    assert!(mirror.get(&["a"]).unwrap().as_map().is_some());
    assert!(mirror.get(&["a", "b"]).unwrap().as_map().is_some());

    let kinds: Vec<ChangeKind> = std::iter::from_fn(|| changes.try_recv().ok())
        .map(|change| change.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![ChangeKind::Created, ChangeKind::Created, ChangeKind::Updated]
    );
}

#[tokio::test]
async fn append_extends_viewer_list() {
    let (session, producer) = started(DEFAULT_WINDOW).await;
    let mut events = session.subscribe();

    producer
        .send(Delta::add(
            ["shares"],
            Value::map([("viewers", Value::Array(vec![Value::from("user7")]))]),
        ))
        .await
        .unwrap();
    producer
        .send(Delta::append(["shares", "viewers"], "user42"))
        .await
        .unwrap();
    wait_for_seq(&mut events, 2).await;

    assert_eq!(
        session.mirror().get(&["shares", "viewers"]),
        Some(Value::Array(vec![Value::from("user7"), Value::from("user42")]))
    );
}

#[tokio::test]
async fn root_update_replaces_the_mirror() {
    let (session, producer) = started(DEFAULT_WINDOW).await;
    let mut events = session.subscribe();

    producer.send(Delta::add(["old"], 1)).await.unwrap();
    let replacement = Value::map([("fresh", Value::from(true))]);
    producer
        .send(Delta::replace_root(replacement.clone()))
        .await
        .unwrap();
    wait_for_seq(&mut events, 2).await;

    assert_eq!(session.mirror().snapshot(), replacement);
}

#[tokio::test]
async fn records_after_stop_are_not_applied() {
    let (session, producer) = started(DEFAULT_WINDOW).await;
    let mut events = session.subscribe();
    producer.send(Delta::add(["kept"], 1)).await.unwrap();
    wait_for_seq(&mut events, 1).await;
    let before = session.mirror().snapshot();

    // Buffered on the feed but not yet seen by the actor when stop is
    // requested.
    assert!(producer.try_send(Delta::add(["late"], 2)).unwrap());
    assert_eq!(session.stop().await, SessionEnd::Stopped);

    assert_eq!(session.mirror().snapshot(), before);
    assert!(producer.is_closed());
    assert_eq!(
        producer.send(Delta::add(["later"], 3)).await,
        Err(FeedError::Closed)
    );
    assert_eq!(session.mirror().get(&["late"]), None);
}

#[tokio::test]
async fn dropping_the_session_releases_the_feed() {
    let (session, producer) = started(DEFAULT_WINDOW).await;
    let mirror = session.mirror();
    let mut events = session.subscribe();
    producer.send(Delta::add(["x"], 1)).await.unwrap();
    wait_for_seq(&mut events, 1).await;

    drop(session);
    assert_eq!(
        events.recv().await.unwrap(),
        SessionEvent::Ended(SessionEnd::Stopped)
    );
    assert!(producer.is_closed());
    assert_eq!(mirror.get(&["x"]), Some(Value::from(1)));
}

#[tokio::test]
async fn malformed_delta_ends_session_and_keeps_mirror() {
    let (session, producer) = started(DEFAULT_WINDOW).await;
    producer.send(Delta::add(["a"], 1)).await.unwrap();
    producer.send(Delta::append(["a"], "x")).await.unwrap();
    producer.send(Delta::add(["b"], 2)).await.unwrap();

    let end = session.closed().await;
    assert_eq!(
        end,
        SessionEnd::Failed(SyncError::Malformed {
            seq: 2,
            source: MalformedDelta::NotASequence {
                path: "/a".to_owned(),
                found: "integer",
            },
        })
    );
    assert_eq!(session.end(), Some(end));
    assert!(!session.is_running());

    let mirror = session.mirror();
    assert_eq!(mirror.get(&["a"]), Some(Value::from(1)));
    assert_eq!(mirror.get(&["b"]), None);
}

#[tokio::test]
async fn closing_the_feed_ends_the_session() {
    let (session, producer) = started(DEFAULT_WINDOW).await;
    producer.send(Delta::add(["a"], 1)).await.unwrap();
    drop(producer);

    assert_eq!(session.closed().await, SessionEnd::FeedClosed);
    assert_eq!(session.mirror().get(&["a"]), Some(Value::from(1)));
}

#[tokio::test]
async fn zero_window_still_grants_one_credit() {
    let (_session, producer) = started(0).await;
    assert_eq!(producer.credits_granted(), 1);
}

#[tokio::test]
async fn producer_cannot_outrun_the_window() {
    let (session, producer) = started(1).await;
    let mut events = session.subscribe();

    assert!(producer.try_send(Delta::add(["a"], 1)).unwrap());
    // The only credit is spent until the session has applied "a".
    assert!(!producer.try_send(Delta::add(["b"], 2)).unwrap());
    assert_eq!(producer.available_credits(), 0);

    wait_for_seq(&mut events, 1).await;
    producer.send(Delta::add(["b"], 2)).await.unwrap();
    wait_for_seq(&mut events, 2).await;
    assert_eq!(producer.credits_granted(), 3);

    let mirror = session.mirror();
    assert_eq!(mirror.get(&["a"]), Some(Value::from(1)));
    assert_eq!(mirror.get(&["b"]), Some(Value::from(2)));
    assert_eq!(session.end(), None);
}
