// Broadcaster fan-out tests

use hostmon::broadcast::Broadcaster;
use std::time::Duration;

#[tokio::test]
async fn test_full_queue_drops_without_blocking() {
    let b = Broadcaster::<u32>::new();
    let (mut rx, _sub) = b.subscribe(1);

    for i in 0..100 {
        b.send(i);
    }

    assert_eq!(rx.recv().await, Some(0));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_every_subscriber_receives_each_value() {
    let b = Broadcaster::<String>::new();
    let (mut a, _sa) = b.subscribe(4);
    let (mut c, _sc) = b.subscribe(4);

    b.send("one".to_string());
    b.send("two".to_string());

    assert_eq!(a.recv().await.as_deref(), Some("one"));
    assert_eq!(a.recv().await.as_deref(), Some("two"));
    assert_eq!(c.recv().await.as_deref(), Some("one"));
    assert_eq!(c.recv().await.as_deref(), Some("two"));
}

#[tokio::test]
async fn test_slow_subscriber_does_not_starve_others() {
    let b = Broadcaster::<u32>::new();
    let (mut slow, _s1) = b.subscribe(1);
    let (mut fast, _s2) = b.subscribe(8);

    for i in 0..5 {
        b.send(i);
    }

    let mut got = Vec::new();
    while let Ok(v) = fast.try_recv() {
        got.push(v);
    }
    assert_eq!(got, vec![0, 1, 2, 3, 4]);
    assert_eq!(slow.recv().await, Some(0));
}

#[tokio::test]
async fn test_cancel_ends_the_stream() {
    let b = Broadcaster::<u32>::new();
    let (mut rx, sub) = b.subscribe(2);
    assert_eq!(b.subscriber_count(), 1);

    sub.cancel();
    assert_eq!(b.subscriber_count(), 0);

    b.send(7);
    let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("recv should finish");
    assert_eq!(got, None);
}

#[tokio::test]
async fn test_dropping_subscription_deregisters() {
    let b = Broadcaster::<u32>::new();
    {
        let (_rx, _sub) = b.subscribe(1);
        assert_eq!(b.subscriber_count(), 1);
    }
    assert_eq!(b.subscriber_count(), 0);
    // Sending with no subscribers is a no-op.
    b.send(1);
}

#[tokio::test]
async fn test_subscription_ids_are_distinct() {
    let b = Broadcaster::<u32>::new();
    let (_r1, s1) = b.subscribe(1);
    let (_r2, s2) = b.subscribe(1);
    assert_ne!(s1.id(), s2.id());
}
