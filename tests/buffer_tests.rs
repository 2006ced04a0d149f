//! Buffer primitives: multicast ordering, late-reader visibility, and the
//! priming behavior that distinguishes plain/behavior/replay buffers.

use streamix::Stamped;
use streamix::buffer::{BehaviorBuffer, Buffer, PlainBuffer, ReplayBuffer};

#[tokio::test]
async fn plain_buffer_delivers_writes_in_commit_order_to_every_attached_reader() {
    let buf = PlainBuffer::<i32>::new();
    let a = buf.attach_reader();
    let b = buf.attach_reader();

    buf.write(Stamped::new(1, 0)).await;
    buf.write(Stamped::new(2, 1)).await;
    buf.complete().await;

    for reader in [a, b] {
        assert_eq!(buf.read(reader).await.unwrap().map(|s| s.value), Some(1));
        assert_eq!(buf.read(reader).await.unwrap().map(|s| s.value), Some(2));
        assert_eq!(buf.read(reader).await.unwrap(), None);
    }
}

#[tokio::test]
async fn plain_buffer_reader_attached_after_a_write_never_sees_it() {
    let buf = PlainBuffer::<i32>::new();
    let early = buf.attach_reader();
    buf.write(Stamped::new(1, 0)).await;
    let late = buf.attach_reader();
    buf.write(Stamped::new(2, 1)).await;
    buf.complete().await;

    assert_eq!(buf.read(early).await.unwrap().map(|s| s.value), Some(1));
    assert_eq!(buf.read(late).await.unwrap().map(|s| s.value), Some(2));
}

#[tokio::test]
async fn behavior_buffer_primes_a_new_reader_with_the_current_value() {
    let buf = BehaviorBuffer::<i32>::new(Some(7));
    let reader = buf.attach_reader();
    assert_eq!(buf.read(reader).await.unwrap().map(|s| s.value), Some(7));

    buf.write(Stamped::new(8, 1)).await;
    assert_eq!(buf.value(), Some(8));
}

#[tokio::test]
async fn replay_buffer_new_reader_replays_only_the_bounded_window() {
    let buf = ReplayBuffer::<i32>::new(Some(2));
    for (i, v) in [1, 2, 3, 4].into_iter().enumerate() {
        buf.write(Stamped::new(v, i as u64)).await;
    }
    buf.complete().await;

    let reader = buf.attach_reader();
    assert_eq!(buf.read(reader).await.unwrap().map(|s| s.value), Some(3));
    assert_eq!(buf.read(reader).await.unwrap().map(|s| s.value), Some(4));
    assert_eq!(buf.read(reader).await.unwrap(), None);
}

#[tokio::test]
async fn error_is_a_sticky_terminal_like_complete() {
    let buf = PlainBuffer::<i32>::new();
    let reader = buf.attach_reader();
    buf.write(Stamped::new(1, 0)).await;
    buf.error(streamix::StreamError::Source {
        message: "boom".into(),
    })
    .await;
    // A second error after the first is a no-op; the reader still only
    // observes the original one.
    buf.error(streamix::StreamError::Cancelled).await;

    assert_eq!(buf.read(reader).await.unwrap().map(|s| s.value), Some(1));
    let err = buf.read(reader).await.unwrap_err();
    assert!(matches!(err, streamix::StreamError::Source { .. }));
}
