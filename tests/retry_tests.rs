//! `retry`: buffering a successful attempt, discarding a failing one, and
//! giving up (while still invoking the factory once per attempt) after
//! the retry budget is spent.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::Collector;
use streamix::factories::retry;
use streamix::{Stamped, Stream, StreamError};

#[tokio::test(start_paused = true)]
async fn a_failed_attempts_values_are_discarded_and_never_mixed_into_the_retry() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let fails_once_then_succeeds = move || {
        let counter = counter.clone();
        Stream::<i32>::from_factory(move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            if attempt == 0 {
                Box::pin(futures::stream::iter(vec![
                    Ok(Stamped::new(1, 0)),
                    Ok(Stamped::new(2, 1)),
                    Err(StreamError::Source {
                        message: "transient".into(),
                    }),
                ]))
            } else {
                Box::pin(futures::stream::iter(vec![
                    Ok(Stamped::new(10, 0)),
                    Ok(Stamped::new(20, 1)),
                    Ok(Stamped::new(30, 2)),
                ]))
            }
        })
    };

    let retried = retry(fails_once_then_succeeds, 2, Duration::ZERO);
    let (collector, values, done) = Collector::new();
    let _sub = retried.subscribe(collector).await;
    done.await.unwrap().unwrap();

    // Only the successful attempt's values are observed; `1` and `2` from
    // the failed first attempt never appear.
    assert_eq!(*values.lock().unwrap(), vec![10, 20, 30]);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn exhausting_retries_surfaces_the_error_and_invokes_the_factory_three_times() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let always_fails = move || {
        let counter = counter.clone();
        Stream::<i32>::from_factory(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(futures::stream::once(async {
                Err::<Stamped<i32>, StreamError>(StreamError::Source {
                    message: "E".into(),
                })
            }))
        })
    };

    let result = retry(always_fails, 2, Duration::ZERO).query().await;

    assert!(matches!(result, Some(Err(StreamError::Source { .. }))));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}
