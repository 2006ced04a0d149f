//! Stream factories: the entry points that turn a value, an
//! iterator, a future, a timer, or an external event source into a
//! [`Stream`].
//!
//! Every factory here stamps the values it produces using a private,
//! factory-local [`Scheduler`]; callers that need factory output ordered
//! against the rest of a pipeline's emissions should route it through a
//! shared scheduler instead (see [`timer`]'s doc comment).

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use futures::stream;
use tokio::time;

use crate::error::StreamError;
use crate::scheduler::{Scheduler, Stamped};
use crate::stream::{Inner, Stream};
use crate::subject::Subject;

/// A synchronous, finite sequence of `values`, then complete. The
/// fixed-argument cousin of [`from_iter`].
pub fn of<T>(values: Vec<T>) -> Stream<T>
where
    T: Clone + Send + 'static,
{
    from_iter(values)
}

/// Wrap any `IntoIterator` into a cold stream: each subscription drives
/// its own fresh iterator from the start.
pub fn from_iter<I>(iterable: I) -> Stream<I::Item>
where
    I: IntoIterator + Clone + Send + 'static,
    I::IntoIter: Send + 'static,
    I::Item: Send + 'static,
{
    Stream::from_factory(move || {
        let scheduler = Scheduler::new();
        let iterable = iterable.clone();
        Box::pin(
            stream::iter(iterable)
                .map(move |v| Ok::<_, StreamError>(Stamped::new(v, scheduler.next_emission_stamp()))),
        )
    })
}

/// Wrap a `futures::Stream` factory into a [`Stream`], stamping each
/// value as it's produced. Distinct from [`Stream::from_factory`] in that
/// the caller's factory only builds plain items, not already-[`Stamped`]
/// ones.
pub fn from_stream<F, S, T>(build: F) -> Stream<T>
where
    F: Fn() -> S + Send + Sync + 'static,
    S: futures::Stream<Item = Result<T, StreamError>> + Send + 'static,
    T: Send + 'static,
{
    Stream::from_factory(move || {
        let scheduler = Scheduler::new();
        let inner = build();
        Box::pin(inner.map(move |item| item.map(|v| Stamped::new(v, scheduler.next_emission_stamp()))))
            as Inner<T>
    })
}

/// Resolve the future built by `build` once per subscription, emitting
/// its value and completing; an `Err` becomes a [`StreamError::Source`].
pub fn from_future<F, Fut, T>(build: F) -> Stream<T>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, String>> + Send + 'static,
    T: Send + 'static,
{
    Stream::from_factory(move || {
        let scheduler = Scheduler::new();
        let fut = build();
        Box::pin(stream::once(async move {
            match fut.await {
                Ok(v) => Ok(Stamped::new(v, scheduler.next_emission_stamp())),
                Err(message) => Err(StreamError::Source { message }),
            }
        }))
    })
}

/// Emit `0` after `delay`, then `1, 2, 3, ...` every `period` thereafter
/// (or every `delay` if `period` is `None`). Ticks target absolute
/// next-tick instants via [`tokio::time::Instant`] rather than
/// accumulated sleeps, so a slow consumer doesn't drift the schedule.
pub fn timer(delay: Duration, period: Option<Duration>) -> Stream<u64> {
    Stream::from_factory(move || {
        let scheduler = Scheduler::new();
        let step = period.unwrap_or(delay);
        Box::pin(stream::unfold(
            (time::Instant::now() + delay, 0u64),
            move |(next_tick, count)| {
                let scheduler = scheduler.clone();
                async move {
                    time::sleep_until(next_tick).await;
                    let stamp = scheduler.next_emission_stamp();
                    Some((
                        Ok::<_, StreamError>(Stamped::new(count, stamp)),
                        (next_tick + step, count + 1),
                    ))
                }
            },
        ))
    })
}

/// `timer(Duration::ZERO, Some(period))`: an immediate first tick, then
/// one every `period`.
pub fn interval(period: Duration) -> Stream<u64> {
    timer(Duration::ZERO, Some(period))
}

enum RetryState<T> {
    Attempting { attempt: usize },
    Flushing { queue: VecDeque<Result<Stamped<T>, StreamError>> },
}

fn retry_step<T, F>(
    state: RetryState<T>,
    factory: F,
    max_retries: usize,
    delay: Duration,
) -> Pin<Box<dyn Future<Output = Option<(Result<Stamped<T>, StreamError>, RetryState<T>)>> + Send>>
where
    T: Send + 'static,
    F: Fn() -> Stream<T> + Clone + Send + Sync + 'static,
{
    Box::pin(async move {
        match state {
            RetryState::Flushing { mut queue } => {
                let item = queue.pop_front()?;
                Some((item, RetryState::Flushing { queue }))
            }
            RetryState::Attempting { attempt } => {
                let mut inner = factory().build_inner();
                let mut buffered: VecDeque<Result<Stamped<T>, StreamError>> = VecDeque::new();
                loop {
                    match inner.next().await {
                        Some(Ok(v)) => buffered.push_back(Ok(v)),
                        Some(Err(e)) => {
                            if attempt < max_retries {
                                time::sleep(delay).await;
                                return retry_step(
                                    RetryState::Attempting { attempt: attempt + 1 },
                                    factory.clone(),
                                    max_retries,
                                    delay,
                                )
                                .await;
                            }
                            buffered.push_back(Err(e));
                            break;
                        }
                        None => break,
                    }
                }
                let item = buffered.pop_front()?;
                Some((item, RetryState::Flushing { queue: buffered }))
            }
        }
    })
}

/// Run `factory()`; if the resulting stream errors before completing,
/// wait `delay` and try again, up to `max_retries` additional attempts.
/// An attempt that succeeds has every value it produced buffered and
/// replayed in order, so a caller never sees a failed attempt's partial
/// output mixed in with a retry's. Each attempt invokes `factory` fresh.
pub fn retry<T, F>(factory: F, max_retries: usize, delay: Duration) -> Stream<T>
where
    T: Send + 'static,
    F: Fn() -> Stream<T> + Clone + Send + Sync + 'static,
{
    Stream::from_factory(move || {
        let factory = factory.clone();
        Box::pin(stream::unfold(
            RetryState::Attempting { attempt: 0 },
            move |state| retry_step(state, factory.clone(), max_retries, delay),
        ))
    })
}

/// Collaborator seam for adapters that bridge an external event source
/// (DOM events, a WebSocket, an HTTP long-poll) into a ref-counted
/// [`Stream`]: implementors receive a [`Subject`] to push values, errors,
/// and completion into once the returned stream gains its first
/// subscriber, and run for as long as they see fit.
pub trait StreamFactory<T>: Send + Sync {
    fn register(&self, subject: Subject<T>) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

/// Build a ref-counted [`Stream`] from a [`StreamFactory`]: the first
/// subscription spawns `factory.register` against a shared [`Subject`],
/// and every subscription after that attaches a fresh reader to the same
/// subject rather than registering again. The general form of the
/// ref-counted connection [`crate::operators::combinators::share_replay`]
/// already does for a plain upstream `Stream`.
pub fn event_register<T, R>(scheduler: Scheduler, factory: R) -> Stream<T>
where
    T: Clone + Send + Sync + 'static,
    R: StreamFactory<T> + 'static,
{
    let subject = Subject::<T>::new(scheduler);
    let started = Arc::new(AtomicBool::new(false));
    let factory = Arc::new(factory);

    Stream::from_factory(move || {
        if !started.swap(true, Ordering::SeqCst) {
            let registration_subject = subject.clone();
            let factory = factory.clone();
            tokio::spawn(async move {
                factory.register(registration_subject).await;
            });
        }
        subject.as_stream().build_inner()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn of_emits_values_then_completes() {
        let stream = of(vec![1, 2, 3]);
        assert_eq!(stream.query().await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn from_iter_gives_each_subscription_a_fresh_iterator() {
        let stream = from_iter(vec![10, 20]);
        let mut inner = stream.build_inner();
        assert_eq!(inner.next().await.unwrap().unwrap().value, 10);
        assert_eq!(inner.next().await.unwrap().unwrap().value, 20);
        assert!(inner.next().await.is_none());

        let mut second = stream.build_inner();
        assert_eq!(second.next().await.unwrap().unwrap().value, 10);
    }

    #[tokio::test]
    async fn from_future_resolves_once() {
        let stream = from_future(|| async { Ok::<_, String>(42) });
        assert_eq!(stream.query().await.unwrap().unwrap(), 42);
    }

    #[tokio::test]
    async fn from_future_rejection_becomes_source_error() {
        let stream = from_future(|| async { Err::<i32, _>("boom".to_string()) });
        let err = stream.query().await.unwrap().unwrap_err();
        assert!(matches!(err, StreamError::Source { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn timer_emits_increasing_ticks() {
        let stream = timer(Duration::from_millis(10), Some(Duration::from_millis(10)));
        let mut inner = stream.build_inner();
        assert_eq!(inner.next().await.unwrap().unwrap().value, 0);
        assert_eq!(inner.next().await.unwrap().unwrap().value, 1);
        assert_eq!(inner.next().await.unwrap().unwrap().value, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_ticks_immediately() {
        let stream = interval(Duration::from_millis(5));
        assert_eq!(stream.query().await.unwrap().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_discards_a_failed_attempts_values_before_retrying() {
        let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = attempts.clone();
        let fails_once_then_succeeds = move || {
            let counter = counter.clone();
            Stream::<i32>::from_factory(move || {
                let attempt = counter.fetch_add(1, Ordering::SeqCst);
                if attempt == 0 {
                    Box::pin(stream::iter(vec![
                        Ok(Stamped::new(1, 0)),
                        Err(StreamError::Source {
                            message: "transient".into(),
                        }),
                    ]))
                } else {
                    Box::pin(stream::iter(vec![
                        Ok(Stamped::new(10, 0)),
                        Ok(Stamped::new(20, 1)),
                    ]))
                }
            })
        };

        let retried = retry(fails_once_then_succeeds, 2, Duration::ZERO);
        let mut inner = retried.build_inner();
        let mut seen = Vec::new();
        while let Some(item) = inner.next().await {
            seen.push(item.unwrap().value);
        }

        assert_eq!(seen, vec![10, 20]);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_gives_up_after_max_retries_invoking_factory_each_time() {
        let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = attempts.clone();
        let failing = move || {
            let counter = counter.clone();
            Stream::<i32>::from_factory(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Box::pin(stream::once(async {
                    Err::<Stamped<i32>, StreamError>(StreamError::Source {
                        message: "boom".into(),
                    })
                }))
            })
        };
        let retried = retry(failing, 2, Duration::ZERO);
        let result = retried.query().await;
        assert!(matches!(result, Some(Err(StreamError::Source { .. }))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
