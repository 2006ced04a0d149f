//! Time and rate operators: debounce, throttle, audit,
//! buffer, and sample. All are built directly on `tokio::time`, so tests
//! that need determinism drive them under `tokio::time::pause()` /
//! `advance()` rather than real sleeps.

use std::time::Duration;

use futures::StreamExt;
use futures::stream;
use tokio::time;

use crate::error::StreamError;
use crate::scheduler::Stamped;
use crate::stream::{Inner, Stream};

/// Emit a value only after the source has been quiet for `duration`.
/// Every new value restarts the window. If the source completes while a
/// value is pending, that value is flushed before the stream ends — the
/// "debounce final flush" edge case.
pub fn debounce<T>(duration: Duration) -> impl Fn(Inner<T>) -> Inner<T> + Send + Sync + 'static
where
    T: Clone + Send + 'static,
{
    move |upstream| {
        Box::pin(stream::unfold(
            (upstream, false),
            move |(mut upstream, done)| async move {
                if done {
                    return None;
                }
                let mut pending: Option<Stamped<T>> = None;
                loop {
                    let timer = time::sleep(duration);
                    tokio::pin!(timer);
                    tokio::select! {
                        biased;
                        item = upstream.next() => {
                            match item {
                                Some(Ok(v)) => {
                                    pending = Some(v);
                                }
                                Some(Err(e)) => {
                                    return Some((Err(e), (upstream, true)));
                                }
                                None => {
                                    return pending.take().map(|v| (Ok(v), (upstream, true)));
                                }
                            }
                        }
                        () = &mut timer, if pending.is_some() => {
                            let v = pending.take().expect("guarded by pending.is_some()");
                            return Some((Ok(v), (upstream, false)));
                        }
                    }
                }
            },
        ))
    }
}

/// Emit the first value immediately, then ignore every subsequent value
/// until `duration` has elapsed since that emission (leading-edge
/// throttle; no trailing emission).
pub fn throttle<T>(duration: Duration) -> impl Fn(Inner<T>) -> Inner<T> + Send + Sync + 'static
where
    T: Clone + Send + 'static,
{
    move |upstream| {
        Box::pin(stream::unfold(
            (upstream, None::<time::Instant>, false),
            move |(mut upstream, mut silenced_until, done)| async move {
                if done {
                    return None;
                }
                loop {
                    match upstream.next().await {
                        Some(Ok(v)) => {
                            let now = time::Instant::now();
                            let silenced = silenced_until.is_some_and(|until| now < until);
                            if silenced {
                                continue;
                            }
                            silenced_until = Some(now + duration);
                            return Some((Ok(v), (upstream, silenced_until, false)));
                        }
                        Some(Err(e)) => return Some((Err(e), (upstream, silenced_until, true))),
                        None => return None,
                    }
                }
            },
        ))
    }
}

/// Emit the most recently received value each time `notifier` emits,
/// dropping intermediate values. A tick with nothing new since the last
/// one produces nothing. `notifier`'s own values are ignored; only its
/// timing matters.
pub fn sample<T, N>(notifier: Stream<N>) -> impl Fn(Inner<T>) -> Inner<T> + Send + Sync + 'static
where
    T: Clone + Send + 'static,
    N: Send + 'static,
{
    move |upstream| {
        let notifier_inner = notifier.build_inner();
        Box::pin(stream::unfold(
            (upstream, notifier_inner, None::<Stamped<T>>, false),
            move |(mut upstream, mut notifier_inner, mut latest, done)| async move {
                if done {
                    return None;
                }
                loop {
                    tokio::select! {
                        biased;
                        notif = notifier_inner.next() => {
                            match notif {
                                Some(Ok(_)) => {
                                    if let Some(v) = latest.take() {
                                        return Some((Ok(v), (upstream, notifier_inner, latest, false)));
                                    }
                                }
                                Some(Err(e)) => {
                                    return Some((
                                        Err(StreamError::Notifier { message: e.to_string() }),
                                        (upstream, notifier_inner, latest, true),
                                    ));
                                }
                                None => return None,
                            }
                        }
                        item = upstream.next() => {
                            match item {
                                Some(Ok(v)) => {
                                    latest = Some(v);
                                }
                                Some(Err(e)) => {
                                    return Some((Err(e), (upstream, notifier_inner, latest, true)));
                                }
                                None => return None,
                            }
                        }
                    }
                }
            },
        ))
    }
}

/// Emit the most recent value once per window, the same as
/// [`sample`] run against a fixed `duration`, but re-armed from the
/// *trailing* edge of activity rather than a free-running interval:
/// the window only starts once a value has actually arrived, so an idle
/// source never produces spurious empty ticks.
pub fn audit<T>(duration: Duration) -> impl Fn(Inner<T>) -> Inner<T> + Send + Sync + 'static
where
    T: Clone + Send + 'static,
{
    move |upstream| {
        Box::pin(stream::unfold(
            (upstream, false),
            move |(mut upstream, done)| async move {
                if done {
                    return None;
                }
                // Wait for the first value to arm the window.
                let first = match upstream.next().await {
                    Some(Ok(v)) => v,
                    Some(Err(e)) => return Some((Err(e), (upstream, true))),
                    None => return None,
                };
                let mut latest = first;
                loop {
                    let timer = time::sleep(duration);
                    tokio::pin!(timer);
                    tokio::select! {
                        biased;
                        item = upstream.next() => {
                            match item {
                                Some(Ok(v)) => {
                                    latest = v;
                                }
                                Some(Err(e)) => {
                                    return Some((Err(e), (upstream, true)));
                                }
                                None => {
                                    return Some((Ok(latest), (upstream, true)));
                                }
                            }
                        }
                        () = &mut timer => {
                            return Some((Ok(latest), (upstream, false)));
                        }
                    }
                }
            },
        ))
    }
}

/// Collect values into `Vec<T>` buckets on a fixed `duration` boundary.
/// A tick with nothing accumulated since the last one emits nothing,
/// rather than an empty `Vec`.
pub fn buffer_time<T>(
    duration: Duration,
) -> impl Fn(Inner<T>) -> Inner<Vec<T>> + Send + Sync + 'static
where
    T: Clone + Send + 'static,
{
    move |upstream| {
        let interval = time::interval(duration);
        Box::pin(stream::unfold(
            (upstream, interval, Vec::<Stamped<T>>::new(), false),
            move |(mut upstream, mut interval, mut bucket, done)| async move {
                if done {
                    return None;
                }
                loop {
                    tokio::select! {
                        biased;
                        item = upstream.next() => {
                            match item {
                                Some(Ok(v)) => {
                                    bucket.push(v);
                                }
                                Some(Err(e)) => {
                                    return Some((Err(e), (upstream, interval, bucket, true)));
                                }
                                None => {
                                    if bucket.is_empty() {
                                        return None;
                                    }
                                    let stamp = bucket.last().map_or(0, |s| s.stamp);
                                    let values = bucket.into_iter().map(|s| s.value).collect();
                                    return Some((
                                        Ok(Stamped::new(values, stamp)),
                                        (upstream, interval, Vec::new(), true),
                                    ));
                                }
                            }
                        }
                        _ = interval.tick() => {
                            if bucket.is_empty() {
                                continue;
                            }
                            let stamp = bucket.last().map_or(0, |s| s.stamp);
                            let values = std::mem::take(&mut bucket)
                                .into_iter()
                                .map(|s| s.value)
                                .collect();
                            return Some((
                                Ok(Stamped::new(values, stamp)),
                                (upstream, interval, bucket, false),
                            ));
                        }
                    }
                }
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timed_source(items: Vec<(u64, i32)>) -> Inner<i32> {
        Box::pin(stream::unfold(items.into_iter(), |mut it| async move {
            let (delay_ms, v) = it.next()?;
            time::sleep(Duration::from_millis(delay_ms)).await;
            Some((Ok::<_, StreamError>(Stamped::new(v, delay_ms)), it))
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_emits_only_after_quiet_period() {
        let source = Stream::from_factory(|| timed_source(vec![(0, 1), (10, 2), (10, 3)]));
        let debounced = source.pipe(debounce(Duration::from_millis(50)));
        let mut inner = debounced.build_inner();

        let first = inner.next().await.unwrap().unwrap();
        assert_eq!(first.value, 3);
        assert!(inner.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_flushes_pending_value_on_completion() {
        let source = Stream::from_factory(|| timed_source(vec![(0, 1)]));
        let debounced = source.pipe(debounce(Duration::from_millis(50)));
        let mut inner = debounced.build_inner();

        let first = inner.next().await.unwrap().unwrap();
        assert_eq!(first.value, 1);
        assert!(inner.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_drops_values_within_the_window() {
        let source = Stream::from_factory(|| timed_source(vec![(0, 1), (10, 2), (200, 3)]));
        let throttled = source.pipe(throttle(Duration::from_millis(100)));
        let mut inner = throttled.build_inner();

        assert_eq!(inner.next().await.unwrap().unwrap().value, 1);
        assert_eq!(inner.next().await.unwrap().unwrap().value, 3);
        assert!(inner.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn sample_emits_the_latest_value_only_on_a_notifier_tick() {
        let source = Stream::from_factory(|| timed_source(vec![(0, 1), (10, 2), (10, 3)]));
        let notifier = Stream::from_factory(|| timed_source(vec![(15, 0), (1000, 0)]));
        let sampled = source.pipe(sample(notifier));
        let mut inner = sampled.build_inner();

        // At t=15 the source has produced 1 (t=0) and 2 (t=10) but not yet
        // 3 (t=20), so the tick carries the value that was latest at t=15.
        let first = inner.next().await.unwrap().unwrap();
        assert_eq!(first.value, 2);
        // The source completes at t=20, well before the next notifier tick
        // at t=1015, so the stream ends without a further emission.
        assert!(inner.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn buffer_time_skips_intervals_with_nothing_accumulated() {
        let source = Stream::from_factory(|| timed_source(vec![(10, 1), (10, 2), (200, 3)]));
        let buffered = source.pipe(buffer_time(Duration::from_millis(100)));
        let mut inner = buffered.build_inner();

        // Tick at t=100 carries the two values accumulated by t=20.
        let first = inner.next().await.unwrap().unwrap();
        assert_eq!(first.value, vec![1, 2]);
        // The tick at t=200 has nothing new (the third value doesn't land
        // until t=220) and is skipped entirely rather than emitting `[]`.
        let second = inner.next().await.unwrap().unwrap();
        assert_eq!(second.value, vec![3]);
        assert!(inner.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn buffer_time_does_not_flush_an_empty_bucket_on_completion() {
        let source = Stream::from_factory(|| timed_source(vec![(10, 1)]));
        let buffered = source.pipe(buffer_time(Duration::from_millis(100)));
        let mut inner = buffered.build_inner();

        let first = inner.next().await.unwrap().unwrap();
        assert_eq!(first.value, vec![1]);
        // The source completes right after its only tick flush, with
        // nothing left in the bucket, so no trailing empty `Vec` follows.
        assert!(inner.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn audit_emits_the_latest_value_once_per_trailing_window() {
        let source = Stream::from_factory(|| timed_source(vec![(0, 1), (10, 2), (100, 3)]));
        let audited = source.pipe(audit(Duration::from_millis(50)));
        let mut inner = audited.build_inner();

        // The window arms on the first value (t=0) and re-arms on every
        // later value, so it fires at t=60 carrying whatever was latest
        // then (2, received at t=10).
        let first = inner.next().await.unwrap().unwrap();
        assert_eq!(first.value, 2);
        // The source completes right as the third value lands, flushing it
        // immediately rather than waiting out the rest of the window.
        let second = inner.next().await.unwrap().unwrap();
        assert_eq!(second.value, 3);
        assert!(inner.next().await.is_none());
    }
}
