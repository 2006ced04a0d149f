//! Combinators and higher-order operators: the bulk of the
//! public operator surface. Simple synchronous transforms (`map`,
//! `filter`, `scan`, `reduce`) run directly over [`Inner`]'s `Result`
//! items; the flattening operators (`switch_map`, `merge_map`,
//! `concat_map`) and the N-ary combinators (`combine_latest`, `zip`,
//! `concat`, `share_replay`) operate on [`Stream`] handles directly,
//! since they each need to invoke more than one factory per subscription.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use futures::stream::{self, FuturesUnordered};

use crate::error::StreamError;
use crate::operator::{ConcurrencyConfig, ExpandConfig, Traversal};
use crate::scheduler::{Scheduler, Stamped};
use crate::stream::{Inner, Stream};
use crate::subject::ReplaySubject;

// ---------------------------------------------------------------------------
// Basic transforms
// ---------------------------------------------------------------------------

/// Transform every value with an infallible function.
pub fn map<T, U, F>(f: F) -> impl Fn(Inner<T>) -> Inner<U> + Send + Sync + 'static
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> U + Clone + Send + Sync + 'static,
{
    move |upstream| {
        let f = f.clone();
        Box::pin(upstream.map(move |item| item.map(|s| s.map(|v| f(v)))))
    }
}

/// Transform every value with a function that can itself fail; a
/// returned `Err` becomes an [`StreamError::Operator`] and ends the
/// stream, the Rust analogue of a callback that throws.
pub fn try_map<T, U, F>(
    operator_name: &'static str,
    f: F,
) -> impl Fn(Inner<T>) -> Inner<U> + Send + Sync + 'static
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Result<U, String> + Clone + Send + Sync + 'static,
{
    move |upstream| {
        let f = f.clone();
        Box::pin(upstream.map(move |item| {
            let stamped = item?;
            let stamp = stamped.stamp;
            match f(stamped.value) {
                Ok(v) => Ok(Stamped::new(v, stamp)),
                Err(message) => Err(StreamError::operator(operator_name, message)),
            }
        }))
    }
}

/// Keep only values for which `predicate` returns `true`. Errors always
/// pass through.
pub fn filter<T, F>(predicate: F) -> impl Fn(Inner<T>) -> Inner<T> + Send + Sync + 'static
where
    T: Send + 'static,
    F: Fn(&T) -> bool + Clone + Send + Sync + 'static,
{
    move |upstream| {
        let predicate = predicate.clone();
        Box::pin(upstream.filter(move |item| {
            let keep = match item {
                Ok(stamped) => predicate(&stamped.value),
                Err(_) => true,
            };
            futures::future::ready(keep)
        }))
    }
}

/// Fold every value against an accumulator, emitting the updated
/// accumulator on each step (a running total, not just the final one).
pub fn scan<T, A, F>(initial: A, f: F) -> impl Fn(Inner<T>) -> Inner<A> + Send + Sync + 'static
where
    T: Send + 'static,
    A: Clone + Send + 'static,
    F: Fn(A, T) -> A + Clone + Send + Sync + 'static,
{
    move |upstream| {
        let f = f.clone();
        let initial = initial.clone();
        Box::pin(stream::unfold(
            (upstream, initial, f),
            |(mut upstream, acc, f)| async move {
                match upstream.next().await {
                    Some(Ok(stamped)) => {
                        let new_acc = f(acc, stamped.value);
                        let out = new_acc.clone();
                        Some((Ok(Stamped::new(out, stamped.stamp)), (upstream, new_acc, f)))
                    }
                    Some(Err(e)) => Some((Err(e), (upstream, acc, f))),
                    None => None,
                }
            },
        ))
    }
}

/// Emit a single accumulated value when the source completes (a fold,
/// not a running [`scan`]).
pub fn reduce<T, A, F>(initial: A, f: F) -> impl Fn(Inner<T>) -> Inner<A> + Send + Sync + 'static
where
    T: Send + 'static,
    A: Clone + Send + 'static,
    F: Fn(A, T) -> A + Clone + Send + Sync + 'static,
{
    move |upstream| {
        let f = f.clone();
        let initial = initial.clone();
        Box::pin(stream::unfold(
            Some((upstream, initial, f)),
            |state| async move {
                let (mut upstream, mut acc, f) = state?;
                let mut last_stamp = 0u64;
                loop {
                    match upstream.next().await {
                        Some(Ok(stamped)) => {
                            last_stamp = stamped.stamp;
                            acc = f(acc, stamped.value);
                        }
                        Some(Err(e)) => return Some((Err(e), None)),
                        None => return Some((Ok(Stamped::new(acc, last_stamp)), None)),
                    }
                }
            },
        ))
    }
}

// ---------------------------------------------------------------------------
// Selection: take*/skip*/delay_until
// ---------------------------------------------------------------------------

/// Emit at most the first `n` values, then complete.
pub fn take<T>(n: usize) -> impl Fn(Inner<T>) -> Inner<T> + Send + Sync + 'static
where
    T: Send + 'static,
{
    move |upstream| Box::pin(upstream.take(n))
}

/// Emit values while `predicate` holds, then complete, excluding the
/// first value for which it doesn't. Errors always pass through and end
/// the stream.
pub fn take_while<T, F>(predicate: F) -> impl Fn(Inner<T>) -> Inner<T> + Send + Sync + 'static
where
    T: Send + 'static,
    F: Fn(&T) -> bool + Clone + Send + Sync + 'static,
{
    move |upstream| {
        let predicate = predicate.clone();
        Box::pin(stream::unfold(
            (upstream, predicate, false),
            |(mut upstream, predicate, done)| async move {
                if done {
                    return None;
                }
                match upstream.next().await {
                    Some(Ok(s)) if predicate(&s.value) => {
                        Some((Ok(s), (upstream, predicate, false)))
                    }
                    Some(Ok(_)) => None,
                    Some(Err(e)) => Some((Err(e), (upstream, predicate, true))),
                    None => None,
                }
            },
        ))
    }
}

/// Emit values until `notifier` produces its first value or completes,
/// then complete (excluding anything from `notifier` itself).
pub fn take_until<T, N>(notifier: Stream<N>) -> impl Fn(Inner<T>) -> Inner<T> + Send + Sync + 'static
where
    T: Send + 'static,
    N: Send + 'static,
{
    move |upstream| {
        let notifier_inner = notifier.build_inner();
        Box::pin(stream::unfold(
            (upstream, notifier_inner, false),
            |(mut upstream, mut notifier_inner, done)| async move {
                if done {
                    return None;
                }
                tokio::select! {
                    biased;
                    notif = notifier_inner.next() => {
                        match notif {
                            Some(Err(e)) => Some((
                                Err(StreamError::Notifier { message: e.to_string() }),
                                (upstream, notifier_inner, true),
                            )),
                            _ => None,
                        }
                    }
                    item = upstream.next() => {
                        item.map(|v| (v, (upstream, notifier_inner, false)))
                    }
                }
            },
        ))
    }
}

/// Drop the first `n` values, then pass the rest through unchanged.
/// Errors always pass through immediately, uncounted.
pub fn skip<T>(n: usize) -> impl Fn(Inner<T>) -> Inner<T> + Send + Sync + 'static
where
    T: Send + 'static,
{
    move |upstream| {
        Box::pin(stream::unfold(
            (upstream, n),
            |(mut upstream, mut remaining)| async move {
                loop {
                    match upstream.next().await {
                        Some(Ok(s)) => {
                            if remaining > 0 {
                                remaining -= 1;
                                continue;
                            }
                            return Some((Ok(s), (upstream, remaining)));
                        }
                        Some(Err(e)) => return Some((Err(e), (upstream, remaining))),
                        None => return None,
                    }
                }
            },
        ))
    }
}

/// Drop values while `predicate` holds, then pass the rest through
/// unchanged (including the first value for which it doesn't).
pub fn skip_while<T, F>(predicate: F) -> impl Fn(Inner<T>) -> Inner<T> + Send + Sync + 'static
where
    T: Send + 'static,
    F: Fn(&T) -> bool + Clone + Send + Sync + 'static,
{
    move |upstream| {
        let predicate = predicate.clone();
        Box::pin(stream::unfold(
            (upstream, predicate, true),
            |(mut upstream, predicate, mut skipping)| async move {
                loop {
                    match upstream.next().await {
                        Some(Ok(s)) => {
                            if skipping && predicate(&s.value) {
                                continue;
                            }
                            skipping = false;
                            return Some((Ok(s), (upstream, predicate, skipping)));
                        }
                        Some(Err(e)) => return Some((Err(e), (upstream, predicate, skipping))),
                        None => return None,
                    }
                }
            },
        ))
    }
}

/// Drop values until `notifier` produces its first value, then pass the
/// rest through. If `notifier` completes without ever emitting, the gate
/// never opens and nothing is ever forwarded.
pub fn skip_until<T, N>(notifier: Stream<N>) -> impl Fn(Inner<T>) -> Inner<T> + Send + Sync + 'static
where
    T: Send + 'static,
    N: Send + 'static,
{
    move |upstream| {
        let notifier_inner = notifier.build_inner();
        Box::pin(stream::unfold(
            (upstream, notifier_inner, false),
            |(mut upstream, mut notifier_inner, mut opened)| async move {
                loop {
                    if opened {
                        return upstream.next().await.map(|v| (v, (upstream, notifier_inner, true)));
                    }
                    tokio::select! {
                        biased;
                        notif = notifier_inner.next() => {
                            match notif {
                                Some(Ok(_)) => { opened = true; }
                                Some(Err(e)) => {
                                    return Some((
                                        Err(StreamError::Notifier { message: e.to_string() }),
                                        (upstream, notifier_inner, true),
                                    ));
                                }
                                None => return None,
                            }
                        }
                        item = upstream.next() => {
                            if item.is_none() {
                                return None;
                            }
                        }
                    }
                }
            },
        ))
    }
}

enum DelayUntilState<T, N> {
    Buffering {
        upstream: Inner<T>,
        notifier: Inner<N>,
        buffer: VecDeque<Stamped<T>>,
    },
    Flushing {
        upstream: Inner<T>,
        buffer: VecDeque<Stamped<T>>,
    },
}

fn delay_until_step<T, N>(
    state: DelayUntilState<T, N>,
) -> Pin<Box<dyn Future<Output = Option<(Result<Stamped<T>, StreamError>, DelayUntilState<T, N>)>> + Send>>
where
    T: Send + 'static,
    N: Send + 'static,
{
    Box::pin(async move {
        match state {
            DelayUntilState::Flushing {
                mut upstream,
                mut buffer,
            } => {
                if let Some(v) = buffer.pop_front() {
                    return Some((Ok(v), DelayUntilState::Flushing { upstream, buffer }));
                }
                upstream
                    .next()
                    .await
                    .map(|v| (v, DelayUntilState::Flushing { upstream, buffer }))
            }
            DelayUntilState::Buffering {
                mut upstream,
                mut notifier,
                mut buffer,
            } => loop {
                tokio::select! {
                    biased;
                    notif = notifier.next() => {
                        match notif {
                            Some(Ok(_)) => {
                                return delay_until_step(DelayUntilState::Flushing { upstream, buffer }).await;
                            }
                            Some(Err(e)) => {
                                return Some((
                                    Err(StreamError::Notifier { message: e.to_string() }),
                                    DelayUntilState::Flushing { upstream, buffer: VecDeque::new() },
                                ));
                            }
                            None => return None,
                        }
                    }
                    item = upstream.next() => {
                        match item {
                            Some(Ok(v)) => buffer.push_back(v),
                            Some(Err(e)) => {
                                return Some((Err(e), DelayUntilState::Flushing { upstream, buffer: VecDeque::new() }));
                            }
                            None => return None,
                        }
                    }
                }
            },
        }
    })
}

/// Buffer every value until `notifier` produces its first value, then
/// flush the buffer in order and pass the rest through live. If
/// `notifier` completes without ever emitting, everything buffered (and
/// anything after) is discarded.
pub fn delay_until<T, N>(notifier: Stream<N>) -> impl Fn(Inner<T>) -> Inner<T> + Send + Sync + 'static
where
    T: Send + 'static,
    N: Send + 'static,
{
    move |upstream| {
        let notifier_inner = notifier.build_inner();
        Box::pin(stream::unfold(
            DelayUntilState::Buffering {
                upstream,
                notifier: notifier_inner,
                buffer: VecDeque::new(),
            },
            delay_until_step,
        ))
    }
}

// ---------------------------------------------------------------------------
// Flattening: switch_map / concat_map / merge_map
// ---------------------------------------------------------------------------

struct SwitchMapState<T, U, F> {
    upstream: Inner<T>,
    current: Option<Inner<U>>,
    f: F,
    upstream_done: bool,
}

async fn switch_map_step<T, U, F>(
    mut state: SwitchMapState<T, U, F>,
) -> Option<(Result<Stamped<U>, StreamError>, SwitchMapState<T, U, F>)>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Stream<U> + Send + Sync + 'static,
{
    loop {
        let has_current = state.current.is_some();
        if !has_current && state.upstream_done {
            return None;
        }
        if has_current && state.upstream_done {
            match state.current.as_mut().unwrap().next().await {
                Some(v) => return Some((v, state)),
                None => {
                    state.current = None;
                    continue;
                }
            }
        }
        if !has_current {
            match state.upstream.next().await {
                Some(Ok(v)) => {
                    let next = (state.f)(v.value);
                    state.current = Some(next.build_inner());
                    continue;
                }
                Some(Err(e)) => {
                    state.upstream_done = true;
                    return Some((Err(e), state));
                }
                None => {
                    state.upstream_done = true;
                    continue;
                }
            }
        }
        tokio::select! {
            biased;
            src = state.upstream.next() => {
                match src {
                    Some(Ok(v)) => {
                        let next = (state.f)(v.value);
                        state.current = Some(next.build_inner());
                    }
                    Some(Err(e)) => {
                        state.upstream_done = true;
                        return Some((Err(e), state));
                    }
                    None => { state.upstream_done = true; }
                }
            }
            item = state.current.as_mut().unwrap().next() => {
                match item {
                    Some(v) => return Some((v, state)),
                    None => { state.current = None; }
                }
            }
        }
    }
}

/// Project each value into a new inner stream, switching to it
/// immediately and dropping whatever inner stream was previously active.
pub fn switch_map<T, U, F>(f: F) -> impl Fn(Inner<T>) -> Inner<U> + Send + Sync + 'static
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Stream<U> + Clone + Send + Sync + 'static,
{
    move |upstream| {
        let f = f.clone();
        Box::pin(stream::unfold(
            SwitchMapState {
                upstream,
                current: None,
                f,
                upstream_done: false,
            },
            switch_map_step,
        ))
    }
}

struct ConcatMapState<T, U, F> {
    upstream: Inner<T>,
    current: Option<Inner<U>>,
    f: F,
    upstream_done: bool,
}

async fn concat_map_step<T, U, F>(
    mut state: ConcatMapState<T, U, F>,
) -> Option<(Result<Stamped<U>, StreamError>, ConcatMapState<T, U, F>)>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Stream<U> + Send + Sync + 'static,
{
    loop {
        if let Some(current) = state.current.as_mut() {
            match current.next().await {
                Some(v) => return Some((v, state)),
                None => state.current = None,
            }
        } else if state.upstream_done {
            return None;
        } else {
            match state.upstream.next().await {
                Some(Ok(v)) => {
                    let next = (state.f)(v.value);
                    state.current = Some(next.build_inner());
                }
                Some(Err(e)) => {
                    state.upstream_done = true;
                    return Some((Err(e), state));
                }
                None => state.upstream_done = true,
            }
        }
    }
}

/// Project each value into a new inner stream, running each to full
/// completion before starting the next one (sequential, order-preserving
/// flattening).
pub fn concat_map<T, U, F>(f: F) -> impl Fn(Inner<T>) -> Inner<U> + Send + Sync + 'static
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Stream<U> + Clone + Send + Sync + 'static,
{
    move |upstream| {
        let f = f.clone();
        Box::pin(stream::unfold(
            ConcatMapState {
                upstream,
                current: None,
                f,
                upstream_done: false,
            },
            concat_map_step,
        ))
    }
}

type PendingItem<U> =
    Pin<Box<dyn Future<Output = (Option<Result<Stamped<U>, StreamError>>, Inner<U>)> + Send>>;

async fn advance<U: Send + 'static>(mut s: Inner<U>) -> (Option<Result<Stamped<U>, StreamError>>, Inner<U>) {
    let item = s.next().await;
    (item, s)
}

struct MergeMapState<T, U, F> {
    upstream: Inner<T>,
    f: F,
    limit: Option<usize>,
    active: FuturesUnordered<PendingItem<U>>,
    upstream_done: bool,
}

async fn merge_map_step<T, U, F>(
    mut state: MergeMapState<T, U, F>,
) -> Option<(Result<Stamped<U>, StreamError>, MergeMapState<T, U, F>)>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Stream<U> + Send + Sync + 'static,
{
    loop {
        let under_limit = state.limit.map_or(true, |l| state.active.len() < l);
        let can_pull_upstream = !state.upstream_done && under_limit;
        let has_active = !state.active.is_empty();

        if !can_pull_upstream && !has_active {
            return None;
        }

        if can_pull_upstream && has_active {
            tokio::select! {
                biased;
                src = state.upstream.next() => {
                    match src {
                        Some(Ok(v)) => {
                            let next = (state.f)(v.value).build_inner();
                            state.active.push(Box::pin(advance(next)));
                        }
                        Some(Err(e)) => {
                            state.upstream_done = true;
                            return Some((Err(e), state));
                        }
                        None => { state.upstream_done = true; }
                    }
                }
                res = state.active.next() => {
                    if let Some((Some(item), s)) = res {
                        state.active.push(Box::pin(advance(s)));
                        return Some((item, state));
                    }
                }
            }
        } else if can_pull_upstream {
            match state.upstream.next().await {
                Some(Ok(v)) => {
                    let next = (state.f)(v.value).build_inner();
                    state.active.push(Box::pin(advance(next)));
                }
                Some(Err(e)) => {
                    state.upstream_done = true;
                    return Some((Err(e), state));
                }
                None => state.upstream_done = true,
            }
        } else if let Some((Some(item), s)) = state.active.next().await {
            state.active.push(Box::pin(advance(s)));
            return Some((item, state));
        }
    }
}

/// Project each value into a new inner stream, running up to
/// `concurrency.limit` of them concurrently (unbounded if `None`) and
/// interleaving their output as it arrives.
pub fn merge_map<T, U, F>(
    f: F,
    concurrency: ConcurrencyConfig,
) -> impl Fn(Inner<T>) -> Inner<U> + Send + Sync + 'static
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Stream<U> + Clone + Send + Sync + 'static,
{
    move |upstream| {
        let f = f.clone();
        Box::pin(stream::unfold(
            MergeMapState {
                upstream,
                f,
                limit: concurrency.limit,
                active: FuturesUnordered::new(),
                upstream_done: false,
            },
            merge_map_step,
        ))
    }
}

// ---------------------------------------------------------------------------
// expand: recursive flattening
// ---------------------------------------------------------------------------

struct ExpandState<T, F> {
    upstream: Inner<T>,
    queue: VecDeque<(Stamped<T>, usize)>,
    f: F,
    max_depth: Option<usize>,
    traversal: Traversal,
    upstream_done: bool,
}

async fn expand_step<T, F>(
    mut state: ExpandState<T, F>,
) -> Option<(Result<Stamped<T>, StreamError>, ExpandState<T, F>)>
where
    T: Clone + Send + 'static,
    F: Fn(T) -> Stream<T> + Send + Sync + 'static,
{
    loop {
        if let Some((stamped, depth)) = state.queue.pop_front() {
            if state.max_depth.map_or(true, |max| depth < max) {
                let mut child_inner = (state.f)(stamped.value.clone()).build_inner();
                while let Some(item) = child_inner.next().await {
                    match item {
                        Ok(child) => match state.traversal {
                            // Depth-first: push new children to the front so
                            // they're visited before this value's remaining
                            // siblings (a stack). Breadth-first: push to the
                            // back so every pending value at the current
                            // level is visited before descending (a queue).
                            Traversal::Depth => state.queue.push_front((child, depth + 1)),
                            Traversal::Breadth => state.queue.push_back((child, depth + 1)),
                        },
                        Err(e) => return Some((Err(e), state)),
                    }
                }
            }
            return Some((Ok(stamped), state));
        }
        if state.upstream_done {
            return None;
        }
        match state.upstream.next().await {
            Some(Ok(v)) => state.queue.push_back((v, 0)),
            Some(Err(e)) => {
                state.upstream_done = true;
                return Some((Err(e), state));
            }
            None => state.upstream_done = true,
        }
    }
}

/// Recursively expand each value through `f`, emitting the original
/// value plus every value produced by feeding it (and its descendants)
/// back through `f`, up to `config.max_depth`, in `config.traversal`
/// order.
pub fn expand<T, F>(f: F, config: ExpandConfig) -> impl Fn(Inner<T>) -> Inner<T> + Send + Sync + 'static
where
    T: Clone + Send + 'static,
    F: Fn(T) -> Stream<T> + Clone + Send + Sync + 'static,
{
    move |upstream| {
        let f = f.clone();
        Box::pin(stream::unfold(
            ExpandState {
                upstream,
                queue: VecDeque::new(),
                f,
                max_depth: config.max_depth,
                traversal: config.traversal,
                upstream_done: false,
            },
            expand_step,
        ))
    }
}

// ---------------------------------------------------------------------------
// N-ary combinators
// ---------------------------------------------------------------------------

/// Emit `(a, b)` whenever either input updates, once both have produced
/// at least one value. Ties (both ready in the same poll) resolve `a`
/// before `b`.
pub fn combine_latest<A, B>(a: Stream<A>, b: Stream<B>) -> Stream<(A, B)>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
{
    Stream::from_factory(move || {
        let inner_a = a.build_inner();
        let inner_b = b.build_inner();
        Box::pin(stream::unfold(
            (inner_a, inner_b, None::<Stamped<A>>, None::<Stamped<B>>, false, false),
            |(mut ia, mut ib, mut la, mut lb, mut a_done, mut b_done)| async move {
                loop {
                    if a_done && b_done {
                        return None;
                    }
                    tokio::select! {
                        biased;
                        item = ia.next(), if !a_done => {
                            match item {
                                Some(Ok(v)) => la = Some(v),
                                Some(Err(e)) => return Some((Err(e), (ia, ib, la, lb, true, b_done))),
                                None => a_done = true,
                            }
                        }
                        item = ib.next(), if !b_done => {
                            match item {
                                Some(Ok(v)) => lb = Some(v),
                                Some(Err(e)) => return Some((Err(e), (ia, ib, la, lb, a_done, true))),
                                None => b_done = true,
                            }
                        }
                    }
                    if let (Some(av), Some(bv)) = (&la, &lb) {
                        let stamp = av.stamp.max(bv.stamp);
                        let out = Stamped::new((av.value.clone(), bv.value.clone()), stamp);
                        return Some((Ok(out), (ia, ib, la, lb, a_done, b_done)));
                    }
                }
            },
        ))
    })
}

/// The N-ary form of [`combine_latest`]: emits a snapshot `Vec` whenever
/// any input updates, once every input has produced at least one value.
type IndexedPending<T> =
    Pin<Box<dyn Future<Output = (usize, Option<Result<Stamped<T>, StreamError>>, Inner<T>)> + Send>>;

pub fn combine_latest_all<T>(streams: Vec<Stream<T>>) -> Stream<Vec<T>>
where
    T: Clone + Send + 'static,
{
    Stream::from_factory(move || {
        let n = streams.len();
        let pending: FuturesUnordered<IndexedPending<T>> = streams
            .iter()
            .enumerate()
            .map(|(i, s)| Box::pin(advance_indexed(i, s.build_inner())) as IndexedPending<T>)
            .collect();
        Box::pin(stream::unfold(
            (pending, vec![None::<Stamped<T>>; n], vec![false; n]),
            |(mut pending, mut latest, mut done)| async move {
                loop {
                    if done.iter().all(|&d| d) {
                        return None;
                    }
                    let (i, item, s) = pending.next().await?;
                    match item {
                        Some(Ok(v)) => {
                            latest[i] = Some(v);
                            pending.push(Box::pin(advance_indexed(i, s)));
                        }
                        Some(Err(e)) => {
                            done[i] = true;
                            return Some((Err(e), (pending, latest, done)));
                        }
                        None => done[i] = true,
                    }
                    if latest.iter().all(Option::is_some) {
                        let stamp = latest.iter().flatten().map(|s| s.stamp).max().unwrap_or(0);
                        let values: Vec<T> =
                            latest.iter().map(|s| s.as_ref().unwrap().value.clone()).collect();
                        return Some((Ok(Stamped::new(values, stamp)), (pending, latest, done)));
                    }
                }
            },
        ))
    })
}

async fn advance_indexed<T: Send + 'static>(
    i: usize,
    mut s: Inner<T>,
) -> (usize, Option<Result<Stamped<T>, StreamError>>, Inner<T>) {
    let item = s.next().await;
    (i, item, s)
}

/// Pair up the `i`-th value from each input. Ends as soon as either input
/// does.
pub fn zip<A, B>(a: Stream<A>, b: Stream<B>) -> Stream<(A, B)>
where
    A: Send + 'static,
    B: Send + 'static,
{
    Stream::from_factory(move || {
        let inner_a = a.build_inner();
        let inner_b = b.build_inner();
        Box::pin(stream::unfold(
            (inner_a, inner_b),
            |(mut ia, mut ib)| async move {
                let av = match ia.next().await {
                    Some(Ok(v)) => v,
                    Some(Err(e)) => return Some((Err(e), (ia, ib))),
                    None => return None,
                };
                let bv = match ib.next().await {
                    Some(Ok(v)) => v,
                    Some(Err(e)) => return Some((Err(e), (ia, ib))),
                    None => return None,
                };
                let stamp = av.stamp.max(bv.stamp);
                Some((Ok(Stamped::new((av.value, bv.value), stamp)), (ia, ib)))
            },
        ))
    })
}

/// The N-ary form of [`zip`]: pairs up the `i`-th value across every
/// input, ending as soon as any input does.
pub fn zip_all<T>(streams: Vec<Stream<T>>) -> Stream<Vec<T>>
where
    T: Send + 'static,
{
    Stream::from_factory(move || {
        let inners: Vec<Inner<T>> = streams.iter().map(Stream::build_inner).collect();
        Box::pin(stream::unfold(inners, |mut inners| async move {
            let mut values = Vec::with_capacity(inners.len());
            let mut max_stamp = 0u64;
            for inner in inners.iter_mut() {
                match inner.next().await {
                    Some(Ok(v)) => {
                        max_stamp = max_stamp.max(v.stamp);
                        values.push(v.value);
                    }
                    Some(Err(e)) => return Some((Err(e), inners)),
                    None => return None,
                }
            }
            Some((Ok(Stamped::new(values, max_stamp)), inners))
        }))
    })
}

/// Run each stream in `streams` to completion in order, emitting its
/// values before starting the next.
pub fn concat<T>(streams: Vec<Stream<T>>) -> Stream<T>
where
    T: Send + 'static,
{
    Stream::from_factory(move || {
        let mut queue: VecDeque<Stream<T>> = streams.iter().cloned().collect();
        let first = queue.pop_front().map(|s| s.build_inner());
        Box::pin(stream::unfold((first, queue), |(current, mut queue)| async move {
            let mut current = current?;
            loop {
                match current.next().await {
                    Some(v) => return Some((v, (Some(current), queue))),
                    None => match queue.pop_front() {
                        Some(next_stream) => current = next_stream.build_inner(),
                        None => return None,
                    },
                }
            }
        }))
    })
}

/// Multicast `source` to many subscribers, connecting to it at most once
/// (on the first subscription) and replaying the last `capacity` values
/// to every subscriber that joins afterward.
pub fn share_replay<T>(source: &Stream<T>, capacity: Option<usize>) -> Stream<T>
where
    T: Clone + Send + Sync + 'static,
{
    let source = source.clone();
    let subject = Arc::new(ReplaySubject::<T>::new(Scheduler::new(), capacity));
    let started = Arc::new(AtomicBool::new(false));

    Stream::from_factory(move || {
        if !started.swap(true, Ordering::SeqCst) {
            let subject = subject.clone();
            let mut upstream = source.build_inner();
            tokio::spawn(async move {
                loop {
                    match upstream.next().await {
                        Some(Ok(v)) => subject.next(v.value).await,
                        Some(Err(e)) => {
                            subject.error(e).await;
                            break;
                        }
                        None => {
                            subject.complete().await;
                            break;
                        }
                    }
                }
            });
        }
        subject.as_stream().build_inner()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_values<T: Clone + Send + 'static>(values: Vec<T>) -> Stream<T> {
        Stream::from_factory(move || {
            let values = values.clone();
            Box::pin(stream::iter(
                values
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| Ok::<_, StreamError>(Stamped::new(v, i as u64))),
            ))
        })
    }

    async fn collect<T: Clone + Send + 'static>(stream: &Stream<T>) -> Vec<T> {
        let mut inner = stream.build_inner();
        let mut out = Vec::new();
        while let Some(item) = inner.next().await {
            out.push(item.unwrap().value);
        }
        out
    }

    #[tokio::test]
    async fn map_then_filter() {
        let source = from_values(vec![1, 2, 3]);
        let doubled = source.pipe(map(|x: i32| x * 2));
        let evens_only = doubled.pipe(filter(|x: &i32| *x != 4));
        assert_eq!(collect(&evens_only).await, vec![2, 6]);
    }

    #[tokio::test]
    async fn scan_emits_running_total() {
        let source = from_values(vec![1, 2, 3]);
        let totals = source.pipe(scan(0, |acc, x: i32| acc + x));
        assert_eq!(collect(&totals).await, vec![1, 3, 6]);
    }

    #[tokio::test]
    async fn reduce_emits_only_final_value() {
        let source = from_values(vec![1, 2, 3]);
        let total = source.pipe(reduce(0, |acc, x: i32| acc + x));
        assert_eq!(collect(&total).await, vec![6]);
    }

    #[tokio::test]
    async fn take_then_filter_composition() {
        let source = from_values(vec![1, 2, 3, 4, 5]);
        let taken = source.pipe(take(3));
        assert_eq!(collect(&taken).await, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn combine_latest_waits_for_both_sides() {
        let a = from_values(vec![1, 2]);
        let b = from_values(vec!["x".to_string()]);
        let combined = combine_latest(a, b);
        assert_eq!(
            collect(&combined).await,
            vec![(2, "x".to_string())]
        );
    }

    #[tokio::test]
    async fn zip_pairs_by_index() {
        let a = from_values(vec![1, 2, 3]);
        let b = from_values(vec!["a".to_string(), "b".to_string()]);
        let zipped = zip(a, b);
        assert_eq!(
            collect(&zipped).await,
            vec![(1, "a".to_string()), (2, "b".to_string())]
        );
    }

    #[tokio::test]
    async fn concat_runs_sources_in_order() {
        let first = from_values(vec![1, 2]);
        let second = from_values(vec![3, 4]);
        let combined = concat(vec![first, second]);
        assert_eq!(collect(&combined).await, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn switch_map_drops_the_previous_inner_stream() {
        let source = from_values(vec![1, 2]);
        let switched = source.pipe(switch_map(|n: i32| from_values(vec![n * 10, n * 10 + 1])));
        // The first projected stream (from 1) never gets to emit its second
        // value before the second source value arrives and switches away.
        let out = collect(&switched).await;
        assert!(out.contains(&20) && out.contains(&21));
    }

    #[tokio::test]
    async fn concat_map_runs_each_inner_stream_fully() {
        let source = from_values(vec![1, 2]);
        let mapped = source.pipe(concat_map(|n: i32| from_values(vec![n * 10, n * 10 + 1])));
        assert_eq!(collect(&mapped).await, vec![10, 11, 20, 21]);
    }

    #[tokio::test]
    async fn merge_map_interleaves_concurrent_inner_streams() {
        let source = from_values(vec![1, 2]);
        let merged = source.pipe(merge_map(
            |n: i32| from_values(vec![n * 10, n * 10 + 1]),
            ConcurrencyConfig::unbounded(),
        ));
        let mut out = collect(&merged).await;
        out.sort_unstable();
        assert_eq!(out, vec![10, 11, 20, 21]);
    }

    #[tokio::test]
    async fn expand_emits_seed_before_its_children() {
        // 1 -> [2] -> [] ; 2 stops recursing (no children of its own).
        let source = from_values(vec![1]);
        let expanded = source.pipe(expand(
            |n: i32| {
                if n == 1 {
                    from_values(vec![2])
                } else {
                    from_values(vec![])
                }
            },
            ExpandConfig::default(),
        ));
        assert_eq!(collect(&expanded).await, vec![1, 2]);
    }

    #[tokio::test]
    async fn expand_respects_max_depth() {
        let source = from_values(vec![1]);
        let expanded = source.pipe(expand(
            |n: i32| from_values(vec![n + 1]),
            ExpandConfig {
                max_depth: Some(2),
                ..ExpandConfig::default()
            },
        ));
        assert_eq!(collect(&expanded).await, vec![1, 2, 3]);
    }
}
