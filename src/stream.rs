//! The public `Stream<T>` handle: a cheaply cloneable,
//! many-times-subscribable wrapper around a factory that produces the
//! internal, stamp-carrying poll stream.
//!
//! A raw [`futures::Stream`] can only be polled to exhaustion once, which
//! doesn't fit a cold stream that needs to restart its source on every
//! subscription. `Stream<T>` works around this the way a cold observable
//! does in other languages: it stores a factory closure and calls it
//! fresh each time [`Stream::subscribe`] runs, rather than storing a live
//! stream object.

use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;

use crate::error::StreamError;
use crate::receiver::{Receiver, Subscription};
use crate::scheduler::Stamped;

/// The internal representation shared by every operator: a boxed,
/// stamp-carrying, fallible stream.
pub type Inner<T> = Pin<Box<dyn futures::Stream<Item = Result<Stamped<T>, StreamError>> + Send>>;

/// A factory that can be invoked once per subscription to produce a fresh
/// [`Inner`].
pub type Factory<T> = Arc<dyn Fn() -> Inner<T> + Send + Sync>;

/// A cold-by-default, hot-compatible async sequence of `T`.
///
/// Cloning a `Stream` is cheap (an `Arc` clone of the factory); each clone
/// subscribes independently. Whether subscribing re-runs a source from
/// scratch (cold) or attaches to shared, already-flowing state (hot) is
/// entirely a property of what the factory does — [`crate::subject`]'s
/// `as_stream` methods build factories that attach to a shared buffer
/// instead of recomputing anything.
#[derive(Clone)]
pub struct Stream<T> {
    factory: Factory<T>,
}

impl<T: Send + 'static> Stream<T> {
    /// Build a stream from a factory that produces a fresh [`Inner`] on
    /// every call.
    pub fn from_factory<F>(factory: F) -> Self
    where
        F: Fn() -> Inner<T> + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
        }
    }

    /// Run the factory, producing a fresh internal stream for one
    /// subscription's worth of polling.
    pub(crate) fn build_inner(&self) -> Inner<T> {
        (self.factory)()
    }

    /// Subscribe a receiver, spawning a background task that drives the
    /// stream and delivers values, completion, and errors. Dropping the
    /// returned [`Subscription`] does not stop delivery; call
    /// `unsubscribe` for that, which triggers exactly one `on_complete`
    /// call on the receiver (unless an `on_error`/`on_complete` already
    /// fired naturally).
    pub async fn subscribe<R>(&self, mut receiver: R) -> Subscription
    where
        T: Clone,
        R: Receiver<T> + 'static,
    {
        let mut inner = self.build_inner();
        let notify = Arc::new(tokio::sync::Notify::new());
        let task_notify = notify.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = task_notify.notified() => {
                        receiver.on_complete().await;
                        return;
                    }
                    item = inner.next() => {
                        match item {
                            Some(Ok(stamped)) => receiver.on_next(stamped.value).await,
                            Some(Err(err)) if err.is_cancellation() => return,
                            Some(Err(err)) => {
                                tracing::warn!(code = err.code(), "subscription terminated by error");
                                receiver.on_error(err).await;
                                return;
                            }
                            None => {
                                receiver.on_complete().await;
                                return;
                            }
                        }
                    }
                }
            }
        });

        Subscription::new(move || {
            notify.notify_one();
        })
    }

    /// Resolve with the first value this stream produces, or `None` if it
    /// completes without emitting. A one-shot snapshot read, distinct from
    /// [`crate::subject::BehaviorSubject::value`]'s synchronous read of
    /// already-buffered state.
    pub async fn query(&self) -> Option<Result<T, StreamError>>
    where
        T: Clone,
    {
        let mut inner = self.build_inner();
        inner.next().await.map(|item| item.map(|s| s.value))
    }

    /// Apply an operator function, producing a new stream whose factory
    /// re-invokes this stream's factory and feeds it through `op`.
    ///
    /// Each subscription to the result gets its own fresh upstream inner
    /// stream and its own fresh operator state (since `op` is called once
    /// per subscription, not once total), which is what gives every
    /// operator per-subscription isolation rather than accidentally
    /// sharing state across independent subscribers.
    pub fn pipe<U, F>(&self, op: F) -> Stream<U>
    where
        U: Send + 'static,
        F: Fn(Inner<T>) -> Inner<U> + Send + Sync + 'static,
    {
        let upstream = self.factory.clone();
        Stream::from_factory(move || op(upstream()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Scheduler;
    use std::sync::Mutex as StdMutex;

    fn from_values(values: Vec<i32>) -> Stream<i32> {
        Stream::from_factory(move || {
            let values = values.clone();
            Box::pin(futures::stream::iter(
                values
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| Ok(Stamped::new(v, i as u64))),
            ))
        })
    }

    #[tokio::test]
    async fn subscribe_delivers_values_in_order() {
        let stream = from_values(vec![1, 2, 3]);
        let collected = Arc::new(StdMutex::new(Vec::new()));
        let c = collected.clone();
        let sub = stream
            .subscribe(move |v: i32| {
                let c = c.clone();
                async move {
                    c.lock().unwrap().push(v);
                }
            })
            .await;
        // Give the spawned task a chance to drain; tests exercising timing
        // precisely use `tokio::time::pause`/`advance` instead.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        drop(sub);
        assert_eq!(*collected.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn each_subscription_gets_a_fresh_run() {
        let stream = from_values(vec![1, 2]);
        let first = stream.query().await;
        let second = stream.query().await;
        assert_eq!(first.unwrap().unwrap(), 1);
        assert_eq!(second.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn pipe_composes_a_new_stream_without_touching_upstream() {
        let stream = from_values(vec![1, 2, 3]);
        let doubled = stream.pipe(|inner| {
            Box::pin(inner.map(|item| item.map(|s| s.map(|v| v * 2)))) as Inner<i32>
        });
        assert_eq!(doubled.query().await.unwrap().unwrap(), 2);

        let _scheduler_kept_alive = Scheduler::new();
    }
}
