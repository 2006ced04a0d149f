//! The subject family: hot, shared sources backed by a [`Buffer`].
//!
//! A plain [`Subject`] multicasts future values only. [`BehaviorSubject`]
//! primes every new reader with the current value. [`ReplaySubject`]
//! primes a new reader with the last `N` values. All three expose
//! [`Subject::as_stream`] / [`BehaviorSubject::as_stream`] /
//! [`ReplaySubject::as_stream`] returning a [`crate::stream::Stream`] whose
//! factory attaches a fresh reader to the shared buffer on each
//! subscription, rather than re-running independent work the way a cold
//! stream's factory would.

use std::sync::Arc;

use futures::stream;

use crate::buffer::{Buffer, BehaviorBuffer, PlainBuffer, ReplayBuffer};
use crate::error::StreamError;
use crate::scheduler::{Scheduler, Stamped};
use crate::stream::Stream;

fn buffer_to_inner<T, B>(
    buffer: Arc<B>,
) -> impl futures::Stream<Item = Result<Stamped<T>, StreamError>> + Send + 'static
where
    T: Clone + Send + Sync + 'static,
    B: Buffer<T> + 'static,
{
    let reader = buffer.attach_reader();
    stream::unfold(Some((buffer, reader)), |state| async move {
        let (buffer, reader) = state?;
        match buffer.read(reader).await {
            Ok(Some(entry)) => Some((Ok(entry), Some((buffer, reader)))),
            Ok(None) => {
                buffer.detach_reader(reader);
                None
            }
            Err(e) => {
                buffer.detach_reader(reader);
                Some((Err(e), None))
            }
        }
    })
}

/// A hot multicast source: values pushed via [`Subject::next`] reach every
/// reader currently subscribed, in commit order. Readers that subscribe
/// after a value was pushed never see it.
pub struct Subject<T> {
    buffer: Arc<PlainBuffer<T>>,
    scheduler: Scheduler,
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self {
            buffer: self.buffer.clone(),
            scheduler: self.scheduler.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Subject<T> {
    #[must_use]
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            buffer: Arc::new(PlainBuffer::new()),
            scheduler,
        }
    }

    /// Push a value to every current reader, stamping it with a fresh
    /// emission stamp.
    pub async fn next(&self, value: T) {
        let stamp = self.scheduler.next_emission_stamp();
        self.buffer.write(Stamped::new(value, stamp)).await;
    }

    /// Complete the subject. Idempotent.
    pub async fn complete(&self) {
        self.buffer.complete().await;
    }

    /// Error the subject. Idempotent.
    pub async fn error(&self, err: StreamError) {
        self.buffer.error(err).await;
    }

    /// A cold-looking handle over this hot subject: each subscription
    /// attaches a fresh reader rather than re-running a factory.
    #[must_use]
    pub fn as_stream(&self) -> Stream<T> {
        let buffer = self.buffer.clone();
        Stream::from_factory(move || Box::pin(buffer_to_inner(buffer.clone())))
    }
}

/// A [`Subject`] that primes new readers with its current value, if any.
pub struct BehaviorSubject<T> {
    buffer: Arc<BehaviorBuffer<T>>,
    scheduler: Scheduler,
}

impl<T: Clone + Send + Sync + 'static> BehaviorSubject<T> {
    #[must_use]
    pub fn new(scheduler: Scheduler, initial: T) -> Self {
        Self {
            buffer: Arc::new(BehaviorBuffer::new(Some(initial))),
            scheduler,
        }
    }

    pub async fn next(&self, value: T) {
        let stamp = self.scheduler.next_emission_stamp();
        self.buffer.write(Stamped::new(value, stamp)).await;
    }

    pub async fn complete(&self) {
        self.buffer.complete().await;
    }

    pub async fn error(&self, err: StreamError) {
        self.buffer.error(err).await;
    }

    /// The current value, available synchronously without subscribing.
    #[must_use]
    pub fn value(&self) -> T {
        self.buffer
            .value()
            .expect("BehaviorSubject is always constructed with an initial value")
    }

    #[must_use]
    pub fn as_stream(&self) -> Stream<T> {
        let buffer = self.buffer.clone();
        Stream::from_factory(move || Box::pin(buffer_to_inner(buffer.clone())))
    }
}

/// A [`Subject`] that primes new readers with the last `capacity` values
/// (unbounded if `capacity` is `None`).
pub struct ReplaySubject<T> {
    buffer: Arc<ReplayBuffer<T>>,
    scheduler: Scheduler,
}

impl<T: Clone + Send + Sync + 'static> ReplaySubject<T> {
    #[must_use]
    pub fn new(scheduler: Scheduler, capacity: Option<usize>) -> Self {
        Self {
            buffer: Arc::new(ReplayBuffer::new(capacity)),
            scheduler,
        }
    }

    pub async fn next(&self, value: T) {
        let stamp = self.scheduler.next_emission_stamp();
        self.buffer.write(Stamped::new(value, stamp)).await;
    }

    pub async fn complete(&self) {
        self.buffer.complete().await;
    }

    pub async fn error(&self, err: StreamError) {
        self.buffer.error(err).await;
    }

    #[must_use]
    pub fn as_stream(&self) -> Stream<T> {
        let buffer = self.buffer.clone();
        Stream::from_factory(move || Box::pin(buffer_to_inner(buffer.clone())))
    }
}
