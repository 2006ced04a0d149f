//! Single-threaded cooperative task queue and the monotonic emission-stamp
//! counter used to order concurrent producers.
//!
//! `Scheduler` models a microtask queue: `enqueue` never runs its task
//! inline, instead handing it to a background worker
//! task that drains a FIFO channel one task at a time, so reentrant
//! `enqueue` calls made from inside a running task still append to the
//! tail rather than interleaving.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::{Notify, mpsc};

tokio::task_local! {
    static CURRENT_STAMP: u64;
}

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Inner {
    tx: mpsc::UnboundedSender<Task>,
    pending: AtomicUsize,
    idle: Notify,
    stamp: AtomicU64,
}

/// A FIFO task queue with a monotonic emission-stamp counter.
///
/// Cloning a `Scheduler` shares the same queue and counter; this is how a
/// pipeline's operators agree on ordering without a process-wide singleton.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Create a new scheduler and spawn its worker task.
    ///
    /// Requires a Tokio runtime to already be running (the worker is
    /// spawned via [`tokio::spawn`] immediately).
    #[must_use]
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        let inner = Arc::new(Inner {
            tx,
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
            stamp: AtomicU64::new(0),
        });

        let worker_inner = inner.clone();
        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                task();
                if worker_inner.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                    worker_inner.idle.notify_waiters();
                }
            }
            tracing::trace!("scheduler worker exiting, no senders remain");
        });

        Self { inner }
    }

    /// Enqueue `task` to run at the next tick, in FIFO order.
    ///
    /// A task that panics takes down the worker along with it; callers are
    /// expected to route fallible work through [`crate::error::StreamError`]
    /// rather than panicking, since the Rust analogue of a task "throwing"
    /// is returning an error, not unwinding.
    pub fn enqueue<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        // An error here means the worker task panicked; there is nothing
        // sensible left to do but drop the task on the floor.
        if self.inner.tx.send(Box::new(task)).is_err() {
            tracing::warn!("scheduler worker is gone, dropping enqueued task");
        }
    }

    /// Resolve once every currently queued task — and every task those
    /// tasks themselves enqueue — has run.
    #[tracing::instrument(skip(self))]
    pub async fn flush(&self) {
        loop {
            if self.inner.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            let notified = self.inner.idle.notified();
            if self.inner.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Allocate the next emission stamp. Stamps are strictly increasing for
    /// the lifetime of this scheduler.
    #[must_use]
    pub fn next_emission_stamp(&self) -> u64 {
        self.inner.stamp.fetch_add(1, Ordering::SeqCst)
    }

    /// The stamp currently in scope via [`Scheduler::with_emission_stamp`],
    /// if any.
    #[must_use]
    pub fn current_emission_stamp() -> Option<u64> {
        CURRENT_STAMP.try_with(|s| *s).ok()
    }

    /// Run `fut` with `stamp` as the current emission stamp for the
    /// duration of the future, so that nested reads (e.g. a downstream
    /// operator committing a derived value) see the same stamp as the
    /// value that triggered them.
    pub async fn with_emission_stamp<F: Future>(stamp: u64, fut: F) -> F::Output {
        CURRENT_STAMP.scope(stamp, fut).await
    }
}

/// A value paired with the emission stamp it was produced at.
///
/// This is the Rust analogue of attaching a stamp to the iterator sidecar:
/// rather than a side table keyed by iterator identity, the stamp travels
/// with the value itself, which composes cleanly with `Stream<T>`'s by-value
/// semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamped<T> {
    pub value: T,
    pub stamp: u64,
}

impl<T> Stamped<T> {
    #[must_use]
    pub fn new(value: T, stamp: u64) -> Self {
        Self { value, stamp }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Stamped<U> {
        Stamped {
            value: f(self.value),
            stamp: self.stamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn enqueue_runs_in_fifo_order() {
        let scheduler = Scheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let order = order.clone();
            scheduler.enqueue(move || order.lock().unwrap().push(i));
        }
        scheduler.flush().await;

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn flush_waits_for_reentrant_enqueues() {
        let scheduler = Scheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let inner_scheduler = scheduler.clone();
        let inner_order = order.clone();
        scheduler.enqueue(move || {
            inner_order.lock().unwrap().push("outer");
            let order2 = inner_order.clone();
            inner_scheduler.enqueue(move || order2.lock().unwrap().push("inner"));
        });

        scheduler.flush().await;
        assert_eq!(*order.lock().unwrap(), vec!["outer", "inner"]);
    }

    #[tokio::test]
    async fn emission_stamps_strictly_increase() {
        let scheduler = Scheduler::new();
        let a = scheduler.next_emission_stamp();
        let b = scheduler.next_emission_stamp();
        assert!(b > a);
    }
}
