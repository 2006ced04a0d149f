//! The receiver contract and subscription handle.
//!
//! A [`Receiver`] is an async push observer: it gets
//! `on_next`/`on_complete`/`on_error` calls driven by whatever is pumping
//! a subscription. Plain `FnMut(T) -> Fut` closures implement it via the
//! blanket impl below, so most call sites never need to name the trait.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::error::StreamError;

/// Receives the values, completion, and errors of a subscription.
///
/// Object-safe so a [`crate::stream::Stream`] can hold a
/// `Box<dyn Receiver<T>>` without knowing the concrete receiver type.
#[async_trait]
pub trait Receiver<T>: Send {
    /// Handle one delivered value.
    async fn on_next(&mut self, value: T);

    /// Called exactly once, when the upstream completes normally. Default
    /// no-op, since most receivers only care about values.
    async fn on_complete(&mut self) {}

    /// Called exactly once, when the upstream terminates with an error.
    /// Never called after `on_complete` or another `on_error`. Default
    /// no-op; callers that care should override it.
    async fn on_error(&mut self, _err: StreamError) {}
}

#[async_trait]
impl<T, F, Fut> Receiver<T> for F
where
    T: Send + 'static,
    F: FnMut(T) -> Fut + Send,
    Fut: Future<Output = ()> + Send,
{
    async fn on_next(&mut self, value: T) {
        (self)(value).await;
    }
}

/// A handle to a live subscription. Dropping it does not unsubscribe —
/// call [`Subscription::unsubscribe`] explicitly; a subscription may
/// legitimately outlive the handle, e.g. when detached to run to
/// completion in the background.
pub struct Subscription {
    unsubscribed: Arc<AtomicBool>,
    on_unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    #[must_use]
    pub fn new(on_unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unsubscribed: Arc::new(AtomicBool::new(false)),
            on_unsubscribe: Some(Box::new(on_unsubscribe)),
        }
    }

    /// A subscription that does nothing on unsubscribe, for tests and
    /// trivial sources.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(|| {})
    }

    /// Tear down the subscription. Idempotent: the second and later calls
    /// are no-ops.
    pub fn unsubscribe(&mut self) {
        if !self.unsubscribed.swap(true, Ordering::SeqCst) {
            if let Some(cb) = self.on_unsubscribe.take() {
                cb();
            }
        }
    }

    #[must_use]
    pub fn is_unsubscribed(&self) -> bool {
        self.unsubscribed.load(Ordering::SeqCst)
    }

    /// A token that can be cloned into a running task to let it observe
    /// cancellation without holding the `Subscription` itself.
    #[must_use]
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        self.unsubscribed.clone()
    }
}
