//! Shared test support: a `Receiver` that collects every value into a
//! `Vec` and signals completion/error through a oneshot, so integration
//! tests can `.await` a subscription draining fully instead of polling
//! with sleeps.

use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use tokio::sync::oneshot;

use streamix::{Receiver, StreamError};

static TRACING_INIT: Once = Once::new();

/// Install a `tracing` subscriber once per test binary, so a failing
/// assertion's surrounding `trace`/`debug`/`warn` events show up in
/// `cargo test -- --nocapture` output instead of going nowhere.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub struct Collector<T> {
    values: Arc<Mutex<Vec<T>>>,
    done: Option<oneshot::Sender<Result<(), StreamError>>>,
}

impl<T> Collector<T> {
    #[allow(clippy::type_complexity)]
    pub fn new() -> (
        Self,
        Arc<Mutex<Vec<T>>>,
        oneshot::Receiver<Result<(), StreamError>>,
    ) {
        let values = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = oneshot::channel();
        (
            Self {
                values: values.clone(),
                done: Some(tx),
            },
            values,
            rx,
        )
    }
}

#[async_trait]
impl<T: Send> Receiver<T> for Collector<T> {
    async fn on_next(&mut self, value: T) {
        self.values.lock().unwrap().push(value);
    }

    async fn on_complete(&mut self) {
        if let Some(tx) = self.done.take() {
            let _ = tx.send(Ok(()));
        }
    }

    async fn on_error(&mut self, err: StreamError) {
        if let Some(tx) = self.done.take() {
            let _ = tx.send(Err(err));
        }
    }
}
