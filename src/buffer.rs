//! Per-reader FIFO buffers backing the subject family.
//!
//! Three variants share the [`Buffer`] trait: [`PlainBuffer`] (unbounded
//! log, per-reader head), [`BehaviorBuffer`] (retains only the latest
//! value), and [`ReplayBuffer`] (retains the last `N` values for new
//! readers). All three deliver strictly in write order, treat `complete`/
//! `error` as sticky idempotent terminals, and make `write` resolve only
//! once every reader attached at write time has pulled that entry — the
//! backpressure discipline that lets an operator throttle its upstream.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::StreamError;
use crate::scheduler::Stamped;

/// Opaque handle identifying one reader of a [`Buffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReaderId(u64);

#[derive(Debug, Clone)]
enum Terminal {
    Complete,
    Error(StreamError),
}

/// The per-reader buffer contract shared by all three variants.
#[async_trait]
pub trait Buffer<T: Clone + Send + Sync + 'static>: Send + Sync {
    /// Attach a fresh reader and return its id.
    fn attach_reader(&self) -> ReaderId;

    /// Detach a reader. Idempotent.
    fn detach_reader(&self, id: ReaderId);

    /// Read the next entry for `id`, waiting if none is available yet.
    /// `Ok(None)` means the buffer completed; `Err` means it errored.
    async fn read(&self, id: ReaderId) -> Result<Option<Stamped<T>>, StreamError>;

    /// Non-consuming variant of [`Buffer::read`].
    async fn peek(&self, id: ReaderId) -> Result<Option<Stamped<T>>, StreamError>;

    /// Commit a value, returning once every reader attached at the time of
    /// the call has consumed it.
    async fn write(&self, value: Stamped<T>);

    /// Commit the terminal `complete`. Idempotent; ignored if already
    /// terminal.
    async fn complete(&self);

    /// Commit the terminal `error`. Idempotent; ignored if already
    /// terminal.
    async fn error(&self, err: StreamError);

    /// Whether `id` has observed the terminal entry.
    fn completed(&self, id: ReaderId) -> bool;

    /// The latest committed non-terminal value, if any.
    fn value(&self) -> Option<T>;
}

fn alloc_reader_id(counter: &AtomicU64) -> ReaderId {
    ReaderId(counter.fetch_add(1, Ordering::SeqCst))
}

// ---------------------------------------------------------------------------
// PlainBuffer
// ---------------------------------------------------------------------------

struct PlainState<T> {
    log: VecDeque<Stamped<T>>,
    /// Global index (since buffer creation) of `log[0]`.
    base_index: usize,
    /// Global index of the next entry that will be written.
    next_index: usize,
    terminal: Option<Terminal>,
    /// Reader id -> next global index to read.
    readers: HashMap<ReaderId, usize>,
    next_reader_id: AtomicU64,
}

/// A plain subject buffer: every reader attached before a write observes it
/// in commit order; readers attached afterward never see it.
pub struct PlainBuffer<T> {
    state: Mutex<PlainState<T>>,
    data_ready: Notify,
    consumed: Notify,
}

impl<T: Clone + Send + Sync + 'static> PlainBuffer<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PlainState {
                log: VecDeque::new(),
                base_index: 0,
                next_index: 0,
                terminal: None,
                readers: HashMap::new(),
                next_reader_id: AtomicU64::new(0),
            }),
            data_ready: Notify::new(),
            consumed: Notify::new(),
        }
    }

    /// Drop entries from the front of the log that every remaining reader
    /// has already advanced past.
    fn trim(state: &mut PlainState<T>) {
        loop {
            let min_head = state.readers.values().copied().min();
            let trim_to = min_head.unwrap_or(state.next_index);
            if trim_to > state.base_index && !state.log.is_empty() {
                state.log.pop_front();
                state.base_index += 1;
            } else {
                break;
            }
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for PlainBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Buffer<T> for PlainBuffer<T> {
    fn attach_reader(&self) -> ReaderId {
        let mut state = self.state.lock().unwrap();
        let id = alloc_reader_id(&state.next_reader_id);
        let head = state.next_index;
        state.readers.insert(id, head);
        id
    }

    fn detach_reader(&self, id: ReaderId) {
        let mut state = self.state.lock().unwrap();
        state.readers.remove(&id);
        Self::trim(&mut state);
        drop(state);
        self.consumed.notify_waiters();
    }

    async fn read(&self, id: ReaderId) -> Result<Option<Stamped<T>>, StreamError> {
        loop {
            let mut state = self.state.lock().unwrap();
            let Some(&head) = state.readers.get(&id) else {
                return Err(StreamError::Cancelled);
            };
            if head < state.next_index {
                let entry = state.log[head - state.base_index].clone();
                state.readers.insert(id, head + 1);
                Self::trim(&mut state);
                drop(state);
                self.consumed.notify_waiters();
                return Ok(Some(entry));
            }
            // head == next_index: nothing new yet, check terminal.
            match &state.terminal {
                Some(Terminal::Complete) => return Ok(None),
                Some(Terminal::Error(e)) => return Err(e.clone()),
                None => {
                    let notified = self.data_ready.notified();
                    drop(state);
                    notified.await;
                }
            }
        }
    }

    async fn peek(&self, id: ReaderId) -> Result<Option<Stamped<T>>, StreamError> {
        loop {
            let state = self.state.lock().unwrap();
            let Some(&head) = state.readers.get(&id) else {
                return Err(StreamError::Cancelled);
            };
            if head < state.next_index {
                return Ok(Some(state.log[head - state.base_index].clone()));
            }
            match &state.terminal {
                Some(Terminal::Complete) => return Ok(None),
                Some(Terminal::Error(e)) => return Err(e.clone()),
                None => {
                    let notified = self.data_ready.notified();
                    drop(state);
                    notified.await;
                }
            }
        }
    }

    #[tracing::instrument(skip(self, value))]
    async fn write(&self, value: Stamped<T>) {
        let idx = {
            let mut state = self.state.lock().unwrap();
            if state.terminal.is_some() {
                return;
            }
            let idx = state.next_index;
            state.next_index += 1;
            state.log.push_back(value);
            if state.readers.is_empty() {
                Self::trim(&mut state);
            }
            idx
        };
        self.data_ready.notify_waiters();

        loop {
            let done = {
                let state = self.state.lock().unwrap();
                state.base_index > idx || state.readers.is_empty()
            };
            if done {
                return;
            }
            let notified = self.consumed.notified();
            // Re-check after registering interest to avoid a lost wakeup.
            let still_waiting = {
                let state = self.state.lock().unwrap();
                !(state.base_index > idx || state.readers.is_empty())
            };
            if still_waiting {
                notified.await;
            }
        }
    }

    async fn complete(&self) {
        let mut state = self.state.lock().unwrap();
        if state.terminal.is_none() {
            state.terminal = Some(Terminal::Complete);
            drop(state);
            self.data_ready.notify_waiters();
        }
    }

    async fn error(&self, err: StreamError) {
        let mut state = self.state.lock().unwrap();
        if state.terminal.is_none() {
            tracing::debug!(code = err.code(), "plain buffer erroring, readers: {}", state.readers.len());
            state.terminal = Some(Terminal::Error(err));
            drop(state);
            self.data_ready.notify_waiters();
        }
    }

    fn completed(&self, id: ReaderId) -> bool {
        let state = self.state.lock().unwrap();
        match state.readers.get(&id) {
            Some(&head) => head >= state.next_index && state.terminal.is_some(),
            None => true,
        }
    }

    fn value(&self) -> Option<T> {
        let state = self.state.lock().unwrap();
        state.log.back().map(|s| s.value.clone())
    }
}

// ---------------------------------------------------------------------------
// BehaviorBuffer
// ---------------------------------------------------------------------------

struct BehaviorState<T> {
    latest: Option<Stamped<T>>,
    terminal: Option<Terminal>,
    /// Reader id -> whether it still owes the primed `latest` value.
    pending_initial: HashMap<ReaderId, bool>,
    next_reader_id: AtomicU64,
}

/// Stores exactly the most recent `next` plus the terminal. A new reader
/// first observes the latest value (if any), then subsequent entries.
pub struct BehaviorBuffer<T> {
    state: Mutex<BehaviorState<T>>,
    data_ready: Notify,
}

impl<T: Clone + Send + Sync + 'static> BehaviorBuffer<T> {
    #[must_use]
    pub fn new(initial: Option<T>) -> Self {
        Self {
            state: Mutex::new(BehaviorState {
                latest: initial.map(|v| Stamped::new(v, 0)),
                terminal: None,
                pending_initial: HashMap::new(),
                next_reader_id: AtomicU64::new(0),
            }),
            data_ready: Notify::new(),
        }
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Buffer<T> for BehaviorBuffer<T> {
    fn attach_reader(&self) -> ReaderId {
        let mut state = self.state.lock().unwrap();
        let id = alloc_reader_id(&state.next_reader_id);
        let has_value = state.latest.is_some();
        state.pending_initial.insert(id, has_value);
        id
    }

    fn detach_reader(&self, id: ReaderId) {
        self.state.lock().unwrap().pending_initial.remove(&id);
    }

    async fn read(&self, id: ReaderId) -> Result<Option<Stamped<T>>, StreamError> {
        loop {
            let mut state = self.state.lock().unwrap();
            let Some(&owed) = state.pending_initial.get(&id) else {
                return Err(StreamError::Cancelled);
            };
            if owed {
                state.pending_initial.insert(id, false);
                return Ok(state.latest.clone());
            }
            // Already primed: only the terminal remains observable, since
            // a behavior buffer never replays intermediate history.
            match &state.terminal {
                Some(Terminal::Complete) => return Ok(None),
                Some(Terminal::Error(e)) => return Err(e.clone()),
                None => {
                    let notified = self.data_ready.notified();
                    drop(state);
                    notified.await;
                }
            }
        }
    }

    async fn peek(&self, id: ReaderId) -> Result<Option<Stamped<T>>, StreamError> {
        let state = self.state.lock().unwrap();
        let Some(&owed) = state.pending_initial.get(&id) else {
            return Err(StreamError::Cancelled);
        };
        if owed {
            return Ok(state.latest.clone());
        }
        match &state.terminal {
            Some(Terminal::Complete) => Ok(None),
            Some(Terminal::Error(e)) => Err(e.clone()),
            None => Ok(None),
        }
    }

    async fn write(&self, value: Stamped<T>) {
        let mut state = self.state.lock().unwrap();
        if state.terminal.is_some() {
            return;
        }
        state.latest = Some(value);
        for owed in state.pending_initial.values_mut() {
            *owed = true;
        }
        drop(state);
        self.data_ready.notify_waiters();
    }

    async fn complete(&self) {
        let mut state = self.state.lock().unwrap();
        if state.terminal.is_none() {
            state.terminal = Some(Terminal::Complete);
            drop(state);
            self.data_ready.notify_waiters();
        }
    }

    async fn error(&self, err: StreamError) {
        let mut state = self.state.lock().unwrap();
        if state.terminal.is_none() {
            tracing::debug!(code = err.code(), "behavior buffer erroring");
            state.terminal = Some(Terminal::Error(err));
            drop(state);
            self.data_ready.notify_waiters();
        }
    }

    fn completed(&self, id: ReaderId) -> bool {
        let state = self.state.lock().unwrap();
        match state.pending_initial.get(&id) {
            Some(&owed) => !owed && state.terminal.is_some(),
            None => true,
        }
    }

    fn value(&self) -> Option<T> {
        self.state.lock().unwrap().latest.clone().map(|s| s.value)
    }
}

// ---------------------------------------------------------------------------
// ReplayBuffer
// ---------------------------------------------------------------------------

struct ReplayState<T> {
    window: VecDeque<Stamped<T>>,
    capacity: Option<usize>,
    terminal: Option<Terminal>,
    /// Reader id -> index into `window` of the next entry to deliver. Once
    /// a reader catches up to `window.len()`, it waits on live writes. An
    /// eviction from the front shifts every reader's offset down with it,
    /// so a reader that already caught up to live stays pointed at the
    /// new front rather than skipping ahead.
    readers: HashMap<ReaderId, usize>,
    next_reader_id: AtomicU64,
}

/// Retains the last `N` non-terminal entries (`N = None` means unbounded)
/// plus the terminal. New readers replay the window in order, then
/// continue live.
pub struct ReplayBuffer<T> {
    state: Mutex<ReplayState<T>>,
    data_ready: Notify,
}

impl<T: Clone + Send + Sync + 'static> ReplayBuffer<T> {
    #[must_use]
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            state: Mutex::new(ReplayState {
                window: VecDeque::new(),
                capacity,
                terminal: None,
                readers: HashMap::new(),
                next_reader_id: AtomicU64::new(0),
            }),
            data_ready: Notify::new(),
        }
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Buffer<T> for ReplayBuffer<T> {
    fn attach_reader(&self) -> ReaderId {
        let mut state = self.state.lock().unwrap();
        let id = alloc_reader_id(&state.next_reader_id);
        state.readers.insert(id, 0);
        id
    }

    fn detach_reader(&self, id: ReaderId) {
        let mut state = self.state.lock().unwrap();
        state.readers.remove(&id);
    }

    async fn read(&self, id: ReaderId) -> Result<Option<Stamped<T>>, StreamError> {
        loop {
            let mut state = self.state.lock().unwrap();
            if !state.readers.contains_key(&id) {
                return Err(StreamError::Cancelled);
            }
            let offset = state.readers[&id];
            if offset < state.window.len() {
                let entry = state.window[offset].clone();
                state.readers.insert(id, offset + 1);
                return Ok(Some(entry));
            }
            // Caught up with the replay window: wait for new live writes.
            match &state.terminal {
                Some(Terminal::Complete) => return Ok(None),
                Some(Terminal::Error(e)) => return Err(e.clone()),
                None => {
                    let notified = self.data_ready.notified();
                    drop(state);
                    notified.await;
                }
            }
        }
    }

    async fn peek(&self, id: ReaderId) -> Result<Option<Stamped<T>>, StreamError> {
        let state = self.state.lock().unwrap();
        let Some(&offset) = state.readers.get(&id) else {
            return Err(StreamError::Cancelled);
        };
        if offset < state.window.len() {
            return Ok(Some(state.window[offset].clone()));
        }
        match &state.terminal {
            Some(Terminal::Complete) => Ok(None),
            Some(Terminal::Error(e)) => Err(e.clone()),
            None => Ok(None),
        }
    }

    async fn write(&self, value: Stamped<T>) {
        let mut state = self.state.lock().unwrap();
        if state.terminal.is_some() {
            return;
        }
        state.window.push_back(value);
        if let Some(cap) = state.capacity {
            while state.window.len() > cap {
                state.window.pop_front();
                // Every reader's offset shifts down by one entry evicted
                // from the front; readers who hadn't reached it yet still
                // end up pointing at the new front.
                for offset in state.readers.values_mut() {
                    *offset = offset.saturating_sub(1);
                }
            }
        }
        drop(state);
        self.data_ready.notify_waiters();
    }

    async fn complete(&self) {
        let mut state = self.state.lock().unwrap();
        if state.terminal.is_none() {
            state.terminal = Some(Terminal::Complete);
            drop(state);
            self.data_ready.notify_waiters();
        }
    }

    async fn error(&self, err: StreamError) {
        let mut state = self.state.lock().unwrap();
        if state.terminal.is_none() {
            tracing::debug!(code = err.code(), "replay buffer erroring, window: {}", state.window.len());
            state.terminal = Some(Terminal::Error(err));
            drop(state);
            self.data_ready.notify_waiters();
        }
    }

    fn completed(&self, id: ReaderId) -> bool {
        let state = self.state.lock().unwrap();
        match state.readers.get(&id) {
            Some(&offset) => offset >= state.window.len() && state.terminal.is_some(),
            None => true,
        }
    }

    fn value(&self) -> Option<T> {
        self.state.lock().unwrap().window.back().map(|s| s.value.clone())
    }
}
