//! A reactive streams runtime: push-style event sources (timers, external
//! event adapters, subjects) turned into cold or hot asynchronous sequences,
//! transformed by composable operators (`map`, `filter`, `debounce`,
//! `switch_map`, `merge_map`, `take_until`, `share_replay`, ...).
//!
//! Three subsystems carry the design:
//!
//! - **Stream abstraction and the pull-based poll protocol** — [`stream`]
//!   and [`receiver`]: the cold-by-default, many-times-subscribable
//!   `Stream<T>` handle, and the `Receiver` callback contract a subscription
//!   drives.
//! - **Subjects and their buffers** — [`subject`] and [`buffer`]: the hot
//!   multicast primitives (plain, behavior, replay), each backed by a
//!   per-reader buffer that enforces backpressure by blocking a write until
//!   every attached reader has consumed it.
//! - **The operator kernel** — [`operator`] and [`operators`]: the `pipe`
//!   building block every concrete operator is expressed through, plus the
//!   time-based gating, switching, merging, and sharing operators whose
//!   correctness depends on [`scheduler`]'s emission-stamp ordering.
//!
//! [`factories`] turns an iterator, a future, a timer, or an external event
//! source into a `Stream`; [`value`] carries the advisory per-value metadata
//! sidecar a tracing adapter can attach without the core caring about it.

/// Cooperative task queue and monotonic emission-stamp counter.
pub mod scheduler;

/// Per-reader FIFO buffers backing the subject family.
pub mod buffer;

/// Hot, shared sources backed by a buffer: `Subject`, `BehaviorSubject`,
/// `ReplaySubject`.
pub mod subject;

/// The receiver contract and subscription handle.
pub mod receiver;

/// The `Stream<T>` handle.
pub mod stream;

/// The operator kernel and shared operator config types.
pub mod operator;

/// Concrete operators: time-based, synchronous, and N-ary.
pub mod operators;

/// Stream factories: `of`, `from_iter`, `from_future`, `timer`, `retry`,
/// and the `StreamFactory` external-adapter seam.
pub mod factories;

/// The error hierarchy shared by every subsystem.
pub mod error;

/// Advisory per-value metadata sidecar, carried alongside a value without
/// the core itself interpreting it.
pub mod value;

pub use error::{StreamError, StreamResult};
pub use operator::{ConcurrencyConfig, ExpandConfig, Traversal};
pub use receiver::{Receiver, Subscription};
pub use scheduler::{Scheduler, Stamped};
pub use stream::{Inner, Stream};
pub use subject::{BehaviorSubject, ReplaySubject, Subject};
pub use value::{Metadata, MetadataKind, Tagged};
