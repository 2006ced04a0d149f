//! Concrete operators, split by what they need access to.

/// Time and rate operators built directly on `tokio::time`.
pub mod time;

/// Synchronous transforms, flattening operators, and N-ary combinators.
pub mod combinators;
