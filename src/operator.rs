//! The operator kernel: the `Stream<T>::pipe` building block
//! that every concrete operator in [`crate::operators`] is expressed
//! through, plus the config types shared by the parameterized ones.
//!
//! Every operator here is a function `Fn(Inner<A>) -> Inner<B>` handed to
//! [`crate::stream::Stream::pipe`]. Because `pipe` re-invokes the
//! upstream factory and calls the operator function fresh on every
//! subscription, an operator's internal state (a debounce timer, a scan
//! accumulator, an in-flight `FuturesUnordered`) is always built from
//! scratch per subscription — two concurrent subscribers to the same
//! piped stream never see each other's operator state.

/// Shared configuration for operators that take more than a duration or a
/// closure — keeps call sites from growing long positional-argument lists
/// as an operator gains parameters over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyConfig {
    /// Maximum number of inner streams a `merge_map`/`concat_map`-family
    /// operator keeps active at once. `None` means unbounded.
    pub limit: Option<usize>,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self { limit: None }
    }
}

impl ConcurrencyConfig {
    #[must_use]
    pub fn unbounded() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self { limit: Some(limit) }
    }
}

/// Order in which `expand` visits the children produced for a value,
/// relative to its siblings' own children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Traversal {
    /// Fully expand a value's children (and their children) before moving
    /// on to the next sibling — a stack discipline.
    #[default]
    Depth,
    /// Expand one level across every pending value before descending to
    /// the next level — a queue discipline.
    Breadth,
}

/// Configuration for `expand`: how deep and in what order to traverse
/// before stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpandConfig {
    /// Maximum recursion depth. `0` means emit only the seed values and
    /// never recurse. `None` means unbounded.
    pub max_depth: Option<usize>,
    /// Stack (`Depth`, default) or queue (`Breadth`) discipline.
    pub traversal: Traversal,
}

impl Default for ExpandConfig {
    fn default() -> Self {
        Self {
            max_depth: None,
            traversal: Traversal::Depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_config_defaults_to_unbounded() {
        assert_eq!(ConcurrencyConfig::default().limit, None);
    }

    #[test]
    fn expand_config_defaults_to_unbounded_depth() {
        let cfg = ExpandConfig::default();
        assert_eq!(cfg.max_depth, None);
        assert_eq!(cfg.traversal, Traversal::Depth);
    }
}
