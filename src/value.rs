//! The advisory value metadata sidecar.
//!
//! Ordinary values flowing through the runtime carry no identity of their
//! own. Operators that split or merge values (`expand`, the `mergeMap`
//! family) may attach [`Metadata`] describing where a value came from; it
//! is purely advisory — nothing in the core reads it back — and exists so
//! an external tracer (out of scope for this crate) has something to hang
//! a trace on.

use serde::{Deserialize, Serialize};

/// Whether a tagged value is a split (`expand`-style) or a merge
/// (`mergeMap`-style collapse) relative to its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataKind {
    Expand,
    Collapse,
}

/// Advisory metadata an operator may attach to a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub value_id: u64,
    pub operator_index: usize,
    pub operator_name: &'static str,
    pub kind: MetadataKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input_value_ids: Vec<u64>,
}

/// A value with optional sidecar metadata attached.
///
/// Plain operators never need this type — only `expand` and the
/// `mergeMap`-family operators that want to let a tracer follow value
/// lineage construct one.
#[derive(Debug, Clone, PartialEq)]
pub struct Tagged<T> {
    pub value: T,
    pub metadata: Option<Metadata>,
}

impl<T> Tagged<T> {
    #[must_use]
    pub fn plain(value: T) -> Self {
        Self {
            value,
            metadata: None,
        }
    }

    #[must_use]
    pub fn with_metadata(value: T, metadata: Metadata) -> Self {
        Self {
            value,
            metadata: Some(metadata),
        }
    }
}
