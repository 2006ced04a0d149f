//! The error hierarchy shared by every subsystem in this crate.

/// The result type used throughout the runtime.
pub type StreamResult<T> = Result<T, StreamError>;

/// The error taxonomy for stream, subject, and operator failures.
///
/// Classification methods below match every variant explicitly (no
/// wildcards) so that adding a variant forces a compile-time decision at
/// each call site.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StreamError {
    /// Raised by an upstream factory (a `from_*` constructor or a
    /// user-supplied registration callback). Terminal for the subscription.
    #[error("source error: {message}")]
    Source { message: String },

    /// Raised by an operator's user callback (`map`, `filter`, `scan`, …).
    #[error("operator `{operator}` failed: {message}")]
    Operator { operator: &'static str, message: String },

    /// Raised by the gating stream of `take_until`/`skip_until`/`delay_until`.
    #[error("notifier error: {message}")]
    Notifier { message: String },

    /// A writer was unblocked because the buffer it was writing into had
    /// already been closed (completed or errored) out from under it.
    #[error("write rejected: buffer already closed")]
    BufferClosed,

    /// The operation was cancelled (unsubscribe, upstream drop). Not
    /// surfaced to unrelated subscribers; observed only by the code path
    /// that was itself cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

impl StreamError {
    /// A short, stable code suitable for logging or metadata payloads.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Source { .. } => "SOURCE_ERROR",
            Self::Operator { .. } => "OPERATOR_ERROR",
            Self::Notifier { .. } => "NOTIFIER_ERROR",
            Self::BufferClosed => "BUFFER_CLOSED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Whether this error represents cancellation rather than a genuine
    /// failure. Cancellation must never be forwarded to a receiver's
    /// `error` channel as if it were a source/operator fault.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Source { .. }
            | Self::Operator { .. }
            | Self::Notifier { .. }
            | Self::BufferClosed => false,
        }
    }

    /// Build a [`StreamError::Operator`] for the given operator name.
    pub fn operator(name: &'static str, message: impl Into<String>) -> Self {
        Self::Operator {
            operator: name,
            message: message.into(),
        }
    }
}

/// Serialize a `StreamError` as `{code, message}` rather than exposing
/// the enum's internal shape, matching the flat `code`/`message` sidecar
/// that accompanies values (see [`crate::value`]).
impl serde::Serialize for StreamError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("StreamError", 2)?;
        s.serialize_field("code", self.code())?;
        s.serialize_field("message", &self.to_string())?;
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_errors_carry_the_operator_name_and_a_stable_code() {
        let err = StreamError::operator("map", "boom");
        assert_eq!(err.code(), "OPERATOR_ERROR");
        assert!(!err.is_cancellation());
    }

    #[test]
    fn cancellation_is_the_only_error_flagged_as_such() {
        assert!(StreamError::Cancelled.is_cancellation());
        assert!(!StreamError::BufferClosed.is_cancellation());
    }

    #[test]
    fn serializes_as_a_flat_code_and_message_pair() {
        let json = serde_json::to_value(StreamError::operator("scan", "overflow")).unwrap();
        assert_eq!(json["code"], "OPERATOR_ERROR");
        assert_eq!(json["message"], "operator `scan` failed: overflow");
    }
}
