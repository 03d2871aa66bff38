//! Error types for limits, reply decoding and admission checks.
use std::fmt;

/// A [`Limit`](crate::Limit) that cannot drive the cell-rate arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LimitError {
    /// `rate` must be > 0.
    #[error("rate must be > 0")]
    ZeroRate,
    /// `period` must be > 0.
    #[error("period must be > 0")]
    ZeroPeriod,
    /// `burst` must be > 0.
    #[error("burst must be > 0")]
    ZeroBurst,
}

/// Kind of value found where a number was expected.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueKind {
    /// Text that does not parse as a number.
    Text(String),
    /// Bytes that are not UTF-8 or do not parse as a number.
    Bytes(usize),
    /// A float where an integer was expected, or a non-finite float.
    Float(f64),
    /// An integer the field cannot hold.
    Int(i64),
    /// The store returned nil.
    Nil,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Text(s) => write!(f, "text {:?}", s),
            ValueKind::Bytes(len) => write!(f, "{} unparseable bytes", len),
            ValueKind::Float(v) => write!(f, "float {}", v),
            ValueKind::Int(v) => write!(f, "integer {}", v),
            ValueKind::Nil => write!(f, "nil"),
        }
    }
}

/// The store's reply did not have the expected `[limited, remaining, retry_after, reset_after]` shape.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    /// Wrong number of elements.
    #[error("expected {expected} reply elements, got {actual}")]
    Arity {
        /// Elements the decoder needs.
        expected: usize,
        /// Elements the store returned.
        actual: usize,
    },
    /// An element could not be read as a number.
    #[error("reply element {index} ({name}) is not numeric: {kind}")]
    Field {
        /// Position in the reply.
        index: usize,
        /// Field name for diagnostics.
        name: &'static str,
        /// What was found instead.
        kind: ValueKind,
    },
    /// The limited flag was neither 0 nor 1.
    #[error("limited flag must be 0 or 1, got {0}")]
    Flag(i64),
}

/// A request rejected before it reached the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InvalidRequest {
    /// Keys must be non-empty.
    #[error("key must not be empty")]
    EmptyKey,
    /// At least one unit must be requested.
    #[error("units must be > 0")]
    ZeroUnits,
    /// The limit cannot be evaluated.
    #[error("invalid limit: {0}")]
    Limit(#[from] LimitError),
}

/// Failure of an admission check. Any error means the decision is unknown; it never
/// implies either allow or deny.
#[derive(Debug, thiserror::Error)]
pub enum LimiterError<E> {
    /// The store was unreachable or the atomic step could not run.
    #[error("store error: {0}")]
    Store(#[source] E),
    /// The store's reply could not be decoded.
    #[error("malformed store reply: {0}")]
    Decode(#[from] DecodeError),
    /// The request was rejected before reaching the store.
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] InvalidRequest),
}

impl<E> LimiterError<E> {
    /// Check if this error came from the store.
    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    /// Check if this error is a reply decoding failure.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_))
    }

    /// Check if the request was rejected locally.
    pub fn is_invalid_request(&self) -> bool {
        matches!(self, Self::InvalidRequest(_))
    }

    /// Get the store error if this is a `Store` variant.
    pub fn into_store(self) -> Option<E> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("connection refused")]
    struct Refused;

    #[test]
    fn display_messages() {
        let e: LimiterError<Refused> = LimiterError::Store(Refused);
        assert_eq!(e.to_string(), "store error: connection refused");
        assert!(e.is_store());

        let e: LimiterError<Refused> = DecodeError::Arity { expected: 4, actual: 2 }.into();
        assert_eq!(e.to_string(), "malformed store reply: expected 4 reply elements, got 2");
        assert!(e.is_decode());

        let e: LimiterError<Refused> = InvalidRequest::from(LimitError::ZeroRate).into();
        assert_eq!(e.to_string(), "invalid request: invalid limit: rate must be > 0");
        assert!(e.is_invalid_request());
        assert!(e.into_store().is_none());
    }

    #[test]
    fn field_error_names_value() {
        let e = DecodeError::Field {
            index: 2,
            name: "retry_after",
            kind: ValueKind::Text("soon".into()),
        };
        assert_eq!(e.to_string(), "reply element 2 (retry_after) is not numeric: text \"soon\"");
    }

    #[test]
    fn store_error_is_source() {
        use std::error::Error;
        let e: LimiterError<Refused> = LimiterError::Store(Refused);
        assert_eq!(e.source().map(|s| s.to_string()).as_deref(), Some("connection refused"));
    }
}
