use crate::error::{DecodeError, InvalidRequest, LimiterError, ValueKind};
use crate::rate_limit::gcra::GcraArgs;
use crate::rate_limit::store::{GcraStore, ReplyValue};
use crate::rate_limit::Decision;
use crate::Limit;
use std::sync::Arc;
use std::time::Duration;

/// Namespace prepended to every caller key.
pub const DEFAULT_PREFIX: &str = "rate:";

/// Wire value of `retry_after` meaning "no wait".
const NO_WAIT: f64 = -1.0;

const REPLY_FIELDS: [&str; 4] = ["limited", "remaining", "retry_after", "reset_after"];

/// Controls how frequently events are allowed to happen for a key.
///
/// The limiter holds no mutable state: each check is a single atomic step executed by the
/// store, so any number of limiters (in any number of processes) sharing a store enforce
/// one limit per key. Clones share the same store via `Arc`.
///
/// # Examples
/// ```
/// use cellrate::{InMemoryStore, Limit, Limiter};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let limiter = Limiter::new(InMemoryStore::new());
/// let decision = limiter.allow("user:42", &Limit::per_second(10)).await.unwrap();
/// assert!(decision.allowed);
/// assert_eq!(decision.remaining, 9);
/// # }
/// ```
#[derive(Debug)]
pub struct Limiter<S> {
    store: Arc<S>,
    prefix: Arc<str>,
}

impl<S> Clone for Limiter<S> {
    fn clone(&self) -> Self {
        Self { store: self.store.clone(), prefix: self.prefix.clone() }
    }
}

impl<S> Limiter<S> {
    /// Create a limiter over `store` using [`DEFAULT_PREFIX`].
    pub fn new(store: S) -> Self {
        Self::from_arc(Arc::new(store))
    }

    /// Create a limiter over an already shared store.
    pub fn from_arc(store: Arc<S>) -> Self {
        Self { store, prefix: Arc::from(DEFAULT_PREFIX) }
    }

    /// Override the key namespace.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Arc::from(prefix.into());
        self
    }

    /// Key namespace.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S> Limiter<S>
where
    S: GcraStore,
{
    /// Shorthand for `allow_n(key, limit, 1)`.
    pub async fn allow(&self, key: &str, limit: &Limit) -> Result<Decision, LimiterError<S::Error>> {
        self.allow_n(key, limit, 1).await
    }

    /// Report whether `n` events for `key` may happen now, consuming capacity if so.
    ///
    /// Requests for more than `limit.burst()` units are always denied with
    /// `remaining == 0`. Denied requests consume nothing.
    ///
    /// # Errors
    /// - [`LimiterError::InvalidRequest`] for an empty key, `n == 0` or a degenerate limit;
    ///   the store is not contacted.
    /// - [`LimiterError::Store`] when the atomic step could not run; no state changed.
    /// - [`LimiterError::Decode`] when the store's reply has an unexpected shape.
    ///
    /// No retries are made; an error means the decision is unknown.
    pub async fn allow_n(
        &self,
        key: &str,
        limit: &Limit,
        n: u32,
    ) -> Result<Decision, LimiterError<S::Error>> {
        if key.is_empty() {
            return Err(InvalidRequest::EmptyKey.into());
        }
        if n == 0 {
            return Err(InvalidRequest::ZeroUnits.into());
        }
        limit.validate().map_err(InvalidRequest::from)?;

        let store_key = format!("{}{}", self.prefix, key);
        let args = GcraArgs::new(limit, n);

        let reply = self.store.execute(&store_key, &args).await.map_err(|e| {
            tracing::warn!(target: "cellrate", key = %store_key, error = %e, "rate limit store failed");
            LimiterError::Store(e)
        })?;

        let decision = decode(reply, *limit).map_err(|e| {
            tracing::warn!(target: "cellrate", key = %store_key, error = %e, "malformed rate limit reply");
            LimiterError::Decode(e)
        })?;

        if decision.allowed {
            tracing::trace!(
                target: "cellrate",
                key = %store_key,
                units = n,
                remaining = decision.remaining,
                "rate limit allowed"
            );
        } else {
            tracing::debug!(
                target: "cellrate",
                key = %store_key,
                units = n,
                retry_after = ?decision.retry_after,
                "rate limit exceeded"
            );
        }

        Ok(decision)
    }
}

fn decode(reply: Vec<ReplyValue>, limit: Limit) -> Result<Decision, DecodeError> {
    if reply.len() != REPLY_FIELDS.len() {
        return Err(DecodeError::Arity { expected: REPLY_FIELDS.len(), actual: reply.len() });
    }

    let allowed = match int_field(&reply, 0)? {
        0 => true,
        1 => false,
        other => return Err(DecodeError::Flag(other)),
    };
    let remaining = int_field(&reply, 1)?.clamp(0, i64::from(limit.burst()));
    let retry_after = float_field(&reply, 2)?;
    let reset_after = float_field(&reply, 3)?;

    Ok(Decision {
        limit,
        allowed,
        remaining: u32::try_from(remaining).unwrap_or(limit.burst()),
        retry_after: (retry_after != NO_WAIT).then(|| secs(retry_after)),
        reset_after: secs(reset_after),
    })
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}

fn field_error(index: usize, value: &ReplyValue) -> DecodeError {
    let kind = match value {
        ReplyValue::Text(s) => ValueKind::Text(s.clone()),
        ReplyValue::Bytes(b) => ValueKind::Bytes(b.len()),
        ReplyValue::Float(f) => ValueKind::Float(*f),
        ReplyValue::Int(i) => ValueKind::Int(*i),
        ReplyValue::Nil => ValueKind::Nil,
    };
    DecodeError::Field { index, name: REPLY_FIELDS[index], kind }
}

fn parse_text(value: &ReplyValue) -> Option<&str> {
    match value {
        ReplyValue::Text(s) => Some(s.trim()),
        ReplyValue::Bytes(b) => std::str::from_utf8(b).ok().map(str::trim),
        _ => None,
    }
}

fn int_field(reply: &[ReplyValue], index: usize) -> Result<i64, DecodeError> {
    let value = &reply[index];
    let parsed = match value {
        ReplyValue::Int(i) => Some(*i),
        ReplyValue::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(*f as i64),
        other => parse_text(other).and_then(|s| s.parse::<i64>().ok()),
    };
    parsed.ok_or_else(|| field_error(index, value))
}

fn float_field(reply: &[ReplyValue], index: usize) -> Result<f64, DecodeError> {
    let value = &reply[index];
    let parsed = match value {
        ReplyValue::Int(i) => Some(*i as f64),
        ReplyValue::Float(f) => Some(*f),
        other => parse_text(other).and_then(|s| s.parse::<f64>().ok()),
    };
    parsed.filter(|f| f.is_finite()).ok_or_else(|| field_error(index, value))
}
