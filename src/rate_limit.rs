//! Rate limiting primitives.
//!
//! This module provides the building blocks for distributed rate limiting:
//! - [`Limiter`]: The gatekeeper. Stateless; every decision is one atomic store step.
//! - [`GcraStore`]: The capability a shared store must offer (atomic GCRA execution).
//! - [`Decision`]: The result of an admission check.
//! - [`RateLimitLayer`]: Tower middleware that enforces a limit per request key.
//!
//! # Architecture
//!
//! The system is designed to be modular:
//! - **Middleware**: `RateLimitLayer` wraps your service. It doesn't know *how* limiting works,
//!   only that it should ask a `Limiter`.
//! - **Logic**: The GCRA arithmetic (in the `gcra` module) turns a stored theoretical
//!   arrival time into a decision.
//! - **Storage**: `GcraStore` (in the `store` module) runs that arithmetic atomically, in
//!   memory or inside a distributed backend (e.g., Redis via `cellrate-redis`).

use crate::Limit;
use std::time::Duration;

pub mod gcra;
pub mod limiter;
pub mod middleware;
pub mod store;
pub use limiter::{Limiter, DEFAULT_PREFIX};
pub use middleware::{RateLimitError, RateLimitLayer, RateLimitService};
pub use store::{GcraStore, InMemoryStore, ReplyValue};

/// The decision returned by [`Limiter::allow_n`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    /// The limit that was used to obtain this decision.
    pub limit: Limit,
    /// Whether the events may happen now.
    pub allowed: bool,
    /// The maximum number of units that could be admitted instantaneously for this key
    /// given the state after this call. With 10 per second and 6 units taken this
    /// second, `remaining` is 4. Always within `0..=limit.burst()`.
    pub remaining: u32,
    /// Time until this request would be permitted. `None` unless the limit was exceeded.
    /// Useful for `Retry-After` headers.
    pub retry_after: Option<Duration>,
    /// Time until the key returns to its initial, fully available state; equivalently,
    /// until `remaining` equals `limit.burst()`. With 10 per second and a single unit
    /// taken 20ms ago, `reset_after` is 80ms.
    pub reset_after: Duration,
}

impl Decision {
    /// Helper to check if allowed.
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// `retry_after` in seconds, with `-1.0` standing for "no wait".
    pub fn retry_after_secs(&self) -> f64 {
        self.retry_after.map_or(-1.0, |d| d.as_secs_f64())
    }
}
