//! Convenient re-exports for common cellrate types.
pub use crate::{
    clock::{Clock, ManualClock, SystemClock},
    error::{LimitError, LimiterError},
    limit::Limit,
    rate_limit::{
        gcra::GcraArgs, Decision, GcraStore, InMemoryStore, Limiter, RateLimitError,
        RateLimitLayer, ReplyValue,
    },
};
