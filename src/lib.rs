#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # cellrate
//!
//! Distributed rate limiting for async Rust using the Generic Cell Rate Algorithm (GCRA).
//!
//! ## Features
//!
//! - **Shared state**: every decision is a single atomic step against a store shared by
//!   all callers, so limits hold across threads, tasks and machines
//! - **Burst policies**: `N` per second/minute/hour, or any period with burst above rate
//! - **Rich decisions**: remaining capacity, retry-after and reset-after timing
//! - **Pluggable stores** behind [`GcraStore`]: in-memory here, Redis in `cellrate-redis`
//! - **Tower middleware** keyed per request
//!
//! ## Quick Start
//!
//! ```rust
//! use cellrate::{InMemoryStore, Limit, Limiter};
//!
//! #[tokio::main]
//! async fn main() {
//!     let limiter = Limiter::new(InMemoryStore::new());
//!     let limit = Limit::per_minute(100);
//!
//!     match limiter.allow_n("client-7", &limit, 5).await {
//!         Ok(d) if d.allowed => println!("go ahead, {} left", d.remaining),
//!         Ok(d) => println!("slow down, retry in {:?}", d.retry_after),
//!         Err(e) => eprintln!("decision unknown: {e}"),
//!     }
//! }
//! ```

pub mod clock;
pub mod error;
pub mod limit;
pub mod prelude;
pub mod rate_limit;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DecodeError, InvalidRequest, LimitError, LimiterError};
pub use limit::Limit;
pub use rate_limit::gcra::GcraArgs;
pub use rate_limit::{
    Decision, GcraStore, InMemoryStore, Limiter, RateLimitError, RateLimitLayer, RateLimitService,
    ReplyValue, DEFAULT_PREFIX,
};
